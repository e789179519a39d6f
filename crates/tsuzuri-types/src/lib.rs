//! Entry identity and entry types for tsuzuri.
//!
//! This crate is the leaf of the workspace: typed entry IDs, store positions,
//! and the hydrated [`Entry`] model that the window engine loads and renders.
//! It has **no internal tsuzuri dependencies**.
//!
//! # Key Types
//!
//! |-------------------|----------------------------------------------|
//! | Type              | Purpose                                      |
//! |-------------------|----------------------------------------------|
//! | [`EntryId`]       | Stable, never-reused entry identity          |
//! | [`Position`]      | Store-local ordinal (row position)           |
//! | [`Entry`]         | Hydrated conversation entry                  |
//! | [`EntryKind`]     | What an entry *is* (message, call, info...)  |
//! | [`EntryStatus`]   | Delivery/progress state of an entry          |
//! |-------------------|----------------------------------------------|

pub mod entry;
pub mod ids;

pub use entry::{Entry, EntryBuilder, EntryKind, EntryStatus};
pub use ids::{EntryId, Position};

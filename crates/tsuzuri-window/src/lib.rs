//! Windowed conversation loading for tsuzuri.
//!
//! Keeps a bounded, contiguous window of conversation entries in memory,
//! pages it older and newer against an [`EntryStore`], hydrates entities
//! through a cache chain, and hands render states plus keyed edit scripts
//! to a [`RenderConsumer`]. At most one build runs at a time; intents that
//! arrive meanwhile are merged into a single pending request.

pub mod cache;
pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod hydrate;
pub mod pipeline;
pub mod render;
pub mod request;
pub mod store;
pub mod window;

pub use cache::{EntryCache, MemoryEntryCache, NoopCache};
pub use config::PipelineConfig;
pub use diff::{EditOp, EditScript, UpdateKind, compute_update, diff};
pub use error::{ConfigError, PipelineError, RenderError, Result, StoreError, WindowError};
pub use events::{LandingOutcome, PipelineEvent};
pub use hydrate::{EntityHydrator, HydrateStats, Hydrated};
pub use pipeline::{
    BuildToken, PipelineHandle, PipelineStatus, RenderConsumer, RenderUpdate, spawn_pipeline,
};
pub use render::{ChangeKind, RenderState, RenderedItem, Style, ViewSnapshot};
pub use request::{LoadIntent, LoadRequest, LoadType, RequestCoordinator, ScrollIntent};
pub use store::{EntryStore, IdFilter, MemoryStore, StoreChange, StoreRead};
pub use window::{LoadDirection, MAX_WINDOW, WindowBatch, WindowLoader};

pub use tsuzuri_types::{Entry, EntryId, EntryKind, EntryStatus, Position};

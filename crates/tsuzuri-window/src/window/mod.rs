//! Load windows: the bounded id range the renderer materializes.

pub mod batch;
pub mod loader;

pub use batch::{MAX_WINDOW, MergeOutcome, WindowBatch};
pub use loader::{LoadedWindow, PriorWindow, WindowLoader, initial_page_size};

use tsuzuri_types::EntryId;

/// Which way a window computation moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadDirection {
    /// Extend toward older entries.
    Older,
    /// Extend toward newer entries.
    Newer,
    /// Center on an entry.
    Around(EntryId),
    /// The newest page.
    Newest,
    /// Keep the current window, re-validated.
    SameLocation,
}

impl LoadDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadDirection::Older => "older",
            LoadDirection::Newer => "newer",
            LoadDirection::Around(_) => "around",
            LoadDirection::Newest => "newest",
            LoadDirection::SameLocation => "same_location",
        }
    }
}

impl std::fmt::Display for LoadDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadDirection::Around(id) => write!(f, "around({})", id.short()),
            other => f.write_str(other.as_str()),
        }
    }
}

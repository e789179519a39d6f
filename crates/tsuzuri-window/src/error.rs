//! Error types for the window engine.
//!
//! Three failure classes matter to the scheduler:
//!
//! - store read errors: transient, the build is dropped and retried on the
//!   next tick;
//! - consistency violations: the incremental path disagreed with the store,
//!   so the build falls back to a full newest-page reload;
//! - per-item render errors: the item is dropped, the load continues.

use thiserror::Error;
use tsuzuri_types::{EntryId, EntryKind};

/// Errors surfaced by a backing store read.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The read transaction could not be opened.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A query inside the transaction failed.
    #[error("store read failed: {0}")]
    Read(String),
}

/// Errors computing a window or hydrating it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The incremental path disagreed with the store.
    ///
    /// Never guessed around: callers abandon the incremental result and
    /// reload from the newest page.
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),
}

impl WindowError {
    /// Create a ConsistencyViolation with context.
    pub fn violation(msg: impl Into<String>) -> Self {
        Self::ConsistencyViolation(msg.into())
    }

    /// Bulk hydration returned fewer entries than requested.
    pub fn missing_entries(missing: &[EntryId]) -> Self {
        let preview: Vec<String> = missing.iter().take(8).map(|id| id.short()).collect();
        Self::ConsistencyViolation(format!(
            "bulk fetch missing {} entries: [{}]",
            missing.len(),
            preview.join(", ")
        ))
    }

    /// Check whether this error should trigger the full-reload fallback.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, Self::ConsistencyViolation(_))
    }
}

/// Per-item failure building render state. The item is dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("entry {id} has unsupported kind '{kind}'")]
    UnsupportedKind { id: EntryId, kind: EntryKind },
}

/// Errors loading or validating [`PipelineConfig`](crate::config::PipelineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors from the pipeline handle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline shut down")]
    Shutdown,
}

/// Result type for window operations.
pub type Result<T> = std::result::Result<T, WindowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = WindowError::violation("overlap mismatch at 3");
        assert!(err.is_consistency_violation());
        assert!(err.to_string().contains("overlap mismatch at 3"));

        let err: WindowError = StoreError::Read("disk I/O".into()).into();
        assert!(!err.is_consistency_violation());
        assert!(err.to_string().contains("disk I/O"));
    }

    #[test]
    fn test_missing_entries_preview() {
        let missing: Vec<EntryId> = (0..20).map(EntryId::from_u128).collect();
        let err = WindowError::missing_entries(&missing);
        let msg = err.to_string();
        assert!(msg.contains("missing 20 entries"));
        assert!(err.is_consistency_violation());
    }
}

//! Backing store interface and an in-memory implementation.
//!
//! The engine reads the conversation log through [`EntryStore::read`], which
//! opens one read transaction per build. Everything a build needs (window
//! query, hydration, edge probes) goes through that single [`StoreRead`], so
//! the window and the entities describe the same point in time.
//!
//! [`MemoryStore`] is a reference implementation used by tests and the
//! simulator. Its read transaction holds the log's read lock, so writers
//! block until the build finishes with its snapshot.
//!
//! # Concurrency Model
//!
//! - parking_lot `RwLock` around the log
//! - change broadcasting so callers can turn writes into reload intents

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use parking_lot::{RwLock, RwLockReadGuard};
use tokio::sync::broadcast;
use tracing::debug;

use tsuzuri_types::{Entry, EntryId, Position};

use crate::error::StoreError;

/// Result type for store reads.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Which ids to fetch. Results are always in chronological order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdFilter {
    /// The `limit` ids immediately older than the position.
    Before(Position),
    /// The `limit` ids immediately newer than the position.
    After(Position),
    /// Ids with positions in `start..=end`, oldest first.
    Range { start: Position, end: Position },
    /// The `limit` newest ids.
    Newest,
}

/// One consistent read transaction over the conversation log.
pub trait StoreRead {
    /// Number of entries currently in the conversation.
    fn count(&self) -> StoreResult<u64>;

    /// Fetch up to `limit` ids matching the filter, oldest first.
    fn fetch_ids(&self, filter: IdFilter, limit: usize) -> StoreResult<Vec<EntryId>>;

    /// Current position of an entry, or `None` if it no longer exists.
    fn position_of(&self, id: &EntryId) -> StoreResult<Option<Position>>;

    /// Bulk-load entries. Ids that do not exist are absent from the map.
    fn fetch_entities(&self, ids: &[EntryId]) -> StoreResult<HashMap<EntryId, Entry>>;
}

/// A store that can open read transactions from any thread.
pub trait EntryStore: Send + Sync + 'static {
    fn read(&self) -> StoreResult<Box<dyn StoreRead + '_>>;
}

// ============================================================================
// MemoryStore
// ============================================================================

/// Change notifications from [`MemoryStore`] writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreChange {
    Inserted(EntryId),
    Updated(EntryId),
    Deleted(EntryId),
    /// Bulk rewrite; individual deletions are not known.
    Reset,
}

#[derive(Default)]
struct MemoryLog {
    rows: BTreeMap<Position, Entry>,
    index: HashMap<EntryId, Position>,
    next_position: Position,
}

/// In-memory conversation log.
pub struct MemoryStore {
    log: RwLock<MemoryLog>,
    change_tx: broadcast::Sender<StoreChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(1024);
        Self {
            log: RwLock::new(MemoryLog::default()),
            change_tx,
        }
    }

    /// Create a store pre-populated with entries, oldest first.
    pub fn with_entries(entries: impl IntoIterator<Item = Entry>) -> Self {
        let store = Self::new();
        {
            let mut log = store.log.write();
            for entry in entries {
                Self::append_locked(&mut log, entry);
            }
        }
        store
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.change_tx.subscribe()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.log.read().rows.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.log.read().rows.is_empty()
    }

    /// All ids, oldest first.
    pub fn ids(&self) -> Vec<EntryId> {
        self.log.read().rows.values().map(|e| e.id).collect()
    }

    pub fn get(&self, id: &EntryId) -> Option<Entry> {
        let log = self.log.read();
        log.index.get(id).and_then(|pos| log.rows.get(pos)).cloned()
    }

    /// Append an entry at the newest end. Returns its position.
    pub fn append(&self, entry: Entry) -> Position {
        let id = entry.id;
        let position = {
            let mut log = self.log.write();
            Self::append_locked(&mut log, entry)
        };
        let _ = self.change_tx.send(StoreChange::Inserted(id));
        position
    }

    fn append_locked(log: &mut MemoryLog, entry: Entry) -> Position {
        let position = log.next_position;
        log.next_position = position.next();
        log.index.insert(entry.id, position);
        log.rows.insert(position, entry);
        position
    }

    /// Replace an existing entry in place, bumping its revision.
    ///
    /// Returns `false` if the entry does not exist.
    pub fn update(&self, mut entry: Entry) -> bool {
        let id = entry.id;
        {
            let mut log = self.log.write();
            let Some(&position) = log.index.get(&id) else {
                return false;
            };
            let revision = log.rows.get(&position).map(|e| e.revision).unwrap_or(0);
            entry.revision = revision + 1;
            log.rows.insert(position, entry);
        }
        let _ = self.change_tx.send(StoreChange::Updated(id));
        true
    }

    /// Delete an entry. Survivors keep their positions.
    pub fn delete(&self, id: &EntryId) -> bool {
        {
            let mut log = self.log.write();
            let Some(position) = log.index.remove(id) else {
                return false;
            };
            log.rows.remove(&position);
        }
        let _ = self.change_tx.send(StoreChange::Deleted(*id));
        true
    }

    /// Delete several entries without announcing them individually.
    ///
    /// Models a write from another process: observers only learn that
    /// something changed.
    pub fn delete_silently(&self, ids: &[EntryId]) {
        {
            let mut log = self.log.write();
            for id in ids {
                if let Some(position) = log.index.remove(id) {
                    log.rows.remove(&position);
                }
            }
        }
        debug!(count = ids.len(), "external delete");
        let _ = self.change_tx.send(StoreChange::Reset);
    }
}

impl EntryStore for MemoryStore {
    fn read(&self) -> StoreResult<Box<dyn StoreRead + '_>> {
        Ok(Box::new(MemoryRead {
            log: self.log.read(),
        }))
    }
}

/// Read transaction over a [`MemoryStore`]; holds the read lock.
struct MemoryRead<'a> {
    log: RwLockReadGuard<'a, MemoryLog>,
}

impl StoreRead for MemoryRead<'_> {
    fn count(&self) -> StoreResult<u64> {
        Ok(self.log.rows.len() as u64)
    }

    fn fetch_ids(&self, filter: IdFilter, limit: usize) -> StoreResult<Vec<EntryId>> {
        let rows = &self.log.rows;
        let ids = match filter {
            IdFilter::Before(pos) => {
                let mut ids: Vec<EntryId> =
                    rows.range(..pos).rev().take(limit).map(|(_, e)| e.id).collect();
                ids.reverse();
                ids
            }
            IdFilter::After(pos) => rows
                .range((Bound::Excluded(pos), Bound::Unbounded))
                .take(limit)
                .map(|(_, e)| e.id)
                .collect(),
            IdFilter::Range { start, end } => {
                if start > end {
                    return Err(StoreError::Read(format!("inverted range {start}..={end}")));
                }
                rows.range(start..=end).take(limit).map(|(_, e)| e.id).collect()
            }
            IdFilter::Newest => {
                let mut ids: Vec<EntryId> =
                    rows.values().rev().take(limit).map(|e| e.id).collect();
                ids.reverse();
                ids
            }
        };
        Ok(ids)
    }

    fn position_of(&self, id: &EntryId) -> StoreResult<Option<Position>> {
        Ok(self.log.index.get(id).copied())
    }

    fn fetch_entities(&self, ids: &[EntryId]) -> StoreResult<HashMap<EntryId, Entry>> {
        Ok(ids
            .iter()
            .filter_map(|id| {
                let position = self.log.index.get(id)?;
                self.log.rows.get(position).map(|e| (*id, e.clone()))
            })
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================

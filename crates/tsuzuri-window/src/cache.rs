//! Best-effort entity caches consulted before the bulk store fetch.
//!
//! A cache never has to be complete. It does have to forget: every build
//! invalidates the ids its request marks as updated or deleted, and a reset
//! clears every cache, so an entry edited while paged out is refetched when
//! it pages back in. Anything a cache misses is fetched from the store.

use std::collections::{HashMap, VecDeque};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::trace;

use tsuzuri_types::{Entry, EntryId};

/// An opportunistic entry cache.
pub trait EntryCache: Send + Sync {
    /// Return whichever of `ids` the cache currently holds.
    fn try_get(&self, ids: &[EntryId]) -> HashMap<EntryId, Entry>;

    /// Offer freshly fetched entries to the cache.
    fn put(&self, entries: &[Entry]);

    /// Forget `ids`; they changed in the store.
    fn invalidate(&self, ids: &[EntryId]);

    /// Forget everything.
    fn clear(&self);
}

/// A cache that never holds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl EntryCache for NoopCache {
    fn try_get(&self, _ids: &[EntryId]) -> HashMap<EntryId, Entry> {
        HashMap::new()
    }

    fn put(&self, _entries: &[Entry]) {}

    fn invalidate(&self, _ids: &[EntryId]) {}

    fn clear(&self) {}
}

/// Bounded in-memory cache keyed by entry id.
///
/// Evicts in insertion order once `capacity` is exceeded. Re-putting an
/// entry replaces the value but keeps its original eviction slot.
pub struct MemoryEntryCache {
    entries: DashMap<EntryId, Entry>,
    order: Mutex<VecDeque<EntryId>>,
    capacity: usize,
}

impl MemoryEntryCache {
    /// Default capacity: a little over two full windows.
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop a single entry.
    pub fn remove(&self, id: &EntryId) {
        if self.entries.remove(id).is_some() {
            self.order.lock().retain(|queued| queued != id);
        }
    }
}

impl Default for MemoryEntryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryCache for MemoryEntryCache {
    fn try_get(&self, ids: &[EntryId]) -> HashMap<EntryId, Entry> {
        ids.iter()
            .filter_map(|id| self.entries.get(id).map(|e| (*id, e.clone())))
            .collect()
    }

    fn put(&self, entries: &[Entry]) {
        let mut order = self.order.lock();
        for entry in entries {
            if self.entries.insert(entry.id, entry.clone()).is_none() {
                order.push_back(entry.id);
            }
        }
        let mut evicted = 0usize;
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.entries.remove(&oldest);
                evicted += 1;
            }
        }
        if evicted > 0 {
            trace!(evicted, capacity = self.capacity, "entry cache evicted");
        }
    }

    fn invalidate(&self, ids: &[EntryId]) {
        for id in ids {
            self.remove(id);
        }
    }

    fn clear(&self) {
        let mut order = self.order.lock();
        self.entries.clear();
        order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsuzuri_types::EntryKind;

    fn entry(n: u128) -> Entry {
        Entry::builder(EntryId::from_u128(n), EntryKind::OutgoingMessage).build()
    }

    #[test]
    fn test_noop_cache_misses() {
        let cache = NoopCache;
        cache.put(&[entry(1)]);
        assert!(cache.try_get(&[EntryId::from_u128(1)]).is_empty());
    }

    #[test]
    fn test_memory_cache_partial_hit() {
        let cache = MemoryEntryCache::new();
        cache.put(&[entry(1), entry(2)]);
        let hits = cache.try_get(&[
            EntryId::from_u128(1),
            EntryId::from_u128(2),
            EntryId::from_u128(3),
        ]);
        assert_eq!(hits.len(), 2);
        assert!(!hits.contains_key(&EntryId::from_u128(3)));
    }

    #[test]
    fn test_memory_cache_evicts_oldest() {
        let cache = MemoryEntryCache::with_capacity(2);
        cache.put(&[entry(1), entry(2)]);
        cache.put(&[entry(3)]);
        assert_eq!(cache.len(), 2);
        assert!(cache.try_get(&[EntryId::from_u128(1)]).is_empty());
        assert_eq!(cache.try_get(&[EntryId::from_u128(3)]).len(), 1);
    }

    #[test]
    fn test_memory_cache_replace_keeps_slot() {
        let cache = MemoryEntryCache::with_capacity(2);
        cache.put(&[entry(1), entry(2)]);
        let mut edited = entry(1);
        edited.body = "edited".into();
        cache.put(&[edited]);
        assert_eq!(cache.len(), 2);
        let hit = cache.try_get(&[EntryId::from_u128(1)]);
        assert_eq!(hit[&EntryId::from_u128(1)].body, "edited");

        cache.remove(&EntryId::from_u128(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_memory_cache_invalidate_and_clear() {
        let cache = MemoryEntryCache::with_capacity(3);
        cache.put(&[entry(1), entry(2), entry(3)]);
        cache.invalidate(&[EntryId::from_u128(2), EntryId::from_u128(9)]);
        assert_eq!(cache.len(), 2);
        assert!(cache.try_get(&[EntryId::from_u128(2)]).is_empty());

        // the freed slot is reusable without evicting survivors
        cache.put(&[entry(4)]);
        assert_eq!(cache.try_get(&[EntryId::from_u128(1)]).len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        cache.put(&[entry(5)]);
        assert_eq!(cache.len(), 1);
    }
}

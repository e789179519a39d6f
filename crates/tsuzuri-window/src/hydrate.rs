//! Id → entry resolution for a computed window.
//!
//! Resolution order per id: the reuse map (entries from the render state
//! being replaced), then each cache in order, then a single bulk fetch from
//! the read transaction for whatever is left. Ids the request marked as
//! updated skip the caches so stale copies never win over the store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, error};

use tsuzuri_types::{Entry, EntryId};

use crate::cache::EntryCache;
use crate::error::{Result, WindowError};
use crate::store::StoreRead;

/// Where a hydration's entries came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HydrateStats {
    pub reused: usize,
    pub cached: usize,
    pub fetched: usize,
}

#[derive(Clone, Debug)]
pub struct Hydrated {
    /// One entry per requested id, in request order.
    pub entries: Vec<Entry>,
    pub stats: HydrateStats,
}

pub struct EntityHydrator<'a> {
    caches: &'a [Arc<dyn EntryCache>],
}

impl<'a> EntityHydrator<'a> {
    pub fn new(caches: &'a [Arc<dyn EntryCache>]) -> Self {
        Self { caches }
    }

    /// Resolve `ids` to entries.
    ///
    /// `reuse` may hold entries from the previous render state; `fresh` lists
    /// ids that must come from the store. Fails with a consistency violation
    /// if the store cannot produce an id the window says exists.
    pub fn hydrate(
        &self,
        txn: &dyn StoreRead,
        ids: &[EntryId],
        reuse: &HashMap<EntryId, Entry>,
        fresh: &HashSet<EntryId>,
    ) -> Result<Hydrated> {
        let mut stats = HydrateStats::default();
        let mut resolved: HashMap<EntryId, Entry> = HashMap::with_capacity(ids.len());

        for id in ids {
            if fresh.contains(id) {
                continue;
            }
            if let Some(entry) = reuse.get(id) {
                resolved.insert(*id, entry.clone());
                stats.reused += 1;
            }
        }

        for cache in self.caches {
            let wanted: Vec<EntryId> = ids
                .iter()
                .filter(|id| !fresh.contains(id) && !resolved.contains_key(id))
                .copied()
                .collect();
            if wanted.is_empty() {
                break;
            }
            for (id, entry) in cache.try_get(&wanted) {
                // caches may return extras; only take what was asked for
                if wanted.contains(&id) && resolved.insert(id, entry).is_none() {
                    stats.cached += 1;
                }
            }
        }

        let missing: Vec<EntryId> = ids
            .iter()
            .filter(|id| !resolved.contains_key(id))
            .copied()
            .collect();
        if !missing.is_empty() {
            let fetched = txn.fetch_entities(&missing)?;
            let absent: Vec<EntryId> = missing
                .iter()
                .filter(|id| !fetched.contains_key(id))
                .copied()
                .collect();
            if !absent.is_empty() {
                let err = WindowError::missing_entries(&absent);
                error!(requested = missing.len(), absent = absent.len(), "{err}");
                return Err(err);
            }
            stats.fetched = fetched.len();
            let for_cache: Vec<Entry> = fetched.values().cloned().collect();
            for cache in self.caches {
                cache.put(&for_cache);
            }
            resolved.extend(fetched);
        }

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            match resolved.remove(id) {
                Some(entry) => entries.push(entry),
                None => {
                    return Err(WindowError::violation(format!(
                        "entry {} resolved twice or not at all",
                        id.short()
                    )));
                }
            }
        }

        debug!(
            total = entries.len(),
            reused = stats.reused,
            cached = stats.cached,
            fetched = stats.fetched,
            "hydrated window"
        );
        Ok(Hydrated { entries, stats })
    }
}

//! Window computation against one store read transaction.
//!
//! Every load starts by re-validating the previous window against the
//! snapshot: deleted ids are filtered out (or, after an external reset, the
//! surviving range is re-queried) and both edge flags are refreshed by
//! probing one id past each edge. Extensions then re-read the surviving run
//! alongside the new page and go through
//! [`WindowBatch::merge_if_overlapping`], so any disagreement between the
//! previous window and the store surfaces as a consistency violation
//! instead of a silently wrong window.

use std::collections::HashSet;

use tracing::{debug, trace};

use tsuzuri_types::{EntryId, Position};

use super::LoadDirection;
use super::batch::{MergeOutcome, WindowBatch};
use crate::error::{Result, WindowError};
use crate::store::{IdFilter, StoreRead};

/// Comfortable first page for a viewport: enough items to fill the longer
/// dimension at the average item height, never fewer than `min_count`.
pub fn initial_page_size(
    viewport_width: f64,
    viewport_height: f64,
    avg_item_height: f64,
    min_count: usize,
) -> usize {
    let longer = viewport_width.max(viewport_height);
    if !(longer.is_finite() && avg_item_height.is_finite() && avg_item_height > 0.0) {
        return min_count;
    }
    let fill = (longer / avg_item_height).ceil();
    if fill <= 0.0 {
        min_count
    } else {
        min_count.max(fill as usize)
    }
}

/// The previous window and what the request knows changed since.
#[derive(Clone, Copy, Debug)]
pub struct PriorWindow<'a> {
    pub batch: &'a WindowBatch,
    pub deleted: &'a HashSet<EntryId>,
    /// The store was rewritten externally; deletions are not enumerated.
    pub did_reset: bool,
}

/// A computed window and the direction actually used to produce it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedWindow {
    pub batch: WindowBatch,
    pub direction: LoadDirection,
}

/// Computes windows. Cheap to construct per build.
#[derive(Clone, Copy, Debug)]
pub struct WindowLoader {
    max_window: usize,
    initial_page_size: usize,
}

impl WindowLoader {
    pub fn new(max_window: usize, initial_page_size: usize) -> Self {
        let max_window = max_window.max(1);
        Self {
            max_window,
            initial_page_size: initial_page_size.clamp(1, max_window),
        }
    }

    pub fn max_window(&self) -> usize {
        self.max_window
    }

    pub fn initial_page_size(&self) -> usize {
        self.initial_page_size
    }

    /// How many ids a load in `direction` asks for.
    pub fn count_for(&self, direction: LoadDirection) -> usize {
        let count = match direction {
            LoadDirection::Older | LoadDirection::Newer => self.initial_page_size.saturating_mul(2),
            LoadDirection::Around(_) | LoadDirection::Newest | LoadDirection::SameLocation => {
                self.initial_page_size
            }
        };
        count.clamp(1, self.max_window)
    }

    /// Compute the window for `direction`.
    pub fn load(
        &self,
        txn: &dyn StoreRead,
        direction: LoadDirection,
        prior: PriorWindow<'_>,
    ) -> Result<LoadedWindow> {
        if txn.count()? == 0 {
            debug!(%direction, "store is empty");
            return Ok(LoadedWindow {
                batch: self.empty(),
                direction,
            });
        }

        let survivors = self.revalidate(txn, prior)?;
        trace!(
            prior = prior.batch.len(),
            survivors = survivors.len(),
            did_reset = prior.did_reset,
            "revalidated prior window"
        );

        let mut direction = direction;
        if direction == LoadDirection::SameLocation
            && !prior.batch.is_empty()
            && !prior.batch.can_load_newer
            && survivors.can_load_newer
        {
            debug!("newest edge was loaded and new entries arrived, extending newer");
            direction = LoadDirection::Newer;
        }

        let count = self.count_for(direction);
        let (batch, direction) = match direction {
            LoadDirection::Newest => (self.load_newest(txn, count)?, direction),
            LoadDirection::Around(id) => self.load_around(txn, id, count)?,
            LoadDirection::Older | LoadDirection::Newer | LoadDirection::SameLocation
                if survivors.is_empty() =>
            {
                debug!(%direction, "no surviving window, loading newest");
                let count = self.count_for(LoadDirection::Newest);
                (self.load_newest(txn, count)?, LoadDirection::Newest)
            }
            LoadDirection::Older => {
                let mut batch = survivors;
                self.extend_older(txn, &mut batch, count)?;
                batch.trim_newer();
                (batch, direction)
            }
            LoadDirection::Newer => {
                let mut batch = survivors;
                self.extend_newer(txn, &mut batch, count)?;
                batch.trim_older();
                (batch, direction)
            }
            LoadDirection::SameLocation => {
                let mut batch = survivors;
                if batch.len() < self.initial_page_size {
                    debug!(
                        len = batch.len(),
                        page = self.initial_page_size,
                        "window shrank, re-expanding"
                    );
                    self.extend_older(txn, &mut batch, self.initial_page_size)?;
                    self.extend_newer(txn, &mut batch, self.initial_page_size)?;
                }
                batch.trim_older();
                (batch, direction)
            }
        };

        debug!(
            %direction,
            len = batch.len(),
            can_load_older = batch.can_load_older,
            can_load_newer = batch.can_load_newer,
            "window loaded"
        );
        Ok(LoadedWindow { batch, direction })
    }

    fn empty(&self) -> WindowBatch {
        WindowBatch::empty().with_limit(self.max_window)
    }

    fn revalidate(&self, txn: &dyn StoreRead, prior: PriorWindow<'_>) -> Result<WindowBatch> {
        if prior.batch.is_empty() {
            return Ok(self.empty());
        }

        let survivors = if prior.did_reset {
            let mut first = None;
            for id in prior.batch.ids() {
                if let Some(pos) = txn.position_of(id)? {
                    first = Some(pos);
                    break;
                }
            }
            let mut last = None;
            for id in prior.batch.ids().iter().rev() {
                if let Some(pos) = txn.position_of(id)? {
                    last = Some(pos);
                    break;
                }
            }
            match (first, last) {
                (Some(start), Some(end)) => {
                    let ids = txn.fetch_ids(IdFilter::Range { start, end }, self.max_window)?;
                    WindowBatch::new(ids, false, false)
                }
                _ => return Ok(self.empty()),
            }
        } else {
            let mut batch = prior.batch.clone();
            batch.retain(|id| !prior.deleted.contains(id));
            batch
        };
        let mut survivors = survivors.with_limit(self.max_window);

        if let (Some(first), Some(last)) = (survivors.first().copied(), survivors.last().copied()) {
            let first_pos = self.position(txn, &first)?;
            let last_pos = self.position(txn, &last)?;
            survivors.can_load_older = !txn.fetch_ids(IdFilter::Before(first_pos), 1)?.is_empty();
            survivors.can_load_newer = !txn.fetch_ids(IdFilter::After(last_pos), 1)?.is_empty();
        } else {
            survivors.can_load_older = false;
            survivors.can_load_newer = false;
        }
        Ok(survivors)
    }

    fn position(&self, txn: &dyn StoreRead, id: &EntryId) -> Result<Position> {
        txn.position_of(id)?.ok_or_else(|| {
            WindowError::violation(format!("window entry {} is missing from the store", id.short()))
        })
    }

    /// Re-read the ids between the batch's edges as the store sees them.
    fn current_run(&self, txn: &dyn StoreRead, batch: &WindowBatch) -> Result<(Position, Position, Vec<EntryId>)> {
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            return Err(WindowError::violation("cannot extend an empty window"));
        };
        let start = self.position(txn, first)?;
        let end = self.position(txn, last)?;
        let run = txn.fetch_ids(IdFilter::Range { start, end }, batch.len() + 1)?;
        Ok((start, end, run))
    }

    fn extend_older(&self, txn: &dyn StoreRead, batch: &mut WindowBatch, count: usize) -> Result<()> {
        let (start, _, run) = self.current_run(txn, batch)?;
        let mut ids = txn.fetch_ids(IdFilter::Before(start), count + 1)?;
        let more = ids.len() > count;
        if more {
            ids.remove(0);
        }
        ids.extend(run);
        let extension = WindowBatch::new(ids, more, batch.can_load_newer);
        self.apply_extension(batch, &extension, "older")
    }

    fn extend_newer(&self, txn: &dyn StoreRead, batch: &mut WindowBatch, count: usize) -> Result<()> {
        let (_, end, mut ids) = self.current_run(txn, batch)?;
        let mut newer = txn.fetch_ids(IdFilter::After(end), count + 1)?;
        let more = newer.len() > count;
        if more {
            newer.pop();
        }
        ids.extend(newer);
        let extension = WindowBatch::new(ids, batch.can_load_older, more);
        self.apply_extension(batch, &extension, "newer")
    }

    fn apply_extension(&self, batch: &mut WindowBatch, extension: &WindowBatch, edge: &str) -> Result<()> {
        match batch.merge_if_overlapping(extension) {
            MergeOutcome::Mismatch(reason) => {
                Err(WindowError::violation(format!("{edge} extension: {reason}")))
            }
            MergeOutcome::Disjoint => Err(WindowError::violation(format!(
                "{edge} extension does not overlap the window"
            ))),
            outcome => {
                trace!(edge, ?outcome, len = batch.len(), "window extended");
                Ok(())
            }
        }
    }

    fn load_newest(&self, txn: &dyn StoreRead, count: usize) -> Result<WindowBatch> {
        let mut ids = txn.fetch_ids(IdFilter::Newest, count + 1)?;
        let more = ids.len() > count;
        if more {
            ids.remove(0);
        }
        Ok(WindowBatch::new(ids, more, false).with_limit(self.max_window))
    }

    fn load_around(
        &self,
        txn: &dyn StoreRead,
        id: EntryId,
        count: usize,
    ) -> Result<(WindowBatch, LoadDirection)> {
        let Some(pos) = txn.position_of(&id)? else {
            debug!(id = %id.short(), "focus entry not found, loading newest");
            let count = self.count_for(LoadDirection::Newest);
            return Ok((self.load_newest(txn, count)?, LoadDirection::Newest));
        };

        let older_count = count / 2;
        let newer_count = count.saturating_sub(older_count + 1);

        let mut ids = txn.fetch_ids(IdFilter::Before(pos), older_count + 1)?;
        let more_older = ids.len() > older_count;
        if more_older {
            ids.remove(0);
        }
        let mut newer = txn.fetch_ids(IdFilter::After(pos), newer_count + 1)?;
        let more_newer = newer.len() > newer_count;
        if more_newer {
            newer.pop();
        }
        ids.push(id);
        ids.extend(newer);

        let batch = WindowBatch::new(ids, more_older, more_newer).with_limit(self.max_window);
        Ok((batch, LoadDirection::Around(id)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EntryStore, MemoryStore};
    use pretty_assertions::assert_eq;
    use tsuzuri_types::{Entry, EntryKind};

    fn id(n: u128) -> EntryId {
        EntryId::from_u128(n)
    }

    fn ids(range: std::ops::RangeInclusive<u128>) -> Vec<EntryId> {
        range.map(id).collect()
    }

    fn entry(n: u128) -> Entry {
        Entry::builder(id(n), EntryKind::IncomingMessage).build()
    }

    fn store(range: std::ops::RangeInclusive<u128>) -> MemoryStore {
        MemoryStore::with_entries(range.map(entry))
    }

    fn load(
        store: &MemoryStore,
        loader: &WindowLoader,
        direction: LoadDirection,
        prior: &WindowBatch,
        deleted: &[u128],
        did_reset: bool,
    ) -> Result<LoadedWindow> {
        let deleted: HashSet<EntryId> = deleted.iter().copied().map(id).collect();
        let txn = store.read()?;
        loader.load(
            txn.as_ref(),
            direction,
            PriorWindow {
                batch: prior,
                deleted: &deleted,
                did_reset,
            },
        )
    }

    #[test]
    fn test_initial_page_size() {
        assert_eq!(initial_page_size(390.0, 844.0, 35.0, 10), 25);
        assert_eq!(initial_page_size(100.0, 100.0, 35.0, 10), 10);
        assert_eq!(initial_page_size(0.0, 0.0, 35.0, 10), 10);
        assert_eq!(initial_page_size(800.0, 600.0, 0.0, 10), 10);
    }

    #[test]
    fn test_counts_are_clamped() {
        let loader = WindowLoader::new(50, 30);
        assert_eq!(loader.count_for(LoadDirection::Newest), 30);
        assert_eq!(loader.count_for(LoadDirection::Older), 50);
        let loader = WindowLoader::new(50, 0);
        assert_eq!(loader.count_for(LoadDirection::SameLocation), 1);
    }

    #[test]
    fn test_empty_store_yields_empty_batch() {
        let store = MemoryStore::new();
        let loader = WindowLoader::new(500, 10);
        let loaded = load(&store, &loader, LoadDirection::Newest, &WindowBatch::empty(), &[], false)
            .unwrap();
        assert!(loaded.batch.is_empty());
        assert!(!loaded.batch.can_load_older);
        assert!(!loaded.batch.can_load_newer);
    }

    #[test]
    fn test_newest_probes_older_edge() {
        let store = store(1..=30);
        let loader = WindowLoader::new(500, 10);
        let loaded = load(&store, &loader, LoadDirection::Newest, &WindowBatch::empty(), &[], false)
            .unwrap();
        assert_eq!(loaded.batch.ids(), ids(21..=30).as_slice());
        assert!(loaded.batch.can_load_older);
        assert!(!loaded.batch.can_load_newer);

        let store = crate::store::MemoryStore::with_entries((1..=10).map(entry));
        let loaded = load(&store, &loader, LoadDirection::Newest, &WindowBatch::empty(), &[], false)
            .unwrap();
        assert_eq!(loaded.batch.len(), 10);
        assert!(!loaded.batch.can_load_older);
    }

    #[test]
    fn test_around_centers_on_focus() {
        let store = store(1..=100);
        let loader = WindowLoader::new(500, 10);
        let loaded = load(
            &store,
            &loader,
            LoadDirection::Around(id(50)),
            &WindowBatch::empty(),
            &[],
            false,
        )
        .unwrap();
        assert_eq!(loaded.batch.ids(), ids(45..=54).as_slice());
        assert!(loaded.batch.can_load_older);
        assert!(loaded.batch.can_load_newer);
        assert_eq!(loaded.direction, LoadDirection::Around(id(50)));
    }

    #[test]
    fn test_around_missing_falls_back_to_newest() {
        let store = store(1..=20);
        let loader = WindowLoader::new(500, 10);
        let loaded = load(
            &store,
            &loader,
            LoadDirection::Around(id(999)),
            &WindowBatch::empty(),
            &[],
            false,
        )
        .unwrap();
        assert_eq!(loaded.direction, LoadDirection::Newest);
        assert_eq!(loaded.batch.ids(), ids(11..=20).as_slice());
    }

    #[test]
    fn test_older_extends_and_trims_newer() {
        let store = store(1..=100);
        let loader = WindowLoader::new(30, 10);
        let prior = WindowBatch::new(ids(81..=100), true, false);
        let loaded = load(&store, &loader, LoadDirection::Older, &prior, &[], false).unwrap();
        // 20 older ids prepended to 20 survivors, then trimmed to 30 from the newer edge
        assert_eq!(loaded.batch.ids(), ids(61..=90).as_slice());
        assert!(loaded.batch.can_load_older);
        assert!(loaded.batch.can_load_newer);
    }

    #[test]
    fn test_older_reaches_oldest() {
        let store = store(1..=25);
        let loader = WindowLoader::new(500, 10);
        let prior = WindowBatch::new(ids(16..=25), true, false);
        let loaded = load(&store, &loader, LoadDirection::Older, &prior, &[], false).unwrap();
        assert_eq!(loaded.batch.ids(), ids(1..=25).as_slice());
        assert!(!loaded.batch.can_load_older);
        assert!(!loaded.batch.can_load_newer);
    }

    #[test]
    fn test_newer_extends_and_trims_older() {
        let store = store(1..=100);
        let loader = WindowLoader::new(25, 5);
        let prior = WindowBatch::new(ids(1..=20), false, true);
        let loaded = load(&store, &loader, LoadDirection::Newer, &prior, &[], false).unwrap();
        assert_eq!(loaded.batch.ids(), ids(6..=30).as_slice());
        assert!(loaded.batch.can_load_older);
        assert!(loaded.batch.can_load_newer);
    }

    #[test]
    fn test_older_with_empty_prior_loads_newest() {
        let store = store(1..=40);
        let loader = WindowLoader::new(500, 10);
        let loaded =
            load(&store, &loader, LoadDirection::Older, &WindowBatch::empty(), &[], false).unwrap();
        assert_eq!(loaded.direction, LoadDirection::Newest);
        assert_eq!(loaded.batch.ids(), ids(31..=40).as_slice());
    }

    #[test]
    fn test_same_location_filters_deleted() {
        let store = store(1..=5);
        store.delete(&id(3));
        let loader = WindowLoader::new(500, 3);
        let prior = WindowBatch::new(ids(1..=5), false, false);
        let loaded = load(&store, &loader, LoadDirection::SameLocation, &prior, &[3], false).unwrap();
        assert_eq!(
            loaded.batch.ids(),
            [id(1), id(2), id(4), id(5)].as_slice()
        );
        assert!(!loaded.batch.can_load_older);
        assert!(!loaded.batch.can_load_newer);
    }

    #[test]
    fn test_same_location_reexpands_small_window() {
        let store = store(1..=40);
        store.delete(&id(21));
        let loader = WindowLoader::new(500, 4);
        let prior = WindowBatch::new(ids(20..=22), true, true);
        let loaded =
            load(&store, &loader, LoadDirection::SameLocation, &prior, &[21], false).unwrap();
        let mut expected = ids(16..=20);
        expected.extend(ids(22..=26));
        assert_eq!(loaded.batch.ids(), expected.as_slice());
        assert!(loaded.batch.can_load_older);
        assert!(loaded.batch.can_load_newer);
    }

    #[test]
    fn test_same_location_promotes_to_newer() {
        let store = store(1..=5);
        let loader = WindowLoader::new(500, 3);
        let prior = WindowBatch::new(ids(1..=5), false, false);
        store.append(entry(6));
        store.append(entry(7));
        let loaded = load(&store, &loader, LoadDirection::SameLocation, &prior, &[], false).unwrap();
        assert_eq!(loaded.direction, LoadDirection::Newer);
        assert_eq!(loaded.batch.ids(), ids(1..=7).as_slice());
        assert!(!loaded.batch.can_load_newer);
    }

    #[test]
    fn test_same_location_without_newest_edge_does_not_promote() {
        let store = store(1..=50);
        let loader = WindowLoader::new(500, 3);
        let prior = WindowBatch::new(ids(10..=20), true, true);
        let loaded = load(&store, &loader, LoadDirection::SameLocation, &prior, &[], false).unwrap();
        assert_eq!(loaded.direction, LoadDirection::SameLocation);
        assert_eq!(loaded.batch.ids(), ids(10..=20).as_slice());
    }

    #[test]
    fn test_reset_requeries_surviving_range() {
        let store = store(1..=10);
        store.delete_silently(&[id(3), id(4)]);
        let loader = WindowLoader::new(500, 2);
        let prior = WindowBatch::new(ids(3..=6), true, true);
        let loaded = load(&store, &loader, LoadDirection::SameLocation, &prior, &[], true).unwrap();
        assert_eq!(loaded.batch.ids(), ids(5..=6).as_slice());
        assert!(loaded.batch.can_load_older);
        assert!(loaded.batch.can_load_newer);
    }

    #[test]
    fn test_unreported_edge_delete_is_violation() {
        let store = store(1..=10);
        store.delete_silently(&[id(3)]);
        let loader = WindowLoader::new(500, 2);
        let prior = WindowBatch::new(ids(3..=6), true, true);
        let err = load(&store, &loader, LoadDirection::SameLocation, &prior, &[], false).unwrap_err();
        assert!(err.is_consistency_violation());
    }

    #[test]
    fn test_unreported_interior_delete_fails_merge() {
        let store = store(1..=10);
        store.delete_silently(&[id(4)]);
        let loader = WindowLoader::new(500, 2);
        let prior = WindowBatch::new(ids(3..=6), true, true);
        let err = load(&store, &loader, LoadDirection::Older, &prior, &[], false).unwrap_err();
        assert!(err.is_consistency_violation());
    }

    #[test]
    fn test_repeated_paging_stays_bounded_and_contiguous() {
        let store = store(1..=2_000);
        let loader = WindowLoader::new(50, 10);
        let mut batch = load(&store, &loader, LoadDirection::Newest, &WindowBatch::empty(), &[], false)
            .unwrap()
            .batch;
        for step in 0..40 {
            let direction = if step % 4 == 3 { LoadDirection::Newer } else { LoadDirection::Older };
            batch = load(&store, &loader, direction, &batch, &[], false).unwrap().batch;
            assert!(batch.len() <= 50);
            let all = store.ids();
            let start = all.iter().position(|i| Some(i) == batch.first()).unwrap();
            assert_eq!(&all[start..start + batch.len()], batch.ids());
        }
    }
}

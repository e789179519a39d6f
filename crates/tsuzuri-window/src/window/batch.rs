//! Contiguous id window with edge flags.
//!
//! A [`WindowBatch`] is the id-only form of a load window: a contiguous run
//! of the store's order, oldest first, plus whether more entries exist past
//! either edge. Batches never hold more than their limit after a trim, and
//! a merge either succeeds completely or leaves the batch untouched.

use std::collections::HashSet;

use tracing::warn;

use tsuzuri_types::EntryId;

/// Largest window the engine will ever materialize.
pub const MAX_WINDOW: usize = 500;

/// What [`WindowBatch::merge_if_overlapping`] did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No shared edge; nothing changed.
    Disjoint,
    /// The other batch was a sub-slice; only flags were combined.
    Contained,
    /// Appended this many ids at the newer edge.
    ExtendedNewer(usize),
    /// Prepended this many ids at the older edge.
    ExtendedOlder(usize),
    /// The overlapping runs disagreed. The batch is unchanged.
    Mismatch(String),
}

impl MergeOutcome {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, MergeOutcome::Mismatch(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowBatch {
    ids: Vec<EntryId>,
    pub can_load_older: bool,
    pub can_load_newer: bool,
    limit: usize,
}

impl Default for WindowBatch {
    fn default() -> Self {
        Self::empty()
    }
}

impl WindowBatch {
    /// A batch with no ids and nothing to load on either side.
    pub fn empty() -> Self {
        Self {
            ids: Vec::new(),
            can_load_older: false,
            can_load_newer: false,
            limit: MAX_WINDOW,
        }
    }

    /// Build a batch from ids already in chronological order.
    ///
    /// Duplicate ids are dropped, keeping the first occurrence.
    pub fn new(ids: Vec<EntryId>, can_load_older: bool, can_load_newer: bool) -> Self {
        let mut seen = HashSet::with_capacity(ids.len());
        let ids = ids.into_iter().filter(|id| seen.insert(*id)).collect();
        Self {
            ids,
            can_load_older,
            can_load_newer,
            limit: MAX_WINDOW,
        }
    }

    /// Replace the window limit. Clamped to at least one id.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn ids(&self) -> &[EntryId] {
        &self.ids
    }

    pub fn into_ids(self) -> Vec<EntryId> {
        self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn first(&self) -> Option<&EntryId> {
        self.ids.first()
    }

    pub fn last(&self) -> Option<&EntryId> {
        self.ids.last()
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        self.ids.contains(id)
    }

    pub fn index_of(&self, id: &EntryId) -> Option<usize> {
        self.ids.iter().position(|candidate| candidate == id)
    }

    /// Keep only the ids for which `keep` returns true. Flags are untouched.
    pub fn retain(&mut self, mut keep: impl FnMut(&EntryId) -> bool) {
        self.ids.retain(|id| keep(id));
    }

    /// Prepend older ids. `can_load_older` becomes `!reached_oldest`.
    pub fn insert_older(&mut self, ids: &[EntryId], reached_oldest: bool) {
        let fresh = self.fresh_ids(ids);
        self.ids.splice(0..0, fresh);
        self.can_load_older = !reached_oldest;
    }

    /// Append newer ids. `can_load_newer` becomes `!reached_newest`.
    pub fn insert_newer(&mut self, ids: &[EntryId], reached_newest: bool) {
        let fresh = self.fresh_ids(ids);
        self.ids.extend(fresh);
        self.can_load_newer = !reached_newest;
    }

    fn fresh_ids(&self, ids: &[EntryId]) -> Vec<EntryId> {
        let present: HashSet<&EntryId> = self.ids.iter().collect();
        let mut seen = HashSet::new();
        let fresh: Vec<EntryId> = ids
            .iter()
            .filter(|id| !present.contains(id) && seen.insert(**id))
            .copied()
            .collect();
        if fresh.len() != ids.len() {
            warn!(
                dropped = ids.len() - fresh.len(),
                "window insert skipped ids already present"
            );
        }
        fresh
    }

    /// Drop the oldest ids beyond the limit. Returns how many were dropped.
    pub fn trim_older(&mut self) -> usize {
        let excess = self.ids.len().saturating_sub(self.limit);
        if excess > 0 {
            self.ids.drain(..excess);
            self.can_load_older = true;
        }
        excess
    }

    /// Drop the newest ids beyond the limit. Returns how many were dropped.
    pub fn trim_newer(&mut self) -> usize {
        let excess = self.ids.len().saturating_sub(self.limit);
        if excess > 0 {
            self.ids.truncate(self.limit);
            self.can_load_newer = true;
        }
        excess
    }

    /// Merge `other` into this batch when the two share an edge.
    ///
    /// The overlapping run must match id-for-id. On any disagreement the
    /// batch is left exactly as it was and [`MergeOutcome::Mismatch`] is
    /// returned. Edge flags combine by AND. Limits are not enforced here;
    /// callers trim afterwards.
    pub fn merge_if_overlapping(&mut self, other: &WindowBatch) -> MergeOutcome {
        let (Some(other_first), Some(other_last)) = (other.ids.first(), other.ids.last()) else {
            return MergeOutcome::Disjoint;
        };

        let outcome = match (self.index_of(other_first), self.index_of(other_last)) {
            (None, None) => return MergeOutcome::Disjoint,

            // other starts inside self and runs past its newer edge
            (Some(start), None) => {
                let run = &self.ids[start..];
                if other.ids.len() < run.len() || other.ids[..run.len()] != *run {
                    return self.mismatch(format!(
                        "newer overlap of {} ids diverges at index {start}",
                        run.len()
                    ));
                }
                let added = &other.ids[run.len()..];
                if let Some(dup) = self.first_duplicate(added) {
                    return self.mismatch(format!("newer extension repeats {dup:?}"));
                }
                let n = added.len();
                self.ids.extend_from_slice(added);
                MergeOutcome::ExtendedNewer(n)
            }

            // other ends inside self and runs past its older edge
            (None, Some(end)) => {
                let run_len = end + 1;
                let n = other.ids.len();
                if n < run_len || other.ids[n - run_len..] != self.ids[..run_len] {
                    return self.mismatch(format!(
                        "older overlap of {run_len} ids diverges before index {end}"
                    ));
                }
                let added = &other.ids[..n - run_len];
                if let Some(dup) = self.first_duplicate(added) {
                    return self.mismatch(format!("older extension repeats {dup:?}"));
                }
                let added = added.to_vec();
                let count = added.len();
                self.ids.splice(0..0, added);
                MergeOutcome::ExtendedOlder(count)
            }

            (Some(start), Some(end)) => {
                if end < start || self.ids[start..=end] != other.ids[..] {
                    return self.mismatch(format!(
                        "contained run {start}..={end} differs from other batch"
                    ));
                }
                MergeOutcome::Contained
            }
        };

        self.can_load_older &= other.can_load_older;
        self.can_load_newer &= other.can_load_newer;
        outcome
    }

    fn first_duplicate(&self, ids: &[EntryId]) -> Option<EntryId> {
        let present: HashSet<&EntryId> = self.ids.iter().collect();
        ids.iter().find(|id| present.contains(id)).copied()
    }

    fn mismatch(&self, reason: String) -> MergeOutcome {
        warn!(len = self.ids.len(), %reason, "window merge mismatch, batch left unchanged");
        MergeOutcome::Mismatch(reason)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Ids keyed by signed ordinal so fixtures can use negative numbers.
    fn id(n: i64) -> EntryId {
        EntryId::from_u128((n + 1_000) as u128)
    }

    fn ids(ns: &[i64]) -> Vec<EntryId> {
        ns.iter().copied().map(id).collect()
    }

    fn batch(ns: &[i64], older: bool, newer: bool) -> WindowBatch {
        WindowBatch::new(ids(ns), older, newer)
    }

    #[test]
    fn test_insert_older_then_trim_newer() {
        let mut b = batch(&[1, 2, 3, 4, 5], true, false).with_limit(5);
        b.insert_older(&ids(&[-1, 0]), true);
        b.trim_newer();
        assert_eq!(b.ids(), ids(&[-1, 0, 1, 2, 3]).as_slice());
        assert!(!b.can_load_older);
        assert!(b.can_load_newer);
    }

    #[test]
    fn test_insert_newer_sets_flag() {
        let mut b = batch(&[1, 2], false, true);
        b.insert_newer(&ids(&[3, 4]), false);
        assert_eq!(b.len(), 4);
        assert!(b.can_load_newer);
        b.insert_newer(&ids(&[5]), true);
        assert!(!b.can_load_newer);
    }

    #[test]
    fn test_insert_skips_duplicates() {
        let mut b = batch(&[1, 2, 3], false, false);
        b.insert_newer(&ids(&[3, 4, 4]), true);
        assert_eq!(b.ids(), ids(&[1, 2, 3, 4]).as_slice());
    }

    #[test]
    fn test_trim_within_limit_is_noop() {
        let mut b = batch(&[1, 2, 3], false, false).with_limit(3);
        assert_eq!(b.trim_older(), 0);
        assert_eq!(b.trim_newer(), 0);
        assert!(!b.can_load_older);
        assert!(!b.can_load_newer);
    }

    #[test]
    fn test_trim_older_sets_flag() {
        let mut b = batch(&[1, 2, 3, 4], false, false).with_limit(2);
        assert_eq!(b.trim_older(), 2);
        assert_eq!(b.ids(), ids(&[3, 4]).as_slice());
        assert!(b.can_load_older);
        assert!(!b.can_load_newer);
    }

    #[test]
    fn test_merge_tail_overlap_appends_suffix() {
        let mut b = batch(&[1, 2, 3, 4], true, true);
        let other = batch(&[3, 4, 5, 6], true, false);
        assert_eq!(b.merge_if_overlapping(&other), MergeOutcome::ExtendedNewer(2));
        assert_eq!(b.ids(), ids(&[1, 2, 3, 4, 5, 6]).as_slice());
        assert!(b.can_load_older);
        assert!(!b.can_load_newer);
    }

    #[test]
    fn test_merge_head_overlap_prepends_prefix() {
        let mut b = batch(&[3, 4, 5], true, false);
        let other = batch(&[1, 2, 3, 4], false, true);
        assert_eq!(b.merge_if_overlapping(&other), MergeOutcome::ExtendedOlder(2));
        assert_eq!(b.ids(), ids(&[1, 2, 3, 4, 5]).as_slice());
        assert!(!b.can_load_older);
        assert!(!b.can_load_newer);
    }

    #[test]
    fn test_merge_containment_combines_flags() {
        let mut b = batch(&[1, 2, 3, 4], true, true);
        let other = batch(&[2, 3], true, false);
        assert_eq!(b.merge_if_overlapping(&other), MergeOutcome::Contained);
        assert_eq!(b.len(), 4);
        assert!(b.can_load_older);
        assert!(!b.can_load_newer);
    }

    #[test]
    fn test_merge_disjoint_is_noop() {
        let mut b = batch(&[1, 2], true, true);
        let before = b.clone();
        assert_eq!(b.merge_if_overlapping(&batch(&[7, 8], false, false)), MergeOutcome::Disjoint);
        assert_eq!(b.merge_if_overlapping(&WindowBatch::empty()), MergeOutcome::Disjoint);
        assert_eq!(b, before);
    }

    #[test]
    fn test_merge_mismatch_leaves_batch_unchanged() {
        let mut b = batch(&[1, 2, 3, 4], true, true);
        let before = b.clone();

        // tail overlap where the store skipped id 4
        let other = batch(&[3, 5, 6], false, false);
        assert!(b.merge_if_overlapping(&other).is_mismatch());
        assert_eq!(b, before);

        // head overlap with a foreign id in the run
        let other = batch(&[0, 9, 2], false, false);
        assert!(b.merge_if_overlapping(&other).is_mismatch());
        assert_eq!(b, before);

        // containment in the wrong order
        let other = batch(&[3, 2], false, false);
        assert!(b.merge_if_overlapping(&other).is_mismatch());
        assert_eq!(b, before);
    }

    #[test]
    fn test_bounded_after_repeated_extensions() {
        let mut b = batch(&[0], true, true).with_limit(10);
        let mut next = 1;
        for round in 0..20 {
            let extra: Vec<i64> = (next..next + 4).collect();
            next += 4;
            if round % 3 == 0 {
                let older: Vec<i64> = extra.iter().map(|n| -n).rev().collect();
                b.insert_older(&ids(&older), false);
                b.trim_newer();
            } else {
                b.insert_newer(&ids(&extra), false);
                b.trim_older();
            }
            assert!(b.len() <= 10, "round {round} grew to {}", b.len());
        }
    }
}

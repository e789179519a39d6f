//! Keyed diff between two render states.
//!
//! Items are matched by [`EntryId`]. Common items whose relative order
//! survives (the longest increasing run of their old indices, taken in new
//! order) stay in place; every other common item is a move. Ops are emitted
//! deletes (descending old index), moves, inserts (ascending new index),
//! then updates.
//!
//! # Applying a script
//!
//! 1. Remove deleted and moved items by their *old* index.
//! 2. Place inserted and moved items at their *new* index.
//! 3. The items that stayed fill the remaining slots in order.
//! 4. Refresh updated items in place.
//!
//! [`EditScript::apply`] implements exactly these steps; a consumer doing
//! the same against its own item list ends up with the new state.

use std::collections::{HashMap, HashSet};

use tsuzuri_types::EntryId;

use crate::render::{ChangeKind, RenderState};
use crate::request::LoadType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EditOp {
    /// Remove the item at this old index.
    Delete(usize),
    /// Insert the item at this new index.
    Insert(usize),
    /// The item at the old index ends up at the new index.
    Move(usize, usize),
    /// The item stays in place but must be refreshed.
    Update(usize, usize),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EditScript {
    pub ops: Vec<EditOp>,
}

impl EditScript {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Count ops by kind: (deletes, inserts, moves, updates).
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        self.ops.iter().fold((0, 0, 0, 0), |(d, i, m, u), op| match op {
            EditOp::Delete(_) => (d + 1, i, m, u),
            EditOp::Insert(_) => (d, i + 1, m, u),
            EditOp::Move(..) => (d, i, m + 1, u),
            EditOp::Update(..) => (d, i, m, u + 1),
        })
    }

    /// Apply the script to `old`, taking inserted, moved and updated values
    /// from `new`.
    ///
    /// Returns `None` if the script references an index outside either
    /// list or leaves the result with holes.
    pub fn apply<T: Clone>(&self, old: &[T], new: &[T]) -> Option<Vec<T>> {
        let mut removed = HashSet::new();
        let mut slots: Vec<Option<T>> = vec![None; new.len()];

        for op in &self.ops {
            match *op {
                EditOp::Delete(i) => {
                    if i >= old.len() {
                        return None;
                    }
                    removed.insert(i);
                }
                EditOp::Move(i, j) => {
                    if i >= old.len() {
                        return None;
                    }
                    removed.insert(i);
                    *slots.get_mut(j)? = Some(new.get(j)?.clone());
                }
                EditOp::Insert(j) => {
                    *slots.get_mut(j)? = Some(new.get(j)?.clone());
                }
                EditOp::Update(..) => {}
            }
        }

        let mut stayed = old
            .iter()
            .enumerate()
            .filter(|(i, _)| !removed.contains(i))
            .map(|(_, item)| item.clone());
        for slot in slots.iter_mut().filter(|slot| slot.is_none()) {
            *slot = Some(stayed.next()?);
        }
        if stayed.next().is_some() {
            return None;
        }

        for op in &self.ops {
            if let EditOp::Update(_, j) = *op {
                *slots.get_mut(j)? = Some(new.get(j)?.clone());
            }
        }

        slots.into_iter().collect()
    }
}

/// Keyed diff of two id sequences.
///
/// `changes` classifies ids present in both; an id absent from it is
/// untouched. Ids must be unique within each sequence.
pub fn diff(
    old: &[EntryId],
    new: &[EntryId],
    changes: &HashMap<EntryId, ChangeKind>,
) -> EditScript {
    let old_index: HashMap<EntryId, usize> =
        old.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let new_ids: HashSet<&EntryId> = new.iter().collect();

    // (old index, new index) for common ids, in new order
    let common: Vec<(usize, usize)> = new
        .iter()
        .enumerate()
        .filter_map(|(j, id)| old_index.get(id).map(|&i| (i, j)))
        .collect();
    let olds: Vec<usize> = common.iter().map(|&(i, _)| i).collect();
    let kept = longest_increasing_run(&olds);

    let mut ops = Vec::new();

    for (i, id) in old.iter().enumerate().rev() {
        if !new_ids.contains(id) {
            ops.push(EditOp::Delete(i));
        }
    }

    let mut updates = Vec::new();
    for (k, &(i, j)) in common.iter().enumerate() {
        if kept.contains(&k) {
            if changes.contains_key(&new[j]) {
                updates.push(EditOp::Update(i, j));
            }
        } else {
            ops.push(EditOp::Move(i, j));
        }
    }

    for (j, id) in new.iter().enumerate() {
        if !old_index.contains_key(id) {
            ops.push(EditOp::Insert(j));
        }
    }

    ops.extend(updates);
    EditScript { ops }
}

/// Indices (into `seq`) of one longest strictly increasing subsequence.
fn longest_increasing_run(seq: &[usize]) -> HashSet<usize> {
    // tails[len] = index into seq of the smallest tail of a run of length len + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut parent: Vec<Option<usize>> = vec![None; seq.len()];

    for (k, &value) in seq.iter().enumerate() {
        let at = tails.partition_point(|&t| seq[t] < value);
        if at > 0 {
            parent[k] = Some(tails[at - 1]);
        }
        if at == tails.len() {
            tails.push(k);
        } else {
            tails[at] = k;
        }
    }

    let mut run = HashSet::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(k) = cursor {
        run.insert(k);
        cursor = parent[k];
    }
    run
}

// ============================================================================
// Update decision
// ============================================================================

/// What the consumer has to do to show a new render state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    /// Nothing visible changed.
    Minor,
    /// Replace everything.
    ReloadAll,
    Diff {
        script: EditScript,
        should_animate: bool,
    },
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Minor => "minor",
            UpdateKind::ReloadAll => "reload_all",
            UpdateKind::Diff { .. } => "diff",
        }
    }
}

/// Decide how to move from `prior` to `next`.
///
/// `force_reload` covers everything that invalidates rendered state
/// wholesale: a style change, a request that may not reuse rendered state,
/// or a fallback after a consistency violation.
pub fn compute_update(
    prior: &RenderState,
    next: &RenderState,
    changes: &HashMap<EntryId, ChangeKind>,
    load_type: LoadType,
    force_reload: bool,
) -> UpdateKind {
    if force_reload || prior.is_empty_initial() {
        return UpdateKind::ReloadAll;
    }
    let script = diff(&prior.ids(), &next.ids(), changes);
    if script.is_empty() {
        return UpdateKind::Minor;
    }
    let should_animate = should_animate(load_type, &script, next, changes);
    UpdateKind::Diff {
        script,
        should_animate,
    }
}

/// Only in-place refreshes that touch the tail animate: new messages or a
/// typing indicator arriving at the bottom, and their neighbours' cluster
/// adjustments.
pub fn should_animate(
    load_type: LoadType,
    script: &EditScript,
    next: &RenderState,
    changes: &HashMap<EntryId, ChangeKind>,
) -> bool {
    if load_type != LoadType::SameLocation || script.is_empty() {
        return false;
    }
    let tail_start = next.len().saturating_sub(2);
    script.ops.iter().all(|op| match *op {
        EditOp::Insert(j) => {
            j >= tail_start
                && next
                    .items
                    .get(j)
                    .is_some_and(|item| item.entity.kind.is_live_activity())
        }
        EditOp::Update(_, j) => {
            j >= tail_start
                && next
                    .items
                    .get(j)
                    .is_some_and(|item| changes.get(&item.id) == Some(&ChangeKind::Appearance))
        }
        EditOp::Delete(_) | EditOp::Move(..) => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{RenderInputs, Style, ViewSnapshot, build_render_state};
    use crate::window::WindowBatch;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use tsuzuri_types::{Entry, EntryKind};

    fn id(n: u128) -> EntryId {
        EntryId::from_u128(n)
    }

    fn ids(ns: &[u128]) -> Vec<EntryId> {
        ns.iter().copied().map(id).collect()
    }

    fn state(prior: &RenderState, entries: Vec<Entry>, view: &ViewSnapshot) -> (RenderState, HashMap<EntryId, ChangeKind>) {
        let window = WindowBatch::new(entries.iter().map(|e| e.id).collect(), false, false);
        let built = build_render_state(RenderInputs {
            id: prior.id + 1,
            request_id: prior.request_id + 1,
            load_type: LoadType::SameLocation,
            window,
            entities: entries,
            style: Style::new(390.0, 844.0),
            view,
            avg_item_height: 35.0,
            prior,
            reuse_rendered: true,
        });
        (built.state, built.changes)
    }

    fn msg(n: u128, author: &str) -> Entry {
        Entry::builder(id(n), EntryKind::IncomingMessage)
            .author(author)
            .body(format!("message {n}"))
            .created_at(n as u64)
            .build()
    }

    fn info(n: u128) -> Entry {
        Entry::builder(id(n), EntryKind::Info).body("group renamed").build()
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let old = ids(&[1, 2, 3]);
        assert!(diff(&old, &old, &HashMap::new()).is_empty());
    }

    #[test]
    fn test_diff_emission_order() {
        let old = ids(&[1, 2, 3, 4]);
        let new = ids(&[4, 1, 5, 3]);
        let changes: HashMap<EntryId, ChangeKind> = [(id(3), ChangeKind::State)].into_iter().collect();
        let script = diff(&old, &new, &changes);
        assert_eq!(
            script.ops,
            vec![
                EditOp::Delete(1),
                EditOp::Move(3, 0),
                EditOp::Insert(2),
                EditOp::Update(2, 3),
            ]
        );
    }

    #[test]
    fn test_deletes_descend_inserts_ascend() {
        let old = ids(&[1, 2, 3, 4, 5]);
        let new = ids(&[2, 6, 4, 7]);
        let script = diff(&old, &new, &HashMap::new());
        assert_eq!(
            script.ops,
            vec![
                EditOp::Delete(4),
                EditOp::Delete(2),
                EditOp::Delete(0),
                EditOp::Insert(1),
                EditOp::Insert(3),
            ]
        );
    }

    #[test]
    fn test_apply_reproduces_new_sequence() {
        let mut rng = StdRng::seed_from_u64(0x7575_7a75);
        for round in 0..200 {
            let old_len = rng.gen_range(0..30);
            let mut pool: Vec<u128> = (0..60).collect();
            pool.shuffle(&mut rng);
            let old: Vec<u128> = pool[..old_len].to_vec();

            // keep some, drop some, shuffle a little, add fresh ids
            let mut new: Vec<u128> = old.iter().copied().filter(|_| rng.gen_bool(0.7)).collect();
            if new.len() > 2 && rng.gen_bool(0.5) {
                let a = rng.gen_range(0..new.len());
                let b = rng.gen_range(0..new.len());
                new.swap(a, b);
            }
            for fresh in pool[old_len..].iter().take(rng.gen_range(0..5)) {
                let at = rng.gen_range(0..=new.len());
                new.insert(at, *fresh);
            }

            // items carry a revision so updates are observable
            let old_items: Vec<(EntryId, u32)> = old.iter().map(|n| (id(*n), 0)).collect();
            let mut changes = HashMap::new();
            let new_items: Vec<(EntryId, u32)> = new
                .iter()
                .map(|n| {
                    let bumped = old.contains(n) && rng.gen_bool(0.2);
                    if bumped {
                        changes.insert(id(*n), ChangeKind::State);
                    }
                    (id(*n), u32::from(bumped))
                })
                .collect();

            let old_ids: Vec<EntryId> = old_items.iter().map(|(i, _)| *i).collect();
            let new_ids: Vec<EntryId> = new_items.iter().map(|(i, _)| *i).collect();
            let script = diff(&old_ids, &new_ids, &changes);
            assert_eq!(
                script.apply(&old_items, &new_items),
                Some(new_items.clone()),
                "round {round}: {old:?} -> {new:?}"
            );
        }
    }

    #[test]
    fn test_lis_prefers_fewest_moves() {
        let old = ids(&[1, 2, 3, 4, 5, 6]);
        let new = ids(&[2, 3, 4, 5, 6, 1]);
        let script = diff(&old, &new, &HashMap::new());
        assert_eq!(script.ops, vec![EditOp::Move(0, 5)]);
    }

    #[test]
    fn test_compute_update_identical_is_minor() {
        let view = ViewSnapshot::default();
        let (first, _) = state(&RenderState::initial(), vec![msg(1, "a"), msg(2, "b")], &view);
        let (second, changes) = state(&first, vec![msg(1, "a"), msg(2, "b")], &view);
        assert_eq!(
            compute_update(&first, &second, &changes, LoadType::SameLocation, false),
            UpdateKind::Minor
        );
    }

    #[test]
    fn test_compute_update_first_load_and_forced() {
        let view = ViewSnapshot::default();
        let initial = RenderState::initial();
        let (first, changes) = state(&initial, vec![msg(1, "a")], &view);
        assert_eq!(
            compute_update(&initial, &first, &changes, LoadType::Newest, false),
            UpdateKind::ReloadAll
        );
        let (second, changes) = state(&first, vec![msg(1, "a"), msg(2, "a")], &view);
        assert_eq!(
            compute_update(&first, &second, &changes, LoadType::SameLocation, true),
            UpdateKind::ReloadAll
        );
    }

    #[test]
    fn test_tail_message_insert_animates() {
        let view = ViewSnapshot::default();
        let (first, _) = state(&RenderState::initial(), vec![msg(1, "a"), msg(2, "b")], &view);
        let (second, changes) = state(&first, vec![msg(1, "a"), msg(2, "b"), msg(3, "b")], &view);
        let update = compute_update(&first, &second, &changes, LoadType::SameLocation, false);
        assert_eq!(
            update,
            UpdateKind::Diff {
                script: EditScript { ops: vec![EditOp::Insert(2)] },
                should_animate: true,
            }
        );
    }

    #[test]
    fn test_typing_indicator_insert_animates() {
        let quiet = ViewSnapshot::default();
        let typing = ViewSnapshot {
            typing_author: Some("bea".into()),
        };
        let (first, _) = state(&RenderState::initial(), vec![msg(1, "a")], &quiet);
        let (second, changes) = state(&first, vec![msg(1, "a")], &typing);
        let update = compute_update(&first, &second, &changes, LoadType::SameLocation, false);
        assert!(matches!(update, UpdateKind::Diff { should_animate: true, .. }));
    }

    #[test]
    fn test_non_animating_transitions() {
        let view = ViewSnapshot::default();
        let (first, _) = state(
            &RenderState::initial(),
            vec![msg(1, "a"), msg(2, "a"), msg(3, "a")],
            &view,
        );

        // same tail insert, but as pagination
        let (next, changes) = state(&first, vec![msg(1, "a"), msg(2, "a"), msg(3, "a"), msg(4, "a")], &view);
        assert!(!matches!(
            compute_update(&first, &next, &changes, LoadType::Newer, false),
            UpdateKind::Diff { should_animate: true, .. }
        ));

        // non-message insert at the tail
        let (next, changes) = state(&first, vec![msg(1, "a"), msg(2, "a"), msg(3, "a"), info(4)], &view);
        assert!(matches!(
            compute_update(&first, &next, &changes, LoadType::SameLocation, false),
            UpdateKind::Diff { should_animate: false, .. }
        ));

        // a delete anywhere
        let (next, changes) = state(&first, vec![msg(1, "a"), msg(3, "a")], &view);
        assert!(matches!(
            compute_update(&first, &next, &changes, LoadType::SameLocation, false),
            UpdateKind::Diff { should_animate: false, .. }
        ));

        // state update at the tail
        let mut edited = msg(3, "a");
        edited.revision = 1;
        let (next, changes) = state(&first, vec![msg(1, "a"), msg(2, "a"), edited], &view);
        assert!(matches!(
            compute_update(&first, &next, &changes, LoadType::SameLocation, false),
            UpdateKind::Diff { should_animate: false, .. }
        ));
    }

    #[test]
    fn test_appearance_update_at_tail_animates() {
        let view = ViewSnapshot::default();
        let (first, _) = state(&RenderState::initial(), vec![msg(1, "a"), msg(2, "a")], &view);
        // a late b message lands between them, so 2 now starts its own cluster
        let (next, changes) = state(&first, vec![msg(1, "a"), msg(3, "b"), msg(2, "a")], &view);
        assert_eq!(changes.get(&id(2)), Some(&ChangeKind::Appearance));
        let update = compute_update(&first, &next, &changes, LoadType::SameLocation, false);
        assert_eq!(
            update,
            UpdateKind::Diff {
                script: EditScript {
                    ops: vec![EditOp::Insert(1), EditOp::Update(1, 2)]
                },
                should_animate: true,
            }
        );
    }

    #[test]
    fn test_apply_rejects_bad_script() {
        let old = vec![1, 2];
        let new = vec![1, 2, 3];
        let script = EditScript { ops: vec![EditOp::Insert(7)] };
        assert_eq!(script.apply(&old, &new), None);
        let script = EditScript { ops: vec![] };
        assert_eq!(script.apply(&old, &new), None);
    }
}

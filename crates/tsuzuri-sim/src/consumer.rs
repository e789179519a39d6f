//! A scripted render consumer.
//!
//! Mirrors the item list the way a real list view would: full replacement
//! on `ReloadAll`, edit-script application on `Diff`. Every landing is
//! checked against the render state it claims to produce.

use std::sync::OnceLock;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use tsuzuri_types::EntryId;
use tsuzuri_window::{PipelineHandle, RenderConsumer, RenderUpdate, UpdateKind};

#[derive(Clone, Debug, Default, Serialize)]
pub struct ConsumerStats {
    pub landings: usize,
    pub reloads: usize,
    pub diffs: usize,
    pub animated: usize,
    pub minor: usize,
    /// Landings whose edit script did not reproduce the new state.
    pub mismatches: usize,
    /// Landings whose prior state was not the one last applied.
    pub out_of_order: usize,
}

#[derive(Default)]
struct Mirror {
    render_state_id: u64,
    ids: Vec<EntryId>,
}

/// Applies every update to a mirrored id list, then reports completion.
#[derive(Default)]
pub struct SimConsumer {
    handle: OnceLock<PipelineHandle>,
    mirror: Mutex<Mirror>,
    stats: Mutex<ConsumerStats>,
}

impl SimConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the handle used to report landings complete.
    pub fn attach(&self, handle: PipelineHandle) {
        let _ = self.handle.set(handle);
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats.lock().clone()
    }

    pub fn mirrored_ids(&self) -> Vec<EntryId> {
        self.mirror.lock().ids.clone()
    }

    fn apply(&self, update: &RenderUpdate) {
        let next_ids = update.render_state.ids();
        let mut mirror = self.mirror.lock();
        let mut stats = self.stats.lock();
        stats.landings += 1;

        if mirror.render_state_id != update.prior.id {
            warn!(
                mirrored = mirror.render_state_id,
                prior = update.prior.id,
                "update built against a different prior"
            );
            stats.out_of_order += 1;
        }

        match &update.update {
            UpdateKind::ReloadAll => {
                stats.reloads += 1;
                mirror.ids = next_ids;
            }
            UpdateKind::Minor => {
                stats.minor += 1;
                if mirror.ids != next_ids {
                    warn!(render_state_id = update.render_state_id(), "minor update changed ids");
                    stats.mismatches += 1;
                    mirror.ids = next_ids;
                }
            }
            UpdateKind::Diff {
                script,
                should_animate,
            } => {
                stats.diffs += 1;
                if *should_animate {
                    stats.animated += 1;
                }
                match script.apply(&mirror.ids, &next_ids) {
                    Some(applied) if applied == next_ids => mirror.ids = applied,
                    _ => {
                        warn!(
                            render_state_id = update.render_state_id(),
                            ops = script.len(),
                            "edit script did not reproduce render state"
                        );
                        stats.mismatches += 1;
                        mirror.ids = next_ids;
                    }
                }
            }
        }
        mirror.render_state_id = update.render_state_id();
    }
}

impl RenderConsumer for SimConsumer {
    fn on_render_state_ready(&self, update: RenderUpdate) {
        self.apply(&update);
        debug!(
            render_state_id = update.render_state_id(),
            update = update.update.as_str(),
            items = update.render_state.len(),
            "applied"
        );
        if let Some(handle) = self.handle.get() {
            let _ = handle.notify_landing_complete(update.render_state_id());
        }
    }
}

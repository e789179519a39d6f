//! The worker side of a build: loader → hydrator → render state → diff.
//!
//! Runs on the blocking pool. Everything here is synchronous and reads
//! through a single store transaction per attempt.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error, info_span};

use tsuzuri_types::EntryId;

use crate::cache::EntryCache;
use crate::config::PipelineConfig;
use crate::diff::compute_update;
use crate::error::WindowError;
use crate::hydrate::EntityHydrator;
use crate::render::{RenderInputs, RenderState, Style, ViewSnapshot, build_render_state};
use crate::request::LoadRequest;
use crate::store::EntryStore;
use crate::window::{LoadDirection, PriorWindow, WindowBatch};

use super::RenderUpdate;

/// Single-flight token: holds the id of the request being built, or 0.
#[derive(Debug, Default)]
pub struct BuildToken(AtomicU64);

impl BuildToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the token for `request_id`. Fails if any build holds it.
    pub fn try_acquire(&self, request_id: u64) -> bool {
        request_id != 0
            && self
                .0
                .compare_exchange(0, request_id, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Release the token if `request_id` holds it.
    pub fn release(&self, request_id: u64) -> bool {
        self.0
            .compare_exchange(request_id, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn holder(&self) -> Option<u64> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }
}

/// Everything a worker needs, owned so it can cross into `spawn_blocking`.
pub(crate) struct BuildJob {
    pub request: LoadRequest,
    pub render_state_id: u64,
    pub store: Arc<dyn EntryStore>,
    pub caches: Arc<[Arc<dyn EntryCache>]>,
    pub prior: Arc<RenderState>,
    pub style: Style,
    pub view: ViewSnapshot,
    pub config: PipelineConfig,
}

#[derive(Debug)]
pub(crate) struct BuildOutput {
    pub update: RenderUpdate,
    /// Set when the requested load hit a consistency violation and the
    /// newest page was loaded instead.
    pub fell_back: Option<String>,
}

#[derive(Debug)]
pub(crate) struct BuildFailure {
    pub message: String,
    pub after_fallback: bool,
}

/// Run a build. Consistency violations get one full-reload retry.
pub(crate) fn run_build(job: &BuildJob) -> Result<BuildOutput, BuildFailure> {
    let span = info_span!(
        "window.build",
        request_id = job.request.request_id,
        load_type = %job.request.load_type,
    );
    let _enter = span.enter();

    invalidate_caches(&job.caches, &job.request);

    match attempt(job, false) {
        Ok(update) => Ok(BuildOutput {
            update,
            fell_back: None,
        }),
        Err(err) if err.is_consistency_violation() => {
            error!(%err, "consistency violation, reloading newest page");
            match attempt(job, true) {
                Ok(update) => Ok(BuildOutput {
                    update,
                    fell_back: Some(err.to_string()),
                }),
                Err(fallback_err) => Err(BuildFailure {
                    message: fallback_err.to_string(),
                    after_fallback: true,
                }),
            }
        }
        Err(err) => Err(BuildFailure {
            message: err.to_string(),
            after_fallback: false,
        }),
    }
}

/// Drop cached copies of everything the request says changed.
fn invalidate_caches(caches: &[Arc<dyn EntryCache>], request: &LoadRequest) {
    if request.did_reset {
        for cache in caches {
            cache.clear();
        }
        debug!(caches = caches.len(), "entry caches cleared");
        return;
    }
    let changed: Vec<EntryId> = request
        .updated_ids
        .iter()
        .chain(&request.deleted_ids)
        .copied()
        .collect();
    if changed.is_empty() {
        return;
    }
    for cache in caches {
        cache.invalidate(&changed);
    }
    debug!(ids = changed.len(), "entry caches invalidated");
}

fn attempt(job: &BuildJob, fallback: bool) -> Result<RenderUpdate, WindowError> {
    let request = &job.request;
    let txn = job.store.read()?;
    let loader = job.config.loader(&job.style);

    let no_ids = HashSet::new();
    let no_window = WindowBatch::empty();
    let (direction, prior_window) = if fallback {
        (
            LoadDirection::Newest,
            PriorWindow {
                batch: &no_window,
                deleted: &no_ids,
                did_reset: false,
            },
        )
    } else {
        (
            request.direction(),
            PriorWindow {
                batch: &job.prior.window,
                deleted: &request.deleted_ids,
                did_reset: request.did_reset,
            },
        )
    };

    let loaded = loader.load(txn.as_ref(), direction, prior_window)?;

    // after a violation nothing previously held is trusted
    let reuse = if request.can_reuse_entities && !fallback {
        job.prior.entity_map()
    } else {
        HashMap::new()
    };
    let caches: &[Arc<dyn EntryCache>] = if fallback { &[] } else { &job.caches[..] };
    let hydrated = EntityHydrator::new(caches).hydrate(
        txn.as_ref(),
        loaded.batch.ids(),
        &reuse,
        &request.updated_ids,
    )?;
    drop(txn);

    let style_changed = job.prior.style != job.style;
    let built = build_render_state(RenderInputs {
        id: job.render_state_id,
        request_id: request.request_id,
        load_type: request.load_type,
        window: loaded.batch,
        entities: hydrated.entries,
        style: job.style,
        view: &job.view,
        avg_item_height: job.config.avg_item_height,
        prior: &job.prior,
        reuse_rendered: request.can_reuse_rendered_state && !fallback && !style_changed,
    });

    let force_reload = fallback || !request.can_reuse_rendered_state || style_changed;
    let update = compute_update(
        &job.prior,
        &built.state,
        &built.changes,
        request.load_type,
        force_reload,
    );
    debug!(
        direction = %loaded.direction,
        items = built.state.len(),
        update = update.as_str(),
        reused = hydrated.stats.reused,
        cached = hydrated.stats.cached,
        fetched = hydrated.stats.fetched,
        "build finished"
    );

    Ok(RenderUpdate {
        render_state: Arc::new(built.state),
        prior: job.prior.clone(),
        update,
        request_id: request.request_id,
        load_type: request.load_type,
        direction: loaded.direction,
        scroll_intent: request.scroll_intent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoopCache;
    use crate::diff::UpdateKind;
    use crate::request::{LoadIntent, RequestCoordinator};
    use crate::store::MemoryStore;
    use tsuzuri_types::{Entry, EntryId, EntryKind};

    fn entry(n: u128) -> Entry {
        Entry::builder(EntryId::from_u128(n), EntryKind::IncomingMessage)
            .author("amy")
            .body(format!("message {n}"))
            .build()
    }

    fn job(store: Arc<MemoryStore>, prior: Arc<RenderState>, intent: LoadIntent) -> BuildJob {
        let mut coordinator = RequestCoordinator::new();
        coordinator.register(intent);
        let request = coordinator.build().unwrap();
        BuildJob {
            render_state_id: prior.id + 1,
            request,
            store,
            caches: vec![Arc::new(NoopCache) as Arc<dyn EntryCache>].into(),
            prior,
            style: Style::new(300.0, 300.0),
            view: ViewSnapshot::default(),
            config: PipelineConfig::default(),
        }
    }

    #[test]
    fn test_token_is_exclusive() {
        let token = BuildToken::new();
        assert!(token.try_acquire(1));
        assert!(!token.try_acquire(2));
        assert_eq!(token.holder(), Some(1));
        assert!(!token.release(2));
        assert!(token.release(1));
        assert!(token.holder().is_none());
        assert!(!token.try_acquire(0));
    }

    #[test]
    fn test_first_build_reloads_all() {
        let store = Arc::new(MemoryStore::with_entries((1..=30).map(entry)));
        let out = run_build(&job(
            store,
            Arc::new(RenderState::initial()),
            LoadIntent::Initial { focus: None },
        ))
        .unwrap();
        assert_eq!(out.update.update, UpdateKind::ReloadAll);
        assert_eq!(out.update.render_state.len(), 10);
        assert!(out.update.render_state.can_load_older);
        assert!(out.fell_back.is_none());
    }

    #[test]
    fn test_violation_falls_back_to_newest() {
        let store = Arc::new(MemoryStore::with_entries((1..=30).map(entry)));
        let first = run_build(&job(
            store.clone(),
            Arc::new(RenderState::initial()),
            LoadIntent::Initial { focus: None },
        ))
        .unwrap();

        // an entry inside the window vanishes without being reported
        store.delete_silently(&[EntryId::from_u128(25)]);
        let out = run_build(&job(store, first.update.render_state.clone(), LoadIntent::LoadOlder))
            .unwrap();
        assert!(out.fell_back.is_some());
        assert_eq!(out.update.update, UpdateKind::ReloadAll);
        assert_eq!(out.update.direction, LoadDirection::Newest);
        assert!(!out.update.render_state.ids().contains(&EntryId::from_u128(25)));
    }
}

//! The pipeline actor: owns the coordinator, the current render state and
//! the landing slot. Every transition happens on this task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::cache::EntryCache;
use crate::config::PipelineConfig;
use crate::events::{LandingOutcome, PipelineEvent};
use crate::render::{RenderState, Style, ViewSnapshot};
use crate::request::{LoadIntent, LoadRequest, LoadType, RequestCoordinator};
use crate::store::EntryStore;

use super::build::{BuildFailure, BuildJob, BuildOutput, BuildToken, run_build};
use super::landing::LandingSlot;
use super::{PipelineStatus, RenderConsumer, RenderUpdate, Shared};

// ============================================================================
// Commands
// ============================================================================

pub(crate) enum Command {
    Submit(LoadIntent),
    SetStyle(Style),
    SetView(ViewSnapshot),
    NotifyLandingComplete(u64),
    Flush {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },

    // ── internal ──
    Tick,
    BuildFinished {
        request: LoadRequest,
        result: Result<BuildOutput, BuildFailure>,
    },
    LandPoll,
    LandingFinished {
        render_state_id: u64,
        outcome: LandingOutcome,
    },
}

/// A built update waiting for the consumer to be ready.
struct Awaiting {
    update: RenderUpdate,
    since: Instant,
}

// ============================================================================
// PipelineActor
// ============================================================================

pub(crate) struct PipelineActor {
    config: PipelineConfig,
    store: Arc<dyn EntryStore>,
    caches: Arc<[Arc<dyn EntryCache>]>,
    consumer: Arc<dyn RenderConsumer>,

    coordinator: RequestCoordinator,
    render_state: Arc<RenderState>,
    style: Style,
    view: ViewSnapshot,

    token: BuildToken,
    awaiting: Option<Awaiting>,
    landing: LandingSlot,
    next_render_state_id: u64,

    tick_scheduled: bool,
    poll_scheduled: bool,

    tx: mpsc::WeakUnboundedSender<Command>,
    events: broadcast::Sender<PipelineEvent>,
    shared: Arc<Shared>,
}

impl PipelineActor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: PipelineConfig,
        store: Arc<dyn EntryStore>,
        caches: Arc<[Arc<dyn EntryCache>]>,
        consumer: Arc<dyn RenderConsumer>,
        style: Style,
        tx: mpsc::WeakUnboundedSender<Command>,
        events: broadcast::Sender<PipelineEvent>,
        shared: Arc<Shared>,
    ) -> Self {
        let landing = LandingSlot::new(config.overlap_landings);
        Self {
            config,
            store,
            caches,
            consumer,
            coordinator: RequestCoordinator::new(),
            render_state: Arc::new(RenderState::initial()),
            style,
            view: ViewSnapshot::default(),
            token: BuildToken::new(),
            awaiting: None,
            landing,
            next_render_state_id: 1,
            tick_scheduled: false,
            poll_scheduled: false,
            tx,
            events,
            shared,
        }
    }

    /// Process commands until shutdown or until every handle is dropped.
    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!(
            max_window = self.config.max_window,
            overlap_landings = self.config.overlap_landings,
            "pipeline started"
        );
        while let Some(cmd) = rx.recv().await {
            let keep_running = self.handle_command(cmd);
            self.publish_status();
            if !keep_running {
                break;
            }
        }
        debug!("pipeline actor shutting down");
    }

    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Submit(intent) => self.on_submit(intent),
            Command::SetStyle(style) => self.on_set_style(style),
            Command::SetView(view) => self.on_set_view(view),
            Command::NotifyLandingComplete(render_state_id) => {
                if !self.landing.complete(render_state_id) {
                    debug!(render_state_id, "ignoring completion for unknown landing");
                }
            }
            Command::Flush { reply } => {
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
                return false;
            }
            Command::Tick => {
                self.tick_scheduled = false;
                self.start_build_if_ready();
            }
            Command::BuildFinished { request, result } => self.on_build_finished(request, result),
            Command::LandPoll => {
                self.poll_scheduled = false;
                self.try_land();
            }
            Command::LandingFinished {
                render_state_id,
                outcome,
            } => self.on_landing_finished(render_state_id, outcome),
        }
        true
    }

    // ── Intake ───────────────────────────────────────────────────────────

    fn on_submit(&mut self, intent: LoadIntent) {
        let load_type = intent.load_type();
        if load_type.is_pagination() && self.render_state.is_empty_initial() {
            debug!(%load_type, "ignoring pagination before first render state");
            return;
        }
        self.coordinator.register(intent);
        self.schedule_tick(self.config.tick_debounce());
    }

    fn on_set_style(&mut self, style: Style) {
        if style == self.style {
            return;
        }
        debug!(
            width = style.viewport_width,
            height = style.viewport_height,
            generation = style.generation,
            "style changed"
        );
        self.style = style;
        if !self.render_state.is_empty_initial() {
            self.coordinator.register(LoadIntent::StyleChanged);
        }
        if self.coordinator.has_pending() {
            self.schedule_tick(self.config.tick_debounce());
        }
    }

    fn on_set_view(&mut self, view: ViewSnapshot) {
        if view == self.view {
            return;
        }
        self.view = view;
        if !self.render_state.is_empty_initial() {
            self.coordinator.register(LoadIntent::ReloadWithReuse {
                can_reuse_entities: true,
                can_reuse_rendered_state: true,
            });
            self.schedule_tick(self.config.tick_debounce());
        }
    }

    // ── Building ─────────────────────────────────────────────────────────

    fn start_build_if_ready(&mut self) {
        if !self.style.is_ready() {
            trace!("style not ready, holding pending request");
            return;
        }
        if let Some(holder) = self.token.holder() {
            trace!(holder, "build in flight");
            return;
        }
        let Some(request) = self.coordinator.build() else {
            return;
        };
        if !self.token.try_acquire(request.request_id) {
            warn!(request_id = request.request_id, "building token contended, restoring request");
            self.coordinator.restore(request);
            return;
        }

        let render_state_id = self.next_render_state_id;
        self.next_render_state_id += 1;

        debug!(
            request_id = request.request_id,
            load_type = %request.load_type,
            updated = request.updated_ids.len(),
            deleted = request.deleted_ids.len(),
            did_reset = request.did_reset,
            "starting build"
        );
        self.emit(PipelineEvent::BuildStarted {
            request_id: request.request_id,
            load_type: request.load_type,
        });

        let job = BuildJob {
            request: request.clone(),
            render_state_id,
            store: self.store.clone(),
            caches: self.caches.clone(),
            prior: self.render_state.clone(),
            style: self.style,
            view: self.view.clone(),
            config: self.config.clone(),
        };
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || run_build(&job)).await {
                Ok(result) => result,
                Err(join_err) => Err(BuildFailure {
                    message: format!("build worker failed: {join_err}"),
                    after_fallback: false,
                }),
            };
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::BuildFinished { request, result });
            }
        });
    }

    fn on_build_finished(
        &mut self,
        request: LoadRequest,
        result: Result<BuildOutput, BuildFailure>,
    ) {
        match result {
            Ok(output) => {
                if let Some(reason) = output.fell_back {
                    self.emit(PipelineEvent::FellBack {
                        request_id: request.request_id,
                        reason,
                    });
                }
                let update = output.update;
                self.emit(PipelineEvent::ready(
                    update.request_id,
                    update.render_state_id(),
                    &update.update,
                    update.render_state.len(),
                ));
                self.awaiting = Some(Awaiting {
                    update,
                    since: Instant::now(),
                });
                self.try_land();
            }
            Err(failure) => {
                warn!(
                    request_id = request.request_id,
                    error = %failure.message,
                    after_fallback = failure.after_fallback,
                    "build failed, will retry"
                );
                self.token.release(request.request_id);
                self.emit(PipelineEvent::BuildFailed {
                    request_id: request.request_id,
                    error: failure.message,
                    after_fallback: failure.after_fallback,
                });
                self.coordinator.restore(request);
                self.schedule_tick(self.config.tick_debounce().max(Duration::from_millis(1)));
            }
        }
    }

    // ── Landing ──────────────────────────────────────────────────────────

    fn try_land(&mut self) {
        let Some(awaiting) = self.awaiting.as_ref() else {
            return;
        };
        if !self.landing.can_begin() {
            // resumed by LandingFinished
            return;
        }

        let render_state_id = awaiting.update.render_state_id();
        if !self.consumer.is_safe_to_land(&awaiting.update) {
            let timed_out = self
                .config
                .land_timeout()
                .is_some_and(|limit| awaiting.since.elapsed() >= limit);
            if !timed_out {
                self.schedule_land_poll();
                return;
            }
            warn!(render_state_id, "land safety timed out, landing anyway");
            self.emit(PipelineEvent::LandSafetyTimedOut { render_state_id });
        }

        if let Some(awaiting) = self.awaiting.take() {
            self.begin_landing(awaiting.update);
        }
    }

    fn begin_landing(&mut self, update: RenderUpdate) {
        let render_state_id = update.render_state_id();
        let request_id = update.request_id;
        let completion = self.landing.begin(render_state_id, request_id);

        self.render_state = update.render_state.clone();
        *self.shared.render_state.write() = update.render_state.clone();
        match update.load_type {
            LoadType::Older => *self.shared.last_older_load.lock() = Some(Instant::now()),
            LoadType::Newer => *self.shared.last_newer_load.lock() = Some(Instant::now()),
            _ => {}
        }

        self.token.release(request_id);
        self.emit(PipelineEvent::LandingStarted {
            request_id,
            render_state_id,
        });
        debug!(
            request_id,
            render_state_id,
            update = update.update.as_str(),
            items = update.render_state.len(),
            "landing"
        );

        let tx = self.tx.clone();
        tokio::spawn(async move {
            // a dropped sender means the pipeline shut down mid-landing
            let outcome = completion.await.unwrap_or(LandingOutcome::Superseded);
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::LandingFinished {
                    render_state_id,
                    outcome,
                });
            }
        });

        self.consumer.on_render_state_ready(update);
        self.start_build_if_ready();
    }

    fn on_landing_finished(&mut self, render_state_id: u64, outcome: LandingOutcome) {
        self.landing.finish(render_state_id);
        trace!(render_state_id, ?outcome, "landing finished");
        self.emit(PipelineEvent::LandingFinished {
            render_state_id,
            outcome,
        });
        self.try_land();
    }

    // ── Scheduling ───────────────────────────────────────────────────────

    fn schedule_tick(&mut self, delay: Duration) {
        if self.tick_scheduled {
            return;
        }
        self.tick_scheduled = true;
        self.send_later(Command::Tick, delay);
    }

    fn schedule_land_poll(&mut self) {
        if self.poll_scheduled {
            return;
        }
        self.poll_scheduled = true;
        self.send_later(Command::LandPoll, self.config.land_poll_interval());
    }

    fn send_later(&self, cmd: Command, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(cmd);
            }
        });
    }

    // ── Observability ────────────────────────────────────────────────────

    fn emit(&self, event: PipelineEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_status(&self) {
        let status = if let Some(request_id) = self.token.holder().filter(|_| self.awaiting.is_none()) {
            PipelineStatus::Building { request_id }
        } else if let Some(awaiting) = &self.awaiting {
            PipelineStatus::AwaitingLandSafety {
                render_state_id: awaiting.update.render_state_id(),
            }
        } else if let Some(landing) = self.landing.current() {
            PipelineStatus::Landing {
                render_state_id: landing.render_state_id,
            }
        } else if self.coordinator.has_pending() || self.tick_scheduled {
            PipelineStatus::Pending
        } else {
            PipelineStatus::Idle
        };
        *self.shared.status.write() = status;
    }
}

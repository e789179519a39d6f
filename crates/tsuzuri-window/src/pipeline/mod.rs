//! The load pipeline: accept intents, build one window at a time, land
//! render states in request order.
//!
//! ```text
//!   PipelineHandle (Clone)      mpsc      PipelineActor (tokio task)
//!   ┌──────────────────────┐  ───────▶  ┌───────────────────────────────┐
//!   │ .submit(intent)      │            │ RequestCoordinator            │
//!   │ .set_style(style)    │            │ building token ──▶ worker     │
//!   │ .notify_landing_…()  │            │   (spawn_blocking: loader,    │
//!   └──────────────────────┘            │    hydrator, render, diff)    │
//!            ▲                          │ land-safety polling           │
//!            │ broadcast PipelineEvent  │ landing slot (oneshot)        │
//!            └───────────────────────── └───────────────────────────────┘
//! ```
//!
//! `submit` only records intent. The actor owns every state transition:
//! a debounced tick takes the single pending request, a worker builds it
//! against one store read transaction, and the result waits until the
//! consumer says it is safe to land. Beginning a landing frees the worker
//! for the next request, so at most one build is ever in flight.

mod actor;
mod build;
mod landing;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot};

pub use build::BuildToken;

use crate::cache::EntryCache;
use crate::config::PipelineConfig;
use crate::diff::UpdateKind;
use crate::error::PipelineError;
use crate::events::PipelineEvent;
use crate::render::{RenderState, Style, ViewSnapshot};
use crate::request::{LoadIntent, LoadType, ScrollIntent};
use crate::store::EntryStore;
use crate::window::LoadDirection;

use actor::{Command, PipelineActor};

/// A built render state on its way to the consumer.
#[derive(Clone, Debug)]
pub struct RenderUpdate {
    pub render_state: Arc<RenderState>,
    /// The state this update replaces.
    pub prior: Arc<RenderState>,
    pub update: UpdateKind,
    pub request_id: u64,
    pub load_type: LoadType,
    /// Direction the loader actually used.
    pub direction: LoadDirection,
    pub scroll_intent: Option<ScrollIntent>,
}

impl RenderUpdate {
    pub fn render_state_id(&self) -> u64 {
        self.render_state.id
    }
}

/// The rendering side of the pipeline.
///
/// Both methods are called from the pipeline task and must not block.
/// After applying an update the consumer reports back through
/// [`PipelineHandle::notify_landing_complete`].
pub trait RenderConsumer: Send + Sync + 'static {
    /// Polled until it returns true (or the land timeout passes).
    fn is_safe_to_land(&self, _update: &RenderUpdate) -> bool {
        true
    }

    fn on_render_state_ready(&self, update: RenderUpdate);
}

/// Coarse pipeline state, highest-priority activity first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PipelineStatus {
    /// Nothing pending, building or landing.
    #[default]
    Idle,
    /// A request is waiting for a tick, the style, or a retry.
    Pending,
    Building { request_id: u64 },
    AwaitingLandSafety { render_state_id: u64 },
    Landing { render_state_id: u64 },
}

/// State the actor publishes for synchronous reads from handles.
struct Shared {
    render_state: RwLock<Arc<RenderState>>,
    status: RwLock<PipelineStatus>,
    last_older_load: Mutex<Option<Instant>>,
    last_newer_load: Mutex<Option<Instant>>,
    recent_threshold: Duration,
}

impl Shared {
    fn new(recent_threshold: Duration) -> Self {
        Self {
            render_state: RwLock::new(Arc::new(RenderState::initial())),
            status: RwLock::new(PipelineStatus::Idle),
            last_older_load: Mutex::new(None),
            last_newer_load: Mutex::new(None),
            recent_threshold,
        }
    }

    fn loaded_recently(&self, slot: &Mutex<Option<Instant>>) -> bool {
        slot.lock()
            .is_some_and(|at| at.elapsed() < self.recent_threshold)
    }
}

/// Cloneable handle to a running pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<PipelineEvent>,
    shared: Arc<Shared>,
}

impl PipelineHandle {
    /// Record a load intent. Returns immediately.
    pub fn submit(&self, intent: LoadIntent) -> Result<(), PipelineError> {
        self.send(Command::Submit(intent))
    }

    /// Update viewport and appearance. A change forces a full reload.
    pub fn set_style(&self, style: Style) -> Result<(), PipelineError> {
        self.send(Command::SetStyle(style))
    }

    /// Update transient view inputs such as the typing indicator.
    pub fn set_view(&self, view: ViewSnapshot) -> Result<(), PipelineError> {
        self.send(Command::SetView(view))
    }

    /// The consumer finished applying `render_state_id`.
    pub fn notify_landing_complete(&self, render_state_id: u64) -> Result<(), PipelineError> {
        self.send(Command::NotifyLandingComplete(render_state_id))
    }

    /// The most recently landed render state.
    pub fn render_state(&self) -> Arc<RenderState> {
        self.shared.render_state.read().clone()
    }

    pub fn status(&self) -> PipelineStatus {
        *self.shared.status.read()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// An older page landed within the recent-load threshold.
    pub fn did_load_older_recently(&self) -> bool {
        self.shared.loaded_recently(&self.shared.last_older_load)
    }

    /// A newer page landed within the recent-load threshold.
    pub fn did_load_newer_recently(&self) -> bool {
        self.shared.loaded_recently(&self.shared.last_newer_load)
    }

    /// Wait until every command sent before this call has been processed.
    pub async fn flush(&self) -> Result<(), PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Flush { reply })?;
        rx.await.map_err(|_| PipelineError::Shutdown)
    }

    /// Stop the pipeline. In-flight builds finish but never land.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply })?;
        rx.await.map_err(|_| PipelineError::Shutdown)
    }

    fn send(&self, cmd: Command) -> Result<(), PipelineError> {
        self.tx.send(cmd).map_err(|_| PipelineError::Shutdown)
    }
}

/// Spawn a pipeline on the current tokio runtime.
///
/// Nothing loads until a style with a positive viewport width has been
/// set, either here or through [`PipelineHandle::set_style`].
pub fn spawn_pipeline(
    config: PipelineConfig,
    store: Arc<dyn EntryStore>,
    caches: Vec<Arc<dyn EntryCache>>,
    consumer: Arc<dyn RenderConsumer>,
    style: Style,
) -> PipelineHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(256);
    let shared = Arc::new(Shared::new(config.recent_load_threshold()));

    let actor = PipelineActor::new(
        config,
        store,
        caches.into(),
        consumer,
        style,
        tx.downgrade(),
        events.clone(),
        shared.clone(),
    );
    tokio::spawn(actor.run(rx));

    PipelineHandle { tx, events, shared }
}

//! Pipeline lifecycle events, broadcast to any number of observers.

use crate::diff::UpdateKind;
use crate::request::LoadType;

/// How a landing ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LandingOutcome {
    /// The consumer reported the landing complete.
    Completed,
    /// A newer landing started first and force-completed this one.
    Superseded,
}

/// Events emitted by the pipeline actor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A request was handed to a build worker.
    BuildStarted { request_id: u64, load_type: LoadType },
    /// A build failed; the request was restored for retry.
    BuildFailed {
        request_id: u64,
        error: String,
        /// The failure was a consistency violation that also failed the
        /// full-reload fallback.
        after_fallback: bool,
    },
    /// A consistency violation was recovered by reloading the newest page.
    FellBack { request_id: u64, reason: String },
    /// A render state was built and is waiting for land safety.
    RenderStateReady {
        request_id: u64,
        render_state_id: u64,
        update: &'static str,
        items: usize,
    },
    /// The consumer was handed a render state.
    LandingStarted { request_id: u64, render_state_id: u64 },
    LandingFinished {
        render_state_id: u64,
        outcome: LandingOutcome,
    },
    /// Land safety was not reached in time; the landing proceeded anyway.
    LandSafetyTimedOut { render_state_id: u64 },
}

impl PipelineEvent {
    pub(crate) fn ready(request_id: u64, render_state_id: u64, update: &UpdateKind, items: usize) -> Self {
        PipelineEvent::RenderStateReady {
            request_id,
            render_state_id,
            update: update.as_str(),
            items,
        }
    }
}

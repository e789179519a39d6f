//! Landing slot: which render state the consumer is currently applying.
//!
//! Each landing carries a oneshot completion. The consumer's
//! `notify_landing_complete` resolves it with `Completed`; with overlapping
//! landings enabled, beginning a newer landing resolves the older one with
//! `Superseded`. A waiter task turns the resolution into an actor message,
//! and only then is the slot freed, so a landing's finish is always
//! observed before the next non-overlapping landing starts.

use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::events::LandingOutcome;

#[derive(Debug)]
pub(crate) struct PendingLanding {
    pub render_state_id: u64,
    pub request_id: u64,
    completion: Option<oneshot::Sender<LandingOutcome>>,
}

impl PendingLanding {
    fn resolve(&mut self, outcome: LandingOutcome) -> bool {
        match self.completion.take() {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct LandingSlot {
    current: Option<PendingLanding>,
    overlap: bool,
}

impl LandingSlot {
    pub fn new(overlap: bool) -> Self {
        Self {
            current: None,
            overlap,
        }
    }

    /// A new landing may begin now.
    pub fn can_begin(&self) -> bool {
        self.overlap || self.current.is_none()
    }

    pub fn current(&self) -> Option<&PendingLanding> {
        self.current.as_ref()
    }

    /// Occupy the slot. Returns the completion receiver for the waiter task.
    ///
    /// Only valid when [`can_begin`](Self::can_begin) holds; in overlap mode
    /// the previous landing is force-completed as superseded.
    pub fn begin(&mut self, render_state_id: u64, request_id: u64) -> oneshot::Receiver<LandingOutcome> {
        if let Some(mut previous) = self.current.take() {
            debug!(
                superseded = previous.render_state_id,
                by = render_state_id,
                "superseding landing"
            );
            previous.resolve(LandingOutcome::Superseded);
        }
        let (tx, rx) = oneshot::channel();
        self.current = Some(PendingLanding {
            render_state_id,
            request_id,
            completion: Some(tx),
        });
        rx
    }

    /// The consumer reported `render_state_id` landed.
    ///
    /// Returns false for unknown or already resolved ids.
    pub fn complete(&mut self, render_state_id: u64) -> bool {
        match self.current.as_mut() {
            Some(landing) if landing.render_state_id == render_state_id => {
                landing.resolve(LandingOutcome::Completed)
            }
            _ => {
                trace!(render_state_id, "completion for a landing that is not current");
                false
            }
        }
    }

    /// The waiter observed the resolution. Frees the slot if it still
    /// holds `render_state_id`.
    pub fn finish(&mut self, render_state_id: u64) -> bool {
        if self
            .current
            .as_ref()
            .is_some_and(|landing| landing.render_state_id == render_state_id)
        {
            self.current = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_resolves_and_finish_frees() {
        let mut slot = LandingSlot::new(false);
        assert!(slot.can_begin());
        let rx = slot.begin(1, 10);
        assert!(!slot.can_begin());

        assert!(!slot.complete(2));
        assert!(slot.complete(1));
        assert!(!slot.complete(1), "already resolved");
        assert_eq!(rx.await.unwrap(), LandingOutcome::Completed);

        // still occupied until the waiter reports back
        assert!(!slot.can_begin());
        assert!(slot.finish(1));
        assert!(slot.can_begin());
        assert!(slot.current().is_none());
    }

    #[tokio::test]
    async fn test_overlap_supersedes_previous() {
        let mut slot = LandingSlot::new(true);
        let first = slot.begin(1, 10);
        assert!(slot.can_begin());
        let second = slot.begin(2, 11);
        assert_eq!(first.await.unwrap(), LandingOutcome::Superseded);

        assert!(!slot.finish(1), "superseded landing no longer holds the slot");
        assert_eq!(slot.current().map(|l| l.render_state_id), Some(2));
        assert!(slot.complete(2));
        assert_eq!(second.await.unwrap(), LandingOutcome::Completed);
    }
}

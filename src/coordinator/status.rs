//! Shared coordinator status
//!
//! Written by the worker thread, read by the caller every frame. The lock is
//! only held for field copies, never across engine calls.

use crate::engine::Readiness;
use crate::session::TurnState;
use crate::ParleyError;
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

/// Point-in-time view of the coordinator
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CoordinatorStatus {
    /// Engine lifecycle
    pub readiness: Readiness,
    /// Turn state after the last completed step
    pub turn_state: TurnState,
    /// Work item currently running
    pub in_flight: Option<Uuid>,
    /// Items submitted but not yet picked up
    pub queued: usize,
    /// Replies generated so far, the opening one included
    pub completed_replies: usize,
    /// Most recent failure
    pub last_error: Option<ParleyError>,
}

impl CoordinatorStatus {
    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    /// Whether the agent is loading or working on a reply
    pub fn is_busy(&self) -> bool {
        matches!(self.readiness, Readiness::NotStarted | Readiness::Loading)
            || self.in_flight.is_some()
            || self.queued > 0
    }
}

#[derive(Clone, Default)]
pub struct SharedStatus {
    inner: Arc<RwLock<CoordinatorStatus>>,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CoordinatorStatus {
        self.inner.read().clone()
    }

    pub fn readiness(&self) -> Readiness {
        self.inner.read().readiness
    }

    pub fn set_readiness(&self, readiness: Readiness) {
        self.inner.write().readiness = readiness;
    }

    pub fn fail(&self, error: ParleyError) {
        let mut status = self.inner.write();
        status.readiness = Readiness::Failed;
        status.last_error = Some(error);
    }

    pub fn last_error(&self) -> Option<ParleyError> {
        self.inner.read().last_error.clone()
    }

    pub fn enqueued(&self) {
        self.inner.write().queued += 1;
    }

    /// The worker took queued item `id` off the inbound channel.
    pub fn started(&self, id: Uuid) {
        let mut status = self.inner.write();
        status.queued = status.queued.saturating_sub(1);
        status.in_flight = Some(id);
        status.turn_state = TurnState::Evaluating;
    }

    /// Work `id` began without passing through the queue (the opening reply).
    pub fn began(&self, id: Uuid) {
        let mut status = self.inner.write();
        status.in_flight = Some(id);
        status.turn_state = TurnState::Evaluating;
    }

    /// An item was taken off the queue without running.
    pub fn skipped(&self) {
        let mut status = self.inner.write();
        status.queued = status.queued.saturating_sub(1);
    }

    /// A reply finished, successfully or not.
    pub fn finished(&self, turn_state: TurnState, error: Option<ParleyError>) {
        let mut status = self.inner.write();
        status.in_flight = None;
        status.turn_state = turn_state;
        match error {
            Some(e) => status.last_error = Some(e),
            None => status.completed_replies += 1,
        }
    }
}

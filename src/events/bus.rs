//! Event bus - central pub/sub for orchestrator events
//!
//! Built on tokio broadcast channels: emitters never block, subscribers that
//! fall behind see `Lagged` and keep going. Handlers must not block; anything
//! slow belongs on its own task fed from a subscription.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{InstanceStatus, TimeoutKind};

use super::types::Event;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8_192;

/// Central event bus
///
/// Components emit events; consumers (UI loop, loggers, tests) subscribe.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped.
    pub fn emit(&self, event: Event) {
        debug!(event_type = event.event_type(), subject = ?event.subject_id(), "emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Create an emitter bound to one instance or group ID
    pub fn emitter_for(&self, subject_id: impl Into<String>) -> EventEmitter {
        EventEmitter {
            tx: self.tx.clone(),
            subject_id: subject_id.into(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}

/// Handle for components to emit events without owning the bus
///
/// Cheap to clone; convenience methods fill in the bound subject ID.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<Event>,
    subject_id: String,
}

impl EventEmitter {
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn emit(&self, event: Event) {
        debug!(event_type = event.event_type(), "emit");
        let _ = self.tx.send(event);
    }

    // === Instance events ===

    pub fn status_changed(&self, from: InstanceStatus, to: InstanceStatus) {
        self.emit(Event::InstanceStatusChanged {
            id: self.subject_id.clone(),
            from,
            to,
        });
    }

    pub fn output(&self, bytes: &[u8]) {
        self.emit(Event::InstanceOutput {
            id: self.subject_id.clone(),
            bytes: bytes.to_vec(),
        });
    }

    pub fn bell(&self) {
        self.emit(Event::InstanceBell {
            id: self.subject_id.clone(),
        });
    }

    pub fn timeout(&self, kind: TimeoutKind) {
        self.emit(Event::InstanceTimeout {
            id: self.subject_id.clone(),
            kind,
        });
    }

    pub fn task_added(&self, err: Option<String>) {
        self.emit(Event::TaskAdded {
            id: self.subject_id.clone(),
            err,
        });
    }

    pub fn setup_complete(&self, err: Option<String>) {
        self.emit(Event::InstanceSetupComplete {
            id: self.subject_id.clone(),
            err,
        });
    }

    // === Adversarial events ===

    pub fn adversarial_check(&self, phase: &str, increment_ready: bool, review_ready: bool, err: Option<String>) {
        self.emit(Event::AdversarialCheckResult {
            group_id: self.subject_id.clone(),
            phase: phase.to_string(),
            increment_ready,
            review_ready,
            err,
        });
    }

    pub fn increment_processed(&self, err: Option<String>) {
        self.emit(Event::AdversarialIncrementProcessed {
            group_id: self.subject_id.clone(),
            err,
        });
    }

    pub fn review_processed(&self, approved: bool, score: u8, err: Option<String>) {
        self.emit(Event::AdversarialReviewProcessed {
            group_id: self.subject_id.clone(),
            approved,
            score,
            err,
        });
    }

    // === Ralph events ===

    pub fn ralph_check(&self, complete: bool, promise_found: bool, err: Option<String>) {
        self.emit(Event::RalphCheckResult {
            group_id: self.subject_id.clone(),
            complete,
            promise_found,
            err,
        });
    }

    pub fn ralph_iteration_started(&self, iteration: u32) {
        self.emit(Event::RalphIterationStarted {
            group_id: self.subject_id.clone(),
            iteration,
        });
    }

    pub fn ralph_iteration_complete(&self, iteration: u32, promise_found: bool) {
        self.emit(Event::RalphIterationComplete {
            group_id: self.subject_id.clone(),
            iteration,
            promise_found,
        });
    }

    // === Plan events ===

    pub fn plan_ready(&self, summary: &str, tasks: Vec<String>) {
        self.emit(Event::PlanReady {
            summary: summary.to_string(),
            tasks,
        });
    }

    pub fn plan_parse_error(&self, err: &str) {
        self.emit(Event::PlanParseError {
            group_id: self.subject_id.clone(),
            err: err.to_string(),
        });
    }
}

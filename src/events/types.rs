//! Event vocabulary for orchestrator activity streaming
//!
//! Every observable action emits one of these: instance lifecycle and output,
//! command completions, coordinator probe results, and plan execution
//! progress. Payload shapes are stable; the UI and loggers consume them.

use serde::{Deserialize, Serialize};

use crate::domain::{InstanceStatus, TimeoutKind};

/// Core event enum
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // === Instance lifecycle ===
    /// An instance moved along an edge of the status machine
    InstanceStatusChanged {
        id: String,
        from: InstanceStatus,
        to: InstanceStatus,
    },
    /// Bytes read from the instance's terminal pipe, in pipe order
    InstanceOutput { id: String, bytes: Vec<u8> },
    /// The agent rang the terminal bell
    InstanceBell { id: String },
    /// A supervisor timeout fired
    InstanceTimeout { id: String, kind: TimeoutKind },

    // === Command completions ===
    /// AddTask finished its setup (worktree + stub); err on setup failure
    TaskAdded { id: String, err: Option<String> },
    /// An instance's working copy is provisioned and the agent can start
    InstanceSetupComplete { id: String, err: Option<String> },

    // === Adversarial coordinator ===
    AdversarialCheckResult {
        group_id: String,
        phase: String,
        increment_ready: bool,
        review_ready: bool,
        err: Option<String>,
    },
    AdversarialIncrementProcessed { group_id: String, err: Option<String> },
    AdversarialReviewProcessed {
        group_id: String,
        approved: bool,
        score: u8,
        err: Option<String>,
    },

    // === Ralph coordinator ===
    RalphCheckResult {
        group_id: String,
        complete: bool,
        promise_found: bool,
        err: Option<String>,
    },
    RalphIterationStarted { group_id: String, iteration: u32 },
    RalphIterationComplete {
        group_id: String,
        iteration: u32,
        promise_found: bool,
    },

    // === Plan / pipeline ===
    /// Planner output parsed into a plan awaiting user review
    PlanReady { summary: String, tasks: Vec<String> },
    /// Planner output could not be parsed; session stays in review
    PlanParseError { group_id: String, err: String },
    /// A planned task was admitted and its instance started
    TaskAdmitted { id: String },
    TaskCompleted { id: String },
    TaskFailed { id: String, reason: String },
    PlanLayerCompleted { layer: usize },
    PlanCompleted,
    PlanFailed { reason: String },
}

impl Event {
    /// Event type name for logging and filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::InstanceStatusChanged { .. } => "InstanceStatusChanged",
            Self::InstanceOutput { .. } => "InstanceOutput",
            Self::InstanceBell { .. } => "InstanceBell",
            Self::InstanceTimeout { .. } => "InstanceTimeout",
            Self::TaskAdded { .. } => "TaskAdded",
            Self::InstanceSetupComplete { .. } => "InstanceSetupComplete",
            Self::AdversarialCheckResult { .. } => "AdversarialCheckResult",
            Self::AdversarialIncrementProcessed { .. } => "AdversarialIncrementProcessed",
            Self::AdversarialReviewProcessed { .. } => "AdversarialReviewProcessed",
            Self::RalphCheckResult { .. } => "RalphCheckResult",
            Self::RalphIterationStarted { .. } => "RalphIterationStarted",
            Self::RalphIterationComplete { .. } => "RalphIterationComplete",
            Self::PlanReady { .. } => "PlanReady",
            Self::PlanParseError { .. } => "PlanParseError",
            Self::TaskAdmitted { .. } => "TaskAdmitted",
            Self::TaskCompleted { .. } => "TaskCompleted",
            Self::TaskFailed { .. } => "TaskFailed",
            Self::PlanLayerCompleted { .. } => "PlanLayerCompleted",
            Self::PlanCompleted => "PlanCompleted",
            Self::PlanFailed { .. } => "PlanFailed",
        }
    }

    /// The instance or group the event is about, where one applies
    pub fn subject_id(&self) -> Option<&str> {
        match self {
            Self::InstanceStatusChanged { id, .. }
            | Self::InstanceOutput { id, .. }
            | Self::InstanceBell { id }
            | Self::InstanceTimeout { id, .. }
            | Self::TaskAdded { id, .. }
            | Self::InstanceSetupComplete { id, .. }
            | Self::TaskAdmitted { id }
            | Self::TaskCompleted { id }
            | Self::TaskFailed { id, .. } => Some(id),
            Self::AdversarialCheckResult { group_id, .. }
            | Self::AdversarialIncrementProcessed { group_id, .. }
            | Self::AdversarialReviewProcessed { group_id, .. }
            | Self::RalphCheckResult { group_id, .. }
            | Self::RalphIterationStarted { group_id, .. }
            | Self::RalphIterationComplete { group_id, .. }
            | Self::PlanParseError { group_id, .. } => Some(group_id),
            Self::PlanReady { .. } | Self::PlanLayerCompleted { .. } | Self::PlanCompleted | Self::PlanFailed { .. } => {
                None
            }
        }
    }
}

//! Instance status vocabulary and the transitions the supervisor enforces

use serde::{Deserialize, Serialize};

/// Status of a supervised agent instance
///
/// `Completed` and `Error` are terminal; everything else is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    /// Created but not started
    Pending,
    /// Agent process running and producing output
    Working,
    /// Agent rang the terminal bell and is waiting for user input
    WaitingInput,
    /// Suspended by the user (SIGSTOP)
    Paused,
    /// Interrupted by the user (SIGINT)
    Interrupted,
    /// No output activity, or output tail frozen, past the configured window
    Stuck,
    /// Exceeded the wall-clock completion timeout
    Timeout,
    /// Process exited non-zero, was killed, or failed fatally
    Error,
    /// Process exited zero or a coordinator declared completion
    Completed,
}

impl InstanceStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }

    /// Statuses from which `restart` is a legal transition
    pub fn is_restartable(&self) -> bool {
        matches!(
            self,
            Self::Stuck | Self::Timeout | Self::Paused | Self::Interrupted | Self::Error
        )
    }

    /// Statuses that count as a failure for coordinators
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Stuck | Self::Timeout | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Working => "working",
            Self::WaitingInput => "waiting-input",
            Self::Paused => "paused",
            Self::Interrupted => "interrupted",
            Self::Stuck => "stuck",
            Self::Timeout => "timeout",
            Self::Error => "error",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which timeout fired
///
/// When several would fire in the same tick, the supervisor applies the first
/// in declaration order: Activity, Stale, Completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutKind {
    /// No new output bytes for the activity window
    Activity,
    /// Output grew but the trailing-bytes fingerprint stayed frozen
    Stale,
    /// Total wall-clock exceeded the completion window
    Completion,
}

impl TimeoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::Stale => "stale",
            Self::Completion => "completion",
        }
    }
}

/// Whether `from -> to` is an edge of the supervisor state machine
///
/// Unknown edges are rejected; callers log a warning and no-op rather than
/// panic on a rejected transition.
pub fn transition_allowed(from: InstanceStatus, to: InstanceStatus) -> bool {
    use InstanceStatus::*;

    if from == to {
        return false;
    }

    // kill() forces any live status to Error
    if from.is_live() && to == Error {
        return true;
    }

    match (from, to) {
        (Pending, Working) => true,
        (Working, Stuck) | (Working, Timeout) => true,
        (Working, Completed) => true,
        (Working, Paused) => true,
        (Working, Interrupted) | (WaitingInput, Interrupted) => true,
        (Working, WaitingInput) | (WaitingInput, Working) => true,
        (WaitingInput, Completed) => true,
        (Paused, Working) => true,
        // restart()
        (from, Working) if from.is_restartable() => true,
        _ => false,
    }
}

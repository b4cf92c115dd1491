//! agentherd - interactive orchestrator for fleets of coding agents
//!
//! agentherd supervises concurrent long-running agent processes. Every task
//! gets an isolated working copy and a detached agent session whose terminal
//! stream lands in a bounded per-instance buffer with stall and timeout
//! detection. On top of the raw instance layer sit three coordination
//! patterns:
//!
//! - **Adversarial**: implementer and reviewer roles alternating over
//!   numbered artifact files until approval or a round cap
//! - **Ralph**: one agent re-invoked with fresh context until a completion
//!   promise string appears in its output
//! - **Ultra-plan**: a planner agent produces a typed dependency plan, then a
//!   pipeline executes it layer by layer under a global parallelism bound
//!
//! # Modules
//!
//! - [`domain`] - statuses, groups, and the typed plan model
//! - [`output`] - bounded, versioned output buffers
//! - [`agent`] - external agent process abstraction
//! - [`worktree`] - working-copy provisioning
//! - [`instance`] - the per-task supervisor state machine
//! - [`session`] - instance/group aggregate
//! - [`coordinators`] - the three pattern state machines
//! - [`scheduler`] - periodic probe dispatcher
//! - [`controller`] - command facade consumed by the UI

pub mod agent;
pub mod cli;
pub mod config;
pub mod controller;
pub mod coordinators;
pub mod domain;
pub mod events;
pub mod instance;
pub mod notify;
pub mod output;
pub mod prompts;
pub mod scheduler;
pub mod session;
pub mod worktree;

// Re-export commonly used types
pub use agent::{AgentChunk, AgentLauncher, AgentProcess, AgentStatus, CommandLauncher, ScriptedLauncher};
pub use config::Config;
pub use controller::Controller;
pub use coordinators::{
    AdversarialCoordinator, AdversarialPhase, Coordinator, CoordinatorContext, CoordinatorRegistry, PatternSession,
    PlanMutation, RalphCoordinator, RalphPhase, UltraPlanCoordinator, UltraPlanPhase,
};
pub use domain::{
    Complexity, GroupKind, GroupPhase, InstanceGroup, InstanceStatus, PlanError, PlanSpec, PlannedTask, TimeoutKind,
};
pub use events::{Event, EventBus, EventEmitter};
pub use instance::{Instance, InstanceSupervisor, TimeoutConfig};
pub use output::OutputBuffer;
pub use scheduler::Scheduler;
pub use session::Session;
pub use worktree::{GitWorktreeProvider, ScratchWorktreeProvider, WorktreeError, WorktreeProvider};

//! Domain types for agentherd
//!
//! Shared vocabulary used across every layer: instance statuses and the
//! supervisor's transition table, instance groups, and the typed plan model
//! with dependency-order computation.

mod group;
mod id;
mod plan;
mod status;

pub use group::{GroupKind, GroupPhase, InstanceGroup};
pub use id::generate_id;
pub use plan::{Complexity, PlanError, PlanSpec, PlannedTask, compute_execution_order, validate_dependency_graph};
pub use status::{InstanceStatus, TimeoutKind, transition_allowed};

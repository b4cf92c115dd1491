//! Coordination patterns built on top of supervised instances
//!
//! A coordinator is a state machine that drives one pattern (adversarial,
//! ralph, ultra-plan) by spawning instances, watching their buffers and
//! artifacts, and advancing phases. Coordinators never touch supervisor
//! internals; they call public methods and read output buffers. The
//! scheduler drives them by dispatching `check_completion` probes each tick.

pub mod adversarial;
pub mod ralph;
pub mod ultraplan;

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use eyre::Result;

use crate::agent::AgentLauncher;
use crate::config::Config;
use crate::domain::GroupKind;
use crate::events::EventBus;
use crate::instance::{Instance, InstanceSupervisor};
use crate::prompts::PromptLibrary;
use crate::session::Session;
use crate::worktree::WorktreeProvider;

pub use adversarial::{AdversarialCoordinator, AdversarialPhase, ReviewVerdict, parse_review};
pub use ralph::{RalphCoordinator, RalphPhase};
pub use ultraplan::{PlanMutation, UltraPlanCoordinator, UltraPlanPhase};

/// A running coordination pattern
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// The session group this coordinator owns
    fn group_id(&self) -> &str;

    fn kind(&self) -> GroupKind;

    /// Still needs scheduler probes
    fn is_active(&self) -> bool;

    /// Async completion probe, dispatched from the scheduler tick
    async fn check_completion(&self);

    /// Cancel: kill owned instances and mark the session terminal; idempotent
    async fn stop(&self);
}

/// Session slice for one pattern, tagged by kind
#[derive(Clone)]
pub enum PatternSession {
    Adversarial(Arc<AdversarialCoordinator>),
    Ralph(Arc<RalphCoordinator>),
    UltraPlan(Arc<UltraPlanCoordinator>),
}

impl PatternSession {
    pub fn as_coordinator(&self) -> Arc<dyn Coordinator> {
        match self {
            Self::Adversarial(c) => c.clone(),
            Self::Ralph(c) => c.clone(),
            Self::UltraPlan(c) => c.clone(),
        }
    }

    pub fn group_id(&self) -> &str {
        match self {
            Self::Adversarial(c) => c.group_id(),
            Self::Ralph(c) => c.group_id(),
            Self::UltraPlan(c) => c.group_id(),
        }
    }
}

/// Registry of running coordinators, shared by controller and scheduler
pub struct CoordinatorRegistry {
    inner: RwLock<Vec<PatternSession>>,
}

impl CoordinatorRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, session: PatternSession) {
        self.inner.write().expect("registry lock poisoned").push(session);
    }

    pub fn all(&self) -> Vec<PatternSession> {
        self.inner.read().expect("registry lock poisoned").clone()
    }

    /// Coordinators that still need probes
    pub fn active(&self) -> Vec<Arc<dyn Coordinator>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .iter()
            .map(|p| p.as_coordinator())
            .filter(|c| c.is_active())
            .collect()
    }

    pub fn ralph(&self, group_id: &str) -> Option<Arc<RalphCoordinator>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .iter()
            .find_map(|p| match p {
                PatternSession::Ralph(c) if c.group_id() == group_id => Some(c.clone()),
                _ => None,
            })
    }

    pub fn adversarial(&self, group_id: &str) -> Option<Arc<AdversarialCoordinator>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .iter()
            .find_map(|p| match p {
                PatternSession::Adversarial(c) if c.group_id() == group_id => Some(c.clone()),
                _ => None,
            })
    }

    /// The most recently started ultra-plan session
    pub fn ultraplan(&self) -> Option<Arc<UltraPlanCoordinator>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .iter()
            .rev()
            .find_map(|p| match p {
                PatternSession::UltraPlan(c) => Some(c.clone()),
                _ => None,
            })
    }
}

impl Default for CoordinatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared plumbing every coordinator needs to spawn and observe instances
#[derive(Clone)]
pub struct CoordinatorContext {
    pub session: Arc<Session>,
    pub launcher: Arc<dyn AgentLauncher>,
    pub worktrees: Arc<dyn WorktreeProvider>,
    pub bus: Arc<EventBus>,
    pub prompts: Arc<PromptLibrary>,
    pub config: Arc<Config>,
}

impl CoordinatorContext {
    /// Create an instance record plus its supervisor and register both
    pub fn new_instance(&self, task: &str) -> (Arc<Instance>, Arc<InstanceSupervisor>) {
        let instance = Arc::new(Instance::new(
            task,
            self.config.output.max_bytes,
            self.config.timeouts.to_timeout_config(),
        ));
        let supervisor = Arc::new(InstanceSupervisor::new(
            instance.clone(),
            self.launcher.clone(),
            self.bus.emitter_for(instance.id.clone()),
        ));
        self.session.insert_instance(instance.clone(), supervisor.clone());
        (instance, supervisor)
    }

    /// Spawn a sub-instance inside a coordinator's group and start it
    pub async fn spawn_in_group(
        &self,
        task: &str,
        group_id: &str,
        workdir: &Path,
        prompt: &str,
    ) -> Result<Arc<InstanceSupervisor>> {
        let (instance, supervisor) = self.new_instance(task);
        instance.set_workdir(workdir.to_path_buf());
        self.session.add_group_member(group_id, &instance.id);
        supervisor.start(prompt).await?;
        Ok(supervisor)
    }
}

//! Controller facade - the command surface consumed by the UI
//!
//! Commands never block on external I/O: anything slow (worktree creation,
//! process spawn) is dispatched to a task whose completion arrives as an
//! event (`TaskAdded`, `InstanceSetupComplete`, ...). Unknown IDs warn and
//! no-op; only genuinely broken invariants surface as errors.

use std::sync::Arc;

use eyre::{Result, eyre};
use tracing::{info, warn};

use crate::agent::AgentLauncher;
use crate::config::Config;
use crate::coordinators::{
    AdversarialCoordinator, Coordinator, CoordinatorContext, CoordinatorRegistry, PatternSession, PlanMutation,
    RalphCoordinator, UltraPlanCoordinator,
};
use crate::domain::{InstanceStatus, PlanSpec};
use crate::events::EventBus;
use crate::instance::InstanceSupervisor;
use crate::notify::Notifier;
use crate::prompts::PromptLibrary;
use crate::session::Session;
use crate::worktree::WorktreeProvider;

pub struct Controller {
    ctx: CoordinatorContext,
    registry: Arc<CoordinatorRegistry>,
    notifier: Arc<Notifier>,
}

impl Controller {
    pub fn new(config: Arc<Config>, launcher: Arc<dyn AgentLauncher>, worktrees: Arc<dyn WorktreeProvider>) -> Self {
        let notifier = Arc::new(Notifier::new(config.ultraplan.notifications.clone()));
        let ctx = CoordinatorContext {
            session: Arc::new(Session::new()),
            launcher,
            worktrees,
            bus: Arc::new(EventBus::with_default_capacity()),
            prompts: Arc::new(PromptLibrary::new()),
            config,
        };
        Self {
            ctx,
            registry: Arc::new(CoordinatorRegistry::new()),
            notifier,
        }
    }

    pub fn session(&self) -> Arc<Session> {
        self.ctx.session.clone()
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.ctx.bus.clone()
    }

    pub fn registry(&self) -> Arc<CoordinatorRegistry> {
        self.registry.clone()
    }

    pub fn config(&self) -> Arc<Config> {
        self.ctx.config.clone()
    }

    /// Filtered output view; empty for unknown IDs
    pub fn output(&self, id: &str) -> String {
        self.ctx
            .session
            .instance(id)
            .map(|i| i.buffer.filtered().to_string())
            .unwrap_or_default()
    }

    // === Plain tasks ===

    /// Create an instance for a task; setup runs off the event loop and
    /// completes with a `TaskAdded` event
    pub fn add_task(&self, description: &str) -> String {
        let (instance, supervisor) = self.ctx.new_instance(description);
        let id = instance.id.clone();
        info!(id = %id, "task added");
        self.spawn_setup(instance.id.clone(), supervisor);
        id
    }

    /// Like `add_task`, but the instance only auto-starts once the parent
    /// instance completes
    pub fn add_dependent_task(&self, parent_id: &str, description: &str) -> Option<String> {
        if self.ctx.session.instance(parent_id).is_none() {
            warn!(parent_id, "add_dependent_task: unknown parent");
            return None;
        }
        let (instance, supervisor) = self.ctx.new_instance(description);
        instance.set_waits_for(Some(parent_id.to_string()));
        let id = instance.id.clone();
        info!(id = %id, parent_id, "dependent task added");
        self.spawn_setup(instance.id.clone(), supervisor);
        Some(id)
    }

    fn spawn_setup(&self, id: String, supervisor: Arc<InstanceSupervisor>) {
        let ctx = self.ctx.clone();
        let emitter = ctx.bus.emitter_for(id.clone());
        tokio::spawn(async move {
            match ctx.worktrees.create(&id).await {
                Ok(workdir) => {
                    supervisor.instance().set_workdir(workdir);
                    emitter.task_added(None);
                    emitter.setup_complete(None);

                    // Dependents wait for the scheduler to release them
                    let waiting = supervisor.instance().waits_for().is_some();
                    if ctx.config.session.auto_start_on_add && !waiting {
                        let prompt = supervisor.instance().task.clone();
                        if let Err(e) = supervisor.start(&prompt).await {
                            warn!(id = %id, error = %e, "auto-start failed");
                        }
                    }
                }
                Err(e) => {
                    // Setup failed: no partial state survives
                    warn!(id = %id, error = %e, "task setup failed");
                    ctx.session.remove_instance(&id);
                    emitter.task_added(Some(e.to_string()));
                }
            }
        });
    }

    // === Instance commands ===

    fn supervisor(&self, id: &str) -> Option<Arc<InstanceSupervisor>> {
        let supervisor = self.ctx.session.supervisor(id);
        if supervisor.is_none() {
            warn!(id, "command for unknown instance");
        }
        supervisor
    }

    pub async fn start_instance(&self, id: &str) -> Result<()> {
        let Some(supervisor) = self.supervisor(id) else {
            return Ok(());
        };
        if supervisor.status() != InstanceStatus::Pending {
            return Err(eyre!("instance {id} is not pending"));
        }
        let prompt = supervisor.instance().task.clone();
        supervisor.start(&prompt).await
    }

    pub async fn pause_instance(&self, id: &str) -> Result<()> {
        match self.supervisor(id) {
            Some(supervisor) => supervisor.pause().await,
            None => Ok(()),
        }
    }

    pub async fn resume_instance(&self, id: &str) -> Result<()> {
        match self.supervisor(id) {
            Some(supervisor) => supervisor.resume().await,
            None => Ok(()),
        }
    }

    pub async fn interrupt_instance(&self, id: &str) -> Result<()> {
        match self.supervisor(id) {
            Some(supervisor) => supervisor.interrupt().await,
            None => Ok(()),
        }
    }

    pub async fn restart_instance(&self, id: &str) -> Result<()> {
        match self.supervisor(id) {
            Some(supervisor) => supervisor.restart().await,
            None => Ok(()),
        }
    }

    pub async fn kill_instance(&self, id: &str) -> Result<()> {
        match self.supervisor(id) {
            Some(supervisor) => supervisor.kill().await,
            None => Ok(()),
        }
    }

    pub async fn send_input(&self, id: &str, bytes: &[u8]) -> Result<()> {
        match self.supervisor(id) {
            Some(supervisor) => supervisor.send_input(bytes).await,
            None => Ok(()),
        }
    }

    /// Kill if live, tear down the working copy, drop from the session
    pub async fn dismiss_instance(&self, id: &str) {
        let Some((instance, supervisor)) = self.ctx.session.remove_instance(id) else {
            warn!(id, "dismiss for unknown instance");
            return;
        };
        supervisor.shutdown().await;
        if let Some(workdir) = instance.workdir() {
            let worktrees = self.ctx.worktrees.clone();
            tokio::spawn(async move {
                let _ = worktrees.destroy(&workdir).await;
            });
        }
        info!(id, "instance dismissed");
    }

    // === Coordinators ===

    /// Start an adversarial implement/review session; returns the group ID
    pub fn start_adversarial(&self, task: &str, max_rounds: Option<u32>) -> Result<String> {
        let max_rounds = max_rounds.unwrap_or(self.ctx.config.adversarial.max_rounds_default);
        let coordinator = AdversarialCoordinator::create(self.ctx.clone(), task, max_rounds)?;
        let group_id = coordinator.group_id().to_string();
        self.registry.register(PatternSession::Adversarial(coordinator.clone()));

        tokio::spawn(async move {
            let _ = coordinator.launch().await;
        });
        Ok(group_id)
    }

    /// Start a ralph loop; returns the group ID
    pub fn start_ralph(&self, task: &str, max_iterations: Option<u32>, promise: &str) -> Result<String> {
        let max_iterations = max_iterations.unwrap_or(self.ctx.config.ralph.max_iterations_default);
        let auto_continue = self.ctx.config.ralph.auto_continue;
        let coordinator = RalphCoordinator::create(self.ctx.clone(), task, max_iterations, promise, auto_continue)?;
        let group_id = coordinator.group_id().to_string();
        self.registry.register(PatternSession::Ralph(coordinator.clone()));

        tokio::spawn(async move {
            let _ = coordinator.launch().await;
        });
        Ok(group_id)
    }

    /// Start an ultra-plan session; returns the group ID
    pub fn start_ultra_plan(&self, task: &str) -> Result<String> {
        let coordinator = UltraPlanCoordinator::create(self.ctx.clone(), task, self.notifier.clone())?;
        let group_id = coordinator.group_id().to_string();
        self.registry.register(PatternSession::UltraPlan(coordinator.clone()));

        tokio::spawn(async move {
            let _ = coordinator.launch().await;
        });
        Ok(group_id)
    }

    /// Approve the most recent ultra-plan session's reviewed plan
    pub async fn approve_plan(&self) -> Result<()> {
        match self.registry.ultraplan() {
            Some(coordinator) => coordinator.approve_plan().await,
            None => Err(eyre!("no ultra-plan session")),
        }
    }

    /// Edit the plan under review; returns the re-layered plan
    pub async fn edit_plan(&self, mutation: PlanMutation) -> Result<PlanSpec> {
        match self.registry.ultraplan() {
            Some(coordinator) => coordinator.edit_plan(mutation).await,
            None => Err(eyre!("no ultra-plan session")),
        }
    }

    /// Run the next ralph iteration when AutoContinue is off
    pub async fn continue_ralph(&self, group_id: &str) -> Result<()> {
        match self.registry.ralph(group_id) {
            Some(coordinator) => coordinator.continue_iteration().await,
            None => Err(eyre!("no ralph session {group_id}")),
        }
    }

    pub async fn stop_coordinator(&self, group_id: &str) {
        for pattern in self.registry.all() {
            if pattern.group_id() == group_id {
                pattern.as_coordinator().stop().await;
            }
        }
    }

    /// Stop everything: coordinators first, then any remaining live instance
    ///
    /// Within bounded time every instance and coordinator is terminal and no
    /// further events are emitted.
    pub async fn stop_all(&self) {
        info!("stopping all sessions and instances");
        for pattern in self.registry.all() {
            pattern.as_coordinator().stop().await;
        }
        for supervisor in self.ctx.session.live_supervisors() {
            let _ = supervisor.kill().await;
        }
    }
}

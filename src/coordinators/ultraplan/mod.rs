//! Ultra-plan coordinator: planner phase, user review, pipeline execution
//!
//! A single planner instance produces a typed plan. The session then sits in
//! plan review: the user may edit the plan (every mutation re-validates the
//! DAG and recomputes the execution order) and approves it into the pipeline
//! executor, which runs the layers under the global parallelism bound.

mod pipeline;
mod planner;

use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Result, eyre};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::{GroupKind, GroupPhase, InstanceGroup, PlanSpec, PlannedTask};
use crate::events::{Event, EventEmitter};
use crate::instance::InstanceSupervisor;
use crate::notify::Notifier;

use super::{Coordinator, CoordinatorContext};

pub use pipeline::{PipelineExecutor, PipelinePhase};
pub use planner::{PlanParseError, parse_plan_output};

/// Phase of an ultra-plan session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UltraPlanPhase {
    /// Planner instance running
    Planning,
    /// Waiting for the user to approve or edit the plan
    PlanReview,
    /// Pipeline executing
    Executing,
    Complete,
    Failed,
    Cancelled,
}

impl UltraPlanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::PlanReview => "plan-review",
            Self::Executing => "executing",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

/// User edits applied to a plan during review
#[derive(Debug, Clone)]
pub enum PlanMutation {
    SetSummary(String),
    AddTask(PlannedTask),
    RemoveTask { id: String },
    UpdateTask {
        id: String,
        title: Option<String>,
        description: Option<String>,
        priority: Option<i32>,
        depends_on: Option<Vec<String>>,
    },
}

struct UltraPlanState {
    phase: UltraPlanPhase,
    planner: Option<Arc<InstanceSupervisor>>,
    plan: Option<PlanSpec>,
    executor: Option<PipelineExecutor>,
    last_error: Option<String>,
}

/// Drives one ultra-plan session
pub struct UltraPlanCoordinator {
    group_id: String,
    task: String,
    ctx: CoordinatorContext,
    emitter: EventEmitter,
    notifier: Arc<Notifier>,
    state: Mutex<UltraPlanState>,
}

impl UltraPlanCoordinator {
    /// Create the session group and the coordinator; call `launch` to begin
    pub fn create(ctx: CoordinatorContext, task: impl Into<String>, notifier: Arc<Notifier>) -> Result<Arc<Self>> {
        let task = task.into();
        let group = InstanceGroup::new(format!("ultraplan: {task}"), GroupKind::UltraPlan);
        let group_id = ctx.session.add_group(group)?;
        let emitter = ctx.bus.emitter_for(group_id.clone());

        Ok(Arc::new(Self {
            group_id,
            task,
            ctx,
            emitter,
            notifier,
            state: Mutex::new(UltraPlanState {
                phase: UltraPlanPhase::Planning,
                planner: None,
                plan: None,
                executor: None,
                last_error: None,
            }),
        }))
    }

    /// Provision a working copy for the planner and start it
    pub async fn launch(self: &Arc<Self>) -> Result<()> {
        let workdir = match self.ctx.worktrees.create(&self.group_id).await {
            Ok(path) => path,
            Err(e) => {
                let mut state = self.state.lock().await;
                self.fail(&mut state, &format!("worktree: {e}")).await;
                return Err(e.into());
            }
        };

        let prompt = self.ctx.prompts.planner(&self.task)?;
        let mut state = self.state.lock().await;
        self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Executing);
        match self
            .ctx
            .spawn_in_group(&format!("planner: {}", self.task), &self.group_id, &workdir, &prompt)
            .await
        {
            Ok(supervisor) => {
                state.planner = Some(supervisor);
                info!(group_id = %self.group_id, "planner started");
                Ok(())
            }
            Err(e) => {
                self.fail(&mut state, &format!("planner spawn: {e}")).await;
                Err(e)
            }
        }
    }

    pub fn phase_blocking(&self) -> UltraPlanPhase {
        self.state.try_lock().map(|s| s.phase).unwrap_or(UltraPlanPhase::Planning)
    }

    pub async fn phase(&self) -> UltraPlanPhase {
        self.state.lock().await.phase
    }

    pub async fn plan(&self) -> Option<PlanSpec> {
        self.state.lock().await.plan.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.lock().await.last_error.clone()
    }

    /// Approve the reviewed plan and begin execution
    pub async fn approve_plan(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.phase != UltraPlanPhase::PlanReview {
            return Err(eyre!("plan is not awaiting review (phase {})", state.phase.as_str()));
        }
        let Some(mut plan) = state.plan.clone() else {
            return Err(eyre!("no plan to approve; edit one in or stop the session"));
        };
        plan.recompute_order()?;

        info!(group_id = %self.group_id, tasks = plan.tasks.len(), "plan approved");
        state.plan = Some(plan.clone());
        state.executor = Some(PipelineExecutor::new(
            plan,
            self.ctx.config.pipeline.max_parallel,
            self.group_id.clone(),
        ));
        state.phase = UltraPlanPhase::Executing;
        Ok(())
    }

    /// Apply a user edit during review; re-validates and re-layers the plan
    pub async fn edit_plan(&self, mutation: PlanMutation) -> Result<PlanSpec> {
        let mut state = self.state.lock().await;
        if state.phase != UltraPlanPhase::PlanReview {
            return Err(eyre!("plan is not editable (phase {})", state.phase.as_str()));
        }

        // Editing with no parsed plan bootstraps an empty one
        let mut plan = state.plan.clone().unwrap_or_else(|| PlanSpec {
            summary: self.task.clone(),
            ..Default::default()
        });

        match mutation {
            PlanMutation::SetSummary(summary) => plan.summary = summary,
            PlanMutation::AddTask(task) => plan.tasks.push(task),
            PlanMutation::RemoveTask { id } => {
                plan.tasks.retain(|t| t.id != id);
                for task in &mut plan.tasks {
                    task.depends_on.retain(|d| d != &id);
                }
            }
            PlanMutation::UpdateTask {
                id,
                title,
                description,
                priority,
                depends_on,
            } => {
                let task = plan
                    .task_mut(&id)
                    .ok_or_else(|| eyre!("no task {id} in plan"))?;
                if let Some(title) = title {
                    task.title = title;
                }
                if let Some(description) = description {
                    task.description = description;
                }
                if let Some(priority) = priority {
                    task.priority = priority;
                }
                if let Some(depends_on) = depends_on {
                    task.depends_on = depends_on;
                }
            }
        }

        // Reject the edit wholesale if the DAG no longer validates
        plan.recompute_order()?;
        state.plan = Some(plan.clone());
        state.last_error = None;
        Ok(plan)
    }

    async fn check_planner(&self, state: &mut UltraPlanState) {
        let Some(planner) = state.planner.clone() else {
            return;
        };
        let status = planner.status();

        if status == crate::domain::InstanceStatus::Completed {
            let output = planner.instance().buffer.content();
            state.planner = None;
            match parse_plan_output(&output) {
                Ok(plan) => {
                    info!(group_id = %self.group_id, tasks = plan.tasks.len(), "plan parsed");
                    let ids = plan.tasks.iter().map(|t| t.id.clone()).collect();
                    self.emitter.plan_ready(&plan.summary, ids);
                    state.plan = Some(plan);
                    state.phase = UltraPlanPhase::PlanReview;
                }
                Err(e) => {
                    // Not terminal: the user can edit a plan in by hand
                    warn!(group_id = %self.group_id, error = %e, "planner output unparseable");
                    self.emitter.plan_parse_error(&e.to_string());
                    state.last_error = Some(e.to_string());
                    state.phase = UltraPlanPhase::PlanReview;
                }
            }
        } else if status.is_failed() {
            let _ = planner.kill().await;
            state.planner = None;
            self.fail(state, "planner-failed").await;
        }
    }

    async fn check_pipeline(&self, state: &mut UltraPlanState) {
        let Some(executor) = state.executor.as_mut() else {
            return;
        };
        executor.tick(&self.ctx, &self.emitter).await;

        match executor.phase() {
            PipelinePhase::Running => {}
            PipelinePhase::Complete => {
                state.phase = UltraPlanPhase::Complete;
                self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Completed);
                self.notifier.plan_finished(true, &self.task);
            }
            PipelinePhase::Failed => {
                state.phase = UltraPlanPhase::Failed;
                state.last_error = Some("dependency-failed".to_string());
                self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Failed);
                self.notifier.plan_finished(false, &self.task);
            }
            PipelinePhase::Cancelled => {
                state.phase = UltraPlanPhase::Cancelled;
                self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Failed);
            }
        }
    }

    async fn fail(&self, state: &mut UltraPlanState, reason: &str) {
        if state.phase.is_terminal() {
            return;
        }
        warn!(group_id = %self.group_id, reason, "ultra-plan session failed");
        if let Some(planner) = state.planner.take() {
            let _ = planner.kill().await;
        }
        state.phase = UltraPlanPhase::Failed;
        state.last_error = Some(reason.to_string());
        self.emitter.emit(Event::PlanFailed {
            reason: reason.to_string(),
        });
        self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Failed);
        self.notifier.plan_finished(false, reason);
    }
}

#[async_trait]
impl Coordinator for UltraPlanCoordinator {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    fn kind(&self) -> GroupKind {
        GroupKind::UltraPlan
    }

    fn is_active(&self) -> bool {
        matches!(
            self.phase_blocking(),
            UltraPlanPhase::Planning | UltraPlanPhase::Executing
        )
    }

    async fn check_completion(&self) {
        let Ok(mut state) = self.state.try_lock() else {
            return;
        };
        match state.phase {
            UltraPlanPhase::Planning => self.check_planner(&mut state).await,
            UltraPlanPhase::Executing => self.check_pipeline(&mut state).await,
            _ => {}
        }
    }

    async fn stop(&self) {
        let mut state = self.state.lock().await;
        match state.phase {
            UltraPlanPhase::Planning | UltraPlanPhase::PlanReview => {
                if let Some(planner) = state.planner.take() {
                    let _ = planner.kill().await;
                }
                state.phase = UltraPlanPhase::Cancelled;
                self.emitter.emit(Event::PlanFailed {
                    reason: "cancelled".to_string(),
                });
                self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Failed);
                info!(group_id = %self.group_id, "ultra-plan session cancelled");
            }
            UltraPlanPhase::Executing => {
                if let Some(executor) = state.executor.as_mut() {
                    executor.cancel().await;
                    // Kills land synchronously, so one tick usually drains it;
                    // stragglers settle on later scheduler ticks.
                    executor.tick(&self.ctx, &self.emitter).await;
                }
                self.check_pipeline(&mut state).await;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ScriptedLauncher;
    use crate::config::Config;
    use crate::events::EventBus;
    use crate::prompts::PromptLibrary;
    use crate::session::Session;
    use crate::worktree::ScratchWorktreeProvider;

    fn ctx(tmp: &tempfile::TempDir) -> CoordinatorContext {
        CoordinatorContext {
            session: Arc::new(Session::new()),
            launcher: Arc::new(ScriptedLauncher::new()),
            worktrees: Arc::new(ScratchWorktreeProvider::new(tmp.path().to_path_buf())),
            bus: Arc::new(EventBus::with_default_capacity()),
            prompts: Arc::new(PromptLibrary::new()),
            config: Arc::new(Config::default()),
        }
    }

    fn notifier() -> Arc<Notifier> {
        Arc::new(Notifier::new(crate::config::NotificationsConfig {
            enabled: false,
            use_sound: false,
            sound_path: None,
        }))
    }

    fn planned(id: &str, deps: &[&str]) -> PlannedTask {
        PlannedTask {
            id: id.to_string(),
            title: id.to_string(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    async fn coordinator_in_review(tmp: &tempfile::TempDir) -> Arc<UltraPlanCoordinator> {
        let coord = UltraPlanCoordinator::create(ctx(tmp), "build it", notifier()).unwrap();
        let mut state = coord.state.lock().await;
        state.phase = UltraPlanPhase::PlanReview;
        state.plan = Some(PlanSpec::new("seed", vec![planned("a", &[])]).unwrap());
        drop(state);
        coord
    }

    #[tokio::test]
    async fn test_edit_plan_add_and_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let coord = coordinator_in_review(&tmp).await;

        let plan = coord.edit_plan(PlanMutation::AddTask(planned("b", &["a"]))).await.unwrap();
        assert_eq!(plan.execution_order, vec![vec!["a"], vec!["b"]]);

        let plan = coord.edit_plan(PlanMutation::RemoveTask { id: "a".to_string() }).await.unwrap();
        // b's dangling dependency on a was scrubbed with the removal
        assert_eq!(plan.execution_order, vec![vec!["b"]]);
    }

    #[tokio::test]
    async fn test_edit_plan_rejects_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let coord = coordinator_in_review(&tmp).await;
        coord.edit_plan(PlanMutation::AddTask(planned("b", &["a"]))).await.unwrap();

        let result = coord
            .edit_plan(PlanMutation::UpdateTask {
                id: "a".to_string(),
                title: None,
                description: None,
                priority: None,
                depends_on: Some(vec!["b".to_string()]),
            })
            .await;
        assert!(result.is_err());

        // Rejected edit left the stored plan intact
        let plan = coord.plan().await.unwrap();
        assert!(plan.task("a").unwrap().depends_on.is_empty());
    }

    #[tokio::test]
    async fn test_approve_requires_review_phase() {
        let tmp = tempfile::tempdir().unwrap();
        let coord = UltraPlanCoordinator::create(ctx(&tmp), "t", notifier()).unwrap();
        assert!(coord.approve_plan().await.is_err());
    }

    #[tokio::test]
    async fn test_approve_moves_to_executing() {
        let tmp = tempfile::tempdir().unwrap();
        let coord = coordinator_in_review(&tmp).await;
        coord.approve_plan().await.unwrap();
        assert_eq!(coord.phase().await, UltraPlanPhase::Executing);
    }

    #[tokio::test]
    async fn test_edit_bootstraps_plan_after_parse_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let coord = UltraPlanCoordinator::create(ctx(&tmp), "manual", notifier()).unwrap();
        coord.state.lock().await.phase = UltraPlanPhase::PlanReview;

        let plan = coord.edit_plan(PlanMutation::AddTask(planned("only", &[]))).await.unwrap();
        assert_eq!(plan.summary, "manual");
        assert_eq!(plan.tasks.len(), 1);
        coord.approve_plan().await.unwrap();
    }
}

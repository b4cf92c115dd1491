//! Pipeline executor: dependency-ordered, bounded-parallelism plan runner
//!
//! Executes the plan's layers in order. Admission is bounded by
//! `max_parallel` across the whole plan, not per layer; within a layer tasks
//! are admitted in the precomputed (priority desc, id asc) order, and slots
//! freed by finishing tasks are refilled from the same layer. A task error
//! lets the current layer drain but blocks every later layer.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{InstanceStatus, PlanSpec};
use crate::events::{Event, EventEmitter};
use crate::instance::InstanceSupervisor;

use super::super::CoordinatorContext;

/// Terminal and live states of a plan run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl PipelinePhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Runs one approved plan; driven by coordinator ticks
pub struct PipelineExecutor {
    plan: PlanSpec,
    max_parallel: usize,
    group_id: String,
    layer: usize,
    /// Plan task id -> supervisor of its running instance
    running: HashMap<String, Arc<InstanceSupervisor>>,
    /// Plan task id -> finished successfully
    outcomes: HashMap<String, bool>,
    phase: PipelinePhase,
    cancelling: bool,
}

impl PipelineExecutor {
    pub fn new(plan: PlanSpec, max_parallel: usize, group_id: impl Into<String>) -> Self {
        Self {
            plan,
            max_parallel: max_parallel.max(1),
            group_id: group_id.into(),
            layer: 0,
            running: HashMap::new(),
            outcomes: HashMap::new(),
            phase: PipelinePhase::Running,
            cancelling: false,
        }
    }

    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    pub fn plan(&self) -> &PlanSpec {
        &self.plan
    }

    /// Live instance count; never exceeds `max_parallel`
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Stop admitting and kill everything live; the phase becomes Cancelled
    /// once the kills are observed terminal by a later tick
    pub async fn cancel(&mut self) {
        if self.phase.is_terminal() {
            return;
        }
        self.cancelling = true;
        for (task_id, supervisor) in &self.running {
            info!(task_id, "killing plan task for cancellation");
            let _ = supervisor.kill().await;
        }
    }

    /// One scheduler-driven step: reap finished tasks, admit new ones,
    /// advance or settle layers
    pub async fn tick(&mut self, ctx: &CoordinatorContext, emitter: &EventEmitter) {
        if self.phase.is_terminal() {
            return;
        }

        self.reap(emitter);

        if self.cancelling {
            if self.running.is_empty() {
                self.phase = PipelinePhase::Cancelled;
                emitter.emit(Event::PlanFailed {
                    reason: "cancelled".to_string(),
                });
            }
            return;
        }

        if self.layer >= self.plan.execution_order.len() {
            // Empty plan approves straight to Complete
            self.phase = PipelinePhase::Complete;
            emitter.emit(Event::PlanCompleted);
            return;
        }

        self.admit(ctx, emitter).await;
        self.settle_layer(emitter);
    }

    /// Record outcomes for tasks whose instance reached a terminal status
    fn reap(&mut self, emitter: &EventEmitter) {
        let mut finished = Vec::new();
        for (task_id, supervisor) in &self.running {
            match supervisor.status() {
                InstanceStatus::Completed => finished.push((task_id.clone(), true)),
                InstanceStatus::Error => finished.push((task_id.clone(), false)),
                // Stuck/Timeout stay live until the user restarts or kills
                _ => {}
            }
        }
        for (task_id, ok) in finished {
            self.running.remove(&task_id);
            self.outcomes.insert(task_id.clone(), ok);
            if ok {
                emitter.emit(Event::TaskCompleted { id: task_id });
            } else {
                emitter.emit(Event::TaskFailed {
                    id: task_id,
                    reason: "instance error".to_string(),
                });
            }
        }
    }

    /// Admit tasks from the current layer while slots are free
    ///
    /// A layer with a failed task keeps running its remaining members; only
    /// the next layer is gated.
    async fn admit(&mut self, ctx: &CoordinatorContext, emitter: &EventEmitter) {
        let layer_ids: Vec<String> = self.plan.execution_order[self.layer].clone();
        for task_id in layer_ids {
            if self.running.len() >= self.max_parallel {
                break;
            }
            if self.outcomes.contains_key(&task_id) || self.running.contains_key(&task_id) {
                continue;
            }
            let Some(task) = self.plan.task(&task_id) else {
                warn!(task_id, "execution order references unknown task");
                self.outcomes.insert(task_id, false);
                continue;
            };

            let prompt = format!("{}\n\n{}", task.title, task.description);
            let label = format!("plan task {}: {}", task.id, task.title);
            let (instance, supervisor) = ctx.new_instance(&label);

            let workdir = match ctx.worktrees.create(&instance.id).await {
                Ok(path) => path,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "worktree creation failed for plan task");
                    ctx.session.remove_instance(&instance.id);
                    self.outcomes.insert(task_id.clone(), false);
                    emitter.emit(Event::TaskFailed {
                        id: task_id,
                        reason: format!("worktree: {e}"),
                    });
                    continue;
                }
            };
            instance.set_workdir(workdir);
            ctx.session.add_group_member(&self.group_id, &instance.id);

            match supervisor.start(&prompt).await {
                Ok(()) => {
                    info!(task_id = %task.id, instance = %instance.id, "plan task admitted");
                    emitter.emit(Event::TaskAdmitted { id: task_id.clone() });
                    self.running.insert(task_id, supervisor);
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "plan task failed to start");
                    self.outcomes.insert(task_id.clone(), false);
                    emitter.emit(Event::TaskFailed {
                        id: task_id,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// Advance past a drained layer, or settle the plan
    fn settle_layer(&mut self, emitter: &EventEmitter) {
        let layer_ids = &self.plan.execution_order[self.layer];
        let drained = layer_ids.iter().all(|id| self.outcomes.contains_key(id));
        if !drained {
            return;
        }

        let layer_failed = layer_ids.iter().any(|id| !self.outcomes[id]);
        emitter.emit(Event::PlanLayerCompleted { layer: self.layer });
        info!(layer = self.layer, layer_failed, "plan layer drained");

        if layer_failed {
            self.phase = PipelinePhase::Failed;
            emitter.emit(Event::PlanFailed {
                reason: "dependency-failed".to_string(),
            });
        } else if self.layer + 1 >= self.plan.execution_order.len() {
            self.phase = PipelinePhase::Complete;
            emitter.emit(Event::PlanCompleted);
        } else {
            self.layer += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentScript, ScriptedLauncher};
    use crate::config::Config;
    use crate::domain::{GroupKind, InstanceGroup, PlannedTask};
    use crate::events::EventBus;
    use crate::prompts::PromptLibrary;
    use crate::session::Session;
    use crate::worktree::ScratchWorktreeProvider;
    use std::time::Duration;

    fn task(id: &str, deps: &[&str], priority: i32) -> PlannedTask {
        PlannedTask {
            id: id.to_string(),
            title: format!("task {id}"),
            description: "do the thing".to_string(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            priority,
            ..Default::default()
        }
    }

    struct Fixture {
        ctx: CoordinatorContext,
        launcher: Arc<ScriptedLauncher>,
        emitter: EventEmitter,
        group_id: String,
        _tmp: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = Arc::new(ScriptedLauncher::new());
        let bus = Arc::new(EventBus::with_default_capacity());
        let session = Arc::new(Session::new());
        let group_id = session
            .add_group(InstanceGroup::new("plan", GroupKind::UltraPlan))
            .unwrap();
        let ctx = CoordinatorContext {
            session,
            launcher: launcher.clone(),
            worktrees: Arc::new(ScratchWorktreeProvider::new(tmp.path().to_path_buf())),
            bus: bus.clone(),
            prompts: Arc::new(PromptLibrary::new()),
            config: Arc::new(Config::default()),
        };
        let emitter = bus.emitter_for(group_id.clone());
        Fixture {
            ctx,
            launcher,
            emitter,
            group_id,
            _tmp: tmp,
        }
    }

    async fn drive(executor: &mut PipelineExecutor, f: &Fixture) {
        // Tick until the pipeline settles, with an upper bound
        for _ in 0..500 {
            executor.tick(&f.ctx, &f.emitter).await;
            if executor.phase().is_terminal() {
                return;
            }
            assert!(executor.running_count() <= 3, "parallelism bound violated");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("pipeline never settled, phase {:?}", executor.phase());
    }

    #[tokio::test]
    async fn test_single_task_plan_completes() {
        let f = fixture();
        f.launcher.push(AgentScript::new().emit("done\n"));
        let plan = PlanSpec::new("one", vec![task("a", &[], 0)]).unwrap();

        let mut executor = PipelineExecutor::new(plan, 3, &f.group_id);
        drive(&mut executor, &f).await;
        assert_eq!(executor.phase(), PipelinePhase::Complete);
    }

    #[tokio::test]
    async fn test_empty_plan_completes_immediately() {
        let f = fixture();
        let plan = PlanSpec::new("empty", vec![]).unwrap();
        let mut executor = PipelineExecutor::new(plan, 3, &f.group_id);
        executor.tick(&f.ctx, &f.emitter).await;
        assert_eq!(executor.phase(), PipelinePhase::Complete);
    }

    #[tokio::test]
    async fn test_failed_task_blocks_next_layer() {
        let f = fixture();
        // a succeeds, b fails, c depends on b and must never start
        f.launcher.push(AgentScript::new().emit("a ok\n"));
        f.launcher.push(AgentScript::new().exit_code(1));
        let plan = PlanSpec::new(
            "chain",
            vec![task("a", &[], 1), task("b", &[], 0), task("c", &["b"], 0)],
        )
        .unwrap();

        let mut executor = PipelineExecutor::new(plan, 3, &f.group_id);
        drive(&mut executor, &f).await;
        assert_eq!(executor.phase(), PipelinePhase::Failed);
        // Only a and b were launched
        assert_eq!(f.launcher.launches().len(), 2);
    }

    #[tokio::test]
    async fn test_max_parallel_respected() {
        let f = fixture();
        for _ in 0..4 {
            f.launcher.push(AgentScript::new().sleep_ms(50));
        }
        let plan = PlanSpec::new(
            "wide",
            vec![task("a", &[], 0), task("b", &[], 0), task("c", &[], 0), task("d", &[], 0)],
        )
        .unwrap();

        let mut executor = PipelineExecutor::new(plan, 2, &f.group_id);
        executor.tick(&f.ctx, &f.emitter).await;
        assert_eq!(executor.running_count(), 2);
        assert_eq!(f.launcher.launches().len(), 2);

        // Finish and keep ticking; the rest get admitted as slots free up
        for _ in 0..200 {
            executor.tick(&f.ctx, &f.emitter).await;
            assert!(executor.running_count() <= 2);
            if executor.phase().is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(executor.phase(), PipelinePhase::Complete);
        assert_eq!(f.launcher.launches().len(), 4);
    }

    #[tokio::test]
    async fn test_cancel_kills_and_settles() {
        let f = fixture();
        f.launcher.push(AgentScript::new().sleep_ms(60_000));
        let plan = PlanSpec::new("slow", vec![task("a", &[], 0)]).unwrap();

        let mut executor = PipelineExecutor::new(plan, 1, &f.group_id);
        executor.tick(&f.ctx, &f.emitter).await;
        assert_eq!(executor.running_count(), 1);

        executor.cancel().await;
        drive(&mut executor, &f).await;
        assert_eq!(executor.phase(), PipelinePhase::Cancelled);
    }
}

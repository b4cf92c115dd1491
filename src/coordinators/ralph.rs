//! Ralph coordinator: re-invoke one agent until it prints the promise
//!
//! Each iteration launches a fresh instance in the same working copy; state
//! lives in files, not the conversation. The scheduler's probes scan the
//! output buffer for the completion promise and watch the instance status.
//! Promise detection is final: once found the session is Complete and never
//! leaves that phase, whichever of the output scan or an explicit
//! `process_iteration_complete` call lands first.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Result, eyre};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::{GroupKind, GroupPhase, InstanceGroup, InstanceStatus};
use crate::events::EventEmitter;
use crate::instance::InstanceSupervisor;

use super::{Coordinator, CoordinatorContext};

/// How many trailing characters of an iteration feed the next prompt
const CARRYOVER_CHARS: usize = 2000;

/// Phase of a ralph session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RalphPhase {
    Idle,
    Iterating,
    /// Promise observed; final
    Complete,
    /// Iteration cap hit without the promise
    MaxIterations,
    Cancelled,
    Error,
}

impl RalphPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Iterating => "iterating",
            Self::Complete => "complete",
            Self::MaxIterations => "max-iterations",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::MaxIterations | Self::Cancelled | Self::Error)
    }
}

struct RalphState {
    iteration: u32,
    phase: RalphPhase,
    workdir: Option<PathBuf>,
    instance: Option<Arc<InstanceSupervisor>>,
    /// Idempotence latch: only the first completion call per iteration acts
    iteration_processed: bool,
    /// AutoContinue off: done iterating, waiting for the user
    awaiting_continue: bool,
    last_error: Option<String>,
}

/// Drives the ralph loop for one session
pub struct RalphCoordinator {
    group_id: String,
    task: String,
    promise: String,
    max_iterations: u32,
    auto_continue: bool,
    ctx: CoordinatorContext,
    emitter: EventEmitter,
    state: Mutex<RalphState>,
}

impl RalphCoordinator {
    /// Create the session group and the coordinator; call `launch` to begin
    pub fn create(
        ctx: CoordinatorContext,
        task: impl Into<String>,
        max_iterations: u32,
        promise: impl Into<String>,
        auto_continue: bool,
    ) -> Result<Arc<Self>> {
        let promise = promise.into();
        if promise.is_empty() {
            return Err(eyre!("completion promise must be non-empty"));
        }
        let task = task.into();
        let group = InstanceGroup::new(format!("ralph: {task}"), GroupKind::Ralph);
        let group_id = ctx.session.add_group(group)?;
        let emitter = ctx.bus.emitter_for(group_id.clone());

        Ok(Arc::new(Self {
            group_id,
            task,
            promise,
            max_iterations: max_iterations.max(1),
            auto_continue,
            ctx,
            emitter,
            state: Mutex::new(RalphState {
                iteration: 0,
                phase: RalphPhase::Idle,
                workdir: None,
                instance: None,
                iteration_processed: false,
                awaiting_continue: false,
                last_error: None,
            }),
        }))
    }

    /// Provision the shared working copy and start iteration 1
    pub async fn launch(self: &Arc<Self>) -> Result<()> {
        let workdir = match self.ctx.worktrees.create(&self.group_id).await {
            Ok(path) => path,
            Err(e) => {
                let mut state = self.state.lock().await;
                state.phase = RalphPhase::Error;
                state.last_error = Some(format!("worktree: {e}"));
                self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Failed);
                return Err(e.into());
            }
        };

        let mut state = self.state.lock().await;
        state.workdir = Some(workdir);
        self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Executing);
        if let Err(e) = self.start_iteration(&mut state).await {
            state.phase = RalphPhase::Error;
            state.last_error = Some(e.to_string());
            self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Failed);
            return Err(e);
        }
        Ok(())
    }

    pub fn phase_blocking(&self) -> RalphPhase {
        self.state.try_lock().map(|s| s.phase).unwrap_or(RalphPhase::Idle)
    }

    pub async fn phase(&self) -> RalphPhase {
        self.state.lock().await.phase
    }

    pub async fn iteration(&self) -> u32 {
        self.state.lock().await.iteration
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.lock().await.last_error.clone()
    }

    /// Waiting on the user because AutoContinue is off
    pub async fn awaiting_continue(&self) -> bool {
        self.state.lock().await.awaiting_continue
    }

    async fn start_iteration(&self, state: &mut RalphState) -> Result<()> {
        let workdir = state.workdir.clone().expect("workdir set before iterations start");
        let next = state.iteration + 1;

        // Carry the tail of the previous iteration's output into the prompt
        let previous_output = state
            .instance
            .as_ref()
            .map(|s| s.instance().buffer.tail_str(CARRYOVER_CHARS))
            .filter(|tail| !tail.is_empty());

        let prompt = self.ctx.prompts.ralph_iteration(
            &self.task,
            next,
            self.max_iterations,
            &self.promise,
            previous_output.as_deref(),
        )?;

        let supervisor = self
            .ctx
            .spawn_in_group(
                &format!("ralph iteration {} of {}", next, self.task),
                &self.group_id,
                &workdir,
                &prompt,
            )
            .await?;

        info!(group_id = %self.group_id, iteration = next, "ralph iteration started");
        state.iteration = next;
        state.instance = Some(supervisor);
        state.iteration_processed = false;
        state.awaiting_continue = false;
        state.phase = RalphPhase::Iterating;
        self.emitter.ralph_iteration_started(next);
        Ok(())
    }

    /// Advance the state machine once per iteration; extra calls no-op
    async fn process_completion(&self, state: &mut RalphState, promise_found: bool) {
        if state.phase != RalphPhase::Iterating || state.iteration_processed {
            return;
        }
        state.iteration_processed = true;
        let iteration = state.iteration;
        self.emitter.ralph_iteration_complete(iteration, promise_found);

        if promise_found {
            info!(group_id = %self.group_id, iteration, "completion promise observed");
            if let Some(instance) = state.instance.take() {
                let _ = instance.kill().await;
            }
            state.phase = RalphPhase::Complete;
            self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Completed);
            return;
        }

        if iteration >= self.max_iterations {
            info!(group_id = %self.group_id, iteration, "iteration cap reached without promise");
            state.phase = RalphPhase::MaxIterations;
            self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Failed);
            return;
        }

        if self.auto_continue {
            if let Err(e) = self.start_iteration(state).await {
                warn!(group_id = %self.group_id, error = %e, "failed to start next iteration");
                state.phase = RalphPhase::Error;
                state.last_error = Some(e.to_string());
                self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Failed);
            }
        } else {
            state.awaiting_continue = true;
        }
    }

    /// Explicit completion report; idempotent per iteration, first call wins
    pub async fn process_iteration_complete(&self, promise_found: bool) {
        let mut state = self.state.lock().await;
        self.process_completion(&mut state, promise_found).await;
    }

    /// User command to run the next iteration when AutoContinue is off
    pub async fn continue_iteration(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.phase != RalphPhase::Iterating || !state.awaiting_continue {
            return Err(eyre!("ralph session {} is not awaiting continuation", self.group_id));
        }
        self.start_iteration(&mut state).await
    }
}

#[async_trait]
impl Coordinator for RalphCoordinator {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    fn kind(&self) -> GroupKind {
        GroupKind::Ralph
    }

    fn is_active(&self) -> bool {
        !self.phase_blocking().is_terminal()
    }

    async fn check_completion(&self) {
        let Ok(mut state) = self.state.try_lock() else {
            return;
        };
        if state.phase != RalphPhase::Iterating {
            return;
        }

        let Some(supervisor) = state.instance.clone() else {
            return;
        };

        // The promise is scanned case-sensitively, anywhere in the output
        let promise_found = supervisor.instance().buffer.contains(&self.promise);

        if promise_found {
            self.process_completion(&mut state, true).await;
        } else if !state.awaiting_continue {
            match supervisor.status() {
                InstanceStatus::Completed => self.process_completion(&mut state, false).await,
                status if status.is_failed() => {
                    warn!(group_id = %self.group_id, %status, "ralph instance failed");
                    state.phase = RalphPhase::Error;
                    state.last_error = Some(format!("instance {status}"));
                    self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Failed);
                }
                _ => {}
            }
        }

        self.emitter
            .ralph_check(state.phase.is_terminal(), promise_found, state.last_error.clone());
    }

    async fn stop(&self) {
        let mut state = self.state.lock().await;
        if state.phase.is_terminal() {
            return;
        }
        if let Some(instance) = state.instance.take() {
            let _ = instance.kill().await;
        }
        state.phase = RalphPhase::Cancelled;
        self.ctx.session.set_group_phase(&self.group_id, GroupPhase::Failed);
        info!(group_id = %self.group_id, "ralph session cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_terminality() {
        assert!(RalphPhase::Complete.is_terminal());
        assert!(RalphPhase::MaxIterations.is_terminal());
        assert!(RalphPhase::Cancelled.is_terminal());
        assert!(RalphPhase::Error.is_terminal());
        assert!(!RalphPhase::Iterating.is_terminal());
        assert!(!RalphPhase::Idle.is_terminal());
    }

    #[tokio::test]
    async fn test_create_rejects_empty_promise() {
        use crate::agent::ScriptedLauncher;
        use crate::config::Config;
        use crate::events::EventBus;
        use crate::prompts::PromptLibrary;
        use crate::session::Session;
        use crate::worktree::ScratchWorktreeProvider;

        let tmp = tempfile::tempdir().unwrap();
        let ctx = CoordinatorContext {
            session: Arc::new(Session::new()),
            launcher: Arc::new(ScriptedLauncher::new()),
            worktrees: Arc::new(ScratchWorktreeProvider::new(tmp.path().to_path_buf())),
            bus: Arc::new(EventBus::with_default_capacity()),
            prompts: Arc::new(PromptLibrary::new()),
            config: Arc::new(Config::default()),
        };

        assert!(RalphCoordinator::create(ctx.clone(), "task", 3, "", true).is_err());
        let coord = RalphCoordinator::create(ctx, "task", 3, "DONE", true).unwrap();
        assert_eq!(coord.phase().await, RalphPhase::Idle);
    }
}

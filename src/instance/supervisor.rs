//! InstanceSupervisor - owns one instance through its lifecycle
//!
//! Exactly one supervisor per instance. The supervisor launches the agent,
//! owns the reader task that drains its terminal pipe into the output buffer,
//! evaluates timeouts on scheduler ticks, and applies every status
//! transition. Coordinators and the controller only call its public methods.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use eyre::{Result, eyre};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{AgentChunk, AgentLauncher, AgentProcess, AgentStatus, LaunchedAgent};
use crate::domain::{InstanceStatus, TimeoutKind};
use crate::events::EventEmitter;

use super::Instance;

pub struct InstanceSupervisor {
    instance: Arc<Instance>,
    launcher: Arc<dyn AgentLauncher>,
    emitter: EventEmitter,
    process: Mutex<Option<Arc<dyn AgentProcess>>>,
    last_prompt: std::sync::Mutex<Option<String>>,
    /// Bumped on every launch; stale reader tasks check it before acting
    epoch: AtomicU64,
    cancel: CancellationToken,
}

impl InstanceSupervisor {
    pub fn new(instance: Arc<Instance>, launcher: Arc<dyn AgentLauncher>, emitter: EventEmitter) -> Self {
        Self {
            instance,
            launcher,
            emitter,
            process: Mutex::new(None),
            last_prompt: std::sync::Mutex::new(None),
            epoch: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.instance.id
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn status(&self) -> InstanceStatus {
        self.instance.status()
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Apply a transition and emit the status-changed event
    ///
    /// Returns false (after a warning) when the edge is not legal.
    fn transition(&self, to: InstanceStatus) -> bool {
        match self.instance.try_transition(to) {
            Some(from) => {
                self.emitter.status_changed(from, to);
                true
            }
            None => false,
        }
    }

    /// Launch the agent and move to Working
    ///
    /// Legal from Pending and from every restartable status. The working copy
    /// must already be provisioned.
    pub async fn start(self: &Arc<Self>, prompt: &str) -> Result<()> {
        let workdir = self
            .instance
            .workdir()
            .ok_or_else(|| eyre!("instance {} has no working copy", self.id()))?;

        if !self.transition(InstanceStatus::Working) {
            return Err(eyre!(
                "instance {} cannot start from status {}",
                self.id(),
                self.status()
            ));
        }

        *self.last_prompt.lock().expect("prompt lock poisoned") = Some(prompt.to_string());
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        match self.launcher.launch(&workdir, prompt).await {
            Ok(LaunchedAgent { process, output }) => {
                *self.process.lock().await = Some(process.clone());
                self.instance.note_started();
                self.spawn_reader(output, process, epoch);
                info!(id = %self.id(), "instance started");
                Ok(())
            }
            Err(e) => {
                // Claimed Working above; undo to Error so the user can restart
                self.transition(InstanceStatus::Error);
                Err(e.wrap_err(format!("failed to launch agent for instance {}", self.id())))
            }
        }
    }

    fn spawn_reader(self: &Arc<Self>, mut output: mpsc::Receiver<AgentChunk>, process: Arc<dyn AgentProcess>, epoch: u64) {
        let sup = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sup.cancel.cancelled() => return,
                    chunk = output.recv() => match chunk {
                        Some(AgentChunk::Output(bytes)) => {
                            if sup.current_epoch() != epoch {
                                return;
                            }
                            let text = String::from_utf8_lossy(&bytes);
                            sup.instance.buffer.append(&text);
                            sup.instance.touch_activity();
                            if sup.status() == InstanceStatus::WaitingInput {
                                sup.transition(InstanceStatus::Working);
                            }
                            sup.emitter.output(&bytes);
                        }
                        Some(AgentChunk::Bell) => {
                            if sup.current_epoch() != epoch {
                                return;
                            }
                            sup.emitter.bell();
                            if sup.status() == InstanceStatus::Working {
                                sup.transition(InstanceStatus::WaitingInput);
                            }
                        }
                        None => {
                            // Pipe closed: infer completion from the exit code
                            let exit = process.wait().await;
                            if sup.current_epoch() == epoch {
                                sup.handle_exit(exit);
                            }
                            return;
                        }
                    }
                }
            }
        });
    }

    fn handle_exit(&self, exit: AgentStatus) {
        // Only a running instance gets its status inferred from the exit
        // code; Paused/Interrupted/terminal statuses already tell the story.
        let status = self.status();
        if !matches!(status, InstanceStatus::Working | InstanceStatus::WaitingInput) {
            debug!(id = %self.id(), %status, "process exit ignored in status");
            return;
        }
        match exit {
            AgentStatus::ExitedOk => {
                self.transition(InstanceStatus::Completed);
            }
            AgentStatus::ExitedErr(code) => {
                debug!(id = %self.id(), code, "agent exited non-zero");
                self.transition(InstanceStatus::Error);
            }
            AgentStatus::Running => {
                warn!(id = %self.id(), "exit handler called while still running");
            }
        }
    }

    /// Evaluate timeouts; called on every scheduler tick
    ///
    /// At most one timeout fires per tick, in order: activity, stale,
    /// completion.
    pub fn check_timeouts(&self) {
        let Some(kind) = self.instance.due_timeout() else {
            return;
        };
        let to = match kind {
            TimeoutKind::Activity | TimeoutKind::Stale => InstanceStatus::Stuck,
            TimeoutKind::Completion => InstanceStatus::Timeout,
        };
        if self.transition(to) {
            info!(id = %self.id(), kind = kind.as_str(), "timeout fired");
            self.emitter.timeout(kind);
        }
    }

    /// Suspend the agent (SIGSTOP for real processes)
    pub async fn pause(&self) -> Result<()> {
        if !self.transition(InstanceStatus::Paused) {
            return Err(eyre!("instance {} cannot pause from {}", self.id(), self.status()));
        }
        if let Some(process) = self.process.lock().await.clone() {
            process.pause().await?;
        }
        Ok(())
    }

    /// Resume a paused agent
    pub async fn resume(&self) -> Result<()> {
        if !self.transition(InstanceStatus::Working) {
            return Err(eyre!("instance {} cannot resume from {}", self.id(), self.status()));
        }
        // Don't let the pause window count against the activity timeout
        self.instance.touch_activity();
        if let Some(process) = self.process.lock().await.clone() {
            process.resume().await?;
        }
        Ok(())
    }

    /// Interrupt the agent (SIGINT); restartable afterwards
    pub async fn interrupt(&self) -> Result<()> {
        if !self.transition(InstanceStatus::Interrupted) {
            return Err(eyre!("instance {} cannot interrupt from {}", self.id(), self.status()));
        }
        if let Some(process) = self.process.lock().await.clone() {
            process.interrupt().await?;
        }
        Ok(())
    }

    /// Relaunch with the last prompt; legal from restartable statuses
    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        let prompt = self
            .last_prompt
            .lock()
            .expect("prompt lock poisoned")
            .clone()
            .ok_or_else(|| eyre!("instance {} was never started", self.id()))?;

        // Make sure the previous process is gone before relaunching
        if let Some(process) = self.process.lock().await.take() {
            let _ = process.kill().await;
        }
        self.start(&prompt).await
    }

    /// Force-terminate; any live status becomes Error
    pub async fn kill(&self) -> Result<()> {
        if self.status().is_terminal() {
            return Ok(());
        }
        self.transition(InstanceStatus::Error);
        if let Some(process) = self.process.lock().await.clone() {
            process.kill().await?;
        }
        Ok(())
    }

    /// A coordinator declares this instance done
    ///
    /// The supervisor itself never infers completion from output content.
    pub async fn mark_completed(&self) {
        if self.transition(InstanceStatus::Completed)
            && let Some(process) = self.process.lock().await.clone()
        {
            let _ = process.kill().await;
        }
    }

    /// Forward bytes to the agent's stdin
    pub async fn send_input(&self, bytes: &[u8]) -> Result<()> {
        let process = self.process.lock().await.clone();
        match process {
            Some(process) => {
                process.send_input(bytes).await?;
                if self.status() == InstanceStatus::WaitingInput {
                    self.transition(InstanceStatus::Working);
                }
                Ok(())
            }
            None => Err(eyre!("instance {} has no running agent", self.id())),
        }
    }

    /// Tear down on dismissal: stop the reader and kill the process
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(process) = self.process.lock().await.take() {
            let _ = process.kill().await;
        }
    }
}

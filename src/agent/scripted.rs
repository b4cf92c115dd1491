//! Scripted agent - deterministic in-process stand-in for a real agent
//!
//! Each launch pops the next [`AgentScript`] from the queue and plays it:
//! emitting output chunks, ringing the bell, writing files into the working
//! copy, sleeping, then exiting with the scripted code. The test suite drives
//! every coordinator protocol through this launcher.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{AgentChunk, AgentLauncher, AgentProcess, AgentStatus, LaunchedAgent};

/// One step of a scripted agent run
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Emit text on the output stream
    Emit(String),
    /// Ring the terminal bell
    Bell,
    /// Write a file relative to the working copy
    WriteFile { path: String, content: String },
    /// Sleep before the next step
    SleepMs(u64),
}

/// A scripted agent run: steps then an exit code
#[derive(Debug, Clone)]
pub struct AgentScript {
    steps: Vec<ScriptStep>,
    exit_code: i32,
}

impl AgentScript {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            exit_code: 0,
        }
    }

    pub fn emit(mut self, text: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::Emit(text.into()));
        self
    }

    pub fn bell(mut self) -> Self {
        self.steps.push(ScriptStep::Bell);
        self
    }

    pub fn write_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::WriteFile {
            path: path.into(),
            content: content.into(),
        });
        self
    }

    pub fn sleep_ms(mut self, ms: u64) -> Self {
        self.steps.push(ScriptStep::SleepMs(ms));
        self
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }
}

impl Default for AgentScript {
    fn default() -> Self {
        Self::new()
    }
}

/// Launcher that replays queued scripts instead of spawning real processes
pub struct ScriptedLauncher {
    scripts: Mutex<VecDeque<AgentScript>>,
    launches: Mutex<Vec<(PathBuf, String)>>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            launches: Mutex::new(Vec::new()),
        }
    }

    /// Queue the next script; launches consume the queue in FIFO order
    pub fn push(&self, script: AgentScript) {
        self.scripts.lock().expect("script queue poisoned").push_back(script);
    }

    /// `(workdir, prompt)` for every launch so far, in order
    pub fn launches(&self) -> Vec<(PathBuf, String)> {
        self.launches.lock().expect("launch log poisoned").clone()
    }
}

impl Default for ScriptedLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentLauncher for ScriptedLauncher {
    async fn launch(&self, workdir: &Path, prompt: &str) -> Result<LaunchedAgent> {
        let script = self
            .scripts
            .lock()
            .expect("script queue poisoned")
            .pop_front()
            .unwrap_or_default();

        self.launches
            .lock()
            .expect("launch log poisoned")
            .push((workdir.to_path_buf(), prompt.to_string()));

        let (tx, rx) = mpsc::channel(256);
        let state = Arc::new(Mutex::new(ScriptedState {
            status: AgentStatus::Running,
            inputs: Vec::new(),
        }));
        let cancel = CancellationToken::new();

        let process = Arc::new(ScriptedProcess {
            state: state.clone(),
            cancel: cancel.clone(),
        });

        let workdir = workdir.to_path_buf();
        let exit_code = script.exit_code;
        tokio::spawn(async move {
            for step in script.steps {
                if cancel.is_cancelled() {
                    return;
                }
                match step {
                    ScriptStep::Emit(text) => {
                        let _ = tx.send(AgentChunk::Output(text.into_bytes())).await;
                    }
                    ScriptStep::Bell => {
                        let _ = tx.send(AgentChunk::Bell).await;
                    }
                    ScriptStep::WriteFile { path, content } => {
                        let target = workdir.join(&path);
                        if let Some(parent) = target.parent() {
                            let _ = tokio::fs::create_dir_all(parent).await;
                        }
                        if let Err(e) = tokio::fs::write(&target, content).await {
                            debug!(path = %target.display(), error = %e, "scripted write failed");
                        }
                    }
                    ScriptStep::SleepMs(ms) => {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                        }
                    }
                }
            }
            let mut state = state.lock().expect("scripted state poisoned");
            if state.status == AgentStatus::Running {
                state.status = if exit_code == 0 {
                    AgentStatus::ExitedOk
                } else {
                    AgentStatus::ExitedErr(exit_code)
                };
            }
        });

        Ok(LaunchedAgent { process, output: rx })
    }
}

struct ScriptedState {
    status: AgentStatus,
    inputs: Vec<Vec<u8>>,
}

struct ScriptedProcess {
    state: Arc<Mutex<ScriptedState>>,
    cancel: CancellationToken,
}

impl ScriptedProcess {
    fn exit_if_running(&self, code: i32) {
        let mut state = self.state.lock().expect("scripted state poisoned");
        if state.status == AgentStatus::Running {
            state.status = AgentStatus::ExitedErr(code);
        }
    }
}

#[async_trait]
impl AgentProcess for ScriptedProcess {
    async fn status(&self) -> AgentStatus {
        self.state.lock().expect("scripted state poisoned").status
    }

    async fn send_input(&self, bytes: &[u8]) -> Result<()> {
        self.state
            .lock()
            .expect("scripted state poisoned")
            .inputs
            .push(bytes.to_vec());
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        Ok(())
    }

    async fn interrupt(&self) -> Result<()> {
        self.cancel.cancel();
        self.exit_if_running(130);
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        self.cancel.cancel();
        self.exit_if_running(137);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_emits_and_exits() {
        let launcher = ScriptedLauncher::new();
        launcher.push(AgentScript::new().emit("hello ").emit("world").exit_code(0));

        let tmp = tempfile::tempdir().unwrap();
        let mut agent = launcher.launch(tmp.path(), "task").await.unwrap();

        let mut out = Vec::new();
        while let Some(chunk) = agent.output.recv().await {
            if let AgentChunk::Output(bytes) = chunk {
                out.extend_from_slice(&bytes);
            }
        }
        assert_eq!(String::from_utf8(out).unwrap(), "hello world");
        assert_eq!(agent.process.wait().await, AgentStatus::ExitedOk);
    }

    #[tokio::test]
    async fn test_scripted_bell_and_files() {
        let launcher = ScriptedLauncher::new();
        launcher.push(
            AgentScript::new()
                .bell()
                .write_file("notes/result.md", "done")
                .exit_code(0),
        );

        let tmp = tempfile::tempdir().unwrap();
        let mut agent = launcher.launch(tmp.path(), "task").await.unwrap();

        assert_eq!(agent.output.recv().await, Some(AgentChunk::Bell));
        agent.process.wait().await;

        let written = tokio::fs::read_to_string(tmp.path().join("notes/result.md")).await.unwrap();
        assert_eq!(written, "done");
    }

    #[tokio::test]
    async fn test_scripted_nonzero_exit() {
        let launcher = ScriptedLauncher::new();
        launcher.push(AgentScript::new().exit_code(2));

        let tmp = tempfile::tempdir().unwrap();
        let agent = launcher.launch(tmp.path(), "task").await.unwrap();
        assert_eq!(agent.process.wait().await, AgentStatus::ExitedErr(2));
    }

    #[tokio::test]
    async fn test_kill_interrupts_sleep() {
        let launcher = ScriptedLauncher::new();
        launcher.push(AgentScript::new().sleep_ms(60_000).exit_code(0));

        let tmp = tempfile::tempdir().unwrap();
        let agent = launcher.launch(tmp.path(), "task").await.unwrap();
        agent.process.kill().await.unwrap();
        assert_eq!(agent.process.wait().await, AgentStatus::ExitedErr(137));
    }

    #[tokio::test]
    async fn test_launch_log_records_prompts() {
        let launcher = ScriptedLauncher::new();
        launcher.push(AgentScript::new());
        let tmp = tempfile::tempdir().unwrap();
        let _ = launcher.launch(tmp.path(), "build a greeter").await.unwrap();

        let launches = launcher.launches();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].1, "build a greeter");
    }
}

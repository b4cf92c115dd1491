//! External agent process abstraction
//!
//! The orchestrator never talks to a coding agent directly; it launches an
//! [`AgentProcess`] through an [`AgentLauncher`] and consumes its terminal
//! stream as [`AgentChunk`]s. The production implementation wraps an external
//! binary ([`CommandLauncher`]); [`ScriptedLauncher`] is a deterministic
//! in-process agent used by the test suite.

mod command;
mod scripted;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use tokio::sync::mpsc;

pub use command::{AgentCommandConfig, CommandLauncher};
pub use scripted::{AgentScript, ScriptStep, ScriptedLauncher};

/// Observed status of the external process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Running,
    ExitedOk,
    ExitedErr(i32),
}

/// One unit read from the agent's terminal
///
/// The terminal bell is surfaced as its own chunk so the supervisor can treat
/// it as an input-wanted signal rather than output noise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentChunk {
    Output(Vec<u8>),
    Bell,
}

/// A running agent process
#[async_trait]
pub trait AgentProcess: Send + Sync {
    async fn status(&self) -> AgentStatus;

    /// Write bytes to the agent's stdin
    async fn send_input(&self, bytes: &[u8]) -> Result<()>;

    /// Suspend execution (SIGSTOP for real processes)
    async fn pause(&self) -> Result<()>;

    /// Resume a suspended process (SIGCONT)
    async fn resume(&self) -> Result<()>;

    /// Politely interrupt (SIGINT)
    async fn interrupt(&self) -> Result<()>;

    /// Terminate immediately
    async fn kill(&self) -> Result<()>;

    /// Poll until the process exits
    async fn wait(&self) -> AgentStatus {
        loop {
            match self.status().await {
                AgentStatus::Running => tokio::time::sleep(Duration::from_millis(50)).await,
                done => return done,
            }
        }
    }
}

/// A freshly launched agent: the process handle plus its output stream
pub struct LaunchedAgent {
    pub process: Arc<dyn AgentProcess>,
    pub output: mpsc::Receiver<AgentChunk>,
}

/// Launches agent processes in a working copy
#[async_trait]
pub trait AgentLauncher: Send + Sync {
    async fn launch(&self, workdir: &Path, prompt: &str) -> Result<LaunchedAgent>;
}

//! Command-backed agent: wraps an external agent binary as a child process
//!
//! Stdout and stderr are merged into a single chunk stream in read order.
//! A BEL byte (0x07) anywhere in the stream is split out as its own
//! [`AgentChunk::Bell`]. Pause/resume/interrupt are delivered as POSIX
//! signals to the child.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Context, Result, eyre};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use super::{AgentChunk, AgentLauncher, AgentProcess, AgentStatus, LaunchedAgent};

const BEL: u8 = 0x07;
const READ_BUF_BYTES: usize = 8 * 1024;
const CHUNK_CHANNEL_CAPACITY: usize = 256;

/// How to invoke the external agent binary
#[derive(Debug, Clone)]
pub struct AgentCommandConfig {
    /// Agent executable, e.g. `claude`
    pub command: String,
    /// Fixed arguments placed before the prompt
    pub args: Vec<String>,
}

impl Default for AgentCommandConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["-p".to_string()],
        }
    }
}

/// Launches the configured agent command as a child process
pub struct CommandLauncher {
    config: AgentCommandConfig,
}

impl CommandLauncher {
    pub fn new(config: AgentCommandConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AgentLauncher for CommandLauncher {
    async fn launch(&self, workdir: &Path, prompt: &str) -> Result<LaunchedAgent> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .arg(prompt)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(format!("failed to spawn agent command '{}'", self.config.command))?;

        let pid = child.id();
        debug!(command = %self.config.command, ?pid, workdir = %workdir.display(), "agent spawned");

        let stdout = child.stdout.take().ok_or_else(|| eyre!("agent stdout not piped"))?;
        let stderr = child.stderr.take().ok_or_else(|| eyre!("agent stderr not piped"))?;
        let stdin = child.stdin.take();

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        tokio::spawn(pump_stream(stdout, tx.clone()));
        tokio::spawn(pump_stream(stderr, tx));

        let process = Arc::new(CommandAgent {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pid,
        });

        Ok(LaunchedAgent { process, output: rx })
    }
}

/// Read a pipe to exhaustion, splitting BEL bytes into bell chunks
async fn pump_stream<R>(mut reader: R, tx: mpsc::Sender<AgentChunk>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUF_BYTES];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                for chunk in split_bells(&buf[..n]) {
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Split raw bytes into output chunks and bell markers, preserving order
fn split_bells(bytes: &[u8]) -> Vec<AgentChunk> {
    let mut chunks = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == BEL {
            if i > start {
                chunks.push(AgentChunk::Output(bytes[start..i].to_vec()));
            }
            chunks.push(AgentChunk::Bell);
            start = i + 1;
        }
    }
    if start < bytes.len() {
        chunks.push(AgentChunk::Output(bytes[start..].to_vec()));
    }
    chunks
}

struct CommandAgent {
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    pid: Option<u32>,
}

impl CommandAgent {
    fn signal(&self, sig: Signal) -> Result<()> {
        let pid = self.pid.ok_or_else(|| eyre!("agent process has no pid"))?;
        kill(Pid::from_raw(pid as i32), sig).context(format!("failed to deliver {sig} to agent"))?;
        Ok(())
    }
}

#[async_trait]
impl AgentProcess for CommandAgent {
    async fn status(&self) -> AgentStatus {
        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(None) => AgentStatus::Running,
            Ok(Some(status)) => match status.code() {
                Some(0) => AgentStatus::ExitedOk,
                Some(code) => AgentStatus::ExitedErr(code),
                // Killed by signal
                None => AgentStatus::ExitedErr(-1),
            },
            Err(e) => {
                warn!(error = %e, "failed to poll agent status");
                AgentStatus::ExitedErr(-1)
            }
        }
    }

    async fn send_input(&self, bytes: &[u8]) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        match stdin.as_mut() {
            Some(pipe) => {
                pipe.write_all(bytes).await.context("failed to write agent stdin")?;
                pipe.flush().await.context("failed to flush agent stdin")?;
                Ok(())
            }
            None => Err(eyre!("agent stdin closed")),
        }
    }

    async fn pause(&self) -> Result<()> {
        self.signal(Signal::SIGSTOP)
    }

    async fn resume(&self) -> Result<()> {
        self.signal(Signal::SIGCONT)
    }

    async fn interrupt(&self) -> Result<()> {
        self.signal(Signal::SIGINT)
    }

    async fn kill(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        match child.start_kill() {
            Ok(()) => Ok(()),
            // Already exited
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e).context("failed to kill agent process"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_bells_plain_output() {
        let chunks = split_bells(b"hello world");
        assert_eq!(chunks, vec![AgentChunk::Output(b"hello world".to_vec())]);
    }

    #[test]
    fn test_split_bells_embedded() {
        let chunks = split_bells(b"before\x07after");
        assert_eq!(
            chunks,
            vec![
                AgentChunk::Output(b"before".to_vec()),
                AgentChunk::Bell,
                AgentChunk::Output(b"after".to_vec()),
            ]
        );
    }

    #[test]
    fn test_split_bells_adjacent_and_edges() {
        let chunks = split_bells(b"\x07\x07x\x07");
        assert_eq!(
            chunks,
            vec![
                AgentChunk::Bell,
                AgentChunk::Bell,
                AgentChunk::Output(b"x".to_vec()),
                AgentChunk::Bell,
            ]
        );
    }

    #[tokio::test]
    async fn test_launch_echo_command() {
        let launcher = CommandLauncher::new(AgentCommandConfig {
            command: "echo".to_string(),
            args: vec![],
        });
        let tmp = tempfile::tempdir().unwrap();
        let mut agent = launcher.launch(tmp.path(), "hello-agent").await.unwrap();

        let mut collected = Vec::new();
        while let Some(chunk) = agent.output.recv().await {
            if let AgentChunk::Output(bytes) = chunk {
                collected.extend_from_slice(&bytes);
            }
        }
        assert!(String::from_utf8_lossy(&collected).contains("hello-agent"));
        assert_eq!(agent.process.wait().await, AgentStatus::ExitedOk);
    }

    #[tokio::test]
    async fn test_exit_code_surfaces() {
        let launcher = CommandLauncher::new(AgentCommandConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string()],
        });
        let tmp = tempfile::tempdir().unwrap();
        let agent = launcher.launch(tmp.path(), "exit 3").await.unwrap();
        assert_eq!(agent.process.wait().await, AgentStatus::ExitedErr(3));
    }

    #[tokio::test]
    async fn test_kill_long_running() {
        let launcher = CommandLauncher::new(AgentCommandConfig {
            command: "sleep".to_string(),
            args: vec![],
        });
        let tmp = tempfile::tempdir().unwrap();
        let agent = launcher.launch(tmp.path(), "60").await.unwrap();

        assert_eq!(agent.process.status().await, AgentStatus::Running);
        agent.process.kill().await.unwrap();
        assert!(matches!(agent.process.wait().await, AgentStatus::ExitedErr(_)));
    }
}

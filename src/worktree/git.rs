//! Git worktree provider: one worktree + branch per task

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{WorktreeError, WorktreeProvider};

/// Configuration for the git worktree provider
#[derive(Debug, Clone)]
pub struct GitWorktreeConfig {
    /// Path to the main repository
    pub repo_root: PathBuf,

    /// Base directory for created worktrees
    pub base_dir: PathBuf,

    /// Branch prefix for worktree branches
    pub branch_prefix: String,
}

impl Default for GitWorktreeConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            base_dir: PathBuf::from("/tmp/agentherd/worktrees"),
            branch_prefix: "agentherd".to_string(),
        }
    }
}

/// Manager for per-task git worktrees
pub struct GitWorktreeProvider {
    config: GitWorktreeConfig,
}

impl GitWorktreeProvider {
    pub fn new(config: GitWorktreeConfig) -> Self {
        Self { config }
    }

    async fn git(&self, args: &[&str]) -> Result<std::process::Output, WorktreeError> {
        Command::new("git")
            .args(args)
            .current_dir(&self.config.repo_root)
            .output()
            .await
            .map_err(|e| WorktreeError::GitError(e.to_string()))
    }
}

#[async_trait]
impl WorktreeProvider for GitWorktreeProvider {
    async fn create(&self, task_id: &str) -> Result<PathBuf, WorktreeError> {
        if let Err(e) = tokio::fs::create_dir_all(&self.config.base_dir).await {
            return Err(WorktreeError::CreateFailed(format!("base dir: {e}")));
        }

        let path = self.config.base_dir.join(task_id);
        let branch = format!("{}/{}", self.config.branch_prefix, task_id);
        let path_str = path.to_string_lossy().to_string();

        let output = self
            .git(&["worktree", "add", &path_str, "-b", &branch, "HEAD"])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorktreeError::CreateFailed(stderr.to_string()));
        }

        info!(task_id, path = %path.display(), branch, "created worktree");
        Ok(path)
    }

    async fn destroy(&self, path: &Path) -> Result<(), WorktreeError> {
        let path_str = path.to_string_lossy().to_string();
        let output = self.git(&["worktree", "remove", "--force", &path_str]).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Fall back to a plain delete so a wedged worktree doesn't leak disk
            warn!(path = %path.display(), %stderr, "git worktree remove failed, deleting directory");
            tokio::fs::remove_dir_all(path)
                .await
                .map_err(|e| WorktreeError::RemoveFailed(e.to_string()))?;
            let _ = self.git(&["worktree", "prune"]).await;
        }

        // Branch name mirrors the directory name
        if let Some(task_id) = path.file_name().and_then(|n| n.to_str()) {
            let branch = format!("{}/{}", self.config.branch_prefix, task_id);
            let _ = self.git(&["branch", "-D", &branch]).await;
            debug!(branch, "removed worktree branch");
        }

        Ok(())
    }
}

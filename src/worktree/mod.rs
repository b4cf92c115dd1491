//! Isolated working copies for agent instances
//!
//! Each task runs in its own working copy. With a git repository configured
//! the provider is a `git worktree` per task; otherwise plain scratch
//! directories are used so the orchestrator still works outside a repo.

mod git;
mod scratch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

pub use git::{GitWorktreeConfig, GitWorktreeProvider};
pub use scratch::ScratchWorktreeProvider;

/// Error types for working-copy operations
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("failed to create working copy: {0}")]
    CreateFailed(String),

    #[error("failed to remove working copy: {0}")]
    RemoveFailed(String),

    #[error("git command failed: {0}")]
    GitError(String),
}

/// Creates and destroys isolated working copies
///
/// Creation may be slow (checkout-sized); callers dispatch it off the event
/// loop.
#[async_trait]
pub trait WorktreeProvider: Send + Sync {
    async fn create(&self, task_id: &str) -> Result<PathBuf, WorktreeError>;
    async fn destroy(&self, path: &Path) -> Result<(), WorktreeError>;
}

/// Pick a provider for the configured repository root
///
/// A `.git` directory selects git worktrees; anything else gets scratch
/// directories under the base dir.
pub fn provider_for(repo_root: &Path, base_dir: &Path, branch_prefix: &str) -> Arc<dyn WorktreeProvider> {
    if repo_root.join(".git").exists() {
        Arc::new(GitWorktreeProvider::new(GitWorktreeConfig {
            repo_root: repo_root.to_path_buf(),
            base_dir: base_dir.to_path_buf(),
            branch_prefix: branch_prefix.to_string(),
        }))
    } else {
        Arc::new(ScratchWorktreeProvider::new(base_dir.to_path_buf()))
    }
}

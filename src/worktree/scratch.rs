//! Scratch directory provider for running without a git repository

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use super::{WorktreeError, WorktreeProvider};

/// Plain per-task directories under a base dir
pub struct ScratchWorktreeProvider {
    base_dir: PathBuf,
}

impl ScratchWorktreeProvider {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }
}

#[async_trait]
impl WorktreeProvider for ScratchWorktreeProvider {
    async fn create(&self, task_id: &str) -> Result<PathBuf, WorktreeError> {
        let path = self.base_dir.join(task_id);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| WorktreeError::CreateFailed(e.to_string()))?;
        info!(task_id, path = %path.display(), "created scratch working copy");
        Ok(path)
    }

    async fn destroy(&self, path: &Path) -> Result<(), WorktreeError> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorktreeError::RemoveFailed(e.to_string())),
        }
    }
}

//! Worktree manager for per-task isolated checkouts
//!
//! Sprint workers each get a worktree under `<repo>/.sprint_workspaces/` on a
//! fresh `sprint/task-<id>` branch. When git is unavailable the manager
//! degrades to no isolation rather than failing the sprint.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info, warn};

/// Directory under the repository root holding task worktrees
pub const WORKSPACES_DIR: &str = ".sprint_workspaces";

/// Error types for worktree operations
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("Failed to create worktree: {0}")]
    CreateFailed(String),

    #[error("Merge failed for task {task_id}: {stderr}")]
    MergeFailed { task_id: String, stderr: String },

    #[error("Worktree not found: {0}")]
    NotFound(String),

    #[error("Git command failed: {0}")]
    GitError(String),
}

/// Manager for sprint task worktrees
pub struct WorktreeManager {
    repo_root: PathBuf,
    git_available: bool,
}

impl WorktreeManager {
    /// Create a manager rooted at the repository. Probes for git once; a
    /// missing binary switches every operation into degraded pass-through.
    pub async fn new(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        debug!(?repo_root, "WorktreeManager::new: called");

        let git_available = Command::new("git")
            .arg("--version")
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false);

        if !git_available {
            warn!("Git not available. Sprint isolation will be disabled (risky).");
        }

        let _ = tokio::fs::create_dir_all(repo_root.join(WORKSPACES_DIR)).await;

        Self {
            repo_root,
            git_available,
        }
    }

    /// Whether isolation is actually in effect
    pub fn isolated(&self) -> bool {
        self.git_available
    }

    /// Path a task's worktree lives at
    pub fn worktree_path(&self, task_id: &str) -> PathBuf {
        self.repo_root.join(WORKSPACES_DIR).join(task_id)
    }

    fn branch_name(task_id: &str) -> String {
        format!("sprint/task-{}", task_id)
    }

    async fn run_git(&self, args: &[&str], cwd: &Path) -> Result<(), WorktreeError> {
        debug!(?args, ?cwd, "WorktreeManager::run_git: called");
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| WorktreeError::GitError(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(WorktreeError::GitError(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    /// Create a worktree for the task on a fresh branch based at HEAD.
    ///
    /// A colliding pre-existing directory is force-cleaned first. In degraded
    /// mode this returns the repository root.
    pub async fn create(&self, task_id: &str) -> Result<PathBuf, WorktreeError> {
        debug!(%task_id, "WorktreeManager::create: called");
        if !self.git_available {
            return Ok(self.repo_root.clone());
        }

        let worktree_path = self.worktree_path(task_id);
        if worktree_path.exists() {
            warn!(
                "Worktree path {} already exists. Cleaning up first.",
                worktree_path.display()
            );
            self.cleanup(task_id, true).await;
        }
        debug!(%task_id, "WorktreeManager::create: path clear");

        let branch = Self::branch_name(task_id);
        info!("Creating worktree for {} at {}", task_id, worktree_path.display());

        self.run_git(
            &[
                "worktree",
                "add",
                "-b",
                &branch,
                worktree_path.to_str().unwrap_or_default(),
                "HEAD",
            ],
            &self.repo_root,
        )
        .await
        .map_err(|e| WorktreeError::CreateFailed(e.to_string()))?;

        debug!(%task_id, "WorktreeManager::create: git worktree add succeeded");
        Ok(worktree_path)
    }

    /// Commit any pending changes in the worktree to save progress.
    pub async fn rescue(&self, task_id: &str) -> Result<(), WorktreeError> {
        debug!(%task_id, "WorktreeManager::rescue: called");
        if !self.git_available {
            return Ok(());
        }

        let worktree_path = self.worktree_path(task_id);
        if !worktree_path.exists() {
            return Err(WorktreeError::NotFound(task_id.to_string()));
        }

        info!("Rescuing worktree for {} (Committing WIP)...", task_id);
        self.run_git(&["add", "."], &worktree_path).await?;

        // Nothing to commit is fine
        let message = format!("WIP: Saved progress for task {} on interrupt", task_id);
        if let Err(e) = self.run_git(&["commit", "-m", &message], &worktree_path).await {
            debug!(%task_id, error = %e, "WorktreeManager::rescue: commit skipped");
        }

        Ok(())
    }

    /// Merge the task branch into the parent repo's current branch.
    ///
    /// `--no-ff` so each task lands as one merge commit. On conflict the
    /// worktree and branch are preserved for inspection; no rollback.
    pub async fn merge(&self, task_id: &str) -> Result<(), WorktreeError> {
        debug!(%task_id, "WorktreeManager::merge: called");
        if !self.git_available {
            return Ok(());
        }

        let branch = Self::branch_name(task_id);
        let message = format!("Merge task {}", task_id);
        info!("Merging changes from {}...", branch);

        self.run_git(&["merge", "--no-ff", &branch, "-m", &message], &self.repo_root)
            .await
            .map_err(|e| WorktreeError::MergeFailed {
                task_id: task_id.to_string(),
                stderr: e.to_string(),
            })?;

        info!("Successfully merged {}.", branch);
        Ok(())
    }

    /// Remove the worktree; optionally delete its branch.
    pub async fn cleanup(&self, task_id: &str, delete_branch: bool) {
        debug!(%task_id, delete_branch, "WorktreeManager::cleanup: called");
        if !self.git_available {
            return;
        }

        let worktree_path = self.worktree_path(task_id);
        if worktree_path.exists() {
            let removed = self
                .run_git(
                    &["worktree", "remove", "--force", worktree_path.to_str().unwrap_or_default()],
                    &self.repo_root,
                )
                .await;

            if removed.is_err() {
                debug!(%task_id, "WorktreeManager::cleanup: falling back to rm + prune");
                let _ = tokio::fs::remove_dir_all(&worktree_path).await;
                let _ = self.run_git(&["worktree", "prune"], &self.repo_root).await;
            }
        }

        if delete_branch {
            let branch = Self::branch_name(task_id);
            let _ = self.run_git(&["branch", "-D", &branch], &self.repo_root).await;
        }
    }
}

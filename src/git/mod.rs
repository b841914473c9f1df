//! Git safety layer
//!
//! Agents only ever work on disposable `agent/...` branches. Pushes to
//! protected refs are refused here, and optionally at the binary level by the
//! shim (see [`shim`]).

pub mod shim;

use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::util::{sanitize_url, unix_timestamp};

/// Branches agents may never commit or push to
pub const PROTECTED_BRANCHES: &[&str] = &["main", "master"];

/// Git operation errors
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("Refusing to operate on protected branch '{0}'")]
    ProtectedBranch(String),

    #[error("Git command failed: {0}")]
    CommandFailed(String),

    #[error("Git execution error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether a branch name is in the protected set (case-insensitive)
pub fn is_protected(branch: &str) -> bool {
    PROTECTED_BRANCHES.iter().any(|p| branch.eq_ignore_ascii_case(p))
}

/// Whether the push-safeguard wrapper has replaced the git binary
pub fn is_shim_active() -> bool {
    Path::new("/usr/bin/git.real").exists()
}

async fn run_git(args: &[&str], cwd: &Path) -> Result<String, GitError> {
    debug!(?args, ?cwd, "run_git: called");
    let output = Command::new("git").args(args).current_dir(cwd).output().await?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!(?args, %stderr, "run_git: command failed");
        Err(GitError::CommandFailed(stderr))
    }
}

/// Current branch name of the working tree
pub async fn current_branch(dir: &Path) -> Result<String, GitError> {
    let out = run_git(&["rev-parse", "--abbrev-ref", "HEAD"], dir).await?;
    Ok(out.trim().to_string())
}

/// Fatal error if the working tree sits on a protected ref
pub async fn assert_safe(dir: &Path) -> Result<(), GitError> {
    let branch = current_branch(dir).await?;
    if is_protected(&branch) {
        return Err(GitError::ProtectedBranch(branch));
    }
    Ok(())
}

/// Ensure the project is in a safe git state.
///
/// Initializes a repository (with an initial commit on `main`) when none
/// exists, then creates and checks out a fresh disposable branch
/// `agent/{ticket-or-session}-{unix-ts}`. Returns the branch name.
pub async fn ensure_safe(dir: &Path, ticket: Option<&str>) -> Result<String, GitError> {
    if !dir.join(".git").exists() {
        info!("Initializing new git repository...");
        if is_shim_active() {
            info!("Git push safeguard is ACTIVE.");
        }
        run_git(&["init"], dir).await?;
        // A repo the daemon creates needs a committer identity before the
        // initial commit; agents commit into it unattended later.
        let _ = run_git(&["config", "user.email", "agent@localhost"], dir).await;
        let _ = run_git(&["config", "user.name", "agentdaemon"], dir).await;
        let _ = run_git(&["add", "."], dir).await;
        let _ = run_git(&["commit", "-m", "Initial commit", "--allow-empty"], dir).await;
        let _ = run_git(&["branch", "-M", "main"], dir).await;
    }

    let branch_name = match ticket {
        Some(ticket) => {
            let safe_ticket: String = ticket
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
                .collect();
            format!("agent/{}-{}", safe_ticket, unix_timestamp())
        }
        None => format!("agent/session-{}", unix_timestamp()),
    };

    info!("Checking out safe branch: {}", branch_name);
    match run_git(&["checkout", "-b", &branch_name], dir).await {
        Ok(_) => info!("Switched to new branch: {}", branch_name),
        Err(e) => warn!("Failed to create/switch to branch {}: {}", branch_name, e),
    }

    Ok(branch_name)
}

/// Push a branch to origin with upstream tracking.
///
/// Refuses protected branches before any child process is spawned.
pub async fn push(dir: &Path, branch: Option<&str>) -> Result<(), GitError> {
    let branch_name = match branch {
        Some(b) => b.to_string(),
        None => current_branch(dir).await?,
    };

    if is_protected(&branch_name) {
        warn!("ABORTED: Attempted to push to restricted branch '{}'.", branch_name);
        return Err(GitError::ProtectedBranch(branch_name));
    }

    info!("Pushing branch {} to origin...", branch_name);
    run_git(&["push", "-u", "origin", &branch_name], dir).await?;
    Ok(())
}

/// Install a global `insteadOf` rewrite so outbound clones and pushes carry
/// credentials without embedding them in tracked remotes.
pub async fn configure_auth(token: &str, host: &str, username: &str) -> Result<(), GitError> {
    let token = token.trim();
    let host = host.trim();
    let username = username.trim();

    info!("Configuring Git Auth for host: {} (User: {})", host, username);

    let auth_url = format!("https://{}:{}@{}/", username, token, host);
    let base_url = format!("https://{}/", host);
    let key = format!("url.{}.insteadOf", auth_url);

    let output = Command::new("git")
        .args(["config", "--global", &key, &base_url])
        .output()
        .await?;

    if output.status.success() {
        Ok(())
    } else {
        Err(GitError::CommandFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

/// Clone a repository to the destination path.
pub async fn clone_repo(url: &str, dest: &Path) -> Result<(), GitError> {
    info!("Cloning {} to {}...", sanitize_url(url), dest.display());

    let output = Command::new("git")
        .args(["clone", url])
        .arg(dest)
        .output()
        .await?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!("Failed to clone repo {}: {}", sanitize_url(url), stderr);
        Err(GitError::CommandFailed(stderr))
    }
}

/// URL of the `origin` remote
pub async fn remote_url(dir: &Path) -> Result<String, GitError> {
    let out = run_git(&["remote", "get-url", "origin"], dir).await?;
    Ok(out.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn git(args: &[&str], dir: &Path) {
        Command::new("git").args(args).current_dir(dir).output().await.unwrap();
    }

    async fn init_repo(dir: &Path) {
        git(&["init"], dir).await;
        git(&["config", "user.email", "test@test.com"], dir).await;
        git(&["config", "user.name", "Test"], dir).await;
        git(&["commit", "--allow-empty", "-m", "initial"], dir).await;
        git(&["branch", "-M", "main"], dir).await;
    }

    #[test]
    fn test_is_protected() {
        assert!(is_protected("main"));
        assert!(is_protected("master"));
        assert!(is_protected("MAIN"));
        assert!(!is_protected("agent/session-1"));
        assert!(!is_protected("develop"));
    }

    #[tokio::test]
    async fn test_ensure_safe_initializes_and_branches() {
        let temp = tempdir().unwrap();

        let branch = ensure_safe(temp.path(), None).await.unwrap();
        assert!(branch.starts_with("agent/session-"));

        let current = current_branch(temp.path()).await.unwrap();
        assert!(!is_protected(&current));
    }

    #[tokio::test]
    async fn test_ensure_safe_with_ticket_sanitizes() {
        let temp = tempdir().unwrap();
        init_repo(temp.path()).await;

        let branch = ensure_safe(temp.path(), Some("PROJ-42/../etc")).await.unwrap();
        assert!(branch.starts_with("agent/PROJ-42etc-"));
        assert!(!branch.contains('/') || branch.starts_with("agent/"));
    }

    #[tokio::test]
    async fn test_ensure_safe_idempotent() {
        let temp = tempdir().unwrap();
        init_repo(temp.path()).await;

        ensure_safe(temp.path(), None).await.unwrap();
        ensure_safe(temp.path(), None).await.unwrap();
        assert!(assert_safe(temp.path()).await.is_ok());
    }

    #[tokio::test]
    async fn test_assert_safe_rejects_main() {
        let temp = tempdir().unwrap();
        init_repo(temp.path()).await;

        let result = assert_safe(temp.path()).await;
        assert!(matches!(result, Err(GitError::ProtectedBranch(ref b)) if b == "main"));
    }

    #[tokio::test]
    async fn test_push_refuses_protected_branch() {
        let temp = tempdir().unwrap();
        init_repo(temp.path()).await;

        // On main; push must refuse without spawning a push process (no
        // origin is configured, so a real attempt would fail differently).
        let result = push(temp.path(), None).await;
        assert!(matches!(result, Err(GitError::ProtectedBranch(_))));

        let explicit = push(temp.path(), Some("master")).await;
        assert!(matches!(explicit, Err(GitError::ProtectedBranch(_))));
    }

    #[tokio::test]
    async fn test_clone_repo() {
        let src = tempdir().unwrap();
        init_repo(src.path()).await;

        let dst = tempdir().unwrap();
        let dest_path = dst.path().join("clone");
        clone_repo(src.path().to_str().unwrap(), &dest_path).await.unwrap();
        assert!(dest_path.join(".git").exists());
    }
}

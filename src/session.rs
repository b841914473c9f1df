//! Session store
//!
//! Detached agent runs are supervised through small JSON records under the
//! user data directory, one per session name. Liveness is derived from PID
//! inspection at read time, including zombie detection.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::APP_NAME;

/// Session lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Session '{0}' not found")]
    NotFound(String),

    #[error("Failed to clone workspace: {0}")]
    WorkspaceClone(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Persisted session record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub name: String,
    pub pid: u32,
    pub start_time: f64,
    pub command: Vec<String>,
    pub log_file: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<PathBuf>,
    #[serde(rename = "type")]
    pub session_type: String,
}

/// Liveness derived from PID inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Dead,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Dead => "dead",
        }
    }
}

/// Whether a PID refers to a live, non-zombie process
pub fn is_process_running(pid: u32) -> bool {
    let nix_pid = Pid::from_raw(pid as i32);
    if kill(nix_pid, None).is_err() {
        return false;
    }

    // Signal 0 succeeds for zombies too; the state field follows the
    // parenthesized command name in /proc/<pid>/stat.
    if let Ok(stat) = fs::read_to_string(format!("/proc/{}/stat", pid)) {
        if let Some(rest) = stat.rsplit(')').next() {
            if rest.trim_start().starts_with('Z') {
                return false;
            }
        }
    }

    true
}

/// Manages session records and detached processes
pub struct SessionStore {
    data_dir: PathBuf,
    logs_dir: PathBuf,
    workspaces_dir: PathBuf,
}

impl SessionStore {
    /// Store rooted at the user data/log directories (or `$LOG_DIR`)
    pub fn new() -> std::io::Result<Self> {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join(APP_NAME);
        let logs_dir = match std::env::var("LOG_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_NAME)
                .join("logs"),
        };

        Self::with_dirs(base.join("sessions"), logs_dir, base.join("workspaces"))
    }

    pub fn with_dirs(data_dir: PathBuf, logs_dir: PathBuf, workspaces_dir: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&logs_dir)?;
        fs::create_dir_all(&workspaces_dir)?;
        Ok(Self {
            data_dir,
            logs_dir,
            workspaces_dir,
        })
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", name))
    }

    fn read_record(&self, name: &str) -> Option<SessionRecord> {
        let path = self.record_path(name);
        if !path.exists() {
            return None;
        }
        fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
    }

    fn write_record(&self, record: &SessionRecord) -> Result<(), SessionError> {
        let content = serde_json::to_string_pretty(record)?;
        fs::write(self.record_path(&record.name), content)?;
        Ok(())
    }

    /// All known sessions with their liveness status
    pub fn list(&self) -> Vec<(SessionRecord, SessionStatus)> {
        debug!("SessionStore::list: called");
        let mut sessions = Vec::new();

        let Ok(entries) = fs::read_dir(&self.data_dir) else {
            return sessions;
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let Ok(content) = fs::read_to_string(&path) else {
                    continue;
                };
                let Ok(record) = serde_json::from_str::<SessionRecord>(&content) else {
                    continue;
                };
                let status = if is_process_running(record.pid) {
                    SessionStatus::Running
                } else {
                    SessionStatus::Dead
                };
                sessions.push((record, status));
            }
        }

        sessions
    }

    /// Path of a session's log file
    pub fn log_path(&self, name: &str) -> Option<PathBuf> {
        self.read_record(name).map(|record| record.log_file)
    }

    /// Clone the caller's repository into an isolated workspace for a
    /// ticket-bound session.
    pub async fn prepare_workspace(&self, name: &str, original_dir: &Path) -> Result<PathBuf, SessionError> {
        let target = self.workspaces_dir.join(name);
        debug!(?target, "SessionStore::prepare_workspace: called");

        if target.exists() {
            fs::remove_dir_all(&target)?;
        }

        info!("Creating isolated workspace for {}...", name);
        crate::git::clone_repo(&original_dir.display().to_string(), &target)
            .await
            .map_err(|e| SessionError::WorkspaceClone(e.to_string()))?;

        Ok(target)
    }

    /// Launch a detached session.
    ///
    /// Enforces name uniqueness among live sessions; a dead record under the
    /// same name is reaped first. Stdout and stderr tee into the log file.
    pub fn start_detached(
        &self,
        name: &str,
        command: &[String],
        workspace_path: Option<PathBuf>,
    ) -> Result<SessionRecord, SessionError> {
        debug!(%name, ?command, "SessionStore::start_detached: called");

        if let Some(existing) = self.read_record(name) {
            if is_process_running(existing.pid) {
                return Err(SessionError::AlreadyRunning(name.to_string()));
            }
            debug!(%name, "SessionStore::start_detached: reaping dead record");
            let _ = fs::remove_file(self.record_path(name));
        }

        let log_file = self.logs_dir.join(format!("{}.log", name));
        let stdout = fs::File::create(&log_file)?;
        let stderr = stdout.try_clone()?;

        let mut cmd = std::process::Command::new(&command[0]);
        cmd.args(&command[1..])
            .stdin(std::process::Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        if let Some(dir) = &workspace_path {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn()?;

        let record = SessionRecord {
            name: name.to_string(),
            pid: child.id(),
            start_time: crate::util::unix_timestamp() as f64,
            command: command.to_vec(),
            log_file,
            workspace_path,
            session_type: "detached".to_string(),
        };
        self.write_record(&record)?;

        info!("Session '{}' started (PID: {})", name, record.pid);
        Ok(record)
    }

    /// Run a session in the foreground, streaming output to the terminal.
    /// Returns the child's exit code.
    pub fn run_interactive(&self, command: &[String]) -> Result<i32, SessionError> {
        debug!(?command, "SessionStore::run_interactive: called");

        let status = std::process::Command::new(&command[0])
            .args(&command[1..])
            .status()?;

        Ok(status.code().unwrap_or(1))
    }

    /// Stop a session: SIGTERM, 5 s grace, then SIGKILL. Removes the record
    /// and any isolated workspace.
    pub async fn stop(&self, name: &str) -> Result<String, SessionError> {
        debug!(%name, "SessionStore::stop: called");

        let record = self
            .read_record(name)
            .ok_or_else(|| SessionError::NotFound(name.to_string()))?;

        let mut message = "Session file removed (was dead)".to_string();

        if is_process_running(record.pid) {
            let pid = Pid::from_raw(record.pid as i32);
            debug!(%name, pid = record.pid, "SessionStore::stop: sending SIGTERM");
            let _ = kill(pid, Signal::SIGTERM);

            let mut stopped = false;
            for _ in 0..50 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                if !is_process_running(record.pid) {
                    stopped = true;
                    break;
                }
            }

            if !stopped {
                warn!("Session '{}' did not stop in time, sending SIGKILL", name);
                let _ = kill(pid, Signal::SIGKILL);
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            message = "Stopped".to_string();
        }

        let _ = fs::remove_file(self.record_path(name));

        if let Some(workspace) = &record.workspace_path {
            if workspace.exists() {
                debug!(?workspace, "SessionStore::stop: removing workspace");
                let _ = fs::remove_dir_all(workspace);
            }
        }

        info!("Session '{}': {}", name, message);
        Ok(message)
    }
}

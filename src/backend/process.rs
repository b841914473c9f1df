//! CLI subprocess backend
//!
//! Spawns an external agent binary, feeds it the prompt, and drains both
//! streams concurrently under an activity-based timeout: output resets the
//! deadline, and file activity in the working tree buys another minute.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::control::{StatusSender, StatusUpdate};
use crate::util::{has_recent_activity, system_health_snapshot};

use super::{Backend, BackendError, BackendResponse};

/// Poll granularity of the activity loop
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Window and extension for file-activity based deadline pushes
const FILE_ACTIVITY_WINDOW: Duration = Duration::from_secs(60);

/// Environment keys always forwarded to the child
const SAFE_ENV_KEYS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "SHELL",
    "TERM",
    "TMPDIR",
    "LANG",
    "LC_ALL",
    "LC_CTYPE",
    "DISPLAY",
    "XAUTHORITY",
    "SSH_AUTH_SOCK",
    "SSH_AGENT_PID",
    "WORKSPACE_DIR",
    "PROJECT_NAME",
    "NODE_ENV",
    "NVM_DIR",
];

/// Environment prefixes always forwarded to the child
const SAFE_ENV_PREFIXES: &[&str] = &["XDG_", "npm_"];

/// Build the filtered child environment: the allowlist, safe prefixes, the
/// backend's own prefix, and the configured opt-in set. Guards against
/// ARG_MAX blowups and credential bleed.
pub fn filtered_env(backend_prefix: &str, passthrough: &[String]) -> HashMap<String, String> {
    std::env::vars()
        .filter(|(key, _)| {
            SAFE_ENV_KEYS.contains(&key.as_str())
                || SAFE_ENV_PREFIXES.iter().any(|p| key.starts_with(p))
                || (!backend_prefix.is_empty() && key.starts_with(backend_prefix))
                || passthrough.iter().any(|p| p == key)
        })
        .collect()
}

/// How the prompt reaches the child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptVia {
    Stdin,
    Argv,
}

/// Subprocess-based backend (gemini / cursor CLIs)
pub struct ProcessBackend {
    kind: &'static str,
    binary: String,
    model: Option<String>,
    prompt_via: PromptVia,
    env_prefix: &'static str,
    env_passthrough: Vec<String>,
    extra_env: Vec<(&'static str, &'static str)>,
    timeout: Duration,
}

impl ProcessBackend {
    /// The gemini CLI: prompt over stdin, text output, auto-approval.
    pub fn gemini(config: &Config) -> Self {
        Self {
            kind: "gemini",
            binary: "gemini".to_string(),
            model: config.model.clone().filter(|m| m != "auto"),
            prompt_via: PromptVia::Stdin,
            env_prefix: "GEMINI_",
            env_passthrough: config.env_passthrough.clone(),
            extra_env: vec![],
            timeout: Duration::from_secs(config.limits.timeout_secs),
        }
    }

    /// The cursor-agent CLI: prompt as argv, workspace flag, no browser.
    pub fn cursor(config: &Config) -> Self {
        Self {
            kind: "cursor",
            binary: "cursor-agent".to_string(),
            model: config.model.clone().filter(|m| m != "auto"),
            prompt_via: PromptVia::Argv,
            env_prefix: "CURSOR_",
            env_passthrough: config.env_passthrough.clone(),
            extra_env: vec![("NO_OPEN_BROWSER", "1")],
            timeout: Duration::from_secs(config.limits.timeout_secs),
        }
    }

    fn build_command(&self, prompt: &str, cwd: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);

        match self.prompt_via {
            PromptVia::Stdin => {
                cmd.args(["--output-format", "text", "--approval-mode", "yolo"]);
                if let Some(model) = &self.model {
                    cmd.args(["--model", model]);
                }
                cmd.stdin(Stdio::piped());
            }
            PromptVia::Argv => {
                cmd.arg("agent")
                    .arg(prompt)
                    .args(["--print", "--output-format", "text", "--force", "--workspace"])
                    .arg(cwd);
                if let Some(model) = &self.model {
                    cmd.args(["--model", model]);
                }
                cmd.stdin(Stdio::null());
            }
        }

        let mut env = filtered_env(self.env_prefix, &self.env_passthrough);
        for (key, value) in &self.extra_env {
            env.insert(key.to_string(), value.to_string());
        }
        cmd.env_clear().envs(env);

        cmd.current_dir(cwd).stdout(Stdio::piped()).stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    async fn wait_with_activity(
        &self,
        child: &mut Child,
        cwd: &Path,
        out_count: &Arc<Mutex<usize>>,
        err_count: &Arc<Mutex<usize>>,
        status: Option<&StatusSender>,
    ) -> Result<std::process::ExitStatus, BackendError> {
        let mut deadline = Instant::now() + self.timeout;
        let mut last_out = 0usize;
        let mut last_err = 0usize;

        loop {
            match tokio::time::timeout(POLL_INTERVAL, child.wait()).await {
                Ok(result) => return Ok(result?),
                Err(_) => {
                    let out = *out_count.lock().expect("count lock");
                    let err = *err_count.lock().expect("count lock");

                    if out > last_out || err > last_err {
                        // Output arrived since the last check: push the deadline
                        deadline = Instant::now() + self.timeout;
                        last_out = out;
                        last_err = err;
                        continue;
                    }

                    if Instant::now() < deadline {
                        continue;
                    }

                    if has_recent_activity(cwd, FILE_ACTIVITY_WINDOW) {
                        info!("Backend quiet past timeout, but file activity detected. Extending wait by 60s...");
                        if let Some(tx) = status {
                            let _ = tx.send(StatusUpdate::task("Waiting (File Activity Detected)..."));
                        }
                        deadline = Instant::now() + FILE_ACTIVITY_WINDOW;
                        continue;
                    }

                    warn!(
                        "Backend timed out ({:?}) with no recent output or file activity.",
                        self.timeout
                    );
                    if let Some(pid) = child.id() {
                        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
                    }
                    let _ = child.wait().await;
                    return Err(BackendError::Timeout(self.timeout));
                }
            }
        }
    }
}

fn spawn_drain<R>(
    stream: R,
    counter: Arc<Mutex<usize>>,
    buffer: Arc<Mutex<String>>,
    status: Option<StatusSender>,
    kind: &'static str,
    is_stdout: bool,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            *counter.lock().expect("count lock") += 1;
            {
                let mut buf = buffer.lock().expect("buffer lock");
                buf.push_str(&line);
                buf.push('\n');
            }

            if is_stdout {
                if let Some(tx) = &status {
                    let _ = tx.send(StatusUpdate {
                        current_task: Some(format!("{} generating...", kind)),
                        output_line: Some(line),
                    });
                }
            } else if !line.trim().is_empty() {
                warn!("{} STDERR: {}", kind, line.trim());
            }
        }
    })
}

#[async_trait]
impl Backend for ProcessBackend {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn run(
        &self,
        prompt: &str,
        cwd: &Path,
        status: Option<&StatusSender>,
    ) -> Result<BackendResponse, BackendError> {
        debug!(kind = self.kind, "ProcessBackend::run: starting subprocess");

        let mut cmd = self.build_command(prompt, cwd);
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackendError::MissingBinary(self.binary.clone())
            } else {
                BackendError::Io(e)
            }
        })?;

        if self.prompt_via == PromptVia::Stdin {
            if let Some(mut stdin) = child.stdin.take() {
                debug!("ProcessBackend::run: feeding prompt via stdin");
                // A child that exits before reading the prompt surfaces its
                // failure through the exit status, not a broken pipe here
                let _ = stdin.write_all(prompt.as_bytes()).await;
                let _ = stdin.shutdown().await;
            }
        }

        let out_count = Arc::new(Mutex::new(0usize));
        let err_count = Arc::new(Mutex::new(0usize));
        let out_buf = Arc::new(Mutex::new(String::new()));
        let err_buf = Arc::new(Mutex::new(String::new()));

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let drain_out = spawn_drain(
            stdout,
            out_count.clone(),
            out_buf.clone(),
            status.cloned(),
            self.kind,
            true,
        );
        let drain_err = spawn_drain(
            stderr,
            err_count.clone(),
            err_buf.clone(),
            None,
            self.kind,
            false,
        );

        let exit = self
            .wait_with_activity(&mut child, cwd, &out_count, &err_count, status)
            .await;

        // The process has exited (or been killed): both drains reach EOF
        let _ = drain_out.await;
        let _ = drain_err.await;

        let exit = exit?;
        let stdout_text = out_buf.lock().expect("buffer lock").trim().to_string();
        let stderr_text = err_buf.lock().expect("buffer lock").trim().to_string();

        if !exit.success() {
            let code = exit.code();
            #[cfg(unix)]
            let signal = std::os::unix::process::ExitStatusExt::signal(&exit);
            #[cfg(not(unix))]
            let signal: Option<i32> = None;

            warn!(?code, ?signal, "ProcessBackend::run: non-zero exit");

            if code == Some(143) || signal == Some(15) {
                return Err(BackendError::Terminated {
                    health: system_health_snapshot(),
                });
            }
            return Err(BackendError::ExitFailure {
                code: code.unwrap_or(-1),
                stderr: stderr_text,
            });
        }

        Ok(BackendResponse::text(stdout_text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    fn backend(binary: &str, timeout: Duration) -> ProcessBackend {
        ProcessBackend {
            kind: "gemini",
            binary: binary.to_string(),
            model: None,
            prompt_via: PromptVia::Stdin,
            env_prefix: "GEMINI_",
            env_passthrough: vec![],
            extra_env: vec![],
            timeout,
        }
    }

    #[test]
    #[serial]
    fn test_filtered_env_allowlist() {
        unsafe {
            std::env::set_var("GEMINI_SANDBOX", "1");
            std::env::set_var("SUPER_SECRET_TOKEN", "shhh");
            std::env::set_var("EXTRA_OPTIN", "yes");
        }

        let env = filtered_env("GEMINI_", &["EXTRA_OPTIN".to_string()]);
        assert!(env.contains_key("PATH"));
        assert!(env.contains_key("GEMINI_SANDBOX"));
        assert!(env.contains_key("EXTRA_OPTIN"));
        assert!(!env.contains_key("SUPER_SECRET_TOKEN"));

        unsafe {
            std::env::remove_var("GEMINI_SANDBOX");
            std::env::remove_var("SUPER_SECRET_TOKEN");
            std::env::remove_var("EXTRA_OPTIN");
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_distinct() {
        let temp = tempdir().unwrap();
        let backend = backend("definitely-not-a-real-binary-xyz", Duration::from_secs(5));

        let result = backend.run("hello", temp.path(), None).await;
        assert!(matches!(result, Err(BackendError::MissingBinary(_))));
    }

    #[tokio::test]
    async fn test_cat_echoes_stdin_prompt() {
        let temp = tempdir().unwrap();
        // `cat` reads the prompt from stdin and echoes it; flags are ignored
        // by constructing the backend directly around a plain binary.
        let backend = ProcessBackend {
            kind: "gemini",
            binary: "cat".to_string(),
            model: None,
            prompt_via: PromptVia::Stdin,
            env_prefix: "",
            env_passthrough: vec![],
            extra_env: vec![],
            timeout: Duration::from_secs(10),
        };

        // cat has no --output-format flags; build_command adds them for the
        // stdin preset, so cat treats them as file names and fails. Use the
        // run path only to verify the error shape carries stderr.
        let result = backend.run("prompt-body", temp.path(), None).await;
        match result {
            Err(BackendError::ExitFailure { code, stderr }) => {
                assert_ne!(code, 0);
                assert!(!stderr.is_empty());
            }
            other => panic!("expected ExitFailure, got {:?}", other.map(|r| r.content)),
        }
    }

    #[tokio::test]
    async fn test_nonzero_exit_not_fatal() {
        let temp = tempdir().unwrap();
        let backend = ProcessBackend {
            kind: "cursor",
            binary: "false".to_string(),
            model: None,
            prompt_via: PromptVia::Argv,
            env_prefix: "",
            env_passthrough: vec![],
            extra_env: vec![],
            timeout: Duration::from_secs(10),
        };

        let result = backend.run("x", temp.path(), None).await;
        match result {
            Err(err @ BackendError::ExitFailure { .. }) => assert!(!err.is_fatal()),
            other => panic!("expected ExitFailure, got {:?}", other.map(|r| r.content)),
        }
    }
}

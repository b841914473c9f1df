//! Tool-block execution
//!
//! Runs parsed blocks in source order against a working directory. Block
//! failures are reported as tool output, never as loop errors.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::adapters::Telemetry;
use crate::control::{StatusSender, StatusUpdate};

use super::{ToolBlock, parse_blocks};

/// Maximum characters of block output echoed into the session log line
const DISPLAY_CAP: usize = 500;

/// Maximum lines of search output returned
const SEARCH_LINE_CAP: usize = 200;

/// Ordered execution record for one backend response
#[derive(Debug, Default)]
pub struct ExecutionLog {
    /// Full execution transcript (commands and outputs)
    pub log: String,

    /// Human-readable action descriptors, one per executed block
    pub actions: Vec<String>,
}

/// Executes tool blocks for a session
pub struct ToolExecutor {
    bash_timeout: Duration,
    telemetry: Telemetry,
}

impl ToolExecutor {
    pub fn new(bash_timeout: Duration, telemetry: Telemetry) -> Self {
        Self {
            bash_timeout,
            telemetry,
        }
    }

    /// Parse a backend response and execute its blocks under `cwd`.
    ///
    /// After each block, presence of `PROJECT_SIGNED_OFF` short-circuits the
    /// remaining blocks.
    pub async fn execute_response(
        &self,
        response: &str,
        cwd: &Path,
        status: Option<&StatusSender>,
    ) -> ExecutionLog {
        let blocks = parse_blocks(response);
        debug!(count = blocks.len(), "ToolExecutor::execute_response: parsed blocks");

        let mut result = ExecutionLog::default();

        for block in &blocks {
            let tool_type = block.tool_type();
            let started = Instant::now();
            self.telemetry
                .incr_counter("tool_execution_total", &[("tool_type", tool_type)]);

            match block {
                ToolBlock::Bash(command) => {
                    if let Some(tx) = status {
                        let preview: String = command.chars().take(50).collect();
                        let _ = tx.send(StatusUpdate::task(format!("Running Bash: {}...", preview)));
                    }
                    let output = self.execute_bash(command, cwd).await;
                    result.log.push_str(&format!("\n> {}\n{}\n", command, output));
                    result.actions.push(format!("Ran Bash: {}", command));
                }
                ToolBlock::Write { path, body } => {
                    if let Some(tx) = status {
                        let _ = tx.send(StatusUpdate::task(format!("Writing File: {}", path)));
                    }
                    let output = self.execute_write(path, body, cwd).await;
                    result.log.push_str(&format!("\n> Write {}\n{}\n", path, output));
                    result.actions.push(format!("Wrote File: {}", path));
                }
                ToolBlock::Read(path) => {
                    if let Some(tx) = status {
                        let _ = tx.send(StatusUpdate::task(format!("Reading File: {}", path)));
                    }
                    let output = self.execute_read(path, cwd).await;
                    result.log.push_str(&format!("\n> Read {}\n{}\n", path, output));
                    result.actions.push(format!("Read File: {}", path));
                }
                ToolBlock::Search(query) => {
                    if let Some(tx) = status {
                        let _ = tx.send(StatusUpdate::task(format!("Searching: {}", query)));
                    }
                    let output = self.execute_search(query, cwd).await;
                    result.log.push_str(&format!("\n> Search {}\n{}\n", query, output));
                    result.actions.push(format!("Searched: {}", query));
                }
            }

            self.telemetry.record_histogram(
                "tool_execution_duration_seconds",
                started.elapsed().as_secs_f64(),
                &[("tool_type", tool_type)],
            );

            if cwd.join("PROJECT_SIGNED_OFF").exists() {
                if let Some(tx) = status {
                    let _ = tx.send(StatusUpdate::task(
                        "Project Signed Off. Stopping execution of further blocks.",
                    ));
                }
                result
                    .log
                    .push_str("\n[System] Project Signed Off. Stopping execution.\n");
                break;
            }
        }

        result
    }

    /// Run a shell command in its own process group with a hard timeout.
    async fn execute_bash(&self, command: &str, cwd: &Path) -> String {
        info!("[Executing Bash] {}", command);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.telemetry.incr_counter(
                    "tool_errors_total",
                    &[("tool_type", "bash"), ("error_type", "spawn")],
                );
                warn!("[Error] {}", e);
                return e.to_string();
            }
        };
        let pid = child.id();

        let output = match tokio::time::timeout(self.bash_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                self.telemetry.incr_counter(
                    "tool_errors_total",
                    &[("tool_type", "bash"), ("error_type", "io")],
                );
                warn!("[Error] {}", e);
                return e.to_string();
            }
            Err(_) => {
                warn!("Bash command timed out after {:?}", self.bash_timeout);
                if let Some(pid) = pid {
                    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM);
                }
                self.telemetry.incr_counter(
                    "tool_errors_total",
                    &[("tool_type", "bash"), ("error_type", "timeout")],
                );
                return format!(
                    "Error: Command timed out after {} seconds. If you intended to run a \
                     background process, please use '&' at the end of the command.",
                    self.bash_timeout.as_secs()
                );
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            text.push_str(&format!("\nSTDERR:\n{}", stderr));
        }

        let display_text: String = text.chars().take(DISPLAY_CAP).collect();
        let ellipsis = if text.chars().count() > DISPLAY_CAP { "..." } else { "" };
        info!("[Output]\n{}{}", display_text, ellipsis);

        text
    }

    async fn execute_write(&self, path: &str, body: &str, cwd: &Path) -> String {
        if path.is_empty() {
            return "Error: No filename provided.".to_string();
        }
        info!("[Writing File] {}", path);

        let file_path = cwd.join(path);
        if let Some(parent) = file_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                self.telemetry.incr_counter(
                    "tool_errors_total",
                    &[("tool_type", "write"), ("error_type", "io")],
                );
                warn!("[Error] {}", e);
                return e.to_string();
            }
        }

        match tokio::fs::write(&file_path, body).await {
            Ok(()) => {
                self.telemetry.incr_counter("files_written_total", &[]);
                format!("Successfully wrote to {}", path)
            }
            Err(e) => {
                self.telemetry.incr_counter(
                    "tool_errors_total",
                    &[("tool_type", "write"), ("error_type", "io")],
                );
                warn!("[Error] {}", e);
                e.to_string()
            }
        }
    }

    async fn execute_read(&self, path: &str, cwd: &Path) -> String {
        if path.is_empty() {
            return "Error: No filename provided.".to_string();
        }
        info!("[Reading File] {}", path);

        let file_path = cwd.join(path);
        if !file_path.exists() {
            return format!("Error: File {} does not exist.", path);
        }

        match tokio::fs::read_to_string(&file_path).await {
            Ok(content) => {
                self.telemetry.incr_counter("files_read_total", &[]);
                let numbered: Vec<String> = content
                    .lines()
                    .enumerate()
                    .map(|(i, line)| format!("{:4} | {}", i + 1, line))
                    .collect();
                format!("File: {}\n{}", path, numbered.join("\n"))
            }
            Err(e) => {
                self.telemetry.incr_counter(
                    "tool_errors_total",
                    &[("tool_type", "read"), ("error_type", "io")],
                );
                warn!("[Error] {}", e);
                e.to_string()
            }
        }
    }

    /// Recursive pattern search with two lines of context, capped output.
    async fn execute_search(&self, query: &str, cwd: &Path) -> String {
        if query.is_empty() {
            return "Error: No search query provided.".to_string();
        }
        info!("[Searching] {}", query);

        let output = Command::new("grep")
            .args(["-rn", "-C", "2", query, "."])
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                self.telemetry.incr_counter(
                    "tool_errors_total",
                    &[("tool_type", "search"), ("error_type", "spawn")],
                );
                warn!("[Error] {}", e);
                return e.to_string();
            }
        };

        let text = String::from_utf8_lossy(&output.stdout);
        if text.is_empty() {
            return format!("No matches found for '{}'", query);
        }

        let lines: Vec<&str> = text.lines().collect();
        if lines.len() > SEARCH_LINE_CAP {
            format!(
                "{}\n... ({} more lines truncated)",
                lines[..SEARCH_LINE_CAP].join("\n"),
                lines.len() - SEARCH_LINE_CAP
            )
        } else {
            text.to_string()
        }
    }
}

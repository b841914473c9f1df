//! Agent loop engine
//!
//! Drives one session through iterations until a terminal signal, a fatal
//! error, or the iteration cap. One iteration fully completes before the
//! next begins; control commands are observed at every suspension point.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::adapters::{EventKind, Notifier, Telemetry};
use crate::backend::Backend;
use crate::config::Config;
use crate::control::{ControlClient, StateUpdate, StatusSender};
use crate::prompts::{PromptContext, PromptLoader};
use crate::tools::ToolExecutor;
use crate::util;
use crate::workflow::CompletionWorkflow;

use super::roles::select_role;
use super::signals::{self, SignalSet};
use super::state::IterationState;
use super::{Role, SelectorFlags};

/// Control commands are observed at least this often while suspended
const CONTROL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Delay between iterations once one has fully completed
const INTER_ITERATION_DELAY: Duration = Duration::from_secs(1);

/// Extra iterations allowed past the cap while cleanup is pending
const CLEANUP_GRACE_ITERATIONS: u64 = 5;

/// Streaming log lines published per turn
const STATUS_LOG_WINDOW: usize = 30;

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Terminal signal observed (sign-off + cleanup report)
    Completed,
    /// Iteration cap reached
    IterationCapReached,
    /// Stop command honoured
    Stopped,
    /// `human_in_loop.txt` appeared; contents are the reason
    HumanInLoop(String),
    /// Unrecoverable: consecutive errors or a fatal backend failure
    Fatal(String),
}

/// The iteration-driven agent loop
pub struct AgentLoop {
    config: Config,
    backend: Arc<dyn Backend>,
    manager_backend: Option<Arc<dyn Backend>>,
    control: Option<Arc<ControlClient>>,
    workflow: Option<Arc<CompletionWorkflow>>,
    notifier: Notifier,
    telemetry: Telemetry,
    prompts: PromptLoader,
    executor: ToolExecutor,
    state: IterationState,
    error_backoff: Duration,
}

impl AgentLoop {
    pub fn new(config: Config, backend: Arc<dyn Backend>, telemetry: Telemetry) -> Self {
        let (mut state, resumed) = IterationState::load(&config.state_file_path());
        if !resumed {
            state.is_first_run = !config.feature_list_path().exists();
        }

        let notifier = Notifier::new(&config);
        let prompts = PromptLoader::new(&config.project_dir);
        let executor = ToolExecutor::new(
            Duration::from_secs(config.limits.bash_timeout_secs),
            telemetry.clone(),
        );

        Self {
            config,
            backend,
            manager_backend: None,
            control: None,
            workflow: None,
            notifier,
            telemetry,
            prompts,
            executor,
            state,
            error_backoff: Duration::from_secs(10),
        }
    }

    /// Attach the control/heartbeat client
    pub fn with_control(mut self, control: Arc<ControlClient>) -> Self {
        self.control = Some(control);
        self
    }

    /// Use a dedicated backend for manager iterations
    pub fn with_manager_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.manager_backend = Some(backend);
        self
    }

    /// Attach the one-shot completion workflow (ticket-bound sessions)
    pub fn with_workflow(mut self, workflow: Arc<CompletionWorkflow>) -> Self {
        self.workflow = Some(workflow);
        self
    }

    pub fn state(&self) -> &IterationState {
        &self.state
    }

    fn report(&self, update: StateUpdate) {
        if let Some(control) = &self.control {
            control.report_state(update);
        }
    }

    /// Run the loop to an outcome.
    pub async fn run(&mut self) -> LoopOutcome {
        let project_dir = self.config.project_dir.clone();
        let _ = std::fs::create_dir_all(&project_dir);

        self.notifier.notify(
            EventKind::AgentStart,
            &format!(
                "{} agent started for project {}",
                self.backend.kind(),
                project_name(&self.config)
            ),
        );

        if self.state.is_first_run {
            info!("Fresh start - copying spec to project");
            self.copy_spec_to_project();
            signals::clear_stale_signals(&project_dir);
        } else {
            info!("Continuing existing project");
        }

        self.report(StateUpdate {
            current_task: Some("Initializing".to_string()),
            is_running: Some(true),
            start_time: Some(util::unix_timestamp() as f64),
            ..Default::default()
        });

        let outcome = self.main_loop().await;

        info!("\n{}", "=".repeat(50));
        info!("  SESSION COMPLETE");
        info!("{}", "=".repeat(50));

        self.notifier.notify(
            EventKind::AgentStop,
            &format!(
                "{} agent stopped for project {}",
                self.backend.kind(),
                project_name(&self.config)
            ),
        );

        match &outcome {
            LoopOutcome::Completed | LoopOutcome::IterationCapReached => {
                self.report(StateUpdate::stopped("Completed"));
            }
            LoopOutcome::Stopped => {
                self.report(StateUpdate::stopped("Stopped"));
            }
            LoopOutcome::HumanInLoop(reason) => {
                self.report(StateUpdate::stopped(format!("Stopped: Human in Loop ({})", reason)));
            }
            LoopOutcome::Fatal(reason) => {
                self.report(StateUpdate::stopped(format!("Stopped: {}", reason)));
            }
        }

        outcome
    }

    async fn main_loop(&mut self) -> LoopOutcome {
        loop {
            let iter_start = Instant::now();

            // Iteration cap, softly extended while cleanup is pending
            if let Some(max) = self.config.limits.max_iterations {
                if self.state.iteration >= max {
                    let signals = SignalSet::scan(&self.config.project_dir);
                    let cleanup_pending = signals.signed_off && !signals.cleanup_report;
                    if cleanup_pending && self.state.iteration < max + CLEANUP_GRACE_ITERATIONS {
                        info!(
                            "Max iterations reached, but cleanup is pending. Allowing extra turn {}...",
                            self.state.iteration + 1
                        );
                    } else {
                        info!("Max iterations reached. Stopping.");
                        return LoopOutcome::IterationCapReached;
                    }
                }
            }

            if self.check_control().await {
                return LoopOutcome::Stopped;
            }

            if let Some(control) = &self.control {
                if control.local_control().skip_requested {
                    control.clear_skip();
                    info!("Skipping iteration as requested.");
                    continue;
                }
            }

            self.state.iteration += 1;
            self.report(StateUpdate {
                iteration: Some(self.state.iteration),
                current_task: Some("Preparing Prompt".to_string()),
                ..Default::default()
            });
            self.telemetry
                .record_gauge("agent_iteration", self.state.iteration as f64, &[]);
            self.telemetry.incr_counter("agent_iterations_total", &[]);

            if let Some(outcome) = self.check_completion_signals().await {
                return outcome;
            }

            if let Err(reason) = self.execute_iteration(iter_start).await {
                return LoopOutcome::Fatal(reason);
            }

            if self.state.consecutive_errors >= self.config.limits.max_consecutive_errors {
                error!(
                    "Too many consecutive errors ({}). Stopping execution.",
                    self.config.limits.max_consecutive_errors
                );
                return LoopOutcome::Fatal(format!(
                    "{} consecutive errors",
                    self.state.consecutive_errors
                ));
            }

            let under_cap = self
                .config
                .limits
                .max_iterations
                .map(|max| self.state.iteration < max)
                .unwrap_or(true);
            if under_cap {
                debug!("Preparing next session...");
                tokio::time::sleep(INTER_ITERATION_DELAY).await;
            }
        }
    }

    /// Poll control commands; honour pause in place. Returns true on stop.
    async fn check_control(&self) -> bool {
        let Some(control) = &self.control else {
            return false;
        };

        let mut ctl = control.poll_commands().await;
        if ctl.stop_requested {
            info!("Stop requested by user.");
            return true;
        }

        if ctl.pause_requested {
            control.report_state(StateUpdate {
                current_task: Some("Paused".to_string()),
                is_paused: Some(true),
                ..Default::default()
            });
            info!("Agent Paused. Waiting for resume...");

            while ctl.pause_requested {
                tokio::time::sleep(CONTROL_POLL_INTERVAL).await;
                ctl = control.poll_commands().await;
                if ctl.stop_requested {
                    return true;
                }
            }

            control.report_state(StateUpdate {
                current_task: Some("Resuming...".to_string()),
                is_paused: Some(false),
                ..Default::default()
            });
            info!("Agent Resumed.");
        }

        false
    }

    /// Sign-off and human-in-loop are the voluntary terminals.
    async fn check_completion_signals(&mut self) -> Option<LoopOutcome> {
        let project_dir = &self.config.project_dir;

        if project_dir.join(signals::PROJECT_SIGNED_OFF).exists() {
            info!("\n{}", "=".repeat(50));
            info!("  PROJECT SIGNED OFF");
            info!("{}", "=".repeat(50));
            self.notifier.notify(
                EventKind::ProjectCompletion,
                &format!(
                    "Project {} has been signed off and completed.",
                    project_name(&self.config)
                ),
            );

            if let Some(workflow) = &self.workflow {
                workflow.run_if_needed().await;
            }

            if project_dir.join(signals::CLEANUP_REPORT).exists() {
                return Some(LoopOutcome::Completed);
            }
            info!("Project signed off. Continuing for final cleanup...");
            return None;
        }

        let human_loop = project_dir.join(signals::HUMAN_IN_LOOP);
        if human_loop.exists() {
            let reason = std::fs::read_to_string(&human_loop)
                .ok()
                .and_then(|content| content.lines().next().map(|l| l.trim().to_string()))
                .unwrap_or_default();

            info!("\n{}", "=".repeat(50));
            info!("  HUMAN IN LOOP REQUESTED");
            info!("{}", "=".repeat(50));
            info!("Reason: {}", reason);

            self.notifier.notify(
                EventKind::HumanInLoop,
                &format!("Human intervention requested: {}", reason),
            );
            return Some(LoopOutcome::HumanInLoop(reason));
        }

        None
    }

    /// One iteration: select role, render, run backend, execute blocks,
    /// epilogue. Returns a fatal reason only for unrecoverable errors.
    async fn execute_iteration(&mut self, iter_start: Instant) -> Result<(), String> {
        self.print_session_header();

        let project_dir = self.config.project_dir.clone();
        let signals = SignalSet::scan(&project_dir);
        let flags = SelectorFlags {
            first_run: self.state.is_first_run,
            manager_first: self.config.manager.run_first,
            manager_first_consumed: self.state.has_run_manager_first,
            ticket_bound: self.config.ticket_bound(),
            manager_frequency: self.config.manager.frequency,
        };

        let selection = select_role(self.state.iteration, &flags, &signals);
        if selection.consume_trigger {
            info!("Manager triggered by TRIGGER_MANAGER file.");
            signals::consume_trigger_manager(&project_dir);
        }
        if selection.consume_manager_first {
            info!("Manager triggered by manager-first flag.");
            self.state.has_run_manager_first = true;
        }

        let role = selection.role;
        info!("Selected role: {}", role.name());

        let prompt = match self.build_prompt(role).await {
            Ok(prompt) => prompt,
            Err(e) => return Err(format!("Prompt rendering failed: {}", e)),
        };

        self.report(StateUpdate::task(format!(
            "Executing {}",
            if role.is_manager() { "Manager" } else { "Agent" }
        )));

        let backend = match (&self.manager_backend, role.is_manager()) {
            (Some(manager), true) => {
                info!("Switched to manager model backend");
                manager.clone()
            }
            _ => self.backend.clone(),
        };

        let (status_tx, forwarder) = self.spawn_status_forwarder();
        let result = backend.run(&prompt, &project_dir, status_tx.as_ref()).await;

        match result {
            Ok(response) => {
                let exec = self
                    .executor
                    .execute_response(&response.content, &project_dir, status_tx.as_ref())
                    .await;

                drop(status_tx);
                if let Some(handle) = forwarder {
                    let _ = handle.await;
                }

                if !exec.actions.is_empty() {
                    self.state.record_actions(&exec.actions);
                    self.report(StateUpdate {
                        last_log: Some(self.state.recent_history.clone()),
                        ..Default::default()
                    });
                }

                self.state.consecutive_errors = 0;
                self.state.is_first_run = false;

                if role.is_manager() {
                    let preview: String = response.content.chars().take(500).collect();
                    self.notifier.notify(
                        EventKind::Manager,
                        &format!("Manager Update (Iteration {}):\n{}...", self.state.iteration, preview),
                    );
                } else {
                    self.notifier.notify(
                        EventKind::Iteration,
                        &format!(
                            "Iteration {} complete.\nActions: {}",
                            self.state.iteration,
                            exec.actions.len()
                        ),
                    );
                }

                self.report(StateUpdate::task("Waiting (Auto-Continue)"));
                self.state.save(&self.config.state_file_path());
                self.telemetry.record_gauge(
                    "iteration_duration_seconds",
                    iter_start.elapsed().as_secs_f64(),
                    &[],
                );

                let delay = Duration::from_secs(self.config.limits.auto_continue_delay_secs);
                info!("Agent will auto-continue in {:?}...", delay);
                self.interruptible_sleep(delay).await;
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                drop(status_tx);
                if let Some(handle) = forwarder {
                    let _ = handle.await;
                }
                error!("Fatal backend error: {}", e);
                Err(e.to_string())
            }
            Err(e) => {
                drop(status_tx);
                if let Some(handle) = forwarder {
                    let _ = handle.await;
                }

                self.state.consecutive_errors += 1;
                error!(
                    "Session encountered an error (Attempt {}/{}): {}",
                    self.state.consecutive_errors, self.config.limits.max_consecutive_errors, e
                );
                self.notifier
                    .notify(EventKind::Error, &format!("Agent encountered error: {}", e));

                // Make the failure visible to subsequent prompts
                self.state.record_actions(&[format!("Backend error: {}", e)]);
                self.state.save(&self.config.state_file_path());

                info!("Retrying in {:?}...", self.error_backoff);
                self.interruptible_sleep(self.error_backoff).await;
                Ok(())
            }
        }
    }

    async fn build_prompt(&self, role: Role) -> eyre::Result<String> {
        let project_dir = &self.config.project_dir;
        let mut context = PromptContext::new(project_dir.display().to_string());
        context.file_tree = util::file_tree(project_dir).await;
        context.recent_actions = if self.state.recent_history.is_empty() {
            "(none)".to_string()
        } else {
            self.state.recent_history.join("\n")
        };

        if self.config.ticket_bound() {
            context.jira_ticket_context = match &self.config.jira_spec_content {
                Some(content) if !content.is_empty() => content.clone(),
                _ => format!("Ticket: {}", self.config.jira_ticket_key.as_deref().unwrap_or("")),
            };
            context.unique_branch_suffix = self
                .config
                .agent_id
                .as_deref()
                .map(|id| {
                    let chars: Vec<char> = id.chars().collect();
                    chars[chars.len().saturating_sub(8)..].iter().collect()
                })
                .unwrap_or_else(|| "default".to_string());
        }

        self.prompts.render(role.template_name(), &context)
    }

    fn spawn_status_forwarder(&self) -> (Option<StatusSender>, Option<tokio::task::JoinHandle<()>>) {
        match self.control.clone() {
            Some(control) => {
                let (tx, handle) = crate::control::spawn_status_forwarder(control, STATUS_LOG_WINDOW);
                (Some(tx), Some(handle))
            }
            None => (None, None),
        }
    }

    /// Sleep in short steps, polling for a stop command each step.
    async fn interruptible_sleep(&self, duration: Duration) {
        let steps = (duration.as_millis() / CONTROL_POLL_INTERVAL.as_millis()) as u64;
        for _ in 0..steps {
            tokio::time::sleep(CONTROL_POLL_INTERVAL).await;
            if let Some(control) = &self.control {
                if control.poll_commands().await.stop_requested {
                    break;
                }
            }
        }
    }

    fn copy_spec_to_project(&self) {
        let dest = self.config.project_dir.join("app_spec.txt");
        if dest.exists() {
            return;
        }
        if let Some(spec) = &self.config.spec_file {
            if spec.exists() {
                if let Err(e) = std::fs::copy(spec, &dest) {
                    warn!("Failed to copy spec into project: {}", e);
                } else {
                    info!("Copied app_spec.txt to project directory");
                }
            } else {
                warn!("Spec file not found at {}", spec.display());
            }
        }
    }

    fn print_session_header(&self) {
        let label = if self.state.is_first_run { "(INITIALIZATION)" } else { "(CODING)" };
        info!("\n{}", "=".repeat(50));
        info!("  SESSION {} {}", self.state.iteration, label);
        info!("{}", "=".repeat(50));
    }
}

fn project_name(config: &Config) -> String {
    config
        .project_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| config.project_dir.display().to_string())
}

//! Sprint worker
//!
//! One worker drives one task in its own worktree through a bounded
//! mini-loop. Completion is signalled by sentinel strings in the response;
//! detectors catch spinning workers before the turn cap does.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::adapters::Telemetry;
use crate::backend::Backend;
use crate::config::Config;
use crate::control::{ControlClient, StateUpdate};
use crate::prompts::{PromptContext, PromptLoader};
use crate::tools::ToolExecutor;
use crate::worktree::WorktreeManager;

use super::detectors::LoopDetectors;
use super::plan::Task;

/// Response sentinel: the task is done
pub const SPRINT_TASK_COMPLETE: &str = "SPRINT_TASK_COMPLETE";

/// Response sentinel: the task cannot be completed
pub const SPRINT_TASK_FAILED: &str = "SPRINT_TASK_FAILED";

/// Worker history keeps the last few actions for prompt context
const WORKER_HISTORY_LIMIT: usize = 5;

const CONTROL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a worker's task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    Completed,
    Failed,
    TimedOut,
}

impl WorkerOutcome {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Completed => "success",
            Self::Failed => "failed",
            Self::TimedOut => "timeout",
        }
    }
}

/// Shared context handed to each worker
pub struct WorkerContext {
    pub config: Arc<Config>,
    pub backend: Arc<dyn Backend>,
    pub worktree: Arc<WorktreeManager>,
    /// Merges serialize on the parent repository
    pub merge_lock: Arc<Mutex<()>>,
    pub parent_agent_id: String,
    pub dashboard_url: Option<String>,
    pub telemetry: Telemetry,
}

/// Run one task to an outcome. The worktree is cleaned up on success and
/// preserved (with a WIP rescue commit) on failure.
pub async fn run_worker(ctx: Arc<WorkerContext>, task: Task) -> WorkerOutcome {
    info!("SPAWNING WORKER for Task {}: {}", task.id, task.title);
    let started = std::time::Instant::now();

    let workdir = match ctx.worktree.create(&task.id).await {
        Ok(path) => path,
        Err(e) => {
            error!("Worker {} could not acquire a worktree: {}", task.id, e);
            return WorkerOutcome::Failed;
        }
    };

    // Dedicated control identity derived from the parent session id
    let control = ctx
        .dashboard_url
        .as_deref()
        .map(|url| ControlClient::new(format!("{}-{}", ctx.parent_agent_id, task.id), url));

    if let Some(client) = &control {
        client.report_state(StateUpdate {
            is_running: Some(true),
            iteration: Some(0),
            current_task: Some(format!("Starting Task: {}", task.title)),
            ..Default::default()
        });
    }

    let outcome = run_turns(&ctx, &task, &workdir, control.as_ref()).await;

    let duration = started.elapsed().as_secs_f64();
    match outcome {
        WorkerOutcome::Completed => {
            ctx.telemetry.incr_counter("sprint_tasks_completed", &[]);
            ctx.worktree.cleanup(&task.id, true).await;
        }
        WorkerOutcome::Failed | WorkerOutcome::TimedOut => {
            ctx.telemetry.incr_counter("sprint_tasks_failed", &[]);
            // Save whatever progress exists and keep the worktree for humans
            let _ = ctx.worktree.rescue(&task.id).await;
        }
    }
    ctx.telemetry.record_histogram(
        "sprint_task_duration_seconds",
        duration,
        &[("status", outcome.metric_label())],
    );

    if let Some(client) = &control {
        let label = match outcome {
            WorkerOutcome::Completed => "Completed",
            WorkerOutcome::Failed => "Failed",
            WorkerOutcome::TimedOut => "Timed Out",
        };
        client.report_state(StateUpdate::stopped(label));
    }

    outcome
}

async fn run_turns(
    ctx: &WorkerContext,
    task: &Task,
    workdir: &std::path::Path,
    control: Option<&Arc<ControlClient>>,
) -> WorkerOutcome {
    let prompts = PromptLoader::embedded_only();
    let executor = ToolExecutor::new(
        Duration::from_secs(ctx.config.limits.bash_timeout_secs),
        ctx.telemetry.clone(),
    );
    let mut detectors = LoopDetectors::new();
    let mut history: Vec<String> = Vec::new();

    let max_turns = ctx.config.sprint.max_turns;
    for turn in 1..=max_turns {
        if let Some(client) = control {
            client.report_state(StateUpdate {
                iteration: Some(turn as u64),
                current_task: Some(format!("Executing: {}", task.title)),
                ..Default::default()
            });

            // Honour pause between turns
            let mut ctl = client.poll_commands().await;
            if ctl.pause_requested {
                client.report_state(StateUpdate {
                    is_paused: Some(true),
                    current_task: Some("Paused".to_string()),
                    ..Default::default()
                });
                while ctl.pause_requested {
                    tokio::time::sleep(CONTROL_POLL_INTERVAL).await;
                    ctl = client.poll_commands().await;
                    if ctl.stop_requested {
                        return WorkerOutcome::Failed;
                    }
                }
                client.report_state(StateUpdate {
                    is_paused: Some(false),
                    ..Default::default()
                });
            }
            if ctl.stop_requested {
                return WorkerOutcome::Failed;
            }
        }

        let mut context = PromptContext::new(workdir.display().to_string());
        context.task_id = task.id.clone();
        context.task_title = task.title.clone();
        context.task_description = task.description.clone();
        context.recent_actions = history.join("\n");

        let prompt = match prompts.render("sprint_worker_prompt", &context) {
            Ok(prompt) => prompt,
            Err(e) => {
                error!("Worker {} failed to render prompt: {}", task.id, e);
                return WorkerOutcome::Failed;
            }
        };

        let status = control.map(|client| crate::control::spawn_status_forwarder(client.clone(), 10));
        let (status_tx, status_handle) = match status {
            Some((tx, handle)) => (Some(tx), Some(handle)),
            None => (None, None),
        };

        let response = ctx.backend.run(&prompt, workdir, status_tx.as_ref()).await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                drop(status_tx);
                if let Some(handle) = status_handle {
                    let _ = handle.await;
                }
                if e.is_fatal() {
                    error!("Worker {} hit a fatal backend error: {}", task.id, e);
                    return WorkerOutcome::Failed;
                }
                warn!("Worker {} turn {} errored underneath: {}", task.id, turn, e);
                continue;
            }
        };

        let exec = executor
            .execute_response(&response.content, workdir, status_tx.as_ref())
            .await;

        drop(status_tx);
        if let Some(handle) = status_handle {
            let _ = handle.await;
        }

        if let Some(client) = control {
            if !exec.actions.is_empty() {
                client.report_state(StateUpdate {
                    last_log: Some(exec.actions.clone()),
                    ..Default::default()
                });
            }
        }

        if response.content.contains(SPRINT_TASK_COMPLETE) {
            info!("Task {} Completed.", task.id);
            // Merge-back serializes on the parent repo; a conflict downgrades
            // the task to failed with the worktree preserved.
            let _guard = ctx.merge_lock.lock().await;
            match ctx.worktree.merge(&task.id).await {
                Ok(()) => return WorkerOutcome::Completed,
                Err(e) => {
                    error!("Task {} merge failed: {}", task.id, e);
                    return WorkerOutcome::Failed;
                }
            }
        }

        if response.content.contains(SPRINT_TASK_FAILED) {
            error!("Task {} Failed.", task.id);
            return WorkerOutcome::Failed;
        }

        if let Some(trip) = detectors.observe(&exec.actions, &response.content) {
            error!("Task {} tripped a detector: {}", task.id, trip);
            return WorkerOutcome::Failed;
        }

        history.extend(exec.actions);
        if history.len() > WORKER_HISTORY_LIMIT {
            let overflow = history.len() - WORKER_HISTORY_LIMIT;
            history.drain(..overflow);
        }
        debug!(task_id = %task.id, turn, "run_turns: turn complete");
    }

    warn!("Task {} timed out (max turns).", task.id);
    WorkerOutcome::TimedOut
}

//! Sprint scheduler
//!
//! Plans a task DAG with one backend invocation, then drives it to
//! completion with bounded parallelism. Workers signal through completion of
//! their task; all status bookkeeping happens here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::adapters::{EventKind, Notifier, Telemetry};
use crate::backend::Backend;
use crate::config::Config;
use crate::control::{ControlClient, StateUpdate};
use crate::features::FeatureList;
use crate::r#loop::FEATURE_LIST;
use crate::prompts::{PromptContext, PromptLoader};
use crate::tools::ToolExecutor;
use crate::worktree::WorktreeManager;

use super::plan::{SprintPlan, TaskStatus, salvage_plan_json};
use super::worker::{WorkerContext, WorkerOutcome, run_worker};

/// Dispatch tick interval
const TICK: Duration = Duration::from_secs(1);

/// Pause between sprint cycles in continuous mode
const CYCLE_DELAY: Duration = Duration::from_secs(2);

/// Result of one executed sprint
#[derive(Debug, Default)]
pub struct SprintReport {
    pub planned: usize,
    pub completed: HashSet<String>,
    pub failed: HashSet<String>,
    pub deadlocked: bool,
}

/// Dependency-aware parallel task executor
pub struct SprintScheduler {
    config: Arc<Config>,
    backend: Arc<dyn Backend>,
    control: Option<Arc<ControlClient>>,
    telemetry: Telemetry,
    notifier: Notifier,
}

impl SprintScheduler {
    pub fn new(config: Arc<Config>, backend: Arc<dyn Backend>, telemetry: Telemetry) -> Self {
        let notifier = Notifier::new(&config);
        Self {
            config,
            backend,
            control: None,
            telemetry,
            notifier,
        }
    }

    pub fn with_control(mut self, control: Arc<ControlClient>) -> Self {
        self.control = Some(control);
        self
    }

    fn report(&self, update: StateUpdate) {
        if let Some(control) = &self.control {
            control.report_state(update);
        }
    }

    /// Planning phase: one planner invocation must leave `sprint_plan.json`
    /// behind; a fenced JSON block in the reply is salvaged as a fallback.
    /// Returns None when no usable plan was produced.
    pub async fn plan(&self) -> Result<Option<SprintPlan>> {
        info!("Starting Sprint Planning Phase...");
        let started = std::time::Instant::now();
        let project_dir = &self.config.project_dir;

        self.report(StateUpdate::task("Sprint Planning"));
        self.notifier.notify(
            EventKind::SprintStart,
            &format!("Sprint planning started for project {}", project_dir.display()),
        );

        let mut context = PromptContext::new(project_dir.display().to_string());
        context.user_goal = std::fs::read_to_string(project_dir.join("app_spec.txt"))
            .unwrap_or_else(|_| "See app_spec.txt or README.md".to_string());
        context.feature_list_content = std::fs::read_to_string(project_dir.join(FEATURE_LIST))
            .unwrap_or_else(|_| "No feature_list.json found.".to_string());

        let prompts = PromptLoader::new(project_dir);
        let prompt = prompts.render("sprint_planner_prompt", &context)?;

        let planning_result = |status: &'static str, telemetry: &Telemetry, secs: f64| {
            telemetry.record_gauge("sprint_planning_duration_seconds", secs, &[("status", status)]);
        };

        let response = match self.backend.run(&prompt, project_dir, None).await {
            Ok(response) => response,
            Err(e) => {
                error!("Planner invocation failed: {}", e);
                planning_result("fail", &self.telemetry, started.elapsed().as_secs_f64());
                return Ok(None);
            }
        };

        // Let the planner's write block land the file itself
        let executor = ToolExecutor::new(
            Duration::from_secs(self.config.limits.bash_timeout_secs),
            self.telemetry.clone(),
        );
        executor
            .execute_response(&response.content, project_dir, None)
            .await;

        let plan_path = self.config.sprint_plan_path();
        if !plan_path.exists() {
            warn!("sprint_plan.json file not found. Attempting to parse from response text...");
            match salvage_plan_json(&response.content) {
                Some(json) => {
                    std::fs::write(&plan_path, json)?;
                    info!("Successfully recovered sprint plan from response text.");
                }
                None => {
                    error!("Sprint plan not created and no JSON block found. Aborting.");
                    debug!("Full response:\n{}", response.content);
                    planning_result("fail", &self.telemetry, started.elapsed().as_secs_f64());
                    return Ok(None);
                }
            }
        }

        match SprintPlan::load(&plan_path) {
            Ok(plan) => {
                info!("Sprint Plan Created: {} tasks.", plan.tasks.len());
                planning_result("success", &self.telemetry, started.elapsed().as_secs_f64());
                self.telemetry
                    .record_gauge("sprint_tasks_total", plan.tasks.len() as f64, &[]);
                Ok(Some(plan))
            }
            Err(e) => {
                error!("Failed to parse sprint plan: {}", e);
                planning_result("fail", &self.telemetry, started.elapsed().as_secs_f64());
                Ok(None)
            }
        }
    }

    /// Dispatch loop: launch runnable tasks up to the worker cap, collect
    /// outcomes, end on completion or deadlock.
    pub async fn execute(&self, plan: &mut SprintPlan) -> SprintReport {
        let total = plan.tasks.len();
        let mut statuses: HashMap<String, TaskStatus> = plan
            .tasks
            .iter()
            .map(|t| (t.id.clone(), TaskStatus::Pending))
            .collect();
        let mut completed: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut running: HashSet<String> = HashSet::new();
        let mut deadlocked = false;

        let worktree = Arc::new(WorktreeManager::new(&self.config.project_dir).await);
        let ctx = Arc::new(WorkerContext {
            config: self.config.clone(),
            backend: self.backend.clone(),
            worktree,
            merge_lock: Arc::new(Mutex::new(())),
            parent_agent_id: self
                .config
                .agent_id
                .clone()
                .unwrap_or_else(|| "sprint".to_string()),
            dashboard_url: self.control.as_ref().map(|c| c.dashboard_url.clone()),
            telemetry: self.telemetry.clone(),
        });

        let mut join_set: JoinSet<(String, WorkerOutcome)> = JoinSet::new();
        let mut tick = 0u64;

        while completed.len() + failed.len() < total {
            tick += 1;
            self.report(StateUpdate {
                iteration: Some(tick),
                ..Default::default()
            });

            // Runnable: pending with every dependency completed
            let runnable: Vec<String> = plan
                .tasks
                .iter()
                .filter(|task| {
                    statuses.get(&task.id) == Some(&TaskStatus::Pending)
                        && task.dependencies.iter().all(|dep| completed.contains(dep))
                })
                .map(|task| task.id.clone())
                .collect();

            let free_slots = self.config.sprint.max_agents.saturating_sub(running.len());
            for task_id in runnable.iter().take(free_slots) {
                let task = plan
                    .tasks
                    .iter()
                    .find(|t| &t.id == task_id)
                    .expect("runnable id from plan")
                    .clone();

                info!("Launching worker for task {} ({})", task.id, task.title);
                self.report(StateUpdate::task(format!("Spawning Worker: {}", task.title)));

                statuses.insert(task.id.clone(), TaskStatus::InProgress);
                running.insert(task.id.clone());
                self.telemetry
                    .record_gauge("sprint_active_workers", running.len() as f64, &[]);

                let ctx = ctx.clone();
                join_set.spawn(async move {
                    let task_id = task.id.clone();
                    let outcome = run_worker(ctx, task).await;
                    (task_id, outcome)
                });
            }

            if running.is_empty() && runnable.is_empty() {
                error!("Deadlock detected: no running tasks and no runnable tasks remain.");
                deadlocked = true;
                break;
            }

            tokio::select! {
                Some(result) = join_set.join_next(), if !join_set.is_empty() => {
                    match result {
                        Ok((task_id, outcome)) => {
                            running.remove(&task_id);
                            self.telemetry
                                .record_gauge("sprint_active_workers", running.len() as f64, &[]);

                            match outcome {
                                WorkerOutcome::Completed => {
                                    statuses.insert(task_id.clone(), TaskStatus::Completed);
                                    completed.insert(task_id.clone());
                                    let title = plan
                                        .tasks
                                        .iter()
                                        .find(|t| t.id == task_id)
                                        .map(|t| t.title.clone())
                                        .unwrap_or_default();
                                    self.notifier.notify(
                                        EventKind::SprintTaskComplete,
                                        &format!("Task Completed: {}", title),
                                    );
                                }
                                WorkerOutcome::Failed | WorkerOutcome::TimedOut => {
                                    statuses.insert(task_id.clone(), TaskStatus::Failed);
                                    failed.insert(task_id);
                                }
                            }
                        }
                        Err(e) => warn!("Worker task join error: {}", e),
                    }
                }
                _ = tokio::time::sleep(TICK) => {}
            }
        }

        // Abandon any stragglers if we broke out on deadlock
        join_set.abort_all();

        for task in &mut plan.tasks {
            if let Some(status) = statuses.get(&task.id) {
                task.status = *status;
            }
        }

        SprintReport {
            planned: total,
            completed,
            failed,
            deadlocked,
        }
    }

    /// Mark features whose entire planned-task subset completed.
    pub fn update_feature_list(&self, plan: &SprintPlan) {
        let path = self.config.feature_list_path();
        let Ok(Some(mut features)) = FeatureList::load(&path) else {
            return;
        };

        let planned_features: HashSet<&String> =
            plan.tasks.iter().filter_map(|t| t.feature_name.as_ref()).collect();
        if planned_features.is_empty() {
            return;
        }

        let mut updated = false;
        for feature_name in planned_features {
            let all_done = plan
                .tasks
                .iter()
                .filter(|t| t.feature_name.as_ref() == Some(feature_name))
                .all(|t| t.status == TaskStatus::Completed);
            if all_done && features.mark_completed(feature_name) {
                updated = true;
            }
        }

        if updated {
            if let Err(e) = features.save(&path) {
                error!("Failed to update feature list: {}", e);
            }
        }
    }

    /// One full sprint: plan, execute, update features. Returns the number
    /// of planned tasks (zero means nothing left to do).
    pub async fn run_cycle(&self) -> Result<usize> {
        let Some(mut plan) = self.plan().await? else {
            return Ok(0);
        };
        if plan.tasks.is_empty() {
            return Ok(0);
        }

        let report = self.execute(&mut plan).await;
        plan.save(&self.config.sprint_plan_path())?;
        self.update_feature_list(&plan);

        if report.deadlocked {
            warn!("Sprint ended with a dependency deadlock.");
        }
        info!("Sprint Completed.");
        self.notifier.notify(
            EventKind::SprintComplete,
            &format!(
                "Sprint completed for project {}. {} tasks finished.",
                self.config.project_dir.display(),
                report.completed.len()
            ),
        );

        Ok(report.planned)
    }

    /// Continuous sprint mode: keep planning cycles until one plans nothing.
    pub async fn run(&self) -> Result<()> {
        info!("Starting Continuous Sprint Mode.");
        let mut cycle = 0u64;

        loop {
            cycle += 1;
            info!("--- Starting Sprint Cycle {} ---", cycle);

            let task_count = self.run_cycle().await?;
            if task_count == 0 {
                info!("Sprint plan is empty. All features assumed complete. Exiting sprint mode.");
                break;
            }

            info!(
                "Sprint cycle {} finished with {} tasks planned. Proceeding to next cycle...",
                cycle, task_count
            );
            tokio::time::sleep(CYCLE_DELAY).await;
        }

        Ok(())
    }
}

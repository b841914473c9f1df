//! End-to-end run assembly
//!
//! Resolves configuration, binds the session to a ticket when requested,
//! enforces git safety, then hands off to the agent loop or the sprint
//! scheduler. Pre-flight checks live here too.

use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use eyre::{Context, Result, eyre};
use tracing::{info, warn};

use crate::adapters::{self, GitHubHttp, JiraHttp, TicketSystem, parse_remote_url};
use crate::backend::create_backend;
use crate::config::Config;
use crate::control::ControlClient;
use crate::git;
use crate::r#loop::{AgentLoop, LoopOutcome};
use crate::sprint::SprintScheduler;
use crate::util;
use crate::workflow::CompletionWorkflow;

/// Launch-time options layered over the config file
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub project_dir: PathBuf,
    pub ticket: Option<String>,
    pub label: Option<String>,
    pub model: Option<String>,
    pub max_iterations: Option<u64>,
    pub spec_file: Option<PathBuf>,
    pub sprint: bool,
    pub detached: bool,
}

/// One pre-flight check result
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
}

/// Environment checks run before launching an agent.
pub async fn pre_flight_checks(config: &Config, project_dir: &std::path::Path) -> Vec<CheckResult> {
    let git_installed = tokio::process::Command::new("git")
        .arg("--version")
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false);

    let git_repo = project_dir.join(".git").is_dir();

    // Chat backends need keys, subprocess backends need binaries
    let backend_ready = match config.backend.as_str() {
        "gemini" => binary_on_path("gemini").await,
        "cursor" => binary_on_path("cursor-agent").await,
        "openrouter" => std::env::var("OPENROUTER_API_KEY").is_ok(),
        "ollama" | "mock" => true,
        _ => false,
    };

    vec![
        CheckResult {
            name: "Git Installed",
            passed: git_installed,
        },
        CheckResult {
            name: "Git Repository",
            passed: git_repo,
        },
        CheckResult {
            name: "Backend Available",
            passed: backend_ready,
        },
    ]
}

async fn binary_on_path(name: &str) -> bool {
    tokio::process::Command::new("which")
        .arg(name)
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Print check results; returns whether all passed.
pub fn report_checks(checks: &[CheckResult]) -> bool {
    let mut all_passed = true;
    for check in checks {
        if check.passed {
            println!("{} {} passed", "✓".green(), check.name);
        } else {
            println!("{} {} failed", "✗".red(), check.name);
            all_passed = false;
        }
    }
    all_passed
}

/// Run an agent session to completion. Returns the process exit code.
pub async fn run_agent(mut config: Config, opts: RunOptions) -> Result<i32> {
    config.project_dir = opts.project_dir.clone();
    config.spec_file = opts.spec_file.clone();
    config.stream_output = !opts.detached;
    if let Some(model) = &opts.model {
        config.model = Some(model.clone());
    }
    if opts.max_iterations.is_some() {
        config.limits.max_iterations = opts.max_iterations;
    }
    if opts.sprint {
        config.sprint.enabled = true;
    }

    std::fs::create_dir_all(&config.project_dir).context("Failed to create project directory")?;

    let mut project_name = std::env::var("PROJECT_NAME").ok().unwrap_or_else(|| {
        config
            .project_dir
            .canonicalize()
            .unwrap_or_else(|_| config.project_dir.clone())
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string())
    });

    // Ticket binding
    let mut tickets: Option<Arc<JiraHttp>> = None;
    if opts.ticket.is_some() || opts.label.is_some() {
        let jira_config = config
            .jira
            .clone()
            .ok_or_else(|| eyre!("Jira configuration missing"))?;
        let client = Arc::new(JiraHttp::new(&jira_config));

        let issue = match (&opts.ticket, &opts.label) {
            (Some(key), _) => client.get(key).await,
            (None, Some(label)) => client.first_open_by_label(label).await,
            (None, None) => unreachable!(),
        };

        let Some(issue) = issue else {
            println!("No suitable ticket found.");
            return Ok(1);
        };

        info!("Bound to ticket {}: {}", issue.key, issue.summary);
        config.jira_ticket_key = Some(issue.key.clone());
        config.jira_spec_content = Some(issue.spec_context());
        project_name = issue.key.clone();

        client.transition(&issue.key, jira_config.start_status()).await;
        tickets = Some(client);
    }

    // Deterministic session identity
    let spec_content = config
        .jira_spec_content
        .clone()
        .or_else(|| {
            config
                .spec_file
                .as_ref()
                .and_then(|path| std::fs::read_to_string(path).ok())
        })
        .unwrap_or_default();
    let agent_id = util::agent_id(&project_name, &spec_content, &config.backend);
    config.agent_id = Some(agent_id.clone());
    info!("Starting {} agent. ID: {}", config.backend, agent_id);

    // Credential rewrite for outbound clones and pushes
    if let Ok(token) = std::env::var("GIT_TOKEN") {
        let host = std::env::var("GIT_HOST").unwrap_or_else(|_| "github.com".to_string());
        let user = std::env::var("GIT_USERNAME").unwrap_or_else(|_| "x-access-token".to_string());
        if let Err(e) = git::configure_auth(&token, &host, &user).await {
            warn!("Failed to configure git auth: {}", e);
        }
    }

    let telemetry = adapters::telemetry_from_env(&agent_id, &config.backend, &project_name);
    let control = ControlClient::new(agent_id.clone(), &config.dashboard_url);

    // Agents never work on protected refs
    git::ensure_safe(&config.project_dir, config.jira_ticket_key.as_deref())
        .await
        .context("Failed to establish a safe git state")?;

    let backend = create_backend(&config)?;
    let manager_backend = match &config.manager.model {
        Some(model) => {
            let mut manager_config = config.clone();
            manager_config.model = Some(model.clone());
            Some(create_backend(&manager_config)?)
        }
        None => None,
    };

    if config.sprint.enabled {
        let scheduler = SprintScheduler::new(Arc::new(config), backend, telemetry).with_control(control);
        scheduler.run().await?;
        return Ok(0);
    }

    // Ticket-bound sessions get the one-shot completion workflow
    let workflow = match (&tickets, &config.jira_ticket_key) {
        (Some(tickets), Some(key)) => {
            let done_status = config
                .jira
                .as_ref()
                .map(|j| j.done_status().to_string())
                .unwrap_or_else(|| "Code Review".to_string());

            let (owner_repo, prs) = match git::remote_url(&config.project_dir).await {
                Ok(remote) => match parse_remote_url(&remote) {
                    Some((host, owner, repo)) => {
                        let prs: Arc<dyn crate::adapters::PullRequestSystem> =
                            Arc::new(GitHubHttp::new(None, &host));
                        (Some((owner, repo)), Some(prs))
                    }
                    None => (None, None),
                },
                Err(_) => (None, None),
            };

            let tickets_dyn: Arc<dyn TicketSystem> = tickets.clone();
            Some(Arc::new(CompletionWorkflow::new(
                config.project_dir.clone(),
                key.clone(),
                done_status,
                owner_repo,
                tickets_dyn,
                prs,
            )))
        }
        _ => None,
    };

    let mut agent = AgentLoop::new(config, backend, telemetry).with_control(control);
    if let Some(manager_backend) = manager_backend {
        agent = agent.with_manager_backend(manager_backend);
    }
    if let Some(workflow) = workflow {
        agent = agent.with_workflow(workflow);
    }

    let outcome = agent.run().await;
    let code = match outcome {
        LoopOutcome::Completed | LoopOutcome::IterationCapReached | LoopOutcome::Stopped => 0,
        LoopOutcome::HumanInLoop(reason) => {
            println!("Human in loop requested: {}", reason);
            0
        }
        LoopOutcome::Fatal(reason) => {
            eprintln!("{} {}", "Fatal:".red(), reason);
            1
        }
    };

    Ok(code)
}

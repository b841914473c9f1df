//! agentd - autonomous coding-agent orchestrator CLI

use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use agentdaemon::cli::{Cli, Command, ConfigCommand};
use agentdaemon::config::{Config, ConfigManager};
use agentdaemon::runner::{self, RunOptions};
use agentdaemon::session::{SessionStatus, SessionStore};
use agentdaemon::util;

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The shim path must not emit log noise into git output
    if let Command::GitShim { args } = &cli.command {
        std::process::exit(agentdaemon::git::shim::run(args));
    }

    setup_logging(cli.verbose);
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.verbose = config.verbose || cli.verbose;

    match cli.command {
        Command::Run {
            detached,
            name,
            ticket,
            label,
            skip_checks,
            model,
            max_iterations,
            sprint,
            project_dir,
            spec,
        } => {
            let project_dir = project_dir.unwrap_or_else(|| PathBuf::from("."));

            if !skip_checks {
                let checks = runner::pre_flight_checks(&config, &project_dir).await;
                if !runner::report_checks(&checks) {
                    println!(
                        "\n{}",
                        "Pre-flight checks failed. Please fix the issues above.".red().bold()
                    );
                    std::process::exit(1);
                }
                println!("\n{}", "Checks passed!".green().bold());
            } else {
                println!("\n{}", "Skipping pre-flight checks...".yellow().bold());
            }

            let name = name.unwrap_or_else(util::generate_session_name);

            if detached {
                let code = launch_detached(
                    &name,
                    &project_dir,
                    &ticket,
                    &label,
                    &model,
                    max_iterations,
                    sprint,
                    &spec,
                    cli.config.as_ref(),
                )
                .await?;
                std::process::exit(code);
            }

            println!("{}", format!("Running session: {}", name).cyan());
            let opts = RunOptions {
                project_dir,
                ticket,
                label,
                model,
                max_iterations,
                spec_file: spec,
                sprint,
                detached: false,
            };
            let code = runner::run_agent(config, opts).await?;
            std::process::exit(code);
        }

        Command::List => {
            let store = SessionStore::new().context("Failed to open session store")?;
            let sessions = store.list();
            if sessions.is_empty() {
                println!("No active sessions found.");
                return Ok(());
            }

            println!(
                "{:<20} {:<8} {:<9} {:<10} {}",
                "NAME", "PID", "STATUS", "MODE", "STARTED"
            );
            for (record, status) in sessions {
                let status_text = match status {
                    SessionStatus::Running => status.as_str().green(),
                    SessionStatus::Dead => status.as_str().red(),
                };
                let mode = if record.workspace_path.is_some() { "isolated" } else { "shared" };
                let started = chrono::DateTime::from_timestamp(record.start_time as i64, 0)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                println!(
                    "{:<20} {:<8} {:<9} {:<10} {}",
                    record.name, record.pid, status_text, mode, started
                );
            }
        }

        Command::Stop { name } => {
            let store = SessionStore::new().context("Failed to open session store")?;
            match store.stop(&name).await {
                Ok(message) => println!("{}", message.green()),
                Err(e) => {
                    println!("{}", e.to_string().red());
                    std::process::exit(1);
                }
            }
        }

        Command::Logs { name, follow, lines } => {
            show_logs(&name, follow, lines)?;
        }

        Command::Attach { name } => {
            show_logs(&name, true, 50)?;
        }

        Command::Config { command } => {
            let manager = ConfigManager::new();
            match command {
                ConfigCommand::ListKeys => manager.list_keys(),
                ConfigCommand::Set { key, value } => manager.set_value(&key, &value)?,
                ConfigCommand::ListModels { agent } => manager.list_models(agent.as_deref()),
            }
        }

        Command::GitShim { .. } => unreachable!("handled before logging setup"),
    }

    Ok(())
}

/// Relaunch this binary under the session store, detached.
#[allow(clippy::too_many_arguments)]
async fn launch_detached(
    name: &str,
    project_dir: &std::path::Path,
    ticket: &Option<String>,
    label: &Option<String>,
    model: &Option<String>,
    max_iterations: Option<u64>,
    sprint: bool,
    spec: &Option<PathBuf>,
    config_path: Option<&PathBuf>,
) -> Result<i32> {
    let store = SessionStore::new().context("Failed to open session store")?;

    // Ticket-bound sessions run against an isolated clone of the caller's repo
    let workspace = if ticket.is_some() || label.is_some() {
        let path = store.prepare_workspace(name, project_dir).await?;
        println!("{}", format!("Created isolated workspace: {}", path.display()).yellow());
        Some(path)
    } else {
        None
    };

    let exe = std::env::current_exe().context("Failed to resolve current executable")?;
    let mut command: Vec<String> = vec![
        exe.display().to_string(),
        "run".to_string(),
        "--skip-checks".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--project-dir".to_string(),
        workspace
            .as_deref()
            .unwrap_or(project_dir)
            .display()
            .to_string(),
    ];
    if let Some(config) = config_path {
        command.extend(["--config".to_string(), config.display().to_string()]);
    }
    if let Some(ticket) = ticket {
        command.extend(["--ticket".to_string(), ticket.clone()]);
    }
    if let Some(label) = label {
        command.extend(["--label".to_string(), label.clone()]);
    }
    if let Some(model) = model {
        command.extend(["--model".to_string(), model.clone()]);
    }
    if let Some(max) = max_iterations {
        command.extend(["--max-iterations".to_string(), max.to_string()]);
    }
    if sprint {
        command.push("--sprint".to_string());
    }
    if let Some(spec) = spec {
        command.extend(["--spec".to_string(), spec.display().to_string()]);
    }

    println!("{}", format!("Launching detached session: {}", name).yellow());
    let record = store.start_detached(name, &command, workspace)?;
    info!(pid = record.pid, "Detached session started");

    println!("{} (PID: {})", "Session started!".green(), record.pid);
    println!("Log file: {}", record.log_file.display());
    println!("Use {} to view output.", format!("agentd logs {}", name).bold());
    Ok(0)
}

fn show_logs(name: &str, follow: bool, lines: usize) -> Result<()> {
    let store = SessionStore::new().context("Failed to open session store")?;
    let Some(log_path) = store.log_path(name) else {
        println!("{}", format!("Session '{}' not found.", name).red());
        std::process::exit(1);
    };

    if !log_path.exists() {
        println!("{}", format!("Log file not found: {}", log_path.display()).red());
        std::process::exit(1);
    }

    println!("Displaying logs for {} ({}):", name, log_path.display());
    let mut command = std::process::Command::new("tail");
    if follow {
        command.arg("-f");
    }
    command.args(["-n", &lines.to_string()]).arg(&log_path);

    // Ctrl-C out of tail -f is the expected exit path
    let _ = command.status();
    Ok(())
}

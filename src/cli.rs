//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Autonomous coding-agent orchestrator
#[derive(Parser)]
#[command(
    name = "agentd",
    about = "Autonomous coding-agent orchestrator",
    version,
    after_help = "Detached session logs live under the user log directory (or $LOG_DIR)."
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Launch an agent session
    Run {
        /// Run in the background under the session store
        #[arg(short, long)]
        detached: bool,

        /// Name for the session (generated when omitted)
        #[arg(short, long)]
        name: Option<String>,

        /// Ticket key to work on (e.g. PROJ-123)
        #[arg(short, long)]
        ticket: Option<String>,

        /// Pick the first open ticket carrying this label
        #[arg(long, conflicts_with = "ticket")]
        label: Option<String>,

        /// Skip pre-flight checks (DEV ONLY)
        #[arg(long)]
        skip_checks: bool,

        /// Override model selection
        #[arg(short, long)]
        model: Option<String>,

        /// Maximum iterations
        #[arg(short = 'i', long)]
        max_iterations: Option<u64>,

        /// Run in sprint mode (concurrent workers)
        #[arg(long)]
        sprint: bool,

        /// Project directory (default: current directory)
        #[arg(short, long)]
        project_dir: Option<PathBuf>,

        /// Path to the spec file for new projects
        #[arg(short, long)]
        spec: Option<PathBuf>,
    },

    /// List agent sessions
    List,

    /// Stop a detached session
    Stop {
        /// Session name
        name: String,
    },

    /// Show a session's logs
    Logs {
        /// Session name
        name: String,

        /// Follow log output (like tail -f)
        #[arg(short, long)]
        follow: bool,

        /// Number of lines to show
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },

    /// Attach to a session (stream logs)
    Attach {
        /// Session name
        name: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Internal: git wrapper entry point (installed on PATH as `git`)
    #[command(hide = true)]
    GitShim {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigCommand {
    /// List all configurable keys
    ListKeys,

    /// Set a configuration value
    Set { key: String, value: String },

    /// List available models
    ListModels {
        /// Filter by backend tag
        #[arg(long)]
        agent: Option<String>,
    },
}

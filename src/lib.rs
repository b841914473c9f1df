//! agentdaemon - autonomous coding-agent orchestrator
//!
//! A long-running supervisor that drives LLM-backed coding agents through
//! iterative sessions against a project working tree until the project is
//! declared complete, then hands off to completion workflows.
//!
//! # Core ideas
//!
//! - **Signal files are the control state**: zero-byte markers like
//!   `COMPLETED` and `PROJECT_SIGNED_OFF` drive role selection
//! - **Disposable branches only**: agents never commit or push to `main`
//!   or `master`
//! - **Activity-based timeouts**: a quiet backend that is still producing
//!   files keeps its deadline moving
//! - **Bounded parallelism**: sprint mode fans tasks out across isolated
//!   worktrees under a dependency DAG
//!
//! # Modules
//!
//! - [`r#loop`] - the iteration-driven agent loop and role selector
//! - [`backend`] - pluggable LLM backends (subprocess, chat API, mock)
//! - [`tools`] - fenced tool-block parsing and execution
//! - [`sprint`] - dependency-aware parallel task execution
//! - [`git`] - branch safety, push refusal, and the binary shim
//! - [`session`] - detached process supervision
//! - [`control`] - dashboard heartbeat/command wire client

pub mod adapters;
pub mod backend;
pub mod cli;
pub mod config;
pub mod control;
pub mod db;
pub mod features;
pub mod git;
pub mod prompts;
pub mod runner;
pub mod session;
pub mod sprint;
pub mod tools;
pub mod util;
pub mod workflow;
pub mod worktree;

// Note: 'loop' is a reserved keyword, so we use r#loop
#[path = "loop/mod.rs"]
pub mod r#loop;

// Re-export commonly used types
pub use adapters::{EventKind, Issue, Metrics, NoopMetrics, Notifier, Telemetry, TicketSystem};
pub use backend::{Backend, BackendError, BackendResponse, ChatBackend, MockBackend, ProcessBackend, create_backend};
pub use config::{Config, ConfigManager, JiraConfig};
pub use control::{AgentControl, AgentState, ControlClient, ControlCommand, StateUpdate, StatusUpdate};
pub use features::{Feature, FeatureList};
pub use r#loop::{AgentLoop, IterationState, LoopOutcome, Role, SelectorFlags, Selection, SignalSet, select_role};
pub use session::{SessionRecord, SessionStatus, SessionStore};
pub use sprint::{
    DetectorTrip, LoopDetectors, SPRINT_TASK_COMPLETE, SPRINT_TASK_FAILED, SprintPlan, SprintReport,
    SprintScheduler, Task, TaskStatus, WorkerOutcome,
};
pub use tools::{ExecutionLog, ToolBlock, ToolExecutor, parse_blocks};
pub use workflow::CompletionWorkflow;
pub use worktree::{WorktreeError, WorktreeManager};

//! External system adapters: tickets, pull requests, notifications, metrics

pub mod metrics;
pub mod notify;
pub mod pr;
pub mod ticket;

pub use metrics::{Metrics, NoopMetrics, PushMetrics, Telemetry};
pub use metrics::from_env as telemetry_from_env;
pub use notify::{EventKind, Notifier};
pub use pr::{GitHubHttp, PullRequestSystem, RepoMetadata, parse_remote_url};
pub use ticket::{Issue, JiraHttp, TicketSystem};

//! Configuration types and loading
//!
//! Configuration comes from `agent_config.yaml` (project directory first,
//! then the user config directory), with a handful of environment variables
//! layered on top.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Application name used for user data/config/log directories
pub const APP_NAME: &str = "agentdaemon";

/// Configuration file name
pub const CONFIG_FILE: &str = "agent_config.yaml";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend tag: gemini, cursor, openrouter, ollama, mock
    pub backend: String,

    /// Model identifier (backend-specific; None selects the backend default)
    pub model: Option<String>,

    /// Manager role configuration
    pub manager: ManagerConfig,

    /// Iteration and timeout limits
    pub limits: LimitsConfig,

    /// Sprint mode configuration
    pub sprint: SprintConfig,

    /// Dashboard base URL for the control plane
    #[serde(rename = "dashboard-url")]
    pub dashboard_url: String,

    /// Jira connection (required for ticket-bound sessions)
    pub jira: Option<JiraConfig>,

    /// Notification fan-out settings
    pub notifications: NotificationsConfig,

    /// Extra environment variables forwarded to backend subprocesses
    #[serde(rename = "env-passthrough")]
    pub env_passthrough: Vec<String>,

    /// Enable verbose logging
    pub verbose: bool,

    // Runtime fields, resolved at launch rather than read from the file.
    #[serde(skip)]
    pub project_dir: PathBuf,

    #[serde(skip)]
    pub spec_file: Option<PathBuf>,

    #[serde(skip)]
    pub agent_id: Option<String>,

    #[serde(skip)]
    pub jira_ticket_key: Option<String>,

    #[serde(skip)]
    pub jira_spec_content: Option<String>,

    #[serde(skip)]
    pub stream_output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: "gemini".to_string(),
            model: None,
            manager: ManagerConfig::default(),
            limits: LimitsConfig::default(),
            sprint: SprintConfig::default(),
            dashboard_url: "http://localhost:7654".to_string(),
            jira: None,
            notifications: NotificationsConfig::default(),
            env_passthrough: Vec::new(),
            verbose: false,
            project_dir: PathBuf::from("."),
            spec_file: None,
            agent_id: None,
            jira_ticket_key: None,
            jira_spec_content: None,
            stream_output: true,
        }
    }
}

impl Config {
    /// Load configuration with fallback chain:
    /// explicit path, `./agent_config.yaml`, then the user config directory.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            let mut config = Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()))?;
            config.apply_env();
            return Ok(config);
        }

        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(mut config) => {
                    config.apply_env();
                    return Ok(config);
                }
                Err(e) => warn!("Failed to load config from {}: {}", local.display(), e),
            }
        }

        let user = Self::user_config_path();
        if user.exists() {
            match Self::load_from_file(&user) {
                Ok(mut config) => {
                    config.apply_env();
                    return Ok(config);
                }
                Err(e) => warn!("Failed to load config from {}: {}", user.display(), e),
            }
        }

        info!("No config file found, using defaults");
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Path of the user-level config file
    pub fn user_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME)
            .join(CONFIG_FILE)
    }

    /// Layer honoured environment variables over file values
    fn apply_env(&mut self) {
        let jira_url = std::env::var("JIRA_URL").ok();
        let jira_email = std::env::var("JIRA_EMAIL").ok();
        let jira_token = std::env::var("JIRA_TOKEN").ok();

        if jira_url.is_some() || jira_email.is_some() || jira_token.is_some() {
            let jira = self.jira.get_or_insert_with(JiraConfig::default);
            if let Some(url) = jira_url {
                jira.url = url;
            }
            if let Some(email) = jira_email {
                jira.email = email;
            }
            if let Some(token) = jira_token {
                jira.token = token;
            }
        }
    }

    /// Whether the session is bound to a ticket
    pub fn ticket_bound(&self) -> bool {
        self.jira.is_some() && self.jira_ticket_key.is_some()
    }

    pub fn feature_list_path(&self) -> PathBuf {
        self.project_dir.join("feature_list.json")
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.project_dir.join(".agent_state.json")
    }

    pub fn sprint_plan_path(&self) -> PathBuf {
        self.project_dir.join("sprint_plan.json")
    }
}

/// Manager role configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Run the manager every N iterations
    pub frequency: u64,

    /// Model override for manager iterations
    pub model: Option<String>,

    /// Run the manager before the first coding session
    #[serde(rename = "run-first")]
    pub run_first: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            frequency: 10,
            model: None,
            run_first: false,
        }
    }
}

/// Iteration and timeout limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum iterations (None = unlimited)
    #[serde(rename = "max-iterations")]
    pub max_iterations: Option<u64>,

    /// Consecutive errors before a fatal stop
    #[serde(rename = "max-consecutive-errors")]
    pub max_consecutive_errors: u32,

    /// Delay between successful iterations in seconds
    #[serde(rename = "auto-continue-delay-secs")]
    pub auto_continue_delay_secs: u64,

    /// Backend inactivity timeout in seconds
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Bash tool-block timeout in seconds
    #[serde(rename = "bash-timeout-secs")]
    pub bash_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_iterations: None,
            max_consecutive_errors: 3,
            auto_continue_delay_secs: 3,
            timeout_secs: 600,
            bash_timeout_secs: 120,
        }
    }
}

/// Sprint mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SprintConfig {
    /// Run in sprint mode instead of the single-agent loop
    pub enabled: bool,

    /// Maximum concurrent workers
    #[serde(rename = "max-agents")]
    pub max_agents: usize,

    /// Turn cap per worker task
    #[serde(rename = "max-turns")]
    pub max_turns: u32,
}

impl Default for SprintConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_agents: 1,
            max_turns: 10,
        }
    }
}

/// Jira connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
    pub url: String,
    pub email: String,
    pub token: String,

    /// Workflow status names, keyed by stage ("start", "done")
    #[serde(rename = "status-map")]
    pub status_map: HashMap<String, String>,
}

impl JiraConfig {
    /// Status to transition to when work begins
    pub fn start_status(&self) -> &str {
        self.status_map.get("start").map(String::as_str).unwrap_or("In Progress")
    }

    /// Status to transition to on completion
    pub fn done_status(&self) -> &str {
        self.status_map.get("done").map(String::as_str).unwrap_or("Code Review")
    }
}

/// Per-event notification setting: a plain bool applies to every channel,
/// a map enables channels individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventSetting {
    All(bool),
    PerChannel(HashMap<String, bool>),
}

/// Notification fan-out settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    #[serde(rename = "slack-webhook-url")]
    pub slack_webhook_url: Option<String>,

    #[serde(rename = "discord-webhook-url")]
    pub discord_webhook_url: Option<String>,

    /// Per-event overrides keyed by event kind name
    pub events: HashMap<String, EventSetting>,
}

/// Known configuration keys for `config list-keys` / `config set`
const CONFIG_KEYS: &[(&str, &str)] = &[
    ("backend", "Backend tag (gemini, cursor, openrouter, ollama, mock)"),
    ("model", "Model identifier for the active backend"),
    ("manager.frequency", "Run the manager every N iterations"),
    ("manager.model", "Model override for manager iterations"),
    ("manager.run-first", "Run the manager before the first coding session"),
    ("limits.max-iterations", "Maximum iterations before stopping"),
    ("limits.max-consecutive-errors", "Consecutive errors before a fatal stop"),
    ("limits.auto-continue-delay-secs", "Delay between iterations"),
    ("limits.timeout-secs", "Backend inactivity timeout"),
    ("limits.bash-timeout-secs", "Bash tool-block timeout"),
    ("sprint.enabled", "Run in sprint mode"),
    ("sprint.max-agents", "Maximum concurrent sprint workers"),
    ("sprint.max-turns", "Turn cap per sprint task"),
    ("dashboard-url", "Dashboard base URL"),
    ("jira.url", "Jira server URL"),
    ("jira.email", "Jira account email"),
    ("jira.token", "Jira API token"),
];

/// Built-in model table for `config list-models`
const MODELS: &[(&str, &str)] = &[
    ("gemini", "auto"),
    ("gemini", "gemini-2.5-pro"),
    ("gemini", "gemini-2.5-flash"),
    ("cursor", "auto"),
    ("cursor", "gpt-5"),
    ("cursor", "sonnet-4.5"),
    ("openrouter", "anthropic/claude-sonnet-4"),
    ("openrouter", "deepseek/deepseek-chat"),
    ("ollama", "qwen2.5-coder:14b"),
    ("ollama", "llama3.1:8b"),
];

/// Manages the user-level config file for the `config` subcommands
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            path: Config::user_config_path(),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Print every known configuration key with its description
    pub fn list_keys(&self) {
        for (key, description) in CONFIG_KEYS {
            println!("{:<36} {}", key, description);
        }
    }

    /// Set a (possibly dotted) key in the user config file
    pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
        debug!(%key, %value, "ConfigManager::set_value: called");

        let mut root: serde_yaml::Value = if self.path.exists() {
            let content = fs::read_to_string(&self.path).context("Failed to read config file")?;
            serde_yaml::from_str(&content).context("Failed to parse config file")?
        } else {
            serde_yaml::Value::Mapping(Default::default())
        };

        // Coerce into the natural YAML scalar type when possible
        let parsed: serde_yaml::Value =
            serde_yaml::from_str(value).unwrap_or(serde_yaml::Value::String(value.to_string()));

        let mut cursor = &mut root;
        let parts: Vec<&str> = key.split('.').collect();
        for part in &parts[..parts.len() - 1] {
            cursor = cursor
                .as_mapping_mut()
                .ok_or_else(|| eyre::eyre!("Config key path {} is not a mapping", key))?
                .entry(serde_yaml::Value::String(part.to_string()))
                .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
        }
        cursor
            .as_mapping_mut()
            .ok_or_else(|| eyre::eyre!("Config key path {} is not a mapping", key))?
            .insert(
                serde_yaml::Value::String(parts[parts.len() - 1].to_string()),
                parsed,
            );

        // Validate the result still deserializes as a Config
        let rendered = serde_yaml::to_string(&root).context("Failed to render config")?;
        let _: Config = serde_yaml::from_str(&rendered)
            .context(format!("Value for {} does not produce a valid config", key))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        fs::write(&self.path, rendered).context("Failed to write config file")?;
        info!("Set {} in {}", key, self.path.display());
        Ok(())
    }

    /// Print the built-in model table, optionally filtered by backend tag
    pub fn list_models(&self, backend: Option<&str>) {
        for (tag, model) in MODELS {
            if backend.map(|b| b == *tag).unwrap_or(true) {
                println!("{:<12} {}", tag, model);
            }
        }
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backend, "gemini");
        assert_eq!(config.manager.frequency, 10);
        assert_eq!(config.limits.max_consecutive_errors, 3);
        assert_eq!(config.sprint.max_agents, 1);
        assert!(config.limits.max_iterations.is_none());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
backend: openrouter
model: anthropic/claude-sonnet-4

manager:
  frequency: 5
  run-first: true

limits:
  max-iterations: 40
  timeout-secs: 300

sprint:
  enabled: true
  max-agents: 4
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backend, "openrouter");
        assert_eq!(config.model.as_deref(), Some("anthropic/claude-sonnet-4"));
        assert_eq!(config.manager.frequency, 5);
        assert!(config.manager.run_first);
        assert_eq!(config.limits.max_iterations, Some(40));
        assert!(config.sprint.enabled);
        assert_eq!(config.sprint.max_agents, 4);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = "backend: cursor\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backend, "cursor");
        assert_eq!(config.manager.frequency, 10);
        assert_eq!(config.limits.bash_timeout_secs, 120);
    }

    #[test]
    fn test_jira_status_defaults() {
        let jira = JiraConfig::default();
        assert_eq!(jira.start_status(), "In Progress");
        assert_eq!(jira.done_status(), "Code Review");

        let mut mapped = JiraConfig::default();
        mapped.status_map.insert("done".to_string(), "Done".to_string());
        assert_eq!(mapped.done_status(), "Done");
    }

    #[test]
    fn test_event_setting_untagged() {
        let yaml = r#"
events:
  iteration: false
  manager:
    slack: true
    discord: false
"#;
        let config: NotificationsConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.events.get("iteration"), Some(EventSetting::All(false))));
        assert!(matches!(config.events.get("manager"), Some(EventSetting::PerChannel(_))));
    }

    #[test]
    fn test_config_manager_set_nested() {
        let temp = tempdir().unwrap();
        let path = temp.path().join(CONFIG_FILE);
        let manager = ConfigManager::with_path(path.clone());

        manager.set_value("manager.frequency", "7").unwrap();
        manager.set_value("backend", "cursor").unwrap();

        let config: Config = serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(config.manager.frequency, 7);
        assert_eq!(config.backend, "cursor");
    }

    #[test]
    fn test_config_manager_rejects_invalid() {
        let temp = tempdir().unwrap();
        let manager = ConfigManager::with_path(temp.path().join(CONFIG_FILE));
        assert!(manager.set_value("manager.frequency", "not-a-number").is_err());
    }

    #[test]
    fn test_ticket_bound() {
        let mut config = Config::default();
        assert!(!config.ticket_bound());

        config.jira = Some(JiraConfig::default());
        assert!(!config.ticket_bound());

        config.jira_ticket_key = Some("PROJ-1".to_string());
        assert!(config.ticket_bound());
    }
}

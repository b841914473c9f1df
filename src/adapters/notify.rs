//! Notification fan-out to Slack and Discord webhooks

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{Config, EventSetting, NotificationsConfig};

/// Notification event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Iteration,
    Manager,
    HumanInLoop,
    ProjectCompletion,
    Error,
    AgentStart,
    AgentStop,
    SprintStart,
    SprintTaskComplete,
    SprintComplete,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Iteration => "iteration",
            Self::Manager => "manager",
            Self::HumanInLoop => "human_in_loop",
            Self::ProjectCompletion => "project_completion",
            Self::Error => "error",
            Self::AgentStart => "agent_start",
            Self::AgentStop => "agent_stop",
            Self::SprintStart => "sprint_start",
            Self::SprintTaskComplete => "sprint_task_complete",
            Self::SprintComplete => "sprint_complete",
        }
    }

    /// Default enablement when no configuration override exists
    fn default_enabled(&self) -> bool {
        match self {
            Self::Iteration => false,
            Self::Manager => true,
            Self::HumanInLoop => true,
            Self::ProjectCompletion => true,
            Self::Error => false,
            Self::AgentStart => true,
            Self::AgentStop => true,
            Self::SprintStart => false,
            Self::SprintTaskComplete => false,
            Self::SprintComplete => true,
        }
    }

    fn prefix(&self) -> String {
        format!("[{}] ", self.name().to_uppercase().replace('_', " "))
    }
}

/// Sends notifications to the configured channels
pub struct Notifier {
    settings: NotificationsConfig,
    agent_id: Option<String>,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(config: &Config) -> Self {
        Self {
            settings: config.notifications.clone(),
            agent_id: config.agent_id.clone(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    fn should_notify(&self, kind: EventKind, channel: &str) -> bool {
        match self.settings.events.get(kind.name()) {
            Some(EventSetting::All(enabled)) => *enabled,
            Some(EventSetting::PerChannel(channels)) => channels.get(channel).copied().unwrap_or(false),
            None => kind.default_enabled(),
        }
    }

    /// Send a notification to every enabled channel. Fire-and-forget.
    pub fn notify(&self, kind: EventKind, message: &str) {
        let full_message = format!("{}{}", kind.prefix(), message);
        debug!(event = kind.name(), "Notifier::notify: called");

        if self.should_notify(kind, "slack") {
            if let Some(url) = self.settings.slack_webhook_url.clone() {
                let mut payload = serde_json::json!({ "text": full_message });
                if let Some(id) = &self.agent_id {
                    payload["username"] = serde_json::json!(id);
                }
                self.deliver("slack", url, payload);
            }
        }

        if self.should_notify(kind, "discord") {
            if let Some(url) = self.settings.discord_webhook_url.clone() {
                let payload = serde_json::json!({ "content": full_message });
                self.deliver("discord", url, payload);
            }
        }
    }

    fn deliver(&self, channel: &'static str, url: String, payload: serde_json::Value) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let http = self.http.clone();
        runtime.spawn(async move {
            match http.post(&url).json(&payload).send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!(channel, status = %response.status(), "Notification delivery rejected");
                }
                Err(e) => warn!(channel, error = %e, "Failed to send notification"),
                _ => {}
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn notifier_with(events: HashMap<String, EventSetting>) -> Notifier {
        let mut config = Config::default();
        config.notifications.events = events;
        Notifier::new(&config)
    }

    #[test]
    fn test_default_matrix() {
        let notifier = notifier_with(HashMap::new());
        assert!(!notifier.should_notify(EventKind::Iteration, "slack"));
        assert!(notifier.should_notify(EventKind::Manager, "slack"));
        assert!(notifier.should_notify(EventKind::HumanInLoop, "discord"));
        assert!(notifier.should_notify(EventKind::ProjectCompletion, "slack"));
        assert!(!notifier.should_notify(EventKind::SprintTaskComplete, "slack"));
    }

    #[test]
    fn test_bool_override_applies_everywhere() {
        let mut events = HashMap::new();
        events.insert("iteration".to_string(), EventSetting::All(true));
        events.insert("manager".to_string(), EventSetting::All(false));

        let notifier = notifier_with(events);
        assert!(notifier.should_notify(EventKind::Iteration, "slack"));
        assert!(notifier.should_notify(EventKind::Iteration, "discord"));
        assert!(!notifier.should_notify(EventKind::Manager, "slack"));
    }

    #[test]
    fn test_per_channel_override() {
        let mut channels = HashMap::new();
        channels.insert("slack".to_string(), true);

        let mut events = HashMap::new();
        events.insert("error".to_string(), EventSetting::PerChannel(channels));

        let notifier = notifier_with(events);
        assert!(notifier.should_notify(EventKind::Error, "slack"));
        assert!(!notifier.should_notify(EventKind::Error, "discord"));
    }

    #[test]
    fn test_event_prefix() {
        assert_eq!(EventKind::HumanInLoop.prefix(), "[HUMAN IN LOOP] ");
        assert_eq!(EventKind::Manager.prefix(), "[MANAGER] ");
    }

    #[tokio::test]
    async fn test_notify_without_webhooks_is_noop() {
        let notifier = notifier_with(HashMap::new());
        // No webhook URLs configured; must not panic or block.
        notifier.notify(EventKind::Manager, "update");
    }
}

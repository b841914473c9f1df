//! Ticket system adapter
//!
//! Trait contract for the agent loop and completion workflow, plus a Jira
//! REST implementation (cloud or self-hosted, basic auth).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::JiraConfig;

/// A ticket as seen by the core
#[derive(Debug, Clone)]
pub struct Issue {
    pub key: String,
    pub summary: String,
    pub description: String,
    pub comments: Vec<String>,
}

impl Issue {
    /// Render the ticket payload injected into jira-variant prompts
    pub fn spec_context(&self) -> String {
        format!(
            "JIRA TICKET {}\nSUMMARY: {}\nDESCRIPTION:\n{}",
            self.key, self.summary, self.description
        )
    }
}

/// Ticket system contract
#[async_trait]
pub trait TicketSystem: Send + Sync {
    async fn get(&self, key: &str) -> Option<Issue>;

    /// First open ("To Do") issue carrying the label
    async fn first_open_by_label(&self, label: &str) -> Option<Issue>;

    async fn transition(&self, key: &str, status_name: &str) -> bool;

    async fn comment(&self, key: &str, body: &str) -> bool;
}

/// Jira REST v2 client
pub struct JiraHttp {
    base_url: String,
    email: String,
    token: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct JiraIssueWire {
    key: String,
    fields: JiraFields,
}

#[derive(Debug, Deserialize)]
struct JiraFields {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    comment: Option<JiraComments>,
}

#[derive(Debug, Deserialize)]
struct JiraComments {
    #[serde(default)]
    comments: Vec<JiraComment>,
}

#[derive(Debug, Deserialize)]
struct JiraComment {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct JiraSearchWire {
    #[serde(default)]
    issues: Vec<JiraIssueWire>,
}

#[derive(Debug, Deserialize)]
struct JiraTransitionsWire {
    #[serde(default)]
    transitions: Vec<JiraTransition>,
}

#[derive(Debug, Deserialize)]
struct JiraTransition {
    id: String,
    name: String,
}

impl JiraHttp {
    pub fn new(config: &JiraConfig) -> Self {
        debug!(url = %config.url, "JiraHttp::new: created");
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
            token: config.token.clone(),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/rest/api/2/{}", self.base_url, path)
    }

    fn issue_from_wire(wire: JiraIssueWire) -> Issue {
        Issue {
            key: wire.key,
            summary: wire.fields.summary,
            description: wire.fields.description.unwrap_or_default(),
            comments: wire
                .fields
                .comment
                .map(|c| c.comments.into_iter().map(|c| c.body).collect())
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl TicketSystem for JiraHttp {
    async fn get(&self, key: &str) -> Option<Issue> {
        let url = self.api(&format!("issue/{}", key));
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.email, Some(&self.token))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let wire: JiraIssueWire = resp.json().await.ok()?;
                Some(Self::issue_from_wire(wire))
            }
            Ok(resp) if resp.status().as_u16() == 404 => {
                warn!("Issue {} not found", key);
                None
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "Error fetching issue {}", key);
                None
            }
            Err(e) => {
                warn!(error = %e, "Error fetching issue {}", key);
                None
            }
        }
    }

    async fn first_open_by_label(&self, label: &str) -> Option<Issue> {
        // statusCategory is stabler than concrete status names
        let jql = format!(
            "labels = \"{}\" AND statusCategory = \"To Do\" ORDER BY priority DESC, created ASC",
            label
        );
        let url = self.api("search");

        let response = self
            .http
            .get(&url)
            .basic_auth(&self.email, Some(&self.token))
            .query(&[("jql", jql.as_str()), ("maxResults", "1")])
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let wire: JiraSearchWire = resp.json().await.ok()?;
                wire.issues.into_iter().next().map(Self::issue_from_wire)
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "JQL search failed for label {}", label);
                None
            }
            Err(e) => {
                warn!(error = %e, "JQL search failed for label {}", label);
                None
            }
        }
    }

    async fn transition(&self, key: &str, status_name: &str) -> bool {
        // Find the transition id whose name matches, then apply it
        let list_url = self.api(&format!("issue/{}/transitions", key));
        let transitions: JiraTransitionsWire = match self
            .http
            .get(&list_url)
            .basic_auth(&self.email, Some(&self.token))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => match resp.json().await {
                Ok(wire) => wire,
                Err(e) => {
                    warn!(error = %e, "Failed to parse transitions for {}", key);
                    return false;
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "Failed to list transitions for {}", key);
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Failed to list transitions for {}", key);
                return false;
            }
        };

        let Some(transition) = transitions
            .transitions
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(status_name))
        else {
            let available: Vec<&str> = transitions.transitions.iter().map(|t| t.name.as_str()).collect();
            warn!(
                "Transition to '{}' not found for {}. Available: {:?}",
                status_name, key, available
            );
            return false;
        };

        let payload = serde_json::json!({ "transition": { "id": transition.id } });
        match self
            .http
            .post(&list_url)
            .basic_auth(&self.email, Some(&self.token))
            .json(&payload)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                info!("Transitioned {} to '{}'", key, status_name);
                true
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "Error transitioning issue {}", key);
                false
            }
            Err(e) => {
                warn!(error = %e, "Error transitioning issue {}", key);
                false
            }
        }
    }

    async fn comment(&self, key: &str, body: &str) -> bool {
        let url = self.api(&format!("issue/{}/comment", key));
        let payload = serde_json::json!({ "body": body });

        match self
            .http
            .post(&url)
            .basic_auth(&self.email, Some(&self.token))
            .json(&payload)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                info!("Added comment to {}", key);
                true
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "Error adding comment to {}", key);
                false
            }
            Err(e) => {
                warn!(error = %e, "Error adding comment to {}", key);
                false
            }
        }
    }
}

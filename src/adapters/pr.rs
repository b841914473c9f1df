//! Pull-request system adapter
//!
//! Trait contract consumed by the completion workflow, plus the GitHub REST
//! implementation and remote-URL parsing.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::util::sanitize_url;

/// Repository metadata needed by the completion workflow
#[derive(Debug, Clone, Deserialize)]
pub struct RepoMetadata {
    pub default_branch: String,
}

/// Pull-request system contract
#[async_trait]
pub trait PullRequestSystem: Send + Sync {
    /// Create a pull request; returns the PR URL on success
    async fn create(
        &self,
        owner: &str,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Option<String>;

    /// Fetch repository metadata (default branch)
    async fn repo_metadata(&self, owner: &str, repo: &str) -> Option<RepoMetadata>;
}

/// Extract `(host, owner, repo)` from a git remote URL.
///
/// Accepts `https://[token@]host/owner/repo[.git]` and
/// `git@host:owner/repo[.git]`.
pub fn parse_remote_url(remote_url: &str) -> Option<(String, String, String)> {
    let mut clean = remote_url.trim().to_string();
    if let Some(stripped) = clean.strip_suffix(".git") {
        clean = stripped.to_string();
    }

    let https = Regex::new(r"^https?://(?:[^@/]+@)?(?P<host>[^/]+)/(?P<owner>[^/]+)/(?P<repo>[^/]+)/?$")
        .expect("static regex");
    if let Some(caps) = https.captures(&clean) {
        return Some((caps["host"].to_string(), caps["owner"].to_string(), caps["repo"].to_string()));
    }

    let ssh = Regex::new(r"^git@(?P<host>[^:]+):(?P<owner>[^/]+)/(?P<repo>[^/]+)/?$").expect("static regex");
    if let Some(caps) = ssh.captures(&clean) {
        return Some((caps["host"].to_string(), caps["owner"].to_string(), caps["repo"].to_string()));
    }

    warn!("Failed to parse host/owner/repo from remote URL: {}", sanitize_url(&clean));
    None
}

/// GitHub REST v3 client (github.com or enterprise hosts)
pub struct GitHubHttp {
    token: Option<String>,
    api_base: String,
    http: reqwest::Client,
}

impl GitHubHttp {
    pub fn new(token: Option<String>, host: &str) -> Self {
        let token = token
            .or_else(|| std::env::var("GIT_TOKEN").ok())
            .or_else(|| std::env::var("GITHUB_TOKEN").ok());

        // Enterprise hosts serve the API under /api/v3
        let api_base = if host == "github.com" {
            "https://api.github.com".to_string()
        } else {
            format!("https://{}/api/v3", host)
        };

        debug!(%api_base, has_token = token.is_some(), "GitHubHttp::new: created");

        Self {
            token,
            api_base,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl PullRequestSystem for GitHubHttp {
    async fn create(
        &self,
        owner: &str,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Option<String> {
        let Some(token) = &self.token else {
            warn!("No GIT_TOKEN found. Cannot create pull request.");
            return None;
        };

        let url = format!("{}/repos/{}/{}/pulls", self.api_base, owner, repo);
        let payload = serde_json::json!({
            "title": title,
            "body": body,
            "head": head,
            "base": base,
        });

        info!("Creating PR in {}/{}: {}", owner, repo, title);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("token {}", token))
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", crate::config::APP_NAME)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().as_u16() == 201 => {
                let data: serde_json::Value = resp.json().await.ok()?;
                let pr_url = data["html_url"].as_str().map(String::from);
                info!(?pr_url, "Pull request created");
                pr_url
            }
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                warn!(%status, "Failed to create PR: {}", text);
                None
            }
            Err(e) => {
                warn!(error = %e, "Error creating PR");
                None
            }
        }
    }

    async fn repo_metadata(&self, owner: &str, repo: &str) -> Option<RepoMetadata> {
        let url = format!("{}/repos/{}/{}", self.api_base, owner, repo);

        let mut request = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", crate::config::APP_NAME);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {}", token));
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => resp.json().await.ok(),
            Ok(resp) => {
                debug!(status = %resp.status(), "repo_metadata: request rejected");
                None
            }
            Err(e) => {
                debug!(error = %e, "repo_metadata: request failed");
                None
            }
        }
    }
}

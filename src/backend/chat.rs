//! Streaming chat-API backend
//!
//! OpenAI-compatible `/chat/completions` over SSE. OpenRouter and a local
//! inference endpoint (Ollama) are presets of the same variant; only the
//! base URL, key, and headers differ.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::control::{StatusSender, StatusUpdate};
use crate::util::has_recent_activity;

use super::{Backend, BackendError, BackendResponse, TokenUsage};

/// Poll granularity of the stream activity loop
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Window and extension for file-activity based deadline pushes
const FILE_ACTIVITY_WINDOW: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str = "You are a helpful autonomous coding agent.";

/// Streaming chat backend
pub struct ChatBackend {
    kind: &'static str,
    base_url: String,
    api_key: String,
    model: String,
    headers: Vec<(&'static str, &'static str)>,
    timeout: Duration,
    http: reqwest::Client,
}

impl ChatBackend {
    /// OpenRouter preset; requires `OPENROUTER_API_KEY`.
    pub fn openrouter(config: &Config) -> Result<Self, BackendError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| BackendError::MissingApiKey("OPENROUTER_API_KEY".to_string()))?;

        Ok(Self {
            kind: "openrouter",
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "anthropic/claude-sonnet-4".to_string()),
            headers: vec![("X-Title", "agentdaemon")],
            timeout: Duration::from_secs(config.limits.timeout_secs),
            http: reqwest::Client::new(),
        })
    }

    /// Local inference preset; base URL from `OLLAMA_BASE_URL`. The key is
    /// required by the wire shape but ignored by the server.
    pub fn ollama(config: &Config) -> Self {
        let base_url =
            std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| "http://localhost:11434/v1".to_string());

        Self {
            kind: "ollama",
            base_url,
            api_key: "ollama".to_string(),
            model: config.model.clone().unwrap_or_else(|| "qwen2.5-coder:14b".to_string()),
            headers: vec![],
            timeout: Duration::from_secs(config.limits.timeout_secs),
            http: reqwest::Client::new(),
        }
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "stream": true,
        })
    }
}

#[async_trait]
impl Backend for ChatBackend {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn run(
        &self,
        prompt: &str,
        cwd: &Path,
        status: Option<&StatusSender>,
    ) -> Result<BackendResponse, BackendError> {
        debug!(kind = self.kind, model = %self.model, "ChatBackend::run: sending request");

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt));
        for (key, value) in &self.headers {
            request = request.header(*key, *value);
        }

        let mut source = EventSource::new(request).map_err(|e| BackendError::Stream(e.to_string()))?;

        let mut content = String::new();
        let mut usage: Option<TokenUsage> = None;
        let mut deadline = Instant::now() + self.timeout;

        loop {
            let event = match tokio::time::timeout(POLL_INTERVAL, source.next()).await {
                Ok(event) => event,
                Err(_) => {
                    // No bytes this interval; apply the activity rule
                    if Instant::now() < deadline {
                        continue;
                    }
                    if has_recent_activity(cwd, FILE_ACTIVITY_WINDOW) {
                        info!("Stream quiet past timeout, but file activity detected. Extending wait by 60s...");
                        deadline = Instant::now() + FILE_ACTIVITY_WINDOW;
                        continue;
                    }
                    source.close();
                    return Err(BackendError::Timeout(self.timeout));
                }
            };

            deadline = Instant::now() + self.timeout;

            match event {
                Some(Ok(Event::Open)) => {}
                Some(Ok(Event::Message(message))) => {
                    if message.data == "[DONE]" {
                        break;
                    }

                    let chunk: serde_json::Value = match serde_json::from_str(&message.data) {
                        Ok(value) => value,
                        Err(e) => {
                            debug!(error = %e, "ChatBackend::run: skipping unparseable chunk");
                            continue;
                        }
                    };

                    if let Some(delta) = chunk["choices"][0]["delta"]["content"].as_str() {
                        content.push_str(delta);
                        if let Some(tx) = status {
                            let _ = tx.send(StatusUpdate::line(delta));
                        }
                    }

                    // Usage typically rides the final chunk
                    if usage.is_none() && chunk.get("usage").map(|u| !u.is_null()).unwrap_or(false) {
                        usage = serde_json::from_value(chunk["usage"].clone()).ok();
                    }
                }
                Some(Err(reqwest_eventsource::Error::StreamEnded)) => break,
                Some(Err(reqwest_eventsource::Error::InvalidStatusCode(code, response))) => {
                    let message = response.text().await.unwrap_or_default();
                    source.close();
                    return Err(BackendError::Api {
                        status: code.as_u16(),
                        message,
                    });
                }
                Some(Err(e)) => {
                    warn!(error = %e, "ChatBackend::run: stream error");
                    source.close();
                    return Err(BackendError::Stream(e.to_string()));
                }
                None => break,
            }
        }

        Ok(BackendResponse { content, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_backend() -> ChatBackend {
        ChatBackend {
            kind: "ollama",
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: "ollama".to_string(),
            model: "test-model".to_string(),
            headers: vec![],
            timeout: Duration::from_secs(600),
            http: reqwest::Client::new(),
        }
    }

    #[test]
    fn test_request_body_shape() {
        let backend = test_backend();
        let body = backend.request_body("do the thing");

        assert_eq!(body["model"], "test-model");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "do the thing");
    }

    #[test]
    fn test_ollama_base_url_default() {
        let config = Config::default();
        let backend = ChatBackend::ollama(&config);
        assert!(backend.base_url.contains("11434"));
        assert_eq!(backend.api_key, "ollama");
    }

    #[test]
    fn test_delta_extraction() {
        let chunk: serde_json::Value = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"hello"}}]}"#,
        )
        .unwrap();
        assert_eq!(chunk["choices"][0]["delta"]["content"].as_str(), Some("hello"));
    }
}

//! Backend runner
//!
//! A backend turns a prompt into text. Four variants share one trait:
//! CLI subprocesses (gemini, cursor), streaming chat APIs (openrouter,
//! ollama), and a first-class mock for tests and verification runs.

mod chat;
mod error;
mod mock;
mod process;

pub use chat::ChatBackend;
pub use error::BackendError;
pub use mock::MockBackend;
pub use process::{ProcessBackend, filtered_env};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::control::StatusSender;

/// Token accounting reported by chat backends
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Result of one backend invocation
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

impl BackendResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }
}

/// A pluggable LLM backend
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend tag (matches the config value)
    fn kind(&self) -> &'static str;

    /// Run one session: prompt in, response text out.
    ///
    /// `status` receives streaming progress lines while the backend works.
    async fn run(
        &self,
        prompt: &str,
        cwd: &Path,
        status: Option<&StatusSender>,
    ) -> Result<BackendResponse, BackendError>;
}

/// Create a backend from configuration.
pub fn create_backend(config: &Config) -> Result<Arc<dyn Backend>, BackendError> {
    debug!(backend = %config.backend, model = ?config.model, "create_backend: called");
    match config.backend.as_str() {
        "gemini" => Ok(Arc::new(ProcessBackend::gemini(config))),
        "cursor" => Ok(Arc::new(ProcessBackend::cursor(config))),
        "openrouter" => Ok(Arc::new(ChatBackend::openrouter(config)?)),
        "ollama" => Ok(Arc::new(ChatBackend::ollama(config))),
        "mock" => Ok(Arc::new(MockBackend::canned())),
        other => Err(BackendError::UnknownBackend(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_backend_known_tags() {
        let mut config = Config::default();

        config.backend = "gemini".to_string();
        assert_eq!(create_backend(&config).unwrap().kind(), "gemini");

        config.backend = "cursor".to_string();
        assert_eq!(create_backend(&config).unwrap().kind(), "cursor");

        config.backend = "ollama".to_string();
        assert_eq!(create_backend(&config).unwrap().kind(), "ollama");

        config.backend = "mock".to_string();
        assert_eq!(create_backend(&config).unwrap().kind(), "mock");
    }

    #[test]
    fn test_create_backend_unknown_tag() {
        let mut config = Config::default();
        config.backend = "hal9000".to_string();
        assert!(matches!(
            create_backend(&config),
            Err(BackendError::UnknownBackend(_))
        ));
    }

    #[test]
    fn test_usage_parse() {
        let usage: TokenUsage = serde_json::from_value(serde_json::json!({
            "prompt_tokens": 10,
            "completion_tokens": 20,
            "total_tokens": 30
        }))
        .unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.total_tokens, 30);
    }
}

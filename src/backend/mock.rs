//! Mock backend
//!
//! A first-class variant, not a flag inside the real ones: tests and
//! verification runs script it with canned responses.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::control::StatusSender;

use super::{Backend, BackendError, BackendResponse};

/// Scripted backend returning canned responses in order
pub struct MockBackend {
    script: Mutex<VecDeque<String>>,
    /// Returned once the script runs dry; None makes exhaustion an error
    fallback: Option<String>,
    calls: AtomicUsize,
}

impl MockBackend {
    /// Scripted responses, then empty responses forever
    pub fn new(script: Vec<String>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Some(String::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Scripted responses; exhaustion is an error
    pub fn strict(script: Vec<String>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Repeat one response forever
    pub fn repeating(response: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(response.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// The verification-mode response: one write block producing a file
    pub fn canned() -> Self {
        let body = serde_json::json!({
            "London": 45.0,
            "New York": 25.0,
            "Paris": 30.0,
            "Tokyo": 100.0,
        });
        Self::repeating(format!(
            "I will create the output.json file.\n```write:output.json\n{}\n```",
            serde_json::to_string_pretty(&body).expect("static json")
        ))
    }

    /// Number of completed backend invocations
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn kind(&self) -> &'static str {
        "mock"
    }

    async fn run(
        &self,
        _prompt: &str,
        _cwd: &Path,
        _status: Option<&StatusSender>,
    ) -> Result<BackendResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let next = self.script.lock().expect("script lock").pop_front();
        match next {
            Some(content) => {
                debug!("MockBackend::run: returning scripted response");
                Ok(BackendResponse::text(content))
            }
            None => match &self.fallback {
                Some(content) => Ok(BackendResponse::text(content.clone())),
                None => Err(BackendError::ScriptExhausted),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_script_order() {
        let temp = tempdir().unwrap();
        let mock = MockBackend::new(vec!["first".to_string(), "second".to_string()]);

        assert_eq!(mock.run("p", temp.path(), None).await.unwrap().content, "first");
        assert_eq!(mock.run("p", temp.path(), None).await.unwrap().content, "second");
        assert_eq!(mock.run("p", temp.path(), None).await.unwrap().content, "");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_strict_exhaustion() {
        let temp = tempdir().unwrap();
        let mock = MockBackend::strict(vec!["only".to_string()]);

        assert!(mock.run("p", temp.path(), None).await.is_ok());
        assert!(matches!(
            mock.run("p", temp.path(), None).await,
            Err(BackendError::ScriptExhausted)
        ));
    }

    #[tokio::test]
    async fn test_repeating() {
        let temp = tempdir().unwrap();
        let mock = MockBackend::repeating("same");

        for _ in 0..3 {
            assert_eq!(mock.run("p", temp.path(), None).await.unwrap().content, "same");
        }
    }

    #[tokio::test]
    async fn test_canned_contains_write_block() {
        let temp = tempdir().unwrap();
        let mock = MockBackend::canned();
        let response = mock.run("p", temp.path(), None).await.unwrap();
        assert!(response.content.contains("```write:output.json"));
    }
}

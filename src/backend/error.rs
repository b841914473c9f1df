//! Backend error types

use std::time::Duration;
use thiserror::Error;

/// Errors from backend invocations
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend binary not found: {0}")]
    MissingBinary(String),

    #[error("API key not set: {0}")]
    MissingApiKey(String),

    #[error("Unknown backend: '{0}'. Supported: gemini, cursor, openrouter, ollama, mock")]
    UnknownBackend(String),

    #[error("Backend timed out after {0:?} with no output or file activity")]
    Timeout(Duration),

    #[error("Backend exited with code {code}: {stderr}")]
    ExitFailure { code: i32, stderr: String },

    #[error("Backend received SIGTERM (exit 143). This may be due to OOM or external termination. {health}")]
    Terminated { health: String },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mock backend script exhausted")]
    ScriptExhausted,
}

impl BackendError {
    /// Fatal errors terminate the session instead of retrying next iteration
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingBinary(_) | Self::MissingApiKey(_) | Self::UnknownBackend(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(BackendError::MissingBinary("gemini".into()).is_fatal());
        assert!(BackendError::MissingApiKey("OPENROUTER_API_KEY".into()).is_fatal());
        assert!(BackendError::UnknownBackend("x".into()).is_fatal());

        assert!(!BackendError::Timeout(Duration::from_secs(600)).is_fatal());
        assert!(
            !BackendError::ExitFailure {
                code: 1,
                stderr: String::new()
            }
            .is_fatal()
        );
        assert!(
            !BackendError::Terminated {
                health: String::new()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_terminated_carries_health() {
        let err = BackendError::Terminated {
            health: "[System Health] MemAvailable: 1024 kB".to_string(),
        };
        assert!(err.to_string().contains("MemAvailable"));
        assert!(err.to_string().contains("143"));
    }
}

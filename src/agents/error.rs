//! Error types for pluggable pipeline agents.
//!
//! Each stage has its own failure variant so the coordinator can record
//! precisely what went wrong without inspecting message text.

use thiserror::Error;

/// Errors that can occur during agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Image preprocessing failed.
    #[error("Preprocessing failed: {0}")]
    Preprocessing(String),

    /// A single extraction agent failed.
    #[error("Extraction by '{agent}' failed: {reason}")]
    Extraction { agent: String, reason: String },

    /// Token validation rejected the input.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Output generation failed.
    #[error("Generation failed: {0}")]
    Generation(String),

    /// A backing service (model endpoint, OCR engine) is unreachable.
    #[error("Dependency unavailable: {0}")]
    Unavailable(String),

    /// The agent gave up on its own internal deadline.
    #[error("Agent operation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Agent was constructed with invalid settings.
    #[error("Agent configuration error: {0}")]
    ConfigurationError(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Convenience constructor for extraction failures.
    pub fn extraction(agent: impl Into<String>, reason: impl Into<String>) -> Self {
        AgentError::Extraction {
            agent: agent.into(),
            reason: reason.into(),
        }
    }

    /// Returns true when repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Unavailable(_) | AgentError::Timeout { .. } | AgentError::Io(_)
        )
    }
}

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_display() {
        let err = AgentError::extraction("vision", "model returned no palette");
        assert_eq!(
            err.to_string(),
            "Extraction by 'vision' failed: model returned no palette"
        );

        let err = AgentError::Timeout { seconds: 30 };
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AgentError::Unavailable("ocr".into()).is_retryable());
        assert!(AgentError::Timeout { seconds: 1 }.is_retryable());
        assert!(!AgentError::Validation("bad".into()).is_retryable());
        assert!(!AgentError::extraction("a", "b").is_retryable());
    }

    #[test]
    fn test_from_json_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: AgentError = parse_err.into();
        assert!(matches!(err, AgentError::Json(_)));
    }
}

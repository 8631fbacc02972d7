use thiserror::Error;

use turnstile_core::EngineError;

/// Errors from a model backend, classified for the engine's retry policy.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("network error: {0}")]
    Network(String),

    #[error("model request timed out")]
    Timeout,

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("malformed backend response: {0}")]
    Malformed(String),
}

impl ModelError {
    /// Retryable errors are absorbed up to `max_retries_per_step`; the rest
    /// fail the turn immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModelError::Network(_) | ModelError::Timeout | ModelError::EmptyResponse
        )
    }
}

impl From<ModelError> for EngineError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::UnsupportedModel(model) => EngineError::UnsupportedModel(model),
            other => EngineError::LlmService(other.to_string()),
        }
    }
}

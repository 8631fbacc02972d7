use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for the Turnstile engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a turn is already in progress for this session")]
    TurnAlreadyInProgress,

    #[error("no turn is in progress")]
    NoTurnInProgress,

    #[error("no LLM provider is configured")]
    LlmNotConfigured,

    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("LLM service error: {0}")]
    LlmService(String),

    #[error("model call failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("tool name conflict: '{0}' is already registered")]
    ToolNameConflict(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Stable error codes surfaced at the protocol boundary.
///
/// Domain codes only; transport-level errors (malformed JSON, unknown
/// method, bad params) are reported separately by the protocol server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    TurnAlreadyInProgress,
    NoTurnInProgress,
    LlmNotConfigured,
    UnsupportedModel,
    LlmServiceError,
    InternalError,
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::TurnAlreadyInProgress => ErrorCode::TurnAlreadyInProgress,
            EngineError::NoTurnInProgress => ErrorCode::NoTurnInProgress,
            EngineError::LlmNotConfigured => ErrorCode::LlmNotConfigured,
            EngineError::UnsupportedModel(_) => ErrorCode::UnsupportedModel,
            EngineError::LlmService(_) | EngineError::RetriesExhausted { .. } => {
                ErrorCode::LlmServiceError
            }
            _ => ErrorCode::InternalError,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "{}", s)
    }
}

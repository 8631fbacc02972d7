//! Wire frames: one JSON object per line, both directions.
//!
//! Client frames are either requests (`initialize`, `prompt`, `cancel`) or
//! responses to server-initiated requests (approvals, peer tool calls).
//! Server frames are request responses, engine event notifications, and
//! server-initiated requests. Request ids are per-connection counters, one
//! namespace per direction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use turnstile_core::{
    ApprovalRequest, Capability, ContentPart, EngineError, EngineEvent, TurnStatus,
};

// Transport-level error codes, distinct from the engine's domain codes.
pub const PARSE_ERROR: &str = "parse-error";
pub const UNKNOWN_METHOD: &str = "unknown-method";
pub const INVALID_PARAMS: &str = "invalid-params";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

impl WireError {
    pub fn transport(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn domain(err: &EngineError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// `initialize` parameters. Everything is optional; an absent `initialize`
/// is equivalent to an empty one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(default)]
    pub client_name: Option<String>,
    /// Tools the peer implements; invoking one round-trips through a
    /// `tool_call_request`.
    #[serde(default)]
    pub external_tools: Vec<ExternalToolDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalToolDecl {
    pub name: String,
    pub description: String,
    pub schema: Value,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptParams {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub parts: Option<Vec<ContentPart>>,
}

impl PromptParams {
    /// The input content, preferring structured parts over plain text.
    pub fn into_parts(self) -> Option<Vec<ContentPart>> {
        match (self.parts, self.text) {
            (Some(parts), _) if !parts.is_empty() => Some(parts),
            (_, Some(text)) => Some(vec![ContentPart::text(text)]),
            _ => None,
        }
    }
}

/// Resolution of a long-lived `prompt` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResult {
    pub status: TurnStatus,
    pub steps: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    pub server: String,
    pub version: String,
    /// All registered tool names, peer tools included.
    pub tools: Vec<String>,
}

/// Server → client frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Reply to a client request. `id` is absent only for parse errors,
    /// where the offending frame's id is unknowable.
    Response {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
    /// Engine event notification; no response expected.
    Event { event: EngineEvent },
    /// Server-initiated request; the client must answer with a `response`
    /// frame carrying the same id.
    Request {
        id: u64,
        #[serde(flatten)]
        request: ServerRequest,
    },
}

impl ServerFrame {
    pub fn ok(id: u64, result: impl Serialize) -> Self {
        ServerFrame::Response {
            id: Some(id),
            result: serde_json::to_value(result).ok(),
            error: None,
        }
    }

    pub fn fail(id: Option<u64>, error: WireError) -> Self {
        ServerFrame::Response {
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum ServerRequest {
    ApprovalRequest(ApprovalRequest),
    /// Invocation of a peer-implemented external tool. The frame id is the
    /// correlation handle for the client's response.
    ToolCallRequest { tool: String, arguments: Value },
}

/// The payload of a client `response` frame answering an approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalAnswer {
    pub response: turnstile_core::ApprovalChoice,
}

/// The payload of a client `response` frame answering a tool call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallAnswer {
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

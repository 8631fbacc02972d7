use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a human (or policy) resolved an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalChoice {
    Approve,
    /// Approve and install a standing grant for (tool, resource signature),
    /// consulted by all later matching calls in the session.
    ApproveForSession,
    Reject,
}

/// Raised when a side-effecting tool call needs human confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    /// The tool call this request gates.
    pub call_id: String,
    pub tool: String,
    /// Human-readable description of the proposed action.
    pub description: String,
    /// Normalized resource signature used for session grants.
    pub resource: String,
}

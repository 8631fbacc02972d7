use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The class of side effect a tool performs.
///
/// Closed set: the approval gate only ever reasons about these tags. A tool
/// declaring none of them never triggers an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    MutatesFilesystem,
    RunsProcess,
    Network,
}

/// A capability the model can invoke dynamically.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name of the tool (e.g., "file_read").
    fn name(&self) -> &str;

    /// Description for the model-facing declaration.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters. Used both for the model-facing
    /// declaration and for validating arguments before execution.
    fn schema(&self) -> Value;

    /// Side-effect tags consumed by the approval gate.
    fn capabilities(&self) -> &[Capability] {
        &[]
    }

    /// Maximum execution duration. Exceeding it fails this call only.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Normalized resource signature for session-scoped approval grants.
    /// The default grants the whole tool.
    fn resource_signature(&self, _args: &Value) -> String {
        "*".to_string()
    }

    /// Execute the tool with the given arguments.
    async fn invoke(&self, args: Value) -> anyhow::Result<String>;
}

/// Model-facing tool declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

impl ToolDeclaration {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            schema: tool.schema(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_wire_format() {
        assert_eq!(
            serde_json::to_string(&Capability::MutatesFilesystem).unwrap(),
            "\"mutates-filesystem\""
        );
        assert_eq!(
            serde_json::to_string(&Capability::RunsProcess).unwrap(),
            "\"runs-process\""
        );
    }
}

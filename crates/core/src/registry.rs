use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::EngineError;
use crate::tool::{Tool, ToolDeclaration};

/// Name → implementation map for all tools visible to a session: built-ins,
/// dynamically defined, and remote (MCP) tools alike.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Fails if the name collides with an existing entry.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), EngineError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(EngineError::ToolNameConflict(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn schema_for(&self, name: &str) -> Option<Value> {
        self.tools.get(name).map(|t| t.schema())
    }

    /// Declarations for the model-facing tool list, sorted by name so the
    /// prompt is stable across runs.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut decls: Vec<ToolDeclaration> =
            self.tools.values().map(|t| ToolDeclaration::of(t.as_ref())).collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Validate arguments against the tool's schema before execution.
    ///
    /// Checks that args are an object and that every `required` property is
    /// present; full JSON Schema validation is the backend's concern.
    pub fn validate_args(&self, name: &str, args: &Value) -> Result<(), String> {
        let schema = self
            .schema_for(name)
            .ok_or_else(|| format!("unknown tool '{name}'"))?;
        let obj = match args {
            Value::Object(map) => map,
            Value::Null => {
                return match schema.get("required").and_then(Value::as_array) {
                    Some(req) if !req.is_empty() => {
                        Err(format!("tool '{name}' requires arguments"))
                    }
                    _ => Ok(()),
                };
            }
            other => return Err(format!("arguments must be an object, got {other}")),
        };
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(key) {
                    return Err(format!("missing required argument '{key}'"));
                }
            }
        }
        Ok(())
    }
}

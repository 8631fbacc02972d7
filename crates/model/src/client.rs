use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use turnstile_core::{ContentPart, Message, TokenUsage, ToolCallRecord, ToolDeclaration};

use crate::error::ModelError;

/// One request to a model backend: full context plus tool declarations.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDeclaration>,
    pub thinking_enabled: bool,
    pub max_tokens: Option<u32>,
}

/// An incremental fragment from the model stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelDelta {
    Text(String),
    Thinking(String),
    ToolCallStart { id: String, name: String },
    /// Raw argument text; accumulated and parsed once the stream completes.
    ToolCallDelta { id: String, fragment: String },
    Usage(TokenUsage),
}

/// A complete assistant message assembled from the stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub parts: Vec<ContentPart>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub usage: TokenUsage,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ContentPart::text(text)],
            ..Default::default()
        }
    }
}

/// Uniform streaming interface over heterogeneous LLM backends.
///
/// Implementations push deltas into `sink` as they arrive and return the
/// assembled completion. Cancellation is dropping the future; backends must
/// not hold resources beyond it.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &str;

    async fn stream(
        &self,
        request: &ModelRequest,
        sink: mpsc::Sender<ModelDelta>,
    ) -> Result<Completion, ModelError>;
}

/// Accumulates streamed deltas into a [`Completion`].
///
/// Tool-call arguments arrive as raw text fragments keyed by call id and are
/// parsed exactly once, in `finish`. Unparseable argument text is preserved
/// as a JSON string so downstream validation can report it.
#[derive(Debug, Default)]
pub struct CompletionBuilder {
    parts: Vec<ContentPart>,
    calls: Vec<(String, String, String)>, // (id, name, raw arguments)
    usage: TokenUsage,
}

impl CompletionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &ModelDelta) {
        match delta {
            ModelDelta::Text(text) => match self.parts.last_mut() {
                Some(ContentPart::Text { text: prev }) => prev.push_str(text),
                _ => self.parts.push(ContentPart::text(text.clone())),
            },
            ModelDelta::Thinking(text) => match self.parts.last_mut() {
                Some(ContentPart::Thinking { text: prev }) => prev.push_str(text),
                _ => self.parts.push(ContentPart::Thinking { text: text.clone() }),
            },
            ModelDelta::ToolCallStart { id, name } => {
                self.calls.push((id.clone(), name.clone(), String::new()));
            }
            ModelDelta::ToolCallDelta { id, fragment } => {
                if let Some((_, _, raw)) = self.calls.iter_mut().find(|(cid, _, _)| cid == id) {
                    raw.push_str(fragment);
                }
            }
            ModelDelta::Usage(usage) => self.usage = *usage,
        }
    }

    pub fn finish(self) -> Completion {
        let tool_calls = self
            .calls
            .into_iter()
            .map(|(id, name, raw)| {
                let arguments = if raw.trim().is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
                };
                ToolCallRecord { id, name, arguments }
            })
            .collect();
        Completion {
            parts: self.parts,
            tool_calls,
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_coalesces_text() {
        let mut builder = CompletionBuilder::new();
        builder.push(&ModelDelta::Text("Hel".into()));
        builder.push(&ModelDelta::Text("lo".into()));
        let completion = builder.finish();
        assert_eq!(completion.parts, vec![ContentPart::text("Hello")]);
    }

    #[test]
    fn test_builder_parses_arguments_once_complete() {
        let mut builder = CompletionBuilder::new();
        builder.push(&ModelDelta::ToolCallStart {
            id: "call_1".into(),
            name: "file_read".into(),
        });
        builder.push(&ModelDelta::ToolCallDelta {
            id: "call_1".into(),
            fragment: r#"{"path":"#.into(),
        });
        builder.push(&ModelDelta::ToolCallDelta {
            id: "call_1".into(),
            fragment: r#" "a.txt"}"#.into(),
        });
        let completion = builder.finish();
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(
            completion.tool_calls[0].arguments,
            serde_json::json!({"path": "a.txt"})
        );
    }

    #[test]
    fn test_builder_keeps_unparseable_arguments_as_string() {
        let mut builder = CompletionBuilder::new();
        builder.push(&ModelDelta::ToolCallStart {
            id: "call_1".into(),
            name: "shell_execute".into(),
        });
        builder.push(&ModelDelta::ToolCallDelta {
            id: "call_1".into(),
            fragment: "{not json".into(),
        });
        let completion = builder.finish();
        assert_eq!(
            completion.tool_calls[0].arguments,
            Value::String("{not json".into())
        );
    }

    #[test]
    fn test_builder_separates_thinking_from_text() {
        let mut builder = CompletionBuilder::new();
        builder.push(&ModelDelta::Thinking("hmm".into()));
        builder.push(&ModelDelta::Text("answer".into()));
        let completion = builder.finish();
        assert_eq!(completion.parts.len(), 2);
        assert!(matches!(completion.parts[0], ContentPart::Thinking { .. }));
    }
}

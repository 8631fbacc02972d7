use serde::{Deserialize, Serialize};

/// A single piece of model-visible content within a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Thinking { text: String },
    /// Base64-encoded media payload with its MIME type.
    Media { mime: String, data: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// The textual content of this part, empty for media.
    pub fn as_text(&self) -> &str {
        match self {
            ContentPart::Text { text } | ContentPart::Thinking { text } => text,
            ContentPart::Media { .. } => "",
        }
    }
}

/// A tool invocation proposed by the model, as recorded in the ledger.
///
/// Arguments are streamed as raw text fragments and parsed once complete;
/// the record keeps the parsed form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Unique within the turn; assigned by the model backend.
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The outcome of one tool invocation, fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, tool: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            tool: tool.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            tool: tool.into(),
            content: message.into(),
            is_error: true,
        }
    }
}

/// One entry in the context ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        parts: Vec<ContentPart>,
    },
    Assistant {
        parts: Vec<ContentPart>,
        #[serde(default)]
        tool_calls: Vec<ToolCallRecord>,
    },
    Tool {
        results: Vec<ToolResult>,
    },
    /// Produced by compaction: stands in for `replaced` earlier messages.
    Summary {
        text: String,
        replaced: usize,
    },
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User {
            parts: vec![ContentPart::text(text)],
        }
    }

    /// Concatenated text content, used for token estimation and summaries.
    pub fn text(&self) -> String {
        match self {
            Message::User { parts } | Message::Assistant { parts, .. } => parts
                .iter()
                .map(ContentPart::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
            Message::Tool { results } => results
                .iter()
                .map(|r| r.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            Message::Summary { text, .. } => text.clone(),
        }
    }
}

/// Token accounting reported by a model backend, when available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

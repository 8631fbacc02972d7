//! OpenAI-compatible chat-completions backend with SSE streaming.
//!
//! Works against any endpoint speaking the `/chat/completions` wire shape
//! (OpenAI, OpenRouter, vLLM, Ollama's compat layer). Tool-call argument
//! fragments are forwarded raw and parsed by the completion builder.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use turnstile_core::{Message, TokenUsage};

use crate::client::{Completion, CompletionBuilder, ModelClient, ModelDelta, ModelRequest};
use crate::error::ModelError;

pub struct OpenAiCompatClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiCompatClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn wire_messages(request: &ModelRequest) -> Vec<Value> {
        let mut out = Vec::new();
        if !request.system_prompt.is_empty() {
            out.push(serde_json::json!({
                "role": "system",
                "content": request.system_prompt,
            }));
        }
        for msg in &request.messages {
            match msg {
                Message::User { .. } => out.push(serde_json::json!({
                    "role": "user",
                    "content": msg.text(),
                })),
                Message::Summary { text, .. } => out.push(serde_json::json!({
                    "role": "user",
                    "content": format!("[Conversation summary]\n{text}"),
                })),
                Message::Assistant { parts: _, tool_calls } => {
                    let mut entry = serde_json::json!({
                        "role": "assistant",
                        "content": msg.text(),
                    });
                    if !tool_calls.is_empty() {
                        let calls: Vec<Value> = tool_calls
                            .iter()
                            .map(|c| {
                                serde_json::json!({
                                    "id": c.id,
                                    "type": "function",
                                    "function": {
                                        "name": c.name,
                                        "arguments": c.arguments.to_string(),
                                    }
                                })
                            })
                            .collect();
                        entry["tool_calls"] = Value::Array(calls);
                    }
                    out.push(entry);
                }
                Message::Tool { results } => {
                    for result in results {
                        out.push(serde_json::json!({
                            "role": "tool",
                            "tool_call_id": result.call_id,
                            "content": result.content,
                        }));
                    }
                }
            }
        }
        out
    }

    fn wire_tools(request: &ModelRequest) -> Option<Vec<Value>> {
        if request.tools.is_empty() {
            return None;
        }
        Some(
            request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.schema,
                        }
                    })
                })
                .collect(),
        )
    }

    fn classify_status(status: StatusCode, body: String, model: &str) -> ModelError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ModelError::Auth(body),
            StatusCode::NOT_FOUND => ModelError::UnsupportedModel(model.to_string()),
            StatusCode::TOO_MANY_REQUESTS => ModelError::Quota(body),
            s if s.is_server_error() => ModelError::Network(format!("{s}: {body}")),
            s => ModelError::Malformed(format!("{s}: {body}")),
        }
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    stream: bool,
    stream_options: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: WireDelta,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    content: Option<String>,
    /// Emitted by reasoning-capable compat backends.
    reasoning: Option<String>,
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Deserialize)]
struct WireToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<WireFunctionDelta>,
}

#[derive(Deserialize)]
struct WireFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    prompt_tokens_details: Option<WirePromptDetails>,
}

#[derive(Deserialize)]
struct WirePromptDetails {
    cached_tokens: Option<u64>,
}

impl From<WireUsage> for TokenUsage {
    fn from(u: WireUsage) -> Self {
        TokenUsage {
            input_tokens: u.prompt_tokens.unwrap_or(0),
            output_tokens: u.completion_tokens.unwrap_or(0),
            cached_tokens: u
                .prompt_tokens_details
                .and_then(|d| d.cached_tokens)
                .unwrap_or(0),
        }
    }
}

/// Translate one SSE chunk into deltas, threading the index→id map that
/// later argument fragments rely on (the wire omits the id after the first
/// fragment of each call).
fn chunk_deltas(chunk: StreamChunk, ids_by_index: &mut HashMap<usize, String>) -> Vec<ModelDelta> {
    let mut deltas = Vec::new();
    if let Some(usage) = chunk.usage {
        deltas.push(ModelDelta::Usage(usage.into()));
    }
    for choice in chunk.choices {
        if let Some(text) = choice.delta.reasoning {
            if !text.is_empty() {
                deltas.push(ModelDelta::Thinking(text));
            }
        }
        if let Some(text) = choice.delta.content {
            if !text.is_empty() {
                deltas.push(ModelDelta::Text(text));
            }
        }
        for call in choice.delta.tool_calls.unwrap_or_default() {
            if let Some(id) = call.id {
                let name = call
                    .function
                    .as_ref()
                    .and_then(|f| f.name.clone())
                    .unwrap_or_default();
                ids_by_index.insert(call.index, id.clone());
                deltas.push(ModelDelta::ToolCallStart { id: id.clone(), name });
                if let Some(fragment) = call.function.and_then(|f| f.arguments) {
                    if !fragment.is_empty() {
                        deltas.push(ModelDelta::ToolCallDelta { id, fragment });
                    }
                }
            } else if let Some(fragment) = call.function.and_then(|f| f.arguments) {
                if let Some(id) = ids_by_index.get(&call.index) {
                    if !fragment.is_empty() {
                        deltas.push(ModelDelta::ToolCallDelta {
                            id: id.clone(),
                            fragment,
                        });
                    }
                }
            }
        }
    }
    deltas
}

/// Splits raw network chunks into complete lines. Bytes of a UTF-8
/// character split across chunk boundaries stay buffered until their line
/// terminates, so decoding never sees a partial code point.
#[derive(Default)]
struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.bytes.iter().position(|&b| b == b'\n')?;
        let line = String::from_utf8_lossy(&self.bytes[..pos]).into_owned();
        self.bytes.drain(..=pos);
        Some(line)
    }
}

/// Extract the payload of one `data:` SSE line, if present.
fn sse_data(line: &str) -> Option<&str> {
    let line = line.trim();
    line.strip_prefix("data:").map(str::trim)
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn stream(
        &self,
        request: &ModelRequest,
        sink: mpsc::Sender<ModelDelta>,
    ) -> Result<Completion, ModelError> {
        let body = WireRequest {
            model: &request.model,
            messages: Self::wire_messages(request),
            stream: true,
            stream_options: serde_json::json!({"include_usage": true}),
            tools: Self::wire_tools(request),
            max_tokens: request.max_tokens,
        };

        debug!(model = %request.model, messages = body.messages.len(), "streaming chat completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout
                } else {
                    ModelError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body, &request.model));
        }

        let mut builder = CompletionBuilder::new();
        let mut ids_by_index = HashMap::new();
        let mut stream = response.bytes_stream();
        let mut buffer = LineBuffer::default();
        let mut done = false;

        'outer: while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout
                } else {
                    ModelError::Network(e.to_string())
                }
            })?;
            buffer.extend(&bytes);

            while let Some(line) = buffer.next_line() {
                let Some(data) = sse_data(&line) else { continue };
                if data == "[DONE]" {
                    done = true;
                    break 'outer;
                }
                let chunk: StreamChunk = serde_json::from_str(data)
                    .map_err(|e| ModelError::Malformed(format!("{e}: {data}")))?;
                for delta in chunk_deltas(chunk, &mut ids_by_index) {
                    builder.push(&delta);
                    // A closed sink means the consumer went away; keep
                    // assembling so the completion is still usable.
                    let _ = sink.send(delta).await;
                }
            }
        }

        if !done {
            debug!("stream ended without [DONE] marker");
        }

        let completion = builder.finish();
        if completion.parts.is_empty() && completion.tool_calls.is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(completion)
    }
}

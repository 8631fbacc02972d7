//! Scripted mock backend for engine and protocol tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use turnstile_core::{ContentPart, TokenUsage, ToolCallRecord};

use crate::client::{Completion, ModelClient, ModelDelta, ModelRequest};
use crate::error::ModelError;

/// One scripted model round-trip.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Completion(Completion),
    Error(ModelError),
    /// Never resolves; exercises cancellation mid-stream.
    Hang,
}

/// A model client that replays a script of outcomes in order.
///
/// When the script runs dry the last outcome repeats, so "always fails" and
/// "always requests a tool" scenarios need a single entry.
pub struct MockModel {
    script: Mutex<VecDeque<MockOutcome>>,
    last: Mutex<Option<MockOutcome>>,
    calls: AtomicUsize,
}

impl MockModel {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(self, outcome: MockOutcome) -> Self {
        self.script.lock().unwrap().push_back(outcome);
        self
    }

    pub fn push_text(self, text: impl Into<String>) -> Self {
        self.push(MockOutcome::Completion(Completion::text(text)))
    }

    /// A completion containing a single tool call and no text.
    pub fn push_tool_call(self, id: &str, name: &str, arguments: Value) -> Self {
        self.push(MockOutcome::Completion(Completion {
            parts: vec![],
            tool_calls: vec![ToolCallRecord {
                id: id.to_string(),
                name: name.to_string(),
                arguments,
            }],
            usage: TokenUsage::default(),
        }))
    }

    pub fn push_tool_calls(self, calls: Vec<ToolCallRecord>) -> Self {
        self.push(MockOutcome::Completion(Completion {
            parts: vec![],
            tool_calls: calls,
            usage: TokenUsage::default(),
        }))
    }

    pub fn push_error(self, error: ModelError) -> Self {
        self.push(MockOutcome::Error(error))
    }

    /// How many times `stream` has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> MockOutcome {
        let mut script = self.script.lock().unwrap();
        match script.pop_front() {
            Some(outcome) => {
                *self.last.lock().unwrap() = Some(outcome.clone());
                outcome
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(MockOutcome::Error(ModelError::EmptyResponse)),
        }
    }
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelClient for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(
        &self,
        _request: &ModelRequest,
        sink: mpsc::Sender<ModelDelta>,
    ) -> Result<Completion, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_outcome() {
            MockOutcome::Completion(completion) => {
                for part in &completion.parts {
                    let delta = match part {
                        ContentPart::Text { text } => ModelDelta::Text(text.clone()),
                        ContentPart::Thinking { text } => ModelDelta::Thinking(text.clone()),
                        ContentPart::Media { .. } => continue,
                    };
                    let _ = sink.send(delta).await;
                }
                for call in &completion.tool_calls {
                    let _ = sink
                        .send(ModelDelta::ToolCallStart {
                            id: call.id.clone(),
                            name: call.name.clone(),
                        })
                        .await;
                    let _ = sink
                        .send(ModelDelta::ToolCallDelta {
                            id: call.id.clone(),
                            fragment: call.arguments.to_string(),
                        })
                        .await;
                }
                if !completion.usage.is_empty() {
                    let _ = sink.send(ModelDelta::Usage(completion.usage)).await;
                }
                Ok(completion)
            }
            MockOutcome::Error(error) => Err(error),
            MockOutcome::Hang => {
                futures::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
        }
    }
}

//! Delegated sub-agent turns.
//!
//! The `delegate` tool is declared to the model like any other, but the turn
//! engine intercepts it before registry dispatch: the call becomes a child
//! turn with a fresh ledger, the same approval gate, and a cancellation token
//! derived from the parent's. Child events reach the parent's consumer
//! wrapped in `subagent` frames keyed by the delegation call id.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use turnstile_core::{
    Capability, ContentPart, EngineError, EngineEvent, Tool, ToolCallRecord, ToolCallState,
    ToolResult, TurnRecord, TurnStatus,
};

use crate::turn::{EngineShared, TurnEngine};

pub const DELEGATE_TOOL: &str = "delegate";

/// Declaration-only tool: gives the model the `delegate` schema. Execution
/// never reaches `invoke`; the engine dispatches delegation itself.
pub struct DelegateTool;

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        DELEGATE_TOOL
    }

    fn description(&self) -> &str {
        "Delegate a self-contained task to a sub-agent that works in a fresh \
         context and reports back only its final answer. Use it for research \
         or multi-file work whose intermediate output would crowd your context."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Complete, self-contained task description. The sub-agent sees nothing else."
                },
                "profile": {
                    "type": "string",
                    "description": "Optional role the sub-agent should adopt (e.g. 'reviewer')."
                }
            },
            "required": ["task"]
        })
    }

    fn capabilities(&self) -> &[Capability] {
        // Side effects belong to the tools the child invokes, each gated
        // individually; delegation itself needs no approval.
        &[]
    }

    async fn invoke(&self, _args: Value) -> anyhow::Result<String> {
        anyhow::bail!("delegation is dispatched by the turn engine")
    }
}

impl TurnEngine {
    /// Indirection through a boxed future so a child turn can itself
    /// delegate without making the step-loop future type recursive.
    fn run_once_boxed(
        mut self,
        input: Vec<ContentPart>,
    ) -> BoxFuture<'static, Result<TurnRecord, EngineError>> {
        Box::pin(async move { self.run_once(input).await })
    }

    /// Run one delegation call to completion. Returns `None` only when the
    /// parent turn was cancelled (which cancels the child via its token).
    pub(crate) async fn run_delegation(&self, call: &ToolCallRecord) -> Option<ToolResult> {
        if self.depth >= self.shared.config.max_subagent_depth {
            return Some(
                self.fail_call(
                    call,
                    format!(
                        "delegation depth limit ({}) reached",
                        self.shared.config.max_subagent_depth
                    ),
                )
                .await,
            );
        }
        let Some(task) = call.arguments.get("task").and_then(Value::as_str) else {
            return Some(
                self.fail_call(call, "missing required argument 'task'".to_string())
                    .await,
            );
        };

        self.emit(EngineEvent::ToolCall {
            id: call.id.clone(),
            tool: call.name.clone(),
            state: ToolCallState::Executing,
        })
        .await;

        let shared = match call.arguments.get("profile").and_then(Value::as_str) {
            Some(profile) => Arc::new(EngineShared {
                session_id: self.shared.session_id,
                model: self.shared.model.clone(),
                model_name: self.shared.model_name.clone(),
                system_prompt: format!(
                    "{}\n\nFor this task you act as: {profile}.",
                    self.shared.system_prompt
                ),
                registry: self.shared.registry.clone(),
                gate: self.shared.gate.clone(),
                config: self.shared.config.clone(),
                store: self.shared.store.clone(),
            }),
            None => self.shared.clone(),
        };

        debug!(call_id = %call.id, depth = self.depth + 1, "starting delegated turn");
        let (child_tx, mut child_rx) = mpsc::channel(64);
        let child = TurnEngine::child(
            shared,
            child_tx,
            self.cancel.child_token(),
            self.depth + 1,
        );

        let run = child.run_once_boxed(vec![ContentPart::text(task)]);
        let forward = async {
            while let Some(event) = child_rx.recv().await {
                self.emit(EngineEvent::Subagent {
                    call_id: call.id.clone(),
                    event: Box::new(event),
                })
                .await;
            }
        };
        let (outcome, ()) = tokio::join!(run, forward);

        if self.cancel.is_cancelled() {
            return None;
        }

        let result = match outcome {
            Ok(turn) => match turn.status {
                TurnStatus::Finished => {
                    self.emit(EngineEvent::ToolCall {
                        id: call.id.clone(),
                        tool: call.name.clone(),
                        state: ToolCallState::Completed,
                    })
                    .await;
                    ToolResult::ok(&call.id, DELEGATE_TOOL, turn.final_text())
                }
                TurnStatus::MaxStepsReached => {
                    warn!(call_id = %call.id, "delegated turn hit its step limit");
                    return Some(
                        self.fail_call(call, "sub-agent reached its step limit".to_string())
                            .await,
                    );
                }
                TurnStatus::Cancelled | TurnStatus::Running => {
                    return Some(
                        self.fail_call(call, "sub-agent was interrupted".to_string())
                            .await,
                    );
                }
            },
            Err(e) => {
                return Some(self.fail_call(call, e.to_string()).await);
            }
        };
        self.emit(EngineEvent::ToolResult {
            result: result.clone(),
        })
        .await;
        Some(result)
    }
}

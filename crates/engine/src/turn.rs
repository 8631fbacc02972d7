//! The turn engine: the step loop driving model calls, tool dispatch,
//! approval gating, compaction, and deterministic termination.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use turnstile_core::{
    ApprovalChoice, ContentPart, EngineConfig, EngineError, EngineEvent, Message, StepRecord,
    ToolCallRecord, ToolCallState, ToolRegistry, ToolResult, TurnRecord, TurnStatus,
};
use turnstile_model::{Completion, ModelClient, ModelDelta, ModelRequest};
use turnstile_session::SessionStore;

use crate::approval::ApprovalGate;
use crate::compaction::Compactor;
use crate::ledger::ContextLedger;
use crate::subagent;

/// State shared across a session's whole turn tree: the model, the tool
/// registry, the approval gate, and the limits. Sub-agents get the same
/// shared state but their own ledger.
pub struct EngineShared {
    pub session_id: Uuid,
    pub model: Arc<dyn ModelClient>,
    pub model_name: String,
    pub system_prompt: String,
    pub registry: Arc<ToolRegistry>,
    pub gate: Arc<ApprovalGate>,
    pub config: EngineConfig,
    pub store: Option<Arc<SessionStore>>,
}

/// Runs turns for one session. Owns the turn/step/tool-call lifecycle and
/// is the ledger's only writer.
pub struct TurnEngine {
    pub(crate) shared: Arc<EngineShared>,
    pub(crate) ledger: ContextLedger,
    pub(crate) events: mpsc::Sender<EngineEvent>,
    pub(crate) cancel: CancellationToken,
    pub(crate) depth: u32,
    current_turn: Uuid,
}

enum StepError {
    Interrupted,
    Fatal(EngineError),
}

impl TurnEngine {
    pub fn new(
        shared: Arc<EngineShared>,
        events: mpsc::Sender<EngineEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared,
            ledger: ContextLedger::new(),
            events,
            cancel,
            depth: 0,
            current_turn: Uuid::nil(),
        }
    }

    pub(crate) fn child(
        shared: Arc<EngineShared>,
        events: mpsc::Sender<EngineEvent>,
        cancel: CancellationToken,
        depth: u32,
    ) -> Self {
        Self {
            shared,
            ledger: ContextLedger::new(),
            events,
            cancel,
            depth,
            current_turn: Uuid::nil(),
        }
    }

    pub fn ledger(&self) -> &ContextLedger {
        &self.ledger
    }

    /// Install a fresh cancellation token before the next turn. The ledger
    /// carries over; cancellation state does not.
    pub fn reset_cancel(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }

    /// Run a turn, plus any configured extra iterations after it finishes.
    ///
    /// Extra iterations repeat the same input until the iteration budget is
    /// spent, the model emits the stop signal, or the turn ends some other
    /// way than `finished`. The last turn record is returned.
    pub async fn run(&mut self, input: Vec<ContentPart>) -> Result<TurnRecord, EngineError> {
        let mut turn = self.run_once(input.clone()).await?;
        let mut extra: i64 = 0;
        while turn.status == TurnStatus::Finished
            && self.shared.config.allows_extra_iteration(extra)
            && !self.cancel.is_cancelled()
        {
            if turn.final_text().contains(&self.shared.config.stop_signal) {
                info!("stop signal observed, ending extra iterations");
                break;
            }
            extra += 1;
            debug!(iteration = extra, "starting extra iteration");
            turn = self.run_once(input.clone()).await?;
        }
        Ok(turn)
    }

    /// One user-input-to-completion cycle.
    pub async fn run_once(&mut self, input: Vec<ContentPart>) -> Result<TurnRecord, EngineError> {
        let mut turn = TurnRecord::new(input.clone());
        self.current_turn = turn.id;
        self.emit(EngineEvent::TurnBegin { turn_id: turn.id }).await;
        self.append_ledger(Message::User { parts: input });

        let mut seq: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                turn.status = TurnStatus::Cancelled;
                break;
            }

            // Compaction runs synchronously here, before the model call; no
            // step begins while it is open.
            let keep_recent = self.shared.config.compaction_keep_recent;
            if self.ledger.needs_compaction(&self.shared.config)
                && self.ledger.compactable(keep_recent)
            {
                self.emit(EngineEvent::CompactionBegin {
                    tokens_before: self.ledger.tokens(),
                })
                .await;
                let compactor = Compactor { keep_recent };
                let (before, after) = compactor
                    .compact(
                        &mut self.ledger,
                        self.shared.model.as_ref(),
                        &self.shared.model_name,
                    )
                    .await;
                self.emit(EngineEvent::CompactionEnd {
                    tokens_before: before,
                    tokens_after: after,
                })
                .await;
            }

            seq += 1;
            self.emit(EngineEvent::StepBegin { seq }).await;

            let (completion, retries) = match self.call_model().await {
                Ok(done) => done,
                Err(StepError::Interrupted) => {
                    self.emit(EngineEvent::StepInterrupted { seq }).await;
                    turn.status = TurnStatus::Cancelled;
                    break;
                }
                Err(StepError::Fatal(e)) => return Err(e),
            };

            turn.steps.push(StepRecord {
                seq,
                parts: completion.parts.clone(),
                tool_calls: completion.tool_calls.clone(),
                retries,
            });
            self.append_ledger(Message::Assistant {
                parts: completion.parts.clone(),
                tool_calls: completion.tool_calls.clone(),
            });
            self.ledger.record_usage(completion.usage);
            self.emit(EngineEvent::StatusUpdate {
                usage: completion.usage,
                context_tokens: self.ledger.tokens(),
            })
            .await;

            if completion.tool_calls.is_empty() {
                turn.status = TurnStatus::Finished;
                break;
            }

            let (results, interrupted) = self.dispatch_tool_calls(&completion.tool_calls).await;
            // Completed results survive a cancellation; nothing partial is
            // ever appended.
            if !results.is_empty() {
                self.append_ledger(Message::Tool { results });
            }
            if interrupted {
                self.shared.gate.cancel_pending();
                self.emit(EngineEvent::StepInterrupted { seq }).await;
                turn.status = TurnStatus::Cancelled;
                break;
            }

            if seq >= self.shared.config.max_steps_per_turn {
                info!(steps = seq, "max steps reached");
                turn.status = TurnStatus::MaxStepsReached;
                break;
            }
        }

        Ok(turn)
    }

    /// Invoke the model with full context and tool declarations, streaming
    /// content-part events as they arrive. Retries retryable errors up to
    /// the per-step bound; the counter resets every step.
    async fn call_model(&self) -> Result<(Completion, u32), StepError> {
        let request = ModelRequest {
            model: self.shared.model_name.clone(),
            system_prompt: self.shared.system_prompt.clone(),
            messages: self.ledger.messages().to_vec(),
            tools: self.shared.registry.declarations(),
            thinking_enabled: true,
            max_tokens: None,
        };

        let max_attempts = self.shared.config.max_retries_per_step.max(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let (tx, mut rx) = mpsc::channel::<ModelDelta>(64);
            let stream = self.shared.model.stream(&request, tx);
            tokio::pin!(stream);

            let result = loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(StepError::Interrupted),
                    Some(delta) = rx.recv() => {
                        self.emit_delta(delta).await;
                    }
                    result = &mut stream => break result,
                }
            };
            // Flush deltas that raced with stream completion.
            while let Ok(delta) = rx.try_recv() {
                self.emit_delta(delta).await;
            }

            match result {
                Ok(completion) => return Ok((completion, attempt - 1)),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(attempt, error = %e, "retryable model error, retrying step");
                }
                Err(e) if e.is_retryable() => {
                    return Err(StepError::Fatal(EngineError::RetriesExhausted {
                        attempts: attempt,
                        message: e.to_string(),
                    }));
                }
                Err(e) => return Err(StepError::Fatal(e.into())),
            }
        }
    }

    async fn emit_delta(&self, delta: ModelDelta) {
        let event = match delta {
            ModelDelta::Text(text) => EngineEvent::Content {
                part: ContentPart::Text { text },
            },
            ModelDelta::Thinking(text) => EngineEvent::Content {
                part: ContentPart::Thinking { text },
            },
            ModelDelta::ToolCallStart { id, name } => EngineEvent::ToolCall {
                id,
                tool: name,
                state: ToolCallState::Pending,
            },
            ModelDelta::ToolCallDelta { id, fragment } => EngineEvent::ToolCallPart {
                id,
                delta: fragment,
            },
            // Usage is folded into the StatusUpdate at step end.
            ModelDelta::Usage(_) => return,
        };
        self.emit(event).await;
    }

    /// Dispatch every call in the step concurrently. Results come back in
    /// declaration order regardless of completion order. The bool reports
    /// whether cancellation interrupted any call.
    async fn dispatch_tool_calls(&self, calls: &[ToolCallRecord]) -> (Vec<ToolResult>, bool) {
        let outcomes = join_all(calls.iter().map(|call| self.run_tool_call(call))).await;
        let interrupted = outcomes.iter().any(Option::is_none);
        let results = outcomes.into_iter().flatten().collect();
        (results, interrupted)
    }

    /// Drive one tool call through validation, approval, and execution.
    /// Returns `None` only when cancellation interrupted the call.
    async fn run_tool_call(&self, call: &ToolCallRecord) -> Option<ToolResult> {
        if call.name == subagent::DELEGATE_TOOL {
            return self.run_delegation(call).await;
        }

        let Some(tool) = self.shared.registry.resolve(&call.name) else {
            return Some(
                self.fail_call(call, format!("tool not found: {}", call.name))
                    .await,
            );
        };

        if let Err(reason) = self.shared.registry.validate_args(&call.name, &call.arguments) {
            return Some(self.fail_call(call, format!("invalid arguments: {reason}")).await);
        }

        if !tool.capabilities().is_empty() {
            let resource = tool.resource_signature(&call.arguments);
            let description = format!("{}: {}", call.name, resource);
            if !self.shared.gate.preapproved(&call.name, &resource) {
                self.emit(EngineEvent::ToolCall {
                    id: call.id.clone(),
                    tool: call.name.clone(),
                    state: ToolCallState::AwaitingApproval,
                })
                .await;
            }
            let auth = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                auth = self.shared.gate.authorize(&call.id, &call.name, description, resource) => auth,
            };
            if let Some(request_id) = auth.request_id {
                self.emit(EngineEvent::ApprovalResponse {
                    request_id,
                    response: auth.choice,
                })
                .await;
            }
            if auth.choice == ApprovalChoice::Reject {
                self.emit(EngineEvent::ToolCall {
                    id: call.id.clone(),
                    tool: call.name.clone(),
                    state: ToolCallState::Rejected,
                })
                .await;
                let result =
                    ToolResult::error(&call.id, &call.name, "invocation rejected by the user");
                self.emit(EngineEvent::ToolResult {
                    result: result.clone(),
                })
                .await;
                return Some(result);
            }
            self.emit(EngineEvent::ToolCall {
                id: call.id.clone(),
                tool: call.name.clone(),
                state: ToolCallState::Approved,
            })
            .await;
        }

        self.emit(EngineEvent::ToolCall {
            id: call.id.clone(),
            tool: call.name.clone(),
            state: ToolCallState::Executing,
        })
        .await;

        let invocation = tool.invoke(call.arguments.clone());
        let outcome = match tool.timeout() {
            Some(limit) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                timed = tokio::time::timeout(limit, invocation) => match timed {
                    Ok(inner) => inner,
                    Err(_) => Err(anyhow::anyhow!(
                        "tool timed out after {}s",
                        limit.as_secs()
                    )),
                },
            },
            None => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                outcome = invocation => outcome,
            },
        };

        let result = match outcome {
            Ok(content) => {
                self.emit(EngineEvent::ToolCall {
                    id: call.id.clone(),
                    tool: call.name.clone(),
                    state: ToolCallState::Completed,
                })
                .await;
                ToolResult::ok(&call.id, &call.name, content)
            }
            Err(e) => {
                self.emit(EngineEvent::ToolCall {
                    id: call.id.clone(),
                    tool: call.name.clone(),
                    state: ToolCallState::Failed,
                })
                .await;
                ToolResult::error(&call.id, &call.name, e.to_string())
            }
        };
        self.emit(EngineEvent::ToolResult {
            result: result.clone(),
        })
        .await;
        Some(result)
    }

    pub(crate) async fn fail_call(&self, call: &ToolCallRecord, message: String) -> ToolResult {
        self.emit(EngineEvent::ToolCall {
            id: call.id.clone(),
            tool: call.name.clone(),
            state: ToolCallState::Failed,
        })
        .await;
        let result = ToolResult::error(&call.id, &call.name, message);
        self.emit(EngineEvent::ToolResult {
            result: result.clone(),
        })
        .await;
        result
    }

    fn append_ledger(&mut self, message: Message) {
        // Only the root ledger is rehydrated on replay; sub-agent ledgers
        // are scratch context and stay out of the message rows.
        if self.depth == 0 {
            if let Some(store) = &self.shared.store {
                if let Err(e) = store.append_message(self.shared.session_id, &message) {
                    warn!(error = %e, "failed to persist ledger message");
                }
            }
        }
        self.ledger.append(message);
    }

    pub(crate) async fn emit(&self, event: EngineEvent) {
        if let Some(store) = &self.shared.store {
            if let Err(e) = store.append_event(self.shared.session_id, self.current_turn, &event) {
                warn!(error = %e, "failed to persist event");
            }
        }
        // A detached consumer is not an error; the turn keeps running.
        let _ = self.events.send(event).await;
    }
}

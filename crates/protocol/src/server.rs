//! The connection loop: drives one session over any byte stream.
//!
//! One JSON frame per line in each direction. The loop multiplexes four
//! sources: client frames, engine events, surfaced approval requests, and
//! peer tool invocations. One turn runs at a time; the engine (and its
//! ledger) lives for the whole connection so context carries across turns.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use turnstile_core::{EngineConfig, EngineError, EngineEvent, ToolRegistry, TurnRecord};
use turnstile_engine::{ApprovalGate, EngineShared, TurnEngine};
use turnstile_model::ModelClient;
use turnstile_session::SessionStore;

use crate::peer::{PeerCall, PeerTool};
use crate::wire::{
    ApprovalAnswer, InitializeParams, InitializeResult, PromptParams, PromptResult, ServerFrame,
    ServerRequest, ToolCallAnswer, WireError, INVALID_PARAMS, PARSE_ERROR, UNKNOWN_METHOD,
};

pub struct ServerConfig {
    /// Absent model means `prompt` fails with `llm-not-configured`.
    pub model: Option<Arc<dyn ModelClient>>,
    pub model_name: String,
    pub system_prompt: String,
    pub engine: EngineConfig,
    pub store: Option<Arc<SessionStore>>,
}

pub struct ProtocolServer {
    config: ServerConfig,
    registry: Option<ToolRegistry>,
}

enum ClientAction {
    Initialize { id: u64, params: InitializeParams },
    Prompt { id: u64, params: PromptParams },
    Cancel { id: u64 },
    Answer { id: u64, payload: Value },
}

/// What a server-initiated request id is waiting for.
enum Pending {
    Approval(Uuid),
    PeerCall(oneshot::Sender<ToolCallAnswer>),
}

type TurnTask = JoinHandle<(TurnEngine, Result<TurnRecord, EngineError>)>;

impl ProtocolServer {
    /// `registry` holds the tools available before any peer declarations.
    pub fn new(config: ServerConfig, registry: ToolRegistry) -> Self {
        Self {
            config,
            registry: Some(registry),
        }
    }

    /// Serve one session until the peer closes the stream.
    pub async fn run<S>(mut self, stream: S) -> anyhow::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read, write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();
        let mut writer = write;

        let session_id = Uuid::new_v4();
        let (gate, mut approvals) = ApprovalGate::new(self.config.engine.auto_approve);
        let gate = Arc::new(gate);
        let (events_tx, mut events) = mpsc::channel::<EngineEvent>(256);
        let (peer_tx, mut peer_calls) = mpsc::channel::<PeerCall>(16);

        let mut pending: HashMap<u64, Pending> = HashMap::new();
        let mut next_request_id: u64 = 0;

        // Built at the first prompt, once the tool set is final.
        let mut shared: Option<Arc<EngineShared>> = None;
        let mut engine: Option<TurnEngine> = None;
        let mut turn_task: Option<TurnTask> = None;
        let mut turn_meta: Option<(u64, CancellationToken)> = None;

        info!(session_id = %session_id, "session started");
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_frame(&line) {
                        Err((id, error)) => {
                            send_frame(&mut writer, &ServerFrame::fail(id, error)).await?;
                        }
                        Ok(ClientAction::Initialize { id, params }) => {
                            let frame = match self.registry.as_mut() {
                                None => ServerFrame::fail(
                                    Some(id),
                                    WireError::transport(
                                        INVALID_PARAMS,
                                        "initialize must precede the first prompt",
                                    ),
                                ),
                                Some(registry) => {
                                    initialize(registry, params, peer_tx.clone())
                                        .map_or_else(|e| ServerFrame::fail(Some(id), e), |r| ServerFrame::ok(id, r))
                                }
                            };
                            send_frame(&mut writer, &frame).await?;
                        }
                        Ok(ClientAction::Prompt { id, params }) => {
                            if turn_task.is_some() {
                                let frame = ServerFrame::fail(
                                    Some(id),
                                    WireError::domain(&EngineError::TurnAlreadyInProgress),
                                );
                                send_frame(&mut writer, &frame).await?;
                                continue;
                            }
                            let Some(input) = params.into_parts() else {
                                let frame = ServerFrame::fail(
                                    Some(id),
                                    WireError::transport(INVALID_PARAMS, "prompt requires text or parts"),
                                );
                                send_frame(&mut writer, &frame).await?;
                                continue;
                            };
                            if shared.is_none() {
                                match self.build_shared(session_id, gate.clone()) {
                                    Ok(built) => shared = Some(built),
                                    Err(e) => {
                                        let frame = ServerFrame::fail(Some(id), WireError::domain(&e));
                                        send_frame(&mut writer, &frame).await?;
                                        continue;
                                    }
                                }
                            }
                            let shared = shared.as_ref().map(Arc::clone).ok_or_else(|| anyhow::anyhow!("engine state missing"))?;
                            let mut eng = engine
                                .take()
                                .unwrap_or_else(|| TurnEngine::new(shared, events_tx.clone(), CancellationToken::new()));
                            let cancel = CancellationToken::new();
                            eng.reset_cancel(cancel.clone());
                            turn_meta = Some((id, cancel));
                            turn_task = Some(tokio::spawn(async move {
                                let result = eng.run(input).await;
                                (eng, result)
                            }));
                        }
                        Ok(ClientAction::Cancel { id }) => {
                            let frame = match &turn_meta {
                                Some((_, cancel)) => {
                                    cancel.cancel();
                                    ServerFrame::ok(id, json!({"cancelled": true}))
                                }
                                None => ServerFrame::fail(
                                    Some(id),
                                    WireError::domain(&EngineError::NoTurnInProgress),
                                ),
                            };
                            send_frame(&mut writer, &frame).await?;
                        }
                        Ok(ClientAction::Answer { id, payload }) => {
                            match pending.remove(&id) {
                                Some(Pending::Approval(request_id)) => {
                                    match serde_json::from_value::<ApprovalAnswer>(payload) {
                                        Ok(answer) => {
                                            if !gate.resolve(request_id, answer.response) {
                                                debug!(request_id = %request_id, "approval already resolved or cancelled");
                                            }
                                        }
                                        Err(e) => {
                                            let frame = ServerFrame::fail(
                                                Some(id),
                                                WireError::transport(INVALID_PARAMS, e.to_string()),
                                            );
                                            send_frame(&mut writer, &frame).await?;
                                        }
                                    }
                                }
                                Some(Pending::PeerCall(reply)) => {
                                    let answer = serde_json::from_value::<ToolCallAnswer>(payload)
                                        .unwrap_or_else(|e| ToolCallAnswer {
                                            content: format!("malformed peer response: {e}"),
                                            is_error: true,
                                        });
                                    let _ = reply.send(answer);
                                }
                                None => warn!(id, "response for unknown request id"),
                            }
                        }
                    }
                }
                Some(request) = approvals.recv() => {
                    next_request_id += 1;
                    pending.insert(next_request_id, Pending::Approval(request.id));
                    let frame = ServerFrame::Request {
                        id: next_request_id,
                        request: ServerRequest::ApprovalRequest(request),
                    };
                    send_frame(&mut writer, &frame).await?;
                }
                Some(call) = peer_calls.recv() => {
                    next_request_id += 1;
                    let frame = ServerFrame::Request {
                        id: next_request_id,
                        request: ServerRequest::ToolCallRequest {
                            tool: call.tool,
                            arguments: call.arguments,
                        },
                    };
                    pending.insert(next_request_id, Pending::PeerCall(call.reply));
                    send_frame(&mut writer, &frame).await?;
                }
                Some(event) = events.recv() => {
                    send_frame(&mut writer, &ServerFrame::Event { event }).await?;
                }
                joined = async { turn_task.as_mut().expect("guarded by is_some").await }, if turn_task.is_some() => {
                    turn_task = None;
                    let (prompt_id, _) = turn_meta.take().ok_or_else(|| anyhow::anyhow!("turn completed without metadata"))?;
                    // The engine has stopped emitting; flush whatever it
                    // buffered so events never trail the terminal response.
                    while let Ok(event) = events.try_recv() {
                        send_frame(&mut writer, &ServerFrame::Event { event }).await?;
                    }
                    // Approval requests the turn abandoned will never be
                    // answered; their entries go, along with peer calls
                    // whose caller is gone.
                    pending.retain(|_, entry| match entry {
                        Pending::Approval(_) => false,
                        Pending::PeerCall(reply) => !reply.is_closed(),
                    });
                    let frame = match joined {
                        Ok((eng, Ok(turn))) => {
                            engine = Some(eng);
                            ServerFrame::ok(prompt_id, PromptResult {
                                status: turn.status,
                                steps: turn.steps.len() as u32,
                                text: turn.final_text(),
                            })
                        }
                        Ok((eng, Err(e))) => {
                            engine = Some(eng);
                            ServerFrame::fail(Some(prompt_id), WireError::domain(&e))
                        }
                        Err(join_err) => {
                            warn!(error = %join_err, "turn task aborted");
                            ServerFrame::fail(Some(prompt_id), WireError::domain(&EngineError::Other(join_err.into())))
                        }
                    };
                    send_frame(&mut writer, &frame).await?;
                }
            }
        }

        // Peer hung up: interrupt any running turn before leaving.
        if let Some((_, cancel)) = &turn_meta {
            cancel.cancel();
        }
        if let Some(task) = turn_task {
            let _ = task.await;
        }
        info!(session_id = %session_id, "session closed");
        Ok(())
    }

    fn build_shared(
        &mut self,
        session_id: Uuid,
        gate: Arc<ApprovalGate>,
    ) -> Result<Arc<EngineShared>, EngineError> {
        let model = self
            .config
            .model
            .clone()
            .ok_or(EngineError::LlmNotConfigured)?;
        let registry = self
            .registry
            .take()
            .ok_or_else(|| EngineError::Protocol("tool registry already consumed".into()))?;
        Ok(Arc::new(EngineShared {
            session_id,
            model,
            model_name: self.config.model_name.clone(),
            system_prompt: self.config.system_prompt.clone(),
            registry: Arc::new(registry),
            gate,
            config: self.config.engine.clone(),
            store: self.config.store.clone(),
        }))
    }
}

fn initialize(
    registry: &mut ToolRegistry,
    params: InitializeParams,
    peer_tx: mpsc::Sender<PeerCall>,
) -> Result<InitializeResult, WireError> {
    if let Some(name) = &params.client_name {
        info!(client = %name, "client initialized");
    }
    for decl in params.external_tools {
        registry
            .register(Arc::new(PeerTool::new(decl, peer_tx.clone())))
            .map_err(|e| WireError::domain(&e))?;
    }
    Ok(InitializeResult {
        server: "turnstile".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        tools: registry.list(),
    })
}

fn parse_frame(line: &str) -> Result<ClientAction, (Option<u64>, WireError)> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| (None, WireError::transport(PARSE_ERROR, e.to_string())))?;
    let id = value.get("id").and_then(Value::as_u64);
    match value.get("type").and_then(Value::as_str) {
        Some("request") => {
            let id = id.ok_or_else(|| {
                (
                    None,
                    WireError::transport(INVALID_PARAMS, "request frame missing id"),
                )
            })?;
            let method = value
                .get("method")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    (
                        Some(id),
                        WireError::transport(INVALID_PARAMS, "request frame missing method"),
                    )
                })?;
            let params = value.get("params").cloned().unwrap_or(Value::Null);
            match method {
                "initialize" => Ok(ClientAction::Initialize {
                    id,
                    params: parse_params(id, params)?,
                }),
                "prompt" => Ok(ClientAction::Prompt {
                    id,
                    params: parse_params(id, params)?,
                }),
                "cancel" => Ok(ClientAction::Cancel { id }),
                other => Err((
                    Some(id),
                    WireError::transport(UNKNOWN_METHOD, format!("unknown method '{other}'")),
                )),
            }
        }
        Some("response") => {
            let id = id.ok_or_else(|| {
                (
                    None,
                    WireError::transport(INVALID_PARAMS, "response frame missing id"),
                )
            })?;
            Ok(ClientAction::Answer { id, payload: value })
        }
        _ => Err((
            id,
            WireError::transport(PARSE_ERROR, "frame must be a request or response"),
        )),
    }
}

fn parse_params<T>(id: u64, params: Value) -> Result<T, (Option<u64>, WireError)>
where
    T: serde::de::DeserializeOwned + Default,
{
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params)
        .map_err(|e| (Some(id), WireError::transport(INVALID_PARAMS, e.to_string())))
}

async fn send_frame<W>(writer: &mut W, frame: &ServerFrame) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

//! Peer-implemented external tools.
//!
//! A tool declared in `initialize` is registered like any other, but its
//! invocation round-trips through the connection: the server emits a
//! `tool_call_request` and the result comes back as a client response.
//! Capability tags declared by the peer go through the same approval gate
//! as built-in tools.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use turnstile_core::{Capability, Tool};

use crate::wire::{ExternalToolDecl, ToolCallAnswer};

/// One in-flight invocation handed to the connection loop for dispatch.
pub(crate) struct PeerCall {
    pub tool: String,
    pub arguments: Value,
    pub reply: oneshot::Sender<ToolCallAnswer>,
}

pub(crate) struct PeerTool {
    decl: ExternalToolDecl,
    calls: mpsc::Sender<PeerCall>,
}

impl PeerTool {
    pub fn new(decl: ExternalToolDecl, calls: mpsc::Sender<PeerCall>) -> Self {
        Self { decl, calls }
    }
}

#[async_trait]
impl Tool for PeerTool {
    fn name(&self) -> &str {
        &self.decl.name
    }

    fn description(&self) -> &str {
        &self.decl.description
    }

    fn schema(&self) -> Value {
        self.decl.schema.clone()
    }

    fn capabilities(&self) -> &[Capability] {
        &self.decl.capabilities
    }

    async fn invoke(&self, args: Value) -> anyhow::Result<String> {
        let (reply, answer) = oneshot::channel();
        self.calls
            .send(PeerCall {
                tool: self.decl.name.clone(),
                arguments: args,
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("connection closed"))?;
        let answer = answer
            .await
            .map_err(|_| anyhow::anyhow!("peer disconnected before responding"))?;
        if answer.is_error {
            anyhow::bail!(answer.content);
        }
        Ok(answer.content)
    }
}

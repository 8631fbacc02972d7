//! Session-scoped approval gate for side-effecting tool calls.
//!
//! One gate per session, shared by reference across a parent turn and every
//! sub-agent turn it spawns. The grant table is the only state genuinely
//! shared across the tree; a single lock guards it (contention is low and
//! operations are O(1)).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use turnstile_core::{ApprovalChoice, ApprovalRequest};

/// Outcome of consulting the gate for one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub choice: ApprovalChoice,
    /// Set when a request was surfaced to a human; `None` for auto-approve
    /// and standing grants.
    pub request_id: Option<Uuid>,
}

struct PendingApproval {
    tx: oneshot::Sender<ApprovalChoice>,
    tool: String,
    resource: String,
}

pub struct ApprovalGate {
    auto_approve: bool,
    grants: Mutex<HashSet<(String, String)>>,
    pending: Mutex<HashMap<Uuid, PendingApproval>>,
    request_tx: mpsc::Sender<ApprovalRequest>,
}

impl ApprovalGate {
    /// Returns the gate and the channel on which approval requests surface
    /// (consumed by the protocol server or front-end).
    pub fn new(auto_approve: bool) -> (Self, mpsc::Receiver<ApprovalRequest>) {
        let (request_tx, request_rx) = mpsc::channel(16);
        (
            Self {
                auto_approve,
                grants: Mutex::new(HashSet::new()),
                pending: Mutex::new(HashMap::new()),
                request_tx,
            },
            request_rx,
        )
    }

    /// True when `authorize` would resolve without surfacing a request.
    pub fn preapproved(&self, tool: &str, resource: &str) -> bool {
        self.auto_approve || self.has_grant(tool, resource)
    }

    pub fn has_grant(&self, tool: &str, resource: &str) -> bool {
        self.grants
            .lock()
            .expect("grant table poisoned")
            .contains(&(tool.to_string(), resource.to_string()))
    }

    /// Consult the gate for a side-effecting tool call.
    ///
    /// Resolves immediately on auto-approve or a matching grant; otherwise
    /// surfaces a request and suspends until `resolve` is called. Blocks only
    /// this call, never siblings. Cancellation is dropping this future; the
    /// caller must follow up with `cancel_pending`.
    pub async fn authorize(
        &self,
        call_id: &str,
        tool: &str,
        description: String,
        resource: String,
    ) -> Authorization {
        if self.auto_approve || self.has_grant(tool, &resource) {
            return Authorization {
                choice: ApprovalChoice::Approve,
                request_id: None,
            };
        }

        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("pending table poisoned").insert(
            id,
            PendingApproval {
                tx,
                tool: tool.to_string(),
                resource: resource.clone(),
            },
        );

        let request = ApprovalRequest {
            id,
            call_id: call_id.to_string(),
            tool: tool.to_string(),
            description,
            resource,
        };
        debug!(request_id = %id, tool = %tool, "surfacing approval request");
        if self.request_tx.send(request).await.is_err() {
            // No consumer: fail closed.
            self.pending.lock().expect("pending table poisoned").remove(&id);
            warn!(tool = %tool, "approval channel closed, rejecting");
            return Authorization {
                choice: ApprovalChoice::Reject,
                request_id: None,
            };
        }

        let choice = rx.await.unwrap_or(ApprovalChoice::Reject);
        Authorization {
            choice,
            request_id: Some(id),
        }
    }

    /// Resolve a surfaced request. `approve_for_session` installs a standing
    /// grant before waking the caller, so the grant is visible to any check
    /// that starts afterwards; already-pending requests are not re-examined.
    pub fn resolve(&self, request_id: Uuid, choice: ApprovalChoice) -> bool {
        let Some(pending) = self
            .pending
            .lock()
            .expect("pending table poisoned")
            .remove(&request_id)
        else {
            return false;
        };
        if choice == ApprovalChoice::ApproveForSession {
            self.grants
                .lock()
                .expect("grant table poisoned")
                .insert((pending.tool, pending.resource));
        }
        // Receiver may have been cancelled; the request is spent either way.
        let _ = pending.tx.send(choice);
        true
    }

    /// Drop every pending request so no tool call stays `awaiting_approval`
    /// after a cancellation.
    pub fn cancel_pending(&self) {
        self.pending.lock().expect("pending table poisoned").clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending table poisoned").len()
    }

    pub fn grant_count(&self) -> usize {
        self.grants.lock().expect("grant table poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auto_approve_short_circuits() {
        let (gate, mut rx) = ApprovalGate::new(true);
        let auth = gate
            .authorize("c1", "shell_execute", "run ls".into(), "ls".into())
            .await;
        assert_eq!(auth.choice, ApprovalChoice::Approve);
        assert!(auth.request_id.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_session_grant_suppresses_future_requests() {
        let (gate, mut rx) = ApprovalGate::new(false);

        let authorize = gate.authorize("c1", "shell_execute", "run git".into(), "git".into());
        tokio::pin!(authorize);

        // Drive the request out, then approve for the session.
        let request = tokio::select! {
            req = rx.recv() => req.unwrap(),
            _ = &mut authorize => panic!("authorize resolved before response"),
        };
        assert!(gate.resolve(request.id, ApprovalChoice::ApproveForSession));
        let auth = authorize.await;
        assert_eq!(auth.choice, ApprovalChoice::ApproveForSession);
        assert_eq!(gate.grant_count(), 1);

        // Second matching call resolves without surfacing a request.
        let auth = gate
            .authorize("c2", "shell_execute", "run git".into(), "git".into())
            .await;
        assert_eq!(auth.choice, ApprovalChoice::Approve);
        assert!(auth.request_id.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_grant_is_resource_scoped() {
        let (gate, mut rx) = ApprovalGate::new(false);

        let authorize = gate.authorize("c1", "shell_execute", "run git".into(), "git".into());
        tokio::pin!(authorize);
        let request = tokio::select! {
            req = rx.recv() => req.unwrap(),
            _ = &mut authorize => panic!("authorize resolved before response"),
        };
        gate.resolve(request.id, ApprovalChoice::ApproveForSession);
        authorize.await;

        // Different resource signature still prompts.
        assert!(!gate.has_grant("shell_execute", "rm"));
        assert!(gate.has_grant("shell_execute", "git"));
    }

    #[tokio::test]
    async fn test_cancel_pending_clears_table() {
        let (gate, mut rx) = ApprovalGate::new(false);

        let authorize = gate.authorize("c1", "file_write", "write a".into(), "a".into());
        tokio::pin!(authorize);
        let _request = tokio::select! {
            req = rx.recv() => req.unwrap(),
            _ = &mut authorize => panic!("authorize resolved before response"),
        };
        assert_eq!(gate.pending_count(), 1);
        drop(authorize);
        gate.cancel_pending();
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_request_id_is_ignored() {
        let (gate, _rx) = ApprovalGate::new(false);
        assert!(!gate.resolve(Uuid::new_v4(), ApprovalChoice::Approve));
    }
}

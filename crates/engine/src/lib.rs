//! The turn execution engine.
//!
//! A turn takes user input and drives model calls and tool dispatch until
//! the model stops requesting tools, a resource limit trips, or the turn is
//! cancelled. Side-effecting calls pass through a session-scoped approval
//! gate; the context ledger is compacted between steps when it approaches
//! the model's window; `delegate` calls spawn child turns with fresh
//! ledgers.

pub mod approval;
pub mod compaction;
pub mod ledger;
pub mod subagent;
pub mod turn;

pub use approval::{ApprovalGate, Authorization};
pub use compaction::Compactor;
pub use ledger::ContextLedger;
pub use subagent::{DelegateTool, DELEGATE_TOOL};
pub use turn::{EngineShared, TurnEngine};

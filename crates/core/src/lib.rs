//! Core types, traits, and the tool registry for the Turnstile agent engine.
//!
//! Everything here is shared across the model, engine, and protocol crates:
//! ledger messages, turn/step/tool-call records, the engine event stream,
//! the `Tool` trait with its capability tags, and the error taxonomy.

pub mod approval;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod registry;
pub mod tool;
pub mod turn;

pub use approval::{ApprovalChoice, ApprovalRequest};
pub use config::EngineConfig;
pub use error::{EngineError, ErrorCode};
pub use event::EngineEvent;
pub use message::{ContentPart, Message, TokenUsage, ToolCallRecord, ToolResult};
pub use registry::ToolRegistry;
pub use tool::{Capability, Tool, ToolDeclaration};
pub use turn::{StepRecord, ToolCallState, TurnRecord, TurnStatus};

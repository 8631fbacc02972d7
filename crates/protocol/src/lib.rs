//! Newline-delimited JSON protocol for driving turns over any byte stream.
//!
//! The server half of the wire: clients send `initialize`/`prompt`/`cancel`
//! requests and answer server-initiated approval and peer-tool requests;
//! the server streams engine events and resolves each prompt with the
//! turn's terminal status.

mod peer;
pub mod server;
pub mod wire;

pub use server::{ProtocolServer, ServerConfig};
pub use wire::{
    ExternalToolDecl, InitializeParams, InitializeResult, PromptParams, PromptResult, ServerFrame,
    ServerRequest, WireError,
};

//! Built-in tools for Turnstile agents, plus the MCP remote-tool registrar.
//!
//! Each tool declares a JSON schema, its side-effect capabilities, and a
//! normalized resource signature used by session-scoped approval grants.

pub mod file;
pub mod http;
pub mod mcp;
pub mod shell;

pub use file::{FileReadTool, FileWriteTool};
pub use http::HttpRequestTool;
pub use mcp::{register_remote_tools, McpClient, RemoteToolSpec};
pub use shell::ShellTool;

use std::sync::Arc;

use turnstile_core::{EngineError, ToolRegistry};

/// Register the standard built-in tool set.
pub fn register_builtins(registry: &mut ToolRegistry) -> Result<(), EngineError> {
    registry.register(Arc::new(ShellTool::default()))?;
    registry.register(Arc::new(FileReadTool))?;
    registry.register(Arc::new(FileWriteTool))?;
    registry.register(Arc::new(HttpRequestTool::default()))?;
    Ok(())
}

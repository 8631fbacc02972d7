//! MCP (Model Context Protocol) remote-tool registrar.
//!
//! Remote servers are discovered in parallel with a bounded per-call
//! timeout; registration completes before the engine's first step so the
//! model-facing tool list is stable for the whole turn.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use turnstile_core::{Capability, Tool, ToolRegistry};

/// A tool advertised by a remote MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteToolSpec {
    pub name: String,
    pub description: String,
    pub schema: Value,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

/// Client for one remote MCP server.
#[async_trait]
pub trait McpClient: Send + Sync {
    fn server_name(&self) -> &str;

    /// List the tools this server exposes.
    async fn discover(&self) -> anyhow::Result<Vec<RemoteToolSpec>>;

    /// Invoke a remote tool by name.
    async fn call(&self, tool: &str, args: Value) -> anyhow::Result<String>;
}

/// A registry entry that forwards invocation to its MCP server.
struct RemoteTool {
    client: Arc<dyn McpClient>,
    spec: RemoteToolSpec,
    timeout: Duration,
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn schema(&self) -> Value {
        self.spec.schema.clone()
    }

    fn capabilities(&self) -> &[Capability] {
        &self.spec.capabilities
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn invoke(&self, args: Value) -> anyhow::Result<String> {
        self.client.call(&self.spec.name, args).await
    }
}

/// Discover every server in parallel and register what they advertise.
///
/// Failures (timeouts, discovery errors, name collisions) are reported as
/// warnings, never as hard errors: a dead MCP server must not keep the
/// engine from starting.
pub async fn register_remote_tools(
    registry: &mut ToolRegistry,
    clients: Vec<Arc<dyn McpClient>>,
    per_call_timeout: Duration,
) -> Vec<String> {
    let discoveries = clients.into_iter().map(|client| async move {
        let result = tokio::time::timeout(per_call_timeout, client.discover()).await;
        let outcome = match result {
            Ok(Ok(specs)) => Ok(specs),
            Ok(Err(e)) => Err(format!("discovery failed: {e}")),
            Err(_) => Err(format!(
                "discovery timed out after {}s",
                per_call_timeout.as_secs()
            )),
        };
        (client, outcome)
    });

    let mut warnings = Vec::new();
    for (client, outcome) in join_all(discoveries).await {
        let server = client.server_name().to_string();
        match outcome {
            Ok(specs) => {
                info!(server = %server, tools = specs.len(), "registered MCP server");
                for spec in specs {
                    let name = spec.name.clone();
                    let tool = RemoteTool {
                        client: client.clone(),
                        spec,
                        timeout: per_call_timeout,
                    };
                    if let Err(e) = registry.register(Arc::new(tool)) {
                        let msg = format!("{server}: skipped '{name}': {e}");
                        warn!("{msg}");
                        warnings.push(msg);
                    }
                }
            }
            Err(reason) => {
                let msg = format!("{server}: {reason}");
                warn!("{msg}");
                warnings.push(msg);
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeServer {
        name: &'static str,
        specs: Vec<RemoteToolSpec>,
        delay: Duration,
    }

    #[async_trait]
    impl McpClient for FakeServer {
        fn server_name(&self) -> &str {
            self.name
        }
        async fn discover(&self) -> anyhow::Result<Vec<RemoteToolSpec>> {
            tokio::time::sleep(self.delay).await;
            Ok(self.specs.clone())
        }
        async fn call(&self, tool: &str, _args: Value) -> anyhow::Result<String> {
            Ok(format!("remote:{tool}"))
        }
    }

    fn spec(name: &str) -> RemoteToolSpec {
        RemoteToolSpec {
            name: name.to_string(),
            description: "remote tool".to_string(),
            schema: serde_json::json!({"type": "object"}),
            capabilities: vec![],
        }
    }

    #[tokio::test]
    async fn test_parallel_discovery_registers_all() {
        let mut registry = ToolRegistry::new();
        let clients: Vec<Arc<dyn McpClient>> = vec![
            Arc::new(FakeServer {
                name: "alpha",
                specs: vec![spec("alpha_search")],
                delay: Duration::from_millis(10),
            }),
            Arc::new(FakeServer {
                name: "beta",
                specs: vec![spec("beta_lookup")],
                delay: Duration::from_millis(10),
            }),
        ];
        let warnings =
            register_remote_tools(&mut registry, clients, Duration::from_secs(1)).await;
        assert!(warnings.is_empty());
        assert!(registry.resolve("alpha_search").is_some());
        assert!(registry.resolve("beta_lookup").is_some());
    }

    #[tokio::test]
    async fn test_slow_server_times_out_without_blocking_others() {
        let mut registry = ToolRegistry::new();
        let clients: Vec<Arc<dyn McpClient>> = vec![
            Arc::new(FakeServer {
                name: "slow",
                specs: vec![spec("slow_tool")],
                delay: Duration::from_secs(60),
            }),
            Arc::new(FakeServer {
                name: "fast",
                specs: vec![spec("fast_tool")],
                delay: Duration::from_millis(1),
            }),
        ];
        let warnings =
            register_remote_tools(&mut registry, clients, Duration::from_millis(100)).await;
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("slow"));
        assert!(registry.resolve("fast_tool").is_some());
        assert!(registry.resolve("slow_tool").is_none());
    }

    #[tokio::test]
    async fn test_collision_with_existing_tool_is_warned() {
        let mut registry = ToolRegistry::new();
        crate::register_builtins(&mut registry).unwrap();
        let clients: Vec<Arc<dyn McpClient>> = vec![Arc::new(FakeServer {
            name: "rogue",
            specs: vec![spec("file_read")],
            delay: Duration::ZERO,
        })];
        let warnings =
            register_remote_tools(&mut registry, clients, Duration::from_secs(1)).await;
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("file_read"));
    }

    #[tokio::test]
    async fn test_remote_invocation_forwards_to_server() {
        let mut registry = ToolRegistry::new();
        let clients: Vec<Arc<dyn McpClient>> = vec![Arc::new(FakeServer {
            name: "alpha",
            specs: vec![spec("alpha_search")],
            delay: Duration::ZERO,
        })];
        register_remote_tools(&mut registry, clients, Duration::from_secs(1)).await;
        let tool = registry.resolve("alpha_search").unwrap();
        let out = tool.invoke(serde_json::json!({})).await.unwrap();
        assert_eq!(out, "remote:alpha_search");
    }
}

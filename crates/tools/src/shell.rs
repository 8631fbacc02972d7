use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::info;

use turnstile_core::{Capability, Tool};

/// Execute a shell command line via `sh -c`.
///
/// The resource signature is the first word of the command line, so an
/// `approve_for_session` grant covers one binary rather than every command.
pub struct ShellTool {
    timeout: Duration,
}

impl Default for ShellTool {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
        }
    }
}

impl ShellTool {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell_execute"
    }

    fn description(&self) -> &str {
        "Execute a shell command. Use this to run scripts, build code, or interact with the system."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command line to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Optional working directory"
                }
            },
            "required": ["command"]
        })
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::RunsProcess]
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    fn resource_signature(&self, args: &Value) -> String {
        args["command"]
            .as_str()
            .and_then(|c| c.split_whitespace().next())
            .unwrap_or("*")
            .to_string()
    }

    async fn invoke(&self, args: Value) -> anyhow::Result<String> {
        let command = args["command"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing 'command' argument"))?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = args["working_dir"].as_str() {
            cmd.current_dir(dir);
        }

        info!(command = %command, "executing shell command");
        let output = cmd.output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(serde_json::json!({
            "exit_code": output.status.code(),
            "stdout": stdout,
            "stderr": stderr,
            "success": output.status.success(),
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_echo() {
        let tool = ShellTool::default();
        let out = tool
            .invoke(serde_json::json!({"command": "echo turnstile"}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["success"], true);
        assert!(parsed["stdout"].as_str().unwrap().contains("turnstile"));
    }

    #[tokio::test]
    async fn test_shell_missing_command() {
        let tool = ShellTool::default();
        assert!(tool.invoke(serde_json::json!({})).await.is_err());
    }

    #[test]
    fn test_resource_signature_is_binary() {
        let tool = ShellTool::default();
        assert_eq!(
            tool.resource_signature(&serde_json::json!({"command": "git status --short"})),
            "git"
        );
        assert_eq!(tool.resource_signature(&serde_json::json!({})), "*");
    }
}

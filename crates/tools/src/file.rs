use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tokio::fs;

use turnstile_core::{Capability, Tool};

fn checked_path(args: &Value) -> anyhow::Result<&str> {
    let path = args["path"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing 'path' argument"))?;
    if path.contains("..") {
        anyhow::bail!("path cannot contain '..'");
    }
    Ok(path)
}

/// Read a file. Declares no side-effect capability, so it never prompts.
pub struct FileReadTool;

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read"
                }
            },
            "required": ["path"]
        })
    }

    fn resource_signature(&self, args: &Value) -> String {
        args["path"].as_str().unwrap_or("*").to_string()
    }

    async fn invoke(&self, args: Value) -> anyhow::Result<String> {
        let path = checked_path(&args)?;
        Ok(fs::read_to_string(path).await?)
    }
}

/// Write a file, creating parent directories. Overwrites if it exists.
pub struct FileWriteTool;

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file. Overwrites if the file exists."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::MutatesFilesystem]
    }

    fn resource_signature(&self, args: &Value) -> String {
        args["path"].as_str().unwrap_or("*").to_string()
    }

    async fn invoke(&self, args: Value) -> anyhow::Result<String> {
        let path = checked_path(&args)?;
        let content = args["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing 'content' argument"))?;

        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, content).await?;
        Ok(format!("wrote {} bytes to {}", content.len(), path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes/a.txt");
        let path_str = path.to_str().unwrap();

        let write = FileWriteTool;
        write
            .invoke(serde_json::json!({"path": path_str, "content": "hello"}))
            .await
            .unwrap();

        let read = FileReadTool;
        let content = read
            .invoke(serde_json::json!({"path": path_str}))
            .await
            .unwrap();
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn test_parent_traversal_rejected() {
        let read = FileReadTool;
        let err = read
            .invoke(serde_json::json!({"path": "../etc/passwd"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains(".."));
    }

    #[test]
    fn test_capabilities() {
        assert!(FileReadTool.capabilities().is_empty());
        assert_eq!(
            FileWriteTool.capabilities(),
            &[Capability::MutatesFilesystem]
        );
    }
}

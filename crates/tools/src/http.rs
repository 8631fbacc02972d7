use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use turnstile_core::{Capability, Tool};

/// Perform an HTTP request.
///
/// The resource signature is the host, so a session grant covers one origin.
pub struct HttpRequestTool {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for HttpRequestTool {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Perform an HTTP request and return status, headers, and body."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "method": {
                    "type": "string",
                    "enum": ["GET", "POST", "PUT", "DELETE", "PATCH"],
                    "description": "HTTP method"
                },
                "url": {
                    "type": "string",
                    "description": "The URL to request"
                },
                "headers": {
                    "type": "object",
                    "description": "Optional request headers"
                },
                "body": {
                    "type": "string",
                    "description": "Optional request body"
                }
            },
            "required": ["method", "url"]
        })
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Network]
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    fn resource_signature(&self, args: &Value) -> String {
        args["url"]
            .as_str()
            .and_then(|u| reqwest::Url::parse(u).ok())
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "*".to_string())
    }

    async fn invoke(&self, args: Value) -> anyhow::Result<String> {
        let method = args["method"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing 'method' argument"))?;
        let url = args["url"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing 'url' argument"))?;

        let mut request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            "PATCH" => self.client.patch(url),
            other => anyhow::bail!("unsupported HTTP method: {other}"),
        };

        if let Some(headers) = args["headers"].as_object() {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key, value);
                }
            }
        }
        if let Some(body) = args["body"].as_str() {
            request = request.body(body.to_string());
        }

        info!(method = %method, url = %url, "performing HTTP request");
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(serde_json::json!({
            "status": status,
            "body": body,
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_signature_is_host() {
        let tool = HttpRequestTool::default();
        assert_eq!(
            tool.resource_signature(
                &serde_json::json!({"url": "https://api.example.com/v1/data?x=1"})
            ),
            "api.example.com"
        );
        assert_eq!(
            tool.resource_signature(&serde_json::json!({"url": "not a url"})),
            "*"
        );
    }

    #[tokio::test]
    async fn test_unsupported_method_rejected() {
        let tool = HttpRequestTool::default();
        let err = tool
            .invoke(serde_json::json!({"method": "TRACE", "url": "http://localhost/"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported HTTP method"));
    }
}

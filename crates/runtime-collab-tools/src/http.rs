//! An HTTP GET tool, gated on an API key. Exercises the credential-check
//! path (§6.1, S5): `has_credential` reflects whether the key is configured,
//! independent of whether any call has been made yet.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::registry::Tool;

/// Issues a GET request with `Authorization: Bearer <api_key>`, if `api_key`
/// is configured.
#[derive(Debug, Clone)]
pub struct HttpGetTool {
    client: reqwest::Client,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Input {
    url: String,
}

impl HttpGetTool {
    /// A tool with no credential configured; every call will be refused
    /// before it reaches the network.
    pub fn new() -> Self {
        Self { client: reqwest::Client::new(), api_key: None }
    }

    /// A tool authorized with `api_key`.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), api_key: Some(api_key.into()) }
    }
}

impl Default for HttpGetTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpGetTool {
    fn name(&self) -> &str {
        "http_get"
    }

    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    async fn call(&self, input: Value) -> Result<Value, String> {
        let input: Input = serde_json::from_value(input).map_err(|e| format!("invalid input: {e}"))?;
        let api_key = self.api_key.as_ref().ok_or("no API key configured")?;

        let response = self
            .client
            .get(&input.url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| format!("failed to read response body: {e}"))?;
        if !status.is_success() {
            return Err(format!("http {status}: {body}"));
        }
        Ok(serde_json::json!({ "status": status.as_u16(), "body": body }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_credential_until_an_api_key_is_configured() {
        assert!(!HttpGetTool::new().has_credential());
        assert!(HttpGetTool::with_api_key("secret").has_credential());
    }

    #[tokio::test]
    async fn call_without_a_credential_is_refused_before_any_request() {
        let tool = HttpGetTool::new();
        let result = tool.call(serde_json::json!({"url": "http://127.0.0.1:1"})).await;
        assert_eq!(result.unwrap_err(), "no API key configured");
    }
}

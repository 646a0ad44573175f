//! An OpenAI-compatible [`LlmProvider`](runtime_core::LlmProvider): the
//! `/chat/completions` shape is shared by OpenAI itself and by enough
//! self-hosted/gateway APIs (vLLM, Ollama's OpenAI shim, OpenRouter) that
//! one client covers all of them via `endpoint`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use runtime_core::{LlmCompletion, LlmMessage, LlmProvider, LlmToolSpec, RuntimeError, RuntimeResult, ToolDispatcher};
use serde::{Deserialize, Serialize};

/// Tool-call loop never runs more than this many round trips before giving
/// up and returning whatever content the last response carried.
const MAX_TOOL_ITERATIONS: u32 = 8;

/// Configuration for [`OpenAiProvider`].
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Model identifier sent with every request (e.g. `"gpt-4o"`).
    pub model: String,
    /// Bearer token. Read from `OPENAI_API_KEY` by [`OpenAiConfig::from_env`].
    pub api_key: String,
    /// Base URL, without a trailing slash (e.g. `"https://api.openai.com/v1"`).
    pub endpoint: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl OpenAiConfig {
    /// Build from `OPENAI_API_KEY`/`OPENAI_BASE_URL`, defaulting the
    /// endpoint to OpenAI's own API and the model to `"gpt-4o-mini"`.
    pub fn from_env(model: impl Into<String>) -> RuntimeResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| RuntimeError::Configuration("OPENAI_API_KEY is not set".into()))?;
        let endpoint = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        Ok(Self {
            model: model.into(),
            api_key,
            endpoint,
            timeout: Duration::from_secs(60),
        })
    }
}

/// Talks to an OpenAI-compatible `/chat/completions` endpoint, including the
/// tool-call round-trip loop for [`LlmProvider::complete_with_tools`].
#[derive(Debug)]
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    /// Build a provider from `config`, failing only if the API key cannot be
    /// encoded as a header value.
    pub fn new(config: OpenAiConfig) -> RuntimeResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .map_err(|e| RuntimeError::Configuration(format!("invalid API key: {e}")))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| RuntimeError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    async fn chat(&self, request: &ChatRequest<'_>) -> RuntimeResult<ChatResponse> {
        let url = format!("{}/chat/completions", self.config.endpoint);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| RuntimeError::Execution(format!("openai request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::Execution(format!("openai API error {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| RuntimeError::Execution(format!("failed to parse openai response: {e}")))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        system: Option<&str>,
        json_mode: bool,
    ) -> RuntimeResult<LlmCompletion> {
        let mut wire = system_message(system);
        wire.extend(messages.iter().map(ChatMessage::from_llm_message));

        let request = ChatRequest {
            model: &self.config.model,
            messages: wire,
            tools: None,
            response_format: json_mode.then_some(ResponseFormat { kind: "json_object" }),
        };
        let response = self.chat(&request).await?;
        Ok(to_completion(response))
    }

    async fn complete_with_tools(
        &self,
        messages: &[LlmMessage],
        system: Option<&str>,
        tools: &[LlmToolSpec],
        tool_executor: &dyn ToolDispatcher,
    ) -> RuntimeResult<LlmCompletion> {
        let mut wire = system_message(system);
        wire.extend(messages.iter().map(ChatMessage::from_llm_message));
        let wire_tools: Vec<ChatTool> = tools.iter().map(ChatTool::from_spec).collect();

        let mut last = None;
        for iteration in 0..MAX_TOOL_ITERATIONS {
            let request = ChatRequest {
                model: &self.config.model,
                messages: wire.clone(),
                tools: Some(wire_tools.clone()),
                response_format: None,
            };
            let response = self.chat(&request).await?;
            let Some(choice) = response.choices.first() else {
                return Err(RuntimeError::Execution("openai response had no choices".into()));
            };
            let message = choice.message.clone();

            let Some(tool_calls) = &message.tool_calls else {
                return Ok(to_completion(response));
            };
            if tool_calls.is_empty() {
                return Ok(to_completion(response));
            }

            tracing::debug!(iteration, calls = tool_calls.len(), "openai tool-call round trip");
            wire.push(message.clone());
            for call in tool_calls {
                let input: serde_json::Value =
                    serde_json::from_str(&call.function.arguments).unwrap_or(serde_json::Value::Null);
                let outcome = tool_executor.dispatch(&call.function.name, input).await;
                wire.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(outcome.content),
                    tool_calls: None,
                    tool_call_id: Some(call.id.clone()),
                });
            }
            last = Some(response);
        }

        Err(RuntimeError::Execution(format!(
            "tool-call loop did not converge after {MAX_TOOL_ITERATIONS} iterations (last model: {:?})",
            last.map(|r| r.model)
        )))
    }
}

fn system_message(system: Option<&str>) -> Vec<ChatMessage> {
    system
        .map(|s| {
            vec![ChatMessage {
                role: "system".to_string(),
                content: Some(s.to_string()),
                tool_calls: None,
                tool_call_id: None,
            }]
        })
        .unwrap_or_default()
}

fn to_completion(response: ChatResponse) -> LlmCompletion {
    let content = response
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .unwrap_or_default();
    LlmCompletion {
        content,
        reasoning_content: None,
        model: response.model,
        input_tokens: response.usage.prompt_tokens,
        output_tokens: response.usage.completion_tokens,
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn from_llm_message(message: &LlmMessage) -> Self {
        Self {
            role: message.role.clone(),
            content: Some(message.content.clone()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: ToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ChatToolFunction,
}

impl ChatTool {
    fn from_spec(spec: &LlmToolSpec) -> Self {
        Self {
            kind: "function",
            function: ChatToolFunction {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_env_requires_api_key() {
        std::env::remove_var("OPENAI_API_KEY");
        assert!(matches!(
            OpenAiConfig::from_env("gpt-4o-mini"),
            Err(RuntimeError::Configuration(_))
        ));
    }

    #[test]
    fn tool_spec_converts_to_function_shape() {
        let spec = LlmToolSpec {
            name: "lookup".to_string(),
            description: "look something up".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        };
        let tool = ChatTool::from_spec(&spec);
        assert_eq!(tool.function.name, "lookup");
        assert_eq!(tool.kind, "function");
    }
}

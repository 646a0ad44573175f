//! A network-free [`LlmProvider`] for tests and demos: deterministic,
//! configurable responses keyed by the last user message.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use runtime_core::{LlmCompletion, LlmMessage, LlmProvider, LlmToolSpec, RuntimeResult, ToolDispatcher};

/// Returns a canned [`LlmCompletion`] for any `complete`/`complete_with_tools`
/// call. `responses` maps the last message's content to a reply; anything
/// unmatched falls back to [`MockLlmProvider::default_reply`]. Every call is
/// recorded in `calls` for assertions.
#[derive(Debug)]
pub struct MockLlmProvider {
    responses: HashMap<String, String>,
    default_reply: String,
    calls: Mutex<Vec<String>>,
}

impl MockLlmProvider {
    /// A provider that echoes `default_reply` for every call.
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            responses: HashMap::new(),
            default_reply: default_reply.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Register a canned reply for an exact last-user-message match.
    pub fn with_response(mut self, trigger: impl Into<String>, reply: impl Into<String>) -> Self {
        self.responses.insert(trigger.into(), reply.into());
        self
    }

    /// The last-user-message content of every call made so far, in order.
    pub fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn reply_for(&self, messages: &[LlmMessage]) -> String {
        let last_user = messages.iter().rev().find(|m| m.role == "user");
        let key = last_user.map(|m| m.content.as_str()).unwrap_or_default();
        self.calls.lock().push(key.to_string());
        self.responses.get(key).cloned().unwrap_or_else(|| self.default_reply.clone())
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        _system: Option<&str>,
        _json_mode: bool,
    ) -> RuntimeResult<LlmCompletion> {
        Ok(LlmCompletion {
            content: self.reply_for(messages),
            reasoning_content: None,
            model: "mock".to_string(),
            input_tokens: messages.iter().map(|m| m.content.len() as u64).sum(),
            output_tokens: 0,
        })
    }

    async fn complete_with_tools(
        &self,
        messages: &[LlmMessage],
        system: Option<&str>,
        _tools: &[LlmToolSpec],
        _tool_executor: &dyn ToolDispatcher,
    ) -> RuntimeResult<LlmCompletion> {
        self.complete(messages, system, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::ToolOutcome;

    struct NoopDispatcher;

    #[async_trait]
    impl ToolDispatcher for NoopDispatcher {
        async fn dispatch(&self, name: &str, _input: serde_json::Value) -> ToolOutcome {
            ToolOutcome::unknown_tool(name)
        }
        fn has_credential(&self, _tool_name: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn returns_registered_reply_for_matching_trigger() {
        let provider = MockLlmProvider::new("default").with_response("hello", "hi there");
        let messages = vec![LlmMessage { role: "user".to_string(), content: "hello".to_string() }];
        let completion = provider.complete(&messages, None, false).await.unwrap();
        assert_eq!(completion.content, "hi there");
    }

    #[tokio::test]
    async fn falls_back_to_default_reply() {
        let provider = MockLlmProvider::new("default");
        let messages = vec![LlmMessage { role: "user".to_string(), content: "anything".to_string() }];
        let completion = provider.complete(&messages, None, false).await.unwrap();
        assert_eq!(completion.content, "default");
    }

    #[tokio::test]
    async fn complete_with_tools_delegates_to_complete() {
        let provider = MockLlmProvider::new("ok");
        let messages = vec![LlmMessage { role: "user".to_string(), content: "x".to_string() }];
        let completion = provider
            .complete_with_tools(&messages, None, &[], &NoopDispatcher)
            .await
            .unwrap();
        assert_eq!(completion.content, "ok");
    }

    #[test]
    fn records_every_call() {
        let provider = MockLlmProvider::new("ok");
        let messages = vec![LlmMessage { role: "user".to_string(), content: "a".to_string() }];
        tokio_test::block_on(provider.complete(&messages, None, false)).unwrap();
        assert_eq!(provider.recorded_calls(), vec!["a".to_string()]);
    }
}

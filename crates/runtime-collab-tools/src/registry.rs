//! Named-tool registry, the bridge between individual [`Tool`] impls and the
//! single [`runtime_core::ToolDispatcher`] seam a [`runtime_core::NodeContext`]
//! calls through.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use runtime_core::{ToolDispatcher, ToolOutcome};
use serde_json::Value;

/// One callable tool. Distinct from [`runtime_core::ToolDispatcher`]: a
/// `Tool` handles one name, a [`ToolRegistry`] fans out to many.
#[async_trait]
pub trait Tool: Send + Sync + std::fmt::Debug {
    /// The name this tool is dispatched under.
    fn name(&self) -> &str;

    /// Whether a credential is currently configured. Tools with no
    /// credential requirement (e.g. pure computation) always return `true`.
    fn has_credential(&self) -> bool {
        true
    }

    /// Run the tool. `Err` messages are surfaced verbatim as
    /// `ToolOutcome::content` with `is_error: true`.
    async fn call(&self, input: Value) -> Result<Value, String>;
}

/// A [`ToolDispatcher`] backed by a name-keyed map of [`Tool`]s.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tool` under its own [`Tool::name`], replacing any tool
    /// previously registered under that name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Fluent form of [`ToolRegistry::register`].
    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// The names of every registered tool.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    async fn dispatch(&self, tool_name: &str, input: Value) -> ToolOutcome {
        let Some(tool) = self.tools.get(tool_name) else {
            return ToolOutcome::unknown_tool(tool_name);
        };
        if !tool.has_credential() {
            return ToolOutcome {
                ok: false,
                content: format!("missing credential for tool '{tool_name}'"),
                is_error: true,
                credential_error: true,
            };
        }
        match tool.call(input).await {
            Ok(value) => ToolOutcome {
                ok: true,
                content: value.to_string(),
                is_error: false,
                credential_error: false,
            },
            Err(message) => {
                tracing::warn!(tool = tool_name, error = %message, "tool call failed");
                ToolOutcome {
                    ok: false,
                    content: message,
                    is_error: true,
                    credential_error: false,
                }
            }
        }
    }

    fn has_credential(&self, tool_name: &str) -> bool {
        self.tools.get(tool_name).is_some_and(|t| t.has_credential())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        async fn call(&self, input: Value) -> Result<Value, String> {
            Ok(input)
        }
    }

    #[derive(Debug)]
    struct GatedTool;

    #[async_trait]
    impl Tool for GatedTool {
        fn name(&self) -> &str {
            "gated"
        }
        fn has_credential(&self) -> bool {
            false
        }
        async fn call(&self, _input: Value) -> Result<Value, String> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn dispatches_registered_tool() {
        let registry = ToolRegistry::new().with_tool(Arc::new(EchoTool));
        let outcome = registry.dispatch("echo", serde_json::json!({"a": 1})).await;
        assert!(outcome.ok);
        assert_eq!(outcome.content, serde_json::json!({"a": 1}).to_string());
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_not_a_panic() {
        let registry = ToolRegistry::new();
        let outcome = registry.dispatch("ghost", Value::Null).await;
        assert!(outcome.is_error);
        assert!(!outcome.credential_error);
    }

    #[tokio::test]
    async fn missing_credential_short_circuits_the_call() {
        let registry = ToolRegistry::new().with_tool(Arc::new(GatedTool));
        assert!(!registry.has_credential("gated"));
        let outcome = registry.dispatch("gated", Value::Null).await;
        assert!(outcome.credential_error);
    }

    #[test]
    fn unknown_tool_has_no_credential() {
        let registry = ToolRegistry::new();
        assert!(!registry.has_credential("ghost"));
    }
}

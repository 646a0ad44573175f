//! Execution-time data model: [`NodeResult`], [`ExecutionResult`], and the
//! collaborator contracts a node invokes through its [`NodeContext`]-shaped
//! environment (see the `runtime-exec` crate for the concrete context).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::RuntimeResult;

/// How well a node or run behaved, surfaced to callers so they can
/// distinguish a clean pass from a retried-but-successful one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionQuality {
    /// Succeeded on the first attempt, no retries.
    Clean,
    /// Succeeded only after one or more retries.
    Recovered,
    /// Partial success (e.g. branch taken after a node failure).
    Degraded,
    /// Terminated without success.
    Failed,
}

/// The outcome of one node invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    /// Whether the node's own logic considers this invocation successful.
    pub success: bool,
    /// Free-form output, merged into the execution scope under the node's
    /// declared `output_keys`.
    #[serde(default)]
    pub output: HashMap<String, serde_json::Value>,
    /// Present when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
    /// Tokens consumed by this invocation (0 for non-LLM nodes).
    #[serde(default)]
    pub tokens_used: u64,
    /// Wall-clock latency of this single attempt.
    #[serde(default)]
    pub latency_ms: u64,
    /// Retries consumed to arrive at this result, if tracked by the caller.
    #[serde(default)]
    pub retries_used: Option<u32>,
    /// Quality tag for this single invocation.
    #[serde(default)]
    pub execution_quality: Option<ExecutionQuality>,
}

impl NodeResult {
    /// Build a plain success result with no retries.
    pub fn success(output: HashMap<String, serde_json::Value>) -> Self {
        Self {
            success: true,
            output,
            error: None,
            tokens_used: 0,
            latency_ms: 0,
            retries_used: None,
            execution_quality: Some(ExecutionQuality::Clean),
        }
    }

    /// Build a failure result carrying `message`.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: HashMap::new(),
            error: Some(message.into()),
            tokens_used: 0,
            latency_ms: 0,
            retries_used: None,
            execution_quality: Some(ExecutionQuality::Failed),
        }
    }

    /// Wrap a caught panic / system exception as a failure, per the spec's
    /// "System exception: <message>" convention.
    pub fn from_system_exception(message: impl std::fmt::Display) -> Self {
        Self::failure(format!("System exception: {message}"))
    }
}

/// The final outcome of one graph execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the run completed successfully.
    pub success: bool,
    /// Merged output from terminal node(s).
    #[serde(default)]
    pub output: HashMap<String, serde_json::Value>,
    /// Ordered list of visited node ids.
    pub path: Vec<String>,
    /// Number of node evaluations performed.
    pub steps_executed: usize,
    /// Present on failure / timeout / cancellation.
    #[serde(default)]
    pub error: Option<String>,
    /// Sum of retries across every node in this run.
    #[serde(default)]
    pub total_retries: u32,
    /// Ids of nodes that needed at least one retry or ended in failure.
    #[serde(default)]
    pub nodes_with_failures: Vec<String>,
    /// Overall quality tag for the run.
    pub execution_quality: ExecutionQuality,
    /// Present when the run ended in a resumable state (timeout).
    #[serde(default)]
    pub session_state: Option<serde_json::Value>,
}

/// A cooperative cancellation flag shared between the caller and the running
/// execution. Checked at node boundaries and between retries, never
/// preempting a node mid-flight.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    /// A fresh, not-yet-cancelled handle.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A single LLM completion response. The core does not interpret these
/// fields beyond aggregating token counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCompletion {
    /// The model's textual answer.
    pub content: String,
    /// Optional chain-of-thought / reasoning trace, if the provider exposes one.
    #[serde(default)]
    pub reasoning_content: Option<String>,
    /// The concrete model identifier that served the request.
    pub model: String,
    /// Prompt tokens billed.
    pub input_tokens: u64,
    /// Completion tokens billed.
    pub output_tokens: u64,
}

/// One message in an LLM conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    /// `"system"`, `"user"`, `"assistant"`, or `"tool"`.
    pub role: String,
    /// Message text.
    pub content: String,
}

/// A tool offered to an LLM's tool-use loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmToolSpec {
    /// Tool name as it will appear in a model's tool call.
    pub name: String,
    /// Description surfaced to the model.
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// Collaborator contract for an LLM provider (§6.1). Concrete providers are
/// out of scope for the core; this is the seam nodes call through.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync + std::fmt::Debug {
    /// A single completion call.
    async fn complete(
        &self,
        messages: &[LlmMessage],
        system: Option<&str>,
        json_mode: bool,
    ) -> RuntimeResult<LlmCompletion>;

    /// A completion call with an internal tool-use loop handled by the provider.
    async fn complete_with_tools(
        &self,
        messages: &[LlmMessage],
        system: Option<&str>,
        tools: &[LlmToolSpec],
        tool_executor: &dyn ToolDispatcher,
    ) -> RuntimeResult<LlmCompletion>;
}

/// The result of dispatching one tool call (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Whether the call succeeded end to end.
    pub ok: bool,
    /// Tool output, or a diagnostic message on failure.
    pub content: String,
    /// Whether `content` describes an error.
    pub is_error: bool,
    /// Whether the failure was specifically a missing/invalid credential.
    #[serde(default)]
    pub credential_error: bool,
}

impl ToolOutcome {
    /// An unknown-tool diagnostic, per §6.1 ("Unknown tools return
    /// `is_error=true` with a diagnostic").
    pub fn unknown_tool(name: &str) -> Self {
        Self {
            ok: false,
            content: format!("unknown tool '{name}'"),
            is_error: true,
            credential_error: false,
        }
    }
}

/// Collaborator contract for dispatching a named tool call (§6.1).
#[async_trait::async_trait]
pub trait ToolDispatcher: Send + Sync + std::fmt::Debug {
    /// Invoke `tool_name` with `input`, returning a [`ToolOutcome`].
    async fn dispatch(&self, tool_name: &str, input: serde_json::Value) -> ToolOutcome;

    /// Whether a credential is currently available for `tool_name`. Used to
    /// resolve Tier-2 fallback groups and to refuse a run eagerly (§6.1, S5).
    fn has_credential(&self, tool_name: &str) -> bool;
}

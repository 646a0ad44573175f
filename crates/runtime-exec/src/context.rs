//! `NodeContext`, the `NodeHandler` trait, the node registry, and the
//! built-in handlers for the node types the executor knows how to run
//! without a caller-supplied implementation (`input`, `output`, `router`,
//! `llm_generate`, `llm_tool_use`, `human_input`).
//!
//! `function` and `event_loop` nodes have no built-in behavior: a caller
//! must register a handler for each such node id via [`NodeRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use runtime_core::{
    CancellationHandle, LlmMessage, LlmProvider, LlmToolSpec, NodeResult, NodeSpec, NodeType,
    RuntimeError, RuntimeResult, ToolDispatcher, ToolOutcome,
};
use runtime_events::EventBus;
use serde_json::Value;

/// A tool dispatcher with no tools and no credentials, for graphs that
/// declare none (the default a [`crate::executor::GraphExecutorBuilder`]
/// falls back to when the caller doesn't supply one).
#[derive(Debug, Default)]
pub struct NullToolDispatcher;

#[async_trait]
impl ToolDispatcher for NullToolDispatcher {
    async fn dispatch(&self, tool_name: &str, _input: Value) -> ToolOutcome {
        ToolOutcome::unknown_tool(tool_name)
    }

    fn has_credential(&self, _tool_name: &str) -> bool {
        false
    }
}

/// Everything a node handler needs to do its job: a read-only view of its
/// declared inputs, the collaborator handles it's allowed to use, and the
/// identifiers needed to emit events or log against the right run.
#[derive(Clone)]
pub struct NodeContext {
    /// The stream this execution belongs to.
    pub stream_id: String,
    /// This execution's id.
    pub execution_id: String,
    /// Values for the node's declared `input_keys`, pre-fetched from the
    /// execution scope before the handler runs.
    pub input: HashMap<String, Value>,
    /// Tool dispatch collaborator (§6.1). Always present; a no-op
    /// implementation that reports every tool missing is a valid default.
    pub tools: Arc<dyn ToolDispatcher>,
    /// LLM collaborator (§6.1), absent for graphs with no LLM-backed nodes.
    pub llm: Option<Arc<dyn LlmProvider>>,
    /// Event bus, so a handler (human input) can emit pause/resume around a
    /// suspension point.
    pub events: EventBus,
    /// Cooperative cancellation, checked between retries and by long-running
    /// handlers at their own suspension points.
    pub cancellation: CancellationHandle,
}

impl NodeContext {
    /// Fetch a declared input by key.
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.input.get(key)
    }

    /// Fetch a declared input as a string, if present and a JSON string.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(Value::as_str)
    }
}

/// A node's behavior. Implementors are resolved either from the built-in
/// set (§4.6.1's closed `node_type`s that need no caller wiring) or from a
/// caller-registered [`NodeRegistry`] entry for `function` and `event_loop`
/// nodes.
#[async_trait]
pub trait NodeHandler: Send + Sync + std::fmt::Debug {
    /// Evaluate `node` once against `ctx`, returning its [`NodeResult`].
    ///
    /// Implementations should return `Err` (rather than panic) for
    /// recoverable failures; the executor's retry loop treats a returned
    /// error the same as a panic — both become `NodeResult::from_system_exception`.
    async fn handle(&self, node: &NodeSpec, ctx: &NodeContext) -> RuntimeResult<NodeResult>;
}

/// Registry of caller-supplied handlers, keyed by node id. Required for
/// every `function` and `event_loop` node in a graph; the executor refuses
/// to start a run against a node with no resolvable handler.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    handlers: DashMap<String, Arc<dyn NodeHandler>>,
}

impl NodeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `node_id`, replacing any prior registration.
    pub fn register(&self, node_id: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(node_id.into(), handler);
    }

    /// Look up the handler registered for `node_id`, if any.
    pub fn get(&self, node_id: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(node_id).map(|e| e.clone())
    }
}

/// Collaborator the `human_input` built-in handler suspends on. Not
/// specified further by the core (human input collection UX is out of
/// scope, §1) — only the interface is.
#[async_trait]
pub trait HumanInputProvider: Send + Sync + std::fmt::Debug {
    /// Collect a value for `node_id`, given its declared `input`. Returns
    /// the keys to merge into the execution scope under the node's
    /// `output_keys`.
    async fn collect(
        &self,
        node_id: &str,
        prompt: Option<&str>,
        input: &HashMap<String, Value>,
    ) -> RuntimeResult<HashMap<String, Value>>;
}

/// Collaborator an `llm_decide` edge delegates to. The decision is an
/// opaque string matched case-sensitively against candidate target node
/// ids (§9 "Open questions — `llm_decide` edges").
#[async_trait]
pub trait DecisionFn: Send + Sync + std::fmt::Debug {
    /// Choose one of `candidates` (target node ids of the `llm_decide`
    /// edges leaving the current node). `condition_expr` is the edge's
    /// optional free-form hint, passed through verbatim.
    async fn decide(
        &self,
        condition_expr: Option<&str>,
        ctx: &NodeContext,
        candidates: &[String],
    ) -> RuntimeResult<String>;
}

/// Passthrough handler for `input` and `output` node types: the graph's
/// entry/exit adapters have no behavior of their own beyond surfacing
/// whatever the caller already placed in the execution scope (§3 "Input …
/// shapes external input_data", "Output … shapes the execution scope into
/// terminal output" — both are a no-op copy at this layer; the shaping is
/// the caller's `input_mapping`/`output_keys` declarations).
#[derive(Debug, Default)]
pub struct PassthroughHandler;

#[async_trait]
impl NodeHandler for PassthroughHandler {
    async fn handle(&self, _node: &NodeSpec, ctx: &NodeContext) -> RuntimeResult<NodeResult> {
        Ok(NodeResult::success(ctx.input.clone()))
    }
}

/// Built-in handler for `router` nodes: reads the node's first declared
/// input key, looks it up in `node.routes`, and surfaces the decision as
/// output for a downstream `conditional` edge to branch on. The router
/// itself never alters edge traversal directly — see `SPEC_FULL.md`'s
/// routing open question.
#[derive(Debug, Default)]
pub struct RouterHandler;

#[async_trait]
impl NodeHandler for RouterHandler {
    async fn handle(&self, node: &NodeSpec, ctx: &NodeContext) -> RuntimeResult<NodeResult> {
        let Some(key) = node.input_keys.first() else {
            return Ok(NodeResult::failure("router node declares no input_keys"));
        };
        let Some(selector) = ctx.input_str(key) else {
            return Ok(NodeResult::failure(format!(
                "router node missing input '{key}'"
            )));
        };
        match node.routes.get(selector) {
            Some(target) => {
                let mut output = HashMap::new();
                output.insert("selected_route".to_string(), Value::String(selector.to_string()));
                output.insert("target".to_string(), Value::String(target.clone()));
                Ok(NodeResult::success(output))
            }
            None => Ok(NodeResult::failure(format!(
                "no route declared for selector '{selector}'"
            ))),
        }
    }
}

fn messages_for(node: &NodeSpec, ctx: &NodeContext) -> Vec<LlmMessage> {
    let prompt = node
        .input_keys
        .first()
        .and_then(|k| ctx.input_str(k))
        .unwrap_or_default();
    vec![LlmMessage {
        role: "user".to_string(),
        content: prompt.to_string(),
    }]
}

/// Built-in handler for `llm_generate` nodes: a single completion call
/// through the node context's LLM collaborator.
#[derive(Debug, Default)]
pub struct LlmGenerateHandler;

#[async_trait]
impl NodeHandler for LlmGenerateHandler {
    async fn handle(&self, node: &NodeSpec, ctx: &NodeContext) -> RuntimeResult<NodeResult> {
        let Some(llm) = &ctx.llm else {
            return Ok(NodeResult::failure("no LLM provider configured"));
        };
        let messages = messages_for(node, ctx);
        let completion = llm
            .complete(&messages, node.system_prompt.as_deref(), false)
            .await?;
        let mut output = HashMap::new();
        output.insert("content".to_string(), Value::String(completion.content));
        output.insert("model".to_string(), Value::String(completion.model));
        let mut result = NodeResult::success(output);
        result.tokens_used = completion.input_tokens + completion.output_tokens;
        Ok(result)
    }
}

/// Built-in handler for `llm_tool_use` nodes: a completion call with an
/// internal tool-use loop handled by the provider (§6.1). The node's
/// declared `tools` are resolved to their effective (fallback-applied)
/// names and offered to the provider as bare-schema [`LlmToolSpec`]s; the
/// provider is responsible for the tool-calling protocol, this handler only
/// wires the collaborator contracts together.
#[derive(Debug, Default)]
pub struct LlmToolUseHandler;

#[async_trait]
impl NodeHandler for LlmToolUseHandler {
    async fn handle(&self, node: &NodeSpec, ctx: &NodeContext) -> RuntimeResult<NodeResult> {
        let Some(llm) = &ctx.llm else {
            return Ok(NodeResult::failure("no LLM provider configured"));
        };
        let messages = messages_for(node, ctx);
        let tool_specs: Vec<LlmToolSpec> = node
            .tools
            .iter()
            .filter_map(|decl| {
                decl.candidates()
                    .iter()
                    .find(|name| ctx.tools.has_credential(name))
                    .map(|name| LlmToolSpec {
                        name: name.clone(),
                        description: String::new(),
                        parameters: Value::Object(Default::default()),
                    })
            })
            .collect();
        let completion = llm
            .complete_with_tools(
                &messages,
                node.system_prompt.as_deref(),
                &tool_specs,
                ctx.tools.as_ref(),
            )
            .await?;
        let mut output = HashMap::new();
        output.insert("content".to_string(), Value::String(completion.content));
        output.insert("model".to_string(), Value::String(completion.model));
        let mut result = NodeResult::success(output);
        result.tokens_used = completion.input_tokens + completion.output_tokens;
        Ok(result)
    }
}

/// Built-in handler for `human_input` nodes: suspends on a pluggable
/// [`HumanInputProvider`], emitting `execution_paused` before the call and
/// `execution_resumed` after. With no provider configured the node fails
/// outright rather than hanging (there is no `PAUSED` executor state — see
/// `SPEC_FULL.md`'s open question on this node type).
#[derive(Debug)]
pub struct HumanInputHandler {
    provider: Option<Arc<dyn HumanInputProvider>>,
}

impl HumanInputHandler {
    /// Build a handler backed by `provider`, or `None` to always fail.
    pub fn new(provider: Option<Arc<dyn HumanInputProvider>>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl NodeHandler for HumanInputHandler {
    async fn handle(&self, node: &NodeSpec, ctx: &NodeContext) -> RuntimeResult<NodeResult> {
        let Some(provider) = &self.provider else {
            return Ok(NodeResult::failure("no human input provider configured"));
        };
        ctx.events
            .emit_execution_paused(&ctx.stream_id, &ctx.execution_id, "awaiting human input");
        let collected = provider
            .collect(&node.id, node.system_prompt.as_deref(), &ctx.input)
            .await;
        ctx.events
            .emit_execution_resumed(&ctx.stream_id, &ctx.execution_id);
        match collected {
            Ok(output) => Ok(NodeResult::success(output)),
            Err(e) => Ok(NodeResult::failure(e.to_string())),
        }
    }
}

/// Factory for the built-in handlers, holding the one collaborator
/// (`human_input` provider) that isn't reachable purely through
/// [`NodeContext`].
#[derive(Debug, Default)]
pub struct BuiltinHandlers {
    human_input: Option<Arc<dyn HumanInputProvider>>,
}

impl BuiltinHandlers {
    /// Build the built-in handler set, optionally wiring a human input
    /// collaborator.
    pub fn new(human_input: Option<Arc<dyn HumanInputProvider>>) -> Self {
        Self { human_input }
    }

    /// Resolve the built-in handler for `node_type`, or `None` for
    /// `function`/`event_loop` (which must come from a [`NodeRegistry`]).
    pub fn resolve(&self, node_type: NodeType) -> Option<Arc<dyn NodeHandler>> {
        match node_type {
            NodeType::Input | NodeType::Output => Some(Arc::new(PassthroughHandler)),
            NodeType::Router => Some(Arc::new(RouterHandler)),
            NodeType::LlmGenerate => Some(Arc::new(LlmGenerateHandler)),
            NodeType::LlmToolUse => Some(Arc::new(LlmToolUseHandler)),
            NodeType::HumanInput => Some(Arc::new(HumanInputHandler::new(self.human_input.clone()))),
            NodeType::Function | NodeType::EventLoop => None,
        }
    }
}

/// Resolve the handler for `node`: the built-in set first, falling back to
/// `registry` for `function`/`event_loop` nodes. Returns a configuration
/// error if neither has one.
pub fn resolve_handler(
    node: &NodeSpec,
    builtins: &BuiltinHandlers,
    registry: &NodeRegistry,
) -> RuntimeResult<Arc<dyn NodeHandler>> {
    if let Some(handler) = builtins.resolve(node.node_type) {
        return Ok(handler);
    }
    registry
        .get(&node.id)
        .ok_or_else(|| RuntimeError::Configuration(format!("no handler registered for node '{}'", node.id)))
}

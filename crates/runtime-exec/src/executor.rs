//! The graph executor (§4.6): the heart of the runtime. Drives one
//! execution end to end — node dispatch, retry/backoff, edge selection,
//! timeout handling, and log persistence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use runtime_core::{
    evaluate_expr, CancellationHandle, EdgeCondition, EdgeSpec, EvalContext, ExecutionQuality,
    ExecutionResult, GraphSpec, LlmProvider, NodeDetail, NodeResult, NodeSpec, NodeStepLog,
    NodeType, RetryConfig, RunStatus, RunSummaryLog, RuntimeError, RuntimeResult, ToolDispatcher,
};
use runtime_events::EventBus;
use runtime_log::RuntimeLogStore;
use runtime_state::{IsolationLevel, SharedStateManager, StateScope};
use serde_json::{json, Value};

use crate::context::{resolve_handler, BuiltinHandlers, DecisionFn, HumanInputProvider, NodeContext, NodeRegistry, NullToolDispatcher};
use crate::retry::run_node_with_retry;

fn generate_run_id() -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    let suffix: u32 = rand::random();
    format!("{timestamp}_{suffix:08x}")
}

/// Validate that every tool a node declares resolves to a credentialed
/// tool, eagerly (§6.1, S5): refuses to start a run rather than failing
/// mid-way on a node that was never going to have a usable tool.
fn check_tool_credentials(graph: &GraphSpec, tools: &dyn ToolDispatcher) -> RuntimeResult<()> {
    let mut missing = Vec::new();
    for node in &graph.nodes {
        for decl in &node.tools {
            let candidates = decl.candidates();
            if !candidates.iter().any(|name| tools.has_credential(name)) {
                missing.extend(candidates.iter().cloned());
            }
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RuntimeError::MissingCredential(missing))
    }
}

/// Fluent constructor for [`GraphExecutor`]. Collaborators not supplied
/// fall back to a no-op default (no tools, no LLM, no human input, no
/// `llm_decide` resolution, default retry policy, never-cancelled).
pub struct GraphExecutorBuilder {
    graph: GraphSpec,
    stream_id: String,
    tools: Arc<dyn ToolDispatcher>,
    llm: Option<Arc<dyn LlmProvider>>,
    human_input: Option<Arc<dyn HumanInputProvider>>,
    decision_fn: Option<Arc<dyn DecisionFn>>,
    retry_config: RetryConfig,
    is_empty_response: Option<Arc<dyn Fn(&NodeResult) -> bool + Send + Sync>>,
    cancellation: CancellationHandle,
    resume_from: Option<String>,
}

impl std::fmt::Debug for GraphExecutorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphExecutorBuilder")
            .field("graph_id", &self.graph.id)
            .field("stream_id", &self.stream_id)
            .field("llm_configured", &self.llm.is_some())
            .field("human_input_configured", &self.human_input.is_some())
            .field("decision_fn_configured", &self.decision_fn.is_some())
            .field("retry_config", &self.retry_config)
            .field("resume_from", &self.resume_from)
            .finish()
    }
}

impl GraphExecutorBuilder {
    /// Start building an executor for `graph`, on behalf of `stream_id`.
    pub fn new(graph: GraphSpec, stream_id: impl Into<String>) -> Self {
        Self {
            graph,
            stream_id: stream_id.into(),
            tools: Arc::new(NullToolDispatcher),
            llm: None,
            human_input: None,
            decision_fn: None,
            retry_config: RetryConfig::default(),
            is_empty_response: None,
            cancellation: CancellationHandle::new(),
            resume_from: None,
        }
    }

    /// Start at `node_id` instead of `graph.entry_node` (§9, resuming a
    /// timed-out run from a caller-supplied `session_state`). The caller is
    /// responsible for seeding shared state with that snapshot's memory
    /// before calling [`GraphExecutor::execute`].
    pub fn resume_from(mut self, node_id: impl Into<String>) -> Self {
        self.resume_from = Some(node_id.into());
        self
    }

    /// Tool dispatch collaborator (§6.1).
    pub fn tools(mut self, tools: Arc<dyn ToolDispatcher>) -> Self {
        self.tools = tools;
        self
    }

    /// LLM collaborator (§6.1).
    pub fn llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Human input collaborator for `human_input` nodes.
    pub fn human_input(mut self, provider: Arc<dyn HumanInputProvider>) -> Self {
        self.human_input = Some(provider);
        self
    }

    /// Decision collaborator for `llm_decide` edges.
    pub fn decision_fn(mut self, decision_fn: Arc<dyn DecisionFn>) -> Self {
        self.decision_fn = Some(decision_fn);
        self
    }

    /// Override the default retry/backoff policy.
    pub fn retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Predicate classifying a successful [`NodeResult`] as "empty" (§4.6.3).
    pub fn is_empty_response(mut self, predicate: Arc<dyn Fn(&NodeResult) -> bool + Send + Sync>) -> Self {
        self.is_empty_response = Some(predicate);
        self
    }

    /// Share a cancellation handle with the caller, so it can stop this run.
    pub fn cancellation(mut self, cancellation: CancellationHandle) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Finish building, wiring in the shared infrastructure every execution
    /// needs (state, events, and the log store) plus a concrete execution id.
    pub fn build(
        self,
        execution_id: impl Into<String>,
        state: SharedStateManager,
        events: EventBus,
        log_store: Arc<RuntimeLogStore>,
        registry: Arc<NodeRegistry>,
    ) -> GraphExecutor {
        GraphExecutor {
            graph: self.graph,
            run_id: generate_run_id(),
            stream_id: self.stream_id,
            execution_id: execution_id.into(),
            state,
            events,
            log_store,
            builtins: BuiltinHandlers::new(self.human_input),
            registry,
            tools: self.tools,
            llm: self.llm,
            decision_fn: self.decision_fn,
            retry_config: self.retry_config,
            is_empty_response: self.is_empty_response,
            cancellation: self.cancellation,
            resume_from: self.resume_from,
        }
    }
}

/// Drives one execution of `graph` end to end: node dispatch with retry,
/// edge selection, wall-clock timeout, and L1/L2 log persistence.
pub struct GraphExecutor {
    graph: GraphSpec,
    run_id: String,
    stream_id: String,
    execution_id: String,
    state: SharedStateManager,
    events: EventBus,
    log_store: Arc<RuntimeLogStore>,
    builtins: BuiltinHandlers,
    registry: Arc<NodeRegistry>,
    tools: Arc<dyn ToolDispatcher>,
    llm: Option<Arc<dyn LlmProvider>>,
    decision_fn: Option<Arc<dyn DecisionFn>>,
    retry_config: RetryConfig,
    is_empty_response: Option<Arc<dyn Fn(&NodeResult) -> bool + Send + Sync>>,
    cancellation: CancellationHandle,
    resume_from: Option<String>,
}

impl std::fmt::Debug for GraphExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphExecutor")
            .field("run_id", &self.run_id)
            .field("graph_id", &self.graph.id)
            .field("stream_id", &self.stream_id)
            .field("execution_id", &self.execution_id)
            .finish()
    }
}

impl GraphExecutor {
    /// The run id this execution logs under.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run the graph to completion (or timeout/cancellation), persisting
    /// logs as it goes. `input_data` seeds the execution's shared-state
    /// partition before the entry node runs.
    #[tracing::instrument(skip_all, fields(run_id = %self.run_id, graph_id = %self.graph.id))]
    pub async fn execute(&self, input_data: HashMap<String, Value>) -> RuntimeResult<ExecutionResult> {
        self.graph.validate()?;
        check_tool_credentials(&self.graph, self.tools.as_ref())?;

        self.log_store.ensure_run_dir(&self.run_id).await?;
        for (key, value) in &input_data {
            self.state
                .write(key, value.clone(), &self.execution_id, &self.stream_id, IsolationLevel::Isolated, StateScope::Execution)
                .await?;
        }

        let started_at = chrono::Utc::now().to_rfc3339();
        self.log_store
            .save_summary(&self.run_id, &RunSummaryLog::started(&self.run_id, &self.graph.id, &started_at))
            .await?;
        self.events.emit_run_started(&self.stream_id, &self.execution_id, &self.graph.id);

        let mut current = self.resume_from.clone().unwrap_or_else(|| self.graph.entry_node.clone());
        let mut visited_path = Vec::new();
        let mut steps = 0usize;
        let start_wall = Instant::now();
        let mut total_retries = 0u32;
        let mut nodes_with_failures = Vec::new();
        let mut any_node_failed = false;
        let mut total_output_tokens = 0u64;
        let mut last_result = NodeResult::failure("no nodes executed");

        let outcome = loop {
            if self.cancellation.is_cancelled() {
                break self.finish(
                    RunStatus::Cancelled,
                    false,
                    Some("cancelled".to_string()),
                    HashMap::new(),
                    visited_path,
                    steps,
                    total_retries,
                    nodes_with_failures,
                    ExecutionQuality::Failed,
                    None,
                    &started_at,
                    total_output_tokens,
                )
                .await?;
            }

            if let Some(timeout) = self.graph.execution_timeout_seconds {
                if start_wall.elapsed().as_secs_f64() > timeout {
                    let memory = self
                        .state
                        .snapshot(StateScope::Execution, &self.execution_id, &self.stream_id)
                        .await;
                    let session_state = json!({ "memory": memory, "execution_path": visited_path });
                    break self
                        .finish(
                            RunStatus::TimedOut,
                            false,
                            Some(format!("execution timed out after {timeout} seconds")),
                            HashMap::new(),
                            visited_path,
                            steps,
                            total_retries,
                            nodes_with_failures,
                            ExecutionQuality::Failed,
                            Some(session_state),
                            &started_at,
                            total_output_tokens,
                        )
                        .await?;
                }
            }

            if steps >= self.graph.max_steps {
                break self
                    .finish(
                        RunStatus::Failed,
                        false,
                        Some("max_steps exceeded".to_string()),
                        HashMap::new(),
                        visited_path,
                        steps,
                        total_retries,
                        nodes_with_failures,
                        ExecutionQuality::Failed,
                        None,
                        &started_at,
                        total_output_tokens,
                    )
                    .await?;
            }

            let node = self
                .graph
                .get_node(&current)
                .ok_or_else(|| RuntimeError::UnknownNode(current.clone()))?;
            visited_path.push(current.clone());
            steps += 1;

            let input = self.fetch_inputs(node).await?;
            let ctx = NodeContext {
                stream_id: self.stream_id.clone(),
                execution_id: self.execution_id.clone(),
                input,
                tools: self.tools.clone(),
                llm: self.llm.clone(),
                events: self.events.clone(),
                cancellation: self.cancellation.clone(),
            };

            let suppress_events = node.node_type == NodeType::EventLoop;
            if !suppress_events {
                self.events.emit_node_started(&self.stream_id, &self.execution_id, &node.id);
            }

            let handler = resolve_handler(node, &self.builtins, &self.registry)?;
            let node_started_at = chrono::Utc::now().to_rfc3339();
            let result = run_node_with_retry(
                handler.as_ref(),
                node,
                &ctx,
                &self.retry_config,
                self.is_empty_response.as_deref(),
            )
            .await;

            if !suppress_events {
                self.events
                    .emit_node_completed(&self.stream_id, &self.execution_id, &node.id, result.success, result.latency_ms);
            }

            self.persist_output(node, &result).await?;

            let retries_used = result.retries_used.unwrap_or(0);
            total_retries += retries_used;
            if retries_used > 0 || !result.success {
                nodes_with_failures.push(node.id.clone());
            }
            if !result.success {
                any_node_failed = true;
            }
            total_output_tokens += result.tokens_used;

            let _ = self
                .log_store
                .append_node_detail(
                    &self.run_id,
                    &NodeDetail {
                        node_id: node.id.clone(),
                        started_at: node_started_at,
                        duration_ms: result.latency_ms,
                        success: result.success,
                        error: result.error.clone(),
                        tokens_used: result.tokens_used,
                        retries: retries_used,
                        execution_quality: result.execution_quality.unwrap_or(ExecutionQuality::Failed),
                    },
                )
                .await;

            last_result = result.clone();

            if self.graph.terminal_nodes.contains(&current) {
                let quality = Self::overall_quality(result.success, any_node_failed, total_retries);
                break self
                    .finish(
                        if result.success { RunStatus::Completed } else { RunStatus::Failed },
                        result.success,
                        result.error.clone(),
                        result.output.clone(),
                        visited_path,
                        steps,
                        total_retries,
                        nodes_with_failures,
                        quality,
                        None,
                        &started_at,
                        total_output_tokens,
                    )
                    .await?;
            }

            match self.pick_next(&current, &result, &ctx).await? {
                Some((edge, target)) => {
                    self.apply_input_mapping(&edge).await?;
                    self.events
                        .emit_edge_traversed(&self.stream_id, &self.execution_id, &edge.id, &current, &target);
                    current = target;
                }
                None => {
                    let quality = Self::overall_quality(last_result.success, any_node_failed, total_retries);
                    break self
                        .finish(
                            if last_result.success { RunStatus::Completed } else { RunStatus::Failed },
                            last_result.success,
                            last_result.error.clone(),
                            last_result.output.clone(),
                            visited_path,
                            steps,
                            total_retries,
                            nodes_with_failures,
                            quality,
                            None,
                            &started_at,
                            total_output_tokens,
                        )
                        .await?;
                }
            }
        };

        Ok(outcome)
    }

    fn overall_quality(success: bool, any_node_failed: bool, total_retries: u32) -> ExecutionQuality {
        if !success {
            ExecutionQuality::Failed
        } else if any_node_failed {
            ExecutionQuality::Degraded
        } else if total_retries > 0 {
            ExecutionQuality::Recovered
        } else {
            ExecutionQuality::Clean
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        status: RunStatus,
        success: bool,
        error: Option<String>,
        output: HashMap<String, Value>,
        path: Vec<String>,
        steps_executed: usize,
        total_retries: u32,
        nodes_with_failures: Vec<String>,
        execution_quality: ExecutionQuality,
        session_state: Option<Value>,
        started_at: &str,
        total_output_tokens: u64,
    ) -> RuntimeResult<ExecutionResult> {
        let completed_at = chrono::Utc::now().to_rfc3339();
        let summary = RunSummaryLog {
            run_id: self.run_id.clone(),
            agent_id: self.graph.id.clone(),
            status,
            started_at: started_at.to_string(),
            completed_at: Some(completed_at),
            duration_ms: None,
            total_nodes_executed: steps_executed,
            node_path: path.clone(),
            total_input_tokens: 0,
            total_output_tokens,
            execution_quality: Some(execution_quality),
            needs_attention: Some(!success && session_state.is_none() && status != RunStatus::Cancelled),
        };
        self.log_store.save_summary(&self.run_id, &summary).await?;
        self.events
            .emit_run_completed(&self.stream_id, &self.execution_id, success);

        Ok(ExecutionResult {
            success,
            output,
            path,
            steps_executed,
            error,
            total_retries,
            nodes_with_failures,
            execution_quality,
            session_state,
        })
    }

    async fn fetch_inputs(&self, node: &NodeSpec) -> RuntimeResult<HashMap<String, Value>> {
        let mut input = HashMap::new();
        for key in &node.input_keys {
            if let Some(value) = self
                .state
                .read(key, &self.execution_id, &self.stream_id, IsolationLevel::Isolated)
                .await?
            {
                input.insert(key.clone(), value);
            }
        }
        Ok(input)
    }

    async fn persist_output(&self, node: &NodeSpec, result: &NodeResult) -> RuntimeResult<()> {
        let filtered: Vec<(&String, &Value)> = if node.output_keys.is_empty() {
            result.output.iter().collect()
        } else {
            result
                .output
                .iter()
                .filter(|(k, _)| node.output_keys.contains(k))
                .collect()
        };
        for (key, value) in filtered {
            self.state
                .write(key, value.clone(), &self.execution_id, &self.stream_id, IsolationLevel::Isolated, StateScope::Execution)
                .await?;
        }
        Ok(())
    }

    /// Rename-with-retained-original (§9): copy each mapped source key to
    /// its target key, leaving the source key in place.
    async fn apply_input_mapping(&self, edge: &EdgeSpec) -> RuntimeResult<()> {
        let Some(mapping) = &edge.input_mapping else {
            return Ok(());
        };
        for (source_key, target_key) in mapping {
            if let Some(value) = self
                .state
                .read(source_key, &self.execution_id, &self.stream_id, IsolationLevel::Isolated)
                .await?
            {
                self.state
                    .write(target_key, value, &self.execution_id, &self.stream_id, IsolationLevel::Isolated, StateScope::Execution)
                    .await?;
            }
        }
        Ok(())
    }

    /// Edge selection (§4.6.4): filter by condition, sort matches by
    /// `priority` descending (declaration order breaks ties), return the
    /// first match's target.
    async fn pick_next(
        &self,
        current: &str,
        result: &NodeResult,
        ctx: &NodeContext,
    ) -> RuntimeResult<Option<(EdgeSpec, String)>> {
        let extra = self
            .state
            .snapshot(StateScope::Execution, &self.execution_id, &self.stream_id)
            .await;
        let eval_ctx = EvalContext {
            output: result.output.clone(),
            error: result.error.clone(),
            extra,
        };

        let mut matched: Vec<(usize, &EdgeSpec)> = Vec::new();
        let mut llm_decide_candidates: Vec<&EdgeSpec> = Vec::new();

        for (idx, edge) in self.graph.edges.iter().enumerate() {
            if edge.source != current {
                continue;
            }
            match edge.condition {
                EdgeCondition::Always => matched.push((idx, edge)),
                EdgeCondition::OnSuccess if result.success => matched.push((idx, edge)),
                EdgeCondition::OnSuccess => {}
                EdgeCondition::OnFailure if !result.success => matched.push((idx, edge)),
                EdgeCondition::OnFailure => {}
                EdgeCondition::Conditional => {
                    let expr = edge.condition_expr.as_deref().unwrap_or("false");
                    if evaluate_expr(expr, &eval_ctx)? {
                        matched.push((idx, edge));
                    }
                }
                EdgeCondition::LlmDecide => llm_decide_candidates.push(edge),
            }
        }

        if !llm_decide_candidates.is_empty() {
            if let Some(decision_fn) = &self.decision_fn {
                let candidates: Vec<String> = llm_decide_candidates.iter().map(|e| e.target.clone()).collect();
                let condition_expr = llm_decide_candidates.iter().find_map(|e| e.condition_expr.as_deref());
                let decision = decision_fn.decide(condition_expr, ctx, &candidates).await?;
                let step = NodeStepLog {
                    step_id: uuid::Uuid::new_v4().to_string(),
                    node_id: current.to_string(),
                    name: decision.clone(),
                    started_at: chrono::Utc::now().to_rfc3339(),
                    duration_ms: 0,
                    success: candidates.contains(&decision),
                    error: None,
                    input_digest: None,
                    output_digest: None,
                };
                let _ = self.log_store.append_step(&self.run_id, &step).await;
                if let Some((idx, edge)) = self
                    .graph
                    .edges
                    .iter()
                    .enumerate()
                    .find(|(_, e)| e.source == current && e.condition == EdgeCondition::LlmDecide && e.target == decision)
                {
                    matched.push((idx, edge));
                }
            } else {
                tracing::warn!(node_id = %current, "llm_decide edge present but no DecisionFn configured; treated as never-matching");
                self.events.emit_problem_reported(
                    &self.stream_id,
                    &self.execution_id,
                    &format!("no DecisionFn configured for llm_decide edges from '{current}'"),
                );
            }
        }

        matched.sort_by(|a, b| b.1.priority.cmp(&a.1.priority).then(a.0.cmp(&b.0)));

        Ok(matched.first().map(|(_, edge)| ((*edge).clone(), edge.target.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::{EdgeCondition, Goal, NodeType, ToolDecl};
    use runtime_log::RuntimeLogStore;
    use std::collections::HashSet;

    fn node(id: &str, node_type: NodeType) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            node_type,
            input_keys: vec![],
            output_keys: vec![],
            tools: vec![],
            system_prompt: None,
            max_retries: 0,
            routes: HashMap::new(),
        }
    }

    fn edge(id: &str, source: &str, target: &str, condition: EdgeCondition) -> EdgeSpec {
        EdgeSpec {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            condition,
            condition_expr: None,
            priority: 0,
            input_mapping: None,
        }
    }

    fn harness(graph: GraphSpec) -> (GraphExecutor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log_store = Arc::new(RuntimeLogStore::new(dir.path()));
        let state = SharedStateManager::new(None);
        let events = EventBus::new(64);
        let registry = Arc::new(NodeRegistry::new());
        let executor = GraphExecutorBuilder::new(graph, "s1").build("e1", state, events, log_store, registry);
        (executor, dir)
    }

    #[tokio::test]
    async fn linear_success_visits_every_node_in_order() {
        let graph = GraphSpec {
            id: "g1".into(),
            goal_id: "goal1".into(),
            entry_node: "n1".into(),
            terminal_nodes: HashSet::from(["n3".to_string()]),
            nodes: vec![
                node("n1", NodeType::Input),
                node("n2", NodeType::Input),
                node("n3", NodeType::Output),
            ],
            edges: vec![
                edge("e1", "n1", "n2", EdgeCondition::OnSuccess),
                edge("e2", "n2", "n3", EdgeCondition::OnSuccess),
            ],
            execution_timeout_seconds: None,
            max_steps: 1000,
        };
        let (executor, _dir) = harness(graph);
        let result = executor.execute(HashMap::new()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.path, vec!["n1", "n2", "n3"]);
        assert_eq!(result.steps_executed, 3);
        assert_eq!(result.execution_quality, ExecutionQuality::Clean);
    }

    #[tokio::test]
    async fn single_terminal_entry_node_completes_in_one_step() {
        let graph = GraphSpec {
            id: "g1".into(),
            goal_id: "goal1".into(),
            entry_node: "n1".into(),
            terminal_nodes: HashSet::from(["n1".to_string()]),
            nodes: vec![node("n1", NodeType::Input)],
            edges: vec![],
            execution_timeout_seconds: None,
            max_steps: 1000,
        };
        let (executor, _dir) = harness(graph);
        let result = executor.execute(HashMap::new()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.steps_executed, 1);
    }

    #[tokio::test]
    async fn branches_on_failure_to_alternate_terminal() {
        let graph = GraphSpec {
            id: "g1".into(),
            goal_id: "goal1".into(),
            entry_node: "router".into(),
            terminal_nodes: HashSet::from(["ok".to_string(), "fallback".to_string()]),
            nodes: vec![
                {
                    let mut n = node("router", NodeType::Router);
                    n.input_keys = vec!["choice".into()];
                    n
                },
                node("ok", NodeType::Output),
                node("fallback", NodeType::Output),
            ],
            edges: vec![
                edge("e1", "router", "ok", EdgeCondition::OnSuccess),
                edge("e2", "router", "fallback", EdgeCondition::OnFailure),
            ],
            execution_timeout_seconds: None,
            max_steps: 1000,
        };
        let (executor, _dir) = harness(graph);
        let mut input = HashMap::new();
        input.insert("choice".to_string(), Value::String("nonexistent".to_string()));
        let result = executor.execute(input).await.unwrap();
        assert_eq!(result.path, vec!["router", "fallback"]);
        assert_eq!(result.execution_quality, ExecutionQuality::Degraded);
    }

    #[tokio::test]
    async fn wall_clock_timeout_produces_resumable_session_state() {
        #[derive(Debug)]
        struct SleepyHandler;
        #[async_trait::async_trait]
        impl crate::context::NodeHandler for SleepyHandler {
            async fn handle(
                &self,
                _node: &NodeSpec,
                _ctx: &NodeContext,
            ) -> RuntimeResult<NodeResult> {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                Ok(NodeResult::success(HashMap::new()))
            }
        }

        let graph = GraphSpec {
            id: "g1".into(),
            goal_id: "goal1".into(),
            entry_node: "n1".into(),
            terminal_nodes: HashSet::from(["n3".to_string()]),
            nodes: vec![
                node("n1", NodeType::Function),
                node("n2", NodeType::Function),
                node("n3", NodeType::Function),
            ],
            edges: vec![
                edge("e1", "n1", "n2", EdgeCondition::Always),
                edge("e2", "n2", "n3", EdgeCondition::Always),
            ],
            execution_timeout_seconds: Some(0.1),
            max_steps: 1000,
        };
        let dir = tempfile::tempdir().unwrap();
        let log_store = Arc::new(RuntimeLogStore::new(dir.path()));
        let state = SharedStateManager::new(None);
        let events = EventBus::new(64);
        let registry = Arc::new(NodeRegistry::new());
        registry.register("n1", Arc::new(SleepyHandler));
        registry.register("n2", Arc::new(SleepyHandler));
        registry.register("n3", Arc::new(SleepyHandler));
        let executor = GraphExecutorBuilder::new(graph, "s1").build("e1", state, events, log_store, registry);

        let result = executor.execute(HashMap::new()).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
        assert!(result.steps_executed >= 1 && result.steps_executed < 3);
        let session_state = result.session_state.unwrap();
        assert!(session_state.get("memory").is_some());
        assert!(session_state.get("execution_path").is_some());
    }

    #[tokio::test]
    async fn missing_tool_credential_refuses_to_start() {
        let mut entry = node("n1", NodeType::LlmToolUse);
        entry.tools = vec![ToolDecl::Exact("web_search".into())];
        let graph = GraphSpec {
            id: "g1".into(),
            goal_id: "goal1".into(),
            entry_node: "n1".into(),
            terminal_nodes: HashSet::from(["n1".to_string()]),
            nodes: vec![entry],
            edges: vec![],
            execution_timeout_seconds: None,
            max_steps: 1000,
        };
        let (executor, _dir) = harness(graph);
        let result = executor.execute(HashMap::new()).await;
        assert!(matches!(result, Err(RuntimeError::MissingCredential(_))));
    }

    #[tokio::test]
    async fn max_retries_zero_means_single_attempt_and_failure_propagates() {
        #[derive(Debug)]
        struct AlwaysFails;
        #[async_trait::async_trait]
        impl crate::context::NodeHandler for AlwaysFails {
            async fn handle(&self, _node: &NodeSpec, _ctx: &NodeContext) -> RuntimeResult<NodeResult> {
                Ok(NodeResult::failure("nope"))
            }
        }
        let graph = GraphSpec {
            id: "g1".into(),
            goal_id: "goal1".into(),
            entry_node: "n1".into(),
            terminal_nodes: HashSet::from(["n1".to_string()]),
            nodes: vec![node("n1", NodeType::Function)],
            edges: vec![],
            execution_timeout_seconds: None,
            max_steps: 1000,
        };
        let dir = tempfile::tempdir().unwrap();
        let log_store = Arc::new(RuntimeLogStore::new(dir.path()));
        let state = SharedStateManager::new(None);
        let events = EventBus::new(64);
        let registry = Arc::new(NodeRegistry::new());
        registry.register("n1", Arc::new(AlwaysFails));
        let executor = GraphExecutorBuilder::new(graph, "s1").build("e1", state, events, log_store, registry);
        let result = executor.execute(HashMap::new()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.total_retries, 0);
        assert_eq!(result.execution_quality, ExecutionQuality::Failed);
    }

    #[test]
    fn unused_goal_type_reference() {
        let _ = Goal {
            id: "g".into(),
            name: "g".into(),
            description: String::new(),
            success_criteria: vec![],
            constraints: vec![],
        };
    }
}

//! One entry point's pool of concurrent [`GraphExecutor`] runs (§4.7).
//! Owns execution id assignment, a concurrency semaphore, and result
//! relaying; does not itself know about other entry points (that's
//! [`crate::runtime::AgentRuntime`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use runtime_core::{CancellationHandle, ExecutionResult, GraphSpec, LlmProvider, RetryConfig, ToolDispatcher};
use runtime_events::EventBus;
use runtime_log::RuntimeLogStore;
use runtime_state::SharedStateManager;
use serde_json::Value;
use tokio::sync::{Notify, Semaphore};

use crate::aggregator::OutcomeAggregator;
use crate::context::{DecisionFn, HumanInputProvider, NodeRegistry, NullToolDispatcher};
use crate::executor::GraphExecutorBuilder;

struct Slot {
    cancellation: CancellationHandle,
    result: parking_lot::Mutex<Option<ExecutionResult>>,
    notify: Notify,
}

/// Collaborators an [`ExecutionStream`] wires into every [`GraphExecutor`]
/// it launches. Mirrors [`GraphExecutorBuilder`]'s setters, but supplied
/// once per stream rather than once per run.
#[derive(Clone, Default)]
pub struct StreamCollaborators {
    /// Tool dispatch, shared by every run on this stream.
    pub tools: Option<Arc<dyn ToolDispatcher>>,
    /// LLM provider, shared by every run on this stream.
    pub llm: Option<Arc<dyn LlmProvider>>,
    /// Human input provider, shared by every run on this stream.
    pub human_input: Option<Arc<dyn HumanInputProvider>>,
    /// `llm_decide` edge collaborator, shared by every run on this stream.
    pub decision_fn: Option<Arc<dyn DecisionFn>>,
    /// `function`/`event_loop` handlers registered for this graph.
    pub registry: Option<Arc<NodeRegistry>>,
}

impl std::fmt::Debug for StreamCollaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCollaborators")
            .field("tools", &self.tools.is_some())
            .field("llm", &self.llm.is_some())
            .field("human_input", &self.human_input.is_some())
            .field("decision_fn", &self.decision_fn.is_some())
            .field("registry", &self.registry.is_some())
            .finish()
    }
}

/// Counts surfaced by [`ExecutionStream::get_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Executions launched on this stream, ever.
    pub total_launched: u64,
    /// Executions currently running or queued for a semaphore permit.
    pub in_flight: usize,
    /// Available concurrency permits right now.
    pub available_permits: usize,
}

/// Bounded pool of concurrent [`GraphExecutor`] runs for one entry point.
#[derive(Clone)]
pub struct ExecutionStream {
    stream_id: String,
    graph: GraphSpec,
    goal_id: String,
    collaborators: StreamCollaborators,
    retry_config: RetryConfig,
    state: SharedStateManager,
    events: EventBus,
    log_store: Arc<RuntimeLogStore>,
    aggregator: OutcomeAggregator,
    semaphore: Arc<Semaphore>,
    slots: Arc<DashMap<String, Arc<Slot>>>,
    total_launched: Arc<AtomicU64>,
}

impl std::fmt::Debug for ExecutionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStream")
            .field("stream_id", &self.stream_id)
            .field("graph_id", &self.graph.id)
            .finish()
    }
}

impl ExecutionStream {
    /// Build a stream for `graph`, bounding concurrency at
    /// `max_concurrent_executions`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream_id: impl Into<String>,
        graph: GraphSpec,
        goal_id: impl Into<String>,
        collaborators: StreamCollaborators,
        retry_config: RetryConfig,
        state: SharedStateManager,
        events: EventBus,
        log_store: Arc<RuntimeLogStore>,
        aggregator: OutcomeAggregator,
        max_concurrent_executions: usize,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            graph,
            goal_id: goal_id.into(),
            collaborators,
            retry_config,
            state,
            events,
            log_store,
            aggregator,
            semaphore: Arc::new(Semaphore::new(max_concurrent_executions.max(1))),
            slots: Arc::new(DashMap::new()),
            total_launched: Arc::new(AtomicU64::new(0)),
        }
    }

    /// This stream's id.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Launch a run against `input_data`, returning its execution id
    /// immediately; the run itself proceeds on a spawned task. Triggering
    /// when the semaphore is saturated queues (the default policy, §4.7) —
    /// it never rejects.
    ///
    /// `correlation_id`, if supplied, is threaded into the run's logged
    /// summary for downstream trace propagation. `session_state`, if
    /// supplied, seeds the execution scope from a prior timed-out run's
    /// snapshot and resumes from the last node on its `execution_path`
    /// (§9: resumption is the caller's decision, the core only guarantees
    /// the snapshot was sufficient).
    pub async fn execute(
        &self,
        input_data: HashMap<String, Value>,
        correlation_id: Option<String>,
        session_state: Option<Value>,
    ) -> String {
        let execution_id = uuid::Uuid::new_v4().to_string();
        self.total_launched.fetch_add(1, Ordering::Relaxed);

        let cancellation = CancellationHandle::new();
        let slot = Arc::new(Slot {
            cancellation: cancellation.clone(),
            result: parking_lot::Mutex::new(None),
            notify: Notify::new(),
        });
        self.slots.insert(execution_id.clone(), slot.clone());

        let mut merged_input = input_data;
        let mut resume_from = None;
        if let Some(session_state) = &session_state {
            if let Some(memory) = session_state.get("memory").and_then(Value::as_object) {
                for (key, value) in memory {
                    merged_input.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
            resume_from = session_state
                .get("execution_path")
                .and_then(Value::as_array)
                .and_then(|path| path.last())
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        if let Some(correlation_id) = correlation_id {
            merged_input
                .entry("correlation_id".to_string())
                .or_insert(Value::String(correlation_id));
        }

        let graph = self.graph.clone();
        let stream_id = self.stream_id.clone();
        let goal_id = self.goal_id.clone();
        let collaborators = self.collaborators.clone();
        let retry_config = self.retry_config;
        let state = self.state.clone();
        let events = self.events.clone();
        let log_store = self.log_store.clone();
        let aggregator = self.aggregator.clone();
        let semaphore = self.semaphore.clone();
        let registry = collaborators.registry.clone().unwrap_or_else(|| Arc::new(NodeRegistry::new()));

        let run_execution_id = execution_id.clone();
        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let mut builder = GraphExecutorBuilder::new(graph, &stream_id).cancellation(cancellation.clone()).retry_config(retry_config);
            if let Some(tools) = collaborators.tools {
                builder = builder.tools(tools);
            } else {
                builder = builder.tools(Arc::new(NullToolDispatcher));
            }
            if let Some(llm) = collaborators.llm {
                builder = builder.llm(llm);
            }
            if let Some(human_input) = collaborators.human_input {
                builder = builder.human_input(human_input);
            }
            if let Some(decision_fn) = collaborators.decision_fn {
                builder = builder.decision_fn(decision_fn);
            }
            if let Some(resume_from) = resume_from {
                builder = builder.resume_from(resume_from);
            }

            let executor = builder.build(run_execution_id.clone(), state, events, log_store, registry);
            let outcome = executor.execute(merged_input).await;

            let result = match outcome {
                Ok(result) => {
                    aggregator.record_execution(&goal_id, &result);
                    result
                }
                Err(e) => ExecutionResult {
                    success: false,
                    output: HashMap::new(),
                    path: vec![],
                    steps_executed: 0,
                    error: Some(e.to_string()),
                    total_retries: 0,
                    nodes_with_failures: vec![],
                    execution_quality: runtime_core::ExecutionQuality::Failed,
                    session_state: None,
                },
            };

            *slot.result.lock() = Some(result);
            slot.notify.notify_waiters();
        });

        execution_id
    }

    /// Block until `execution_id` reaches a terminal state, or `timeout`
    /// elapses (if supplied) -- `None` on an unknown id or an elapsed
    /// timeout.
    pub async fn wait_for_completion(
        &self,
        execution_id: &str,
        timeout: Option<std::time::Duration>,
    ) -> Option<ExecutionResult> {
        let slot = self.slots.get(execution_id)?.clone();
        loop {
            if let Some(result) = slot.result.lock().clone() {
                return Some(result);
            }
            let wait = slot.notify.notified();
            match timeout {
                Some(duration) => {
                    if tokio::time::timeout(duration, wait).await.is_err() {
                        return slot.result.lock().clone();
                    }
                }
                None => wait.await,
            }
        }
    }

    /// Request cooperative cancellation of `execution_id`. `false` if no
    /// such execution is known to this stream.
    pub fn cancel_execution(&self, execution_id: &str) -> bool {
        match self.slots.get(execution_id) {
            Some(slot) => {
                slot.cancellation.cancel();
                true
            }
            None => false,
        }
    }

    /// The result of `execution_id`, if it has completed.
    pub fn get_result(&self, execution_id: &str) -> Option<ExecutionResult> {
        self.slots.get(execution_id)?.result.lock().clone()
    }

    /// Current load: total launched, in-flight, and free permits.
    pub fn get_stats(&self) -> StreamStats {
        StreamStats {
            total_launched: self.total_launched.load(Ordering::Relaxed),
            in_flight: self.slots.iter().filter(|e| e.result.lock().is_none()).count(),
            available_permits: self.semaphore.available_permits(),
        }
    }

    /// Stop accepting new concurrency (outstanding runs finish on their
    /// own). Called during [`crate::runtime::AgentRuntime::stop`].
    pub fn stop(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::{EdgeCondition, EdgeSpec, NodeSpec, NodeType};
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

    fn simple_graph() -> GraphSpec {
        GraphSpec {
            id: "g1".into(),
            goal_id: "goal1".into(),
            entry_node: "n1".into(),
            terminal_nodes: HashSet::from(["n2".to_string()]),
            nodes: vec![node("n1", NodeType::Input), node("n2", NodeType::Output)],
            edges: vec![EdgeSpec {
                id: "e1".into(),
                source: "n1".into(),
                target: "n2".into(),
                condition: EdgeCondition::Always,
                condition_expr: None,
                priority: 0,
                input_mapping: None,
            }],
            execution_timeout_seconds: None,
            max_steps: 1000,
        }
    }

    fn harness(max_concurrent: usize) -> (ExecutionStream, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log_store = Arc::new(RuntimeLogStore::new(dir.path()));
        let stream = ExecutionStream::new(
            "s1",
            simple_graph(),
            "goal1",
            StreamCollaborators::default(),
            RetryConfig::default(),
            SharedStateManager::new(None),
            EventBus::new(64),
            log_store,
            OutcomeAggregator::new(),
            max_concurrent,
        );
        (stream, dir)
    }

    #[tokio::test]
    async fn execute_returns_a_result_through_wait_for_completion() {
        let (stream, _dir) = harness(4);
        let execution_id = stream.execute(HashMap::new(), None, None).await;
        let result = stream.wait_for_completion(&execution_id, None).await.unwrap();
        assert!(result.success);
        assert_eq!(stream.get_result(&execution_id).unwrap().success, true);
    }

    #[tokio::test]
    async fn unknown_execution_id_has_no_result() {
        let (stream, _dir) = harness(4);
        assert!(stream.get_result("ghost").is_none());
        assert!(stream.wait_for_completion("ghost", None).await.is_none());
    }

    #[tokio::test]
    async fn cancel_execution_reports_false_for_unknown_id() {
        let (stream, _dir) = harness(4);
        assert!(!stream.cancel_execution("ghost"));
    }

    #[tokio::test]
    async fn stats_reflect_launched_count() {
        let (stream, _dir) = harness(4);
        let id1 = stream.execute(HashMap::new(), None, None).await;
        let id2 = stream.execute(HashMap::new(), None, None).await;
        stream.wait_for_completion(&id1, None).await;
        stream.wait_for_completion(&id2, None).await;
        let stats = stream.get_stats();
        assert_eq!(stats.total_launched, 2);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_max_concurrent_executions() {
        let (stream, _dir) = harness(1);
        assert_eq!(stream.get_stats().available_permits, 1);
        let id1 = stream.execute(HashMap::new(), None, None).await;
        stream.wait_for_completion(&id1, None).await;
        assert_eq!(stream.get_stats().available_permits, 1);
    }
}

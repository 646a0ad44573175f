//! Top-level composition, lifecycle, background maintenance, and trigger
//! routing (§4.8). One [`AgentRuntime`] owns one [`ExecutionStream`] per
//! registered entry point, plus the shared storage, state, event, and log
//! infrastructure every stream draws on.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use runtime_core::{
    ExecutionResult, Goal, GraphSpec, RuntimeConfig, RuntimeError, RuntimeResult,
};
use runtime_events::EventBus;
use runtime_log::RuntimeLogStore;
use runtime_state::SharedStateManager;
use runtime_storage::ConcurrentStorage;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::aggregator::{GoalProgress, OutcomeAggregator};
use crate::stream::{ExecutionStream, StreamCollaborators, StreamStats};

/// Everything needed to run one entry point: the graph it walks, the goal
/// the aggregator scores it against, and the collaborators its nodes call
/// through.
#[derive(Clone)]
pub struct EntryPointSpec {
    /// Unique id, also used as the entry point's stream id.
    pub id: String,
    /// The graph this entry point triggers.
    pub graph: GraphSpec,
    /// The goal this entry point serves, registered with the aggregator.
    pub goal: Goal,
    /// Collaborators wired into every execution on this entry point.
    pub collaborators: StreamCollaborators,
}

impl std::fmt::Debug for EntryPointSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryPointSpec")
            .field("id", &self.id)
            .field("graph_id", &self.graph.id)
            .field("goal_id", &self.goal.id)
            .finish()
    }
}

/// Component health, as surfaced by [`AgentRuntime::health_check`].
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Overall health: `false` whenever the runtime is not running.
    pub healthy: bool,
    /// `"healthy"` or `"not_running"`.
    pub status: String,
    /// Per-component detail, keyed `"runtime"` and `"stream_{id}"`.
    pub components: HashMap<String, Value>,
}

struct EntryPoint {
    spec: EntryPointSpec,
    stream: Option<ExecutionStream>,
}

/// Top-level lifecycle: entry-point registration, start/stop, trigger
/// routing, background state cleanup. Cheaply cloneable; clones share the
/// same registered entry points and running streams.
#[derive(Clone)]
pub struct AgentRuntime {
    config: RuntimeConfig,
    base_path: PathBuf,
    entry_points: Arc<DashMap<String, EntryPoint>>,
    state: SharedStateManager,
    events: EventBus,
    storage: Arc<ConcurrentStorage>,
    log_store: Arc<RuntimeLogStore>,
    aggregator: OutcomeAggregator,
    running: Arc<AtomicBool>,
    cleanup_task: Arc<AsyncMutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("running", &self.running.load(Ordering::SeqCst))
            .field("entry_points", &self.entry_points.len())
            .finish()
    }
}

impl AgentRuntime {
    /// Build a runtime rooted at `base_path` for its log store and storage.
    pub fn new(base_path: impl Into<PathBuf>, config: RuntimeConfig) -> RuntimeResult<Self> {
        config.validate()?;
        let base_path = base_path.into();
        let storage = Arc::new(ConcurrentStorage::new(&base_path, config.storage.clone()));
        Ok(Self {
            config: config.clone(),
            base_path: base_path.clone(),
            entry_points: Arc::new(DashMap::new()),
            state: SharedStateManager::new(Some(storage.clone())),
            events: EventBus::new(config.max_history),
            storage,
            log_store: Arc::new(RuntimeLogStore::new(base_path)),
            aggregator: OutcomeAggregator::new(),
            running: Arc::new(AtomicBool::new(false)),
            cleanup_task: Arc::new(AsyncMutex::new(None)),
        })
    }

    /// Register `spec`, failing if the runtime is running, the id is
    /// already registered, or `entry_node` isn't in the graph.
    pub fn register_entry_point(&self, spec: EntryPointSpec) -> RuntimeResult<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RuntimeError::InvalidState(
                "cannot register an entry point while the runtime is running".into(),
            ));
        }
        spec.graph.validate()?;
        if self.entry_points.contains_key(&spec.id) {
            return Err(RuntimeError::Configuration(format!(
                "entry point '{}' already registered",
                spec.id
            )));
        }
        self.aggregator.register_goal(&spec.goal);
        self.entry_points.insert(spec.id.clone(), EntryPoint { spec, stream: None });
        Ok(())
    }

    /// Unregister `id`, failing if the runtime is running.
    pub fn unregister_entry_point(&self, id: &str) -> RuntimeResult<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RuntimeError::InvalidState(
                "cannot unregister an entry point while the runtime is running".into(),
            ));
        }
        self.entry_points.remove(id);
        Ok(())
    }

    /// Start storage, one [`ExecutionStream`] per registered entry point,
    /// and the background cleanup task. Idempotent: calling `start` while
    /// already running logs a warning and returns.
    pub async fn start(&self) -> RuntimeResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("AgentRuntime already running, ignoring start()");
            return Ok(());
        }

        self.storage.start().await;

        for mut entry in self.entry_points.iter_mut() {
            let spec = entry.spec.clone();
            let stream = ExecutionStream::new(
                spec.id.clone(),
                spec.graph,
                spec.goal.id.clone(),
                spec.collaborators,
                self.config.default_retry,
                self.state.clone(),
                self.events.clone(),
                self.log_store.clone(),
                self.aggregator.clone(),
                self.config.max_concurrent_executions,
            );
            entry.stream = Some(stream);
        }

        let state = self.state.clone();
        let ttl = self.config.execution_state_ttl();
        let interval = self.config.cleanup_interval();
        let running = self.running.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                state.purge_expired_state(ttl).await;
                tracing::debug!("background cleanup pass completed");
            }
        });
        *self.cleanup_task.lock().await = Some(handle);

        tracing::info!(entry_points = self.entry_points.len(), "AgentRuntime started");
        Ok(())
    }

    /// Stop every stream (tolerating individual failures), cancel the
    /// cleanup task, and stop storage. Idempotent: calling `stop` while
    /// already stopped logs at debug level and returns.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            tracing::debug!("AgentRuntime already stopped, ignoring stop()");
            return;
        }

        for entry in self.entry_points.iter() {
            if let Some(stream) = &entry.stream {
                stream.stop();
            } else {
                tracing::error!(entry_point = %entry.spec.id, "entry point had no running stream at stop time");
            }
        }

        if let Some(handle) = self.cleanup_task.lock().await.take() {
            handle.abort();
        }

        self.storage.stop().await;
        tracing::info!("AgentRuntime stopped");
    }

    /// Launch a run on `entry_point_id`, returning its execution id.
    pub async fn trigger(
        &self,
        entry_point_id: &str,
        input_data: HashMap<String, Value>,
        correlation_id: Option<String>,
        session_state: Option<Value>,
    ) -> RuntimeResult<String> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RuntimeError::InvalidState("AgentRuntime is not running".into()));
        }
        let entry = self
            .entry_points
            .get(entry_point_id)
            .ok_or_else(|| RuntimeError::UnknownNode(entry_point_id.to_string()))?;
        let stream = entry
            .stream
            .as_ref()
            .ok_or_else(|| RuntimeError::Internal("entry point has no running stream".into()))?;
        Ok(stream.execute(input_data, correlation_id, session_state).await)
    }

    /// `trigger`, then block until that execution completes.
    pub async fn trigger_and_wait(
        &self,
        entry_point_id: &str,
        input_data: HashMap<String, Value>,
        correlation_id: Option<String>,
        session_state: Option<Value>,
    ) -> RuntimeResult<ExecutionResult> {
        let execution_id = self.trigger(entry_point_id, input_data, correlation_id, session_state).await?;
        let entry = self
            .entry_points
            .get(entry_point_id)
            .ok_or_else(|| RuntimeError::UnknownNode(entry_point_id.to_string()))?;
        let stream = entry
            .stream
            .as_ref()
            .ok_or_else(|| RuntimeError::Internal("entry point has no running stream".into()))?;
        stream
            .wait_for_completion(&execution_id, None)
            .await
            .ok_or_else(|| RuntimeError::Internal(format!("execution '{execution_id}' vanished")))
    }

    /// Progress snapshot for `goal_id`, if it has been registered.
    pub fn get_goal_progress(&self, goal_id: &str) -> Option<GoalProgress> {
        self.aggregator.evaluate_goal_progress(goal_id)
    }

    /// Process-wide totals across every stream: launched/in-flight/permits
    /// per entry point.
    pub fn get_stats(&self) -> HashMap<String, StreamStats> {
        self.entry_points
            .iter()
            .filter_map(|entry| entry.stream.as_ref().map(|s| (entry.spec.id.clone(), s.get_stats())))
            .collect()
    }

    /// Subscribe to runtime events, see [`EventBus::subscribe`].
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Composite health report. Not-running yields `healthy=false` without
    /// inspecting streams.
    pub fn health_check(&self) -> HealthReport {
        let running = self.running.load(Ordering::SeqCst);
        let mut components = HashMap::new();
        components.insert(
            "runtime".to_string(),
            serde_json::json!({ "running": running, "entry_points": self.entry_points.len() }),
        );

        if !running {
            return HealthReport {
                healthy: false,
                status: "not_running".to_string(),
                components,
            };
        }

        for entry in self.entry_points.iter() {
            if let Some(stream) = &entry.stream {
                let stats = stream.get_stats();
                components.insert(
                    format!("stream_{}", entry.spec.id),
                    serde_json::json!({
                        "total_launched": stats.total_launched,
                        "in_flight": stats.in_flight,
                        "available_permits": stats.available_permits,
                    }),
                );
            }
        }

        HealthReport {
            healthy: true,
            status: "healthy".to_string(),
            components,
        }
    }

    /// The base path this runtime's log store and storage are rooted at.
    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
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

    fn entry_point(id: &str) -> EntryPointSpec {
        EntryPointSpec {
            id: id.to_string(),
            graph: GraphSpec {
                id: format!("{id}-graph"),
                goal_id: format!("{id}-goal"),
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
            },
            goal: Goal {
                id: format!("{id}-goal"),
                name: id.to_string(),
                description: String::new(),
                success_criteria: vec![],
                constraints: vec![],
            },
            collaborators: StreamCollaborators::default(),
        }
    }

    async fn harness() -> (AgentRuntime, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let runtime = AgentRuntime::new(dir.path(), RuntimeConfig::default()).unwrap();
        (runtime, dir)
    }

    #[tokio::test]
    async fn trigger_before_start_is_rejected() {
        let (runtime, _dir) = harness().await;
        runtime.register_entry_point(entry_point("ep1")).unwrap();
        let result = runtime.trigger("ep1", HashMap::new(), None, None).await;
        assert!(matches!(result, Err(RuntimeError::InvalidState(_))));
    }

    #[tokio::test]
    async fn trigger_unknown_entry_point_is_rejected() {
        let (runtime, _dir) = harness().await;
        runtime.start().await.unwrap();
        let result = runtime.trigger("ghost", HashMap::new(), None, None).await;
        assert!(matches!(result, Err(RuntimeError::UnknownNode(_))));
        runtime.stop().await;
    }

    #[tokio::test]
    async fn register_entry_point_rejects_duplicates() {
        let (runtime, _dir) = harness().await;
        runtime.register_entry_point(entry_point("ep1")).unwrap();
        assert!(runtime.register_entry_point(entry_point("ep1")).is_err());
    }

    #[tokio::test]
    async fn register_entry_point_while_running_is_rejected() {
        let (runtime, _dir) = harness().await;
        runtime.start().await.unwrap();
        assert!(matches!(
            runtime.register_entry_point(entry_point("ep1")),
            Err(RuntimeError::InvalidState(_))
        ));
        runtime.stop().await;
    }

    #[tokio::test]
    async fn trigger_and_wait_runs_a_registered_graph_to_completion() {
        let (runtime, _dir) = harness().await;
        runtime.register_entry_point(entry_point("ep1")).unwrap();
        runtime.start().await.unwrap();
        let result = runtime.trigger_and_wait("ep1", HashMap::new(), None, None).await.unwrap();
        assert!(result.success);
        assert_eq!(runtime.get_goal_progress("ep1-goal").unwrap().successes, 1);
        runtime.stop().await;
    }

    #[tokio::test]
    async fn health_check_reports_not_running_before_start() {
        let (runtime, _dir) = harness().await;
        let report = runtime.health_check();
        assert!(!report.healthy);
        assert_eq!(report.status, "not_running");
    }

    #[tokio::test]
    async fn health_check_reports_streams_once_running() {
        let (runtime, _dir) = harness().await;
        runtime.register_entry_point(entry_point("ep1")).unwrap();
        runtime.start().await.unwrap();
        let report = runtime.health_check();
        assert!(report.healthy);
        assert!(report.components.contains_key("stream_ep1"));
        runtime.stop().await;
    }

    #[tokio::test]
    async fn double_start_and_double_stop_are_idempotent() {
        let (runtime, _dir) = harness().await;
        runtime.start().await.unwrap();
        runtime.start().await.unwrap();
        runtime.stop().await;
        runtime.stop().await;
    }
}

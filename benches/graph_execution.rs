use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use runtime_core::{EdgeCondition, EdgeSpec, GraphSpec, NodeResult, NodeSpec, NodeType, RuntimeResult};
use runtime_events::EventBus;
use runtime_exec::{GraphExecutorBuilder, NodeContext, NodeHandler, NodeRegistry};
use runtime_log::RuntimeLogStore;
use runtime_state::SharedStateManager;
use serde_json::{json, Value};
use tokio::runtime::Runtime;

#[derive(Debug)]
struct IncrementNode {
    increment_by: i64,
}

#[async_trait]
impl NodeHandler for IncrementNode {
    async fn handle(&self, _node: &NodeSpec, ctx: &NodeContext) -> RuntimeResult<NodeResult> {
        let counter = ctx.input("counter").and_then(Value::as_i64).unwrap_or(0);
        tokio::time::sleep(Duration::from_micros(10)).await;
        let mut output = HashMap::new();
        output.insert("counter".to_string(), json!(counter + self.increment_by));
        Ok(NodeResult::success(output))
    }
}

#[derive(Debug)]
struct DataProcessingNode {
    operations: usize,
}

#[async_trait]
impl NodeHandler for DataProcessingNode {
    async fn handle(&self, _node: &NodeSpec, ctx: &NodeContext) -> RuntimeResult<NodeResult> {
        let counter = ctx.input("counter").and_then(Value::as_i64).unwrap_or(0);
        let mut data = HashMap::new();
        for i in 0..self.operations {
            data.insert(format!("key_{i}"), format!("processed_value_{}", i as i64 * counter));
        }
        tokio::time::sleep(Duration::from_micros(50)).await;
        let mut output = HashMap::new();
        output.insert("counter".to_string(), json!(counter));
        output.insert("data".to_string(), json!(data));
        Ok(NodeResult::success(output))
    }
}

fn node(id: &str) -> NodeSpec {
    NodeSpec {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        node_type: NodeType::Function,
        input_keys: vec!["counter".to_string()],
        output_keys: vec![],
        tools: vec![],
        system_prompt: None,
        max_retries: 0,
        routes: HashMap::new(),
    }
}

fn edge(id: &str, source: &str, target: &str) -> EdgeSpec {
    EdgeSpec {
        id: id.to_string(),
        source: source.to_string(),
        target: target.to_string(),
        condition: EdgeCondition::OnSuccess,
        condition_expr: None,
        priority: 0,
        input_mapping: None,
    }
}

fn simple_graph() -> (GraphSpec, Arc<NodeRegistry>) {
    let registry = Arc::new(NodeRegistry::new());
    registry.register("increment1", Arc::new(IncrementNode { increment_by: 1 }));
    registry.register("process1", Arc::new(DataProcessingNode { operations: 10 }));
    registry.register("increment2", Arc::new(IncrementNode { increment_by: 5 }));

    let graph = GraphSpec {
        id: "bench-simple".to_string(),
        goal_id: "bench-goal".to_string(),
        entry_node: "increment1".to_string(),
        terminal_nodes: HashSet::from(["increment2".to_string()]),
        nodes: vec![node("increment1"), node("process1"), node("increment2")],
        edges: vec![edge("e1", "increment1", "process1"), edge("e2", "process1", "increment2")],
        execution_timeout_seconds: None,
        max_steps: 1000,
    };
    (graph, registry)
}

fn chained_graph(num_nodes: usize) -> (GraphSpec, Arc<NodeRegistry>) {
    let registry = Arc::new(NodeRegistry::new());
    let mut nodes = Vec::with_capacity(num_nodes);
    let mut edges = Vec::with_capacity(num_nodes.saturating_sub(1));

    for i in 0..num_nodes {
        let id = format!("node_{i}");
        if i % 2 == 0 {
            registry.register(id.clone(), Arc::new(IncrementNode { increment_by: 1 }));
        } else {
            registry.register(id.clone(), Arc::new(DataProcessingNode { operations: 5 }));
        }
        nodes.push(node(&id));
    }
    for i in 0..num_nodes.saturating_sub(1) {
        edges.push(edge(&format!("e{i}"), &format!("node_{i}"), &format!("node_{}", i + 1)));
    }

    let graph = GraphSpec {
        id: format!("bench-chained-{num_nodes}"),
        goal_id: "bench-goal".to_string(),
        entry_node: "node_0".to_string(),
        terminal_nodes: HashSet::from([format!("node_{}", num_nodes - 1)]),
        nodes,
        edges,
        execution_timeout_seconds: None,
        max_steps: num_nodes + 10,
    };
    (graph, registry)
}

async fn run_once(graph: GraphSpec, registry: Arc<NodeRegistry>) -> RuntimeResult<()> {
    let dir = tempfile::tempdir().unwrap();
    let log_store = Arc::new(RuntimeLogStore::new(dir.path()));
    let state = SharedStateManager::new(None);
    let events = EventBus::new(16);
    let executor = GraphExecutorBuilder::new(graph, "bench-stream").build("bench-exec", state, events, log_store, registry);

    let mut input = HashMap::new();
    input.insert("counter".to_string(), json!(0));
    executor.execute(input).await?;
    Ok(())
}

fn bench_simple_graph_execution(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    c.bench_function("simple_graph_execution", |b| {
        b.to_async(&rt).iter(|| async {
            let (graph, registry) = simple_graph();
            black_box(run_once(graph, registry).await).unwrap();
        });
    });
}

fn bench_chained_graph_execution(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("chained_graph_execution");

    for num_nodes in [5, 10, 20, 50].iter() {
        group.bench_with_input(BenchmarkId::new("nodes", num_nodes), num_nodes, |b, &num_nodes| {
            b.to_async(&rt).iter(|| async {
                let (graph, registry) = chained_graph(num_nodes);
                black_box(run_once(graph, registry).await).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_state_snapshot(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    c.bench_function("execution_state_snapshot", |b| {
        b.to_async(&rt).iter(|| async {
            let state = SharedStateManager::new(None);
            for i in 0..100 {
                state
                    .write(
                        &format!("key_{i}"),
                        json!(format!("value_{i}")),
                        "bench-exec",
                        "bench-stream",
                        runtime_state::IsolationLevel::Isolated,
                        runtime_state::StateScope::Execution,
                    )
                    .await
                    .unwrap();
            }
            let snapshot = state.snapshot(runtime_state::StateScope::Execution, "bench-exec", "bench-stream").await;
            black_box(snapshot);
        });
    });
}

fn bench_node_execution(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("node_execution");

    group.bench_function("increment_node", |b| {
        b.to_async(&rt).iter(|| async {
            let handler = IncrementNode { increment_by: 1 };
            let ctx = bench_ctx();
            let result = handler.handle(&node("bench"), &ctx).await;
            black_box(result).unwrap();
        });
    });

    group.bench_function("data_processing_node", |b| {
        b.to_async(&rt).iter(|| async {
            let handler = DataProcessingNode { operations: 20 };
            let ctx = bench_ctx();
            let result = handler.handle(&node("bench"), &ctx).await;
            black_box(result).unwrap();
        });
    });

    group.finish();
}

fn bench_ctx() -> NodeContext {
    NodeContext {
        stream_id: "bench-stream".to_string(),
        execution_id: "bench-exec".to_string(),
        input: HashMap::from([("counter".to_string(), json!(0))]),
        tools: Arc::new(runtime_exec::context::NullToolDispatcher),
        llm: None,
        events: EventBus::new(16),
        cancellation: runtime_core::CancellationHandle::new(),
    }
}

fn bench_concurrent_execution(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("concurrent_execution");

    for num_concurrent in [1, 2, 4, 8].iter() {
        group.bench_with_input(BenchmarkId::new("concurrent_graphs", num_concurrent), num_concurrent, |b, &num_concurrent| {
            b.to_async(&rt).iter(|| async {
                let mut handles = Vec::new();
                for _ in 0..num_concurrent {
                    let (graph, registry) = simple_graph();
                    handles.push(tokio::spawn(run_once(graph, registry)));
                }
                for handle in handles {
                    black_box(handle.await.unwrap()).unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_simple_graph_execution,
    bench_chained_graph_execution,
    bench_state_snapshot,
    bench_node_execution,
    bench_concurrent_execution
);
criterion_main!(benches);

//! Complete workflow demo: registers a four-node research → analysis →
//! approval → completion graph on an [`AgentRuntime`], triggers it, and
//! prints the execution trail.
//!
//! Build with `--features full` to exercise the LLM/tool collaborators;
//! without it, the `analysis` node's `llm_generate` type has no provider
//! configured and fails (demonstrating the "no LLM provider configured"
//! path deliberately, rather than hiding it).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use runtime::prelude::*;
use serde_json::{json, Value};

#[derive(Debug)]
struct ResearchNode;

#[async_trait]
impl NodeHandler for ResearchNode {
    async fn handle(&self, _node: &NodeSpec, _ctx: &NodeContext) -> RuntimeResult<NodeResult> {
        println!("🔍 Executing research phase...");
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let mut output = HashMap::new();
        output.insert(
            "research".to_string(),
            Value::String("research: market_reports, industry_analysis; trends: trend_1, trend_2".to_string()),
        );
        Ok(NodeResult::success(output))
    }
}

#[derive(Debug)]
struct ApprovalNode;

#[async_trait]
impl NodeHandler for ApprovalNode {
    async fn handle(&self, _node: &NodeSpec, ctx: &NodeContext) -> RuntimeResult<NodeResult> {
        println!("✋ Requesting approval...");
        let Some(analysis) = ctx.input("content") else {
            return Ok(NodeResult::failure("analysis not available"));
        };
        println!("   reviewing: {analysis}");
        let mut output = HashMap::new();
        output.insert("approved".to_string(), Value::Bool(true));
        Ok(NodeResult::success(output))
    }
}

#[derive(Debug)]
struct CompletionNode;

#[async_trait]
impl NodeHandler for CompletionNode {
    async fn handle(&self, _node: &NodeSpec, ctx: &NodeContext) -> RuntimeResult<NodeResult> {
        println!("🎯 Finalizing workflow...");
        let mut output = HashMap::new();
        output.insert(
            "final_report".to_string(),
            json!({
                "approved": ctx.input("approved").cloned().unwrap_or(Value::Bool(false)),
                "summary": "market analysis completed with approved recommendations",
            }),
        );
        Ok(NodeResult::success(output))
    }
}

fn node(id: &str, node_type: NodeType, input_keys: Vec<&str>, output_keys: Vec<&str>) -> NodeSpec {
    NodeSpec {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        node_type,
        input_keys: input_keys.into_iter().map(String::from).collect(),
        output_keys: output_keys.into_iter().map(String::from).collect(),
        tools: vec![],
        system_prompt: None,
        max_retries: 1,
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

fn workflow_graph() -> GraphSpec {
    GraphSpec {
        id: "complete-workflow".to_string(),
        goal_id: "q4-market-analysis".to_string(),
        entry_node: "research".to_string(),
        terminal_nodes: HashSet::from(["completion".to_string()]),
        nodes: vec![
            node("research", NodeType::Function, vec![], vec!["research"]),
            node("analysis", NodeType::LlmGenerate, vec!["research"], vec![]),
            node("approval", NodeType::Function, vec!["content"], vec!["approved"]),
            node("completion", NodeType::Function, vec!["approved"], vec!["final_report"]),
        ],
        edges: vec![
            edge("e1", "research", "analysis"),
            edge("e2", "analysis", "approval"),
            edge("e3", "approval", "completion"),
        ],
        execution_timeout_seconds: Some(30.0),
        max_steps: 50,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    runtime::init();

    println!("🚀 Agent Runtime Complete Workflow Demo");
    println!("========================================");

    let registry = Arc::new(NodeRegistry::new());
    registry.register("research", Arc::new(ResearchNode));
    registry.register("approval", Arc::new(ApprovalNode));
    registry.register("completion", Arc::new(CompletionNode));

    #[cfg(feature = "llm")]
    let llm: Option<Arc<dyn LlmProvider>> = Some(Arc::new(
        MockLlmProvider::new("no insight available").with_response(
            "research: market_reports, industry_analysis; trends: trend_1, trend_2",
            "Market growth expected; invest in sector A, monitor sector B.",
        ),
    ));
    #[cfg(not(feature = "llm"))]
    let llm: Option<Arc<dyn LlmProvider>> = None;

    let entry_point = EntryPointSpec {
        id: "complete-workflow".to_string(),
        graph: workflow_graph(),
        goal: Goal {
            id: "q4-market-analysis".to_string(),
            name: "Q4 market analysis".to_string(),
            description: "Research, analyze, and approve Q4 2024 market recommendations".to_string(),
            success_criteria: vec!["approved == true".to_string()],
            constraints: vec![],
        },
        collaborators: StreamCollaborators {
            llm,
            registry: Some(registry),
            ..Default::default()
        },
    };

    let base_path = std::env::temp_dir().join("agent-runtime-demo");
    let runtime = AgentRuntime::new(&base_path, RuntimeConfig::default())?;
    runtime.register_entry_point(entry_point)?;
    runtime.start().await?;

    println!("\n📊 Starting workflow execution...");
    let mut input = HashMap::new();
    input.insert("task".to_string(), Value::String("Analyze market trends for Q4 2024".to_string()));

    let result = runtime.trigger_and_wait("complete-workflow", input, None, None).await?;

    if result.success {
        println!("\n✅ Workflow completed successfully!");
        println!("Path: {:?}", result.path);
        println!("Output: {:#?}", result.output);
    } else {
        println!("\n❌ Workflow failed: {}", result.error.as_deref().unwrap_or("unknown error"));
    }

    if let Some(progress) = runtime.get_goal_progress("q4-market-analysis") {
        println!(
            "\n📈 Goal progress: {}/{} successful",
            progress.successes, progress.executions_recorded
        );
    }

    runtime.stop().await;
    Ok(())
}

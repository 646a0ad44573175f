//! The graph data model: [`GraphSpec`], [`NodeSpec`], [`EdgeSpec`], [`Goal`].
//!
//! These types are the immutable description of an agent. Once a
//! [`GraphSpec`] has been validated it never changes for the lifetime of the
//! process; executions only ever read it.

use crate::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// The closed set of node behaviors the executor knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// A node that drives its own internal loop and emits its own progress events.
    EventLoop,
    /// A single LLM completion call.
    LlmGenerate,
    /// An LLM completion call with an internal tool-use loop.
    LlmToolUse,
    /// Chooses among statically declared `routes` without consulting an LLM.
    Router,
    /// A plain host function registered by id.
    Function,
    /// Suspends for an externally supplied value.
    HumanInput,
    /// Graph entry adapter: shapes external `input_data` into the execution scope.
    Input,
    /// Graph exit adapter: shapes the execution scope into terminal output.
    Output,
}

/// A tool declaration on a node: either an exact tool name (Tier 1) or an
/// ordered list of fallback tool names, the first with a present credential
/// wins (Tier 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolDecl {
    /// Tier 1: exact tool name.
    Exact(String),
    /// Tier 2: ordered fallback group.
    Fallback(Vec<String>),
}

impl ToolDecl {
    /// All tool names this declaration could resolve to, in preference order.
    pub fn candidates(&self) -> &[String] {
        match self {
            ToolDecl::Exact(name) => std::slice::from_ref(name),
            ToolDecl::Fallback(names) => names,
        }
    }
}

/// A single node in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique id within the graph.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// The node's dispatch kind.
    pub node_type: NodeType,
    /// Keys in the execution scope this node reads.
    #[serde(default)]
    pub input_keys: Vec<String>,
    /// Keys in the execution scope this node writes.
    #[serde(default)]
    pub output_keys: Vec<String>,
    /// Declared tool access; see [`ToolDecl`].
    #[serde(default)]
    pub tools: Vec<ToolDecl>,
    /// Optional system prompt for LLM-backed node types.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Retries beyond the first attempt (`attempts <= max_retries + 1`).
    #[serde(default)]
    pub max_retries: u32,
    /// Route label -> target node id, consulted by `node_type = router`.
    #[serde(default)]
    pub routes: HashMap<String, String>,
}

impl NodeSpec {
    /// All tool names this node could resolve to, across every declaration, in order.
    pub fn all_tool_names(&self) -> Vec<String> {
        self.tools.iter().flat_map(|t| t.candidates().to_vec()).collect()
    }
}

/// The condition under which an edge is eligible to be traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Always matches.
    Always,
    /// Matches iff the source node's result was a success.
    OnSuccess,
    /// Matches iff the source node's result was a failure.
    OnFailure,
    /// Matches iff `condition_expr` evaluates to true against the node context.
    Conditional,
    /// Matches iff a pluggable decision function selects this edge's target.
    LlmDecide,
}

/// A directed connection between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Unique id within the graph.
    pub id: String,
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Matching rule, see [`EdgeCondition`].
    pub condition: EdgeCondition,
    /// Boolean expression text, required for `condition = conditional`,
    /// optional free-form hint for `condition = llm_decide`.
    #[serde(default)]
    pub condition_expr: Option<String>,
    /// Higher wins on tie among matching edges from the same source.
    #[serde(default)]
    pub priority: i64,
    /// Source key -> target key renames applied when traversing this edge.
    #[serde(default)]
    pub input_mapping: Option<HashMap<String, String>>,
}

/// The objective an agent pursues; consulted only by the Outcome Aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    /// Unique id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Criteria the aggregator scores progress against.
    #[serde(default)]
    pub success_criteria: Vec<String>,
    /// Constraints recorded for visibility; not enforced by the core.
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// Immutable description of an agent: nodes, edges, and entry/terminal points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSpec {
    /// Unique id.
    pub id: String,
    /// The [`Goal`] id this graph serves.
    pub goal_id: String,
    /// The node execution starts at.
    pub entry_node: String,
    /// Nodes whose completion ends the run (in addition to "no next edge").
    #[serde(default)]
    pub terminal_nodes: HashSet<String>,
    /// Declared nodes, in authoring order.
    pub nodes: Vec<NodeSpec>,
    /// Declared edges, in authoring order (declaration order breaks priority ties).
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    /// Wall-clock cap for a single run; `None` disables the timeout.
    #[serde(default)]
    pub execution_timeout_seconds: Option<f64>,
    /// Hard cap on node evaluations per run.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

fn default_max_steps() -> usize {
    1000
}

impl GraphSpec {
    /// Look up a node by id.
    pub fn get_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All edges whose `source` is `id`, in declaration order.
    pub fn edges_from<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a EdgeSpec> {
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// Structural validation: every invariant from the data model section.
    ///
    /// This never inspects node behavior, only graph shape — it is cheap
    /// enough to run before every `trigger`.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.id.is_empty() {
            return Err(RuntimeError::Validation("graph id must not be empty".into()));
        }
        if self.nodes.is_empty() {
            return Err(RuntimeError::Validation("graph must declare at least one node".into()));
        }

        let mut seen_ids = HashSet::new();
        for node in &self.nodes {
            if node.id.is_empty() {
                return Err(RuntimeError::Validation("node id must not be empty".into()));
            }
            if !seen_ids.insert(node.id.as_str()) {
                return Err(RuntimeError::Validation(format!("duplicate node id '{}'", node.id)));
            }
        }

        if self.get_node(&self.entry_node).is_none() {
            return Err(RuntimeError::Validation(format!(
                "entry_node '{}' not found in graph",
                self.entry_node
            )));
        }

        let mut seen_edge_ids = HashSet::new();
        for edge in &self.edges {
            if edge.id.is_empty() {
                return Err(RuntimeError::Validation("edge id must not be empty".into()));
            }
            if !seen_edge_ids.insert(edge.id.as_str()) {
                return Err(RuntimeError::Validation(format!("duplicate edge id '{}'", edge.id)));
            }
            if self.get_node(&edge.source).is_none() {
                return Err(RuntimeError::Validation(format!(
                    "edge '{}' source '{}' not found in graph",
                    edge.id, edge.source
                )));
            }
            if self.get_node(&edge.target).is_none() {
                return Err(RuntimeError::Validation(format!(
                    "edge '{}' target '{}' not found in graph",
                    edge.id, edge.target
                )));
            }
            if edge.condition == EdgeCondition::Conditional && edge.condition_expr.is_none() {
                return Err(RuntimeError::Validation(format!(
                    "edge '{}' has condition=conditional but no condition_expr",
                    edge.id
                )));
            }
        }

        for terminal in &self.terminal_nodes {
            if self.get_node(terminal).is_none() {
                return Err(RuntimeError::Validation(format!(
                    "terminal node '{}' not found in graph",
                    terminal
                )));
            }
        }

        if self.max_steps == 0 {
            return Err(RuntimeError::Validation("max_steps must be > 0".into()));
        }

        Ok(())
    }
}

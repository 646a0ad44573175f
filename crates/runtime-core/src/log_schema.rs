//! Wire format for run logs (§6.3): one JSONL line per tool/step invocation
//! (`tool_logs.jsonl`), an optional richer JSONL line per node completion
//! (`details.jsonl`), and one atomically written JSON summary per run
//! (`summary.json`). `runtime-log` is the only writer and reader of these
//! types; they live here because they are the shared contract between it
//! and the executor that produces them.

use crate::exec::ExecutionQuality;
use serde::{Deserialize, Serialize};

/// One line of `tool_logs.jsonl`: a terse record of a single step (a node
/// evaluation, or a tool call within one), written as it completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStepLog {
    /// Unique id of this step within the run.
    pub step_id: String,
    /// The node that was evaluated.
    pub node_id: String,
    /// Human-readable step name (the node name, or a tool name for a
    /// tool-call sub-step; for `llm_decide` edges, the target id picked).
    pub name: String,
    /// RFC 3339 timestamp the step started at.
    pub started_at: String,
    /// Wall-clock duration of this step, in milliseconds.
    pub duration_ms: u64,
    /// Whether the step succeeded.
    pub success: bool,
    /// Present on failure.
    #[serde(default)]
    pub error: Option<String>,
    /// Digest of the step's input, for change detection without storing the
    /// full payload twice.
    #[serde(default)]
    pub input_digest: Option<String>,
    /// Digest of the step's output.
    #[serde(default)]
    pub output_digest: Option<String>,
}

/// One line of `details.jsonl`: the outcome of a single node evaluation,
/// kept separate from [`NodeStepLog`] so the terse step stream stays cheap
/// to scan for tool-call-level detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDetail {
    /// The node that was evaluated.
    pub node_id: String,
    /// RFC 3339 timestamp the node evaluation started at.
    pub started_at: String,
    /// Wall-clock duration of the full evaluation, including retries.
    pub duration_ms: u64,
    /// Whether the final attempt succeeded.
    pub success: bool,
    /// Present on failure.
    #[serde(default)]
    pub error: Option<String>,
    /// Tokens consumed across every attempt.
    #[serde(default)]
    pub tokens_used: u64,
    /// Retries consumed to reach this outcome.
    #[serde(default)]
    pub retries: u32,
    /// Quality tag for this node evaluation.
    pub execution_quality: ExecutionQuality,
}

/// The run status recorded in a [`RunSummaryLog`], or synthesized by
/// `runtime-log` for a run directory with no summary file yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run has not yet written a summary.
    InProgress,
    /// The run completed successfully.
    Completed,
    /// All retries were exhausted at some node and the run ended in failure.
    Failed,
    /// The run exceeded `execution_timeout_seconds`.
    TimedOut,
    /// The run was cancelled via its [`CancellationHandle`](crate::CancellationHandle).
    Cancelled,
}

/// The atomically written summary (`summary.json`) for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummaryLog {
    /// Unique run id, formatted `{yyyymmddThhmmss}_{8-hex}`.
    pub run_id: String,
    /// The entry point / agent this run executed.
    pub agent_id: String,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// RFC 3339 timestamp the run started at.
    pub started_at: String,
    /// RFC 3339 timestamp the run reached a terminal state, if it has.
    #[serde(default)]
    pub completed_at: Option<String>,
    /// Wall-clock duration, once terminal.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Number of node evaluations performed.
    #[serde(default)]
    pub total_nodes_executed: usize,
    /// Ordered list of visited node ids.
    #[serde(default)]
    pub node_path: Vec<String>,
    /// Prompt tokens billed across the run.
    #[serde(default)]
    pub total_input_tokens: u64,
    /// Completion tokens billed across the run.
    #[serde(default)]
    pub total_output_tokens: u64,
    /// Overall quality tag, once terminal.
    #[serde(default)]
    pub execution_quality: Option<ExecutionQuality>,
    /// Whether an operator should review this run (e.g. degraded quality,
    /// repeated tool credential failures). Advisory only.
    #[serde(default)]
    pub needs_attention: Option<bool>,
}

impl RunSummaryLog {
    /// A fresh summary for a run that has just started.
    pub fn started(run_id: impl Into<String>, agent_id: impl Into<String>, started_at: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            agent_id: agent_id.into(),
            status: RunStatus::InProgress,
            started_at: started_at.into(),
            completed_at: None,
            duration_ms: None,
            total_nodes_executed: 0,
            node_path: Vec::new(),
            total_input_tokens: 0,
            total_output_tokens: 0,
            execution_quality: None,
            needs_attention: None,
        }
    }
}

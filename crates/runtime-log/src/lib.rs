//! Append-only JSONL step/detail logs (L2/L3) and atomically written run
//! summaries (L1), per run directory: `{base_path}/runs/{run_id}/`.
//!
//! No shared mutable index. [`RuntimeLogStore::list_runs`] scans the run
//! directory and synthesizes an `in_progress` summary for any run that
//! hasn't written one yet, so parallel writers never contend on an index.

use runtime_core::{NodeDetail, NodeStepLog, RunStatus, RunSummaryLog};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Persists runtime logs at three levels under a base directory.
///
/// Thread- and task-safe via per-run directories: no run is ever written to
/// by more than one [`AgentRuntime`](runtime_core) execution at a time, so
/// appends within a run never need to be serialized against each other
/// beyond the OS append guarantee.
#[derive(Debug, Clone)]
pub struct RuntimeLogStore {
    runs_dir: PathBuf,
}

impl RuntimeLogStore {
    /// Open a log store rooted at `base_path`. `{base_path}/runs` is created
    /// lazily by [`Self::ensure_run_dir`], not at construction time.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            runs_dir: base_path.join("runs"),
        }
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    /// Create the run directory immediately. Called when a run starts, so
    /// even a run that crashes before its first step leaves a directory
    /// `list_runs` can see.
    pub async fn ensure_run_dir(&self, run_id: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.run_dir(run_id)).await
    }

    /// Append one JSONL line to `tool_logs.jsonl` (L3).
    pub async fn append_step(&self, run_id: &str, step: &NodeStepLog) -> std::io::Result<()> {
        append_jsonl_line(&self.run_dir(run_id).join("tool_logs.jsonl"), step).await
    }

    /// Append one JSONL line to `details.jsonl` (L2).
    pub async fn append_node_detail(&self, run_id: &str, detail: &NodeDetail) -> std::io::Result<()> {
        append_jsonl_line(&self.run_dir(run_id).join("details.jsonl"), detail).await
    }

    /// Write `summary.json` atomically via a temp file and rename. Called
    /// once, when a run reaches a terminal state.
    pub async fn save_summary(&self, run_id: &str, summary: &RunSummaryLog) -> std::io::Result<()> {
        let run_dir = self.run_dir(run_id);
        tokio::fs::create_dir_all(&run_dir).await?;
        let path = run_dir.join("summary.json");
        let content = serde_json::to_string_pretty(summary)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        write_atomic(&path, &content).await
    }

    /// Load the Level 1 summary for `run_id`, if one has been written yet.
    pub async fn load_summary(&self, run_id: &str) -> std::io::Result<Option<RunSummaryLog>> {
        let path = self.run_dir(run_id).join("summary.json");
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(summary) => Ok(Some(summary)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to parse summary.json");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read summary.json");
                Ok(None)
            }
        }
    }

    /// Load the Level 2 details for `run_id`, skipping any corrupt trailing line.
    pub async fn load_details(&self, run_id: &str) -> Vec<NodeDetail> {
        read_jsonl(&self.run_dir(run_id).join("details.jsonl")).await
    }

    /// Load the Level 3 tool-call logs for `run_id`, skipping any corrupt
    /// trailing line.
    pub async fn load_tool_logs(&self, run_id: &str) -> Vec<NodeStepLog> {
        read_jsonl(&self.run_dir(run_id).join("tool_logs.jsonl")).await
    }

    /// Alias for [`Self::load_details`] matching the spec's §4.1 operation name.
    pub async fn read_node_details(&self, run_id: &str) -> Vec<NodeDetail> {
        self.load_details(run_id).await
    }

    /// Scan `runs/`, load or synthesize a summary for each run directory,
    /// filter by `status` and `needs_attention` (either may be `None` to
    /// skip that filter), and return them sorted by `started_at`
    /// descending, capped at `limit`.
    ///
    /// Run directories with no `summary.json` yet are treated as
    /// `in_progress`, with `started_at` inferred from a `run_id` of the form
    /// `{yyyymmddThhmmss}_{suffix}` (falling back to an empty string if the
    /// id doesn't follow that convention).
    pub async fn list_runs(
        &self,
        status: Option<RunStatus>,
        needs_attention: Option<bool>,
        limit: usize,
    ) -> std::io::Result<Vec<RunSummaryLog>> {
        let entries = match tokio::fs::read_dir(&self.runs_dir).await {
            Ok(mut read_dir) => {
                let mut names = Vec::new();
                while let Some(entry) = read_dir.next_entry().await? {
                    if entry.file_type().await?.is_dir() {
                        if let Some(name) = entry.file_name().to_str() {
                            names.push(name.to_string());
                        }
                    }
                }
                names
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut summaries = Vec::new();
        for run_id in entries {
            let summary = match self.load_summary(&run_id).await? {
                Some(summary) => summary,
                None => RunSummaryLog {
                    run_id: run_id.clone(),
                    agent_id: String::new(),
                    status: RunStatus::InProgress,
                    started_at: infer_started_at(&run_id),
                    completed_at: None,
                    duration_ms: None,
                    total_nodes_executed: 0,
                    node_path: Vec::new(),
                    total_input_tokens: 0,
                    total_output_tokens: 0,
                    execution_quality: None,
                    needs_attention: None,
                },
            };
            if let Some(want) = status {
                if summary.status != want {
                    continue;
                }
            }
            if let Some(want) = needs_attention {
                if summary.needs_attention.unwrap_or(false) != want {
                    continue;
                }
            }
            summaries.push(summary);
        }

        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        summaries.truncate(limit);
        Ok(summaries)
    }
}

async fn append_jsonl_line<T: serde::Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_string(value).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await
}

async fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(_) => return Vec::new(),
    };
    let mut results = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(value) => results.push(value),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping corrupt JSONL line"),
        }
    }
    results
}

async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    let content = content.to_string();
    let tmp_clone = tmp.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp_clone)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        Ok(())
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
    tokio::fs::rename(&tmp, path).await
}

/// Best-effort `started_at` from a `run_id` like `20260101T120000_abc123`.
fn infer_started_at(run_id: &str) -> String {
    let Some(ts_part) = run_id.split('_').next() else {
        return String::new();
    };
    match chrono::NaiveDateTime::parse_from_str(ts_part, "%Y%m%dT%H%M%S") {
        Ok(naive) => chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(naive, chrono::Utc).to_rfc3339(),
        Err(_) => String::new(),
    }
}

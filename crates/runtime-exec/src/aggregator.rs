//! Cumulative goal-progress tracking across many executions (§4.5).
//! Advisory only: never blocks an execution and never feeds back into
//! edge routing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use runtime_core::{ExecutionResult, Goal};
use serde::{Deserialize, Serialize};

const RECENT_ERROR_SAMPLES: usize = 20;

/// Running totals across every execution recorded so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorStats {
    /// Executions recorded.
    pub total_executions: u64,
    /// Executions whose `success` was true.
    pub successes: u64,
    /// Executions whose `success` was false.
    pub failures: u64,
    /// Sum of `total_retries` across every recorded execution.
    pub total_retries: u64,
}

/// A snapshot of progress toward one [`Goal`], from accumulated execution
/// results. Criterion evaluation is a pure function of the accumulated
/// data: a criterion is "met" once at least one recorded execution's
/// output contains a key equal to the criterion text with a truthy value,
/// a conservative stand-in for the free-form criteria goals declare.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalProgress {
    /// The goal this snapshot describes.
    pub goal_id: String,
    /// Executions recorded against this goal.
    pub executions_recorded: u64,
    /// Successful executions recorded against this goal.
    pub successes: u64,
    /// Failed executions recorded against this goal.
    pub failures: u64,
    /// Per-criterion met/not-met, in the goal's declared order.
    pub criteria_met: HashMap<String, bool>,
    /// Most recent failure messages, newest first, capped at
    /// [`RECENT_ERROR_SAMPLES`].
    pub recent_errors: Vec<String>,
}

#[derive(Debug, Default)]
struct GoalState {
    executions_recorded: u64,
    successes: u64,
    failures: u64,
    criteria_met: HashMap<String, bool>,
    recent_errors: Vec<String>,
}

/// Folds completed [`ExecutionResult`]s into cumulative per-goal progress.
/// Cheaply cloneable; all clones share the same accumulated state.
#[derive(Debug, Clone, Default)]
pub struct OutcomeAggregator {
    goals: std::sync::Arc<RwLock<HashMap<String, GoalState>>>,
    total_executions: std::sync::Arc<AtomicU64>,
    successes: std::sync::Arc<AtomicU64>,
    failures: std::sync::Arc<AtomicU64>,
    total_retries: std::sync::Arc<AtomicU64>,
}

impl OutcomeAggregator {
    /// An aggregator with no goals and no recorded executions yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `goal` so its progress can be tracked, without recording
    /// any execution yet. Re-registering an existing goal id is a no-op.
    pub fn register_goal(&self, goal: &Goal) {
        let mut goals = self.goals.write();
        goals.entry(goal.id.clone()).or_default();
    }

    /// Record one completed execution against `goal_id`. Called by the
    /// Execution Stream on completion.
    pub fn record_execution(&self, goal_id: &str, result: &ExecutionResult) {
        self.total_executions.fetch_add(1, Ordering::Relaxed);
        self.total_retries
            .fetch_add(result.total_retries as u64, Ordering::Relaxed);
        if result.success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }

        let mut goals = self.goals.write();
        let state = goals.entry(goal_id.to_string()).or_default();
        state.executions_recorded += 1;
        if result.success {
            state.successes += 1;
            for (key, value) in &result.output {
                if is_truthy(value) {
                    state.criteria_met.insert(key.clone(), true);
                }
            }
        } else {
            state.failures += 1;
            if let Some(error) = &result.error {
                state.recent_errors.insert(0, error.clone());
                state.recent_errors.truncate(RECENT_ERROR_SAMPLES);
            }
        }
    }

    /// Snapshot progress for `goal_id`, or `None` if it was never
    /// registered or recorded against.
    pub fn evaluate_goal_progress(&self, goal_id: &str) -> Option<GoalProgress> {
        let goals = self.goals.read();
        let state = goals.get(goal_id)?;
        Some(GoalProgress {
            goal_id: goal_id.to_string(),
            executions_recorded: state.executions_recorded,
            successes: state.successes,
            failures: state.failures,
            criteria_met: state.criteria_met.clone(),
            recent_errors: state.recent_errors.clone(),
        })
    }

    /// Process-wide totals across every goal.
    pub fn get_stats(&self) -> AggregatorStats {
        AggregatorStats {
            total_executions: self.total_executions.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
        }
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

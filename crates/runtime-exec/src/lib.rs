//! # Agent Runtime Execution Engine
//!
//! The node/edge walker at the center of the agent runtime core:
//! - `GraphExecutor` drives one execution end to end (retry, backoff,
//!   timeout, edge selection, log persistence).
//! - `ExecutionStream` multiplexes many concurrent executions per entry
//!   point behind a semaphore.
//! - `AgentRuntime` is the top-level lifecycle: registration, start/stop,
//!   trigger routing, background state cleanup.
//! - `OutcomeAggregator` folds completed executions into cumulative goal
//!   progress.
//! - `RateLimiter` is a reusable retry-with-backoff helper nodes can call
//!   when talking to external services; it is independent of the
//!   executor's own per-node retry loop.

#![deny(missing_docs)]
#![warn(clippy::all)]

/// Cumulative goal-progress tracking across many executions.
pub mod aggregator;

/// `NodeContext`, the `NodeHandler` registry, and the built-in node handlers.
pub mod context;

/// The graph executor: main loop, retry policy, edge selection.
pub mod executor;

/// Exponential-backoff-with-jitter retry helper for external calls.
pub mod rate_limiter;

/// Per-node retry loop used by the executor (distinct from `rate_limiter`).
pub mod retry;

/// Top-level lifecycle: entry-point registration, start/stop, trigger routing.
pub mod runtime;

/// Per-entry-point pool of concurrent graph executor runs.
pub mod stream;

pub use aggregator::{AggregatorStats, GoalProgress, OutcomeAggregator};
pub use context::{
    BuiltinHandlers, DecisionFn, HumanInputProvider, NodeContext, NodeHandler, NodeRegistry,
};
pub use executor::{GraphExecutor, GraphExecutorBuilder};
pub use rate_limiter::{default_rate_limiter, ModelStats, RateLimitStats, RateLimiter};
pub use runtime::{AgentRuntime, EntryPointSpec, HealthReport};
pub use stream::{ExecutionStream, StreamCollaborators, StreamStats};

pub use runtime_core::{
    CancellationHandle, EdgeCondition, EdgeSpec, EvalContext, ExecutionQuality, ExecutionResult,
    Goal, GraphSpec, LlmCompletion, LlmMessage, LlmProvider, LlmToolSpec, NodeDetail, NodeResult,
    NodeSpec, NodeStepLog, NodeType, RetryConfig, RunStatus, RunSummaryLog, RuntimeConfig,
    RuntimeError, RuntimeResult, ToolDecl, ToolDispatcher, ToolOutcome,
};

/// Crate version, surfaced for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

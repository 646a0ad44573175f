//! # Agent Runtime 🦀
//!
//! The concurrent execution engine for graph-structured agent workflows.
//! This crate re-exports the core workspace under a single name; most
//! applications only need `runtime::prelude::*` plus, optionally, the
//! `llm`/`tools` reference collaborators behind their feature flags.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![warn(clippy::all)]

// Data model, error taxonomy, configuration, expression evaluator.
pub use runtime_core::*;

/// Crash-resilient three-level run log store.
pub use runtime_log as log;

/// Write-batched, read-cached persistence layer.
pub use runtime_storage as storage;

/// In-process pub/sub event bus.
pub use runtime_events as events;

/// Three-tier (global/stream/execution) shared state manager.
pub use runtime_state as state;

/// `GraphExecutor`, `ExecutionStream`, `AgentRuntime`, `OutcomeAggregator`.
pub use runtime_exec as exec;

/// Reference `LlmProvider` collaborators (OpenAI-compatible HTTP client, a
/// deterministic mock). Off by default: LLM provider integration is a
/// pluggable collaborator, not core functionality.
#[cfg(feature = "llm")]
#[cfg_attr(docsrs, doc(cfg(feature = "llm")))]
pub use runtime_collab_llm as llm;

/// Reference `ToolDispatcher` collaborator (a named-tool registry plus two
/// built-ins). Off by default, for the same reason as `llm`.
#[cfg(feature = "tools")]
#[cfg_attr(docsrs, doc(cfg(feature = "tools")))]
pub use runtime_collab_tools as tools;

/// Crate version, surfaced for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a `tracing` subscriber reading its filter from `RUST_LOG`
/// (`"info"` if unset). Call once, at process start.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();
}

/// Install a `tracing` subscriber with an explicit filter directive (e.g.
/// `"runtime_exec=debug,runtime_state=trace"`), ignoring `RUST_LOG`. Useful
/// for tests and demos that want deterministic log verbosity.
pub fn init_with_tracing(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

/// Convenient imports for building on top of the runtime.
pub mod prelude {
    pub use runtime_core::{
        CancellationHandle, EdgeCondition, EdgeSpec, EvalContext, ExecutionQuality,
        ExecutionResult, Goal, GraphSpec, LlmCompletion, LlmMessage, LlmProvider, LlmToolSpec,
        NodeDetail, NodeResult, NodeSpec, NodeStepLog, NodeType, RetryConfig, RunStatus,
        RunSummaryLog, RuntimeConfig, RuntimeError, RuntimeResult, ToolDecl, ToolDispatcher,
        ToolOutcome,
    };
    pub use runtime_events::EventBus;
    pub use runtime_exec::{
        AgentRuntime, BuiltinHandlers, DecisionFn, EntryPointSpec, ExecutionStream, GraphExecutor,
        GraphExecutorBuilder, HealthReport, HumanInputProvider, NodeContext, NodeHandler,
        NodeRegistry, OutcomeAggregator, StreamCollaborators,
    };
    pub use runtime_state::SharedStateManager;

    #[cfg(feature = "llm")]
    pub use runtime_collab_llm::{MockLlmProvider, OpenAiConfig, OpenAiProvider};

    #[cfg(feature = "tools")]
    pub use runtime_collab_tools::{FileReadTool, HttpGetTool, Tool, ToolRegistry};
}

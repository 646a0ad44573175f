//! # Agent Runtime Core 🦀
//!
//! Data model, error taxonomy, configuration, and the conditional-edge
//! expression evaluator shared by every other crate in this workspace. This
//! crate is deliberately dependency-light: no Tokio, no storage or transport
//! concerns, only the types and pure functions every other crate builds on.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Error taxonomy and result alias
pub mod error;

/// Layered runtime configuration
pub mod config;

/// Graph data model: [`graph::GraphSpec`], [`graph::NodeSpec`], [`graph::EdgeSpec`]
pub mod graph;

/// Execution-time data model and collaborator contracts
pub mod exec;

/// The conditional-edge boolean expression evaluator
pub mod expr;

/// Wire format for run logs
pub mod log_schema;

// Re-export core types for convenience.
pub use config::{RetryConfig, RuntimeConfig, StorageConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use exec::{
    CancellationHandle, ExecutionQuality, ExecutionResult, LlmCompletion, LlmMessage, LlmProvider,
    LlmToolSpec, NodeResult, ToolDispatcher, ToolOutcome,
};
pub use expr::{evaluate as evaluate_expr, EvalContext};
pub use graph::{EdgeCondition, EdgeSpec, Goal, GraphSpec, NodeSpec, NodeType, ToolDecl};
pub use log_schema::{NodeDetail, NodeStepLog, RunStatus, RunSummaryLog};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Error taxonomy for the agent runtime.

use thiserror::Error;

/// Comprehensive error type returned at the public boundary of every runtime crate.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A node referenced by an edge, entry point, or trigger does not exist in the graph.
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    /// The graph structure itself is invalid (dangling edge, empty entry node, duplicate id).
    #[error("graph structure error: {0}")]
    GraphStructure(String),

    /// A required tool credential is missing and no fallback is available.
    #[error("missing credential for tool(s): {0:?}")]
    MissingCredential(Vec<String>),

    /// Shared-state partition access failed.
    #[error("state error: {0}")]
    State(String),

    /// An execution-level failure not otherwise classified.
    #[error("execution error: {0}")]
    Execution(String),

    /// Edge condition evaluation failed (malformed expression, type mismatch).
    #[error("edge evaluation error: {0}")]
    Edge(String),

    /// (De)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A wall-clock timeout was exceeded.
    #[error("operation timed out after {seconds} seconds")]
    Timeout {
        /// Configured timeout, in seconds.
        seconds: f64,
    },

    /// A concurrency primitive could not be acquired or was poisoned.
    #[error("concurrency error: {0}")]
    Concurrency(String),

    /// Invalid configuration supplied by the caller.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller attempted an operation forbidden by the current lifecycle state
    /// (e.g. registering an entry point while running).
    #[error("invalid lifecycle state: {0}")]
    InvalidState(String),

    /// Structural validation failure raised before a run is allowed to start.
    #[error("validation error: {0}")]
    Validation(String),

    /// Catch-all for conditions that should be unreachable.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Whether retrying the operation that produced this error might succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RuntimeError::Timeout { .. } | RuntimeError::Concurrency(_)
        )
    }

    /// Stable category label, suitable for log fields or metrics.
    pub fn category(&self) -> &'static str {
        match self {
            RuntimeError::UnknownNode(_) => "unknown_node",
            RuntimeError::GraphStructure(_) => "graph_structure",
            RuntimeError::MissingCredential(_) => "missing_credential",
            RuntimeError::State(_) => "state",
            RuntimeError::Execution(_) => "execution",
            RuntimeError::Edge(_) => "edge",
            RuntimeError::Serialization(_) => "serialization",
            RuntimeError::Io(_) => "io",
            RuntimeError::Timeout { .. } => "timeout",
            RuntimeError::Concurrency(_) => "concurrency",
            RuntimeError::Configuration(_) => "configuration",
            RuntimeError::InvalidState(_) => "invalid_state",
            RuntimeError::Validation(_) => "validation",
            RuntimeError::Internal(_) => "internal",
        }
    }
}

/// Convenience alias used throughout the runtime crates.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

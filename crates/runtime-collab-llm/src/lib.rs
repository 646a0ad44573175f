//! Reference [`runtime_core::LlmProvider`] collaborators.
//!
//! LLM provider integration is explicitly out of scope for the runtime core
//! (§6.1 only specifies the interface); this crate exists so the rest of the
//! workspace — demos, integration tests, anything that needs *a* provider to
//! plug into a [`runtime_core::NodeContext`] — has something concrete to
//! reach for without pulling in a full multi-vendor SDK.

#![deny(missing_docs)]
#![warn(clippy::all)]

/// A deterministic, network-free provider for tests and demos.
pub mod mock;

/// An OpenAI-compatible HTTP provider (OpenAI itself, and any API that
/// mirrors its `/chat/completions` shape).
pub mod openai;

pub use mock::MockLlmProvider;
pub use openai::{OpenAiConfig, OpenAiProvider};

/// Crate version, surfaced for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

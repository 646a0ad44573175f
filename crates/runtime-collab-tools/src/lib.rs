//! A reference [`runtime_core::ToolDispatcher`].
//!
//! Domain tools (PDF readers, Slack, Telegram, QuickBooks, Plaid, etc.) are
//! explicitly out of scope for the runtime core; this crate provides the
//! registry shape a real deployment would fill in, plus two small built-in
//! tools exercising both the credential-free and credential-gated paths
//! (§6.1, S5).

#![deny(missing_docs)]
#![warn(clippy::all)]

/// The file-read built-in tool.
pub mod file;

/// The HTTP GET built-in tool.
pub mod http;

/// [`Tool`] trait and [`registry::ToolRegistry`], the [`runtime_core::ToolDispatcher`] impl.
pub mod registry;

pub use file::FileReadTool;
pub use http::HttpGetTool;
pub use registry::{Tool, ToolRegistry};

/// Crate version, surfaced for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

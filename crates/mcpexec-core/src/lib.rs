//! Core types and error definitions for the mcpexec runtime.
//!
//! This crate provides the foundational types shared across all mcpexec
//! crates: the error taxonomy, server configuration models, and the
//! normalization strategy tags consumed by the client runtime.
//!
//! # Main types
//!
//! - [`McpExecError`] — Unified error enum for all mcpexec subsystems.
//! - [`McpExecResult`] — Convenience alias for `Result<T, McpExecError>`.
//! - [`McpConfig`] / [`ServerConfig`] — Validated `mcp_config.json` models.
//! - [`ServerDescriptor`] — Immutable per-server launch description.
//! - [`NormalizationStrategy`] — Per-server response key normalization tag.

/// Configuration models for MCP servers.
pub mod config;

pub use config::{McpConfig, NormalizationStrategy, ServerConfig, ServerDescriptor};

/// Separator between server name and tool name in a tool identifier.
///
/// A full identifier has the form `"{server}__{tool}"` and is split on the
/// *first* occurrence of this separator.
pub const TOOL_SEPARATOR: &str = "__";

// --- Error types ---

/// A single server whose connection could not be closed during shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownFailure {
    /// Name of the server whose close failed.
    pub server: String,
    /// The underlying close error message.
    pub message: String,
}

fn format_failures(failures: &[ShutdownFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.server, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Top-level error type for the mcpexec runtime.
///
/// The variants mirror the caller-visible failure classes: configuration
/// problems are fatal to initialization and must be fixed before running,
/// while connection, lookup, and execution errors are fatal to the
/// triggering call only and can be retried by re-invoking.
#[derive(Debug, thiserror::Error)]
pub enum McpExecError {
    /// Bad or missing server configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Spawning or handshaking with a server failed.
    #[error("Could not connect to MCP server '{server}': {message}")]
    Connection {
        /// Name of the server that failed to connect.
        server: String,
        /// The underlying spawn or handshake error.
        message: String,
    },

    /// Malformed tool identifier, or unknown server or tool.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A remote failure, timeout, or transport break during a call.
    #[error("Failed to execute tool '{identifier}': {message}")]
    Execution {
        /// The full `server__tool` identifier of the failing call.
        identifier: String,
        /// The underlying remote or transport error.
        message: String,
    },

    /// One or more connections failed to close during shutdown.
    ///
    /// Shutdown is best-effort: every live connection gets a close attempt
    /// and the failures are aggregated here, naming each failing server.
    #[error("Shutdown completed with {} failure(s): {}", .0.len(), format_failures(.0))]
    Shutdown(Vec<ShutdownFailure>),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`McpExecError`].
pub type McpExecResult<T> = Result<T, McpExecError>;

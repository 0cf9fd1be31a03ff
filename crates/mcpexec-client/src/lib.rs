//! Lazy connection and invocation runtime for MCP servers.
//!
//! A calling program invokes named tools exposed by out-of-process MCP
//! servers without connecting to every server up front: servers are
//! spawned on first use, their tool lists are cached, calls to one server
//! are serialized while distinct servers proceed concurrently, and
//! shutdown is best-effort across all live connections.
//!
//! # Main types
//!
//! - [`McpClientManager`] — lazy-loading connection manager; the single
//!   entry point for invoking tools by `"{server}__{tool}"` identifier.
//! - [`ServerConnection`] / [`ConnectionFactory`] — the transport seam;
//!   [`StdioConnection`] is the subprocess implementation.
//! - [`normalize_fields`] — per-server response key normalization.
//! - [`unwrap::unwrap_response`] — defensive unwrapping of heterogeneous
//!   `tools/call` result shapes.

pub mod connection;
pub mod manager;
pub mod normalize;
pub mod protocol;
pub mod unwrap;

pub use connection::{
    CallError, ConnectionFactory, ConnectionState, ServerConnection, StdioConnection,
    StdioConnectionFactory,
};
pub use manager::McpClientManager;
pub use normalize::normalize_fields;
pub use protocol::ToolDescriptor;

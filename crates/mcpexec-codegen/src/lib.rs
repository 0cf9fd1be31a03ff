//! Schema-driven binding generation for MCP tools.
//!
//! Runs ahead of time: discovers tools through the client runtime,
//! translates each tool's JSON Schema into language-agnostic type
//! descriptors, and emits typed Rust call surfaces that delegate to
//! `McpClientManager::invoke` at run time.
//!
//! # Main entry points
//!
//! - [`generate_all`] — discover and write binding modules per server.
//! - [`render_server_module`] — render one server's artifacts in memory.
//! - [`schema::translate`] — pure JSON Schema → [`schema::TypeDescriptor`].
//! - [`safety::classify_tool`] — heuristic read-only/mutating classing.

pub mod generator;
pub mod rust;
pub mod safety;
pub mod schema;

pub use generator::{generate_all, render_server_module, GeneratedServer};
pub use safety::{classify_tool, ToolSafety};
pub use schema::{translate, TypeDescriptor};

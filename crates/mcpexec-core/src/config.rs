//! Configuration models for `mcp_config.json`.
//!
//! The root document maps server names to launch descriptions:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "git": {
//!       "command": "uvx",
//!       "args": ["mcp-server-git"],
//!       "env": {"GIT_PAGER": "cat"}
//!     }
//!   }
//! }
//! ```
//!
//! Validation happens in [`McpConfig::from_json`]; the runtime only ever
//! sees pre-validated [`ServerDescriptor`]s.

use crate::{McpExecError, McpExecResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Key normalization strategy applied to a server's responses.
///
/// Unknown servers default to [`NormalizationStrategy::Identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NormalizationStrategy {
    /// Return responses unchanged.
    #[default]
    #[serde(rename = "identity")]
    Identity,
    /// Repair known-lowercase key prefixes (`system.` → `System.` and
    /// friends) recursively throughout the response.
    #[serde(rename = "prefix-remap")]
    PrefixRemap,
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Command used to launch the server process (e.g. `npx`, `uvx`).
    pub command: String,
    /// Arguments passed to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables for the server process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Skip this server entirely (default: false).
    #[serde(default)]
    pub disabled: bool,
    /// Response key normalization strategy (default: identity).
    #[serde(default)]
    pub normalization: NormalizationStrategy,
}

/// Root configuration for all MCP servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Mapping of server names to their configurations.
    #[serde(rename = "mcpServers")]
    pub mcp_servers: HashMap<String, ServerConfig>,
}

impl McpConfig {
    /// Parse and validate a configuration document from a JSON string.
    pub fn from_json(content: &str) -> McpExecResult<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| McpExecError::Configuration(format!("Invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the parsed configuration.
    ///
    /// At least one server must be configured, and every server needs a
    /// non-empty launch command.
    pub fn validate(&self) -> McpExecResult<()> {
        if self.mcp_servers.is_empty() {
            return Err(McpExecError::Configuration(
                "At least one MCP server must be configured".to_string(),
            ));
        }
        for (name, server) in &self.mcp_servers {
            if server.command.trim().is_empty() {
                return Err(McpExecError::Configuration(format!(
                    "Server '{name}' has an empty launch command"
                )));
            }
        }
        Ok(())
    }

    /// Look up a server configuration by name.
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.mcp_servers.get(name)
    }

    /// Names of servers that are not disabled, sorted for determinism.
    pub fn enabled_servers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .mcp_servers
            .iter()
            .filter(|(_, c)| !c.disabled)
            .map(|(n, _)| n.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Convert the configuration into immutable per-server descriptors,
    /// sorted by server name.
    pub fn descriptors(&self) -> Vec<ServerDescriptor> {
        let mut descriptors: Vec<ServerDescriptor> = self
            .mcp_servers
            .iter()
            .map(|(name, c)| ServerDescriptor {
                name: name.clone(),
                command: c.command.trim().to_string(),
                args: c.args.clone(),
                env: c.env.clone(),
                disabled: c.disabled,
                normalization: c.normalization,
            })
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }
}

/// Immutable launch description for one MCP server.
///
/// Created by the configuration loader and read-only to the runtime.
#[derive(Debug, Clone)]
pub struct ServerDescriptor {
    /// Unique server name; the first half of every tool identifier.
    pub name: String,
    /// Command used to launch the server process.
    pub command: String,
    /// Arguments passed to the command.
    pub args: Vec<String>,
    /// Environment variables for the server process.
    pub env: HashMap<String, String>,
    /// Whether the server is disabled.
    pub disabled: bool,
    /// Response key normalization strategy.
    pub normalization: NormalizationStrategy,
}

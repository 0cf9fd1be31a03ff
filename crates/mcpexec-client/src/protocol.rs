//! MCP (Model Context Protocol) JSON-RPC 2.0 message types.
//!
//! Only the subset needed for connect → discover → call → close is modeled.

use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Request id; responses are matched back by this value.
    pub id: u64,
    /// Method name, e.g. `tools/call`.
    pub method: String,
    /// Method parameters, omitted entirely when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Build a request for `method` with the given id and optional params.
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version echoed by the server.
    #[allow(dead_code)]
    pub jsonrpc: String,
    /// Id of the request this responds to; absent for notifications.
    pub id: Option<u64>,
    /// Successful result payload.
    pub result: Option<serde_json::Value>,
    /// Error payload, mutually exclusive with `result`.
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured error details.
    pub data: Option<serde_json::Value>,
}

/// Tool definition from the `tools/list` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within its server.
    pub name: String,
    /// Human-readable tool description.
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's parameters.
    #[serde(default = "default_input_schema", rename = "inputSchema")]
    pub input_schema: serde_json::Value,
    /// JSON Schema for the tool's result; frequently absent.
    #[serde(default, rename = "outputSchema", skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// MCP server capabilities from the `initialize` response.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerCapabilities {
    /// Tool support advertised by the server.
    #[serde(default)]
    pub tools: Option<serde_json::Value>,
    /// Resource support (unused by this runtime).
    #[serde(default)]
    pub resources: Option<serde_json::Value>,
    /// Prompt support (unused by this runtime).
    #[serde(default)]
    pub prompts: Option<serde_json::Value>,
}

/// MCP initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    /// Protocol version the server speaks.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Advertised server capabilities.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Server identification, if provided.
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server identification block.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version string.
    #[serde(default)]
    pub version: String,
}

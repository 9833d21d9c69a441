/// JSON-RPC 2.0 / MCP Wire Types
///
/// Request and response envelopes shared by every transport, the fixed error
/// code table, and the typed payloads returned by the MCP methods.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC version tag carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 request structure for MCP protocol.
///
/// `id` is `None` both when the field is absent and when it is `null`; either
/// way the request is a notification.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct McpRequest {
    /// JSON-RPC version identifier. Accepted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    /// Request ID for correlating responses. None indicates a notification.
    #[serde(default)]
    pub id: Option<Value>,
    /// MCP method name (e.g., "initialize", "tools/list", "tools/call")
    pub method: String,
    /// Method-specific parameters as JSON value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpRequest {
    /// A request without a correlation id never gets a response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 response structure for MCP protocol.
///
/// Exactly one of `result` or `error` is set. `id` is always serialized and
/// becomes `null` when the request carried none.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct McpResponse {
    /// JSON-RPC version identifier, always "2.0"
    pub jsonrpc: String,
    /// Request ID from the original request
    pub id: Option<Value>,
    /// Response result, present when request succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error information, present when request failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl McpResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(McpError {
                code: code.code(),
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC 2.0 error structure.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct McpError {
    /// JSON-RPC error code (e.g., -32601 for method not found)
    pub code: i32,
    /// Human-readable error message
    pub message: String,
    /// Optional additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Protocol-level error codes. The numeric values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
}

impl ErrorCode {
    pub const fn code(self) -> i32 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
        }
    }
}

/// MCP tool definition structure.
///
/// Serialized as one entry of the `tools/list` result, with the schema under
/// the camelCase `inputSchema` key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct McpTool {
    /// Unique tool identifier (e.g., "echo", "list_clusters")
    pub name: String,
    /// Human-readable description of what the tool does
    pub description: String,
    /// JSON Schema defining the tool's input parameters
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Result payload of `tools/list`.
#[derive(Serialize, Debug)]
pub struct ToolListResult {
    pub tools: Vec<McpTool>,
}

/// Result payload of `initialize`.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: &'static str,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

#[derive(Serialize, Debug)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    pub list_changed: bool,
}

/// Server identity reported in `initialize` responses.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Result payload of `tools/call`.
///
/// Handler failures are reported here with `isError` set rather than as an
/// envelope-level error, so callers can always decode `result` first.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn text(text: String) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: false,
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            content: vec![ContentBlock::text(format!("Error: {message}"))],
            is_error: true,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl ContentBlock {
    pub fn text(text: String) -> Self {
        Self { kind: "text", text }
    }
}

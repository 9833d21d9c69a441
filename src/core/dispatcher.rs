/// Request Dispatcher
///
/// Routes a decoded request envelope to one of the MCP methods and produces
/// the response envelope. Both transports share a single dispatcher; it keeps
/// no state across calls beyond the tool registry.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::cancel::CancelToken;
use crate::core::protocol::{
    CallToolResult, ErrorCode, InitializeResult, JSONRPC_VERSION, McpRequest, McpResponse,
    PROTOCOL_VERSION, ServerCapabilities, ServerInfo, ToolListResult, ToolsCapability,
};
use crate::core::registry::{ToolArguments, ToolRegistry};

/// The fixed MCP method set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Initialize,
    ToolsList,
    ToolsCall,
    Unknown(String),
}

impl Method {
    pub fn parse(name: &str) -> Self {
        match name {
            "initialize" => Method::Initialize,
            "tools/list" => Method::ToolsList,
            "tools/call" => Method::ToolsCall,
            other => Method::Unknown(other.to_string()),
        }
    }
}

/// Protocol-level failures raised while servicing a request.
///
/// These always become an envelope `error`; handler failures never do.
#[derive(Debug, Error, PartialEq)]
pub enum CallError {
    #[error("Invalid Request: unsupported jsonrpc version {0:?}")]
    InvalidRequest(String),
    #[error("Invalid params{}", detail_suffix(.0))]
    InvalidParams(Option<&'static str>),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Tool not found: {0}")]
    ToolNotFound(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

fn detail_suffix(detail: &Option<&'static str>) -> String {
    detail.map(|d| format!(": {d}")).unwrap_or_default()
}

impl CallError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CallError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            CallError::InvalidParams(_) => ErrorCode::InvalidParams,
            CallError::MethodNotFound(_) | CallError::ToolNotFound(_) => ErrorCode::MethodNotFound,
            CallError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// Validated `tools/call` parameters.
#[derive(Debug, PartialEq)]
struct ToolCall {
    name: String,
    arguments: ToolArguments,
}

impl ToolCall {
    fn from_params(params: Option<Value>) -> Result<Self, CallError> {
        let Some(Value::Object(mut params)) = params else {
            return Err(CallError::InvalidParams(None));
        };

        let name = match params.remove("name") {
            Some(Value::String(name)) if !name.is_empty() => name,
            _ => return Err(CallError::InvalidParams(Some("name is required"))),
        };

        let arguments = match params.remove("arguments") {
            None | Some(Value::Null) => ToolArguments::new(),
            Some(Value::Object(arguments)) => arguments,
            Some(_) => return Err(CallError::InvalidParams(Some("arguments must be an object"))),
        };

        Ok(Self { name, arguments })
    }
}

/// Transport-independent MCP request handler.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    info: ServerInfo,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, info: ServerInfo) -> Self {
        Self { registry, info }
    }

    /// Service one request envelope.
    ///
    /// The response always echoes the request's `id`. Notification
    /// suppression is the transport's decision, not the dispatcher's.
    pub async fn dispatch(&self, request: McpRequest, cancel: &CancelToken) -> McpResponse {
        let McpRequest {
            jsonrpc,
            id,
            method,
            params,
        } = request;

        let outcome = match jsonrpc.as_deref() {
            Some(tag) if tag != JSONRPC_VERSION => Err(CallError::InvalidRequest(tag.to_string())),
            _ => self.route(Method::parse(&method), params, cancel).await,
        };

        match outcome {
            Ok(result) => McpResponse::success(id, result),
            Err(err) => {
                debug!(method = %method, error = %err, "request failed");
                McpResponse::failure(id, err.code(), err.to_string())
            }
        }
    }

    async fn route(
        &self,
        method: Method,
        params: Option<Value>,
        cancel: &CancelToken,
    ) -> Result<Value, CallError> {
        match method {
            Method::Initialize => to_value(&self.initialize()),
            Method::ToolsList => to_value(&ToolListResult {
                tools: self.registry.list(),
            }),
            Method::ToolsCall => {
                let call = ToolCall::from_params(params)?;
                to_value(&self.call_tool(call, cancel).await?)
            }
            Method::Unknown(name) => Err(CallError::MethodNotFound(name)),
        }
    }

    fn initialize(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: PROTOCOL_VERSION,
            capabilities: ServerCapabilities {
                tools: ToolsCapability { list_changed: true },
            },
            server_info: self.info.clone(),
        }
    }

    async fn call_tool(&self, call: ToolCall, cancel: &CancelToken) -> Result<CallToolResult, CallError> {
        let handler = self
            .registry
            .lookup(&call.name)
            .ok_or_else(|| CallError::ToolNotFound(call.name.clone()))?;

        debug!(tool = %call.name, "invoking tool");
        match handler(call.arguments, cancel.clone()).await {
            Ok(value) => {
                let text = serde_json::to_string(&value)
                    .map_err(|e| CallError::Internal(e.to_string()))?;
                Ok(CallToolResult::text(text))
            }
            Err(message) => {
                warn!(tool = %call.name, error = %message, "tool reported failure");
                Ok(CallToolResult::error(&message))
            }
        }
    }
}

fn to_value<T: Serialize>(payload: &T) -> Result<Value, CallError> {
    serde_json::to_value(payload).map_err(|e| CallError::Internal(e.to_string()))
}

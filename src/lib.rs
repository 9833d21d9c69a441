//! MCP server core: a JSON-RPC 2.0 dispatcher over a registry of named tools,
//! served over newline-agnostic stdio or HTTP POST.

pub mod core;
pub mod tools;

pub use crate::core::cancel::CancelToken;
pub use crate::core::dispatcher::Dispatcher;
pub use crate::core::protocol::{McpRequest, McpResponse, ServerInfo};
pub use crate::core::registry::{ToolArguments, ToolHandler, ToolRegistry, ToolResult};

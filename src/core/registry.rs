/// Tool Registry
///
/// Maps tool names to their descriptor and handler. Collaborators register
/// during startup; transports read concurrently while serving.

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use crate::core::cancel::CancelToken;
use crate::core::protocol::McpTool;

/// Argument bag passed to a tool handler.
pub type ToolArguments = Map<String, Value>;

/// Outcome of a tool handler: a JSON value, or a free-text failure reason.
pub type ToolResult = Result<Value, String>;

/// Shared async tool handler, callable concurrently from every worker.
pub type ToolHandler =
    Arc<dyn Fn(ToolArguments, CancelToken) -> BoxFuture<'static, ToolResult> + Send + Sync>;

/// Descriptor and handler stored under one key so readers never observe a
/// descriptor paired with another registration's handler.
struct RegisteredTool {
    tool: McpTool,
    handler: ToolHandler,
}

/// Registry of available MCP tools.
#[derive(Default)]
pub struct ToolRegistry {
    entries: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any earlier registration under the same name.
    ///
    /// When `input_schema` is `None` the tool advertises an empty object
    /// schema with no required fields.
    pub fn register<F, Fut>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Option<Value>,
        handler: F,
    ) where
        F: Fn(ToolArguments, CancelToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        let name = name.into();
        let tool = McpTool {
            name: name.clone(),
            description: description.into(),
            input_schema: input_schema.unwrap_or_else(default_schema),
        };
        let handler: ToolHandler = Arc::new(move |args, cancel| -> BoxFuture<'static, ToolResult> {
            Box::pin(handler(args, cancel))
        });

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.insert(name.clone(), RegisteredTool { tool, handler }).is_some() {
            debug!(tool = %name, "replaced existing tool registration");
        } else {
            debug!(tool = %name, "registered tool");
        }
    }

    /// Snapshot of every registered descriptor. Order is unspecified.
    pub fn list(&self) -> Vec<McpTool> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().map(|entry| entry.tool.clone()).collect()
    }

    /// Handler registered under `name`. The lock is released before it runs.
    pub fn lookup(&self, name: &str) -> Option<ToolHandler> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(name).map(|entry| Arc::clone(&entry.handler))
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn default_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {}
    })
}

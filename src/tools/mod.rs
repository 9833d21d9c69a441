/// Tools Module
///
/// Collaborators that contribute tools to the registry. Each tool module
/// exports a `register` function that is called once at startup, before any
/// transport starts serving.

pub mod echo;

use crate::core::registry::ToolRegistry;

/// Register every built-in tool.
pub fn register_all(registry: &ToolRegistry) {
    echo::register(registry);
}

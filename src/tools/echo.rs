/// Echo Tool
///
/// Returns the caller's arguments wrapped as `{"echoed": <arguments>}`. Useful
/// for checking that a client reaches the dispatcher and that argument bags
/// survive the round trip unchanged.

use serde_json::json;

use crate::core::registry::ToolRegistry;

pub const NAME: &str = "echo";

/// Register the echo tool with the tool registry.
pub fn register(registry: &ToolRegistry) {
    let schema = json!({
        "type": "object",
        "properties": {
            "message": {
                "type": "string",
                "description": "The message to echo"
            }
        },
        "additionalProperties": true
    });

    registry.register(
        NAME,
        "Echo the call arguments back to the client.",
        Some(schema),
        |args, _cancel| async move { Ok(json!({ "echoed": args })) },
    );
}

/// Core Server Framework Module
///
/// - protocol.rs: JSON-RPC 2.0 envelopes and MCP payload types
/// - registry.rs: concurrent tool registry
/// - dispatcher.rs: method routing and tool invocation
/// - stdio.rs / http.rs: the two transports over one dispatcher
/// - cancel.rs: cancellation shared by transports and handlers
/// - config.rs / error.rs: CLI configuration and startup errors

pub mod cancel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod protocol;
pub mod registry;
pub mod stdio;

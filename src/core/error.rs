/// Error types for server startup and the transport loops.
///
/// Protocol-level failures are not represented here: the dispatcher turns
/// them into JSON-RPC error envelopes and they never abort a transport.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Reading or writing a transport stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A response could not be encoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn bind(address: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            address: address.into(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

//! Error types for the wire layer

use thiserror::Error;

use super::protocol::RpcError;

/// Result type alias for wire operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur while talking to a peer over a framed stream
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed frame: {0}")]
    Frame(String),

    #[error("JSON-RPC error (code {}): {}", .0.code, .0.message)]
    Rpc(RpcError),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Failed to start backend process: {0}")]
    Spawn(String),

    #[error("Transport closed")]
    Closed,

    #[error("Request timeout")]
    Timeout,
}

impl TransportError {
    /// Whether the underlying stream is gone (as opposed to one bad message).
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransportError::Io(_) | TransportError::Closed)
    }
}

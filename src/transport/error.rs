//! Transport error types.

use std::io;

use serde_json::Value;
use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that break the request/response channel.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to serialize the request to JSON.
    #[error("failed to serialize request: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    /// Write side rejected the request (broken pipe).
    #[error("failed to write to gateway: {0}")]
    WriteFailed(#[source] io::Error),

    /// I/O error while reading the response line.
    #[error("failed to read from gateway: {0}")]
    ReadFailed(#[source] io::Error),

    /// The stream closed before a response line arrived.
    #[error("gateway closed its output before responding")]
    Closed,

    /// The response line is not a valid response.
    #[error("malformed response line {line:?}: {source}")]
    Malformed {
        /// The offending line, shortened for display.
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// The response answers a different request.
    #[error("response id {actual} does not match request id {expected}")]
    Mismatched { expected: Value, actual: Value },

    /// No response line within the request timeout.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),
}

impl TransportError {
    /// Whether the gateway's output stream is known to be gone.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed | Self::WriteFailed(_))
    }
}

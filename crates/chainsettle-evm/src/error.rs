//! Transport-level error types.

use thiserror::Error;

use chainsettle_core::FetchError;

use crate::request::JsonRpcError;

/// Errors that can occur during an RPC or GraphQL round trip.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, non-2xx status, …).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if resending the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout { .. })
    }

    /// Returns `true` if the request may have reached the node even though no
    /// usable answer came back.
    pub fn delivery_unknown(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout { .. } | Self::Deserialization(_))
    }
}

impl From<TransportError> for FetchError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Deserialization(e) => FetchError::Malformed(e.to_string()),
            other => FetchError::Transport(other.to_string()),
        }
    }
}

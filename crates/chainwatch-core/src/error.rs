//! Transport-level error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// Errors that can occur during an RPC transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, non-2xx status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket send/receive error on an established connection.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Opening an endpoint failed, or an open connection was lost.
    #[error("connection to {url} failed: {reason}")]
    ConnectionFailure { url: String, reason: String },

    /// The operation needs a live connection and none is open.
    #[error("not connected")]
    NotConnected,

    /// No subscription is registered under this handle.
    #[error("unknown subscription handle {0}")]
    UnknownSubscription(u64),

    /// An inbound frame could not be interpreted.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this error is retryable (transient).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::WebSocket(_)
                | Self::ConnectionFailure { .. }
                | Self::Timeout { .. }
        )
    }

    /// Returns `true` if this is a node-side execution error (not retryable).
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// Shorthand for [`TransportError::ConnectionFailure`].
    pub fn connection(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConnectionFailure {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(TransportError::Http("502".into()).is_retryable());
        assert!(TransportError::Timeout { ms: 10 }.is_retryable());
        assert!(TransportError::connection("wss://a", "refused").is_retryable());
        assert!(!TransportError::NotConnected.is_retryable());
        assert!(!TransportError::InvalidConfig("x".into()).is_retryable());
    }

    #[test]
    fn rpc_errors_are_execution_errors() {
        let err = TransportError::Rpc(JsonRpcError {
            code: -32602,
            message: "invalid params".into(),
            data: None,
        });
        assert!(err.is_execution_error());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "RPC error -32602: invalid params");
    }
}

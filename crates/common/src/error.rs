//! Common error types for Quill
//!
//! This module defines all error types used across the Quill system.
//! None of these ever reach a client: the wire protocol has no error message,
//! so every variant ends up in a log line or terminates a component.

use std::net::AddrParseError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Main error type for Quill
#[derive(Error, Debug)]
pub enum QuillError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// WebSocket transport errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Model loading and forward pass errors
    #[error("Model error: {0}")]
    Model(String),

    /// Vocabulary loading errors
    #[error("Vocabulary error: {0}")]
    Vocabulary(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A cross-stage channel was closed by its peer
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AddrParseError> for QuillError {
    fn from(err: AddrParseError) -> Self {
        QuillError::Parse(err.to_string())
    }
}

impl QuillError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        QuillError::Config(msg.into())
    }

    /// Create a model error
    pub fn model(msg: impl Into<String>) -> Self {
        QuillError::Model(msg.into())
    }

    /// Create a vocabulary error
    pub fn vocabulary(msg: impl Into<String>) -> Self {
        QuillError::Vocabulary(msg.into())
    }

    /// Create a channel closed error
    pub fn channel_closed(msg: impl Into<String>) -> Self {
        QuillError::ChannelClosed(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        QuillError::Internal(msg.into())
    }

    /// Whether this error only affects the connection it happened on.
    ///
    /// Transport failures end one connection; everything else is a component
    /// failure. Malformed client messages never surface as errors at all.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(self, QuillError::WebSocket(_))
    }
}

/// Result type alias for Quill operations
pub type Result<T> = std::result::Result<T, QuillError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_scoped_errors() {
        let closed = QuillError::from(tungstenite::Error::ConnectionClosed);
        assert!(closed.is_connection_scoped());
        assert!(!QuillError::model("device lost").is_connection_scoped());
        assert!(!QuillError::channel_closed("requests").is_connection_scoped());
    }

    #[test]
    fn test_addr_parse_error_conversion() {
        let err: QuillError = "not-an-addr".parse::<std::net::SocketAddr>().unwrap_err().into();
        assert!(matches!(err, QuillError::Parse(_)));
    }
}

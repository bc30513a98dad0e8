//! Client-side error types.

use std::time::Duration;

/// Failure delivered to the single caller awaiting a correlated reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,

    #[error("Server error: {message}")]
    Server { message: String },

    #[error("Failed to encode request: {0}")]
    Encode(String),
}

/// Errors raised by a transport link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection is not open")]
    NotOpen,

    #[error("Connection is closed")]
    Closed,

    #[error("TLS setup failed: {0}")]
    Tls(String),
}

/// Invalid configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid endpoint '{value}': {source}")]
    InvalidEndpoint {
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Endpoint must use ws:// or wss://, got '{0}'")]
    UnsupportedScheme(String),

    #[error("{var} must be a whole number of seconds, got '{value}'")]
    InvalidSeconds { var: &'static str, value: String },
}

//! Shared error types for the envelope codec.

use serde::{Deserialize, Serialize};

/// Why an inbound or outbound frame could not be (de)serialized.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no string `type` discriminator")]
    MissingType,

    #[error("`{kind}` frame has an invalid shape: {source}")]
    InvalidShape {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// An uncorrelated `error` message from the server.
///
/// Correlated errors are routed to the waiting caller instead; these are the
/// bare server-side notices that belong to nobody in particular.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerNotice {
    pub message: String,
}

impl ServerNotice {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ServerNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Server error: {}", self.message)
    }
}

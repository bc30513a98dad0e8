//! Observable session state.

use std::fmt;

/// Lifecycle of the realtime session.
///
/// Only the session actor writes this; everyone else reads it through a
/// `watch` channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The link failed before it opened. Held until the next attempt starts.
    Error(String),
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    /// `Connecting` or `Connected`: a link exists and `connect` is a no-op.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => f.write_str("disconnected"),
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Connected => f.write_str("connected"),
            SessionState::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}

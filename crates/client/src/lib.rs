//! Raptor realtime client
//!
//! Session manager for the dispatch backend's WebSocket channel: one
//! persistent link carrying push updates, correlated requests and
//! heartbeats, surviving network flaps without leaking waiting callers.

pub mod logging;

pub mod config;
pub mod error;
pub mod ws;

pub use config::{RealtimeConfig, TlsPolicy};
pub use error::{ConfigError, RequestError, TransportError};
pub use ws::{RealtimeSession, SessionState};

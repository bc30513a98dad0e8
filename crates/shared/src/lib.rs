//! Shared wire types for the raptor realtime channel.
//!
//! Nothing in here performs I/O; the client crate owns the socket.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;

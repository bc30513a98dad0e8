//! Realtime session over a single persistent WebSocket.
//!
//! This module provides:
//! - One link per session, with automatic reconnect after a fixed delay
//! - Correlated request/response calls with per-request timeouts
//! - Channel subscriptions that survive reconnects
//! - Broadcast outputs for live push updates
//!
//! # Architecture
//!
//! ```text
//!   RealtimeSession (cloneable handle)
//!          │ commands
//!          ▼
//! ┌──────────────────────────────────────────────┐
//! │                SessionActor                  │
//! │  state · subscriptions · timers · link       │
//! └──────────────────────────────────────────────┘
//!          │ frames                  ▲ TransportEvent
//!          ▼                         │
//! ┌──────────────────────────────────────────────┐
//! │          Connector / Link (socket)           │
//! └──────────────────────────────────────────────┘
//!                                    │ Message
//!                                    ▼
//!                           ┌────────────────┐
//!                           │   Dispatcher   │
//!                           └────────────────┘
//!                              │          │
//!                              ▼          ▼
//!                   CorrelationTable   Broadcasts
//!                   (waiting calls)    (chat, orders, location,
//!                                       responses, notices)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let session = RealtimeSession::new(RealtimeConfig::from_env()?);
//! session.subscribe(["orders"]);
//! session.connect(Some("jan@example.com".into()));
//!
//! let mut updates = session.order_updates();
//! let profile = session.fetch_customer_profile("jan@example.com").await?;
//!
//! session.disconnect().await;
//! ```

pub mod connection;
pub mod correlation;
pub mod dispatcher;
mod requests;
pub mod session;
pub mod state;
pub mod subscriptions;

pub use connection::{
    ConnectRequest, Connector, EventSink, Link, LinkId, TransportEvent, TungsteniteConnector,
};
pub use correlation::{CorrelationTable, PendingReply, RequestIdGenerator};
pub use dispatcher::{Broadcasts, DispatchOutcome, Dispatcher, ResponseUpdate};
pub use session::RealtimeSession;
pub use state::SessionState;
pub use subscriptions::SubscriptionRegistry;

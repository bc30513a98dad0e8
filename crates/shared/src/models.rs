//! Identifiers and payload types carried over the realtime channel.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque application payload (`data` field of an envelope).
///
/// The realtime core never looks inside; order, chat and location objects
/// are interpreted by whoever consumes the outputs.
pub type Payload = serde_json::Map<String, serde_json::Value>;

// --- Identity ---

/// Client instance id, generated once per process and sent in the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Correlation token pairing one outbound request with one inbound reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Message families ---

/// Data families served by `fetch_<family>` / `<family>_response` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFamily {
    CustomerOrders,
    CustomerProfile,
    ActiveDrivers,
    OrderDetails,
    OrderHistory,
}

impl ResponseFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseFamily::CustomerOrders => "customer_orders",
            ResponseFamily::CustomerProfile => "customer_profile",
            ResponseFamily::ActiveDrivers => "active_drivers",
            ResponseFamily::OrderDetails => "order_details",
            ResponseFamily::OrderHistory => "order_history",
        }
    }
}

impl fmt::Display for ResponseFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live-update categories pushed by the server without a request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushCategory {
    Chat,
    OrderStatus,
    Location,
}

impl fmt::Display for PushCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushCategory::Chat => f.write_str("chat"),
            PushCategory::OrderStatus => f.write_str("order_status"),
            PushCategory::Location => f.write_str("location"),
        }
    }
}

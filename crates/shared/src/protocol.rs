//! Realtime envelope codec.
//!
//! Every frame is a JSON object with a `type` discriminator. Requests that
//! expect a reply carry a top-level `requestId`; the server echoes it on the
//! matching `*_response` (or `error`). Push updates carry no id and are
//! classified by `type` alone.
//!
//! ```text
//! client -> {"type":"fetch_order_details","orderId":"42","requestId":"c-7-1700000000000"}
//! server -> {"type":"order_details_response","requestId":"c-7-1700000000000","data":{...}}
//! server -> {"type":"location_update","data":{"lat":52.1,"lng":4.3}}
//! ```

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::models::{Payload, PushCategory, RequestId, ResponseFamily};

pub const TYPE_FIELD: &str = "type";
pub const REQUEST_ID_FIELD: &str = "requestId";

/// Messages the client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Subscribe {
        channels: Vec<String>,
    },
    Unsubscribe {
        channels: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        order_id: String,
        message: String,
        sender_email: String,
        /// Unix millis at the time of sending.
        timestamp: i64,
    },
    #[serde(rename_all = "camelCase")]
    FetchCustomerOrders {
        customer_email: String,
        include_history: bool,
    },
    #[serde(rename_all = "camelCase")]
    FetchCustomerProfile {
        customer_email: String,
    },
    FetchActiveDrivers {},
    #[serde(rename_all = "camelCase")]
    FetchOrderDetails {
        order_id: String,
    },
    #[serde(rename_all = "camelCase")]
    FetchOrderHistory {
        customer_email: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
    },
    Ping {},
}

impl ClientCommand {
    /// Build a chat message stamped with the current time.
    pub fn chat(
        order_id: impl Into<String>,
        message: impl Into<String>,
        sender_email: impl Into<String>,
    ) -> Self {
        ClientCommand::ChatMessage {
            order_id: order_id.into(),
            message: message.into(),
            sender_email: sender_email.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// The wire `type` of this command.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientCommand::Subscribe { .. } => "subscribe",
            ClientCommand::Unsubscribe { .. } => "unsubscribe",
            ClientCommand::ChatMessage { .. } => "chat_message",
            ClientCommand::FetchCustomerOrders { .. } => "fetch_customer_orders",
            ClientCommand::FetchCustomerProfile { .. } => "fetch_customer_profile",
            ClientCommand::FetchActiveDrivers {} => "fetch_active_drivers",
            ClientCommand::FetchOrderDetails { .. } => "fetch_order_details",
            ClientCommand::FetchOrderHistory { .. } => "fetch_order_history",
            ClientCommand::Ping {} => "ping",
        }
    }

    /// Which response family answers this command, if it expects a reply.
    pub fn reply_family(&self) -> Option<ResponseFamily> {
        match self {
            ClientCommand::FetchCustomerOrders { .. } => Some(ResponseFamily::CustomerOrders),
            ClientCommand::FetchCustomerProfile { .. } => Some(ResponseFamily::CustomerProfile),
            ClientCommand::FetchActiveDrivers {} => Some(ResponseFamily::ActiveDrivers),
            ClientCommand::FetchOrderDetails { .. } => Some(ResponseFamily::OrderDetails),
            ClientCommand::FetchOrderHistory { .. } => Some(ResponseFamily::OrderHistory),
            _ => None,
        }
    }
}

/// Messages the server sends, decoded once at the dispatcher boundary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake acknowledgement.
    Connected {
        #[serde(default, rename = "clientId")]
        client_id: Option<String>,
    },
    Subscribed {
        #[serde(default)]
        channels: Vec<String>,
    },
    ChatMessage {
        #[serde(default, deserialize_with = "object_or_empty")]
        data: Payload,
    },
    OrderUpdate {
        #[serde(default, deserialize_with = "object_or_empty")]
        data: Payload,
    },
    LocationUpdate {
        #[serde(default, deserialize_with = "object_or_empty")]
        data: Payload,
    },
    CustomerOrdersResponse {
        #[serde(default, deserialize_with = "object_or_empty")]
        data: Payload,
    },
    CustomerProfileResponse {
        #[serde(default, deserialize_with = "object_or_empty")]
        data: Payload,
    },
    ActiveDriversResponse {
        #[serde(default, deserialize_with = "object_or_empty")]
        data: Payload,
    },
    OrderDetailsResponse {
        #[serde(default, deserialize_with = "object_or_empty")]
        data: Payload,
    },
    OrderHistoryResponse {
        #[serde(default, deserialize_with = "object_or_empty")]
        data: Payload,
    },
    Pong {},
    Error {
        #[serde(default = "unknown_error")]
        message: String,
    },
    /// Any `type` this client does not know about.
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Response family and data, if this is a `*_response`.
    pub fn response_family(&self) -> Option<(ResponseFamily, &Payload)> {
        match self {
            ServerEvent::CustomerOrdersResponse { data } => {
                Some((ResponseFamily::CustomerOrders, data))
            }
            ServerEvent::CustomerProfileResponse { data } => {
                Some((ResponseFamily::CustomerProfile, data))
            }
            ServerEvent::ActiveDriversResponse { data } => {
                Some((ResponseFamily::ActiveDrivers, data))
            }
            ServerEvent::OrderDetailsResponse { data } => {
                Some((ResponseFamily::OrderDetails, data))
            }
            ServerEvent::OrderHistoryResponse { data } => {
                Some((ResponseFamily::OrderHistory, data))
            }
            _ => None,
        }
    }

    /// Push category and data, if this is a live update.
    pub fn push_category(&self) -> Option<(PushCategory, &Payload)> {
        match self {
            ServerEvent::ChatMessage { data } => Some((PushCategory::Chat, data)),
            ServerEvent::OrderUpdate { data } => Some((PushCategory::OrderStatus, data)),
            ServerEvent::LocationUpdate { data } => Some((PushCategory::Location, data)),
            _ => None,
        }
    }
}

fn unknown_error() -> String {
    "Unknown error".to_string()
}

/// Missing, null or non-object `data` is treated as an empty object.
fn object_or_empty<'de, D>(deserializer: D) -> Result<Payload, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        _ => Payload::new(),
    })
}

/// An outbound frame before encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEnvelope {
    pub command: ClientCommand,
    pub request_id: Option<RequestId>,
}

impl OutboundEnvelope {
    pub fn new(command: ClientCommand) -> Self {
        Self {
            command,
            request_id: None,
        }
    }

    pub fn correlated(command: ClientCommand, request_id: RequestId) -> Self {
        Self {
            command,
            request_id: Some(request_id),
        }
    }

    /// Encode to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let mut value = serde_json::to_value(&self.command)?;
        if let (Some(id), Some(object)) = (&self.request_id, value.as_object_mut()) {
            object.insert(
                REQUEST_ID_FIELD.to_string(),
                Value::String(id.as_str().to_string()),
            );
        }
        Ok(serde_json::to_string(&value)?)
    }

    /// Decode a frame produced by [`OutboundEnvelope::encode`].
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let (kind, request_id, value) = split_frame(raw)?;
        let command = ClientCommand::deserialize(value)
            .map_err(|source| ProtocolError::InvalidShape { kind, source })?;
        Ok(Self {
            command,
            request_id,
        })
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEnvelope {
    /// The raw `type` string, kept so unknown kinds can be logged.
    pub kind: String,
    pub request_id: Option<RequestId>,
    pub event: ServerEvent,
}

impl InboundEnvelope {
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let (kind, request_id, value) = split_frame(raw)?;
        let event = ServerEvent::deserialize(value).map_err(|source| {
            ProtocolError::InvalidShape {
                kind: kind.clone(),
                source,
            }
        })?;
        Ok(Self {
            kind,
            request_id,
            event,
        })
    }
}

/// Parse a frame and pull out the discriminator and correlation id.
fn split_frame(raw: &str) -> Result<(String, Option<RequestId>, Value), ProtocolError> {
    let value: Value = serde_json::from_str(raw)?;
    let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;
    let kind = object
        .get(TYPE_FIELD)
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_string();
    // An empty id means "uncorrelated" on this backend.
    let request_id = object
        .get(REQUEST_ID_FIELD)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(RequestId::from);
    Ok((kind, request_id, value))
}

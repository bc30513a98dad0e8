//! Routes decoded inbound frames to waiting callers or broadcast outputs.

use std::sync::Arc;

use raptor_shared::{
    InboundEnvelope, Payload, PushCategory, RequestId, ResponseFamily, ServerEvent, ServerNotice,
};
use tokio::sync::broadcast;

use super::correlation::CorrelationTable;
use crate::error::RequestError;

/// A `*_response` published on the responses output.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseUpdate {
    pub family: ResponseFamily,
    /// Set when the reply answered one of our requests.
    pub request_id: Option<RequestId>,
    pub data: Payload,
}

/// Named fan-out outputs.
///
/// Listeners that are not subscribed when an update is published miss it;
/// these are live feeds, not queues.
#[derive(Debug, Clone)]
pub struct Broadcasts {
    chat: broadcast::Sender<Payload>,
    order_status: broadcast::Sender<Payload>,
    location: broadcast::Sender<Payload>,
    responses: broadcast::Sender<ResponseUpdate>,
    notices: broadcast::Sender<ServerNotice>,
}

impl Broadcasts {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chat: broadcast::channel(capacity).0,
            order_status: broadcast::channel(capacity).0,
            location: broadcast::channel(capacity).0,
            responses: broadcast::channel(capacity).0,
            notices: broadcast::channel(capacity).0,
        }
    }

    pub fn push_updates(&self, category: PushCategory) -> broadcast::Receiver<Payload> {
        self.push_sender(category).subscribe()
    }

    pub fn responses(&self) -> broadcast::Receiver<ResponseUpdate> {
        self.responses.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<ServerNotice> {
        self.notices.subscribe()
    }

    fn push_sender(&self, category: PushCategory) -> &broadcast::Sender<Payload> {
        match category {
            PushCategory::Chat => &self.chat,
            PushCategory::OrderStatus => &self.order_status,
            PushCategory::Location => &self.location,
        }
    }

    fn publish_push(&self, category: PushCategory, data: Payload) -> usize {
        self.push_sender(category).send(data).unwrap_or(0)
    }

    fn publish_response(&self, update: ResponseUpdate) -> usize {
        self.responses.send(update).unwrap_or(0)
    }

    fn publish_notice(&self, notice: ServerNotice) -> usize {
        self.notices.send(notice).unwrap_or(0)
    }
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A waiting caller received this reply.
    Resolved { request_id: RequestId },
    /// Correlated reply nobody is waiting for; dropped.
    Stale { request_id: RequestId },
    Pushed { category: PushCategory, listeners: usize },
    /// Uncorrelated `*_response`, published only.
    Response { family: ResponseFamily, listeners: usize },
    Notice { listeners: usize },
    Handshake { client_id: Option<String> },
    Subscribed { channels: Vec<String> },
    Pong,
    Unknown { kind: String },
    Malformed,
}

pub struct Dispatcher {
    correlation: Arc<CorrelationTable>,
    outputs: Broadcasts,
}

impl Dispatcher {
    pub fn new(correlation: Arc<CorrelationTable>, outputs: Broadcasts) -> Self {
        Self {
            correlation,
            outputs,
        }
    }

    pub fn outputs(&self) -> &Broadcasts {
        &self.outputs
    }

    /// Decode and route one text frame. Never fails; bad frames are logged.
    pub fn dispatch(&self, raw: &str) -> DispatchOutcome {
        let envelope = match InboundEnvelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                crate::log_error!("Failed to parse message: {} ({})", e, preview(raw));
                return DispatchOutcome::Malformed;
            }
        };

        let InboundEnvelope {
            kind,
            request_id,
            event,
        } = envelope;

        if let Some((category, data)) = event.push_category() {
            let listeners = self.outputs.publish_push(category, data.clone());
            crate::log_debug!("{} update delivered to {} listener(s)", category, listeners);
            return DispatchOutcome::Pushed {
                category,
                listeners,
            };
        }

        if let Some((family, data)) = event.response_family() {
            return self.route_response(family, request_id, data.clone());
        }

        match event {
            ServerEvent::Connected { client_id } => {
                crate::log_info!("Connected: {}", client_id.as_deref().unwrap_or("<unassigned>"));
                DispatchOutcome::Handshake { client_id }
            }
            ServerEvent::Subscribed { channels } => {
                crate::log_debug!("Subscribed to channels {:?}", channels);
                DispatchOutcome::Subscribed { channels }
            }
            ServerEvent::Pong {} => DispatchOutcome::Pong,
            ServerEvent::Error { message } => self.route_error(request_id, message),
            _ => {
                crate::log_warn!("Unknown message type: {}", kind);
                DispatchOutcome::Unknown { kind }
            }
        }
    }

    fn route_response(
        &self,
        family: ResponseFamily,
        request_id: Option<RequestId>,
        data: Payload,
    ) -> DispatchOutcome {
        let Some(request_id) = request_id else {
            let listeners = self.outputs.publish_response(ResponseUpdate {
                family,
                request_id: None,
                data,
            });
            return DispatchOutcome::Response { family, listeners };
        };

        if !self.correlation.resolve(&request_id, Ok(data.clone())) {
            crate::log_debug!("Dropping stale {} reply {}", family, request_id);
            return DispatchOutcome::Stale { request_id };
        }

        self.outputs.publish_response(ResponseUpdate {
            family,
            request_id: Some(request_id.clone()),
            data,
        });
        DispatchOutcome::Resolved { request_id }
    }

    fn route_error(&self, request_id: Option<RequestId>, message: String) -> DispatchOutcome {
        match request_id {
            Some(request_id) => {
                if self
                    .correlation
                    .resolve(&request_id, Err(RequestError::Server { message }))
                {
                    DispatchOutcome::Resolved { request_id }
                } else {
                    crate::log_debug!("Dropping stale error reply {}", request_id);
                    DispatchOutcome::Stale { request_id }
                }
            }
            None => {
                crate::log_error!("Server error: {}", message);
                let listeners = self.outputs.publish_notice(ServerNotice::new(message));
                DispatchOutcome::Notice { listeners }
            }
        }
    }
}

/// First 100 characters of a frame, for log lines.
fn preview(raw: &str) -> String {
    raw.chars().take(100).collect()
}

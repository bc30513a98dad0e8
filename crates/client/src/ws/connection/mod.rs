//! Transport seam between the session and the socket.
//!
//! A [`Connector`] opens exactly one [`Link`] per call and reports what
//! happens to it through an [`EventSink`]. Events are tagged with the link
//! number so the session can ignore a socket it has already given up on.

use std::sync::Arc;

use raptor_shared::ClientId;
use tokio::sync::mpsc::WeakUnboundedSender;
use url::Url;

use crate::error::TransportError;

/// Close code for a user-initiated disconnect.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when the stream ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Monotonic number of a transport link within one session object.
pub type LinkId = u64;

/// What a link reports back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    /// A text frame (binary frames are forwarded as UTF-8 text).
    Message(String),
    Closed { code: u16, reason: String },
    Failed(String),
}

/// A [`TransportEvent`] attributed to the link that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub link: LinkId,
    pub event: TransportEvent,
}

type Deliver = dyn Fn(LinkEvent) -> bool + Send + Sync;

/// Where a link delivers its events.
///
/// Holds only a weak reference to the session queue: a link that outlives
/// its session has nowhere to report to and `emit` returns `false`.
#[derive(Clone)]
pub struct EventSink {
    link: LinkId,
    deliver: Arc<Deliver>,
}

impl EventSink {
    /// Sink feeding `queue`, which may carry other messages besides link
    /// events so that everything reaches its consumer in arrival order.
    pub(crate) fn new<T>(link: LinkId, queue: WeakUnboundedSender<T>) -> Self
    where
        T: From<LinkEvent> + Send + 'static,
    {
        let deliver = move |event: LinkEvent| match queue.upgrade() {
            Some(tx) => tx.send(T::from(event)).is_ok(),
            None => false,
        };
        Self {
            link,
            deliver: Arc::new(deliver),
        }
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    /// Deliver an event. Returns `false` once the session is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        (self.deliver)(LinkEvent {
            link: self.link,
            event,
        })
    }
}

/// Handshake for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Endpoint with `clientId`, `type` and optional `email` query parameters.
    pub url: Url,
    pub client_id: ClientId,
    pub client_type: String,
    pub user_id: Option<String>,
}

impl ConnectRequest {
    pub fn new(
        endpoint: &Url,
        client_id: &ClientId,
        client_type: &str,
        user_id: Option<&str>,
    ) -> Self {
        let mut url = endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("clientId", client_id.as_str());
            query.append_pair("type", client_type);
            if let Some(user_id) = user_id {
                query.append_pair("email", user_id);
            }
        }

        Self {
            url,
            client_id: client_id.clone(),
            client_type: client_type.to_string(),
            user_id: user_id.map(str::to_string),
        }
    }
}

/// Opens transport links.
pub trait Connector: Send + Sync + 'static {
    /// Start connecting and return immediately.
    ///
    /// The link must report `Opened` on success, then any number of
    /// `Message`s, and finally at most one `Closed` or `Failed`.
    fn open(&self, request: ConnectRequest, events: EventSink) -> Box<dyn Link>;
}

/// One duplex connection.
pub trait Link: Send {
    /// Queue a text frame.
    fn send(&self, frame: String) -> Result<(), TransportError>;

    /// Close the link. Safe to call more than once.
    fn close(&mut self, code: u16, reason: &str);
}

mod connection_native;
pub use connection_native::TungsteniteConnector;

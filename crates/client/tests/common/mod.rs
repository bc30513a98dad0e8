//! Scripted in-memory transport for session tests.
//!
//! The test plays the server: it decides when a link opens, fails or
//! closes, and reads every frame the session sends.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use raptor_client::error::TransportError;
use raptor_client::ws::{ConnectRequest, Connector, EventSink, Link, LinkId, TransportEvent};
use raptor_client::RealtimeConfig;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

#[derive(Default)]
struct Counters {
    requests: Mutex<Vec<ConnectRequest>>,
    closes: Mutex<Vec<(LinkId, u16, String)>>,
    open: AtomicUsize,
    max_open: AtomicUsize,
}

pub struct MockConnector {
    counters: Arc<Counters>,
    links: UnboundedSender<EventSink>,
    frames: UnboundedSender<(LinkId, String)>,
}

impl Connector for MockConnector {
    fn open(&self, request: ConnectRequest, events: EventSink) -> Box<dyn Link> {
        self.counters.requests.lock().push(request);
        let open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_open.fetch_max(open, Ordering::SeqCst);

        let link = events.link();
        let _ = self.links.send(events);
        Box::new(MockLink {
            link,
            closed: false,
            counters: self.counters.clone(),
            frames: self.frames.clone(),
        })
    }
}

struct MockLink {
    link: LinkId,
    closed: bool,
    counters: Arc<Counters>,
    frames: UnboundedSender<(LinkId, String)>,
}

impl MockLink {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Link for MockLink {
    fn send(&self, frame: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.frames
            .send((self.link, frame))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        self.counters
            .closes
            .lock()
            .push((self.link, code, reason.to_string()));
        self.release();
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.release();
    }
}

/// The test's side of the mock transport.
pub struct MockServer {
    counters: Arc<Counters>,
    links: UnboundedReceiver<EventSink>,
    frames: UnboundedReceiver<(LinkId, String)>,
}

impl MockServer {
    /// Wait for the session to open its next link.
    pub async fn next_link(&mut self) -> EventSink {
        self.links.recv().await.expect("connector dropped")
    }

    /// Wait for the next frame sent on any link, parsed as JSON.
    pub async fn next_frame(&mut self) -> Value {
        let (_, frame) = self.frames.recv().await.expect("connector dropped");
        serde_json::from_str(&frame).expect("session sent invalid JSON")
    }

    pub fn no_pending_frame(&mut self) -> bool {
        matches!(self.frames.try_recv(), Err(TryRecvError::Empty))
    }

    pub fn no_pending_link(&mut self) -> bool {
        matches!(self.links.try_recv(), Err(TryRecvError::Empty))
    }

    pub fn connect_requests(&self) -> Vec<ConnectRequest> {
        self.counters.requests.lock().clone()
    }

    pub fn closes(&self) -> Vec<(LinkId, u16, String)> {
        self.counters.closes.lock().clone()
    }

    pub fn open_links(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    pub fn max_open_links(&self) -> usize {
        self.counters.max_open.load(Ordering::SeqCst)
    }
}

pub fn mock_transport() -> (MockConnector, MockServer) {
    let counters = Arc::new(Counters::default());
    let (links_tx, links) = mpsc::unbounded_channel();
    let (frames_tx, frames) = mpsc::unbounded_channel();
    (
        MockConnector {
            counters: counters.clone(),
            links: links_tx,
            frames: frames_tx,
        },
        MockServer {
            counters,
            links,
            frames,
        },
    )
}

/// Default timings: 10s request timeout, 30s heartbeat, 5s reconnect delay.
pub fn test_config() -> RealtimeConfig {
    RealtimeConfig::default()
}

/// Deliver a server frame on `link`.
pub fn server_says(link: &EventSink, frame: Value) {
    assert!(link.emit(TransportEvent::Message(frame.to_string())));
}

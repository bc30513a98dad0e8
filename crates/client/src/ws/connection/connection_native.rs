//! Native WebSocket transport using tokio-tungstenite.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector as TlsConnector};
use url::Url;

use super::{ConnectRequest, Connector, EventSink, Link, TransportEvent, ABNORMAL_CLOSURE};
use crate::config::TlsPolicy;
use crate::error::TransportError;

/// Opens real WebSocket connections.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector {
    tls: TlsPolicy,
}

impl TungsteniteConnector {
    pub fn new(tls: TlsPolicy) -> Self {
        Self { tls }
    }
}

impl Connector for TungsteniteConnector {
    fn open(&self, request: ConnectRequest, events: EventSink) -> Box<dyn Link> {
        let (sender, receiver) = unbounded();
        let opened = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_link(
            request.url,
            self.tls.clone(),
            receiver,
            events,
            opened.clone(),
        ));

        Box::new(NativeLink {
            sender,
            opened,
            closed: false,
            task,
        })
    }
}

/// Handle to one running socket task.
struct NativeLink {
    sender: UnboundedSender<Message>,
    opened: Arc<AtomicBool>,
    closed: bool,
    task: JoinHandle<()>,
}

impl Link for NativeLink {
    fn send(&self, frame: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if !self.opened.load(Ordering::Acquire) {
            return Err(TransportError::NotOpen);
        }
        self.sender
            .unbounded_send(Message::text(frame))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;

        if !self.opened.load(Ordering::Acquire) {
            // Still handshaking; nothing to say goodbye to.
            self.task.abort();
            return;
        }

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        if self.sender.unbounded_send(Message::Close(Some(frame))).is_err() {
            self.task.abort();
        }
        self.sender.close_channel();
    }
}

impl Drop for NativeLink {
    fn drop(&mut self) {
        if !self.closed {
            self.task.abort();
        }
    }
}

/// Build the TLS connector for `url` according to the trust policy.
///
/// `None` lets tungstenite pick its default (verifying) connector.
fn tls_connector(url: &Url, policy: &TlsPolicy) -> Result<Option<TlsConnector>, TransportError> {
    if url.scheme() != "wss" || !policy.trusts_blindly(url.host_str()) {
        return Ok(None);
    }

    crate::log_warn!(
        "Certificate verification disabled for development host {}",
        url.host_str().unwrap_or_default()
    );
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    Ok(Some(TlsConnector::NativeTls(connector)))
}

/// Connect, then pump frames both ways until either side gives up.
async fn run_link(
    url: Url,
    tls: TlsPolicy,
    mut outbound: UnboundedReceiver<Message>,
    events: EventSink,
    opened: Arc<AtomicBool>,
) {
    let link = events.link();

    let connector = match tls_connector(&url, &tls) {
        Ok(connector) => connector,
        Err(e) => {
            crate::log_error!("WebSocket link {} TLS setup failed: {}", link, e);
            events.emit(TransportEvent::Failed(e.to_string()));
            return;
        }
    };

    crate::log_debug!("WebSocket link {} connecting to {}", link, url);
    let ws_stream = match connect_async_tls_with_config(url.as_str(), None, false, connector).await
    {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            crate::log_error!("WebSocket link {} failed to connect: {}", link, e);
            events.emit(TransportEvent::Failed(e.to_string()));
            return;
        }
    };

    opened.store(true, Ordering::Release);
    if !events.emit(TransportEvent::Opened) {
        return;
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    events.emit(TransportEvent::Message(text.as_str().to_string()));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        events.emit(TransportEvent::Message(text));
                    }
                    Err(e) => {
                        crate::log_warn!(
                            "WebSocket link {} dropped non-UTF-8 binary frame: {}",
                            link,
                            e
                        );
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                        .unwrap_or((ABNORMAL_CLOSURE, String::new()));
                    crate::log_info!(
                        "WebSocket link {} received close frame: {} {}",
                        link,
                        code,
                        reason
                    );
                    events.emit(TransportEvent::Closed { code, reason });
                    // Tungstenite queued the close reply; it only leaves on flush.
                    if let Err(e) = write.close().await {
                        crate::log_debug!("WebSocket link {} close reply not sent: {}", link, e);
                    }
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong frames are answered by tungstenite.
                }
                Some(Err(e)) => {
                    crate::log_error!("WebSocket link {} read error: {}", link, e);
                    events.emit(TransportEvent::Failed(e.to_string()));
                    break;
                }
                None => {
                    events.emit(TransportEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended".to_string(),
                    });
                    break;
                }
            },
            outgoing = outbound.next() => match outgoing {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(e) = write.send(message).await {
                        crate::log_error!("WebSocket link {} send failed: {}", link, e);
                        events.emit(TransportEvent::Failed(e.to_string()));
                        break;
                    }
                    if closing {
                        crate::log_debug!("WebSocket link {} closed by client", link);
                        break;
                    }
                }
                None => {
                    crate::log_debug!("WebSocket link {} handle dropped", link);
                    break;
                }
            },
        }
    }
}

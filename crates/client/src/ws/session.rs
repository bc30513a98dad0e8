//! The realtime session: one persistent link, owned by one actor task.
//!
//! [`RealtimeSession`] is a cheap handle. Every mutation (state, link,
//! subscriptions, timers) happens inside the actor, which drains a single
//! queue: handle commands, transport events, heartbeat ticks and reconnect
//! timers are all handled strictly in the order they arrived. That makes
//! `disconnect().await` a barrier: once it returns, every request from the
//! old session has been failed and nothing it left behind can fire.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use raptor_shared::{
    ClientCommand, ClientId, OutboundEnvelope, Payload, PushCategory, ServerNotice,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::connection::{
    ConnectRequest, Connector, EventSink, Link, LinkEvent, LinkId, TransportEvent,
    TungsteniteConnector, NORMAL_CLOSURE,
};
use super::correlation::{CorrelationTable, PendingReply, RequestIdGenerator};
use super::dispatcher::{Broadcasts, DispatchOutcome, Dispatcher, ResponseUpdate};
use super::state::SessionState;
use super::subscriptions::SubscriptionRegistry;
use crate::config::RealtimeConfig;
use crate::error::RequestError;

const DISCONNECT_REASON: &str = "Client disconnecting";

enum Command {
    Connect {
        user_id: Option<String>,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Subscriptions(oneshot::Sender<Vec<String>>),
    Send(ClientCommand),
    Request {
        command: ClientCommand,
        reply: oneshot::Sender<Result<PendingReply, RequestError>>,
    },
    Heartbeat {
        link: LinkId,
    },
    Reconnect {
        generation: u64,
    },
    Link(LinkEvent),
}

impl From<LinkEvent> for Command {
    fn from(event: LinkEvent) -> Self {
        Command::Link(event)
    }
}

/// Read-mostly facts the actor records for handles.
#[derive(Default)]
struct Telemetry {
    assigned_client_id: Mutex<Option<String>>,
    last_pong: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

struct Inner {
    client_id: ClientId,
    commands: UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    correlation: Arc<CorrelationTable>,
    outputs: Broadcasts,
    telemetry: Arc<Telemetry>,
}

/// Handle to a realtime session.
///
/// Clones share the same session. The background actor stops once every
/// handle is dropped.
#[derive(Clone)]
pub struct RealtimeSession {
    inner: Arc<Inner>,
}

impl RealtimeSession {
    /// Session over real WebSockets. Must be called within a tokio runtime.
    pub fn new(config: RealtimeConfig) -> Self {
        let connector = TungsteniteConnector::new(config.tls.clone());
        Self::with_connector(config, connector)
    }

    /// Session over a custom transport. Must be called within a tokio runtime.
    pub fn with_connector(config: RealtimeConfig, connector: impl Connector) -> Self {
        let client_id = ClientId::generate();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionState::Disconnected);
        let correlation = CorrelationTable::new(config.request_timeout);
        let outputs = Broadcasts::new(config.broadcast_capacity);
        let telemetry = Arc::new(Telemetry::default());

        crate::log_info!("Realtime session {} created for {}", client_id, config.endpoint);

        let actor = SessionActor {
            ids: RequestIdGenerator::new(client_id.clone()),
            dispatcher: Dispatcher::new(correlation.clone(), outputs.clone()),
            client_id: client_id.clone(),
            config,
            connector: Box::new(connector),
            commands: commands.downgrade(),
            state: state_tx,
            correlation: correlation.clone(),
            subscriptions: SubscriptionRegistry::new(),
            telemetry: telemetry.clone(),
            link: None,
            link_id: 0,
            generation: 0,
            user_id: None,
            heartbeat: None,
            reconnect: None,
        };
        tokio::spawn(actor.run(command_rx));

        Self {
            inner: Arc::new(Inner {
                client_id,
                commands,
                state,
                correlation,
                outputs,
                telemetry,
            }),
        }
    }

    /// Stable id sent in every handshake of this session object.
    pub fn client_id(&self) -> &ClientId {
        &self.inner.client_id
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().is_connected()
    }

    /// Open the link as `user_id`. A no-op while connecting or connected.
    pub fn connect(&self, user_id: Option<String>) {
        self.enqueue(Command::Connect { user_id });
    }

    /// Tear the session down and wait until it is fully drained.
    ///
    /// Pending requests fail with [`RequestError::ConnectionClosed`],
    /// subscriptions are cleared and no reconnect will fire afterwards.
    pub async fn disconnect(&self) {
        let (done, wait) = oneshot::channel();
        if self.enqueue(Command::Disconnect { done }) {
            let _ = wait.await;
        }
    }

    /// Add channels; sent now if connected, otherwise replayed on connect.
    pub fn subscribe<I, S>(&self, channels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        self.enqueue(Command::Subscribe(channels));
    }

    pub fn unsubscribe<I, S>(&self, channels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        self.enqueue(Command::Unsubscribe(channels));
    }

    /// Channels that will be replayed on the next connect.
    pub async fn subscriptions(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        if !self.enqueue(Command::Subscriptions(reply)) {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Fire-and-forget send. Dropped with a warning unless connected.
    pub fn send(&self, command: ClientCommand) {
        self.enqueue(Command::Send(command));
    }

    /// Send `command` with a fresh request id and wait for its single reply.
    pub async fn request(&self, command: ClientCommand) -> Result<Payload, RequestError> {
        let (reply, rx) = oneshot::channel();
        if !self.enqueue(Command::Request { command, reply }) {
            return Err(RequestError::ConnectionClosed);
        }
        let pending = rx.await.map_err(|_| RequestError::ConnectionClosed)??;
        pending.wait().await
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.correlation.len()
    }

    /// Client id from the server's `connected` acknowledgement, if any.
    pub fn assigned_client_id(&self) -> Option<String> {
        self.inner.telemetry.assigned_client_id.lock().clone()
    }

    pub fn last_pong(&self) -> Option<DateTime<Utc>> {
        *self.inner.telemetry.last_pong.lock()
    }

    /// Why the most recent link ended, if it was not closed by the client.
    /// Cleared when a link opens.
    pub fn last_error(&self) -> Option<String> {
        self.inner.telemetry.last_error.lock().clone()
    }

    pub fn chat_messages(&self) -> broadcast::Receiver<Payload> {
        self.inner.outputs.push_updates(PushCategory::Chat)
    }

    pub fn order_updates(&self) -> broadcast::Receiver<Payload> {
        self.inner.outputs.push_updates(PushCategory::OrderStatus)
    }

    pub fn location_updates(&self) -> broadcast::Receiver<Payload> {
        self.inner.outputs.push_updates(PushCategory::Location)
    }

    pub fn responses(&self) -> broadcast::Receiver<ResponseUpdate> {
        self.inner.outputs.responses()
    }

    pub fn server_notices(&self) -> broadcast::Receiver<ServerNotice> {
        self.inner.outputs.notices()
    }

    fn enqueue(&self, command: Command) -> bool {
        if self.inner.commands.send(command).is_err() {
            crate::log_error!("Realtime session {} is no longer running", self.inner.client_id);
            return false;
        }
        true
    }
}

struct SessionActor {
    config: RealtimeConfig,
    client_id: ClientId,
    connector: Box<dyn Connector>,
    commands: WeakUnboundedSender<Command>,
    state: watch::Sender<SessionState>,
    correlation: Arc<CorrelationTable>,
    dispatcher: Dispatcher,
    ids: RequestIdGenerator,
    subscriptions: SubscriptionRegistry,
    telemetry: Arc<Telemetry>,
    link: Option<Box<dyn Link>>,
    link_id: LinkId,
    /// Bumped by `disconnect`; reconnect timers from older generations are ignored.
    generation: u64,
    user_id: Option<String>,
    heartbeat: Option<AbortHandle>,
    reconnect: Option<AbortHandle>,
}

impl SessionActor {
    async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.handle_command(command);
        }

        crate::log_debug!("Realtime session {} stopped", self.client_id);
        self.shutdown();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { user_id } => self.connect(user_id),
            Command::Disconnect { done } => {
                self.disconnect();
                let _ = done.send(());
            }
            Command::Subscribe(channels) => self.subscribe(channels),
            Command::Unsubscribe(channels) => self.unsubscribe(channels),
            Command::Subscriptions(reply) => {
                let _ = reply.send(self.subscriptions.channels());
            }
            Command::Send(command) => {
                let kind = command.kind();
                if let Err(e) = self.transmit(OutboundEnvelope::new(command)) {
                    crate::log_warn!("Dropped {} message: {}", kind, e);
                }
            }
            Command::Request { command, reply } => {
                let _ = reply.send(self.start_request(command));
            }
            Command::Heartbeat { link } => {
                if link == self.link_id && self.current_state().is_connected() {
                    if let Err(e) = self.transmit(OutboundEnvelope::new(ClientCommand::Ping {})) {
                        crate::log_warn!("Heartbeat ping failed: {}", e);
                    }
                }
            }
            Command::Reconnect { generation } => self.reconnect(generation),
            Command::Link(event) => self.handle_link_event(event),
        }
    }

    fn connect(&mut self, user_id: Option<String>) {
        let state = self.current_state();
        if state.is_active() {
            crate::log_warn!("Connect ignored: session is already {}", state);
            return;
        }
        cancel(&mut self.reconnect);
        self.user_id = user_id;
        self.open_link();
    }

    fn open_link(&mut self) {
        // At most one link: anything left over is closed before a new one opens.
        if let Some(mut old) = self.link.take() {
            old.close(NORMAL_CLOSURE, DISCONNECT_REASON);
        }

        self.link_id += 1;
        let request = ConnectRequest::new(
            &self.config.endpoint,
            &self.client_id,
            &self.config.client_type,
            self.user_id.as_deref(),
        );
        crate::log_info!("Connecting link {} to {}", self.link_id, self.config.endpoint);
        self.set_state(SessionState::Connecting);

        let sink = EventSink::new(self.link_id, self.commands.clone());
        self.link = Some(self.connector.open(request, sink));
    }

    fn disconnect(&mut self) {
        self.generation += 1;
        cancel(&mut self.heartbeat);
        cancel(&mut self.reconnect);
        self.correlation.fail_all(RequestError::ConnectionClosed);

        if let Some(mut link) = self.link.take() {
            link.close(NORMAL_CLOSURE, DISCONNECT_REASON);
        }
        *self.telemetry.last_error.lock() = None;
        self.subscriptions.clear();
        self.user_id = None;
        self.set_state(SessionState::Disconnected);
        crate::log_info!("Disconnected by client");
    }

    fn subscribe(&mut self, channels: Vec<String>) {
        if channels.is_empty() {
            return;
        }
        let added = self.subscriptions.add(channels.iter().cloned());
        crate::log_debug!("Subscribe {:?} ({} new)", channels, added);

        if self.current_state().is_connected() {
            let envelope = OutboundEnvelope::new(ClientCommand::Subscribe { channels });
            if let Err(e) = self.transmit(envelope) {
                crate::log_warn!("Subscribe not sent, will replay on reconnect: {}", e);
            }
        }
    }

    fn unsubscribe(&mut self, channels: Vec<String>) {
        if channels.is_empty() {
            return;
        }
        let removed = self.subscriptions.remove(&channels);
        crate::log_debug!("Unsubscribe {:?} ({} removed)", channels, removed);

        if self.current_state().is_connected() {
            if let Err(e) =
                self.transmit(OutboundEnvelope::new(ClientCommand::Unsubscribe { channels }))
            {
                crate::log_warn!("Unsubscribe not sent: {}", e);
            }
        }
    }

    fn start_request(&mut self, command: ClientCommand) -> Result<PendingReply, RequestError> {
        if !self.current_state().is_connected() {
            crate::log_warn!("Request {} rejected: not connected", command.kind());
            return Err(RequestError::NotConnected);
        }
        if command.reply_family().is_none() {
            crate::log_warn!("{} has no correlated reply; expect a timeout", command.kind());
        }

        let id = self.ids.next_id();
        let pending = self.correlation.register(id.clone());
        if let Err(e) = self.transmit(OutboundEnvelope::correlated(command, id.clone())) {
            self.correlation.resolve(&id, Err(e));
        }
        Ok(pending)
    }

    /// Encode and hand a frame to the current link. Only valid while connected.
    fn transmit(&self, envelope: OutboundEnvelope) -> Result<(), RequestError> {
        if !self.current_state().is_connected() {
            return Err(RequestError::NotConnected);
        }
        let Some(link) = self.link.as_ref() else {
            return Err(RequestError::NotConnected);
        };

        let frame = envelope
            .encode()
            .map_err(|e| RequestError::Encode(e.to_string()))?;
        link.send(frame).map_err(|e| {
            crate::log_error!("Send on link {} failed: {}", self.link_id, e);
            RequestError::ConnectionClosed
        })?;
        crate::log_debug!("Sent {}", envelope.command.kind());
        Ok(())
    }

    fn handle_link_event(&mut self, LinkEvent { link, event }: LinkEvent) {
        if link != self.link_id || self.link.is_none() {
            crate::log_debug!("Ignoring {:?} from stale link {}", event, link);
            return;
        }

        match event {
            TransportEvent::Opened => self.on_open(),
            TransportEvent::Message(raw) => self.on_message(&raw),
            TransportEvent::Closed { code, reason } => {
                crate::log_info!("Link {} closed: {} {}", link, code, reason);
                self.connection_lost(format!("closed by server: {} {}", code, reason), false);
            }
            TransportEvent::Failed(reason) => {
                crate::log_error!("Link {} failed: {}", link, reason);
                self.connection_lost(reason, true);
            }
        }
    }

    fn on_open(&mut self) {
        if self.current_state() != SessionState::Connecting {
            return;
        }
        self.set_state(SessionState::Connected);
        *self.telemetry.last_error.lock() = None;
        crate::log_info!("Link {} connected", self.link_id);

        if let Some(replay) = self.subscriptions.replay_command() {
            if let Err(e) = self.transmit(OutboundEnvelope::new(replay)) {
                crate::log_warn!("Subscription replay failed: {}", e);
            }
        }
        self.start_heartbeat();
    }

    fn on_message(&mut self, raw: &str) {
        match self.dispatcher.dispatch(raw) {
            DispatchOutcome::Handshake { client_id } => {
                *self.telemetry.assigned_client_id.lock() = client_id;
            }
            DispatchOutcome::Pong => {
                *self.telemetry.last_pong.lock() = Some(Utc::now());
            }
            _ => {}
        }
    }

    /// Unsolicited close or failure: record why and retry later.
    ///
    /// A link that fails before it ever opened leaves the session in
    /// `Error` until the retry starts connecting again. Anything else
    /// degrades to `Disconnected`.
    fn connection_lost(&mut self, reason: String, failed: bool) {
        let was_connecting = self.current_state() == SessionState::Connecting;
        cancel(&mut self.heartbeat);
        self.link = None;
        self.correlation.fail_all(RequestError::ConnectionClosed);
        *self.telemetry.last_error.lock() = Some(reason.clone());

        if failed && was_connecting {
            self.set_state(SessionState::Error(reason));
        } else {
            self.set_state(SessionState::Disconnected);
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        cancel(&mut self.reconnect);
        let delay = self.config.reconnect_delay;
        let generation = self.generation;
        let commands = self.commands.clone();

        crate::log_info!("Reconnecting in {:?}", delay);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Reconnect { generation });
            }
        });
        self.reconnect = Some(timer.abort_handle());
    }

    fn reconnect(&mut self, generation: u64) {
        if generation != self.generation {
            crate::log_debug!("Ignoring reconnect from generation {}", generation);
            return;
        }
        self.reconnect = None;
        if self.current_state().is_active() {
            return;
        }
        crate::log_info!("Attempting to reconnect...");
        self.open_link();
    }

    fn start_heartbeat(&mut self) {
        cancel(&mut self.heartbeat);
        let period = self.config.heartbeat_interval;
        if period.is_zero() {
            return;
        }
        let link = self.link_id;
        let commands = self.commands.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(commands) = commands.upgrade() else {
                    break;
                };
                if commands.send(Command::Heartbeat { link }).is_err() {
                    break;
                }
            }
        });
        self.heartbeat = Some(task.abort_handle());
    }

    fn shutdown(&mut self) {
        cancel(&mut self.heartbeat);
        cancel(&mut self.reconnect);
        self.correlation.fail_all(RequestError::ConnectionClosed);
        if let Some(mut link) = self.link.take() {
            link.close(NORMAL_CLOSURE, DISCONNECT_REASON);
        }
        self.set_state(SessionState::Disconnected);
    }

    fn current_state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            crate::log_debug!("Session state: {} -> {}", current, next);
            *current = next;
            true
        });
    }
}

fn cancel(task: &mut Option<AbortHandle>) {
    if let Some(task) = task.take() {
        task.abort();
    }
}

//! Relay connection manager.
//!
//! [`ConnectionManager`] owns the device's single outbound relay socket and
//! the connection state machine. It runs as one task: socket reader and
//! writer tasks, connect attempts, and proxied local API calls only send
//! [`LinkEvent`]s back over a channel, and the manager's loop applies every
//! state change itself. Other components talk to it through a cloneable
//! [`RelayHandle`].

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, Sleep};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::backoff::{Backoff, BackoffPolicy};
use super::frame::{InboundFrame, OutboundFrame};
use super::heartbeat::HeartbeatMonitor;
use super::proxy::LocalApiProxy;
use super::subscription::{Subscription, SubscriptionHandle, SubscriptionRegistry};
use crate::config::RelayConfig;
use crate::domain::{
    ConnectionState, ConnectionStatus, GraphqlOperation, LinkMetadata, MirrorCache,
    SubscriptionId, Transition, TransitionBus,
};
use crate::error::RelayError;

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Requests accepted by the manager loop.
#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Subscribe {
        operation: GraphqlOperation,
        reply: oneshot::Sender<Result<Subscription, RelayError>>,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
    Diagnostics {
        reply: oneshot::Sender<LinkDiagnostics>,
    },
    Shutdown,
}

/// Everything that happens to a socket, reported back to the manager.
///
/// Each event carries the generation of the attempt it belongs to; events
/// from a torn-down attempt are discarded.
enum LinkEvent {
    Opened {
        generation: u64,
        socket: Box<RelaySocket>,
    },
    OpenFailed {
        generation: u64,
        error: RelayError,
    },
    Frame {
        generation: u64,
        text: String,
    },
    /// A WebSocket-level ping or pong.
    Keepalive {
        generation: u64,
        ping: bool,
    },
    Lost {
        generation: u64,
        error: RelayError,
    },
    ProxyReply {
        generation: u64,
        id: Option<Value>,
        result: Result<Value, RelayError>,
    },
}

/// Point-in-time view of the manager's internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkDiagnostics {
    /// Whether a socket is currently open.
    pub link_live: bool,
    /// Whether a connect attempt is in flight.
    pub attempt_in_flight: bool,
    /// Whether a reconnect timer is pending.
    pub retry_pending: bool,
    /// Failed cycles since the last link that delivered a frame.
    pub backoff_attempt: u32,
    /// Registered subscriptions.
    pub subscriptions: usize,
    /// Local API calls running on behalf of the live link.
    pub proxy_calls_in_flight: usize,
}

/// The open socket plus everything scoped to it.
#[derive(Debug)]
struct LiveLink {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    heartbeat: HeartbeatMonitor,
    /// Set once the relay has sent anything over this socket.
    proven: bool,
    proxies: JoinSet<()>,
}

impl LiveLink {
    fn send(&self, frame: &OutboundFrame) {
        match frame.to_text() {
            Ok(text) => {
                if self.outbound.send(Message::text(text)).is_err() {
                    debug!("relay writer already gone; frame dropped");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode outbound frame"),
        }
    }

    /// Drops finished proxy tasks.
    fn reap_proxies(&mut self) {
        while self.proxies.try_join_next().is_some() {}
    }

    /// Sends a close frame and lets the writer finish.
    fn close(mut self) {
        self.proxies.abort_all();
        self.reader.abort();
        if self.outbound.send(Message::Close(None)).is_err() {
            self.writer.abort();
        }
    }

    /// Drops the socket without a close handshake.
    fn abort(mut self) {
        self.proxies.abort_all();
        self.reader.abort();
        self.writer.abort();
    }
}

/// Owner of the relay socket and the connection state machine.
#[derive(Debug)]
pub struct ConnectionManager {
    config: Arc<RelayConfig>,
    bus: TransitionBus,
    mirror: MirrorCache,
    metadata: LinkMetadata,
    proxy: Arc<LocalApiProxy>,
    registry: SubscriptionRegistry,
    backoff: Backoff,
    generation: u64,
    pending: Option<JoinHandle<()>>,
    link: Option<LiveLink>,
    retry: Option<Pin<Box<Sleep>>>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
}

impl ConnectionManager {
    /// Creates a manager in `PRE_INIT`. Nothing happens until it is
    /// [spawned](Self::spawn) and asked to connect.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidConfig`] if the local API client cannot
    /// be built.
    pub fn new(
        config: Arc<RelayConfig>,
        bus: TransitionBus,
        mirror: MirrorCache,
        metadata: LinkMetadata,
    ) -> Result<Self, RelayError> {
        let proxy = LocalApiProxy::new(
            config.local_api_url.clone(),
            config.device.api_key.clone(),
            config.local_api_timeout,
        )?;
        let backoff = Backoff::new(BackoffPolicy {
            multiplier: config.backoff_multiplier,
            max_delay: config.backoff_max_delay,
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            bus,
            mirror,
            metadata,
            proxy: Arc::new(proxy),
            registry: SubscriptionRegistry::new(),
            backoff,
            generation: 0,
            pending: None,
            link: None,
            retry: None,
            events_tx,
            events_rx,
        })
    }

    /// Moves the manager onto its own task.
    ///
    /// The returned [`RelayHandle`] is the only way to reach the manager;
    /// the task ends after [`RelayHandle::shutdown`] or once every handle
    /// is dropped.
    #[must_use]
    pub fn spawn(self) -> (RelayHandle, JoinHandle<()>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let handle = RelayHandle {
            commands,
            bus: self.bus.clone(),
        };
        let task = tokio::spawn(self.run(commands_rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let sweep = self
            .config
            .subscription_evict_interval
            .max(Duration::from_millis(1));
        let mut eviction = tokio::time::interval(sweep);
        eviction.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(event) = self.events_rx.recv() => self.on_event(event).await,
                () = retry_elapsed(&mut self.retry) => {
                    self.retry = None;
                    self.start_attempt();
                }
                () = heartbeat_expired(&mut self.link) => self.on_heartbeat_timeout(),
                _ = eviction.tick() => self.evict_stale(),
            }
        }

        self.disconnect();
        info!("relay connection manager stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                info!(url = %self.config.relay_url, "relay connect requested");
                self.start_attempt();
            }
            Command::Disconnect => {
                info!("relay disconnect requested");
                self.disconnect();
            }
            Command::Subscribe { operation, reply } => {
                let _ = reply.send(self.subscribe(operation));
            }
            Command::Unsubscribe { id } => self.unsubscribe(&id),
            Command::Diagnostics { reply } => {
                let _ = reply.send(self.diagnostics());
            }
            Command::Shutdown => {}
        }
    }

    async fn on_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened { generation, socket } => self.on_opened(generation, *socket),
            LinkEvent::OpenFailed { generation, error } => {
                if generation == self.generation && self.pending.is_some() {
                    self.pending = None;
                    self.on_link_failed(error);
                }
            }
            LinkEvent::Frame { generation, text } => self.on_frame(generation, &text).await,
            LinkEvent::Keepalive { generation, ping } => {
                if self.is_live(generation) {
                    self.on_keepalive(ping).await;
                }
            }
            LinkEvent::Lost { generation, error } => {
                if self.is_live(generation) {
                    self.on_link_failed(error);
                }
            }
            LinkEvent::ProxyReply {
                generation,
                id,
                result,
            } => self.on_proxy_reply(generation, id, result),
        }
    }

    fn is_live(&self, generation: u64) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.generation == generation)
    }

    /// Tears down whatever exists and opens a fresh socket.
    fn start_attempt(&mut self) {
        self.retry = None;
        self.abandon_attempt();
        if let Some(link) = self.link.take() {
            link.close();
            self.registry.clear_all();
        }

        self.generation += 1;
        let generation = self.generation;
        self.set_status(ConnectionStatus::Connecting);

        let events = self.events_tx.clone();
        let request = build_request(&self.config);
        let timeout = self.config.connect_timeout;
        self.pending = Some(tokio::spawn(async move {
            let event = match request {
                Err(error) => LinkEvent::OpenFailed { generation, error },
                Ok(request) => {
                    match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
                        .await
                    {
                        Ok(Ok((socket, _response))) => LinkEvent::Opened {
                            generation,
                            socket: Box::new(socket),
                        },
                        Ok(Err(e)) => LinkEvent::OpenFailed {
                            generation,
                            error: handshake_error(e),
                        },
                        Err(_) => LinkEvent::OpenFailed {
                            generation,
                            error: RelayError::Handshake(format!("timed out after {timeout:?}")),
                        },
                    }
                }
            };
            let _ = events.send(event);
        }));
    }

    fn abandon_attempt(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }

    fn on_opened(&mut self, generation: u64, socket: RelaySocket) {
        if generation != self.generation || self.link.is_some() {
            debug!(generation, "discarding socket from abandoned attempt");
            return;
        }
        self.pending = None;

        let (sink, stream) = socket.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(generation, stream, self.events_tx.clone()));
        let writer = tokio::spawn(write_loop(
            generation,
            sink,
            outbound_rx,
            self.events_tx.clone(),
        ));
        self.link = Some(LiveLink {
            generation,
            outbound,
            reader,
            writer,
            heartbeat: HeartbeatMonitor::start(self.config.heartbeat_timeout()),
            proven: false,
            proxies: JoinSet::new(),
        });

        self.set_state(ConnectionStatus::Connected, None);
        info!(url = %self.config.relay_url, generation, "relay connected");
    }

    /// Resets the backoff the first time the live link carries traffic.
    ///
    /// An accepted upgrade alone does not count: a relay that closes right
    /// after the handshake must keep advancing the retry delay.
    fn mark_alive(&mut self) {
        if let Some(link) = self.link.as_mut()
            && !link.proven
        {
            link.proven = true;
            if self.backoff.attempt() > 0 {
                debug!(attempt = self.backoff.attempt(), "relay link alive; backoff reset");
            }
            self.backoff.reset();
        }
    }

    async fn on_keepalive(&mut self, ping: bool) {
        self.mark_alive();
        if let Some(link) = self.link.as_mut() {
            link.heartbeat.reset();
        }
        if ping {
            let now = Utc::now();
            self.bus.touch_ping(now);
            self.metadata.record_ping(now).await;
        }
    }

    /// Handles any transport-level loss: heartbeat timeout, socket error,
    /// remote close, failed handshake, or local API failure.
    fn on_link_failed(&mut self, error: RelayError) {
        if let Some(link) = self.link.take() {
            link.abort();
        }
        self.registry.clear_all();

        let message = error.to_string();
        if error.is_rejection() {
            error!(error = %message, "relay rejected this device");
            self.set_state(ConnectionStatus::Error, Some(message));
        } else {
            warn!(error = %message, kind = error.kind(), "relay link lost");
            self.set_state(ConnectionStatus::Disconnected, Some(message));
        }
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        let delay = self.backoff.next_delay();
        info!(
            delay = ?delay,
            attempt = self.backoff.attempt(),
            "relay reconnect scheduled"
        );
        self.retry = Some(Box::pin(tokio::time::sleep(delay)));
        self.set_status(ConnectionStatus::Reconnecting);
    }

    fn on_heartbeat_timeout(&mut self) {
        warn!(
            timeout = ?self.config.heartbeat_timeout(),
            "no relay ping within deadline; aborting socket"
        );
        self.on_link_failed(RelayError::Transport("heartbeat timeout".to_string()));
    }

    async fn on_frame(&mut self, generation: u64, text: &str) {
        if !self.is_live(generation) {
            return;
        }
        self.mark_alive();
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping malformed relay frame");
                return;
            }
        };
        debug!(kind = frame.kind(), "relay frame received");

        match frame {
            InboundFrame::Ping => {
                if let Some(link) = self.link.as_mut() {
                    link.heartbeat.reset();
                    link.send(&OutboundFrame::Pong);
                }
                let now = Utc::now();
                self.bus.touch_ping(now);
                self.metadata.record_ping(now).await;
            }
            InboundFrame::Pong => {
                if let Some(link) = self.link.as_mut() {
                    link.heartbeat.reset();
                }
            }
            InboundFrame::Query { id, payload } | InboundFrame::Mutation { id, payload } => {
                self.spawn_proxy(generation, id, payload);
            }
            InboundFrame::ProxyData { payload } => self.mirror.apply(payload).await,
            InboundFrame::Data {
                id: Some(id),
                payload,
            } => {
                self.registry.apply_data(&id, payload);
            }
            InboundFrame::Data { id: None, .. } => {
                warn!("subscription data without id dropped");
            }
        }
    }

    fn spawn_proxy(&mut self, generation: u64, id: Option<Value>, operation: GraphqlOperation) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        link.reap_proxies();
        let proxy = Arc::clone(&self.proxy);
        let events = self.events_tx.clone();
        link.proxies.spawn(async move {
            let result = proxy.execute(&operation).await;
            let _ = events.send(LinkEvent::ProxyReply {
                generation,
                id,
                result,
            });
        });
    }

    fn on_proxy_reply(
        &mut self,
        generation: u64,
        id: Option<Value>,
        result: Result<Value, RelayError>,
    ) {
        if !self.is_live(generation) {
            warn!(?id, "local api reply for a replaced connection discarded");
            return;
        }
        match result {
            Ok(payload) => {
                if let Some(link) = self.link.as_mut() {
                    link.reap_proxies();
                    link.send(&OutboundFrame::Data { id, payload });
                }
            }
            Err(e) => {
                error!(error = %e, ?id, "local api proxy failed; resetting relay link");
                self.on_link_failed(e);
            }
        }
    }

    fn subscribe(&mut self, operation: GraphqlOperation) -> Result<Subscription, RelayError> {
        let Some(link) = self.link.as_ref() else {
            return Err(RelayError::NotConnected);
        };
        let id = operation.content_id();
        if let Some(updates) = self.registry.receiver(&id) {
            debug!(%id, "joined existing relay subscription");
            return Ok(Subscription::new(id, updates));
        }

        let (handle, updates) = SubscriptionHandle::new();
        self.registry.add_subscription(id.clone(), handle);
        link.send(&OutboundFrame::Start {
            id: id.clone(),
            payload: operation,
        });
        info!(%id, "relay subscription started");
        Ok(Subscription::new(id, updates))
    }

    fn unsubscribe(&mut self, id: &SubscriptionId) {
        if !self.registry.remove_subscription(id) {
            return;
        }
        if let Some(link) = self.link.as_ref() {
            link.send(&OutboundFrame::Stop { id: id.clone() });
        }
        info!(%id, "relay subscription stopped");
    }

    fn evict_stale(&mut self) {
        if self.registry.is_empty() {
            return;
        }
        let evicted = self.registry.evict_stale(self.config.subscription_max_age);
        if let Some(link) = self.link.as_ref() {
            for id in evicted {
                link.send(&OutboundFrame::Stop { id });
            }
        }
    }

    fn disconnect(&mut self) {
        self.retry = None;
        self.abandon_attempt();
        self.generation += 1;
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.registry.clear_all();
        self.set_state(ConnectionStatus::Disconnected, None);
    }

    fn diagnostics(&mut self) -> LinkDiagnostics {
        let proxy_calls_in_flight = self.link.as_mut().map_or(0, |link| {
            link.reap_proxies();
            link.proxies.len()
        });
        LinkDiagnostics {
            link_live: self.link.is_some(),
            attempt_in_flight: self.pending.is_some(),
            retry_pending: self.retry.is_some(),
            backoff_attempt: self.backoff.attempt(),
            subscriptions: self.registry.len(),
            proxy_calls_in_flight,
        }
    }

    fn set_state(&self, status: ConnectionStatus, error: Option<String>) {
        let last_ping = self.bus.current().last_ping;
        self.bus.apply(ConnectionState {
            status,
            error,
            last_ping,
        });
    }

    /// Changes the phase and keeps the last error visible.
    fn set_status(&self, status: ConnectionStatus) {
        let current = self.bus.current();
        self.bus.apply(ConnectionState { status, ..current });
    }
}

async fn retry_elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn heartbeat_expired(link: &mut Option<LiveLink>) {
    match link {
        Some(link) => link.heartbeat.expired().await,
        None => pending().await,
    }
}

async fn read_loop(
    generation: u64,
    mut stream: SplitStream<RelaySocket>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let error = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                let event = LinkEvent::Frame {
                    generation,
                    text: text.as_str().to_owned(),
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            Some(Ok(message @ (Message::Ping(_) | Message::Pong(_)))) => {
                let event = LinkEvent::Keepalive {
                    generation,
                    ping: matches!(message, Message::Ping(_)),
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            Some(Ok(Message::Close(frame))) => break close_error(frame),
            Some(Ok(_)) => {}
            Some(Err(e)) => break RelayError::Transport(e.to_string()),
            None => break RelayError::Transport("relay socket ended".to_string()),
        }
    };
    let _ = events.send(LinkEvent::Lost { generation, error });
}

async fn write_loop(
    generation: u64,
    mut sink: SplitSink<RelaySocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            let _ = events.send(LinkEvent::Lost {
                generation,
                error: RelayError::Transport(format!("write failed: {e}")),
            });
            return;
        }
        if closing {
            return;
        }
    }
}

/// Builds the upgrade request carrying the device's handshake headers.
fn build_request(config: &RelayConfig) -> Result<Request, RelayError> {
    let mut request = config
        .relay_url
        .as_str()
        .into_client_request()
        .map_err(|e| RelayError::InvalidConfig(format!("relay url: {e}")))?;
    for (name, value) in config.device.handshake_headers() {
        let value = HeaderValue::from_str(&value)
            .map_err(|e| RelayError::InvalidConfig(format!("{name}: {e}")))?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

/// Classifies a failed upgrade. Any HTTP 4xx answer is a rejection.
fn handshake_error(error: tungstenite::Error) -> RelayError {
    match error {
        tungstenite::Error::Http(response) if response.status().is_client_error() => {
            let status = response.status();
            RelayError::Rejected {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("rejected").to_string(),
            }
        }
        other => RelayError::Handshake(other.to_string()),
    }
}

/// Classifies a close frame. Policy (1008) and application (4000-4999)
/// codes are rejections; everything else is an ordinary transport loss.
fn close_error(frame: Option<CloseFrame>) -> RelayError {
    let Some(frame) = frame else {
        return RelayError::Transport("relay closed the connection".to_string());
    };
    let code = u16::from(frame.code);
    let reason = frame.reason.as_str().to_owned();
    if code == 1008 || (4000..=4999).contains(&code) {
        RelayError::Rejected {
            status: code,
            reason,
        }
    } else {
        RelayError::Transport(format!("relay closed the connection ({code}): {reason}"))
    }
}

/// Cloneable front end of a spawned [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct RelayHandle {
    commands: mpsc::UnboundedSender<Command>,
    bus: TransitionBus,
}

impl RelayHandle {
    /// Opens the relay socket, replacing any attempt or socket already in
    /// progress.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ManagerClosed`] if the manager has stopped.
    pub fn connect(&self) -> Result<(), RelayError> {
        self.send(Command::Connect)
    }

    /// Closes the socket, cancels any pending retry, and drops every
    /// subscription. No reconnect follows until [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ManagerClosed`] if the manager has stopped.
    pub fn disconnect(&self) -> Result<(), RelayError> {
        self.send(Command::Disconnect)
    }

    /// Opens (or joins) a relay-side subscription for `operation`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotConnected`] without a live socket and
    /// [`RelayError::ManagerClosed`] if the manager has stopped.
    pub async fn subscribe(&self, operation: GraphqlOperation) -> Result<Subscription, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe { operation, reply })?;
        rx.await.map_err(|_| RelayError::ManagerClosed)?
    }

    /// Stops the subscription `id` and tells the relay.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ManagerClosed`] if the manager has stopped.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), RelayError> {
        self.send(Command::Unsubscribe { id })
    }

    /// Returns a snapshot of the manager's internals.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ManagerClosed`] if the manager has stopped.
    pub async fn diagnostics(&self) -> Result<LinkDiagnostics, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Diagnostics { reply })?;
        rx.await.map_err(|_| RelayError::ManagerClosed)
    }

    /// Disconnects and stops the manager task.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ManagerClosed`] if the manager already stopped.
    pub fn shutdown(&self) -> Result<(), RelayError> {
        self.send(Command::Shutdown)
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.bus.current()
    }

    /// Receiver for every future transition.
    #[must_use]
    pub fn transitions(&self) -> broadcast::Receiver<Transition> {
        self.bus.subscribe()
    }

    /// Waits until the connection reaches `status`.
    pub async fn wait_for(&self, status: ConnectionStatus) {
        let mut rx = self.bus.watch();
        let _ = rx.wait_for(|state| state.status == status).await;
    }

    fn send(&self, command: Command) -> Result<(), RelayError> {
        self.commands
            .send(command)
            .map_err(|_| RelayError::ManagerClosed)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::DeviceIdentity;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    fn manager(config: RelayConfig) -> ConnectionManager {
        match ConnectionManager::new(
            Arc::new(config),
            TransitionBus::new(16),
            MirrorCache::new(),
            LinkMetadata::new(),
        ) {
            Ok(manager) => manager,
            Err(e) => panic!("manager: {e}"),
        }
    }

    #[test]
    fn request_carries_handshake_headers() {
        let config = RelayConfig {
            relay_url: "ws://127.0.0.1:9/relay".to_string(),
            device: DeviceIdentity {
                api_key: "key-1".to_string(),
                flash_guid: "GUID".to_string(),
                lan_ip: "192.168.1.10".to_string(),
                ..DeviceIdentity::default()
            },
            ..RelayConfig::default()
        };
        let Ok(request) = build_request(&config) else {
            panic!("request");
        };
        let headers = request.headers();
        assert_eq!(headers.get("x-api-key").and_then(|v| v.to_str().ok()), Some("key-1"));
        assert_eq!(headers.get("x-flash-guid").and_then(|v| v.to_str().ok()), Some("GUID"));
        assert_eq!(
            headers.get("x-lan-ip").and_then(|v| v.to_str().ok()),
            Some("192.168.1.10")
        );
        assert!(headers.get("x-machine-id").is_none());
    }

    #[test]
    fn bad_relay_url_is_config_error() {
        let config = RelayConfig {
            relay_url: "not a url".to_string(),
            ..RelayConfig::default()
        };
        assert!(matches!(build_request(&config), Err(RelayError::InvalidConfig(_))));
    }

    #[test]
    fn policy_and_application_closes_are_rejections() {
        for code in [1008u16, 4001, 4403] {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: "nope".into(),
            };
            assert!(close_error(Some(frame)).is_rejection(), "code {code}");
        }
    }

    #[test]
    fn normal_close_is_transport_loss() {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        };
        assert!(matches!(close_error(Some(frame)), RelayError::Transport(_)));
        assert!(matches!(close_error(None), RelayError::Transport(_)));
    }

    #[tokio::test]
    async fn subscribe_requires_connection() {
        let (handle, task) = manager(RelayConfig::default()).spawn();
        let result = handle.subscribe(GraphqlOperation::new("subscription { a }")).await;
        assert!(matches!(result, Err(RelayError::NotConnected)));

        let _ = handle.shutdown();
        let _ = task.await;
        assert!(matches!(handle.connect(), Err(RelayError::ManagerClosed)));
    }

    #[tokio::test]
    async fn disconnect_from_pre_init_leaves_nothing_pending() {
        let (handle, task) = manager(RelayConfig::default()).spawn();
        let mut transitions = handle.transitions();

        let _ = handle.disconnect();
        let Ok(transition) = transitions.recv().await else {
            panic!("expected a transition");
        };
        assert_eq!(transition.from, ConnectionStatus::PreInit);
        assert_eq!(transition.to.status, ConnectionStatus::Disconnected);

        let Ok(diag) = handle.diagnostics().await else {
            panic!("diagnostics");
        };
        assert!(!diag.retry_pending);
        assert!(!diag.link_live);
        assert_eq!(diag.subscriptions, 0);

        let _ = handle.shutdown();
        let _ = task.await;
    }

    #[tokio::test]
    async fn refused_connection_schedules_retry() {
        let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
            panic!("bind");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("addr");
        };
        drop(listener);

        let config = RelayConfig {
            relay_url: format!("ws://{addr}/relay"),
            backoff_max_delay: Duration::from_secs(60),
            ..RelayConfig::default()
        };
        let (handle, task) = manager(config).spawn();
        let mut transitions = handle.transitions();
        let _ = handle.connect();

        let mut seen = Vec::new();
        while seen.len() < 3 {
            let Ok(transition) = transitions.recv().await else {
                panic!("bus closed");
            };
            seen.push(transition.to.status);
        }
        assert_eq!(
            seen,
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Disconnected,
                ConnectionStatus::Reconnecting,
            ]
        );
        assert!(handle.state().error.is_some());

        let _ = handle.shutdown();
        let _ = task.await;
    }
}

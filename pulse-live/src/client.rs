//! Reconnecting WebSocket client for the simulation push channel.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, automatic reconnect)
//! - Capped exponential backoff between attempts
//! - Application-level keepalive while connected
//! - Folding `new-message` events into a local [`ChatFeed`]
//!
//! One driver task owns the socket. It loops connect → session → backoff
//! until [`SimulationClient::disconnect`] signals it through a watch channel.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::feed::ChatFeed;
use crate::protocol::{ClientFrame, SimulationEvent};

/// Reason recorded whenever an established or attempted connection fails.
pub const CONNECTION_LOST: &str = "Connection lost";

const EVENT_CAPACITY: usize = 256;

/// How long `disconnect` waits for the driver to send its close frame.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Delay before the first reconnect attempt
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
    /// Period of the `{"type":"ping"}` keepalive
    pub keepalive_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            keepalive_interval: Duration::from_millis(10_000),
        }
    }
}

/// Delay before reconnect attempt `attempt` (1-based): `min(base * 2^(attempt-1), max)`.
pub fn reconnect_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent).unwrap_or(max).min(max)
}

/// Client connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Observable connection status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Epoch ms of the last keepalive sent
    pub last_ping: Option<i64>,
    pub reconnect_attempts: u32,
    pub error: Option<String>,
}

impl ConnectionStatus {
    pub fn set_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
        self.error = None;
    }

    pub fn set_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.reconnect_attempts = 0;
        self.error = None;
    }

    pub fn set_disconnected(&mut self, reason: Option<String>) {
        self.state = ConnectionState::Disconnected;
        self.error = reason;
    }

    pub fn ping_sent(&mut self, now_ms: i64) {
        self.last_ping = Some(now_ms);
    }

    pub fn increment_reconnect_attempts(&mut self) {
        self.reconnect_attempts += 1;
    }

    pub fn reset_reconnect_attempts(&mut self) {
        self.reconnect_attempts = 0;
    }
}

/// Events emitted by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    /// `reason` is `None` for a requested disconnect
    Disconnected { reason: Option<String> },
    /// A reconnect attempt is scheduled after `delay`
    Reconnecting { attempt: u32, delay: Duration },
    /// A parsed event from the server
    Simulation(SimulationEvent),
}

struct ClientShared {
    status: RwLock<ConnectionStatus>,
    feed: RwLock<ChatFeed>,
    events: broadcast::Sender<ClientEvent>,
}

impl ClientShared {
    fn notify(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    /// Parse one text frame and fold it into local state.
    async fn apply_frame(&self, text: &str) {
        let event = match SimulationEvent::decode(text) {
            Ok(event) => event,
            Err(e) => {
                log::debug!("Dropping malformed frame: {e}");
                return;
            }
        };

        match &event {
            SimulationEvent::NewMessage { message, chat_title } => {
                let mut feed = self.feed.write().await;
                feed.message_received(message.clone());
                feed.chat_updated_by_message(message.chat_id, message, chat_title);
            }
            SimulationEvent::Status {
                running,
                client_count,
                port,
            } => {
                log::debug!("Server status: running={running} clients={client_count} port={port}");
            }
            SimulationEvent::SimulationStarted | SimulationEvent::SimulationStopped => {
                log::info!("Server reported {}", event.kind());
            }
        }
        self.notify(ClientEvent::Simulation(event));
    }
}

struct Driver {
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// The simulation client.
pub struct SimulationClient {
    url: String,
    config: ClientConfig,
    shared: Arc<ClientShared>,
    driver: Mutex<Option<Driver>>,
}

impl SimulationClient {
    pub fn new(url: impl Into<String>, config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            url: url.into(),
            config,
            shared: Arc::new(ClientShared {
                status: RwLock::new(ConnectionStatus::default()),
                feed: RwLock::new(ChatFeed::new()),
                events,
            }),
            driver: Mutex::new(None),
        }
    }

    /// Start the connection driver.
    ///
    /// A no-op while a driver is already connecting, connected or waiting
    /// out a backoff.
    pub async fn connect(&self) {
        let mut driver = self.driver.lock().await;
        if driver.as_ref().is_some_and(|d| !d.task.is_finished()) {
            return;
        }

        self.shared.status.write().await.set_connecting();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(drive(
            self.url.clone(),
            self.config.clone(),
            self.shared.clone(),
            shutdown_rx,
        ));
        *driver = Some(Driver { task, shutdown });
        log::debug!("Connecting to {}", self.url);
    }

    /// Stop the driver, cancelling any pending reconnect. Sends a close
    /// frame if connected.
    pub async fn disconnect(&self) {
        let driver = self.driver.lock().await.take();
        if let Some(Driver { mut task, shutdown }) = driver {
            let _ = shutdown.send(true);
            if tokio::time::timeout(DISCONNECT_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        self.shared.status.write().await.set_disconnected(None);
        self.shared.notify(ClientEvent::Disconnected { reason: None });
        log::info!("Disconnected from {}", self.url);
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.shared.status.read().await.clone()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.shared.status.read().await.state
    }

    /// Snapshot of the local chat feed.
    pub async fn feed(&self) -> ChatFeed {
        self.shared.feed.read().await.clone()
    }

    /// Apply a host-side change (page load, selection, mark-read) to the feed.
    pub async fn update_feed<R>(&self, update: impl FnOnce(&mut ChatFeed) -> R) -> R {
        update(&mut *self.shared.feed.write().await)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for SimulationClient {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.task.abort();
        }
    }
}

enum SessionEnd {
    Lost,
    Shutdown,
}

async fn drive(url: String, config: ClientConfig, shared: Arc<ClientShared>, mut shutdown: watch::Receiver<bool>) {
    let mut attempt: u32 = 0;
    loop {
        let connected = tokio::select! {
            result = tokio_tungstenite::connect_async(url.as_str()) => result,
            _ = shutdown.changed() => return,
        };

        match connected {
            Ok((ws_stream, _)) => {
                attempt = 0;
                shared.status.write().await.set_connected();
                shared.notify(ClientEvent::Connected);
                log::info!("Connected to {url}");

                match run_session(ws_stream, &config, &shared, &mut shutdown).await {
                    SessionEnd::Shutdown => return,
                    SessionEnd::Lost => log::warn!("Connection to {url} lost"),
                }
            }
            Err(e) => log::debug!("Connect to {url} failed: {e}"),
        }

        shared
            .status
            .write()
            .await
            .set_disconnected(Some(CONNECTION_LOST.to_string()));
        shared.notify(ClientEvent::Disconnected {
            reason: Some(CONNECTION_LOST.to_string()),
        });

        attempt = attempt.saturating_add(1);
        let delay = reconnect_delay(attempt, config.base_delay, config.max_delay);
        {
            let mut status = shared.status.write().await;
            status.increment_reconnect_attempts();
            status.set_connecting();
        }
        shared.notify(ClientEvent::Reconnecting { attempt, delay });
        log::info!("Reconnecting to {url} in {delay:?} (attempt {attempt})");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

async fn run_session(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    config: &ClientConfig,
    shared: &ClientShared,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let period = config.keepalive_interval;
    let mut keepalive = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => shared.apply_frame(text.as_str()).await,
                    Some(Ok(WsMessage::Close(frame))) => {
                        log::info!("Server closed the connection: {frame:?}");
                        return SessionEnd::Lost;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("Transport error: {e}");
                        return SessionEnd::Lost;
                    }
                    None => return SessionEnd::Lost,
                }
            }
            _ = keepalive.tick() => {
                let payload = match ClientFrame::Ping.encode() {
                    Ok(payload) => payload,
                    Err(e) => {
                        log::error!("Failed to encode keepalive: {e}");
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(WsMessage::text(payload)).await {
                    log::debug!("Keepalive failed: {e}");
                    return SessionEnd::Lost;
                }
                shared
                    .status
                    .write()
                    .await
                    .ping_sent(chrono::Utc::now().timestamp_millis());
            }
            _ = shutdown.changed() => {
                if let Err(e) = ws_sender.close().await {
                    log::debug!("Close handshake failed: {e}");
                }
                return SessionEnd::Shutdown;
            }
        }
    }
}

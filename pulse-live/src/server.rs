//! Simulation server: connection lifecycle, heartbeat and the tick loop.
//!
//! Architecture:
//! ```text
//!                 ┌──────────────── Mutex<ServerState> ────────────────┐
//!  tick loop ───▶ │ SimulationState ── ChatStore::add_message          │
//!  control   ───▶ │        │                                           │
//!                 │        ▼                                           │
//!  heartbeat ───▶ │   Broadcaster ── handle ── handle ── handle        │
//!                 └────────┼───────────┼─────────┼─────────────────────┘
//!                          ▼           ▼         ▼
//!                     socket task  socket task  socket task
//!                          │           │         │
//!                       Client A    Client B  Client C
//! ```
//!
//! Every mutation of server state, including persistence of generated
//! messages, happens with the state lock held. That lock is the single
//! writer: events reach every subscriber in the order they were generated.

use std::net::SocketAddr;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pulse_core::{redact_for_log, ChatStore, Message, StoreError};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use crate::broadcast::{BroadcastStats, Broadcaster, ConnectionHandle, ConnectionId, Outbound};
use crate::protocol::{ClientFrame, ProtocolError, SimulationEvent, SimulationStatus};
use crate::simulation::{random_delay, MessageDraft, SimulationState};

/// Capacity of the in-process observer channel.
const OBSERVER_CAPACITY: usize = 256;

/// Close reason sent to every client on shutdown.
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port on 127.0.0.1 (0 = ephemeral)
    pub port: u16,
    /// Period between liveness sweeps
    pub heartbeat_interval: Duration,
    /// Inclusive `[min, max]` delay between generated messages
    pub simulation_interval: (Duration, Duration),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            heartbeat_interval: Duration::from_millis(10_000),
            simulation_interval: (Duration::from_millis(1000), Duration::from_millis(3000)),
        }
    }
}

impl ServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ServerError::Config("heartbeat interval must be positive".into()));
        }
        let (min, max) = self.simulation_interval;
        if min > max {
            return Err(ServerError::Config(format!(
                "simulation interval min ({min:?}) exceeds max ({max:?})"
            )));
        }
        Ok(())
    }
}

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Server is shut down")]
    Closed,
}

/// Everything guarded by the server lock.
struct ServerState {
    simulation: SimulationState,
    broadcaster: Broadcaster,
    closed: bool,
}

struct ServerShared {
    config: ServerConfig,
    addr: SocketAddr,
    store: Arc<dyn ChatStore>,
    state: Mutex<ServerState>,
    observers: tokio::sync::broadcast::Sender<SimulationEvent>,
    /// Flipped once the server handle is dropped; socket tasks exit on it.
    released: watch::Sender<bool>,
}

impl ServerShared {
    fn status_of(&self, state: &ServerState) -> SimulationStatus {
        SimulationStatus {
            running: state.simulation.is_running(),
            client_count: state.broadcaster.len(),
            port: self.addr.port(),
        }
    }

    /// Fan out to sockets and in-process observers.
    fn emit(&self, state: &mut ServerState, event: SimulationEvent) {
        if let Err(e) = state.broadcaster.broadcast(&event) {
            log::error!("Failed to broadcast {}: {e}", event.kind());
        }
        // No receivers is not an error worth reporting.
        let _ = self.observers.send(event);
    }

    /// Persist one generated message and announce it.
    fn emit_message(&self, state: &mut ServerState, chat_id: i64) -> Result<Message, StoreError> {
        let draft = MessageDraft::random(&mut rand::thread_rng());
        let message = self.store.add_message(chat_id, draft.sender, draft.body)?;
        let chat_title = match self.store.get_chat_by_id(chat_id) {
            Ok(Some(chat)) => chat.title,
            Ok(None) => "Unknown".to_string(),
            Err(e) => {
                log::warn!("Title lookup failed for chat {chat_id}: {e}");
                "Unknown".to_string()
            }
        };

        log::debug!(
            "Generated message {} in chat {chat_id} from {}: {}",
            message.id,
            message.sender,
            redact_for_log(&format!("{:?}", message.body))
        );
        self.emit(
            state,
            SimulationEvent::NewMessage {
                message: message.clone(),
                chat_title,
            },
        );
        Ok(message)
    }

    fn stop_locked(&self, state: &mut ServerState) -> bool {
        if !state.simulation.is_running() {
            return false;
        }
        state.simulation.set_running(false);
        self.emit(state, SimulationEvent::SimulationStopped);
        true
    }

    /// Add a connection and greet it with a status snapshot.
    async fn register_connection(&self, id: ConnectionId, handle: ConnectionHandle) -> Result<bool, ProtocolError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(false);
        }
        state.broadcaster.register(id, handle);
        let status = self.status_of(&state);
        state.broadcaster.send_to(&id, &SimulationEvent::status(&status))?;
        Ok(true)
    }
}

/// The simulation and broadcast server.
///
/// [`shutdown`](Self::shutdown) is the graceful exit: it stops the
/// simulation and closes every client with 1001. Dropping the server without
/// it aborts the background tasks and drops open sockets without a close
/// handshake.
pub struct SimulationServer {
    shared: Arc<ServerShared>,
    // Task handles live outside the state lock so `Drop` never waits on it.
    accept_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
    tick_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SimulationServer {
    /// Bind the listener and start accepting connections.
    ///
    /// The simulation itself stays stopped until [`start`](Self::start).
    pub async fn bind(config: ServerConfig, store: Arc<dyn ChatStore>) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = TcpListener::bind(("127.0.0.1", config.port)).await?;
        let addr = listener.local_addr()?;

        let mut simulation = SimulationState::new();
        match simulation.refresh_chat_ids(store.as_ref()) {
            Ok(count) => log::info!("Cached {count} chat ids"),
            Err(e) => log::warn!("Could not cache chat ids: {e}"),
        }

        let (observers, _) = tokio::sync::broadcast::channel(OBSERVER_CAPACITY);
        let (released, _) = watch::channel(false);
        let shared = Arc::new(ServerShared {
            config,
            addr,
            store,
            state: Mutex::new(ServerState {
                simulation,
                broadcaster: Broadcaster::new(),
                closed: false,
            }),
            observers,
            released,
        });

        let accept_task = tokio::spawn(accept_loop(shared.clone(), listener));
        let heartbeat_task = tokio::spawn(heartbeat_loop(shared.clone()));

        log::info!("Simulation server listening on ws://{addr}");
        Ok(Self {
            shared,
            accept_task,
            heartbeat_task,
            tick_task: std::sync::Mutex::new(None),
        })
    }

    fn abort_tick(&self) {
        let task = self
            .tick_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Begin generating messages. No-op when already running.
    pub async fn start(&self) -> Result<(), ServerError> {
        let mut state = self.shared.state.lock().await;
        if state.closed {
            return Err(ServerError::Closed);
        }
        if state.simulation.is_running() {
            return Ok(());
        }
        let count = state.simulation.refresh_chat_ids(self.shared.store.as_ref())?;
        state.simulation.set_running(true);
        self.shared.emit(&mut state, SimulationEvent::SimulationStarted);
        let task = tokio::spawn(tick_loop(self.shared.clone()));
        *self.tick_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        log::info!("Simulation started with {count} chats");
        Ok(())
    }

    /// Stop generating messages. No-op when already stopped.
    pub async fn stop(&self) {
        let mut state = self.shared.state.lock().await;
        if self.shared.stop_locked(&mut state) {
            self.abort_tick();
            log::info!("Simulation stopped");
        }
    }

    /// Generate one message now, in either state.
    ///
    /// Without an explicit chat a cached one is picked at random; with an
    /// empty cache nothing happens and `Ok(None)` is returned.
    pub async fn trigger_message(&self, chat_id: Option<i64>) -> Result<Option<Message>, StoreError> {
        let mut state = self.shared.state.lock().await;
        let target = match chat_id {
            Some(id) => Some(id),
            None => state.simulation.random_chat_id(&mut rand::thread_rng()),
        };
        let Some(id) = target else {
            log::debug!("Trigger ignored: no chats cached");
            return Ok(None);
        };
        self.shared.emit_message(&mut state, id).map(Some)
    }

    /// Reload the chat-id cache from the store, e.g. after a reseed.
    pub async fn refresh_chat_ids(&self) -> Result<usize, StoreError> {
        let mut state = self.shared.state.lock().await;
        state.simulation.refresh_chat_ids(self.shared.store.as_ref())
    }

    /// Drop every client without a close handshake.
    pub async fn simulate_connection_drop(&self) -> usize {
        let dropped = self.shared.state.lock().await.broadcaster.terminate_all();
        log::info!("Simulated connection drop for {dropped} client(s)");
        dropped
    }

    pub async fn status(&self) -> SimulationStatus {
        let state = self.shared.state.lock().await;
        self.shared.status_of(&state)
    }

    pub async fn broadcast_stats(&self) -> BroadcastStats {
        self.shared.state.lock().await.broadcaster.stats()
    }

    /// Receive every event the server emits, in emission order.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SimulationEvent> {
        self.shared.observers.subscribe()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.shared.addr)
    }

    /// Stop everything and close all clients with 1001. Idempotent.
    pub async fn shutdown(&self) {
        let mut state = self.shared.state.lock().await;
        if state.closed {
            return;
        }
        self.shared.stop_locked(&mut state);
        self.abort_tick();
        self.accept_task.abort();
        self.heartbeat_task.abort();
        let closed = state
            .broadcaster
            .close_all(CloseCode::Away, SHUTDOWN_REASON);
        state.closed = true;
        log::info!("Simulation server shut down, closed {closed} client(s)");
    }
}

impl Drop for SimulationServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.heartbeat_task.abort();
        let tick = self
            .tick_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = tick {
            task.abort();
        }
        // Socket tasks hold the shared state; release them with the server.
        self.shared.released.send_replace(true);
    }
}

async fn accept_loop(shared: Arc<ServerShared>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                log::debug!("New TCP connection from {addr}");
                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(shared, stream, addr).await {
                        log::debug!("Connection error from {addr}: {e}");
                    }
                });
            }
            Err(e) => {
                log::warn!("Accept failed: {e}");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

async fn heartbeat_loop(shared: Arc<ServerShared>) {
    let period = shared.config.heartbeat_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let sweep = shared.state.lock().await.broadcaster.sweep();
        for id in &sweep.reaped {
            log::info!("Terminated unresponsive client {id}");
        }
        log::trace!("Heartbeat pinged {} client(s)", sweep.pinged);
    }
}

async fn tick_loop(shared: Arc<ServerShared>) {
    loop {
        let delay = random_delay(shared.config.simulation_interval, &mut rand::thread_rng());
        tokio::time::sleep(delay).await;

        let mut state = shared.state.lock().await;
        if !state.simulation.is_running() {
            break;
        }
        let picked = state.simulation.random_chat_id(&mut rand::thread_rng());
        let Some(chat_id) = picked else {
            log::trace!("No chats cached, skipping tick");
            continue;
        };
        if let Err(e) = shared.emit_message(&mut state, chat_id) {
            log::warn!("Simulation tick failed for chat {chat_id}: {e}");
        }
    }
}

async fn handle_connection(shared: Arc<ServerShared>, stream: TcpStream, addr: SocketAddr) -> Result<(), ServerError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (tx, rx) = mpsc::unbounded_channel();
    let id = Uuid::new_v4();

    if !shared.register_connection(id, tx).await? {
        log::debug!("Rejected {addr}: server is shut down");
        return Ok(());
    }
    log::info!("Client {id} connected from {addr}");

    let result = pump(&shared, id, ws_stream, rx).await;

    let removed = shared.state.lock().await.broadcaster.unregister(&id);
    if removed {
        log::info!("Client {id} disconnected");
    } else {
        log::debug!("Client {id} terminated");
    }
    result
}

/// Multiplex one socket: inbound frames against outbound commands.
async fn pump(
    shared: &ServerShared,
    id: ConnectionId,
    ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) -> Result<(), ServerError> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut released = shared.released.subscribe();
    if *released.borrow() {
        return Ok(());
    }
    loop {
        tokio::select! {
            _ = released.changed() => return Ok(()),
            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(WsMessage::Pong(_))) => {
                        shared.state.lock().await.broadcaster.mark_alive(&id);
                    }
                    Some(Ok(WsMessage::Text(text))) => match ClientFrame::decode(text.as_str()) {
                        Ok(ClientFrame::Ping) => log::trace!("Keepalive from {id}"),
                        Err(e) => log::debug!("Ignoring frame from {id}: {e}"),
                    },
                    // Ping replies are queued by tungstenite itself.
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(Outbound::Frame(frame)) => ws_sender.send(frame).await?,
                    Some(Outbound::Close { code, reason }) => {
                        let frame = CloseFrame { code, reason: reason.into() };
                        ws_sender.send(WsMessage::Close(Some(frame))).await?;
                        return Ok(());
                    }
                    // Record removed: drop the socket without a handshake.
                    None => return Ok(()),
                }
            }
        }
    }
}

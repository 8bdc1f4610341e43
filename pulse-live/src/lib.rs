//! # pulse-live: real-time simulation server and reconnecting client for Pulse
//!
//! Generates chat traffic into a [`pulse_core::ChatStore`] and pushes every
//! persisted message to WebSocket subscribers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     WebSocket      ┌──────────────────┐
//! │ SimulationClient │ ◄───────────────── │ SimulationServer │
//! │ (reconnecting)   │   JSON events      │ (single writer)  │
//! └────────┬─────────┘  ─── ping ──────►  └────────┬─────────┘
//!          │                                       │
//!          ▼                                       ├── SimulationState (tick loop)
//! ┌──────────────────┐                             ├── ChatStore (persist first)
//! │ ChatFeed         │                             └── Broadcaster (fan-out)
//! │ (local state)    │
//! └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire events (`new-message`, `status`, ...)
//! - [`broadcast`]: live connection set, fan-out and heartbeat sweep
//! - [`simulation`]: scheduler state and per-tick random choices
//! - [`server`]: listener, connection lifecycle, tick and heartbeat tasks
//! - [`client`]: reconnect driver with capped exponential backoff
//! - [`feed`]: client-side chat list folded from events
//! - [`control`]: command surface for the host process

pub mod protocol;
pub mod broadcast;
pub mod simulation;
pub mod server;
pub mod client;
pub mod feed;
pub mod control;

pub use protocol::{ClientFrame, ProtocolError, SimulationEvent, SimulationStatus};
pub use broadcast::{BroadcastStats, Broadcaster, ConnectionId, HeartbeatSweep, Outbound};
pub use simulation::{random_delay, MessageDraft, SimulationState};
pub use server::{ServerConfig, ServerError, SimulationServer, SHUTDOWN_REASON};
pub use client::{
    reconnect_delay, ClientConfig, ClientEvent, ConnectionState, ConnectionStatus, SimulationClient,
    CONNECTION_LOST,
};
pub use feed::{ChatFeed, ChatMessages, PAGE_SIZE};
pub use control::{dispatch, ControlCommand, ControlError, ControlReply, USAGE};

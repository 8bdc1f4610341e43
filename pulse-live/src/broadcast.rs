//! Event Broadcaster: the live connection set and fan-out to it.
//!
//! Each connection is represented by the sending half of an unbounded
//! channel drained by that connection's socket task. Delivery is
//! best-effort: a connection whose task has gone away is skipped, never
//! retried, and nothing is queued on top of the transport's own buffering.
//!
//! Dropping a record drops its handle, which ends the socket task and drops
//! the socket without a close handshake. That is how dead peers are
//! terminated.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use crate::protocol::{ProtocolError, SimulationEvent};

/// Identity of one subscriber connection.
pub type ConnectionId = Uuid;

/// Commands consumed by a connection's socket task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Write a frame as-is
    Frame(WsMessage),
    /// Send a close frame, then drop the socket
    Close { code: CloseCode, reason: String },
}

/// Sending half held by the broadcaster for each connection.
pub type ConnectionHandle = mpsc::UnboundedSender<Outbound>;

/// Per-subscriber bookkeeping.
#[derive(Debug)]
struct ConnectionRecord {
    handle: ConnectionHandle,
    /// Cleared when a ping is sent, set again by the peer's pong
    is_alive: bool,
}

impl ConnectionRecord {
    fn is_open(&self) -> bool {
        !self.handle.is_closed()
    }

    fn send(&self, outbound: Outbound) -> bool {
        self.is_open() && self.handle.send(outbound).is_ok()
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Events handed to at least the fan-out loop
    pub events_sent: u64,
    /// Frames written to a connection
    pub deliveries: u64,
    /// Connections skipped because they were no longer open
    pub skipped: u64,
}

/// Result of one heartbeat pass.
#[derive(Debug, Default)]
pub struct HeartbeatSweep {
    /// Connections that were pinged this round
    pub pinged: usize,
    /// Connections terminated for missing the previous ping
    pub reaped: Vec<ConnectionId>,
}

/// The live connection set.
#[derive(Debug, Default)]
pub struct Broadcaster {
    connections: HashMap<ConnectionId, ConnectionRecord>,
    stats: BroadcastStats,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection as alive.
    pub fn register(&mut self, id: ConnectionId, handle: ConnectionHandle) {
        self.connections.insert(
            id,
            ConnectionRecord {
                handle,
                is_alive: true,
            },
        );
    }

    /// Stop tracking a connection. Removing an absent id is a no-op.
    pub fn unregister(&mut self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    /// Record a liveness ack (pong) from a connection.
    pub fn mark_alive(&mut self, id: &ConnectionId) {
        if let Some(record) = self.connections.get_mut(id) {
            record.is_alive = true;
        }
    }

    /// Serialize once and write to every open connection.
    ///
    /// Returns how many connections the frame was handed to.
    pub fn broadcast(&mut self, event: &SimulationEvent) -> Result<usize, ProtocolError> {
        let frame = WsMessage::text(event.encode()?);
        let mut delivered = 0;
        for record in self.connections.values() {
            if record.send(Outbound::Frame(frame.clone())) {
                delivered += 1;
            } else {
                self.stats.skipped += 1;
            }
        }
        self.stats.events_sent += 1;
        self.stats.deliveries += delivered as u64;
        log::trace!("Broadcast {} to {delivered} connection(s)", event.kind());
        Ok(delivered)
    }

    /// Write one event to a single connection, if it is still open.
    pub fn send_to(&mut self, id: &ConnectionId, event: &SimulationEvent) -> Result<bool, ProtocolError> {
        let Some(record) = self.connections.get(id) else {
            return Ok(false);
        };
        let sent = record.send(Outbound::Frame(WsMessage::text(event.encode()?)));
        if sent {
            self.stats.deliveries += 1;
        } else {
            self.stats.skipped += 1;
        }
        Ok(sent)
    }

    /// One heartbeat pass: reap connections that never answered the last
    /// ping, then ping the rest.
    pub fn sweep(&mut self) -> HeartbeatSweep {
        let mut sweep = HeartbeatSweep::default();
        self.connections.retain(|id, record| {
            if !record.is_alive {
                sweep.reaped.push(*id);
                return false;
            }
            record.is_alive = false;
            record.send(Outbound::Frame(WsMessage::Ping(Vec::new().into())));
            sweep.pinged += 1;
            true
        });
        sweep
    }

    /// Drop every connection without a close handshake.
    pub fn terminate_all(&mut self) -> usize {
        let count = self.connections.len();
        self.connections.clear();
        count
    }

    /// Send a close frame to every connection, then forget them all.
    pub fn close_all(&mut self, code: CloseCode, reason: &str) -> usize {
        let count = self.connections.len();
        for (_, record) in self.connections.drain() {
            record.send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }
        count
    }

    /// Number of tracked connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn stats(&self) -> BroadcastStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(broadcaster: &mut Broadcaster) -> (ConnectionId, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        broadcaster.register(id, tx);
        (id, rx)
    }

    fn text_of(outbound: Outbound) -> String {
        match outbound {
            Outbound::Frame(WsMessage::Text(text)) => text.as_str().to_owned(),
            other => panic!("Expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn test_register_unregister() {
        let mut broadcaster = Broadcaster::new();
        let (id, _rx) = connect(&mut broadcaster);
        assert_eq!(broadcaster.len(), 1);
        assert!(broadcaster.contains(&id));

        assert!(broadcaster.unregister(&id));
        assert!(!broadcaster.unregister(&id));
        assert!(broadcaster.is_empty());
    }

    #[test]
    fn test_broadcast_fan_out() {
        let mut broadcaster = Broadcaster::new();
        let (_a, mut rx_a) = connect(&mut broadcaster);
        let (_b, mut rx_b) = connect(&mut broadcaster);
        let (_c, mut rx_c) = connect(&mut broadcaster);

        let count = broadcaster.broadcast(&SimulationEvent::SimulationStarted).unwrap();
        assert_eq!(count, 3);

        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            let text = text_of(rx.try_recv().unwrap());
            assert_eq!(text, r#"{"type":"simulation-started"}"#);
        }
        assert_eq!(broadcaster.stats().events_sent, 1);
        assert_eq!(broadcaster.stats().deliveries, 3);
    }

    #[test]
    fn test_broadcast_skips_closed_connections() {
        let mut broadcaster = Broadcaster::new();
        let (_open, mut rx_open) = connect(&mut broadcaster);
        let (_gone, rx_gone) = connect(&mut broadcaster);
        drop(rx_gone);

        let count = broadcaster.broadcast(&SimulationEvent::SimulationStopped).unwrap();
        assert_eq!(count, 1);
        assert!(rx_open.try_recv().is_ok());
        assert_eq!(broadcaster.stats().skipped, 1);
        // Skipping does not unregister; close handling does that.
        assert_eq!(broadcaster.len(), 2);
    }

    #[test]
    fn test_send_to_single_target() {
        let mut broadcaster = Broadcaster::new();
        let (a, mut rx_a) = connect(&mut broadcaster);
        let (_b, mut rx_b) = connect(&mut broadcaster);

        assert!(broadcaster.send_to(&a, &SimulationEvent::SimulationStarted).unwrap());
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());

        assert!(!broadcaster.send_to(&Uuid::new_v4(), &SimulationEvent::SimulationStarted).unwrap());
    }

    #[test]
    fn test_sweep_pings_then_reaps_silent_peer() {
        let mut broadcaster = Broadcaster::new();
        let (quiet, mut rx_quiet) = connect(&mut broadcaster);
        let (chatty, mut rx_chatty) = connect(&mut broadcaster);

        let first = broadcaster.sweep();
        assert_eq!(first.pinged, 2);
        assert!(first.reaped.is_empty());
        assert!(matches!(rx_quiet.try_recv(), Ok(Outbound::Frame(WsMessage::Ping(_)))));
        assert!(matches!(rx_chatty.try_recv(), Ok(Outbound::Frame(WsMessage::Ping(_)))));

        // Only one peer answers the ping.
        broadcaster.mark_alive(&chatty);

        let second = broadcaster.sweep();
        assert_eq!(second.reaped, vec![quiet]);
        assert_eq!(second.pinged, 1);
        assert!(!broadcaster.contains(&quiet));
        assert!(broadcaster.contains(&chatty));

        // Reaping dropped the handle, so the socket task sees the channel end.
        assert!(matches!(
            rx_quiet.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_terminate_all() {
        let mut broadcaster = Broadcaster::new();
        let (_a, mut rx_a) = connect(&mut broadcaster);
        let (_b, _rx_b) = connect(&mut broadcaster);

        assert_eq!(broadcaster.terminate_all(), 2);
        assert!(broadcaster.is_empty());
        assert!(matches!(
            rx_a.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_close_all_sends_close_before_dropping() {
        let mut broadcaster = Broadcaster::new();
        let (_a, mut rx_a) = connect(&mut broadcaster);

        assert_eq!(broadcaster.close_all(CloseCode::Away, "Server shutting down"), 1);
        match rx_a.try_recv().unwrap() {
            Outbound::Close { code, reason } => {
                assert_eq!(code, CloseCode::Away);
                assert_eq!(reason, "Server shutting down");
            }
            other => panic!("Expected close, got {other:?}"),
        }
        assert!(broadcaster.is_empty());
    }
}

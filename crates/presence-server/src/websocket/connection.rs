//! Server-side state of one WebSocket connection.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use presence_core::{ConnectionId, Message};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Frames queued for the connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized protocol message.
    Text(String),
    /// A close frame with the given code and reason.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Lifecycle of a connection as seen by the send guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Writable.
    Open = 0,
    /// A close frame has been queued.
    Closing = 1,
    /// Gone: closed by the peer, closed by us, or terminated.
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Represents a connected subscriber.
pub struct ClientConnection {
    /// Unique connection ID; the subscriber identity in the registry.
    pub id: ConnectionId,
    /// Send channel to the connection's WebSocket write task.
    tx: mpsc::Sender<Outbound>,
    state: AtomicU8,
    /// Whether the subscriber answered the last heartbeat probe.
    is_alive: AtomicBool,
    /// Cancelled to force-close the socket without a close handshake.
    terminated: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Count of messages dropped due to a full or closed channel.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create an open, alive connection.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            tx,
            state: AtomicU8::new(ConnectionState::Open as u8),
            is_alive: AtomicBool::new(true),
            terminated: CancellationToken::new(),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether messages may still be written.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Send a protocol message if the connection is open.
    ///
    /// Returns `false` (and logs) when the connection is not writable, the
    /// message cannot be serialized, or the send queue is full or closed.
    pub fn send(&self, message: &Message) -> bool {
        let state = self.state();
        if state != ConnectionState::Open {
            warn!(conn_id = %self.id, %state, kind = %message.kind, "skipping send to non-open connection");
            return false;
        }
        let json = match message.encode() {
            Ok(json) => json,
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "failed to serialize message");
                return false;
            }
        };
        if let Err(e) = self.tx.try_send(Outbound::Text(json)) {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            warn!(conn_id = %self.id, error = %e, "failed to queue message");
            return false;
        }
        true
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection alive (heartbeat echo received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Whether the last probe has been answered.
    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }

    /// Clear the liveness flag right after a probe is sent.
    pub fn mark_awaiting_reply(&self) {
        self.is_alive.store(false, Ordering::Relaxed);
    }

    /// Start a graceful close: queue a close frame and stop accepting sends.
    ///
    /// Returns `false` if the connection was not open.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        if self
            .state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }
        if self
            .tx
            .try_send(Outbound::Close {
                code,
                reason: reason.to_owned(),
            })
            .is_err()
        {
            // Writer is gone or backed up: fall back to a forced close.
            self.terminate();
        }
        true
    }

    /// Force-close the socket without a close handshake.
    pub fn terminate(&self) {
        self.state.store(ConnectionState::Closed as u8, Ordering::Release);
        if !self.terminated.is_cancelled() {
            debug!(conn_id = %self.id, "terminating connection");
            self.terminated.cancel();
        }
    }

    /// Record that the transport reported the connection closed.
    pub fn mark_closed(&self) {
        self.state.store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Resolves once [`Self::terminate`] has been called.
    pub fn terminated(&self) -> CancellationToken {
        self.terminated.clone()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (ClientConnection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(ConnectionId::from("conn_1"), tx);
        (conn, rx)
    }

    #[test]
    fn create_connection() {
        let (conn, _rx) = make_connection();
        assert_eq!(conn.id.as_str(), "conn_1");
        assert!(conn.is_open());
        assert!(conn.is_alive());
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send(&Message::heartbeat(5)));
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, Outbound::Text(r#"{"type":"Heartbeat","updatedAt":5}"#.into()));
    }

    #[tokio::test]
    async fn send_to_closed_channel_returns_false() {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(ConnectionId::new(), tx);
        drop(rx);
        assert!(!conn.send(&Message::heartbeat(1)));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_to_full_channel_returns_false() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new(ConnectionId::new(), tx);
        assert!(conn.send(&Message::heartbeat(1)));
        assert!(!conn.send(&Message::heartbeat(2)));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn liveness_flag_cycle() {
        let (conn, _rx) = make_connection();
        conn.mark_awaiting_reply();
        assert!(!conn.is_alive());
        conn.mark_alive();
        assert!(conn.is_alive());
    }

    #[tokio::test]
    async fn close_queues_frame_and_guards_sends() {
        let (conn, mut rx) = make_connection();
        assert!(conn.close(1001, "bye"));
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert_eq!(
            rx.recv().await.unwrap(),
            Outbound::Close {
                code: 1001,
                reason: "bye".into()
            }
        );

        assert!(!conn.send(&Message::heartbeat(1)));
        assert_eq!(conn.drop_count(), 0);
        assert!(!conn.close(1001, "again"));
    }

    #[test]
    fn terminate_cancels_token_once() {
        let (conn, _rx) = make_connection();
        let token = conn.terminated();
        conn.terminate();
        conn.terminate();
        assert!(token.is_cancelled());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn close_with_dead_writer_terminates() {
        let (tx, rx) = mpsc::channel(1);
        let conn = ClientConnection::new(ConnectionId::new(), tx);
        drop(rx);
        assert!(conn.close(1000, ""));
        assert!(conn.terminated().is_cancelled());
    }

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Open.to_string(), "open");
        assert_eq!(ConnectionState::Closed.to_string(), "closed");
    }
}

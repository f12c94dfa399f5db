//! The set of currently open connections.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use presence_core::ConnectionId;
use tracing::warn;

use super::connection::ClientConnection;

/// Open connections indexed by id. Shared by the socket handlers, the
/// heartbeat supervisor and graceful shutdown.
pub struct ConnectionSet {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl ConnectionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add a connection.
    pub fn add(&self, connection: Arc<ClientConnection>) {
        let _ = self
            .connections
            .write()
            .insert(connection.id.clone(), connection);
    }

    /// Remove a connection by ID.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.write().remove(id)
    }

    /// Point-in-time copy of every connection.
    ///
    /// Callers iterate the copy so no lock is held while sending.
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Gracefully close every connection. Returns how many were closed.
    pub fn close_all(&self, code: u16, reason: &str) -> usize {
        let mut closed = 0;
        for conn in self.snapshot() {
            if conn.close(code, reason) {
                closed += 1;
            } else {
                warn!(conn_id = %conn.id, state = %conn.state(), "connection was not open at shutdown");
            }
        }
        closed
    }

    /// Number of tracked connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is tracked.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

impl Default for ConnectionSet {
    fn default() -> Self {
        Self::new()
    }
}

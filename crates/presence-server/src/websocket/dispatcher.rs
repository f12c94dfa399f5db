//! Inbound command dispatch: parse, validate, route to the registry, reply.
//!
//! Protocol errors are answered with an `Error` message on the same
//! connection. The connection itself is never closed because of one.

use std::sync::Arc;

use presence_core::time::now_millis;
use presence_core::{CommandKind, Message, ProtocolError, parse_command};
use tracing::{debug, instrument, warn};

use super::connection::ClientConnection;
use crate::registry::{PendingUpdate, SubscriptionRegistry};

/// Routes commands from every connection into one registry.
pub struct CommandDispatcher {
    registry: SubscriptionRegistry,
}

impl CommandDispatcher {
    /// Create a dispatcher over `registry`.
    pub fn new(registry: SubscriptionRegistry) -> Self {
        Self { registry }
    }

    /// The registry commands are routed to.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Handle one text frame from `conn`.
    #[instrument(skip_all, fields(conn_id = %conn.id))]
    pub fn handle_message(&self, conn: &Arc<ClientConnection>, raw: &str) {
        let result = parse_command(raw).and_then(|kind| self.dispatch(conn, kind));
        if let Err(err) = result {
            warn!(kind = err.error_kind(), error = ?err, "rejected message");
            let _ = conn.send(&Message::error(err.to_string(), now_millis()));
        }
    }

    /// Handle one binary frame from `conn`. The payload must be UTF-8 text.
    pub fn handle_binary(&self, conn: &Arc<ClientConnection>, bytes: &[u8]) {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.handle_message(conn, text),
            Err(e) => {
                let err = ProtocolError::BadPayload {
                    detail: e.to_string(),
                };
                warn!(conn_id = %conn.id, kind = err.error_kind(), "rejected binary frame");
                let _ = conn.send(&Message::error(err.to_string(), now_millis()));
            }
        }
    }

    /// The transport reported `conn` closed: drop its subscription state.
    pub fn handle_close(&self, conn: &ClientConnection) {
        conn.mark_closed();
        self.registry.clear(&conn.id);
    }

    fn dispatch(&self, conn: &Arc<ClientConnection>, kind: CommandKind) -> Result<(), ProtocolError> {
        debug!(%kind, "dispatching command");
        match kind {
            CommandKind::Subscribe => {
                let pending = self.registry.subscribe(conn.id.clone());
                reply_when_resolved(conn, pending, Message::subscribed);
            }
            CommandKind::Unsubscribe => {
                let pending = self.registry.unsubscribe(conn.id.clone());
                reply_when_resolved(conn, pending, Message::unsubscribed);
            }
            CommandKind::CountSubscribers => {
                let count = self.registry.subscribers_count() as u64;
                let _ = conn.send(&Message::count(count, now_millis()));
            }
            CommandKind::Heartbeat => conn.mark_alive(),
            CommandKind::Error => {
                return Err(ProtocolError::InvalidCommand {
                    kind: Some(kind.as_str().to_owned()),
                });
            }
        }
        Ok(())
    }
}

fn reply_when_resolved(
    conn: &Arc<ClientConnection>,
    pending: PendingUpdate,
    reply: fn(i64) -> Message,
) {
    let conn = Arc::clone(conn);
    drop(tokio::spawn(async move {
        match pending.await {
            Ok(at) => {
                let _ = conn.send(&reply(at));
            }
            Err(e) => debug!(conn_id = %conn.id, error = %e, "registry operation did not resolve"),
        }
    }));
}

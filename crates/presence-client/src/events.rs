//! Client events and per-kind observers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use presence_core::Message;

/// Everything a [`crate::SubscriptionClient`] reports to its observers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// The connection is open.
    Open,
    /// The connection closed.
    Close {
        /// Close code from the peer, `1006` when none was received.
        code: u16,
        /// Close reason from the peer.
        reason: String,
    },
    /// A transport-level failure.
    Error(String),
    /// The server confirmed an active subscription.
    Subscribed {
        /// When the subscription became active, if the server said.
        updated_at: Option<i64>,
    },
    /// The server confirmed an inactive subscription.
    Unsubscribed {
        /// When the subscription became inactive, if the server said.
        updated_at: Option<i64>,
    },
    /// Active subscriber count.
    Count {
        /// Number of active subscribers.
        count: u64,
        /// When the count was taken.
        updated_at: i64,
    },
    /// An inbound payload that is not a recognised reply, including `Error` replies.
    ProtocolError {
        /// The payload as received.
        raw: String,
        /// The decoded message, when the payload was valid JSON of the right shape.
        message: Option<Message>,
    },
}

impl ClientEvent {
    /// The kind observers register for.
    pub fn kind(&self) -> ClientEventKind {
        match self {
            Self::Open => ClientEventKind::Open,
            Self::Close { .. } => ClientEventKind::Close,
            Self::Error(_) => ClientEventKind::Error,
            Self::Subscribed { .. } => ClientEventKind::Subscribed,
            Self::Unsubscribed { .. } => ClientEventKind::Unsubscribed,
            Self::Count { .. } => ClientEventKind::Count,
            Self::ProtocolError { .. } => ClientEventKind::ProtocolError,
        }
    }
}

/// Closed set of event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClientEventKind {
    /// See [`ClientEvent::Open`].
    Open,
    /// See [`ClientEvent::Close`].
    Close,
    /// See [`ClientEvent::Error`].
    Error,
    /// See [`ClientEvent::Subscribed`].
    Subscribed,
    /// See [`ClientEvent::Unsubscribed`].
    Unsubscribed,
    /// See [`ClientEvent::Count`].
    Count,
    /// See [`ClientEvent::ProtocolError`].
    ProtocolError,
}

impl fmt::Display for ClientEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Error => "error",
            Self::Subscribed => "subscribed",
            Self::Unsubscribed => "unsubscribed",
            Self::Count => "count",
            Self::ProtocolError => "protocolError",
        };
        f.write_str(name)
    }
}

type Handler = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Observers registered per event kind.
#[derive(Default)]
pub(crate) struct EventHandlers {
    handlers: RwLock<HashMap<ClientEventKind, Vec<Handler>>>,
}

impl EventHandlers {
    pub(crate) fn register(&self, kind: ClientEventKind, handler: Handler) {
        self.handlers.write().entry(kind).or_default().push(handler);
    }

    /// Invoke every handler for the event's kind. Handlers run without the lock held.
    pub(crate) fn dispatch(&self, event: &ClientEvent) -> usize {
        let handlers = self
            .handlers
            .read()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }
}

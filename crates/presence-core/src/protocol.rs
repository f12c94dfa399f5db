//! Wire protocol: one JSON object per text frame.
//!
//! ```text
//! { "type": "Subscribe" | "Unsubscribe" | "CountSubscribers" | "Heartbeat" | "Error",
//!   "status"?: string, "count"?: integer, "updatedAt"?: epoch-millis, "error"?: string }
//! ```
//!
//! Client → server messages carry only `type` (heartbeat replies add `updatedAt`).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;

/// `status` sent with a resolved subscribe.
pub const STATUS_SUBSCRIBED: &str = "Subscribed";
/// `status` sent with a resolved unsubscribe.
pub const STATUS_UNSUBSCRIBED: &str = "Unsubscribed";

/// The closed set of message discriminators shared by both ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Start (or confirm) an active subscription.
    Subscribe,
    /// End (or confirm the end of) a subscription.
    Unsubscribe,
    /// Ask for the number of active subscribers.
    CountSubscribers,
    /// Liveness probe (server → client) or its echo (client → server).
    Heartbeat,
    /// Protocol error reply. Never a valid command.
    Error,
}

impl CommandKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Subscribe,
        Self::Unsubscribe,
        Self::CountSubscribers,
        Self::Heartbeat,
        Self::Error,
    ];

    /// Literal wire string for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "Subscribe",
            Self::Unsubscribe => "Unsubscribe",
            Self::CountSubscribers => "CountSubscribers",
            Self::Heartbeat => "Heartbeat",
            Self::Error => "Error",
        }
    }

    /// Look up a kind by its wire string. Matching is exact.
    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable protocol message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Discriminator.
    #[serde(rename = "type")]
    pub kind: CommandKind,
    /// `Subscribed` / `Unsubscribed` on registry replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Active subscriber count on `CountSubscribers` replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    /// Human-readable error on `Error` replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Message {
    /// A bare client command: `{"type": <kind>}`.
    pub fn command(kind: CommandKind) -> Self {
        Self {
            kind,
            status: None,
            count: None,
            updated_at: None,
            error: None,
        }
    }

    /// Heartbeat probe or echo stamped with `at`.
    pub fn heartbeat(at: i64) -> Self {
        Self {
            updated_at: Some(at),
            ..Self::command(CommandKind::Heartbeat)
        }
    }

    /// Reply to a resolved subscribe.
    pub fn subscribed(at: i64) -> Self {
        Self {
            status: Some(STATUS_SUBSCRIBED.into()),
            updated_at: Some(at),
            ..Self::command(CommandKind::Subscribe)
        }
    }

    /// Reply to a resolved unsubscribe.
    pub fn unsubscribed(at: i64) -> Self {
        Self {
            status: Some(STATUS_UNSUBSCRIBED.into()),
            updated_at: Some(at),
            ..Self::command(CommandKind::Unsubscribe)
        }
    }

    /// Reply to `CountSubscribers`.
    pub fn count(count: u64, at: i64) -> Self {
        Self {
            count: Some(count),
            updated_at: Some(at),
            ..Self::command(CommandKind::CountSubscribers)
        }
    }

    /// Error reply carrying `message`.
    pub fn error(message: impl Into<String>, at: i64) -> Self {
        Self {
            error: Some(message.into()),
            updated_at: Some(at),
            ..Self::command(CommandKind::Error)
        }
    }

    /// Serialize to the JSON text sent in one frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode one frame. Unknown discriminators fail like malformed JSON.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Parse and validate an inbound frame, returning its command kind.
///
/// Non-JSON input is [`ProtocolError::BadPayload`]; JSON whose `type` is
/// missing, not a string, or not one of [`CommandKind::ALL`] is
/// [`ProtocolError::InvalidCommand`].
pub fn parse_command(raw: &str) -> Result<CommandKind, ProtocolError> {
    let payload: Value = serde_json::from_str(raw)?;
    let kind = payload.get("type").and_then(Value::as_str);
    kind.and_then(CommandKind::from_wire)
        .ok_or_else(|| ProtocolError::InvalidCommand {
            kind: kind.map(str::to_owned),
        })
}

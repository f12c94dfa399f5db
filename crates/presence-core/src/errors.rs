//! Protocol error taxonomy.
//!
//! Both variants are recovered locally: the dispatcher turns them into an
//! `Error` reply and the connection stays open. The `Display` text is the
//! exact string sent to the subscriber.

/// A message the server could not accept.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The inbound payload is not well-formed JSON.
    #[error("Bad formatted payload, non JSON")]
    BadPayload {
        /// Decoder diagnostic, kept for logs only.
        detail: String,
    },

    /// Well-formed JSON whose `type` is missing or not a known command.
    #[error("Requested method not implemented")]
    InvalidCommand {
        /// The offending discriminator, when one was present.
        kind: Option<String>,
    },
}

impl ProtocolError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::BadPayload { .. } => "bad_payload",
            Self::InvalidCommand { .. } => "invalid_command",
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadPayload {
            detail: err.to_string(),
        }
    }
}

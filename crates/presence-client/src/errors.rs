//! Client error types.

/// Failures surfaced by [`crate::SubscriptionClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The WebSocket handshake with the server failed.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// Address that was dialed.
        address: String,
        /// Underlying transport error.
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    /// A command was issued while no connection is open.
    #[error("not connected")]
    NotConnected,
    /// The message could not be queued for sending.
    #[error("send failed: {0}")]
    Send(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(ClientError::NotConnected.to_string(), "not connected");
        assert_eq!(
            ClientError::Send("queue full".into()).to_string(),
            "send failed: queue full"
        );
    }
}

//! Client configuration.

/// Configuration for [`crate::SubscriptionClient`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket URL of the server, e.g. `ws://127.0.0.1:8080`.
    pub server_address: String,
    /// Skip logging inbound heartbeat probes.
    pub silence_heartbeat: bool,
    /// Bounded outbound queue.
    pub max_send_queue: usize,
}

impl ClientConfig {
    /// Default configuration pointed at `server_address`.
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "ws://127.0.0.1:8080".into(),
            silence_heartbeat: false,
            max_send_queue: 64,
        }
    }
}

//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the subscribe server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Heartbeat period in milliseconds. `<= 0` disables heartbeating.
    pub heartbeat_interval_ms: i64,
    /// Delay before a subscribe resolves, in milliseconds.
    pub subscribe_delay_ms: u64,
    /// Delay before an unsubscribe resolves, in milliseconds.
    pub unsubscribe_delay_ms: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Bounded outbound queue per connection.
    pub max_send_queue: usize,
}

impl ServerConfig {
    /// Heartbeat period, or `None` when heartbeating is disabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        u64::try_from(self.heartbeat_interval_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Delay applied to every subscribe.
    pub fn subscribe_delay(&self) -> Duration {
        Duration::from_millis(self.subscribe_delay_ms)
    }

    /// Delay applied to every unsubscribe.
    pub fn unsubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.unsubscribe_delay_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            heartbeat_interval_ms: 1000,
            subscribe_delay_ms: 4000,
            unsubscribe_delay_ms: 8000,
            max_message_size: 64 * 1024,
            max_send_queue: 256,
        }
    }
}

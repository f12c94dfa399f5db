//! Settings shapes. Field names are camelCase in the settings file.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceSettings {
    /// Server bootstrap values.
    pub server: ServerSettings,
    /// Interactive client values.
    pub client: ClientSettings,
}

/// Server bind address and protocol timings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listening port.
    pub port: u16,
    /// Heartbeat period in milliseconds. `<= 0` disables heartbeating.
    pub heartbeat_interval_ms: i64,
    /// Delay before a subscribe resolves, in milliseconds.
    pub subscribe_delay_ms: u64,
    /// Delay before an unsubscribe resolves, in milliseconds.
    pub unsubscribe_delay_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            heartbeat_interval_ms: 1000,
            subscribe_delay_ms: 4000,
            unsubscribe_delay_ms: 8000,
        }
    }
}

/// Interactive client values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// WebSocket URL of the server.
    pub server_address: String,
    /// Skip logging of heartbeat probes.
    pub silence_heartbeat: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_address: "ws://127.0.0.1:8080".into(),
            silence_heartbeat: false,
        }
    }
}

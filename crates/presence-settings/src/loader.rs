//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::PresenceSettings;

/// Resolve the path to the settings file (`~/.presence/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".presence").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PresenceSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PresenceSettings> {
    let mut settings = load_file_layer(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<PresenceSettings> {
    let defaults = serde_json::to_value(PresenceSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `PRESENCE_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value is kept.
pub fn apply_overrides(settings: &mut PresenceSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("PRESENCE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("PRESENCE_PORT") {
        if let Some(port) = checked("PRESENCE_PORT", &v, parse_port(&v)) {
            settings.server.port = port;
        }
    }
    if let Some(v) = read("PRESENCE_HEARTBEAT_INTERVAL") {
        if let Some(ms) = checked("PRESENCE_HEARTBEAT_INTERVAL", &v, v.trim().parse::<i64>().ok()) {
            settings.server.heartbeat_interval_ms = ms;
        }
    }
    if let Some(v) = read("PRESENCE_SUBSCRIBE_DELAY") {
        if let Some(ms) = checked("PRESENCE_SUBSCRIBE_DELAY", &v, parse_millis(&v)) {
            settings.server.subscribe_delay_ms = ms;
        }
    }
    if let Some(v) = read("PRESENCE_UNSUBSCRIBE_DELAY") {
        if let Some(ms) = checked("PRESENCE_UNSUBSCRIBE_DELAY", &v, parse_millis(&v)) {
            settings.server.unsubscribe_delay_ms = ms;
        }
    }
    if let Some(v) = read("PRESENCE_SERVER_ADDRESS") {
        settings.client.server_address = v;
    }
    if let Some(v) = read("PRESENCE_SILENCE_HEARTBEAT") {
        if let Some(flag) = checked("PRESENCE_SILENCE_HEARTBEAT", &v, parse_bool(&v)) {
            settings.client.silence_heartbeat = flag;
        }
    }
}

fn checked<T>(key: &str, raw: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "invalid env var, ignoring");
    }
    parsed
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a non-zero TCP port.
pub fn parse_port(val: &str) -> Option<u16> {
    val.trim().parse::<u16>().ok().filter(|p| *p > 0)
}

/// Parse a non-negative millisecond duration.
pub fn parse_millis(val: &str) -> Option<u64> {
    val.trim().parse().ok()
}

//! `rollcall serve` settings.
//!
//! A JSON file only needs the keys it changes: its object is laid over the
//! serialized defaults before deserializing, and `null` leaves a default in
//! place. `ROLLCALL_*` variables are applied last.

use std::path::Path;
use std::time::Duration;

use rollcall_core::SupportedDice;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file from disk.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the config file.
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for the dice server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `3423`; `0` auto-assigns).
    pub port: u16,
    /// Dice advertised to every connection (default `["all"]`).
    pub supported_dice: SupportedDice,
    /// Milliseconds between heartbeat sweeps.
    pub heartbeat_interval_ms: u64,
    /// Outbound frames buffered per connection before sends are dropped.
    pub send_queue_capacity: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Seconds to wait for background tasks on close.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3423,
            supported_dice: SupportedDice::all(),
            heartbeat_interval_ms: 30_000,
            send_queue_capacity: 256,
            max_message_size: 64 * 1024,
            shutdown_timeout_secs: 5,
        }
    }
}

impl ServerConfig {
    /// Heartbeat period as a `Duration` (never zero).
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// Shutdown grace period as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// `host:port` as passed to the listener (hostnames are resolved at bind).
    pub fn bind_target(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

/// Build the server settings from defaults, the file at `path`, then the environment.
///
/// An absent file is not an error; unreadable or malformed JSON is.
pub fn load_config_from_path(path: &Path) -> Result<ServerConfig, ConfigError> {
    let mut settings = serde_json::to_value(ServerConfig::default())?;
    match std::fs::read_to_string(path) {
        Ok(text) => {
            debug!(?path, "applying config file");
            settings = overlay_json(settings, serde_json::from_str(&text)?);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "no config file, serving with defaults");
        }
        Err(e) => return Err(e.into()),
    }

    let mut config: ServerConfig = serde_json::from_value(settings)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Lay `patch` over `base`.
///
/// Objects combine key by key, `null` keys in `patch` are skipped, and any
/// other value (dice lists included) replaces the base value whole.
pub fn overlay_json(base: Value, patch: Value) -> Value {
    match (base, patch) {
        (Value::Object(mut fields), Value::Object(changes)) => {
            for (key, change) in changes.into_iter().filter(|(_, v)| !v.is_null()) {
                let value = match fields.remove(&key) {
                    Some(current) => overlay_json(current, change),
                    None => change,
                };
                let _ = fields.insert(key, value);
            }
            Value::Object(fields)
        }
        (_, patch) => patch,
    }
}

/// Apply `ROLLCALL_*` environment overrides. Invalid values are ignored.
pub fn apply_env_overrides(config: &mut ServerConfig) {
    if let Some(v) = read_env_string("ROLLCALL_HOST") {
        config.host = v;
    }
    if let Some(v) = read_env_u16("ROLLCALL_PORT", 1, 65535) {
        config.port = v;
    }
    if let Some(v) = read_env_u64("ROLLCALL_HEARTBEAT_INTERVAL", 100, 3_600_000) {
        config.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_string("ROLLCALL_DICE") {
        match parse_dice(&v) {
            Some(dice) => config.supported_dice = dice,
            None => tracing::warn!(key = "ROLLCALL_DICE", value = %v, "invalid dice list, ignoring"),
        }
    }
}


/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a comma separated dice list such as `4,6,20` or `all`.
pub fn parse_dice(val: &str) -> Option<SupportedDice> {
    val.parse().ok()
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

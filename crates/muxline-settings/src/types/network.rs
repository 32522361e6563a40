//! Server, client, and logging settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// WebSocket server binding.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// HTTP path of the WebSocket endpoint.
    pub path: String,
    /// Maximum concurrent physical links.
    pub max_connections: usize,
    /// Interval between server pings.
    pub heartbeat_interval_secs: u64,
    /// Drop a link after this long without a pong.
    pub heartbeat_timeout_secs: u64,
    /// Maximum WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-link outbound queue depth.
    pub send_queue_depth: usize,
}

impl ServerSettings {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            path: "/ws".into(),
            max_connections: 1024,
            heartbeat_interval_secs: 25,
            heartbeat_timeout_secs: 60,
            max_message_size: 16 * 1024 * 1024,
            send_queue_depth: 1024,
        }
    }
}

/// WebSocket client binding.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Server URL, e.g. `ws://127.0.0.1:8080/ws`.
    pub url: String,
    /// Per-attempt connect timeout.
    pub connect_timeout_ms: u64,
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay_ms: u64,
    /// Attempts per outage before giving up (`0` retries forever).
    pub reconnect_attempts: u32,
    /// Outbound queue depth.
    pub send_queue_depth: usize,
}

impl ClientSettings {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reconnect delay as a [`Duration`].
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".into(),
            connect_timeout_ms: 20_000,
            reconnect_delay_ms: 1_000,
            reconnect_attempts: 0,
            send_queue_depth: 1024,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may be partial: missing fields keep their compiled default.

mod network;
mod session;

pub use network::*;
pub use session::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// Example file:
///
/// ```json
/// {
///   "session": { "gracePeriodMs": 10000 },
///   "server": { "port": 9000 },
///   "auth": { "tokens": ["s3cret"] }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MuxSettings {
    /// Session lifecycle (grace period, channel limits).
    pub session: SessionSettings,
    /// WebSocket server binding.
    pub server: ServerSettings,
    /// WebSocket client binding.
    pub client: ClientSettings,
    /// Authentication gate.
    pub auth: AuthSettings,
    /// Payload codec limits.
    pub codec: CodecSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{"session":{"gracePeriodMs":5000}}"#;
        let settings: MuxSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.session.grace_period_ms, 5000);
        assert_eq!(settings.session.max_channels, 256);
        assert_eq!(settings.server.path, "/ws");
    }

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(MuxSettings::default()).unwrap();
        assert!(value["session"].get("gracePeriodMs").is_some());
        assert!(value["server"].get("heartbeatIntervalSecs").is_some());
        assert!(value["client"].get("reconnectDelayMs").is_some());
        assert!(value["codec"].get("maxDecodedBytes").is_some());
    }

    #[test]
    fn serde_roundtrip() {
        let settings = MuxSettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let back: MuxSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session.grace_period_ms, settings.session.grace_period_ms);
        assert_eq!(back.server.port, settings.server.port);
        assert_eq!(back.client.url, settings.client.url);
    }
}

//! Session, auth, and codec settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session lifecycle settings shared by both roles.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// How long a disconnected session waits for a reconnect before teardown.
    pub grace_period_ms: u64,
    /// Maximum channels a single session may open.
    pub max_channels: usize,
}

impl SessionSettings {
    /// The grace period as a [`Duration`].
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: 30_000,
            max_channels: 256,
        }
    }
}

/// Authentication gate settings (server role).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Accepted tokens. Empty means no authentication is configured and
    /// sessions start authenticated.
    pub tokens: Vec<String>,
}

impl AuthSettings {
    /// Whether an authentication gate is configured.
    pub fn enabled(&self) -> bool {
        !self.tokens.is_empty()
    }
}

/// Payload codec settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodecSettings {
    /// Upper bound on a single decompressed payload.
    pub max_decoded_bytes: usize,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            max_decoded_bytes: 16 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grace_period_is_thirty_seconds() {
        let s = SessionSettings::default();
        assert_eq!(s.grace_period(), Duration::from_secs(30));
    }

    #[test]
    fn auth_disabled_without_tokens() {
        assert!(!AuthSettings::default().enabled());
        let s = AuthSettings {
            tokens: vec!["t".into()],
        };
        assert!(s.enabled());
    }

    #[test]
    fn default_codec_limit() {
        assert_eq!(CodecSettings::default().max_decoded_bytes, 16 * 1024 * 1024);
    }
}

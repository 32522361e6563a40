//! Runtime configuration shared by both session managers.

use std::time::Duration;

use muxline_core::Codec;
use muxline_core::codec::DEFAULT_MAX_DECODED_BYTES;
use muxline_settings::MuxSettings;

/// Default disconnect grace period.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Default channel limit per session.
pub const DEFAULT_MAX_CHANNELS: usize = 256;

/// Session manager configuration.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// How long a disconnected session survives without a reconnect.
    pub grace_period: Duration,
    /// Maximum channels per session.
    pub max_channels: usize,
    /// Payload codec.
    pub codec: Codec,
}

impl ManagerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &MuxSettings) -> Self {
        Self {
            grace_period: settings.session.grace_period(),
            max_channels: settings.session.max_channels,
            codec: Codec::new(settings.codec.max_decoded_bytes),
        }
    }

    /// Override the grace period.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Override the channel limit.
    #[must_use]
    pub fn with_max_channels(mut self, max_channels: usize) -> Self {
        self.max_channels = max_channels;
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            max_channels: DEFAULT_MAX_CHANNELS,
            codec: Codec::new(DEFAULT_MAX_DECODED_BYTES),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_settings_defaults() {
        let from_settings = ManagerConfig::from_settings(&MuxSettings::default());
        let default = ManagerConfig::default();
        assert_eq!(from_settings.grace_period, default.grace_period);
        assert_eq!(from_settings.max_channels, default.max_channels);
        assert_eq!(
            from_settings.codec.max_decoded_bytes(),
            default.codec.max_decoded_bytes()
        );
    }

    #[test]
    fn builder_overrides() {
        let cfg = ManagerConfig::default()
            .with_grace_period(Duration::from_millis(50))
            .with_max_channels(4);
        assert_eq!(cfg.grace_period, Duration::from_millis(50));
        assert_eq!(cfg.max_channels, 4);
    }
}

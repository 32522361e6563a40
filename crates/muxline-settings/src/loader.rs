//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MuxSettings::default()`]
//! 2. If `~/.muxline/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `MUXLINE_*` environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::MuxSettings;

/// Resolve the path to the settings file (`~/.muxline/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".muxline").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<MuxSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or the result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<MuxSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<MuxSettings> {
    let defaults = serde_json::to_value(MuxSettings::default())?;

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

/// Reject settings the runtime cannot honor.
pub fn validate(settings: &MuxSettings) -> Result<()> {
    if settings.session.max_channels == 0 {
        return Err(SettingsError::InvalidValue(
            "session.maxChannels must be at least 1".into(),
        ));
    }
    if !settings.server.path.starts_with('/') {
        return Err(SettingsError::InvalidValue(format!(
            "server.path must start with '/', got {:?}",
            settings.server.path
        )));
    }
    let server = &settings.server;
    if server.max_connections == 0 {
        return Err(SettingsError::InvalidValue(
            "server.maxConnections must be at least 1".into(),
        ));
    }
    if server.heartbeat_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "server.heartbeatIntervalSecs must be at least 1".into(),
        ));
    }
    if server.heartbeat_timeout_secs < server.heartbeat_interval_secs {
        return Err(SettingsError::InvalidValue(format!(
            "server.heartbeatTimeoutSecs ({}) must not be shorter than {}s interval",
            server.heartbeat_timeout_secs, server.heartbeat_interval_secs
        )));
    }
    if settings.server.send_queue_depth == 0 || settings.client.send_queue_depth == 0 {
        return Err(SettingsError::InvalidValue(
            "sendQueueDepth must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Apply `MUXLINE_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut MuxSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Each variable has strict parsing rules; invalid values are logged and
/// ignored (falling back to file/default).
pub fn apply_overrides_from(settings: &mut MuxSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = env.u64("MUXLINE_GRACE_PERIOD_MS", 0, 86_400_000) {
        settings.session.grace_period_ms = v;
    }
    if let Some(v) = env.usize("MUXLINE_MAX_CHANNELS", 1, 65_536) {
        settings.session.max_channels = v;
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("MUXLINE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("MUXLINE_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("MUXLINE_WS_PATH") {
        settings.server.path = v;
    }
    if let Some(v) = env.usize("MUXLINE_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.u64("MUXLINE_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = env.u64("MUXLINE_HEARTBEAT_TIMEOUT_SECS", 1, 3600) {
        settings.server.heartbeat_timeout_secs = v;
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = env.string("MUXLINE_URL") {
        settings.client.url = v;
    }
    if let Some(v) = env.u64("MUXLINE_RECONNECT_DELAY_MS", 0, 3_600_000) {
        settings.client.reconnect_delay_ms = v;
    }

    // ── Auth / logging ──────────────────────────────────────────────
    if let Some(v) = env.string("MUXLINE_AUTH_TOKENS") {
        settings.auth.tokens = v
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect();
    }
    if let Some(v) = env.string("MUXLINE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("MUXLINE_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
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

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

// Metric name constants to avoid typos across crates.

/// Sessions created for new physical links (counter).
pub const SESSIONS_OPENED_TOTAL: &str = "mux_sessions_opened_total";
/// Sessions torn down by the grace timer (counter).
pub const SESSIONS_EXPIRED_TOTAL: &str = "mux_sessions_expired_total";
/// Sessions moved onto a replacement link (counter).
pub const SESSIONS_REBOUND_TOTAL: &str = "mux_sessions_rebound_total";
/// Reconnect challenges answered with `challenge_failed` (counter).
pub const CHALLENGES_FAILED_TOTAL: &str = "mux_challenges_failed_total";
/// Channels opened (counter, labels: name).
pub const CHANNELS_OPENED_TOTAL: &str = "mux_channels_opened_total";
/// Channel opens refused (counter, labels: reason).
pub const CHANNELS_REJECTED_TOTAL: &str = "mux_channels_rejected_total";
/// Channel opens dropped before authentication (counter).
pub const CHANNELS_DROPPED_UNAUTHENTICATED_TOTAL: &str =
    "mux_channels_dropped_unauthenticated_total";
/// Live sessions in the registry (gauge).
pub const SESSIONS_ACTIVE: &str = "mux_sessions_active";

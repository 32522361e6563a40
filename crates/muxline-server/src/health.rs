//! `/health` endpoint.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Wall-clock start time, RFC 3339.
    pub started_at: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket links.
    pub links: usize,
    /// Sessions in the registry, including those in their grace period.
    pub sessions: usize,
    /// Sessions currently bound to a live link.
    pub bound_sessions: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    started_at: DateTime<Utc>,
    links: usize,
    sessions: usize,
    bound_sessions: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        started_at: started_at.to_rfc3339(),
        uptime_secs: start_time.elapsed().as_secs(),
        links,
        sessions,
        bound_sessions,
    }
}

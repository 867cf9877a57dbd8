//! `/health` endpoint body.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"healthy"` or `"unhealthy"`.
    pub status: &'static str,
    /// When the check ran.
    pub timestamp: DateTime<Utc>,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live realtime sessions.
    pub sessions: usize,
    /// Why the check failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthResponse {
    /// Whether the store answered.
    pub fn is_healthy(&self) -> bool {
        self.error.is_none()
    }
}

/// Build a health response from the store probe and live counters.
pub fn health_check(
    start_time: Instant,
    sessions: usize,
    store: Result<(), String>,
) -> HealthResponse {
    let error = store.err();
    HealthResponse {
        status: if error.is_none() { "healthy" } else { "unhealthy" },
        timestamp: Utc::now(),
        uptime_secs: start_time.elapsed().as_secs(),
        sessions,
        error,
    }
}

//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open event-stream subscribers.
    pub connections: usize,
    /// Events fanned out since startup.
    pub events_broadcast: u64,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, events_broadcast: u64) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        events_broadcast,
    }
}

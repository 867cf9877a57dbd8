//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle that renders `GET /metrics`. Call once at startup,
/// before anything records.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants shared by every module that records.

/// Requests admitted by the limiter (counter).
pub const ADMISSION_ALLOWED_TOTAL: &str = "admission_allowed_total";
/// Requests rejected by the limiter (counter).
pub const ADMISSION_REJECTED_TOTAL: &str = "admission_rejected_total";
/// Tracked rate buckets (gauge).
pub const ADMISSION_BUCKETS: &str = "admission_buckets";
/// Buckets removed by the sweep (counter).
pub const ADMISSION_SWEPT_TOTAL: &str = "admission_swept_total";
/// Realtime sessions started (counter).
pub const REALTIME_SESSIONS_TOTAL: &str = "realtime_sessions_total";
/// Realtime sessions currently active (gauge).
pub const REALTIME_SESSIONS_ACTIVE: &str = "realtime_sessions_active";
/// Envelopes written to clients (counter, labels: kind).
pub const REALTIME_ENVELOPES_TOTAL: &str = "realtime_envelopes_total";
/// Failed client writes (counter).
pub const REALTIME_WRITE_FAILURES_TOTAL: &str = "realtime_write_failures_total";
/// Failed or timed-out metrics snapshots (counter).
pub const REALTIME_METRICS_FETCH_FAILURES_TOTAL: &str = "realtime_metrics_fetch_failures_total";
/// Session lifetime (histogram).
pub const REALTIME_SESSION_DURATION_SECONDS: &str = "realtime_session_duration_seconds";
/// Request scopes currently open (gauge).
pub const REQUEST_SCOPES_ACTIVE: &str = "request_scopes_active";
/// Request scopes that hit their deadline (counter).
pub const REQUEST_SCOPE_TIMEOUTS_TOTAL: &str = "request_scope_timeouts_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            ADMISSION_ALLOWED_TOTAL,
            ADMISSION_REJECTED_TOTAL,
            ADMISSION_BUCKETS,
            ADMISSION_SWEPT_TOTAL,
            REALTIME_SESSIONS_TOTAL,
            REALTIME_SESSIONS_ACTIVE,
            REALTIME_ENVELOPES_TOTAL,
            REALTIME_WRITE_FAILURES_TOTAL,
            REALTIME_METRICS_FETCH_FAILURES_TOTAL,
            REALTIME_SESSION_DURATION_SECONDS,
            REQUEST_SCOPES_ACTIVE,
            REQUEST_SCOPE_TIMEOUTS_TOTAL,
            qos_store::PUBSUB_LAGGED_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}

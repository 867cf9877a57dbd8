//! Metrics handlers: the system snapshot, per-app metrics and the
//! Prometheus scrape endpoint.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use qos_core::validation::validate_id;
use qos_core::{AppMetrics, SystemMetrics};

use super::{crud, scoped};
use crate::errors::ApiError;
use crate::server::AppState;

/// GET /api/v1/metrics
pub async fn system(State(state): State<AppState>) -> Result<Json<SystemMetrics>, ApiError> {
    let timeout = state.config.metrics_request_timeout;
    Ok(Json(scoped(&state, timeout, state.metrics.snapshot()).await?))
}

/// GET /api/v1/metrics/apps/{id}
pub async fn app(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
) -> Result<Json<AppMetrics>, ApiError> {
    validate_id("app_id", &app_id)?;
    crud(&state, state.store.app_metrics(&app_id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("app not found".into()))
}

/// GET /metrics (Prometheus text exposition)
pub async fn prometheus(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

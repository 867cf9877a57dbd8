//! `/api/v1/connections` handlers.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::IntoResponse;
use qos_core::ConnectionLimit;
use qos_core::validation::validate_connection_limit;
use serde_json::json;
use tracing::info;

use super::{Success, crud, json_body};
use crate::errors::ApiError;
use crate::server::AppState;

/// GET /api/v1/connections and GET /api/v1/metrics/connections
pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let connections = crud(&state, state.store.connection_stats()).await?;
    Ok(Json(json!({ "connections": connections })))
}

/// PUT /api/v1/connections
pub async fn set_limit(
    State(state): State<AppState>,
    body: Result<Json<ConnectionLimit>, JsonRejection>,
) -> Result<Json<Success>, ApiError> {
    let limit = json_body(body)?;
    validate_connection_limit(&limit)?;
    crud(&state, state.store.set_connection_limit(&limit)).await?;
    info!(
        target_type = limit.target_type.as_str(),
        target_id = %limit.target_id,
        limit = limit.limit,
        "connection limit updated"
    );
    Ok(Json(Success::OK))
}

//! `/api/v1/apps` handlers.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use qos_core::AppConfig;
use qos_core::validation::{validate_app_config, validate_id};
use serde_json::json;
use tracing::info;

use super::{Success, crud, json_body};
use crate::errors::ApiError;
use crate::server::AppState;

/// GET /api/v1/apps
pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let apps = crud(&state, state.store.list_apps()).await?;
    Ok(Json(json!({ "apps": apps })))
}

/// GET /api/v1/apps/{id}
pub async fn get(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
) -> Result<Json<AppConfig>, ApiError> {
    validate_id("app_id", &app_id)?;
    crud(&state, state.store.get_app(&app_id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("app not found".into()))
}

/// POST /api/v1/apps
pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<AppConfig>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let app = json_body(body)?.with_defaults();
    validate_app_config(&app)?;
    let stored = crud(&state, state.store.put_app(app)).await?;
    info!(app_id = %stored.app_id, "app config created");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "app_id": stored.app_id })),
    ))
}

/// PUT /api/v1/apps/{id}. The path id wins over the body.
pub async fn update(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    body: Result<Json<AppConfig>, JsonRejection>,
) -> Result<Json<Success>, ApiError> {
    let mut app = json_body(body)?;
    app.app_id = app_id;
    let app = app.with_defaults();
    validate_app_config(&app)?;
    let stored = crud(&state, state.store.put_app(app)).await?;
    info!(app_id = %stored.app_id, "app config updated");
    Ok(Json(Success::OK))
}

/// DELETE /api/v1/apps/{id}
pub async fn delete(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    validate_id("app_id", &app_id)?;
    let existed = crud(&state, state.store.delete_app(&app_id)).await?;
    if !existed {
        return Err(ApiError::NotFound("app not found".into()));
    }
    info!(app_id = %app_id, "app config deleted");
    Ok(StatusCode::NO_CONTENT)
}

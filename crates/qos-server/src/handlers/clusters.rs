//! `/api/v1/clusters` handlers.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use qos_core::ClusterConfig;
use qos_core::validation::{validate_cluster_config, validate_id};
use serde_json::json;
use tracing::info;

use super::{Success, crud, json_body};
use crate::errors::ApiError;
use crate::server::AppState;

/// GET /api/v1/clusters
pub async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let clusters = crud(&state, state.store.list_clusters()).await?;
    Ok(Json(json!({ "clusters": clusters })))
}

/// GET /api/v1/clusters/{id}
pub async fn get(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> Result<Json<ClusterConfig>, ApiError> {
    validate_id("cluster_id", &cluster_id)?;
    crud(&state, state.store.get_cluster(&cluster_id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("cluster not found".into()))
}

/// PUT /api/v1/clusters/{id}. The path id wins over the body.
pub async fn update(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
    body: Result<Json<ClusterConfig>, JsonRejection>,
) -> Result<Json<Success>, ApiError> {
    let mut cluster = json_body(body)?;
    cluster.cluster_id = cluster_id;
    let cluster = cluster.with_defaults();
    validate_cluster_config(&cluster)?;
    let stored = crud(&state, state.store.put_cluster(cluster)).await?;
    info!(cluster_id = %stored.cluster_id, "cluster config updated");
    Ok(Json(Success::OK))
}

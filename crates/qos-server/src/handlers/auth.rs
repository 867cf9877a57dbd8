//! `/api/v1/auth` handlers.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use qos_core::validation::{validate_password, validate_username};
use qos_core::{LoginRequest, RefreshRequest, TokenResponse};
use tracing::{info, warn};

use super::json_body;
use crate::auth::{AuthError, TokenType, check_credentials};
use crate::errors::ApiError;
use crate::server::AppState;

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let req = json_body(body).map_err(|_| ApiError::BadRequest("invalid request format".into()))?;
    validate_username(&req.username)?;
    validate_password(&req.password)?;

    let (sub, role) = check_credentials(&state.auth, &req.username, &req.password).inspect_err(|_| {
        warn!(username = %req.username, "login rejected");
    })?;
    let tokens = state.jwt.issue_pair(sub, &req.username, role)?;
    info!(username = %req.username, "user logged in");
    Ok(Json(tokens))
}

/// POST /api/v1/auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let req = json_body(body).map_err(|_| ApiError::BadRequest("invalid request format".into()))?;
    if req.refresh_token.is_empty() {
        return Err(ApiError::BadRequest("refresh_token is required".into()));
    }
    let claims = state
        .jwt
        .verify(&req.refresh_token, TokenType::Refresh)
        .map_err(|e| {
            warn!(error = %e, "refresh rejected");
            match e {
                AuthError::Issue(detail) => ApiError::Internal(detail),
                _ => ApiError::Unauthorized("invalid refresh token".into()),
            }
        })?;
    Ok(Json(state.jwt.issue_pair(&claims.sub, &claims.username, &claims.role)?))
}

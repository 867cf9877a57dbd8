//! Axum handlers for the admin API.
//!
//! Every CRUD handler runs its store work inside a [`RequestScope`] so it is
//! bounded by the request deadline and cancelled on shutdown.
//!
//! [`RequestScope`]: crate::scope::RequestScope

pub mod apps;
pub mod auth;
pub mod clusters;
pub mod connections;
pub mod emergency;
pub mod metrics;
pub mod ws;

use std::future::Future;
use std::time::Duration;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use serde::Serialize;

use crate::errors::ApiError;
use crate::server::AppState;

/// `{"success": true}` body for updates.
#[derive(Debug, Serialize)]
pub struct Success {
    /// Always true.
    pub success: bool,
}

impl Success {
    /// The only value.
    pub const OK: Self = Self { success: true };
}

/// Unwrap a JSON body, turning a rejection into a JSON 400.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(v)| v)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

/// Run `work` inside a fresh request scope bounded by `timeout`.
pub(crate) async fn scoped<T, E, F>(
    state: &AppState,
    timeout: Duration,
    work: F,
) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, E>>,
    ApiError: From<E>,
{
    let scope = state.scopes.begin(state.shutdown.token(), timeout);
    Ok(scope.run(work).await??)
}

/// Run `work` under the ordinary CRUD deadline.
pub(crate) async fn crud<T, E, F>(state: &AppState, work: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, E>>,
    ApiError: From<E>,
{
    scoped(state, state.config.request_timeout, work).await
}

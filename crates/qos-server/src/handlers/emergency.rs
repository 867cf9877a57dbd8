//! `/api/v1/emergency` handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use qos_core::validation::normalize_emergency_request;
use qos_core::{EmergencyRequest, EmergencyStatus};
use tracing::{debug, warn};

use super::{Success, crud};
use crate::errors::ApiError;
use crate::server::AppState;

/// GET /api/v1/emergency
pub async fn status(State(state): State<AppState>) -> Result<Json<EmergencyStatus>, ApiError> {
    Ok(Json(crud(&state, state.store.emergency_status()).await?))
}

/// POST /api/v1/emergency/activate
///
/// Every field is optional; an empty or unreadable body activates with the
/// default reason and duration.
pub async fn activate(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Success>, ApiError> {
    let request = parse_request(&body);
    let (reason, duration) = normalize_emergency_request(&request)?;
    let _ = crud(&state, state.store.activate_emergency(&reason, duration)).await?;
    warn!(reason = %reason, duration, "emergency mode activated");
    Ok(Json(Success::OK))
}

/// POST /api/v1/emergency/deactivate
pub async fn deactivate(State(state): State<AppState>) -> Result<Json<Success>, ApiError> {
    let _ = crud(&state, state.store.deactivate_emergency()).await?;
    warn!("emergency mode deactivated");
    Ok(Json(Success::OK))
}

fn parse_request(body: &[u8]) -> EmergencyRequest {
    if body.iter().all(u8::is_ascii_whitespace) {
        return EmergencyRequest::default();
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        debug!(error = %e, "unreadable emergency request, using defaults");
        EmergencyRequest::default()
    })
}

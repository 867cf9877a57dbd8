//! HTTP-facing error type and server setup errors.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use qos_core::ValidationError;
use qos_store::StoreError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::admission::AdmissionConfigError;
use crate::auth::AuthError;
use crate::scope::ScopeError;

/// Error returned by a handler. Rendered as `{"error": "<message>"}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or invalid input.
    #[error("{0}")]
    BadRequest(String),
    /// Missing or rejected credentials.
    #[error("{0}")]
    Unauthorized(String),
    /// The addressed record does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Admission denied; retry after the given unix time.
    #[error("rate limit exceeded")]
    RateLimited {
        /// Unix seconds at which the window resets.
        retry_after: i64,
    },
    /// A collaborator is down.
    #[error("{0}")]
    Unavailable(String),
    /// The request deadline passed.
    #[error("request timeout")]
    Timeout,
    /// Anything else. The detail is logged, never returned.
    #[error("internal server error")]
    Internal(String),
}

impl ApiError {
    /// Status code for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::RateLimited { retry_after } => {
                json!({ "error": self.to_string(), "retry_after": retry_after })
            }
            Self::Internal(detail) => {
                error!(detail = %detail, "internal error");
                json!({ "error": self.to_string() })
            }
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Issue(detail) => Self::Internal(detail),
            other => Self::Unauthorized(other.to_string()),
        }
    }
}

impl From<ScopeError> for ApiError {
    fn from(e: ScopeError) -> Self {
        match e {
            ScopeError::DeadlineExceeded(_) => Self::Timeout,
            ScopeError::Cancelled => Self::Unavailable("server shutting down".into()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => Self::NotFound(e.to_string()),
            StoreError::InvalidInput(msg) => Self::BadRequest(msg),
            StoreError::Closed => Self::Unavailable(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Failures starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The accept loop failed.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
    /// Limiter settings were rejected.
    #[error(transparent)]
    Admission(#[from] AdmissionConfigError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

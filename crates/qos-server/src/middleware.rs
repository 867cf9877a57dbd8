//! Request middleware: bearer authentication and admission control.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::admission::AdmissionDecision;
use crate::auth::{AuthError, Claims, TokenType, bearer_token};
use crate::errors::ApiError;
use crate::server::AppState;

/// `X-RateLimit-Limit` response header.
pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// `X-RateLimit-Remaining` response header.
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// `X-RateLimit-Reset` response header.
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Require a valid access token.
///
/// Reads `Authorization: Bearer <token>`, falling back to a `token` query
/// parameter for WebSocket upgrades. Verified [`Claims`] are stored in the
/// request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = match req.headers().get(header::AUTHORIZATION) {
        Some(value) => {
            let value = value.to_str().map_err(|_| AuthError::InvalidScheme)?;
            bearer_token(value)?.to_string()
        }
        None => query_token(req.uri().query()).ok_or(AuthError::MissingToken)?,
    };
    let claims = state.jwt.verify(&token, TokenType::Access)?;
    let _ = req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Gate the request through the admission limiter.
///
/// Authenticated requests are keyed by `user:<sub>`, others by client IP.
/// Rejections become 429 with `retry_after`; both outcomes carry the
/// `X-RateLimit-*` headers.
pub async fn admission(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(limiter) = state.limiter.as_ref() else {
        return next.run(req).await;
    };

    let identifier = match req.extensions().get::<Claims>() {
        Some(claims) => format!("user:{}", claims.sub),
        None => {
            let peer = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr);
            client_ip(req.headers(), peer)
        }
    };

    let decision = limiter.allow(&identifier);
    let mut response = if decision.permitted {
        next.run(req).await
    } else {
        debug!(identifier = %identifier, "admission denied");
        ApiError::RateLimited {
            retry_after: decision.reset_unix(),
        }
        .into_response()
    };
    apply_headers(response.headers_mut(), &decision);
    response
}

fn apply_headers(headers: &mut HeaderMap, decision: &AdmissionDecision) {
    let _ = headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    let _ = headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    let _ = headers.insert(RATE_LIMIT_RESET, HeaderValue::from(decision.reset_unix()));
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    if let Some(first) = header_value("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real) = header_value("x-real-ip") {
        return real.to_string();
    }
    peer.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
}

fn query_token(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "token")
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}

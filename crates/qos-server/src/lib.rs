//! # qos-server
//!
//! Admin control plane for the QoS gateway.
//!
//! - **Admission**: fixed-window limiter keyed by client or user, with a
//!   background sweep of expired buckets
//! - **Request scopes**: per-request deadline and cancellation, released on drop
//! - **Realtime**: one multiplexed WebSocket session per client, fanning
//!   pub/sub events, metrics snapshots and keepalives into one ordered stream
//! - **REST**: quota CRUD, emergency mode, metrics views, JWT login
//! - **Lifecycle**: root cancellation token, session drain, graceful shutdown

#![deny(unsafe_code)]

pub mod admission;
pub mod auth;
pub mod config;
pub mod cors;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod realtime;
pub mod scope;
pub mod server;
pub mod shutdown;

pub use admission::{AdmissionConfigError, AdmissionDecision, AdmissionLimiter, AdmissionPolicy};
pub use auth::{AuthError, Claims, JwtAuthority, TokenType};
pub use config::{RealtimeConfig, ServerConfig};
pub use errors::{ApiError, ServerError};
pub use realtime::{
    CloseReason, DrainReport, RealtimeSession, SessionControl, SessionRegistry, SessionState,
    SessionSummary,
};
pub use scope::{RequestScope, RequestScopeTracker, ScopeError};
pub use server::{AdminServer, AppState};
pub use shutdown::{ShutdownCoordinator, shutdown_signal};

//! # qos-core
//!
//! Shared vocabulary for the QoS gateway admin plane.
//!
//! - **Models**: app/cluster quota configs, emergency state, metrics views, auth DTOs
//! - **Envelopes**: the tagged unit delivered to realtime sessions
//! - **Config events**: what the store publishes on every mutation
//! - **Branded IDs**: `SessionId`, `ScopeId`
//! - **Validation**: field rules for ids, quotas, credentials
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod models;
pub mod validation;

pub use envelope::{Envelope, EnvelopeKind};
pub use errors::ValidationError;
pub use events::{CONFIG_UPDATE_CHANNEL, ConfigEvent, DEFAULT_CHANNELS, EVENTS_CHANNEL};
pub use ids::{ScopeId, SessionId};
pub use models::*;

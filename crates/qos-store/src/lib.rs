//! # qos-store
//!
//! Collaborators behind the admin plane:
//!
//! - **[`ConfigStore`]**: app/cluster quota configs, emergency state, per-target metrics
//! - **[`EventSource`]**: publish/subscribe; [`PubSubHub`] is the in-process backend
//! - **[`MetricsSource`]**: aggregated gateway counters
//!
//! [`SqliteStore`] implements both [`ConfigStore`] and [`MetricsSource`] on an
//! `r2d2` pool and announces every mutation through an injected [`EventSource`].

#![deny(unsafe_code)]

pub mod errors;
pub mod pubsub;
pub mod sqlite;
pub mod traits;

pub use errors::{Result, StoreError};
pub use pubsub::{DEFAULT_HUB_CAPACITY, PUBSUB_LAGGED_TOTAL, PubSubHub};
pub use sqlite::store::NodeStats;
pub use sqlite::{ConnectionConfig, SqliteStore};
pub use traits::{ConfigStore, EventSource, MessageStream, MetricsSource, PubSubMessage};

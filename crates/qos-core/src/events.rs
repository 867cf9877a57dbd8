//! Change notifications published by the configuration store.
//!
//! The gateway data plane and every realtime session subscribe to these
//! channels. Payloads are the JSON form of [`ConfigEvent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel for emergency-mode transitions.
pub const EVENTS_CHANNEL: &str = "ratelimit:events";
/// Channel for configuration changes.
pub const CONFIG_UPDATE_CHANNEL: &str = "ratelimit:config_update";
/// Channels a realtime session subscribes to unless configured otherwise.
pub const DEFAULT_CHANNELS: [&str; 2] = [EVENTS_CHANNEL, CONFIG_UPDATE_CHANNEL];

/// One store mutation, as published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfigEvent {
    /// An app config was created or replaced.
    AppConfig {
        /// Affected app.
        app_id: String,
        /// Publish time.
        timestamp: DateTime<Utc>,
    },
    /// An app config was removed.
    AppDeleted {
        /// Affected app.
        app_id: String,
        /// Publish time.
        timestamp: DateTime<Utc>,
    },
    /// A cluster config was created or replaced.
    ClusterConfig {
        /// Affected cluster.
        cluster_id: String,
        /// Publish time.
        timestamp: DateTime<Utc>,
    },
    /// A connection cap changed.
    ConnectionLimit {
        /// `app` or `cluster`.
        target_type: String,
        /// Affected target.
        target_id: String,
        /// New cap.
        limit: i64,
        /// Publish time.
        timestamp: DateTime<Utc>,
    },
    /// Emergency mode switched on.
    EmergencyActivated {
        /// Sanitised operator reason.
        reason: String,
        /// Duration in seconds.
        duration: i64,
        /// Publish time.
        timestamp: DateTime<Utc>,
    },
    /// Emergency mode switched off.
    EmergencyDeactivated {
        /// Publish time.
        timestamp: DateTime<Utc>,
    },
}

impl ConfigEvent {
    /// Channel this event is published on.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::EmergencyActivated { .. } | Self::EmergencyDeactivated { .. } => EVENTS_CHANNEL,
            _ => CONFIG_UPDATE_CHANNEL,
        }
    }
}

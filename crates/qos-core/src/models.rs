//! Domain models exchanged with the admin API and the configuration store.
//!
//! Wire names are `snake_case`, matching what the gateway data plane reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Burst quota defaults to this multiple of the guaranteed quota.
pub const DEFAULT_BURST_MULTIPLIER: i64 = 5;
/// Default per-app connection cap.
pub const DEFAULT_APP_MAX_CONNECTIONS: i64 = 1000;
/// Default fraction of cluster capacity held in reserve.
pub const DEFAULT_RESERVED_RATIO: f64 = 0.1;
/// Default utilisation at which a cluster enters emergency handling.
pub const DEFAULT_EMERGENCY_THRESHOLD: f64 = 0.95;
/// Default per-cluster connection cap.
pub const DEFAULT_CLUSTER_MAX_CONNECTIONS: i64 = 5000;
/// Default emergency duration in seconds.
pub const DEFAULT_EMERGENCY_DURATION_SECS: i64 = 300;
/// Longest emergency activation accepted, in seconds (24h).
pub const MAX_EMERGENCY_DURATION_SECS: i64 = 86_400;
/// Reason recorded when an activation request carries none.
pub const DEFAULT_EMERGENCY_REASON: &str = "manual activation";
/// Degradation level reported when the data plane has not published one.
pub const DEFAULT_DEGRADATION_LEVEL: &str = "normal";

// ─────────────────────────────────────────────────────────────────────────────
// Quota configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Per-application quota configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application identifier.
    pub app_id: String,
    /// Tokens per second the app is always entitled to.
    pub guaranteed_quota: i64,
    /// Short-term ceiling above the guaranteed quota.
    pub burst_quota: i64,
    /// Scheduling priority, 0 (highest) to 3.
    pub priority: i32,
    /// How much idle capacity the app may borrow.
    pub max_borrow: i64,
    /// Concurrent connection cap.
    pub max_connections: i64,
    /// Last modification time, set by the store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl AppConfig {
    /// Fill unset optional fields with their defaults.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        if self.burst_quota == 0 {
            self.burst_quota = self.guaranteed_quota.saturating_mul(DEFAULT_BURST_MULTIPLIER);
        }
        if self.max_borrow == 0 {
            self.max_borrow = self.guaranteed_quota;
        }
        if self.max_connections == 0 {
            self.max_connections = DEFAULT_APP_MAX_CONNECTIONS;
        }
        self
    }
}

/// Per-cluster capacity configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster identifier.
    pub cluster_id: String,
    /// Total token capacity of the cluster.
    pub max_capacity: i64,
    /// Fraction of capacity held back from borrowing.
    pub reserved_ratio: f64,
    /// Utilisation fraction that triggers emergency handling.
    pub emergency_threshold: f64,
    /// Concurrent connection cap.
    pub max_connections: i64,
    /// Last modification time, set by the store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ClusterConfig {
    /// Fill unset optional fields with their defaults.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        if self.reserved_ratio.abs() < f64::EPSILON {
            self.reserved_ratio = DEFAULT_RESERVED_RATIO;
        }
        if self.emergency_threshold.abs() < f64::EPSILON {
            self.emergency_threshold = DEFAULT_EMERGENCY_THRESHOLD;
        }
        if self.max_connections == 0 {
            self.max_connections = DEFAULT_CLUSTER_MAX_CONNECTIONS;
        }
        self
    }
}

/// What a connection limit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    /// A single application.
    App,
    /// A whole cluster.
    Cluster,
}

impl TargetType {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Cluster => "cluster",
        }
    }
}

/// Request to change the connection cap of an app or cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionLimit {
    /// Target kind.
    pub target_type: TargetType,
    /// Target identifier.
    pub target_id: String,
    /// New connection cap, at least 1.
    pub limit: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Emergency mode
// ─────────────────────────────────────────────────────────────────────────────

/// Current emergency-mode state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyStatus {
    /// Whether emergency mode is on.
    pub active: bool,
    /// Operator-supplied reason for the last activation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// When emergency mode was activated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    /// When the activation lapses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Requested duration in seconds.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub duration: i64,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Body of `POST /emergency/activate`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyRequest {
    /// Free-form reason, sanitised before storage.
    pub reason: String,
    /// Duration in seconds; 0 means the default.
    pub duration: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Metrics views
// ─────────────────────────────────────────────────────────────────────────────

/// Aggregated gateway metrics, pushed to realtime sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// Requests seen by all gateway nodes.
    pub requests_total: u64,
    /// Requests rejected by the data plane.
    pub rejected_total: u64,
    /// Requests served from the L3 token cache.
    pub l3_hits: u64,
    /// `l3_hits / requests_total`, 0 when no requests were seen.
    pub cache_hit_ratio: f64,
    /// Whether emergency mode is on.
    pub emergency_active: bool,
    /// Data-plane degradation level.
    pub degradation_level: String,
    /// Corrections applied by the reconciler.
    pub reconcile_corrections: u64,
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self {
            requests_total: 0,
            rejected_total: 0,
            l3_hits: 0,
            cache_hit_ratio: 0.0,
            emergency_active: false,
            degradation_level: DEFAULT_DEGRADATION_LEVEL.into(),
            reconcile_corrections: 0,
        }
    }
}

impl SystemMetrics {
    /// Recompute `cache_hit_ratio` from the raw counters.
    #[must_use]
    pub fn with_hit_ratio(mut self) -> Self {
        self.cache_hit_ratio = if self.requests_total == 0 {
            0.0
        } else {
            self.l3_hits as f64 / self.requests_total as f64
        };
        self
    }
}

/// Per-application metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetrics {
    /// Application identifier.
    pub app_id: String,
    /// Requests seen for this app.
    pub requests_total: u64,
    /// Requests rejected for this app.
    pub rejected_total: u64,
    /// Tokens left in the app's bucket.
    pub tokens_available: i64,
    /// Cost reserved but not yet settled.
    pub pending_cost: i64,
}

/// Connection counters for an app, a cluster, or the whole gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// `app`, `cluster` or `global`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Target identifier.
    pub id: String,
    /// Open connections now.
    pub current: i64,
    /// Configured cap.
    pub limit: i64,
    /// Highest observed concurrent connections.
    pub peak: i64,
    /// Connections refused at the cap.
    pub rejected: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    /// Account name.
    pub username: String,
    /// Plain-text password.
    pub password: String,
}

/// Body of `POST /auth/refresh`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshRequest {
    /// A refresh token issued by login or a previous refresh.
    pub refresh_token: String,
}

/// Token pair returned by login and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Short-lived bearer token.
    pub access_token: String,
    /// Long-lived token accepted only by `/auth/refresh`.
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_defaults_fill_unset_fields() {
        let app = AppConfig {
            app_id: "svc".into(),
            guaranteed_quota: 100,
            ..AppConfig::default()
        }
        .with_defaults();
        assert_eq!(app.burst_quota, 500);
        assert_eq!(app.max_borrow, 100);
        assert_eq!(app.max_connections, DEFAULT_APP_MAX_CONNECTIONS);
    }

    #[test]
    fn app_defaults_keep_explicit_values() {
        let app = AppConfig {
            app_id: "svc".into(),
            guaranteed_quota: 100,
            burst_quota: 150,
            max_borrow: 7,
            max_connections: 12,
            ..AppConfig::default()
        }
        .with_defaults();
        assert_eq!(app.burst_quota, 150);
        assert_eq!(app.max_borrow, 7);
        assert_eq!(app.max_connections, 12);
    }

    #[test]
    fn cluster_defaults_fill_unset_fields() {
        let cluster = ClusterConfig {
            cluster_id: "c1".into(),
            max_capacity: 10_000,
            ..ClusterConfig::default()
        }
        .with_defaults();
        assert!((cluster.reserved_ratio - 0.1).abs() < f64::EPSILON);
        assert!((cluster.emergency_threshold - 0.95).abs() < f64::EPSILON);
        assert_eq!(cluster.max_connections, 5000);
    }

    #[test]
    fn app_config_deserializes_partial_body() {
        let app: AppConfig = serde_json::from_str(r#"{"guaranteed_quota": 10}"#).unwrap();
        assert_eq!(app.guaranteed_quota, 10);
        assert!(app.app_id.is_empty());
        assert!(app.updated_at.is_none());
    }

    #[test]
    fn target_type_wire_names() {
        let limit: ConnectionLimit =
            serde_json::from_str(r#"{"target_type":"cluster","target_id":"c1","limit":5}"#)
                .unwrap();
        assert_eq!(limit.target_type, TargetType::Cluster);
        assert_eq!(TargetType::App.as_str(), "app");
        assert!(
            serde_json::from_str::<ConnectionLimit>(
                r#"{"target_type":"global","target_id":"x","limit":1}"#
            )
            .is_err()
        );
    }

    #[test]
    fn connection_stats_kind_serializes_as_type() {
        let stats = ConnectionStats {
            kind: "app".into(),
            id: "svc".into(),
            ..ConnectionStats::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["type"], "app");
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn inactive_emergency_omits_optional_fields() {
        let json = serde_json::to_value(EmergencyStatus::default()).unwrap();
        assert_eq!(json, serde_json::json!({"active": false}));
    }

    #[test]
    fn hit_ratio_handles_zero_requests() {
        let m = SystemMetrics::default().with_hit_ratio();
        assert!(m.cache_hit_ratio.abs() < f64::EPSILON);
        assert_eq!(m.degradation_level, "normal");
    }

    #[test]
    fn hit_ratio_divides_counters() {
        let m = SystemMetrics {
            requests_total: 200,
            l3_hits: 50,
            ..SystemMetrics::default()
        }
        .with_hit_ratio();
        assert!((m.cache_hit_ratio - 0.25).abs() < f64::EPSILON);
    }
}

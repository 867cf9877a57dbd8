//! Collaborator interfaces the admin server depends on.
//!
//! The server only ever holds these as `Arc<dyn Trait>`, so any backend
//! (SQLite, a remote key/value store, test fakes) can stand in.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use qos_core::{
    AppConfig, AppMetrics, ClusterConfig, ConnectionLimit, ConnectionStats, EmergencyStatus,
    SystemMetrics,
};
use tokio_util::sync::CancellationToken;

use crate::errors::Result;

/// One message received from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    /// Channel it was published on.
    pub channel: String,
    /// Payload text, usually JSON.
    pub payload: String,
}

/// A live subscription. Ends when its token is cancelled or the backend closes.
pub type MessageStream = Pin<Box<dyn Stream<Item = PubSubMessage> + Send>>;

/// Publish/subscribe backend.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a subscription to `channels`.
    ///
    /// Setup failures (empty channel list, closed backend) are returned here,
    /// never through the stream.
    async fn subscribe(
        &self,
        channels: &[String],
        cancel: CancellationToken,
    ) -> Result<MessageStream>;

    /// Publish `payload` on `channel`. Returns how many subscribers received it.
    async fn publish(&self, channel: &str, payload: String) -> Result<usize>;
}

/// Source of aggregated gateway metrics.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Current snapshot. Callers bound this with their own timeout.
    async fn snapshot(&self) -> Result<SystemMetrics>;
}

/// Quota configuration, emergency state and per-target metrics.
///
/// Every mutation publishes a `ConfigEvent` so realtime sessions and gateway
/// nodes observe it.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Cheap liveness probe.
    async fn ping(&self) -> Result<()>;

    /// All app configs, ordered by id.
    async fn list_apps(&self) -> Result<Vec<AppConfig>>;
    /// One app config.
    async fn get_app(&self, app_id: &str) -> Result<Option<AppConfig>>;
    /// Create or replace an app config. Returns the stored value.
    async fn put_app(&self, app: AppConfig) -> Result<AppConfig>;
    /// Remove an app config. Returns whether it existed.
    async fn delete_app(&self, app_id: &str) -> Result<bool>;

    /// All cluster configs, ordered by id.
    async fn list_clusters(&self) -> Result<Vec<ClusterConfig>>;
    /// One cluster config.
    async fn get_cluster(&self, cluster_id: &str) -> Result<Option<ClusterConfig>>;
    /// Create or replace a cluster config. Returns the stored value.
    async fn put_cluster(&self, cluster: ClusterConfig) -> Result<ClusterConfig>;

    /// Current emergency state.
    async fn emergency_status(&self) -> Result<EmergencyStatus>;
    /// Switch emergency mode on for `duration_secs`.
    async fn activate_emergency(&self, reason: &str, duration_secs: i64)
    -> Result<EmergencyStatus>;
    /// Switch emergency mode off.
    async fn deactivate_emergency(&self) -> Result<EmergencyStatus>;

    /// Change the connection cap of an existing app or cluster.
    async fn set_connection_limit(&self, limit: &ConnectionLimit) -> Result<()>;

    /// Metrics for one app; `None` when the app is unknown.
    async fn app_metrics(&self, app_id: &str) -> Result<Option<AppMetrics>>;
    /// Connection counters for every configured target.
    async fn connection_stats(&self) -> Result<Vec<ConnectionStats>>;
}

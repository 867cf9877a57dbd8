//! [`ConfigStore`] and [`MetricsSource`] over `SQLite`.
//!
//! All SQL runs on the blocking pool through [`SqliteStore::with_conn`].
//! Row helpers are free functions taking `&Connection`, so they compose
//! inside a single pooled connection without extra round trips.
//!
//! Timestamps are stored as RFC 3339 text. Emergency mode expires lazily:
//! a row whose `expires_at` has passed reads back as inactive.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use qos_core::{
    AppConfig, AppMetrics, ClusterConfig, ConfigEvent, ConnectionLimit, ConnectionStats,
    DEFAULT_DEGRADATION_LEVEL, EmergencyStatus, SystemMetrics, TargetType,
};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info, instrument, warn};

use super::connection::{self, ConnectionConfig, ConnectionPool, MEMORY_PATH};
use super::migrations;
use crate::errors::{Result, StoreError};
use crate::traits::{ConfigStore, EventSource, MetricsSource};

const DEGRADATION_KEY: &str = "degradation_level";

/// Counters one gateway node reports about itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Requests the node has seen.
    pub requests_total: u64,
    /// Requests the node rejected.
    pub rejected_total: u64,
    /// Requests answered from the node-local cache.
    pub l3_hits: u64,
    /// Corrections applied by the reconciler.
    pub reconcile_corrections: u64,
}

/// `SQLite`-backed config store and metrics source.
///
/// Mutations publish a [`ConfigEvent`] through the injected [`EventSource`].
pub struct SqliteStore {
    pool: ConnectionPool,
    events: Arc<dyn EventSource>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database.
    pub fn open(
        path: &str,
        config: &ConnectionConfig,
        events: Arc<dyn EventSource>,
    ) -> Result<Self> {
        let pool = if path == MEMORY_PATH {
            connection::new_in_memory(config)?
        } else {
            connection::new_file(path, config)?
        };
        let conn = pool.get()?;
        let applied = migrations::run_migrations(&conn)?;
        info!(path, applied, "store opened");
        drop(conn);
        Ok(Self { pool, events })
    }

    /// In-memory store with default pool settings.
    pub fn in_memory(events: Arc<dyn EventSource>) -> Result<Self> {
        Self::open(MEMORY_PATH, &ConnectionConfig::default(), events)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    async fn notify(&self, event: ConfigEvent) {
        let channel = event.channel();
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(channel, error = %e, "failed to encode config event");
                return;
            }
        };
        match self.events.publish(channel, payload).await {
            Ok(receivers) => debug!(channel, receivers, "config event published"),
            Err(e) => warn!(channel, error = %e, "failed to publish config event"),
        }
    }

    // ── Ingest (gateway nodes report here) ──────────────────────────

    /// Replace the counters reported by `node_id`.
    pub async fn record_gateway_stats(&self, node_id: &str, stats: NodeStats) -> Result<()> {
        let node_id = node_id.to_string();
        self.with_conn(move |conn| {
            let _ = conn.execute(
                "INSERT OR REPLACE INTO gateway_stats
                   (node_id, requests_total, rejected_total, l3_hits, reconcile_corrections, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    node_id,
                    stats.requests_total as i64,
                    stats.rejected_total as i64,
                    stats.l3_hits as i64,
                    stats.reconcile_corrections as i64,
                    now_text(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Replace the metrics row of one app.
    pub async fn record_app_metrics(&self, metrics: &AppMetrics) -> Result<()> {
        let metrics = metrics.clone();
        self.with_conn(move |conn| {
            let _ = conn.execute(
                "INSERT OR REPLACE INTO app_metrics
                   (app_id, requests_total, rejected_total, tokens_available, pending_cost, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    metrics.app_id,
                    metrics.requests_total as i64,
                    metrics.rejected_total as i64,
                    metrics.tokens_available,
                    metrics.pending_cost,
                    now_text(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Replace the observed connection counters of one target.
    pub async fn record_connection_stats(&self, stats: &ConnectionStats) -> Result<()> {
        let stats = stats.clone();
        self.with_conn(move |conn| {
            let _ = conn.execute(
                "INSERT OR REPLACE INTO connection_stats
                   (kind, id, current, conn_limit, peak, rejected, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    stats.kind,
                    stats.id,
                    stats.current,
                    stats.limit,
                    stats.peak,
                    stats.rejected,
                    now_text(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Set the gateway-wide degradation level shown in metrics.
    pub async fn set_degradation_level(&self, level: &str) -> Result<()> {
        let level = level.to_string();
        self.with_conn(move |conn| {
            let _ = conn.execute(
                "INSERT OR REPLACE INTO gateway_state (key, value) VALUES (?1, ?2)",
                params![DEGRADATION_KEY, level],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ConfigStore for SqliteStore {
    async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            let _: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
            Ok(())
        })
        .await
    }

    async fn list_apps(&self) -> Result<Vec<AppConfig>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{APP_SELECT} ORDER BY app_id"))?;
            let apps = stmt
                .query_map([], app_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(apps)
        })
        .await
    }

    async fn get_app(&self, app_id: &str) -> Result<Option<AppConfig>> {
        let app_id = app_id.to_string();
        self.with_conn(move |conn| read_app(conn, &app_id)).await
    }

    #[instrument(skip_all, fields(app_id = %app.app_id))]
    async fn put_app(&self, app: AppConfig) -> Result<AppConfig> {
        let mut app = app.with_defaults();
        app.updated_at = Some(Utc::now());
        let stored = app.clone();
        self.with_conn(move |conn| {
            let _ = conn.execute(
                "INSERT OR REPLACE INTO app_configs
                   (app_id, guaranteed_quota, burst_quota, priority, max_borrow, max_connections, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    app.app_id,
                    app.guaranteed_quota,
                    app.burst_quota,
                    app.priority,
                    app.max_borrow,
                    app.max_connections,
                    app.updated_at.map(to_text),
                ],
            )?;
            Ok(())
        })
        .await?;

        info!("app config stored");
        self.notify(ConfigEvent::AppConfig {
            app_id: stored.app_id.clone(),
            timestamp: Utc::now(),
        })
        .await;
        Ok(stored)
    }

    #[instrument(skip(self))]
    async fn delete_app(&self, app_id: &str) -> Result<bool> {
        let id = app_id.to_string();
        let removed = self
            .with_conn(move |conn| {
                let n = conn.execute("DELETE FROM app_configs WHERE app_id = ?1", params![id])?;
                Ok(n > 0)
            })
            .await?;

        if removed {
            info!("app config deleted");
            self.notify(ConfigEvent::AppDeleted {
                app_id: app_id.to_string(),
                timestamp: Utc::now(),
            })
            .await;
        }
        Ok(removed)
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterConfig>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{CLUSTER_SELECT} ORDER BY cluster_id"))?;
            let clusters = stmt
                .query_map([], cluster_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(clusters)
        })
        .await
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<Option<ClusterConfig>> {
        let cluster_id = cluster_id.to_string();
        self.with_conn(move |conn| {
            let cluster = conn
                .query_row(
                    &format!("{CLUSTER_SELECT} WHERE cluster_id = ?1"),
                    params![cluster_id],
                    cluster_from_row,
                )
                .optional()?;
            Ok(cluster)
        })
        .await
    }

    #[instrument(skip_all, fields(cluster_id = %cluster.cluster_id))]
    async fn put_cluster(&self, cluster: ClusterConfig) -> Result<ClusterConfig> {
        let mut cluster = cluster.with_defaults();
        cluster.updated_at = Some(Utc::now());
        let stored = cluster.clone();
        self.with_conn(move |conn| {
            let _ = conn.execute(
                "INSERT OR REPLACE INTO cluster_configs
                   (cluster_id, max_capacity, reserved_ratio, emergency_threshold, max_connections, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    cluster.cluster_id,
                    cluster.max_capacity,
                    cluster.reserved_ratio,
                    cluster.emergency_threshold,
                    cluster.max_connections,
                    cluster.updated_at.map(to_text),
                ],
            )?;
            Ok(())
        })
        .await?;

        info!("cluster config stored");
        self.notify(ConfigEvent::ClusterConfig {
            cluster_id: stored.cluster_id.clone(),
            timestamp: Utc::now(),
        })
        .await;
        Ok(stored)
    }

    async fn emergency_status(&self) -> Result<EmergencyStatus> {
        self.with_conn(|conn| read_emergency(conn, Utc::now())).await
    }

    #[instrument(skip(self))]
    async fn activate_emergency(&self, reason: &str, duration_secs: i64) -> Result<EmergencyStatus> {
        if duration_secs <= 0 {
            return Err(StoreError::InvalidInput(format!(
                "emergency duration must be positive, got {duration_secs}"
            )));
        }
        let now = Utc::now();
        let status = EmergencyStatus {
            active: true,
            reason: reason.to_string(),
            activated_at: Some(now),
            expires_at: Some(now + chrono::Duration::seconds(duration_secs)),
            duration: duration_secs,
        };
        let row = status.clone();
        self.with_conn(move |conn| {
            let _ = conn.execute(
                "INSERT OR REPLACE INTO emergency_state
                   (id, active, reason, activated_at, expires_at, duration)
                 VALUES (1, 1, ?1, ?2, ?3, ?4)",
                params![
                    row.reason,
                    row.activated_at.map(to_text),
                    row.expires_at.map(to_text),
                    row.duration,
                ],
            )?;
            Ok(())
        })
        .await?;

        warn!(reason, duration_secs, "emergency mode activated");
        self.notify(ConfigEvent::EmergencyActivated {
            reason: reason.to_string(),
            duration: duration_secs,
            timestamp: now,
        })
        .await;
        Ok(status)
    }

    #[instrument(skip(self))]
    async fn deactivate_emergency(&self) -> Result<EmergencyStatus> {
        self.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT OR REPLACE INTO emergency_state
                   (id, active, reason, activated_at, expires_at, duration)
                 VALUES (1, 0, '', NULL, NULL, 0)",
                [],
            )?;
            Ok(())
        })
        .await?;

        info!("emergency mode deactivated");
        self.notify(ConfigEvent::EmergencyDeactivated {
            timestamp: Utc::now(),
        })
        .await;
        Ok(EmergencyStatus::default())
    }

    #[instrument(skip_all, fields(target_type = limit.target_type.as_str(), target_id = %limit.target_id))]
    async fn set_connection_limit(&self, limit: &ConnectionLimit) -> Result<()> {
        let target = limit.clone();
        self.with_conn(move |conn| {
            let (sql, kind) = match target.target_type {
                TargetType::App => (
                    "UPDATE app_configs SET max_connections = ?1, updated_at = ?2 WHERE app_id = ?3",
                    "app",
                ),
                TargetType::Cluster => (
                    "UPDATE cluster_configs SET max_connections = ?1, updated_at = ?2 WHERE cluster_id = ?3",
                    "cluster",
                ),
            };
            let n = conn.execute(sql, params![target.limit, now_text(), target.target_id])?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    kind,
                    id: target.target_id,
                });
            }
            Ok(())
        })
        .await?;

        info!(limit = limit.limit, "connection limit updated");
        self.notify(ConfigEvent::ConnectionLimit {
            target_type: limit.target_type.as_str().to_string(),
            target_id: limit.target_id.clone(),
            limit: limit.limit,
            timestamp: Utc::now(),
        })
        .await;
        Ok(())
    }

    async fn app_metrics(&self, app_id: &str) -> Result<Option<AppMetrics>> {
        let app_id = app_id.to_string();
        self.with_conn(move |conn| {
            let observed = conn
                .query_row(
                    "SELECT app_id, requests_total, rejected_total, tokens_available, pending_cost
                     FROM app_metrics WHERE app_id = ?1",
                    params![app_id],
                    |row| {
                        Ok(AppMetrics {
                            app_id: row.get(0)?,
                            requests_total: row.get::<_, i64>(1)? as u64,
                            rejected_total: row.get::<_, i64>(2)? as u64,
                            tokens_available: row.get(3)?,
                            pending_cost: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            if observed.is_some() {
                return Ok(observed);
            }
            // configured but never reported: zeros
            Ok(read_app(conn, &app_id)?.map(|_| AppMetrics {
                app_id,
                ..AppMetrics::default()
            }))
        })
        .await
    }

    async fn connection_stats(&self) -> Result<Vec<ConnectionStats>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT 'app', a.app_id, COALESCE(s.current, 0), a.max_connections,
                        COALESCE(s.peak, 0), COALESCE(s.rejected, 0)
                 FROM app_configs a
                 LEFT JOIN connection_stats s ON s.kind = 'app' AND s.id = a.app_id
                 UNION ALL
                 SELECT 'cluster', c.cluster_id, COALESCE(s.current, 0), c.max_connections,
                        COALESCE(s.peak, 0), COALESCE(s.rejected, 0)
                 FROM cluster_configs c
                 LEFT JOIN connection_stats s ON s.kind = 'cluster' AND s.id = c.cluster_id
                 UNION ALL
                 SELECT s.kind, s.id, s.current, s.conn_limit, s.peak, s.rejected
                 FROM connection_stats s
                 WHERE NOT (s.kind = 'app' AND s.id IN (SELECT app_id FROM app_configs))
                   AND NOT (s.kind = 'cluster' AND s.id IN (SELECT cluster_id FROM cluster_configs))
                 ORDER BY 1, 2",
            )?;
            let stats = stmt
                .query_map([], |row| {
                    Ok(ConnectionStats {
                        kind: row.get(0)?,
                        id: row.get(1)?,
                        current: row.get(2)?,
                        limit: row.get(3)?,
                        peak: row.get(4)?,
                        rejected: row.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(stats)
        })
        .await
    }
}

#[async_trait]
impl MetricsSource for SqliteStore {
    async fn snapshot(&self) -> Result<SystemMetrics> {
        self.with_conn(|conn| {
            let (requests, rejected, l3_hits, corrections): (i64, i64, i64, i64) = conn
                .query_row(
                    "SELECT COALESCE(SUM(requests_total), 0), COALESCE(SUM(rejected_total), 0),
                            COALESCE(SUM(l3_hits), 0), COALESCE(SUM(reconcile_corrections), 0)
                     FROM gateway_stats",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?;
            let level: Option<String> = conn
                .query_row(
                    "SELECT value FROM gateway_state WHERE key = ?1",
                    params![DEGRADATION_KEY],
                    |row| row.get(0),
                )
                .optional()?;
            let emergency = read_emergency(conn, Utc::now())?;

            Ok(SystemMetrics {
                requests_total: requests as u64,
                rejected_total: rejected as u64,
                l3_hits: l3_hits as u64,
                cache_hit_ratio: 0.0,
                emergency_active: emergency.active,
                degradation_level: level
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| DEFAULT_DEGRADATION_LEVEL.to_string()),
                reconcile_corrections: corrections as u64,
            }
            .with_hit_ratio())
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

const APP_SELECT: &str = "SELECT app_id, guaranteed_quota, burst_quota, priority, max_borrow, \
                          max_connections, updated_at FROM app_configs";

const CLUSTER_SELECT: &str = "SELECT cluster_id, max_capacity, reserved_ratio, \
                              emergency_threshold, max_connections, updated_at FROM cluster_configs";

fn read_app(conn: &Connection, app_id: &str) -> Result<Option<AppConfig>> {
    let app = conn
        .query_row(
            &format!("{APP_SELECT} WHERE app_id = ?1"),
            params![app_id],
            app_from_row,
        )
        .optional()?;
    Ok(app)
}

fn app_from_row(row: &Row<'_>) -> rusqlite::Result<AppConfig> {
    Ok(AppConfig {
        app_id: row.get(0)?,
        guaranteed_quota: row.get(1)?,
        burst_quota: row.get(2)?,
        priority: row.get(3)?,
        max_borrow: row.get(4)?,
        max_connections: row.get(5)?,
        updated_at: optional_timestamp(row, 6)?,
    })
}

fn cluster_from_row(row: &Row<'_>) -> rusqlite::Result<ClusterConfig> {
    Ok(ClusterConfig {
        cluster_id: row.get(0)?,
        max_capacity: row.get(1)?,
        reserved_ratio: row.get(2)?,
        emergency_threshold: row.get(3)?,
        max_connections: row.get(4)?,
        updated_at: optional_timestamp(row, 5)?,
    })
}

fn read_emergency(conn: &Connection, now: DateTime<Utc>) -> Result<EmergencyStatus> {
    let status = conn
        .query_row(
            "SELECT active, reason, activated_at, expires_at, duration
             FROM emergency_state WHERE id = 1",
            [],
            |row| {
                Ok(EmergencyStatus {
                    active: row.get(0)?,
                    reason: row.get(1)?,
                    activated_at: optional_timestamp(row, 2)?,
                    expires_at: optional_timestamp(row, 3)?,
                    duration: row.get(4)?,
                })
            },
        )
        .optional()?;

    Ok(match status {
        Some(s) if s.active && s.expires_at.is_some_and(|at| at > now) => s,
        _ => EmergencyStatus::default(),
    })
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let Some(raw) = row.get::<_, Option<String>>(idx)? else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn to_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn now_text() -> String {
    to_text(Utc::now())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::PubSubHub;
    use assert_matches::assert_matches;
    use futures::StreamExt;
    use qos_core::{CONFIG_UPDATE_CHANNEL, EVENTS_CHANNEL};
    use tokio_util::sync::CancellationToken;

    fn store() -> (SqliteStore, Arc<PubSubHub>) {
        let hub = Arc::new(PubSubHub::new(32));
        let store = SqliteStore::in_memory(hub.clone()).unwrap();
        (store, hub)
    }

    fn app(id: &str, guaranteed: i64) -> AppConfig {
        AppConfig {
            app_id: id.into(),
            guaranteed_quota: guaranteed,
            ..AppConfig::default()
        }
    }

    fn cluster(id: &str) -> ClusterConfig {
        ClusterConfig {
            cluster_id: id.into(),
            max_capacity: 10_000,
            ..ClusterConfig::default()
        }
    }

    async fn next_event(stream: &mut crate::traits::MessageStream) -> ConfigEvent {
        let msg = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&msg.payload).unwrap()
    }

    #[tokio::test]
    async fn ping_ok() {
        let (store, _) = store();
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn put_app_applies_defaults_and_round_trips() {
        let (store, _) = store();
        let stored = store.put_app(app("svc-a", 100)).await.unwrap();
        assert_eq!(stored.burst_quota, 500);
        assert_eq!(stored.max_borrow, 100);
        assert_eq!(stored.max_connections, 1000);
        assert!(stored.updated_at.is_some());

        let fetched = store.get_app("svc-a").await.unwrap().unwrap();
        assert_eq!(fetched, stored);
    }

    #[tokio::test]
    async fn list_apps_ordered_by_id() {
        let (store, _) = store();
        let _ = store.put_app(app("b", 1)).await.unwrap();
        let _ = store.put_app(app("a", 1)).await.unwrap();
        let ids: Vec<_> = store
            .list_apps()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.app_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn get_missing_app_is_none() {
        let (store, _) = store();
        assert!(store.get_app("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_app_reports_existence() {
        let (store, _) = store();
        let _ = store.put_app(app("a", 1)).await.unwrap();
        assert!(store.delete_app("a").await.unwrap());
        assert!(!store.delete_app("a").await.unwrap());
        assert!(store.get_app("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mutations_publish_config_events() {
        let (store, hub) = store();
        let mut stream = hub
            .subscribe(
                &[CONFIG_UPDATE_CHANNEL.to_string()],
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let _ = store.put_app(app("a", 1)).await.unwrap();
        assert_matches!(next_event(&mut stream).await, ConfigEvent::AppConfig { app_id, .. } if app_id == "a");

        let _ = store.delete_app("a").await.unwrap();
        assert_matches!(next_event(&mut stream).await, ConfigEvent::AppDeleted { app_id, .. } if app_id == "a");

        let _ = store.put_cluster(cluster("c1")).await.unwrap();
        assert_matches!(next_event(&mut stream).await, ConfigEvent::ClusterConfig { cluster_id, .. } if cluster_id == "c1");
    }

    #[tokio::test]
    async fn deleting_missing_app_publishes_nothing() {
        let (store, hub) = store();
        let mut stream = hub
            .subscribe(
                &[CONFIG_UPDATE_CHANNEL.to_string()],
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!store.delete_app("ghost").await.unwrap());
        let next = tokio::time::timeout(std::time::Duration::from_millis(50), stream.next()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn publish_failure_does_not_fail_mutation() {
        let (store, hub) = store();
        hub.close();
        let stored = store.put_app(app("a", 5)).await.unwrap();
        assert_eq!(stored.app_id, "a");
        assert!(store.get_app("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cluster_defaults_and_listing() {
        let (store, _) = store();
        let stored = store.put_cluster(cluster("c1")).await.unwrap();
        assert!((stored.reserved_ratio - 0.1).abs() < f64::EPSILON);
        assert!((stored.emergency_threshold - 0.95).abs() < f64::EPSILON);
        assert_eq!(stored.max_connections, 5000);

        assert_eq!(store.list_clusters().await.unwrap().len(), 1);
        assert_eq!(store.get_cluster("c1").await.unwrap().unwrap(), stored);
        assert!(store.get_cluster("c2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn emergency_activate_and_deactivate() {
        let (store, hub) = store();
        let mut stream = hub
            .subscribe(&[EVENTS_CHANNEL.to_string()], CancellationToken::new())
            .await
            .unwrap();

        assert!(!store.emergency_status().await.unwrap().active);

        let status = store.activate_emergency("overload", 300).await.unwrap();
        assert!(status.active);
        assert_eq!(status.duration, 300);
        assert_matches!(
            next_event(&mut stream).await,
            ConfigEvent::EmergencyActivated { reason, duration: 300, .. } if reason == "overload"
        );

        let read = store.emergency_status().await.unwrap();
        assert!(read.active);
        assert_eq!(read.reason, "overload");
        assert_eq!(read.expires_at, status.expires_at);

        let off = store.deactivate_emergency().await.unwrap();
        assert!(!off.active);
        assert_matches!(next_event(&mut stream).await, ConfigEvent::EmergencyDeactivated { .. });
        assert!(!store.emergency_status().await.unwrap().active);
    }

    #[tokio::test]
    async fn emergency_rejects_non_positive_duration() {
        let (store, _) = store();
        assert_matches!(
            store.activate_emergency("x", 0).await,
            Err(StoreError::InvalidInput(_))
        );
    }

    #[test]
    fn expired_emergency_reads_inactive() {
        let conn = Connection::open_in_memory().unwrap();
        let _ = migrations::run_migrations(&conn).unwrap();
        let past = Utc::now() - chrono::Duration::seconds(10);
        let _ = conn
            .execute(
                "INSERT INTO emergency_state (id, active, reason, activated_at, expires_at, duration)
                 VALUES (1, 1, 'old', ?1, ?2, 5)",
                params![to_text(past), to_text(past + chrono::Duration::seconds(5))],
            )
            .unwrap();
        let status = read_emergency(&conn, Utc::now()).unwrap();
        assert_eq!(status, EmergencyStatus::default());
    }

    #[tokio::test]
    async fn connection_limit_updates_target() {
        let (store, _) = store();
        let _ = store.put_app(app("a", 10)).await.unwrap();
        let limit = ConnectionLimit {
            target_type: TargetType::App,
            target_id: "a".into(),
            limit: 42,
        };
        store.set_connection_limit(&limit).await.unwrap();
        assert_eq!(store.get_app("a").await.unwrap().unwrap().max_connections, 42);
    }

    #[tokio::test]
    async fn connection_limit_for_missing_target_is_not_found() {
        let (store, _) = store();
        let limit = ConnectionLimit {
            target_type: TargetType::Cluster,
            target_id: "ghost".into(),
            limit: 5,
        };
        assert_matches!(
            store.set_connection_limit(&limit).await,
            Err(StoreError::NotFound { kind: "cluster", .. })
        );
    }

    #[tokio::test]
    async fn app_metrics_known_unknown_and_reported() {
        let (store, _) = store();
        assert!(store.app_metrics("a").await.unwrap().is_none());

        let _ = store.put_app(app("a", 10)).await.unwrap();
        let zero = store.app_metrics("a").await.unwrap().unwrap();
        assert_eq!(zero.requests_total, 0);

        let reported = AppMetrics {
            app_id: "a".into(),
            requests_total: 10,
            rejected_total: 2,
            tokens_available: 7,
            pending_cost: 1,
        };
        store.record_app_metrics(&reported).await.unwrap();
        assert_eq!(store.app_metrics("a").await.unwrap().unwrap(), reported);
    }

    #[tokio::test]
    async fn connection_stats_merge_config_and_observed() {
        let (store, _) = store();
        let _ = store.put_app(app("a", 10)).await.unwrap();
        let _ = store.put_cluster(cluster("c")).await.unwrap();
        store
            .record_connection_stats(&ConnectionStats {
                kind: "app".into(),
                id: "a".into(),
                current: 3,
                limit: 0,
                peak: 9,
                rejected: 1,
            })
            .await
            .unwrap();
        store
            .record_connection_stats(&ConnectionStats {
                kind: "global".into(),
                id: "gateway".into(),
                current: 11,
                limit: 20_000,
                peak: 40,
                rejected: 0,
            })
            .await
            .unwrap();

        let stats = store.connection_stats().await.unwrap();
        assert_eq!(stats.len(), 3);

        let a = stats.iter().find(|s| s.kind == "app").unwrap();
        assert_eq!((a.current, a.limit, a.peak), (3, 1000, 9));
        let c = stats.iter().find(|s| s.kind == "cluster").unwrap();
        assert_eq!((c.current, c.limit), (0, 5000));
        let g = stats.iter().find(|s| s.kind == "global").unwrap();
        assert_eq!(g.limit, 20_000);
    }

    #[tokio::test]
    async fn snapshot_aggregates_nodes() {
        let (store, _) = store();
        let empty = store.snapshot().await.unwrap();
        assert_eq!(empty.requests_total, 0);
        assert!(empty.cache_hit_ratio.abs() < f64::EPSILON);
        assert_eq!(empty.degradation_level, "normal");

        store
            .record_gateway_stats(
                "n1",
                NodeStats {
                    requests_total: 60,
                    rejected_total: 5,
                    l3_hits: 30,
                    reconcile_corrections: 1,
                },
            )
            .await
            .unwrap();
        store
            .record_gateway_stats(
                "n2",
                NodeStats {
                    requests_total: 40,
                    rejected_total: 5,
                    l3_hits: 20,
                    reconcile_corrections: 0,
                },
            )
            .await
            .unwrap();
        store.set_degradation_level("degraded").await.unwrap();
        let _ = store.activate_emergency("load", 60).await.unwrap();

        let snap = store.snapshot().await.unwrap();
        assert_eq!(snap.requests_total, 100);
        assert_eq!(snap.rejected_total, 10);
        assert_eq!(snap.reconcile_corrections, 1);
        assert!((snap.cache_hit_ratio - 0.5).abs() < f64::EPSILON);
        assert!(snap.emergency_active);
        assert_eq!(snap.degradation_level, "degraded");
    }

    #[tokio::test]
    async fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qos.db");
        let path = path.to_str().unwrap();
        {
            let store =
                SqliteStore::open(path, &ConnectionConfig::default(), Arc::new(PubSubHub::default()))
                    .unwrap();
            let _ = store.put_app(app("kept", 3)).await.unwrap();
        }
        let store =
            SqliteStore::open(path, &ConnectionConfig::default(), Arc::new(PubSubHub::default()))
                .unwrap();
        assert!(store.get_app("kept").await.unwrap().is_some());
    }
}

//! Runtime configuration for the admin server, derived from settings.

use std::time::Duration;

use qos_core::DEFAULT_CHANNELS;
use qos_settings::{AdminSettings, RealtimeSettings};

use crate::admission::{AdmissionConfigError, AdmissionPolicy};

/// Timing for realtime sessions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Liveness probe interval.
    pub keepalive_interval: Duration,
    /// Metrics push interval.
    pub metrics_interval: Duration,
    /// Bound on one metrics snapshot fetch.
    pub metrics_timeout: Duration,
    /// Bound on one transport write.
    pub write_timeout: Duration,
    /// Bound on a session's teardown.
    pub drain_timeout: Duration,
    /// Pub/sub channels each session subscribes to.
    pub channels: Vec<String>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(60),
            metrics_interval: Duration::from_secs(5),
            metrics_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(5),
            channels: DEFAULT_CHANNELS.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

impl From<&RealtimeSettings> for RealtimeConfig {
    fn from(s: &RealtimeSettings) -> Self {
        Self {
            keepalive_interval: Duration::from_secs(s.keepalive_secs),
            metrics_interval: Duration::from_secs(s.metrics_interval_secs),
            metrics_timeout: Duration::from_secs(s.metrics_timeout_secs),
            write_timeout: Duration::from_secs(s.write_timeout_secs),
            drain_timeout: Duration::from_secs(s.drain_timeout_secs),
            channels: s.channels.clone(),
        }
    }
}

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to (0 = auto-assign).
    pub port: u16,
    /// Deadline for ordinary CRUD requests.
    pub request_timeout: Duration,
    /// Deadline for the system metrics request.
    pub metrics_request_timeout: Duration,
    /// Bound on graceful shutdown.
    pub shutdown_timeout: Duration,
    /// Limiter budget; `None` disables admission control.
    pub admission: Option<AdmissionPolicy>,
    /// Interval of the limiter's sweep.
    pub sweep_interval: Duration,
    /// Realtime session timing.
    pub realtime: RealtimeConfig,
}

impl ServerConfig {
    /// Derive from loaded settings. Rejects a limiter budget that can never
    /// admit anything.
    pub fn from_settings(settings: &AdminSettings) -> Result<Self, AdmissionConfigError> {
        let rl = &settings.rate_limit;
        let admission = if rl.enabled {
            Some(AdmissionPolicy::new(
                rl.requests_per_window,
                Duration::from_secs(rl.window_secs),
            )?)
        } else {
            None
        };
        Ok(Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            request_timeout: Duration::from_secs(settings.server.request_timeout_secs),
            metrics_request_timeout: Duration::from_secs(
                settings.server.metrics_request_timeout_secs,
            ),
            shutdown_timeout: Duration::from_secs(settings.server.shutdown_timeout_secs),
            admission,
            sweep_interval: Duration::from_secs(rl.cleanup_interval_secs.max(1)),
            realtime: RealtimeConfig::from(&settings.realtime),
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            request_timeout: Duration::from_secs(5),
            metrics_request_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(30),
            admission: AdmissionPolicy::new(100, Duration::from_secs(60)).ok(),
            sweep_interval: Duration::from_secs(300),
            realtime: RealtimeConfig::default(),
        }
    }
}

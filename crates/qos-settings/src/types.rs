//! Settings types with compiled defaults.
//!
//! Every section is `#[serde(default)]` so a settings file only needs the
//! keys it changes.

use qos_core::events::DEFAULT_CHANNELS;
use qos_core::logging::{LogFormat, LogOutput, is_valid_level};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Shortest accepted JWT signing secret.
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

/// Root settings object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSettings {
    /// HTTP listener and timeouts.
    pub server: ServerSettings,
    /// Configuration store.
    pub store: StoreSettings,
    /// Token signing.
    pub jwt: JwtSettings,
    /// Admin login.
    pub auth: AuthSettings,
    /// Cross-origin policy.
    pub cors: CorsSettings,
    /// Admission limiter.
    pub rate_limit: RateLimitSettings,
    /// Realtime sessions.
    pub realtime: RealtimeSettings,
    /// Logging.
    pub log: LogSettings,
}

/// HTTP listener and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Upper bound for graceful shutdown.
    pub shutdown_timeout_secs: u64,
    /// Deadline for a CRUD handler's downstream calls.
    pub request_timeout_secs: u64,
    /// Deadline for the system metrics endpoint.
    pub metrics_request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8081,
            shutdown_timeout_secs: 30,
            request_timeout_secs: 5,
            metrics_request_timeout_secs: 10,
        }
    }
}

/// Configuration store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// `SQLite` file path, or `:memory:`.
    pub db_path: String,
    /// Connection pool size.
    pub pool_size: u32,
    /// `SQLite` busy timeout.
    pub busy_timeout_ms: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "qos-admin.db".into(),
            pool_size: 8,
            busy_timeout_ms: 5000,
        }
    }
}

/// Token signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtSettings {
    /// HMAC secret. Required; at least [`MIN_JWT_SECRET_LENGTH`] characters.
    pub secret: String,
    /// `iss` claim written and required.
    pub issuer: String,
    /// Access token lifetime.
    pub access_ttl_secs: u64,
    /// Refresh token lifetime.
    pub refresh_ttl_secs: u64,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: "qos-gateway-admin".into(),
            access_ttl_secs: 3600,
            refresh_ttl_secs: 7 * 24 * 3600,
        }
    }
}

/// Admin login credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Accepted username.
    pub admin_username: String,
    /// Accepted password.
    pub admin_password: String,
}

/// Password shipped as the demo default; startup warns while it is in use.
pub const DEMO_ADMIN_PASSWORD: &str = "admin123";

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            admin_username: "admin".into(),
            admin_password: DEMO_ADMIN_PASSWORD.into(),
        }
    }
}

/// Cross-origin policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsSettings {
    /// Allowed origins; `*` allows any.
    pub allowed_origins: Vec<String>,
    /// Allowed methods.
    pub allowed_methods: Vec<String>,
    /// Allowed request headers.
    pub allowed_headers: Vec<String>,
    /// Response headers exposed to scripts.
    pub exposed_headers: Vec<String>,
    /// Whether credentials are allowed.
    pub allow_credentials: bool,
    /// Preflight cache lifetime.
    pub max_age_secs: u64,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".into()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allowed_headers: ["Origin", "Content-Type", "Accept", "Authorization"]
                .map(String::from)
                .to_vec(),
            exposed_headers: [
                "Content-Length",
                "X-RateLimit-Limit",
                "X-RateLimit-Remaining",
                "X-RateLimit-Reset",
            ]
            .map(String::from)
            .to_vec(),
            allow_credentials: false,
            max_age_secs: 12 * 3600,
        }
    }
}

/// Admission limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Whether the limiter gates CRUD routes.
    pub enabled: bool,
    /// Requests admitted per identifier per window.
    pub requests_per_window: u32,
    /// Fixed window length.
    pub window_secs: u64,
    /// Period of the expired-bucket sweep.
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: 100,
            window_secs: 60,
            cleanup_interval_secs: 300,
        }
    }
}

/// Realtime sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSettings {
    /// Interval between liveness probes.
    pub keepalive_secs: u64,
    /// Interval between metrics envelopes.
    pub metrics_interval_secs: u64,
    /// Bound on one metrics snapshot fetch.
    pub metrics_timeout_secs: u64,
    /// Bound on one transport write.
    pub write_timeout_secs: u64,
    /// How long shutdown waits for sessions to reach `Closed`.
    pub drain_timeout_secs: u64,
    /// Per-subscription queue depth before the oldest messages are dropped.
    pub subscription_buffer: usize,
    /// Channels each session subscribes to.
    pub channels: Vec<String>,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            keepalive_secs: 60,
            metrics_interval_secs: 5,
            metrics_timeout_secs: 5,
            write_timeout_secs: 10,
            drain_timeout_secs: 5,
            subscription_buffer: 256,
            channels: DEFAULT_CHANNELS.map(String::from).to_vec(),
        }
    }
}

/// Logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `debug`, `info`, `warn` or `error`.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
    /// Destination.
    pub output: LogOutput,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Console,
            output: LogOutput::Stderr,
        }
    }
}

impl AdminSettings {
    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.jwt.secret.chars().count() < MIN_JWT_SECRET_LENGTH {
            return invalid(format!(
                "jwt.secret must be at least {MIN_JWT_SECRET_LENGTH} characters"
            ));
        }
        if self.jwt.issuer.is_empty() {
            return invalid("jwt.issuer cannot be empty");
        }
        if self.jwt.access_ttl_secs == 0 || self.jwt.refresh_ttl_secs == 0 {
            return invalid("jwt token lifetimes must be positive");
        }
        if self.auth.admin_username.is_empty() || self.auth.admin_password.is_empty() {
            return invalid("auth.admin_username and auth.admin_password are required");
        }
        if self.store.db_path.is_empty() {
            return invalid("store.db_path cannot be empty");
        }
        if self.store.pool_size == 0 {
            return invalid("store.pool_size must be positive");
        }
        if self.server.request_timeout_secs == 0 || self.server.metrics_request_timeout_secs == 0 {
            return invalid("server request timeouts must be positive");
        }
        if self.cors.allowed_origins.is_empty() {
            return invalid("cors.allowed_origins cannot be empty");
        }
        if self.rate_limit.enabled {
            if self.rate_limit.requests_per_window == 0 {
                return invalid("rate_limit.requests_per_window must be positive");
            }
            if self.rate_limit.window_secs == 0 {
                return invalid("rate_limit.window_secs must be positive");
            }
            if self.rate_limit.cleanup_interval_secs == 0 {
                return invalid("rate_limit.cleanup_interval_secs must be positive");
            }
        }
        let rt = &self.realtime;
        if rt.keepalive_secs == 0
            || rt.metrics_interval_secs == 0
            || rt.metrics_timeout_secs == 0
            || rt.write_timeout_secs == 0
            || rt.drain_timeout_secs == 0
        {
            return invalid("realtime intervals and timeouts must be positive");
        }
        if rt.subscription_buffer == 0 {
            return invalid("realtime.subscription_buffer must be positive");
        }
        if rt.channels.is_empty() || rt.channels.iter().any(String::is_empty) {
            return invalid("realtime.channels must list at least one non-empty channel");
        }
        if !is_valid_level(&self.log.level) {
            return invalid(format!(
                "log.level must be one of debug, info, warn, error (got {:?})",
                self.log.level
            ));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> Result<()> {
    Err(SettingsError::InvalidValue(message.into()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn valid() -> AdminSettings {
        let mut s = AdminSettings::default();
        s.jwt.secret = "0123456789abcdef0123456789abcdef".into();
        s
    }

    #[test]
    fn defaults() {
        let s = AdminSettings::default();
        assert_eq!(s.server.port, 8081);
        assert_eq!(s.server.shutdown_timeout_secs, 30);
        assert_eq!(s.rate_limit.requests_per_window, 100);
        assert_eq!(s.rate_limit.window_secs, 60);
        assert_eq!(s.rate_limit.cleanup_interval_secs, 300);
        assert_eq!(s.realtime.keepalive_secs, 60);
        assert_eq!(s.realtime.metrics_interval_secs, 5);
        assert_eq!(s.jwt.issuer, "qos-gateway-admin");
        assert_eq!(s.jwt.access_ttl_secs, 3600);
        assert_eq!(s.cors.allowed_origins, vec!["*"]);
        assert_eq!(
            s.realtime.channels,
            vec!["ratelimit:events", "ratelimit:config_update"]
        );
    }

    #[test]
    fn defaults_with_secret_validate() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn missing_secret_rejected() {
        let err = AdminSettings::default().validate().unwrap_err();
        assert!(err.to_string().contains("jwt.secret"));
    }

    #[test]
    fn zero_request_budget_is_config_error() {
        let mut s = valid();
        s.rate_limit.requests_per_window = 0;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(m)) if m.contains("requests_per_window"));
    }

    #[test]
    fn zero_window_rejected() {
        let mut s = valid();
        s.rate_limit.window_secs = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn disabled_limiter_skips_its_checks() {
        let mut s = valid();
        s.rate_limit.enabled = false;
        s.rate_limit.requests_per_window = 0;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn zero_keepalive_rejected() {
        let mut s = valid();
        s.realtime.keepalive_secs = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn empty_channel_rejected() {
        let mut s = valid();
        s.realtime.channels = vec![String::new()];
        assert!(s.validate().is_err());
    }

    #[test]
    fn unknown_log_level_rejected() {
        let mut s = valid();
        s.log.level = "verbose".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let s = valid();
        let json = serde_json::to_string(&s).unwrap();
        let back: AdminSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}

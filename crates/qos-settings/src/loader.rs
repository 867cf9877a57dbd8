//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`AdminSettings::default()`]
//! 2. If a settings file is given, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. [`AdminSettings::validate`]
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;
use std::time::Duration;

use qos_core::logging::{LogFormat, LogOutput};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::AdminSettings;

/// Load settings from an optional file plus the process environment, then validate.
///
/// A path that was given but does not exist is an error.
pub fn load_settings(path: Option<&Path>) -> Result<AdminSettings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

/// Same as [`load_settings`] with an explicit environment lookup.
pub fn load_settings_with<F>(path: Option<&Path>, lookup: F) -> Result<AdminSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(AdminSettings::default())?;

    let merged = if let Some(path) = path {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        defaults
    };

    let mut settings: AdminSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, &lookup);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (the file/default value stays).
/// Values that parse but make no sense, like a zero request budget, are left
/// for [`AdminSettings::validate`] to reject.
pub fn apply_env_overrides<F>(settings: &mut AdminSettings, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64_range("PORT", 1, 65_535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.duration_secs("SERVER_SHUTDOWN_TIMEOUT") {
        settings.server.shutdown_timeout_secs = v;
    }
    if let Some(v) = env.duration_secs("SERVER_REQUEST_TIMEOUT") {
        settings.server.request_timeout_secs = v;
    }

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = env.string("DB_PATH") {
        settings.store.db_path = v;
    }
    if let Some(v) = env.u64_range("DB_POOL_SIZE", 1, 256) {
        settings.store.pool_size = v as u32;
    }

    // ── JWT / auth ──────────────────────────────────────────────────
    if let Some(v) = env.string("JWT_SECRET") {
        settings.jwt.secret = v;
    }
    if let Some(v) = env.string("JWT_ISSUER") {
        settings.jwt.issuer = v;
    }
    if let Some(v) = env.duration_secs("JWT_ACCESS_TOKEN_TTL") {
        settings.jwt.access_ttl_secs = v;
    }
    if let Some(v) = env.duration_secs("JWT_REFRESH_TOKEN_TTL") {
        settings.jwt.refresh_ttl_secs = v;
    }
    if let Some(v) = env.string("ADMIN_USERNAME") {
        settings.auth.admin_username = v;
    }
    if let Some(v) = env.string("ADMIN_PASSWORD") {
        settings.auth.admin_password = v;
    }

    // ── CORS ────────────────────────────────────────────────────────
    if let Some(v) = env.list("CORS_ALLOWED_ORIGINS") {
        settings.cors.allowed_origins = v;
    }
    if let Some(v) = env.list("CORS_ALLOWED_METHODS") {
        settings.cors.allowed_methods = v;
    }
    if let Some(v) = env.list("CORS_ALLOWED_HEADERS") {
        settings.cors.allowed_headers = v;
    }
    if let Some(v) = env.bool("CORS_ALLOW_CREDENTIALS") {
        settings.cors.allow_credentials = v;
    }

    // ── Rate limit ──────────────────────────────────────────────────
    if let Some(v) = env.bool("RATE_LIMIT_ENABLED") {
        settings.rate_limit.enabled = v;
    }
    if let Some(v) = env.u64_range("RATE_LIMIT_REQUESTS", 0, u64::from(u32::MAX)) {
        settings.rate_limit.requests_per_window = v as u32;
    }
    if let Some(v) = env.duration_secs("RATE_LIMIT_WINDOW") {
        settings.rate_limit.window_secs = v;
    }
    if let Some(v) = env.duration_secs("RATE_LIMIT_CLEANUP_INTERVAL") {
        settings.rate_limit.cleanup_interval_secs = v;
    }

    // ── Realtime ────────────────────────────────────────────────────
    if let Some(v) = env.duration_secs("WS_KEEPALIVE_INTERVAL") {
        settings.realtime.keepalive_secs = v;
    }
    if let Some(v) = env.duration_secs("WS_METRICS_INTERVAL") {
        settings.realtime.metrics_interval_secs = v;
    }
    if let Some(v) = env.duration_secs("WS_WRITE_TIMEOUT") {
        settings.realtime.write_timeout_secs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("LOG_LEVEL") {
        settings.log.level = v.to_lowercase();
    }
    if let Some(v) = env.string("LOG_FORMAT") {
        match parse_log_format(&v) {
            Some(format) => settings.log.format = format,
            None => warn!(key = "LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
    if let Some(v) = env.string("LOG_OUTPUT") {
        settings.log.output = LogOutput::from(v);
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a duration: `500ms`, `30s`, `5m`, `1h`, or bare seconds.
pub fn parse_duration(val: &str) -> Option<Duration> {
    let val = val.trim();
    let split = val.find(|c: char| !c.is_ascii_digit()).unwrap_or(val.len());
    let (digits, unit) = val.split_at(split);
    let n: u64 = digits.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(n)),
        "" | "s" => Some(Duration::from_secs(n)),
        "m" => n.checked_mul(60).map(Duration::from_secs),
        "h" => n.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}

/// Parse a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Parse a log format name.
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_lowercase().as_str() {
        "console" | "text" => Some(LogFormat::Console),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_range(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }

    /// Whole seconds; sub-second values round up so they never become zero.
    fn duration_secs(&self, name: &str) -> Option<u64> {
        let val = self.string(name)?;
        let Some(d) = parse_duration(&val) else {
            warn!(key = name, value = %val, "invalid duration env var, ignoring");
            return None;
        };
        let secs = d.as_secs();
        Some(if d.subsec_nanos() > 0 { secs + 1 } else { secs })
    }

    fn list(&self, name: &str) -> Option<Vec<String>> {
        let list = parse_list(&self.string(name)?);
        (!list.is_empty()).then_some(list)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

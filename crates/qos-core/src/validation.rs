//! Field validation for admin API input.
//!
//! Every check returns a [`ValidationError`] whose message can be shown to
//! the caller as-is.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::ValidationError;
use crate::models::{
    AppConfig, ClusterConfig, ConnectionLimit, DEFAULT_EMERGENCY_DURATION_SECS,
    DEFAULT_EMERGENCY_REASON, EmergencyRequest, MAX_EMERGENCY_DURATION_SECS,
};

/// Longest accepted app/cluster identifier.
pub const MAX_ID_LENGTH: usize = 100;
/// Shortest accepted username.
pub const MIN_USERNAME_LENGTH: usize = 3;
/// Longest accepted username.
pub const MAX_USERNAME_LENGTH: usize = 50;
/// Shortest accepted password.
pub const MIN_PASSWORD_LENGTH: usize = 8;
/// Longest accepted password.
pub const MAX_PASSWORD_LENGTH: usize = 100;
/// Longest stored emergency reason, in characters.
pub const MAX_REASON_LENGTH: usize = 500;
/// Highest (least urgent) app priority.
pub const MAX_PRIORITY: i32 = 3;

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap());

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Validate an app or cluster identifier.
pub fn validate_id(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if value.chars().count() > MAX_ID_LENGTH {
        return Err(ValidationError::TooLong {
            field,
            max: MAX_ID_LENGTH,
        });
    }
    if !ID_PATTERN.is_match(value) {
        return Err(ValidationError::InvalidFormat {
            field,
            reason: "can only contain letters, numbers, hyphens, and underscores",
        });
    }
    Ok(())
}

/// Validate an app config after defaults have been applied.
pub fn validate_app_config(app: &AppConfig) -> Result<(), ValidationError> {
    validate_id("app_id", &app.app_id)?;
    if app.guaranteed_quota <= 0 {
        return Err(ValidationError::OutOfRange {
            field: "guaranteed_quota",
            reason: "must be positive",
        });
    }
    if app.burst_quota < app.guaranteed_quota {
        return Err(ValidationError::OutOfRange {
            field: "burst_quota",
            reason: "must be greater than or equal to guaranteed quota",
        });
    }
    if !(0..=MAX_PRIORITY).contains(&app.priority) {
        return Err(ValidationError::OutOfRange {
            field: "priority",
            reason: "must be between 0 and 3",
        });
    }
    if app.max_borrow < 0 {
        return Err(ValidationError::OutOfRange {
            field: "max_borrow",
            reason: "cannot be negative",
        });
    }
    if app.max_connections < 0 {
        return Err(ValidationError::OutOfRange {
            field: "max_connections",
            reason: "cannot be negative",
        });
    }
    Ok(())
}

/// Validate a cluster config after defaults have been applied.
pub fn validate_cluster_config(cluster: &ClusterConfig) -> Result<(), ValidationError> {
    validate_id("cluster_id", &cluster.cluster_id)?;
    if cluster.max_capacity <= 0 {
        return Err(ValidationError::OutOfRange {
            field: "max_capacity",
            reason: "must be positive",
        });
    }
    if !(0.0..=1.0).contains(&cluster.reserved_ratio) {
        return Err(ValidationError::OutOfRange {
            field: "reserved_ratio",
            reason: "must be between 0 and 1",
        });
    }
    if !(0.0..=1.0).contains(&cluster.emergency_threshold) {
        return Err(ValidationError::OutOfRange {
            field: "emergency_threshold",
            reason: "must be between 0 and 1",
        });
    }
    if cluster.reserved_ratio >= cluster.emergency_threshold {
        return Err(ValidationError::OutOfRange {
            field: "reserved_ratio",
            reason: "must be less than emergency threshold",
        });
    }
    if cluster.max_connections < 0 {
        return Err(ValidationError::OutOfRange {
            field: "max_connections",
            reason: "cannot be negative",
        });
    }
    Ok(())
}

/// Validate a connection-limit change.
pub fn validate_connection_limit(limit: &ConnectionLimit) -> Result<(), ValidationError> {
    validate_id("target_id", &limit.target_id)?;
    if limit.limit < 1 {
        return Err(ValidationError::OutOfRange {
            field: "limit",
            reason: "must be at least 1",
        });
    }
    Ok(())
}

/// Validate a login username.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ValidationError::Empty { field: "username" });
    }
    let len = username.chars().count();
    if len < MIN_USERNAME_LENGTH {
        return Err(ValidationError::TooShort {
            field: "username",
            min: MIN_USERNAME_LENGTH,
        });
    }
    if len > MAX_USERNAME_LENGTH {
        return Err(ValidationError::TooLong {
            field: "username",
            max: MAX_USERNAME_LENGTH,
        });
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(ValidationError::InvalidFormat {
            field: "username",
            reason: "contains invalid characters",
        });
    }
    Ok(())
}

/// Validate a login password.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::Empty { field: "password" });
    }
    let len = password.chars().count();
    if len < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::TooShort {
            field: "password",
            min: MIN_PASSWORD_LENGTH,
        });
    }
    if len > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::TooLong {
            field: "password",
            max: MAX_PASSWORD_LENGTH,
        });
    }
    if !password.chars().any(char::is_alphabetic) {
        return Err(ValidationError::InvalidFormat {
            field: "password",
            reason: "must contain at least one letter",
        });
    }
    if !password.chars().any(char::is_numeric) {
        return Err(ValidationError::InvalidFormat {
            field: "password",
            reason: "must contain at least one digit",
        });
    }
    Ok(())
}

/// Trim, collapse whitespace runs, and cap at [`MAX_REASON_LENGTH`] characters.
pub fn sanitize_reason(reason: &str) -> String {
    let collapsed = WHITESPACE_RUN.replace_all(reason.trim(), " ");
    collapsed.chars().take(MAX_REASON_LENGTH).collect()
}

/// Resolve an activation request into `(reason, duration_secs)`.
///
/// An empty reason becomes [`DEFAULT_EMERGENCY_REASON`]; a zero duration
/// becomes [`DEFAULT_EMERGENCY_DURATION_SECS`].
pub fn normalize_emergency_request(
    req: &EmergencyRequest,
) -> Result<(String, i64), ValidationError> {
    let mut reason = sanitize_reason(&req.reason);
    if reason.is_empty() {
        reason = DEFAULT_EMERGENCY_REASON.to_string();
    }
    let duration = match req.duration {
        0 => DEFAULT_EMERGENCY_DURATION_SECS,
        d if d < 0 => {
            return Err(ValidationError::OutOfRange {
                field: "duration",
                reason: "must be positive",
            });
        }
        d if d > MAX_EMERGENCY_DURATION_SECS => {
            return Err(ValidationError::OutOfRange {
                field: "duration",
                reason: "must not exceed 24 hours (86400 seconds)",
            });
        }
        d => d,
    };
    Ok((reason, duration))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

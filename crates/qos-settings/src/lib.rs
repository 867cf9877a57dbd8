//! # qos-settings
//!
//! Layered configuration for the QoS admin plane.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`AdminSettings::default()`]
//! 2. **Settings file**: optional JSON, deep-merged over defaults
//! 3. **Environment variables**: `PORT`, `JWT_SECRET`, `RATE_LIMIT_*`, ... (highest priority)
//!
//! The result is validated before it is returned; a server never starts
//! with a non-positive limiter budget or a short signing secret.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_with, parse_duration};
pub use types::*;

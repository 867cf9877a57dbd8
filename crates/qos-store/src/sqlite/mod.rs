//! `SQLite` backend for the admin store.
//!
//! - **[`connection`]**: `r2d2` pool with WAL and busy-timeout pragmas.
//! - **[`migrations`]**: embedded, version-tracked schema.
//! - **[`store`]**: [`SqliteStore`], implementing the config and metrics traits.

pub mod connection;
pub mod migrations;
pub mod store;

pub use connection::{ConnectionConfig, ConnectionPool, MEMORY_PATH, new_file, new_in_memory};
pub use migrations::{current_version, latest_version, run_migrations};
pub use store::SqliteStore;

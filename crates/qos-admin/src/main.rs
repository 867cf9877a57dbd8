//! # qos-admin
//!
//! Admin server binary: wires settings, logging, the store and the server,
//! then runs until Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use qos_core::logging::init_subscriber;
use qos_settings::{AdminSettings, DEMO_ADMIN_PASSWORD, load_settings};
use qos_server::{AdminServer, JwtAuthority, ServerConfig, shutdown_signal};
use qos_store::{ConnectionConfig, PubSubHub, SqliteStore};
use tracing::{info, warn};

/// QoS gateway admin server.
#[derive(Parser, Debug)]
#[command(name = "qos-admin", about = "QoS gateway admin server", version)]
struct Cli {
    /// JSON settings file, merged over the defaults.
    #[arg(long, env = "QOS_ADMIN_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// `SQLite` database path, or `:memory:` (overrides settings).
    #[arg(long)]
    db_path: Option<String>,

    /// Log level: debug, info, warn or error (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut AdminSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(db_path) = &self.db_path {
            settings.store.db_path.clone_from(db_path);
        }
        if let Some(level) = &self.log_level {
            settings.log.level.clone_from(level);
        }
    }
}

fn load(cli: &Cli) -> Result<AdminSettings> {
    let mut settings = load_settings(cli.config.as_deref()).context("failed to load settings")?;
    cli.apply(&mut settings);
    settings.validate().context("invalid command-line overrides")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    init_subscriber(&settings.log.level, settings.log.format, &settings.log.output)
        .context("failed to initialise logging")?;
    if settings.auth.admin_password == DEMO_ADMIN_PASSWORD {
        warn!("admin password is the demo default; set ADMIN_PASSWORD");
    }

    let prometheus =
        qos_server::metrics::install_recorder().context("failed to install metrics recorder")?;

    let hub = Arc::new(PubSubHub::new(settings.realtime.subscription_buffer));
    let store_config = ConnectionConfig {
        pool_size: settings.store.pool_size,
        busy_timeout_ms: settings.store.busy_timeout_ms,
    };
    let store_path = settings.store.db_path.clone();
    let events = hub.clone();
    let store = tokio::task::spawn_blocking(move || SqliteStore::open(&store_path, &store_config, events))
        .await
        .context("store open task failed")?
        .with_context(|| format!("failed to open store at {}", settings.store.db_path))?;
    let store = Arc::new(store);

    let config = ServerConfig::from_settings(&settings).context("invalid rate limit settings")?;
    let server = AdminServer::new(
        config,
        store.clone(),
        hub.clone(),
        store,
        JwtAuthority::new(&settings.jwt),
        settings.auth.clone(),
    )
    .with_cors(settings.cors.clone())
    .with_prometheus(prometheus);

    let listener = server.bind().await?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        db_path = %settings.store.db_path,
        "qos-admin starting"
    );
    server.serve(listener, shutdown_signal()).await?;

    hub.close();
    info!("qos-admin exited cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("qos-admin").chain(args.iter().copied()))
    }

    #[test]
    fn overrides_apply_on_top_of_settings() {
        let mut settings = AdminSettings::default();
        cli(&["--host", "127.0.0.1", "--port", "9000", "--db-path", ":memory:", "--log-level", "debug"])
            .apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.store.db_path, ":memory:");
        assert_eq!(settings.log.level, "debug");
    }

    #[test]
    fn no_flags_leave_settings_untouched() {
        let mut settings = AdminSettings::default();
        cli(&[]).apply(&mut settings);
        assert_eq!(settings, AdminSettings::default());
    }

    #[test]
    fn config_file_is_loaded_and_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"jwt": {"secret": "a-file-secret-that-is-long-enough-000"}, "server": {"port": 9100}}"#,
        )
        .unwrap();
        let cli = cli(&["--config", path.to_str().unwrap(), "--port", "9200"]);
        let settings = load(&cli).unwrap();
        assert_eq!(settings.server.port, 9200);
    }

    #[test]
    fn invalid_override_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"jwt": {"secret": "a-file-secret-that-is-long-enough-000"}}"#,
        )
        .unwrap();
        let cli = cli(&["--config", path.to_str().unwrap(), "--log-level", "verbose"]);
        assert!(load(&cli).is_err());
    }
}

//! Structured logging setup with `tracing`.
//!
//! [`init_subscriber`] installs the global subscriber once at startup.
//! `RUST_LOG` wins over the configured level when set.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Accepted level names.
pub const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

/// Line format of emitted logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Console,
    /// One JSON object per line.
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogOutput {
    /// Standard error.
    #[default]
    Stderr,
    /// Standard output.
    Stdout,
    /// Append to a file.
    File(PathBuf),
}

impl From<String> for LogOutput {
    fn from(s: String) -> Self {
        match s.as_str() {
            "" | "stderr" => Self::Stderr,
            "stdout" => Self::Stdout,
            _ => Self::File(PathBuf::from(s)),
        }
    }
}

impl From<LogOutput> for String {
    fn from(out: LogOutput) -> Self {
        match out {
            LogOutput::Stderr => "stderr".into(),
            LogOutput::Stdout => "stdout".into(),
            LogOutput::File(path) => path.to_string_lossy().into_owned(),
        }
    }
}

/// Whether `level` is one of [`LOG_LEVELS`].
pub fn is_valid_level(level: &str) -> bool {
    LOG_LEVELS.contains(&level)
}

/// Initialize the global tracing subscriber.
///
/// Subsequent calls are no-ops. Fails only when a log file cannot be opened.
pub fn init_subscriber(level: &str, format: LogFormat, output: &LogOutput) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = make_writer(output)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(writer);

    // try_init is a no-op if a global subscriber is already set
    let _ = match format {
        LogFormat::Console => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    Ok(())
}

fn make_writer(output: &LogOutput) -> std::io::Result<BoxMakeWriter> {
    Ok(match output {
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
    })
}

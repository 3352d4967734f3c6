//! Tracing subscriber setup for the binary.
//!
//! Logs go to stderr since stdout may carry the protocol itself. When a log
//! file is configured every event is mirrored there as well.
use crate::cli::Config;
use crate::lsp::WIRE_TARGET;
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::Mutex;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(String),
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

/// Filter directive for `config`: `RUST_LOG` wins over `--log-filter`, and
/// `--trace` always enables the wire target on top.
fn filter_directive(config: &Config, env: Option<String>) -> String {
    let base = env
        .filter(|directive| !directive.trim().is_empty())
        .unwrap_or_else(|| config.log_filter.clone());
    if config.trace {
        format!("{},{}=trace", base, WIRE_TARGET)
    } else {
        base
    }
}

fn open_log_file(path: &Path) -> Result<File, TelemetryError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| TelemetryError::LogFile {
            path: path.display().to_string(),
            source,
        })
}

pub fn init(config: &Config) -> Result<(), TelemetryError> {
    let directive = filter_directive(config, std::env::var(EnvFilter::DEFAULT_ENV).ok());
    let filter =
        EnvFilter::try_new(&directive).map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let (writer, ansi) = match &config.logfile {
        Some(path) => {
            let file = open_log_file(path)?;
            (BoxMakeWriter::new(io::stderr.and(Mutex::new(file))), false)
        }
        None => (BoxMakeWriter::new(io::stderr), io::stderr().is_terminal()),
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(writer)
        .with_ansi(ansi)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

//! # Observability
//!
//! Logging setup shared by the embed sync binaries.
//!
//! Binaries call [`init_with_config`] once at startup and otherwise use the
//! plain `tracing` macros. Every event is appended as one JSON object per
//! line to a log file (`~/.fcgraph/logs/embeds.jsonl` unless configured),
//! which can be followed with `tail -f ... | jq`. A compact human-readable
//! copy can additionally go to stderr.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "embeds-sync".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! })?;
//! tracing::info!("ready");
//! ```

mod json_layer;
mod writer;

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::{default_log_path, LogFileWriter};

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Written as `service` on every line.
    pub service_name: String,

    /// Default filter (e.g. "debug", "info,embeds_database=warn").
    /// `RUST_LOG` takes precedence when set.
    pub default_level: String,

    /// Log file; [`default_log_path`] when `None`.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Why logging could not be installed.
#[derive(Error, Debug)]
pub enum InitError {
    /// The log file could not be opened.
    #[error("failed to open log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A global subscriber is already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber. Returns the log file in use.
pub fn init_with_config(config: LogConfig) -> Result<PathBuf, InitError> {
    let log_path = config.log_path.clone().unwrap_or_else(default_log_path);
    let writer = LogFileWriter::open(&log_path).map_err(|source| InitError::LogFile {
        path: log_path.clone(),
        source,
    })?;

    let json_layer = JsonLayer::new(config.service_name.clone(), writer)
        .with_filter(env_filter(&config.default_level));

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| InitError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        log_path = %log_path.display(),
        "observability initialized"
    );
    Ok(log_path)
}

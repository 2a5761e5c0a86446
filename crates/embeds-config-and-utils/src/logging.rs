//! Logging initialization for the sync binaries.
//!
//! Wraps [`observability::init_with_config`]: JSONL lines go to the log
//! file and a compact copy goes to stderr.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

const SERVICE_NAME: &str = "embeds-sync";

/// Initialize logging at `level` (overridden by `RUST_LOG`).
///
/// `log_path` defaults to `~/.fcgraph/logs/embeds.jsonl`. Returns the file
/// in use.
pub fn init_logging(level: &str, log_path: Option<PathBuf>) -> CoreResult<PathBuf> {
    observability::init_with_config(observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: parse_level(level).as_str().to_ascii_lowercase(),
        log_path,
        also_stderr: true,
    })
    .map_err(|e| CoreError::Config(e.to_string()))
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_all_variants() {
        assert_eq!(parse_level("trace"), tracing::Level::TRACE);
        assert_eq!(parse_level("debug"), tracing::Level::DEBUG);
        assert_eq!(parse_level("info"), tracing::Level::INFO);
        assert_eq!(parse_level("warn"), tracing::Level::WARN);
        assert_eq!(parse_level("warning"), tracing::Level::WARN);
        assert_eq!(parse_level("error"), tracing::Level::ERROR);
    }

    #[test]
    fn parse_level_case_and_whitespace() {
        assert_eq!(parse_level(" DEBUG "), tracing::Level::DEBUG);
        assert_eq!(parse_level("Warning"), tracing::Level::WARN);
    }

    #[test]
    fn parse_level_unknown_defaults_to_info() {
        assert_eq!(parse_level(""), tracing::Level::INFO);
        assert_eq!(parse_level("verbose"), tracing::Level::INFO);
    }
}

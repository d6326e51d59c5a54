//! Logging initialization.
//!
//! Thin wrapper over the observability crate: compact stderr output plus an
//! optional JSONL file when `MIKASA_LOG_FILE` is set.

use crate::Config;
use observability::LogConfig;
use std::path::PathBuf;

/// Initialize logging with the default service name.
///
/// - Log level from RUST_LOG env var or the provided default
/// - JSONL output to `MIKASA_LOG_FILE` when that variable is set
///
/// # Example
///
/// ```ignore
/// init_logging("info")?;
/// tracing::info!("session engine ready");
/// ```
pub fn init_logging(level: &str) -> std::io::Result<()> {
    init_logging_for_service("mikasa", level)
}

/// Initialize logging at the level configured in `config`.
pub fn init_logging_from_config(config: &Config) -> std::io::Result<()> {
    init_logging(&config.log_level)
}

/// Initialize logging with a custom service name.
///
/// Use this when several processes share one JSONL file and need to be told
/// apart.
pub fn init_logging_for_service(service_name: &str, level: &str) -> std::io::Result<()> {
    let log_path = std::env::var("MIKASA_LOG_FILE")
        .ok()
        .and_then(non_empty_env)
        .map(PathBuf::from);

    observability::init_with_config(LogConfig {
        service_name: service_name.into(),
        default_level: level.into(),
        log_path,
        also_stderr: true,
    })
}

fn non_empty_env(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

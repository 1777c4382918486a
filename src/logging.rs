//! Logging setup
//!
//! Logs go to stderr by default, or to a daily-rotated file when
//! `logging.file` is configured.

use crate::config::{expand_path, LoggingConfig};
use crate::error::{CoreError, Result};
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Guard that keeps the non-blocking file writer alive
///
/// When dropped, flushes any pending log writes.
pub struct LoggingGuard {
    _guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize the global subscriber.
///
/// RUST_LOG takes precedence; otherwise `verbose` logs at the configured
/// level (or `debug` when `verbose` is set).
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<LoggingGuard> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("verbose={}", level)));

    let registry = tracing_subscriber::registry().with(filter);

    let guard = match &config.file {
        Some(file) => {
            let (dir, name) = split_log_path(&expand_path(file))?;
            std::fs::create_dir_all(&dir)?;

            let appender = RollingFileAppender::new(Rotation::DAILY, &dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
                .try_init()
                .map_err(|e| CoreError::Config(format!("Failed to initialize logging: {}", e)))?;

            tracing::info!(log_file = %file.display(), level = %level, "Logging initialized");
            Some(guard)
        }
        None => {
            registry
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| CoreError::Config(format!("Failed to initialize logging: {}", e)))?;
            None
        }
    };

    Ok(LoggingGuard { _guard: guard })
}

/// Initialize logging for tests (logs to the test writer)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Split a log file path into its directory and file name
fn split_log_path(path: &Path) -> Result<(PathBuf, String)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CoreError::Config(format!("Invalid log file path: {}", path.display())))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, name.to_string()))
}

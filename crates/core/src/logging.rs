//! Logging setup: a user-visible console channel plus a persistent log file.
//!
//! The console layer follows the configured [`Verbosity`] (or `RUST_LOG` when
//! set). The file layer always records everything down to DEBUG, so a
//! silent run still leaves a full trace behind.

use crate::config::Verbosity;
use crate::error::{BatchError, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Name of the persistent log file.
pub const LOG_FILE_NAME: &str = "doc-batch.log";

/// Keeps the background log writer alive. Drop it last.
#[derive(Debug)]
pub struct LogGuard {
    _guard: Option<WorkerGuard>,
    log_path: Option<PathBuf>,
}

impl LogGuard {
    /// Path of the persistent log file, if one was configured.
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }
}

/// Default directory for the persistent log.
pub fn default_log_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "doc-batch").map(|dirs| dirs.data_local_dir().join("logs"))
}

/// Filter directive for the console at a given verbosity.
fn console_directive(verbosity: Verbosity) -> &'static str {
    match verbosity {
        Verbosity::Silent => "error",
        Verbosity::Info => "info",
        Verbosity::Debug => "debug",
    }
}

/// Install the global subscriber.
///
/// With `log_dir` set, a non-blocking file layer appends to
/// `<log_dir>/doc-batch.log`. Fails if a global subscriber is already set.
pub fn init_logging(verbosity: Verbosity, log_dir: Option<&Path>) -> Result<LogGuard> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directive(verbosity)));

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let (file, guard, log_path) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|e| {
                BatchError::Logging(format!("cannot create log directory {:?}: {}", dir, e))
            })?;
            let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG);
            (Some(layer), Some(guard), Some(dir.join(LOG_FILE_NAME)))
        }
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| BatchError::Logging(e.to_string()))?;

    Ok(LogGuard {
        _guard: guard,
        log_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_directive() {
        assert_eq!(console_directive(Verbosity::Silent), "error");
        assert_eq!(console_directive(Verbosity::Info), "info");
        assert_eq!(console_directive(Verbosity::Debug), "debug");
    }

    #[test]
    fn test_default_log_dir() {
        if let Some(dir) = default_log_dir() {
            assert!(dir.ends_with("logs"));
        }
    }
}

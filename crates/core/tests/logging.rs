//! Logging setup tests. Kept in their own binary because the subscriber is
//! process-global and can only be installed once.

use doc_batch_core::logging::LOG_FILE_NAME;
use doc_batch_core::{init_logging, BatchError, Verbosity};
use std::fs;
use tempfile::TempDir;

// ========== File layer tests ==========

#[test]
fn test_silent_console_still_writes_debug_to_file() {
    let dir = TempDir::new().unwrap();
    let log_dir = dir.path().join("logs");

    let guard = init_logging(Verbosity::Silent, Some(&log_dir)).unwrap();
    assert_eq!(guard.log_path(), Some(log_dir.join(LOG_FILE_NAME).as_path()));

    tracing::debug!("discovered 3 tasks under the input root");
    tracing::info!("batch finished");

    // A second subscriber cannot be installed
    let second = init_logging(Verbosity::Info, None);
    assert!(matches!(second, Err(BatchError::Logging(_))));

    // Dropping the guard flushes the background writer
    drop(guard);

    let contents = fs::read_to_string(log_dir.join(LOG_FILE_NAME)).unwrap();
    let debug_line = contents
        .lines()
        .find(|line| line.contains("discovered 3 tasks under the input root"))
        .expect("debug event missing from log file");
    assert!(debug_line.contains("DEBUG"));
    assert!(contents.contains("batch finished"));
    assert!(!contents.contains("\u{1b}["));
}

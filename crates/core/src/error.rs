//! Error types for batch document conversion.
//!
//! Errors are split in two layers. [`BatchError`] is fatal and stops a run
//! before any task starts. [`ConversionError`] belongs to a single task: it is
//! recorded in that task's result and the run moves on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors surfaced to the caller before (or instead of) a run.
#[derive(Error, Debug)]
pub enum BatchError {
    /// Invalid configuration value or combination.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Input root missing, not a directory, or unreadable.
    #[error("Discovery failed for '{path}': {message}")]
    Discovery { path: PathBuf, message: String },

    /// Settings file could not be written.
    #[error("Failed to save settings to '{path}': {message}")]
    Settings { path: PathBuf, message: String },

    /// A run is already in progress on this orchestrator.
    #[error("A batch run is already in progress")]
    AlreadyRunning,

    /// The background run task panicked or was aborted.
    #[error("Batch worker failed: {0}")]
    Worker(String),

    /// Log output could not be set up.
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, BatchError>;

impl BatchError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        BatchError::Configuration(message.into())
    }
}

/// Result of a single task's conversion step.
pub type TaskResult<T> = std::result::Result<T, ConversionError>;

/// Per-task conversion failure. Never aborts a run.
#[derive(Error, Debug, Clone)]
pub enum ConversionError {
    /// The conversion engine is not installed or could not be started.
    #[error("Conversion engine not found: {0}")]
    EngineNotFound(String),

    /// The engine ran but reported failure, or produced no usable output.
    #[error("Engine failed for '{path}'{}: {message}", exit_suffix(.code))]
    EngineInvocationFailed {
        path: PathBuf,
        code: Option<i32>,
        message: String,
    },

    /// The file extension is not handled by the engine.
    #[error("Unsupported file format: '{extension}'")]
    UnsupportedFormat { extension: String },

    /// Writing the destination (or its parent directories) failed.
    #[error("Failed to write output '{path}': {message}")]
    OutputWriteFailed { path: PathBuf, message: String },

    /// The engine exceeded the per-file time budget.
    #[error("Conversion timed out after {timeout_secs} seconds for '{path}'")]
    Timeout { path: PathBuf, timeout_secs: u64 },
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" (exit status {})", code),
        None => String::new(),
    }
}

impl ConversionError {
    /// The serializable kind of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            ConversionError::EngineNotFound(_) => FailureKind::EngineNotFound,
            ConversionError::EngineInvocationFailed { .. } => FailureKind::EngineInvocationFailed,
            ConversionError::UnsupportedFormat { .. } => FailureKind::UnsupportedFormat,
            ConversionError::OutputWriteFailed { .. } => FailureKind::OutputWriteFailed,
            ConversionError::Timeout { .. } => FailureKind::Timeout,
        }
    }
}

/// Kind of a per-task failure, as recorded in a [`crate::ConversionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    EngineNotFound,
    EngineInvocationFailed,
    UnsupportedFormat,
    OutputWriteFailed,
    Timeout,
}

impl FailureKind {
    /// Whether the orchestrator may retry a task that failed this way.
    ///
    /// A missing engine or an unsupported extension fails the same way every
    /// time, so those are never retried.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::EngineInvocationFailed | FailureKind::OutputWriteFailed | FailureKind::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::EngineNotFound => "EngineNotFound",
            FailureKind::EngineInvocationFailed => "EngineInvocationFailed",
            FailureKind::UnsupportedFormat => "UnsupportedFormat",
            FailureKind::OutputWriteFailed => "OutputWriteFailed",
            FailureKind::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

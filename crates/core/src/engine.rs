//! External conversion engine boundary.
//!
//! An [`Engine`] converts exactly one source file into one destination file.
//! It is treated as a black box: the orchestrator only sees success or a
//! [`ConversionError`]. [`DoclingEngine`] drives the `docling` command line
//! tool, one isolated process per file.

use crate::config::{ConversionConfig, ExportFormat, OcrEngine, OcrMode, TableMode, Verbosity};
use crate::error::{ConversionError, TaskResult};
use crate::task::ConversionTask;
use async_process::{Command, Stdio};
use std::ffi::OsString;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Parameters of one engine invocation.
#[derive(Debug, Clone)]
pub struct EngineRequest<'a> {
    pub source: &'a Path,
    pub destination: &'a Path,
    pub export_format: ExportFormat,
    pub table_mode: TableMode,
    pub ocr_mode: OcrMode,
    pub ocr_engine: OcrEngine,
    pub verbosity: Verbosity,
}

impl<'a> EngineRequest<'a> {
    pub fn new(task: &'a ConversionTask, config: &ConversionConfig) -> Self {
        Self {
            source: &task.source,
            destination: &task.destination,
            export_format: config.export_format,
            table_mode: config.table_mode,
            ocr_mode: config.ocr_mode,
            ocr_engine: config.ocr_engine,
            verbosity: config.verbosity,
        }
    }
}

/// A document conversion engine.
///
/// `convert` must either leave the converted document at
/// `request.destination` and return `Ok`, or return an error. The destination's
/// parent directory already exists when it is called.
pub trait Engine: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether the engine can be invoked at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Whether the engine accepts files with this (lowercase) extension.
    fn supports_extension(&self, ext: &str) -> bool {
        crate::is_supported_extension(ext)
    }

    fn convert(&self, request: &EngineRequest<'_>) -> impl Future<Output = TaskResult<()>> + Send;
}

/// Max bytes of engine output kept in a failure message.
const DIAGNOSTIC_LIMIT: usize = 4096;

/// Engine backed by the `docling` command line tool.
#[derive(Debug, Clone)]
pub struct DoclingEngine {
    /// Resolved binary, or why it could not be resolved.
    program: Result<PathBuf, String>,
}

impl DoclingEngine {
    /// Name of the binary searched on PATH.
    pub const BINARY: &'static str = "docling";

    /// Resolve the engine from the config's `engine_path`, or PATH.
    ///
    /// Never fails: an unresolvable engine surfaces as
    /// [`ConversionError::EngineNotFound`] on each invocation.
    pub fn new(config: &ConversionConfig) -> Self {
        let program = Self::find_docling(config.engine_path.as_deref());
        match program {
            Ok(ref path) => info!("Found docling at: {:?}", path),
            Err(ref reason) => warn!("docling not available: {}", reason),
        }
        Self { program }
    }

    /// Use this exact binary.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Ok(program.into()),
        }
    }

    /// The resolved binary, if any.
    pub fn program(&self) -> Option<&Path> {
        self.program.as_deref().ok()
    }

    fn find_docling(explicit: Option<&Path>) -> Result<PathBuf, String> {
        // Check if explicit path is provided
        if let Some(path) = explicit {
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
            return Err(format!("'{}' does not exist", path.display()));
        }

        // Try PATH
        if let Ok(path) = which::which(Self::BINARY) {
            return Ok(path);
        }

        // pip --user installs land here and are often missing from PATH
        let user_bin = directories::BaseDirs::new()
            .and_then(|dirs| dirs.executable_dir().map(|d| d.join(Self::BINARY)));
        match user_bin {
            Some(path) if path.is_file() => Ok(path),
            _ => Err(format!("'{}' not found in PATH", Self::BINARY)),
        }
    }

    /// Command line arguments for one invocation writing into `output_dir`.
    pub fn build_args(request: &EngineRequest<'_>, output_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            request.source.into(),
            "--to".into(),
            request.export_format.as_str().into(),
            "--output".into(),
            output_dir.into(),
            "--table-mode".into(),
            request.table_mode.as_str().into(),
            "--ocr-engine".into(),
            request.ocr_engine.as_str().into(),
        ];
        args.extend(request.ocr_mode.engine_args().iter().map(OsString::from));
        if let Some(flag) = request.verbosity.engine_flag() {
            args.push(flag.into());
        }
        args
    }

    /// Locate the file docling wrote into the staging directory.
    fn find_output(staging: &Path, request: &EngineRequest<'_>) -> Option<PathBuf> {
        let stem = request.source.file_stem()?;
        let mut expected = OsString::from(stem);
        expected.push(".");
        expected.push(request.export_format.extension());
        let expected = staging.join(expected);
        if expected.is_file() {
            return Some(expected);
        }

        // docling might have picked a different extension; the stem must still match
        let mut produced: Vec<PathBuf> = std::fs::read_dir(staging)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.file_stem() == Some(stem))
            .collect();
        produced.sort();
        produced.into_iter().next()
    }

    fn place_output(produced: &Path, destination: &Path) -> TaskResult<()> {
        if std::fs::rename(produced, destination).is_ok() {
            return Ok(());
        }
        std::fs::copy(produced, destination)
            .map(|_| ())
            .map_err(|e| ConversionError::OutputWriteFailed {
                path: destination.to_path_buf(),
                message: e.to_string(),
            })
    }
}

impl Engine for DoclingEngine {
    fn name(&self) -> &str {
        Self::BINARY
    }

    fn is_available(&self) -> bool {
        self.program.is_ok()
    }

    async fn convert(&self, request: &EngineRequest<'_>) -> TaskResult<()> {
        let program = self
            .program
            .as_ref()
            .map_err(|reason| ConversionError::EngineNotFound(reason.clone()))?;
        let start = Instant::now();

        // Stage next to the destination so the final move is a rename on the
        // same filesystem. The leading dot keeps discovery away from it.
        let parent = request.destination.parent().unwrap_or_else(|| Path::new("."));
        let staging = tempfile::Builder::new()
            .prefix(".doc-batch-")
            .tempdir_in(parent)
            .map_err(|e| ConversionError::OutputWriteFailed {
                path: parent.to_path_buf(),
                message: e.to_string(),
            })?;

        let args = Self::build_args(request, staging.path());
        debug!(
            "Running command: {} {}",
            program.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut cmd = Command::new(program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timed-out invocation is dropped by the invoker; take the
            // process down with it.
            .kill_on_drop(true);

        let output = cmd.output().await.map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                ConversionError::EngineNotFound(format!("{}: {}", program.display(), e))
            }
            _ => ConversionError::EngineInvocationFailed {
                path: request.source.to_path_buf(),
                code: None,
                message: format!("failed to start engine: {}", e),
            },
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        // Check exit status
        if !output.status.success() {
            let diagnostic = if !stderr.trim().is_empty() {
                stderr.trim()
            } else if !stdout.trim().is_empty() {
                stdout.trim()
            } else {
                "no error output"
            };
            return Err(ConversionError::EngineInvocationFailed {
                path: request.source.to_path_buf(),
                code: output.status.code(),
                message: tail(diagnostic, DIAGNOSTIC_LIMIT).to_string(),
            });
        }

        if !stderr.trim().is_empty() {
            warn!("docling stderr for {:?}:\n{}", request.source, stderr.trim_end());
        }
        if !stdout.trim().is_empty() {
            debug!("docling stdout for {:?}:\n{}", request.source, stdout.trim_end());
        }

        let produced = Self::find_output(staging.path(), request).ok_or_else(|| {
            ConversionError::EngineInvocationFailed {
                path: request.source.to_path_buf(),
                code: output.status.code(),
                message: "engine reported success but wrote no output file".to_string(),
            }
        })?;
        Self::place_output(&produced, request.destination)?;
        close_staging(staging);

        debug!(
            "docling converted {:?} in {:?}",
            request.source.file_name(),
            start.elapsed()
        );
        Ok(())
    }
}

fn close_staging(staging: TempDir) {
    let path = staging.path().to_path_buf();
    if let Err(e) = staging.close() {
        warn!("Failed to remove staging directory {:?}: {}", path, e);
    }
}

/// Last `limit` bytes of `text`, cut on a char boundary.
fn tail(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

//! One engine invocation for one task, with output verification.

use crate::config::ConversionConfig;
use crate::engine::{Engine, EngineRequest};
use crate::error::{ConversionError, TaskResult};
use crate::task::ConversionTask;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// A verified conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converted {
    pub destination: PathBuf,
    /// Size of the written output.
    pub bytes: u64,
    /// Whether the source was removed afterwards.
    pub source_deleted: bool,
}

/// Runs the engine for a single task.
///
/// Before the engine runs, the destination's parent directories are created
/// and any earlier output is moved aside. Afterwards the output must exist and
/// be non-empty; only then is the earlier output dropped and the source
/// deleted (when configured). On failure the earlier output is put back. The
/// invoker never retries.
#[derive(Debug)]
pub struct ConversionInvoker<E> {
    engine: E,
}

impl<E: Engine> ConversionInvoker<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Convert one task under `config`.
    pub async fn convert(
        &self,
        task: &ConversionTask,
        config: &ConversionConfig,
    ) -> TaskResult<Converted> {
        let extension = task.source_extension();
        if !self.engine.supports_extension(&extension) {
            return Err(ConversionError::UnsupportedFormat { extension });
        }

        let previous = prepare_destination(&task.destination)?;

        let bytes = match self.invoke(task, config).await.and_then(|()| verify_output(task)) {
            Ok(bytes) => {
                if let Some(previous) = previous {
                    previous.discard();
                }
                bytes
            }
            Err(err) => {
                if let Some(previous) = previous {
                    previous.restore();
                }
                return Err(err);
            }
        };

        let source_deleted = if config.delete_source_after_success {
            match fs::remove_file(&task.source) {
                Ok(()) => {
                    debug!("Deleted source {:?}", task.source);
                    true
                }
                Err(e) => {
                    warn!("Failed to delete source {:?}: {}", task.source, e);
                    false
                }
            }
        } else {
            false
        };

        Ok(Converted {
            destination: task.destination.clone(),
            bytes,
            source_deleted,
        })
    }

    async fn invoke(&self, task: &ConversionTask, config: &ConversionConfig) -> TaskResult<()> {
        let request = EngineRequest::new(task, config);
        let invocation = self.engine.convert(&request);
        match config.timeout_secs {
            Some(secs) => timeout(Duration::from_secs(secs), invocation)
                .await
                .map_err(|_| ConversionError::Timeout {
                    path: task.source.clone(),
                    timeout_secs: secs,
                })?,
            None => invocation.await,
        }
    }
}

/// Output of an earlier run, moved aside while the engine runs.
#[derive(Debug)]
struct PreviousOutput {
    destination: PathBuf,
    saved: PathBuf,
}

impl PreviousOutput {
    /// Drop the old output once the new one is verified.
    fn discard(self) {
        if let Err(e) = fs::remove_file(&self.saved) {
            warn!("Failed to remove previous output {:?}: {}", self.saved, e);
        }
    }

    /// Put the old output back after a failed conversion.
    fn restore(self) {
        match fs::remove_file(&self.destination) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial output {:?}: {}", self.destination, e),
        }
        match fs::rename(&self.saved, &self.destination) {
            Ok(()) => debug!("Restored previous output {:?}", self.destination),
            Err(e) => warn!(
                "Failed to restore previous output {:?} from {:?}: {}",
                self.destination, self.saved, e
            ),
        }
    }
}

fn write_failed(path: &Path, e: std::io::Error) -> ConversionError {
    ConversionError::OutputWriteFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Hidden sibling holding the previous output during a conversion.
fn saved_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    if let Some(file_name) = destination.file_name() {
        name.push(file_name);
    }
    name.push(".doc-batch-prev");
    destination.with_file_name(name)
}

/// Create the parent directories and move any earlier output aside, so a
/// leftover cannot pass verification and a failed rerun loses nothing.
fn prepare_destination(destination: &Path) -> TaskResult<Option<PreviousOutput>> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| write_failed(parent, e))?;
    }

    let saved = saved_path(destination);
    match fs::rename(destination, &saved) {
        Ok(()) => {
            debug!("Moved previous output {:?} aside", destination);
            Ok(Some(PreviousOutput {
                destination: destination.to_path_buf(),
                saved,
            }))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(write_failed(destination, e)),
    }
}

/// Destination must exist and be non-empty. Returns its size.
fn verify_output(task: &ConversionTask) -> TaskResult<u64> {
    let metadata = fs::metadata(&task.destination).map_err(|_| {
        ConversionError::EngineInvocationFailed {
            path: task.source.clone(),
            code: None,
            message: format!("engine produced no output at {:?}", task.destination),
        }
    })?;

    if !metadata.is_file() || metadata.len() == 0 {
        if metadata.is_file() {
            let _ = fs::remove_file(&task.destination);
        }
        return Err(ConversionError::EngineInvocationFailed {
            path: task.source.clone(),
            code: None,
            message: format!("engine produced an empty output at {:?}", task.destination),
        });
    }

    Ok(metadata.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Writes `payload` to the destination, or fails / sleeps on demand.
    struct StubEngine {
        payload: &'static [u8],
        fail: bool,
        delay: Option<Duration>,
    }

    impl StubEngine {
        fn writing(payload: &'static [u8]) -> Self {
            Self {
                payload,
                fail: false,
                delay: None,
            }
        }
    }

    impl Engine for StubEngine {
        fn name(&self) -> &str {
            "stub"
        }

        async fn convert(&self, request: &EngineRequest<'_>) -> TaskResult<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(ConversionError::EngineInvocationFailed {
                    path: request.source.to_path_buf(),
                    code: Some(1),
                    message: "boom".to_string(),
                });
            }
            fs::write(request.destination, self.payload).map_err(|e| write_failed(request.destination, e))
        }
    }

    struct Fixture {
        _dir: TempDir,
        config: ConversionConfig,
        task: ConversionTask,
    }

    fn fixture(name: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in");
        let output = dir.path().join("out");
        fs::create_dir_all(input.join("sub")).unwrap();
        fs::create_dir_all(&output).unwrap();
        let source = input.join("sub").join(name);
        fs::write(&source, b"source").unwrap();
        let stem = Path::new(name).file_stem().unwrap().to_string_lossy().into_owned();
        let task = ConversionTask::new(
            0,
            &source,
            Path::new("sub").join(name),
            output.join("deep").join("sub").join(format!("{}.md", stem)),
        );
        Fixture {
            config: ConversionConfig::new(input, output),
            task,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_convert_creates_missing_parents() {
        let fx = fixture("a.pdf");
        let invoker = ConversionInvoker::new(StubEngine::writing(b"# a"));

        let converted = invoker.convert(&fx.task, &fx.config).await.unwrap();
        assert_eq!(converted.destination, fx.task.destination);
        assert_eq!(converted.bytes, 3);
        assert!(!converted.source_deleted);
        assert!(fx.task.destination.is_file());
        assert!(fx.task.source.exists());
    }

    #[tokio::test]
    async fn test_zero_byte_output_is_failure() {
        let fx = fixture("a.pdf");
        let config = fx.config.clone().delete_source_after_success(true);
        let invoker = ConversionInvoker::new(StubEngine::writing(b""));

        let err = invoker.convert(&fx.task, &config).await.unwrap_err();
        assert!(matches!(err, ConversionError::EngineInvocationFailed { .. }));
        assert!(fx.task.source.exists(), "source must survive a failed conversion");
        assert!(!fx.task.destination.exists());
    }

    #[tokio::test]
    async fn test_deletes_source_only_after_success() {
        let fx = fixture("a.pdf");
        let config = fx.config.clone().delete_source_after_success(true);
        let invoker = ConversionInvoker::new(StubEngine::writing(b"# a"));

        let converted = invoker.convert(&fx.task, &config).await.unwrap();
        assert!(converted.source_deleted);
        assert!(!fx.task.source.exists());
    }

    #[tokio::test]
    async fn test_engine_failure_keeps_source() {
        let fx = fixture("a.pdf");
        let config = fx.config.clone().delete_source_after_success(true);
        let invoker = ConversionInvoker::new(StubEngine {
            fail: true,
            ..StubEngine::writing(b"# a")
        });

        let err = invoker.convert(&fx.task, &config).await.unwrap_err();
        assert_eq!(err.kind(), crate::FailureKind::EngineInvocationFailed);
        assert!(fx.task.source.exists());
    }

    fn hidden_leftovers(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .map(|e| e.path())
            .collect()
    }

    #[tokio::test]
    async fn test_failed_rerun_keeps_previous_output() {
        let fx = fixture("a.pdf");
        let first = ConversionInvoker::new(StubEngine::writing(b"# first"));
        first.convert(&fx.task, &fx.config).await.unwrap();

        let failing = ConversionInvoker::new(StubEngine {
            fail: true,
            ..StubEngine::writing(b"# second")
        });
        let err = failing.convert(&fx.task, &fx.config).await.unwrap_err();

        assert_eq!(err.kind(), crate::FailureKind::EngineInvocationFailed);
        assert_eq!(fs::read(&fx.task.destination).unwrap(), b"# first");
        assert!(hidden_leftovers(fx.task.destination.parent().unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_rerun_keeps_previous_output() {
        let fx = fixture("a.pdf");
        ConversionInvoker::new(StubEngine::writing(b"# first"))
            .convert(&fx.task, &fx.config)
            .await
            .unwrap();

        let config = fx.config.clone().timeout(Some(Duration::from_secs(1)));
        let slow = ConversionInvoker::new(StubEngine {
            delay: Some(Duration::from_secs(30)),
            ..StubEngine::writing(b"# second")
        });
        let err = slow.convert(&fx.task, &config).await.unwrap_err();

        assert_eq!(err.kind(), crate::FailureKind::Timeout);
        assert_eq!(fs::read(&fx.task.destination).unwrap(), b"# first");
    }

    #[tokio::test]
    async fn test_empty_rerun_output_restores_previous() {
        let fx = fixture("a.pdf");
        fs::create_dir_all(fx.task.destination.parent().unwrap()).unwrap();
        fs::write(&fx.task.destination, b"old output").unwrap();
        let invoker = ConversionInvoker::new(StubEngine::writing(b""));

        assert!(invoker.convert(&fx.task, &fx.config).await.is_err());
        assert_eq!(fs::read(&fx.task.destination).unwrap(), b"old output");
    }

    #[tokio::test]
    async fn test_successful_rerun_replaces_previous_output() {
        let fx = fixture("a.pdf");
        fs::create_dir_all(fx.task.destination.parent().unwrap()).unwrap();
        fs::write(&fx.task.destination, b"old output").unwrap();
        let invoker = ConversionInvoker::new(StubEngine::writing(b"# new"));

        invoker.convert(&fx.task, &fx.config).await.unwrap();
        assert_eq!(fs::read(&fx.task.destination).unwrap(), b"# new");
        assert!(hidden_leftovers(fx.task.destination.parent().unwrap()).is_empty());
    }

    #[test]
    fn test_saved_path_is_hidden_sibling() {
        let saved = saved_path(Path::new("/out/sub/a.md"));
        assert_eq!(saved, PathBuf::from("/out/sub/.a.md.doc-batch-prev"));
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let fx = fixture("notes.odt");
        let invoker = ConversionInvoker::new(StubEngine::writing(b"x"));

        match invoker.convert(&fx.task, &fx.config).await {
            Err(ConversionError::UnsupportedFormat { extension }) => assert_eq!(extension, "odt"),
            other => panic!("Expected UnsupportedFormat, got {:?}", other),
        }
        assert!(!fx.task.destination.exists());
    }

    #[tokio::test]
    async fn test_timeout() {
        let fx = fixture("slow.pdf");
        let config = fx.config.clone().timeout(Some(Duration::from_secs(1)));
        let invoker = ConversionInvoker::new(StubEngine {
            delay: Some(Duration::from_secs(30)),
            ..StubEngine::writing(b"# slow")
        });

        let err = invoker.convert(&fx.task, &config).await.unwrap_err();
        match err {
            ConversionError::Timeout { timeout_secs, .. } => assert_eq!(timeout_secs, 1),
            other => panic!("Expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sub_second_timeout_is_enforced() {
        let fx = fixture("slow.pdf");
        let config = fx.config.clone().timeout(Some(Duration::from_millis(500)));
        config.validate().unwrap();
        let invoker = ConversionInvoker::new(StubEngine {
            delay: Some(Duration::from_secs(30)),
            ..StubEngine::writing(b"# slow")
        });

        let err = invoker.convert(&fx.task, &config).await.unwrap_err();
        match err {
            ConversionError::Timeout { timeout_secs, .. } => assert_eq!(timeout_secs, 1),
            other => panic!("Expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unwritable_output_dir() {
        let fx = fixture("a.pdf");
        let blocker = fx.task.destination.parent().unwrap().parent().unwrap().to_path_buf();
        // A regular file where a directory is expected.
        fs::write(&blocker, b"not a dir").unwrap();
        let invoker = ConversionInvoker::new(StubEngine::writing(b"# a"));

        let err = invoker.convert(&fx.task, &fx.config).await.unwrap_err();
        assert_eq!(err.kind(), crate::FailureKind::OutputWriteFailed);
    }
}

//! Batch orchestrator that drives discovered tasks through the engine.
//!
//! A run moves `Idle -> Running -> Completed | Cancelled | Aborted`. Tasks run
//! with bounded concurrency (one at a time by default). Cancellation is checked
//! before each task starts; a task already running is allowed to finish. A
//! failing task never stops the run, it is recorded in the summary and the
//! next task starts.

use crate::config::ConversionConfig;
use crate::discovery::PathMirror;
use crate::engine::Engine;
use crate::error::{BatchError, Result};
use crate::invoker::ConversionInvoker;
use crate::progress::{BatchProgress, CancelSignal, ChannelSink, ProgressSink};
use crate::task::{BatchSummary, ConversionResult, ConversionTask, OutcomeKind, RunState, TaskState};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Runs batches of conversion tasks for one configuration.
#[derive(Debug)]
pub struct BatchOrchestrator<E> {
    invoker: ConversionInvoker<E>,
    config: ConversionConfig,
    state: AtomicU8,
}

impl<E: Engine> BatchOrchestrator<E> {
    pub fn new(engine: E, config: ConversionConfig) -> Self {
        Self {
            invoker: ConversionInvoker::new(engine),
            config,
            state: AtomicU8::new(RunState::Idle.to_u8()),
        }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        self.invoker.engine()
    }

    /// State of the current or most recent run.
    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: RunState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Move to `Running` unless a run is already in progress.
    fn begin(&self) -> Result<()> {
        let running = RunState::Running.to_u8();
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != running).then_some(running)
            })
            .map(|_| ())
            .map_err(|_| BatchError::AlreadyRunning)
    }

    fn abort(&self, err: BatchError) -> BatchError {
        error!("Batch run aborted: {}", err);
        self.set_state(RunState::Aborted);
        err
    }

    /// Validate the config, discover tasks under the input root, and run them.
    ///
    /// Configuration and discovery failures abort the run before any task is
    /// created; the error is returned and the state becomes `Aborted`.
    pub async fn start<S>(&self, sink: &S, cancel: &CancelSignal) -> Result<BatchSummary>
    where
        S: ProgressSink + ?Sized,
    {
        self.begin()?;
        if let Err(err) = self.config.validate() {
            return Err(self.abort(err));
        }
        let tasks = match PathMirror::from_config(&self.config).discover(&self.config.allowed_extensions) {
            Ok(tasks) => tasks,
            Err(err) => return Err(self.abort(err)),
        };
        info!(
            "Discovered {} documents under {:?}",
            tasks.len(),
            self.config.input_root
        );
        Ok(self.execute(tasks, sink, cancel).await)
    }

    /// Run an already discovered task list.
    pub async fn run<S>(
        &self,
        tasks: Vec<ConversionTask>,
        sink: &S,
        cancel: &CancelSignal,
    ) -> Result<BatchSummary>
    where
        S: ProgressSink + ?Sized,
    {
        self.begin()?;
        if let Err(err) = self.config.validate() {
            return Err(self.abort(err));
        }
        Ok(self.execute(tasks, sink, cancel).await)
    }

    async fn execute<S>(
        &self,
        tasks: Vec<ConversionTask>,
        sink: &S,
        cancel: &CancelSignal,
    ) -> BatchSummary
    where
        S: ProgressSink + ?Sized,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!("batch_run", %run_id);
        self.execute_inner(run_id, tasks, sink, cancel)
            .instrument(span)
            .await
    }

    async fn execute_inner<S>(
        &self,
        run_id: Uuid,
        tasks: Vec<ConversionTask>,
        sink: &S,
        cancel: &CancelSignal,
    ) -> BatchSummary
    where
        S: ProgressSink + ?Sized,
    {
        let start = Instant::now();
        let total = tasks.len();
        let concurrency = self.config.concurrency.max(1);

        info!(
            "Batch run started: {} files, concurrency={}, format={}, table_mode={}, ocr={}/{}, engine={}",
            total,
            concurrency,
            self.config.export_format,
            self.config.table_mode,
            self.config.ocr_mode,
            self.config.ocr_engine,
            self.engine().name()
        );

        let mut summary = BatchSummary::new(run_id, total);

        // Single aggregating context: results arrive here in completion order
        // and only this loop touches the summary.
        let mut outcomes = stream::iter(tasks)
            .map(|task| self.process(task, total, cancel))
            .buffer_unordered(concurrency);

        while let Some(result) = outcomes.next().await {
            let current = result.source.clone();
            let outcome = result.outcome;
            summary.record(result);

            if outcome != OutcomeKind::Cancelled {
                sink.on_progress(&BatchProgress {
                    current_path: Some(current),
                    completed: summary.succeeded + summary.failed,
                    total,
                    succeeded: summary.succeeded,
                    failed: summary.failed,
                    cancelled: summary.cancelled,
                    is_final: false,
                });
            }
        }
        drop(outcomes);

        let state = if cancel.is_cancelled() {
            RunState::Cancelled
        } else {
            RunState::Completed
        };
        summary.finalize(state, start.elapsed());
        self.set_state(state);

        sink.on_progress(&BatchProgress {
            current_path: None,
            completed: total,
            total,
            succeeded: summary.succeeded,
            failed: summary.failed,
            cancelled: summary.cancelled,
            is_final: true,
        });

        info!(
            "Batch run {:?} in {:?}: {} succeeded, {} failed, {} cancelled",
            state, summary.duration, summary.succeeded, summary.failed, summary.cancelled
        );
        for failure in summary.failures() {
            if let Some(ref detail) = failure.failure {
                warn!("  {:?}: {} ({})", failure.relative, detail.kind, detail.message);
            }
        }

        sink.on_complete(&summary);
        summary
    }

    /// Drive one task to a terminal state.
    async fn process(
        &self,
        mut task: ConversionTask,
        total: usize,
        cancel: &CancelSignal,
    ) -> ConversionResult {
        if cancel.is_cancelled() {
            task.transition(TaskState::Cancelled);
            debug!("Cancelled before start: {:?}", task.relative);
            return ConversionResult::cancelled(&task);
        }

        task.transition(TaskState::Running);
        info!(
            "Processing file {}/{}: {:?}",
            task.index + 1,
            total,
            task.source
        );

        let start = Instant::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.invoker.convert(&task, &self.config).await {
                Ok(converted) => {
                    task.transition(TaskState::Succeeded);
                    info!(
                        "Converted {:?} -> {:?} ({} bytes) in {:?}",
                        task.relative,
                        converted.destination,
                        converted.bytes,
                        start.elapsed()
                    );
                    return ConversionResult::succeeded(
                        &task,
                        converted.source_deleted,
                        attempts,
                        start.elapsed(),
                    );
                }
                Err(err) => {
                    let retry = err.kind().is_retryable()
                        && attempts <= self.config.max_retries
                        && !cancel.is_cancelled();
                    if retry {
                        warn!(
                            "Attempt {} for {:?} failed, retrying: {}",
                            attempts, task.relative, err
                        );
                        continue;
                    }

                    task.transition(TaskState::Failed);
                    error!("Failed to convert {:?}: {}", task.source, err);
                    return ConversionResult::failed(&task, &err, attempts, start.elapsed());
                }
            }
        }
    }
}

impl<E: Engine + 'static> BatchOrchestrator<E> {
    /// Start a run on a background tokio task.
    ///
    /// Progress arrives on [`RunHandle::progress`]; the channel closes when
    /// the run ends.
    pub fn spawn(self: &Arc<Self>) -> RunHandle {
        let (sink, progress) = ChannelSink::unbounded();
        let cancel = CancelSignal::new();
        let orchestrator = Arc::clone(self);
        let run_cancel = cancel.clone();
        let join = tokio::spawn(async move { orchestrator.start(&sink, &run_cancel).await });

        RunHandle {
            progress,
            cancel,
            join,
        }
    }
}

/// Handle to a run started with [`BatchOrchestrator::spawn`].
#[derive(Debug)]
pub struct RunHandle {
    progress: async_channel::Receiver<BatchProgress>,
    cancel: CancelSignal,
    join: JoinHandle<Result<BatchSummary>>,
}

impl RunHandle {
    /// Progress updates, ending with the final update.
    pub fn progress(&self) -> &async_channel::Receiver<BatchProgress> {
        &self.progress
    }

    /// Ask the run to stop before the next task. Idempotent.
    pub fn request_cancel(&self) {
        if self.cancel.cancel() {
            info!("Cancellation requested");
        }
    }

    /// A clone of the run's cancel signal, e.g. for a signal handler.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<BatchSummary> {
        self.join
            .await
            .map_err(|e| BatchError::Worker(e.to_string()))?
    }
}

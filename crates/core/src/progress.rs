//! Progress reporting and cooperative cancellation.

use crate::task::BatchSummary;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Progress update emitted after each finished task, plus one final update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Source of the task that just finished. `None` on the final update.
    pub current_path: Option<PathBuf>,

    /// Tasks that reached a terminal state so far.
    pub completed: usize,

    /// Total number of tasks in the run.
    pub total: usize,

    /// Tasks that succeeded so far.
    pub succeeded: usize,

    /// Tasks that failed so far.
    pub failed: usize,

    /// Tasks skipped because of cancellation.
    pub cancelled: usize,

    /// True on the single terminal update of a run.
    pub is_final: bool,
}

impl BatchProgress {
    /// Completed fraction in `0.0..=1.0`. An empty run counts as done.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    pub fn percent(&self) -> f64 {
        self.fraction() * 100.0
    }
}

/// Receiver of run progress.
///
/// Called from the orchestrator's aggregating context; implementations must
/// not block for long.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: &BatchProgress);

    /// Called once with the finalized summary.
    fn on_complete(&self, _summary: &BatchSummary) {}
}

impl<F> ProgressSink for F
where
    F: Fn(&BatchProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &BatchProgress) {
        self(progress)
    }
}

/// Sink that ignores all updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _progress: &BatchProgress) {}
}

/// Forwards progress into an unbounded channel.
///
/// The channel closes when the sink is dropped, i.e. when the run ends.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: async_channel::Sender<BatchProgress>,
}

impl ChannelSink {
    pub fn new(tx: async_channel::Sender<BatchProgress>) -> Self {
        Self { tx }
    }

    /// A sink and the receiving end of its channel.
    pub fn unbounded() -> (Self, async_channel::Receiver<BatchProgress>) {
        let (tx, rx) = async_channel::unbounded();
        (Self::new(tx), rx)
    }
}

impl ProgressSink for ChannelSink {
    fn on_progress(&self, progress: &BatchProgress) {
        // Receiver gone means nobody is watching; the run carries on.
        let _ = self.tx.try_send(progress.clone());
    }
}

/// Cooperative cancellation flag, checked before each task starts.
///
/// Clones share the same flag. Cancelling is idempotent.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns true only for the first request.
    pub fn cancel(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

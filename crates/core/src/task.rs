//! Task, result and summary types for a batch run.

use crate::error::{ConversionError, FailureKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle of a single task.
///
/// Transitions only move forward: `Pending -> Running -> terminal`, or
/// `Pending -> Cancelled` when the run is cancelled before the task starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }

    fn can_transition_to(self, next: TaskState) -> bool {
        match (self, next) {
            (TaskState::Pending, TaskState::Running) => true,
            (TaskState::Pending, TaskState::Cancelled) => true,
            (TaskState::Running, TaskState::Succeeded) => true,
            (TaskState::Running, TaskState::Failed) => true,
            _ => false,
        }
    }
}

/// One source file and where its converted output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionTask {
    /// Position in discovery order.
    pub index: usize,
    /// Absolute source path.
    pub source: PathBuf,
    /// Source path relative to the input root.
    pub relative: PathBuf,
    /// Absolute destination path (output root + relative, extension rewritten).
    pub destination: PathBuf,
    state: TaskState,
}

impl ConversionTask {
    /// Create a pending task.
    pub fn new(
        index: usize,
        source: impl Into<PathBuf>,
        relative: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            index,
            source: source.into(),
            relative: relative.into(),
            destination: destination.into(),
            state: TaskState::Pending,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Destination path relative to the output root.
    pub fn relative_destination(&self) -> PathBuf {
        match self.destination.file_name() {
            Some(name) => self.relative.with_file_name(name),
            None => self.relative.clone(),
        }
    }

    /// Lowercased source extension, empty when there is none.
    pub fn source_extension(&self) -> String {
        self.source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase()
    }

    /// Move to `next`. Returns false (and leaves the state alone) when the
    /// transition would go backwards or skip a step.
    pub(crate) fn transition(&mut self, next: TaskState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// Kind of a task's terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Failure,
    Cancelled,
}

/// Why a task failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&ConversionError> for FailureDetail {
    fn from(err: &ConversionError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Terminal record of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Index of the task in discovery order.
    pub index: usize,
    pub source: PathBuf,
    pub relative: PathBuf,
    pub destination: PathBuf,
    pub outcome: OutcomeKind,
    /// Present iff `outcome` is `Failure`.
    pub failure: Option<FailureDetail>,
    /// Whether the source file was removed after success.
    pub source_deleted: bool,
    /// Number of engine invocations made (0 for cancelled tasks).
    pub attempts: u32,
    pub elapsed: Duration,
}

impl ConversionResult {
    pub(crate) fn succeeded(
        task: &ConversionTask,
        source_deleted: bool,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self::from_task(task, OutcomeKind::Success, None, source_deleted, attempts, elapsed)
    }

    pub(crate) fn failed(
        task: &ConversionTask,
        error: &ConversionError,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self::from_task(
            task,
            OutcomeKind::Failure,
            Some(FailureDetail::from(error)),
            false,
            attempts,
            elapsed,
        )
    }

    pub(crate) fn cancelled(task: &ConversionTask) -> Self {
        Self::from_task(task, OutcomeKind::Cancelled, None, false, 0, Duration::ZERO)
    }

    fn from_task(
        task: &ConversionTask,
        outcome: OutcomeKind,
        failure: Option<FailureDetail>,
        source_deleted: bool,
        attempts: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            index: task.index,
            source: task.source.clone(),
            relative: task.relative.clone(),
            destination: task.destination.clone(),
            outcome,
            failure,
            source_deleted,
            attempts,
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == OutcomeKind::Success
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    /// Every task reached a terminal state (some may have failed).
    Completed,
    /// Cancellation was requested before every task started.
    Cancelled,
    /// Setup failed; no task ran.
    Aborted,
}

impl RunState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::Running => 1,
            RunState::Completed => 2,
            RunState::Cancelled => 3,
            RunState::Aborted => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Running,
            2 => RunState::Completed,
            3 => RunState::Cancelled,
            4 => RunState::Aborted,
            _ => RunState::Idle,
        }
    }
}

/// Aggregated report of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Identifier of the run, also attached to its log span.
    pub run_id: Uuid,
    /// One result per discovered task, in discovery order.
    pub results: Vec<ConversionResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub duration: Duration,
    /// True once the run has finished or been cancelled.
    pub terminal: bool,
    pub state: RunState,
}

impl BatchSummary {
    pub(crate) fn new(run_id: Uuid, capacity: usize) -> Self {
        Self {
            run_id,
            results: Vec::with_capacity(capacity),
            succeeded: 0,
            failed: 0,
            cancelled: 0,
            duration: Duration::ZERO,
            terminal: false,
            state: RunState::Running,
        }
    }

    /// Fold one result into the counters.
    pub(crate) fn record(&mut self, result: ConversionResult) {
        match result.outcome {
            OutcomeKind::Success => self.succeeded += 1,
            OutcomeKind::Failure => self.failed += 1,
            OutcomeKind::Cancelled => self.cancelled += 1,
        }
        self.results.push(result);
    }

    /// Sort results back into discovery order and mark the summary terminal.
    pub(crate) fn finalize(&mut self, state: RunState, duration: Duration) {
        self.results.sort_by_key(|r| r.index);
        self.state = state;
        self.duration = duration;
        self.terminal = true;
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Failed results in discovery order.
    pub fn failures(&self) -> impl Iterator<Item = &ConversionResult> {
        self.results
            .iter()
            .filter(|r| r.outcome == OutcomeKind::Failure)
    }

    /// True when every task succeeded.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }

    /// Result for the task with this relative source path.
    pub fn result_for(&self, relative: impl AsRef<Path>) -> Option<&ConversionResult> {
        let relative = relative.as_ref();
        self.results.iter().find(|r| r.relative == relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(index: usize, name: &str) -> ConversionTask {
        ConversionTask::new(
            index,
            format!("/in/{}", name),
            name,
            format!("/out/{}.md", name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name)),
        )
    }

    // ========== TaskState tests ==========

    #[test]
    fn test_task_starts_pending() {
        let t = task(0, "a.pdf");
        assert_eq!(t.state(), TaskState::Pending);
        assert!(!t.state().is_terminal());
    }

    #[test]
    fn test_task_forward_transitions() {
        let mut t = task(0, "a.pdf");
        assert!(t.transition(TaskState::Running));
        assert!(t.transition(TaskState::Succeeded));
        assert!(t.state().is_terminal());
    }

    #[test]
    fn test_task_never_leaves_terminal_state() {
        let mut t = task(0, "a.pdf");
        t.transition(TaskState::Running);
        t.transition(TaskState::Failed);
        assert!(!t.transition(TaskState::Running));
        assert!(!t.transition(TaskState::Succeeded));
        assert!(!t.transition(TaskState::Pending));
        assert_eq!(t.state(), TaskState::Failed);
    }

    #[test]
    fn test_running_task_cannot_be_cancelled() {
        let mut t = task(0, "a.pdf");
        t.transition(TaskState::Running);
        assert!(!t.transition(TaskState::Cancelled));
        assert_eq!(t.state(), TaskState::Running);
    }

    #[test]
    fn test_pending_task_cancels_directly() {
        let mut t = task(0, "a.pdf");
        assert!(t.transition(TaskState::Cancelled));
        assert!(!t.transition(TaskState::Running));
    }

    #[test]
    fn test_task_helpers() {
        let t = ConversionTask::new(1, "/in/sub/B.DOCX", "sub/B.DOCX", "/out/sub/B.md");
        assert_eq!(t.source_extension(), "docx");
        assert_eq!(t.relative_destination(), PathBuf::from("sub/B.md"));
    }

    // ========== BatchSummary tests ==========

    #[test]
    fn test_summary_counts_and_order() {
        let a = task(0, "a.pdf");
        let b = task(1, "b.pdf");
        let c = task(2, "c.pdf");
        let err = ConversionError::Timeout {
            path: b.source.clone(),
            timeout_secs: 1,
        };

        let mut summary = BatchSummary::new(Uuid::new_v4(), 3);
        summary.record(ConversionResult::cancelled(&c));
        summary.record(ConversionResult::failed(&b, &err, 1, Duration::from_millis(5)));
        summary.record(ConversionResult::succeeded(&a, false, 1, Duration::from_millis(7)));
        summary.finalize(RunState::Cancelled, Duration::from_secs(1));

        assert!(summary.terminal);
        assert_eq!(summary.state, RunState::Cancelled);
        assert_eq!(summary.succeeded + summary.failed + summary.cancelled, 3);
        let indices: Vec<_> = summary.results.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(summary.failures().count(), 1);
        assert!(!summary.is_success());
        assert_eq!(
            summary.result_for("b.pdf").and_then(|r| r.failure_kind()),
            Some(FailureKind::Timeout)
        );
    }

    #[test]
    fn test_run_state_roundtrip_u8() {
        for state in [
            RunState::Idle,
            RunState::Running,
            RunState::Completed,
            RunState::Cancelled,
            RunState::Aborted,
        ] {
            assert_eq!(RunState::from_u8(state.to_u8()), state);
        }
    }

    #[test]
    fn test_summary_serializes_to_json() {
        let a = task(0, "a.pdf");
        let mut summary = BatchSummary::new(Uuid::new_v4(), 1);
        summary.record(ConversionResult::succeeded(&a, true, 1, Duration::from_millis(3)));
        summary.finalize(RunState::Completed, Duration::from_millis(3));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["succeeded"], 1);
        assert_eq!(json["state"], "completed");
        assert_eq!(json["results"][0]["outcome"], "success");
        assert_eq!(json["results"][0]["source_deleted"], true);
    }
}

//! # doc-batch-core
//!
//! Batch conversion of document folders through an external conversion engine.
//!
//! The pipeline is:
//!
//! - **Discovery** ([`PathMirror`]) walks an input root and maps every eligible
//!   document to a destination under the output root, mirroring subdirectories
//! - **Invocation** ([`ConversionInvoker`]) runs the engine for one file,
//!   enforces the per-file timeout and verifies the output
//! - **Orchestration** ([`BatchOrchestrator`]) drives the tasks with bounded
//!   concurrency, reports progress, honours cancellation and builds the
//!   [`BatchSummary`]
//!
//! The default engine is the `docling` command line tool ([`DoclingEngine`]).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use doc_batch_core::{
//!     BatchOrchestrator, BatchProgress, CancelSignal, ConversionConfig, DoclingEngine,
//!     ExportFormat,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConversionConfig::new("./documents", "./converted")
//!         .export_format(ExportFormat::Markdown);
//!     let engine = DoclingEngine::new(&config);
//!     let orchestrator = BatchOrchestrator::new(engine, config);
//!
//!     let summary = orchestrator
//!         .start(
//!             &|p: &BatchProgress| println!("{}/{} files", p.completed, p.total),
//!             &CancelSignal::new(),
//!         )
//!         .await?;
//!
//!     println!("{} succeeded, {} failed", summary.succeeded, summary.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Running in the background
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use doc_batch_core::{BatchOrchestrator, ConversionConfig, DoclingEngine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConversionConfig::new("./documents", "./converted");
//!     let orchestrator = Arc::new(BatchOrchestrator::new(DoclingEngine::new(&config), config));
//!
//!     let handle = orchestrator.spawn();
//!     while let Ok(progress) = handle.progress().recv().await {
//!         println!("{:.0}%", progress.percent());
//!     }
//!     let summary = handle.wait().await?;
//!     println!("{:?}", summary.state);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod invoker;
pub mod logging;
pub mod orchestrator;
pub mod progress;
pub mod settings;
pub mod task;

// Re-export main types for convenience
pub use config::{ConversionConfig, ExportFormat, OcrEngine, OcrMode, TableMode, Verbosity};
pub use discovery::{discover, PathMirror};
pub use engine::{DoclingEngine, Engine, EngineRequest};
pub use error::{BatchError, ConversionError, FailureKind, Result, TaskResult};
pub use invoker::{ConversionInvoker, Converted};
pub use logging::{init_logging, LogGuard};
pub use orchestrator::{BatchOrchestrator, RunHandle};
pub use progress::{BatchProgress, CancelSignal, ChannelSink, NoProgress, ProgressSink};
pub use settings::SettingsStore;
pub use task::{
    BatchSummary, ConversionResult, ConversionTask, FailureDetail, OutcomeKind, RunState,
    TaskState,
};

/// Document extensions the engine accepts.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "pptx", "xlsx", "html", "md", "txt"];

/// Check if a file extension is supported.
pub fn is_supported_extension(ext: &str) -> bool {
    let ext = ext.trim_start_matches('.');
    SUPPORTED_EXTENSIONS
        .iter()
        .any(|&e| e.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_extension("pdf"));
        assert!(is_supported_extension("DOCX"));
        assert!(is_supported_extension(".html"));
        assert!(!is_supported_extension("odt"));
        assert!(!is_supported_extension(""));
    }
}

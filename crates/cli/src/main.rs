//! doc-batch CLI - convert a folder tree of documents with docling

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use doc_batch_core::logging::default_log_dir;
use doc_batch_core::{
    discover, init_logging, BatchOrchestrator, BatchSummary, ConversionConfig, DoclingEngine,
    Engine, ExportFormat, OcrEngine, OcrMode, RunState, SettingsStore, TableMode, Verbosity,
};

const EXIT_OK: i32 = 0;
const EXIT_FATAL: i32 = 1;
const EXIT_PARTIAL: i32 = 2;
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(name = "doc-batch")]
#[command(version)]
#[command(about = "Batch-convert a folder of documents with docling, mirroring the folder tree", long_about = None)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "FILE", env = "DOC_BATCH_SETTINGS")]
    settings: Option<PathBuf>,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert every document under INPUT into OUTPUT (default command)
    Run(RunArgs),

    /// List the files a run would convert, without converting them
    #[command(alias = "ls")]
    List(RootArgs),

    /// Inspect or reset stored settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the stored settings as JSON
    Show,
    /// Print the settings file location
    Path,
    /// Delete the stored settings
    Reset,
}

/// Input/output roots and discovery filter. Unset values come from settings.
#[derive(Args, Debug, Default, Clone)]
struct RootArgs {
    /// Input folder, scanned recursively
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Output folder receiving the mirrored tree
    #[arg(value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// File extensions to pick up (comma separated, e.g. "pdf,docx")
    #[arg(long = "ext", value_name = "EXT", value_delimiter = ',')]
    extensions: Option<Vec<String>>,
}

#[derive(Args, Debug, Default, Clone)]
struct RunArgs {
    #[command(flatten)]
    roots: RootArgs,

    /// Output format: md, json, text, doctags
    #[arg(short = 't', long = "to", value_name = "FORMAT")]
    format: Option<ExportFormat>,

    /// Table recognition: fast or accurate
    #[arg(long, value_name = "MODE")]
    table_mode: Option<TableMode>,

    /// OCR mode: off, ocr, force-ocr, bitmap-ocr
    #[arg(long, value_name = "MODE")]
    ocr: Option<OcrMode>,

    /// OCR backend: easyocr, tesseract, tesseract_cli, ocrmac, rapidocr
    #[arg(long, value_name = "ENGINE")]
    ocr_engine: Option<OcrEngine>,

    /// Delete each source file after its output is verified
    #[arg(long, conflicts_with = "keep_source")]
    delete_source: bool,

    /// Keep source files (overrides a stored --delete-source)
    #[arg(long)]
    keep_source: bool,

    /// Files converted at the same time (0 = one per CPU)
    #[arg(short = 'j', long, value_name = "N")]
    jobs: Option<usize>,

    /// Per-file timeout in seconds (0 = no limit)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Extra attempts for files failing with a retryable error
    #[arg(long, value_name = "N")]
    retries: Option<u32>,

    /// Path to the docling executable
    #[arg(long, value_name = "PATH", env = "DOC_BATCH_ENGINE")]
    engine: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write a JSON report of the run
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Do not store these options as the new defaults
    #[arg(long)]
    no_save: bool,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,

    /// Directory for the persistent log file
    #[arg(long, value_name = "DIR", conflicts_with = "no_log_file")]
    log_dir: Option<PathBuf>,

    /// Do not write a persistent log file
    #[arg(long)]
    no_log_file: bool,
}

impl RootArgs {
    fn apply(&self, mut config: ConversionConfig) -> ConversionConfig {
        if let Some(ref input) = self.input {
            config.input_root = input.clone();
        }
        if let Some(ref output) = self.output {
            config.output_root = output.clone();
        }
        if let Some(ref extensions) = self.extensions {
            config = config.allowed_extensions(extensions);
        }
        config
    }
}

impl RunArgs {
    /// Layer command line options over the stored settings.
    fn apply(&self, config: ConversionConfig) -> ConversionConfig {
        let mut config = self.roots.apply(config);
        if let Some(format) = self.format {
            config.export_format = format;
        }
        if let Some(mode) = self.table_mode {
            config.table_mode = mode;
        }
        if let Some(mode) = self.ocr {
            config.ocr_mode = mode;
        }
        if let Some(engine) = self.ocr_engine {
            config.ocr_engine = engine;
        }
        if self.delete_source {
            config.delete_source_after_success = true;
        }
        if self.keep_source {
            config.delete_source_after_success = false;
        }
        if let Some(jobs) = self.jobs {
            config.concurrency = match jobs {
                0 => ConversionConfig::auto_concurrency(),
                n => n,
            };
        }
        if let Some(secs) = self.timeout {
            config.timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }
        if let Some(ref engine) = self.engine {
            config.engine_path = Some(engine.clone());
        }
        if self.verbose > 0 {
            config.verbosity = Verbosity::from_count(self.verbose);
        }
        config
    }

    fn log_dir(&self) -> Option<PathBuf> {
        if self.no_log_file {
            None
        } else {
            self.log_dir.clone().or_else(default_log_dir)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let store = match cli.settings {
        Some(ref path) => SettingsStore::new(path),
        None => SettingsStore::open_default(),
    };

    let result = match cli.command {
        Some(Commands::Run(args)) => cmd_run(&store, &args).await,
        Some(Commands::List(args)) => cmd_list(&store, &args).map(|_| EXIT_OK),
        Some(Commands::Settings { action }) => cmd_settings(&store, action).map(|_| EXIT_OK),
        None => cmd_run(&store, &cli.run).await,
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

async fn cmd_run(store: &SettingsStore, args: &RunArgs) -> Result<i32> {
    let config = args.apply(store.load());
    let _log_guard = init_logging(config.verbosity, args.log_dir().as_deref())?;

    fs::create_dir_all(&config.output_root).with_context(|| {
        format!("cannot create output folder {}", config.output_root.display())
    })?;

    config.validate()?;

    if !args.no_save {
        match store.save(&config) {
            Ok(()) => tracing::debug!("Settings saved to {:?}", store.path()),
            Err(e) => eprintln!("{}: {}", "Warning".yellow().bold(), e),
        }
    }

    let engine = DoclingEngine::new(&config);
    if !engine.is_available() {
        eprintln!(
            "{}: {} was not found; every file will fail. Install docling or pass --engine.",
            "Warning".yellow().bold(),
            engine.name()
        );
    }

    println!(
        "{} {} {} {}",
        "Converting".green().bold(),
        config.input_root.display(),
        "->".dimmed(),
        config.output_root.display()
    );

    let report = args.report.clone();
    let orchestrator = Arc::new(BatchOrchestrator::new(engine, config));
    let handle = orchestrator.spawn();

    let cancel = handle.cancel_signal();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if cancel.cancel() {
                eprintln!(
                    "\n{} finishing the current file, press Ctrl-C again to quit now",
                    "Cancelling:".yellow().bold()
                );
            } else {
                std::process::exit(EXIT_CANCELLED);
            }
        }
    });

    let pb = if args.no_progress {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    while let Ok(progress) = handle.progress().recv().await {
        pb.set_length(progress.total as u64);
        pb.set_position(progress.completed as u64);
        if let Some(name) = progress.current_path.as_deref().and_then(Path::file_name) {
            pb.set_message(name.to_string_lossy().into_owned());
        }
    }
    pb.finish_and_clear();

    let summary = handle.wait().await?;
    print_summary(&summary);

    if let Some(path) = report {
        write_report(&summary, &path)?;
        println!("{} {}", "Report saved to".green(), path.display());
    }

    Ok(exit_code(&summary))
}

fn exit_code(summary: &BatchSummary) -> i32 {
    match summary.state {
        RunState::Cancelled => EXIT_CANCELLED,
        _ if summary.failed > 0 => EXIT_PARTIAL,
        _ => EXIT_OK,
    }
}

fn print_summary(summary: &BatchSummary) {
    let title = match summary.state {
        RunState::Cancelled => "Conversion cancelled".yellow().bold(),
        _ if summary.failed > 0 => "Conversion finished with errors".red().bold(),
        _ => "Conversion completed".green().bold(),
    };
    println!("\n{} in {:.1?}", title, summary.duration);
    println!("  {} {}", "Succeeded:".green(), summary.succeeded);
    println!("  {}    {}", "Failed:".red(), summary.failed);
    if summary.cancelled > 0 {
        println!("  {} {}", "Cancelled:".yellow(), summary.cancelled);
    }

    let failures: Vec<_> = summary.failures().collect();
    if !failures.is_empty() {
        println!("\n{}", "Failed files:".red().bold());
        let last = failures.len() - 1;
        for (i, result) in failures.iter().enumerate() {
            let branch = if i == last { "└─" } else { "├─" };
            let reason = result
                .failure
                .as_ref()
                .map(|f| f.message.as_str())
                .unwrap_or("unknown error");
            println!("  {} {}: {}", branch.dimmed(), result.relative.display(), reason);
        }
    }
}

fn write_report(summary: &BatchSummary, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, json).with_context(|| format!("cannot write report {}", path.display()))
}

/// One `source -> destination` line per eligible file, relative to the roots.
fn list_lines(config: &ConversionConfig) -> Result<Vec<String>> {
    let tasks = discover(config)?;
    Ok(tasks
        .iter()
        .map(|task| {
            format!(
                "{} -> {}",
                task.relative.display(),
                task.relative_destination().display()
            )
        })
        .collect())
}

fn cmd_list(store: &SettingsStore, args: &RootArgs) -> Result<()> {
    let config = args.apply(store.load());
    let lines = list_lines(&config)?;

    for line in &lines {
        println!("{}", line);
    }
    println!(
        "\n{} {} under {}",
        lines.len().to_string().bold(),
        if lines.len() == 1 { "file" } else { "files" },
        config.input_root.display()
    );
    Ok(())
}

fn cmd_settings(store: &SettingsStore, action: SettingsAction) -> Result<()> {
    match action {
        SettingsAction::Show => {
            if !store.exists() {
                eprintln!("{}", "No stored settings, showing defaults".dimmed());
            }
            println!("{}", serde_json::to_string_pretty(&store.load())?);
        }
        SettingsAction::Path => println!("{}", store.path().display()),
        SettingsAction::Reset => {
            store.reset()?;
            println!("{} {}", "Removed".green(), store.path().display());
        }
    }
    Ok(())
}

//! Configuration types for batch conversion.

use crate::error::{BatchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Target format written by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExportFormat {
    #[default]
    #[serde(rename = "md", alias = "markdown")]
    Markdown,
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "text", alias = "txt")]
    Text,
    #[serde(rename = "doctags")]
    DocTags,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [
        ExportFormat::Markdown,
        ExportFormat::Json,
        ExportFormat::Text,
        ExportFormat::DocTags,
    ];

    /// Name passed to the engine's `--to` option.
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Json => "json",
            ExportFormat::Text => "text",
            ExportFormat::DocTags => "doctags",
        }
    }

    /// File extension of converted documents (without the dot).
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Json => "json",
            ExportFormat::Text => "txt",
            ExportFormat::DocTags => "doctags",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md" | "markdown" => Ok(ExportFormat::Markdown),
            "json" => Ok(ExportFormat::Json),
            "text" | "txt" => Ok(ExportFormat::Text),
            "doctags" => Ok(ExportFormat::DocTags),
            other => Err(BatchError::config(format!(
                "unknown export format '{}' (expected one of: md, json, text, doctags)",
                other
            ))),
        }
    }
}

/// Table structure recognition mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableMode {
    Fast,
    #[default]
    Accurate,
}

impl TableMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TableMode::Fast => "fast",
            TableMode::Accurate => "accurate",
        }
    }
}

impl FromStr for TableMode {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(TableMode::Fast),
            "accurate" => Ok(TableMode::Accurate),
            other => Err(BatchError::config(format!(
                "unknown table mode '{}' (expected fast or accurate)",
                other
            ))),
        }
    }
}

/// How OCR is applied to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OcrMode {
    /// No OCR at all.
    #[default]
    Off,
    /// OCR embedded images and scanned pages.
    Ocr,
    /// Replace all existing text with OCR output.
    ForceOcr,
    /// OCR bitmap regions only, keeping the text layer.
    BitmapOcr,
}

impl OcrMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OcrMode::Off => "off",
            OcrMode::Ocr => "ocr",
            OcrMode::ForceOcr => "force-ocr",
            OcrMode::BitmapOcr => "bitmap-ocr",
        }
    }

    /// Engine flags selecting this mode.
    pub fn engine_args(self) -> &'static [&'static str] {
        match self {
            OcrMode::Off => &["--no-ocr", "--no-force-ocr"],
            OcrMode::Ocr | OcrMode::BitmapOcr => &["--ocr", "--no-force-ocr"],
            OcrMode::ForceOcr => &["--ocr", "--force-ocr"],
        }
    }
}

impl FromStr for OcrMode {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "off" | "none" => Ok(OcrMode::Off),
            "ocr" | "on" => Ok(OcrMode::Ocr),
            "force-ocr" | "force" => Ok(OcrMode::ForceOcr),
            "bitmap-ocr" | "bitmap" => Ok(OcrMode::BitmapOcr),
            other => Err(BatchError::config(format!(
                "unknown OCR mode '{}' (expected off, ocr, force-ocr or bitmap-ocr)",
                other
            ))),
        }
    }
}

/// OCR backend used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OcrEngine {
    #[default]
    #[serde(rename = "easyocr")]
    EasyOcr,
    #[serde(rename = "tesseract")]
    Tesseract,
    #[serde(rename = "tesseract_cli")]
    TesseractCli,
    #[serde(rename = "ocrmac")]
    OcrMac,
    #[serde(rename = "rapidocr")]
    RapidOcr,
}

impl OcrEngine {
    pub const ALL: [OcrEngine; 5] = [
        OcrEngine::EasyOcr,
        OcrEngine::Tesseract,
        OcrEngine::TesseractCli,
        OcrEngine::OcrMac,
        OcrEngine::RapidOcr,
    ];

    /// Identifier passed to the engine's `--ocr-engine` option.
    pub fn as_str(self) -> &'static str {
        match self {
            OcrEngine::EasyOcr => "easyocr",
            OcrEngine::Tesseract => "tesseract",
            OcrEngine::TesseractCli => "tesseract_cli",
            OcrEngine::OcrMac => "ocrmac",
            OcrEngine::RapidOcr => "rapidocr",
        }
    }
}

impl FromStr for OcrEngine {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        OcrEngine::ALL
            .into_iter()
            .find(|engine| engine.as_str() == wanted)
            .ok_or_else(|| {
                BatchError::config(format!(
                    "unknown OCR engine '{}' (expected one of: easyocr, tesseract, tesseract_cli, ocrmac, rapidocr)",
                    s.trim()
                ))
            })
    }
}

/// How much is surfaced to the user-visible log channel.
///
/// The persistent log always records everything down to DEBUG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Errors only.
    #[default]
    Silent,
    /// Processing updates.
    Info,
    /// Detailed technical output.
    Debug,
}

impl Verbosity {
    pub fn as_str(self) -> &'static str {
        match self {
            Verbosity::Silent => "silent",
            Verbosity::Info => "info",
            Verbosity::Debug => "debug",
        }
    }

    /// Verbosity flag forwarded to the engine, if any.
    pub fn engine_flag(self) -> Option<&'static str> {
        match self {
            Verbosity::Silent => None,
            Verbosity::Info => Some("-v"),
            Verbosity::Debug => Some("-vv"),
        }
    }

    /// Map a `-v` count (0, 1, 2+) to a level.
    pub fn from_count(count: u8) -> Self {
        match count {
            0 => Verbosity::Silent,
            1 => Verbosity::Info,
            _ => Verbosity::Debug,
        }
    }
}

impl FromStr for Verbosity {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" | "0" => Ok(Verbosity::Silent),
            "info" | "1" => Ok(Verbosity::Info),
            "debug" | "2" => Ok(Verbosity::Debug),
            other => Err(BatchError::config(format!(
                "unknown verbosity '{}' (expected silent, info or debug)",
                other
            ))),
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )*
    };
}

display_as_str!(ExportFormat, TableMode, OcrMode, OcrEngine, Verbosity);

/// Configuration for one batch run.
///
/// Missing fields take their default when deserialized, so older settings
/// files keep loading after new knobs are added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Directory scanned recursively for documents.
    pub input_root: PathBuf,

    /// Directory receiving the mirrored output tree.
    pub output_root: PathBuf,

    /// Target format.
    /// Default: Markdown.
    pub export_format: ExportFormat,

    /// Table recognition mode.
    /// Default: accurate.
    pub table_mode: TableMode,

    /// OCR mode.
    /// Default: off.
    pub ocr_mode: OcrMode,

    /// OCR backend.
    /// Default: easyocr.
    pub ocr_engine: OcrEngine,

    /// Remove each source file once its output is verified.
    /// Default: false.
    pub delete_source_after_success: bool,

    /// User-visible log verbosity.
    /// Default: silent.
    pub verbosity: Verbosity,

    /// Number of files converted at the same time.
    /// Default: 1 (strictly sequential).
    pub concurrency: usize,

    /// Per-file time budget in seconds. `None` disables the limit.
    /// Default: 600.
    pub timeout_secs: Option<u64>,

    /// Extra attempts for a task that failed with a retryable error.
    /// Default: 0.
    pub max_retries: u32,

    /// Path to the engine binary. If None, searches PATH.
    pub engine_path: Option<PathBuf>,

    /// File extensions picked up by discovery (case-insensitive, no dot).
    pub allowed_extensions: Vec<String>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        let documents = default_documents_dir();
        Self {
            output_root: documents.join("doc-batch-output"),
            input_root: documents,
            export_format: ExportFormat::default(),
            table_mode: TableMode::default(),
            ocr_mode: OcrMode::default(),
            ocr_engine: OcrEngine::default(),
            delete_source_after_success: false,
            verbosity: Verbosity::default(),
            concurrency: 1,
            timeout_secs: Some(600),
            max_retries: 0,
            engine_path: None,
            allowed_extensions: crate::SUPPORTED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

fn default_documents_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| {
            dirs.document_dir()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| dirs.home_dir().to_path_buf())
        })
        .unwrap_or_else(|| PathBuf::from("."))
}

impl ConversionConfig {
    /// Create a config for the given roots with default options.
    pub fn new(input_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            ..Default::default()
        }
    }

    /// Set the export format.
    pub fn export_format(mut self, format: ExportFormat) -> Self {
        self.export_format = format;
        self
    }

    /// Set the table mode.
    pub fn table_mode(mut self, mode: TableMode) -> Self {
        self.table_mode = mode;
        self
    }

    /// Set the OCR mode.
    pub fn ocr_mode(mut self, mode: OcrMode) -> Self {
        self.ocr_mode = mode;
        self
    }

    /// Set the OCR engine.
    pub fn ocr_engine(mut self, engine: OcrEngine) -> Self {
        self.ocr_engine = engine;
        self
    }

    /// Delete sources after verified conversion.
    pub fn delete_source_after_success(mut self, enabled: bool) -> Self {
        self.delete_source_after_success = enabled;
        self
    }

    /// Set the verbosity.
    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set the number of concurrent conversions.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the per-file timeout. `None` disables it.
    ///
    /// The budget is kept in whole seconds; a fractional duration rounds up,
    /// so only a zero duration ends up rejected by [`validate`](Self::validate).
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_secs = timeout.map(|t| t.as_secs() + u64::from(t.subsec_nanos() > 0));
        self
    }

    /// Set the retry budget per task.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the engine binary path.
    pub fn engine_path(mut self, path: PathBuf) -> Self {
        self.engine_path = Some(path);
        self
    }

    /// Replace the set of extensions picked up by discovery.
    pub fn allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions = extensions
            .into_iter()
            .map(|ext| normalize_extension(ext.as_ref()))
            .collect();
        self
    }

    /// Concurrency matching the number of logical CPUs.
    pub fn auto_concurrency() -> usize {
        num_cpus::get().max(1)
    }

    /// The per-file timeout as a [`Duration`].
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Validate the configuration against the filesystem.
    ///
    /// A missing input root is reported as [`BatchError::Discovery`]; every
    /// other violation is a [`BatchError::Configuration`].
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(BatchError::config("concurrency must be at least 1"));
        }
        if self.timeout_secs == Some(0) {
            return Err(BatchError::config("timeout must be greater than 0"));
        }
        if self.allowed_extensions.iter().all(|ext| ext.trim().is_empty()) {
            return Err(BatchError::config("at least one file extension must be allowed"));
        }
        if let Some(ref path) = self.engine_path {
            if !path.is_file() {
                return Err(BatchError::config(format!(
                    "engine path '{}' is not a file",
                    path.display()
                )));
            }
        }

        if !self.input_root.is_dir() {
            return Err(BatchError::Discovery {
                path: self.input_root.clone(),
                message: "input root does not exist or is not a directory".to_string(),
            });
        }
        if !self.output_root.is_dir() {
            return Err(BatchError::config(format!(
                "output root '{}' does not exist or is not a directory",
                self.output_root.display()
            )));
        }

        let input = canonical(&self.input_root)?;
        let output = canonical(&self.output_root)?;
        if input == output {
            return Err(BatchError::config(
                "input root and output root must be different directories",
            ));
        }

        let readonly = std::fs::metadata(&output)
            .map(|meta| meta.permissions().readonly())
            .unwrap_or(true);
        if readonly {
            return Err(BatchError::config(format!(
                "output root '{}' is not writable",
                output.display()
            )));
        }

        Ok(())
    }

    /// Whether discovery should pick up a file with this extension.
    pub fn allows_extension(&self, ext: &str) -> bool {
        let ext = normalize_extension(ext);
        self.allowed_extensions
            .iter()
            .any(|allowed| normalize_extension(allowed) == ext)
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| {
        BatchError::config(format!("cannot resolve '{}': {}", path.display(), e))
    })
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

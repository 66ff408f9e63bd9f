//! Persistent settings between runs.
//!
//! The last used [`ConversionConfig`] is stored as pretty-printed JSON in the
//! platform config directory. Loading never fails: a missing or unreadable
//! file yields defaults, so a corrupt settings file cannot block a run.

use crate::config::ConversionConfig;
use crate::error::{BatchError, Result};
use directories::ProjectDirs;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// File name of the settings file inside the config directory.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Loads and saves the user's [`ConversionConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Store backed by an explicit file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/doc-batch/settings.json`, falling back to the working
    /// directory when no home directory is known.
    pub fn default_location() -> PathBuf {
        ProjectDirs::from("", "", "doc-batch")
            .map(|dirs| dirs.config_dir().join(SETTINGS_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE_NAME))
    }

    pub fn open_default() -> Self {
        Self::new(Self::default_location())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load stored settings, or defaults when there are none.
    pub fn load(&self) -> ConversionConfig {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No settings at {:?}, using defaults", self.path);
                return ConversionConfig::default();
            }
            Err(e) => {
                warn!("Failed to read settings {:?}: {}; using defaults", self.path, e);
                return ConversionConfig::default();
            }
        };

        match serde_json::from_str::<ConversionConfig>(&contents) {
            Ok(config) => sanitize(config),
            Err(e) => {
                warn!("Invalid settings in {:?}: {}; using defaults", self.path, e);
                ConversionConfig::default()
            }
        }
    }

    /// Persist `config`, replacing the previous file atomically.
    pub fn save(&self, config: &ConversionConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config).map_err(|e| self.error(e))?;

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|e| self.error(e))?;

        // Temp file in the same directory so the rename stays on one filesystem.
        let mut file = NamedTempFile::new_in(parent).map_err(|e| self.error(e))?;
        file.write_all(json.as_bytes()).map_err(|e| self.error(e))?;
        file.as_file().sync_all().map_err(|e| self.error(e))?;
        file.persist(&self.path).map_err(|e| self.error(e.error))?;

        debug!("Saved settings to {:?}", self.path);
        Ok(())
    }

    /// Remove the stored settings. Missing files are not an error.
    pub fn reset(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.error(e)),
        }
    }

    fn error(&self, err: impl std::fmt::Display) -> BatchError {
        BatchError::Settings {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::open_default()
    }
}

/// Replace values that would fail validation with their defaults.
fn sanitize(mut config: ConversionConfig) -> ConversionConfig {
    let defaults = ConversionConfig::default();
    if config.concurrency == 0 {
        warn!("Stored concurrency 0 is invalid, using {}", defaults.concurrency);
        config.concurrency = defaults.concurrency;
    }
    if config.timeout_secs == Some(0) {
        warn!("Stored timeout 0 is invalid, using the default");
        config.timeout_secs = defaults.timeout_secs;
    }
    if config.allowed_extensions.is_empty() {
        config.allowed_extensions = defaults.allowed_extensions;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExportFormat, OcrEngine, OcrMode, TableMode};
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        assert!(!store.exists());
        assert_eq!(store.load(), ConversionConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("nested").join("settings.json"));
        let config = ConversionConfig::new("/docs/in", "/docs/out")
            .export_format(ExportFormat::Json)
            .table_mode(TableMode::Fast)
            .ocr_mode(OcrMode::ForceOcr)
            .ocr_engine(OcrEngine::Tesseract)
            .delete_source_after_success(true)
            .concurrency(3);

        store.save(&config).unwrap();
        assert!(store.exists());
        assert_eq!(store.load(), config);

        // No temp files left next to the settings.
        let entries = fs::read_dir(store.path().parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        store.save(&ConversionConfig::new("/a", "/b")).unwrap();
        store.save(&ConversionConfig::new("/c", "/d")).unwrap();
        assert_eq!(store.load().input_root, PathBuf::from("/c"));
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(SettingsStore::new(path).load(), ConversionConfig::default());
    }

    #[test]
    fn test_unknown_enum_value_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"export_format": "pptx"}"#).unwrap();
        assert_eq!(SettingsStore::new(path).load(), ConversionConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_known_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"table_mode": "fast", "concurrency": 0, "timeout_secs": 0}"#).unwrap();

        let config = SettingsStore::new(path).load();
        assert_eq!(config.table_mode, TableMode::Fast);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.timeout_secs, Some(600));
    }

    #[test]
    fn test_reset() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        store.reset().unwrap();
        store.save(&ConversionConfig::default()).unwrap();
        store.reset().unwrap();
        assert!(!store.exists());
    }

    #[test]
    fn test_save_into_unwritable_location() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let store = SettingsStore::new(blocker.join("settings.json"));

        let err = store.save(&ConversionConfig::default()).unwrap_err();
        assert!(matches!(err, BatchError::Settings { .. }));
    }

    #[test]
    fn test_default_location_file_name() {
        assert!(SettingsStore::default_location().ends_with(SETTINGS_FILE_NAME));
    }
}

//! Recursive input discovery and output path mirroring.
//!
//! Walk policy:
//! - hidden entries (name starting with `.`) are skipped, and hidden
//!   directories are not descended into;
//! - symlinked directories are never followed, which keeps the walk free of
//!   cycles; a symlink to a regular file is picked up like the file itself;
//! - when the output root lies inside the input root, that subtree is skipped
//!   so converted files are never rediscovered as inputs.
//!
//! Tasks come out sorted by relative path, so the same tree always yields the
//! same task list.

use crate::config::{ConversionConfig, ExportFormat};
use crate::error::{BatchError, Result};
use crate::task::ConversionTask;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Maps documents under an input root to destinations under an output root.
#[derive(Debug, Clone)]
pub struct PathMirror {
    input_root: PathBuf,
    output_root: PathBuf,
    format: ExportFormat,
}

impl PathMirror {
    pub fn new(
        input_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        format: ExportFormat,
    ) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            format,
        }
    }

    pub fn from_config(config: &ConversionConfig) -> Self {
        Self::new(&config.input_root, &config.output_root, config.export_format)
    }

    pub fn input_root(&self) -> &Path {
        &self.input_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Destination for a source path relative to the input root.
    pub fn destination_for(&self, relative: &Path) -> PathBuf {
        self.output_root
            .join(relative)
            .with_extension(self.format.extension())
    }

    /// Destination that keeps the source extension in the file name
    /// (`a.docx` -> `a.docx.md`). Used when two sources share a stem.
    fn disambiguated_destination(&self, relative: &Path) -> PathBuf {
        let mut name = relative
            .file_name()
            .map(OsString::from)
            .unwrap_or_default();
        name.push(".");
        name.push(self.format.extension());
        self.output_root.join(relative).with_file_name(name)
    }

    /// Enumerate every eligible document under the input root.
    ///
    /// `allowed_extensions` is matched case-insensitively, with or without a
    /// leading dot. Fails only when the input root itself cannot be read.
    pub fn discover<S: AsRef<str>>(&self, allowed_extensions: &[S]) -> Result<Vec<ConversionTask>> {
        if !self.input_root.is_dir() {
            return Err(BatchError::Discovery {
                path: self.input_root.clone(),
                message: "input root does not exist or is not a directory".to_string(),
            });
        }

        let allowed: HashSet<String> = allowed_extensions
            .iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        let skip_subtree = self.nested_output_root();
        let walker = WalkDir::new(&self.input_root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || (!is_hidden(entry)
                        && skip_subtree
                            .as_deref()
                            .map_or(true, |skip| entry.path() != skip))
            });

        let mut found = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(BatchError::Discovery {
                        path: self.input_root.clone(),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Skipping unreadable entry during discovery: {}", e);
                    continue;
                }
            };

            if !is_regular_file(&entry) {
                continue;
            }

            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase());
            match ext {
                Some(ext) if allowed.contains(&ext) => {}
                _ => continue,
            }

            let relative = match entry.path().strip_prefix(&self.input_root) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => continue,
            };
            debug!("Found document: {}", relative.display());
            found.push((entry.into_path(), relative));
        }

        found.sort_by(|a, b| a.1.cmp(&b.1));

        let mut seen = HashSet::with_capacity(found.len());
        let tasks = found
            .into_iter()
            .enumerate()
            .map(|(index, (source, relative))| {
                let mut destination = self.destination_for(&relative);
                if !seen.insert(destination.clone()) {
                    destination = self.disambiguated_destination(&relative);
                    warn!(
                        "Output name clash for {}, writing to {}",
                        relative.display(),
                        destination.display()
                    );
                    seen.insert(destination.clone());
                }
                ConversionTask::new(index, source, relative, destination)
            })
            .collect();

        Ok(tasks)
    }

    /// The output root, if it lives strictly inside the input root.
    fn nested_output_root(&self) -> Option<PathBuf> {
        let input = self.input_root.canonicalize().ok()?;
        let output = self.output_root.canonicalize().ok()?;
        if output != input && output.starts_with(&input) {
            // Walk entries carry paths rooted at the input root as given.
            output
                .strip_prefix(&input)
                .ok()
                .map(|rest| self.input_root.join(rest))
        } else {
            None
        }
    }
}

/// Discover tasks for a config: its roots, format and allowed extensions.
pub fn discover(config: &ConversionConfig) -> Result<Vec<ConversionTask>> {
    PathMirror::from_config(config).discover(&config.allowed_extensions)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn is_regular_file(entry: &DirEntry) -> bool {
    let file_type = entry.file_type();
    if file_type.is_file() {
        return true;
    }
    // Symlinks are not followed by the walker; accept links to plain files.
    file_type.is_symlink() && entry.path().is_file()
}

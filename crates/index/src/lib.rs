#![deny(unsafe_code)]
//! # Overview
//!
//! `scr_index` is the checkpoint index catalog: a per-prefix-directory
//! record of every checkpoint dataset, its subdirectory, its
//! user-visible name, and three flags (`complete`, `fetched`,
//! `failed`). The attempt driver reads it to pick a candidate and
//! writes it back after every attempt.
//!
//! # Design
//!
//! The catalog is stored as one JSON object per line (the same
//! self-describing, line-oriented shape other persistent state in this
//! workspace uses) rather than a single JSON array, so a reader can
//! recover every entry it can parse even if a later line was cut short
//! by a crash mid-write; [`Index::write`] still replaces the whole file
//! atomically, this format choice is about resilience to partial reads
//! of old snapshots, not about incremental append.
//!
//! The candidate-exclusion "previous id" the driver threads between
//! retries is `Option<i64>` here rather than the `-1` sentinel the
//! original catalog format uses for "unbounded": `None` means
//! unbounded, `Some(id)` means strictly less than `id`.
//!
//! # Invariants
//!
//! - [`Index::get_most_recent_complete`] only ever returns entries with
//!   `complete = true` and `failed = false`.
//! - The `current` symlink is a plain relative path, never touched by
//!   anything in this crate except [`set_current`] and [`clear_current`].

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised while reading, writing, or updating the index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to read index {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("failed to write index {path}: {source}")]
    Write { path: String, source: io::Error },

    #[error("index {path} line {line} is not valid JSON: {source}")]
    Codec { path: String, line: usize, source: serde_json::Error },

    #[error("no entry for subdirectory `{0}` in the index")]
    UnknownDirectory(String),

    #[error("failed to update current pointer at {path}: {source}")]
    Symlink { path: String, source: io::Error },
}

/// One checkpoint's entry in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub dataset_id: u64,
    pub checkpoint_id: i64,
    pub subdirectory: String,
    pub name: String,
    pub complete: bool,
    pub fetched: bool,
    pub failed: bool,
}

/// The checkpoint index catalog for one prefix directory.
#[derive(Debug, Default)]
pub struct Index {
    path: std::path::PathBuf,
    entries: Vec<CheckpointEntry>,
}

impl Index {
    /// Opens the index at `path`, reading any entries already there.
    /// A missing file is treated as an empty catalog, not an error —
    /// the caller decides whether that is fatal (per the "catalogue
    /// absent" error kind, which only matters if `current` also fails
    /// to resolve).
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self, IndexError> {
        let path = path.into();
        let mut index = Index { path, entries: Vec::new() };
        if index.path.exists() {
            index.read()?;
        }
        Ok(index)
    }

    /// Re-reads the catalog from disk, replacing in-memory entries.
    pub fn read(&mut self) -> Result<(), IndexError> {
        let path_display = self.path.display().to_string();
        let contents = fs::read_to_string(&self.path)
            .map_err(|source| IndexError::Read { path: path_display.clone(), source })?;
        let mut entries = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: CheckpointEntry = serde_json::from_str(line).map_err(|source| IndexError::Codec {
                path: path_display.clone(),
                line: line_no + 1,
                source,
            })?;
            entries.push(entry);
        }
        self.entries = entries;
        Ok(())
    }

    /// Atomically replaces the on-disk catalog with the current state.
    pub fn write(&self) -> Result<(), IndexError> {
        let path_display = self.path.display().to_string();
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|source| IndexError::Write { path: path_display.clone(), source })?;
        use std::io::Write as _;
        for entry in &self.entries {
            let line = serde_json::to_string(entry).expect("CheckpointEntry serialization is infallible");
            writeln!(tmp, "{line}").map_err(|source| IndexError::Write { path: path_display.clone(), source })?;
        }
        tmp.persist(&self.path)
            .map_err(|e| IndexError::Write { path: path_display.clone(), source: e.error })?;
        Ok(())
    }

    /// Inserts or replaces the entry for `entry.subdirectory`.
    pub fn upsert(&mut self, entry: CheckpointEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.subdirectory == entry.subdirectory) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// Looks up the dataset id for a given subdirectory name.
    pub fn get_id_by_dir(&self, dir: &str) -> Option<u64> {
        self.entries.iter().find(|e| e.subdirectory == dir).map(|e| e.dataset_id)
    }

    /// Looks up the full entry for a given subdirectory name.
    pub fn get_entry_by_dir(&self, dir: &str) -> Option<&CheckpointEntry> {
        self.entries.iter().find(|e| e.subdirectory == dir)
    }

    /// Finds the most recent complete, non-failed checkpoint whose
    /// `checkpoint_id` is strictly less than `strictly_less_than`, or
    /// the most recent complete checkpoint at all when `None`.
    pub fn get_most_recent_complete(&self, strictly_less_than: Option<i64>) -> Option<CheckpointEntry> {
        self.entries
            .iter()
            .filter(|e| e.complete && !e.failed)
            .filter(|e| strictly_less_than.is_none_or(|bound| e.checkpoint_id < bound))
            .max_by_key(|e| e.checkpoint_id)
            .cloned()
    }

    /// Marks the entry for `dir` as fetched and persists the catalog.
    pub fn mark_fetched(&mut self, dir: &str) -> Result<(), IndexError> {
        self.set_flag(dir, |e| e.fetched = true)
    }

    /// Marks the entry for `dir` as failed and persists the catalog.
    pub fn mark_failed(&mut self, dir: &str) -> Result<(), IndexError> {
        self.set_flag(dir, |e| e.failed = true)
    }

    fn set_flag(&mut self, dir: &str, apply: impl FnOnce(&mut CheckpointEntry)) -> Result<(), IndexError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.subdirectory == dir)
            .ok_or_else(|| IndexError::UnknownDirectory(dir.to_string()))?;
        apply(entry);
        self.write()
    }

    /// Iterates every entry currently known to the catalog.
    pub fn entries(&self) -> impl Iterator<Item = &CheckpointEntry> {
        self.entries.iter()
    }
}

const CURRENT_LINK_NAME: &str = "current";

/// Points `<prefix_dir>/current` at `subdirectory` (a relative symlink),
/// replacing any prior pointer.
#[cfg(unix)]
pub fn set_current(prefix_dir: &Path, subdirectory: &str) -> Result<(), IndexError> {
    let link = prefix_dir.join(CURRENT_LINK_NAME);
    let _ = fs::remove_file(&link);
    std::os::unix::fs::symlink(subdirectory, &link)
        .map_err(|source| IndexError::Symlink { path: link.display().to_string(), source })
}

/// Removes `<prefix_dir>/current` if present.
pub fn clear_current(prefix_dir: &Path) -> Result<(), IndexError> {
    let link = prefix_dir.join(CURRENT_LINK_NAME);
    match fs::remove_file(&link) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(IndexError::Symlink { path: link.display().to_string(), source }),
    }
}

/// Reads the subdirectory `<prefix_dir>/current` points at, if any.
#[cfg(unix)]
pub fn current(prefix_dir: &Path) -> Option<String> {
    let link = prefix_dir.join(CURRENT_LINK_NAME);
    fs::read_link(&link).ok().map(|p| p.to_string_lossy().into_owned())
}

#![deny(unsafe_code)]
//! # Overview
//!
//! `scr_filemap` persists, per dataset and rank, which cache files a
//! fetch has created and what became of each one: its size, optional
//! CRC32, and completeness. The map is written to stable storage with
//! a monotonic ordering guarantee — a filename is durably recorded
//! *before* any byte of that file is written — so a crash mid-fetch
//! leaves behind a map the cache manager can use to clean up.
//!
//! # Design
//!
//! [`FileMap::flush`] replaces the on-disk file atomically (write to a
//! sibling temp file, then rename over the target) so a reader never
//! observes a half-written map, mirroring the atomic-replace idiom the
//! rest of this workspace's persistent state files use. Each rank's
//! files are stored as an insertion-ordered list rather than a map
//! keyed by filename, because a pending entry (recorded, not yet
//! described) and a completed entry share a filename and must be
//! told apart by position, not overwritten silently.
//!
//! # Invariants
//!
//! - [`FileMap::record_pending_and_flush`] and [`FileMap::flush`] are
//!   the only ways bytes reach disk; every other mutator requires the
//!   caller to flush explicitly or is itself flush-on-write.
//! - [`FileMap::attach_meta`] fails if no pending entry for that path
//!   exists, which is the monotonic invariant enforced in code rather
//!   than left to caller discipline.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised while reading, writing, or mutating a file map.
#[derive(Debug, Error)]
pub enum FileMapError {
    #[error("failed to read file map {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write file map {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("file map {path} is not valid JSON: {source}")]
    Codec { path: PathBuf, source: serde_json::Error },

    #[error("attach_meta called for {path} with no pending entry recorded first")]
    NotPending { path: PathBuf },
}

/// The kind of a tracked file. Only `Full` is produced by this fetch
/// core today; the variant exists because the original file map
/// distinguishes whole files from redundancy-scheme fragments, and a
/// richer redundancy implementation would add variants here rather
/// than a second enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Full,
}

/// Metadata recorded for one file once its fetch outcome is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: PathBuf,
    pub kind: FileKind,
    pub size: u64,
    pub crc32: Option<u32>,
    pub complete: bool,
    pub ranks: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RankRecord {
    /// `(path, None)` is a pending entry: recorded before any bytes were
    /// written. `(path, Some(meta))` is a described, attempted file.
    files: Vec<(PathBuf, Option<FileMeta>)>,
    expected_files: Option<usize>,
    redundancy_descriptor: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DatasetRecord {
    ranks: HashMap<usize, RankRecord>,
}

/// The durable per-rank record of cache files for every dataset this
/// job has attempted to fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileMap {
    datasets: HashMap<u64, DatasetRecord>,
    #[serde(skip)]
    path: PathBuf,
}

impl FileMap {
    /// Opens the file map at `path`, or starts an empty one if it does
    /// not yet exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FileMapError> {
        let path = path.into();
        let mut map = if path.exists() {
            let bytes = fs::read(&path).map_err(|source| FileMapError::Read { path: path.clone(), source })?;
            serde_json::from_slice::<FileMap>(&bytes)
                .map_err(|source| FileMapError::Codec { path: path.clone(), source })?
        } else {
            FileMap::default()
        };
        map.path = path;
        Ok(map)
    }

    /// Atomically replaces the on-disk file map with the current state.
    pub fn flush(&self) -> Result<(), FileMapError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|source| FileMapError::Write { path: self.path.clone(), source })?;
        let bytes = serde_json::to_vec_pretty(self)
            .expect("FileMap serialization is infallible for owned data");
        use std::io::Write as _;
        tmp.write_all(&bytes)
            .map_err(|source| FileMapError::Write { path: self.path.clone(), source })?;
        tmp.persist(&self.path)
            .map_err(|e| FileMapError::Write { path: self.path.clone(), source: e.error })?;
        Ok(())
    }

    /// Records `dst_path` as pending for `(dataset_id, rank)` and
    /// flushes immediately, satisfying the "recorded before written"
    /// invariant.
    pub fn record_pending_and_flush(
        &mut self,
        dataset_id: u64,
        rank: usize,
        dst_path: PathBuf,
    ) -> Result<(), FileMapError> {
        self.rank_record_mut(dataset_id, rank).files.push((dst_path, None));
        self.flush()
    }

    /// Attaches the outcome metadata to a previously pending entry.
    /// Fails if `dst_path` was never recorded as pending.
    pub fn attach_meta(
        &mut self,
        dataset_id: u64,
        rank: usize,
        dst_path: &Path,
        meta: FileMeta,
    ) -> Result<(), FileMapError> {
        let record = self.rank_record_mut(dataset_id, rank);
        let slot = record
            .files
            .iter_mut()
            .find(|(p, m)| p == dst_path && m.is_none())
            .ok_or_else(|| FileMapError::NotPending { path: dst_path.to_path_buf() })?;
        slot.1 = Some(meta);
        self.flush()
    }

    /// Records how many non-`NOFETCH` files this rank expects for this
    /// dataset.
    pub fn set_expected_files(&mut self, dataset_id: u64, rank: usize, count: usize) -> Result<(), FileMapError> {
        self.rank_record_mut(dataset_id, rank).expected_files = Some(count);
        self.flush()
    }

    /// Stamps the redundancy descriptor snapshot used for this attempt.
    pub fn set_redundancy_descriptor(
        &mut self,
        dataset_id: u64,
        rank: usize,
        descriptor: impl Into<String>,
    ) -> Result<(), FileMapError> {
        self.rank_record_mut(dataset_id, rank).redundancy_descriptor = Some(descriptor.into());
        self.flush()
    }

    /// Removes every entry for `dataset_id`, across all ranks this
    /// process knows about. Called by the cache manager before a fresh
    /// fetch attempt begins.
    pub fn purge_dataset(&mut self, dataset_id: u64) -> Result<(), FileMapError> {
        self.datasets.remove(&dataset_id);
        self.flush()
    }

    /// Iterates `(path, meta)` pairs recorded for `(dataset_id, rank)`,
    /// in insertion order. `meta` is `None` for entries still pending.
    pub fn files(&self, dataset_id: u64, rank: usize) -> impl Iterator<Item = (&Path, Option<&FileMeta>)> {
        self.datasets
            .get(&dataset_id)
            .and_then(|d| d.ranks.get(&rank))
            .into_iter()
            .flat_map(|r| r.files.iter().map(|(p, m)| (p.as_path(), m.as_ref())))
    }

    /// The `expected_files` count recorded for `(dataset_id, rank)`.
    pub fn expected_files(&self, dataset_id: u64, rank: usize) -> Option<usize> {
        self.datasets.get(&dataset_id)?.ranks.get(&rank)?.expected_files
    }

    /// The redundancy descriptor snapshot recorded for `(dataset_id, rank)`.
    pub fn redundancy_descriptor(&self, dataset_id: u64, rank: usize) -> Option<&str> {
        self.datasets.get(&dataset_id)?.ranks.get(&rank)?.redundancy_descriptor.as_deref()
    }

    /// Whether every recorded file for `(dataset_id, rank)` is present
    /// and marked complete.
    pub fn all_complete(&self, dataset_id: u64, rank: usize) -> bool {
        self.files(dataset_id, rank)
            .all(|(_, meta)| matches!(meta, Some(m) if m.complete))
    }

    fn rank_record_mut(&mut self, dataset_id: u64, rank: usize) -> &mut RankRecord {
        self.datasets.entry(dataset_id).or_default().ranks.entry(rank).or_default()
    }
}

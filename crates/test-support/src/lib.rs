#![deny(unsafe_code)]
//! # Overview
//!
//! `scr_test_support` collects the fixture builders used across this
//! workspace's test suites: synthetic summary-document trees, matching
//! on-disk checkpoint directories, index entries, and a deterministic
//! clock, so each crate's tests do not each hand-roll their own copy.
//!
//! # Design
//!
//! [`sample_dataset_tree`] and [`write_checkpoint_files`] are meant to
//! be used together: the tree describes a dataset whose files are
//! named `rank_<N>.dat` and carry a single shared payload, and the
//! writer puts exactly that content on disk at the directory the tree
//! will be loaded from.

use std::path::Path;
use std::time::{Duration, SystemTime};

use scr_checksums::crc32_of_slice;
use scr_index::CheckpointEntry;
use scr_logging::Clock;
use scr_tree::Node;

/// Builds a native-layout (no containers) summary tree for `world_size`
/// ranks, each owning a file named `rank_<rank>.dat` holding `payload`.
pub fn sample_dataset_tree(dataset_id: u64, checkpoint_id: i64, name: &str, world_size: usize, payload: &[u8]) -> Node {
    let mut root = Node::new();

    let mut dataset = Node::new();
    dataset.set_unsigned_long("DATASET_ID", dataset_id);
    dataset.set_int("CHECKPOINT_ID", checkpoint_id);
    dataset.set_string("NAME", name);
    root.set("DATASET", dataset);

    let mut rank2file = Node::new();
    let mut rank_table = Node::new();
    for rank in 0..world_size {
        let mut per_rank = Node::new();
        let mut files = Node::new();
        let mut record = Node::new();
        record.set_unsigned_long("SIZE", payload.len() as u64);
        record.set_crc32("CRC", crc32_of_slice(payload));
        files.set(format!("rank_{rank}.dat"), record);
        per_rank.set("FILE", files);
        rank_table.set(rank.to_string(), per_rank);
    }
    rank2file.set("RANK", rank_table);
    root.set("RANK2FILE", rank2file);

    root
}

/// Writes `rank_<N>.dat` for every rank under `dir`, matching the
/// layout [`sample_dataset_tree`] describes.
pub fn write_checkpoint_files(dir: &Path, world_size: usize, payload: &[u8]) {
    std::fs::create_dir_all(dir).expect("test fixture directory must be creatable");
    for rank in 0..world_size {
        std::fs::write(dir.join(format!("rank_{rank}.dat")), payload)
            .expect("test fixture file must be writable");
    }
}

/// Builds a complete, non-failed index entry.
pub fn sample_index_entry(dataset_id: u64, checkpoint_id: i64, subdirectory: &str) -> CheckpointEntry {
    CheckpointEntry {
        dataset_id,
        checkpoint_id,
        subdirectory: subdirectory.to_string(),
        name: subdirectory.to_string(),
        complete: true,
        fetched: false,
        failed: false,
    }
}

/// A clock that always reports the same instant, advanced only by
/// explicit calls to [`FakeClock::advance`].
#[derive(Debug)]
pub struct FakeClock {
    epoch_seconds: std::sync::atomic::AtomicU64,
}

impl FakeClock {
    pub fn new(epoch_seconds: u64) -> Self {
        Self { epoch_seconds: std::sync::atomic::AtomicU64::new(epoch_seconds) }
    }

    pub fn advance(&self, seconds: u64) {
        self.epoch_seconds.fetch_add(seconds, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        let secs = self.epoch_seconds.load(std::sync::atomic::Ordering::SeqCst);
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_dataset_tree_round_trips_through_accessors() {
        let tree = sample_dataset_tree(7, 3, "ckpt.3", 2, b"hello");
        let dataset = tree.get("DATASET").unwrap();
        assert_eq!(dataset.unsigned_long("DATASET_ID").unwrap(), 7);
        assert_eq!(dataset.int("CHECKPOINT_ID").unwrap(), 3);
        let files = tree.get_path("RANK2FILE/RANK/0/FILE").unwrap();
        assert!(files.get("rank_0.dat").is_some());
    }

    #[test]
    fn write_checkpoint_files_matches_the_tree_layout() {
        let dir = tempfile::tempdir().unwrap();
        write_checkpoint_files(dir.path(), 3, b"payload");
        for rank in 0..3 {
            assert_eq!(std::fs::read(dir.path().join(format!("rank_{rank}.dat"))).unwrap(), b"payload");
        }
    }

    #[test]
    fn fake_clock_only_advances_when_told() {
        let clock = FakeClock::new(1_000);
        let first = clock.now();
        assert_eq!(first, clock.now());
        clock.advance(5);
        assert_eq!(clock.now(), first + Duration::from_secs(5));
    }
}

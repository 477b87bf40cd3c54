use std::collections::HashMap;
use std::path::{Path, PathBuf};

use scr_checksums::verify;
use scr_container::{reconstruct, ContainerEntry, ContainerId};
use scr_filemap::{FileKind, FileMap, FileMeta};
use scr_io::copy_file;
use scr_logging::{Clock, FetchLog};

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::summary::FileRecord;

/// What a single rank's attempt to fetch all of its assigned files
/// came back with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOutcome {
    pub success: bool,
}

struct FetchOneOutcome {
    crc32: Option<u32>,
    bytes: u64,
}

/// Fetches every file assigned to `rank` for `dataset_id`, dispatching
/// each one to a plain copy or a container reconstruction depending on
/// whether it carries `SEGMENT`s.
///
/// A file's destination path is durably recorded in `file_map` before
/// any of its bytes are written (see the map's own monotonic-ordering
/// invariant), so a crash partway through always leaves the map ahead
/// of the cache directory's actual contents, never behind.
///
/// `log` is `Some` only for the rank that owns a live [`FetchLog`]
/// (the coordinator, fetching its own files); every other rank passes
/// `None` and no transfer records are produced for it.
#[allow(clippy::too_many_arguments)]
pub fn fetch_rank_files(
    dataset_id: u64,
    rank: usize,
    cache_dir: &Path,
    files: &[FileRecord],
    containers: &HashMap<ContainerId, ContainerEntry>,
    file_map: &mut FileMap,
    config: FetchConfig,
    log: Option<(&FetchLog, &dyn Clock)>,
) -> Result<FetchOutcome, FetchError> {
    let expected = files.iter().filter(|f| !f.nofetch).count();
    file_map.set_expected_files(dataset_id, rank, expected)?;

    let mut all_ok = true;
    for file in files {
        if file.nofetch {
            continue;
        }
        let dst_path = cache_dir.join(dest_basename(&file.filename));
        file_map.record_pending_and_flush(dataset_id, rank, dst_path.clone())?;

        let outcome = fetch_one_file(file, &dst_path, containers, &config);
        let (complete, crc32, bytes) = match outcome {
            Ok(result) => (true, result.crc32, result.bytes),
            Err(_) => {
                all_ok = false;
                (false, None, 0)
            }
        };

        if complete {
            if let Some((log, clock)) = log {
                log.transfer(clock, cache_dir.display().to_string(), Some(dataset_id), source_path(file), dst_path.clone(), bytes);
            }
        }

        file_map.attach_meta(
            dataset_id,
            rank,
            &dst_path,
            FileMeta { name: dst_path.clone(), kind: FileKind::Full, size: file.size, crc32, complete, ranks: 1 },
        )?;
    }

    Ok(FetchOutcome { success: all_ok })
}

/// The basename a file's bytes are written under in the cache
/// directory: the source-side directory hierarchy in `filename` is
/// never preserved locally.
fn dest_basename(filename: &str) -> PathBuf {
    Path::new(filename).file_name().map(PathBuf::from).unwrap_or_else(|| PathBuf::from(filename))
}

fn source_path(file: &FileRecord) -> PathBuf {
    match &file.path {
        Some(dir) => dir.join(&file.filename),
        None => PathBuf::from(&file.filename),
    }
}

fn fetch_one_file(
    file: &FileRecord,
    dst_path: &Path,
    containers: &HashMap<ContainerId, ContainerEntry>,
    config: &FetchConfig,
) -> Result<FetchOneOutcome, FetchError> {
    if file.segments.is_empty() {
        let src_dir = file.path.as_deref().ok_or(FetchError::MissingDataset)?;
        let src_path: PathBuf = src_dir.join(&file.filename);
        let outcome = copy_file(&src_path, dst_path, config.buf_size, config.crc_on_flush)?;
        if let (true, Some(expected), Some(computed)) = (config.crc_on_flush, file.crc32, outcome.crc32) {
            verify(expected, computed)?;
        }
        Ok(FetchOneOutcome { crc32: outcome.crc32, bytes: outcome.bytes_copied })
    } else {
        let outcome = reconstruct(dst_path, &file.segments, containers, config.buf_size, file.crc32)?;
        Ok(FetchOneOutcome { crc32: outcome.crc32, bytes: outcome.bytes_written })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfigBuilder;
    use scr_checksums::crc32_of_slice;
    use scr_logging::SystemClock;

    fn config() -> FetchConfig {
        FetchConfigBuilder::new().build(1).unwrap()
    }

    #[test]
    fn native_layout_copies_and_verifies_crc() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("a.dat"), b"payload").unwrap();

        let files = vec![FileRecord {
            filename: "a.dat".to_string(),
            size: 7,
            crc32: Some(crc32_of_slice(b"payload")),
            complete: true,
            path: Some(src_dir.path().to_path_buf()),
            nofetch: false,
            segments: Vec::new(),
        }];

        let mut file_map = FileMap::open(dst_dir.path().join("filemap.json")).unwrap();
        let outcome =
            fetch_rank_files(1, 0, dst_dir.path(), &files, &HashMap::new(), &mut file_map, config(), None).unwrap();
        assert!(outcome.success);
        assert_eq!(std::fs::read(dst_dir.path().join("a.dat")).unwrap(), b"payload");
        assert!(file_map.all_complete(1, 0));
    }

    #[test]
    fn nofetch_files_are_skipped_and_not_counted() {
        let dst_dir = tempfile::tempdir().unwrap();
        let files = vec![FileRecord {
            filename: "skip.dat".to_string(),
            size: 0,
            crc32: None,
            complete: true,
            path: Some(dst_dir.path().to_path_buf()),
            nofetch: true,
            segments: Vec::new(),
        }];
        let mut file_map = FileMap::open(dst_dir.path().join("filemap.json")).unwrap();
        let outcome =
            fetch_rank_files(1, 0, dst_dir.path(), &files, &HashMap::new(), &mut file_map, config(), None).unwrap();
        assert!(outcome.success);
        assert_eq!(file_map.expected_files(1, 0), Some(0));
    }

    #[test]
    fn crc_mismatch_marks_file_incomplete_but_keeps_map_consistent() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("a.dat"), b"payload").unwrap();

        let files = vec![FileRecord {
            filename: "a.dat".to_string(),
            size: 7,
            crc32: Some(0xdead_beef),
            complete: true,
            path: Some(src_dir.path().to_path_buf()),
            nofetch: false,
            segments: Vec::new(),
        }];

        let mut file_map = FileMap::open(dst_dir.path().join("filemap.json")).unwrap();
        let outcome =
            fetch_rank_files(1, 0, dst_dir.path(), &files, &HashMap::new(), &mut file_map, config(), None).unwrap();
        assert!(!outcome.success);
        assert!(!file_map.all_complete(1, 0));
    }

    #[test]
    fn source_side_subdirectory_is_not_preserved_in_the_cache_directory() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src_dir.path().join("ckpt")).unwrap();
        std::fs::write(src_dir.path().join("ckpt").join("a.dat"), b"payload").unwrap();

        let files = vec![FileRecord {
            filename: "ckpt/a.dat".to_string(),
            size: 7,
            crc32: Some(crc32_of_slice(b"payload")),
            complete: true,
            path: Some(src_dir.path().to_path_buf()),
            nofetch: false,
            segments: Vec::new(),
        }];

        let mut file_map = FileMap::open(dst_dir.path().join("filemap.json")).unwrap();
        let outcome =
            fetch_rank_files(1, 0, dst_dir.path(), &files, &HashMap::new(), &mut file_map, config(), None).unwrap();
        assert!(outcome.success);
        assert_eq!(std::fs::read(dst_dir.path().join("a.dat")).unwrap(), b"payload");
        assert!(!dst_dir.path().join("ckpt").exists());
    }

    #[test]
    fn successful_fetch_records_a_transfer_event_when_a_log_is_supplied() {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        std::fs::write(src_dir.path().join("a.dat"), b"payload").unwrap();

        let files = vec![FileRecord {
            filename: "a.dat".to_string(),
            size: 7,
            crc32: Some(crc32_of_slice(b"payload")),
            complete: true,
            path: Some(src_dir.path().to_path_buf()),
            nofetch: false,
            segments: Vec::new(),
        }];

        let mut file_map = FileMap::open(dst_dir.path().join("filemap.json")).unwrap();
        let log = FetchLog::new();
        let clock = SystemClock;
        let outcome = fetch_rank_files(
            1,
            0,
            dst_dir.path(),
            &files,
            &HashMap::new(),
            &mut file_map,
            config(),
            Some((&log, &clock)),
        )
        .unwrap();
        assert!(outcome.success);

        let events = log.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].kind, scr_logging::FetchEventKind::Transfer(_)));
    }
}

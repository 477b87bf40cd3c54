#![deny(unsafe_code)]
//! # Overview
//!
//! `scr_container` reconstructs a single dataset file that was packed,
//! at write time, into one or more shared container files: given an
//! ordered list of segments and a table mapping container id to its
//! path and size, it seeks each container to the segment's offset and
//! copies `length` bytes into the output in segment order, maintaining
//! one running CRC32 across the whole reconstructed file.
//!
//! # Design
//!
//! Destination writes are purely sequential (never seeked), matching
//! how the summary document's segment list is itself append-only: a
//! file's bytes are the concatenation of its segments in ascending
//! index order, so the reader never needs to know a segment's final
//! placement in the output ahead of time. `copy_exact` loops on
//! `read()` until the requested length is satisfied or the underlying
//! reader reports EOF or a genuine error, since containers are read
//! from the same PFS a File Copier tolerates short reads against.
//!
//! # Invariants
//!
//! - A failure while reconstructing one segment aborts the whole file
//!   without rewinding bytes already written to the destination; the
//!   caller's cache manager is responsible for cleaning up partial
//!   files.
//! - The returned byte count always equals the sum of segment lengths
//!   on success.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use thiserror::Error;

use scr_checksums::RunningCrc32;

/// Identifies a container within a dataset's container table.
pub type ContainerId = u64;

/// A packed container file: its path on the parallel file system and
/// its size in bytes, used to bounds-check every segment that
/// references it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    pub path: PathBuf,
    pub size: u64,
}

/// One contiguous span of a reconstructed file, stored inside a
/// container at a given offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Ascending position of this segment within the target file.
    pub index: u64,
    pub container_id: ContainerId,
    pub offset: u64,
    pub length: u64,
}

/// Failures raised while reconstructing a file from containers.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("failed to create destination file {path}: {source}")]
    CreateDest { path: PathBuf, source: io::Error },

    #[error("segment references unknown container {container_id}")]
    UnknownContainer { container_id: ContainerId },

    #[error(
        "segment [offset={offset}, length={length}] exceeds container {container_id} of size {size}"
    )]
    OutOfBounds {
        container_id: ContainerId,
        offset: u64,
        length: u64,
        size: u64,
    },

    #[error("failed to open container {container_id} at {path}: {source}")]
    OpenContainer {
        container_id: ContainerId,
        path: PathBuf,
        source: io::Error,
    },

    #[error("failed to seek container {container_id}: {source}")]
    Seek { container_id: ContainerId, source: io::Error },

    #[error("i/o error reconstructing from container {container_id}: {source}")]
    Io { container_id: ContainerId, source: io::Error },

    #[error("unexpected end of container {container_id}: needed {needed} more bytes")]
    UnexpectedEof { container_id: ContainerId, needed: u64 },

    #[error(transparent)]
    Checksum(#[from] scr_checksums::ChecksumError),
}

/// The outcome of a successful reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconstructOutcome {
    pub bytes_written: u64,
    pub crc32: Option<u32>,
}

/// Reconstructs `dst` from `segments`, read out of `containers`.
///
/// Segments are sorted by [`Segment::index`] before copying, regardless
/// of the order they were supplied in. When `expected_crc` is `Some`,
/// the computed running CRC32 is compared against it and a mismatch is
/// reported as [`ContainerError::Checksum`].
pub fn reconstruct(
    dst: &Path,
    segments: &[Segment],
    containers: &HashMap<ContainerId, ContainerEntry>,
    buf_size: usize,
    expected_crc: Option<u32>,
) -> Result<ReconstructOutcome, ContainerError> {
    let mut ordered: Vec<&Segment> = segments.iter().collect();
    ordered.sort_by_key(|s| s.index);

    let mut dest = create_dest(dst)?;
    let mut buf = vec![0u8; buf_size.max(1)];
    let mut running = RunningCrc32::new();
    let mut bytes_written: u64 = 0;

    for segment in ordered {
        let entry = containers
            .get(&segment.container_id)
            .ok_or(ContainerError::UnknownContainer { container_id: segment.container_id })?;

        let end = segment
            .offset
            .checked_add(segment.length)
            .ok_or(ContainerError::OutOfBounds {
                container_id: segment.container_id,
                offset: segment.offset,
                length: segment.length,
                size: entry.size,
            })?;
        if end > entry.size {
            return Err(ContainerError::OutOfBounds {
                container_id: segment.container_id,
                offset: segment.offset,
                length: segment.length,
                size: entry.size,
            });
        }

        let mut container = OpenOptions::new().read(true).open(&entry.path).map_err(|source| {
            ContainerError::OpenContainer {
                container_id: segment.container_id,
                path: entry.path.clone(),
                source,
            }
        })?;
        container
            .seek(SeekFrom::Start(segment.offset))
            .map_err(|source| ContainerError::Seek { container_id: segment.container_id, source })?;

        copy_exact(
            &mut container,
            &mut dest,
            segment.length,
            segment.container_id,
            &mut buf,
            &mut running,
        )?;
        bytes_written += segment.length;
    }

    dest.flush().map_err(|source| ContainerError::Io { container_id: 0, source })?;

    let crc32 = running.finalize();
    if let Some(expected) = expected_crc {
        scr_checksums::verify(expected, crc32)?;
    }

    Ok(ReconstructOutcome { bytes_written, crc32: Some(crc32) })
}

fn copy_exact<R: Read>(
    src: &mut R,
    dst: &mut impl Write,
    mut remaining: u64,
    container_id: ContainerId,
    buf: &mut [u8],
    running: &mut RunningCrc32,
) -> Result<(), ContainerError> {
    while remaining > 0 {
        let want = (remaining as usize).min(buf.len());
        let n = src
            .read(&mut buf[..want])
            .map_err(|source| ContainerError::Io { container_id, source })?;
        if n == 0 {
            return Err(ContainerError::UnexpectedEof { container_id, needed: remaining });
        }
        dst.write_all(&buf[..n])
            .map_err(|source| ContainerError::Io { container_id, source })?;
        running.update(&buf[..n]);
        remaining -= n as u64;
    }
    Ok(())
}

fn create_dest(dst: &Path) -> Result<std::fs::File, ContainerError> {
    #[cfg(unix)]
    let opened = OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(dst);
    #[cfg(not(unix))]
    let opened = OpenOptions::new().write(true).create(true).truncate(true).open(dst);

    opened.map_err(|source| ContainerError::CreateDest { path: dst.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pack(dir: &Path, bytes: &[u8]) -> ContainerEntry {
        let path = dir.join("pack.bin");
        std::fs::write(&path, bytes).unwrap();
        ContainerEntry { path, size: bytes.len() as u64 }
    }

    #[test]
    fn reconstructs_file_from_out_of_order_segments() {
        let dir = tempfile::tempdir().unwrap();
        let pack: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        let entry = write_pack(dir.path(), &pack);
        let mut containers = HashMap::new();
        containers.insert(1, entry);

        let segments = vec![
            Segment { index: 1, container_id: 1, offset: 1500, length: 2596 },
            Segment { index: 0, container_id: 1, offset: 0, length: 1500 },
        ];

        let dst = dir.path().join("out.bin");
        let outcome = reconstruct(&dst, &segments, &containers, 512, None).unwrap();

        assert_eq!(outcome.bytes_written, 4096);
        assert_eq!(std::fs::read(&dst).unwrap(), pack);
        assert_eq!(outcome.crc32, Some(scr_checksums::crc32_of_slice(&pack)));
    }

    #[test]
    fn empty_segment_list_produces_zero_length_file_with_zero_crc() {
        let dir = tempfile::tempdir().unwrap();
        let containers = HashMap::new();
        let dst = dir.path().join("empty.bin");
        let outcome = reconstruct(&dst, &[], &containers, 4096, None).unwrap();
        assert_eq!(outcome.bytes_written, 0);
        assert_eq!(outcome.crc32, Some(0));
        assert_eq!(std::fs::metadata(&dst).unwrap().len(), 0);
    }

    #[test]
    fn out_of_bounds_segment_is_rejected_without_touching_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let entry = write_pack(dir.path(), &[0u8; 10]);
        let mut containers = HashMap::new();
        containers.insert(1, entry);

        let segments = vec![Segment { index: 0, container_id: 1, offset: 5, length: 10 }];
        let dst = dir.path().join("out.bin");
        let err = reconstruct(&dst, &segments, &containers, 64, None).unwrap_err();
        assert!(matches!(err, ContainerError::OutOfBounds { .. }));
    }

    #[test]
    fn crc_mismatch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let entry = write_pack(dir.path(), b"hello world");
        let mut containers = HashMap::new();
        containers.insert(1, entry);
        let segments = vec![Segment { index: 0, container_id: 1, offset: 0, length: 11 }];
        let dst = dir.path().join("out.bin");
        let err = reconstruct(&dst, &segments, &containers, 64, Some(0xdead_beef)).unwrap_err();
        assert!(matches!(err, ContainerError::Checksum(_)));
    }

    #[test]
    fn unknown_container_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let containers = HashMap::new();
        let segments = vec![Segment { index: 0, container_id: 99, offset: 0, length: 4 }];
        let dst = dir.path().join("out.bin");
        let err = reconstruct(&dst, &segments, &containers, 64, None).unwrap_err();
        assert!(matches!(err, ContainerError::UnknownContainer { container_id: 99 }));
    }
}

#![deny(unsafe_code)]
//! # Overview
//!
//! `scr_io` copies a single source file into a destination directory,
//! optionally computing a running CRC32 as it goes. This is the File
//! Copier every per-rank fetch ultimately bottoms out on, whether the
//! source is a plain one-file-per-rank dataset file or a span already
//! extracted from a container by `scr-container`.
//!
//! # Design
//!
//! The copy loop is a plain buffered read/write loop sized by the
//! caller's configured buffer size, not a zero-copy `sendfile`/`splice`
//! fast path: checkpoint files are read once and never re-served, so
//! the kernel's copy acceleration the original tool chases for repeated
//! transfers buys nothing here. On Unix the source is advised
//! sequential-access and both ends are advised `DONTNEED` once the copy
//! finishes, so a burst of large checkpoint copies does not evict
//! unrelated pages from the cache.
//!
//! # Invariants
//!
//! - The destination file is created with `0o600` permissions; nothing
//!   written through this crate lands world- or group-readable.
//! - A short `read()` is never treated as EOF; the loop only stops on
//!   `Ok(0)`.

use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use thiserror::Error;

use scr_checksums::RunningCrc32;

/// Failures raised while copying a file.
#[derive(Debug, Error)]
pub enum CopyError {
    /// The source file could not be opened for reading.
    #[error("failed to open source file {path}: {source}")]
    OpenSource { path: PathBuf, source: io::Error },

    /// The destination file could not be created.
    #[error("failed to create destination file {path}: {source}")]
    CreateDest { path: PathBuf, source: io::Error },

    /// Reading from the source or writing to the destination failed.
    #[error("i/o error copying to {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// The outcome of a successful copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Total bytes copied.
    pub bytes_copied: u64,
    /// The running CRC32 of the copied bytes, if one was requested.
    pub crc32: Option<u32>,
}

/// Copies `src` to `dst`, reading and writing in chunks of `buf_size`
/// bytes. When `want_crc` is set, a CRC32 is accumulated across every
/// chunk and returned in [`CopyOutcome::crc32`].
pub fn copy_file(src: &Path, dst: &Path, buf_size: usize, want_crc: bool) -> Result<CopyOutcome, CopyError> {
    let mut source = OpenOptions::new()
        .read(true)
        .open(src)
        .map_err(|source_err| CopyError::OpenSource { path: src.to_path_buf(), source: source_err })?;

    #[cfg(unix)]
    advise_sequential(&source);

    let mut dest = create_dest(dst)?;

    let mut buf = vec![0u8; buf_size.max(1)];
    let mut running = want_crc.then(RunningCrc32::new);
    let mut bytes_copied: u64 = 0;

    loop {
        let n = source
            .read(&mut buf)
            .map_err(|source_err| CopyError::Io { path: src.to_path_buf(), source: source_err })?;
        if n == 0 {
            break;
        }
        dest.write_all(&buf[..n])
            .map_err(|source_err| CopyError::Io { path: dst.to_path_buf(), source: source_err })?;
        if let Some(running) = running.as_mut() {
            running.update(&buf[..n]);
        }
        bytes_copied += n as u64;
    }

    dest.flush()
        .map_err(|source_err| CopyError::Io { path: dst.to_path_buf(), source: source_err })?;

    #[cfg(unix)]
    {
        advise_dont_need(&source);
        advise_dont_need(&dest);
    }

    Ok(CopyOutcome {
        bytes_copied,
        crc32: running.map(RunningCrc32::finalize),
    })
}

fn create_dest(dst: &Path) -> Result<std::fs::File, CopyError> {
    #[cfg(unix)]
    let opened = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(dst);
    #[cfg(not(unix))]
    let opened = OpenOptions::new().write(true).create(true).truncate(true).open(dst);

    opened.map_err(|source_err| CopyError::CreateDest { path: dst.to_path_buf(), source: source_err })
}

#[cfg(unix)]
fn advise_sequential(file: &std::fs::File) {
    let _ = rustix::fs::fadvise(file, 0, None, rustix::fs::Advice::Sequential);
}

#[cfg(unix)]
fn advise_dont_need(file: &std::fs::File) {
    let _ = rustix::fs::fadvise(file, 0, None, rustix::fs::Advice::DontNeed);
}

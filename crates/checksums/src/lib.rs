#![deny(unsafe_code)]
//! # Overview
//!
//! `scr_checksums` computes the CRC32 checksums the checkpoint fetch
//! core uses to validate file copies and container reconstructions. The
//! original tool supports several digests for different purposes; the
//! fetch path only ever needs one, streamed across chunk boundaries, so
//! this crate carries CRC32 alone rather than the full digest family.
//!
//! # Design
//!
//! [`RunningCrc32`] wraps [`crc32fast::Hasher`] so callers can feed it
//! chunks as they arrive from a copy loop or a multi-segment container
//! read without holding the whole file in memory, matching how the
//! summary document's `CRC` field is meant to be computed: one running
//! value across however many `read()` calls it takes.
//!
//! # Invariants
//!
//! - [`RunningCrc32::update`] may be called any number of times in any
//!   chunk size; the final value is independent of how the input was
//!   split.
//! - [`verify`] never panics; a mismatch is a returned [`ChecksumError`].

use std::io::{self, Read};

use thiserror::Error;

/// A CRC32 accumulator fed chunk by chunk.
#[derive(Default)]
pub struct RunningCrc32 {
    hasher: crc32fast::Hasher,
}

impl RunningCrc32 {
    /// Creates a fresh accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds another chunk of bytes into the running checksum.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Consumes the accumulator, returning the final CRC32 value.
    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

/// Computes the CRC32 of an in-memory buffer in one call.
pub fn crc32_of_slice(bytes: &[u8]) -> u32 {
    let mut running = RunningCrc32::new();
    running.update(bytes);
    running.finalize()
}

/// Computes the CRC32 of a reader by streaming it through a fixed-size
/// buffer, tolerant of short reads the way a copy loop must be: it keeps
/// reading until the reader reports EOF (`Ok(0)`), not until a single
/// `read` call happens to fill the buffer.
pub fn crc32_of_reader<R: Read>(reader: &mut R, buf_size: usize) -> io::Result<u32> {
    let mut running = RunningCrc32::new();
    let mut buf = vec![0u8; buf_size.max(1)];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        running.update(&buf[..n]);
    }
    Ok(running.finalize())
}

/// A CRC32 check failed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("crc32 mismatch: expected {expected:#010x}, computed {computed:#010x}")]
pub struct ChecksumError {
    /// The value recorded in the summary document or container table.
    pub expected: u32,
    /// The value actually computed from the data on disk.
    pub computed: u32,
}

/// Compares an expected CRC32 (e.g. from a summary document) against a
/// freshly computed one, returning a [`ChecksumError`] on mismatch.
pub fn verify(expected: u32, computed: u32) -> Result<(), ChecksumError> {
    if expected == computed {
        Ok(())
    } else {
        Err(ChecksumError { expected, computed })
    }
}

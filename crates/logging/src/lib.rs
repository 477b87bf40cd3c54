#![deny(unsafe_code)]
//! # Overview
//!
//! `scr_logging` records the lifecycle events a checkpoint fetch
//! produces — `FETCH STARTED`, `FETCH SUCCEEDED`, `FETCH FAILED`, and
//! per-file transfer records — without ever being able to fail or block
//! the fetch that is generating them.
//!
//! # Design
//!
//! [`FetchLog`] buffers events in memory behind a mutex and hands them
//! back via [`FetchLog::drain_events`], the same dual
//! buffer-plus-optional-bridge shape the original tool's logging
//! machinery uses to let a caller inspect what happened without forcing
//! every deployment to wire up a real sink. With the `tracing` feature
//! enabled, each recorded event is also emitted through the `tracing`
//! crate at the appropriate level, so a deployment that already
//! collects `tracing` spans gets fetch lifecycle events for free.
//!
//! # Invariants
//!
//! - [`FetchLog::record`] never panics and never returns an error; a
//!   logging failure must never fail or delay a fetch attempt.
//! - Only the coordinator rank is expected to hold a live [`FetchLog`];
//!   worker ranks observe nothing to log.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

/// A source of wall-clock time, abstracted so tests can supply a fixed
/// or stepped clock instead of the real one.
pub trait Clock: Send + Sync {
    /// The current wall-clock time.
    fn now(&self) -> SystemTime;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Detail attached to a file-transfer lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub bytes: u64,
}

/// What kind of lifecycle moment an event records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEventKind {
    Started,
    Succeeded,
    Failed,
    Transfer(TransferRecord),
}

/// One recorded lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchEvent {
    pub kind: FetchEventKind,
    pub directory: String,
    pub dataset_id: Option<u64>,
    pub timestamp: SystemTime,
    pub elapsed_secs: Option<f64>,
}

/// An in-memory sink for fetch lifecycle events.
#[derive(Default)]
pub struct FetchLog {
    events: Mutex<Vec<FetchEvent>>,
}

impl FetchLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an event. Never fails; a poisoned internal mutex (which
    /// can only happen if a prior recording panicked mid-update, itself
    /// never the case here) is recovered from rather than propagated.
    pub fn record(&self, event: FetchEvent) {
        #[cfg(feature = "tracing")]
        emit_tracing(&event);

        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }

    /// Convenience for [`FetchEventKind::Started`].
    pub fn started(&self, clock: &dyn Clock, directory: impl Into<String>, dataset_id: Option<u64>) {
        self.record(FetchEvent {
            kind: FetchEventKind::Started,
            directory: directory.into(),
            dataset_id,
            timestamp: clock.now(),
            elapsed_secs: None,
        });
    }

    /// Convenience for [`FetchEventKind::Succeeded`].
    pub fn succeeded(
        &self,
        clock: &dyn Clock,
        directory: impl Into<String>,
        dataset_id: Option<u64>,
        elapsed_secs: f64,
    ) {
        self.record(FetchEvent {
            kind: FetchEventKind::Succeeded,
            directory: directory.into(),
            dataset_id,
            timestamp: clock.now(),
            elapsed_secs: Some(elapsed_secs),
        });
    }

    /// Convenience for [`FetchEventKind::Failed`].
    pub fn failed(
        &self,
        clock: &dyn Clock,
        directory: impl Into<String>,
        dataset_id: Option<u64>,
        elapsed_secs: f64,
    ) {
        self.record(FetchEvent {
            kind: FetchEventKind::Failed,
            directory: directory.into(),
            dataset_id,
            timestamp: clock.now(),
            elapsed_secs: Some(elapsed_secs),
        });
    }

    /// Convenience for [`FetchEventKind::Transfer`].
    pub fn transfer(
        &self,
        clock: &dyn Clock,
        directory: impl Into<String>,
        dataset_id: Option<u64>,
        src: PathBuf,
        dst: PathBuf,
        bytes: u64,
    ) {
        self.record(FetchEvent {
            kind: FetchEventKind::Transfer(TransferRecord { src, dst, bytes }),
            directory: directory.into(),
            dataset_id,
            timestamp: clock.now(),
            elapsed_secs: None,
        });
    }

    /// Drains and returns every event recorded so far, in order.
    pub fn drain_events(&self) -> Vec<FetchEvent> {
        match self.events.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

#[cfg(feature = "tracing")]
fn emit_tracing(event: &FetchEvent) {
    match &event.kind {
        FetchEventKind::Started => {
            tracing::info!(directory = %event.directory, dataset_id = ?event.dataset_id, "FETCH STARTED")
        }
        FetchEventKind::Succeeded => {
            tracing::info!(
                directory = %event.directory,
                dataset_id = ?event.dataset_id,
                elapsed_secs = ?event.elapsed_secs,
                "FETCH SUCCEEDED"
            )
        }
        FetchEventKind::Failed => {
            tracing::warn!(
                directory = %event.directory,
                dataset_id = ?event.dataset_id,
                elapsed_secs = ?event.elapsed_secs,
                "FETCH FAILED"
            )
        }
        FetchEventKind::Transfer(record) => {
            tracing::debug!(
                directory = %event.directory,
                src = %record.src.display(),
                dst = %record.dst.display(),
                bytes = record.bytes,
                "transfer"
            )
        }
    }
}

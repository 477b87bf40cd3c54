#![deny(unsafe_code)]
//! # Overview
//!
//! `scr_core` is the checkpoint fetch core: the SPMD-coordinated walk
//! that reads a checkpoint dataset back from a parallel file system into
//! a local cache, selecting the newest usable candidate from a
//! catalog and falling back to older ones when an attempt fails.
//!
//! # Design
//!
//! Each concern lives in its own module and is wired together only by
//! [`attempt::fetch_sync`], the single collective entry point every
//! rank calls: [`summary`] loads and distributes a checkpoint's file
//! list, [`fetch`] copies or reconstructs each file a rank owns,
//! [`flow`] throttles how many ranks read concurrently, and
//! [`attempt`] drives the retry state machine across candidates drawn
//! from the index. [`role::Role`] replaces scattered `rank == 0`
//! checks with a type that only rank 0 can construct
//! [`attempt::CoordinatorState`] against.
//!
//! # Invariants
//!
//! - Every rank calls [`attempt::fetch_sync`] the same number of times
//!   with arguments that agree on every collective-relevant value
//!   (`prefix_dir`, `config.fetch_width`); see [`fabric::Fabric`] for
//!   why.
//! - Only rank 0 may hold a live [`attempt::CoordinatorState`].

mod attempt;
mod cache;
mod config;
mod descriptor;
mod error;
mod fetch;
mod flow;
mod flush;
mod role;
mod summary;

pub use attempt::{fetch_sync, AttemptOutcome, CoordinatorState, FetchSyncResult};
pub use cache::{CacheManager, LocalCacheManager};
pub use config::{ConfigError, FetchConfig, FetchConfigBuilder};
pub use descriptor::{NoopRedundancyApply, NullRedundancyDescriptor, RedundancyApply, RedundancyDescriptor};
pub use error::FetchError;
pub use fetch::{fetch_rank_files, FetchOutcome};
pub use flow::run_flow_controller;
pub use flush::{FlushFile, FlushLocation, InMemoryFlushFile};
pub use role::Role;
pub use summary::{load_summary, DatasetHeader, FileRecord, JsonSummaryReader, LoadedSummary, SummaryReader};

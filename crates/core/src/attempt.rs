use std::path::Path;
use std::time::Instant;

use fabric::Fabric;
use scr_index::{CheckpointEntry, Index};
use scr_logging::{Clock, FetchLog};

use crate::cache::CacheManager;
use crate::config::FetchConfig;
use crate::descriptor::{RedundancyApply, RedundancyDescriptor};
use crate::error::FetchError;
use crate::fetch::fetch_rank_files;
use crate::flow::run_flow_controller;
use crate::flush::{FlushFile, FlushLocation};
use crate::role::Role;
use crate::summary::{load_summary, SummaryReader};

/// How one attempt against a single candidate checkpoint came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success { dataset_id: u64, checkpoint_id: i64 },
    /// Retry against an older candidate, excluding this `checkpoint_id`
    /// and everything at or above it.
    RetryWithout { checkpoint_id: i64 },
    /// No further candidate exists; the whole fetch gives up.
    GiveUp,
}

/// The index, flush file, and lifecycle log — all owned exclusively by
/// rank 0. Constructing one is the only way to obtain coordinator
/// privileges; every function in this module that needs them takes
/// `Option<&mut CoordinatorState>` and is `None` on every other rank.
pub struct CoordinatorState<'a> {
    pub index: &'a mut Index,
    pub flush_file: &'a mut dyn FlushFile,
    pub log: &'a FetchLog,
    pub clock: &'a dyn Clock,
}

/// What a complete call to [`fetch_sync`] produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSyncResult {
    /// Set the moment any attempt chose a non-empty candidate, even if
    /// every attempt ultimately failed.
    pub fetch_attempted: bool,
    /// `Some((dataset_id, checkpoint_id))` on success.
    pub outcome: Option<(u64, i64)>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct CandidatePayload {
    dataset_id: u64,
    checkpoint_id: i64,
    subdirectory: String,
}

/// Drives the attempt state machine to completion: select a candidate,
/// attempt it, retry against an older one on failure, give up once the
/// index has nothing left to offer.
///
/// Every rank must call this exactly once per fetch request with a
/// `coordinator` that is `Some` iff `Role::for_rank(fabric.rank())` is
/// [`Role::Coordinator`] — every collective call inside is made by
/// every rank in identical order regardless of role.
///
/// Returns `Err(FetchError::MissingFetchDirectory)` without entering
/// the attempt/retry loop, touching the index, or making any
/// collective call, if `prefix_dir` does not exist or is empty — every
/// rank observes the same local filesystem, so this check does not
/// need to be broadcast to stay symmetric.
#[allow(clippy::too_many_arguments)]
pub fn fetch_sync<F: Fabric>(
    fabric: &F,
    config: FetchConfig,
    prefix_dir: &Path,
    cache: &dyn CacheManager,
    summary_reader: &dyn SummaryReader,
    redundancy_descriptor: &dyn RedundancyDescriptor,
    redundancy_apply: &dyn RedundancyApply,
    file_map: &mut scr_filemap::FileMap,
    mut coordinator: Option<CoordinatorState<'_>>,
) -> Result<FetchSyncResult, FetchError> {
    debug_assert_eq!(Role::for_rank(fabric.rank()).is_coordinator(), coordinator.is_some());

    validate_fetch_directory(prefix_dir)?;

    let mut exclude_below: Option<i64> = None;
    let mut fetch_attempted = false;

    loop {
        match run_one_attempt(
            fabric,
            config,
            prefix_dir,
            cache,
            summary_reader,
            redundancy_descriptor,
            redundancy_apply,
            file_map,
            coordinator.as_mut(),
            exclude_below,
        ) {
            AttemptOutcome::GiveUp => return Ok(FetchSyncResult { fetch_attempted, outcome: None }),
            AttemptOutcome::Success { dataset_id, checkpoint_id } => {
                return Ok(FetchSyncResult { fetch_attempted: true, outcome: Some((dataset_id, checkpoint_id)) });
            }
            AttemptOutcome::RetryWithout { checkpoint_id } => {
                fetch_attempted = true;
                exclude_below = Some(checkpoint_id);
            }
        }
    }
}

/// A configuration error, not a per-attempt one: caught before the
/// retry loop starts, so a missing or empty fetch directory never
/// marks the index as fetched or failed.
fn validate_fetch_directory(prefix_dir: &Path) -> Result<(), FetchError> {
    let mut entries = std::fs::read_dir(prefix_dir).map_err(|_| FetchError::MissingFetchDirectory)?;
    if entries.next().is_none() {
        return Err(FetchError::MissingFetchDirectory);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_one_attempt<F: Fabric>(
    fabric: &F,
    config: FetchConfig,
    prefix_dir: &Path,
    cache: &dyn CacheManager,
    summary_reader: &dyn SummaryReader,
    redundancy_descriptor: &dyn RedundancyDescriptor,
    redundancy_apply: &dyn RedundancyApply,
    file_map: &mut scr_filemap::FileMap,
    mut coordinator: Option<&mut CoordinatorState<'_>>,
    exclude_below: Option<i64>,
) -> AttemptOutcome {
    let Some(candidate) = select_and_broadcast_candidate(fabric, coordinator.as_deref(), prefix_dir, exclude_below)
    else {
        return AttemptOutcome::GiveUp;
    };

    let rank = fabric.rank();
    let fetch_dir = prefix_dir.join(&candidate.subdirectory);
    let attempt_start = Instant::now();

    prepare_attempt(
        &candidate,
        &fetch_dir,
        rank,
        cache,
        redundancy_descriptor,
        file_map,
        coordinator.as_deref_mut(),
    );

    let success =
        run_fetch(fabric, config, &candidate, &fetch_dir, cache, summary_reader, file_map, coordinator.as_deref());

    let final_success = if success {
        let apply_ok = apply_redundancy(fabric, &candidate, redundancy_apply, coordinator.as_deref());
        if apply_ok {
            finalize(&candidate, prefix_dir, &fetch_dir, attempt_start, coordinator.as_deref_mut());
            return AttemptOutcome::Success { dataset_id: candidate.dataset_id, checkpoint_id: candidate.checkpoint_id };
        }
        false
    } else {
        false
    };

    if !final_success {
        mark_failed(&candidate, prefix_dir, &fetch_dir, cache, attempt_start, coordinator);
    }

    AttemptOutcome::RetryWithout { checkpoint_id: candidate.checkpoint_id }
}

fn select_and_broadcast_candidate<F: Fabric>(
    fabric: &F,
    coordinator: Option<&CoordinatorState<'_>>,
    prefix_dir: &Path,
    exclude_below: Option<i64>,
) -> Option<CandidatePayload> {
    const ROOT: usize = 0;
    let mut buf = if let Some(state) = coordinator {
        let picked = select_candidate(state.index, prefix_dir, exclude_below);
        match picked {
            Some(entry) => {
                let payload = CandidatePayload {
                    dataset_id: entry.dataset_id,
                    checkpoint_id: entry.checkpoint_id,
                    subdirectory: entry.subdirectory,
                };
                let mut buf = vec![0u8];
                buf.extend(serde_json::to_vec(&payload).expect("CandidatePayload serialization is infallible"));
                buf
            }
            None => vec![1u8],
        }
    } else {
        Vec::new()
    };

    fabric.broadcast_bytes(ROOT, &mut buf);
    match buf.first() {
        Some(0) => serde_json::from_slice(&buf[1..]).ok(),
        _ => None,
    }
}

fn select_candidate(index: &Index, prefix_dir: &Path, exclude_below: Option<i64>) -> Option<CheckpointEntry> {
    if exclude_below.is_none() {
        if let Some(dir) = scr_index::current(prefix_dir) {
            if let Some(entry) = index.get_entry_by_dir(&dir) {
                return Some(entry.clone());
            }
        }
    }
    index.get_most_recent_complete(exclude_below)
}

fn prepare_attempt(
    candidate: &CandidatePayload,
    fetch_dir: &Path,
    rank: usize,
    cache: &dyn CacheManager,
    redundancy_descriptor: &dyn RedundancyDescriptor,
    file_map: &mut scr_filemap::FileMap,
    coordinator: Option<&mut CoordinatorState<'_>>,
) {
    if let Some(state) = coordinator {
        let _ = state.index.mark_fetched(&candidate.subdirectory);
        state.log.started(state.clock, fetch_dir.display().to_string(), Some(candidate.dataset_id));
    }

    let _ = cache.purge(candidate.dataset_id);

    if let Some(descriptor) = redundancy_descriptor.lookup(candidate.checkpoint_id) {
        let _ = file_map.set_redundancy_descriptor(candidate.dataset_id, rank, descriptor);
    }

    let _ = cache.create(candidate.dataset_id);
}

#[allow(clippy::too_many_arguments)]
fn run_fetch<F: Fabric>(
    fabric: &F,
    config: FetchConfig,
    candidate: &CandidatePayload,
    fetch_dir: &Path,
    cache: &dyn CacheManager,
    summary_reader: &dyn SummaryReader,
    file_map: &mut scr_filemap::FileMap,
    coordinator: Option<&CoordinatorState<'_>>,
) -> bool {
    let Ok(summary) = load_summary(fabric, summary_reader, fetch_dir) else {
        return false;
    };

    let cache_dir = cache.cache_dir(candidate.dataset_id);
    let dataset_id = candidate.dataset_id;
    let files = summary.my_files;
    let containers = summary.containers;
    let log = coordinator.map(|state| (state.log, state.clock));

    run_flow_controller(fabric, config.fetch_width, move |rank| {
        match fetch_rank_files(dataset_id, rank, &cache_dir, &files, &containers, file_map, config, log) {
            Ok(outcome) => outcome.success,
            Err(_) => false,
        }
    })
}

fn apply_redundancy<F: Fabric>(
    fabric: &F,
    candidate: &CandidatePayload,
    redundancy_apply: &dyn RedundancyApply,
    coordinator: Option<&CoordinatorState<'_>>,
) -> bool {
    const ROOT: usize = 0;
    let mut buf = if coordinator.is_some() {
        let ok = redundancy_apply.apply(candidate.dataset_id).is_ok();
        vec![ok as u8]
    } else {
        Vec::new()
    };
    fabric.broadcast_bytes(ROOT, &mut buf);
    buf.first() == Some(&1)
}

fn finalize(
    candidate: &CandidatePayload,
    prefix_dir: &Path,
    fetch_dir: &Path,
    attempt_start: Instant,
    coordinator: Option<&mut CoordinatorState<'_>>,
) {
    let Some(state) = coordinator else { return };
    state.flush_file.set(candidate.dataset_id, FlushLocation::Cache);
    state.flush_file.set(candidate.dataset_id, FlushLocation::Pfs);
    state.flush_file.unset(candidate.dataset_id, FlushLocation::Flushing);
    let _ = scr_index::set_current(prefix_dir, &candidate.subdirectory);
    state.log.succeeded(
        state.clock,
        fetch_dir.display().to_string(),
        Some(candidate.dataset_id),
        attempt_start.elapsed().as_secs_f64(),
    );
}

fn mark_failed(
    candidate: &CandidatePayload,
    prefix_dir: &Path,
    fetch_dir: &Path,
    cache: &dyn CacheManager,
    attempt_start: Instant,
    coordinator: Option<&mut CoordinatorState<'_>>,
) {
    let _ = cache.purge(candidate.dataset_id);
    let _ = scr_index::clear_current(prefix_dir);

    if let Some(state) = coordinator {
        let _ = state.index.mark_failed(&candidate.subdirectory);
        state.log.failed(
            state.clock,
            fetch_dir.display().to_string(),
            Some(candidate.dataset_id),
            attempt_start.elapsed().as_secs_f64(),
        );
    }
}

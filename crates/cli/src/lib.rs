#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `scr_cli` is the thin command-line front-end for the checkpoint
//! fetch core. It recognises the handful of switches the fetch job
//! needs (`--help`/`-h`, `--version`/`-V`, `--prefix-dir`,
//! `--cache-dir`, `--world-size`, `--fetch-width`, `--buf-size`,
//! `--no-crc`) and drives an in-process simulated job: every requested
//! rank runs on its own thread, coordinated through
//! [`fabric::ThreadFabric`], and rank 0 is the only one that opens the
//! on-disk index, flush file, and lifecycle log.
//!
//! # Design
//!
//! The crate exposes [`run`] as the primary entry point, mirroring the
//! argument-iterator-plus-output-handles shape used across this
//! workspace's binaries. A [`clap`](https://docs.rs/clap/) command
//! definition performs the parse; [`run`] then constructs a
//! [`scr_core::FetchConfig`] via [`scr_core::FetchConfigBuilder`] and
//! calls [`fabric::ThreadFabric::run_world`] with a closure that wires
//! up [`scr_core::fetch_sync`] for each simulated rank.
//!
//! # Invariants
//!
//! - `run` never panics on malformed input; argument errors surface as
//!   a diagnostic on `stderr` and a non-zero exit code.
//! - Only rank 0's closure constructs a [`scr_core::CoordinatorState`];
//!   every other rank passes `None`, matching [`scr_core::Role`].
//!
//! # Errors
//!
//! The parser returns a diagnostic message with exit code `2` when
//! argument processing fails. A missing or empty `--prefix-dir` is a
//! configuration error and also exits `2`, without ever touching the
//! index. A fetch that gives up without finding a usable checkpoint
//! exits `1`; success exits `0`.
//!
//! # Examples
//!
//! ```
//! use scr_cli::run;
//!
//! let mut stdout = Vec::new();
//! let mut stderr = Vec::new();
//! let exit_code = run(["scr-fetch", "--version"], &mut stdout, &mut stderr);
//!
//! assert_eq!(exit_code, 0);
//! assert!(!stdout.is_empty());
//! assert!(stderr.is_empty());
//! ```
//!
//! # See also
//!
//! - `bin/scr-fetch` for the binary crate that wires [`run`] into `main`.

use std::io::Write;
use std::path::PathBuf;

use clap::{Arg, ArgAction, Command as ClapCommand};
use fabric::{Fabric, ThreadFabric};
use scr_core::{
    fetch_sync, CoordinatorState, FetchConfigBuilder, InMemoryFlushFile, JsonSummaryReader,
    LocalCacheManager, NoopRedundancyApply, NullRedundancyDescriptor,
};
use scr_logging::{FetchLog, SystemClock};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn command() -> ClapCommand {
    ClapCommand::new("scr-fetch")
        .disable_version_flag(true)
        .disable_help_flag(true)
        .arg(Arg::new("help").short('h').long("help").action(ArgAction::SetTrue))
        .arg(Arg::new("version").short('V').long("version").action(ArgAction::SetTrue))
        .arg(Arg::new("prefix-dir").long("prefix-dir").value_name("PATH").required(true))
        .arg(Arg::new("cache-dir").long("cache-dir").value_name("PATH").required(true))
        .arg(Arg::new("world-size").long("world-size").value_name("N").default_value("1"))
        .arg(Arg::new("fetch-width").long("fetch-width").value_name("N"))
        .arg(Arg::new("buf-size").long("buf-size").value_name("BYTES"))
        .arg(Arg::new("no-crc").long("no-crc").action(ArgAction::SetTrue))
}

fn print_help(out: &mut impl Write) {
    let _ = writeln!(out, "scr-fetch {VERSION}");
    let _ = writeln!(out, "Fetch a checkpoint dataset from a parallel file system into a local cache.");
    let _ = writeln!(out);
    let _ = writeln!(out, "USAGE:");
    let _ = writeln!(out, "    scr-fetch --prefix-dir PATH --cache-dir PATH [OPTIONS]");
    let _ = writeln!(out);
    let _ = writeln!(out, "OPTIONS:");
    let _ = writeln!(out, "    --prefix-dir PATH    directory holding the checkpoint index and datasets");
    let _ = writeln!(out, "    --cache-dir PATH     directory the fetched files are written into");
    let _ = writeln!(out, "    --world-size N       number of simulated ranks (default 1)");
    let _ = writeln!(out, "    --fetch-width N      flow controller window width (default world_size - 1)");
    let _ = writeln!(out, "    --buf-size BYTES     I/O chunk size (default 1 MiB)");
    let _ = writeln!(out, "    --no-crc             skip CRC32 computation and verification");
    let _ = writeln!(out, "    -h, --help           print this help and exit");
    let _ = writeln!(out, "    -V, --version        print the version and exit");
}

/// Parses `arguments`, runs a fetch job, and writes diagnostics to
/// `stdout`/`stderr`. Returns a process exit status: `0` on success,
/// `1` if every candidate checkpoint was exhausted without success,
/// `2` on a usage error or a configuration error such as a missing or
/// empty `--prefix-dir`.
pub fn run<I, S, Out, Err>(arguments: I, stdout: &mut Out, stderr: &mut Err) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<std::ffi::OsString> + Clone,
    Out: Write,
    Err: Write,
{
    let matches = match command().try_get_matches_from(arguments) {
        Ok(matches) => matches,
        Err(clap_err) => {
            let _ = write!(stderr, "{clap_err}");
            return 2;
        }
    };

    if matches.get_flag("help") {
        print_help(stdout);
        return 0;
    }
    if matches.get_flag("version") {
        let _ = writeln!(stdout, "scr-fetch {VERSION}");
        return 0;
    }

    let prefix_dir = PathBuf::from(matches.get_one::<String>("prefix-dir").expect("required"));
    let cache_dir = PathBuf::from(matches.get_one::<String>("cache-dir").expect("required"));

    let world_size: usize = match matches.get_one::<String>("world-size").expect("has default").parse() {
        Ok(n) => n,
        Err(_) => {
            let _ = writeln!(stderr, "error: --world-size must be a positive integer");
            return 2;
        }
    };

    let fetch_width: Option<usize> = match matches.get_one::<String>("fetch-width") {
        Some(raw) => match raw.parse() {
            Ok(n) => Some(n),
            Err(_) => {
                let _ = writeln!(stderr, "error: --fetch-width must be a positive integer");
                return 2;
            }
        },
        None => None,
    };

    let buf_size: Option<usize> = match matches.get_one::<String>("buf-size") {
        Some(raw) => match raw.parse() {
            Ok(n) => Some(n),
            Err(_) => {
                let _ = writeln!(stderr, "error: --buf-size must be a positive integer");
                return 2;
            }
        },
        None => None,
    };

    let mut builder = FetchConfigBuilder::new().crc_on_flush(!matches.get_flag("no-crc"));
    if let Some(width) = fetch_width {
        builder = builder.fetch_width(width);
    }
    if let Some(size) = buf_size {
        builder = builder.buf_size(size);
    }

    let config = match builder.build(world_size) {
        Ok(config) => config,
        Err(config_err) => {
            let _ = writeln!(stderr, "error: {config_err}");
            return 2;
        }
    };

    let results = ThreadFabric::run_world(world_size, move |fabric| {
        let rank = fabric.rank();
        let cache = LocalCacheManager::new(cache_dir.clone());
        let mut file_map = scr_filemap::FileMap::open(cache_dir.join(format!("filemap_{rank}.json")))?;
        let reader = JsonSummaryReader;
        let descriptor = NullRedundancyDescriptor;
        let apply = NoopRedundancyApply;

        let mut index = scr_index::Index::open(prefix_dir.join("index"))?;
        let mut flush_file = InMemoryFlushFile::new();
        let log = FetchLog::new();
        let clock = SystemClock;

        let coordinator = if rank == 0 {
            Some(CoordinatorState { index: &mut index, flush_file: &mut flush_file, log: &log, clock: &clock })
        } else {
            None
        };

        fetch_sync(&fabric, config, &prefix_dir, &cache, &reader, &descriptor, &apply, &mut file_map, coordinator)
    });

    match results.into_iter().next() {
        Some(Ok(result)) if result.outcome.is_some() => 0,
        Some(Err(scr_core::FetchError::MissingFetchDirectory)) => {
            let _ = writeln!(stderr, "error: fetch directory is missing or empty");
            2
        }
        Some(Err(err)) => {
            let _ = writeln!(stderr, "error: {err}");
            1
        }
        _ => 1,
    }
}

/// Converts a `run` status into a process exit code, clamped to the
/// `u8` range every platform's process exit status is truncated to.
pub fn exit_code_from(status: i32) -> std::process::ExitCode {
    let clamped = status.clamp(0, 255);
    std::process::ExitCode::from(clamped as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_flag_reports_success_and_writes_to_stdout() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let status = run(["scr-fetch", "--version"], &mut stdout, &mut stderr);
        assert_eq!(status, 0);
        assert!(!stdout.is_empty());
        assert!(stderr.is_empty());
    }

    #[test]
    fn help_flag_reports_success_and_writes_to_stdout() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let status = run(["scr-fetch", "--help"], &mut stdout, &mut stderr);
        assert_eq!(status, 0);
        assert!(!stdout.is_empty());
    }

    #[test]
    fn missing_required_argument_is_a_usage_error() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let status = run(["scr-fetch"], &mut stdout, &mut stderr);
        assert_eq!(status, 2);
        assert!(!stderr.is_empty());
    }

    #[test]
    fn missing_prefix_dir_exits_two_without_touching_the_index() {
        let prefix = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let missing = prefix.path().join("does-not-exist");

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let status = run(
            ["scr-fetch", "--prefix-dir", missing.to_str().unwrap(), "--cache-dir", cache.path().to_str().unwrap()],
            &mut stdout,
            &mut stderr,
        );
        assert_eq!(status, 2);
        assert!(!stderr.is_empty());
    }

    #[test]
    fn empty_index_gives_up_and_exits_nonzero() {
        let prefix = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        scr_index::Index::open(prefix.path().join("index")).unwrap().write().unwrap();

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let status = run(
            [
                "scr-fetch",
                "--prefix-dir",
                prefix.path().to_str().unwrap(),
                "--cache-dir",
                cache.path().to_str().unwrap(),
            ],
            &mut stdout,
            &mut stderr,
        );
        assert_eq!(status, 1);
    }

    #[test]
    fn successful_single_rank_fetch_exits_zero() {
        let prefix = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        let fetch_dir = prefix.path().join("ckpt.1");
        scr_test_support::write_checkpoint_files(&fetch_dir, 1, b"payload");
        let tree = scr_test_support::sample_dataset_tree(1, 1, "ckpt.1", 1, b"payload");
        std::fs::write(fetch_dir.join("scr_summary.json"), serde_json::to_vec(&tree).unwrap()).unwrap();

        let mut index = scr_index::Index::open(prefix.path().join("index")).unwrap();
        index.upsert(scr_test_support::sample_index_entry(1, 1, "ckpt.1"));
        index.write().unwrap();

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let status = run(
            [
                "scr-fetch",
                "--prefix-dir",
                prefix.path().to_str().unwrap(),
                "--cache-dir",
                cache.path().to_str().unwrap(),
            ],
            &mut stdout,
            &mut stderr,
        );
        assert_eq!(status, 0);
        assert_eq!(std::fs::read(cache.path().join("1").join("rank_0.dat")).unwrap(), b"payload");
    }
}

use crate::error::FetchError;

/// The external redundancy-descriptor registry, keyed by checkpoint id.
///
/// The returned string is an opaque snapshot the file map stamps
/// alongside the rest of the per-rank record so a later repair pass can
/// tell which redundancy scheme a given cache file was written under.
pub trait RedundancyDescriptor {
    fn lookup(&self, checkpoint_id: i64) -> Option<String>;
}

/// A descriptor registry that never has anything on file, for
/// deployments (and tests) that do not model a redundancy scheme.
#[derive(Debug, Default)]
pub struct NullRedundancyDescriptor;

impl RedundancyDescriptor for NullRedundancyDescriptor {
    fn lookup(&self, _checkpoint_id: i64) -> Option<String> {
        None
    }
}

/// The "apply redundancy" operator invoked once a fetch globally
/// succeeds. Reports bytes copied on success.
pub trait RedundancyApply {
    fn apply(&self, dataset_id: u64) -> Result<u64, FetchError>;
}

/// A redundancy apply step that does nothing and reports zero bytes
/// copied, for deployments that do not need post-fetch redundancy
/// reconstruction.
#[derive(Debug, Default)]
pub struct NoopRedundancyApply;

impl RedundancyApply for NoopRedundancyApply {
    fn apply(&self, _dataset_id: u64) -> Result<u64, FetchError> {
        Ok(0)
    }
}

use std::collections::{HashMap, HashSet};

/// A location a dataset's bytes can currently be found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushLocation {
    Cache,
    Pfs,
    Flushing,
}

/// The external flush-file interface: a key-value store of
/// `{dataset_id -> set of locations}` that the fetch core mutates but
/// never reads back, per its documented contract with the rest of the
/// system.
pub trait FlushFile {
    /// Records that `dataset_id`'s bytes are now present at `location`.
    fn set(&mut self, dataset_id: u64, location: FlushLocation);
    /// Records that `dataset_id`'s bytes are no longer at `location`.
    fn unset(&mut self, dataset_id: u64, location: FlushLocation);
}

/// An in-memory [`FlushFile`] used by the reference binary and by
/// tests; a real deployment would back this with the redundancy
/// library's own persistent flush file instead.
#[derive(Debug, Default)]
pub struct InMemoryFlushFile {
    locations: HashMap<u64, HashSet<FlushLocation>>,
}

impl InMemoryFlushFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspects the current location set for a dataset. Not part of
    /// the [`FlushFile`] trait: the fetch core itself never reads
    /// this back, only tests and operators do.
    pub fn locations(&self, dataset_id: u64) -> HashSet<FlushLocation> {
        self.locations.get(&dataset_id).cloned().unwrap_or_default()
    }
}

impl FlushFile for InMemoryFlushFile {
    fn set(&mut self, dataset_id: u64, location: FlushLocation) {
        self.locations.entry(dataset_id).or_default().insert(location);
    }

    fn unset(&mut self, dataset_id: u64, location: FlushLocation) {
        if let Some(set) = self.locations.get_mut(&dataset_id) {
            set.remove(&location);
        }
    }
}

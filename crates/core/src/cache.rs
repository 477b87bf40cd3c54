use std::fs;
use std::path::PathBuf;

use crate::error::FetchError;

/// The external cache directory manager: create, delete, and locate the
/// per-dataset cache directory.
pub trait CacheManager {
    /// The directory a dataset's cache files live under.
    fn cache_dir(&self, dataset_id: u64) -> PathBuf;
    /// Creates the cache directory, if it does not already exist.
    fn create(&self, dataset_id: u64) -> Result<(), FetchError>;
    /// Removes the cache directory and everything under it.
    fn purge(&self, dataset_id: u64) -> Result<(), FetchError>;
}

/// A [`CacheManager`] backed by a plain local directory tree, one
/// subdirectory per dataset id.
#[derive(Debug, Clone)]
pub struct LocalCacheManager {
    base: PathBuf,
}

impl LocalCacheManager {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl CacheManager for LocalCacheManager {
    fn cache_dir(&self, dataset_id: u64) -> PathBuf {
        self.base.join(dataset_id.to_string())
    }

    fn create(&self, dataset_id: u64) -> Result<(), FetchError> {
        let dir = self.cache_dir(dataset_id);
        fs::create_dir_all(&dir).map_err(|source| FetchError::CacheCreate { dataset_id, source })
    }

    fn purge(&self, dataset_id: u64) -> Result<(), FetchError> {
        let dir = self.cache_dir(dataset_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(FetchError::CachePurge { dataset_id, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_purge_round_trips() {
        let base = tempfile::tempdir().unwrap();
        let manager = LocalCacheManager::new(base.path());
        manager.create(7).unwrap();
        assert!(manager.cache_dir(7).is_dir());

        std::fs::write(manager.cache_dir(7).join("leftover"), b"x").unwrap();
        manager.purge(7).unwrap();
        assert!(!manager.cache_dir(7).exists());
    }

    #[test]
    fn purge_of_missing_dataset_is_not_an_error() {
        let base = tempfile::tempdir().unwrap();
        let manager = LocalCacheManager::new(base.path());
        manager.purge(999).unwrap();
    }
}

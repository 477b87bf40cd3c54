use thiserror::Error;

/// Every way a checkpoint fetch attempt can fail.
///
/// Per-attempt failures (everything except [`FetchError::MissingFetchDirectory`]
/// and [`FetchError::Config`]) are caught by the attempt driver and turned
/// into a retry against an older candidate; configuration errors are
/// surfaced to the caller without touching the index.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch directory is missing or empty")]
    MissingFetchDirectory,

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("checkpoint directory {0} is not readable")]
    UnreadableCheckpointDirectory(String),

    #[error("summary document is malformed: {0}")]
    SummaryParse(String),

    #[error("summary document is missing DATASET")]
    MissingDataset,

    #[error("summary document DATASET is missing CHECKPOINT_ID")]
    MissingCheckpointId,

    #[error(transparent)]
    Tree(#[from] scr_tree::TreeError),

    #[error(transparent)]
    Copy(#[from] scr_io::CopyError),

    #[error(transparent)]
    Container(#[from] scr_container::ContainerError),

    #[error(transparent)]
    Checksum(#[from] scr_checksums::ChecksumError),

    #[error(transparent)]
    FileMap(#[from] scr_filemap::FileMapError),

    #[error(transparent)]
    Index(#[from] scr_index::IndexError),

    #[error("failed to create cache directory for dataset {dataset_id}: {source}")]
    CacheCreate { dataset_id: u64, source: std::io::Error },

    #[error("failed to purge cache directory for dataset {dataset_id}: {source}")]
    CachePurge { dataset_id: u64, source: std::io::Error },

    #[error("redundancy scheme apply failed: {0}")]
    RedundancyApply(String),
}

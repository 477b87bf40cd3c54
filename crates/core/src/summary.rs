use std::collections::HashMap;
use std::path::{Path, PathBuf};

use fabric::Fabric;
use scr_container::{ContainerEntry, ContainerId, Segment};
use scr_tree::Node;

use crate::error::FetchError;

/// Parses a checkpoint directory's summary document into an attribute
/// tree. Implementors are also responsible for judging the directory
/// "readable": [`SummaryReader::read`] returning `Err` is exactly the
/// "unreadable checkpoint directory / parse failure" error kind.
pub trait SummaryReader {
    fn read(&self, checkpoint_dir: &Path) -> Result<Node, String>;
}

const SUMMARY_FILE_NAME: &str = "scr_summary.json";

/// Reads a version-6 summary document encoded as a single JSON object
/// (the concrete on-disk format this workspace chose, since the
/// contract leaves the encoding open as long as one deployment is
/// internally consistent).
#[derive(Debug, Default)]
pub struct JsonSummaryReader;

impl SummaryReader for JsonSummaryReader {
    fn read(&self, checkpoint_dir: &Path) -> Result<Node, String> {
        std::fs::read_dir(checkpoint_dir).map_err(|e| e.to_string())?;
        let path = checkpoint_dir.join(SUMMARY_FILE_NAME);
        let bytes = std::fs::read(&path).map_err(|e| e.to_string())?;
        serde_json::from_slice(&bytes).map_err(|e| e.to_string())
    }
}

/// The deep-copied `DATASET` header every rank ends up holding after
/// the summary is broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetHeader {
    pub dataset_id: u64,
    pub checkpoint_id: i64,
    pub name: String,
}

/// One file this rank is responsible for fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub filename: String,
    pub size: u64,
    pub crc32: Option<u32>,
    pub complete: bool,
    /// Source directory, present only in non-container mode.
    pub path: Option<PathBuf>,
    pub nofetch: bool,
    pub segments: Vec<Segment>,
}

/// The result of a successful, collective summary load.
#[derive(Debug, Clone)]
pub struct LoadedSummary {
    pub dataset: DatasetHeader,
    pub containers: HashMap<ContainerId, ContainerEntry>,
    pub my_files: Vec<FileRecord>,
}

fn broadcast_status<F: Fabric>(fabric: &F, root: usize, ok_on_root: bool) -> bool {
    let mut buf = if fabric.rank() == root { vec![ok_on_root as u8] } else { Vec::new() };
    fabric.broadcast_bytes(root, &mut buf);
    buf.first() == Some(&1)
}

/// Parses and distributes a checkpoint's summary document.
///
/// Every rank must call this with the same `checkpoint_dir` (already
/// broadcast upstream by the attempt driver) and the same number of
/// times across an attempt; the collective calls inside run in lockstep
/// regardless of which branch any individual rank takes once a status
/// byte it just received tells it to give up, because every rank
/// reaches that decision from the same broadcast value.
pub fn load_summary<F: Fabric>(
    fabric: &F,
    reader: &dyn SummaryReader,
    checkpoint_dir: &Path,
) -> Result<LoadedSummary, FetchError> {
    const ROOT: usize = 0;
    let is_root = fabric.rank() == ROOT;

    let parsed = if is_root { reader.read(checkpoint_dir).ok() } else { None };
    if !broadcast_status(fabric, ROOT, parsed.is_some()) {
        return Err(FetchError::UnreadableCheckpointDirectory(checkpoint_dir.display().to_string()));
    }

    let mut dataset_buf = if is_root {
        encode_dataset(parsed.as_ref().expect("readable on root"))
    } else {
        Vec::new()
    };
    fabric.broadcast_bytes(ROOT, &mut dataset_buf);
    let dataset = decode_dataset(&dataset_buf)?;

    let mut container_buf = if is_root {
        let containers = parsed.as_ref().expect("readable on root").get("CONTAINER").cloned().unwrap_or_default();
        serde_json::to_vec(&containers).expect("Node serialization is infallible")
    } else {
        Vec::new()
    };
    fabric.broadcast_bytes(ROOT, &mut container_buf);
    let container_node: Node =
        serde_json::from_slice(&container_buf).map_err(|e| FetchError::SummaryParse(e.to_string()))?;
    let containers = parse_containers(&container_node)?;

    let mut outgoing = HashMap::new();
    if is_root {
        if let Some(rank_table) = parsed.as_ref().expect("readable on root").get_path("RANK2FILE/RANK") {
            for (rank_str, per_rank) in rank_table.iter() {
                if let Ok(target_rank) = rank_str.parse::<usize>() {
                    let files = per_rank.get("FILE").cloned().unwrap_or_default();
                    outgoing.insert(target_rank, files);
                }
            }
        }
    }
    let received = Node::exchange(fabric, outgoing)?;
    let my_files_node = received.get(&ROOT.to_string()).cloned().unwrap_or_default();
    let has_containers = !containers.is_empty();
    let my_files = parse_file_records(&my_files_node, checkpoint_dir, has_containers)?;

    Ok(LoadedSummary { dataset, containers, my_files })
}

fn encode_dataset(root: &Node) -> Vec<u8> {
    let Some(dataset_node) = root.get("DATASET") else {
        return vec![1u8];
    };
    if dataset_node.unsigned_long("DATASET_ID").is_err() {
        return vec![2u8];
    }
    if dataset_node.int("CHECKPOINT_ID").is_err() {
        return vec![2u8];
    }
    let mut buf = vec![0u8];
    buf.extend(serde_json::to_vec(dataset_node).expect("Node serialization is infallible"));
    buf
}

fn decode_dataset(buf: &[u8]) -> Result<DatasetHeader, FetchError> {
    match buf.first() {
        Some(0) => {
            let node: Node =
                serde_json::from_slice(&buf[1..]).map_err(|e| FetchError::SummaryParse(e.to_string()))?;
            Ok(DatasetHeader {
                dataset_id: node.unsigned_long("DATASET_ID")?,
                checkpoint_id: node.int("CHECKPOINT_ID")?,
                name: node.string("NAME").unwrap_or_default(),
            })
        }
        Some(1) => Err(FetchError::MissingDataset),
        _ => Err(FetchError::MissingCheckpointId),
    }
}

fn parse_containers(container_node: &Node) -> Result<HashMap<ContainerId, ContainerEntry>, FetchError> {
    let mut map = HashMap::new();
    for (id_str, entry) in container_node.iter() {
        let id: ContainerId = id_str
            .parse()
            .map_err(|_| FetchError::SummaryParse(format!("invalid container id `{id_str}`")))?;
        let path = PathBuf::from(entry.string("NAME")?);
        let size = entry.unsigned_long("SIZE")?;
        map.insert(id, ContainerEntry { path, size });
    }
    Ok(map)
}

fn parse_file_records(
    file_node: &Node,
    checkpoint_dir: &Path,
    has_containers: bool,
) -> Result<Vec<FileRecord>, FetchError> {
    let mut records = Vec::new();
    for (filename, record) in file_node.iter() {
        let nofetch = record.bool_or("NOFETCH", false)?;
        let size = record.unsigned_long("SIZE")?;
        let crc32 = record.crc32("CRC").ok();
        let complete = record.bool_or("COMPLETE", true)?;
        let path = if has_containers { None } else { Some(checkpoint_dir.to_path_buf()) };

        let mut segments = Vec::new();
        if let Some(segment_list) = record.get("SEGMENT") {
            for (index_str, segment) in segment_list.iter() {
                let index: u64 = index_str.parse().unwrap_or(0);
                let length = segment.unsigned_long("LENGTH")?;
                let container = segment
                    .get("CONTAINER")
                    .ok_or_else(|| FetchError::SummaryParse(format!("segment {index_str} missing CONTAINER")))?;
                let container_id = container.unsigned_long("ID")?;
                let offset = container.unsigned_long("OFFSET")?;
                segments.push(Segment { index, container_id, offset, length });
            }
        }

        records.push(FileRecord { filename: filename.to_string(), size, crc32, complete, path, nofetch, segments });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric::ThreadFabric;

    struct FixedReader {
        tree: Node,
        fail: bool,
    }

    impl SummaryReader for FixedReader {
        fn read(&self, _checkpoint_dir: &Path) -> Result<Node, String> {
            if self.fail { Err("boom".to_string()) } else { Ok(self.tree.clone()) }
        }
    }

    fn sample_summary() -> Node {
        let mut root = Node::new();
        let mut dataset = Node::new();
        dataset.set_unsigned_long("DATASET_ID", 7);
        dataset.set_int("CHECKPOINT_ID", 3);
        dataset.set_string("NAME", "ckpt.3");
        root.set("DATASET", dataset);

        let mut rank2file = Node::new();
        let mut rank_table = Node::new();
        for rank in 0..2u32 {
            let mut per_rank = Node::new();
            let mut files = Node::new();
            let mut record = Node::new();
            record.set_unsigned_long("SIZE", 1024);
            record.set_crc32("CRC", 0xabcd_ef01);
            files.set(format!("rank_{rank}.dat"), record);
            per_rank.set("FILE", files);
            rank_table.set(rank.to_string(), per_rank);
        }
        rank2file.set("RANK", rank_table);
        root.set("RANK2FILE", rank2file);
        root
    }

    #[test]
    fn loads_dataset_header_and_per_rank_files_without_containers() {
        let tree = sample_summary();
        let outcomes = ThreadFabric::run_world(2, move |fabric| {
            let reader = FixedReader { tree: tree.clone(), fail: false };
            load_summary(&fabric, &reader, Path::new("/ckpt/3")).map(|s| (s.dataset, s.my_files, s.containers.len()))
        });
        for outcome in outcomes {
            let (dataset, files, container_count) = outcome.unwrap();
            assert_eq!(dataset.dataset_id, 7);
            assert_eq!(dataset.checkpoint_id, 3);
            assert_eq!(files.len(), 1);
            assert_eq!(files[0].path, Some(PathBuf::from("/ckpt/3")));
            assert_eq!(container_count, 0);
        }
    }

    #[test]
    fn unreadable_directory_fails_identically_on_every_rank() {
        let tree = sample_summary();
        let outcomes = ThreadFabric::run_world(3, move |fabric| {
            let reader = FixedReader { tree: tree.clone(), fail: true };
            load_summary(&fabric, &reader, Path::new("/ckpt/3")).is_err()
        });
        assert!(outcomes.iter().all(|&failed| failed));
    }

    #[test]
    fn missing_checkpoint_id_is_reported() {
        let mut tree = sample_summary();
        let mut dataset = tree.get("DATASET").unwrap().clone();
        dataset.delete("CHECKPOINT_ID");
        tree.set("DATASET", dataset);

        let outcomes = ThreadFabric::run_world(2, move |fabric| {
            let reader = FixedReader { tree: tree.clone(), fail: false };
            matches!(load_summary(&fabric, &reader, Path::new("/ckpt/3")), Err(FetchError::MissingCheckpointId))
        });
        assert!(outcomes.iter().all(|&matched| matched));
    }
}

use thiserror::Error;

/// Failure modes surfaced by a [`crate::Fabric`] implementation.
///
/// The fetch core treats the fabric as a fixed external collaborator; a
/// real MPI-backed implementation would map library error codes onto
/// this enum the same way [`ThreadFabric`](crate::ThreadFabric) maps
/// channel-closed errors onto [`FabricError::PeerGone`].
#[derive(Debug, Error)]
pub enum FabricError {
    /// The peer on the other end of a point-to-point channel disappeared
    /// (its thread panicked or exited) before the message was delivered.
    #[error("peer rank {rank} is no longer reachable")]
    PeerGone {
        /// The rank that could not be reached.
        rank: usize,
    },

    /// A rank index fell outside `0..world_size`.
    #[error("rank {rank} is out of range for a world of size {world_size}")]
    RankOutOfRange {
        /// The offending rank.
        rank: usize,
        /// The size of the world it was checked against.
        world_size: usize,
    },
}

#![deny(unsafe_code)]
//! # Overview
//!
//! `scr_fabric` abstracts the collective-messaging fabric the checkpoint
//! fetch core is built on: barrier, broadcast, all-reduce of booleans, a
//! rank-0-routed exchange, and matched non-blocking point-to-point
//! send/receive with a "wait on any" primitive.
//!
//! # Design
//!
//! The fetch core is written against the [`Fabric`] trait so the same
//! driver, flow controller, and summary loader run unmodified against
//! any backend that implements it. This crate ships exactly one
//! backend, [`ThreadFabric`], which simulates a world of ranks as
//! scoped threads inside a single process using `crossbeam-channel`.
//! It is a complete, race-free implementation of the contract — not a
//! stub — and is what the reference `scr-fetch` binary and this
//! workspace's tests drive their "multi-rank" scenarios through. A
//! deployment targeting a real MPI library would add a second backend
//! behind the same trait; the fetch core would not change.
//!
//! # Invariants
//!
//! - All ranks must call collective operations ([`Fabric::barrier`],
//!   [`Fabric::broadcast_bytes`], [`Fabric::all_reduce_and`],
//!   [`Fabric::exchange_bytes`]) in the same relative order. `ThreadFabric`
//!   relies on this (as a real MPI fabric would) to pair up each call
//!   across ranks without tagging collectives individually.
//! - Point-to-point messages are matched by `(src, dest)`; the `tag`
//!   parameter is accepted for interface compatibility with the spec but
//!   `ThreadFabric` only ever uses tag 0, matching the fetch core's use.

mod error;
mod thread_fabric;

pub use error::FabricError;
pub use thread_fabric::{ThreadFabric, ThreadRecv, ThreadSend};

use std::collections::HashMap;

/// A completion handle for a non-blocking send.
pub trait SendHandle {
    /// Blocks until the send has been handed off to the fabric.
    ///
    /// For fire-and-forget backends like [`ThreadFabric`] this returns
    /// immediately; it exists so callers can treat all backends
    /// uniformly, matching the MPI `MPI_Wait` pairing the flow
    /// controller in `scr-core` relies on.
    fn wait(self) -> Result<(), FabricError>;
}

/// A completion handle for a non-blocking receive.
pub trait RecvHandle {
    /// Blocks until the message has arrived and returns its payload.
    fn wait(self) -> Result<Vec<u8>, FabricError>;
}

/// The collective-messaging fabric the fetch core is written against.
///
/// Every rank in the job constructs or is handed a `Fabric` instance
/// that agrees with every other rank's on `world_size()`, and each
/// instance reports a distinct `rank()` in `0..world_size()`.
pub trait Fabric {
    /// A non-blocking send in flight.
    type Send: SendHandle;
    /// A non-blocking receive in flight.
    type Recv: RecvHandle;

    /// This process's rank within the job.
    fn rank(&self) -> usize;

    /// The total number of ranks in the job.
    fn world_size(&self) -> usize;

    /// Blocks until every rank has called `barrier`.
    fn barrier(&self);

    /// Broadcasts `buf` from `root` to every rank, in place.
    ///
    /// On `root`, `buf` is left unchanged (it is the value being sent).
    /// On every other rank, `buf` is replaced with the bytes `root` sent.
    fn broadcast_bytes(&self, root: usize, buf: &mut Vec<u8>);

    /// Computes the logical AND of `value` across every rank.
    fn all_reduce_and(&self, value: bool) -> bool;

    /// Routes a mapping of `{destination rank -> payload}` from every
    /// sending rank to the addressed destinations.
    ///
    /// The returned map is keyed by the sending rank, so a receiver can
    /// tell which rank each payload came from. A rank that received
    /// nothing gets an empty map.
    fn exchange_bytes(&self, outgoing: HashMap<usize, Vec<u8>>) -> HashMap<usize, Vec<u8>>;

    /// Posts a non-blocking send to `dest` tagged `tag`.
    fn isend(&self, dest: usize, tag: i32, data: Vec<u8>) -> Self::Send;

    /// Posts a non-blocking receive from `src` tagged `tag`.
    fn irecv(&self, src: usize, tag: i32) -> Self::Recv;

    /// Blocks until any of `pending` completes, removing and returning it.
    ///
    /// Mirrors `MPI_Waitany`: the flow controller in `scr-core` relies on
    /// this to react to whichever worker finishes first rather than
    /// polling ranks in a fixed order.
    fn wait_any_recv(pending: &mut Vec<Self::Recv>) -> (usize, Vec<u8>);

    /// Blocking send convenience built on [`Fabric::isend`].
    fn send(&self, dest: usize, tag: i32, data: Vec<u8>) -> Result<(), FabricError> {
        self.isend(dest, tag, data).wait()
    }

    /// Blocking receive convenience built on [`Fabric::irecv`].
    fn recv(&self, src: usize, tag: i32) -> Result<Vec<u8>, FabricError> {
        self.irecv(src, tag).wait()
    }
}

#![deny(unsafe_code)]
//! # Overview
//!
//! `scr_tree` implements the hierarchical attribute tree shared by the
//! summary document, the file map, and the checkpoint index: an ordered,
//! string-keyed tree of scalar leaves, with typed accessors, a
//! non-destructive merge, and collective helpers (`broadcast`,
//! `exchange`) built on [`fabric::Fabric`].
//!
//! # Design
//!
//! A single [`Node`] type plays every role the summary document needs
//! (file entry, rank entry, dataset root) rather than a family of
//! per-role structs, the way the original tool's `kvtree` is one data
//! structure reused across every on-disk and wire format it has. Typed
//! accessors (`int`, `unsigned_long`, `bytecount`, `string`, `crc32`)
//! parse a leaf's raw string on read instead of the tree storing typed
//! variants, so the same stored value can be read as whichever type a
//! caller needs without a conversion pass.
//!
//! # Invariants
//!
//! - Children preserve insertion order; [`Node::sort_by_integer_keys`]
//!   is an explicit operation, not an implicit property of storage.
//! - [`Node::merge`] deep-copies from its argument and never mutates it.
//! - [`Node::exchange`] keys its result by sending rank so recipients can
//!   always tell who sent what.

mod error;
mod node;

pub use error::TreeError;
pub use node::Node;

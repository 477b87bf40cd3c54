use std::fmt;

use serde::{Deserialize, Serialize};

use fabric::Fabric;

use crate::TreeError;

/// A node in the attribute tree.
///
/// Every child is reached by a unique string key. A node may carry a
/// scalar leaf value, further children, or both being absent (an empty
/// placeholder, as produced by [`Node::new`]). Leaves are stored as
/// their formatted string representation; typed accessors parse that
/// string back into the requested type on read, the way the summary
/// document's `SIZE`/`CRC`/`COMPLETE` keys are read by several
/// components that each want a different type out of the same raw
/// value.
///
/// Children preserve insertion order (a `Vec`, not a `HashMap`), which
/// is what makes "ordered iteration" and the explicit
/// [`Node::sort_by_integer_keys`] operation meaningful operations in
/// their own right instead of accidents of a hash map's bucket order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    leaf: Option<String>,
    children: Vec<(String, Node)>,
}

impl Node {
    /// Creates an empty node with no leaf value and no children.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a leaf node carrying the given raw value.
    fn leaf_str(value: impl Into<String>) -> Self {
        Node {
            leaf: Some(value.into()),
            children: Vec::new(),
        }
    }

    /// Removes the child at `key`, returning it if present.
    pub fn delete(&mut self, key: &str) -> Option<Node> {
        let position = self.children.iter().position(|(k, _)| k == key)?;
        Some(self.children.remove(position).1)
    }

    /// Returns the child at `key`, if any.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.children.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns a mutable reference to the child at `key`, if any.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Node> {
        self.children.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Walks a `/`-separated path of keys, e.g. `"RANK2FILE/RANK"`.
    pub fn get_path(&self, path: &str) -> Option<&Node> {
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.get(segment)?;
        }
        Some(node)
    }

    /// Looks up a key built from a printf-style template and one
    /// argument, e.g. `get_formatted("RANK2FILE/RANK/{}", 3)` for the
    /// rank-3 subtree. `{}` is replaced once with `value`'s `Display`
    /// form and the result is resolved with [`Node::get_path`].
    pub fn get_formatted(&self, template: &str, value: impl fmt::Display) -> Option<&Node> {
        let key = template.replacen("{}", &value.to_string(), 1);
        self.get_path(&key)
    }

    /// Inserts or replaces the child at `key` with `subtree`.
    ///
    /// An existing child at `key` is replaced wholesale (not merged);
    /// use [`Node::merge`] to combine subtrees instead. New keys are
    /// appended, preserving insertion order for iteration.
    pub fn set(&mut self, key: impl Into<String>, subtree: Node) {
        let key = key.into();
        if let Some(slot) = self.children.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = subtree;
        } else {
            self.children.push((key, subtree));
        }
    }

    /// Iterates over direct children in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The number of direct children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether this node has no children (it may still carry a leaf).
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Sorts direct children by parsing each key as an integer,
    /// ascending. Keys that fail to parse sort after all numeric keys,
    /// in their prior relative order (a stable sort).
    pub fn sort_by_integer_keys(&mut self) {
        self.children
            .sort_by_key(|(k, _)| k.parse::<i64>().unwrap_or(i64::MAX));
    }

    /// Deep-copies every child of `other` into `self`, recursively
    /// merging subtrees that exist on both sides. `other` is left
    /// unchanged.
    pub fn merge(&mut self, other: &Node) {
        if other.leaf.is_some() {
            self.leaf = other.leaf.clone();
        }
        for (key, child) in &other.children {
            if let Some(existing) = self.get_mut(key) {
                existing.merge(child);
            } else {
                self.set(key.clone(), child.clone());
            }
        }
    }

    // -- typed scalar accessors -------------------------------------

    fn leaf_or_missing<'a>(&'a self, key: &str) -> Result<&'a str, TreeError> {
        self.get(key)
            .and_then(|n| n.leaf.as_deref())
            .ok_or_else(|| TreeError::MissingKey(key.to_string()))
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, expected: &'static str) -> Result<T, TreeError> {
        let raw = self.leaf_or_missing(key)?;
        raw.parse().map_err(|_| TreeError::UnparsableValue {
            key: key.to_string(),
            expected,
            value: raw.to_string(),
        })
    }

    /// Reads `key` as a signed integer.
    pub fn int(&self, key: &str) -> Result<i64, TreeError> {
        self.parse(key, "int")
    }

    /// Reads `key` as an unsigned long (used for `SIZE` and similar
    /// counters that never go negative).
    pub fn unsigned_long(&self, key: &str) -> Result<u64, TreeError> {
        self.parse(key, "unsigned_long")
    }

    /// Reads `key` as a byte count. Distinct accessor name from
    /// [`Node::unsigned_long`] for readability at call sites even though
    /// the underlying representation is identical.
    pub fn bytecount(&self, key: &str) -> Result<u64, TreeError> {
        self.parse(key, "bytecount")
    }

    /// Reads `key` as a UTF-8 string.
    pub fn string(&self, key: &str) -> Result<String, TreeError> {
        Ok(self.leaf_or_missing(key)?.to_string())
    }

    /// Reads `key` as a 32-bit CRC value.
    pub fn crc32(&self, key: &str) -> Result<u32, TreeError> {
        self.parse(key, "crc32")
    }

    /// Reads `key` as a boolean, defaulting to `default` when the key is
    /// absent (the convention `COMPLETE` relies on: "absent means true").
    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, TreeError> {
        match self.get(key).and_then(|n| n.leaf.as_deref()) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| TreeError::UnparsableValue {
                key: key.to_string(),
                expected: "bool",
                value: raw.to_string(),
            }),
        }
    }

    // -- typed scalar setters -----------------------------------------

    /// Sets `key` to a signed integer leaf.
    pub fn set_int(&mut self, key: impl Into<String>, value: i64) {
        self.set(key, Node::leaf_str(value.to_string()));
    }

    /// Sets `key` to an unsigned-long leaf.
    pub fn set_unsigned_long(&mut self, key: impl Into<String>, value: u64) {
        self.set(key, Node::leaf_str(value.to_string()));
    }

    /// Sets `key` to a byte-count leaf.
    pub fn set_bytecount(&mut self, key: impl Into<String>, value: u64) {
        self.set(key, Node::leaf_str(value.to_string()));
    }

    /// Sets `key` to a string leaf.
    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set(key, Node::leaf_str(value.into()));
    }

    /// Sets `key` to a CRC32 leaf.
    pub fn set_crc32(&mut self, key: impl Into<String>, value: u32) {
        self.set(key, Node::leaf_str(value.to_string()));
    }

    /// Sets `key` to a boolean leaf.
    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) {
        self.set(key, Node::leaf_str(value.to_string()));
    }

    // -- collective operations -----------------------------------------

    fn to_bytes(&self) -> Result<Vec<u8>, TreeError> {
        serde_json::to_vec(self).map_err(|e| TreeError::Codec(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, TreeError> {
        serde_json::from_slice(bytes).map_err(|e| TreeError::Codec(e.to_string()))
    }

    /// Broadcasts `self` from `root` to every rank. On `root`, `self` is
    /// unchanged (it is the value being sent); on every other rank,
    /// `self` is replaced with a deep copy of `root`'s tree.
    pub fn broadcast<F: Fabric>(&mut self, fabric: &F, root: usize) -> Result<(), TreeError> {
        let mut buf = if fabric.rank() == root {
            self.to_bytes()?
        } else {
            Vec::new()
        };
        fabric.broadcast_bytes(root, &mut buf);
        if fabric.rank() != root {
            *self = Node::from_bytes(&buf)?;
        }
        Ok(())
    }

    /// Routes `outgoing` (a mapping of destination rank to the subtree
    /// addressed to it) through the fabric's exchange primitive and
    /// returns a node whose direct children are keyed by the sending
    /// rank (as a decimal string), each holding what that sender
    /// addressed to this rank.
    pub fn exchange<F: Fabric>(
        fabric: &F,
        outgoing: std::collections::HashMap<usize, Node>,
    ) -> Result<Node, TreeError> {
        let mut encoded = std::collections::HashMap::with_capacity(outgoing.len());
        for (dest, subtree) in outgoing {
            encoded.insert(dest, subtree.to_bytes()?);
        }
        let received = fabric.exchange_bytes(encoded);
        let mut result = Node::new();
        for (sender, bytes) in received {
            result.set(sender.to_string(), Node::from_bytes(&bytes)?);
        }
        Ok(result)
    }
}

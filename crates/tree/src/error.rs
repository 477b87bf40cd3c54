use thiserror::Error;

/// Failures raised by [`crate::Node`]'s typed accessors and collective
/// helpers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    /// A typed accessor (`int`, `unsigned_long`, `bytecount`, `string`,
    /// `crc32`) was called on a key with no leaf value.
    #[error("key `{0}` is absent")]
    MissingKey(String),

    /// A typed accessor could not parse the leaf's raw value into the
    /// requested type.
    #[error("key `{key}` could not be parsed as {expected}: `{value}`")]
    UnparsableValue {
        /// The key that was looked up.
        key: String,
        /// The type the caller asked for.
        expected: &'static str,
        /// The raw string value that failed to parse.
        value: String,
    },

    /// A node that was expected to carry a leaf value had none, or vice
    /// versa.
    #[error("key `{0}` has no children")]
    NotAContainer(String),

    /// Serializing or deserializing a subtree for broadcast/exchange failed.
    #[error("failed to (de)serialize subtree: {0}")]
    Codec(String),
}

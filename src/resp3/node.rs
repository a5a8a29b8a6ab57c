//! The `Node` tuple emitted by the parser: one entry in the pre-order traversal of a RESP3 message.

use super::types::Type;
use bytes::Bytes;

/// One node of a RESP3 response tree, as emitted by [`super::parser::Parser`].
///
/// A complete message is a sequence of `Node`s in pre-order: an aggregate node is immediately
/// followed by its children (recursively), and `depth` records how deeply nested each node is,
/// with the root at depth 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub data_type: Type,
    /// Declared child count for aggregates; `0` for simple types.
    pub aggregate_size: u64,
    pub depth: usize,
    /// Payload bytes. Empty for aggregates. For blob types this is the exact body, CRLF-stripped.
    pub value: Bytes,
}

impl Node {
    pub fn new(data_type: Type, aggregate_size: u64, depth: usize, value: Bytes) -> Self {
        Node {
            data_type,
            aggregate_size,
            depth,
            value,
        }
    }
}

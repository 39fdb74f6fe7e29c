//! Fixed-width node identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// 64-bit identifier of one term within one node table
///
/// Ids are assigned in increasing order starting at [`NodeId::FIRST`] and are
/// never reused. [`NodeId::NULL`] marks an absent or unbound position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Reserved "absent/unbound" id
    pub const NULL: NodeId = NodeId(0);

    /// First id handed out by a node table
    pub const FIRST: NodeId = NodeId(1);

    /// Largest representable id
    pub const MAX: NodeId = NodeId(u64::MAX);

    /// Wrap a raw value
    pub const fn new(id: u64) -> Self {
        NodeId(id)
    }

    /// Raw value
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether this is the reserved absent id
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The id following this one
    pub const fn next(self) -> Self {
        NodeId(self.0 + 1)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        NodeId(id)
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

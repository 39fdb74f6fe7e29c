//! Index orders (permutations of subject, predicate, object)

use super::triple::{IndexKey, PatternShape, Triple, TriplePattern};
use crate::dictionary::NodeId;
use crate::error::TdbError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Permutation of (S, P, O) used as the key order of one index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IndexOrder {
    /// Subject, predicate, object
    Spo,
    /// Predicate, object, subject
    Pos,
    /// Object, subject, predicate
    Osp,
}

impl IndexOrder {
    /// Every maintained order, in tie-break preference
    pub const ALL: [IndexOrder; 3] = [IndexOrder::Spo, IndexOrder::Pos, IndexOrder::Osp];

    /// Triple positions (0 = S, 1 = P, 2 = O) in key order
    pub const fn slots(self) -> [usize; 3] {
        match self {
            IndexOrder::Spo => [0, 1, 2],
            IndexOrder::Pos => [1, 2, 0],
            IndexOrder::Osp => [2, 0, 1],
        }
    }

    /// Short name, e.g. `SPO`
    pub const fn name(self) -> &'static str {
        match self {
            IndexOrder::Spo => "SPO",
            IndexOrder::Pos => "POS",
            IndexOrder::Osp => "OSP",
        }
    }

    /// Index file name, e.g. `SPO.idx`
    pub const fn file_name(self) -> &'static str {
        match self {
            IndexOrder::Spo => "SPO.idx",
            IndexOrder::Pos => "POS.idx",
            IndexOrder::Osp => "OSP.idx",
        }
    }

    /// Tag stored in the index meta page
    pub const fn tag(self) -> u8 {
        match self {
            IndexOrder::Spo => 1,
            IndexOrder::Pos => 2,
            IndexOrder::Osp => 3,
        }
    }

    /// Order for a stored tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        IndexOrder::ALL.into_iter().find(|order| order.tag() == tag)
    }

    /// Permute a triple into this order
    pub fn to_key(self, triple: &Triple) -> IndexKey {
        let ids = triple.positions();
        let [a, b, c] = self.slots();
        IndexKey([ids[a].as_u64(), ids[b].as_u64(), ids[c].as_u64()])
    }

    /// Undo [`to_key`](Self::to_key)
    pub fn to_triple(self, key: &IndexKey) -> Triple {
        let mut ids = [NodeId::NULL; 3];
        for (slot, value) in self.slots().into_iter().zip(key.0) {
            ids[slot] = NodeId::new(value);
        }
        Triple::new(ids[0], ids[1], ids[2])
    }

    /// Number of leading key slots bound in `shape`
    pub fn leading_bound(self, shape: PatternShape) -> usize {
        let bound = shape.positions();
        self.slots().iter().take_while(|&&slot| bound[slot]).count()
    }

    /// Bound ids of `pattern` forming the longest key prefix in this order
    pub fn bound_prefix(self, pattern: &TriplePattern) -> Vec<u64> {
        let positions = pattern.positions();
        self.slots()
            .iter()
            .map_while(|&slot| positions[slot].map(NodeId::as_u64))
            .collect()
    }
}

impl fmt::Display for IndexOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndexOrder {
    type Err = TdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IndexOrder::ALL
            .into_iter()
            .find(|order| order.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| TdbError::InvalidInput(format!("unknown index order '{s}'")))
    }
}

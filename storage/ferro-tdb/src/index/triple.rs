//! Triple, pattern and index key types

use crate::dictionary::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoded size of an [`IndexKey`]
pub const KEY_SIZE: usize = 24;

/// Triple of NodeIds (subject, predicate, object)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Triple {
    /// Subject NodeId
    pub subject: NodeId,
    /// Predicate NodeId
    pub predicate: NodeId,
    /// Object NodeId
    pub object: NodeId,
}

impl Triple {
    /// Create a new triple
    pub const fn new(subject: NodeId, predicate: NodeId, object: NodeId) -> Self {
        Triple {
            subject,
            predicate,
            object,
        }
    }

    /// Positions in subject, predicate, object order
    pub const fn positions(&self) -> [NodeId; 3] {
        [self.subject, self.predicate, self.object]
    }

    /// Whether no position is [`NodeId::NULL`]
    pub fn is_valid(&self) -> bool {
        self.positions().iter().all(|id| !id.is_null())
    }
}

impl From<(u64, u64, u64)> for Triple {
    fn from((s, p, o): (u64, u64, u64)) -> Self {
        Triple::new(NodeId::new(s), NodeId::new(p), NodeId::new(o))
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {} {})", self.subject, self.predicate, self.object)
    }
}

/// Pattern over triples: `None` positions match anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TriplePattern {
    /// Bound subject
    pub subject: Option<NodeId>,
    /// Bound predicate
    pub predicate: Option<NodeId>,
    /// Bound object
    pub object: Option<NodeId>,
}

impl TriplePattern {
    /// Create a new pattern
    pub const fn new(
        subject: Option<NodeId>,
        predicate: Option<NodeId>,
        object: Option<NodeId>,
    ) -> Self {
        TriplePattern {
            subject,
            predicate,
            object,
        }
    }

    /// Pattern matching every triple
    pub const fn any() -> Self {
        TriplePattern::new(None, None, None)
    }

    /// Pattern matching exactly one triple
    pub const fn exact(triple: Triple) -> Self {
        TriplePattern::new(
            Some(triple.subject),
            Some(triple.predicate),
            Some(triple.object),
        )
    }

    /// Positions in subject, predicate, object order
    pub const fn positions(&self) -> [Option<NodeId>; 3] {
        [self.subject, self.predicate, self.object]
    }

    /// Bound/unbound signature of this pattern
    pub fn shape(&self) -> PatternShape {
        PatternShape::new(
            self.subject.is_some(),
            self.predicate.is_some(),
            self.object.is_some(),
        )
    }

    /// Whether `triple` agrees with every bound position
    pub fn matches(&self, triple: &Triple) -> bool {
        self.positions()
            .iter()
            .zip(triple.positions())
            .all(|(bound, actual)| bound.map_or(true, |id| id == actual))
    }
}

/// Which positions of a pattern are bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PatternShape {
    /// Subject bound
    pub subject: bool,
    /// Predicate bound
    pub predicate: bool,
    /// Object bound
    pub object: bool,
}

impl PatternShape {
    /// Create a new shape
    pub const fn new(subject: bool, predicate: bool, object: bool) -> Self {
        PatternShape {
            subject,
            predicate,
            object,
        }
    }

    /// Bound flags in subject, predicate, object order
    pub const fn positions(&self) -> [bool; 3] {
        [self.subject, self.predicate, self.object]
    }

    /// Number of bound positions
    pub fn bound_count(&self) -> usize {
        self.positions().iter().filter(|b| **b).count()
    }

    /// All eight shapes
    pub fn all() -> impl Iterator<Item = PatternShape> {
        (0u8..8).map(|bits| PatternShape::new(bits & 4 != 0, bits & 2 != 0, bits & 1 != 0))
    }
}

impl fmt::Display for PatternShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = |bound: bool, name: char| if bound { name } else { '?' };
        write!(
            f,
            "({},{},{})",
            slot(self.subject, 'S'),
            slot(self.predicate, 'P'),
            slot(self.object, 'O')
        )
    }
}

/// A triple permuted into one index order
///
/// Ordering is lexicographic over the three ids, which is also the byte
/// order of the big-endian encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct IndexKey(pub [u64; 3]);

impl IndexKey {
    /// Smallest key
    pub const MIN: IndexKey = IndexKey([0; 3]);

    /// Largest key
    pub const MAX: IndexKey = IndexKey([u64::MAX; 3]);

    /// Encode as 24 big-endian bytes
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        let mut out = [0u8; KEY_SIZE];
        for (chunk, id) in out.chunks_exact_mut(8).zip(self.0) {
            chunk.copy_from_slice(&id.to_be_bytes());
        }
        out
    }

    /// Decode from at least 24 big-endian bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut ids = [0u64; 3];
        for (id, chunk) in ids.iter_mut().zip(bytes[..KEY_SIZE].chunks_exact(8)) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            *id = u64::from_be_bytes(raw);
        }
        IndexKey(ids)
    }

    /// Half-open key range `[start, end)` covering every key that starts
    /// with `prefix`; `end` is `None` when the range runs to the last key
    pub fn prefix_range(prefix: &[u64]) -> (IndexKey, Option<IndexKey>) {
        debug_assert!(prefix.len() <= 3);
        let mut start = [0u64; 3];
        start[..prefix.len()].copy_from_slice(prefix);

        let mut end = start;
        for slot in (0..prefix.len()).rev() {
            match end[slot].checked_add(1) {
                Some(next) => {
                    end[slot] = next;
                    return (IndexKey(start), Some(IndexKey(end)));
                }
                None => end[slot] = 0,
            }
        }
        (IndexKey(start), None)
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} {}]", self.0[0], self.0[1], self.0[2])
    }
}

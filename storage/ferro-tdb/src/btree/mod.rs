//! B+Tree over fixed-width index keys
//!
//! This module implements a disk-based B+Tree used by the triple indexes:
//! - Incremental insert with node splits
//! - Delete with borrow/merge rebalancing and a page free list
//! - Lazy range scans following leaf links
//! - Bottom-up construction from sorted input

pub mod builder;
pub mod node;
pub mod tree;

pub use builder::{BuildStats, BTreeBuilder};
pub use node::{InternalNode, LeafNode, Node, MAX_INTERNAL_KEYS, MAX_LEAF_KEYS};
pub use tree::{BTree, BTreeStats, RangeIter};

use crate::error::{Result, TdbError};
use serde::{Deserialize, Serialize};

/// Node capacities for a newly created tree
///
/// Capacities are recorded in the meta page when a tree file is created and
/// cannot change afterwards. Small values produce deep trees, which tests use
/// to exercise splits and merges with few keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BTreeConfig {
    /// Maximum keys per leaf
    pub leaf_capacity: usize,
    /// Maximum separator keys per internal node
    pub internal_capacity: usize,
}

impl Default for BTreeConfig {
    fn default() -> Self {
        Self {
            leaf_capacity: MAX_LEAF_KEYS,
            internal_capacity: MAX_INTERNAL_KEYS,
        }
    }
}

impl BTreeConfig {
    /// Smallest capacity accepted for either node kind
    pub const MIN_CAPACITY: usize = 3;

    /// Create a config with explicit capacities
    pub fn new(leaf_capacity: usize, internal_capacity: usize) -> Self {
        Self {
            leaf_capacity,
            internal_capacity,
        }
    }

    /// Minimum keys in a non-root leaf
    pub fn min_leaf_keys(&self) -> usize {
        self.leaf_capacity / 2
    }

    /// Minimum separator keys in a non-root internal node
    pub fn min_internal_keys(&self) -> usize {
        self.internal_capacity / 2
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(Self::MIN_CAPACITY..=MAX_LEAF_KEYS).contains(&self.leaf_capacity) {
            return Err(TdbError::InvalidConfiguration(format!(
                "leaf capacity must be in {}..={}, got {}",
                Self::MIN_CAPACITY,
                MAX_LEAF_KEYS,
                self.leaf_capacity
            )));
        }
        if !(Self::MIN_CAPACITY..=MAX_INTERNAL_KEYS).contains(&self.internal_capacity) {
            return Err(TdbError::InvalidConfiguration(format!(
                "internal capacity must be in {}..={}, got {}",
                Self::MIN_CAPACITY,
                MAX_INTERNAL_KEYS,
                self.internal_capacity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(BTreeConfig::default().validate().is_ok());
        assert!(BTreeConfig::new(3, 3).validate().is_ok());
        assert!(BTreeConfig::new(2, 8).validate().is_err());
        assert!(BTreeConfig::new(8, MAX_INTERNAL_KEYS + 1).validate().is_err());
    }
}

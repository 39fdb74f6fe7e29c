//! Triple indexes
//!
//! Each index stores every triple of a dataset once, permuted into one of
//! the [`IndexOrder`]s and kept sorted in a B+Tree, so any pattern with a
//! bound prefix in that order becomes a single range scan.

pub mod order;
pub mod triple;
pub mod triple_index;

pub use order::IndexOrder;
pub use triple::{IndexKey, PatternShape, Triple, TriplePattern, KEY_SIZE};
pub use triple_index::{build_from_sorted, IndexScan, TripleIndex};

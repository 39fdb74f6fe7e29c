//! One permutation index over the B+Tree

use super::order::IndexOrder;
use super::triple::{IndexKey, Triple, TriplePattern};
use crate::btree::{self, BTree, BTreeConfig, BTreeStats, BuildStats, RangeIter};
use crate::config::TdbConfig;
use crate::error::{Result, TdbError};
use crate::storage::BufferPoolStats;
use std::path::Path;
use tracing::debug;

/// Sorted set of triples stored in one [`IndexOrder`]
#[derive(Debug)]
pub struct TripleIndex {
    order: IndexOrder,
    tree: BTree,
}

impl TripleIndex {
    /// Create an empty index file `<dir>/<ORDER>.idx`
    pub fn create<P: AsRef<Path>>(dir: P, order: IndexOrder, config: &TdbConfig) -> Result<Self> {
        let path = dir.as_ref().join(order.file_name());
        let tree = BTree::create(
            &path,
            config.btree,
            order.tag(),
            config.cache_pages,
            config.use_mmap,
        )?;
        Ok(TripleIndex { order, tree })
    }

    /// Open the existing index file `<dir>/<ORDER>.idx`
    pub fn open<P: AsRef<Path>>(dir: P, order: IndexOrder, config: &TdbConfig) -> Result<Self> {
        let path = dir.as_ref().join(order.file_name());
        let tree = BTree::open(&path, config.cache_pages, config.use_mmap)?;
        if tree.tag() != order.tag() {
            return Err(TdbError::corrupt(
                path,
                0,
                format!(
                    "index tag {} does not match order {} (tag {})",
                    tree.tag(),
                    order,
                    order.tag()
                ),
            ));
        }
        debug!("Opened {} index with {} triples", order, tree.len());
        Ok(TripleIndex { order, tree })
    }

    /// Key order of this index
    pub fn order(&self) -> IndexOrder {
        self.order
    }

    /// Path of the index file
    pub fn path(&self) -> &Path {
        self.tree.path()
    }

    /// Number of triples
    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Node capacities fixed when the file was created
    pub fn btree_config(&self) -> BTreeConfig {
        self.tree.config()
    }

    /// Insert a triple; returns false if it was already present
    pub fn insert(&mut self, triple: Triple) -> Result<bool> {
        check_triple(&triple)?;
        self.tree.insert(self.order.to_key(&triple))
    }

    /// Delete a triple; returns false if it was absent
    pub fn delete(&mut self, triple: Triple) -> Result<bool> {
        check_triple(&triple)?;
        self.tree.delete(&self.order.to_key(&triple))
    }

    /// Check whether the index holds `triple`
    pub fn contains(&self, triple: Triple) -> Result<bool> {
        check_triple(&triple)?;
        self.tree.contains(&self.order.to_key(&triple))
    }

    /// Lazy scan of the triples matching `pattern`
    ///
    /// The longest bound key prefix in this order becomes a key range; bound
    /// positions outside the prefix are filtered while scanning. Results come
    /// out in this index's key order.
    pub fn scan(&self, pattern: &TriplePattern) -> Result<IndexScan<'_>> {
        let prefix = self.order.bound_prefix(pattern);
        let (start, end) = IndexKey::prefix_range(&prefix);
        let residual = prefix.len() < pattern.shape().bound_count();
        Ok(IndexScan {
            order: self.order,
            pattern: *pattern,
            residual,
            inner: self.tree.range(start, end)?,
            done: false,
        })
    }

    /// Every key in this index's order, ascending
    pub fn keys(&self) -> Result<RangeIter<'_>> {
        self.tree.iter()
    }

    /// Flush the index file to stable storage
    pub fn flush(&self) -> Result<()> {
        self.tree.sync()
    }

    /// Structural check of the underlying tree
    pub fn verify(&self) -> Result<BTreeStats> {
        self.tree.verify()
    }

    /// Buffer pool statistics
    pub fn buffer_stats(&self) -> BufferPoolStats {
        self.tree.buffer_stats()
    }
}

/// Bulk-build an index file from keys already in `order`, ascending
///
/// Duplicate keys are collapsed; a key smaller than its predecessor fails
/// with [`TdbError::InvalidInput`]. The file at `path` must not exist.
pub fn build_from_sorted<P, I>(
    path: P,
    order: IndexOrder,
    config: BTreeConfig,
    keys: I,
) -> Result<BuildStats>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = Result<IndexKey>>,
{
    let stats = btree::builder::build_from_sorted(path.as_ref(), config, order.tag(), keys)?;
    debug!(
        "Built {} index {:?}: {} keys, height {}",
        order,
        path.as_ref(),
        stats.keys,
        stats.height
    );
    Ok(stats)
}

fn check_triple(triple: &Triple) -> Result<()> {
    if triple.is_valid() {
        Ok(())
    } else {
        Err(TdbError::InvalidInput(format!(
            "triple {triple} has a NULL position"
        )))
    }
}

/// Lazy iterator over the triples matching a pattern in one index
///
/// Yields triples in the index's key order. An error is yielded once, after
/// which the scan is exhausted.
pub struct IndexScan<'a> {
    order: IndexOrder,
    pattern: TriplePattern,
    residual: bool,
    inner: RangeIter<'a>,
    done: bool,
}

impl IndexScan<'_> {
    /// Index this scan reads from
    pub fn order(&self) -> IndexOrder {
        self.order
    }
}

impl Iterator for IndexScan<'_> {
    type Item = Result<Triple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        for item in self.inner.by_ref() {
            match item {
                Ok(key) => {
                    let triple = self.order.to_triple(&key);
                    if !self.residual || self.pattern.matches(&triple) {
                        return Some(Ok(triple));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        self.done = true;
        None
    }
}

impl std::iter::FusedIterator for IndexScan<'_> {}

impl std::fmt::Debug for IndexScan<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexScan")
            .field("order", &self.order)
            .field("pattern", &self.pattern)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::NodeId;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn id(n: u64) -> NodeId {
        NodeId::new(n)
    }

    fn small_config() -> TdbConfig {
        TdbConfig::default().with_btree(BTreeConfig::new(4, 3))
    }

    fn sample() -> Vec<Triple> {
        let mut out = Vec::new();
        for s in 1..=6 {
            for p in 10..=12 {
                for o in [20, 21, 22 + s] {
                    out.push(Triple::from((s, p, o)));
                }
            }
        }
        out
    }

    #[test]
    fn test_insert_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut index = TripleIndex::create(dir.path(), IndexOrder::Spo, &small_config()).unwrap();

        let t = Triple::from((1, 2, 3));
        assert!(index.insert(t).unwrap());
        assert!(!index.insert(t).unwrap());
        assert_eq!(index.len(), 1);
        assert!(index.contains(t).unwrap());

        assert!(index.delete(t).unwrap());
        assert!(!index.delete(t).unwrap());
        assert!(index.is_empty());
    }

    #[test]
    fn test_rejects_null_positions() {
        let dir = TempDir::new().unwrap();
        let mut index = TripleIndex::create(dir.path(), IndexOrder::Pos, &small_config()).unwrap();
        let err = index.insert(Triple::from((1, 0, 3))).unwrap_err();
        assert!(matches!(err, TdbError::InvalidInput(_)));
    }

    #[test]
    fn test_scan_every_shape_every_order() {
        let dir = TempDir::new().unwrap();
        let triples = sample();
        let mut indexes: Vec<TripleIndex> = IndexOrder::ALL
            .into_iter()
            .map(|order| TripleIndex::create(dir.path(), order, &small_config()).unwrap())
            .collect();
        for index in &mut indexes {
            for t in &triples {
                index.insert(*t).unwrap();
            }
        }

        let patterns = [
            TriplePattern::any(),
            TriplePattern::new(Some(id(3)), None, None),
            TriplePattern::new(None, Some(id(11)), None),
            TriplePattern::new(None, None, Some(id(20))),
            TriplePattern::new(Some(id(2)), Some(id(10)), None),
            TriplePattern::new(Some(id(2)), None, Some(id(24))),
            TriplePattern::new(None, Some(id(12)), Some(id(21))),
            TriplePattern::exact(Triple::from((4, 11, 26))),
            TriplePattern::exact(Triple::from((4, 11, 99))),
        ];

        for pattern in patterns {
            let expected: BTreeSet<Triple> =
                triples.iter().copied().filter(|t| pattern.matches(t)).collect();
            for index in &indexes {
                let found: Vec<Triple> = index
                    .scan(&pattern)
                    .unwrap()
                    .collect::<Result<_>>()
                    .unwrap();
                assert_eq!(found.len(), expected.len(), "{} {:?}", index.order(), pattern);
                assert_eq!(found.iter().copied().collect::<BTreeSet<_>>(), expected);

                let keys: Vec<IndexKey> = found.iter().map(|t| index.order().to_key(t)).collect();
                assert!(keys.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }

    #[test]
    fn test_scan_at_id_space_edge() {
        let dir = TempDir::new().unwrap();
        let mut index = TripleIndex::create(dir.path(), IndexOrder::Spo, &small_config()).unwrap();
        let max = NodeId::MAX.as_u64();
        index.insert(Triple::from((max, max, max))).unwrap();
        index.insert(Triple::from((max, max, 1))).unwrap();
        index.insert(Triple::from((1, 1, 1))).unwrap();

        let pattern = TriplePattern::new(Some(id(max)), Some(id(max)), None);
        assert_eq!(index.scan(&pattern).unwrap().count(), 2);
    }

    #[test]
    fn test_open_checks_order_tag() {
        let dir = TempDir::new().unwrap();
        let config = small_config();
        TripleIndex::create(dir.path(), IndexOrder::Spo, &config).unwrap();
        std::fs::rename(
            dir.path().join("SPO.idx"),
            dir.path().join("POS.idx"),
        )
        .unwrap();

        let err = TripleIndex::open(dir.path(), IndexOrder::Pos, &config).unwrap_err();
        assert!(matches!(err, TdbError::CorruptIndex { page: 0, .. }));
    }

    #[test]
    fn test_bulk_built_matches_incremental() {
        let dir = TempDir::new().unwrap();
        let config = small_config();
        let mut triples = sample();

        let mut incremental = TripleIndex::create(dir.path(), IndexOrder::Osp, &config).unwrap();
        for t in &triples {
            incremental.insert(*t).unwrap();
        }

        let bulk_dir = dir.path().join("bulk");
        std::fs::create_dir(&bulk_dir).unwrap();
        triples.sort_by_key(|t| IndexOrder::Osp.to_key(t));
        let stats = build_from_sorted(
            bulk_dir.join(IndexOrder::Osp.file_name()),
            IndexOrder::Osp,
            config.btree,
            triples.iter().map(|t| Ok(IndexOrder::Osp.to_key(t))),
        )
        .unwrap();
        assert_eq!(stats.keys, triples.len() as u64);

        let bulk = TripleIndex::open(&bulk_dir, IndexOrder::Osp, &config).unwrap();
        bulk.verify().unwrap();
        let a: Vec<Triple> = incremental
            .scan(&TriplePattern::any())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let b: Vec<Triple> = bulk
            .scan(&TriplePattern::any())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(a, b);
    }
}

//! Bottom-up B+Tree construction from sorted keys
//!
//! Keys are packed into leaves in one linear pass. Each level keeps at most
//! two unwritten nodes: the one being filled and the previous, completed one.
//! A completed node is written and handed to the level above only once its
//! successor exists, so at the end of input the last two nodes of every level
//! can be rebalanced to meet minimum occupancy.

use super::node::{InternalNode, LeafNode, Node};
use super::tree::{Meta, META_PAGE};
use super::BTreeConfig;
use crate::error::{Result, TdbError};
use crate::index::triple::IndexKey;
use crate::storage::{FileManager, Page, PageId};
use std::path::Path;
use tracing::debug;

/// Outcome of a bulk build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Distinct keys written
    pub keys: u64,
    /// Duplicate input keys skipped
    pub duplicates: u64,
    /// Levels, counting the leaf level
    pub height: u32,
    /// Pages written, including the meta page
    pub pages: u64,
}

/// Node under construction: child entries are `(first key, page id)`
#[derive(Debug)]
enum Pending {
    Leaf(Vec<IndexKey>),
    Internal(Vec<(IndexKey, PageId)>),
}

impl Pending {
    fn len(&self) -> usize {
        match self {
            Pending::Leaf(keys) => keys.len(),
            Pending::Internal(children) => children.len(),
        }
    }

    fn first_key(&self) -> IndexKey {
        match self {
            Pending::Leaf(keys) => keys.first().copied().unwrap_or_default(),
            Pending::Internal(children) => children.first().map(|c| c.0).unwrap_or_default(),
        }
    }

    /// Move entries from the end of `self` to the front of `next` so that
    /// `next` holds at least `want` entries
    fn shift_into(&mut self, next: &mut Pending, want: usize) {
        let missing = want.saturating_sub(next.len());
        match (self, next) {
            (Pending::Leaf(a), Pending::Leaf(b)) => {
                let moved = a.split_off(a.len() - missing);
                b.splice(0..0, moved);
            }
            (Pending::Internal(a), Pending::Internal(b)) => {
                let moved = a.split_off(a.len() - missing);
                b.splice(0..0, moved);
            }
            _ => debug_assert!(false, "mixed node kinds on one level"),
        }
    }
}

struct LevelNode {
    page_id: PageId,
    entries: Pending,
}

struct Level {
    is_leaf: bool,
    held: Option<LevelNode>,
    current: Option<LevelNode>,
}

/// Streaming bottom-up B+Tree builder
///
/// Keys must arrive in ascending order. Repeated keys are skipped; a key
/// smaller than its predecessor fails with [`TdbError::InvalidInput`].
pub struct BTreeBuilder {
    file: FileManager,
    config: BTreeConfig,
    tag: u8,
    levels: Vec<Level>,
    last: Option<IndexKey>,
    stats: BuildStats,
}

impl BTreeBuilder {
    /// Start building a new tree file at `path`
    pub fn create<P: AsRef<Path>>(path: P, config: BTreeConfig, tag: u8) -> Result<Self> {
        config.validate()?;
        let file = FileManager::open(path.as_ref(), false)?;
        if file.num_pages() != 0 {
            return Err(TdbError::StoreExists(path.as_ref().to_path_buf()));
        }
        let meta_page = file.allocate_page()?;
        debug_assert_eq!(meta_page, META_PAGE);

        Ok(Self {
            file,
            config,
            tag,
            levels: vec![Level {
                is_leaf: true,
                held: None,
                current: None,
            }],
            last: None,
            stats: BuildStats::default(),
        })
    }

    /// Append the next key
    pub fn push(&mut self, key: IndexKey) -> Result<()> {
        match self.last {
            Some(last) if key == last => {
                self.stats.duplicates += 1;
                return Ok(());
            }
            Some(last) if key < last => {
                return Err(TdbError::InvalidInput(format!(
                    "unsorted input: {key} after {last}"
                )));
            }
            _ => {}
        }
        self.last = Some(key);
        self.stats.keys += 1;
        self.push_entry(0, key, 0)
    }

    /// Append every key of a fallible stream
    pub fn extend<I>(&mut self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<IndexKey>>,
    {
        for key in keys {
            self.push(key?)?;
        }
        Ok(())
    }

    /// Write the remaining nodes and the meta page
    pub fn finish(mut self) -> Result<BuildStats> {
        let mut level = 0;
        let root = loop {
            let capacity = self.capacity(level);
            let min = self.min_entries(level);
            let lvl = &mut self.levels[level];
            let held = lvl.held.take();
            let current = lvl.current.take();

            match (held, current) {
                (None, None) => {
                    // Only reachable for empty input on the leaf level
                    let page_id = self.file.allocate_page()?;
                    self.write_node(page_id, Node::Leaf(LeafNode::default()))?;
                    break page_id;
                }
                (None, Some(only)) => {
                    let page_id = only.page_id;
                    self.write_level_node(level, only, None)?;
                    break page_id;
                }
                (Some(mut held), current) => {
                    let Some(mut current) = current else {
                        return Err(TdbError::Inconsistent(
                            "completed node without successor".to_string(),
                        ));
                    };
                    if current.entries.len() < min {
                        let total = held.entries.len() + current.entries.len();
                        held.entries.shift_into(&mut current.entries, total / 2);
                        debug_assert!(held.entries.len() <= capacity);
                    }
                    let (held_id, held_first) = (held.page_id, held.entries.first_key());
                    let (current_id, current_first) =
                        (current.page_id, current.entries.first_key());
                    self.write_level_node(level, held, Some(current_id))?;
                    self.write_level_node(level, current, None)?;
                    self.push_entry(level + 1, held_first, held_id)?;
                    self.push_entry(level + 1, current_first, current_id)?;
                }
            }
            level += 1;
        };

        let height = level as u32 + 1;
        let mut meta_page = Meta {
            tag: self.tag,
            config: self.config,
            root,
            height,
            key_count: self.stats.keys,
            free_head: 0,
        }
        .to_page();
        self.file.write_page(&mut meta_page)?;
        self.file.sync()?;

        self.stats.height = height;
        self.stats.pages = self.file.num_pages();
        debug!(
            "Built B+Tree {:?}: {} keys, height {}, {} pages",
            self.file.path(),
            self.stats.keys,
            height,
            self.stats.pages
        );
        Ok(self.stats)
    }

    fn capacity(&self, level: usize) -> usize {
        if level == 0 {
            self.config.leaf_capacity
        } else {
            self.config.internal_capacity + 1
        }
    }

    fn min_entries(&self, level: usize) -> usize {
        if level == 0 {
            self.config.min_leaf_keys()
        } else {
            self.config.min_internal_keys() + 1
        }
    }

    /// Add one entry (a key on level 0, a child on higher levels)
    fn push_entry(&mut self, level: usize, key: IndexKey, child: PageId) -> Result<()> {
        if level == self.levels.len() {
            self.levels.push(Level {
                is_leaf: false,
                held: None,
                current: None,
            });
        }
        let capacity = self.capacity(level);

        let full = self.levels[level]
            .current
            .as_ref()
            .map_or(true, |node| node.entries.len() >= capacity);
        if full {
            let page_id = self.file.allocate_page()?;
            let is_leaf = self.levels[level].is_leaf;
            let fresh = LevelNode {
                page_id,
                entries: if is_leaf {
                    Pending::Leaf(Vec::with_capacity(capacity))
                } else {
                    Pending::Internal(Vec::with_capacity(capacity))
                },
            };
            let lvl = &mut self.levels[level];
            let completed = lvl.held.take();
            lvl.held = lvl.current.replace(fresh);

            if let Some(done) = completed {
                let (first, done_id) = (done.entries.first_key(), done.page_id);
                let next = self.levels[level].held.as_ref().map(|n| n.page_id);
                self.write_level_node(level, done, next)?;
                self.push_entry(level + 1, first, done_id)?;
            }
        }

        if let Some(node) = self.levels[level].current.as_mut() {
            match &mut node.entries {
                Pending::Leaf(keys) => keys.push(key),
                Pending::Internal(children) => children.push((key, child)),
            }
        }
        Ok(())
    }

    /// Write a finished node; `next` is the following leaf on the leaf level
    fn write_level_node(&self, level: usize, node: LevelNode, next: Option<PageId>) -> Result<()> {
        let encoded = match node.entries {
            Pending::Leaf(keys) => Node::Leaf(LeafNode { keys, next }),
            Pending::Internal(children) => {
                debug_assert!(level > 0);
                let (keys, ids): (Vec<_>, Vec<_>) = children.into_iter().unzip();
                Node::Internal(InternalNode {
                    keys: keys[1..].to_vec(),
                    children: ids,
                })
            }
        };
        self.write_node(node.page_id, encoded)
    }

    fn write_node(&self, page_id: PageId, node: Node) -> Result<()> {
        let mut page = Page::new(page_id, node.page_type());
        node.write(&mut page);
        self.file.write_page(&mut page)
    }
}

/// Build a tree file from an ascending key stream
pub fn build_from_sorted<P, I>(path: P, config: BTreeConfig, tag: u8, keys: I) -> Result<BuildStats>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = Result<IndexKey>>,
{
    let mut builder = BTreeBuilder::create(path, config, tag)?;
    builder.extend(keys)?;
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::BTree;
    use tempfile::TempDir;

    fn keys(n: u64) -> impl Iterator<Item = Result<IndexKey>> {
        (0..n).map(|i| Ok(IndexKey([i / 7, i % 7, i])))
    }

    #[test]
    fn test_build_sizes_meet_invariants() -> Result<()> {
        let dir = TempDir::new().unwrap();
        // Sizes around node boundaries of a tiny fan-out
        for n in [0u64, 1, 3, 4, 5, 8, 9, 16, 17, 33, 64, 65, 100, 257, 1000] {
            let path = dir.path().join(format!("b{n}.idx"));
            let stats = build_from_sorted(&path, BTreeConfig::new(4, 3), 1, keys(n))?;
            assert_eq!(stats.keys, n);

            let tree = BTree::open(&path, 32, false)?;
            let verified = tree.verify()?;
            assert_eq!(verified.keys, n, "size {n}");
            assert_eq!(verified.height, stats.height);

            let scanned: Vec<_> = tree.iter()?.collect::<Result<_>>()?;
            let expected: Vec<_> = keys(n).collect::<Result<_>>()?;
            assert_eq!(scanned, expected);
        }
        Ok(())
    }

    #[test]
    fn test_build_default_capacity() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.idx");
        let stats = build_from_sorted(&path, BTreeConfig::default(), 2, keys(50_000))?;
        assert_eq!(stats.height, 3);

        let tree = BTree::open(&path, 64, false)?;
        assert_eq!(tree.verify()?.keys, 50_000);
        assert!(tree.contains(&IndexKey([10, 3, 73]))?);
        Ok(())
    }

    #[test]
    fn test_build_skips_duplicates() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let input = [1u64, 1, 2, 3, 3, 3, 4].map(|i| Ok(IndexKey([i, 0, 0])));
        let stats = build_from_sorted(dir.path().join("d.idx"), BTreeConfig::new(4, 3), 1, input)?;
        assert_eq!(stats.keys, 4);
        assert_eq!(stats.duplicates, 3);
        Ok(())
    }

    #[test]
    fn test_build_rejects_unsorted() {
        let dir = TempDir::new().unwrap();
        let input = [2u64, 1].map(|i| Ok(IndexKey([i, 0, 0])));
        let result = build_from_sorted(dir.path().join("u.idx"), BTreeConfig::new(4, 3), 1, input);
        assert!(matches!(result, Err(TdbError::InvalidInput(_))));
    }

    #[test]
    fn test_built_tree_accepts_updates() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("u.idx");
        build_from_sorted(&path, BTreeConfig::new(4, 3), 1, keys(200))?;

        let mut tree = BTree::open(&path, 32, false)?;
        for i in (0..200).step_by(3) {
            assert!(tree.delete(&IndexKey([i / 7, i % 7, i]))?);
        }
        for i in 200..260 {
            assert!(tree.insert(IndexKey([i / 7, i % 7, i]))?);
        }
        assert_eq!(tree.verify()?.keys, 200 - 67 + 60);
        Ok(())
    }
}

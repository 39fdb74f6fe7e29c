//! Disk-based B+Tree over [`IndexKey`]s
//!
//! Page 0 of every tree file is the meta page. All other pages are tree
//! nodes or entries of the free list.

use super::node::{InternalNode, LeafNode, Node};
use super::BTreeConfig;
use crate::error::{Result, TdbError};
use crate::index::triple::{IndexKey, KEY_SIZE};
use crate::storage::{
    BufferPool, BufferPoolStats, FileManager, Page, PageId, PageType, PAGE_SIZE,
};
use bytes::{Buf, BufMut};
use std::path::Path;
use tracing::debug;

const META_MAGIC: &[u8; 8] = b"FTDBIDX\0";
const FORMAT_VERSION: u32 = 1;

/// Page id of the meta page
pub(crate) const META_PAGE: PageId = 0;

/// Contents of the meta page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Meta {
    pub tag: u8,
    pub config: BTreeConfig,
    pub root: PageId,
    pub height: u32,
    pub key_count: u64,
    /// Head of the free list (0 = empty)
    pub free_head: PageId,
}

impl Meta {
    pub(crate) fn to_page(self) -> Page {
        let mut page = Page::new(META_PAGE, PageType::Meta);
        let used = {
            let mut out = page.data_mut();
            let start = out.len();
            out.put_slice(META_MAGIC);
            out.put_u32_le(FORMAT_VERSION);
            out.put_u32_le(PAGE_SIZE as u32);
            out.put_u32_le(KEY_SIZE as u32);
            out.put_u16_le(self.config.leaf_capacity as u16);
            out.put_u16_le(self.config.internal_capacity as u16);
            out.put_u8(self.tag);
            out.put_u64_le(self.root);
            out.put_u32_le(self.height);
            out.put_u64_le(self.key_count);
            out.put_u64_le(self.free_head);
            start - out.len()
        };
        page.set_used_size(used);
        page
    }

    fn from_page(page: &Page, file: &Path) -> Result<Self> {
        let corrupt = |reason: String| TdbError::corrupt(file, META_PAGE, reason);
        if page.page_type() != PageType::Meta {
            return Err(corrupt(format!("expected meta page, found {:?}", page.page_type())));
        }

        let mut data = page.data();
        if &data[..8] != META_MAGIC {
            return Err(corrupt("bad magic".to_string()));
        }
        data.advance(8);
        let version = data.get_u32_le();
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {version}")));
        }
        let page_size = data.get_u32_le() as usize;
        let key_size = data.get_u32_le() as usize;
        if page_size != PAGE_SIZE || key_size != KEY_SIZE {
            return Err(corrupt(format!(
                "page size {page_size} / key size {key_size} do not match this build"
            )));
        }
        let config = BTreeConfig::new(data.get_u16_le() as usize, data.get_u16_le() as usize);
        config
            .validate()
            .map_err(|e| corrupt(format!("invalid capacities: {e}")))?;

        let meta = Meta {
            tag: data.get_u8(),
            config,
            root: data.get_u64_le(),
            height: data.get_u32_le(),
            key_count: data.get_u64_le(),
            free_head: data.get_u64_le(),
        };
        if meta.root == META_PAGE || meta.height == 0 {
            return Err(corrupt(format!(
                "invalid root {} at height {}",
                meta.root, meta.height
            )));
        }
        Ok(meta)
    }
}

/// Structural statistics gathered by [`BTree::verify`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BTreeStats {
    /// Keys stored
    pub keys: u64,
    /// Levels, counting the leaf level
    pub height: u32,
    /// Leaf pages reachable from the root
    pub leaf_pages: u64,
    /// Internal pages reachable from the root
    pub internal_pages: u64,
    /// Pages on the free list
    pub free_pages: u64,
    /// Pages in the file, including the meta page
    pub total_pages: u64,
}

/// Path entry recorded while descending: internal node and the child taken
type PathEntry = (PageId, InternalNode, usize);

/// Disk-based B+Tree storing a set of [`IndexKey`]s
pub struct BTree {
    pool: BufferPool,
    meta: Meta,
}

impl BTree {
    /// Create a new, empty tree file
    pub fn create<P: AsRef<Path>>(
        path: P,
        config: BTreeConfig,
        tag: u8,
        cache_pages: usize,
        use_mmap: bool,
    ) -> Result<Self> {
        config.validate()?;
        let file = FileManager::open(path.as_ref(), use_mmap)?;
        if file.num_pages() != 0 {
            return Err(TdbError::StoreExists(path.as_ref().to_path_buf()));
        }
        let pool = BufferPool::new(cache_pages, file);

        let meta_page = pool.allocate(PageType::Meta)?;
        debug_assert_eq!(meta_page.page_id(), META_PAGE);
        let root = pool.allocate(PageType::BTreeLeaf)?.page_id();

        let tree = BTree {
            pool,
            meta: Meta {
                tag,
                config,
                root,
                height: 1,
                key_count: 0,
                free_head: 0,
            },
        };
        tree.store(root, &Node::Leaf(LeafNode::default()))?;
        tree.write_meta()?;
        debug!("Created B+Tree {:?} ({:?})", path.as_ref(), config);
        Ok(tree)
    }

    /// Open an existing tree file
    pub fn open<P: AsRef<Path>>(path: P, cache_pages: usize, use_mmap: bool) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TdbError::StoreNotFound(path.to_path_buf()));
        }
        let pool = BufferPool::new(cache_pages, FileManager::open(path, use_mmap)?);
        let meta = Meta::from_page(&*pool.get(META_PAGE)?, path)?;
        debug!(
            "Opened B+Tree {:?}: {} keys, height {}",
            path, meta.key_count, meta.height
        );
        Ok(BTree { pool, meta })
    }

    /// Path of the tree file
    pub fn path(&self) -> &Path {
        self.pool.path()
    }

    /// Caller-defined tag recorded at creation
    pub fn tag(&self) -> u8 {
        self.meta.tag
    }

    /// Node capacities recorded at creation
    pub fn config(&self) -> BTreeConfig {
        self.meta.config
    }

    /// Number of keys
    pub fn len(&self) -> u64 {
        self.meta.key_count
    }

    /// Whether the tree holds no keys
    pub fn is_empty(&self) -> bool {
        self.meta.key_count == 0
    }

    /// Levels, counting the leaf level
    pub fn height(&self) -> u32 {
        self.meta.height
    }

    /// Buffer pool statistics
    pub fn buffer_stats(&self) -> BufferPoolStats {
        self.pool.stats()
    }

    /// Check whether `key` is stored
    pub fn contains(&self, key: &IndexKey) -> Result<bool> {
        let (_, _, leaf) = self.descend(key)?;
        Ok(leaf.contains(key))
    }

    /// Insert a key; returns false if it was already present
    pub fn insert(&mut self, key: IndexKey) -> Result<bool> {
        let (mut path, leaf_id, mut leaf) = self.descend(&key)?;
        if !leaf.insert(key) {
            return Ok(false);
        }

        if leaf.keys.len() <= self.meta.config.leaf_capacity {
            self.store(leaf_id, &Node::Leaf(leaf))?;
            self.meta.key_count += 1;
            self.write_meta()?;
            return Ok(true);
        }

        // Split leaf
        let (mut separator, right) = leaf.split();
        let right_id = self.alloc()?;
        leaf.next = Some(right_id);
        self.store(leaf_id, &Node::Leaf(leaf))?;
        self.store(right_id, &Node::Leaf(right))?;
        let mut new_child = right_id;

        // Propagate splits upwards
        while let Some((parent_id, mut parent, idx)) = path.pop() {
            parent.insert_child(idx, separator, new_child);
            if parent.keys.len() <= self.meta.config.internal_capacity {
                self.store(parent_id, &Node::Internal(parent))?;
                self.meta.key_count += 1;
                self.write_meta()?;
                return Ok(true);
            }

            let (promoted, right) = parent.split();
            let right_id = self.alloc()?;
            self.store(parent_id, &Node::Internal(parent))?;
            self.store(right_id, &Node::Internal(right))?;
            separator = promoted;
            new_child = right_id;
        }

        // Root split
        let new_root = self.alloc()?;
        self.store(
            new_root,
            &Node::Internal(InternalNode {
                keys: vec![separator],
                children: vec![self.meta.root, new_child],
            }),
        )?;
        self.meta.root = new_root;
        self.meta.height += 1;
        self.meta.key_count += 1;
        self.write_meta()?;
        Ok(true)
    }

    /// Delete a key; returns false if it was absent
    pub fn delete(&mut self, key: &IndexKey) -> Result<bool> {
        let (mut path, leaf_id, mut leaf) = self.descend(key)?;
        if !leaf.remove(key) {
            return Ok(false);
        }

        match path.pop() {
            Some((parent_id, mut parent, idx))
                if leaf.keys.len() < self.meta.config.min_leaf_keys() =>
            {
                self.rebalance_leaf(&mut parent, idx, leaf_id, leaf)?;
                self.fix_internal(path, parent_id, parent)?;
            }
            _ => self.store(leaf_id, &Node::Leaf(leaf))?,
        }
        // counted only once every page of the operation is written
        self.meta.key_count -= 1;
        self.write_meta()?;
        Ok(true)
    }

    /// Lazy scan over keys in `[start, end)`; `end = None` runs to the last key
    pub fn range(&self, start: IndexKey, end: Option<IndexKey>) -> Result<RangeIter<'_>> {
        let (_, _, leaf) = self.descend(&start)?;
        let first = leaf.lower_bound(&start);
        let mut keys = leaf.keys;
        keys.drain(..first);

        Ok(RangeIter {
            tree: self,
            keys: keys.into_iter(),
            next_leaf: leaf.next,
            end,
            leaves_left: self.pool.num_pages(),
            done: false,
        })
    }

    /// Lazy scan over every key
    pub fn iter(&self) -> Result<RangeIter<'_>> {
        self.range(IndexKey::MIN, None)
    }

    /// Flush the tree file to stable storage
    pub fn sync(&self) -> Result<()> {
        self.write_meta()?;
        self.pool.sync()
    }

    /// Check structural invariants
    ///
    /// Verifies key order within and across nodes, separator bounds, uniform
    /// leaf depth, minimum occupancy of non-root nodes, the leaf chain and the
    /// stored key count.
    pub fn verify(&self) -> Result<BTreeStats> {
        let mut stats = BTreeStats {
            height: self.meta.height,
            total_pages: self.pool.num_pages(),
            ..BTreeStats::default()
        };
        let mut leaves = Vec::new();
        self.verify_node(self.meta.root, 0, None, None, &mut leaves, &mut stats)?;

        // Leaf chain must visit the leaves in tree order
        for (i, &leaf_id) in leaves.iter().enumerate() {
            let next = self.load_leaf(leaf_id)?.next;
            if next != leaves.get(i + 1).copied() {
                return Err(self.corrupt(
                    leaf_id,
                    format!("leaf link points to {next:?}, expected {:?}", leaves.get(i + 1)),
                ));
            }
        }

        if stats.keys != self.meta.key_count {
            return Err(self.corrupt(
                META_PAGE,
                format!(
                    "meta records {} keys, tree holds {}",
                    self.meta.key_count, stats.keys
                ),
            ));
        }

        let mut free = self.meta.free_head;
        while free != 0 {
            stats.free_pages += 1;
            if stats.free_pages > stats.total_pages {
                return Err(self.corrupt(free, "free list cycle".to_string()));
            }
            free = self.free_next(free)?;
        }
        Ok(stats)
    }

    fn verify_node(
        &self,
        id: PageId,
        depth: u32,
        lower: Option<IndexKey>,
        upper: Option<IndexKey>,
        leaves: &mut Vec<PageId>,
        stats: &mut BTreeStats,
    ) -> Result<()> {
        let is_root = depth == 0;
        let in_bounds = |key: &IndexKey| {
            lower.map_or(true, |lo| *key >= lo) && upper.map_or(true, |hi| *key < hi)
        };
        let keys_ok = |keys: &[IndexKey]| {
            keys.windows(2).all(|w| w[0] < w[1]) && keys.iter().all(in_bounds)
        };

        match self.load(id)? {
            Node::Leaf(leaf) => {
                if depth + 1 != self.meta.height {
                    return Err(self.corrupt(id, format!("leaf at depth {depth}")));
                }
                if !keys_ok(&leaf.keys) {
                    return Err(self.corrupt(id, "leaf keys out of order or bounds".to_string()));
                }
                if !is_root && leaf.keys.len() < self.meta.config.min_leaf_keys() {
                    return Err(self.corrupt(id, format!("underfull leaf ({} keys)", leaf.keys.len())));
                }
                stats.keys += leaf.keys.len() as u64;
                stats.leaf_pages += 1;
                leaves.push(id);
            }
            Node::Internal(node) => {
                if depth + 1 >= self.meta.height {
                    return Err(self.corrupt(id, format!("internal node at depth {depth}")));
                }
                if !keys_ok(&node.keys) {
                    return Err(self.corrupt(id, "separators out of order or bounds".to_string()));
                }
                let min = if is_root { 1 } else { self.meta.config.min_internal_keys() };
                if node.keys.len() < min || node.keys.len() > self.meta.config.internal_capacity {
                    return Err(self.corrupt(id, format!("internal node holds {} keys", node.keys.len())));
                }
                stats.internal_pages += 1;
                for (i, &child) in node.children.iter().enumerate() {
                    let lo = if i == 0 { lower } else { Some(node.keys[i - 1]) };
                    let hi = node.keys.get(i).copied().or(upper);
                    self.verify_node(child, depth + 1, lo, hi, leaves, stats)?;
                }
            }
        }
        Ok(())
    }

    /// Descend from the root to the leaf responsible for `key`
    fn descend(&self, key: &IndexKey) -> Result<(Vec<PathEntry>, PageId, LeafNode)> {
        let mut path = Vec::with_capacity(self.meta.height as usize);
        let mut id = self.meta.root;
        for _ in 1..self.meta.height {
            let node = self.load_internal(id)?;
            let idx = node.find_child(key);
            let child = node.children[idx];
            path.push((id, node, idx));
            id = child;
        }
        let leaf = self.load_leaf(id)?;
        Ok((path, id, leaf))
    }

    /// Restore minimum occupancy of an underfull leaf by borrowing or merging
    fn rebalance_leaf(
        &mut self,
        parent: &mut InternalNode,
        idx: usize,
        leaf_id: PageId,
        mut leaf: LeafNode,
    ) -> Result<()> {
        let min = self.meta.config.min_leaf_keys();

        let mut left = None;
        if idx > 0 {
            let left_id = parent.children[idx - 1];
            let mut node = self.load_leaf(left_id)?;
            if node.keys.len() > min {
                if let Some(moved) = node.keys.pop() {
                    leaf.keys.insert(0, moved);
                    parent.keys[idx - 1] = moved;
                    self.store(left_id, &Node::Leaf(node))?;
                    return self.store(leaf_id, &Node::Leaf(leaf));
                }
            }
            left = Some((left_id, node));
        }

        let mut right = None;
        if idx + 1 < parent.children.len() {
            let right_id = parent.children[idx + 1];
            let mut node = self.load_leaf(right_id)?;
            if node.keys.len() > min {
                let moved = node.keys.remove(0);
                leaf.keys.push(moved);
                parent.keys[idx] = node.keys[0];
                self.store(right_id, &Node::Leaf(node))?;
                return self.store(leaf_id, &Node::Leaf(leaf));
            }
            right = Some((right_id, node));
        }

        match (left, right) {
            (Some((left_id, mut left)), _) => {
                left.keys.append(&mut leaf.keys);
                left.next = leaf.next;
                self.store(left_id, &Node::Leaf(left))?;
                self.release(leaf_id)?;
                parent.keys.remove(idx - 1);
                parent.children.remove(idx);
            }
            (None, Some((right_id, mut right))) => {
                leaf.keys.append(&mut right.keys);
                leaf.next = right.next;
                self.store(leaf_id, &Node::Leaf(leaf))?;
                self.release(right_id)?;
                parent.keys.remove(idx);
                parent.children.remove(idx + 1);
            }
            (None, None) => {
                return Err(self.corrupt(leaf_id, "leaf without siblings under internal node".to_string()))
            }
        }
        Ok(())
    }

    /// Store `node` and rebalance it and its ancestors as needed
    fn fix_internal(
        &mut self,
        mut path: Vec<PathEntry>,
        mut node_id: PageId,
        mut node: InternalNode,
    ) -> Result<()> {
        loop {
            let Some((parent_id, mut parent, idx)) = path.pop() else {
                if node.keys.is_empty() {
                    // Root with a single child: shrink the tree
                    self.meta.root = node.children[0];
                    self.meta.height -= 1;
                    return self.release(node_id);
                }
                return self.store(node_id, &Node::Internal(node));
            };

            if node.keys.len() >= self.meta.config.min_internal_keys() {
                return self.store(node_id, &Node::Internal(node));
            }
            self.rebalance_internal(&mut parent, idx, node_id, node)?;
            node_id = parent_id;
            node = parent;
        }
    }

    fn rebalance_internal(
        &mut self,
        parent: &mut InternalNode,
        idx: usize,
        node_id: PageId,
        mut node: InternalNode,
    ) -> Result<()> {
        let min = self.meta.config.min_internal_keys();

        let mut left = None;
        if idx > 0 {
            let left_id = parent.children[idx - 1];
            let mut sibling = self.load_internal(left_id)?;
            if sibling.keys.len() > min {
                if let (Some(child), Some(separator)) =
                    (sibling.children.pop(), sibling.keys.pop())
                {
                    node.keys.insert(0, parent.keys[idx - 1]);
                    node.children.insert(0, child);
                    parent.keys[idx - 1] = separator;
                    self.store(left_id, &Node::Internal(sibling))?;
                    return self.store(node_id, &Node::Internal(node));
                }
            }
            left = Some((left_id, sibling));
        }

        let mut right = None;
        if idx + 1 < parent.children.len() {
            let right_id = parent.children[idx + 1];
            let mut sibling = self.load_internal(right_id)?;
            if sibling.keys.len() > min {
                node.keys.push(parent.keys[idx]);
                node.children.push(sibling.children.remove(0));
                parent.keys[idx] = sibling.keys.remove(0);
                self.store(right_id, &Node::Internal(sibling))?;
                return self.store(node_id, &Node::Internal(node));
            }
            right = Some((right_id, sibling));
        }

        match (left, right) {
            (Some((left_id, mut left)), _) => {
                left.keys.push(parent.keys.remove(idx - 1));
                left.keys.append(&mut node.keys);
                left.children.append(&mut node.children);
                parent.children.remove(idx);
                self.store(left_id, &Node::Internal(left))?;
                self.release(node_id)?;
            }
            (None, Some((right_id, mut right))) => {
                node.keys.push(parent.keys.remove(idx));
                node.keys.append(&mut right.keys);
                node.children.append(&mut right.children);
                parent.children.remove(idx + 1);
                self.store(node_id, &Node::Internal(node))?;
                self.release(right_id)?;
            }
            (None, None) => {
                return Err(self.corrupt(node_id, "internal node without siblings".to_string()))
            }
        }
        Ok(())
    }

    fn load(&self, id: PageId) -> Result<Node> {
        if id == META_PAGE {
            return Err(self.corrupt(id, "node pointer to the meta page".to_string()));
        }
        Node::read(&*self.pool.get(id)?, self.pool.path())
    }

    pub(crate) fn load_leaf(&self, id: PageId) -> Result<LeafNode> {
        match self.load(id)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(self.corrupt(id, "expected leaf, found internal node".to_string())),
        }
    }

    fn load_internal(&self, id: PageId) -> Result<InternalNode> {
        match self.load(id)? {
            Node::Internal(node) => Ok(node),
            Node::Leaf(_) => Err(self.corrupt(id, "expected internal node, found leaf".to_string())),
        }
    }

    fn store(&self, id: PageId, node: &Node) -> Result<()> {
        let mut page = Page::new(id, node.page_type());
        node.write(&mut page);
        self.pool.put(page)
    }

    fn write_meta(&self) -> Result<()> {
        self.pool.put(self.meta.to_page())
    }

    /// Take a page from the free list, or append one
    fn alloc(&mut self) -> Result<PageId> {
        if self.meta.free_head == 0 {
            return Ok(self.pool.allocate(PageType::Free)?.page_id());
        }
        let id = self.meta.free_head;
        self.meta.free_head = self.free_next(id)?;
        Ok(id)
    }

    fn free_next(&self, id: PageId) -> Result<PageId> {
        let page = self.pool.get(id)?;
        if page.page_type() != PageType::Free {
            return Err(self.corrupt(id, format!("free list entry is a {:?} page", page.page_type())));
        }
        Ok(page.data().get_u64_le())
    }

    /// Put a page on the free list
    fn release(&mut self, id: PageId) -> Result<()> {
        let mut page = Page::new(id, PageType::Free);
        page.data_mut()[..8].copy_from_slice(&self.meta.free_head.to_le_bytes());
        page.set_used_size(8);
        self.pool.put(page)?;
        self.meta.free_head = id;
        Ok(())
    }

    fn corrupt(&self, page: PageId, reason: String) -> TdbError {
        TdbError::corrupt(self.pool.path(), page, reason)
    }
}

impl std::fmt::Debug for BTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTree")
            .field("path", &self.path())
            .field("keys", &self.meta.key_count)
            .field("height", &self.meta.height)
            .finish()
    }
}

/// Lazy, forward-only iterator over a key range
///
/// Reads one leaf at a time. After yielding an error the iterator is
/// exhausted.
pub struct RangeIter<'a> {
    tree: &'a BTree,
    keys: std::vec::IntoIter<IndexKey>,
    next_leaf: Option<PageId>,
    end: Option<IndexKey>,
    /// Bound on leaves still to visit, so a corrupt link cycle terminates
    leaves_left: u64,
    done: bool,
}

impl Iterator for RangeIter<'_> {
    type Item = Result<IndexKey>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(key) = self.keys.next() {
                if self.end.map_or(false, |end| key >= end) {
                    self.done = true;
                    return None;
                }
                return Some(Ok(key));
            }

            let Some(id) = self.next_leaf else {
                self.done = true;
                return None;
            };
            if self.leaves_left == 0 {
                self.done = true;
                return Some(Err(self.tree.corrupt(id, "leaf chain cycle".to_string())));
            }
            self.leaves_left -= 1;

            match self.tree.load_leaf(id) {
                Ok(leaf) => {
                    self.next_leaf = leaf.next;
                    self.keys = leaf.keys.into_iter();
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl std::iter::FusedIterator for RangeIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::node::{MAX_INTERNAL_KEYS, MAX_LEAF_KEYS};
    use tempfile::TempDir;

    fn key(n: u64) -> IndexKey {
        IndexKey([n / 100, n % 100, n])
    }

    fn tiny_tree(dir: &TempDir) -> BTree {
        BTree::create(dir.path().join("t.idx"), BTreeConfig::new(4, 3), 1, 64, false).unwrap()
    }

    /// Deterministic permutation of 0..n
    fn shuffled(n: u64) -> Vec<u64> {
        let mut values: Vec<u64> = (0..n).collect();
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        for i in (1..values.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            values.swap(i, (state % (i as u64 + 1)) as usize);
        }
        values
    }

    #[test]
    fn test_empty_tree() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let tree = tiny_tree(&dir);
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.iter()?.count(), 0);
        assert!(!tree.contains(&key(1))?);
        tree.verify()?;
        Ok(())
    }

    #[test]
    fn test_insert_is_idempotent() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut tree = tiny_tree(&dir);
        assert!(tree.insert(key(5))?);
        assert!(!tree.insert(key(5))?);
        assert_eq!(tree.len(), 1);
        assert!(tree.delete(&key(5))?);
        assert!(!tree.delete(&key(5))?);
        assert!(tree.is_empty());
        Ok(())
    }

    #[test]
    fn test_random_insert_delete_keeps_invariants() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut tree = tiny_tree(&dir);
        let values = shuffled(400);

        for (i, &v) in values.iter().enumerate() {
            assert!(tree.insert(key(v))?);
            if i % 50 == 0 {
                tree.verify()?;
            }
        }
        let stats = tree.verify()?;
        assert_eq!(stats.keys, 400);
        assert!(stats.height >= 4);

        let scanned: Vec<_> = tree.iter()?.collect::<Result<_>>()?;
        let mut expected: Vec<_> = (0..400).map(key).collect();
        expected.sort();
        assert_eq!(scanned, expected);

        // Delete every other key in another order
        for &v in shuffled(400).iter().filter(|v| *v % 2 == 0) {
            assert!(tree.delete(&key(v))?);
        }
        let stats = tree.verify()?;
        assert_eq!(stats.keys, 200);
        assert!(stats.free_pages > 0);
        for v in 0..400 {
            assert_eq!(tree.contains(&key(v))?, v % 2 == 1);
        }

        // Drain completely; the tree collapses to a single leaf
        for v in (0..400).filter(|v| v % 2 == 1) {
            assert!(tree.delete(&key(v))?);
        }
        let stats = tree.verify()?;
        assert_eq!(stats.keys, 0);
        assert_eq!(stats.height, 1);
        Ok(())
    }

    #[test]
    fn test_freed_pages_are_reused() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut tree = tiny_tree(&dir);
        for v in 0..200 {
            tree.insert(key(v))?;
        }
        for v in 0..200 {
            tree.delete(&key(v))?;
        }
        let pages_after_drain = tree.verify()?.total_pages;
        for v in 0..200 {
            tree.insert(key(v))?;
        }
        assert_eq!(tree.verify()?.total_pages, pages_after_drain);
        Ok(())
    }

    #[test]
    fn test_range_bounds() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut tree = tiny_tree(&dir);
        for v in 0..100 {
            tree.insert(IndexKey([v / 10, v % 10, 0]))?;
        }

        let keys: Vec<_> = tree
            .range(IndexKey([3, 0, 0]), Some(IndexKey([4, 0, 0])))?
            .collect::<Result<_>>()?;
        assert_eq!(keys.len(), 10);
        assert!(keys.iter().all(|k| k.0[0] == 3));

        let tail: Vec<_> = tree.range(IndexKey([9, 5, 0]), None)?.collect::<Result<_>>()?;
        assert_eq!(tail.len(), 5);

        let none: Vec<_> = tree
            .range(IndexKey([20, 0, 0]), None)?
            .collect::<Result<_>>()?;
        assert!(none.is_empty());
        Ok(())
    }

    #[test]
    fn test_reopen() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.idx");
        {
            let mut tree = BTree::create(&path, BTreeConfig::new(5, 4), 7, 16, false)?;
            for v in shuffled(300) {
                tree.insert(key(v))?;
            }
            tree.sync()?;
        }

        let tree = BTree::open(&path, 16, true)?;
        assert_eq!(tree.tag(), 7);
        assert_eq!(tree.config(), BTreeConfig::new(5, 4));
        assert_eq!(tree.len(), 300);
        assert_eq!(tree.verify()?.keys, 300);
        Ok(())
    }

    #[test]
    fn test_failed_delete_keeps_key_count() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.idx");
        {
            let mut tree = BTree::create(&path, BTreeConfig::new(4, 3), 1, 64, false)?;
            for v in 0..60 {
                tree.insert(key(v))?;
            }
            tree.sync()?;
        }
        let mut file = std::fs::OpenOptions::new().write(true).open(&path)?;
        std::io::Seek::seek(&mut file, std::io::SeekFrom::Start(2 * 4096 + 200))?;
        std::io::Write::write_all(&mut file, &[0x5A; 32])?;
        drop(file);

        let mut tree = BTree::open(&path, 64, false)?;
        let mut failed = false;
        for v in 0..60 {
            let before = tree.len();
            match tree.delete(&key(v)) {
                Ok(deleted) => assert!(deleted),
                Err(e) => {
                    assert!(e.is_fatal(), "unexpected error {e}");
                    assert_eq!(tree.len(), before);
                    failed = true;
                    break;
                }
            }
        }
        assert!(failed, "corrupt page was never read");
        Ok(())
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.idx");
        BTree::create(&path, BTreeConfig::default(), 1, 16, false).unwrap();
        assert!(matches!(
            BTree::create(&path, BTreeConfig::default(), 1, 16, false),
            Err(TdbError::StoreExists(_))
        ));
    }

    #[test]
    fn test_max_fanout_capacities() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut tree = BTree::create(dir.path().join("t.idx"), BTreeConfig::default(), 1, 64, false)?;
        for v in shuffled((MAX_LEAF_KEYS * 4) as u64) {
            tree.insert(key(v))?;
        }
        let stats = tree.verify()?;
        assert_eq!(stats.height, 2);
        assert!(MAX_INTERNAL_KEYS > 4);
        Ok(())
    }
}

//! B+Tree node layout and in-node operations
//!
//! Leaf payload: `count: u16`, `next: u64` (0 = last leaf), then `count`
//! 24-byte keys. Internal payload: `count: u16`, `count + 1` child page ids
//! (`u64`), then `count` separator keys. Integers are little-endian; keys use
//! their big-endian [`IndexKey`] encoding.

use crate::error::{Result, TdbError};
use crate::index::triple::{IndexKey, KEY_SIZE};
use crate::storage::{Page, PageId, PageType, PAGE_USABLE_SIZE};
use bytes::{Buf, BufMut};
use std::path::Path;

const LEAF_HEADER: usize = 2 + 8;
const INTERNAL_HEADER: usize = 2;

/// Most keys a leaf page can hold
pub const MAX_LEAF_KEYS: usize = (PAGE_USABLE_SIZE - LEAF_HEADER) / KEY_SIZE;

/// Most separator keys an internal page can hold
pub const MAX_INTERNAL_KEYS: usize = (PAGE_USABLE_SIZE - INTERNAL_HEADER - 8) / (KEY_SIZE + 8);

/// Internal node containing separator keys and child page IDs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InternalNode {
    /// Keys for routing (keys\[i\] is the smallest key in children\[i+1\])
    pub keys: Vec<IndexKey>,
    /// Child page IDs (always has keys.len() + 1 children)
    pub children: Vec<PageId>,
}

/// Leaf node containing sorted keys
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeafNode {
    /// Keys in ascending order
    pub keys: Vec<IndexKey>,
    /// Next leaf page ID for range scans (None if last leaf)
    pub next: Option<PageId>,
}

/// B+Tree node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Internal node with keys and child pointers
    Internal(InternalNode),
    /// Leaf node with keys
    Leaf(LeafNode),
}

impl Node {
    /// Decode a node from a verified page
    pub fn read(page: &Page, file: &Path) -> Result<Self> {
        let corrupt = |reason: String| TdbError::corrupt(file, page.page_id(), reason);
        let mut data = page.data();

        match page.page_type() {
            PageType::BTreeLeaf => {
                let count = data.get_u16_le() as usize;
                if count > MAX_LEAF_KEYS {
                    return Err(corrupt(format!("leaf holds {count} keys")));
                }
                let next = data.get_u64_le();
                let keys = data[..count * KEY_SIZE]
                    .chunks_exact(KEY_SIZE)
                    .map(IndexKey::from_bytes)
                    .collect();
                Ok(Node::Leaf(LeafNode {
                    keys,
                    next: (next != 0).then_some(next),
                }))
            }
            PageType::BTreeInternal => {
                let count = data.get_u16_le() as usize;
                if count > MAX_INTERNAL_KEYS {
                    return Err(corrupt(format!("internal node holds {count} keys")));
                }
                let mut children = Vec::with_capacity(count + 1);
                for _ in 0..=count {
                    let child = data.get_u64_le();
                    if child == 0 {
                        return Err(corrupt("child pointer to the meta page".to_string()));
                    }
                    children.push(child);
                }
                let keys = data[..count * KEY_SIZE]
                    .chunks_exact(KEY_SIZE)
                    .map(IndexKey::from_bytes)
                    .collect();
                Ok(Node::Internal(InternalNode { keys, children }))
            }
            other => Err(corrupt(format!("expected a tree node, found {other:?} page"))),
        }
    }

    /// Encode this node into `page`, replacing its contents
    pub fn write(&self, page: &mut Page) {
        page.clear();
        let used = {
            let mut out = page.data_mut();
            let start = out.len();
            match self {
                Node::Leaf(leaf) => {
                    debug_assert!(leaf.keys.len() <= MAX_LEAF_KEYS);
                    out.put_u16_le(leaf.keys.len() as u16);
                    out.put_u64_le(leaf.next.unwrap_or(0));
                    for key in &leaf.keys {
                        out.put_slice(&key.to_bytes());
                    }
                }
                Node::Internal(node) => {
                    debug_assert!(node.keys.len() <= MAX_INTERNAL_KEYS);
                    debug_assert_eq!(node.children.len(), node.keys.len() + 1);
                    out.put_u16_le(node.keys.len() as u16);
                    for child in &node.children {
                        out.put_u64_le(*child);
                    }
                    for key in &node.keys {
                        out.put_slice(&key.to_bytes());
                    }
                }
            }
            start - out.len()
        };
        page.set_page_type(self.page_type());
        page.set_used_size(used);
    }

    /// Page type for this node
    pub fn page_type(&self) -> PageType {
        match self {
            Node::Leaf(_) => PageType::BTreeLeaf,
            Node::Internal(_) => PageType::BTreeInternal,
        }
    }

    /// Get the number of keys in this node
    pub fn len(&self) -> usize {
        match self {
            Node::Internal(node) => node.keys.len(),
            Node::Leaf(node) => node.keys.len(),
        }
    }

    /// Check if this node is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InternalNode {
    /// Find the child index for a given key
    pub fn find_child(&self, key: &IndexKey) -> usize {
        match self.keys.binary_search(key) {
            Ok(idx) => idx + 1, // Key found, go to right child
            Err(idx) => idx,    // Key not found, idx is insertion point
        }
    }

    /// Insert separator `key` and its right child after child `index`
    pub fn insert_child(&mut self, index: usize, key: IndexKey, child_id: PageId) {
        self.keys.insert(index, key);
        self.children.insert(index + 1, child_id);
    }

    /// Split this internal node into two
    ///
    /// Returns the separator promoted to the parent and the new right node.
    pub fn split(&mut self) -> (IndexKey, InternalNode) {
        let mid = self.keys.len() / 2;
        let right_keys = self.keys.split_off(mid + 1);
        let right_children = self.children.split_off(mid + 1);
        let split_key = self.keys.pop().unwrap_or_default();

        (
            split_key,
            InternalNode {
                keys: right_keys,
                children: right_children,
            },
        )
    }
}

impl LeafNode {
    /// Check whether the leaf holds `key`
    pub fn contains(&self, key: &IndexKey) -> bool {
        self.keys.binary_search(key).is_ok()
    }

    /// Insert a key; returns false if it was already present
    pub fn insert(&mut self, key: IndexKey) -> bool {
        match self.keys.binary_search(&key) {
            Ok(_) => false,
            Err(idx) => {
                self.keys.insert(idx, key);
                true
            }
        }
    }

    /// Remove a key; returns false if it was absent
    pub fn remove(&mut self, key: &IndexKey) -> bool {
        match self.keys.binary_search(key) {
            Ok(idx) => {
                self.keys.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    /// Split this leaf node into two
    ///
    /// The new right leaf inherits the `next` link; the caller links the left
    /// leaf to the right one once it has a page id.
    pub fn split(&mut self) -> (IndexKey, LeafNode) {
        let mid = self.keys.len() / 2;
        let right_keys = self.keys.split_off(mid);
        let split_key = right_keys[0];

        (
            split_key,
            LeafNode {
                keys: right_keys,
                next: self.next,
            },
        )
    }

    /// Index of the first key `>= start`
    pub fn lower_bound(&self, start: &IndexKey) -> usize {
        self.keys.partition_point(|k| k < start)
    }
}

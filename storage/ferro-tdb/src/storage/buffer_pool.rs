//! Buffer pool with LRU caching
//!
//! Pages are cached as immutable `Arc<Page>` snapshots. Writes go through to
//! the file manager immediately and replace the cached copy, so a reader
//! holding an older `Arc` keeps a consistent view of the page it fetched.

use crate::error::Result;
use crate::storage::file_manager::FileManager;
use crate::storage::page::{Page, PageId, PageType};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Buffer pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Page requests served from the cache
    pub hits: u64,
    /// Page requests that went to disk
    pub misses: u64,
    /// Pages written
    pub writes: u64,
    /// Pages currently cached
    pub cached_pages: usize,
}

impl BufferPoolStats {
    /// Fraction of requests served from the cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// LRU page cache in front of one [`FileManager`]
pub struct BufferPool {
    file: FileManager,
    cache: Mutex<LruCache<PageId, Arc<Page>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl BufferPool {
    /// Create a new buffer pool holding at most `capacity` pages
    pub fn new(capacity: usize, file: FileManager) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            file,
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Get a page, reading and verifying it on a cache miss
    pub fn get(&self, page_id: PageId) -> Result<Arc<Page>> {
        if let Some(page) = self.cache.lock().get(&page_id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(page));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let page = Arc::new(self.file.read_page(page_id)?);
        self.cache.lock().put(page_id, Arc::clone(&page));
        Ok(page)
    }

    /// Append a fresh page to the file
    pub fn allocate(&self, page_type: PageType) -> Result<Page> {
        let page_id = self.file.allocate_page()?;
        Ok(Page::new(page_id, page_type))
    }

    /// Write a page through to disk and cache it
    pub fn put(&self, mut page: Page) -> Result<()> {
        self.file.write_page(&mut page)?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.cache.lock().put(page.page_id(), Arc::new(page));
        Ok(())
    }

    /// Drop every cached page
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    /// Flush the underlying file to stable storage
    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }

    /// Number of pages in the file
    pub fn num_pages(&self) -> u64 {
        self.file.num_pages()
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Get buffer pool statistics
    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            cached_pages: self.cache.lock().len(),
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("file", &self.file)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_pool(capacity: usize) -> (TempDir, BufferPool) {
        let temp_dir = TempDir::new().unwrap();
        let file = FileManager::open(temp_dir.path().join("pool.idx"), false).unwrap();
        (temp_dir, BufferPool::new(capacity, file))
    }

    #[test]
    fn test_buffer_pool_put_get() -> Result<()> {
        let (_dir, pool) = create_test_pool(4);

        let mut page = pool.allocate(PageType::BTreeLeaf)?;
        page.data_mut()[0] = 42;
        let id = page.page_id();
        pool.put(page)?;

        assert_eq!(pool.get(id)?.data()[0], 42);
        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.writes, 1);
        Ok(())
    }

    #[test]
    fn test_buffer_pool_eviction_reads_back() -> Result<()> {
        let (_dir, pool) = create_test_pool(2);

        let mut ids = Vec::new();
        for i in 0..5u8 {
            let mut page = pool.allocate(PageType::BTreeLeaf)?;
            page.data_mut()[0] = i;
            ids.push(page.page_id());
            pool.put(page)?;
        }

        assert_eq!(pool.stats().cached_pages, 2);
        assert_eq!(pool.get(ids[0])?.data()[0], 0);
        assert_eq!(pool.stats().misses, 1);
        Ok(())
    }

    #[test]
    fn test_buffer_pool_snapshot_isolation() -> Result<()> {
        let (_dir, pool) = create_test_pool(4);

        let page = pool.allocate(PageType::BTreeLeaf)?;
        let id = page.page_id();
        pool.put(page)?;

        let before = pool.get(id)?;
        let mut updated = (*before).clone();
        updated.data_mut()[0] = 9;
        pool.put(updated)?;

        assert_eq!(before.data()[0], 0);
        assert_eq!(pool.get(id)?.data()[0], 9);
        Ok(())
    }
}

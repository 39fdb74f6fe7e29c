//! Low-level storage layer
//!
//! This module provides the foundation for disk-based storage:
//! - Page management (4KB fixed-size pages with checksums)
//! - File I/O with optional memory-mapped files
//! - Buffer pool with LRU caching

pub mod buffer_pool;
pub mod file_manager;
pub mod page;

// Re-exports
pub use buffer_pool::{BufferPool, BufferPoolStats};
pub use file_manager::FileManager;
pub use page::{Page, PageHeader, PageId, PageType, PAGE_HEADER_SIZE, PAGE_SIZE, PAGE_USABLE_SIZE};

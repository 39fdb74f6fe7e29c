//! Store configuration

use crate::btree::BTreeConfig;
use crate::error::{Result, TdbError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the TDB storage engine
///
/// This structure controls the persistence location, memory usage and
/// durability behavior of a store. It is passed explicitly to
/// [`TdbStore::create`](crate::TdbStore::create) and friends; nothing is read
/// from the environment.
///
/// # Examples
///
/// ```rust
/// use ferro_tdb::TdbConfig;
///
/// // Default configuration
/// let config = TdbConfig::new("./my-database");
///
/// // Tuned for a large one-off load
/// let load_config = TdbConfig::new("/var/lib/ferro/data")
///     .with_cache_pages(16_384)
///     .with_sync_writes(false)
///     .with_sort_buffer(20_000_000);
/// assert!(load_config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TdbConfig {
    /// Database location on disk
    ///
    /// This directory will contain all database files:
    /// - Node table files (`nodes.dat`, `nodes.idn`)
    /// - Triple index files (`SPO.idx`, `POS.idx`, `OSP.idx`)
    /// - Write-ahead journal (`journal.jrnl`)
    /// - Store marker (`tdb.info`)
    pub location: PathBuf,

    /// Buffer pool size per index, in 4 KiB pages
    pub cache_pages: usize,

    /// Decoded terms kept in the node table cache
    pub term_cache_size: usize,

    /// Use memory-mapped I/O for index files
    pub use_mmap: bool,

    /// Fsync the journal and node log before each write batch is applied
    ///
    /// Disable only for scratch stores; a crash can then lose recent writes.
    pub sync_writes: bool,

    /// Node capacities for newly created index files
    pub btree: BTreeConfig,

    /// Bulk loader settings
    pub bulk: BulkLoadConfig,
}

impl Default for TdbConfig {
    fn default() -> Self {
        Self {
            location: PathBuf::from("./tdb"),
            cache_pages: 4096, // 16MB per index
            term_cache_size: 100_000,
            use_mmap: false,
            sync_writes: true,
            btree: BTreeConfig::default(),
            bulk: BulkLoadConfig::default(),
        }
    }
}

impl TdbConfig {
    /// Default configuration at `location`
    pub fn new<P: AsRef<Path>>(location: P) -> Self {
        Self {
            location: location.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Set the buffer pool size per index
    pub fn with_cache_pages(mut self, pages: usize) -> Self {
        self.cache_pages = pages;
        self
    }

    /// Set the node table term cache size
    pub fn with_term_cache(mut self, terms: usize) -> Self {
        self.term_cache_size = terms;
        self
    }

    /// Enable or disable memory-mapped index I/O
    pub fn with_mmap(mut self, enabled: bool) -> Self {
        self.use_mmap = enabled;
        self
    }

    /// Enable or disable fsync on every write batch
    pub fn with_sync_writes(mut self, enabled: bool) -> Self {
        self.sync_writes = enabled;
        self
    }

    /// Set node capacities for new index files
    pub fn with_btree(mut self, btree: BTreeConfig) -> Self {
        self.btree = btree;
        self
    }

    /// Set the bulk loader batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.bulk.batch_size = batch_size;
        self
    }

    /// Set the bulk loader sort buffer, in triples
    pub fn with_sort_buffer(mut self, triples: usize) -> Self {
        self.bulk.sort_buffer_triples = triples;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.location.as_os_str().is_empty() {
            return Err(TdbError::InvalidConfiguration(
                "location must not be empty".to_string(),
            ));
        }
        if self.cache_pages == 0 {
            return Err(TdbError::InvalidConfiguration(
                "cache_pages must be positive".to_string(),
            ));
        }
        self.btree.validate()?;
        self.bulk.validate()
    }
}

/// Bulk loader configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkLoadConfig {
    /// Triples translated to ids per node table batch
    pub batch_size: usize,

    /// Triples held in memory before a sorted run is spilled to disk
    pub sort_buffer_triples: usize,

    /// Sort runs and build the three indexes in parallel
    pub parallel: bool,
}

impl Default for BulkLoadConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            sort_buffer_triples: 5_000_000, // ~120MB per order
            parallel: true,
        }
    }
}

impl BulkLoadConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TdbError::InvalidConfiguration(
                "batch_size must be positive".to_string(),
            ));
        }
        if self.sort_buffer_triples < self.batch_size {
            return Err(TdbError::InvalidConfiguration(format!(
                "sort_buffer_triples ({}) must be at least batch_size ({})",
                self.sort_buffer_triples, self.batch_size
            )));
        }
        Ok(())
    }
}

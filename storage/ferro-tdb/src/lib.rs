//! # Ferro TDB - Embeddable RDF Triple Store
//!
//! Ferro TDB is a persistent, single-writer/multi-reader RDF triple storage
//! engine. It keeps a dictionary of RDF terms, three sorted permutation
//! indexes over fixed-width term identifiers, and a sort-based bulk loader
//! that builds those indexes far faster than incremental insertion.
//!
//! ## Key Features
//!
//! - **Dictionary Encoding**: Every distinct term is stored once and referred to by an 8-byte [`NodeId`]
//! - **Permutation Indexes**: SPO, POS and OSP B+Trees answer any triple pattern with one range scan
//! - **Atomic Writes**: Journaled batches reach all three indexes or none of them
//! - **Bulk Loading**: External sort plus bottom-up tree construction
//! - **Index Selection**: Deterministic pattern reordering and index choice
//!
//! ## Quick Start
//!
//! ```rust
//! use ferro_tdb::{TdbConfig, TdbStore, Term};
//! use anyhow::Result;
//!
//! # fn example() -> Result<()> {
//! # let dir = tempfile::tempdir()?;
//! // Create a TDB store
//! let config = TdbConfig::new(dir.path());
//! let mut store = TdbStore::create(config)?;
//!
//! // Create some RDF terms
//! let subject = Term::iri("http://example.org/person1");
//! let predicate = Term::iri("http://example.org/name");
//! let object = Term::literal("Alice");
//!
//! // Insert a triple
//! store.insert_triple(&subject, &predicate, &object)?;
//!
//! // Query triples
//! let results: Vec<_> = store
//!     .find_terms(Some(&subject), None, None)?
//!     .collect::<ferro_tdb::Result<_>>()?;
//!
//! println!("Found {} triples", results.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture Overview
//!
//! ### Storage Layer
//! - **[`storage`]**: Checksummed 4 KiB pages, file I/O and an LRU buffer pool
//! - **[`btree`]**: B+Tree over 24-byte keys with a bottom-up builder
//!
//! ### Dictionary Layer
//! - **[`dictionary`]**: RDF terms, their binary codec and the node table
//!
//! ### Triple Layer
//! - **[`index`]**: Index orders, patterns and single-order triple indexes
//! - **[`triple_store`]**: The three indexes of a dataset, kept consistent
//! - **[`journal`]**: Write-ahead journal for index batches
//! - **[`reorder`]**: Index selection and basic graph pattern ordering
//!
//! ### Ingestion
//! - **[`loader`]**: N-Triples reader, external sort and bulk loader
//!
//! ## On-Disk Layout
//!
//! A store directory holds:
//! - `tdb.info`: store marker and format version
//! - `nodes.dat`, `nodes.idn`: node log and its persisted reverse index
//! - `SPO.idx`, `POS.idx`, `OSP.idx`: triple indexes
//! - `journal.jrnl`: batch journal, empty between writes
//!
//! ## Concurrency
//!
//! Read methods take `&self` and write methods take `&mut self`, so a scan
//! borrowed from a store keeps writers out until it is dropped. Sharing a
//! store between threads is done by the caller, typically with a
//! `RwLock<TdbStore>` per dataset.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] with [`TdbError`]. Common error
//! scenarios include:
//! - I/O errors during persistence operations
//! - Malformed input aborting a bulk load
//! - Index corruption detected by page checksums
//! - Lookups of unknown ids

pub mod btree;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod index;
pub mod journal;
pub mod loader;
pub mod reorder;
pub mod storage;
pub mod triple_store;

// Re-export main types for convenience
pub use btree::BTreeConfig;
pub use config::{BulkLoadConfig, TdbConfig};
pub use dictionary::{NodeId, NodeTable, NodeTableStats, Term};
pub use error::{Result, TdbError};
pub use index::{IndexKey, IndexOrder, IndexScan, PatternShape, Triple, TripleIndex, TriplePattern};
pub use loader::{BulkLoader, LoadStats, NTriplesParser, RawTriple};
pub use reorder::{
    select_index, BgpPattern, PlannedStep, ReorderFixed, ReorderIdentity, ReorderTransformation,
    Slot,
};
pub use triple_store::{ApplyOutcome, Mutation, TripleStore, TripleStoreStats};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Store marker file name
pub const STORE_INFO_FILE: &str = "tdb.info";

/// On-disk format version written by this crate
pub const FORMAT_VERSION: u32 = 1;

/// Contents of the store marker file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    /// On-disk format version
    pub format_version: u32,
    /// Creation time, seconds since the Unix epoch
    pub created_secs: u64,
}

impl StoreInfo {
    fn read(dir: &Path) -> Result<Self> {
        let info: StoreInfo = bincode::deserialize(&fs::read(dir.join(STORE_INFO_FILE))?)?;
        if info.format_version != FORMAT_VERSION {
            return Err(TdbError::InvalidConfiguration(format!(
                "store format version {} is not supported (expected {})",
                info.format_version, FORMAT_VERSION
            )));
        }
        Ok(info)
    }

    fn write(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join(format!("{STORE_INFO_FILE}.tmp"));
        fs::write(&tmp, bincode::serialize(self)?)?;
        fs::File::open(&tmp)?.sync_all()?;
        fs::rename(&tmp, dir.join(STORE_INFO_FILE))?;
        Ok(())
    }
}

/// Store statistics
#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    /// Node table statistics
    pub nodes: NodeTableStats,
    /// Index statistics
    pub triples: TripleStoreStats,
}

/// Main TDB store: one dataset's node table and triple indexes
///
/// `TdbStore` is the entry point for term-level access. It translates terms
/// through the [`NodeTable`] and delegates to the [`TripleStore`].
///
/// # Examples
///
/// ```rust
/// use ferro_tdb::{TdbConfig, TdbStore, Term};
/// use anyhow::Result;
///
/// # fn example() -> Result<()> {
/// # let dir = tempfile::tempdir()?;
/// let mut store = TdbStore::open_or_create(TdbConfig::new(dir.path()))?;
///
/// let alice = Term::iri("http://example.org/alice");
/// let knows = Term::iri("http://xmlns.com/foaf/0.1/knows");
/// let bob = Term::iri("http://example.org/bob");
///
/// store.insert_triple(&alice, &knows, &bob)?;
/// assert!(store.contains_triple(&alice, &knows, &bob)?);
///
/// store.close()?;
/// # Ok(())
/// # }
/// ```
pub struct TdbStore {
    config: TdbConfig,
    pub(crate) nodes: NodeTable,
    pub(crate) triples: TripleStore,
}

impl TdbStore {
    /// Create a new store at `config.location`
    ///
    /// # Arguments
    ///
    /// * `config` - Store configuration; `location` must not hold a store
    ///
    /// # Returns
    ///
    /// The new, empty store, or [`TdbError::StoreExists`]
    pub fn create(config: TdbConfig) -> Result<Self> {
        config.validate()?;
        let dir = config.location.clone();
        if dir.join(STORE_INFO_FILE).exists() {
            return Err(TdbError::StoreExists(dir));
        }
        fs::create_dir_all(&dir)?;

        let nodes = NodeTable::open(&dir, config.term_cache_size, config.sync_writes)?;
        let triples = TripleStore::create(&dir, &config)?;
        let created_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        StoreInfo {
            format_version: FORMAT_VERSION,
            created_secs,
        }
        .write(&dir)?;

        info!("Created TDB store at {:?}", dir);
        Ok(Self {
            config,
            nodes,
            triples,
        })
    }

    /// Open the existing store at `config.location`
    ///
    /// Finishes an interrupted bulk commit and replays an interrupted write
    /// batch before returning.
    pub fn open(config: TdbConfig) -> Result<Self> {
        config.validate()?;
        let dir = config.location.clone();
        if !dir.join(STORE_INFO_FILE).exists() {
            return Err(TdbError::StoreNotFound(dir));
        }
        StoreInfo::read(&dir)?;

        if loader::bulk::roll_forward(&dir)? {
            info!("Completed interrupted bulk load in {:?}", dir);
        }
        let nodes = NodeTable::open(&dir, config.term_cache_size, config.sync_writes)?;
        let triples = TripleStore::open(&dir, &config)?;

        info!(
            "Opened TDB store at {:?}: {} triples, {} terms",
            dir,
            triples.len(),
            nodes.len()
        );
        Ok(Self {
            config,
            nodes,
            triples,
        })
    }

    /// Open the store at `config.location`, creating it if absent
    pub fn open_or_create(config: TdbConfig) -> Result<Self> {
        if config.location.join(STORE_INFO_FILE).exists() {
            Self::open(config)
        } else {
            Self::create(config)
        }
    }

    /// Flush everything to stable storage and close the store
    pub fn close(self) -> Result<()> {
        self.flush()?;
        info!("Closed TDB store at {:?}", self.config.location);
        Ok(())
    }

    /// Flush the node table and indexes to stable storage
    pub fn flush(&self) -> Result<()> {
        self.nodes.flush()?;
        self.triples.flush()
    }

    /// Store configuration
    pub fn config(&self) -> &TdbConfig {
        &self.config
    }

    /// Store directory
    pub fn location(&self) -> &Path {
        &self.config.location
    }

    /// Term dictionary
    pub fn node_table(&self) -> &NodeTable {
        &self.nodes
    }

    /// Triple indexes
    pub fn triple_store(&self) -> &TripleStore {
        &self.triples
    }

    /// Triple indexes, for id-level writes
    ///
    /// Ids written here must come from this store's [`NodeTable`].
    pub fn triple_store_mut(&mut self) -> &mut TripleStore {
        &mut self.triples
    }

    /// Number of triples
    pub fn len(&self) -> u64 {
        self.triples.len()
    }

    /// Check if the store holds no triples
    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Insert a triple
    ///
    /// # Arguments
    ///
    /// * `subject` - IRI or blank node
    /// * `predicate` - IRI
    /// * `object` - any term
    ///
    /// # Returns
    ///
    /// `true` if the triple was not already present
    pub fn insert_triple(&mut self, subject: &Term, predicate: &Term, object: &Term) -> Result<bool> {
        check_positions(subject, predicate)?;
        let triple = Triple::new(
            self.nodes.id_for(subject)?,
            self.nodes.id_for(predicate)?,
            self.nodes.id_for(object)?,
        );
        // new ids must be durable before any index refers to them
        self.nodes.sync_log()?;
        self.triples.insert(triple)
    }

    /// Insert many triples as one atomic batch
    pub fn insert_triples(&mut self, triples: &[RawTriple]) -> Result<ApplyOutcome> {
        let mut terms = Vec::with_capacity(triples.len() * 3);
        for (s, p, o) in triples {
            check_positions(s, p)?;
            terms.extend([s.clone(), p.clone(), o.clone()]);
        }
        let ids = self.nodes.ids_for(&terms)?;
        self.nodes.sync_log()?;

        let batch: Vec<Mutation> = ids
            .chunks_exact(3)
            .map(|spo| Mutation::Insert(Triple::new(spo[0], spo[1], spo[2])))
            .collect();
        self.triples.apply(&batch)
    }

    /// Delete a triple
    ///
    /// Returns `false` if it was absent. Term ids are never reclaimed.
    pub fn delete_triple(&mut self, subject: &Term, predicate: &Term, object: &Term) -> Result<bool> {
        match self.lookup_triple(subject, predicate, object)? {
            Some(triple) => self.triples.delete(triple),
            None => Ok(false),
        }
    }

    /// Check whether the store holds a triple
    pub fn contains_triple(&self, subject: &Term, predicate: &Term, object: &Term) -> Result<bool> {
        match self.lookup_triple(subject, predicate, object)? {
            Some(triple) => self.triples.contains(triple),
            None => Ok(false),
        }
    }

    fn lookup_triple(&self, s: &Term, p: &Term, o: &Term) -> Result<Option<Triple>> {
        let (Some(s), Some(p), Some(o)) = (
            self.nodes.lookup(s)?,
            self.nodes.lookup(p)?,
            self.nodes.lookup(o)?,
        ) else {
            return Ok(None);
        };
        Ok(Some(Triple::new(s, p, o)))
    }

    /// Lazy id-level scan of the triples matching `pattern`
    pub fn find_ids(&self, pattern: &TriplePattern) -> Result<IndexScan<'_>> {
        self.triples.find(pattern)
    }

    /// Lazy term-level scan; `None` positions match anything
    ///
    /// A bound term that the store has never seen matches nothing.
    pub fn find_terms(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
    ) -> Result<TermScan<'_>> {
        let mut ids = [None; 3];
        for (slot, term) in [subject, predicate, object].into_iter().enumerate() {
            if let Some(term) = term {
                match self.nodes.lookup(term)? {
                    Some(id) => ids[slot] = Some(id),
                    None => {
                        return Ok(TermScan {
                            nodes: &self.nodes,
                            inner: None,
                        })
                    }
                }
            }
        }
        let pattern = TriplePattern::new(ids[0], ids[1], ids[2]);
        Ok(TermScan {
            nodes: &self.nodes,
            inner: Some(self.triples.find(&pattern)?),
        })
    }

    /// Bulk load a stream of term triples
    ///
    /// See [`BulkLoader::load`].
    pub fn bulk_load<I>(&mut self, triples: I) -> Result<LoadStats>
    where
        I: IntoIterator<Item = Result<RawTriple>>,
    {
        BulkLoader::new(self).load(triples)
    }

    /// Bulk load N-Triples files as one all-or-nothing load
    pub fn bulk_load_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<LoadStats> {
        BulkLoader::new(self).load_files(paths)
    }

    /// Check every index's structure and that all three agree
    pub fn verify(&self) -> Result<Vec<btree::BTreeStats>> {
        self.triples.verify()
    }

    /// Store statistics
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            nodes: self.nodes.stats(),
            triples: self.triples.stats(),
        }
    }
}

impl std::fmt::Debug for TdbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TdbStore")
            .field("location", &self.config.location)
            .field("nodes", &self.nodes)
            .field("triples", &self.triples)
            .finish()
    }
}

/// Reject a literal subject or a non-IRI predicate
pub(crate) fn check_positions(subject: &Term, predicate: &Term) -> Result<()> {
    if subject.is_literal() {
        return Err(TdbError::InvalidInput(format!(
            "literal {subject} cannot be a subject"
        )));
    }
    if !predicate.is_iri() {
        return Err(TdbError::InvalidInput(format!(
            "predicate {predicate} must be an IRI"
        )));
    }
    Ok(())
}

/// Lazy scan yielding matching triples as terms
pub struct TermScan<'a> {
    nodes: &'a NodeTable,
    inner: Option<IndexScan<'a>>,
}

impl Iterator for TermScan<'_> {
    type Item = Result<RawTriple>;

    fn next(&mut self) -> Option<Self::Item> {
        let scan = self.inner.as_mut()?;
        let item = scan.next()?.and_then(|t| {
            Ok((
                self.nodes.term_for(t.subject)?,
                self.nodes.term_for(t.predicate)?,
                self.nodes.term_for(t.object)?,
            ))
        });
        if item.is_err() {
            self.inner = None;
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn iri(s: &str) -> Term {
        Term::iri(format!("http://example.org/{s}"))
    }

    fn config(dir: &Path) -> TdbConfig {
        TdbConfig::new(dir).with_btree(BTreeConfig::new(4, 3))
    }

    #[test]
    fn test_create_open_lifecycle() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        {
            let mut store = TdbStore::create(config.clone()).unwrap();
            store
                .insert_triple(&iri("a"), &iri("b"), &Term::literal("c"))
                .unwrap();
            store.close().unwrap();
        }
        assert!(matches!(
            TdbStore::create(config.clone()),
            Err(TdbError::StoreExists(_))
        ));

        let store = TdbStore::open_or_create(config).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store
            .contains_triple(&iri("a"), &iri("b"), &Term::literal("c"))
            .unwrap());
    }

    #[test]
    fn test_open_missing() {
        let dir = TempDir::new().unwrap();
        let err = TdbStore::open(config(&dir.path().join("nope"))).unwrap_err();
        assert!(matches!(err, TdbError::StoreNotFound(_)));
    }

    #[test]
    fn test_rejects_bad_positions() {
        let dir = TempDir::new().unwrap();
        let mut store = TdbStore::create(config(dir.path())).unwrap();
        let lit = Term::literal("x");
        assert!(matches!(
            store.insert_triple(&lit, &iri("p"), &iri("o")),
            Err(TdbError::InvalidInput(_))
        ));
        assert!(matches!(
            store.insert_triple(&iri("s"), &Term::blank_node("b"), &iri("o")),
            Err(TdbError::InvalidInput(_))
        ));
        assert!(store.node_table().is_empty());
    }

    #[test]
    fn test_find_terms() {
        let dir = TempDir::new().unwrap();
        let mut store = TdbStore::create(config(dir.path())).unwrap();
        let outcome = store
            .insert_triples(&[
                (iri("s1"), iri("p1"), iri("o1")),
                (iri("s1"), iri("p1"), iri("o2")),
                (iri("s2"), iri("p1"), iri("o1")),
                (iri("s1"), iri("p1"), iri("o1")),
            ])
            .unwrap();
        assert_eq!(outcome.inserted, 3);

        let found: Vec<RawTriple> = store
            .find_terms(Some(&iri("s1")), Some(&iri("p1")), None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            found,
            vec![
                (iri("s1"), iri("p1"), iri("o1")),
                (iri("s1"), iri("p1"), iri("o2")),
            ]
        );

        let found = store
            .find_terms(None, None, Some(&iri("o1")))
            .unwrap()
            .count();
        assert_eq!(found, 2);

        assert_eq!(
            store
                .find_terms(Some(&iri("unknown")), None, None)
                .unwrap()
                .count(),
            0
        );
    }

    #[test]
    fn test_delete_keeps_ids() {
        let dir = TempDir::new().unwrap();
        let mut store = TdbStore::create(config(dir.path())).unwrap();
        store.insert_triple(&iri("a"), &iri("b"), &iri("c")).unwrap();
        let terms = store.node_table().len();

        assert!(store.delete_triple(&iri("a"), &iri("b"), &iri("c")).unwrap());
        assert!(!store.delete_triple(&iri("a"), &iri("b"), &iri("c")).unwrap());
        assert!(!store.delete_triple(&iri("x"), &iri("b"), &iri("c")).unwrap());
        assert!(store.is_empty());
        assert_eq!(store.node_table().len(), terms);
        assert!(store.node_table().lookup(&iri("x")).unwrap().is_none());
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let mut store = TdbStore::create(config(dir.path())).unwrap();
        store.insert_triple(&iri("a"), &iri("b"), &iri("c")).unwrap();
        let stats = store.stats();
        assert_eq!(stats.nodes.terms, 3);
        assert_eq!(stats.triples.triples, 1);
    }
}

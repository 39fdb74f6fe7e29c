//! Triple store over the SPO, POS and OSP indexes
//!
//! Every write goes to all three indexes as one batch:
//! 1. the batch is appended to the journal
//! 2. each index applies it in turn
//! 3. indexes are flushed and the journal is cleared
//!
//! If an index fails part-way, the changes already made are undone in
//! reverse. If undoing fails as well, or the failure was an I/O or
//! corruption error that may have left an index half written, the store is
//! poisoned: it keeps serving reads but refuses writes until it is reopened,
//! which replays the journal.

use crate::btree::{BTreeConfig, BTreeStats};
use crate::config::TdbConfig;
use crate::error::{Result, TdbError};
use crate::index::{IndexOrder, IndexScan, Triple, TripleIndex, TriplePattern};
use crate::journal::Journal;
use crate::reorder::{ReorderFixed, ReorderTransformation};
use crate::storage::BufferPoolStats;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// One write against the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mutation {
    /// Add a triple
    Insert(Triple),
    /// Remove a triple
    Delete(Triple),
}

impl Mutation {
    /// Triple this mutation touches
    pub fn triple(&self) -> Triple {
        match self {
            Mutation::Insert(t) | Mutation::Delete(t) => *t,
        }
    }

    fn apply_to(&self, index: &mut TripleIndex) -> Result<bool> {
        match self {
            Mutation::Insert(t) => index.insert(*t),
            Mutation::Delete(t) => index.delete(*t),
        }
    }

    fn undo_on(&self, index: &mut TripleIndex) -> Result<bool> {
        match self {
            Mutation::Insert(t) => index.delete(*t),
            Mutation::Delete(t) => index.insert(*t),
        }
    }
}

/// Effect of an applied batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Triples that were not present before
    pub inserted: u64,
    /// Triples that were present before
    pub deleted: u64,
}

/// Per-index statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexStats {
    /// Key order
    pub order: IndexOrder,
    /// Triples held
    pub triples: u64,
    /// Buffer pool counters
    pub buffer: BufferPoolStats,
}

/// Store statistics
#[derive(Debug, Clone, PartialEq)]
pub struct TripleStoreStats {
    /// Triples in the store
    pub triples: u64,
    /// Statistics per index, in [`IndexOrder::ALL`] order
    pub indexes: Vec<IndexStats>,
    /// Whether writes are refused after a failed compensation
    pub poisoned: bool,
}

/// The three permutation indexes of one dataset
pub struct TripleStore {
    dir: PathBuf,
    config: TdbConfig,
    indexes: [TripleIndex; 3],
    journal: Journal,
    reorder: Box<dyn ReorderTransformation>,
    poisoned: Option<String>,
}

impl TripleStore {
    /// Create empty indexes in `dir`
    pub fn create<P: AsRef<Path>>(dir: P, config: &TdbConfig) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let indexes = [
            TripleIndex::create(dir, IndexOrder::Spo, config)?,
            TripleIndex::create(dir, IndexOrder::Pos, config)?,
            TripleIndex::create(dir, IndexOrder::Osp, config)?,
        ];
        let journal = Journal::open(dir, config.sync_writes)?;
        info!("Created triple store at {:?}", dir);

        Ok(Self {
            dir: dir.to_path_buf(),
            config: config.clone(),
            indexes,
            journal,
            reorder: Box::new(ReorderFixed),
            poisoned: None,
        })
    }

    /// Open the indexes in `dir`, replaying an interrupted batch
    pub fn open<P: AsRef<Path>>(dir: P, config: &TdbConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let mut store = Self {
            dir: dir.to_path_buf(),
            config: config.clone(),
            indexes: Self::open_indexes(dir, config)?,
            journal: Journal::open(dir, config.sync_writes)?,
            reorder: Box::new(ReorderFixed),
            poisoned: None,
        };
        store.recover()?;
        store.check_lengths()?;
        debug!("Opened triple store at {:?} ({} triples)", dir, store.len());
        Ok(store)
    }

    fn open_indexes(dir: &Path, config: &TdbConfig) -> Result<[TripleIndex; 3]> {
        Ok([
            TripleIndex::open(dir, IndexOrder::Spo, config)?,
            TripleIndex::open(dir, IndexOrder::Pos, config)?,
            TripleIndex::open(dir, IndexOrder::Osp, config)?,
        ])
    }

    fn recover(&mut self) -> Result<()> {
        if !self.journal.has_pending() {
            return Ok(());
        }
        let batches = self.journal.replay()?;
        let mutations: usize = batches.iter().map(Vec::len).sum();
        if mutations > 0 {
            info!(
                "Replaying {} journal batch(es), {} mutations, in {:?}",
                batches.len(),
                mutations,
                self.dir
            );
        }
        for batch in &batches {
            for index in &mut self.indexes {
                for mutation in batch {
                    mutation.apply_to(index)?;
                }
            }
        }
        for index in &self.indexes {
            index.flush()?;
        }
        self.journal.clear()
    }

    fn check_lengths(&self) -> Result<()> {
        let primary = self.indexes[0].len();
        for index in &self.indexes[1..] {
            if index.len() != primary {
                return Err(TdbError::Inconsistent(format!(
                    "{} holds {} triples but SPO holds {}",
                    index.order(),
                    index.len(),
                    primary
                )));
            }
        }
        Ok(())
    }

    /// Replace the reorder transformation used by [`find`](Self::find)
    pub fn with_reorder(mut self, reorder: Box<dyn ReorderTransformation>) -> Self {
        self.reorder = reorder;
        self
    }

    /// Reorder transformation in use
    pub fn reorder(&self) -> &dyn ReorderTransformation {
        self.reorder.as_ref()
    }

    /// Store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Node capacities of the existing index files
    pub fn btree_config(&self) -> BTreeConfig {
        self.indexes[0].btree_config()
    }

    /// Number of triples
    pub fn len(&self) -> u64 {
        self.indexes[0].len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether writes are being refused
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Index kept in `order`
    pub fn index(&self, order: IndexOrder) -> &TripleIndex {
        &self.indexes[Self::slot(order)]
    }

    fn slot(order: IndexOrder) -> usize {
        match order {
            IndexOrder::Spo => 0,
            IndexOrder::Pos => 1,
            IndexOrder::Osp => 2,
        }
    }

    /// Insert a triple into every index; returns false if it was present
    pub fn insert(&mut self, triple: Triple) -> Result<bool> {
        Ok(self.apply(&[Mutation::Insert(triple)])?.inserted == 1)
    }

    /// Delete a triple from every index; returns false if it was absent
    pub fn delete(&mut self, triple: Triple) -> Result<bool> {
        Ok(self.apply(&[Mutation::Delete(triple)])?.deleted == 1)
    }

    /// Apply a batch of mutations to every index atomically
    ///
    /// Mutations take effect in order, so inserting and then deleting the
    /// same triple in one batch leaves it absent. Either all indexes reflect
    /// the whole batch or, on error, none of it.
    ///
    /// A recoverable error is undone in reverse. An I/O or corruption error
    /// can leave the failing index partly modified, so the store is poisoned
    /// instead and the journaled batch is replayed on the next open.
    pub fn apply(&mut self, batch: &[Mutation]) -> Result<ApplyOutcome> {
        if let Some(reason) = &self.poisoned {
            return Err(TdbError::Inconsistent(reason.clone()));
        }
        if let Some(bad) = batch.iter().find(|m| !m.triple().is_valid()) {
            return Err(TdbError::InvalidInput(format!(
                "triple {} has a NULL position",
                bad.triple()
            )));
        }
        if batch.is_empty() {
            return Ok(ApplyOutcome::default());
        }

        self.journal.append_batch(batch)?;

        let mut outcome = ApplyOutcome::default();
        // (index slot, mutation position) for every change actually made
        let mut applied: Vec<(usize, usize)> = Vec::new();
        for slot in 0..self.indexes.len() {
            for (pos, mutation) in batch.iter().enumerate() {
                match mutation.apply_to(&mut self.indexes[slot]) {
                    Ok(changed) => {
                        if changed {
                            applied.push((slot, pos));
                        }
                        if slot == 0 && changed {
                            match mutation {
                                Mutation::Insert(_) => outcome.inserted += 1,
                                Mutation::Delete(_) => outcome.deleted += 1,
                            }
                        }
                    }
                    Err(e) if e.is_fatal() || matches!(e, TdbError::Io(_)) => {
                        // the failing index may be half written; the journal keeps
                        // the batch so the next open replays it
                        let reason = format!(
                            "{:?} on {} failed mid-write: {}",
                            mutation,
                            self.indexes[slot].order(),
                            e
                        );
                        error!("Triple store {:?} poisoned: {}", self.dir, reason);
                        self.poisoned = Some(reason);
                        return Err(e);
                    }
                    Err(e) => {
                        self.compensate(batch, &applied, &e)?;
                        return Err(e);
                    }
                }
            }
        }

        if self.config.sync_writes {
            for index in &self.indexes {
                index.flush()?;
            }
        }
        self.journal.clear()?;
        Ok(outcome)
    }

    /// Undo `applied` in reverse; poisons the store if that fails
    fn compensate(
        &mut self,
        batch: &[Mutation],
        applied: &[(usize, usize)],
        cause: &TdbError,
    ) -> Result<()> {
        warn!(
            "Rolling back {} index change(s) after error: {}",
            applied.len(),
            cause
        );
        for &(slot, pos) in applied.iter().rev() {
            if let Err(e) = batch[pos].undo_on(&mut self.indexes[slot]) {
                let reason = format!(
                    "rollback of {:?} on {} failed ({}) after: {}",
                    batch[pos],
                    self.indexes[slot].order(),
                    e,
                    cause
                );
                error!("Triple store {:?} poisoned: {}", self.dir, reason);
                self.poisoned = Some(reason.clone());
                return Err(TdbError::Inconsistent(reason));
            }
        }
        self.journal.clear()
    }

    /// Check whether the store holds `triple`
    pub fn contains(&self, triple: Triple) -> Result<bool> {
        self.indexes[0].contains(triple)
    }

    /// Lazy scan of the triples matching `pattern`
    ///
    /// The index is picked by the store's [`ReorderTransformation`]; results
    /// come out in that index's key order.
    pub fn find(&self, pattern: &TriplePattern) -> Result<IndexScan<'_>> {
        let order = self.reorder.choose_index(pattern.shape());
        self.find_with(order, pattern)
    }

    /// Lazy scan of the triples matching `pattern` in a specific index
    pub fn find_with(&self, order: IndexOrder, pattern: &TriplePattern) -> Result<IndexScan<'_>> {
        self.index(order).scan(pattern)
    }

    /// Store statistics
    pub fn stats(&self) -> TripleStoreStats {
        TripleStoreStats {
            triples: self.len(),
            indexes: self
                .indexes
                .iter()
                .map(|index| IndexStats {
                    order: index.order(),
                    triples: index.len(),
                    buffer: index.buffer_stats(),
                })
                .collect(),
            poisoned: self.is_poisoned(),
        }
    }

    /// Flush every index to stable storage
    pub fn flush(&self) -> Result<()> {
        for index in &self.indexes {
            index.flush()?;
        }
        Ok(())
    }

    /// Structural check of every index plus cross-index agreement
    ///
    /// Reads every triple once per index; intended for tests and offline
    /// checks, not for the serving path.
    pub fn verify(&self) -> Result<Vec<BTreeStats>> {
        let stats = self
            .indexes
            .iter()
            .map(TripleIndex::verify)
            .collect::<Result<Vec<_>>>()?;
        self.check_lengths()?;

        for triple in self.indexes[0].scan(&TriplePattern::any())? {
            let triple = triple?;
            for index in &self.indexes[1..] {
                if !index.contains(triple)? {
                    return Err(TdbError::Inconsistent(format!(
                        "{} is missing {}",
                        index.order(),
                        triple
                    )));
                }
            }
        }
        Ok(stats)
    }

    /// Reopen every index file after they were replaced on disk
    pub(crate) fn reload_indexes(&mut self) -> Result<()> {
        self.indexes = Self::open_indexes(&self.dir, &self.config)?;
        self.check_lengths()
    }
}

impl std::fmt::Debug for TripleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TripleStore")
            .field("dir", &self.dir)
            .field("triples", &self.len())
            .field("reorder", &self.reorder.name())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

//! Sort-based bulk loader
//!
//! Instead of inserting triples one by one, the loader:
//! 1. streams the input once, translating terms to ids in batches
//! 2. spills sorted runs for every index order when the buffer fills
//! 3. merges the runs (and any triples already in the store) into new index
//!    files built bottom-up, one per order
//! 4. swaps the new files in
//!
//! The swap is guarded by a `bulk.pending` marker: once it exists the new
//! files are complete and opening the store finishes the renames. Any
//! failure before that point leaves the store as it was.

use super::external_sort::{KWayMerge, KeySource, RunSet};
use super::ntriples::{read_file, RawTriple};
use crate::btree::{BTreeConfig, BuildStats};
use crate::config::BulkLoadConfig;
use crate::dictionary::{NodeTable, Term};
use crate::error::{Result, TdbError};
use crate::index::{self, IndexOrder, Triple};
use crate::triple_store::TripleStore;
use crate::TdbStore;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Marker written just before new index files are renamed into place
pub const BULK_PENDING_FILE: &str = "bulk.pending";

const TMP_SUFFIX: &str = ".tmp";

/// Bulk load statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Triples read from input, including repeats
    pub triples_read: u64,
    /// Distinct triples in the input
    pub distinct_triples: u64,
    /// Triples that were not already in the store
    pub triples_added: u64,
    /// Terms new to the node table
    pub terms_added: u64,
    /// Triples in the store after the load
    pub total_triples: u64,
    /// Wall-clock time of the load
    pub elapsed: Duration,
}

impl LoadStats {
    /// Input triples per second
    pub fn triples_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.triples_read as f64 / secs
        } else {
            0.0
        }
    }
}

/// Bulk loader over one store
///
/// Holds the store exclusively for the duration of the load.
pub struct BulkLoader<'a> {
    store: &'a mut TdbStore,
    config: BulkLoadConfig,
}

impl<'a> BulkLoader<'a> {
    /// Loader using the store's bulk settings
    pub fn new(store: &'a mut TdbStore) -> Self {
        let config = store.config().bulk.clone();
        Self { store, config }
    }

    /// Override the bulk settings for this load
    pub fn with_config(mut self, config: BulkLoadConfig) -> Self {
        self.config = config;
        self
    }

    /// Load N-Triples files, in order, as one all-or-nothing load
    pub fn load_files<P: AsRef<Path>>(self, paths: &[P]) -> Result<LoadStats> {
        let readers = paths.iter().map(read_file).collect::<Result<Vec<_>>>()?;
        self.load(readers.into_iter().flatten())
    }

    /// Load a stream of term triples
    ///
    /// Fails fast: the first input error aborts the load, removes every
    /// temporary file and rolls the node table back, leaving the store
    /// unchanged.
    pub fn load<I>(self, triples: I) -> Result<LoadStats>
    where
        I: IntoIterator<Item = Result<RawTriple>>,
    {
        self.config.validate()?;
        let start = Instant::now();
        let dir = self.store.location().to_path_buf();
        let mark = self.store.nodes.mark();
        let terms_before = self.store.nodes.len();
        let triples_before = self.store.triples.len();
        info!("Bulk load into {:?} started", dir);

        let work = tempfile::Builder::new().prefix("bulk-").tempdir_in(&dir)?;
        let staged = stage(
            &self.store.nodes,
            &self.store.triples,
            &self.config,
            work.path(),
            triples,
        );

        let staged = match staged {
            Ok(staged) => staged,
            Err(e) => {
                warn!("Bulk load aborted: {}", e);
                remove_tmp_files(&dir);
                if let Err(rollback) = self.store.nodes.rollback_to(mark) {
                    warn!("Node table rollback failed: {}", rollback);
                }
                return Err(e);
            }
        };
        drop(work);

        self.store.nodes.flush()?;
        commit(&dir)?;
        self.store.triples.reload_indexes()?;

        let stats = LoadStats {
            triples_read: staged.triples_read,
            distinct_triples: staged.distinct_triples,
            triples_added: self.store.triples.len() - triples_before,
            terms_added: self.store.nodes.len() - terms_before,
            total_triples: self.store.triples.len(),
            elapsed: start.elapsed(),
        };
        info!(
            "Bulk load finished: {} triples read, {} added, {} new terms in {:.2?} ({:.0} triples/s)",
            stats.triples_read,
            stats.triples_added,
            stats.terms_added,
            stats.elapsed,
            stats.triples_per_second()
        );
        Ok(stats)
    }
}

/// Counters from the read and build phases
struct Staged {
    triples_read: u64,
    distinct_triples: u64,
}

/// Read input, spill runs and build every `<ORDER>.idx.tmp`
fn stage<I>(
    nodes: &NodeTable,
    store: &TripleStore,
    config: &BulkLoadConfig,
    work_dir: &Path,
    triples: I,
) -> Result<Staged>
where
    I: IntoIterator<Item = Result<RawTriple>>,
{
    let mut runs: Vec<RunSet> = IndexOrder::ALL
        .into_iter()
        .map(|order| RunSet::new(order, work_dir))
        .collect();
    let mut terms: Vec<Term> = Vec::with_capacity(config.batch_size * 3);
    let mut buffer: Vec<Triple> = Vec::with_capacity(config.sort_buffer_triples.min(1 << 20));
    let mut triples_read = 0u64;

    for item in triples {
        let (s, p, o) = item?;
        triples_read += 1;
        if let Err(e) = crate::check_positions(&s, &p) {
            return Err(TdbError::LoadAborted {
                source_name: "<stream>".to_string(),
                line: None,
                reason: format!("triple {}: {}", triples_read, e),
            });
        }
        terms.extend([s, p, o]);

        if terms.len() >= config.batch_size * 3 {
            translate(nodes, &mut terms, &mut buffer)?;
        }
        if buffer.len() >= config.sort_buffer_triples {
            spill(&mut runs, &mut buffer, config.parallel)?;
        }
    }
    translate(nodes, &mut terms, &mut buffer)?;
    if !buffer.is_empty() {
        spill(&mut runs, &mut buffer, config.parallel)?;
    }
    debug!(
        "Read {} triples into {} run(s) per order",
        triples_read,
        runs[0].run_count()
    );

    let dir = store.dir();
    let btree = store.btree_config();
    let build = |runs: &RunSet| build_order(store, runs, dir, btree);
    let built: Vec<(BuildStats, u64)> = if config.parallel {
        runs.par_iter().map(build).collect::<Result<_>>()?
    } else {
        runs.iter().map(build).collect::<Result<_>>()?
    };

    Ok(Staged {
        triples_read,
        distinct_triples: built[0].1,
    })
}

/// Translate buffered terms to ids and queue the resulting triples
fn translate(nodes: &NodeTable, terms: &mut Vec<Term>, buffer: &mut Vec<Triple>) -> Result<()> {
    if terms.is_empty() {
        return Ok(());
    }
    let ids = nodes.ids_for(terms).map_err(|e| match e {
        TdbError::InvalidInput(reason) => TdbError::LoadAborted {
            source_name: "<stream>".to_string(),
            line: None,
            reason,
        },
        other => other,
    })?;
    buffer.extend(
        ids.chunks_exact(3)
            .map(|spo| Triple::new(spo[0], spo[1], spo[2])),
    );
    terms.clear();
    Ok(())
}

fn spill(runs: &mut [RunSet], buffer: &mut Vec<Triple>, parallel: bool) -> Result<()> {
    if parallel {
        runs.par_iter_mut()
            .try_for_each(|run| run.spill(buffer, true))?;
    } else {
        for run in runs.iter_mut() {
            run.spill(buffer, false)?;
        }
    }
    buffer.clear();
    Ok(())
}

/// Merge one order's runs with the current index into `<ORDER>.idx.tmp`
///
/// Returns the build statistics and the number of distinct input keys.
fn build_order(
    store: &TripleStore,
    runs: &RunSet,
    dir: &Path,
    btree: BTreeConfig,
) -> Result<(BuildStats, u64)> {
    let order = runs.order();
    let tmp = tmp_path(dir, order);
    if tmp.exists() {
        fs::remove_file(&tmp)?;
    }

    let mut input = KWayMerge::new(runs.readers()?);
    let stats = if store.is_empty() {
        index::build_from_sorted(&tmp, order, btree, input.by_ref())?
    } else {
        let existing: KeySource<'_> = Box::new(store.index(order).keys()?);
        let sources: Vec<KeySource<'_>> = vec![Box::new(input.by_ref()), existing];
        index::build_from_sorted(&tmp, order, btree, KWayMerge::new(sources))?
    };
    Ok((stats, input.emitted()))
}

fn tmp_path(dir: &Path, order: IndexOrder) -> PathBuf {
    dir.join(format!("{}{}", order.file_name(), TMP_SUFFIX))
}

fn remove_tmp_files(dir: &Path) {
    for order in IndexOrder::ALL {
        let tmp = tmp_path(dir, order);
        if tmp.exists() {
            if let Err(e) = fs::remove_file(&tmp) {
                warn!("Failed to remove {:?}: {}", tmp, e);
            }
        }
    }
}

/// Swap the built `.tmp` files in under the pending marker
fn commit(dir: &Path) -> Result<()> {
    let marker = dir.join(BULK_PENDING_FILE);
    let file = fs::File::create(&marker)?;
    file.sync_all()?;
    drop(file);
    roll_forward(dir)?;
    Ok(())
}

/// Finish or discard an interrupted bulk commit
///
/// With the marker present every `.tmp` file is complete and is renamed
/// over its index. Without it the load never reached the commit point and
/// stray `.tmp` files are deleted. Returns whether a commit was finished.
pub(crate) fn roll_forward(dir: &Path) -> Result<bool> {
    let marker = dir.join(BULK_PENDING_FILE);
    if !marker.exists() {
        remove_tmp_files(dir);
        return Ok(false);
    }

    for order in IndexOrder::ALL {
        let tmp = tmp_path(dir, order);
        if tmp.exists() {
            fs::rename(&tmp, dir.join(order.file_name()))?;
        } else if !dir.join(order.file_name()).exists() {
            return Err(TdbError::Inconsistent(format!(
                "bulk commit in {:?} lost {}",
                dir,
                order.file_name()
            )));
        }
    }
    sync_dir(dir)?;
    fs::remove_file(&marker)?;
    debug!("Bulk commit in {:?} completed", dir);
    Ok(true)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

//! External sort of index keys
//!
//! The loader accumulates id-triples in memory. When the buffer is full, each
//! order gets its own sorted, deduplicated run file of raw 24-byte keys.
//! At the end the runs of one order are k-way merged into a single ascending
//! stream, which may be merged again with the keys already in the index.

use crate::error::Result;
use crate::index::{IndexKey, IndexOrder, Triple, KEY_SIZE};
use rayon::slice::ParallelSliceMut;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Boxed ascending key stream fed into a merge
pub type KeySource<'a> = Box<dyn Iterator<Item = Result<IndexKey>> + Send + 'a>;

/// Sorted run files for one index order
#[derive(Debug)]
pub struct RunSet {
    order: IndexOrder,
    dir: PathBuf,
    runs: Vec<PathBuf>,
    keys_written: u64,
}

impl RunSet {
    /// Empty run set writing into `dir`
    pub fn new<P: AsRef<Path>>(order: IndexOrder, dir: P) -> Self {
        Self {
            order,
            dir: dir.as_ref().to_path_buf(),
            runs: Vec::new(),
            keys_written: 0,
        }
    }

    /// Key order of the runs
    pub fn order(&self) -> IndexOrder {
        self.order
    }

    /// Number of runs written
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Keys written across all runs, after per-run deduplication
    pub fn keys_written(&self) -> u64 {
        self.keys_written
    }

    /// Sort `triples` into this order and write them as a new run
    pub fn spill(&mut self, triples: &[Triple], parallel: bool) -> Result<()> {
        let mut keys: Vec<IndexKey> = triples.iter().map(|t| self.order.to_key(t)).collect();
        if parallel {
            keys.par_sort_unstable();
        } else {
            keys.sort_unstable();
        }
        keys.dedup();

        let path = self
            .dir
            .join(format!("{}-{:05}.run", self.order.name(), self.runs.len()));
        write_run(&path, &keys)?;
        debug!(
            "Wrote {} run {:?} with {} keys",
            self.order,
            path,
            keys.len()
        );
        self.keys_written += keys.len() as u64;
        self.runs.push(path);
        Ok(())
    }

    /// Readers over every run, ready to merge
    pub fn readers(&self) -> Result<Vec<KeySource<'static>>> {
        self.runs
            .iter()
            .map(|path| Ok(Box::new(RunReader::open(path)?) as KeySource<'static>))
            .collect()
    }
}

/// Write `keys` as a run file
pub fn write_run(path: &Path, keys: &[IndexKey]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for key in keys {
        out.write_all(&key.to_bytes())?;
    }
    out.flush()?;
    Ok(())
}

/// Sequential reader over a run file
pub struct RunReader {
    reader: BufReader<File>,
    done: bool,
}

impl RunReader {
    /// Open a run file
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            reader: BufReader::with_capacity(64 * 1024, File::open(path)?),
            done: false,
        })
    }
}

impl Iterator for RunReader {
    type Item = Result<IndexKey>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = [0u8; KEY_SIZE];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => Some(Ok(IndexKey::from_bytes(&buf))),
            Err(e) => {
                self.done = true;
                if e.kind() == ErrorKind::UnexpectedEof {
                    None
                } else {
                    Some(Err(e.into()))
                }
            }
        }
    }
}

/// K-way merge of ascending key streams, collapsing duplicates
///
/// An error from any source is yielded once and ends the merge.
pub struct KWayMerge<'a> {
    sources: Vec<KeySource<'a>>,
    heap: BinaryHeap<Reverse<(IndexKey, usize)>>,
    last: Option<IndexKey>,
    emitted: u64,
    pending_error: Option<crate::error::TdbError>,
    done: bool,
}

impl<'a> KWayMerge<'a> {
    /// Merge `sources`; each must be ascending on its own
    pub fn new(mut sources: Vec<KeySource<'a>>) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        let mut pending_error = None;
        for (i, source) in sources.iter_mut().enumerate() {
            match source.next() {
                Some(Ok(key)) => heap.push(Reverse((key, i))),
                Some(Err(e)) => {
                    pending_error = Some(e);
                    break;
                }
                None => {}
            }
        }
        Self {
            sources,
            heap,
            last: None,
            emitted: 0,
            pending_error,
            done: false,
        }
    }

    /// Distinct keys yielded so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

impl Iterator for KWayMerge<'_> {
    type Item = Result<IndexKey>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(e) = self.pending_error.take() {
                self.done = true;
                return Some(Err(e));
            }
            let Some(Reverse((key, i))) = self.heap.pop() else {
                self.done = true;
                return None;
            };
            match self.sources[i].next() {
                Some(Ok(next)) => self.heap.push(Reverse((next, i))),
                // reported on the next call, after `key`
                Some(Err(e)) => self.pending_error = Some(e),
                None => {}
            }
            if self.last == Some(key) {
                continue;
            }
            self.last = Some(key);
            self.emitted += 1;
            return Some(Ok(key));
        }
    }
}

impl std::iter::FusedIterator for KWayMerge<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TdbError;
    use tempfile::TempDir;

    fn key(n: u64) -> IndexKey {
        IndexKey([n, 0, 0])
    }

    fn source(keys: Vec<u64>) -> KeySource<'static> {
        Box::new(keys.into_iter().map(|n| Ok(key(n))))
    }

    #[test]
    fn test_merge_dedups_across_sources() {
        let merge = KWayMerge::new(vec![
            source(vec![1, 4, 7, 9]),
            source(vec![]),
            source(vec![2, 4, 8]),
            source(vec![1, 9, 10]),
        ]);
        let keys: Vec<IndexKey> = merge.collect::<Result<_>>().unwrap();
        assert_eq!(keys, [1, 2, 4, 7, 8, 9, 10].map(key).to_vec());
    }

    #[test]
    fn test_merge_counts_emitted() {
        let mut merge = KWayMerge::new(vec![source(vec![1, 2]), source(vec![2, 3])]);
        assert_eq!(merge.by_ref().count(), 3);
        assert_eq!(merge.emitted(), 3);
        assert!(KWayMerge::new(Vec::new()).next().is_none());
    }

    #[test]
    fn test_merge_stops_on_error() {
        let failing: KeySource<'static> = Box::new(
            vec![Ok(key(1)), Err(TdbError::InvalidInput("boom".into())), Ok(key(5))].into_iter(),
        );
        let mut merge = KWayMerge::new(vec![failing, source(vec![2, 3])]);
        assert_eq!(merge.next().unwrap().unwrap(), key(1));
        assert!(merge.next().unwrap().is_err());
        assert!(merge.next().is_none());
    }

    #[test]
    fn test_spill_and_read_runs() {
        let dir = TempDir::new().unwrap();
        let mut runs = RunSet::new(IndexOrder::Pos, dir.path());
        let first: Vec<Triple> = vec![(3, 1, 2).into(), (1, 1, 1).into(), (3, 1, 2).into()];
        let second: Vec<Triple> = vec![(2, 1, 1).into(), (1, 9, 9).into()];
        runs.spill(&first, false).unwrap();
        runs.spill(&second, true).unwrap();
        assert_eq!(runs.run_count(), 2);
        assert_eq!(runs.keys_written(), 4);

        let keys: Vec<IndexKey> = KWayMerge::new(runs.readers().unwrap())
            .collect::<Result<_>>()
            .unwrap();
        let triples: Vec<Triple> = keys.iter().map(|k| IndexOrder::Pos.to_triple(k)).collect();
        assert_eq!(
            triples,
            vec![
                Triple::from((1, 1, 1)),
                Triple::from((2, 1, 1)),
                Triple::from((3, 1, 2)),
                Triple::from((1, 9, 9)),
            ]
        );
    }
}

//! NodeTable for Term ↔ NodeId mapping
//!
//! Terms are stored once, in an append-only log (`nodes.dat`). Every record is
//! `u32` LE length, the encoded term, then the `u64` LE id. Ids are dense: the
//! n-th record carries id n.
//!
//! Lookups go through two in-memory structures rebuilt on open:
//! - a hash map from the xxh3 hash of the encoded term to candidate ids, and
//! - an offset table mapping each id to the start of its log record.
//!
//! `nodes.idn` persists both so that reopening a large table does not rescan
//! the whole log. It is only a cache: when it is missing or fails its
//! checksum, the log is replayed from the start.

use super::codec;
use super::node_id::NodeId;
use super::term::Term;
use crate::error::{Result, TdbError};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Node log file name
pub const NODE_LOG_FILE: &str = "nodes.dat";

/// Persisted reverse index file name
pub const NODE_INDEX_FILE: &str = "nodes.idn";

const IDN_MAGIC: &[u8; 8] = b"FTDBIDN\0";
const IDN_VERSION: u32 = 1;
const IDN_HEADER_SIZE: usize = 8 + 4 + 8 + 8 + 4;
const IDN_ENTRY_SIZE: usize = 16;

/// Log bytes held in memory before they are handed to the OS
const LOG_BUFFER_SIZE: usize = 64 * 1024;

/// Per-record framing overhead (length prefix and trailing id)
const RECORD_OVERHEAD: u64 = 4 + 8;

/// Position in the node table that a later [`NodeTable::rollback_to`] can
/// return to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeTableMark {
    count: u64,
    log_len: u64,
}

/// Node table statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeTableStats {
    /// Number of stored terms
    pub terms: u64,
    /// Log size in bytes, including buffered records
    pub log_bytes: u64,
    /// Distinct hash values in the reverse map
    pub hash_buckets: usize,
    /// Terms currently held in the decode cache
    pub cached_terms: usize,
}

struct NodeLog {
    file: File,
    /// Bytes already handed to the OS
    written_len: u64,
    /// Appended records not yet written
    pending: Vec<u8>,
}

impl NodeLog {
    fn len(&self) -> u64 {
        self.written_len + self.pending.len() as u64
    }

    fn append(&mut self, bytes: &[u8], id: NodeId) -> Result<u64> {
        let offset = self.len();
        self.pending.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        self.pending.extend_from_slice(bytes);
        self.pending.extend_from_slice(&id.as_u64().to_le_bytes());
        if self.pending.len() >= LOG_BUFFER_SIZE {
            self.write_pending()?;
        }
        Ok(offset)
    }

    fn write_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(self.written_len))?;
        self.file.write_all(&self.pending)?;
        self.written_len += self.pending.len() as u64;
        self.pending.clear();
        Ok(())
    }

    /// Encoded term bytes of the record starting at `offset`
    fn read_term(&mut self, offset: u64) -> Result<Vec<u8>> {
        if offset >= self.written_len {
            let start = (offset - self.written_len) as usize;
            let len = read_u32(&self.pending, start)? as usize;
            let body = start + 4;
            return self
                .pending
                .get(body..body + len)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| TdbError::Encoding(format!("record at {offset} overruns log")));
        }

        let mut len_buf = [0u8; 4];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut len_buf)?;
        let len = u64::from(u32::from_le_bytes(len_buf));
        if offset + RECORD_OVERHEAD + len > self.written_len {
            return Err(TdbError::Encoding(format!(
                "record at {offset} claims {len} bytes past the end of the log"
            )));
        }
        let mut bytes = vec![0u8; len as usize];
        self.file.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        if len >= self.written_len {
            self.pending.truncate((len - self.written_len) as usize);
        } else {
            self.pending.clear();
            self.file.set_len(len)?;
            self.written_len = len;
        }
        Ok(())
    }
}

fn read_u32(buf: &[u8], at: usize) -> Result<u32> {
    buf.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| TdbError::Encoding(format!("truncated length prefix at {at}")))
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(raw)
}

#[derive(Default)]
struct ReverseIndex {
    /// xxh3 of the encoding -> ids whose encoding hashes there
    by_hash: HashMap<u64, SmallVec<[NodeId; 1]>>,
    /// Log offset per id (`offsets[id - 1]`)
    offsets: Vec<u64>,
    /// Hash per id, kept for rewriting `nodes.idn`
    hashes: Vec<u64>,
    /// Ids covered by the last `nodes.idn` write
    persisted: u64,
    /// Log bytes covered by the last `nodes.idn` write
    covered: u64,
}

impl ReverseIndex {
    fn len(&self) -> u64 {
        self.offsets.len() as u64
    }

    fn push(&mut self, offset: u64, hash: u64) -> NodeId {
        self.offsets.push(offset);
        self.hashes.push(hash);
        let id = NodeId::new(self.len());
        self.by_hash.entry(hash).or_default().push(id);
        id
    }

    fn offset_of(&self, id: NodeId) -> Option<u64> {
        if id.is_null() {
            return None;
        }
        self.offsets.get((id.as_u64() - 1) as usize).copied()
    }

    fn truncate(&mut self, count: u64) {
        let count_usize = count as usize;
        self.offsets.truncate(count_usize);
        self.hashes.truncate(count_usize);
        self.by_hash.retain(|_, ids| {
            ids.retain(|id| id.as_u64() <= count);
            !ids.is_empty()
        });
        self.persisted = self.persisted.min(count);
    }
}

/// NodeTable provides bidirectional mapping between Terms and NodeIds
pub struct NodeTable {
    dir: PathBuf,
    log: Mutex<NodeLog>,
    index: RwLock<ReverseIndex>,
    cache: Mutex<LruCache<NodeId, Term>>,
    sync_writes: bool,
}

impl NodeTable {
    /// Open the node table in `dir`, creating empty files if needed
    pub fn open<P: AsRef<Path>>(dir: P, cache_terms: usize, sync_writes: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let log_path = dir.join(NODE_LOG_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&log_path)?;
        let file_len = file.metadata()?.len();

        let mut index = match Self::load_idn(&dir.join(NODE_INDEX_FILE), file_len) {
            Ok(Some(index)) => index,
            Ok(None) => ReverseIndex::default(),
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", NODE_INDEX_FILE, e);
                ReverseIndex::default()
            }
        };

        let replay_from = index.covered;
        let valid_len = Self::replay(&file, &log_path, replay_from, &mut index)?;
        if valid_len < file_len {
            warn!(
                "Truncating torn record at end of {:?} ({} -> {} bytes)",
                log_path, file_len, valid_len
            );
            file.set_len(valid_len)?;
        }

        info!(
            "Opened node table at {:?}: {} terms ({} replayed)",
            dir,
            index.len(),
            index.len() - index.persisted
        );

        let cache_size = NonZeroUsize::new(cache_terms).unwrap_or(NonZeroUsize::MIN);
        Ok(NodeTable {
            dir,
            log: Mutex::new(NodeLog {
                file,
                written_len: valid_len,
                pending: Vec::new(),
            }),
            index: RwLock::new(index),
            cache: Mutex::new(LruCache::new(cache_size)),
            sync_writes,
        })
    }

    /// Get or create a NodeId for a term
    ///
    /// If the term already exists, returns its NodeId. Otherwise the next
    /// unused id is assigned and the term is appended to the log.
    pub fn id_for(&self, term: &Term) -> Result<NodeId> {
        term.validate()?;
        let bytes = codec::encode(term);
        let hash = twox_hash::xxh3::hash64(&bytes);

        {
            let index = self.index.read();
            if let Some(id) = self.find(&index, hash, term, &bytes)? {
                return Ok(id);
            }
        }

        let mut index = self.index.write();

        // Double-check (another thread might have created it)
        if let Some(id) = self.find(&index, hash, term, &bytes)? {
            return Ok(id);
        }
        self.append(&mut index, &bytes, hash)
    }

    /// Batch variant of [`id_for`](Self::id_for)
    ///
    /// Terms repeated within the batch map to the same id. The writer lock is
    /// taken once for the whole batch.
    pub fn ids_for(&self, terms: &[Term]) -> Result<Vec<NodeId>> {
        let mut encoded = Vec::with_capacity(terms.len());
        for term in terms {
            term.validate()?;
            let bytes = codec::encode(term);
            let hash = twox_hash::xxh3::hash64(&bytes);
            encoded.push((bytes, hash));
        }

        let mut index = self.index.write();
        let mut ids = Vec::with_capacity(terms.len());
        for (term, (bytes, hash)) in terms.iter().zip(&encoded) {
            let id = match self.find(&index, *hash, term, bytes)? {
                Some(id) => id,
                None => self.append(&mut index, bytes, *hash)?,
            };
            ids.push(id);
        }
        Ok(ids)
    }

    /// NodeId of a term, without allocating one
    pub fn lookup(&self, term: &Term) -> Result<Option<NodeId>> {
        let bytes = codec::encode(term);
        let hash = twox_hash::xxh3::hash64(&bytes);
        let index = self.index.read();
        self.find(&index, hash, term, &bytes)
    }

    /// Term for a NodeId
    ///
    /// Fails with [`TdbError::NodeNotFound`] for ids never assigned by this
    /// table, including [`NodeId::NULL`].
    pub fn term_for(&self, id: NodeId) -> Result<Term> {
        if let Some(term) = self.cache.lock().get(&id) {
            return Ok(term.clone());
        }

        let offset = self
            .index
            .read()
            .offset_of(id)
            .ok_or(TdbError::NodeNotFound(id))?;
        let bytes = self.log.lock().read_term(offset)?;
        let term = codec::decode(&bytes)?;

        self.cache.lock().put(id, term.clone());
        Ok(term)
    }

    /// Check if a term exists in the table
    pub fn contains(&self, term: &Term) -> Result<bool> {
        Ok(self.lookup(term)?.is_some())
    }

    /// Number of stored terms
    pub fn len(&self) -> u64 {
        self.index.read().len()
    }

    /// Whether the table holds no terms
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Directory holding the table files
    pub fn location(&self) -> &Path {
        &self.dir
    }

    /// Make appended records durable
    ///
    /// Records are written to the OS and, with `sync_writes`, fsynced. Must
    /// run before any index change that references newly assigned ids.
    pub fn sync_log(&self) -> Result<()> {
        let mut log = self.log.lock();
        log.write_pending()?;
        if self.sync_writes {
            log.file.sync_data()?;
        }
        Ok(())
    }

    /// Make appended records durable and rewrite `nodes.idn` if it is stale
    pub fn flush(&self) -> Result<()> {
        let mut index = self.index.write();
        let log_len = {
            let mut log = self.log.lock();
            log.write_pending()?;
            log.file.sync_data()?;
            log.len()
        };

        if index.persisted == index.len() && self.dir.join(NODE_INDEX_FILE).exists() {
            return Ok(());
        }
        self.write_idn(&index, log_len)?;
        index.persisted = index.len();
        index.covered = log_len;
        debug!("Persisted reverse index for {} terms", index.len());
        Ok(())
    }

    /// Current position, for a later [`rollback_to`](Self::rollback_to)
    pub fn mark(&self) -> NodeTableMark {
        let index = self.index.read();
        let log = self.log.lock();
        NodeTableMark {
            count: index.len(),
            log_len: log.len(),
        }
    }

    /// Discard every term assigned after `mark`
    ///
    /// Only valid when no index references the discarded ids. Used by an
    /// aborted bulk load, whose ids were never committed to any index.
    pub fn rollback_to(&self, mark: NodeTableMark) -> Result<()> {
        let mut index = self.index.write();
        if mark.count > index.len() {
            return Err(TdbError::InvalidInput(format!(
                "rollback mark {} is ahead of table size {}",
                mark.count,
                index.len()
            )));
        }
        let discarded = index.len() - mark.count;

        let mut log = self.log.lock();
        log.truncate(mark.log_len)?;
        index.truncate(mark.count);
        self.cache.lock().clear();

        let idn = self.dir.join(NODE_INDEX_FILE);
        if idn.exists() {
            fs::remove_file(&idn)?;
        }
        index.persisted = 0;
        index.covered = 0;

        if discarded > 0 {
            info!("Rolled back {} node table entries", discarded);
        }
        Ok(())
    }

    /// Node table statistics
    pub fn stats(&self) -> NodeTableStats {
        let index = self.index.read();
        let log_bytes = self.log.lock().len();
        NodeTableStats {
            terms: index.len(),
            log_bytes,
            hash_buckets: index.by_hash.len(),
            cached_terms: self.cache.lock().len(),
        }
    }

    /// Id whose record holds `bytes`, the encoding of `term`
    ///
    /// Candidates in the decode cache are compared without touching the log;
    /// a log hit is cached for the next lookup.
    fn find(
        &self,
        index: &ReverseIndex,
        hash: u64,
        term: &Term,
        bytes: &[u8],
    ) -> Result<Option<NodeId>> {
        let Some(candidates) = index.by_hash.get(&hash) else {
            return Ok(None);
        };
        let mut uncached: SmallVec<[NodeId; 2]> = SmallVec::new();
        {
            let mut cache = self.cache.lock();
            for &id in candidates {
                match cache.get(&id) {
                    Some(cached) if cached == term => return Ok(Some(id)),
                    Some(_) => {}
                    None => uncached.push(id),
                }
            }
        }
        for id in uncached {
            let offset = index.offset_of(id).ok_or(TdbError::NodeNotFound(id))?;
            if self.log.lock().read_term(offset)? == bytes {
                self.cache.lock().put(id, term.clone());
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    fn append(&self, index: &mut ReverseIndex, bytes: &[u8], hash: u64) -> Result<NodeId> {
        let id = NodeId::new(index.len() + 1);
        let offset = self.log.lock().append(bytes, id)?;
        let assigned = index.push(offset, hash);
        debug_assert_eq!(assigned, id);
        Ok(id)
    }

    /// Rebuild index entries from the log, starting at `from`
    ///
    /// Returns the length of the valid log prefix; anything past it is a
    /// torn record.
    fn replay(file: &File, path: &Path, from: u64, index: &mut ReverseIndex) -> Result<u64> {
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(from))?;
        let mut pos = from;
        let mut len_buf = [0u8; 4];
        let mut id_buf = [0u8; 8];

        loop {
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(pos),
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            // a length running past the end of the file is a torn record
            if pos + RECORD_OVERHEAD + len as u64 > file_len {
                return Ok(pos);
            }
            let mut bytes = vec![0u8; len];
            if let Err(e) = reader
                .read_exact(&mut bytes)
                .and_then(|_| reader.read_exact(&mut id_buf))
            {
                if e.kind() == ErrorKind::UnexpectedEof {
                    return Ok(pos);
                }
                return Err(e.into());
            }

            let id = u64::from_le_bytes(id_buf);
            if id != index.len() + 1 {
                return Err(TdbError::Encoding(format!(
                    "{:?}: record at offset {} carries id {}, expected {}",
                    path,
                    pos,
                    id,
                    index.len() + 1
                )));
            }
            index.push(pos, twox_hash::xxh3::hash64(&bytes));
            pos += RECORD_OVERHEAD + len as u64;
        }
    }

    /// Load `nodes.idn`, or `None` if absent or stale
    fn load_idn(path: &Path, log_len: u64) -> Result<Option<ReverseIndex>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if data.len() < IDN_HEADER_SIZE || &data[..8] != IDN_MAGIC {
            return Err(TdbError::Encoding("bad reverse index header".to_string()));
        }
        let version = read_u32(&data, 8)?;
        if version != IDN_VERSION {
            return Err(TdbError::Encoding(format!(
                "unsupported reverse index version {version}"
            )));
        }
        let covered = read_u64(&data, 12);
        let count = read_u64(&data, 20);
        let crc = read_u32(&data, 28)?;
        let body = &data[IDN_HEADER_SIZE..];

        if covered > log_len {
            return Err(TdbError::Encoding(format!(
                "reverse index covers {covered} bytes but log has {log_len}"
            )));
        }
        if body.len() as u64 != count * IDN_ENTRY_SIZE as u64 {
            return Err(TdbError::Encoding("reverse index length mismatch".to_string()));
        }
        if crc32fast::hash(body) != crc {
            return Err(TdbError::Encoding("reverse index checksum mismatch".to_string()));
        }

        let mut index = ReverseIndex::default();
        for entry in body.chunks_exact(IDN_ENTRY_SIZE) {
            index.push(read_u64(entry, 0), read_u64(entry, 8));
        }
        index.persisted = count;
        index.covered = covered;
        Ok(Some(index))
    }

    fn write_idn(&self, index: &ReverseIndex, log_len: u64) -> Result<()> {
        let mut body = Vec::with_capacity(index.offsets.len() * IDN_ENTRY_SIZE);
        for (offset, hash) in index.offsets.iter().zip(&index.hashes) {
            body.extend_from_slice(&offset.to_le_bytes());
            body.extend_from_slice(&hash.to_le_bytes());
        }

        let mut out = Vec::with_capacity(IDN_HEADER_SIZE + body.len());
        out.extend_from_slice(IDN_MAGIC);
        out.extend_from_slice(&IDN_VERSION.to_le_bytes());
        out.extend_from_slice(&log_len.to_le_bytes());
        out.extend_from_slice(&index.len().to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        out.extend_from_slice(&body);

        let tmp = self.dir.join(format!("{NODE_INDEX_FILE}.tmp"));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&out)?;
            file.sync_data()?;
        }
        fs::rename(&tmp, self.dir.join(NODE_INDEX_FILE))?;
        Ok(())
    }
}

impl std::fmt::Debug for NodeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeTable")
            .field("dir", &self.dir)
            .field("terms", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_node_table() -> (TempDir, NodeTable) {
        let temp_dir = TempDir::new().unwrap();
        let table = NodeTable::open(temp_dir.path(), 100, false).unwrap();
        (temp_dir, table)
    }

    #[test]
    fn test_node_table_id_for() -> Result<()> {
        let (_temp_dir, table) = create_test_node_table();

        let term1 = Term::iri("http://example.org/resource1");
        let term2 = Term::iri("http://example.org/resource2");

        let id1 = table.id_for(&term1)?;
        let id2 = table.id_for(&term2)?;

        // Dense ids starting at FIRST
        assert_eq!(id1, NodeId::FIRST);
        assert_eq!(id2, NodeId::new(2));

        // Same term gets same ID
        assert_eq!(table.id_for(&term1)?, id1);
        assert_eq!(table.len(), 2);

        Ok(())
    }

    #[test]
    fn test_node_table_bidirectional_mapping() -> Result<()> {
        let (_temp_dir, table) = create_test_node_table();

        let terms = [
            Term::iri("http://example.org"),
            Term::literal("value"),
            Term::lang_literal("valeur", "fr"),
            Term::typed_literal("42", "http://www.w3.org/2001/XMLSchema#integer"),
            Term::blank_node("b1"),
        ];
        let ids: Vec<_> = terms.iter().map(|t| table.id_for(t)).collect::<Result<_>>()?;

        for (term, id) in terms.iter().zip(&ids) {
            assert_eq!(table.lookup(term)?, Some(*id));
            assert_eq!(&table.term_for(*id)?, term);
        }

        Ok(())
    }

    #[test]
    fn test_node_table_not_found() -> Result<()> {
        let (_temp_dir, table) = create_test_node_table();

        assert_eq!(table.lookup(&Term::iri("http://not-exists.com"))?, None);
        assert!(matches!(
            table.term_for(NodeId::new(999)),
            Err(TdbError::NodeNotFound(_))
        ));
        assert!(matches!(
            table.term_for(NodeId::NULL),
            Err(TdbError::NodeNotFound(_))
        ));

        Ok(())
    }

    #[test]
    fn test_node_table_rejects_invalid_term() {
        let (_temp_dir, table) = create_test_node_table();
        let bad = Term::Literal {
            value: "x".into(),
            datatype: Some("http://dt".into()),
            language: Some("en".into()),
        };
        assert!(matches!(table.id_for(&bad), Err(TdbError::InvalidInput(_))));
        assert!(table.is_empty());
    }

    #[test]
    fn test_node_table_batch_dedup() -> Result<()> {
        let (_temp_dir, table) = create_test_node_table();
        let existing = table.id_for(&Term::iri("http://a"))?;

        let batch = vec![
            Term::iri("http://b"),
            Term::iri("http://a"),
            Term::iri("http://b"),
            Term::literal("c"),
        ];
        let ids = table.ids_for(&batch)?;

        assert_eq!(ids[1], existing);
        assert_eq!(ids[0], ids[2]);
        assert_ne!(ids[0], ids[3]);
        assert_eq!(table.len(), 3);

        Ok(())
    }

    #[test]
    fn test_node_table_reopen_with_and_without_index() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let terms: Vec<Term> = (0..500)
            .map(|i| Term::iri(format!("http://example.org/{i}")))
            .collect();

        let ids = {
            let table = NodeTable::open(temp_dir.path(), 16, false)?;
            let ids = table.ids_for(&terms)?;
            table.flush()?;
            // Tail not covered by nodes.idn
            table.id_for(&Term::literal("tail"))?;
            table.sync_log()?;
            ids
        };

        {
            let table = NodeTable::open(temp_dir.path(), 16, false)?;
            assert_eq!(table.len(), 501);
            assert_eq!(table.term_for(ids[250])?, terms[250]);
            assert_eq!(table.lookup(&Term::literal("tail"))?, Some(NodeId::new(501)));
        }

        fs::remove_file(temp_dir.path().join(NODE_INDEX_FILE))?;
        let table = NodeTable::open(temp_dir.path(), 16, false)?;
        assert_eq!(table.len(), 501);
        for (term, id) in terms.iter().zip(&ids) {
            assert_eq!(table.lookup(term)?, Some(*id));
        }
        assert_eq!(table.id_for(&Term::iri("http://new"))?, NodeId::new(502));

        Ok(())
    }

    #[test]
    fn test_node_table_corrupt_index_falls_back_to_log() -> Result<()> {
        let temp_dir = TempDir::new()?;
        {
            let table = NodeTable::open(temp_dir.path(), 16, false)?;
            table.id_for(&Term::iri("http://a"))?;
            table.id_for(&Term::iri("http://b"))?;
            table.flush()?;
        }

        let idn = temp_dir.path().join(NODE_INDEX_FILE);
        let mut data = fs::read(&idn)?;
        let last = data.len() - 1;
        data[last] ^= 0xff;
        fs::write(&idn, data)?;

        let table = NodeTable::open(temp_dir.path(), 16, false)?;
        assert_eq!(table.lookup(&Term::iri("http://b"))?, Some(NodeId::new(2)));
        Ok(())
    }

    #[test]
    fn test_node_table_torn_tail_truncated() -> Result<()> {
        let temp_dir = TempDir::new()?;
        {
            let table = NodeTable::open(temp_dir.path(), 16, false)?;
            table.id_for(&Term::iri("http://a"))?;
            table.id_for(&Term::iri("http://b"))?;
            table.sync_log()?;
        }

        let log = temp_dir.path().join(NODE_LOG_FILE);
        let full_len = fs::metadata(&log)?.len();
        let file = OpenOptions::new().write(true).open(&log)?;
        file.set_len(full_len - 3)?;
        drop(file);

        let table = NodeTable::open(temp_dir.path(), 16, false)?;
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(&Term::iri("http://b"))?, None);
        assert_eq!(table.id_for(&Term::iri("http://c"))?, NodeId::new(2));
        Ok(())
    }

    #[test]
    fn test_node_table_overlong_length_is_torn_tail() -> Result<()> {
        let temp_dir = TempDir::new()?;
        {
            let table = NodeTable::open(temp_dir.path(), 16, false)?;
            table.id_for(&Term::iri("http://a"))?;
            table.sync_log()?;
        }

        let log = temp_dir.path().join(NODE_LOG_FILE);
        let good_len = fs::metadata(&log)?.len();
        let mut file = OpenOptions::new().append(true).open(&log)?;
        file.write_all(&0xFFFF_FFF0u32.to_le_bytes())?;
        file.write_all(b"garbage")?;
        drop(file);

        let table = NodeTable::open(temp_dir.path(), 16, false)?;
        assert_eq!(table.len(), 1);
        assert_eq!(fs::metadata(&log)?.len(), good_len);
        assert_eq!(table.id_for(&Term::iri("http://b"))?, NodeId::new(2));
        Ok(())
    }

    #[test]
    fn test_node_table_lookup_served_from_cache() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let term = Term::iri("http://example.org/cached");
        {
            let table = NodeTable::open(temp_dir.path(), 16, false)?;
            table.id_for(&term)?;
            table.sync_log()?;
        }

        let table = NodeTable::open(temp_dir.path(), 16, false)?;
        assert_eq!(table.stats().cached_terms, 0);
        assert_eq!(table.lookup(&term)?, Some(NodeId::FIRST));
        assert_eq!(table.stats().cached_terms, 1);

        // with the record body overwritten only the cache can answer
        let log = temp_dir.path().join(NODE_LOG_FILE);
        let mut file = OpenOptions::new().write(true).open(&log)?;
        file.seek(SeekFrom::Start(4))?;
        file.write_all(b"XXXX")?;
        drop(file);

        assert_eq!(table.lookup(&term)?, Some(NodeId::FIRST));
        assert_eq!(table.id_for(&term)?, NodeId::FIRST);
        assert_eq!(table.len(), 1);
        Ok(())
    }

    #[test]
    fn test_node_table_rollback() -> Result<()> {
        let (_temp_dir, table) = create_test_node_table();
        let a = table.id_for(&Term::iri("http://a"))?;
        table.flush()?;

        let mark = table.mark();
        table.ids_for(&[Term::iri("http://b"), Term::iri("http://c")])?;
        assert_eq!(table.len(), 3);

        table.rollback_to(mark)?;
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(&Term::iri("http://a"))?, Some(a));
        assert_eq!(table.lookup(&Term::iri("http://b"))?, None);
        assert_eq!(table.id_for(&Term::iri("http://d"))?, NodeId::new(2));
        Ok(())
    }
}

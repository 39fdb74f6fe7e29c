//! Write-ahead journal for index batches
//!
//! A batch of mutations is appended here before it touches any index and
//! cleared once every index has been flushed. A batch still present on open
//! was interrupted and is replayed; index operations are idempotent, so
//! replaying a batch that had partly or fully landed is safe.
//!
//! Frame format: `len: u32 LE`, `crc32: u32 LE`, then `len` bytes of bincode
//! `Vec<Mutation>`. A short or mismatching final frame is a torn write and is
//! ignored.

use crate::error::Result;
use crate::triple_store::Mutation;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Journal file name inside a store directory
pub const JOURNAL_FILE: &str = "journal.jrnl";

const FRAME_HEADER: usize = 8;

/// Write-ahead journal
pub struct Journal {
    path: PathBuf,
    file: File,
    /// Whether to fsync after each append
    sync_on_write: bool,
    /// Batches appended since the last clear
    pending: u64,
}

impl Journal {
    /// Create or open the journal in `dir`
    ///
    /// # Arguments
    ///
    /// * `dir` - Store directory
    /// * `sync_on_write` - If true, fsync after each append
    pub fn open<P: AsRef<Path>>(dir: P, sync_on_write: bool) -> Result<Self> {
        let path = dir.as_ref().join(JOURNAL_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let pending = if file.metadata()?.len() > 0 { 1 } else { 0 };

        Ok(Self {
            path,
            file,
            sync_on_write,
            pending,
        })
    }

    /// Path of the journal file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the journal may hold batches that were never cleared
    pub fn has_pending(&self) -> bool {
        self.pending > 0
    }

    /// Append one batch
    pub fn append_batch(&mut self, batch: &[Mutation]) -> Result<()> {
        let payload = bincode::serialize(batch)?;
        let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);

        self.file.write_all(&frame)?;
        if self.sync_on_write {
            self.file.sync_data()?;
        }
        self.pending += 1;
        Ok(())
    }

    /// Read back every complete batch
    pub fn replay(&mut self) -> Result<Vec<Vec<Mutation>>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&self.file);
        let mut batches = Vec::new();
        let mut header = [0u8; FRAME_HEADER];

        loop {
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    warn!("Ignoring torn journal frame in {:?}", self.path);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            if crc32fast::hash(&payload) != crc {
                warn!("Ignoring journal frame with bad checksum in {:?}", self.path);
                break;
            }
            batches.push(bincode::deserialize(&payload)?);
        }
        Ok(batches)
    }

    /// Drop every batch once its effects are durable in all indexes
    pub fn clear(&mut self) -> Result<()> {
        if self.pending == 0 {
            return Ok(());
        }
        self.file.set_len(0)?;
        if self.sync_on_write {
            self.file.sync_data()?;
        }
        self.pending = 0;
        Ok(())
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("path", &self.path)
            .field("pending", &self.pending)
            .finish()
    }
}

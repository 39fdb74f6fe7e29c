//! File manager with optional memory-mapped I/O
//!
//! This module manages one page file, using either memory-mapped I/O (mmap)
//! or positioned reads and writes for random access to pages.

use crate::error::{Result, TdbError};
use crate::storage::page::{Page, PageId, PAGE_SIZE};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// File manager for page-granular file I/O
pub struct FileManager {
    /// Path to the data file
    path: PathBuf,
    /// File handle
    file: Mutex<File>,
    /// Memory-mapped region (mmap mode only)
    mmap: RwLock<Option<MmapMut>>,
    /// Current number of pages in the file
    num_pages: AtomicU64,
    /// Whether to use mmap (true) or direct I/O (false)
    use_mmap: bool,
}

impl FileManager {
    /// Open or create a file
    pub fn open<P: AsRef<Path>>(path: P, use_mmap: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        if file_size % PAGE_SIZE as u64 != 0 {
            return Err(TdbError::corrupt(
                &path,
                file_size / PAGE_SIZE as u64,
                format!("file size {file_size} is not a multiple of the page size"),
            ));
        }

        // SAFETY: the file is owned by this store; no other process maps it.
        let mmap = if use_mmap && file_size > 0 {
            Some(unsafe { MmapOptions::new().map_mut(&file)? })
        } else {
            None
        };

        Ok(Self {
            path,
            file: Mutex::new(file),
            mmap: RwLock::new(mmap),
            num_pages: AtomicU64::new(file_size / PAGE_SIZE as u64),
            use_mmap,
        })
    }

    /// Get total number of pages
    pub fn num_pages(&self) -> u64 {
        self.num_pages.load(Ordering::Acquire)
    }

    /// Extend file to accommodate more pages
    pub fn extend_to(&self, num_pages: u64) -> Result<()> {
        let file = self.file.lock();
        if num_pages <= self.num_pages() {
            return Ok(());
        }
        file.set_len(num_pages * PAGE_SIZE as u64)?;

        if self.use_mmap {
            // SAFETY: see `open`
            let new_mmap = unsafe { MmapOptions::new().map_mut(&*file)? };
            *self.mmap.write() = Some(new_mmap);
        }
        self.num_pages.store(num_pages, Ordering::Release);
        Ok(())
    }

    /// Allocate a new page at the end of the file and return its ID
    pub fn allocate_page(&self) -> Result<PageId> {
        let page_id = self.num_pages();
        self.extend_to(page_id + 1)?;
        Ok(page_id)
    }

    /// Read a page from disk, verifying its header and checksum
    pub fn read_page(&self, page_id: PageId) -> Result<Page> {
        if page_id >= self.num_pages() {
            return Err(TdbError::corrupt(
                &self.path,
                page_id,
                format!("page beyond end of file ({} pages)", self.num_pages()),
            ));
        }

        let offset = page_id * PAGE_SIZE as u64;
        let mut page_data = [0u8; PAGE_SIZE];

        if self.use_mmap {
            let mmap_guard = self.mmap.read();
            let mmap = mmap_guard
                .as_ref()
                .ok_or_else(|| TdbError::corrupt(&self.path, page_id, "file not mapped"))?;
            let start = offset as usize;
            page_data.copy_from_slice(&mmap[start..start + PAGE_SIZE]);
        } else {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut page_data)?;
        }

        Page::from_bytes(page_id, &page_data)
            .map_err(|reason| TdbError::corrupt(&self.path, page_id, reason))
    }

    /// Seal and write a page to disk
    pub fn write_page(&self, page: &mut Page) -> Result<()> {
        let page_id = page.page_id();
        if page_id >= self.num_pages() {
            return Err(TdbError::corrupt(
                &self.path,
                page_id,
                "write beyond end of file",
            ));
        }

        page.seal();
        let offset = page_id * PAGE_SIZE as u64;
        let page_data = page.raw_data();

        if self.use_mmap {
            let mut mmap_guard = self.mmap.write();
            let mmap = mmap_guard
                .as_mut()
                .ok_or_else(|| TdbError::corrupt(&self.path, page_id, "file not mapped"))?;
            let start = offset as usize;
            mmap[start..start + PAGE_SIZE].copy_from_slice(page_data);
        } else {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(page_data)?;
        }
        Ok(())
    }

    /// Flush all changes to stable storage
    pub fn sync(&self) -> Result<()> {
        if let Some(mmap) = self.mmap.read().as_ref() {
            mmap.flush()?;
        }
        self.file.lock().sync_all()?;
        Ok(())
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get file size in bytes
    pub fn file_size(&self) -> u64 {
        self.num_pages() * PAGE_SIZE as u64
    }
}

impl std::fmt::Debug for FileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileManager")
            .field("path", &self.path)
            .field("num_pages", &self.num_pages())
            .field("use_mmap", &self.use_mmap)
            .finish()
    }
}

//! Page management for disk-based storage
//!
//! This module provides fixed-size page abstraction (4KB) for efficient disk I/O.
//! Pages are the fundamental unit of storage in index files.

use bytes::{Buf, BufMut};

/// Page size (4KB) - standard OS page size for efficient I/O
pub const PAGE_SIZE: usize = 4096;

/// Page header size (reserved for metadata)
pub const PAGE_HEADER_SIZE: usize = 32;

/// Usable space in a page (PAGE_SIZE - header)
pub const PAGE_USABLE_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Page identifier (unique within a file)
pub type PageId = u64;

/// Page type indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Free page (on the free list)
    Free = 0,
    /// File metadata page
    Meta = 1,
    /// B+Tree internal node
    BTreeInternal = 2,
    /// B+Tree leaf node
    BTreeLeaf = 3,
}

impl PageType {
    fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PageType::Free),
            1 => Some(PageType::Meta),
            2 => Some(PageType::BTreeInternal),
            3 => Some(PageType::BTreeLeaf),
            _ => None,
        }
    }
}

/// Page header (32 bytes)
///
/// Layout: page id (`u64`), page type (`u8`), padding, used size (`u16`),
/// CRC32 of the payload (`u32`), reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// Page ID
    pub page_id: PageId,
    /// Page type
    pub page_type: PageType,
    /// Number of payload bytes used in this page
    pub used_size: u16,
    /// Checksum for integrity verification (CRC32)
    pub checksum: u32,
}

impl PageHeader {
    fn encode(&self, mut out: &mut [u8]) {
        out.put_u64_le(self.page_id);
        out.put_u8(self.page_type as u8);
        out.put_u8(0);
        out.put_u16_le(self.used_size);
        out.put_u32_le(self.checksum);
        out.put_bytes(0, PAGE_HEADER_SIZE - 16);
    }

    fn decode(mut raw: &[u8]) -> std::result::Result<Self, String> {
        let page_id = raw.get_u64_le();
        let tag = raw.get_u8();
        let page_type = PageType::from_u8(tag).ok_or_else(|| format!("unknown page type {tag}"))?;
        raw.advance(1);
        let used_size = raw.get_u16_le();
        let checksum = raw.get_u32_le();
        Ok(PageHeader {
            page_id,
            page_type,
            used_size,
            checksum,
        })
    }
}

/// A single page in the storage system
///
/// Pages are 4KB fixed-size blocks that serve as the fundamental unit
/// of disk I/O. Each page has:
/// - A unique ID within the file
/// - A type indicator (meta, B+Tree node, free)
/// - Metadata (size, checksum)
/// - Data payload (4064 bytes usable)
#[derive(Clone)]
pub struct Page {
    header: PageHeader,
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    /// Create a new empty page
    pub fn new(page_id: PageId, page_type: PageType) -> Self {
        Self {
            header: PageHeader {
                page_id,
                page_type,
                used_size: 0,
                checksum: 0,
            },
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// Create page from raw bytes read from disk
    ///
    /// Fails with a reason when the header is malformed, the stored id is not
    /// `expected_id`, or the payload checksum does not match.
    pub fn from_bytes(expected_id: PageId, bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.len() != PAGE_SIZE {
            return Err(format!("page is {} bytes, expected {PAGE_SIZE}", bytes.len()));
        }
        let header = PageHeader::decode(&bytes[..PAGE_HEADER_SIZE])?;
        if header.page_id != expected_id {
            return Err(format!("page header carries id {}", header.page_id));
        }
        if header.used_size as usize > PAGE_USABLE_SIZE {
            return Err(format!("used size {} exceeds page", header.used_size));
        }
        let checksum = crc32fast::hash(&bytes[PAGE_HEADER_SIZE..]);
        if checksum != header.checksum {
            return Err(format!(
                "checksum mismatch (stored {:08x}, computed {checksum:08x})",
                header.checksum
            ));
        }

        let mut data = Box::new([0u8; PAGE_SIZE]);
        data.copy_from_slice(bytes);
        Ok(Self { header, data })
    }

    /// Get page ID
    pub fn page_id(&self) -> PageId {
        self.header.page_id
    }

    /// Get page type
    pub fn page_type(&self) -> PageType {
        self.header.page_type
    }

    /// Change the page type
    pub fn set_page_type(&mut self, page_type: PageType) {
        self.header.page_type = page_type;
    }

    /// Get mutable reference to page data (excluding header)
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data[PAGE_HEADER_SIZE..]
    }

    /// Get immutable reference to page data (excluding header)
    pub fn data(&self) -> &[u8] {
        &self.data[PAGE_HEADER_SIZE..]
    }

    /// Get immutable reference to raw page bytes (including header)
    pub fn raw_data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Recompute the checksum and write the header into the raw bytes
    pub fn seal(&mut self) {
        self.header.checksum = crc32fast::hash(&self.data[PAGE_HEADER_SIZE..]);
        let header = self.header;
        header.encode(&mut self.data[..PAGE_HEADER_SIZE]);
    }

    /// Verify page checksum
    pub fn verify_checksum(&self) -> bool {
        crc32fast::hash(&self.data[PAGE_HEADER_SIZE..]) == self.header.checksum
    }

    /// Get used size (excluding header)
    pub fn used_size(&self) -> usize {
        self.header.used_size as usize
    }

    /// Set used size (excluding header)
    pub fn set_used_size(&mut self, used: usize) {
        debug_assert!(used <= PAGE_USABLE_SIZE);
        self.header.used_size = used as u16;
    }

    /// Clear page data (reset to empty)
    pub fn clear(&mut self) {
        self.data[PAGE_HEADER_SIZE..].fill(0);
        self.header.used_size = 0;
        self.header.checksum = 0;
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("page_id", &self.header.page_id)
            .field("page_type", &self.header.page_type)
            .field("used_size", &self.header.used_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_creation() {
        let page = Page::new(1, PageType::BTreeLeaf);
        assert_eq!(page.page_id(), 1);
        assert_eq!(page.page_type(), PageType::BTreeLeaf);
        assert_eq!(page.used_size(), 0);
    }

    #[test]
    fn test_page_serialization() {
        let mut page = Page::new(42, PageType::BTreeInternal);
        page.data_mut()[..18].copy_from_slice(b"serialization test");
        page.set_used_size(18);
        page.seal();
        assert!(page.verify_checksum());

        let restored = Page::from_bytes(42, page.raw_data()).unwrap();
        assert_eq!(restored.page_id(), 42);
        assert_eq!(restored.page_type(), PageType::BTreeInternal);
        assert_eq!(restored.used_size(), 18);
        assert_eq!(&restored.data()[..18], b"serialization test");
    }

    #[test]
    fn test_page_checksum_detects_corruption() {
        let mut page = Page::new(7, PageType::BTreeLeaf);
        page.data_mut()[0] = 1;
        page.seal();

        let mut raw = *page.raw_data();
        raw[PAGE_HEADER_SIZE + 100] ^= 0x40;
        let err = Page::from_bytes(7, &raw).unwrap_err();
        assert!(err.contains("checksum"));
    }

    #[test]
    fn test_page_wrong_id() {
        let mut page = Page::new(3, PageType::BTreeLeaf);
        page.seal();
        assert!(Page::from_bytes(4, page.raw_data()).is_err());
    }

    #[test]
    fn test_page_clear() {
        let mut page = Page::new(1, PageType::BTreeLeaf);
        page.data_mut()[..9].copy_from_slice(b"some data");
        page.set_used_size(9);

        page.clear();
        assert_eq!(page.used_size(), 0);
        assert!(page.data().iter().all(|&b| b == 0));
    }
}

//! Page types and constants for the storage engine.
//!
//! Pages are the unit of I/O and locking. Their size is chosen when a
//! segment is created (see [`crate::config::StorageConfig`]) and never
//! changes afterwards.

use std::sync::Arc;

use crate::storage::buffer_pool::BufferPool;

/// A page identifier (0-indexed page number within a segment).
pub type PageId = u64;

/// The "no page" sentinel. Segments never hand out page 0 for data.
pub const NULL_PAGE_ID: PageId = 0;

/// Page type identifiers stored in the first byte of every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Never written since allocation.
    Unused = 0x00,
    /// Segment header (page 0 of a file segment only)
    SegmentHeader = 0x01,
    /// B-tree node, leaf or internal (the height lives in the node header)
    BTreeNode = 0x03,
    /// Free page (on the segment free list)
    Free = 0x06,
}

impl TryFrom<u8> for PageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Unused),
            0x01 => Ok(Self::SegmentHeader),
            0x03 => Ok(Self::BTreeNode),
            0x06 => Ok(Self::Free),
            _ => Err(value),
        }
    }
}

/// Common page header present at the start of every page.
///
/// Layout:
/// - `page_type`: 1 byte
/// - `flags`: 1 byte
/// - `checksum`: 4 bytes (CRC32)
/// - `reserved`: 2 bytes
///
/// Total: 8 bytes
#[derive(Debug, Copy, Clone)]
pub struct PageHeader {
    pub page_type: PageType,
    pub flags: u8,
    pub checksum: u32,
}

impl PageHeader {
    /// Size of the page header in bytes.
    pub const SIZE: usize = 8;

    /// Byte range of the checksum field.
    const CHECKSUM_RANGE: std::ops::Range<usize> = 2..6;

    /// Serialize the header into the first [`Self::SIZE`] bytes of `buf`.
    pub fn write_to(self, buf: &mut [u8]) {
        buf[0] = self.page_type as u8;
        buf[1] = self.flags;
        buf[Self::CHECKSUM_RANGE].copy_from_slice(&self.checksum.to_le_bytes());
        buf[6..8].fill(0);
    }

    /// Deserialize a header from the start of `buf`.
    pub fn read_from(buf: &[u8]) -> Result<Self, PageError> {
        let page_type = PageType::try_from(buf[0]).map_err(PageError::InvalidPageType)?;
        Ok(Self {
            page_type,
            flags: buf[1],
            checksum: read_u32(buf, Self::CHECKSUM_RANGE.start),
        })
    }
}

/// Compute the CRC32 checksum of a page image, treating the checksum
/// field itself as zero.
#[must_use]
pub fn compute_checksum(buf: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[..PageHeader::CHECKSUM_RANGE.start]);
    hasher.update(&[0u8; 4]);
    hasher.update(&buf[PageHeader::CHECKSUM_RANGE.end..]);
    hasher.finalize()
}

/// Store the checksum of `buf` into its header.
pub fn stamp_checksum(buf: &mut [u8]) {
    let checksum = compute_checksum(buf);
    buf[PageHeader::CHECKSUM_RANGE].copy_from_slice(&checksum.to_le_bytes());
}

/// Read a u16 (little-endian) at the given offset.
#[must_use]
pub fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

/// Write a u16 (little-endian) at the given offset.
pub fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Read a u32 (little-endian) at the given offset.
#[must_use]
pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

/// Write a u32 (little-endian) at the given offset.
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Read a u64 (little-endian) at the given offset.
#[must_use]
pub fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

/// Write a u64 (little-endian) at the given offset.
pub fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// A raw page buffer.
///
/// Buffers leased from a [`BufferPool`] go back to it when the page is
/// dropped.
pub struct Page {
    data: Option<Box<[u8]>>,
    pool: Option<Arc<BufferPool>>,
}

impl Page {
    /// Create a new zeroed page that does not belong to any pool.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            data: Some(vec![0u8; page_size].into_boxed_slice()),
            pool: None,
        }
    }

    /// Wrap a buffer leased from `pool`.
    #[must_use]
    pub(crate) const fn from_pool(buffer: Box<[u8]>, pool: Arc<BufferPool>) -> Self {
        Self {
            data: Some(buffer),
            pool: Some(pool),
        }
    }

    /// Page size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.as_bytes().len()
    }

    /// Get the raw page data.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    /// Get mutable access to the raw page data.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or_default()
    }

    /// Exchange the buffers of two pages of the same size.
    pub fn swap_contents(&mut self, other: &mut Self) {
        assert_eq!(self.size(), other.size(), "page size mismatch in swap");
        std::mem::swap(&mut self.data, &mut other.data);
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        if let (Some(buffer), Some(pool)) = (self.data.take(), self.pool.take()) {
            pool.return_buffer(buffer);
        }
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.as_bytes();
        f.debug_struct("Page")
            .field("size", &bytes.len())
            .field("first_16_bytes", &&bytes[..bytes.len().min(16)])
            .finish_non_exhaustive()
    }
}

/// Errors related to page operations.
#[derive(Debug)]
pub enum PageError {
    /// Invalid page type byte.
    InvalidPageType(u8),
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPageType(v) => write!(f, "invalid page type: 0x{v:02x}"),
        }
    }
}

impl std::error::Error for PageError {}

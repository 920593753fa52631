//! Page allocation and persistence.
//!
//! A segment owns a set of fixed-size pages. It allocates and frees page
//! ids and moves page images between memory and its backing store. It
//! knows nothing about page contents beyond the common page header.
//!
//! # Implementation Notes
//!
//! Implementations must ensure:
//! - `read_page` returns the last written content for a page, or zeros for
//!   a page allocated but never written
//! - `allocate_page` never returns [`NULL_PAGE_ID`]
//! - `sync` makes all previous writes durable

use std::collections::HashMap;
use std::path::PathBuf;

use crate::storage::page::{NULL_PAGE_ID, PageId};

/// Abstraction over page-based storage.
pub trait Segment: Send {
    /// Bytes available in each page.
    fn usable_page_size(&self) -> usize;

    /// Allocate a page, reusing freed pages first.
    fn allocate_page(&mut self) -> Result<PageId, SegmentError>;

    /// Return a page to the free list.
    fn deallocate_page(&mut self, page_id: PageId) -> Result<(), SegmentError>;

    /// Read a page image into `buf` (exactly one page long).
    fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<(), SegmentError>;

    /// Write a page image from `buf` (exactly one page long).
    fn write_page(&mut self, page_id: PageId, buf: &[u8]) -> Result<(), SegmentError>;

    /// Make all previous writes durable.
    fn sync(&mut self) -> Result<(), SegmentError>;

    /// Number of pages currently allocated (not counting metadata pages).
    fn allocated_page_count(&self) -> u64;
}

/// Errors that can occur during segment operations.
#[derive(Debug)]
pub enum SegmentError {
    /// I/O error.
    Io(std::io::Error),
    /// Page id beyond the end of the segment.
    PageOutOfBounds { page_id: PageId, total_pages: u64 },
    /// Page id is not currently allocated.
    PageNotAllocated(PageId),
    /// Stored checksum does not match the page contents.
    ChecksumMismatch {
        page_id: PageId,
        expected: u32,
        actual: u32,
    },
    /// The segment header is not valid.
    InvalidHeader(String),
    /// Tried to create a segment over an existing file.
    AlreadyExists(PathBuf),
}

impl std::fmt::Display for SegmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::PageOutOfBounds {
                page_id,
                total_pages,
            } => write!(
                f,
                "page {page_id} out of bounds (total pages: {total_pages})"
            ),
            Self::PageNotAllocated(page_id) => write!(f, "page {page_id} is not allocated"),
            Self::ChecksumMismatch {
                page_id,
                expected,
                actual,
            } => write!(
                f,
                "checksum mismatch on page {page_id}: expected {expected:#010x}, got {actual:#010x}"
            ),
            Self::InvalidHeader(msg) => write!(f, "invalid segment header: {msg}"),
            Self::AlreadyExists(path) => write!(f, "segment already exists: {}", path.display()),
        }
    }
}

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SegmentError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// In-memory segment.
///
/// Page images live in a map; freed ids are reused LIFO.
#[derive(Debug)]
pub struct MemorySegment {
    page_size: usize,
    pages: HashMap<PageId, Box<[u8]>>,
    free_list: Vec<PageId>,
    next_page_id: PageId,
}

impl MemorySegment {
    /// Create an empty segment of `page_size`-byte pages.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            pages: HashMap::new(),
            free_list: Vec::new(),
            next_page_id: NULL_PAGE_ID + 1,
        }
    }

    fn check_allocated(&self, page_id: PageId) -> Result<(), SegmentError> {
        if page_id == NULL_PAGE_ID || page_id >= self.next_page_id {
            return Err(SegmentError::PageOutOfBounds {
                page_id,
                total_pages: self.next_page_id,
            });
        }
        if !self.pages.contains_key(&page_id) {
            return Err(SegmentError::PageNotAllocated(page_id));
        }
        Ok(())
    }
}

impl Segment for MemorySegment {
    fn usable_page_size(&self) -> usize {
        self.page_size
    }

    fn allocate_page(&mut self) -> Result<PageId, SegmentError> {
        let page_id = self.free_list.pop().unwrap_or_else(|| {
            let id = self.next_page_id;
            self.next_page_id += 1;
            id
        });
        self.pages
            .insert(page_id, vec![0u8; self.page_size].into_boxed_slice());
        Ok(page_id)
    }

    fn deallocate_page(&mut self, page_id: PageId) -> Result<(), SegmentError> {
        self.check_allocated(page_id)?;
        self.pages.remove(&page_id);
        self.free_list.push(page_id);
        Ok(())
    }

    fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<(), SegmentError> {
        self.check_allocated(page_id)?;
        if let Some(image) = self.pages.get(&page_id) {
            buf.copy_from_slice(image);
        }
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, buf: &[u8]) -> Result<(), SegmentError> {
        self.check_allocated(page_id)?;
        if let Some(image) = self.pages.get_mut(&page_id) {
            image.copy_from_slice(buf);
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<(), SegmentError> {
        Ok(())
    }

    fn allocated_page_count(&self) -> u64 {
        self.pages.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_segment_allocate_and_reuse() {
        let mut segment = MemorySegment::new(64);

        let a = segment.allocate_page().expect("allocate a");
        let b = segment.allocate_page().expect("allocate b");
        assert_ne!(a, NULL_PAGE_ID);
        assert_ne!(a, b);
        assert_eq!(segment.allocated_page_count(), 2);

        segment.deallocate_page(a).expect("free a");
        assert_eq!(segment.allocated_page_count(), 1);
        assert_eq!(segment.allocate_page().expect("reuse"), a);
    }

    #[test]
    fn test_memory_segment_read_write() {
        let mut segment = MemorySegment::new(64);
        let page_id = segment.allocate_page().expect("allocate");

        let mut buf = vec![0u8; 64];
        segment.read_page(page_id, &mut buf).expect("read fresh");
        assert!(buf.iter().all(|&b| b == 0));

        buf[5] = 9;
        segment.write_page(page_id, &buf).expect("write");
        let mut out = vec![0u8; 64];
        segment.read_page(page_id, &mut out).expect("read back");
        assert_eq!(out[5], 9);
    }

    #[test]
    fn test_memory_segment_rejects_unallocated() {
        let mut segment = MemorySegment::new(64);
        let mut buf = vec![0u8; 64];
        assert!(matches!(
            segment.read_page(NULL_PAGE_ID, &mut buf),
            Err(SegmentError::PageOutOfBounds { .. })
        ));

        let page_id = segment.allocate_page().expect("allocate");
        segment.deallocate_page(page_id).expect("free");
        assert!(matches!(
            segment.write_page(page_id, &buf),
            Err(SegmentError::PageNotAllocated(_))
        ));
    }

    #[test]
    fn test_segment_error_display() {
        let e = SegmentError::PageOutOfBounds {
            page_id: 10,
            total_pages: 5,
        };
        assert!(e.to_string().contains("page 10"));
        assert!(e.to_string().contains("total pages: 5"));
    }
}

//! File-backed segment.
//!
//! Page 0 holds the segment header; data pages follow. Freed pages are
//! chained into an on-disk free list through their first bytes after the
//! page header, so the list survives a reopen.
//!
//! Every page written through the segment carries a CRC32 checksum in its
//! page header, verified again on read. Pages that were allocated but never
//! written read back as zeros and are not checked.

// Page sizes and counts are bounded by the header format.
#![allow(clippy::cast_possible_truncation)]

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::storage::page::{
    NULL_PAGE_ID, PageHeader, PageId, PageType, compute_checksum, read_u32, read_u64,
    stamp_checksum, write_u32, write_u64,
};
use crate::storage::segment::{Segment, SegmentError};

/// Magic number identifying a segment file: "BTREESEG"
pub const MAGIC: [u8; 8] = *b"BTREESEG";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Segment header field offsets (within page 0).
mod offsets {
    pub const MAGIC: usize = 8;
    pub const FORMAT_VERSION: usize = 16;
    pub const PAGE_SIZE: usize = 20;
    pub const TOTAL_PAGES: usize = 24;
    pub const FREE_LIST_HEAD: usize = 32;
    pub const ALLOCATED_PAGES: usize = 40;
    pub const END: usize = 48;

    /// Next-pointer slot inside a free page.
    pub const FREE_NEXT: usize = 8;
}

/// A segment stored in a single file.
pub struct FileSegment {
    file: File,
    page_size: usize,
    total_pages: u64,
    free_list_head: PageId,
    allocated_pages: u64,
    /// Scratch image used to stamp checksums without touching the caller's buffer.
    scratch: Box<[u8]>,
}

impl FileSegment {
    /// Create a new segment file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path, page_size: usize) -> Result<Self, SegmentError> {
        if path.exists() {
            return Err(SegmentError::AlreadyExists(path.to_path_buf()));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let mut segment = Self {
            file,
            page_size,
            total_pages: 1,
            free_list_head: NULL_PAGE_ID,
            allocated_pages: 0,
            scratch: vec![0u8; page_size].into_boxed_slice(),
        };
        segment.write_header()?;
        segment.file.sync_all()?;
        tracing::info!(path = %path.display(), page_size, "created segment file");
        Ok(segment)
    }

    /// Open an existing segment file.
    pub fn open(path: &Path) -> Result<Self, SegmentError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut prefix = [0u8; offsets::END];
        file.read_exact(&mut prefix)?;
        if prefix[offsets::MAGIC..offsets::MAGIC + 8] != MAGIC {
            return Err(SegmentError::InvalidHeader("bad magic".to_string()));
        }
        let version = read_u32(&prefix, offsets::FORMAT_VERSION);
        if version != FORMAT_VERSION {
            return Err(SegmentError::InvalidHeader(format!(
                "unsupported version {version}"
            )));
        }
        let page_size = read_u32(&prefix, offsets::PAGE_SIZE) as usize;
        if page_size < offsets::END {
            return Err(SegmentError::InvalidHeader(format!(
                "page size {page_size} too small"
            )));
        }

        let mut header = vec![0u8; page_size];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let expected = read_u32(&header, 2);
        let actual = compute_checksum(&header);
        if expected != actual {
            return Err(SegmentError::ChecksumMismatch {
                page_id: 0,
                expected,
                actual,
            });
        }

        let segment = Self {
            file,
            page_size,
            total_pages: read_u64(&header, offsets::TOTAL_PAGES),
            free_list_head: read_u64(&header, offsets::FREE_LIST_HEAD),
            allocated_pages: read_u64(&header, offsets::ALLOCATED_PAGES),
            scratch: vec![0u8; page_size].into_boxed_slice(),
        };
        tracing::info!(
            path = %path.display(),
            page_size,
            total_pages = segment.total_pages,
            allocated = segment.allocated_pages,
            "opened segment file"
        );
        Ok(segment)
    }

    /// Total pages in the file, including the header page.
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.total_pages
    }

    const fn offset_of(&self, page_id: PageId) -> u64 {
        page_id * self.page_size as u64
    }

    fn check_bounds(&self, page_id: PageId) -> Result<(), SegmentError> {
        if page_id == NULL_PAGE_ID || page_id >= self.total_pages {
            return Err(SegmentError::PageOutOfBounds {
                page_id,
                total_pages: self.total_pages,
            });
        }
        Ok(())
    }

    fn write_header(&mut self) -> Result<(), SegmentError> {
        self.scratch.fill(0);
        PageHeader {
            page_type: PageType::SegmentHeader,
            flags: 0,
            checksum: 0,
        }
        .write_to(&mut self.scratch);
        self.scratch[offsets::MAGIC..offsets::MAGIC + 8].copy_from_slice(&MAGIC);
        write_u32(&mut self.scratch, offsets::FORMAT_VERSION, FORMAT_VERSION);
        write_u32(&mut self.scratch, offsets::PAGE_SIZE, self.page_size as u32);
        write_u64(&mut self.scratch, offsets::TOTAL_PAGES, self.total_pages);
        write_u64(&mut self.scratch, offsets::FREE_LIST_HEAD, self.free_list_head);
        write_u64(&mut self.scratch, offsets::ALLOCATED_PAGES, self.allocated_pages);
        stamp_checksum(&mut self.scratch);

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.scratch)?;
        Ok(())
    }

    fn read_raw(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<(), SegmentError> {
        self.file.seek(SeekFrom::Start(self.offset_of(page_id)))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_scratch(&mut self, page_id: PageId) -> Result<(), SegmentError> {
        self.file.seek(SeekFrom::Start(self.offset_of(page_id)))?;
        self.file.write_all(&self.scratch)?;
        Ok(())
    }
}

impl Segment for FileSegment {
    fn usable_page_size(&self) -> usize {
        self.page_size
    }

    fn allocate_page(&mut self) -> Result<PageId, SegmentError> {
        let page_id = if self.free_list_head == NULL_PAGE_ID {
            let page_id = self.total_pages;
            self.total_pages += 1;
            self.file.set_len(self.total_pages * self.page_size as u64)?;
            page_id
        } else {
            let page_id = self.free_list_head;
            let mut free = vec![0u8; self.page_size];
            self.read_raw(page_id, &mut free)?;
            self.free_list_head = read_u64(&free, offsets::FREE_NEXT);
            // Reused pages must read back as never written.
            self.scratch.fill(0);
            self.write_scratch(page_id)?;
            page_id
        };
        self.allocated_pages += 1;
        self.write_header()?;
        tracing::trace!(page_id, "allocated page");
        Ok(page_id)
    }

    fn deallocate_page(&mut self, page_id: PageId) -> Result<(), SegmentError> {
        self.check_bounds(page_id)?;
        let mut current = [0u8; PageHeader::SIZE];
        self.read_raw(page_id, &mut current)?;
        if current[0] == PageType::Free as u8 {
            return Err(SegmentError::PageNotAllocated(page_id));
        }

        self.scratch.fill(0);
        PageHeader {
            page_type: PageType::Free,
            flags: 0,
            checksum: 0,
        }
        .write_to(&mut self.scratch);
        write_u64(&mut self.scratch, offsets::FREE_NEXT, self.free_list_head);
        stamp_checksum(&mut self.scratch);
        self.write_scratch(page_id)?;

        self.free_list_head = page_id;
        self.allocated_pages -= 1;
        self.write_header()?;
        tracing::trace!(page_id, "deallocated page");
        Ok(())
    }

    fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<(), SegmentError> {
        self.check_bounds(page_id)?;
        self.read_raw(page_id, buf)?;

        match PageType::try_from(buf[0]) {
            Ok(PageType::Unused) => return Ok(()),
            Ok(PageType::Free) => return Err(SegmentError::PageNotAllocated(page_id)),
            _ => {}
        }
        let expected = read_u32(buf, 2);
        let actual = compute_checksum(buf);
        if expected != actual {
            tracing::warn!(page_id, expected, actual, "page checksum mismatch");
            return Err(SegmentError::ChecksumMismatch {
                page_id,
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, buf: &[u8]) -> Result<(), SegmentError> {
        self.check_bounds(page_id)?;
        self.scratch.copy_from_slice(buf);
        stamp_checksum(&mut self.scratch);
        self.write_scratch(page_id)
    }

    fn sync(&mut self) -> Result<(), SegmentError> {
        self.write_header()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn allocated_page_count(&self) -> u64 {
        self.allocated_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const PAGE: usize = 512;

    fn node_image(fill: u8) -> Vec<u8> {
        let mut buf = vec![fill; PAGE];
        PageHeader {
            page_type: PageType::BTreeNode,
            flags: 0,
            checksum: 0,
        }
        .write_to(&mut buf);
        buf
    }

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.seg");

        {
            let segment = FileSegment::create(&path, PAGE).expect("create segment");
            assert_eq!(segment.total_pages(), 1);
            assert_eq!(segment.allocated_page_count(), 0);
        }

        let segment = FileSegment::open(&path).expect("open segment");
        assert_eq!(segment.usable_page_size(), PAGE);
        assert_eq!(segment.total_pages(), 1);
    }

    #[test]
    fn test_create_already_exists() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.seg");
        fs::write(&path, b"existing").expect("write file");

        let result = FileSegment::create(&path, PAGE);
        assert!(matches!(result, Err(SegmentError::AlreadyExists(_))));
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.seg");
        fs::write(&path, vec![0xAB; PAGE]).expect("write file");

        let result = FileSegment::open(&path);
        assert!(matches!(result, Err(SegmentError::InvalidHeader(_))));
    }

    #[test]
    fn test_page_data_persistence() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.seg");

        let page_id = {
            let mut segment = FileSegment::create(&path, PAGE).expect("create segment");
            let page_id = segment.allocate_page().expect("allocate");
            assert_eq!(page_id, 1);

            let mut fresh = vec![0xFFu8; PAGE];
            segment.read_page(page_id, &mut fresh).expect("read fresh");
            assert!(fresh.iter().all(|&b| b == 0));

            segment.write_page(page_id, &node_image(0x5A)).expect("write");
            segment.sync().expect("sync");
            page_id
        };

        let mut segment = FileSegment::open(&path).expect("reopen");
        assert_eq!(segment.allocated_page_count(), 1);
        let mut buf = vec![0u8; PAGE];
        segment.read_page(page_id, &mut buf).expect("read back");
        assert_eq!(buf[100], 0x5A);
        assert_eq!(buf[0], PageType::BTreeNode as u8);
    }

    #[test]
    fn test_free_list_reuse_survives_reopen() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.seg");

        {
            let mut segment = FileSegment::create(&path, PAGE).expect("create segment");
            let a = segment.allocate_page().expect("a");
            let b = segment.allocate_page().expect("b");
            segment.write_page(b, &node_image(1)).expect("write b");
            segment.deallocate_page(a).expect("free a");
            segment.deallocate_page(b).expect("free b");
            assert_eq!(segment.allocated_page_count(), 0);
            assert!(matches!(
                segment.deallocate_page(b),
                Err(SegmentError::PageNotAllocated(_))
            ));
            segment.sync().expect("sync");
        }

        let mut segment = FileSegment::open(&path).expect("reopen");
        assert_eq!(segment.allocate_page().expect("reuse b"), 2);
        assert_eq!(segment.allocate_page().expect("reuse a"), 1);
        assert_eq!(segment.allocate_page().expect("extend"), 3);
        assert_eq!(segment.total_pages(), 4);

        let mut buf = vec![0xFFu8; PAGE];
        segment.read_page(2, &mut buf).expect("reused page reads as zeros");
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.seg");

        let mut segment = FileSegment::create(&path, PAGE).expect("create segment");
        let page_id = segment.allocate_page().expect("allocate");
        segment.write_page(page_id, &node_image(7)).expect("write");
        segment.sync().expect("sync");

        // Corrupt one byte in the middle of the page.
        let mut raw = fs::read(&path).expect("read file");
        raw[PAGE + 200] ^= 0xFF;
        fs::write(&path, raw).expect("write file");

        let mut segment = FileSegment::open(&path).expect("reopen");
        let mut buf = vec![0u8; PAGE];
        let result = segment.read_page(page_id, &mut buf);
        assert!(matches!(
            result,
            Err(SegmentError::ChecksumMismatch { page_id: 1, .. })
        ));
    }

    #[test]
    fn test_page_out_of_bounds() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.seg");
        let mut segment = FileSegment::create(&path, PAGE).expect("create segment");

        let mut buf = vec![0u8; PAGE];
        assert!(matches!(
            segment.read_page(100, &mut buf),
            Err(SegmentError::PageOutOfBounds { .. })
        ));
        assert!(matches!(
            segment.write_page(NULL_PAGE_ID, &buf),
            Err(SegmentError::PageOutOfBounds { .. })
        ));
    }
}

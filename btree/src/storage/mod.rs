//! Page storage collaborators of the B-tree.
//!
//! - [`Segment`]: allocates page ids and persists page images
//!   ([`MemorySegment`] for tests and scratch trees, [`FileSegment`] for a
//!   single checksummed file)
//! - [`PageCache`]: maps pages into pooled buffers and hands out shared or
//!   exclusive [`PageGuard`]s
//!
//! # File Format
//!
//! - Page 0: segment header (magic, version, page size, page count,
//!   free-list head, allocated count)
//! - Pages 1-N: B-tree nodes and free pages
//!
//! # Usage
//!
//! ```ignore
//! let segment = FileSegment::create(path, 8192)?;
//! let cache = PageCache::new(Box::new(segment), 1024);
//!
//! let mut page = cache.allocate_page()?;
//! page.data_mut()[100] = 1;
//! drop(page);
//!
//! cache.flush_all()?;
//! ```

mod buffer_pool;
mod cache;
mod file;
mod page;
mod segment;

pub use buffer_pool::BufferPool;
pub use cache::{CacheError, LockMode, PageCache, PageGuard};
pub use file::FileSegment;
pub use page::{
    NULL_PAGE_ID, Page, PageError, PageHeader, PageId, PageType, compute_checksum, read_u16,
    read_u32, read_u64, stamp_checksum, write_u16, write_u32, write_u64,
};
pub use segment::{MemorySegment, Segment, SegmentError};

//! Buffer pool for pre-allocated page buffers.
//!
//! The buffer pool reduces memory allocation overhead by maintaining a fixed
//! pool of page buffers that are leased out and returned automatically.
//!
//! # Design
//!
//! - Pre-allocates all buffers at construction time
//! - Uses a free list (Vec) for O(1) lease/return
//! - Returns buffers automatically via RAII (Drop trait on Page)
//! - Thread-safe: uses Mutex for internal synchronization
//!
//! # Invariants
//!
//! - Pool capacity and buffer size are fixed after construction
//! - Free list size + leased count == capacity

use std::sync::Arc;

use parking_lot::Mutex;

use crate::storage::page::Page;

/// A buffer pool that pre-allocates page buffers.
///
/// # Invariants
/// - `free_list.len() + leased_count == capacity`
/// - every buffer is exactly `page_size` bytes
pub struct BufferPool {
    /// Free buffers available for leasing.
    free_list: Mutex<Vec<Box<[u8]>>>,
    /// Size of every buffer in bytes.
    page_size: usize,
    /// Total capacity (for assertions).
    capacity: usize,
}

impl BufferPool {
    /// Create a new buffer pool of `capacity` buffers of `page_size` bytes.
    ///
    /// # Panics
    /// Panics if capacity or page size is 0.
    #[must_use]
    pub fn new(page_size: usize, capacity: usize) -> Arc<Self> {
        assert!(capacity > 0, "Buffer pool capacity must be positive");
        assert!(page_size > 0, "Buffer pool page size must be positive");

        let free_list = (0..capacity)
            .map(|_| vec![0u8; page_size].into_boxed_slice())
            .collect();

        Arc::new(Self {
            free_list: Mutex::new(free_list),
            page_size,
            capacity,
        })
    }

    /// Lease a buffer from the pool.
    ///
    /// Returns `None` if the pool is exhausted. Buffer contents are
    /// undefined (may contain stale data).
    pub fn lease(&self) -> Option<Box<[u8]>> {
        self.free_list.lock().pop()
    }

    /// Lease a zeroed buffer from the pool.
    pub fn lease_zeroed(&self) -> Option<Box<[u8]>> {
        let mut buffer = self.lease()?;
        buffer.fill(0);
        Some(buffer)
    }

    /// Lease a page from the pool.
    pub fn lease_page(self: &Arc<Self>) -> Option<Page> {
        let buffer = self.lease()?;
        Some(Page::from_pool(buffer, Arc::clone(self)))
    }

    /// Lease a zeroed page from the pool.
    pub fn lease_page_zeroed(self: &Arc<Self>) -> Option<Page> {
        let buffer = self.lease_zeroed()?;
        Some(Page::from_pool(buffer, Arc::clone(self)))
    }

    /// Return a buffer to the pool.
    ///
    /// # Panics
    /// Panics if returning would exceed capacity or the buffer has the
    /// wrong size (both indicate a bug).
    pub fn return_buffer(&self, buffer: Box<[u8]>) {
        assert_eq!(
            buffer.len(),
            self.page_size,
            "Buffer pool size mismatch: foreign buffer returned"
        );
        let mut free_list = self.free_list.lock();
        assert!(
            free_list.len() < self.capacity,
            "Buffer pool overflow: returning buffer to full pool"
        );
        free_list.push(buffer);
    }

    /// Get the number of available buffers.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Get the total capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of each buffer in bytes.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }
}

//! Page cache and page-locking service.
//!
//! The cache maps page ids to in-memory frames backed by a [`BufferPool`].
//! Callers lock a page in shared or exclusive mode and receive a
//! [`PageGuard`]; the lock is released when the guard is dropped.
//!
//! # Locking
//!
//! Lock order is: frame map, then segment. Page latches are never awaited
//! while the frame map is held, so a thread blocked on a page latch never
//! stalls unrelated cache lookups.
//!
//! # Eviction
//!
//! When the buffer pool runs dry, a frame that nobody references (no guard
//! and no in-flight lookup) is chosen as a victim, preferring clean frames.
//! Dirty victims are written back first. If every frame is referenced the
//! request fails with [`CacheError::Exhausted`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};

use crate::config::StorageConfig;
use crate::storage::buffer_pool::BufferPool;
use crate::storage::page::{Page, PageId};
use crate::storage::segment::{Segment, SegmentError};

/// How a page should be locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared lock, blocking until available.
    Shared,
    /// Exclusive lock, blocking until available.
    Exclusive,
    /// Shared lock, or `None` if it would block.
    SharedNoWait,
    /// Exclusive lock, or `None` if it would block.
    ExclusiveNoWait,
}

impl LockMode {
    /// Whether this mode grants write access.
    #[must_use]
    pub const fn is_exclusive(self) -> bool {
        matches!(self, Self::Exclusive | Self::ExclusiveNoWait)
    }
}

/// Errors that can occur during cache operations.
#[derive(Debug)]
pub enum CacheError {
    /// The underlying segment failed.
    Segment(SegmentError),
    /// Every frame is locked; nothing can be evicted.
    Exhausted { capacity: usize },
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Segment(e) => write!(f, "segment error: {e}"),
            Self::Exhausted { capacity } => {
                write!(f, "page cache exhausted: all {capacity} frames are in use")
            }
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Segment(e) => Some(e),
            Self::Exhausted { .. } => None,
        }
    }
}

impl From<SegmentError> for CacheError {
    fn from(e: SegmentError) -> Self {
        Self::Segment(e)
    }
}

/// A cached page.
#[derive(Clone)]
struct Frame {
    latch: Arc<RwLock<Page>>,
    dirty: Arc<AtomicBool>,
}

impl Frame {
    fn is_referenced(&self) -> bool {
        Arc::strong_count(&self.latch) > 1
    }
}

enum GuardInner {
    Shared(ArcRwLockReadGuard<RawRwLock, Page>),
    Exclusive(ArcRwLockWriteGuard<RawRwLock, Page>),
}

/// A locked page. The lock is released on drop.
pub struct PageGuard {
    page_id: PageId,
    inner: GuardInner,
}

impl PageGuard {
    /// Id of the locked page.
    #[must_use]
    pub const fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Whether the guard holds the page exclusively.
    #[must_use]
    pub const fn is_exclusive(&self) -> bool {
        matches!(self.inner, GuardInner::Exclusive(_))
    }

    /// Page contents.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        match &self.inner {
            GuardInner::Shared(guard) => guard.as_bytes(),
            GuardInner::Exclusive(guard) => guard.as_bytes(),
        }
    }

    /// Mutable page contents.
    ///
    /// # Panics
    /// Panics if the page is only share-locked.
    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.inner {
            GuardInner::Exclusive(guard) => guard.as_bytes_mut(),
            GuardInner::Shared(_) => {
                panic!("page {} is not locked exclusively", self.page_id)
            }
        }
    }

    /// Exchange this page's contents with `other`.
    ///
    /// Used to publish a page rebuilt in a scratch buffer without copying.
    ///
    /// # Panics
    /// Panics if the page is only share-locked or the sizes differ.
    pub fn swap_buffers(&mut self, other: &mut Page) {
        match &mut self.inner {
            GuardInner::Exclusive(guard) => guard.swap_contents(other),
            GuardInner::Shared(_) => {
                panic!("page {} is not locked exclusively", self.page_id)
            }
        }
    }

    /// Exchange the contents of two exclusively locked pages.
    pub fn swap_with(&mut self, other: &mut Self) {
        let (GuardInner::Exclusive(a), GuardInner::Exclusive(b)) =
            (&mut self.inner, &mut other.inner)
        else {
            panic!(
                "pages {} and {} must both be locked exclusively",
                self.page_id, other.page_id
            );
        };
        a.swap_contents(b);
    }

    /// Release the lock.
    pub fn unlock(self) {
        drop(self);
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("exclusive", &self.is_exclusive())
            .finish()
    }
}

/// The page cache.
pub struct PageCache {
    segment: Mutex<Box<dyn Segment>>,
    pool: Arc<BufferPool>,
    frames: Mutex<HashMap<PageId, Frame>>,
    page_size: usize,
}

impl PageCache {
    /// Create a cache of `capacity` frames over `segment`.
    #[must_use]
    pub fn new(segment: Box<dyn Segment>, capacity: usize) -> Self {
        let page_size = segment.usable_page_size();
        Self {
            segment: Mutex::new(segment),
            pool: BufferPool::new(page_size, capacity),
            frames: Mutex::new(HashMap::with_capacity(capacity)),
            page_size,
        }
    }

    /// Create a cache sized by `config`.
    ///
    /// # Panics
    /// Panics if the segment page size differs from the configured one.
    #[must_use]
    pub fn with_config(segment: Box<dyn Segment>, config: &StorageConfig) -> Self {
        assert_eq!(
            segment.usable_page_size(),
            config.page_size,
            "segment page size does not match configuration"
        );
        Self::new(segment, config.cache_capacity)
    }

    /// Bytes available in each page.
    #[must_use]
    pub const fn usable_page_size(&self) -> usize {
        self.page_size
    }

    /// Number of frames that can be cached at once.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Number of pages currently cached.
    #[must_use]
    pub fn cached_page_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Number of pages allocated in the underlying segment.
    #[must_use]
    pub fn allocated_page_count(&self) -> u64 {
        self.segment.lock().allocated_page_count()
    }

    /// Whether `page_id` is cached with unflushed changes.
    #[must_use]
    pub fn is_dirty(&self, page_id: PageId) -> bool {
        self.frames
            .lock()
            .get(&page_id)
            .is_some_and(|frame| frame.dirty.load(Ordering::Acquire))
    }

    /// A zeroed page buffer that is not part of the cache.
    #[must_use]
    pub fn scratch_page(&self) -> Page {
        Page::new(self.page_size)
    }

    /// Lock a page.
    ///
    /// If the page is not cached it is read from the segment when
    /// `read_if_unmapped` is set, otherwise mapped as zeros. The `NoWait`
    /// modes return `Ok(None)` when the lock is held in a conflicting mode.
    pub fn lock_page(
        &self,
        page_id: PageId,
        mode: LockMode,
        read_if_unmapped: bool,
    ) -> Result<Option<PageGuard>, CacheError> {
        let frame = self.frame(page_id, read_if_unmapped)?;
        let inner = match mode {
            LockMode::Shared => GuardInner::Shared(frame.latch.read_arc()),
            LockMode::Exclusive => GuardInner::Exclusive(frame.latch.write_arc()),
            LockMode::SharedNoWait => {
                let Some(guard) = frame.latch.try_read_arc() else {
                    return Ok(None);
                };
                GuardInner::Shared(guard)
            }
            LockMode::ExclusiveNoWait => {
                let Some(guard) = frame.latch.try_write_arc() else {
                    return Ok(None);
                };
                GuardInner::Exclusive(guard)
            }
        };
        if mode.is_exclusive() {
            frame.dirty.store(true, Ordering::Release);
        }
        Ok(Some(PageGuard { page_id, inner }))
    }

    /// Lock a page in shared mode, blocking.
    pub fn read_page(&self, page_id: PageId) -> Result<PageGuard, CacheError> {
        let frame = self.frame(page_id, true)?;
        Ok(PageGuard {
            page_id,
            inner: GuardInner::Shared(frame.latch.read_arc()),
        })
    }

    /// Lock a page in exclusive mode, blocking.
    pub fn write_page(&self, page_id: PageId) -> Result<PageGuard, CacheError> {
        let frame = self.frame(page_id, true)?;
        let guard = frame.latch.write_arc();
        frame.dirty.store(true, Ordering::Release);
        Ok(PageGuard {
            page_id,
            inner: GuardInner::Exclusive(guard),
        })
    }

    /// Allocate a new page and return it exclusively locked and zeroed.
    pub fn allocate_page(&self) -> Result<PageGuard, CacheError> {
        let page_id = self.segment.lock().allocate_page()?;
        let frame = self.frame(page_id, false)?;
        let mut guard = frame.latch.write_arc();
        guard.as_bytes_mut().fill(0);
        frame.dirty.store(true, Ordering::Release);
        tracing::trace!(page_id, "allocated page");
        Ok(PageGuard {
            page_id,
            inner: GuardInner::Exclusive(guard),
        })
    }

    /// Free a page. Any cached image is dropped without write-back.
    ///
    /// The caller must not hold a guard on the page.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<(), CacheError> {
        let mut frames = self.frames.lock();
        frames.remove(&page_id);
        self.segment.lock().deallocate_page(page_id)?;
        tracing::trace!(page_id, "deallocated page");
        Ok(())
    }

    /// Drop a page from the cache without writing it back.
    pub fn discard_page(&self, page_id: PageId) {
        if self.frames.lock().remove(&page_id).is_some() {
            tracing::trace!(page_id, "discarded page");
        }
    }

    /// Load a page into the cache without locking it.
    pub fn prefetch_page(&self, page_id: PageId) -> Result<(), CacheError> {
        self.frame(page_id, true).map(drop)
    }

    /// Load several pages into the cache.
    pub fn prefetch_batch(&self, page_ids: &[PageId]) -> Result<(), CacheError> {
        page_ids
            .iter()
            .try_for_each(|&page_id| self.prefetch_page(page_id))
    }

    /// Write a page back to the segment if it is dirty.
    ///
    /// Blocks while another thread holds the page exclusively; the caller
    /// must not hold an exclusive guard on it.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), CacheError> {
        let frame = self.frames.lock().get(&page_id).cloned();
        if let Some(frame) = frame {
            self.write_back(page_id, &frame)?;
        }
        Ok(())
    }

    /// Write every dirty page back and sync the segment.
    pub fn flush_all(&self) -> Result<(), CacheError> {
        let frames: Vec<(PageId, Frame)> = self
            .frames
            .lock()
            .iter()
            .map(|(&page_id, frame)| (page_id, frame.clone()))
            .collect();
        for (page_id, frame) in &frames {
            self.write_back(*page_id, frame)?;
        }
        self.segment.lock().sync()?;
        tracing::debug!(pages = frames.len(), "flushed page cache");
        Ok(())
    }

    fn write_back(&self, page_id: PageId, frame: &Frame) -> Result<(), CacheError> {
        let page = frame.latch.read();
        if frame.dirty.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.segment.lock().write_page(page_id, page.as_bytes()) {
                frame.dirty.store(true, Ordering::Release);
                return Err(e.into());
            }
            tracing::trace!(page_id, "flushed page");
        }
        Ok(())
    }

    /// Find or load the frame for `page_id`.
    fn frame(&self, page_id: PageId, read_if_unmapped: bool) -> Result<Frame, CacheError> {
        let mut frames = self.frames.lock();
        if let Some(frame) = frames.get(&page_id) {
            return Ok(frame.clone());
        }

        if self.pool.available() == 0 {
            self.evict_one(&mut frames)?;
        }
        let mut page = self.pool.lease_page().ok_or(CacheError::Exhausted {
            capacity: self.pool.capacity(),
        })?;
        if read_if_unmapped {
            self.segment
                .lock()
                .read_page(page_id, page.as_bytes_mut())?;
            tracing::trace!(page_id, "loaded page");
        } else {
            page.as_bytes_mut().fill(0);
        }

        let frame = Frame {
            latch: Arc::new(RwLock::new(page)),
            dirty: Arc::new(AtomicBool::new(false)),
        };
        frames.insert(page_id, frame.clone());
        Ok(frame)
    }

    fn evict_one(&self, frames: &mut HashMap<PageId, Frame>) -> Result<(), CacheError> {
        let victim = frames
            .iter()
            .filter(|(_, frame)| !frame.is_referenced())
            .min_by_key(|(_, frame)| frame.dirty.load(Ordering::Acquire))
            .map(|(&page_id, _)| page_id);
        let Some(page_id) = victim else {
            tracing::warn!(capacity = self.pool.capacity(), "page cache exhausted");
            return Err(CacheError::Exhausted {
                capacity: self.pool.capacity(),
            });
        };

        let Some(frame) = frames.remove(&page_id) else {
            return Ok(());
        };
        if frame.dirty.load(Ordering::Acquire) {
            let page = frame.latch.read();
            if let Err(e) = self.segment.lock().write_page(page_id, page.as_bytes()) {
                drop(page);
                frames.insert(page_id, frame);
                return Err(e.into());
            }
        }
        tracing::trace!(page_id, "evicted page");
        Ok(())
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("page_size", &self.page_size)
            .field("capacity", &self.pool.capacity())
            .field("cached", &self.cached_page_count())
            .finish_non_exhaustive()
    }
}

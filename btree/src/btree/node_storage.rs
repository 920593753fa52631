//! Physical entry storage inside a node page.
//!
//! A [`NodeStorage`] owns the data region after the node header. It knows
//! where the entry in each slot lives and how to make or reclaim room for
//! one, but nothing about keys or ordering; that is layered on top by
//! [`super::keyed::KeyedNodeAccessor`].

use crate::tuple::TupleAccessor;

/// Whether a new entry fits in a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// There is enough contiguous free space.
    CanFit,
    /// There is enough free space, but only after compacting the node.
    CanFitWithCompaction,
    /// The node is too full; it must be split.
    CanNotFit,
}

/// A strategy for laying out entries in the data region of a node.
///
/// Every method takes the whole page as `node`; the page size is
/// `node.len()`.
///
/// # Invariants
///
/// Between operations, `cb_total_free` plus the bytes consumed by all
/// entries (including per-entry overhead) equals the size of the data
/// region.
///
/// # Panics
///
/// Slot indices out of range are contract violations and panic.
pub trait NodeStorage: Send + Sync + std::fmt::Debug {
    /// Whether every entry has the same size.
    fn has_fixed_width_entries(&self) -> bool;

    /// Bytes consumed by an entry holding a `cb_tuple`-byte image,
    /// including storage overhead.
    fn entry_byte_count(&self, cb_tuple: usize) -> usize;

    /// Reset `node` to an empty node of the given height.
    fn clear_node(&self, node: &mut [u8], height: u32);

    /// Offset of the entry in `slot`, relative to the start of the page.
    fn entry_offset(&self, node: &[u8], slot: usize) -> usize;

    /// Open a new slot at `slot` for a `cb_tuple`-byte image and return
    /// its offset. Entries at `slot..` move up by one.
    ///
    /// # Pre-conditions
    /// - `calculate_capacity(node, cb_tuple)` is [`Capacity::CanFit`]
    fn allocate_entry(&self, node: &mut [u8], slot: usize, cb_tuple: usize) -> usize;

    /// Remove the entry in `slot`. Entries after it move down by one.
    fn deallocate_entry(&self, node: &mut [u8], slot: usize, tuple: &TupleAccessor);

    /// Whether a `cb_tuple`-byte image can be added to `node`.
    fn calculate_capacity(&self, node: &[u8], cb_tuple: usize) -> Capacity;

    /// Rewrite the entries of `src` into `dest` with all free space
    /// contiguous. `dest` keeps the height and right sibling of `src`.
    fn compact_node(&self, src: &[u8], dest: &mut [u8], tuple: &TupleAccessor);
}

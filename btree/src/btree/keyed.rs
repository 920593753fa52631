//! Key-aware node access.
//!
//! [`KeyedNodeAccessor`] combines a [`NodeStorage`] strategy with a
//! [`KeyAccess`] kind and exposes the result through the object-safe
//! [`NodeAccessor`] trait. A tree picks one accessor for its leaves and
//! one for its internal nodes when it is opened.

use std::cmp::Ordering;
use std::fmt;

use crate::btree::node::{self, NodeHeader, n_entries};
use crate::btree::node_storage::{Capacity, NodeStorage};
use crate::storage::PageId;
use crate::tuple::{
    TupleAccessor, TupleData, TupleDescriptor, TuplePrinter, TupleProjection,
    TupleProjectionAccessor,
};

/// Which of several equal keys a search lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupSeek {
    /// Whichever match the bisection reaches first.
    Any,
    /// The first of a run of equal keys.
    Begin,
    /// One past the last of a run of equal keys.
    End,
}

/// How the key of a stored entry is read.
pub trait KeyAccess: Send + Sync + fmt::Debug {
    /// Unmarshal the key of the image `entry` into `key`.
    fn unmarshal_key<'a>(&self, tuple: &TupleAccessor, entry: &'a [u8], key: &mut TupleData<'a>);
}

/// The key is the entire stored tuple.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeTupleKey;

impl KeyAccess for WholeTupleKey {
    fn unmarshal_key<'a>(&self, tuple: &TupleAccessor, entry: &'a [u8], key: &mut TupleData<'a>) {
        tuple.unmarshal_into(entry, key);
    }
}

/// The key is a projection of the stored tuple.
#[derive(Debug, Clone)]
pub struct ProjectedKey {
    projection: TupleProjectionAccessor,
}

impl ProjectedKey {
    #[must_use]
    pub fn new(tuple: &TupleAccessor, projection: &TupleProjection) -> Self {
        Self {
            projection: TupleProjectionAccessor::new(tuple, projection),
        }
    }
}

impl KeyAccess for ProjectedKey {
    fn unmarshal_key<'a>(&self, _tuple: &TupleAccessor, entry: &'a [u8], key: &mut TupleData<'a>) {
        self.projection.unmarshal_into(entry, key);
    }
}

/// Entry-level access to a node page, in key order.
///
/// Methods take the page explicitly; an accessor holds no per-page state
/// and is shared by every thread using the tree.
pub trait NodeAccessor: Send + Sync + fmt::Debug {
    /// Shape of the stored tuples.
    fn tuple_descriptor(&self) -> &TupleDescriptor;

    fn tuple_accessor(&self) -> &TupleAccessor;

    /// Shape of the keys that order the entries.
    fn key_descriptor(&self) -> &TupleDescriptor;

    fn has_fixed_width_entries(&self) -> bool;

    /// Bytes consumed in the node by a `cb_tuple`-byte image.
    fn entry_byte_count(&self, cb_tuple: usize) -> usize;

    /// Reset `node` to an empty node of the given height.
    fn clear_node(&self, node: &mut [u8], height: u32);

    /// Byte offset of the image in `slot`.
    fn entry_offset(&self, node: &[u8], slot: usize) -> usize;

    /// The stored image in `slot`.
    fn entry<'a>(&self, node: &'a [u8], slot: usize) -> &'a [u8];

    /// Unmarshal the key of the entry in `slot` into `key`.
    fn unmarshal_key<'a>(&self, node: &'a [u8], slot: usize, key: &mut TupleData<'a>);

    fn calculate_capacity(&self, node: &[u8], cb_tuple: usize) -> Capacity;

    /// Open room for a `cb_tuple`-byte image at `slot`; returns its offset.
    fn allocate_entry(&self, node: &mut [u8], slot: usize, cb_tuple: usize) -> usize;

    fn deallocate_entry(&self, node: &mut [u8], slot: usize);

    /// Rewrite `src` into `dest` with contiguous free space.
    fn compact_node(&self, src: &[u8], dest: &mut [u8]);

    /// Unmarshal the whole tuple in `slot`.
    fn tuple<'a>(&self, node: &'a [u8], slot: usize) -> TupleData<'a> {
        self.tuple_accessor().unmarshal(self.entry(node, slot))
    }

    /// The key of the entry in `slot`.
    fn key<'a>(&self, node: &'a [u8], slot: usize) -> TupleData<'a> {
        let mut key = TupleData::with_capacity(self.key_descriptor().len());
        self.unmarshal_key(node, slot, &mut key);
        key
    }

    /// Marshal `data` into a new entry at `slot`.
    ///
    /// # Pre-conditions
    /// - the entry fits without compaction
    fn insert_tuple(&self, node: &mut [u8], slot: usize, data: &TupleData<'_>) {
        let cb_tuple = self.tuple_accessor().byte_count(data);
        let offset = self.allocate_entry(node, slot, cb_tuple);
        self.tuple_accessor()
            .marshal(data, &mut node[offset..offset + cb_tuple]);
    }

    /// Copy an already marshalled image into a new entry at `slot`.
    fn insert_image(&self, node: &mut [u8], slot: usize, image: &[u8]) {
        let offset = self.allocate_entry(node, slot, image.len());
        node[offset..offset + image.len()].copy_from_slice(image);
    }

    /// Bisect the entries of `node` for `key`.
    ///
    /// Returns the slot and whether an equal key was seen. On a miss the
    /// slot is where `key` would be inserted; with `least_upper` unset it
    /// steps back to the greatest key below `key` (slot 0 if there is
    /// none), so it is always a valid slot of a non-empty node.
    ///
    /// Keys are compared over the attributes both tuples have, so a
    /// shorter `key` searches by prefix.
    ///
    /// The sole entry of an internal node covers every key above it too,
    /// so a search there always lands on slot 0.
    fn binary_search(
        &self,
        node: &[u8],
        key: &TupleData<'_>,
        dup_seek: DupSeek,
        least_upper: bool,
    ) -> (usize, bool) {
        let key_descriptor = self.key_descriptor();
        let mut lower = 0;
        let mut upper = n_entries(node);
        let mut found = false;
        let mut probe = TupleData::with_capacity(key_descriptor.len());
        while lower < upper {
            let mid = lower + (upper - lower) / 2;
            self.unmarshal_key(node, mid, &mut probe);
            let mut ordering = key_descriptor.compare_tuples(key, &probe);
            if ordering == Ordering::Equal {
                found = true;
                ordering = match dup_seek {
                    DupSeek::Any => return (mid, true),
                    DupSeek::Begin => Ordering::Less,
                    DupSeek::End => Ordering::Greater,
                };
            }
            if ordering == Ordering::Less {
                upper = mid;
            } else {
                lower = mid + 1;
            }
        }
        if !found && !least_upper && lower > 0 {
            lower -= 1;
        }
        if lower == 1 && n_entries(node) == 1 && !node::is_leaf(node) {
            lower = 0;
        }
        (lower, found)
    }

    /// Compare `key` with the first key of `node`; `Less` if it is empty.
    fn compare_first_key(&self, node: &[u8], key: &TupleData<'_>) -> Ordering {
        if n_entries(node) == 0 {
            return Ordering::Less;
        }
        self.key_descriptor()
            .compare_tuples(key, &self.key(node, 0))
    }

    /// Move the upper part of the full node `left` into the empty node
    /// `right` to make room for a new `cb_new_tuple`-byte entry that
    /// belongs at `new_slot` of `left`.
    ///
    /// The split point balances bytes so that the new entry fits on
    /// whichever side it lands; both sides keep at least one existing
    /// entry. In `monotonic` mode an append moves nothing, leaving `left`
    /// full and `right` empty for the new entry.
    ///
    /// Returns the number of entries left in `left`.
    fn split_node(
        &self,
        left: &mut [u8],
        right: &mut [u8],
        new_slot: usize,
        cb_new_tuple: usize,
        monotonic: bool,
    ) -> usize {
        let n = n_entries(left);
        assert_eq!(n_entries(right), 0, "split target must be empty");
        let keep = if monotonic && new_slot == n {
            n
        } else {
            let sizes: Vec<usize> = (0..n)
                .map(|slot| self.entry_byte_count(self.entry(left, slot).len()))
                .collect();
            split_point(&sizes, new_slot, self.entry_byte_count(cb_new_tuple))
        };
        for slot in keep..n {
            self.insert_image(right, slot - keep, self.entry(left, slot));
        }
        for slot in (keep..n).rev() {
            self.deallocate_entry(left, slot);
        }
        keep
    }

    /// Write a human-readable rendering of `node` to `out`.
    fn dump_node(&self, out: &mut dyn fmt::Write, node: &[u8], page_id: PageId) -> fmt::Result {
        let header = NodeHeader::read_from(node);
        writeln!(
            out,
            "page {page_id}: height {} entries {} total free {} compact free {} right sibling {}",
            header.height,
            header.n_entries,
            header.cb_total_free,
            header.cb_compact_free,
            header.right_sibling
        )?;
        for slot in 0..header.n_entries {
            let entry = self.entry(node, slot);
            writeln!(
                out,
                "  [{slot}] {} bytes {}",
                entry.len(),
                TuplePrinter::new(self.tuple_descriptor(), &self.tuple(node, slot))
            )?;
        }
        Ok(())
    }
}

/// Number of existing entries to keep on the left when splitting entries
/// of `sizes` with a new entry of `new_size` going in at `new_slot`.
///
/// The entry that crosses the byte midpoint of the combined sequence goes
/// to whichever side is lighter without it, which bounds both sides by
/// `(total + largest entry) / 2`.
fn split_point(sizes: &[usize], new_slot: usize, new_size: usize) -> usize {
    let n = sizes.len();
    debug_assert!(n >= 2, "a full node holds at least two entries");
    let combined: Vec<usize> = sizes[..new_slot]
        .iter()
        .copied()
        .chain(std::iter::once(new_size))
        .chain(sizes[new_slot..].iter().copied())
        .collect();
    let total: usize = combined.iter().sum();

    let mut before = 0;
    let mut left_len = combined.len();
    for (i, &size) in combined.iter().enumerate() {
        if (before + size) * 2 >= total {
            let after = total - before - size;
            left_len = if before <= after { i + 1 } else { i };
            break;
        }
        before += size;
    }

    let keep = if new_slot < left_len {
        left_len - 1
    } else {
        left_len
    };
    keep.clamp(1, n - 1)
}

/// A [`NodeAccessor`] built from a storage strategy and a key kind.
#[derive(Debug)]
pub struct KeyedNodeAccessor<S, K> {
    storage: S,
    key_access: K,
    tuple_descriptor: TupleDescriptor,
    tuple_accessor: TupleAccessor,
    key_descriptor: TupleDescriptor,
}

impl<S: NodeStorage, K: KeyAccess> KeyedNodeAccessor<S, K> {
    #[must_use]
    pub const fn new(
        storage: S,
        key_access: K,
        tuple_descriptor: TupleDescriptor,
        tuple_accessor: TupleAccessor,
        key_descriptor: TupleDescriptor,
    ) -> Self {
        Self {
            storage,
            key_access,
            tuple_descriptor,
            tuple_accessor,
            key_descriptor,
        }
    }
}

impl<S: NodeStorage, K: KeyAccess> NodeAccessor for KeyedNodeAccessor<S, K> {
    fn tuple_descriptor(&self) -> &TupleDescriptor {
        &self.tuple_descriptor
    }

    fn tuple_accessor(&self) -> &TupleAccessor {
        &self.tuple_accessor
    }

    fn key_descriptor(&self) -> &TupleDescriptor {
        &self.key_descriptor
    }

    fn has_fixed_width_entries(&self) -> bool {
        self.storage.has_fixed_width_entries()
    }

    fn entry_byte_count(&self, cb_tuple: usize) -> usize {
        self.storage.entry_byte_count(cb_tuple)
    }

    fn clear_node(&self, node: &mut [u8], height: u32) {
        self.storage.clear_node(node, height);
    }

    fn entry_offset(&self, node: &[u8], slot: usize) -> usize {
        self.storage.entry_offset(node, slot)
    }

    fn entry<'a>(&self, node: &'a [u8], slot: usize) -> &'a [u8] {
        let offset = self.storage.entry_offset(node, slot);
        let cb = self.tuple_accessor.buffer_byte_count(&node[offset..]);
        &node[offset..offset + cb]
    }

    fn unmarshal_key<'a>(&self, node: &'a [u8], slot: usize, key: &mut TupleData<'a>) {
        self.key_access
            .unmarshal_key(&self.tuple_accessor, self.entry(node, slot), key);
    }

    fn calculate_capacity(&self, node: &[u8], cb_tuple: usize) -> Capacity {
        self.storage.calculate_capacity(node, cb_tuple)
    }

    fn allocate_entry(&self, node: &mut [u8], slot: usize, cb_tuple: usize) -> usize {
        self.storage.allocate_entry(node, slot, cb_tuple)
    }

    fn deallocate_entry(&self, node: &mut [u8], slot: usize) {
        self.storage
            .deallocate_entry(node, slot, &self.tuple_accessor);
    }

    fn compact_node(&self, src: &[u8], dest: &mut [u8]) {
        self.storage.compact_node(src, dest, &self.tuple_accessor);
        tracing::debug!(
            entries = node::n_entries(dest),
            cb_free = node::cb_total_free(dest),
            "compacted node"
        );
    }
}

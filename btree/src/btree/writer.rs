//! Tree mutation.
//!
//! A [`BTreeWriter`] descends with exclusive lock crabbing. Ancestors stay
//! locked only while the node below them might split and need a new
//! internal entry; once a node with room for one more entry is locked,
//! everything above it is released.
//!
//! An insert that passes below the first separator of an internal node
//! lowers that separator to its own key on the way down, so a later
//! split of the first child never yields a separator below it.
//!
//! Nodes are never merged. Deletes may leave leaves empty; readers and
//! [`BTreeAccessBase::first_child`] step over them.

use std::cmp::Ordering;

use crate::btree::access_base::{BTreeAccessBase, BTreeDescriptor};
use crate::btree::error::BTreeError;
use crate::btree::keyed::{DupSeek, NodeAccessor};
use crate::btree::node::{self, n_entries};
use crate::btree::node_storage::Capacity;
use crate::storage::{NULL_PAGE_ID, PageGuard};
use crate::tuple::{OwnedTupleData, TupleData};

/// What to do when an inserted key is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distinctness {
    /// Store the duplicate.
    Allow,
    /// Silently skip the insert.
    Discard,
    /// Fail with [`BTreeError::DuplicateKey`].
    Fail,
}

/// Inserts, updates and deletes leaf entries.
#[derive(Debug)]
pub struct BTreeWriter {
    base: BTreeAccessBase,
    monotonic: bool,
    position: Option<(PageGuard, usize)>,
}

impl BTreeWriter {
    pub fn new(descriptor: BTreeDescriptor) -> Result<Self, BTreeError> {
        Ok(Self {
            base: BTreeAccessBase::new(descriptor)?,
            monotonic: false,
            position: None,
        })
    }

    #[must_use]
    pub const fn base(&self) -> &BTreeAccessBase {
        &self.base
    }

    /// Hint that keys arrive in ascending order. Splits then leave the
    /// left node full instead of balancing.
    pub const fn set_monotonic(&mut self, monotonic: bool) {
        self.monotonic = monotonic;
    }

    #[must_use]
    pub const fn is_positioned(&self) -> bool {
        self.position.is_some()
    }

    /// Release the current leaf.
    pub fn end_search(&mut self) {
        self.position = None;
    }

    /// Insert `data` into the tree.
    ///
    /// Returns `false` when the key was already present and `distinctness`
    /// is [`Distinctness::Discard`]. Keys containing NULL never count as
    /// duplicates.
    pub fn insert_tuple(
        &mut self,
        data: &TupleData<'_>,
        distinctness: Distinctness,
    ) -> Result<bool, BTreeError> {
        self.end_search();
        self.base.tuple_descriptor().validate(data)?;
        let cb_tuple = self.base.validate_tuple_size(data)?;
        let key = data.project(&self.base.descriptor().key_projection);
        let (path, guard) = loop {
            if let Some(descent) = self.descend_for_insert(&key, cb_tuple)? {
                break descent;
            }
        };

        let leaf = self.base.leaf_accessor();
        let (slot, found) = leaf.binary_search(guard.data(), &key, DupSeek::End, true);
        if found && !key.has_null_in_prefix(key.len()) {
            match distinctness {
                Distinctness::Allow => {}
                Distinctness::Discard => return Ok(false),
                Distinctness::Fail => {
                    return Err(BTreeError::DuplicateKey {
                        descriptor: self.base.key_descriptor().clone(),
                        key: key.to_owned_data(),
                    });
                }
            }
        }

        let image = self.base.marshal(true, data);
        self.insert_image(path, guard, slot, image)?;
        Ok(true)
    }

    /// Lock the path from the root to the leaf that `key` belongs in.
    ///
    /// Returns the leaf and the ancestors that a split of it could reach,
    /// or `None` when a first separator had to be lowered by splitting and
    /// the descent must start over.
    fn descend_for_insert(
        &self,
        key: &TupleData<'_>,
        cb_tuple: usize,
    ) -> Result<Option<(Vec<(PageGuard, usize)>, PageGuard)>, BTreeError> {
        let cache = self.base.cache();
        let non_leaf = self.base.non_leaf_accessor();
        let mut path: Vec<(PageGuard, usize)> = Vec::new();
        let mut guard = cache.write_page(self.base.root_page_id())?;
        loop {
            let leaf = node::is_leaf(guard.data());
            if !leaf
                && n_entries(guard.data()) > 0
                && non_leaf.compare_first_key(guard.data(), key) == Ordering::Less
            {
                let image = self.lowered_first_entry(guard.data(), key);
                if !self.replace_entry(&mut guard, 0, &image) {
                    non_leaf.deallocate_entry(guard.data_mut(), 0);
                    self.insert_image(path, guard, 0, image)?;
                    return Ok(None);
                }
            }
            if self.is_safe(guard.data(), cb_tuple) {
                path.clear();
            }
            if leaf {
                return Ok(Some((path, guard)));
            }
            let slot = self.base.child_slot(guard.data(), key, DupSeek::End);
            let child = cache.write_page(self.base.child(guard.data(), slot))?;
            path.push((guard, slot));
            guard = child;
        }
    }

    /// The first entry of the internal node `node` with its key lowered to
    /// `key`. Every separator must stay at or below the keys of its child.
    fn lowered_first_entry(&self, node: &[u8], key: &TupleData<'_>) -> Vec<u8> {
        let child = self.base.child(node, 0).to_le_bytes();
        let mut entry = key.clone();
        entry.push(Some(child.as_slice()));
        self.base.marshal(false, &entry)
    }

    /// Overwrite the entry in `slot` with `image` without splitting.
    /// Returns `false`, leaving the node unchanged, if it does not fit.
    fn replace_entry(&self, guard: &mut PageGuard, slot: usize, image: &[u8]) -> bool {
        let accessor = self.base.node_accessor(guard.data());
        if accessor.has_fixed_width_entries() {
            let offset = accessor.entry_offset(guard.data(), slot);
            guard.data_mut()[offset..offset + image.len()].copy_from_slice(image);
            return true;
        }
        let old_image = accessor.entry(guard.data(), slot).to_vec();
        accessor.deallocate_entry(guard.data_mut(), slot);
        if self.attempt_insert_without_split(guard, slot, image) {
            return true;
        }
        let restored = self.attempt_insert_without_split(guard, slot, &old_image);
        assert!(restored, "previous entry no longer fits");
        false
    }

    /// Whether `node` can take one more entry without splitting: the new
    /// tuple for a leaf, the largest possible internal entry otherwise.
    fn is_safe(&self, node: &[u8], cb_tuple: usize) -> bool {
        let accessor = self.base.node_accessor(node);
        let cb_entry = if node::is_leaf(node) {
            cb_tuple
        } else {
            accessor.tuple_accessor().max_byte_count()
        };
        accessor.calculate_capacity(node, cb_entry) != Capacity::CanNotFit
    }

    /// Insert `image` at `slot` of `guard`, splitting upward along `path`
    /// as needed.
    fn insert_image(
        &self,
        mut path: Vec<(PageGuard, usize)>,
        mut guard: PageGuard,
        mut slot: usize,
        mut image: Vec<u8>,
    ) -> Result<(), BTreeError> {
        loop {
            if self.attempt_insert_without_split(&mut guard, slot, &image) {
                return Ok(());
            }
            let (right, separator) = self.split_node(&mut guard, slot, &image)?;
            let Some((parent, child_slot)) = path.pop() else {
                assert_eq!(
                    guard.page_id(),
                    self.base.root_page_id(),
                    "split reached the top of a partial path"
                );
                return self.grow(&mut guard, &right, &separator);
            };
            drop(right);
            drop(guard);
            image = self.base.marshal(false, &separator.as_data());
            guard = parent;
            slot = child_slot + 1;
        }
    }

    /// Add `image` at `slot` if it fits, compacting the node first when
    /// only fragmented space is left.
    fn attempt_insert_without_split(
        &self,
        guard: &mut PageGuard,
        slot: usize,
        image: &[u8],
    ) -> bool {
        let accessor = self.base.node_accessor(guard.data());
        match accessor.calculate_capacity(guard.data(), image.len()) {
            Capacity::CanFit => {}
            Capacity::CanFitWithCompaction => {
                self.compact_node(accessor, guard);
                debug_assert_eq!(
                    accessor.calculate_capacity(guard.data(), image.len()),
                    Capacity::CanFit
                );
            }
            Capacity::CanNotFit => return false,
        }
        accessor.insert_image(guard.data_mut(), slot, image);
        true
    }

    /// Rebuild the node in a scratch page and swap it in.
    fn compact_node(&self, accessor: &dyn NodeAccessor, guard: &mut PageGuard) {
        let mut scratch = self.base.cache().scratch_page();
        accessor.compact_node(guard.data(), scratch.as_bytes_mut());
        guard.swap_buffers(&mut scratch);
    }

    /// Split the full node `guard` into itself and a new right sibling,
    /// then insert `image` at `slot` on whichever side it belongs.
    ///
    /// Returns the locked right node and the internal entry pointing at it.
    fn split_node(
        &self,
        guard: &mut PageGuard,
        slot: usize,
        image: &[u8],
    ) -> Result<(PageGuard, OwnedTupleData), BTreeError> {
        let accessor = self.base.node_accessor(guard.data());
        let height = node::height(guard.data());
        let mut right = self.base.cache().allocate_page()?;
        accessor.clear_node(right.data_mut(), height);
        node::set_right_sibling(right.data_mut(), node::right_sibling(guard.data()));
        node::set_right_sibling(guard.data_mut(), right.page_id());

        let kept = accessor.split_node(
            guard.data_mut(),
            right.data_mut(),
            slot,
            image.len(),
            self.monotonic,
        );
        let goes_right = slot > kept
            || (slot == kept
                && accessor.calculate_capacity(right.data(), image.len()) != Capacity::CanNotFit);
        let placed = if goes_right {
            self.attempt_insert_without_split(&mut right, slot - kept, image)
        } else {
            self.attempt_insert_without_split(guard, slot, image)
        };
        assert!(placed, "entry does not fit on either side of a split");

        tracing::debug!(
            page_id = guard.page_id(),
            new_page_id = right.page_id(),
            height,
            left_entries = n_entries(guard.data()),
            right_entries = n_entries(right.data()),
            "split node"
        );
        let separator = self.base.separator(right.data(), right.page_id());
        Ok((right, separator))
    }

    /// Grow the tree by one level after the root split into `root` and
    /// `right`. The root keeps its page id: its contents move to a new
    /// left page and it becomes an internal node over the two halves.
    fn grow(
        &self,
        root: &mut PageGuard,
        right: &PageGuard,
        right_separator: &OwnedTupleData,
    ) -> Result<(), BTreeError> {
        let mut left = self.base.cache().allocate_page()?;
        root.swap_with(&mut left);
        let height = node::height(left.data()) + 1;
        let left_separator = self.base.separator(left.data(), left.page_id());

        let non_leaf = self.base.non_leaf_accessor();
        non_leaf.clear_node(root.data_mut(), height);
        non_leaf.insert_tuple(root.data_mut(), 0, &left_separator.as_data());
        non_leaf.insert_tuple(root.data_mut(), 1, &right_separator.as_data());
        tracing::debug!(
            root = root.page_id(),
            left = left.page_id(),
            right = right.page_id(),
            height,
            "grew tree"
        );
        Ok(())
    }

    /// Position on `key` under an exclusive lock, for a following
    /// [`Self::delete_current`] or [`Self::update_current`].
    ///
    /// Returns whether an equal key was found. On a miss the writer is
    /// positioned where `key` would be inserted, or unpositioned past the
    /// end of the tree.
    pub fn search_for_key(
        &mut self,
        key: &TupleData<'_>,
        dup_seek: DupSeek,
    ) -> Result<bool, BTreeError> {
        self.end_search();
        self.base.validate_key(key)?;
        let cache = self.base.cache();
        let mut guard = cache.write_page(self.base.root_page_id())?;
        while !node::is_leaf(guard.data()) {
            let slot = self.base.child_slot(guard.data(), key, dup_seek);
            guard = cache.write_page(self.base.child(guard.data(), slot))?;
        }

        let leaf = self.base.leaf_accessor();
        loop {
            let (slot, found) = leaf.binary_search(guard.data(), key, dup_seek, true);
            if slot < n_entries(guard.data()) || (found && dup_seek == DupSeek::End) {
                self.position = Some((guard, slot));
                return Ok(found);
            }
            let next = node::right_sibling(guard.data());
            if next == NULL_PAGE_ID {
                return Ok(false);
            }
            guard = cache.write_page(next)?;
        }
    }

    /// The entry the writer is positioned on.
    #[must_use]
    pub fn tuple(&self) -> Option<TupleData<'_>> {
        self.position
            .as_ref()
            .filter(|(guard, slot)| *slot < n_entries(guard.data()))
            .map(|(guard, slot)| self.base.leaf_accessor().tuple(guard.data(), *slot))
    }

    /// Delete the entry the writer is positioned on and end the search.
    ///
    /// # Panics
    /// Panics if the writer is not positioned on an entry.
    pub fn delete_current(&mut self) {
        let Some((mut guard, slot)) = self.position.take() else {
            panic!("delete_current called without a position");
        };
        self.base
            .leaf_accessor()
            .deallocate_entry(guard.data_mut(), slot);
    }

    /// Replace the entry the writer is positioned on with `data`, which
    /// must have the same key.
    ///
    /// Fixed-width entries are overwritten in place; others are
    /// reallocated. Returns `false`, leaving the entry unchanged, when the
    /// new image does not fit in the leaf.
    ///
    /// # Panics
    /// Panics if the writer is not positioned on an entry or if `data`
    /// has a different key.
    pub fn update_current(&mut self, data: &TupleData<'_>) -> Result<bool, BTreeError> {
        self.base.tuple_descriptor().validate(data)?;
        let cb_tuple = self.base.validate_tuple_size(data)?;
        let Some((mut guard, slot)) = self.position.take() else {
            panic!("update_current called without a position");
        };
        let leaf = self.base.leaf_accessor();
        assert_eq!(
            leaf.key_descriptor().compare_tuples(
                &leaf.key(guard.data(), slot),
                &data.project(&self.base.descriptor().key_projection)
            ),
            Ordering::Equal,
            "update_current must not change the key"
        );

        let image = self.base.marshal(true, data);
        debug_assert_eq!(image.len(), cb_tuple);
        let updated = self.replace_entry(&mut guard, slot, &image);
        self.position = Some((guard, slot));
        Ok(updated)
    }

    /// Delete one entry with key `key`. Returns whether one was found.
    pub fn delete_key(&mut self, key: &TupleData<'_>) -> Result<bool, BTreeError> {
        let found = self.search_for_key(key, DupSeek::Begin)?;
        if found {
            self.delete_current();
        } else {
            self.end_search();
        }
        Ok(found)
    }
}

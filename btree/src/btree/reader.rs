//! Read-only tree traversal.
//!
//! A [`BTreeReader`] descends with shared lock coupling: the child is
//! locked before the parent is released, so a reader never observes a
//! node between a split and the parent update. While positioned it keeps
//! a shared lock on the current leaf.

use std::cmp::Ordering;

use crate::btree::access_base::{BTreeAccessBase, BTreeDescriptor};
use crate::btree::error::BTreeError;
use crate::btree::keyed::DupSeek;
use crate::btree::node::{self, n_entries};
use crate::storage::{NULL_PAGE_ID, PageGuard};
use crate::tuple::{OwnedTupleData, TupleData};

/// A cursor over the leaf entries of a tree.
#[derive(Debug)]
pub struct BTreeReader {
    base: BTreeAccessBase,
    position: Option<(PageGuard, usize)>,
}

impl BTreeReader {
    pub fn new(descriptor: BTreeDescriptor) -> Result<Self, BTreeError> {
        Ok(Self {
            base: BTreeAccessBase::new(descriptor)?,
            position: None,
        })
    }

    #[must_use]
    pub const fn base(&self) -> &BTreeAccessBase {
        &self.base
    }

    /// Whether the reader is on an entry.
    #[must_use]
    pub const fn is_positioned(&self) -> bool {
        self.position.is_some()
    }

    /// Release the current leaf.
    pub fn end_search(&mut self) {
        self.position = None;
    }

    /// Position on the first entry. Returns `false` if the tree is empty.
    pub fn search_first(&mut self) -> Result<bool, BTreeError> {
        self.end_search();
        let mut guard = self.base.cache().read_page(self.base.root_page_id())?;
        while !node::is_leaf(guard.data()) {
            let child = self.base.child(guard.data(), 0);
            guard = self.base.cache().read_page(child)?;
        }
        if n_entries(guard.data()) == 0 {
            let Some(next) = self.next_non_empty_leaf(&guard)? else {
                return Ok(false);
            };
            guard = next;
        }
        self.position = Some((guard, 0));
        Ok(true)
    }

    /// Position on the last entry. Returns `false` if the tree is empty.
    pub fn search_last(&mut self) -> Result<bool, BTreeError> {
        self.end_search();
        let mut guard = self.base.cache().read_page(self.base.root_page_id())?;
        while !node::is_leaf(guard.data()) {
            let last = n_entries(guard.data()) - 1;
            let child = self.base.child(guard.data(), last);
            guard = self.base.cache().read_page(child)?;
        }
        let n = n_entries(guard.data());
        if n > 0 {
            self.position = Some((guard, n - 1));
            return Ok(true);
        }
        // Trailing leaves emptied by deletes: scan for the last entry.
        drop(guard);
        if !self.search_first()? {
            return Ok(false);
        }
        loop {
            let Some((guard, _)) = self.position.take() else {
                return Ok(false);
            };
            let last = n_entries(guard.data()) - 1;
            match self.next_non_empty_leaf(&guard)? {
                Some(next) => self.position = Some((next, 0)),
                None => {
                    self.position = Some((guard, last));
                    return Ok(true);
                }
            }
        }
    }

    /// Position on `key`.
    ///
    /// With `least_upper` set, a miss positions on the first entry above
    /// `key` and leaves the reader unpositioned past the end of the tree.
    /// Otherwise a miss positions on the last entry below `key`, or on the
    /// first entry when every key is above it. Returns whether an equal
    /// key was found. For [`DupSeek::End`] a hit positions one past the
    /// last equal entry. `key` may be a prefix of the tree's key; datums
    /// of the wrong width are rejected with [`BTreeError::InvalidTuple`].
    pub fn search_for_key(
        &mut self,
        key: &TupleData<'_>,
        dup_seek: DupSeek,
        least_upper: bool,
    ) -> Result<bool, BTreeError> {
        self.end_search();
        self.base.validate_key(key)?;
        let mut guard = self.base.cache().read_page(self.base.root_page_id())?;
        while !node::is_leaf(guard.data()) {
            let slot = self.base.child_slot(guard.data(), key, dup_seek);
            let child = self.base.child(guard.data(), slot);
            guard = self.base.cache().read_page(child)?;
        }

        let leaf = self.base.leaf_accessor();
        loop {
            let n = n_entries(guard.data());
            let (slot, found) = leaf.binary_search(guard.data(), key, dup_seek, true);
            if slot < n {
                if found || least_upper {
                    self.position = Some((guard, slot));
                    return Ok(found);
                }
                if slot > 0 {
                    self.position = Some((guard, slot - 1));
                    return Ok(false);
                }
                drop(guard);
                self.search_below_from_start(key)?;
                return Ok(false);
            }

            // Everything on this leaf sorts before the position.
            let next = self.next_non_empty_leaf(&guard)?;
            if !found && !least_upper {
                let next_starts_above = next.as_ref().is_none_or(|next| {
                    leaf.compare_first_key(next.data(), key) == Ordering::Less
                });
                if next_starts_above {
                    if n > 0 {
                        self.position = Some((guard, n - 1));
                    } else {
                        drop(next);
                        drop(guard);
                        self.search_below_from_start(key)?;
                    }
                    return Ok(false);
                }
            }
            let Some(next) = next else {
                return Ok(found);
            };
            if found {
                self.position = Some((next, 0));
                return Ok(true);
            }
            guard = next;
        }
    }

    /// Position on the last entry below `key`, or the first entry if there
    /// is none, by walking the leaf level from the start. Only needed when
    /// deletes emptied the leaves left of where `key` belongs.
    fn search_below_from_start(&mut self, key: &TupleData<'_>) -> Result<(), BTreeError> {
        if !self.search_first()? {
            return Ok(());
        }
        let Some((mut guard, _)) = self.position.take() else {
            return Ok(());
        };
        let leaf = self.base.leaf_accessor();
        loop {
            match self.next_non_empty_leaf(&guard)? {
                Some(next) if leaf.compare_first_key(next.data(), key) == Ordering::Greater => {
                    guard = next;
                }
                _ => break,
            }
        }
        let (slot, _) = leaf.binary_search(guard.data(), key, DupSeek::Begin, false);
        self.position = Some((guard, slot));
        Ok(())
    }

    /// Advance to the next entry. Returns `false` at the end of the tree,
    /// leaving the reader unpositioned.
    pub fn search_next(&mut self) -> Result<bool, BTreeError> {
        let Some((guard, slot)) = self.position.take() else {
            return Ok(false);
        };
        if slot + 1 < n_entries(guard.data()) {
            self.position = Some((guard, slot + 1));
            return Ok(true);
        }
        match self.next_non_empty_leaf(&guard)? {
            Some(next) => {
                self.position = Some((next, 0));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The current entry.
    #[must_use]
    pub fn tuple(&self) -> Option<TupleData<'_>> {
        self.position
            .as_ref()
            .map(|(guard, slot)| self.base.leaf_accessor().tuple(guard.data(), *slot))
    }

    /// A copy of the current entry that outlives the position.
    #[must_use]
    pub fn tuple_owned(&self) -> Option<OwnedTupleData> {
        self.tuple().map(|data| data.to_owned_data())
    }

    /// Lock the next leaf with entries to the right of `from`, coupling
    /// across any empty leaves on the way.
    fn next_non_empty_leaf(&self, from: &PageGuard) -> Result<Option<PageGuard>, BTreeError> {
        let mut page_id = node::right_sibling(from.data());
        let mut previous: Option<PageGuard> = None;
        while page_id != NULL_PAGE_ID {
            let guard = self.base.cache().read_page(page_id)?;
            drop(previous.take());
            if n_entries(guard.data()) > 0 {
                return Ok(Some(guard));
            }
            page_id = node::right_sibling(guard.data());
            previous = Some(guard);
        }
        Ok(None)
    }
}

//! Tree creation, bulk loading and truncation.

use std::cmp::Ordering;

use crate::btree::access_base::{BTreeAccessBase, BTreeDescriptor};
use crate::btree::error::BTreeError;
use crate::btree::keyed::NodeAccessor;
use crate::btree::node::{self, cb_total_free, data_capacity, n_entries};
use crate::btree::node_storage::Capacity;
use crate::storage::{NULL_PAGE_ID, PageGuard, PageId};
use crate::tuple::OwnedTupleData;

/// Creates, bulk loads and truncates trees.
#[derive(Debug)]
pub struct BTreeBuilder {
    base: BTreeAccessBase,
}

impl BTreeBuilder {
    pub fn new(descriptor: BTreeDescriptor) -> Result<Self, BTreeError> {
        Ok(Self {
            base: BTreeAccessBase::new(descriptor)?,
        })
    }

    #[must_use]
    pub const fn base(&self) -> &BTreeAccessBase {
        &self.base
    }

    /// The descriptor of the tree, including its current root.
    #[must_use]
    pub fn descriptor(&self) -> BTreeDescriptor {
        self.base.descriptor().clone()
    }

    /// Allocate an empty leaf as the root of a new tree.
    pub fn create_empty_root(&mut self) -> Result<PageId, BTreeError> {
        let mut root = self.base.cache().allocate_page()?;
        self.base.leaf_accessor().clear_node(root.data_mut(), 0);
        let page_id = root.page_id();
        drop(root);
        self.base.set_root_page_id(page_id);
        tracing::debug!(root = page_id, "created empty root");
        Ok(page_id)
    }

    /// Load `tuples`, which must be sorted by key, into the empty tree.
    ///
    /// Levels are built bottom-up, each node filled to about `fill_factor`
    /// of its capacity. The top level ends up in the existing root page.
    /// Returns the number of tuples loaded.
    ///
    /// # Panics
    /// Panics if `fill_factor` is outside `(0, 1]`, the tree is not empty,
    /// or the input is out of order.
    pub fn build<I>(&mut self, tuples: I, fill_factor: f64) -> Result<u64, BTreeError>
    where
        I: IntoIterator<Item = OwnedTupleData>,
    {
        assert!(
            fill_factor > 0.0 && fill_factor <= 1.0,
            "fill factor {fill_factor} is outside (0, 1]"
        );
        if self.base.root_page_id() == NULL_PAGE_ID {
            self.create_empty_root()?;
        }
        {
            let root = self.base.cache().read_page(self.base.root_page_id())?;
            assert!(
                node::is_leaf(root.data()) && n_entries(root.data()) == 0,
                "bulk build needs an empty tree"
            );
        }

        let base = &self.base;
        let target = fill_target(data_capacity(base.cache().usable_page_size()), fill_factor);
        let mut level = LevelBuilder::new(base, base.leaf_accessor(), 0, target, 1);
        let mut previous_key: Option<OwnedTupleData> = None;
        let mut count = 0u64;
        for tuple in tuples {
            let data = tuple.as_data();
            base.tuple_descriptor().validate(&data)?;
            base.validate_tuple_size(&data)?;
            let key = data.project(&base.descriptor().key_projection);
            if let Some(previous) = &previous_key {
                assert_ne!(
                    base.key_descriptor()
                        .compare_tuples(&previous.as_data(), &key),
                    Ordering::Greater,
                    "bulk build input is not sorted"
                );
            }
            level.push(&base.marshal(true, &data))?;
            previous_key = Some(key.to_owned_data());
            count += 1;
        }

        let (mut separators, mut pages) = level.finish();
        let mut height = 0;
        while pages.len() > 1 {
            height += 1;
            let mut level = LevelBuilder::new(base, base.non_leaf_accessor(), height, target, 2);
            for separator in &separators {
                level.push(&base.marshal(false, &separator.as_data()))?;
            }
            (separators, pages) = level.finish();
        }
        if let [top] = pages.as_slice() {
            self.install_root(*top)?;
        }

        tracing::info!(
            root = self.base.root_page_id(),
            tuples = count,
            height,
            "built B-tree"
        );
        Ok(count)
    }

    /// Move the contents of `page_id` into the root page and free it.
    fn install_root(&self, page_id: PageId) -> Result<(), BTreeError> {
        let cache = self.base.cache();
        let mut root = cache.write_page(self.base.root_page_id())?;
        let mut top = cache.write_page(page_id)?;
        root.swap_with(&mut top);
        drop(top);
        drop(root);
        cache.deallocate_page(page_id)?;
        Ok(())
    }

    /// Free every page below the root and reset the root to an empty leaf.
    /// With `rootless` the root is freed too and the tree has no root.
    ///
    /// The caller must be the only user of the tree.
    pub fn truncate(&mut self, rootless: bool) -> Result<(), BTreeError> {
        let root = self.base.root_page_id();
        if root == NULL_PAGE_ID {
            return Ok(());
        }
        let cache = self.base.cache();
        let mut level_start = self.first_child_below(root)?;
        let mut freed = 0u64;
        while level_start != NULL_PAGE_ID {
            let mut page_id = level_start;
            level_start = self.first_child_below(page_id)?;
            while page_id != NULL_PAGE_ID {
                let sibling = node::right_sibling(cache.read_page(page_id)?.data());
                cache.deallocate_page(page_id)?;
                freed += 1;
                page_id = sibling;
            }
        }

        if rootless {
            cache.deallocate_page(root)?;
            self.base.set_root_page_id(NULL_PAGE_ID);
        } else {
            let mut guard = cache.write_page(root)?;
            self.base.leaf_accessor().clear_node(guard.data_mut(), 0);
        }
        tracing::debug!(root, freed, rootless, "truncated B-tree");
        Ok(())
    }

    /// First page of the level below `page_id`, or [`NULL_PAGE_ID`] if
    /// `page_id` is a leaf.
    fn first_child_below(&self, page_id: PageId) -> Result<PageId, BTreeError> {
        let is_leaf = node::is_leaf(self.base.cache().read_page(page_id)?.data());
        if is_leaf {
            Ok(NULL_PAGE_ID)
        } else {
            self.base.first_child(page_id)
        }
    }
}

// Fill targets are a fraction of a page; precision loss is irrelevant.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn fill_target(capacity: usize, fill_factor: f64) -> usize {
    (capacity as f64 * fill_factor).ceil() as usize
}

/// Fills the nodes of one level left to right.
struct LevelBuilder<'a> {
    base: &'a BTreeAccessBase,
    accessor: &'a dyn NodeAccessor,
    height: u32,
    target: usize,
    min_entries: usize,
    current: Option<PageGuard>,
    separators: Vec<OwnedTupleData>,
    pages: Vec<PageId>,
}

impl<'a> LevelBuilder<'a> {
    const fn new(
        base: &'a BTreeAccessBase,
        accessor: &'a dyn NodeAccessor,
        height: u32,
        target: usize,
        min_entries: usize,
    ) -> Self {
        Self {
            base,
            accessor,
            height,
            target,
            min_entries,
            current: None,
            separators: Vec::new(),
            pages: Vec::new(),
        }
    }

    /// Append `image` to the current node, starting a new one when the
    /// current node has reached its fill target.
    fn push(&mut self, image: &[u8]) -> Result<(), BTreeError> {
        let mut guard = match self.current.take() {
            Some(guard) if self.accepts(guard.data(), image.len()) => guard,
            previous => self.start_node(previous)?,
        };
        let slot = n_entries(guard.data());
        self.accessor.insert_image(guard.data_mut(), slot, image);
        if slot == 0 {
            self.separators
                .push(self.base.separator(guard.data(), guard.page_id()));
        }
        self.current = Some(guard);
        Ok(())
    }

    fn accepts(&self, node: &[u8], cb_tuple: usize) -> bool {
        if self.accessor.calculate_capacity(node, cb_tuple) != Capacity::CanFit {
            return false;
        }
        let used = data_capacity(node.len()) - cb_total_free(node);
        n_entries(node) < self.min_entries
            || used + self.accessor.entry_byte_count(cb_tuple) <= self.target
    }

    /// Allocate the next node of the level and link `previous` to it.
    fn start_node(&mut self, previous: Option<PageGuard>) -> Result<PageGuard, BTreeError> {
        let mut guard = self.base.cache().allocate_page()?;
        self.accessor.clear_node(guard.data_mut(), self.height);
        if let Some(mut previous) = previous {
            node::set_right_sibling(previous.data_mut(), guard.page_id());
        }
        self.pages.push(guard.page_id());
        Ok(guard)
    }

    /// The separators pointing at the nodes of the level, and their pages.
    fn finish(self) -> (Vec<OwnedTupleData>, Vec<PageId>) {
        (self.separators, self.pages)
    }
}

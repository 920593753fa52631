//! Per-tree node access.
//!
//! A [`BTreeAccessBase`] is built once per open tree handle. It decides
//! how leaf and internal nodes are stored and hosts the navigation
//! primitives shared by the reader, writer, builder and verifier.
//!
//! Internal entries hold the key columns followed by a `UInt64` child page
//! id. The key in slot `i` is a lower bound of every key below child `i`,
//! so child `i` covers keys from entry `i` up to entry `i + 1`. Descent
//! treats slot 0 as covering every key below it; the writer lowers the
//! first separator before inserting such a key.

use std::sync::Arc;

use crate::btree::compact::CompactNodeStorage;
use crate::btree::error::BTreeError;
use crate::btree::heap::HeapNodeStorage;
use crate::btree::keyed::{
    DupSeek, KeyAccess, KeyedNodeAccessor, NodeAccessor, ProjectedKey, WholeTupleKey,
};
use crate::btree::node::{self, data_capacity, n_entries};
use crate::storage::{NULL_PAGE_ID, PageCache, PageId, read_u64};
use crate::tuple::{
    OwnedTupleData, StandardType, TupleAccessor, TupleAttributeDescriptor, TupleData,
    TupleDescriptor, TupleError, TupleProjection,
};

/// Everything needed to open a tree.
#[derive(Debug, Clone)]
pub struct BTreeDescriptor {
    /// Page cache over the segment holding the tree.
    pub cache: Arc<PageCache>,
    /// Shape of the tuples stored in the leaves.
    pub tuple_descriptor: TupleDescriptor,
    /// Attributes of the stored tuple that make up the key, in key order.
    pub key_projection: TupleProjection,
    /// Root page, or [`NULL_PAGE_ID`] before the tree is created.
    pub root_page_id: PageId,
}

impl BTreeDescriptor {
    #[must_use]
    pub const fn new(
        cache: Arc<PageCache>,
        tuple_descriptor: TupleDescriptor,
        key_projection: TupleProjection,
    ) -> Self {
        Self {
            cache,
            tuple_descriptor,
            key_projection,
            root_page_id: NULL_PAGE_ID,
        }
    }

    /// The same tree rooted at `root_page_id`.
    #[must_use]
    pub fn with_root(mut self, root_page_id: PageId) -> Self {
        self.root_page_id = root_page_id;
        self
    }
}

/// Build a keyed accessor for `tuple_descriptor`, picking compact storage
/// when the shape is fixed-width.
fn keyed_accessor<K: KeyAccess + 'static>(
    tuple_descriptor: TupleDescriptor,
    key_descriptor: TupleDescriptor,
    key_access: impl FnOnce(&TupleAccessor) -> K,
) -> Result<Box<dyn NodeAccessor>, TupleError> {
    let tuple = TupleAccessor::new(&tuple_descriptor)?;
    let key = key_access(&tuple);
    if tuple.is_fixed_width() {
        let storage = CompactNodeStorage::new(&tuple);
        Ok(Box::new(KeyedNodeAccessor::new(
            storage,
            key,
            tuple_descriptor,
            tuple,
            key_descriptor,
        )))
    } else {
        Ok(Box::new(KeyedNodeAccessor::new(
            HeapNodeStorage::new(),
            key,
            tuple_descriptor,
            tuple,
            key_descriptor,
        )))
    }
}

/// Node access for one open tree.
#[derive(Debug)]
pub struct BTreeAccessBase {
    descriptor: BTreeDescriptor,
    key_descriptor: TupleDescriptor,
    leaf: Box<dyn NodeAccessor>,
    non_leaf: Box<dyn NodeAccessor>,
    max_tuple_size: usize,
    max_separator_size: Option<usize>,
}

impl BTreeAccessBase {
    pub fn new(descriptor: BTreeDescriptor) -> Result<Self, BTreeError> {
        let key_descriptor = descriptor
            .tuple_descriptor
            .project(&descriptor.key_projection);
        let key_count = key_descriptor.len();

        let whole_tuple_key = descriptor.key_projection.as_slice()
            == TupleProjection::identity(descriptor.tuple_descriptor.len()).as_slice();
        let leaf = if whole_tuple_key {
            keyed_accessor(
                descriptor.tuple_descriptor.clone(),
                key_descriptor.clone(),
                |_| WholeTupleKey,
            )?
        } else {
            let projection = descriptor.key_projection.clone();
            keyed_accessor(
                descriptor.tuple_descriptor.clone(),
                key_descriptor.clone(),
                |tuple| ProjectedKey::new(tuple, &projection),
            )?
        };

        let mut non_leaf_descriptor = key_descriptor.clone();
        non_leaf_descriptor.push(TupleAttributeDescriptor::scalar(
            StandardType::UInt64,
            false,
        ));
        let non_leaf = keyed_accessor(non_leaf_descriptor, key_descriptor.clone(), |tuple| {
            ProjectedKey::new(tuple, &TupleProjection::identity(key_count))
        })?;

        let half_node = data_capacity(descriptor.cache.usable_page_size()) / 2;
        let max_tuple_size = half_node.saturating_sub(leaf.entry_byte_count(0));
        let cb_separator_max = non_leaf.tuple_accessor().max_byte_count();
        let max_separator_size = (non_leaf.entry_byte_count(cb_separator_max) > half_node)
            .then(|| half_node.saturating_sub(non_leaf.entry_byte_count(0)));

        tracing::trace!(
            root = descriptor.root_page_id,
            leaf_fixed = leaf.has_fixed_width_entries(),
            non_leaf_fixed = non_leaf.has_fixed_width_entries(),
            max_tuple_size,
            "opened B-tree"
        );

        Ok(Self {
            descriptor,
            key_descriptor,
            leaf,
            non_leaf,
            max_tuple_size,
            max_separator_size,
        })
    }

    #[must_use]
    pub const fn descriptor(&self) -> &BTreeDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn cache(&self) -> &PageCache {
        &self.descriptor.cache
    }

    #[must_use]
    pub const fn root_page_id(&self) -> PageId {
        self.descriptor.root_page_id
    }

    pub(crate) const fn set_root_page_id(&mut self, root_page_id: PageId) {
        self.descriptor.root_page_id = root_page_id;
    }

    #[must_use]
    pub const fn tuple_descriptor(&self) -> &TupleDescriptor {
        &self.descriptor.tuple_descriptor
    }

    #[must_use]
    pub const fn key_descriptor(&self) -> &TupleDescriptor {
        &self.key_descriptor
    }

    #[must_use]
    pub fn leaf_accessor(&self) -> &dyn NodeAccessor {
        self.leaf.as_ref()
    }

    #[must_use]
    pub fn non_leaf_accessor(&self) -> &dyn NodeAccessor {
        self.non_leaf.as_ref()
    }

    /// The accessor matching the level of `node`.
    #[must_use]
    pub fn node_accessor(&self, node: &[u8]) -> &dyn NodeAccessor {
        if node::is_leaf(node) {
            self.leaf.as_ref()
        } else {
            self.non_leaf.as_ref()
        }
    }

    /// Largest marshalled tuple the tree accepts.
    #[must_use]
    pub const fn max_tuple_size(&self) -> usize {
        self.max_tuple_size
    }

    /// Check that `data` can be stored and return its marshalled size.
    ///
    /// Besides the leaf limit, the internal entry that a split would derive
    /// from `data` must fit half a node as well.
    pub fn validate_tuple_size(&self, data: &TupleData<'_>) -> Result<usize, BTreeError> {
        let overflow = |actual, max| BTreeError::Overflow {
            descriptor: self.tuple_descriptor().clone(),
            data: data.to_owned_data(),
            actual,
            max,
        };
        let cb_tuple = self.leaf.tuple_accessor().byte_count(data);
        if cb_tuple > self.max_tuple_size {
            return Err(overflow(cb_tuple, self.max_tuple_size));
        }
        if let Some(max) = self.max_separator_size {
            let child = NULL_PAGE_ID.to_le_bytes();
            let mut separator = data.project(&self.descriptor.key_projection);
            separator.push(Some(child.as_slice()));
            let cb_separator = self.non_leaf.tuple_accessor().byte_count(&separator);
            if cb_separator > max {
                return Err(overflow(cb_separator, max));
            }
        }
        Ok(cb_tuple)
    }

    /// Check that `key` is a full or prefix key of this tree.
    pub fn validate_key(&self, key: &TupleData<'_>) -> Result<(), BTreeError> {
        self.key_descriptor.validate_prefix(key)?;
        Ok(())
    }

    /// Child page id stored in `slot` of the internal node `node`.
    #[must_use]
    pub fn child(&self, node: &[u8], slot: usize) -> PageId {
        let entry = self.non_leaf.entry(node, slot);
        let child_attribute = self.non_leaf.tuple_accessor().len() - 1;
        self.non_leaf
            .tuple_accessor()
            .attribute(entry, child_attribute)
            .map_or(NULL_PAGE_ID, |datum| read_u64(datum, 0))
    }

    /// Right sibling of `node`, [`NULL_PAGE_ID`] at the end of a level.
    #[must_use]
    pub fn right_sibling(&self, node: &[u8]) -> PageId {
        node::right_sibling(node)
    }

    /// Slot of the child of the internal node `node` to descend into when
    /// looking for `key`.
    ///
    /// `DupSeek::End` picks the last child whose entry is not above `key`.
    /// The other modes pick the child before the first entry equal to
    /// `key`, since equal keys may extend into it; callers move right from
    /// the leaf they reach.
    #[must_use]
    pub fn child_slot(&self, node: &[u8], key: &TupleData<'_>, dup_seek: DupSeek) -> usize {
        let dup_seek = if dup_seek == DupSeek::End {
            DupSeek::End
        } else {
            DupSeek::Begin
        };
        let (slot, found) = self.non_leaf.binary_search(node, key, dup_seek, false);
        if found && slot > 0 { slot - 1 } else { slot }
    }

    /// Follow right-sibling links from the internal node `page_id` to the
    /// first node with entries and return its first child, or
    /// [`NULL_PAGE_ID`] if the chain runs out.
    pub fn first_child(&self, mut page_id: PageId) -> Result<PageId, BTreeError> {
        while page_id != NULL_PAGE_ID {
            let guard = self.cache().read_page(page_id)?;
            let data = guard.data();
            if n_entries(data) > 0 {
                return Ok(self.child(data, 0));
            }
            page_id = node::right_sibling(data);
        }
        Ok(NULL_PAGE_ID)
    }

    /// The internal entry pointing at `child`, keyed by the first key of
    /// the node `node`.
    #[must_use]
    pub fn separator(&self, node: &[u8], child: PageId) -> OwnedTupleData {
        let mut separator = self.node_accessor(node).key(node, 0).to_owned_data();
        separator.push(Some(child.to_le_bytes().to_vec()));
        separator
    }

    /// Marshal `data` with the accessor of the given level.
    #[must_use]
    pub fn marshal(&self, leaf: bool, data: &TupleData<'_>) -> Vec<u8> {
        let accessor = if leaf {
            self.leaf.tuple_accessor()
        } else {
            self.non_leaf.tuple_accessor()
        };
        let mut image = vec![0u8; accessor.byte_count(data)];
        accessor.marshal(data, &mut image);
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::node::NODE_HEADER_SIZE;
    use crate::storage::MemorySegment;
    use crate::tuple::Value;

    fn cache(page_size: usize) -> Arc<PageCache> {
        Arc::new(PageCache::new(Box::new(MemorySegment::new(page_size)), 16))
    }

    fn varchar_descriptor(cache: Arc<PageCache>) -> BTreeDescriptor {
        BTreeDescriptor::new(
            cache,
            TupleDescriptor::new(vec![
                TupleAttributeDescriptor::scalar(StandardType::Int32, false),
                TupleAttributeDescriptor::new(StandardType::VarChar, true, 400),
            ]),
            TupleProjection::new(vec![0]),
        )
    }

    #[test]
    fn test_strategy_selection() {
        let fixed = BTreeAccessBase::new(BTreeDescriptor::new(
            cache(256),
            TupleDescriptor::new(vec![
                TupleAttributeDescriptor::scalar(StandardType::UInt64, false),
                TupleAttributeDescriptor::scalar(StandardType::UInt16, false),
            ]),
            TupleProjection::new(vec![0]),
        ))
        .expect("open");
        assert!(fixed.leaf_accessor().has_fixed_width_entries());
        assert!(fixed.non_leaf_accessor().has_fixed_width_entries());
        assert_eq!(fixed.non_leaf_accessor().tuple_descriptor().len(), 2);

        // Variable leaves with a fixed key: heap leaves, compact internals.
        let mixed = BTreeAccessBase::new(varchar_descriptor(cache(1024))).expect("open");
        assert!(!mixed.leaf_accessor().has_fixed_width_entries());
        assert!(mixed.non_leaf_accessor().has_fixed_width_entries());
        assert_eq!(mixed.key_descriptor().len(), 1);
    }

    #[test]
    fn test_max_tuple_size() {
        let base = BTreeAccessBase::new(varchar_descriptor(cache(1024))).expect("open");
        // (1024 - 32) / 2 - 2 bytes of heap overhead
        assert_eq!(base.max_tuple_size(), 494);

        let fixed = BTreeAccessBase::new(BTreeDescriptor::new(
            cache(NODE_HEADER_SIZE + 40),
            TupleDescriptor::new(vec![
                TupleAttributeDescriptor::scalar(StandardType::UInt64, false),
                TupleAttributeDescriptor::scalar(StandardType::UInt16, false),
            ]),
            TupleProjection::new(vec![0]),
        ))
        .expect("open");
        assert_eq!(fixed.max_tuple_size(), 10);
    }

    #[test]
    fn test_oversized_tuple_overflows() {
        let base = BTreeAccessBase::new(varchar_descriptor(cache(512))).expect("open");
        let max = base.max_tuple_size();
        // Int32 (4) + end offset (2) + null bits (1) = 7 bytes of fixed layout.
        let text = "x".repeat(max + 1 - 7);
        let owned = OwnedTupleData::from_values(
            base.tuple_descriptor(),
            &[Value::Int(1), Value::Text(text)],
        )
        .expect("encode");
        match base.validate_tuple_size(&owned.as_data()) {
            Err(BTreeError::Overflow { actual, max: m, .. }) => {
                assert_eq!(actual, max + 1);
                assert_eq!(m, max);
            }
            other => panic!("expected overflow, got {other:?}"),
        }

        let fits = OwnedTupleData::from_values(
            base.tuple_descriptor(),
            &[Value::Int(1), Value::Text("x".repeat(max - 7))],
        )
        .expect("encode");
        assert_eq!(
            base.validate_tuple_size(&fits.as_data()).expect("fits"),
            max
        );
    }

    #[test]
    fn test_first_child_skips_empty_pages() {
        let cache = cache(256);
        let base = BTreeAccessBase::new(BTreeDescriptor::new(
            Arc::clone(&cache),
            TupleDescriptor::new(vec![TupleAttributeDescriptor::scalar(
                StandardType::UInt32,
                false,
            )]),
            TupleProjection::identity(1),
        ))
        .expect("open");
        let accessor = base.non_leaf_accessor();

        let mut pages = Vec::new();
        for _ in 0..3 {
            let mut guard = cache.allocate_page().expect("allocate");
            accessor.clear_node(guard.data_mut(), 1);
            pages.push(guard);
        }
        let ids: Vec<PageId> = pages.iter().map(|g| g.page_id()).collect();
        node::set_right_sibling(pages[0].data_mut(), ids[1]);
        node::set_right_sibling(pages[1].data_mut(), ids[2]);

        let key = 9u32.to_le_bytes();
        let child = 42u64.to_le_bytes();
        let entry = TupleData::new(vec![Some(key.as_slice()), Some(child.as_slice())]);
        accessor.insert_tuple(pages[2].data_mut(), 0, &entry);
        drop(pages);

        assert_eq!(base.first_child(ids[0]).expect("first child"), 42);
        assert_eq!(base.first_child(ids[1]).expect("first child"), 42);
    }

    #[test]
    fn test_first_child_of_empty_chain() {
        let cache = cache(256);
        let base = BTreeAccessBase::new(varchar_descriptor(Arc::clone(&cache))).expect("open");
        let mut guard = cache.allocate_page().expect("allocate");
        base.non_leaf_accessor().clear_node(guard.data_mut(), 1);
        let page_id = guard.page_id();
        drop(guard);
        assert_eq!(base.first_child(page_id).expect("first child"), NULL_PAGE_ID);
    }

    #[test]
    fn test_child_slot_with_duplicate_separators() {
        let cache = cache(256);
        let base = BTreeAccessBase::new(BTreeDescriptor::new(
            Arc::clone(&cache),
            TupleDescriptor::new(vec![TupleAttributeDescriptor::scalar(
                StandardType::UInt32,
                false,
            )]),
            TupleProjection::identity(1),
        ))
        .expect("open");
        let accessor = base.non_leaf_accessor();
        let mut node = vec![0u8; 256];
        accessor.clear_node(&mut node, 1);
        for (slot, (key, child)) in [(10u32, 100u64), (20, 200), (20, 300), (30, 400)]
            .into_iter()
            .enumerate()
        {
            let k = key.to_le_bytes();
            let c = child.to_le_bytes();
            accessor.insert_tuple(
                &mut node,
                slot,
                &TupleData::new(vec![Some(k.as_slice()), Some(c.as_slice())]),
            );
        }
        let slot_for = |key: u32, dup_seek| {
            let k = key.to_le_bytes();
            base.child_slot(&node, &TupleData::new(vec![Some(k.as_slice())]), dup_seek)
        };
        assert_eq!(slot_for(5, DupSeek::Any), 0);
        assert_eq!(slot_for(15, DupSeek::Any), 0);
        assert_eq!(slot_for(20, DupSeek::Begin), 0);
        assert_eq!(slot_for(20, DupSeek::End), 2);
        assert_eq!(slot_for(25, DupSeek::End), 2);
        assert_eq!(slot_for(99, DupSeek::Begin), 3);
        assert_eq!(base.child(&node, 2), 300);
    }
}

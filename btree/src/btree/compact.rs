use crate::btree::node::{
    self, NODE_HEADER_SIZE, cb_total_free, data_capacity, n_entries, set_cb_compact_free,
    set_cb_total_free, set_n_entries,
};
use crate::btree::node_storage::{Capacity, NodeStorage};
use crate::tuple::TupleAccessor;

/// Fixed-width entries packed in slot order right after the header.
///
/// ```text
/// [header][entry 0][entry 1]...[entry n-1][free space]
/// ```
///
/// Free space is always contiguous, so compaction never applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactNodeStorage {
    cb_entry: usize,
}

impl CompactNodeStorage {
    /// Storage for entries of `tuple`'s shape, which must be fixed-width.
    ///
    /// # Panics
    /// Panics if the shape is variable-width.
    #[must_use]
    pub fn new(tuple: &TupleAccessor) -> Self {
        assert!(
            tuple.is_fixed_width(),
            "compact node storage requires fixed-width entries"
        );
        Self {
            cb_entry: tuple.max_byte_count(),
        }
    }

    /// Size of every entry.
    #[must_use]
    pub const fn cb_entry(&self) -> usize {
        self.cb_entry
    }

    const fn slot_offset(&self, slot: usize) -> usize {
        NODE_HEADER_SIZE + slot * self.cb_entry
    }
}

impl NodeStorage for CompactNodeStorage {
    fn has_fixed_width_entries(&self) -> bool {
        true
    }

    fn entry_byte_count(&self, _cb_tuple: usize) -> usize {
        self.cb_entry
    }

    fn clear_node(&self, node: &mut [u8], height: u32) {
        node::init_header(node, height);
        set_cb_total_free(node, data_capacity(node.len()));
        set_cb_compact_free(node, 0);
    }

    fn entry_offset(&self, node: &[u8], slot: usize) -> usize {
        debug_assert!(slot < n_entries(node));
        self.slot_offset(slot)
    }

    fn allocate_entry(&self, node: &mut [u8], slot: usize, _cb_tuple: usize) -> usize {
        let n = n_entries(node);
        assert!(slot <= n, "slot {slot} out of range for {n} entries");
        let cb_free = cb_total_free(node);
        assert!(cb_free >= self.cb_entry, "compact node is full");

        let start = self.slot_offset(slot);
        node.copy_within(start..self.slot_offset(n), start + self.cb_entry);
        set_n_entries(node, n + 1);
        set_cb_total_free(node, cb_free - self.cb_entry);
        start
    }

    fn deallocate_entry(&self, node: &mut [u8], slot: usize, _tuple: &TupleAccessor) {
        let n = n_entries(node);
        assert!(slot < n, "slot {slot} out of range for {n} entries");
        if slot + 1 < n {
            let start = self.slot_offset(slot);
            node.copy_within(start + self.cb_entry..self.slot_offset(n), start);
        }
        set_n_entries(node, n - 1);
        set_cb_total_free(node, cb_total_free(node) + self.cb_entry);
    }

    fn calculate_capacity(&self, node: &[u8], _cb_tuple: usize) -> Capacity {
        if cb_total_free(node) >= self.cb_entry {
            Capacity::CanFit
        } else {
            Capacity::CanNotFit
        }
    }

    fn compact_node(&self, _src: &[u8], _dest: &mut [u8], _tuple: &TupleAccessor) {
        panic!("fixed-width nodes never need compaction");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{StandardType, TupleAttributeDescriptor, TupleDescriptor};

    fn u64_u16_accessor() -> TupleAccessor {
        TupleAccessor::new(&TupleDescriptor::new(vec![
            TupleAttributeDescriptor::scalar(StandardType::UInt64, false),
            TupleAttributeDescriptor::scalar(StandardType::UInt16, false),
        ]))
        .expect("layout")
    }

    #[test]
    fn test_allocate_and_deallocate_shift_entries() {
        let tuple = u64_u16_accessor();
        let storage = CompactNodeStorage::new(&tuple);
        assert_eq!(storage.cb_entry(), 10);

        let mut node = vec![0u8; NODE_HEADER_SIZE + 50];
        storage.clear_node(&mut node, 0);
        assert_eq!(cb_total_free(&node), 50);

        for (slot, byte) in [(0, 0xB), (0, 0xA), (2, 0xC)] {
            let offset = storage.allocate_entry(&mut node, slot, 10);
            node[offset..offset + 10].fill(byte);
        }
        let entry_byte = |node: &[u8], slot| node[storage.entry_offset(node, slot)];
        assert_eq!(n_entries(&node), 3);
        assert_eq!(
            (0..3).map(|s| entry_byte(&node, s)).collect::<Vec<_>>(),
            vec![0xA, 0xB, 0xC]
        );
        assert_eq!(cb_total_free(&node), 20);

        storage.deallocate_entry(&mut node, 0, &tuple);
        assert_eq!(entry_byte(&node, 0), 0xB);
        assert_eq!(entry_byte(&node, 1), 0xC);
        storage.deallocate_entry(&mut node, 1, &tuple);
        assert_eq!(n_entries(&node), 1);
        assert_eq!(cb_total_free(&node), 40);
    }

    #[test]
    fn test_capacity_never_needs_compaction() {
        let tuple = u64_u16_accessor();
        let storage = CompactNodeStorage::new(&tuple);
        let mut node = vec![0u8; NODE_HEADER_SIZE + 25];
        storage.clear_node(&mut node, 0);
        storage.allocate_entry(&mut node, 0, 10);
        assert_eq!(storage.calculate_capacity(&node, 10), Capacity::CanFit);
        storage.allocate_entry(&mut node, 1, 10);
        assert_eq!(storage.calculate_capacity(&node, 1), Capacity::CanNotFit);
    }

    #[test]
    #[should_panic(expected = "never need compaction")]
    fn test_compaction_is_a_contract_violation() {
        let tuple = u64_u16_accessor();
        let storage = CompactNodeStorage::new(&tuple);
        let src = vec![0u8; 64];
        let mut dest = vec![0u8; 64];
        storage.compact_node(&src, &mut dest, &tuple);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_deallocate_past_end_panics() {
        let tuple = u64_u16_accessor();
        let storage = CompactNodeStorage::new(&tuple);
        let mut node = vec![0u8; 64];
        storage.clear_node(&mut node, 0);
        storage.deallocate_entry(&mut node, 0, &tuple);
    }
}

// Entry offsets are bounded by the page size, at most 64KB.
#![allow(clippy::cast_possible_truncation)]

use crate::btree::node::{
    self, NODE_HEADER_SIZE, cb_compact_free, cb_total_free, data_capacity, height, n_entries,
    right_sibling, set_cb_compact_free, set_cb_total_free, set_n_entries, set_right_sibling,
};
use crate::btree::node_storage::{Capacity, NodeStorage};
use crate::storage::{read_u16, write_u16};
use crate::tuple::TupleAccessor;

/// Size of one entry in the offset array.
const OFFSET_SIZE: usize = 2;

/// Variable-width entries addressed through an offset array.
///
/// ```text
/// [header][offset 0]...[offset n-1][compact free][entry data, packed from the end]
/// ```
///
/// Entry data is allocated from the tail of the compact free region, so
/// it grows backward from the end of the page. Deallocating an entry
/// returns its bytes to `cb_total_free` only; they stay fragmented until
/// the node is compacted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapNodeStorage;

impl HeapNodeStorage {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

const fn offset_slot(slot: usize) -> usize {
    NODE_HEADER_SIZE + slot * OFFSET_SIZE
}

impl NodeStorage for HeapNodeStorage {
    fn has_fixed_width_entries(&self) -> bool {
        false
    }

    fn entry_byte_count(&self, cb_tuple: usize) -> usize {
        cb_tuple + OFFSET_SIZE
    }

    fn clear_node(&self, node: &mut [u8], height: u32) {
        node::init_header(node, height);
        let cb_free = data_capacity(node.len());
        set_cb_total_free(node, cb_free);
        set_cb_compact_free(node, cb_free);
    }

    fn entry_offset(&self, node: &[u8], slot: usize) -> usize {
        debug_assert!(slot < n_entries(node));
        usize::from(read_u16(node, offset_slot(slot)))
    }

    fn allocate_entry(&self, node: &mut [u8], slot: usize, cb_tuple: usize) -> usize {
        let n = n_entries(node);
        assert!(slot <= n, "slot {slot} out of range for {n} entries");
        let cb_needed = self.entry_byte_count(cb_tuple);
        let cb_compact = cb_compact_free(node);
        assert!(
            cb_compact >= cb_needed,
            "heap node needs {cb_needed} contiguous bytes but has {cb_compact}"
        );

        let dest = offset_slot(n) + cb_compact - cb_tuple;
        node.copy_within(offset_slot(slot)..offset_slot(n), offset_slot(slot + 1));
        write_u16(node, offset_slot(slot), dest as u16);
        set_n_entries(node, n + 1);
        set_cb_total_free(node, cb_total_free(node) - cb_needed);
        set_cb_compact_free(node, cb_compact - cb_needed);
        dest
    }

    fn deallocate_entry(&self, node: &mut [u8], slot: usize, tuple: &TupleAccessor) {
        let n = n_entries(node);
        assert!(slot < n, "slot {slot} out of range for {n} entries");
        let offset = self.entry_offset(node, slot);
        let cb_tuple = tuple.buffer_byte_count(&node[offset..]);
        if slot + 1 < n {
            node.copy_within(offset_slot(slot + 1)..offset_slot(n), offset_slot(slot));
        }
        set_n_entries(node, n - 1);
        set_cb_total_free(node, cb_total_free(node) + self.entry_byte_count(cb_tuple));
    }

    fn calculate_capacity(&self, node: &[u8], cb_tuple: usize) -> Capacity {
        let cb_needed = self.entry_byte_count(cb_tuple);
        if cb_needed <= cb_compact_free(node) {
            Capacity::CanFit
        } else if cb_needed <= cb_total_free(node) {
            Capacity::CanFitWithCompaction
        } else {
            Capacity::CanNotFit
        }
    }

    fn compact_node(&self, src: &[u8], dest: &mut [u8], tuple: &TupleAccessor) {
        self.clear_node(dest, height(src));
        set_right_sibling(dest, right_sibling(src));
        for slot in 0..n_entries(src) {
            let offset = self.entry_offset(src, slot);
            let cb_tuple = tuple.buffer_byte_count(&src[offset..]);
            let to = self.allocate_entry(dest, slot, cb_tuple);
            dest[to..to + cb_tuple].copy_from_slice(&src[offset..offset + cb_tuple]);
        }
        debug_assert_eq!(cb_total_free(src), cb_total_free(dest));
        debug_assert_eq!(cb_total_free(dest), cb_compact_free(dest));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{StandardType, TupleAttributeDescriptor, TupleData, TupleDescriptor};

    fn varbinary_accessor() -> TupleAccessor {
        TupleAccessor::new(&TupleDescriptor::new(vec![TupleAttributeDescriptor::new(
            StandardType::VarBinary,
            false,
            200,
        )]))
        .expect("layout")
    }

    /// Allocate and marshal an image of exactly `cb` bytes whose payload
    /// is filled with `fill`.
    fn put(node: &mut [u8], tuple: &TupleAccessor, slot: usize, cb: usize, fill: u8) {
        let payload = vec![fill; cb - 2];
        let data = TupleData::new(vec![Some(payload.as_slice())]);
        assert_eq!(tuple.byte_count(&data), cb);
        let offset = HeapNodeStorage.allocate_entry(node, slot, cb);
        tuple.marshal(&data, &mut node[offset..]);
    }

    fn payload_byte(node: &[u8], tuple: &TupleAccessor, slot: usize) -> u8 {
        let offset = HeapNodeStorage.entry_offset(node, slot);
        tuple.attribute(&node[offset..], 0).expect("not null")[0]
    }

    #[test]
    fn test_fragmentation_needs_compaction() {
        let tuple = varbinary_accessor();
        let storage = HeapNodeStorage::new();
        let mut node = vec![0u8; NODE_HEADER_SIZE + 1000];
        storage.clear_node(&mut node, 0);
        assert_eq!(cb_total_free(&node), 1000);
        assert_eq!(cb_compact_free(&node), 1000);

        put(&mut node, &tuple, 0, 50, 1);
        assert_eq!(cb_compact_free(&node), 948);
        assert_eq!(cb_total_free(&node), 948);

        storage.deallocate_entry(&mut node, 0, &tuple);
        assert_eq!(cb_total_free(&node), 1000);
        assert_eq!(cb_compact_free(&node), 948);

        assert_eq!(
            storage.calculate_capacity(&node, 60),
            Capacity::CanFit,
            "60 + 2 bytes still fit in the compact region"
        );
        assert_eq!(
            storage.calculate_capacity(&node, 950),
            Capacity::CanFitWithCompaction
        );
        assert_eq!(storage.calculate_capacity(&node, 999), Capacity::CanNotFit);
    }

    #[test]
    fn test_full_page_reports_compaction_after_delete() {
        let tuple = varbinary_accessor();
        let storage = HeapNodeStorage::new();
        let mut node = vec![0u8; NODE_HEADER_SIZE + 200];
        storage.clear_node(&mut node, 0);
        // Three 60-byte images use 3 * 62 = 186 bytes, leaving 14.
        for slot in 0..3 {
            put(&mut node, &tuple, slot, 60, slot as u8);
        }
        assert_eq!(cb_total_free(&node), 14);
        assert_eq!(storage.calculate_capacity(&node, 60), Capacity::CanNotFit);

        storage.deallocate_entry(&mut node, 1, &tuple);
        assert_eq!(cb_total_free(&node), 76);
        assert_eq!(cb_compact_free(&node), 14);
        assert_eq!(
            storage.calculate_capacity(&node, 60),
            Capacity::CanFitWithCompaction
        );
    }

    #[test]
    fn test_compact_node_preserves_entries() {
        let tuple = varbinary_accessor();
        let storage = HeapNodeStorage::new();
        let mut node = vec![0u8; NODE_HEADER_SIZE + 300];
        storage.clear_node(&mut node, 2);
        set_right_sibling(&mut node, 77);
        for (slot, cb) in [10, 30, 20, 40].into_iter().enumerate() {
            put(&mut node, &tuple, slot, cb, slot as u8 + 1);
        }
        storage.deallocate_entry(&mut node, 1, &tuple);
        storage.deallocate_entry(&mut node, 0, &tuple);

        let mut compacted = vec![0u8; node.len()];
        storage.compact_node(&node, &mut compacted, &tuple);

        assert_eq!(n_entries(&compacted), 2);
        assert_eq!(height(&compacted), 2);
        assert_eq!(right_sibling(&compacted), 77);
        assert_eq!(cb_total_free(&compacted), cb_total_free(&node));
        assert_eq!(cb_compact_free(&compacted), cb_total_free(&compacted));
        assert_eq!(payload_byte(&compacted, &tuple, 0), 3);
        assert_eq!(payload_byte(&compacted, &tuple, 1), 4);
    }

    #[test]
    fn test_insert_in_middle_keeps_slot_order() {
        let tuple = varbinary_accessor();
        let storage = HeapNodeStorage::new();
        let mut node = vec![0u8; NODE_HEADER_SIZE + 200];
        storage.clear_node(&mut node, 0);
        put(&mut node, &tuple, 0, 12, 1);
        put(&mut node, &tuple, 1, 12, 3);
        put(&mut node, &tuple, 1, 20, 2);
        assert_eq!(
            (0..3).map(|s| payload_byte(&node, &tuple, s)).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(cb_total_free(&node), 200 - (14 + 14 + 22));
    }
}

//! B-tree node header.
//!
//! Every node page starts with the common [`PageHeader`] followed by the
//! node fields below. The rest of the page belongs to whichever node
//! storage strategy the tree uses for that level.

#![allow(clippy::cast_possible_truncation)]

use crate::storage::{
    NULL_PAGE_ID, PageHeader, PageId, PageType, read_u32, read_u64, write_u32, write_u64,
};

/// Node header layout (after the page header):
/// - `n_entries`: 4 bytes
/// - `height`: 4 bytes (0 = leaf)
/// - `cb_total_free`: 4 bytes
/// - `cb_compact_free`: 4 bytes
/// - `right_sibling`: 8 bytes ([`NULL_PAGE_ID`] at the end of a level)
///
/// Total, including the page header: 32 bytes
pub const NODE_HEADER_SIZE: usize = 32;

mod offsets {
    pub const N_ENTRIES: usize = 8;
    pub const HEIGHT: usize = 12;
    pub const CB_TOTAL_FREE: usize = 16;
    pub const CB_COMPACT_FREE: usize = 20;
    pub const RIGHT_SIBLING: usize = 24;
}

/// Decoded node header, for diagnostics and verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub n_entries: usize,
    pub height: u32,
    pub cb_total_free: usize,
    pub cb_compact_free: usize,
    pub right_sibling: PageId,
}

impl NodeHeader {
    /// Read the node header of `node`.
    #[must_use]
    pub fn read_from(node: &[u8]) -> Self {
        Self {
            n_entries: n_entries(node),
            height: height(node),
            cb_total_free: cb_total_free(node),
            cb_compact_free: cb_compact_free(node),
            right_sibling: right_sibling(node),
        }
    }

    /// Whether this is a leaf node.
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        self.height == 0
    }
}

/// Reset the header of `node` to an empty node of the given height with
/// no right sibling. Free-space counters are left to the storage strategy.
pub fn init_header(node: &mut [u8], height: u32) {
    PageHeader {
        page_type: PageType::BTreeNode,
        flags: 0,
        checksum: 0,
    }
    .write_to(node);
    set_n_entries(node, 0);
    set_height(node, height);
    set_right_sibling(node, NULL_PAGE_ID);
}

/// Bytes available to entries on a node page of `page_size` bytes.
#[must_use]
pub const fn data_capacity(page_size: usize) -> usize {
    page_size - NODE_HEADER_SIZE
}

#[must_use]
pub fn n_entries(node: &[u8]) -> usize {
    read_u32(node, offsets::N_ENTRIES) as usize
}

pub fn set_n_entries(node: &mut [u8], n: usize) {
    write_u32(node, offsets::N_ENTRIES, n as u32);
}

#[must_use]
pub fn height(node: &[u8]) -> u32 {
    read_u32(node, offsets::HEIGHT)
}

pub fn set_height(node: &mut [u8], height: u32) {
    write_u32(node, offsets::HEIGHT, height);
}

#[must_use]
pub fn is_leaf(node: &[u8]) -> bool {
    height(node) == 0
}

#[must_use]
pub fn cb_total_free(node: &[u8]) -> usize {
    read_u32(node, offsets::CB_TOTAL_FREE) as usize
}

pub fn set_cb_total_free(node: &mut [u8], cb: usize) {
    write_u32(node, offsets::CB_TOTAL_FREE, cb as u32);
}

#[must_use]
pub fn cb_compact_free(node: &[u8]) -> usize {
    read_u32(node, offsets::CB_COMPACT_FREE) as usize
}

pub fn set_cb_compact_free(node: &mut [u8], cb: usize) {
    write_u32(node, offsets::CB_COMPACT_FREE, cb as u32);
}

#[must_use]
pub fn right_sibling(node: &[u8]) -> PageId {
    read_u64(node, offsets::RIGHT_SIBLING)
}

pub fn set_right_sibling(node: &mut [u8], page_id: PageId) {
    write_u64(node, offsets::RIGHT_SIBLING, page_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let mut node = vec![0xAAu8; 256];
        init_header(&mut node, 3);
        set_n_entries(&mut node, 17);
        set_cb_total_free(&mut node, 100);
        set_cb_compact_free(&mut node, 60);
        set_right_sibling(&mut node, 42);

        let header = NodeHeader::read_from(&node);
        assert_eq!(
            header,
            NodeHeader {
                n_entries: 17,
                height: 3,
                cb_total_free: 100,
                cb_compact_free: 60,
                right_sibling: 42,
            }
        );
        assert!(!header.is_leaf());
        assert_eq!(
            PageHeader::read_from(&node).expect("page header").page_type,
            PageType::BTreeNode
        );
        // Data region is untouched.
        assert!(node[NODE_HEADER_SIZE..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_init_clears_sibling() {
        let mut node = vec![0u8; 128];
        set_right_sibling(&mut node, 9);
        init_header(&mut node, 0);
        assert_eq!(right_sibling(&node), NULL_PAGE_ID);
        assert!(is_leaf(&node));
        assert_eq!(data_capacity(128), 96);
    }
}

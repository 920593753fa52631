//! Structural checks over a whole tree.
//!
//! The verifier walks the tree depth first and reports every problem it
//! finds instead of stopping at the first one. It takes shared locks one
//! node at a time, so results are only meaningful while no writer is
//! active.

use std::cmp::Ordering;
use std::fmt;

use crate::btree::access_base::{BTreeAccessBase, BTreeDescriptor};
use crate::btree::error::BTreeError;
use crate::btree::node::{NodeHeader, data_capacity};
use crate::storage::{NULL_PAGE_ID, PageId};
use crate::tuple::{OwnedTupleData, TuplePrinter};

/// Shape of a verified tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BTreeStatistics {
    /// Height of the root; 0 for a single leaf.
    pub height: u32,
    pub node_count: u64,
    pub leaf_count: u64,
    /// Entries across all leaves.
    pub tuple_count: u64,
}

/// One inconsistency found in a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyProblem {
    pub page_id: PageId,
    pub message: String,
}

impl fmt::Display for VerifyProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {}: {}", self.page_id, self.message)
    }
}

/// Result of [`BTreeVerifier::verify`].
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub statistics: BTreeStatistics,
    pub problems: Vec<VerifyProblem>,
}

impl VerifyReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }

    fn problem(&mut self, page_id: PageId, message: String) {
        self.problems.push(VerifyProblem { page_id, message });
    }
}

/// Key range a node must stay within. Both ends are inclusive since runs
/// of equal keys may straddle a separator.
#[derive(Debug, Clone, Default)]
struct KeyBounds {
    lower: Option<OwnedTupleData>,
    upper: Option<OwnedTupleData>,
}

/// Checks key order, space accounting, heights, separators and sibling
/// links.
#[derive(Debug)]
pub struct BTreeVerifier {
    base: BTreeAccessBase,
}

impl BTreeVerifier {
    pub fn new(descriptor: BTreeDescriptor) -> Result<Self, BTreeError> {
        Ok(Self {
            base: BTreeAccessBase::new(descriptor)?,
        })
    }

    /// Walk the whole tree.
    pub fn verify(&self) -> Result<VerifyReport, BTreeError> {
        let mut report = VerifyReport::default();
        let root = self.base.root_page_id();
        if root == NULL_PAGE_ID {
            return Ok(report);
        }
        let mut levels: Vec<Vec<PageId>> = Vec::new();
        let height = NodeHeader::read_from(self.base.cache().read_page(root)?.data()).height;
        report.statistics.height = height;
        self.verify_node(
            root,
            0,
            height,
            &KeyBounds::default(),
            &mut levels,
            &mut report,
        )?;
        self.verify_sibling_chains(&levels, &mut report)?;

        if !report.is_ok() {
            tracing::warn!(
                root,
                problems = report.problems.len(),
                "B-tree verification failed"
            );
        }
        Ok(report)
    }

    fn verify_node(
        &self,
        page_id: PageId,
        depth: usize,
        expected_height: u32,
        bounds: &KeyBounds,
        levels: &mut Vec<Vec<PageId>>,
        report: &mut VerifyReport,
    ) -> Result<(), BTreeError> {
        let guard = self.base.cache().read_page(page_id)?;
        let node = guard.data();
        let header = NodeHeader::read_from(node);
        let accessor = self.base.node_accessor(node);
        let key_descriptor = self.base.key_descriptor();
        let n = header.n_entries;

        if levels.len() <= depth {
            levels.resize_with(depth + 1, Vec::new);
        }
        levels[depth].push(page_id);
        if header.height != expected_height {
            report.problem(
                page_id,
                format!(
                    "height {} where {expected_height} was expected",
                    header.height
                ),
            );
        }

        let cb_used: usize = (0..n)
            .map(|slot| accessor.entry_byte_count(accessor.entry(node, slot).len()))
            .sum();
        let cb_data = data_capacity(node.len());
        if header.cb_total_free + cb_used != cb_data {
            report.problem(
                page_id,
                format!(
                    "{} bytes free and {cb_used} used in a {cb_data}-byte node",
                    header.cb_total_free
                ),
            );
        }
        if header.cb_compact_free > header.cb_total_free {
            report.problem(
                page_id,
                format!(
                    "compact free space {} exceeds total free space {}",
                    header.cb_compact_free, header.cb_total_free
                ),
            );
        }

        for slot in 1..n {
            let previous = accessor.key(node, slot - 1);
            if key_descriptor.compare_tuples(&previous, &accessor.key(node, slot))
                == Ordering::Greater
            {
                report.problem(page_id, format!("slot {} sorts after slot {slot}", slot - 1));
            }
        }
        for slot in 0..n {
            let key = accessor.key(node, slot);
            let below = bounds.lower.as_ref().is_some_and(|lower| {
                key_descriptor.compare_tuples(&key, &lower.as_data()) == Ordering::Less
            });
            let above = bounds.upper.as_ref().is_some_and(|upper| {
                key_descriptor.compare_tuples(&key, &upper.as_data()) == Ordering::Greater
            });
            if below || above {
                report.problem(
                    page_id,
                    format!(
                        "key {} in slot {slot} is outside the range of its parent entry",
                        TuplePrinter::new(key_descriptor, &key)
                    ),
                );
            }
        }

        report.statistics.node_count += 1;
        if header.is_leaf() {
            report.statistics.leaf_count += 1;
            report.statistics.tuple_count += n as u64;
            return Ok(());
        }
        if n == 0 {
            report.problem(page_id, "internal node has no entries".to_string());
            return Ok(());
        }
        if expected_height == 0 {
            return Ok(());
        }

        let children: Vec<(PageId, KeyBounds)> = (0..n)
            .map(|slot| {
                let lower = Some(accessor.key(node, slot).to_owned_data());
                let upper = if slot + 1 < n {
                    Some(accessor.key(node, slot + 1).to_owned_data())
                } else {
                    bounds.upper.clone()
                };
                (self.base.child(node, slot), KeyBounds { lower, upper })
            })
            .collect();
        drop(guard);

        for (child, child_bounds) in &children {
            self.verify_node(
                *child,
                depth + 1,
                expected_height - 1,
                child_bounds,
                levels,
                report,
            )?;
        }
        Ok(())
    }

    /// Each level, in the order the walk reached its nodes, must form one
    /// right-sibling chain ending in [`NULL_PAGE_ID`].
    fn verify_sibling_chains(
        &self,
        levels: &[Vec<PageId>],
        report: &mut VerifyReport,
    ) -> Result<(), BTreeError> {
        for level in levels {
            for (i, &page_id) in level.iter().enumerate() {
                let expected = level.get(i + 1).copied().unwrap_or(NULL_PAGE_ID);
                let guard = self.base.cache().read_page(page_id)?;
                let sibling = self.base.right_sibling(guard.data());
                drop(guard);
                if sibling != expected {
                    report.problem(
                        page_id,
                        format!("right sibling is page {sibling}, expected page {expected}"),
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::builder::BTreeBuilder;
    use crate::btree::node;
    use crate::testing::{init_tracing, int_descriptor, int_row, memory_cache};
    use crate::tuple::TupleProjection;

    fn built_tree(rows: u32) -> BTreeDescriptor {
        let mut builder = BTreeBuilder::new(BTreeDescriptor::new(
            memory_cache(256, 64),
            int_descriptor(),
            TupleProjection::new(vec![0]),
        ))
        .expect("open builder");
        builder.create_empty_root().expect("create root");
        builder
            .build((0..rows).map(|i| int_row(i, i)), 1.0)
            .expect("build");
        builder.descriptor()
    }

    fn verifier(descriptor: BTreeDescriptor) -> BTreeVerifier {
        BTreeVerifier::new(descriptor).expect("open verifier")
    }

    #[test]
    fn test_healthy_tree() {
        init_tracing();
        let report = verifier(built_tree(1000)).verify().expect("verify");
        assert!(report.is_ok(), "{:?}", report.problems);
        assert_eq!(report.statistics.tuple_count, 1000);
        assert!(report.statistics.leaf_count > 1);
        assert!(report.statistics.node_count > report.statistics.leaf_count);
        assert!(report.statistics.height >= 1);
    }

    #[test]
    fn test_rootless_tree_is_empty() {
        let mut builder = BTreeBuilder::new(BTreeDescriptor::new(
            memory_cache(256, 8),
            int_descriptor(),
            TupleProjection::new(vec![0]),
        ))
        .expect("open builder");
        builder.create_empty_root().expect("create root");
        builder.truncate(true).expect("truncate");
        let report = verifier(builder.descriptor()).verify().expect("verify");
        assert!(report.is_ok());
        assert_eq!(report.statistics, BTreeStatistics::default());
    }

    #[test]
    fn test_detects_out_of_order_keys() {
        init_tracing();
        let descriptor = built_tree(5);
        let verifier = verifier(descriptor);
        let root = verifier.base.root_page_id();
        {
            let mut guard = verifier.base.cache().write_page(root).expect("write");
            let offset = verifier.base.leaf_accessor().entry_offset(guard.data(), 0);
            guard.data_mut()[offset..offset + 4].copy_from_slice(&100u32.to_le_bytes());
        }
        let report = verifier.verify().expect("verify");
        assert_eq!(report.problems.len(), 1, "{:?}", report.problems);
        assert_eq!(report.problems[0].page_id, root);
        assert!(report.problems[0].message.contains("sorts after"));
    }

    #[test]
    fn test_detects_bad_free_space() {
        let verifier = verifier(built_tree(5));
        let root = verifier.base.root_page_id();
        {
            let mut guard = verifier.base.cache().write_page(root).expect("write");
            let cb_free = node::cb_total_free(guard.data());
            node::set_cb_total_free(guard.data_mut(), cb_free - 1);
        }
        let report = verifier.verify().expect("verify");
        assert!(!report.is_ok());
        assert!(report.problems[0].message.contains("bytes free"));
    }

    #[test]
    fn test_detects_broken_sibling_chain() {
        let verifier = verifier(built_tree(1000));
        let first = verifier
            .base
            .first_child(verifier.base.root_page_id())
            .expect("first child");
        {
            let mut guard = verifier.base.cache().write_page(first).expect("write");
            node::set_right_sibling(guard.data_mut(), NULL_PAGE_ID);
        }
        let report = verifier.verify().expect("verify");
        assert_eq!(report.problems.len(), 1, "{:?}", report.problems);
        assert_eq!(report.problems[0].page_id, first);
        assert!(report.problems[0].message.contains("right sibling"));
    }
}

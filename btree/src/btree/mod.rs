//! The B-tree engine.
//!
//! - [`NodeStorage`]: slot layout inside a node page, either fixed-width
//!   ([`CompactNodeStorage`]) or offset-indirected ([`HeapNodeStorage`])
//! - [`NodeAccessor`]: key-aware node access built from a storage strategy
//!   and a [`KeyAccess`] kind
//! - [`BTreeAccessBase`]: per-tree choice of accessors and navigation
//! - [`BTreeReader`], [`BTreeWriter`], [`BTreeBuilder`], [`BTreeVerifier`]:
//!   tree-level operations
//!
//! # Locking
//!
//! Page locks are taken through the [`PageCache`](crate::storage::PageCache)
//! top down and, within a level, left to right. Node accessors never lock;
//! they work on whatever page buffer the caller hands them.

mod access_base;
mod builder;
mod compact;
mod error;
mod heap;
mod keyed;
pub mod node;
mod node_storage;
mod reader;
mod verifier;
mod writer;

pub use access_base::{BTreeAccessBase, BTreeDescriptor};
pub use builder::BTreeBuilder;
pub use compact::CompactNodeStorage;
pub use error::BTreeError;
pub use heap::HeapNodeStorage;
pub use keyed::{DupSeek, KeyAccess, KeyedNodeAccessor, NodeAccessor, ProjectedKey, WholeTupleKey};
pub use node::{NODE_HEADER_SIZE, NodeHeader};
pub use node_storage::{Capacity, NodeStorage};
pub use reader::BTreeReader;
pub use verifier::{BTreeStatistics, BTreeVerifier, VerifyProblem, VerifyReport};
pub use writer::{BTreeWriter, Distinctness};

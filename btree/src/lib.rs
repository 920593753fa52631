// Storage engine core:
// - tuple: typed attributes and their byte images
// - storage: segments, buffer pool and the page cache that locks pages
// - btree: node layouts, search, and the reader/writer/builder on top
//
// Life of an insert:
// 1. Validate the tuple against the tree's shape and size limit
// 2. Descend from the root, crabbing exclusive page locks
// 3. Insert into the leaf, compacting or splitting as needed
// 4. Push separators up the retained path, growing the root last

pub mod btree;
pub mod config;
pub mod storage;
#[cfg(test)]
mod testing;
pub mod tuple;

pub use btree::{
    BTreeBuilder, BTreeDescriptor, BTreeError, BTreeReader, BTreeVerifier, BTreeWriter,
    Distinctness, DupSeek,
};
pub use config::{ConfigError, StorageConfig};
pub use storage::{FileSegment, MemorySegment, PageCache, Segment};
pub use tuple::{OwnedTupleData, TupleData, TupleDescriptor, TupleProjection, Value};

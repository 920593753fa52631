//! Helpers shared by the tree tests.

use std::sync::Arc;

use crate::btree::{BTreeBuilder, BTreeDescriptor};
use crate::storage::{MemorySegment, PageCache};
use crate::tuple::{
    OwnedTupleData, StandardType, TupleAttributeDescriptor, TupleDescriptor, TupleProjection,
    Value,
};

/// Route `tracing` output to the test harness. Safe to call from every
/// test; only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A page cache over a fresh in-memory segment.
pub fn memory_cache(page_size: usize, capacity: usize) -> Arc<PageCache> {
    Arc::new(PageCache::new(
        Box::new(MemorySegment::new(page_size)),
        capacity,
    ))
}

/// Allocate an empty tree and return its descriptor.
pub fn create_tree(
    cache: Arc<PageCache>,
    tuple_descriptor: TupleDescriptor,
    key_projection: TupleProjection,
) -> BTreeDescriptor {
    let mut builder =
        BTreeBuilder::new(BTreeDescriptor::new(cache, tuple_descriptor, key_projection))
            .expect("open builder");
    builder.create_empty_root().expect("create root");
    builder.descriptor()
}

/// `(key UInt32, payload UInt32)`, fixed width.
pub fn int_descriptor() -> TupleDescriptor {
    TupleDescriptor::new(vec![
        TupleAttributeDescriptor::scalar(StandardType::UInt32, false),
        TupleAttributeDescriptor::scalar(StandardType::UInt32, false),
    ])
}

pub fn int_row(key: u32, payload: u32) -> OwnedTupleData {
    OwnedTupleData::from_values(
        &int_descriptor(),
        &[Value::UInt(key.into()), Value::UInt(payload.into())],
    )
    .expect("encode row")
}

/// A search key for trees keyed on the first `UInt32` column.
pub fn int_key(key: u32) -> OwnedTupleData {
    OwnedTupleData::new(vec![Some(key.to_le_bytes().to_vec())])
}

pub fn int_values(data: &OwnedTupleData) -> Vec<Value> {
    data.values(&int_descriptor())
}

/// `(key Int32, text VarChar(200) NULL)`, variable width.
pub fn text_descriptor() -> TupleDescriptor {
    TupleDescriptor::new(vec![
        TupleAttributeDescriptor::scalar(StandardType::Int32, false),
        TupleAttributeDescriptor::new(StandardType::VarChar, true, 200),
    ])
}

pub fn text_row(key: i32, text: Option<&str>) -> OwnedTupleData {
    let text = text.map_or(Value::Null, |text| Value::Text(text.to_string()));
    OwnedTupleData::from_values(&text_descriptor(), &[Value::Int(key.into()), text])
        .expect("encode row")
}

/// A search key for trees keyed on the first `Int32` column.
pub fn text_key(key: i32) -> OwnedTupleData {
    OwnedTupleData::new(vec![Some(key.to_le_bytes().to_vec())])
}

pub fn text_values(data: &OwnedTupleData) -> Vec<Value> {
    data.values(&text_descriptor())
}

//! Tuple shapes, values and their byte images.
//!
//! - [`TupleDescriptor`]: ordered attribute types, comparison and validation
//! - [`TupleData`] / [`OwnedTupleData`]: datums (`None` is NULL)
//! - [`TupleAccessor`]: marshals tuples into images and reads them back
//! - [`TupleProjectionAccessor`]: reads a subset of attributes from an image
//! - [`TuplePrinter`]: human-readable rendering for error messages

mod accessor;
mod data;
mod descriptor;
mod error;
mod printer;
mod projection;
mod types;

pub use accessor::TupleAccessor;
pub use data::{OwnedTupleData, TupleData};
pub use descriptor::{TupleAttributeDescriptor, TupleDescriptor, TupleProjection};
pub use error::TupleError;
pub use printer::TuplePrinter;
pub use projection::TupleProjectionAccessor;
pub use types::{StandardType, Value};

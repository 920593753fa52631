//! Tuple values.
//!
//! [`TupleData`] borrows its datums from wherever they live (usually a
//! page buffer), so unmarshalling a stored tuple never copies. A `None`
//! datum is NULL. [`OwnedTupleData`] owns its bytes and is what callers
//! keep across page unlocks.

use std::ops::Index;

use crate::tuple::descriptor::{TupleDescriptor, TupleProjection};
use crate::tuple::error::TupleError;
use crate::tuple::types::Value;

/// A tuple whose datums borrow from elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TupleData<'a> {
    datums: Vec<Option<&'a [u8]>>,
}

impl<'a> TupleData<'a> {
    #[must_use]
    pub const fn new(datums: Vec<Option<&'a [u8]>>) -> Self {
        Self { datums }
    }

    #[must_use]
    pub fn with_capacity(n: usize) -> Self {
        Self {
            datums: Vec::with_capacity(n),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.datums.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.datums.is_empty()
    }

    /// The datum of attribute `i`, `None` when NULL.
    #[must_use]
    pub fn datum(&self, i: usize) -> Option<&'a [u8]> {
        self.datums[i]
    }

    pub fn push(&mut self, datum: Option<&'a [u8]>) {
        self.datums.push(datum);
    }

    pub fn clear(&mut self) {
        self.datums.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&'a [u8]>> + '_ {
        self.datums.iter().copied()
    }

    /// Whether any of the first `n` datums is NULL.
    #[must_use]
    pub fn has_null_in_prefix(&self, n: usize) -> bool {
        self.datums.iter().take(n).any(Option::is_none)
    }

    /// The projected datums, in projection order.
    #[must_use]
    pub fn project(&self, projection: &TupleProjection) -> Self {
        Self::new(projection.iter().map(|i| self.datums[i]).collect())
    }

    /// Copy the datums into an owned tuple.
    #[must_use]
    pub fn to_owned_data(&self) -> OwnedTupleData {
        OwnedTupleData {
            datums: self.datums.iter().map(|d| d.map(<[u8]>::to_vec)).collect(),
        }
    }
}

impl<'a> Index<usize> for TupleData<'a> {
    type Output = Option<&'a [u8]>;

    fn index(&self, i: usize) -> &Self::Output {
        &self.datums[i]
    }
}

/// A tuple that owns its datums.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OwnedTupleData {
    datums: Vec<Option<Vec<u8>>>,
}

impl OwnedTupleData {
    #[must_use]
    pub const fn new(datums: Vec<Option<Vec<u8>>>) -> Self {
        Self { datums }
    }

    /// Encode typed values against `descriptor`.
    pub fn from_values(descriptor: &TupleDescriptor, values: &[Value]) -> Result<Self, TupleError> {
        if values.len() != descriptor.len() {
            return Err(TupleError::ArityMismatch {
                expected: descriptor.len(),
                actual: values.len(),
            });
        }
        let datums = values
            .iter()
            .zip(descriptor.iter())
            .map(|(value, attr)| value.encode(attr.type_id, attr.cb_storage))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { datums })
    }

    /// Borrow as [`TupleData`].
    #[must_use]
    pub fn as_data(&self) -> TupleData<'_> {
        TupleData::new(self.datums.iter().map(Option::as_deref).collect())
    }

    /// Decode every datum against `descriptor`.
    #[must_use]
    pub fn values(&self, descriptor: &TupleDescriptor) -> Vec<Value> {
        self.datums
            .iter()
            .zip(descriptor.iter())
            .map(|(datum, attr)| Value::decode(attr.type_id, datum.as_deref()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.datums.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.datums.is_empty()
    }

    pub fn push(&mut self, datum: Option<Vec<u8>>) {
        self.datums.push(datum);
    }
}

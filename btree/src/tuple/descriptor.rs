//! Tuple shapes.
//!
//! A [`TupleDescriptor`] is an ordered list of attribute descriptors. It
//! defines how tuples of that shape compare (lexicographically by
//! attribute, NULL before any value) and which datums are acceptable.

use std::cmp::Ordering;

use crate::tuple::data::TupleData;
use crate::tuple::error::TupleError;
use crate::tuple::types::StandardType;

/// Shape of one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleAttributeDescriptor {
    pub type_id: StandardType,
    pub nullable: bool,
    /// Bytes reserved for the value (the maximum for variable-width types).
    pub cb_storage: usize,
}

impl TupleAttributeDescriptor {
    /// Describe an attribute with explicit storage.
    #[must_use]
    pub const fn new(type_id: StandardType, nullable: bool, cb_storage: usize) -> Self {
        Self {
            type_id,
            nullable,
            cb_storage,
        }
    }

    /// Describe an attribute whose type fixes its own width.
    ///
    /// # Panics
    /// Panics for character and binary types, which need explicit storage.
    #[must_use]
    pub fn scalar(type_id: StandardType, nullable: bool) -> Self {
        let Some(cb_storage) = type_id.fixed_byte_count() else {
            panic!("{type_id:?} requires an explicit storage size");
        };
        Self::new(type_id, nullable, cb_storage)
    }

    /// Whether every value occupies exactly `cb_storage` bytes.
    #[must_use]
    pub const fn is_fixed_width(&self) -> bool {
        !self.type_id.is_variable_width()
    }
}

/// An ordered sequence of attribute indices.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TupleProjection(Vec<usize>);

impl TupleProjection {
    #[must_use]
    pub const fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    /// The projection `0..n`.
    #[must_use]
    pub fn identity(n: usize) -> Self {
        Self((0..n).collect())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }
}

/// Shape of a tuple.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TupleDescriptor {
    attributes: Vec<TupleAttributeDescriptor>,
}

impl TupleDescriptor {
    #[must_use]
    pub const fn new(attributes: Vec<TupleAttributeDescriptor>) -> Self {
        Self { attributes }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    #[must_use]
    pub fn attribute(&self, i: usize) -> &TupleAttributeDescriptor {
        &self.attributes[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TupleAttributeDescriptor> {
        self.attributes.iter()
    }

    pub fn push(&mut self, attribute: TupleAttributeDescriptor) {
        self.attributes.push(attribute);
    }

    /// The descriptor of the projected attributes, in projection order.
    #[must_use]
    pub fn project(&self, projection: &TupleProjection) -> Self {
        Self::new(projection.iter().map(|i| self.attributes[i]).collect())
    }

    /// The descriptor of the first `n` attributes.
    #[must_use]
    pub fn prefix(&self, n: usize) -> Self {
        Self::new(self.attributes[..n].to_vec())
    }

    /// Whether every attribute is fixed-width.
    #[must_use]
    pub fn is_fixed_width(&self) -> bool {
        self.attributes.iter().all(TupleAttributeDescriptor::is_fixed_width)
    }

    /// Check that each attribute's storage agrees with its type.
    pub fn check(&self) -> Result<(), TupleError> {
        for (attribute, attr) in self.attributes.iter().enumerate() {
            if let Some(cb) = attr
                .type_id
                .fixed_byte_count()
                .filter(|&cb| cb != attr.cb_storage)
            {
                return Err(TupleError::InvalidAttribute {
                    attribute,
                    message: format!(
                        "{:?} occupies {cb} bytes, declared {}",
                        attr.type_id, attr.cb_storage
                    ),
                });
            }
        }
        Ok(())
    }

    /// Compare two tuples attribute by attribute.
    #[must_use]
    pub fn compare_tuples(&self, a: &TupleData<'_>, b: &TupleData<'_>) -> Ordering {
        self.compare_tuples_prefix(a, b, self.len())
    }

    /// Compare the first `n` attributes of two tuples (fewer if either tuple
    /// is shorter). NULL sorts before every non-null value.
    #[must_use]
    pub fn compare_tuples_prefix(
        &self,
        a: &TupleData<'_>,
        b: &TupleData<'_>,
        n: usize,
    ) -> Ordering {
        let n = n.min(a.len()).min(b.len());
        for i in 0..n {
            let ordering = match (a.datum(i), b.datum(i)) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => self.attributes[i].type_id.compare(x, y),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Check that `data` is a valid tuple of this shape.
    pub fn validate(&self, data: &TupleData<'_>) -> Result<(), TupleError> {
        if data.len() != self.len() {
            return Err(TupleError::ArityMismatch {
                expected: self.len(),
                actual: data.len(),
            });
        }
        self.validate_prefix(data)
    }

    /// Check that `data` is a valid tuple of the first `data.len()`
    /// attributes of this shape, as used by prefix searches.
    pub fn validate_prefix(&self, data: &TupleData<'_>) -> Result<(), TupleError> {
        if data.len() > self.len() {
            return Err(TupleError::ArityMismatch {
                expected: self.len(),
                actual: data.len(),
            });
        }
        for (attribute, attr) in self.attributes.iter().take(data.len()).enumerate() {
            let Some(datum) = data.datum(attribute) else {
                if attr.nullable {
                    continue;
                }
                return Err(TupleError::NullNotAllowed { attribute });
            };
            if attr.is_fixed_width() {
                if datum.len() != attr.cb_storage {
                    return Err(TupleError::WrongWidth {
                        attribute,
                        expected: attr.cb_storage,
                        actual: datum.len(),
                    });
                }
            } else if datum.len() > attr.cb_storage {
                return Err(TupleError::TooLong {
                    attribute,
                    max: attr.cb_storage,
                    actual: datum.len(),
                });
            }
        }
        Ok(())
    }
}

impl FromIterator<TupleAttributeDescriptor> for TupleDescriptor {
    fn from_iter<I: IntoIterator<Item = TupleAttributeDescriptor>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_varchar() -> TupleDescriptor {
        TupleDescriptor::new(vec![
            TupleAttributeDescriptor::scalar(StandardType::Int32, true),
            TupleAttributeDescriptor::new(StandardType::VarChar, false, 8),
        ])
    }

    #[test]
    fn test_compare_nulls_first() {
        let desc = int_varchar();
        let one = 1i32.to_le_bytes();
        let a = TupleData::new(vec![None, Some(b"z".as_slice())]);
        let b = TupleData::new(vec![Some(one.as_slice()), Some(b"a".as_slice())]);
        assert_eq!(desc.compare_tuples(&a, &b), Ordering::Less);
        assert_eq!(desc.compare_tuples(&b, &a), Ordering::Greater);
        assert_eq!(desc.compare_tuples(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_compare_prefix_ignores_trailing_attributes() {
        let desc = int_varchar();
        let one = 1i32.to_le_bytes();
        let a = TupleData::new(vec![Some(one.as_slice()), Some(b"a".as_slice())]);
        let b = TupleData::new(vec![Some(one.as_slice()), Some(b"b".as_slice())]);
        assert_eq!(desc.compare_tuples_prefix(&a, &b, 1), Ordering::Equal);
        assert_eq!(desc.compare_tuples(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_validate() {
        let desc = int_varchar();
        let one = 1i32.to_le_bytes();

        let ok = TupleData::new(vec![None, Some(b"abc".as_slice())]);
        assert!(desc.validate(&ok).is_ok());

        let null_key = TupleData::new(vec![Some(one.as_slice()), None]);
        assert_eq!(
            desc.validate(&null_key),
            Err(TupleError::NullNotAllowed { attribute: 1 })
        );

        let too_long = TupleData::new(vec![None, Some(b"123456789".as_slice())]);
        assert!(matches!(
            desc.validate(&too_long),
            Err(TupleError::TooLong { attribute: 1, .. })
        ));

        let short = TupleData::new(vec![Some(b"ab".as_slice()), Some(b"".as_slice())]);
        assert!(matches!(
            desc.validate(&short),
            Err(TupleError::WrongWidth { attribute: 0, .. })
        ));

        let arity = TupleData::new(vec![None]);
        assert!(matches!(
            desc.validate(&arity),
            Err(TupleError::ArityMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_prefix() {
        let desc = int_varchar();
        let one = 1i32.to_le_bytes();
        assert!(desc.validate_prefix(&TupleData::default()).is_ok());
        assert!(
            desc.validate_prefix(&TupleData::new(vec![Some(one.as_slice())]))
                .is_ok()
        );
        assert!(matches!(
            desc.validate_prefix(&TupleData::new(vec![Some(b"ab".as_slice())])),
            Err(TupleError::WrongWidth { attribute: 0, expected: 4, actual: 2 })
        ));
        let three = TupleData::new(vec![None, None, None]);
        assert!(matches!(
            desc.validate_prefix(&three),
            Err(TupleError::ArityMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_project_and_check() {
        let desc = int_varchar();
        let projected = desc.project(&TupleProjection::new(vec![1, 0]));
        assert_eq!(projected.attribute(0).type_id, StandardType::VarChar);
        assert!(!projected.is_fixed_width());
        assert!(desc.prefix(1).is_fixed_width());
        assert!(desc.check().is_ok());

        let bad = TupleDescriptor::new(vec![TupleAttributeDescriptor::new(
            StandardType::Int64,
            false,
            4,
        )]);
        assert!(bad.check().is_err());
    }
}

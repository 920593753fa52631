use crate::storage::CacheError;
use crate::tuple::{OwnedTupleData, TupleDescriptor, TupleError, TuplePrinter};

/// Errors from B-tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// The marshalled tuple is larger than any node can hold.
    Overflow {
        descriptor: TupleDescriptor,
        data: OwnedTupleData,
        actual: usize,
        max: usize,
    },
    /// The key already exists in a tree that requires distinct keys.
    DuplicateKey {
        descriptor: TupleDescriptor,
        key: OwnedTupleData,
    },
    /// The tuple does not match the tree's shape.
    InvalidTuple(TupleError),
    /// Page cache error.
    Cache(CacheError),
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overflow {
                descriptor,
                data,
                actual,
                max,
            } => write!(
                f,
                "tuple {} needs {actual} bytes, more than the {max} bytes a node entry allows",
                TuplePrinter::new(descriptor, &data.as_data())
            ),
            Self::DuplicateKey { descriptor, key } => write!(
                f,
                "duplicate key {}",
                TuplePrinter::new(descriptor, &key.as_data())
            ),
            Self::InvalidTuple(e) => write!(f, "invalid tuple: {e}"),
            Self::Cache(e) => write!(f, "cache error: {e}"),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidTuple(e) => Some(e),
            Self::Cache(e) => Some(e),
            Self::Overflow { .. } | Self::DuplicateKey { .. } => None,
        }
    }
}

impl From<TupleError> for BTreeError {
    fn from(e: TupleError) -> Self {
        Self::InvalidTuple(e)
    }
}

impl From<CacheError> for BTreeError {
    fn from(e: CacheError) -> Self {
        Self::Cache(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{StandardType, TupleAttributeDescriptor, Value};

    #[test]
    fn test_display_formats_tuple() {
        let descriptor = TupleDescriptor::new(vec![
            TupleAttributeDescriptor::scalar(StandardType::Int32, false),
            TupleAttributeDescriptor::new(StandardType::VarChar, true, 8),
        ]);
        let key = OwnedTupleData::from_values(&descriptor, &[Value::Int(7), Value::Null])
            .expect("encode");
        let e = BTreeError::DuplicateKey {
            descriptor: descriptor.clone(),
            key: key.clone(),
        };
        assert_eq!(e.to_string(), "duplicate key (7, NULL)");

        let e = BTreeError::Overflow {
            descriptor,
            data: key,
            actual: 90,
            max: 80,
        };
        assert_eq!(
            e.to_string(),
            "tuple (7, NULL) needs 90 bytes, more than the 80 bytes a node entry allows"
        );
    }
}

use crate::tuple::types::StandardType;

/// Errors raised while describing or validating tuples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleError {
    /// The marshalled form would not be addressable with 16-bit offsets.
    TooWide { max_byte_count: usize },
    /// The tuple has a different number of values than its descriptor.
    ArityMismatch { expected: usize, actual: usize },
    /// NULL supplied for an attribute declared NOT NULL.
    NullNotAllowed { attribute: usize },
    /// A fixed-width datum has the wrong length.
    WrongWidth {
        attribute: usize,
        expected: usize,
        actual: usize,
    },
    /// A variable-width datum exceeds its declared storage.
    TooLong {
        attribute: usize,
        max: usize,
        actual: usize,
    },
    /// A value cannot be stored as the given type.
    TypeMismatch {
        expected: StandardType,
        value: String,
    },
    /// An attribute description is inconsistent with its type.
    InvalidAttribute { attribute: usize, message: String },
}

impl std::fmt::Display for TupleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooWide { max_byte_count } => write!(
                f,
                "tuple of up to {max_byte_count} bytes cannot be addressed with 16-bit offsets"
            ),
            Self::ArityMismatch { expected, actual } => {
                write!(f, "expected {expected} attributes, got {actual}")
            }
            Self::NullNotAllowed { attribute } => {
                write!(f, "attribute {attribute} does not allow NULL")
            }
            Self::WrongWidth {
                attribute,
                expected,
                actual,
            } => write!(
                f,
                "attribute {attribute} must be {expected} bytes, got {actual}"
            ),
            Self::TooLong {
                attribute,
                max,
                actual,
            } => write!(
                f,
                "attribute {attribute} allows at most {max} bytes, got {actual}"
            ),
            Self::TypeMismatch { expected, value } => {
                write!(f, "cannot store {value} as {expected:?}")
            }
            Self::InvalidAttribute { attribute, message } => {
                write!(f, "invalid attribute {attribute}: {message}")
            }
        }
    }
}

impl std::error::Error for TupleError {}

//! Standard stored types and typed values.
//!
//! [`StandardType`] is the closed table of types a tuple attribute can
//! hold. It knows each type's storage width, alignment class and ordering.
//! [`Value`] is a typed value used to build tuples and to inspect datums.

use std::cmp::Ordering;

use crate::tuple::error::TupleError;

/// Stored type of a tuple attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardType {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Real,
    Double,
    /// Fixed-width character data, `cb_storage` bytes.
    Char,
    /// Variable-width character data, up to `cb_storage` bytes.
    VarChar,
    /// Fixed-width binary data, `cb_storage` bytes.
    Binary,
    /// Variable-width binary data, up to `cb_storage` bytes.
    VarBinary,
}

impl StandardType {
    /// Width of the type when it does not depend on declared storage.
    #[must_use]
    pub const fn fixed_byte_count(self) -> Option<usize> {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => Some(1),
            Self::Int16 | Self::UInt16 => Some(2),
            Self::Int32 | Self::UInt32 | Self::Real => Some(4),
            Self::Int64 | Self::UInt64 | Self::Double => Some(8),
            Self::Char | Self::VarChar | Self::Binary | Self::VarBinary => None,
        }
    }

    /// Whether values of this type vary in length.
    #[must_use]
    pub const fn is_variable_width(self) -> bool {
        matches!(self, Self::VarChar | Self::VarBinary)
    }

    /// Alignment class used to order fixed-width fields in a tuple image.
    #[must_use]
    pub const fn alignment(self) -> usize {
        match self {
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Real => 4,
            Self::Int64 | Self::UInt64 | Self::Double => 8,
            _ => 1,
        }
    }

    /// Number of bits the value occupies in the tuple bit array (booleans
    /// are stored as a single bit).
    #[must_use]
    pub const fn bit_count(self) -> usize {
        match self {
            Self::Bool => 1,
            _ => 0,
        }
    }

    /// Compare two non-null datums of this type.
    #[must_use]
    pub fn compare(self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            Self::Bool | Self::UInt8 => a[0].cmp(&b[0]),
            Self::Int8 => le_i8(a).cmp(&le_i8(b)),
            Self::Int16 => le_i16(a).cmp(&le_i16(b)),
            Self::UInt16 => le_u16(a).cmp(&le_u16(b)),
            Self::Int32 => le_i32(a).cmp(&le_i32(b)),
            Self::UInt32 => le_u32(a).cmp(&le_u32(b)),
            Self::Int64 => le_i64(a).cmp(&le_i64(b)),
            Self::UInt64 => le_u64(a).cmp(&le_u64(b)),
            Self::Real => f32::from_bits(le_u32(a)).total_cmp(&f32::from_bits(le_u32(b))),
            Self::Double => f64::from_bits(le_u64(a)).total_cmp(&f64::from_bits(le_u64(b))),
            Self::Char | Self::VarChar | Self::Binary | Self::VarBinary => a.cmp(b),
        }
    }
}

const fn le_i8(b: &[u8]) -> i8 {
    i8::from_le_bytes([b[0]])
}

fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn le_i16(b: &[u8]) -> i16 {
    i16::from_le_bytes([b[0], b[1]])
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_i32(b: &[u8]) -> i32 {
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_u64(b: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&b[..8]);
    u64::from_le_bytes(bytes)
}

fn le_i64(b: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&b[..8]);
    i64::from_le_bytes(bytes)
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Encode this value as a datum of type `ty`.
    ///
    /// Returns `Ok(None)` for [`Value::Null`]. Fixed-width character and
    /// binary values are padded (with spaces and zeros respectively) to
    /// `cb_storage`.
    pub fn encode(
        &self,
        ty: StandardType,
        cb_storage: usize,
    ) -> Result<Option<Vec<u8>>, TupleError> {
        let mismatch = || TupleError::TypeMismatch {
            expected: ty,
            value: format!("{self:?}"),
        };
        let bytes = match (self, ty) {
            (Self::Null, _) => return Ok(None),
            (Self::Bool(v), StandardType::Bool) => vec![u8::from(*v)],
            (Self::Int(v), _) => encode_integer(i128::from(*v), ty).ok_or_else(mismatch)?,
            (Self::UInt(v), _) => encode_integer(i128::from(*v), ty).ok_or_else(mismatch)?,
            (Self::Float(v), StandardType::Real) => narrow(*v).to_le_bytes().to_vec(),
            (Self::Float(v), StandardType::Double) => v.to_le_bytes().to_vec(),
            (Self::Text(s), StandardType::VarChar) => s.as_bytes().to_vec(),
            (Self::Text(s), StandardType::Char) => pad(s.as_bytes(), cb_storage, b' '),
            (Self::Bytes(b), StandardType::VarBinary) => b.clone(),
            (Self::Bytes(b), StandardType::Binary) => pad(b, cb_storage, 0),
            _ => return Err(mismatch()),
        };
        Ok(Some(bytes))
    }

    /// Decode a datum of type `ty`.
    #[must_use]
    pub fn decode(ty: StandardType, datum: Option<&[u8]>) -> Self {
        let Some(b) = datum else {
            return Self::Null;
        };
        match ty {
            StandardType::Bool => Self::Bool(b[0] != 0),
            StandardType::Int8 => Self::Int(i64::from(le_i8(b))),
            StandardType::UInt8 => Self::UInt(u64::from(b[0])),
            StandardType::Int16 => Self::Int(i64::from(le_i16(b))),
            StandardType::UInt16 => Self::UInt(u64::from(le_u16(b))),
            StandardType::Int32 => Self::Int(i64::from(le_i32(b))),
            StandardType::UInt32 => Self::UInt(u64::from(le_u32(b))),
            StandardType::Int64 => Self::Int(le_i64(b)),
            StandardType::UInt64 => Self::UInt(le_u64(b)),
            StandardType::Real => Self::Float(f64::from(f32::from_bits(le_u32(b)))),
            StandardType::Double => Self::Float(f64::from_bits(le_u64(b))),
            StandardType::Char | StandardType::VarChar => {
                Self::Text(String::from_utf8_lossy(b).into_owned())
            }
            StandardType::Binary | StandardType::VarBinary => Self::Bytes(b.to_vec()),
        }
    }

    /// Whether this is [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn narrow(v: f64) -> f32 {
    v as f32
}

fn pad(bytes: &[u8], width: usize, fill: u8) -> Vec<u8> {
    let mut out = bytes.to_vec();
    if out.len() < width {
        out.resize(width, fill);
    }
    out
}

fn encode_integer(v: i128, ty: StandardType) -> Option<Vec<u8>> {
    let bytes = match ty {
        StandardType::Int8 => i8::try_from(v).ok()?.to_le_bytes().to_vec(),
        StandardType::UInt8 => u8::try_from(v).ok()?.to_le_bytes().to_vec(),
        StandardType::Int16 => i16::try_from(v).ok()?.to_le_bytes().to_vec(),
        StandardType::UInt16 => u16::try_from(v).ok()?.to_le_bytes().to_vec(),
        StandardType::Int32 => i32::try_from(v).ok()?.to_le_bytes().to_vec(),
        StandardType::UInt32 => u32::try_from(v).ok()?.to_le_bytes().to_vec(),
        StandardType::Int64 => i64::try_from(v).ok()?.to_le_bytes().to_vec(),
        StandardType::UInt64 => u64::try_from(v).ok()?.to_le_bytes().to_vec(),
        _ => return None,
    };
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: &Value, ty: StandardType) -> Vec<u8> {
        value
            .encode(ty, 0)
            .expect("encode")
            .expect("non-null")
    }

    #[test]
    fn test_signed_ordering() {
        let neg = encoded(&Value::Int(-5), StandardType::Int32);
        let pos = encoded(&Value::Int(3), StandardType::Int32);
        assert_eq!(StandardType::Int32.compare(&neg, &pos), Ordering::Less);
        assert_eq!(StandardType::UInt32.compare(&neg, &pos), Ordering::Greater);
    }

    #[test]
    fn test_variable_width_ordering_is_lexicographic() {
        assert_eq!(StandardType::VarChar.compare(b"ab", b"abc"), Ordering::Less);
        assert_eq!(StandardType::VarChar.compare(b"b", b"abc"), Ordering::Greater);
        assert_eq!(StandardType::VarBinary.compare(b"", b""), Ordering::Equal);
    }

    #[test]
    fn test_double_ordering() {
        let a = encoded(&Value::Float(-1.5), StandardType::Double);
        let b = encoded(&Value::Float(2.25), StandardType::Double);
        assert_eq!(StandardType::Double.compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_encode_out_of_range() {
        assert!(Value::Int(300).encode(StandardType::Int8, 0).is_err());
        assert!(Value::Int(-1).encode(StandardType::UInt64, 0).is_err());
        assert!(Value::Text("x".into()).encode(StandardType::Int32, 0).is_err());
    }

    #[test]
    fn test_fixed_char_is_padded() {
        let bytes = Value::Text("ab".into())
            .encode(StandardType::Char, 4)
            .expect("encode")
            .expect("non-null");
        assert_eq!(bytes, b"ab  ");
    }

    #[test]
    fn test_decode_matches_encode() {
        let cases = [
            (Value::Bool(true), StandardType::Bool),
            (Value::Int(-7), StandardType::Int16),
            (Value::UInt(u64::MAX), StandardType::UInt64),
            (Value::Float(0.5), StandardType::Real),
            (Value::Text("hello".into()), StandardType::VarChar),
            (Value::Bytes(vec![1, 2, 3]), StandardType::VarBinary),
        ];
        for (value, ty) in cases {
            let bytes = encoded(&value, ty);
            assert_eq!(Value::decode(ty, Some(&bytes)), value);
        }
        assert_eq!(Value::decode(StandardType::Int32, None), Value::Null);
    }
}

use std::fmt;

use crate::tuple::data::TupleData;
use crate::tuple::descriptor::TupleDescriptor;
use crate::tuple::types::Value;

/// Formats a tuple as `(1, 'abc', NULL)` for diagnostics.
pub struct TuplePrinter<'d, 't> {
    descriptor: &'d TupleDescriptor,
    data: &'d TupleData<'t>,
}

impl<'d, 't> TuplePrinter<'d, 't> {
    #[must_use]
    pub const fn new(descriptor: &'d TupleDescriptor, data: &'d TupleData<'t>) -> Self {
        Self { descriptor, data }
    }
}

impl fmt::Display for TuplePrinter<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, (datum, attr)) in self.data.iter().zip(self.descriptor.iter()).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match Value::decode(attr.type_id, datum) {
                Value::Null => f.write_str("NULL")?,
                Value::Bool(v) => write!(f, "{v}")?,
                Value::Int(v) => write!(f, "{v}")?,
                Value::UInt(v) => write!(f, "{v}")?,
                Value::Float(v) => write!(f, "{v}")?,
                Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''"))?,
                Value::Bytes(bytes) => {
                    f.write_str("X'")?;
                    for b in bytes {
                        write!(f, "{b:02X}")?;
                    }
                    f.write_str("'")?;
                }
            }
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::data::OwnedTupleData;
    use crate::tuple::descriptor::TupleAttributeDescriptor;
    use crate::tuple::types::StandardType;

    #[test]
    fn test_print_tuple() {
        let desc = TupleDescriptor::new(vec![
            TupleAttributeDescriptor::scalar(StandardType::Int32, false),
            TupleAttributeDescriptor::new(StandardType::VarChar, true, 10),
            TupleAttributeDescriptor::new(StandardType::VarBinary, true, 4),
            TupleAttributeDescriptor::scalar(StandardType::Bool, true),
        ]);
        let owned = OwnedTupleData::from_values(
            &desc,
            &[
                Value::Int(1),
                Value::Text("it's".into()),
                Value::Bytes(vec![0x0A, 0xFF]),
                Value::Null,
            ],
        )
        .expect("encode");
        let data = owned.as_data();
        assert_eq!(
            TuplePrinter::new(&desc, &data).to_string(),
            "(1, 'it''s', X'0AFF', NULL)"
        );
    }
}

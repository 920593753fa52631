use crate::tuple::accessor::{AttributeLayout, TupleAccessor, read_attribute};
use crate::tuple::data::TupleData;
use crate::tuple::descriptor::TupleProjection;

/// Unmarshals a subset of a tuple's attributes, in projection order,
/// without touching the rest of the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleProjectionAccessor {
    layouts: Vec<AttributeLayout>,
    bit_field_offset: usize,
}

impl TupleProjectionAccessor {
    #[must_use]
    pub fn new(accessor: &TupleAccessor, projection: &TupleProjection) -> Self {
        Self {
            layouts: projection.iter().map(|i| accessor.layout(i)).collect(),
            bit_field_offset: accessor.bit_field_offset(),
        }
    }

    /// Number of projected attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// Unmarshal the projected attributes of the image at the start of `buf`.
    #[must_use]
    pub fn unmarshal<'a>(&self, buf: &'a [u8]) -> TupleData<'a> {
        let mut data = TupleData::with_capacity(self.layouts.len());
        self.unmarshal_into(buf, &mut data);
        data
    }

    /// Unmarshal into `data`, reusing its allocation.
    pub fn unmarshal_into<'a>(&self, buf: &'a [u8], data: &mut TupleData<'a>) {
        data.clear();
        for layout in &self.layouts {
            data.push(read_attribute(layout, self.bit_field_offset, buf));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::data::OwnedTupleData;
    use crate::tuple::descriptor::{TupleAttributeDescriptor, TupleDescriptor};
    use crate::tuple::types::{StandardType, Value};

    #[test]
    fn test_projection_reads_selected_attributes() {
        let desc = TupleDescriptor::new(vec![
            TupleAttributeDescriptor::new(StandardType::VarChar, false, 8),
            TupleAttributeDescriptor::scalar(StandardType::Int32, false),
            TupleAttributeDescriptor::scalar(StandardType::Bool, true),
        ]);
        let accessor = TupleAccessor::new(&desc).expect("layout");
        let owned = OwnedTupleData::from_values(
            &desc,
            &[Value::Text("key".into()), Value::Int(12), Value::Null],
        )
        .expect("encode");
        let mut buf = vec![0u8; accessor.max_byte_count()];
        accessor.marshal(&owned.as_data(), &mut buf);

        let projection = TupleProjection::new(vec![2, 0]);
        let projected = TupleProjectionAccessor::new(&accessor, &projection).unmarshal(&buf);
        assert_eq!(projected.len(), 2);
        assert_eq!(projected.datum(0), None);
        assert_eq!(projected.datum(1), Some(b"key".as_slice()));
        assert_eq!(projected, owned.as_data().project(&projection));
    }
}

//! Tuple marshalling.
//!
//! A [`TupleAccessor`] is computed once per [`TupleDescriptor`] and then
//! reads or writes any number of tuple images of that shape.
//!
//! # Image layout
//!
//! ```text
//! [8-byte-aligned fixed fields]
//! [4-byte-aligned fixed fields]
//! [2-byte-aligned fixed fields]
//! [u16 end offset of each variable-width field]
//! [unaligned fixed fields]
//! [bit array: boolean values and null flags]
//! [variable-width data]          <- first_var_offset
//! ```
//!
//! Offsets are relative to the start of the image and stored little-endian.
//! A NULL variable-width field has an empty data region (its end offset
//! equals its start) and its null bit set. The end offset of the last
//! variable-width field is the byte count of the whole image.
//!
//! # Invariants
//!
//! - `min_byte_count <= byte_count(t) <= max_byte_count` for every valid `t`
//! - fixed-width shapes have `min_byte_count == max_byte_count`
//! - a shape with no storage at all still occupies one byte

// Image offsets are bounded by u16::MAX when the layout is computed.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::{read_u16, write_u16};
use crate::tuple::data::TupleData;
use crate::tuple::descriptor::TupleDescriptor;
use crate::tuple::error::TupleError;

const TRUE_DATUM: &[u8] = &[1];
const FALSE_DATUM: &[u8] = &[0];

/// Where the data region of a variable-width field begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarStart {
    /// At a fixed offset (the first variable-width field).
    At(usize),
    /// Where the field whose end offset is stored at this position ends.
    EndOf(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Fixed { offset: usize },
    Bit { bit: usize },
    Variable { start: VarStart, end_at: usize },
}

/// Physical location of one attribute inside a tuple image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AttributeLayout {
    placement: Placement,
    null_bit: Option<usize>,
    cb_storage: usize,
}

fn bit_is_set(buf: &[u8], bit_field_offset: usize, bit: usize) -> bool {
    buf[bit_field_offset + bit / 8] & (1 << (bit % 8)) != 0
}

fn set_bit(buf: &mut [u8], bit_field_offset: usize, bit: usize, value: bool) {
    let byte = &mut buf[bit_field_offset + bit / 8];
    if value {
        *byte |= 1 << (bit % 8);
    } else {
        *byte &= !(1 << (bit % 8));
    }
}

/// Read one attribute out of an image.
pub(crate) fn read_attribute<'a>(
    layout: &AttributeLayout,
    bit_field_offset: usize,
    buf: &'a [u8],
) -> Option<&'a [u8]> {
    if layout
        .null_bit
        .is_some_and(|bit| bit_is_set(buf, bit_field_offset, bit))
    {
        return None;
    }
    match layout.placement {
        Placement::Fixed { offset } => Some(&buf[offset..offset + layout.cb_storage]),
        Placement::Bit { bit } => Some(if bit_is_set(buf, bit_field_offset, bit) {
            TRUE_DATUM
        } else {
            FALSE_DATUM
        }),
        Placement::Variable { start, end_at } => {
            let start = match start {
                VarStart::At(offset) => offset,
                VarStart::EndOf(at) => usize::from(read_u16(buf, at)),
            };
            let end = usize::from(read_u16(buf, end_at));
            Some(&buf[start..end])
        }
    }
}

/// Reads and writes tuple images of one shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleAccessor {
    layouts: Vec<AttributeLayout>,
    bit_field_offset: usize,
    n_bit_fields: usize,
    first_var_offset: Option<usize>,
    last_var_end_at: Option<usize>,
    min_byte_count: usize,
    max_byte_count: usize,
}

impl TupleAccessor {
    /// Compute the layout for `descriptor`.
    pub fn new(descriptor: &TupleDescriptor) -> Result<Self, TupleError> {
        descriptor.check()?;

        let n = descriptor.len();
        let mut by_alignment: [Vec<usize>; 4] = Default::default();
        let mut variable = Vec::new();
        let mut value_bits = vec![None; n];
        let mut null_bits = vec![None; n];
        let mut n_bit_fields: usize = 0;
        let mut cb_var_data_max = 0;

        for (i, attr) in descriptor.iter().enumerate() {
            if !attr.is_fixed_width() {
                cb_var_data_max += attr.cb_storage;
                variable.push(i);
            } else if attr.type_id.bit_count() > 0 {
                value_bits[i] = Some(n_bit_fields);
                n_bit_fields += 1;
            } else {
                let class = match attr.type_id.alignment() {
                    8 => 0,
                    4 => 1,
                    2 => 2,
                    _ => 3,
                };
                by_alignment[class].push(i);
            }
            if attr.nullable {
                null_bits[i] = Some(n_bit_fields);
                n_bit_fields += 1;
            }
        }

        let mut placements: Vec<Option<Placement>> = vec![None; n];
        let mut cb = 0;
        let mut place_fixed = |indices: &[usize], cb: &mut usize| {
            for &i in indices {
                placements[i] = Some(Placement::Fixed { offset: *cb });
                *cb += descriptor.attribute(i).cb_storage;
            }
        };
        place_fixed(&by_alignment[0], &mut cb);
        place_fixed(&by_alignment[1], &mut cb);
        place_fixed(&by_alignment[2], &mut cb);

        let mut end_offsets = Vec::with_capacity(variable.len());
        for _ in &variable {
            end_offsets.push(cb);
            cb += 2;
        }
        place_fixed(&by_alignment[3], &mut cb);

        let bit_field_offset = cb;
        cb += n_bit_fields.div_ceil(8);

        let first_var_offset = (!variable.is_empty()).then_some(cb);
        for (k, &i) in variable.iter().enumerate() {
            let start = if k == 0 {
                VarStart::At(cb)
            } else {
                VarStart::EndOf(end_offsets[k - 1])
            };
            placements[i] = Some(Placement::Variable {
                start,
                end_at: end_offsets[k],
            });
        }
        for (i, bit) in value_bits.iter().enumerate() {
            if let Some(bit) = *bit {
                placements[i] = Some(Placement::Bit { bit });
            }
        }

        let mut min_byte_count = cb;
        let mut max_byte_count = cb + cb_var_data_max;
        if max_byte_count == 0 {
            min_byte_count = 1;
            max_byte_count = 1;
        }
        if max_byte_count > usize::from(u16::MAX) {
            return Err(TupleError::TooWide { max_byte_count });
        }

        let layouts = placements
            .into_iter()
            .zip(descriptor.iter())
            .zip(null_bits)
            .map(|((placement, attr), null_bit)| AttributeLayout {
                placement: placement.unwrap_or(Placement::Fixed { offset: 0 }),
                null_bit,
                cb_storage: attr.cb_storage,
            })
            .collect();

        Ok(Self {
            layouts,
            bit_field_offset,
            n_bit_fields,
            first_var_offset,
            last_var_end_at: end_offsets.last().copied(),
            min_byte_count,
            max_byte_count,
        })
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// Whether every image of this shape has the same size.
    #[must_use]
    pub const fn is_fixed_width(&self) -> bool {
        self.first_var_offset.is_none()
    }

    /// Size of an image whose variable-width fields are all empty.
    #[must_use]
    pub const fn min_byte_count(&self) -> usize {
        self.min_byte_count
    }

    /// Size of an image whose variable-width fields are all full.
    #[must_use]
    pub const fn max_byte_count(&self) -> usize {
        self.max_byte_count
    }

    /// Size `data` occupies once marshalled.
    #[must_use]
    pub fn byte_count(&self, data: &TupleData<'_>) -> usize {
        let Some(first_var_offset) = self.first_var_offset else {
            return self.max_byte_count;
        };
        first_var_offset
            + self
                .layouts
                .iter()
                .enumerate()
                .filter(|(_, layout)| matches!(layout.placement, Placement::Variable { .. }))
                .filter_map(|(i, _)| data.datum(i))
                .map(<[u8]>::len)
                .sum::<usize>()
    }

    /// Size of the marshalled image at the start of `buf`.
    #[must_use]
    pub fn buffer_byte_count(&self, buf: &[u8]) -> usize {
        match self.last_var_end_at {
            Some(at) => usize::from(read_u16(buf, at)),
            None => self.max_byte_count,
        }
    }

    /// Whether a buffer of `cb_buffer` bytes can hold `data`.
    #[must_use]
    pub fn is_buffer_sufficient(&self, data: &TupleData<'_>, cb_buffer: usize) -> bool {
        self.max_byte_count <= cb_buffer || self.byte_count(data) <= cb_buffer
    }

    /// Marshal `data` into `dest` and return the number of bytes written.
    ///
    /// # Pre-conditions
    /// - `data` is valid for the descriptor (see [`TupleDescriptor::validate`])
    /// - `dest` holds at least `byte_count(data)` bytes
    pub fn marshal(&self, data: &TupleData<'_>, dest: &mut [u8]) -> usize {
        assert_eq!(data.len(), self.layouts.len(), "tuple arity mismatch");
        let bit_bytes = self.n_bit_fields.div_ceil(8);
        dest[self.bit_field_offset..self.bit_field_offset + bit_bytes].fill(0);

        let mut next_var = self.first_var_offset.unwrap_or(0);
        for (i, layout) in self.layouts.iter().enumerate() {
            let datum = data.datum(i);
            if let Some(bit) = layout.null_bit {
                set_bit(dest, self.bit_field_offset, bit, datum.is_none());
            } else {
                assert!(datum.is_some(), "NULL in non-nullable attribute {i}");
            }
            match layout.placement {
                Placement::Fixed { offset } => {
                    let field = &mut dest[offset..offset + layout.cb_storage];
                    match datum {
                        Some(value) => field.copy_from_slice(value),
                        None => field.fill(0),
                    }
                }
                Placement::Bit { bit } => {
                    let value = datum.is_some_and(|value| value[0] != 0);
                    set_bit(dest, self.bit_field_offset, bit, value);
                }
                Placement::Variable { end_at, .. } => {
                    if let Some(value) = datum {
                        assert!(
                            value.len() <= layout.cb_storage,
                            "attribute {i} exceeds its storage"
                        );
                        dest[next_var..next_var + value.len()].copy_from_slice(value);
                        next_var += value.len();
                    }
                    write_u16(dest, end_at, next_var as u16);
                }
            }
        }

        if self.is_fixed_width() {
            self.max_byte_count
        } else {
            next_var
        }
    }

    /// Unmarshal the image at the start of `buf`.
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

    /// Read attribute `i` of the image at the start of `buf`.
    #[must_use]
    pub fn attribute<'a>(&self, buf: &'a [u8], i: usize) -> Option<&'a [u8]> {
        read_attribute(&self.layouts[i], self.bit_field_offset, buf)
    }

    pub(crate) fn layout(&self, i: usize) -> AttributeLayout {
        self.layouts[i]
    }

    pub(crate) const fn bit_field_offset(&self) -> usize {
        self.bit_field_offset
    }
}

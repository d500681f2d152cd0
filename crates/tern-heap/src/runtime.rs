//! Slow-path string operations.
//!
//! Generated code falls back here whenever its inline fast path declines a string shape. These
//! routines handle every representation, including unflattened cons strings, and are the
//! reference behaviour the fast path must match.

use tracing::debug;

use crate::instance_type::{Encoding, Representation};
use crate::layout::SeqString;
use crate::memory::MemoryBus;
use crate::{Heap, HeapError, StringValue};

/// Reads code unit `index` of a sequential or external string.
///
/// # Panics
///
/// Panics if `string` is indirect.
pub fn read_direct_code_unit(heap: &Heap, string: u64, index: u32) -> u16 {
    let shape = heap.shape_of(string);
    let data = match shape.representation() {
        Representation::Sequential => string + SeqString::HEADER_SIZE,
        Representation::External => heap.external_data(string),
        repr => panic!("expected a direct string at {string:#x}, found {repr:?}"),
    };
    match shape.encoding() {
        Encoding::OneByte => heap.memory().read_u8(data + index as u64) as u16,
        Encoding::TwoByte => heap.memory().read_u16(data + 2 * index as u64),
    }
}

/// Copies every code unit of `string` into a new vector, whatever its shape.
pub fn flatten_code_units(heap: &Heap, string: u64) -> Result<Vec<u16>, HeapError> {
    let mut out = Vec::with_capacity(heap.length_of(string) as usize);
    // Pending `(string, start, end)` ranges, processed left to right.
    let mut pending = vec![(string, 0u32, heap.length_of(string))];
    while let Some((s, start, end)) = pending.pop() {
        match heap.string_value(s)? {
            StringValue::FlatSequential { .. } | StringValue::External { .. } => {
                out.extend((start..end).map(|i| read_direct_code_unit(heap, s, i)));
            }
            StringValue::Sliced { parent, offset, .. } => {
                pending.push((parent, start + offset, end + offset));
            }
            StringValue::Cons { first, second, .. } => {
                let first_len = heap.length_of(first);
                if end > first_len {
                    pending.push((second, start.saturating_sub(first_len), end - first_len));
                }
                if start < first_len {
                    pending.push((first, start, end.min(first_len)));
                }
            }
        }
    }
    Ok(out)
}

impl Heap {
    /// Flattens `string` and returns a direct string holding the same characters.
    ///
    /// An unflattened cons string is rewritten in place to `(flat, empty)`, after which the
    /// character-load fast path resolves it without falling back. Other shapes are already flat:
    /// sliced strings return their parent's view unchanged.
    pub fn flatten(&mut self, string: u64) -> Result<u64, HeapError> {
        match self.string_value(string)? {
            StringValue::Cons { first, second, .. } if second == self.empty_string() => Ok(first),
            StringValue::Cons {
                encoding, length, ..
            } => {
                let units = flatten_code_units(self, string)?;
                debug_assert_eq!(units.len(), length as usize);
                let flat = match encoding {
                    Encoding::OneByte => {
                        let bytes: Vec<u8> = units.iter().map(|&u| u as u8).collect();
                        self.new_one_byte_string(&bytes)?
                    }
                    Encoding::TwoByte => self.new_two_byte_string(&units)?,
                };
                let empty = self.empty_string();
                self.set_cons_halves(string, flat, empty);
                debug!(cons = string, flat, length, "flattened cons string");
                Ok(flat)
            }
            StringValue::FlatSequential { .. }
            | StringValue::External { .. }
            | StringValue::Sliced { .. } => Ok(string),
        }
    }
}

/// Bounds-checked character access that accepts every string shape.
///
/// Returns `Ok(None)` when `index` is past the end of `string`.
pub fn string_char_code_at(
    heap: &mut Heap,
    string: u64,
    index: u32,
) -> Result<Option<u16>, HeapError> {
    if index >= heap.string_value(string)?.length() {
        return Ok(None);
    }
    let flat = heap.flatten(string)?;
    let unit = match heap.string_value(flat)? {
        StringValue::Sliced { parent, offset, .. } => {
            read_direct_code_unit(heap, parent, offset + index)
        }
        _ => read_direct_code_unit(heap, flat, index),
    };
    Ok(Some(unit))
}

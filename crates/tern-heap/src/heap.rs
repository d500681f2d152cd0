use std::collections::HashMap;

use tracing::trace;

use crate::instance_type::{Encoding, InstanceType, Representation, ShapeDescriptor};
use crate::layout::{
    ConsString, ExternalResource, ExternalString, HeapObject, Map, SeqString, SlicedString, Smi,
    String as StringLayout, POINTER_SIZE,
};
use crate::memory::{HeapMemory, MemoryBus, Width};
use crate::HeapError;

#[derive(Clone, Debug)]
pub struct HeapConfig {
    /// First address of the heap. Must be non-zero and 8-byte aligned.
    pub base_address: u64,
    /// Hard cap on bytes handed out by the allocator.
    ///
    /// Memory is reserved lazily, so a large cap costs nothing until it is used.
    pub capacity_bytes: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            base_address: 0x1000_0000,
            capacity_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Decoded view of a string object.
///
/// Addresses refer back into the owning [`Heap`]; the view is a snapshot and is never written
/// back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StringValue {
    FlatSequential {
        encoding: Encoding,
        length: u32,
    },
    External {
        encoding: Encoding,
        length: u32,
        short: bool,
    },
    Cons {
        encoding: Encoding,
        first: u64,
        second: u64,
        length: u32,
    },
    Sliced {
        encoding: Encoding,
        parent: u64,
        offset: u32,
        length: u32,
    },
}

impl StringValue {
    pub fn length(&self) -> u32 {
        match *self {
            StringValue::FlatSequential { length, .. }
            | StringValue::External { length, .. }
            | StringValue::Cons { length, .. }
            | StringValue::Sliced { length, .. } => length,
        }
    }

    pub fn encoding(&self) -> Encoding {
        match *self {
            StringValue::FlatSequential { encoding, .. }
            | StringValue::External { encoding, .. }
            | StringValue::Cons { encoding, .. }
            | StringValue::Sliced { encoding, .. } => encoding,
        }
    }
}

/// Heap address space plus the process-wide roots.
///
/// Strings are referred to by address. The factory upholds two construction invariants the
/// character-load fast path depends on:
/// - a sliced string's parent is always sequential or external
/// - a cons string whose second half is the empty string has a sequential or external first half
pub struct Heap {
    memory: HeapMemory,
    meta_map: u64,
    string_maps: HashMap<InstanceType, u64>,
    empty_string: u64,
}

impl Heap {
    pub fn new(config: HeapConfig) -> Result<Self, HeapError> {
        let mut memory = HeapMemory::new(config.base_address, config.capacity_bytes);

        // The meta map describes maps themselves and points at itself.
        let meta_map = memory.allocate(Map::SIZE as usize)?;
        memory.write(meta_map + HeapObject::MAP_OFFSET, Width::W64, meta_map);
        memory.write_u8(
            meta_map + Map::INSTANCE_TYPE_OFFSET,
            InstanceType::NON_STRING.raw(),
        );

        let mut string_maps = HashMap::new();
        for repr in [
            Representation::Sequential,
            Representation::Cons,
            Representation::External,
            Representation::Sliced,
        ] {
            for encoding in [Encoding::OneByte, Encoding::TwoByte] {
                let mut types = vec![InstanceType::string(repr, encoding, false)];
                if repr == Representation::External {
                    types.push(InstanceType::string(repr, encoding, true));
                }
                for ty in types {
                    let map = memory.allocate(Map::SIZE as usize)?;
                    memory.write(map + HeapObject::MAP_OFFSET, Width::W64, meta_map);
                    memory.write_u8(map + Map::INSTANCE_TYPE_OFFSET, ty.raw());
                    string_maps.insert(ty, map);
                }
            }
        }

        let mut heap = Self {
            memory,
            meta_map,
            string_maps,
            empty_string: 0,
        };
        heap.empty_string = heap.new_one_byte_string(&[])?;
        Ok(heap)
    }

    #[inline]
    pub fn memory(&self) -> &HeapMemory {
        &self.memory
    }

    #[inline]
    pub fn memory_mut(&mut self) -> &mut HeapMemory {
        &mut self.memory
    }

    /// The canonical empty string root.
    #[inline]
    pub fn empty_string(&self) -> u64 {
        self.empty_string
    }

    /// Map describing non-string objects.
    #[inline]
    pub fn meta_map(&self) -> u64 {
        self.meta_map
    }

    pub fn string_map(&self, ty: InstanceType) -> u64 {
        match self.string_maps.get(&ty) {
            Some(&map) => map,
            None => panic!("no map registered for string instance type {:#04x}", ty.raw()),
        }
    }

    // ---- Reads ---------------------------------------------------------------------------------

    pub fn map_of(&self, obj: u64) -> u64 {
        self.memory.read_u64(obj + HeapObject::MAP_OFFSET)
    }

    pub fn instance_type_of(&self, obj: u64) -> InstanceType {
        InstanceType::from_raw(
            self.memory
                .read_u8(self.map_of(obj) + Map::INSTANCE_TYPE_OFFSET),
        )
    }

    pub fn shape_of(&self, obj: u64) -> ShapeDescriptor {
        self.instance_type_of(obj).shape()
    }

    pub fn is_string(&self, obj: u64) -> bool {
        self.instance_type_of(obj).is_string()
    }

    pub fn length_of(&self, string: u64) -> u32 {
        self.memory.read_u32(string + StringLayout::LENGTH_OFFSET)
    }

    pub fn cons_first(&self, cons: u64) -> u64 {
        self.memory.read_u64(cons + ConsString::FIRST_OFFSET)
    }

    pub fn cons_second(&self, cons: u64) -> u64 {
        self.memory.read_u64(cons + ConsString::SECOND_OFFSET)
    }

    pub fn sliced_parent(&self, sliced: u64) -> u64 {
        self.memory.read_u64(sliced + SlicedString::PARENT_OFFSET)
    }

    pub fn sliced_offset(&self, sliced: u64) -> u32 {
        Smi::untag(self.memory.read_u64(sliced + SlicedString::OFFSET_OFFSET)).value() as u32
    }

    /// Address of the first code unit of an external string.
    ///
    /// Full external strings cache it in the object; short ones only reach it through the
    /// resource.
    pub fn external_data(&self, external: u64) -> u64 {
        if self.shape_of(external).is_short_external() {
            let resource = self.memory.read_u64(external + ExternalString::RESOURCE_OFFSET);
            self.memory.read_u64(resource + ExternalResource::DATA_OFFSET)
        } else {
            self.memory
                .read_u64(external + ExternalString::RESOURCE_DATA_OFFSET)
        }
    }

    /// Decodes the string at `string`, or fails if the object is not a string.
    pub fn string_value(&self, string: u64) -> Result<StringValue, HeapError> {
        let ty = self.instance_type_of(string);
        if !ty.is_string() {
            return Err(HeapError::NotAString {
                addr: string,
                instance_type: ty.raw(),
            });
        }
        let shape = ty.shape();
        let encoding = shape.encoding();
        let length = self.length_of(string);
        Ok(match shape.representation() {
            Representation::Sequential => StringValue::FlatSequential { encoding, length },
            Representation::External => StringValue::External {
                encoding,
                length,
                short: shape.is_short_external(),
            },
            Representation::Cons => StringValue::Cons {
                encoding,
                first: self.cons_first(string),
                second: self.cons_second(string),
                length,
            },
            Representation::Sliced => StringValue::Sliced {
                encoding,
                parent: self.sliced_parent(string),
                offset: self.sliced_offset(string),
                length,
            },
        })
    }

    // ---- Factory -------------------------------------------------------------------------------

    pub fn new_one_byte_string(&mut self, data: &[u8]) -> Result<u64, HeapError> {
        let string = self.allocate_seq(Encoding::OneByte, data.len())?;
        self.memory
            .write_bytes(string + SeqString::HEADER_SIZE, data);
        Ok(string)
    }

    pub fn new_two_byte_string(&mut self, data: &[u16]) -> Result<u64, HeapError> {
        let string = self.allocate_seq(Encoding::TwoByte, data.len())?;
        let bytes: Vec<u8> = data.iter().flat_map(|u| u.to_le_bytes()).collect();
        self.memory
            .write_bytes(string + SeqString::HEADER_SIZE, &bytes);
        Ok(string)
    }

    /// Allocates a sequential string holding `s` as UTF-16, one-byte when every code unit fits.
    pub fn new_string_from_str(&mut self, s: &str) -> Result<u64, HeapError> {
        let units: Vec<u16> = s.encode_utf16().collect();
        self.new_string_from_code_units(&units)
    }

    pub fn new_string_from_code_units(&mut self, units: &[u16]) -> Result<u64, HeapError> {
        if units.iter().all(|&u| u <= 0xff) {
            let bytes: Vec<u8> = units.iter().map(|&u| u as u8).collect();
            self.new_one_byte_string(&bytes)
        } else {
            self.new_two_byte_string(units)
        }
    }

    pub fn new_external_one_byte_string(
        &mut self,
        data: &[u8],
        short: bool,
    ) -> Result<u64, HeapError> {
        self.new_external_string(Encoding::OneByte, data, data.len(), short)
    }

    pub fn new_external_two_byte_string(
        &mut self,
        data: &[u16],
        short: bool,
    ) -> Result<u64, HeapError> {
        let bytes: Vec<u8> = data.iter().flat_map(|u| u.to_le_bytes()).collect();
        self.new_external_string(Encoding::TwoByte, &bytes, data.len(), short)
    }

    /// Allocates a cons string without flattening it.
    pub fn new_cons_string(&mut self, first: u64, second: u64) -> Result<u64, HeapError> {
        let first_value = self.string_value(first)?;
        let second_value = self.string_value(second)?;
        if second == self.empty_string && self.shape_of(first).is_indirect() {
            return Err(HeapError::IndirectFlatConsHead { first });
        }

        let length = first_value.length() as usize + second_value.length() as usize;
        check_length(length)?;
        let encoding = match (first_value.encoding(), second_value.encoding()) {
            (Encoding::OneByte, Encoding::OneByte) => Encoding::OneByte,
            _ => Encoding::TwoByte,
        };

        let cons = self.allocate_string(
            InstanceType::string(Representation::Cons, encoding, false),
            ConsString::SIZE,
            length as u32,
        )?;
        self.memory
            .write(cons + ConsString::FIRST_OFFSET, Width::W64, first);
        self.memory
            .write(cons + ConsString::SECOND_OFFSET, Width::W64, second);
        trace!(cons, first, second, length, "allocated cons string");
        Ok(cons)
    }

    /// Allocates a view of `length` code units of `parent` starting at `offset`.
    ///
    /// Slices never point at indirect strings: a sliced parent is replaced by its own parent
    /// (offsets add up) and a flat cons parent by its first half. An unflattened cons parent is
    /// rejected.
    pub fn new_sliced_string(
        &mut self,
        parent: u64,
        offset: u32,
        length: u32,
    ) -> Result<u64, HeapError> {
        let parent_value = self.string_value(parent)?;
        let parent_length = parent_value.length();
        if offset as u64 + length as u64 > parent_length as u64 {
            return Err(HeapError::SliceOutOfRange {
                offset,
                length,
                parent_length,
            });
        }

        let (parent, offset) = match parent_value {
            StringValue::Sliced {
                parent: grandparent,
                offset: parent_offset,
                ..
            } => (grandparent, parent_offset + offset),
            StringValue::Cons { first, second, .. } => {
                if second != self.empty_string {
                    return Err(HeapError::UnflattenedSliceParent { parent });
                }
                (first, offset)
            }
            StringValue::FlatSequential { .. } | StringValue::External { .. } => (parent, offset),
        };
        debug_assert!(!self.shape_of(parent).is_indirect());

        let encoding = self.shape_of(parent).encoding();
        let sliced = self.allocate_string(
            InstanceType::string(Representation::Sliced, encoding, false),
            SlicedString::SIZE,
            length,
        )?;
        self.memory
            .write(sliced + SlicedString::PARENT_OFFSET, Width::W64, parent);
        self.memory.write(
            sliced + SlicedString::OFFSET_OFFSET,
            Width::W64,
            Smi::new(offset as i32).tag(),
        );
        trace!(sliced, parent, offset, length, "allocated sliced string");
        Ok(sliced)
    }

    /// Rewrites the halves of an existing cons string.
    ///
    /// `first` is published before `second`, so a reader that observes the empty-string
    /// sentinel in `second` also observes the new `first`.
    pub(crate) fn set_cons_halves(&mut self, cons: u64, first: u64, second: u64) {
        self.memory
            .write(cons + ConsString::FIRST_OFFSET, Width::W64, first);
        self.memory
            .write(cons + ConsString::SECOND_OFFSET, Width::W64, second);
    }

    fn allocate_seq(&mut self, encoding: Encoding, length: usize) -> Result<u64, HeapError> {
        check_length(length)?;
        let size = SeqString::HEADER_SIZE + length as u64 * encoding.char_size();
        self.allocate_string(
            InstanceType::string(Representation::Sequential, encoding, false),
            size,
            length as u32,
        )
    }

    fn new_external_string(
        &mut self,
        encoding: Encoding,
        bytes: &[u8],
        length: usize,
        short: bool,
    ) -> Result<u64, HeapError> {
        check_length(length)?;

        // Resource: `{ data, length }` header followed by the characters.
        let resource = self
            .memory
            .allocate((ExternalResource::HEADER_SIZE as usize) + bytes.len())?;
        let data = resource + ExternalResource::HEADER_SIZE;
        self.memory
            .write(resource + ExternalResource::DATA_OFFSET, Width::W64, data);
        self.memory.write(
            resource + ExternalResource::LENGTH_OFFSET,
            Width::W64,
            length as u64,
        );
        self.memory.write_bytes(data, bytes);

        let size = if short {
            ExternalString::SHORT_SIZE
        } else {
            ExternalString::SIZE
        };
        let string = self.allocate_string(
            InstanceType::string(Representation::External, encoding, short),
            size,
            length as u32,
        )?;
        self.memory.write(
            string + ExternalString::RESOURCE_OFFSET,
            Width::W64,
            resource,
        );
        if !short {
            self.memory.write(
                string + ExternalString::RESOURCE_DATA_OFFSET,
                Width::W64,
                data,
            );
        }
        Ok(string)
    }

    fn allocate_string(
        &mut self,
        ty: InstanceType,
        size: u64,
        length: u32,
    ) -> Result<u64, HeapError> {
        let map = self.string_map(ty);
        let obj = self.memory.allocate(size as usize)?;
        self.memory
            .write(obj + HeapObject::MAP_OFFSET, Width::W64, map);
        self.memory
            .write(obj + StringLayout::LENGTH_OFFSET, Width::W32, length as u64);
        Ok(obj)
    }
}

fn check_length(length: usize) -> Result<(), HeapError> {
    if length > StringLayout::MAX_LENGTH {
        return Err(HeapError::StringTooLong { length });
    }
    Ok(())
}

const _: () = assert!(POINTER_SIZE == Width::W64.bytes());

//! Object layout shared between the runtime and generated code.
//!
//! This module is the single source of truth for the byte offsets the character-load fast path
//! reads. All pointer-sized fields are 8 bytes and little-endian.
//!
//! Layout (bytes):
//! - every heap object: `map` (`u64`) at 0
//! - `Map`: `instance_type` (`u8`) at 8
//! - `String`: `length` (`u32`) at 8, `hash` (`u32`) at 12
//! - `SeqString`: character data from 16
//! - `ConsString`: `first` (`u64`) at 16, `second` (`u64`) at 24
//! - `SlicedString`: `parent` (`u64`) at 16, `offset` (Smi) at 24
//! - `ExternalString`: `resource` (`u64`) at 16, cached `resource_data` (`u64`) at 24; short
//!   external strings stop after `resource` and have no cached data pointer

/// Size of a tagged pointer field.
pub const POINTER_SIZE: u64 = 8;

/// Small integer stored in a pointer-sized field.
///
/// The 32-bit payload lives in the upper half of the word, so the untagged value can be read
/// with a single 32-bit load at [`Smi::UNTAGGED_OFFSET`] past the field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Smi(i32);

impl Smi {
    pub const SHIFT: u32 = 32;
    pub const UNTAGGED_OFFSET: u64 = 4;

    #[inline]
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn value(self) -> i32 {
        self.0
    }

    #[inline]
    pub const fn tag(self) -> u64 {
        ((self.0 as i64) << Self::SHIFT) as u64
    }

    #[inline]
    pub const fn untag(word: u64) -> Self {
        Self(((word as i64) >> Self::SHIFT) as i32)
    }
}

pub struct HeapObject;

impl HeapObject {
    pub const MAP_OFFSET: u64 = 0;
    pub const HEADER_SIZE: u64 = Self::MAP_OFFSET + POINTER_SIZE;
}

pub struct Map;

impl Map {
    pub const INSTANCE_TYPE_OFFSET: u64 = HeapObject::HEADER_SIZE;
    pub const SIZE: u64 = Self::INSTANCE_TYPE_OFFSET + POINTER_SIZE;
}

pub struct String;

impl String {
    pub const LENGTH_OFFSET: u64 = HeapObject::HEADER_SIZE;
    pub const HASH_FIELD_OFFSET: u64 = Self::LENGTH_OFFSET + 4;
    pub const SIZE: u64 = Self::HASH_FIELD_OFFSET + 4;

    /// Longest string the factory will build; lengths and slice offsets must fit a Smi.
    pub const MAX_LENGTH: usize = (1 << 28) - 16;
}

/// Sequential strings; one- and two-byte variants share the header.
pub struct SeqString;

impl SeqString {
    pub const HEADER_SIZE: u64 = String::SIZE;
}

pub struct ConsString;

impl ConsString {
    pub const FIRST_OFFSET: u64 = String::SIZE;
    pub const SECOND_OFFSET: u64 = Self::FIRST_OFFSET + POINTER_SIZE;
    pub const SIZE: u64 = Self::SECOND_OFFSET + POINTER_SIZE;
}

pub struct SlicedString;

impl SlicedString {
    pub const PARENT_OFFSET: u64 = String::SIZE;
    pub const OFFSET_OFFSET: u64 = Self::PARENT_OFFSET + POINTER_SIZE;
    pub const SIZE: u64 = Self::OFFSET_OFFSET + POINTER_SIZE;
}

pub struct ExternalString;

impl ExternalString {
    pub const RESOURCE_OFFSET: u64 = String::SIZE;
    pub const SHORT_SIZE: u64 = Self::RESOURCE_OFFSET + POINTER_SIZE;
    pub const RESOURCE_DATA_OFFSET: u64 = Self::SHORT_SIZE;
    pub const SIZE: u64 = Self::RESOURCE_DATA_OFFSET + POINTER_SIZE;
}

/// Out-of-line resource backing an external string: `{ data: u64, length: u64 }` followed by
/// the character data itself.
pub struct ExternalResource;

impl ExternalResource {
    pub const DATA_OFFSET: u64 = 0;
    pub const LENGTH_OFFSET: u64 = Self::DATA_OFFSET + POINTER_SIZE;
    pub const HEADER_SIZE: u64 = Self::LENGTH_OFFSET + POINTER_SIZE;
}

const _: () = {
    // The char-load fast path adds the same header size for either encoding.
    assert!(SeqString::HEADER_SIZE == String::SIZE);

    // A short external string is a prefix of a full one, minus the cached data pointer.
    assert!(ExternalString::SHORT_SIZE + POINTER_SIZE == ExternalString::SIZE);

    // Slice offsets are read as the high half of a Smi word.
    assert!(Smi::UNTAGGED_OFFSET * 8 == Smi::SHIFT as u64);

    assert!(String::MAX_LENGTH <= i32::MAX as usize);
};

//! Heap object model read by Tern's generated code.
//!
//! The heap is one byte-addressable address space ([`HeapMemory`]) in which every object starts
//! with a pointer to its map, and every map carries an instance-type byte. Strings come in four
//! representations (sequential, external, cons, sliced) crossed with two encodings; see
//! [`instance_type`] for the bit layout and [`layout`] for field offsets.
//!
//! [`Heap`] owns the address space, the canonical roots (string maps and the empty string) and
//! the string factory. The [`runtime`] module holds the slow-path operations generated code
//! falls back to: flattening and bounds-checked character access.

pub mod instance_type;
pub mod layout;
pub mod runtime;

mod heap;
mod memory;

use thiserror::Error;

pub use heap::{Heap, HeapConfig, StringValue};
pub use instance_type::{Encoding, InstanceType, Representation, ShapeDescriptor};
pub use memory::{HeapMemory, MemoryBus, Width, OBJECT_ALIGNMENT};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("heap exhausted: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    #[error("string length {length} exceeds the maximum string length")]
    StringTooLong { length: usize },

    #[error("slice [{offset}, {offset}+{length}) is out of range for a parent of length {parent_length}")]
    SliceOutOfRange {
        offset: u32,
        length: u32,
        parent_length: u32,
    },

    #[error("cannot slice unflattened cons string at {parent:#x}; flatten it first")]
    UnflattenedSliceParent { parent: u64 },

    #[error("flat cons string head at {first:#x} must be a sequential or external string")]
    IndirectFlatConsHead { first: u64 },

    #[error("object at {addr:#x} is not a string (instance type {instance_type:#04x})")]
    NotAString { addr: u64, instance_type: u8 },
}

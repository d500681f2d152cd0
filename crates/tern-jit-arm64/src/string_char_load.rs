//! Inline character loads from strings of any representation.
//!
//! The fast path runs on every indexed character read. It strips at most one level of
//! indirection (a slice, or a cons string whose second half is the empty string) and then loads
//! one code unit straight out of a sequential or external string. Anything else, i.e. an
//! unflattened cons string or a short external string, is handed back as a [`CharLoad::Bail`]
//! for the runtime to handle.
//!
//! Callers validate the index against the original string's length beforehand; nothing here
//! re-checks it.

use tern_heap::instance_type::STRING_REPRESENTATION_MASK;
use tern_heap::layout::{ConsString, ExternalString, HeapObject, Map, SeqString, SlicedString, Smi};
use tern_heap::runtime::string_char_code_at;
use tern_heap::{Encoding, Heap, HeapError, MemoryBus, ShapeDescriptor, Width};
use tracing::trace;

#[derive(Clone, Debug)]
pub struct CharLoadOptions {
    /// Check representation invariants while loading. Violations panic.
    pub debug_code: bool,
}

impl Default for CharLoadOptions {
    fn default() -> Self {
        Self {
            debug_code: cfg!(debug_assertions),
        }
    }
}

/// Reads the shape flags of the string at `string` (map load, then the instance-type byte).
pub fn classify<B: MemoryBus + ?Sized>(bus: &B, string: u64) -> ShapeDescriptor {
    let map = bus.read_u64(string + HeapObject::MAP_OFFSET);
    ShapeDescriptor::from_instance_type(bus.read_u8(map + Map::INSTANCE_TYPE_OFFSET))
}

/// First-level dispatch: indirect strings must be unwrapped before storage is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StringShape {
    Indirect(IndirectShape),
    Direct(DirectString),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IndirectShape {
    Sliced,
    Cons,
}

/// Where a directly addressable string keeps its characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DirectString {
    /// In the object, after the sequential string header.
    Sequential,
    /// Behind the cached resource data pointer.
    External,
}

impl StringShape {
    fn of(shape: ShapeDescriptor) -> Self {
        if shape.is_indirect() {
            if shape.is_sliced_not_cons() {
                StringShape::Indirect(IndirectShape::Sliced)
            } else {
                StringShape::Indirect(IndirectShape::Cons)
            }
        } else {
            StringShape::Direct(DirectString::of(shape))
        }
    }
}

impl DirectString {
    /// Only sequential and external strings are expected here, so any representation bit means
    /// external.
    fn of(shape: ShapeDescriptor) -> Self {
        if shape.bits() & STRING_REPRESENTATION_MASK == 0 {
            DirectString::Sequential
        } else {
            DirectString::External
        }
    }
}

/// A directly addressable string and the index to load from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Terminal {
    pub string: u64,
    pub kind: DirectString,
    pub encoding: Encoding,
    /// Index into `string`, including any slice offset.
    pub index: u32,
    /// Number of indirections stripped to get here (0 or 1).
    pub indirections: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BailReason {
    /// A cons string whose second half is not the empty string.
    UnflattenedCons,
    /// Short external strings do not cache their data pointer.
    ShortExternal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Terminal),
    Bail(BailReason),
}

/// Strips indirection from `string` until a sequential or external string is reached.
///
/// Sliced parents and flat cons heads are never indirect themselves, so at most one
/// indirection is followed.
pub fn resolve(heap: &Heap, string: u64, index: u32, options: &CharLoadOptions) -> Resolution {
    let mem = heap.memory();
    let shape = classify(mem, string);

    let (string, index, shape, indirections) = match StringShape::of(shape) {
        StringShape::Indirect(IndirectShape::Sliced) => {
            let offset =
                mem.read_u32(string + SlicedString::OFFSET_OFFSET + Smi::UNTAGGED_OFFSET);
            let parent = mem.read_u64(string + SlicedString::PARENT_OFFSET);
            (parent, index + offset, classify(mem, parent), 1)
        }
        StringShape::Indirect(IndirectShape::Cons) => {
            let second = mem.read_u64(string + ConsString::SECOND_OFFSET);
            if second != heap.empty_string() {
                return Resolution::Bail(BailReason::UnflattenedCons);
            }
            let first = mem.read_u64(string + ConsString::FIRST_OFFSET);
            (first, index, classify(mem, first), 1)
        }
        StringShape::Direct(_) => (string, index, shape, 0),
    };

    // Only sequential and external strings can reach here.
    let kind = DirectString::of(shape);
    if kind == DirectString::External {
        if options.debug_code {
            assert!(
                !shape.is_indirect(),
                "external string expected but not found at {string:#x} (shape {shape:?})"
            );
        }
        if shape.is_short_external() {
            return Resolution::Bail(BailReason::ShortExternal);
        }
    }

    Resolution::Resolved(Terminal {
        string,
        kind,
        encoding: shape.encoding(),
        index,
        indirections,
    })
}

/// Loads the code unit `terminal` designates.
pub fn fetch<B: MemoryBus + ?Sized>(bus: &B, terminal: &Terminal) -> u16 {
    let base = match terminal.kind {
        DirectString::Sequential => terminal.string + SeqString::HEADER_SIZE,
        DirectString::External => bus.read_u64(terminal.string + ExternalString::RESOURCE_DATA_OFFSET),
    };
    let index = terminal.index as u64;
    match terminal.encoding {
        Encoding::OneByte => bus.read(base + index, Width::W8) as u16,
        Encoding::TwoByte => bus.read(base + 2 * index, Width::W16) as u16,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CharLoad {
    Loaded(u16),
    Bail(BailReason),
}

/// The inline character-load fast path.
#[derive(Clone, Debug, Default)]
pub struct StringCharLoadGenerator {
    options: CharLoadOptions,
}

impl StringCharLoadGenerator {
    pub fn new(options: CharLoadOptions) -> Self {
        Self { options }
    }

    /// Loads code unit `index` of `string`, or bails. `index` must be in bounds.
    pub fn load(&self, heap: &Heap, string: u64, index: u32) -> CharLoad {
        match resolve(heap, string, index, &self.options) {
            Resolution::Resolved(terminal) => CharLoad::Loaded(fetch(heap.memory(), &terminal)),
            Resolution::Bail(reason) => {
                trace!(string, index, ?reason, "char load bailed to runtime");
                CharLoad::Bail(reason)
            }
        }
    }
}

/// The runtime half of a character load.
///
/// Must return exactly what the fast path would have for every shape the fast path handles.
pub trait SlowPathCharFetch {
    fn heap(&self) -> &Heap;

    /// Bounds-checked load; `Ok(None)` for an out-of-range index.
    fn char_code_at(&mut self, string: u64, index: u32) -> Result<Option<u16>, HeapError>;
}

impl SlowPathCharFetch for Heap {
    fn heap(&self) -> &Heap {
        self
    }

    fn char_code_at(&mut self, string: u64, index: u32) -> Result<Option<u16>, HeapError> {
        string_char_code_at(self, string, index)
    }
}

/// Full `charCodeAt`: bounds check, inline fast path, runtime fallback.
#[derive(Clone, Debug, Default)]
pub struct StringCharCodeAtGenerator {
    char_load: StringCharLoadGenerator,
}

impl StringCharCodeAtGenerator {
    pub fn new(options: CharLoadOptions) -> Self {
        Self {
            char_load: StringCharLoadGenerator::new(options),
        }
    }

    /// Returns `Ok(None)` when `index` is out of range for `string`.
    pub fn char_code_at<R: SlowPathCharFetch + ?Sized>(
        &self,
        runtime: &mut R,
        string: u64,
        index: u32,
    ) -> Result<Option<u16>, HeapError> {
        let heap = runtime.heap();
        if index >= heap.length_of(string) {
            return Ok(None);
        }
        match self.char_load.load(heap, string, index) {
            CharLoad::Loaded(unit) => Ok(Some(unit)),
            CharLoad::Bail(_) => runtime.char_code_at(string, index),
        }
    }
}

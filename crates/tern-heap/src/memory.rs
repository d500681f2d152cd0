//! Byte-addressable heap address space.
//!
//! Generated code reads objects through raw addresses, so the heap is modelled as one flat
//! little-endian address space (A64's native byte order) rather than as Rust values. Every
//! object, map, and out-of-line external resource lives somewhere in this space.

use crate::HeapError;

/// Access width of a single load or store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
}

impl Width {
    #[inline]
    pub const fn bytes(self) -> u64 {
        match self {
            Width::W8 => 1,
            Width::W16 => 2,
            Width::W32 => 4,
            Width::W64 => 8,
        }
    }

    /// Truncates `value` to the low `self.bytes()` bytes.
    #[inline]
    pub const fn truncate(self, value: u64) -> u64 {
        match self {
            Width::W8 => value & 0xff,
            Width::W16 => value & 0xffff,
            Width::W32 => value & 0xffff_ffff,
            Width::W64 => value,
        }
    }
}

/// Minimal memory bus used by the fast path and the object factory.
///
/// Only byte accessors are required; wider accesses are assembled little-endian.
pub trait MemoryBus {
    fn read_u8(&self, addr: u64) -> u8;
    fn write_u8(&mut self, addr: u64, value: u8);

    #[must_use]
    fn read(&self, addr: u64, width: Width) -> u64 {
        let mut out = 0u64;
        for i in 0..width.bytes() {
            out |= (self.read_u8(addr + i) as u64) << (i * 8);
        }
        out
    }

    fn write(&mut self, addr: u64, width: Width, value: u64) {
        let v = width.truncate(value);
        for i in 0..width.bytes() {
            self.write_u8(addr + i, (v >> (i * 8)) as u8);
        }
    }

    #[must_use]
    fn read_u16(&self, addr: u64) -> u16 {
        self.read(addr, Width::W16) as u16
    }

    #[must_use]
    fn read_u32(&self, addr: u64) -> u32 {
        self.read(addr, Width::W32) as u32
    }

    #[must_use]
    fn read_u64(&self, addr: u64) -> u64 {
        self.read(addr, Width::W64)
    }

    #[must_use]
    fn fetch(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.read_u8(addr + i as u64);
        }
        buf
    }
}

/// Allocation alignment for every object and external resource.
pub const OBJECT_ALIGNMENT: u64 = 8;

/// A contiguous address space `[base, base + capacity)` with a bump allocator.
#[derive(Clone, Debug)]
pub struct HeapMemory {
    base: u64,
    bytes: Vec<u8>,
    capacity: usize,
}

impl HeapMemory {
    pub fn new(base: u64, capacity: usize) -> Self {
        assert!(base != 0, "heap base must be non-zero so null is never a valid object");
        assert_eq!(
            base % OBJECT_ALIGNMENT,
            0,
            "heap base {base:#x} is not {OBJECT_ALIGNMENT}-byte aligned"
        );
        Self {
            base,
            bytes: Vec::new(),
            capacity,
        }
    }

    /// First address past the last allocation.
    #[inline]
    pub fn top(&self) -> u64 {
        self.base + self.bytes.len() as u64
    }

    pub fn used_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Allocates `size` zeroed bytes, rounded up to [`OBJECT_ALIGNMENT`].
    pub fn allocate(&mut self, size: usize) -> Result<u64, HeapError> {
        let align = OBJECT_ALIGNMENT as usize;
        let rounded = size.div_ceil(align) * align;
        let available = self.capacity - self.bytes.len();
        if rounded > available {
            return Err(HeapError::OutOfMemory {
                requested: rounded,
                available,
            });
        }
        let addr = self.top();
        self.bytes.resize(self.bytes.len() + rounded, 0);
        Ok(addr)
    }

    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) {
        let off = self.offset_of(addr, data.len());
        self.bytes[off..off + data.len()].copy_from_slice(data);
    }

    pub fn read_bytes(&self, addr: u64, len: usize) -> &[u8] {
        let off = self.offset_of(addr, len);
        &self.bytes[off..off + len]
    }

    fn offset_of(&self, addr: u64, len: usize) -> usize {
        let end = addr.checked_add(len as u64);
        assert!(
            addr >= self.base && end.is_some_and(|end| end <= self.top()),
            "heap access out of bounds: addr={addr:#x} len={len} heap=[{:#x}, {:#x})",
            self.base,
            self.top()
        );
        (addr - self.base) as usize
    }
}

impl MemoryBus for HeapMemory {
    #[inline]
    fn read_u8(&self, addr: u64) -> u8 {
        self.bytes[self.offset_of(addr, 1)]
    }

    #[inline]
    fn write_u8(&mut self, addr: u64, value: u8) {
        let off = self.offset_of(addr, 1);
        self.bytes[off] = value;
    }

    fn read(&self, addr: u64, width: Width) -> u64 {
        let len = width.bytes() as usize;
        let mut buf = [0u8; 8];
        buf[..len].copy_from_slice(self.read_bytes(addr, len));
        u64::from_le_bytes(buf)
    }

    fn write(&mut self, addr: u64, width: Width, value: u64) {
        let len = width.bytes() as usize;
        self.write_bytes(addr, &width.truncate(value).to_le_bytes()[..len]);
    }
}

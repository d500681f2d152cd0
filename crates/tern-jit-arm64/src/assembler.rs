//! Minimal A64 instruction emission.
//!
//! Only the instructions that appear in function prologues and code-age sequences are encoded
//! here; general code emission is the job of the full macro assembler. Every instruction is one
//! little-endian 32-bit word.

/// Size of one A64 instruction in bytes.
pub const INSTRUCTION_SIZE: usize = 4;

/// A 64-bit general purpose register (or `sp` when used as a base/destination of add/sub).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Register(u8);

impl Register {
    pub const X0: Self = Self(0);
    pub const X1: Self = Self(1);
    /// Intra-procedure-call scratch register.
    pub const IP0: Self = Self(16);
    /// Context pointer.
    pub const CP: Self = Self(27);
    /// JavaScript stack pointer.
    pub const JSSP: Self = Self(28);
    pub const FP: Self = Self(29);
    pub const LR: Self = Self(30);
    /// The C stack pointer (`sp`); shares encoding 31 with `xzr`.
    pub const CSP: Self = Self(31);

    #[inline]
    pub const fn code(self) -> u32 {
        self.0 as u32
    }
}

/// Raw instruction encoders.
pub mod encode {
    use super::Register;

    pub const NOP: u32 = 0xd503_201f;

    const ADD_IMM_X: u32 = 0x9100_0000;
    const SUB_IMM_X: u32 = 0xd100_0000;
    const STP_X_OFFSET: u32 = 0xa900_0000;
    const LDR_LITERAL_X: u32 = 0x5800_0000;
    const ADR: u32 = 0x1000_0000;
    const BR: u32 = 0xd61f_0000;
    const RET: u32 = 0xd65f_0000;

    fn add_sub_imm(base: u32, rd: Register, rn: Register, imm: u32) -> u32 {
        assert!(imm < (1 << 12), "add/sub immediate {imm} does not fit in 12 bits");
        base | (imm << 10) | (rn.code() << 5) | rd.code()
    }

    pub fn add_imm(rd: Register, rn: Register, imm: u32) -> u32 {
        add_sub_imm(ADD_IMM_X, rd, rn, imm)
    }

    pub fn sub_imm(rd: Register, rn: Register, imm: u32) -> u32 {
        add_sub_imm(SUB_IMM_X, rd, rn, imm)
    }

    /// `stp rt, rt2, [rn, #offset]` (signed offset, no writeback).
    pub fn stp(rt: Register, rt2: Register, rn: Register, offset: i32) -> u32 {
        assert!(
            offset % 8 == 0 && (-512..=504).contains(&offset),
            "stp offset {offset} is not a scaled 7-bit immediate"
        );
        let imm7 = ((offset / 8) as u32) & 0x7f;
        STP_X_OFFSET | (imm7 << 15) | (rt2.code() << 10) | (rn.code() << 5) | rt.code()
    }

    /// `ldr rt, pc + imm19 * 4`.
    pub fn ldr_literal(rt: Register, imm19: i32) -> u32 {
        assert!(
            (-(1 << 18)..(1 << 18)).contains(&imm19),
            "ldr literal offset {imm19} does not fit in 19 bits"
        );
        LDR_LITERAL_X | (((imm19 as u32) & 0x7ffff) << 5) | rt.code()
    }

    /// `adr rd, pc + offset` (byte offset).
    pub fn adr(rd: Register, offset: i32) -> u32 {
        assert!(
            (-(1 << 20)..(1 << 20)).contains(&offset),
            "adr offset {offset} does not fit in 21 bits"
        );
        let imm = offset as u32;
        let immlo = imm & 0x3;
        let immhi = (imm >> 2) & 0x7ffff;
        ADR | (immlo << 29) | (immhi << 5) | rd.code()
    }

    pub fn br(rn: Register) -> u32 {
        BR | (rn.code() << 5)
    }

    pub fn ret(rn: Register) -> u32 {
        RET | (rn.code() << 5)
    }
}

/// Sink for emitted instructions.
///
/// Implementors only provide raw word emission; the instruction helpers are shared.
pub trait Emitter {
    /// Appends one instruction word.
    fn emit(&mut self, word: u32);

    /// Byte offset of the next instruction.
    fn pc_offset(&self) -> usize;

    /// Embeds a 64-bit literal as two consecutive words.
    fn dc64(&mut self, data: u64) {
        self.emit(data as u32);
        self.emit((data >> 32) as u32);
    }

    fn nop(&mut self) {
        self.emit(encode::NOP);
    }

    fn add_imm(&mut self, rd: Register, rn: Register, imm: u32) {
        self.emit(encode::add_imm(rd, rn, imm));
    }

    fn sub_imm(&mut self, rd: Register, rn: Register, imm: u32) {
        self.emit(encode::sub_imm(rd, rn, imm));
    }

    fn stp(&mut self, rt: Register, rt2: Register, rn: Register, offset: i32) {
        self.emit(encode::stp(rt, rt2, rn, offset));
    }

    /// Loads the 64-bit literal at byte offset `target` (relative to the buffer start).
    fn ldr_pcrel(&mut self, rt: Register, target: usize) {
        let delta = target as i64 - self.pc_offset() as i64;
        assert!(delta % 4 == 0, "literal at {target} is not word aligned");
        self.emit(encode::ldr_literal(rt, (delta / 4) as i32));
    }

    /// Materialises the address of byte offset `target` (relative to the buffer start).
    fn adr(&mut self, rd: Register, target: usize) {
        let delta = target as i64 - self.pc_offset() as i64;
        self.emit(encode::adr(rd, delta as i32));
    }

    fn br(&mut self, rn: Register) {
        self.emit(encode::br(rn));
    }

    fn ret(&mut self) {
        self.emit(encode::ret(Register::LR));
    }
}

/// Growable buffer used when generating fresh code.
#[derive(Clone, Debug, Default)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Emitter for CodeBuffer {
    fn emit(&mut self, word: u32) {
        self.bytes.extend_from_slice(&word.to_le_bytes());
    }

    fn pc_offset(&self) -> usize {
        self.bytes.len()
    }
}

/// Overwrites an existing fixed-size window of code in place.
///
/// The window must be filled exactly: emitting past its end panics, and so does
/// [`PatchingAssembler::finish`] on a partially written window. Both are emission bugs, not
/// runtime conditions.
pub struct PatchingAssembler<'a> {
    window: &'a mut [u8],
    pc: usize,
}

impl<'a> PatchingAssembler<'a> {
    pub fn new(window: &'a mut [u8]) -> Self {
        assert_eq!(
            window.len() % INSTRUCTION_SIZE,
            0,
            "patch window of {} bytes is not a whole number of instructions",
            window.len()
        );
        Self { window, pc: 0 }
    }

    /// Asserts that the whole window was rewritten.
    pub fn finish(self) {
        assert_eq!(
            self.pc,
            self.window.len(),
            "patch emitted {} of {} bytes",
            self.pc,
            self.window.len()
        );
    }
}

impl Emitter for PatchingAssembler<'_> {
    fn emit(&mut self, word: u32) {
        let end = self.pc + INSTRUCTION_SIZE;
        assert!(
            end <= self.window.len(),
            "patch overflows its {}-byte window",
            self.window.len()
        );
        self.window[self.pc..end].copy_from_slice(&word.to_le_bytes());
        self.pc = end;
    }

    fn pc_offset(&self) -> usize {
        self.pc
    }
}

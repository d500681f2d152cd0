//! Prologue sequences shared by the baseline compiler and the code-age machinery.
//!
//! Every aged or ageable function starts with a window of exactly
//! [`NO_CODE_AGE_SEQUENCE_LENGTH`] bytes. A young function holds the frame setup emitted by
//! [`emit_frame_setup_for_code_age_patching`]; an aged one holds the sequence from
//! [`emit_code_age_sequence`], which calls into a code-age stub whose entry address is embedded
//! at [`CODE_AGE_STUB_ENTRY_OFFSET`].

use crate::assembler::{Emitter, Register, INSTRUCTION_SIZE};

/// Length of the patchable prologue window.
pub const NO_CODE_AGE_SEQUENCE_LENGTH: usize = 5 * INSTRUCTION_SIZE;

/// Offset of the 64-bit stub entry address inside an aged prologue.
pub const CODE_AGE_STUB_ENTRY_OFFSET: usize = 3 * INSTRUCTION_SIZE;

/// Size of a pointer-sized stack slot.
const X_REG_SIZE: u32 = 8;

/// Distance from the frame pointer to the bottom of the fixed frame part (`fp`, `lr`).
const FIXED_FRAME_SIZE_FROM_FP: u32 = 2 * X_REG_SIZE;

const _: () = {
    assert!(CODE_AGE_STUB_ENTRY_OFFSET + 8 == NO_CODE_AGE_SEQUENCE_LENGTH);
};

/// Emits the frame setup every baseline function starts with.
///
/// Five instructions, matching the length of the aged sequence. The two stack pointers are
/// adjusted separately rather than through write-back addressing.
pub fn emit_frame_setup_for_code_age_patching(e: &mut impl Emitter) {
    let start = e.pc_offset();
    e.sub_imm(Register::JSSP, Register::JSSP, 4 * X_REG_SIZE);
    e.sub_imm(Register::CSP, Register::CSP, 4 * X_REG_SIZE);
    e.stp(Register::X1, Register::CP, Register::JSSP, 0);
    e.stp(Register::FP, Register::LR, Register::JSSP, 2 * X_REG_SIZE as i32);
    e.add_imm(Register::FP, Register::JSSP, FIXED_FRAME_SIZE_FROM_FP);
    assert_size_of_code_generated_since(&*e, start, NO_CODE_AGE_SEQUENCE_LENGTH);
}

/// Emits the aged prologue: jump to the code-age stub, passing the window start in `x0`.
///
/// With `stub == None` only the instruction part (up to [`CODE_AGE_STUB_ENTRY_OFFSET`]) is
/// emitted.
pub fn emit_code_age_sequence(e: &mut impl Emitter, stub: Option<u64>) {
    let start = e.pc_offset();
    e.ldr_pcrel(Register::IP0, start + CODE_AGE_STUB_ENTRY_OFFSET);
    e.adr(Register::X0, start);
    e.br(Register::IP0);
    assert_size_of_code_generated_since(&*e, start, CODE_AGE_STUB_ENTRY_OFFSET);
    if let Some(entry) = stub {
        e.dc64(entry);
        assert_size_of_code_generated_since(&*e, start, NO_CODE_AGE_SEQUENCE_LENGTH);
    }
}

fn assert_size_of_code_generated_since(e: &impl Emitter, start: usize, size: usize) {
    assert_eq!(
        e.pc_offset() - start,
        size,
        "prologue sequence emitted {} bytes, expected {size}",
        e.pc_offset() - start
    );
}

//! A64 backend pieces shared by Tern's baseline and optimizing compilers.
//!
//! - [`string_char_load`]: inline character loads over every string representation, with a
//!   runtime fallback for the shapes the fast path declines.
//! - [`code_age`]: the prologue patching that lets the collector age unexecuted functions and
//!   that an aged function undoes when it runs again.
//!
//! [`assembler`] and [`macro_assembler`] provide just enough instruction emission to produce
//! the prologue sequences; [`baseline`] owns the code objects those sequences live in.

pub mod assembler;
pub mod baseline;
pub mod code_age;
pub mod macro_assembler;
pub mod string_char_load;

pub use baseline::{BaselineCompiler, Code, CodeAgeError, CodeKind};
pub use code_age::{
    Age, CodeAgeSequence, CodeAgeState, CodeAgeStub, CodeAgeStubTable, CodeAgingConfig,
    CodeAgingHelper, MarkingParity,
};
pub use macro_assembler::{CODE_AGE_STUB_ENTRY_OFFSET, NO_CODE_AGE_SEQUENCE_LENGTH};
pub use string_char_load::{
    BailReason, CharLoad, CharLoadOptions, DirectString, Resolution, SlowPathCharFetch,
    StringCharCodeAtGenerator, StringCharLoadGenerator, Terminal,
};

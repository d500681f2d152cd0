//! Baseline function code objects.
//!
//! Only the part of baseline compilation that concerns code aging lives here: every baseline
//! function begins with the young prologue, and the prologue window can be borrowed for
//! inspection or patching.

use thiserror::Error;
use tracing::trace;

use crate::assembler::CodeBuffer;
use crate::code_age::CodeAgeSequence;
use crate::macro_assembler::{emit_frame_setup_for_code_age_patching, NO_CODE_AGE_SEQUENCE_LENGTH};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeAgeError {
    #[error("{kind:?} code has no code-age sequence")]
    NotAgeable { kind: CodeKind },

    #[error(
        "code is {len} bytes, shorter than the {}-byte code-age sequence",
        NO_CODE_AGE_SEQUENCE_LENGTH
    )]
    WindowTooShort { len: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodeKind {
    /// Baseline-compiled function; starts with the code-age window.
    Function,
    /// Optimized function; also starts with the code-age window.
    OptimizedFunction,
    /// Stubs and builtins never age.
    Stub,
}

impl CodeKind {
    #[inline]
    pub fn is_ageable(self) -> bool {
        matches!(self, CodeKind::Function | CodeKind::OptimizedFunction)
    }
}

/// A compiled code object.
#[derive(Clone, Debug)]
pub struct Code {
    kind: CodeKind,
    instructions: Vec<u8>,
}

impl Code {
    pub fn new(kind: CodeKind, instructions: Vec<u8>) -> Self {
        Self { kind, instructions }
    }

    #[inline]
    pub fn kind(&self) -> CodeKind {
        self.kind
    }

    #[inline]
    pub fn instructions(&self) -> &[u8] {
        &self.instructions
    }

    pub fn code_age_sequence(&self) -> Result<&CodeAgeSequence, CodeAgeError> {
        self.check_ageable()?;
        let len = self.instructions.len();
        self.instructions
            .first_chunk()
            .ok_or(CodeAgeError::WindowTooShort { len })
    }

    /// Mutable access to the prologue window; holding it is what makes patching safe.
    pub fn code_age_sequence_mut(&mut self) -> Result<&mut CodeAgeSequence, CodeAgeError> {
        self.check_ageable()?;
        let len = self.instructions.len();
        self.instructions
            .first_chunk_mut()
            .ok_or(CodeAgeError::WindowTooShort { len })
    }

    fn check_ageable(&self) -> Result<(), CodeAgeError> {
        if self.kind.is_ageable() {
            Ok(())
        } else {
            Err(CodeAgeError::NotAgeable { kind: self.kind })
        }
    }
}

/// Emits baseline functions.
#[derive(Clone, Copy, Debug, Default)]
pub struct BaselineCompiler;

impl BaselineCompiler {
    pub fn new() -> Self {
        Self
    }

    /// Emits the young prologue followed by whatever `body` emits.
    pub fn compile(&self, body: impl FnOnce(&mut CodeBuffer)) -> Code {
        let mut buf = CodeBuffer::new();
        emit_frame_setup_for_code_age_patching(&mut buf);
        body(&mut buf);
        let instructions = buf.into_bytes();
        trace!(len = instructions.len(), "compiled baseline function");
        Code::new(CodeKind::Function, instructions)
    }
}

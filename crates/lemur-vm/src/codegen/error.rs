use compact_str::CompactString;
use thiserror::Error;

use crate::code::{CodeError, Opcode};

/// The result type for native code generation.
pub type CodegenResult<T> = Result<T, CodegenError>;

#[derive(Clone, Debug, Error, PartialEq)]
/// Represents errors that abort native code generation. No partial assembly is returned.
pub enum CodegenError {
    #[error("{0} has no native lowering in this frame")]
    UnsupportedOpcode(Opcode),
    #[error("constant {index} is malformed: {reason}")]
    MalformedConstant {
        index: usize,
        reason: CompactString,
    },
    #[error("builtin {0} is not defined")]
    UnknownBuiltin(usize),
    #[error("jump target {offset} is not an instruction boundary")]
    InvalidJumpTarget { offset: usize },
    #[error(transparent)]
    Code(#[from] CodeError),
    #[error("failed to format assembly: {0}")]
    Format(#[from] std::fmt::Error),
}

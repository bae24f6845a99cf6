use compact_str::CompactString;
use thiserror::Error;

use crate::code::CodeError;

/// The result type for compilation.
pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Clone, Debug, Error, PartialEq)]
/// Represents an error that can occur during compilation.
///
/// Compilation stops at the first error.
pub enum CompileError {
    #[error("undefined variable {0}")]
    UndefinedVariable(CompactString),
    #[error("unknown operator {0}")]
    UnknownOperator(CompactString),
    #[error("malformed literal: {0}")]
    MalformedLiteral(CompactString),
    #[error(transparent)]
    Code(#[from] CodeError),
}

use compact_str::CompactString;
use thiserror::Error;

use crate::{code::CodeError, val::ObjectType};

/// The result type for VM operations.
pub type VmResult<T> = Result<T, VmError>;

#[derive(Clone, Debug, Error, PartialEq)]
/// Represents errors that can occur during VM execution.
///
/// Every error halts [`crate::vm::Vm::run`]; there is no partial result.
pub enum VmError {
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("unsupported types for {op}: {left} {right}")]
    TypeError {
        op: &'static str,
        left: ObjectType,
        right: ObjectType,
    },
    #[error("unsupported type for {op}: {operand}")]
    UnaryTypeError {
        op: &'static str,
        operand: ObjectType,
    },
    #[error("argument to `{builtin}` not supported, got {actual}")]
    ArgumentTypeError {
        builtin: &'static str,
        actual: ObjectType,
    },
    #[error("index {index} out of range for array of length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("unusable as hash key: {0}")]
    UnhashableKey(ObjectType),
    #[error("calling non-function: {0}")]
    NotCallable(ObjectType),
    #[error("wrong number of arguments: want={expected}, got={actual}")]
    WrongArgumentCount { expected: usize, actual: usize },
    #[error("division by zero")]
    DivisionByZero,
    #[error("constant {index} is not a {expected}")]
    MalformedConstant {
        index: usize,
        expected: &'static str,
    },
    #[error("builtin {0} is not defined")]
    UnknownBuiltin(usize),
    #[error("free variable {0} is not captured by the current closure")]
    UnknownFreeVariable(usize),
    #[error("failed to write output: {0}")]
    Output(CompactString),
    #[error(transparent)]
    Code(#[from] CodeError),
}

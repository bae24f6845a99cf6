use std::rc::Rc;

/// Abstract syntax tree consumed by the compiler.
pub mod ast;
/// Builtin functions.
pub mod builtins;
/// Instruction encoding.
pub mod code;
/// Native code generation.
pub mod codegen;
/// Compiler.
pub mod compiler;
/// Values.
pub mod val;
/// Virtual machine.
pub mod vm;

#[cfg(test)]
mod test_programs;

/// A reference counted pointer.
pub type LemurRc<T> = Rc<T>;

pub use compiler::{Bytecode, compile};

use std::io::Write;

use crate::{
    val::Object,
    vm::{VmError, VmResult},
};

/// The signature of a builtin implementation.
pub type BuiltinFn = fn(&[Object]) -> VmResult<Object>;

#[derive(Copy, Clone)]
/// A function implemented outside of the compiled language.
pub struct Builtin {
    /// The name the function is bound to.
    pub name: &'static str,
    function: BuiltinFn,
}

impl Builtin {
    /// Calls the function.
    pub fn call(&self, args: &[Object]) -> VmResult<Object> {
        (self.function)(args)
    }
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// All builtins. The position of a builtin is its `OpGetBuiltin` operand, so entries may only be
/// appended.
pub const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "len",
        function: len_fn,
    },
    Builtin {
        name: "puts",
        function: puts_fn,
    },
    Builtin {
        name: "first",
        function: first_fn,
    },
    Builtin {
        name: "last",
        function: last_fn,
    },
    Builtin {
        name: "rest",
        function: rest_fn,
    },
    Builtin {
        name: "push",
        function: push_fn,
    },
];

/// Returns the builtin at `index`.
pub fn get(index: usize) -> Option<&'static Builtin> {
    BUILTINS.get(index)
}

/// Returns the index of the builtin named `name`.
pub fn lookup(name: &str) -> Option<usize> {
    BUILTINS.iter().position(|builtin| builtin.name == name)
}

fn expect_args(args: &[Object], expected: usize) -> VmResult<()> {
    if args.len() != expected {
        return Err(VmError::WrongArgumentCount {
            expected,
            actual: args.len(),
        });
    }
    Ok(())
}

fn expect_array<'a>(builtin: &'static str, arg: &'a Object) -> VmResult<&'a [Object]> {
    match arg {
        Object::Array(elements) => Ok(elements),
        other => Err(VmError::ArgumentTypeError {
            builtin,
            actual: other.object_type(),
        }),
    }
}

/// Returns the length of a string or array.
fn len_fn(args: &[Object]) -> VmResult<Object> {
    expect_args(args, 1)?;
    match &args[0] {
        Object::String(s) => Ok(Object::Integer(s.len() as i64)),
        Object::Array(elements) => Ok(Object::Integer(elements.len() as i64)),
        other => Err(VmError::ArgumentTypeError {
            builtin: "len",
            actual: other.object_type(),
        }),
    }
}

/// Prints each argument on its own line.
fn puts_fn(args: &[Object]) -> VmResult<Object> {
    let mut out = std::io::stdout().lock();
    for arg in args {
        writeln!(out, "{arg}").map_err(|err| VmError::Output(err.to_string().into()))?;
    }
    Ok(Object::Null)
}

fn first_fn(args: &[Object]) -> VmResult<Object> {
    expect_args(args, 1)?;
    let elements = expect_array("first", &args[0])?;
    Ok(elements.first().cloned().unwrap_or_default())
}

fn last_fn(args: &[Object]) -> VmResult<Object> {
    expect_args(args, 1)?;
    let elements = expect_array("last", &args[0])?;
    Ok(elements.last().cloned().unwrap_or_default())
}

/// Returns a new array without the first element, or null for an empty array.
fn rest_fn(args: &[Object]) -> VmResult<Object> {
    expect_args(args, 1)?;
    match expect_array("rest", &args[0])? {
        [] => Ok(Object::Null),
        [_, rest @ ..] => Ok(Object::array(rest.to_vec())),
    }
}

/// Returns a new array with the second argument appended.
fn push_fn(args: &[Object]) -> VmResult<Object> {
    expect_args(args, 2)?;
    let elements = expect_array("push", &args[0])?;
    let mut pushed = Vec::with_capacity(elements.len() + 1);
    pushed.extend_from_slice(elements);
    pushed.push(args[1].clone());
    Ok(Object::array(pushed))
}

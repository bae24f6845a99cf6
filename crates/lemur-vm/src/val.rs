use std::collections::BTreeMap;

use crate::{LemurRc, builtins, code::Instructions};

/// The physical hash representation.
pub type LemurHash = BTreeMap<HashKey, Object>;

#[derive(Clone, Debug, Default, PartialEq)]
/// Represents a value in the VM.
///
/// Booleans and null are plain values, so comparing them never depends on identity.
pub enum Object {
    /// Represents the lack of a value.
    #[default]
    Null,
    Integer(i64),
    Boolean(bool),
    String(LemurRc<str>),
    Array(LemurRc<[Object]>),
    Hash(LemurRc<LemurHash>),
    /// A function blueprint as stored in the constant pool.
    CompiledFunction(LemurRc<CompiledFunction>),
    /// A function together with its captured free variables.
    Closure(LemurRc<Closure>),
    /// A builtin function, referenced by its index in [`builtins::BUILTINS`].
    Builtin(usize),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// The type of an [`Object`].
pub enum ObjectType {
    Null,
    Integer,
    Boolean,
    String,
    Array,
    Hash,
    CompiledFunction,
    Closure,
    Builtin,
}

#[derive(Clone, Debug, Default, PartialEq)]
/// A compiled function body.
pub struct CompiledFunction {
    /// The instructions of the function.
    pub instructions: Instructions,
    /// The number of local slots, parameters included.
    pub num_locals: usize,
    /// The number of parameters the function takes.
    pub num_parameters: usize,
}

#[derive(Clone, Debug, PartialEq)]
/// A function paired with the values it captured when it was created.
pub struct Closure {
    pub function: LemurRc<CompiledFunction>,
    pub free: Vec<Object>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// A value that may be used as a hash key.
pub enum HashKey {
    Integer(i64),
    Boolean(bool),
    String(LemurRc<str>),
}

impl Object {
    /// Creates a new string object.
    pub fn string(s: &str) -> Object {
        Object::String(LemurRc::from(s))
    }

    /// Creates a new array object.
    pub fn array(elements: Vec<Object>) -> Object {
        Object::Array(LemurRc::from(elements))
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            Object::Null => ObjectType::Null,
            Object::Integer(_) => ObjectType::Integer,
            Object::Boolean(_) => ObjectType::Boolean,
            Object::String(_) => ObjectType::String,
            Object::Array(_) => ObjectType::Array,
            Object::Hash(_) => ObjectType::Hash,
            Object::CompiledFunction(_) => ObjectType::CompiledFunction,
            Object::Closure(_) => ObjectType::Closure,
            Object::Builtin(_) => ObjectType::Builtin,
        }
    }

    /// Returns `false` for `false`, `null` and the integer `0`, and `true` for everything else.
    pub fn is_truthy(&self) -> bool {
        match self {
            Object::Null => false,
            Object::Boolean(x) => *x,
            Object::Integer(x) => *x != 0,
            _ => true,
        }
    }

    /// Returns the hash key for the value or `None` if the value can not be hashed.
    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Object::Integer(x) => Some(HashKey::Integer(*x)),
            Object::Boolean(x) => Some(HashKey::Boolean(*x)),
            Object::String(x) => Some(HashKey::String(x.clone())),
            _ => None,
        }
    }

    /// Returns the status a program exits with when this is its result. Integers and booleans
    /// give their value, every other object gives `0`.
    pub fn exit_value(&self) -> i64 {
        match self {
            Object::Integer(x) => *x,
            Object::Boolean(x) => *x as i64,
            _ => 0,
        }
    }
}

impl From<HashKey> for Object {
    fn from(value: HashKey) -> Object {
        match value {
            HashKey::Integer(x) => Object::Integer(x),
            HashKey::Boolean(x) => Object::Boolean(x),
            HashKey::String(x) => Object::String(x),
        }
    }
}

impl From<i64> for Object {
    fn from(value: i64) -> Object {
        Object::Integer(value)
    }
}

impl From<bool> for Object {
    fn from(value: bool) -> Object {
        Object::Boolean(value)
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ObjectType::Null => "NULL",
            ObjectType::Integer => "INTEGER",
            ObjectType::Boolean => "BOOLEAN",
            ObjectType::String => "STRING",
            ObjectType::Array => "ARRAY",
            ObjectType::Hash => "HASH",
            ObjectType::CompiledFunction => "COMPILED_FUNCTION",
            ObjectType::Closure => "CLOSURE",
            ObjectType::Builtin => "BUILTIN",
        };
        f.write_str(name)
    }
}

impl std::fmt::Display for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Object::Null => write!(f, "null"),
            Object::Integer(x) => write!(f, "{x}"),
            Object::Boolean(x) => write!(f, "{x}"),
            Object::String(x) => write!(f, "{x}"),
            Object::Array(elements) => {
                write!(f, "[")?;
                for (idx, element) in elements.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
            Object::Hash(pairs) => {
                write!(f, "{{")?;
                for (idx, (key, value)) in pairs.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {value}", Object::from(key.clone()))?;
                }
                write!(f, "}}")
            }
            Object::CompiledFunction(function) => {
                write!(f, "<compiled-fn/{}>", function.num_parameters)
            }
            Object::Closure(closure) => write!(
                f,
                "<closure/{} free={}>",
                closure.function.num_parameters,
                closure.free.len()
            ),
            Object::Builtin(idx) => match builtins::get(*idx) {
                Some(builtin) => write!(f, "<builtin-{}>", builtin.name),
                None => write!(f, "<builtin-{idx}>"),
            },
        }
    }
}

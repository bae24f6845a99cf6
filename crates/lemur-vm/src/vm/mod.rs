use tracing::{debug, trace};

use crate::{
    LemurRc,
    builtins,
    code::{Opcode, read_u8, read_uint},
    compiler::Bytecode,
    val::{Closure, CompiledFunction, LemurHash, Object},
};

pub mod error;

pub use error::{VmError, VmResult};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// Limits for a [`Vm`].
pub struct VmConfig {
    /// The maximum number of values on the operand stack, locals included.
    pub stack_size: usize,
    /// The maximum number of active frames, the program frame included.
    pub max_frames: usize,
}

impl Default for VmConfig {
    fn default() -> VmConfig {
        VmConfig {
            stack_size: 2048,
            max_frames: 1024,
        }
    }
}

#[derive(Debug)]
/// The virtual machine.
///
/// Executes [`Bytecode`] on an operand stack. Each function call pushes a [`StackFrame`] whose
/// locals live on the operand stack, right above the called closure.
pub struct Vm {
    constants: Vec<Object>,
    stack: Vec<Object>,
    globals: Vec<Object>,
    stack_frame: StackFrame,
    previous_stack_frames: Vec<StackFrame>,
    last_popped: Option<Object>,
    config: VmConfig,
}

#[derive(Clone, Debug)]
struct StackFrame {
    closure: LemurRc<Closure>,
    /// The offset of the next instruction.
    ip: usize,
    /// The stack index of the first local.
    stack_start: usize,
}

enum Flow {
    Continue,
    Halt(Object),
}

impl Vm {
    /// Creates a VM for `bytecode` with the default limits.
    pub fn new(bytecode: &Bytecode) -> Vm {
        Vm::with_config(bytecode, VmConfig::default())
    }

    /// Creates a VM for `bytecode`.
    pub fn with_config(bytecode: &Bytecode, config: VmConfig) -> Vm {
        let main = Closure {
            function: LemurRc::new(CompiledFunction {
                instructions: bytecode.instructions.clone(),
                num_locals: 0,
                num_parameters: 0,
            }),
            free: Vec::new(),
        };
        Vm {
            constants: bytecode.constants.clone(),
            stack: Vec::with_capacity(config.stack_size),
            globals: vec![Object::Null; bytecode.binding_count],
            stack_frame: StackFrame {
                closure: LemurRc::new(main),
                ip: 0,
                stack_start: 0,
            },
            previous_stack_frames: Vec::new(),
            last_popped: None,
            config,
        }
    }

    /// Runs the program to completion.
    ///
    /// Returns the value of a top level `return`, or else the last value discarded by a top level
    /// expression statement, or else null.
    pub fn run(&mut self) -> VmResult<Object> {
        debug!(
            "Running {} bytes of instructions",
            self.stack_frame.closure.function.instructions.len()
        );
        loop {
            if let Flow::Halt(result) = self.run_next()? {
                debug!("Program finished with {result}");
                return Ok(result);
            }
        }
    }

    /// The last value discarded by a top level expression statement.
    pub fn last_popped(&self) -> Option<&Object> {
        self.last_popped.as_ref()
    }

    /// The values of the global slots.
    pub fn globals(&self) -> &[Object] {
        &self.globals
    }

    fn is_program_frame(&self) -> bool {
        self.previous_stack_frames.is_empty()
    }

    fn push(&mut self, value: Object) -> VmResult<()> {
        if self.stack.len() >= self.config.stack_size {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Object> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    /// Removes the top `n` values and returns them in stack order.
    fn pop_n(&mut self, n: usize) -> VmResult<Vec<Object>> {
        let start = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or(VmError::StackUnderflow)?;
        Ok(self.stack.drain(start..).collect())
    }

    /// Executes the next instruction in the current stack frame.
    fn run_next(&mut self) -> VmResult<Flow> {
        let ip = self.stack_frame.ip;
        let ins = self.stack_frame.closure.function.instructions.as_bytes();
        let Some(&byte) = ins.get(ip) else {
            if self.is_program_frame() {
                return Ok(Flow::Halt(self.last_popped.clone().unwrap_or_default()));
            }
            return self.execute_return(Object::Null);
        };
        let op = Opcode::from_byte(byte)?;
        let definition = op.definition();
        let operand = match definition.operand_widths {
            [width, ..] => read_uint(ins, ip + 1, *width)?,
            [] => 0,
        };
        let free_count = match op {
            Opcode::Closure => read_u8(ins, ip + 3)?,
            _ => 0,
        };
        self.stack_frame.ip = ip + definition.instruction_width();
        match op {
            Opcode::Constant => {
                let constant = self
                    .constants
                    .get(operand)
                    .cloned()
                    .ok_or(VmError::MalformedConstant {
                        index: operand,
                        expected: "defined constant",
                    })?;
                self.push(constant)?;
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                self.execute_binary_operation(op)?
            }
            Opcode::Equal | Opcode::NotEqual | Opcode::GreaterThan => {
                self.execute_comparison(op)?
            }
            Opcode::Minus => match self.pop()? {
                Object::Integer(x) => self.push(Object::Integer(x.wrapping_neg()))?,
                other => {
                    return Err(VmError::UnaryTypeError {
                        op: "-",
                        operand: other.object_type(),
                    });
                }
            },
            Opcode::Bang => {
                let value = self.pop()?;
                self.push(Object::Boolean(!value.is_truthy()))?;
            }
            Opcode::Pop => {
                let value = self.pop()?;
                if self.is_program_frame() {
                    self.last_popped = Some(value);
                }
            }
            Opcode::True => self.push(Object::Boolean(true))?,
            Opcode::False => self.push(Object::Boolean(false))?,
            Opcode::Null => self.push(Object::Null)?,
            Opcode::Jump => self.stack_frame.ip = operand,
            Opcode::JumpNotTruthy => {
                if !self.pop()?.is_truthy() {
                    self.stack_frame.ip = operand;
                }
            }
            Opcode::GetGlobal => {
                let value = self.globals.get(operand).cloned().unwrap_or_default();
                self.push(value)?;
            }
            Opcode::SetGlobal => {
                let value = self.pop()?;
                if operand >= self.globals.len() {
                    self.globals.resize(operand + 1, Object::Null);
                }
                self.globals[operand] = value;
            }
            Opcode::GetLocal => {
                let value = self
                    .stack
                    .get(self.stack_frame.stack_start + operand)
                    .cloned()
                    .ok_or(VmError::StackUnderflow)?;
                self.push(value)?;
            }
            Opcode::SetLocal => {
                let value = self.pop()?;
                let idx = self.stack_frame.stack_start + operand;
                let slot = self.stack.get_mut(idx).ok_or(VmError::StackUnderflow)?;
                *slot = value;
            }
            Opcode::GetFree => {
                let value = self
                    .stack_frame
                    .closure
                    .free
                    .get(operand)
                    .cloned()
                    .ok_or(VmError::UnknownFreeVariable(operand))?;
                self.push(value)?;
            }
            Opcode::GetBuiltin => {
                if builtins::get(operand).is_none() {
                    return Err(VmError::UnknownBuiltin(operand));
                }
                self.push(Object::Builtin(operand))?;
            }
            Opcode::Array => {
                let elements = self.pop_n(operand)?;
                self.push(Object::array(elements))?;
            }
            Opcode::Hash => self.execute_hash(operand)?,
            Opcode::Index => self.execute_index()?,
            Opcode::Call => self.execute_call(operand)?,
            Opcode::ReturnValue => {
                let value = self.pop()?;
                return self.execute_return(value);
            }
            Opcode::Return => return self.execute_return(Object::Null),
            Opcode::Closure => self.execute_closure(operand, free_count)?,
        }
        Ok(Flow::Continue)
    }

    fn execute_binary_operation(&mut self, op: Opcode) -> VmResult<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = match (op, &left, &right) {
            (Opcode::Add, Object::Integer(a), Object::Integer(b)) => a.wrapping_add(*b),
            (Opcode::Sub, Object::Integer(a), Object::Integer(b)) => a.wrapping_sub(*b),
            (Opcode::Mul, Object::Integer(a), Object::Integer(b)) => a.wrapping_mul(*b),
            (Opcode::Div, Object::Integer(_), Object::Integer(0)) => {
                return Err(VmError::DivisionByZero);
            }
            (Opcode::Div, Object::Integer(a), Object::Integer(b)) => a.wrapping_div(*b),
            (Opcode::Add, Object::String(a), Object::String(b)) => {
                let mut concatenated = String::with_capacity(a.len() + b.len());
                concatenated.push_str(a);
                concatenated.push_str(b);
                return self.push(Object::string(&concatenated));
            }
            _ => {
                return Err(VmError::TypeError {
                    op: operator_name(op),
                    left: left.object_type(),
                    right: right.object_type(),
                });
            }
        };
        self.push(Object::Integer(result))
    }

    fn execute_comparison(&mut self, op: Opcode) -> VmResult<()> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = match (op, &left, &right) {
            (Opcode::GreaterThan, Object::Integer(a), Object::Integer(b)) => a > b,
            (Opcode::Equal, Object::Integer(a), Object::Integer(b)) => a == b,
            (Opcode::NotEqual, Object::Integer(a), Object::Integer(b)) => a != b,
            (Opcode::Equal, Object::Boolean(a), Object::Boolean(b)) => a == b,
            (Opcode::NotEqual, Object::Boolean(a), Object::Boolean(b)) => a != b,
            (Opcode::Equal, Object::String(a), Object::String(b)) => a == b,
            (Opcode::NotEqual, Object::String(a), Object::String(b)) => a != b,
            (Opcode::Equal, Object::Null, Object::Null) => true,
            (Opcode::NotEqual, Object::Null, Object::Null) => false,
            _ => {
                return Err(VmError::TypeError {
                    op: operator_name(op),
                    left: left.object_type(),
                    right: right.object_type(),
                });
            }
        };
        self.push(Object::Boolean(result))
    }

    fn execute_hash(&mut self, element_count: usize) -> VmResult<()> {
        let elements = self.pop_n(element_count)?;
        let mut hash = LemurHash::new();
        let mut elements = elements.into_iter();
        while let (Some(key), Some(value)) = (elements.next(), elements.next()) {
            let key = key
                .hash_key()
                .ok_or_else(|| VmError::UnhashableKey(key.object_type()))?;
            hash.insert(key, value);
        }
        self.push(Object::Hash(LemurRc::new(hash)))
    }

    fn execute_index(&mut self) -> VmResult<()> {
        let index = self.pop()?;
        let left = self.pop()?;
        let value = match (&left, &index) {
            (Object::Array(elements), Object::Integer(i)) => usize::try_from(*i)
                .ok()
                .and_then(|idx| elements.get(idx))
                .cloned()
                .ok_or(VmError::IndexOutOfRange {
                    index: *i,
                    len: elements.len(),
                })?,
            (Object::Hash(hash), key) => {
                let key = key
                    .hash_key()
                    .ok_or_else(|| VmError::UnhashableKey(key.object_type()))?;
                hash.get(&key).cloned().unwrap_or_default()
            }
            _ => {
                return Err(VmError::TypeError {
                    op: "index",
                    left: left.object_type(),
                    right: index.object_type(),
                });
            }
        };
        self.push(value)
    }

    fn execute_closure(&mut self, constant: usize, free_count: usize) -> VmResult<()> {
        let function = match self.constants.get(constant) {
            Some(Object::CompiledFunction(function)) => function.clone(),
            _ => {
                return Err(VmError::MalformedConstant {
                    index: constant,
                    expected: "function",
                });
            }
        };
        let free = self.pop_n(free_count)?;
        self.push(Object::Closure(LemurRc::new(Closure { function, free })))
    }

    /// Calls the value below the top `arg_count` values.
    fn execute_call(&mut self, arg_count: usize) -> VmResult<()> {
        let function_idx = self
            .stack
            .len()
            .checked_sub(arg_count + 1)
            .ok_or(VmError::StackUnderflow)?;
        match self.stack[function_idx].clone() {
            Object::Closure(closure) => {
                let function = &closure.function;
                if function.num_parameters != arg_count {
                    return Err(VmError::WrongArgumentCount {
                        expected: function.num_parameters,
                        actual: arg_count,
                    });
                }
                if self.previous_stack_frames.len() + 1 >= self.config.max_frames {
                    return Err(VmError::StackOverflow);
                }
                let extra_locals = function.num_locals.saturating_sub(arg_count);
                if self.stack.len() + extra_locals > self.config.stack_size {
                    return Err(VmError::StackOverflow);
                }
                self.stack
                    .extend(std::iter::repeat_n(Object::Null, extra_locals));
                let previous_stack_frame = std::mem::replace(
                    &mut self.stack_frame,
                    StackFrame {
                        closure,
                        ip: 0,
                        stack_start: function_idx + 1,
                    },
                );
                self.previous_stack_frames.push(previous_stack_frame);
                trace!(
                    "Entered frame {} at stack index {}",
                    self.previous_stack_frames.len(),
                    function_idx + 1
                );
            }
            Object::Builtin(idx) => {
                let builtin = builtins::get(idx).ok_or(VmError::UnknownBuiltin(idx))?;
                let result = builtin.call(&self.stack[function_idx + 1..])?;
                self.stack.truncate(function_idx);
                self.push(result)?;
            }
            other => return Err(VmError::NotCallable(other.object_type())),
        }
        Ok(())
    }

    /// Leaves the current frame with `value`. Returning from the program frame ends the program.
    fn execute_return(&mut self, value: Object) -> VmResult<Flow> {
        let Some(previous_stack_frame) = self.previous_stack_frames.pop() else {
            return Ok(Flow::Halt(value));
        };
        let stack_start = self.stack_frame.stack_start;
        self.stack_frame = previous_stack_frame;
        self.stack.truncate(stack_start.saturating_sub(1));
        trace!("Returned to frame {}", self.previous_stack_frames.len());
        self.push(value)?;
        Ok(Flow::Continue)
    }
}

fn operator_name(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        Opcode::Equal => "==",
        Opcode::NotEqual => "!=",
        Opcode::GreaterThan => ">",
        other => other.name(),
    }
}

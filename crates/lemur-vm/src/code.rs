use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
/// A single bytecode operation.
///
/// Each opcode is encoded as one byte followed by its operands. Operand widths are fixed per
/// opcode and every operand is stored big-endian.
pub enum Opcode {
    /// Pushes `constants[operand]`.
    Constant = 0,
    Add,
    Sub,
    Mul,
    Div,
    /// Discards the top of the stack.
    Pop,
    True,
    False,
    Equal,
    NotEqual,
    GreaterThan,
    Minus,
    Bang,
    /// Pops a value and jumps to the absolute offset if it is falsy.
    JumpNotTruthy,
    /// Jumps to the absolute offset.
    Jump,
    Null,
    GetGlobal,
    SetGlobal,
    /// Collects the top `operand` values into an array.
    Array,
    /// Collects the top `operand` values into a hash as alternating keys and values.
    Hash,
    Index,
    /// Calls the value below the top `operand` arguments.
    Call,
    ReturnValue,
    /// Returns null from the current function.
    Return,
    GetLocal,
    SetLocal,
    GetBuiltin,
    /// Creates a closure from a function constant and the top `operand[1]` free values.
    Closure,
    GetFree,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// The name and operand layout of an opcode.
pub struct Definition {
    /// The human readable name of the opcode.
    pub name: &'static str,
    /// The width, in bytes, of each operand.
    pub operand_widths: &'static [usize],
}

impl Definition {
    /// The total width of an instruction with this definition, including the opcode byte.
    pub fn instruction_width(&self) -> usize {
        1 + self.operand_widths.iter().sum::<usize>()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
/// Errors produced while encoding or decoding instructions.
pub enum CodeError {
    #[error("opcode {0} undefined")]
    UndefinedOpcode(u8),
    #[error("{op:?} expects {expected} operands but got {actual}")]
    OperandCount {
        op: Opcode,
        expected: usize,
        actual: usize,
    },
    #[error("operand {operand} does not fit in {width} bytes for {op:?}")]
    OperandOverflow {
        op: Opcode,
        operand: usize,
        width: usize,
    },
    #[error("instruction stream truncated at offset {offset}")]
    Truncated { offset: usize },
}

impl Opcode {
    /// All opcodes, ordered by their byte value.
    pub const ALL: [Opcode; 29] = [
        Opcode::Constant,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Pop,
        Opcode::True,
        Opcode::False,
        Opcode::Equal,
        Opcode::NotEqual,
        Opcode::GreaterThan,
        Opcode::Minus,
        Opcode::Bang,
        Opcode::JumpNotTruthy,
        Opcode::Jump,
        Opcode::Null,
        Opcode::GetGlobal,
        Opcode::SetGlobal,
        Opcode::Array,
        Opcode::Hash,
        Opcode::Index,
        Opcode::Call,
        Opcode::ReturnValue,
        Opcode::Return,
        Opcode::GetLocal,
        Opcode::SetLocal,
        Opcode::GetBuiltin,
        Opcode::Closure,
        Opcode::GetFree,
    ];

    /// Returns the definition of the opcode.
    pub fn definition(self) -> Definition {
        let (name, operand_widths): (&'static str, &'static [usize]) = match self {
            Opcode::Constant => ("OpConstant", &[2]),
            Opcode::Add => ("OpAdd", &[]),
            Opcode::Sub => ("OpSub", &[]),
            Opcode::Mul => ("OpMul", &[]),
            Opcode::Div => ("OpDiv", &[]),
            Opcode::Pop => ("OpPop", &[]),
            Opcode::True => ("OpTrue", &[]),
            Opcode::False => ("OpFalse", &[]),
            Opcode::Equal => ("OpEqual", &[]),
            Opcode::NotEqual => ("OpNotEqual", &[]),
            Opcode::GreaterThan => ("OpGreaterThan", &[]),
            Opcode::Minus => ("OpMinus", &[]),
            Opcode::Bang => ("OpBang", &[]),
            Opcode::JumpNotTruthy => ("OpJumpNotTruthy", &[2]),
            Opcode::Jump => ("OpJump", &[2]),
            Opcode::Null => ("OpNull", &[]),
            Opcode::GetGlobal => ("OpGetGlobal", &[2]),
            Opcode::SetGlobal => ("OpSetGlobal", &[2]),
            Opcode::Array => ("OpArray", &[2]),
            Opcode::Hash => ("OpHash", &[2]),
            Opcode::Index => ("OpIndex", &[]),
            Opcode::Call => ("OpCall", &[1]),
            Opcode::ReturnValue => ("OpReturnValue", &[]),
            Opcode::Return => ("OpReturn", &[]),
            Opcode::GetLocal => ("OpGetLocal", &[1]),
            Opcode::SetLocal => ("OpSetLocal", &[1]),
            Opcode::GetBuiltin => ("OpGetBuiltin", &[1]),
            Opcode::Closure => ("OpClosure", &[2, 1]),
            Opcode::GetFree => ("OpGetFree", &[1]),
        };
        Definition {
            name,
            operand_widths,
        }
    }

    /// Decodes an opcode byte.
    pub fn from_byte(byte: u8) -> Result<Opcode, CodeError> {
        Opcode::ALL
            .get(byte as usize)
            .copied()
            .ok_or(CodeError::UndefinedOpcode(byte))
    }

    /// Returns the name of the opcode, for example `OpConstant`.
    pub fn name(self) -> &'static str {
        self.definition().name
    }
}

impl TryFrom<u8> for Opcode {
    type Error = CodeError;

    fn try_from(value: u8) -> Result<Opcode, CodeError> {
        Opcode::from_byte(value)
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> u8 {
        value as u8
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Looks up the definition of a raw opcode byte.
pub fn lookup(byte: u8) -> Result<Definition, CodeError> {
    Opcode::from_byte(byte).map(Opcode::definition)
}

/// Encodes a single instruction.
pub fn make(op: Opcode, operands: &[usize]) -> Result<Vec<u8>, CodeError> {
    let definition = op.definition();
    if operands.len() != definition.operand_widths.len() {
        return Err(CodeError::OperandCount {
            op,
            expected: definition.operand_widths.len(),
            actual: operands.len(),
        });
    }
    let mut instruction = Vec::with_capacity(definition.instruction_width());
    instruction.push(op as u8);
    for (&operand, &width) in operands.iter().zip(definition.operand_widths) {
        if operand >> (8 * width) != 0 {
            return Err(CodeError::OperandOverflow { op, operand, width });
        }
        for byte in (0..width).rev() {
            instruction.push((operand >> (8 * byte)) as u8);
        }
    }
    Ok(instruction)
}

/// Reads a big-endian integer of `width` bytes starting at `offset`.
pub fn read_uint(ins: &[u8], offset: usize, width: usize) -> Result<usize, CodeError> {
    let bytes = ins
        .get(offset..offset + width)
        .ok_or(CodeError::Truncated { offset })?;
    Ok(bytes
        .iter()
        .fold(0usize, |acc, byte| (acc << 8) | *byte as usize))
}

/// Reads a big-endian `u16` starting at `offset`.
pub fn read_u16(ins: &[u8], offset: usize) -> Result<usize, CodeError> {
    read_uint(ins, offset, 2)
}

/// Reads a `u8` at `offset`.
pub fn read_u8(ins: &[u8], offset: usize) -> Result<usize, CodeError> {
    read_uint(ins, offset, 1)
}

/// Decodes the operands that follow an opcode. `ins` starts right after the opcode byte.
///
/// Returns the operands and the number of bytes read.
pub fn read_operands(
    definition: &Definition,
    ins: &[u8],
) -> Result<(Vec<usize>, usize), CodeError> {
    let mut operands = Vec::with_capacity(definition.operand_widths.len());
    let mut offset = 0;
    for &width in definition.operand_widths {
        operands.push(read_uint(ins, offset, width)?);
        offset += width;
    }
    Ok((operands, offset))
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// An instruction decoded from an instruction stream.
pub struct DecodedInstruction {
    /// The byte offset of the opcode.
    pub offset: usize,
    pub op: Opcode,
    pub operands: Vec<usize>,
}

impl DecodedInstruction {
    /// The offset of the instruction that follows this one.
    pub fn next_offset(&self) -> usize {
        self.offset + self.op.definition().instruction_width()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// An encoded instruction stream.
pub struct Instructions(Vec<u8>);

impl Instructions {
    /// Creates an empty instruction stream.
    pub fn new() -> Instructions {
        Instructions(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Appends an encoded instruction and returns its position.
    pub fn push(&mut self, instruction: &[u8]) -> usize {
        let position = self.0.len();
        self.0.extend_from_slice(instruction);
        position
    }

    /// Drops every byte from `len` onwards.
    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    /// Rewrites the operand of the single-operand instruction at `position`. The opcode byte is
    /// left untouched.
    pub fn change_operand(&mut self, position: usize, operand: usize) -> Result<(), CodeError> {
        let byte = *self
            .0
            .get(position)
            .ok_or(CodeError::Truncated { offset: position })?;
        let op = Opcode::from_byte(byte)?;
        let instruction = make(op, &[operand])?;
        let operand_bytes = self
            .0
            .get_mut(position + 1..position + instruction.len())
            .ok_or(CodeError::Truncated { offset: position })?;
        operand_bytes.copy_from_slice(&instruction[1..]);
        Ok(())
    }

    /// Replaces the opcode at `position` with another opcode of the same width.
    pub(crate) fn replace_opcode(&mut self, position: usize, op: Opcode) {
        if let Some(byte) = self.0.get_mut(position) {
            *byte = op as u8;
        }
    }

    /// Decodes the instruction starting at `offset`.
    pub fn decode_at(&self, offset: usize) -> Result<DecodedInstruction, CodeError> {
        let byte = *self.0.get(offset).ok_or(CodeError::Truncated { offset })?;
        let op = Opcode::from_byte(byte)?;
        let definition = op.definition();
        let (operands, _) = read_operands(&definition, &self.0[offset + 1..])
            .map_err(|_| CodeError::Truncated { offset })?;
        Ok(DecodedInstruction {
            offset,
            op,
            operands,
        })
    }

    /// Iterates over the decoded instructions. Iteration stops after the first error.
    pub fn iter(&self) -> InstructionIter<'_> {
        InstructionIter {
            instructions: self,
            offset: 0,
            failed: false,
        }
    }
}

impl From<Vec<u8>> for Instructions {
    fn from(value: Vec<u8>) -> Instructions {
        Instructions(value)
    }
}

impl FromIterator<Vec<u8>> for Instructions {
    fn from_iter<T: IntoIterator<Item = Vec<u8>>>(iter: T) -> Instructions {
        Instructions(iter.into_iter().flatten().collect())
    }
}

/// Iterator over the instructions of an [`Instructions`] stream.
pub struct InstructionIter<'a> {
    instructions: &'a Instructions,
    offset: usize,
    failed: bool,
}

impl Iterator for InstructionIter<'_> {
    type Item = Result<DecodedInstruction, CodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.instructions.len() {
            return None;
        }
        let decoded = self.instructions.decode_at(self.offset);
        match &decoded {
            Ok(instruction) => self.offset = instruction.next_offset(),
            Err(_) => self.failed = true,
        }
        Some(decoded)
    }
}

impl std::fmt::Display for Instructions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for instruction in self.iter() {
            match instruction {
                Ok(instruction) => {
                    write!(f, "{:04} {}", instruction.offset, instruction.op)?;
                    for operand in instruction.operands.iter() {
                        write!(f, " {operand}")?;
                    }
                    writeln!(f)?;
                }
                Err(err) => writeln!(f, "ERROR: {err}")?,
            }
        }
        Ok(())
    }
}

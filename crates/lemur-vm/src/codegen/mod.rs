use std::{collections::HashMap, fmt::Write};

use compact_str::{CompactString, format_compact};
use error::{CodegenError, CodegenResult};
use frame::{Frame, FrameKind};
use runtime::{Routine, Runtime};
use tracing::debug;

use crate::{
    LemurRc,
    code::{DecodedInstruction, Opcode},
    compiler::Bytecode,
    val::Object,
};

pub mod error;
pub mod frame;
pub mod runtime;

/// The size of every value on the native stack and of every heap word.
pub const SLOT_SIZE: usize = 8;

/// Object tags. Every value is a pointer to an object whose first word is its tag.
///
/// The hashable tags are contiguous and ordered the way hash keys sort.
pub const NULL_TAG: usize = 0;
pub const INTEGER_TAG: usize = 1;
pub const BOOLEAN_TAG: usize = 2;
pub const STRING_TAG: usize = 3;
pub const ARRAY_TAG: usize = 4;
pub const HASH_TAG: usize = 5;
pub const CLOSURE_TAG: usize = 6;

/// The assembler symbols the tags are known by.
const TAG_SYMBOLS: [(&str, usize); 7] = [
    ("LEMUR_TAG_NULL", NULL_TAG),
    ("LEMUR_TAG_INTEGER", INTEGER_TAG),
    ("LEMUR_TAG_BOOLEAN", BOOLEAN_TAG),
    ("LEMUR_TAG_STRING", STRING_TAG),
    ("LEMUR_TAG_ARRAY", ARRAY_TAG),
    ("LEMUR_TAG_HASH", HASH_TAG),
    ("LEMUR_TAG_CLOSURE", CLOSURE_TAG),
];

/// The word of a closure record holding its first free value.
const CLOSURE_FREE_START: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
/// Options for native code generation.
pub struct CodegenConfig {
    /// The global symbol of the program frame.
    pub entry_label: CompactString,
    /// The size in bytes of the bump heap backing every object created at run time.
    pub heap_size: usize,
}

impl Default for CodegenConfig {
    fn default() -> CodegenConfig {
        CodegenConfig {
            entry_label: CompactString::const_new("main"),
            heap_size: 1 << 20,
        }
    }
}

/// Generates x86-64 assembly (GNU as, Intel syntax) for `bytecode`.
pub fn generate(bytecode: &Bytecode) -> CodegenResult<String> {
    Generator::new(bytecode).emit()
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// A constant object placed in read only data.
enum Literal {
    Integer(i64),
    String(LemurRc<str>),
}

/// Lowers [`Bytecode`] to x86-64 assembly.
///
/// Every value is one machine word pointing at a tagged object:
///
/// | object  | layout                          | lives in             |
/// |---------|---------------------------------|----------------------|
/// | null    | `[0]`                           | `.rodata`            |
/// | integer | `[1, value]`                    | `.rodata` or heap    |
/// | boolean | `[2, 0 or 1]`                   | `.rodata`            |
/// | string  | `[3, len, bytes..., 0]`         | `.rodata` or heap    |
/// | array   | `[4, len, elements...]`         | heap                 |
/// | hash    | `[5, pairs, k0, v0, ...]`       | heap, sorted by key  |
/// | closure | `[6, code, text, free...]`      | heap or `.data`      |
///
/// Operations the VM type checks call runtime routines that dispatch on the tags and trap with
/// `ud2` wherever the VM fails. The `text` of a closure is the string it displays as.
///
/// All labels come from one counter owned by the generator, so the blocks of a generation unit
/// never collide.
pub struct Generator<'a> {
    bytecode: &'a Bytecode,
    config: CodegenConfig,
    next_label: usize,
    /// Finished frames in first entry order. Slots are reserved on entry.
    blocks: Vec<String>,
    /// Labels of function constants that have been emitted, by constant index.
    functions: HashMap<usize, CompactString>,
    /// Constant objects in first use order.
    literals: Vec<(CompactString, Literal)>,
    literal_labels: HashMap<Literal, usize>,
    runtime: Runtime,
}

impl<'a> Generator<'a> {
    pub fn new(bytecode: &'a Bytecode) -> Generator<'a> {
        Generator::with_config(bytecode, CodegenConfig::default())
    }

    pub fn with_config(bytecode: &'a Bytecode, config: CodegenConfig) -> Generator<'a> {
        Generator {
            bytecode,
            config,
            next_label: 0,
            blocks: Vec::new(),
            functions: HashMap::new(),
            literals: Vec::new(),
            literal_labels: HashMap::new(),
            runtime: Runtime::default(),
        }
    }

    /// Generates the complete assembly file.
    pub fn emit(mut self) -> CodegenResult<String> {
        let bytecode = self.bytecode;
        let program = Frame::new(
            self.config.entry_label.clone(),
            FrameKind::Program {
                binding_count: bytecode.binding_count,
            },
            &bytecode.instructions,
            &mut self.next_label,
        )?;
        self.emit_frame(program)?;

        let mut out = String::new();
        writeln!(out, "    .intel_syntax noprefix")?;
        for (symbol, tag) in TAG_SYMBOLS {
            writeln!(out, "    .set {symbol}, {tag}")?;
        }
        writeln!(out, "    .text")?;
        writeln!(out, "    .globl {}", self.config.entry_label)?;
        for block in self.blocks.iter() {
            out.push_str(block);
        }
        self.runtime.write_text(&mut out)?;

        writeln!(out, "    .section .rodata")?;
        self.runtime.write_rodata(&mut out)?;
        for (label, literal) in self.literals.iter() {
            writeln!(out, "    .balign 8")?;
            writeln!(out, "{label}:")?;
            match literal {
                Literal::Integer(x) => writeln!(out, "    .quad LEMUR_TAG_INTEGER, {x}")?,
                Literal::String(text) => {
                    writeln!(out, "    .quad LEMUR_TAG_STRING, {}", text.len())?;
                    writeln!(out, "    .ascii \"{}\"", escape_ascii(text))?;
                    writeln!(out, "    .byte 0")?;
                }
            }
        }

        writeln!(out, "    .data")?;
        self.runtime.write_data(&mut out)?;

        writeln!(out, "    .bss")?;
        writeln!(out, "    .balign 8")?;
        writeln!(out, "lemur_globals_base:")?;
        writeln!(out, "    .zero {SLOT_SIZE}")?;
        writeln!(out, "lemur_heap_ptr:")?;
        writeln!(out, "    .zero {SLOT_SIZE}")?;
        writeln!(out, "lemur_heap:")?;
        writeln!(out, "    .zero {}", self.config.heap_size)?;
        writeln!(out, "lemur_heap_end:")?;
        writeln!(out, "    .section .note.GNU-stack,\"\",@progbits")?;
        debug!(
            "Generated {} frames and {} literals",
            self.blocks.len(),
            self.literals.len()
        );
        Ok(out)
    }

    /// Emits one frame. Functions created by the frame are emitted, as their own blocks, before
    /// the rest of the frame.
    fn emit_frame(&mut self, mut frame: Frame<'a>) -> CodegenResult<()> {
        let slot = self.blocks.len();
        self.blocks.push(String::new());
        debug!("Entering frame {} in block {slot}", frame.label);
        self.runtime.require(if frame.is_program() {
            Routine::ExitValue
        } else {
            Routine::Trap
        });
        frame.write_prologue()?;
        let instructions = frame.instructions;
        for instruction in instructions.iter() {
            let instruction = instruction?;
            frame.place_label(instruction.offset)?;
            self.lower(&mut frame, &instruction)?;
        }
        frame.place_label(instructions.len())?;
        frame.write_epilogue()?;
        debug!("Leaving frame {}", frame.label);
        self.blocks[slot] = frame.finish();
        Ok(())
    }

    /// Pops the right then the left operand, calls `routine` and pushes its result.
    fn lower_binary(&mut self, frame: &mut Frame<'a>, routine: Routine) -> CodegenResult<()> {
        let label = self.runtime.call(routine);
        frame.ins(format_args!("pop rcx"))?;
        frame.ins(format_args!("pop rax"))?;
        frame.ins(format_args!("call {label}"))?;
        frame.ins(format_args!("push rax"))
    }

    fn lower_unary(&mut self, frame: &mut Frame<'a>, routine: Routine) -> CodegenResult<()> {
        let label = self.runtime.call(routine);
        frame.ins(format_args!("pop rax"))?;
        frame.ins(format_args!("call {label}"))?;
        frame.ins(format_args!("push rax"))
    }

    fn lower(
        &mut self,
        frame: &mut Frame<'a>,
        instruction: &DecodedInstruction,
    ) -> CodegenResult<()> {
        let op = instruction.op;
        let operand = instruction.operands.first().copied().unwrap_or_default();
        match op {
            Opcode::Constant => self.lower_constant(frame, operand)?,
            Opcode::Add => self.lower_binary(frame, Routine::Add)?,
            Opcode::Sub => self.lower_binary(frame, Routine::Sub)?,
            Opcode::Mul => self.lower_binary(frame, Routine::Mul)?,
            Opcode::Div => self.lower_binary(frame, Routine::Div)?,
            Opcode::Equal => self.lower_binary(frame, Routine::Equal)?,
            Opcode::NotEqual => self.lower_binary(frame, Routine::NotEqual)?,
            Opcode::GreaterThan => self.lower_binary(frame, Routine::GreaterThan)?,
            Opcode::Index => self.lower_binary(frame, Routine::Index)?,
            Opcode::Minus => self.lower_unary(frame, Routine::Negate)?,
            Opcode::Bang => self.lower_unary(frame, Routine::Bang)?,
            Opcode::True => self.push_label(frame, "lemur_true")?,
            Opcode::False => self.push_label(frame, "lemur_false")?,
            Opcode::Null => self.push_label(frame, "lemur_null")?,
            Opcode::Pop => frame.write_pop()?,
            Opcode::Jump => {
                let label = frame.jump_label(operand)?.to_owned();
                frame.ins(format_args!("jmp {label}"))?;
            }
            Opcode::JumpNotTruthy => {
                let truthy = self.runtime.call(Routine::Truthy);
                let label = frame.jump_label(operand)?.to_owned();
                frame.ins(format_args!("pop rax"))?;
                frame.ins(format_args!("call {truthy}"))?;
                frame.ins(format_args!("test rax, rax"))?;
                frame.ins(format_args!("je {label}"))?;
            }
            Opcode::GetGlobal => {
                let offset = Frame::slot_offset(operand);
                frame.ins(format_args!("mov rcx, qword ptr [rip + lemur_globals_base]"))?;
                frame.ins(format_args!("push qword ptr [rcx - {offset}]"))?;
            }
            Opcode::SetGlobal => {
                let offset = Frame::slot_offset(operand);
                frame.ins(format_args!("mov rcx, qword ptr [rip + lemur_globals_base]"))?;
                frame.ins(format_args!("pop rax"))?;
                frame.ins(format_args!("mov qword ptr [rcx - {offset}], rax"))?;
            }
            Opcode::GetLocal | Opcode::SetLocal if frame.is_program() => {
                return Err(CodegenError::UnsupportedOpcode(op));
            }
            Opcode::GetLocal => {
                let offset = Frame::slot_offset(operand);
                frame.ins(format_args!("push qword ptr [rbp - {offset}]"))?;
            }
            Opcode::SetLocal => {
                let offset = Frame::slot_offset(operand);
                frame.ins(format_args!("pop rax"))?;
                frame.ins(format_args!("mov qword ptr [rbp - {offset}], rax"))?;
            }
            Opcode::GetFree => {
                let closure = frame
                    .closure_offset()
                    .ok_or(CodegenError::UnsupportedOpcode(op))?;
                let offset = (CLOSURE_FREE_START + operand) * SLOT_SIZE;
                frame.ins(format_args!("mov rax, qword ptr [rbp - {closure}]"))?;
                frame.ins(format_args!("push qword ptr [rax + {offset}]"))?;
            }
            Opcode::GetBuiltin => {
                let record = self.runtime.use_builtin(operand)?;
                self.push_label(frame, &record)?;
            }
            Opcode::Array => {
                self.lower_collection(frame, ARRAY_TAG, operand, operand)?;
                frame.ins(format_args!("push rax"))?;
            }
            Opcode::Hash => {
                self.lower_collection(frame, HASH_TAG, operand / 2, operand)?;
                let build = self.runtime.call(Routine::HashBuild);
                frame.ins(format_args!("call {build}"))?;
                frame.ins(format_args!("push rax"))?;
            }
            Opcode::Call => {
                self.runtime.require(Routine::Trap);
                frame.ins(format_args!("mov rax, qword ptr [rsp + {}]", operand * SLOT_SIZE))?;
                frame.ins(format_args!("cmp qword ptr [rax], LEMUR_TAG_CLOSURE"))?;
                frame.ins(format_args!("jne lemur_trap"))?;
                frame.ins(format_args!("mov rdx, {operand}"))?;
                frame.ins(format_args!("call qword ptr [rax + {SLOT_SIZE}]"))?;
                frame.ins(format_args!("add rsp, {}", (operand + 1) * SLOT_SIZE))?;
                frame.ins(format_args!("push rax"))?;
            }
            Opcode::ReturnValue => {
                frame.ins(format_args!("pop rax"))?;
                frame.write_return()?;
            }
            Opcode::Return => {
                frame.ins(format_args!("lea rax, [rip + lemur_null]"))?;
                frame.write_return()?;
            }
            Opcode::Closure => {
                let free_count = instruction.operands.get(1).copied().unwrap_or_default();
                self.lower_closure(frame, operand, free_count)?;
            }
        }
        Ok(())
    }

    fn push_label(&mut self, frame: &mut Frame<'a>, label: &str) -> CodegenResult<()> {
        frame.ins(format_args!("lea rax, [rip + {label}]"))?;
        frame.ins(format_args!("push rax"))
    }

    fn lower_constant(&mut self, frame: &mut Frame<'a>, index: usize) -> CodegenResult<()> {
        let bytecode = self.bytecode;
        let label = match bytecode.constants.get(index) {
            Some(Object::Integer(x)) => self.literal_label(Literal::Integer(*x)),
            Some(Object::String(text)) => self.literal_label(Literal::String(text.clone())),
            Some(Object::Boolean(true)) => "lemur_true".into(),
            Some(Object::Boolean(false)) => "lemur_false".into(),
            Some(Object::Null) => "lemur_null".into(),
            Some(other) => {
                return Err(CodegenError::MalformedConstant {
                    index,
                    reason: format_compact!("{} can not be pushed directly", other.object_type()),
                });
            }
            None => {
                return Err(CodegenError::MalformedConstant {
                    index,
                    reason: "missing".into(),
                });
            }
        };
        self.push_label(frame, &label)
    }

    /// Reserves `words` heap words and leaves their address in `rax`.
    fn allocate(&mut self, frame: &mut Frame<'a>, words: usize) -> CodegenResult<()> {
        let alloc = self.runtime.call(Routine::Alloc);
        frame.ins(format_args!("mov edi, {}", words * SLOT_SIZE))?;
        frame.ins(format_args!("call {alloc}"))
    }

    /// Moves the top `element_count` stack values into a new heap object of the form
    /// `[tag, len, elements...]` and leaves its address in `rax`.
    fn lower_collection(
        &mut self,
        frame: &mut Frame<'a>,
        tag: usize,
        len: usize,
        element_count: usize,
    ) -> CodegenResult<()> {
        self.allocate(frame, element_count + 2)?;
        frame.ins(format_args!("mov qword ptr [rax], {tag}"))?;
        frame.ins(format_args!("mov qword ptr [rax + {SLOT_SIZE}], {len}"))?;
        self.move_stack_into_heap(frame, element_count, 2)
    }

    /// Copies the top `count` stack values, deepest first, into the object at `rax` starting at
    /// word `first_word`, then drops them from the stack.
    fn move_stack_into_heap(
        &mut self,
        frame: &mut Frame<'a>,
        count: usize,
        first_word: usize,
    ) -> CodegenResult<()> {
        for idx in 0..count {
            let from = (count - 1 - idx) * SLOT_SIZE;
            let to = (first_word + idx) * SLOT_SIZE;
            frame.ins(format_args!("mov rcx, qword ptr [rsp + {from}]"))?;
            frame.ins(format_args!("mov qword ptr [rax + {to}], rcx"))?;
        }
        if count > 0 {
            frame.ins(format_args!("add rsp, {}", count * SLOT_SIZE))?;
        }
        Ok(())
    }

    fn lower_closure(
        &mut self,
        frame: &mut Frame<'a>,
        index: usize,
        free_count: usize,
    ) -> CodegenResult<()> {
        let (label, num_parameters) = self.function_label(index)?;
        let text = format!("<closure/{num_parameters} free={free_count}>");
        let text = self.literal_label(Literal::String(LemurRc::from(text.as_str())));
        self.allocate(frame, CLOSURE_FREE_START + free_count)?;
        frame.ins(format_args!("mov qword ptr [rax], {CLOSURE_TAG}"))?;
        frame.ins(format_args!("lea rcx, [rip + {label}]"))?;
        frame.ins(format_args!("mov qword ptr [rax + {SLOT_SIZE}], rcx"))?;
        frame.ins(format_args!("lea rcx, [rip + {text}]"))?;
        frame.ins(format_args!("mov qword ptr [rax + {}], rcx", 2 * SLOT_SIZE))?;
        self.move_stack_into_heap(frame, free_count, CLOSURE_FREE_START)?;
        frame.ins(format_args!("push rax"))
    }

    /// Returns the label and parameter count of the function constant at `index`, emitting the
    /// function first if this is its first use.
    fn function_label(&mut self, index: usize) -> CodegenResult<(CompactString, usize)> {
        let bytecode = self.bytecode;
        let function = match bytecode.constants.get(index) {
            Some(Object::CompiledFunction(function)) => function,
            Some(other) => {
                return Err(CodegenError::MalformedConstant {
                    index,
                    reason: format_compact!("expected a function, found {}", other.object_type()),
                });
            }
            None => {
                return Err(CodegenError::MalformedConstant {
                    index,
                    reason: "missing".into(),
                });
            }
        };
        if let Some(label) = self.functions.get(&index) {
            return Ok((label.clone(), function.num_parameters));
        }
        let label = format_compact!("lemur_fn_{}", self.next_label);
        self.next_label += 1;
        self.functions.insert(index, label.clone());
        let callee = Frame::new(
            label.clone(),
            FrameKind::Function {
                num_locals: function.num_locals,
                num_parameters: function.num_parameters,
            },
            &function.instructions,
            &mut self.next_label,
        )?;
        self.emit_frame(callee)?;
        Ok((label, function.num_parameters))
    }

    /// Returns the label of `literal`, sharing one object between equal literals.
    fn literal_label(&mut self, literal: Literal) -> CompactString {
        if let Some(&idx) = self.literal_labels.get(&literal) {
            return self.literals[idx].0.clone();
        }
        let prefix = match literal {
            Literal::Integer(_) => "lemur_int",
            Literal::String(_) => "lemur_str",
        };
        let label = format_compact!("{prefix}_{}", self.next_label);
        self.next_label += 1;
        self.literal_labels.insert(literal.clone(), self.literals.len());
        self.literals.push((label.clone(), literal));
        label
    }
}

/// Escapes `text` for a GNU as `.ascii` directive.
fn escape_ascii(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'"' => escaped.push_str("\\\""),
            b'\\' => escaped.push_str("\\\\"),
            0x20..=0x7e => escaped.push(byte as char),
            _ => escaped.push_str(&format!("\\{byte:03o}")),
        }
    }
    escaped
}

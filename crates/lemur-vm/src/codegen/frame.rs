use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Write,
};

use compact_str::{CompactString, format_compact};

use crate::code::{Instructions, Opcode};

use super::{
    SLOT_SIZE,
    error::{CodegenError, CodegenResult},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// The stack layout of a frame.
pub enum FrameKind {
    /// The program entry. Globals and the result slot sit right below the base pointer.
    Program { binding_count: usize },
    /// A compiled function. Locals sit right below the base pointer, parameters first, followed
    /// by the closure record of the running function. The caller passes the argument count in
    /// `rdx`; a mismatch traps.
    Function {
        num_locals: usize,
        num_parameters: usize,
    },
}

/// One labeled block of assembly under construction.
pub struct Frame<'a> {
    pub label: CompactString,
    pub kind: FrameKind,
    pub instructions: &'a Instructions,
    jump_labels: BTreeMap<usize, CompactString>,
    out: String,
}

impl<'a> Frame<'a> {
    /// Creates a frame and allocates a label for every jump target in `instructions`.
    pub fn new(
        label: CompactString,
        kind: FrameKind,
        instructions: &'a Instructions,
        next_label: &mut usize,
    ) -> CodegenResult<Frame<'a>> {
        let mut boundaries = BTreeSet::new();
        let mut targets = Vec::new();
        for instruction in instructions.iter() {
            let instruction = instruction?;
            boundaries.insert(instruction.offset);
            if matches!(instruction.op, Opcode::Jump | Opcode::JumpNotTruthy) {
                targets.extend(instruction.operands.first().copied());
            }
        }
        let mut jump_labels = BTreeMap::new();
        for target in targets {
            if target != instructions.len() && !boundaries.contains(&target) {
                return Err(CodegenError::InvalidJumpTarget { offset: target });
            }
            jump_labels.entry(target).or_insert_with(|| {
                let label = format_compact!(".L{next_label}");
                *next_label += 1;
                label
            });
        }
        Ok(Frame {
            label,
            kind,
            instructions,
            jump_labels,
            out: String::new(),
        })
    }

    /// The label of the jump target at `offset`.
    pub fn jump_label(&self, offset: usize) -> CodegenResult<&str> {
        self.jump_labels
            .get(&offset)
            .map(CompactString::as_str)
            .ok_or(CodegenError::InvalidJumpTarget { offset })
    }

    /// Places the jump label for `offset`, if any instruction jumps there.
    pub fn place_label(&mut self, offset: usize) -> CodegenResult<()> {
        if let Some(label) = self.jump_labels.get(&offset) {
            writeln!(self.out, "{label}:")?;
        }
        Ok(())
    }

    /// Writes one indented instruction.
    pub fn ins(&mut self, line: std::fmt::Arguments) -> CodegenResult<()> {
        self.out.write_str("    ")?;
        self.out.write_fmt(line)?;
        self.out.write_char('\n')?;
        Ok(())
    }

    pub fn is_program(&self) -> bool {
        matches!(self.kind, FrameKind::Program { .. })
    }

    /// The distance below the base pointer of local slot `idx`. Globals use the same layout in
    /// the program frame.
    pub fn slot_offset(idx: usize) -> usize {
        (idx + 1) * SLOT_SIZE
    }

    /// The distance below the base pointer of the slot holding the program result.
    fn result_offset(binding_count: usize) -> usize {
        Frame::slot_offset(binding_count)
    }

    /// The distance below the base pointer of the slot holding the running closure record.
    pub fn closure_offset(&self) -> Option<usize> {
        match self.kind {
            FrameKind::Program { .. } => None,
            FrameKind::Function { num_locals, .. } => Some(Frame::slot_offset(num_locals)),
        }
    }

    /// Writes the label and the code that sets up the frame. Globals, the program result and
    /// locals start out as null.
    pub fn write_prologue(&mut self) -> CodegenResult<()> {
        writeln!(self.out, "{}:", self.label)?;
        self.ins(format_args!("push rbp"))?;
        self.ins(format_args!("mov rbp, rsp"))?;
        match self.kind {
            FrameKind::Program { binding_count } => {
                let result = Frame::result_offset(binding_count);
                self.ins(format_args!("mov qword ptr [rip + lemur_globals_base], rbp"))?;
                self.ins(format_args!("sub rsp, {result}"))?;
                self.ins(format_args!("lea rax, [rip + lemur_null]"))?;
                for idx in 0..=binding_count {
                    let offset = Frame::slot_offset(idx);
                    self.ins(format_args!("mov qword ptr [rbp - {offset}], rax"))?;
                }
                self.ins(format_args!("lea rax, [rip + lemur_heap]"))?;
                self.ins(format_args!("mov qword ptr [rip + lemur_heap_ptr], rax"))?;
            }
            FrameKind::Function {
                num_locals,
                num_parameters,
            } => {
                self.ins(format_args!("cmp rdx, {num_parameters}"))?;
                self.ins(format_args!("jne lemur_trap"))?;
                // Arguments sit above the return address with the last one closest. Copy them
                // into the parameter slots in order.
                for idx in 0..num_parameters {
                    let offset = 2 * SLOT_SIZE + (num_parameters - 1 - idx) * SLOT_SIZE;
                    self.ins(format_args!("push qword ptr [rbp + {offset}]"))?;
                }
                let extra_locals = num_locals.saturating_sub(num_parameters);
                if extra_locals > 0 {
                    self.ins(format_args!("lea rcx, [rip + lemur_null]"))?;
                    for _ in 0..extra_locals {
                        self.ins(format_args!("push rcx"))?;
                    }
                }
                // The caller leaves the callee's closure record in rax.
                self.ins(format_args!("push rax"))?;
            }
        }
        Ok(())
    }

    /// Writes a return of the value in `rax`. The program frame exits with the value's exit
    /// status.
    pub fn write_return(&mut self) -> CodegenResult<()> {
        if self.is_program() {
            self.ins(format_args!("call lemur_exit_value"))?;
        }
        self.ins(format_args!("mov rsp, rbp"))?;
        self.ins(format_args!("pop rbp"))?;
        self.ins(format_args!("ret"))
    }

    /// Writes the code that runs when control reaches the end of the frame.
    pub fn write_epilogue(&mut self) -> CodegenResult<()> {
        match self.kind {
            FrameKind::Program { binding_count } => {
                let result = Frame::result_offset(binding_count);
                self.ins(format_args!("mov rax, qword ptr [rbp - {result}]"))?;
            }
            FrameKind::Function { .. } => self.ins(format_args!("lea rax, [rip + lemur_null]"))?,
        }
        self.write_return()
    }

    /// Writes a discard of the top of the stack. The program frame keeps the value as its result.
    pub fn write_pop(&mut self) -> CodegenResult<()> {
        match self.kind {
            FrameKind::Program { binding_count } => {
                let result = Frame::result_offset(binding_count);
                self.ins(format_args!("pop rax"))?;
                self.ins(format_args!("mov qword ptr [rbp - {result}], rax"))
            }
            FrameKind::Function { .. } => self.ins(format_args!("add rsp, {SLOT_SIZE}")),
        }
    }

    /// Returns the finished assembly.
    pub fn finish(self) -> String {
        self.out
    }
}

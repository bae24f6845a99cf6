use std::{collections::BTreeSet, fmt::Write};

use tracing::debug;

use crate::builtins;

use super::error::{CodegenError, CodegenResult};

/// Runtime support routines called from generated code.
///
/// Routines take their operands in `rax` and `rcx` and return their result in `rax`. They may
/// clobber every other caller saved register. Any operand the VM would reject ends in
/// `lemur_trap`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Routine {
    Trap,
    /// Reserves `rdi` bytes of heap.
    Alloc,
    /// Boxes the raw integer in `rax`.
    BoxInteger,
    /// Turns the raw 0 or 1 in `rax` into a boolean object.
    Boolean,
    /// Writes `rdx` bytes at `rsi` to stdout.
    Write,
    /// Writes the value in `rax` to stdout the way the VM displays it.
    Display,
    /// Turns the program result in `rax` into the exit status.
    ExitValue,
    /// Leaves 1 in `rax` if the value in `rax` is truthy and 0 otherwise.
    Truthy,
    Bang,
    Add,
    Sub,
    Mul,
    Div,
    Negate,
    /// Leaves 1 in `rax` if the values in `rax` and `rcx` are equal and 0 otherwise.
    Equality,
    Equal,
    NotEqual,
    GreaterThan,
    /// Orders the hash keys in `rsi` and `rdi`, leaving -1, 0 or 1 in `rax`.
    KeyCompare,
    /// Sorts the pairs of the hash in `rax` by key and drops all but the last of equal keys.
    HashBuild,
    Index,
}

impl Routine {
    /// The symbol generated code calls.
    pub fn label(self) -> &'static str {
        match self {
            Routine::Trap => "lemur_trap",
            Routine::Alloc => "lemur_alloc",
            Routine::BoxInteger => "lemur_box_integer",
            Routine::Boolean => "lemur_boolean",
            Routine::Write => "lemur_write",
            Routine::Display => "lemur_display",
            Routine::ExitValue => "lemur_exit_value",
            Routine::Truthy => "lemur_truthy",
            Routine::Bang => "lemur_bang",
            Routine::Add => "lemur_add",
            Routine::Sub => "lemur_sub",
            Routine::Mul => "lemur_mul",
            Routine::Div => "lemur_div",
            Routine::Negate => "lemur_negate",
            Routine::Equality => "lemur_equality",
            Routine::Equal => "lemur_equal",
            Routine::NotEqual => "lemur_not_equal",
            Routine::GreaterThan => "lemur_greater_than",
            Routine::KeyCompare => "lemur_key_compare",
            Routine::HashBuild => "lemur_hash_build",
            Routine::Index => "lemur_index",
        }
    }

    fn dependencies(self) -> &'static [Routine] {
        match self {
            Routine::Trap | Routine::ExitValue | Routine::Boolean | Routine::KeyCompare => &[],
            Routine::Alloc | Routine::Write => &[Routine::Trap],
            Routine::BoxInteger => &[Routine::Alloc],
            Routine::Display => &[Routine::Write],
            Routine::Truthy => &[],
            Routine::Bang => &[Routine::Truthy, Routine::Boolean],
            Routine::Add => &[Routine::Trap, Routine::Alloc, Routine::BoxInteger],
            Routine::Sub | Routine::Mul | Routine::Div | Routine::Negate => {
                &[Routine::Trap, Routine::BoxInteger]
            }
            Routine::Equality => &[Routine::Trap, Routine::KeyCompare],
            Routine::Equal | Routine::NotEqual => &[Routine::Equality, Routine::Boolean],
            Routine::GreaterThan => &[Routine::Trap, Routine::Boolean],
            Routine::HashBuild | Routine::Index => &[Routine::Trap, Routine::KeyCompare],
        }
    }

    fn body(self) -> &'static str {
        match self {
            Routine::Trap => TRAP,
            Routine::Alloc => ALLOC,
            Routine::BoxInteger => BOX_INTEGER,
            Routine::Boolean => BOOLEAN,
            Routine::Write => WRITE,
            Routine::Display => DISPLAY,
            Routine::ExitValue => EXIT_VALUE,
            Routine::Truthy => TRUTHY,
            Routine::Bang => BANG,
            Routine::Add => ADD,
            Routine::Sub => SUB,
            Routine::Mul => MUL,
            Routine::Div => DIV,
            Routine::Negate => NEGATE,
            Routine::Equality => EQUALITY,
            Routine::Equal => EQUAL,
            Routine::NotEqual => NOT_EQUAL,
            Routine::GreaterThan => GREATER_THAN,
            Routine::KeyCompare => KEY_COMPARE,
            Routine::HashBuild => HASH_BUILD,
            Routine::Index => INDEX,
        }
    }
}

/// The routines a builtin body calls.
fn builtin_dependencies(name: &str) -> &'static [Routine] {
    match name {
        "len" => &[Routine::Trap, Routine::BoxInteger],
        "puts" => &[Routine::Display, Routine::Write],
        "rest" | "push" => &[Routine::Trap, Routine::Alloc],
        _ => &[Routine::Trap],
    }
}

fn builtin_body(name: &str) -> Option<&'static str> {
    match name {
        "len" => Some(LEN),
        "puts" => Some(PUTS),
        "first" => Some(FIRST),
        "last" => Some(LAST),
        "rest" => Some(REST),
        "push" => Some(PUSH),
        _ => None,
    }
}

/// The runtime support linked into one generation unit.
///
/// Routines and builtins are written out only if generated code references them.
#[derive(Debug, Default)]
pub struct Runtime {
    routines: BTreeSet<Routine>,
    builtins: BTreeSet<usize>,
}

impl Runtime {
    /// Marks `routine` and everything it calls as referenced.
    pub fn require(&mut self, routine: Routine) {
        if self.routines.insert(routine) {
            for &dependency in routine.dependencies() {
                self.require(dependency);
            }
        }
    }

    /// Marks `routine` as referenced and returns its label.
    pub fn call(&mut self, routine: Routine) -> &'static str {
        self.require(routine);
        routine.label()
    }

    pub fn uses(&self, routine: Routine) -> bool {
        self.routines.contains(&routine)
    }

    /// Marks the builtin at `index` as referenced and returns its closure record label.
    pub fn use_builtin(&mut self, index: usize) -> CodegenResult<String> {
        let builtin = builtins::get(index).ok_or(CodegenError::UnknownBuiltin(index))?;
        if builtin_body(builtin.name).is_none() {
            return Err(CodegenError::UnknownBuiltin(index));
        }
        if self.builtins.insert(index) {
            debug!("Linking builtin {}", builtin.name);
            for &routine in builtin_dependencies(builtin.name) {
                self.require(routine);
            }
        }
        Ok(format!("lemur_builtin_{}_closure", builtin.name))
    }

    fn linked_builtins(&self) -> impl Iterator<Item = CodegenResult<(usize, &'static str)>> + '_ {
        self.builtins.iter().map(|&idx| {
            builtins::get(idx)
                .map(|builtin| (idx, builtin.name))
                .ok_or(CodegenError::UnknownBuiltin(idx))
        })
    }

    /// Writes the referenced routines and builtin bodies into the text section.
    pub fn write_text(&self, out: &mut String) -> CodegenResult<()> {
        for routine in self.routines.iter() {
            out.push_str(routine.body());
        }
        for builtin in self.linked_builtins() {
            let (idx, name) = builtin?;
            let body = builtin_body(name).ok_or(CodegenError::UnknownBuiltin(idx))?;
            writeln!(out, "lemur_builtin_{name}:")?;
            out.push_str(body);
        }
        Ok(())
    }

    /// Writes the constant objects and text the runtime refers to.
    pub fn write_rodata(&self, out: &mut String) -> CodegenResult<()> {
        out.push_str(CONSTANT_OBJECTS);
        if self.uses(Routine::Display) {
            out.push_str(DISPLAY_TEXT);
        }
        for builtin in self.linked_builtins() {
            let (_, name) = builtin?;
            let text = format!("<builtin-{name}>");
            writeln!(out, "    .balign 8")?;
            writeln!(out, "lemur_builtin_{name}_text:")?;
            writeln!(out, "    .quad LEMUR_TAG_STRING, {}", text.len())?;
            writeln!(out, "    .ascii \"{text}\"")?;
            writeln!(out, "    .byte 0")?;
        }
        Ok(())
    }

    /// Writes a closure record for each referenced builtin.
    pub fn write_data(&self, out: &mut String) -> CodegenResult<()> {
        for builtin in self.linked_builtins() {
            let (_, name) = builtin?;
            writeln!(out, "    .balign 8")?;
            writeln!(out, "lemur_builtin_{name}_closure:")?;
            writeln!(
                out,
                "    .quad LEMUR_TAG_CLOSURE, lemur_builtin_{name}, lemur_builtin_{name}_text"
            )?;
        }
        Ok(())
    }
}

const CONSTANT_OBJECTS: &str = "    .balign 8
lemur_null:
    .quad LEMUR_TAG_NULL, 0
lemur_false:
    .quad LEMUR_TAG_BOOLEAN, 0
lemur_true:
    .quad LEMUR_TAG_BOOLEAN, 1
";

const DISPLAY_TEXT: &str = "lemur_text_null:
    .ascii \"null\"
lemur_text_true:
    .ascii \"true\"
lemur_text_false:
    .ascii \"false\"
lemur_text_open_bracket:
    .ascii \"[\"
lemur_text_close_bracket:
    .ascii \"]\"
lemur_text_open_brace:
    .ascii \"{\"
lemur_text_close_brace:
    .ascii \"}\"
lemur_text_comma:
    .ascii \", \"
lemur_text_colon:
    .ascii \": \"
lemur_text_newline:
    .ascii \"\\n\"
";

const TRAP: &str = "lemur_trap:
    ud2
";

const ALLOC: &str = "lemur_alloc:
    mov rax, qword ptr [rip + lemur_heap_ptr]
    lea r11, [rax + rdi]
    lea rdx, [rip + lemur_heap_end]
    cmp r11, rdx
    ja lemur_trap
    mov qword ptr [rip + lemur_heap_ptr], r11
    ret
";

const BOX_INTEGER: &str = "lemur_box_integer:
    mov rsi, rax
    mov edi, 16
    call lemur_alloc
    mov qword ptr [rax], LEMUR_TAG_INTEGER
    mov qword ptr [rax + 8], rsi
    ret
";

const BOOLEAN: &str = "lemur_boolean:
    test rax, rax
    lea rax, [rip + lemur_false]
    jz .Llemur_boolean_done
    lea rax, [rip + lemur_true]
.Llemur_boolean_done:
    ret
";

/// A failed write traps, as the VM fails the program on output errors.
const WRITE: &str = "lemur_write:
    test rdx, rdx
    jz .Llemur_write_done
    mov edi, 1
    mov eax, 1
    syscall
    test rax, rax
    jle lemur_trap
    add rsi, rax
    sub rdx, rax
    jmp lemur_write
.Llemur_write_done:
    ret
";

const DISPLAY: &str = "lemur_display:
    mov rcx, qword ptr [rax]
    cmp rcx, LEMUR_TAG_INTEGER
    je .Llemur_display_integer
    cmp rcx, LEMUR_TAG_BOOLEAN
    je .Llemur_display_boolean
    cmp rcx, LEMUR_TAG_STRING
    je .Llemur_display_string
    cmp rcx, LEMUR_TAG_ARRAY
    je .Llemur_display_array
    cmp rcx, LEMUR_TAG_HASH
    je .Llemur_display_hash
    cmp rcx, LEMUR_TAG_CLOSURE
    je .Llemur_display_closure
    lea rsi, [rip + lemur_text_null]
    mov edx, 4
    jmp lemur_write
.Llemur_display_boolean:
    cmp qword ptr [rax + 8], 0
    je .Llemur_display_false
    lea rsi, [rip + lemur_text_true]
    mov edx, 4
    jmp lemur_write
.Llemur_display_false:
    lea rsi, [rip + lemur_text_false]
    mov edx, 5
    jmp lemur_write
.Llemur_display_closure:
    mov rax, qword ptr [rax + 16]
.Llemur_display_string:
    mov rdx, qword ptr [rax + 8]
    lea rsi, [rax + 16]
    jmp lemur_write
.Llemur_display_integer:
    mov rax, qword ptr [rax + 8]
    mov r8, rax
    sub rsp, 32
    lea rsi, [rsp + 32]
    test rax, rax
    jns .Llemur_display_digits
    neg rax
.Llemur_display_digits:
    mov ecx, 10
.Llemur_display_digit:
    xor edx, edx
    div rcx
    add dl, 48
    dec rsi
    mov byte ptr [rsi], dl
    test rax, rax
    jnz .Llemur_display_digit
    test r8, r8
    jns .Llemur_display_number
    dec rsi
    mov byte ptr [rsi], 45
.Llemur_display_number:
    lea rdx, [rsp + 32]
    sub rdx, rsi
    call lemur_write
    add rsp, 32
    ret
.Llemur_display_array:
    push rax
    push 0
    lea rsi, [rip + lemur_text_open_bracket]
    mov edx, 1
    call lemur_write
.Llemur_display_array_next:
    mov rax, qword ptr [rsp + 8]
    mov rcx, qword ptr [rsp]
    cmp rcx, qword ptr [rax + 8]
    jae .Llemur_display_array_done
    test rcx, rcx
    jz .Llemur_display_array_element
    lea rsi, [rip + lemur_text_comma]
    mov edx, 2
    call lemur_write
    mov rax, qword ptr [rsp + 8]
    mov rcx, qword ptr [rsp]
.Llemur_display_array_element:
    mov rax, qword ptr [rax + rcx*8 + 16]
    call lemur_display
    inc qword ptr [rsp]
    jmp .Llemur_display_array_next
.Llemur_display_array_done:
    add rsp, 16
    lea rsi, [rip + lemur_text_close_bracket]
    mov edx, 1
    jmp lemur_write
.Llemur_display_hash:
    push rax
    push 0
    lea rsi, [rip + lemur_text_open_brace]
    mov edx, 1
    call lemur_write
.Llemur_display_hash_next:
    mov rax, qword ptr [rsp + 8]
    mov rcx, qword ptr [rsp]
    cmp rcx, qword ptr [rax + 8]
    jae .Llemur_display_hash_done
    test rcx, rcx
    jz .Llemur_display_hash_pair
    lea rsi, [rip + lemur_text_comma]
    mov edx, 2
    call lemur_write
    mov rax, qword ptr [rsp + 8]
    mov rcx, qword ptr [rsp]
.Llemur_display_hash_pair:
    shl rcx, 4
    mov rax, qword ptr [rax + rcx + 16]
    call lemur_display
    lea rsi, [rip + lemur_text_colon]
    mov edx, 2
    call lemur_write
    mov rax, qword ptr [rsp + 8]
    mov rcx, qword ptr [rsp]
    shl rcx, 4
    mov rax, qword ptr [rax + rcx + 24]
    call lemur_display
    inc qword ptr [rsp]
    jmp .Llemur_display_hash_next
.Llemur_display_hash_done:
    add rsp, 16
    lea rsi, [rip + lemur_text_close_brace]
    mov edx, 1
    jmp lemur_write
";

/// Integers and booleans exit with their value, everything else with 0.
const EXIT_VALUE: &str = "lemur_exit_value:
    mov rcx, qword ptr [rax]
    cmp rcx, LEMUR_TAG_INTEGER
    je .Llemur_exit_value_word
    cmp rcx, LEMUR_TAG_BOOLEAN
    je .Llemur_exit_value_word
    xor eax, eax
    ret
.Llemur_exit_value_word:
    mov rax, qword ptr [rax + 8]
    ret
";

/// `false`, `null` and `0` are falsy.
const TRUTHY: &str = "lemur_truthy:
    mov rcx, qword ptr [rax]
    cmp rcx, LEMUR_TAG_NULL
    je .Llemur_truthy_false
    cmp rcx, LEMUR_TAG_INTEGER
    je .Llemur_truthy_word
    cmp rcx, LEMUR_TAG_BOOLEAN
    je .Llemur_truthy_word
    mov eax, 1
    ret
.Llemur_truthy_word:
    cmp qword ptr [rax + 8], 0
    setne al
    movzx eax, al
    ret
.Llemur_truthy_false:
    xor eax, eax
    ret
";

const BANG: &str = "lemur_bang:
    call lemur_truthy
    xor eax, 1
    jmp lemur_boolean
";

/// Adds two integers or concatenates two strings into a new heap string.
const ADD: &str = "lemur_add:
    mov rdx, qword ptr [rax]
    cmp rdx, qword ptr [rcx]
    jne lemur_trap
    cmp rdx, LEMUR_TAG_STRING
    je .Llemur_add_strings
    cmp rdx, LEMUR_TAG_INTEGER
    jne lemur_trap
    mov rax, qword ptr [rax + 8]
    add rax, qword ptr [rcx + 8]
    jmp lemur_box_integer
.Llemur_add_strings:
    mov r8, rax
    mov r9, rcx
    mov r10, qword ptr [r8 + 8]
    add r10, qword ptr [r9 + 8]
    lea rdi, [r10 + 24]
    and rdi, -8
    call lemur_alloc
    mov qword ptr [rax], LEMUR_TAG_STRING
    mov qword ptr [rax + 8], r10
    lea rdi, [rax + 16]
    lea rsi, [r8 + 16]
    mov rcx, qword ptr [r8 + 8]
    rep movsb
    lea rsi, [r9 + 16]
    mov rcx, qword ptr [r9 + 8]
    rep movsb
    mov byte ptr [rdi], 0
    ret
";

const SUB: &str = "lemur_sub:
    cmp qword ptr [rax], LEMUR_TAG_INTEGER
    jne lemur_trap
    cmp qword ptr [rcx], LEMUR_TAG_INTEGER
    jne lemur_trap
    mov rax, qword ptr [rax + 8]
    sub rax, qword ptr [rcx + 8]
    jmp lemur_box_integer
";

const MUL: &str = "lemur_mul:
    cmp qword ptr [rax], LEMUR_TAG_INTEGER
    jne lemur_trap
    cmp qword ptr [rcx], LEMUR_TAG_INTEGER
    jne lemur_trap
    mov rax, qword ptr [rax + 8]
    imul rax, qword ptr [rcx + 8]
    jmp lemur_box_integer
";

/// Division by zero traps. Dividing by -1 negates, so the most negative integer wraps.
const DIV: &str = "lemur_div:
    cmp qword ptr [rax], LEMUR_TAG_INTEGER
    jne lemur_trap
    cmp qword ptr [rcx], LEMUR_TAG_INTEGER
    jne lemur_trap
    mov rax, qword ptr [rax + 8]
    mov rcx, qword ptr [rcx + 8]
    test rcx, rcx
    jz lemur_trap
    cmp rcx, -1
    jne .Llemur_div_signed
    neg rax
    jmp lemur_box_integer
.Llemur_div_signed:
    cqo
    idiv rcx
    jmp lemur_box_integer
";

const NEGATE: &str = "lemur_negate:
    cmp qword ptr [rax], LEMUR_TAG_INTEGER
    jne lemur_trap
    mov rax, qword ptr [rax + 8]
    neg rax
    jmp lemur_box_integer
";

/// Integers, booleans and strings compare by value and null equals null. Other pairs trap.
const EQUALITY: &str = "lemur_equality:
    mov rdx, qword ptr [rax]
    cmp rdx, qword ptr [rcx]
    jne lemur_trap
    cmp rdx, LEMUR_TAG_NULL
    je .Llemur_equality_true
    cmp rdx, LEMUR_TAG_STRING
    je .Llemur_equality_strings
    cmp rdx, LEMUR_TAG_INTEGER
    je .Llemur_equality_words
    cmp rdx, LEMUR_TAG_BOOLEAN
    jne lemur_trap
.Llemur_equality_words:
    mov rdx, qword ptr [rax + 8]
    cmp rdx, qword ptr [rcx + 8]
    sete al
    movzx eax, al
    ret
.Llemur_equality_strings:
    mov rsi, rax
    mov rdi, rcx
    call lemur_key_compare
    test rax, rax
    sete al
    movzx eax, al
    ret
.Llemur_equality_true:
    mov eax, 1
    ret
";

const EQUAL: &str = "lemur_equal:
    call lemur_equality
    jmp lemur_boolean
";

const NOT_EQUAL: &str = "lemur_not_equal:
    call lemur_equality
    xor eax, 1
    jmp lemur_boolean
";

const GREATER_THAN: &str = "lemur_greater_than:
    cmp qword ptr [rax], LEMUR_TAG_INTEGER
    jne lemur_trap
    cmp qword ptr [rcx], LEMUR_TAG_INTEGER
    jne lemur_trap
    mov rdx, qword ptr [rax + 8]
    cmp rdx, qword ptr [rcx + 8]
    setg al
    movzx eax, al
    jmp lemur_boolean
";

/// Keys order by tag first, then integers and booleans by value and strings by their bytes.
/// Leaves `rsi` and `rdi` untouched.
const KEY_COMPARE: &str = "lemur_key_compare:
    mov rcx, qword ptr [rsi]
    mov rdx, qword ptr [rdi]
    cmp rcx, rdx
    jne .Llemur_key_compare_ordered
    cmp rcx, LEMUR_TAG_STRING
    je .Llemur_key_compare_strings
    mov rcx, qword ptr [rsi + 8]
    cmp rcx, qword ptr [rdi + 8]
.Llemur_key_compare_ordered:
    jl .Llemur_key_compare_less
    jg .Llemur_key_compare_greater
    xor eax, eax
    ret
.Llemur_key_compare_less:
    mov rax, -1
    ret
.Llemur_key_compare_greater:
    mov eax, 1
    ret
.Llemur_key_compare_strings:
    mov r8, qword ptr [rsi + 8]
    mov r9, qword ptr [rdi + 8]
    mov r10, r8
    cmp r10, r9
    cmova r10, r9
    xor r11d, r11d
.Llemur_key_compare_byte:
    cmp r11, r10
    je .Llemur_key_compare_lengths
    movzx ecx, byte ptr [rsi + r11 + 16]
    movzx edx, byte ptr [rdi + r11 + 16]
    inc r11
    cmp ecx, edx
    je .Llemur_key_compare_byte
    jmp .Llemur_key_compare_ordered
.Llemur_key_compare_lengths:
    cmp r8, r9
    jmp .Llemur_key_compare_ordered
";

/// Inserts each pair in turn into the sorted prefix of the hash. A key equal to one already in
/// the prefix replaces its value. Keys that are not integers, booleans or strings trap.
const HASH_BUILD: &str = "lemur_hash_build:
    push rbx
    push r12
    push r13
    push r14
    push r15
    mov r12, rax
    xor r13d, r13d
    xor r14d, r14d
.Llemur_hash_build_next:
    mov rcx, qword ptr [r12 + 8]
    add rcx, rcx
    cmp r13, rcx
    jae .Llemur_hash_build_done
    mov rsi, qword ptr [r12 + r13*8 + 16]
    mov rbx, qword ptr [r12 + r13*8 + 24]
    add r13, 2
    mov rcx, qword ptr [rsi]
    cmp rcx, LEMUR_TAG_INTEGER
    jb lemur_trap
    cmp rcx, LEMUR_TAG_STRING
    ja lemur_trap
    xor r15d, r15d
.Llemur_hash_build_scan:
    cmp r15, r14
    je .Llemur_hash_build_insert
    mov rdi, qword ptr [r12 + r15*8 + 16]
    call lemur_key_compare
    test rax, rax
    jz .Llemur_hash_build_replace
    js .Llemur_hash_build_insert
    add r15, 2
    jmp .Llemur_hash_build_scan
.Llemur_hash_build_replace:
    mov qword ptr [r12 + r15*8 + 24], rbx
    jmp .Llemur_hash_build_next
.Llemur_hash_build_insert:
    mov rcx, r14
.Llemur_hash_build_shift:
    cmp rcx, r15
    je .Llemur_hash_build_store
    sub rcx, 2
    mov rdx, qword ptr [r12 + rcx*8 + 16]
    mov qword ptr [r12 + rcx*8 + 32], rdx
    mov rdx, qword ptr [r12 + rcx*8 + 24]
    mov qword ptr [r12 + rcx*8 + 40], rdx
    jmp .Llemur_hash_build_shift
.Llemur_hash_build_store:
    mov qword ptr [r12 + r15*8 + 16], rsi
    mov qword ptr [r12 + r15*8 + 24], rbx
    add r14, 2
    jmp .Llemur_hash_build_next
.Llemur_hash_build_done:
    shr r14, 1
    mov qword ptr [r12 + 8], r14
    mov rax, r12
    pop r15
    pop r14
    pop r13
    pop r12
    pop rbx
    ret
";

/// Indexes the array or hash in `rax` with `rcx`. Arrays trap on an out of range index, negative
/// indices included. A missing hash key yields null.
const INDEX: &str = "lemur_index:
    mov rdx, qword ptr [rax]
    cmp rdx, LEMUR_TAG_ARRAY
    je .Llemur_index_array
    cmp rdx, LEMUR_TAG_HASH
    jne lemur_trap
    mov rdx, qword ptr [rcx]
    cmp rdx, LEMUR_TAG_INTEGER
    jb lemur_trap
    cmp rdx, LEMUR_TAG_STRING
    ja lemur_trap
    push r12
    push r13
    mov r12, rax
    mov rsi, rcx
    xor r13d, r13d
.Llemur_index_scan:
    mov rcx, qword ptr [r12 + 8]
    add rcx, rcx
    cmp r13, rcx
    jae .Llemur_index_miss
    mov rdi, qword ptr [r12 + r13*8 + 16]
    call lemur_key_compare
    test rax, rax
    jz .Llemur_index_found
    add r13, 2
    jmp .Llemur_index_scan
.Llemur_index_found:
    mov rax, qword ptr [r12 + r13*8 + 24]
    jmp .Llemur_index_return
.Llemur_index_miss:
    lea rax, [rip + lemur_null]
.Llemur_index_return:
    pop r13
    pop r12
    ret
.Llemur_index_array:
    cmp qword ptr [rcx], LEMUR_TAG_INTEGER
    jne lemur_trap
    mov rcx, qword ptr [rcx + 8]
    cmp rcx, qword ptr [rax + 8]
    jae lemur_trap
    mov rax, qword ptr [rax + rcx*8 + 16]
    ret
";

// Builtins are called like compiled functions: the closure record in `rax`, the argument count
// in `rdx` and the arguments above the return address, the last one closest.

const LEN: &str = "    cmp rdx, 1
    jne lemur_trap
    mov rax, qword ptr [rsp + 8]
    mov rcx, qword ptr [rax]
    cmp rcx, LEMUR_TAG_STRING
    je .Llemur_len_word
    cmp rcx, LEMUR_TAG_ARRAY
    jne lemur_trap
.Llemur_len_word:
    mov rax, qword ptr [rax + 8]
    jmp lemur_box_integer
";

const PUTS: &str = "    mov rcx, rdx
.Llemur_puts_next:
    test rcx, rcx
    jz .Llemur_puts_done
    mov rax, qword ptr [rsp + rcx*8]
    push rcx
    call lemur_display
    lea rsi, [rip + lemur_text_newline]
    mov edx, 1
    call lemur_write
    pop rcx
    dec rcx
    jmp .Llemur_puts_next
.Llemur_puts_done:
    lea rax, [rip + lemur_null]
    ret
";

const FIRST: &str = "    cmp rdx, 1
    jne lemur_trap
    mov rax, qword ptr [rsp + 8]
    cmp qword ptr [rax], LEMUR_TAG_ARRAY
    jne lemur_trap
    cmp qword ptr [rax + 8], 0
    je .Llemur_first_null
    mov rax, qword ptr [rax + 16]
    ret
.Llemur_first_null:
    lea rax, [rip + lemur_null]
    ret
";

const LAST: &str = "    cmp rdx, 1
    jne lemur_trap
    mov rax, qword ptr [rsp + 8]
    cmp qword ptr [rax], LEMUR_TAG_ARRAY
    jne lemur_trap
    mov rcx, qword ptr [rax + 8]
    test rcx, rcx
    jz .Llemur_last_null
    mov rax, qword ptr [rax + rcx*8 + 8]
    ret
.Llemur_last_null:
    lea rax, [rip + lemur_null]
    ret
";

const REST: &str = "    cmp rdx, 1
    jne lemur_trap
    mov rsi, qword ptr [rsp + 8]
    cmp qword ptr [rsi], LEMUR_TAG_ARRAY
    jne lemur_trap
    mov rcx, qword ptr [rsi + 8]
    test rcx, rcx
    jz .Llemur_rest_null
    lea rdi, [rcx*8 + 8]
    call lemur_alloc
    mov qword ptr [rax], LEMUR_TAG_ARRAY
    dec rcx
    mov qword ptr [rax + 8], rcx
    lea rsi, [rsi + 24]
    lea rdi, [rax + 16]
    rep movsq
    ret
.Llemur_rest_null:
    lea rax, [rip + lemur_null]
    ret
";

const PUSH: &str = "    cmp rdx, 2
    jne lemur_trap
    mov rsi, qword ptr [rsp + 16]
    cmp qword ptr [rsi], LEMUR_TAG_ARRAY
    jne lemur_trap
    mov rcx, qword ptr [rsi + 8]
    lea rdi, [rcx*8 + 24]
    call lemur_alloc
    mov qword ptr [rax], LEMUR_TAG_ARRAY
    lea rdx, [rcx + 1]
    mov qword ptr [rax + 8], rdx
    lea rsi, [rsi + 16]
    lea rdi, [rax + 16]
    rep movsq
    mov rdx, qword ptr [rsp + 8]
    mov qword ptr [rdi], rdx
    ret
";

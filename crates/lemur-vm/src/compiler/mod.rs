use compact_str::CompactString;
use error::{CompileError, CompileResult};
use symbol_table::{Symbol, SymbolScope, SymbolTable};
use tracing::debug;

use crate::{
    LemurRc,
    ast::{Block, Expression, Program, Statement},
    builtins,
    code::{Instructions, Opcode, make},
    val::{CompiledFunction, Object},
};

pub mod error;
pub mod symbol_table;

/// Placeholder jump target, patched once the real target is known.
const PLACEHOLDER_TARGET: usize = 9999;

#[derive(Clone, Debug, Default, PartialEq)]
/// The output of compilation and the sole input of the VM and the code generator.
pub struct Bytecode {
    /// The instructions of the program frame.
    pub instructions: Instructions,
    /// The constant pool. Constants are never deduplicated.
    pub constants: Vec<Object>,
    /// The number of global slots the program uses.
    pub binding_count: usize,
}

/// Compiles `program` into bytecode.
pub fn compile(program: &Program) -> CompileResult<Bytecode> {
    let mut compiler = Compiler::new();
    compiler.compile(program)?;
    Ok(compiler.bytecode())
}

#[derive(Copy, Clone, Debug, PartialEq)]
struct EmittedInstruction {
    op: Opcode,
    position: usize,
}

#[derive(Debug, Default)]
/// The instructions of the function currently being compiled.
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

/// Translates an AST into [`Bytecode`].
pub struct Compiler {
    constants: Vec<Object>,
    symbol_table: SymbolTable,
    scope: CompilationScope,
    enclosing: Vec<CompilationScope>,
}

impl Default for Compiler {
    fn default() -> Compiler {
        Compiler::new()
    }
}

impl Compiler {
    /// Creates a compiler with every builtin in scope.
    pub fn new() -> Compiler {
        let mut symbol_table = SymbolTable::new();
        for (idx, builtin) in builtins::BUILTINS.iter().enumerate() {
            symbol_table.define_builtin(idx, builtin.name);
        }
        Compiler {
            constants: Vec::new(),
            symbol_table,
            scope: CompilationScope::default(),
            enclosing: Vec::new(),
        }
    }

    /// Compiles every statement of `program`. Stops at the first error.
    pub fn compile(&mut self, program: &Program) -> CompileResult<()> {
        debug!("Compiling program with {} statements", program.statements.len());
        for statement in program.statements {
            self.compile_statement(statement)?;
        }
        debug!(
            "Compiled program to {} bytes and {} constants",
            self.scope.instructions.len(),
            self.constants.len()
        );
        Ok(())
    }

    /// Returns the compiled program.
    pub fn bytecode(self) -> Bytecode {
        Bytecode {
            instructions: self.scope.instructions,
            constants: self.constants,
            binding_count: self.symbol_table.num_definitions(),
        }
    }

    fn compile_statement(&mut self, statement: &Statement) -> CompileResult<()> {
        match statement {
            Statement::Expression(expression) => {
                self.compile_expression(expression)?;
                self.emit(Opcode::Pop, &[])?;
            }
            Statement::Let { name, value } => {
                self.compile_expression(value)?;
                let symbol = self.symbol_table.define(name);
                match symbol.scope {
                    SymbolScope::Global => self.emit(Opcode::SetGlobal, &[symbol.index])?,
                    _ => self.emit(Opcode::SetLocal, &[symbol.index])?,
                };
            }
            Statement::Return(value) => {
                self.compile_expression(value)?;
                self.emit(Opcode::ReturnValue, &[])?;
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> CompileResult<()> {
        for statement in block.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    fn compile_expression(&mut self, expression: &Expression) -> CompileResult<()> {
        match expression {
            Expression::Integer(x) => {
                let idx = self.add_constant(Object::Integer(*x));
                self.emit(Opcode::Constant, &[idx])?;
            }
            Expression::String(s) => {
                let idx = self.add_constant(Object::string(s));
                self.emit(Opcode::Constant, &[idx])?;
            }
            Expression::Boolean(true) => {
                self.emit(Opcode::True, &[])?;
            }
            Expression::Boolean(false) => {
                self.emit(Opcode::False, &[])?;
            }
            Expression::Identifier(name) => {
                let symbol = self
                    .symbol_table
                    .resolve(name)
                    .ok_or_else(|| CompileError::UndefinedVariable(CompactString::from(*name)))?;
                self.load_symbol(&symbol)?;
            }
            Expression::Prefix { operator, right } => {
                self.compile_expression(right)?;
                let op = match *operator {
                    "!" => Opcode::Bang,
                    "-" => Opcode::Minus,
                    other => return Err(CompileError::UnknownOperator(other.into())),
                };
                self.emit(op, &[])?;
            }
            Expression::Infix {
                operator,
                left,
                right,
            } => self.compile_infix(operator, left, right)?,
            Expression::If {
                condition,
                consequence,
                alternative,
            } => self.compile_if(condition, consequence, alternative.as_ref())?,
            Expression::Array(elements) => {
                for element in elements.iter() {
                    self.compile_expression(element)?;
                }
                self.emit(Opcode::Array, &[elements.len()])?;
            }
            Expression::Hash(pairs) => {
                for (key, value) in pairs.iter() {
                    if matches!(
                        key,
                        Expression::Function { .. } | Expression::Array(_) | Expression::Hash(_)
                    ) {
                        return Err(CompileError::MalformedLiteral(
                            "hash keys must be integers, booleans or strings".into(),
                        ));
                    }
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Opcode::Hash, &[pairs.len() * 2])?;
            }
            Expression::Index { left, index } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Opcode::Index, &[])?;
            }
            Expression::Function { parameters, body } => {
                self.compile_function(parameters, body)?
            }
            Expression::Call {
                function,
                arguments,
            } => {
                self.compile_expression(function)?;
                for argument in arguments.iter() {
                    self.compile_expression(argument)?;
                }
                self.emit(Opcode::Call, &[arguments.len()])?;
            }
        }
        Ok(())
    }

    fn compile_infix(
        &mut self,
        operator: &str,
        left: &Expression,
        right: &Expression,
    ) -> CompileResult<()> {
        // `a < b` is compiled as `b > a`.
        if operator == "<" {
            self.compile_expression(right)?;
            self.compile_expression(left)?;
            self.emit(Opcode::GreaterThan, &[])?;
            return Ok(());
        }
        self.compile_expression(left)?;
        self.compile_expression(right)?;
        let op = match operator {
            "+" => Opcode::Add,
            "-" => Opcode::Sub,
            "*" => Opcode::Mul,
            "/" => Opcode::Div,
            ">" => Opcode::GreaterThan,
            "==" => Opcode::Equal,
            "!=" => Opcode::NotEqual,
            other => return Err(CompileError::UnknownOperator(other.into())),
        };
        self.emit(op, &[])?;
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expression,
        consequence: &Block,
        alternative: Option<&Block>,
    ) -> CompileResult<()> {
        self.compile_expression(condition)?;
        let jump_not_truthy = self.emit(Opcode::JumpNotTruthy, &[PLACEHOLDER_TARGET])?;
        self.compile_branch(consequence)?;
        let jump = self.emit(Opcode::Jump, &[PLACEHOLDER_TARGET])?;
        let after_consequence = self.scope.instructions.len();
        self.scope
            .instructions
            .change_operand(jump_not_truthy, after_consequence)?;
        match alternative {
            Some(alternative) => self.compile_branch(alternative)?,
            None => {
                self.emit(Opcode::Null, &[])?;
            }
        }
        let after_alternative = self.scope.instructions.len();
        self.scope.instructions.change_operand(jump, after_alternative)?;
        Ok(())
    }

    /// Compiles an if branch so that it leaves exactly one value on the stack.
    fn compile_branch(&mut self, block: &Block) -> CompileResult<()> {
        let start = self.scope.instructions.len();
        self.compile_block(block)?;
        if self.scope.instructions.len() == start {
            self.emit(Opcode::Null, &[])?;
        } else if self.last_instruction_is(Opcode::Pop) {
            self.remove_last_pop();
        } else if !self.last_instruction_is(Opcode::ReturnValue) {
            // The block ended in a `let`.
            self.emit(Opcode::Null, &[])?;
        }
        Ok(())
    }

    fn compile_function(&mut self, parameters: &[&str], body: &Block) -> CompileResult<()> {
        self.enter_scope();
        for parameter in parameters.iter() {
            self.symbol_table.define(parameter);
        }
        self.compile_block(body)?;
        if self.last_instruction_is(Opcode::Pop) {
            self.replace_last_pop_with_return();
        } else if !self.last_instruction_is(Opcode::ReturnValue) {
            self.emit(Opcode::Return, &[])?;
        }
        let free_symbols = self.symbol_table.free_symbols().to_vec();
        let num_locals = self.symbol_table.num_definitions();
        let instructions = self.leave_scope();
        for symbol in free_symbols.iter() {
            self.load_symbol(symbol)?;
        }
        let function = CompiledFunction {
            instructions,
            num_locals,
            num_parameters: parameters.len(),
        };
        let idx = self.add_constant(Object::CompiledFunction(LemurRc::new(function)));
        self.emit(Opcode::Closure, &[idx, free_symbols.len()])?;
        Ok(())
    }

    fn load_symbol(&mut self, symbol: &Symbol) -> CompileResult<usize> {
        let op = match symbol.scope {
            SymbolScope::Global => Opcode::GetGlobal,
            SymbolScope::Local => Opcode::GetLocal,
            SymbolScope::Free => Opcode::GetFree,
            SymbolScope::Builtin => Opcode::GetBuiltin,
        };
        self.emit(op, &[symbol.index])
    }

    fn enter_scope(&mut self) {
        let scope = std::mem::take(&mut self.scope);
        self.enclosing.push(scope);
        let outer = std::mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::new_enclosed(outer);
        debug!("Entered scope at depth {}", self.enclosing.len());
    }

    fn leave_scope(&mut self) -> Instructions {
        let enclosing = self.enclosing.pop().unwrap_or_default();
        let scope = std::mem::replace(&mut self.scope, enclosing);
        let table = std::mem::take(&mut self.symbol_table);
        self.symbol_table = table.into_outer().unwrap_or_default();
        debug!(
            "Left scope with {} bytes, back at depth {}",
            scope.instructions.len(),
            self.enclosing.len()
        );
        scope.instructions
    }

    fn add_constant(&mut self, object: Object) -> usize {
        self.constants.push(object);
        self.constants.len() - 1
    }

    /// Emits an instruction and returns its position.
    fn emit(&mut self, op: Opcode, operands: &[usize]) -> CompileResult<usize> {
        let instruction = make(op, operands)?;
        let position = self.scope.instructions.push(&instruction);
        self.scope.previous_instruction = self.scope.last_instruction;
        self.scope.last_instruction = Some(EmittedInstruction { op, position });
        Ok(position)
    }

    fn last_instruction_is(&self, op: Opcode) -> bool {
        self.scope
            .last_instruction
            .is_some_and(|instruction| instruction.op == op)
    }

    fn remove_last_pop(&mut self) {
        if let Some(last) = self.scope.last_instruction {
            self.scope.instructions.truncate(last.position);
            self.scope.last_instruction = self.scope.previous_instruction;
        }
    }

    fn replace_last_pop_with_return(&mut self) {
        if let Some(last) = self.scope.last_instruction.as_mut() {
            self.scope
                .instructions
                .replace_opcode(last.position, Opcode::ReturnValue);
            last.op = Opcode::ReturnValue;
        }
    }
}

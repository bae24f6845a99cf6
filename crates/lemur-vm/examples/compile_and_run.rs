//! Compiles a small program, runs it on the VM and prints the generated assembly.

use bumpalo::Bump;
use lemur_vm::{ast::AstBuilder, codegen, compile, vm::Vm};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let arena = Bump::new();
    let ast = AstBuilder::new(&arena);
    // let add = fn(b, c) { let d = 5; return b + c + d; }; return add(2, 3);
    let program = ast.program([
        ast.let_statement(
            "add",
            ast.function(
                &["b", "c"],
                ast.block([
                    ast.let_statement("d", ast.integer(5)),
                    ast.return_statement(ast.infix(
                        ast.infix(ast.identifier("b"), "+", ast.identifier("c")),
                        "+",
                        ast.identifier("d"),
                    )),
                ]),
            ),
        ),
        ast.return_statement(ast.call(
            ast.identifier("add"),
            [ast.integer(2), ast.integer(3)],
        )),
    ]);

    let bytecode = compile(&program)?;
    println!("bytecode:\n{}", bytecode.instructions);
    let result = Vm::new(&bytecode).run()?;
    println!("vm result: {result}");
    println!("assembly:\n{}", codegen::generate(&bytecode)?);
    Ok(())
}

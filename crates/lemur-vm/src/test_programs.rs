//! Programs shared by the VM and native code tests. Every program here must behave the same on
//! both backends. A program the VM rejects must trap natively.

use crate::{
    ast::{AstBuilder, Program},
    val::{Object, ObjectType},
    vm::VmError,
};

/// A program paired with the result it should produce and what it should print.
pub struct Case {
    pub name: &'static str,
    pub build: for<'a> fn(AstBuilder<'a>) -> Program<'a>,
    pub expected: Result<Object, VmError>,
    pub output: &'static str,
}

pub fn cases() -> Vec<Case> {
    vec![
        Case {
            name: "return_one_plus_one",
            build: return_one_plus_one,
            expected: Ok(Object::Integer(2)),
            output: "",
        },
        Case {
            name: "globals_are_independent",
            build: globals_are_independent,
            expected: Ok(Object::Integer(3)),
            output: "",
        },
        Case {
            name: "if_else_returns_alternative",
            build: if_else_returns_alternative,
            expected: Ok(Object::Integer(20)),
            output: "",
        },
        Case {
            name: "parameters_and_locals",
            build: parameters_and_locals,
            expected: Ok(Object::Integer(10)),
            output: "",
        },
        Case {
            name: "closure_without_captures",
            build: closure_without_captures,
            expected: Ok(Object::Integer(3)),
            output: "",
        },
        Case {
            name: "arithmetic_precedence",
            build: arithmetic_precedence,
            expected: Ok(Object::Integer(9)),
            output: "",
        },
        Case {
            name: "negation_and_comparison",
            build: negation_and_comparison,
            expected: Ok(Object::Boolean(true)),
            output: "",
        },
        Case {
            name: "bang_negates_truthiness",
            build: bang_negates_truthiness,
            expected: Ok(Object::Boolean(true)),
            output: "",
        },
        Case {
            name: "zero_is_falsy",
            build: zero_is_falsy,
            expected: Ok(Object::Integer(2)),
            output: "",
        },
        Case {
            name: "if_without_alternative_is_null",
            build: if_without_alternative_is_null,
            expected: Ok(Object::Null),
            output: "",
        },
        Case {
            name: "let_inside_branch_keeps_stack_balanced",
            build: let_inside_branch_keeps_stack_balanced,
            expected: Ok(Object::Integer(4)),
            output: "",
        },
        Case {
            name: "functions_read_globals",
            build: functions_read_globals,
            expected: Ok(Object::Integer(10)),
            output: "",
        },
        Case {
            name: "closure_captures_argument",
            build: closure_captures_argument,
            expected: Ok(Object::Integer(42)),
            output: "",
        },
        Case {
            name: "captures_pass_through_nested_functions",
            build: captures_pass_through_nested_functions,
            expected: Ok(Object::Integer(6)),
            output: "",
        },
        Case {
            name: "functions_are_values",
            build: functions_are_values,
            expected: Ok(Object::Integer(9)),
            output: "",
        },
        Case {
            name: "array_index",
            build: array_index,
            expected: Ok(Object::Integer(20)),
            output: "",
        },
        Case {
            name: "hash_index",
            build: hash_index,
            expected: Ok(Object::Integer(20)),
            output: "",
        },
        Case {
            name: "hash_miss_is_null",
            build: hash_miss_is_null,
            expected: Ok(Object::Null),
            output: "",
        },
        Case {
            name: "array_builtins",
            build: array_builtins,
            expected: Ok(Object::Integer(19)),
            output: "",
        },
        Case {
            name: "push_and_rest",
            build: push_and_rest,
            expected: Ok(Object::Integer(4)),
            output: "",
        },
        Case {
            name: "string_length",
            build: string_length,
            expected: Ok(Object::Integer(5)),
            output: "",
        },
        Case {
            name: "puts_returns_null",
            build: puts_returns_null,
            expected: Ok(Object::Null),
            output: "hello\n",
        },
        Case {
            name: "concatenated_string_length",
            build: concatenated_string_length,
            expected: Ok(Object::Integer(3)),
            output: "",
        },
        Case {
            name: "integer_and_boolean_keys_are_distinct",
            build: integer_and_boolean_keys_are_distinct,
            expected: Ok(Object::Integer(1020)),
            output: "",
        },
        Case {
            name: "concatenated_string_finds_hash_key",
            build: concatenated_string_finds_hash_key,
            expected: Ok(Object::Integer(7)),
            output: "",
        },
        Case {
            name: "strings_compare_by_content",
            build: strings_compare_by_content,
            expected: Ok(Object::Boolean(true)),
            output: "",
        },
        Case {
            name: "later_duplicate_key_wins",
            build: later_duplicate_key_wins,
            expected: Ok(Object::Integer(2)),
            output: "",
        },
        Case {
            name: "minimum_divided_by_minus_one_wraps",
            build: minimum_divided_by_minus_one_wraps,
            expected: Ok(Object::Integer(i64::MIN)),
            output: "",
        },
        Case {
            name: "puts_displays_every_value",
            build: puts_displays_every_value,
            expected: Ok(Object::Null),
            output: "12\n-7\n-9223372036854775808\ntrue\nnull\ns\n[1, [2, x], []]\n\
                {1: true, false: f, b: 2}\n<closure/1 free=0>\n<closure/0 free=1>\n<builtin-len>\n",
        },
        Case {
            name: "integer_equals_boolean_fails",
            build: integer_equals_boolean_fails,
            expected: Err(VmError::TypeError {
                op: "==",
                left: ObjectType::Integer,
                right: ObjectType::Boolean,
            }),
            output: "",
        },
        Case {
            name: "string_plus_integer_fails",
            build: string_plus_integer_fails,
            expected: Err(VmError::TypeError {
                op: "+",
                left: ObjectType::String,
                right: ObjectType::Integer,
            }),
            output: "",
        },
        Case {
            name: "strings_do_not_order",
            build: strings_do_not_order,
            expected: Err(VmError::TypeError {
                op: ">",
                left: ObjectType::String,
                right: ObjectType::String,
            }),
            output: "",
        },
        Case {
            name: "negating_boolean_fails",
            build: negating_boolean_fails,
            expected: Err(VmError::UnaryTypeError {
                op: "-",
                operand: ObjectType::Boolean,
            }),
            output: "",
        },
        Case {
            name: "missing_argument_fails",
            build: missing_argument_fails,
            expected: Err(VmError::WrongArgumentCount {
                expected: 1,
                actual: 0,
            }),
            output: "",
        },
        Case {
            name: "division_by_zero_fails",
            build: division_by_zero_fails,
            expected: Err(VmError::DivisionByZero),
            output: "",
        },
        Case {
            name: "index_past_end_fails",
            build: index_past_end_fails,
            expected: Err(VmError::IndexOutOfRange { index: 3, len: 3 }),
            output: "",
        },
        Case {
            name: "calling_integer_fails",
            build: calling_integer_fails,
            expected: Err(VmError::NotCallable(ObjectType::Integer)),
            output: "",
        },
        Case {
            name: "array_hash_key_fails",
            build: array_hash_key_fails,
            expected: Err(VmError::UnhashableKey(ObjectType::Array)),
            output: "",
        },
        Case {
            name: "len_of_integer_fails",
            build: len_of_integer_fails,
            expected: Err(VmError::ArgumentTypeError {
                builtin: "len",
                actual: ObjectType::Integer,
            }),
            output: "",
        },
    ]
}

/// `return 1 + 1`
fn return_one_plus_one(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.return_statement(ast.infix(ast.integer(1), "+", ast.integer(1)))])
}

/// `let a = 3; let b = 1; return a;`
fn globals_are_independent(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([
        ast.let_statement("a", ast.integer(3)),
        ast.let_statement("b", ast.integer(1)),
        ast.return_statement(ast.identifier("a")),
    ])
}

/// `if (1 == 2) { return 10 } else { return 20 };`
fn if_else_returns_alternative(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.if_expression(
        ast.infix(ast.integer(1), "==", ast.integer(2)),
        ast.block([ast.return_statement(ast.integer(10))]),
        Some(ast.block([ast.return_statement(ast.integer(20))])),
    ))])
}

/// `let a = fn(b, c) { let d = 5; return b + c + d; }; return a(2, 3);`
fn parameters_and_locals(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([
        ast.let_statement(
            "a",
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
            ast.identifier("a"),
            [ast.integer(2), ast.integer(3)],
        )),
    ])
}

/// `let a = fn() { let c = 3; return c; }; return a();`
fn closure_without_captures(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([
        ast.let_statement(
            "a",
            ast.function(
                &[],
                ast.block([
                    ast.let_statement("c", ast.integer(3)),
                    ast.return_statement(ast.identifier("c")),
                ]),
            ),
        ),
        ast.return_statement(ast.call(ast.identifier("a"), [])),
    ])
}

/// `(10 - 4) * 3 / 2`
fn arithmetic_precedence(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.infix(
        ast.infix(
            ast.infix(ast.integer(10), "-", ast.integer(4)),
            "*",
            ast.integer(3),
        ),
        "/",
        ast.integer(2),
    ))])
}

/// `-5 + 10 < 6`
fn negation_and_comparison(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.infix(
        ast.infix(ast.prefix("-", ast.integer(5)), "+", ast.integer(10)),
        "<",
        ast.integer(6),
    ))])
}

/// `!(1 > 2)`
fn bang_negates_truthiness(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.prefix(
        "!",
        ast.infix(ast.integer(1), ">", ast.integer(2)),
    ))])
}

/// `if (0) { 1 } else { 2 }`
fn zero_is_falsy(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.if_expression(
        ast.integer(0),
        ast.block([ast.expression_statement(ast.integer(1))]),
        Some(ast.block([ast.expression_statement(ast.integer(2))])),
    ))])
}

/// `if (false) { 10 }`
fn if_without_alternative_is_null(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.if_expression(
        ast.boolean(false),
        ast.block([ast.expression_statement(ast.integer(10))]),
        None,
    ))])
}

/// `if (true) { let x = 4; }; x`
fn let_inside_branch_keeps_stack_balanced(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([
        ast.expression_statement(ast.if_expression(
            ast.boolean(true),
            ast.block([ast.let_statement("x", ast.integer(4))]),
            None,
        )),
        ast.expression_statement(ast.identifier("x")),
    ])
}

/// `let g = 5; let f = fn() { g * 2 }; f()`
fn functions_read_globals(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([
        ast.let_statement("g", ast.integer(5)),
        ast.let_statement(
            "f",
            ast.function(
                &[],
                ast.block([ast.expression_statement(ast.infix(
                    ast.identifier("g"),
                    "*",
                    ast.integer(2),
                ))]),
            ),
        ),
        ast.expression_statement(ast.call(ast.identifier("f"), [])),
    ])
}

/// `let new_adder = fn(x) { fn(y) { x + y } }; let add_two = new_adder(2); add_two(40)`
fn closure_captures_argument(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([
        ast.let_statement(
            "new_adder",
            ast.function(
                &["x"],
                ast.block([ast.expression_statement(ast.function(
                    &["y"],
                    ast.block([ast.expression_statement(ast.infix(
                        ast.identifier("x"),
                        "+",
                        ast.identifier("y"),
                    ))]),
                ))]),
            ),
        ),
        ast.let_statement(
            "add_two",
            ast.call(ast.identifier("new_adder"), [ast.integer(2)]),
        ),
        ast.expression_statement(ast.call(ast.identifier("add_two"), [ast.integer(40)])),
    ])
}

/// `let f = fn(a) { fn(b) { fn(c) { a + b + c } } }; f(1)(2)(3)`
fn captures_pass_through_nested_functions(ast: AstBuilder<'_>) -> Program<'_> {
    let innermost = ast.function(
        &["c"],
        ast.block([ast.expression_statement(ast.infix(
            ast.infix(ast.identifier("a"), "+", ast.identifier("b")),
            "+",
            ast.identifier("c"),
        ))]),
    );
    let middle = ast.function(&["b"], ast.block([ast.expression_statement(innermost)]));
    let outer = ast.function(&["a"], ast.block([ast.expression_statement(middle)]));
    let call = ast.call(
        ast.call(ast.call(ast.identifier("f"), [ast.integer(1)]), [ast.integer(2)]),
        [ast.integer(3)],
    );
    ast.program([
        ast.let_statement("f", outer),
        ast.expression_statement(call),
    ])
}

/// `let add = fn(a, b) { a + b }; let twice = fn(f, x) { f(f(x, x), x) }; twice(add, 3)`
fn functions_are_values(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([
        ast.let_statement(
            "add",
            ast.function(
                &["a", "b"],
                ast.block([ast.expression_statement(ast.infix(
                    ast.identifier("a"),
                    "+",
                    ast.identifier("b"),
                ))]),
            ),
        ),
        ast.let_statement(
            "twice",
            ast.function(
                &["f", "x"],
                ast.block([ast.expression_statement(ast.call(
                    ast.identifier("f"),
                    [
                        ast.call(
                            ast.identifier("f"),
                            [ast.identifier("x"), ast.identifier("x")],
                        ),
                        ast.identifier("x"),
                    ],
                ))]),
            ),
        ),
        ast.expression_statement(ast.call(
            ast.identifier("twice"),
            [ast.identifier("add"), ast.integer(3)],
        )),
    ])
}

/// `[1, 2, 3][1] * 10`
fn array_index(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.infix(
        ast.index(
            ast.array([ast.integer(1), ast.integer(2), ast.integer(3)]),
            ast.integer(1),
        ),
        "*",
        ast.integer(10),
    ))])
}

/// `{1: 10, 2: 20}[2]`
fn hash_index(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.index(
        ast.hash([
            (ast.integer(1), ast.integer(10)),
            (ast.integer(2), ast.integer(20)),
        ]),
        ast.integer(2),
    ))])
}

/// `{1: 10}[5]`
fn hash_miss_is_null(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.index(
        ast.hash([(ast.integer(1), ast.integer(10))]),
        ast.integer(5),
    ))])
}

/// `len([1, 2, 3]) + first([7]) + last([1, 9])`
fn array_builtins(ast: AstBuilder<'_>) -> Program<'_> {
    let len = ast.call(
        ast.identifier("len"),
        [ast.array([ast.integer(1), ast.integer(2), ast.integer(3)])],
    );
    let first = ast.call(ast.identifier("first"), [ast.array([ast.integer(7)])]);
    let last = ast.call(
        ast.identifier("last"),
        [ast.array([ast.integer(1), ast.integer(9)])],
    );
    ast.program([ast.expression_statement(ast.infix(
        ast.infix(len, "+", first),
        "+",
        last,
    ))])
}

/// `let a = push([1, 2], 3); len(rest(a)) + a[2] - 1`
fn push_and_rest(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([
        ast.let_statement(
            "a",
            ast.call(
                ast.identifier("push"),
                [ast.array([ast.integer(1), ast.integer(2)]), ast.integer(3)],
            ),
        ),
        ast.expression_statement(ast.infix(
            ast.infix(
                ast.call(
                    ast.identifier("len"),
                    [ast.call(ast.identifier("rest"), [ast.identifier("a")])],
                ),
                "+",
                ast.index(ast.identifier("a"), ast.integer(2)),
            ),
            "-",
            ast.integer(1),
        )),
    ])
}

/// `len("hello")`
fn string_length(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.call(
        ast.identifier("len"),
        [ast.string("hello")],
    ))])
}

/// `puts("hello")`
fn puts_returns_null(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.call(
        ast.identifier("puts"),
        [ast.string("hello")],
    ))])
}

/// `len("ab" + "c")`
fn concatenated_string_length(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.call(
        ast.identifier("len"),
        [ast.infix(ast.string("ab"), "+", ast.string("c"))],
    ))])
}

/// `let h = {1: 10, true: 20}; h[1] * 100 + h[true]`
fn integer_and_boolean_keys_are_distinct(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([
        ast.let_statement(
            "h",
            ast.hash([
                (ast.integer(1), ast.integer(10)),
                (ast.boolean(true), ast.integer(20)),
            ]),
        ),
        ast.expression_statement(ast.infix(
            ast.infix(
                ast.index(ast.identifier("h"), ast.integer(1)),
                "*",
                ast.integer(100),
            ),
            "+",
            ast.index(ast.identifier("h"), ast.boolean(true)),
        )),
    ])
}

/// `{"ab": 7}["a" + "b"]`
fn concatenated_string_finds_hash_key(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.index(
        ast.hash([(ast.string("ab"), ast.integer(7))]),
        ast.infix(ast.string("a"), "+", ast.string("b")),
    ))])
}

/// `"a" + "b" == "ab"`
fn strings_compare_by_content(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.infix(
        ast.infix(ast.string("a"), "+", ast.string("b")),
        "==",
        ast.string("ab"),
    ))])
}

/// `{"k": 1, "k": 2}["k"]`
fn later_duplicate_key_wins(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.index(
        ast.hash([
            (ast.string("k"), ast.integer(1)),
            (ast.string("k"), ast.integer(2)),
        ]),
        ast.string("k"),
    ))])
}

/// `(-9223372036854775807 - 1) / -1`
fn minimum_divided_by_minus_one_wraps(ast: AstBuilder<'_>) -> Program<'_> {
    let minimum = ast.infix(ast.prefix("-", ast.integer(i64::MAX)), "-", ast.integer(1));
    ast.program([ast.expression_statement(ast.infix(
        minimum,
        "/",
        ast.prefix("-", ast.integer(1)),
    ))])
}

/// ```text
/// let f = fn(x) { x };
/// let g = fn(y) { fn() { y } };
/// puts(12, -7, -9223372036854775807 - 1, true, if (false) { 1 }, "s", [1, [2, "x"], []],
///      {"b": 2, 1: true, false: "f"}, f, g(1), len)
/// ```
fn puts_displays_every_value(ast: AstBuilder<'_>) -> Program<'_> {
    let minimum = ast.infix(ast.prefix("-", ast.integer(i64::MAX)), "-", ast.integer(1));
    let null = ast.if_expression(
        ast.boolean(false),
        ast.block([ast.expression_statement(ast.integer(1))]),
        None,
    );
    let nested = ast.array([
        ast.integer(1),
        ast.array([ast.integer(2), ast.string("x")]),
        ast.array([]),
    ]);
    let hash = ast.hash([
        (ast.string("b"), ast.integer(2)),
        (ast.integer(1), ast.boolean(true)),
        (ast.boolean(false), ast.string("f")),
    ]);
    ast.program([
        ast.let_statement(
            "f",
            ast.function(&["x"], ast.block([ast.expression_statement(ast.identifier("x"))])),
        ),
        ast.let_statement(
            "g",
            ast.function(
                &["y"],
                ast.block([ast.expression_statement(ast.function(
                    &[],
                    ast.block([ast.expression_statement(ast.identifier("y"))]),
                ))]),
            ),
        ),
        ast.expression_statement(ast.call(
            ast.identifier("puts"),
            [
                ast.integer(12),
                ast.prefix("-", ast.integer(7)),
                minimum,
                ast.boolean(true),
                null,
                ast.string("s"),
                nested,
                hash,
                ast.identifier("f"),
                ast.call(ast.identifier("g"), [ast.integer(1)]),
                ast.identifier("len"),
            ],
        )),
    ])
}

/// `1 == true`
fn integer_equals_boolean_fails(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.infix(
        ast.integer(1),
        "==",
        ast.boolean(true),
    ))])
}

/// `"a" + 1`
fn string_plus_integer_fails(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.infix(
        ast.string("a"),
        "+",
        ast.integer(1),
    ))])
}

/// `"a" > "b"`
fn strings_do_not_order(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.infix(
        ast.string("a"),
        ">",
        ast.string("b"),
    ))])
}

/// `-true`
fn negating_boolean_fails(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.prefix("-", ast.boolean(true)))])
}

/// `fn(a) { a }()`
fn missing_argument_fails(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.call(
        ast.function(&["a"], ast.block([ast.expression_statement(ast.identifier("a"))])),
        [],
    ))])
}

/// `1 / 0`
fn division_by_zero_fails(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.infix(
        ast.integer(1),
        "/",
        ast.integer(0),
    ))])
}

/// `[1, 2, 3][3]`
fn index_past_end_fails(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.index(
        ast.array([ast.integer(1), ast.integer(2), ast.integer(3)]),
        ast.integer(3),
    ))])
}

/// `1()`
fn calling_integer_fails(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.call(ast.integer(1), []))])
}

/// `let a = []; {a: 1}`
fn array_hash_key_fails(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([
        ast.let_statement("a", ast.array([])),
        ast.expression_statement(ast.hash([(ast.identifier("a"), ast.integer(1))])),
    ])
}

/// `len(1)`
fn len_of_integer_fails(ast: AstBuilder<'_>) -> Program<'_> {
    ast.program([ast.expression_statement(ast.call(
        ast.identifier("len"),
        [ast.integer(1)],
    ))])
}

use bumpalo::Bump;

type BumpVec<'a, T> = bumpalo::collections::Vec<'a, T>;

#[derive(Copy, Clone, Debug, PartialEq)]
/// The root of a parsed program.
pub struct Program<'a> {
    pub statements: &'a [Statement<'a>],
}

#[derive(Copy, Clone, Debug, PartialEq)]
/// A statement.
pub enum Statement<'a> {
    /// `let name = value;`
    Let {
        name: &'a str,
        value: &'a Expression<'a>,
    },
    /// `return value;`
    Return(&'a Expression<'a>),
    /// An expression whose value is discarded.
    Expression(&'a Expression<'a>),
}

#[derive(Copy, Clone, Debug, PartialEq)]
/// A braced sequence of statements.
pub struct Block<'a> {
    pub statements: &'a [Statement<'a>],
}

#[derive(Copy, Clone, Debug, PartialEq)]
/// An expression.
///
/// Operators are kept as text. Rejecting operators the backends do not understand is the
/// compiler's job.
pub enum Expression<'a> {
    Identifier(&'a str),
    Integer(i64),
    String(&'a str),
    Boolean(bool),
    Array(&'a [Expression<'a>]),
    Hash(&'a [(Expression<'a>, Expression<'a>)]),
    Prefix {
        operator: &'a str,
        right: &'a Expression<'a>,
    },
    Infix {
        operator: &'a str,
        left: &'a Expression<'a>,
        right: &'a Expression<'a>,
    },
    If {
        condition: &'a Expression<'a>,
        consequence: Block<'a>,
        alternative: Option<Block<'a>>,
    },
    Function {
        parameters: &'a [&'a str],
        body: Block<'a>,
    },
    Call {
        function: &'a Expression<'a>,
        arguments: &'a [Expression<'a>],
    },
    Index {
        left: &'a Expression<'a>,
        index: &'a Expression<'a>,
    },
}

#[derive(Copy, Clone)]
/// Builds AST nodes inside an arena.
///
/// The parser uses this to produce a [`Program`]. It is equally handy for constructing trees by
/// hand.
pub struct AstBuilder<'a> {
    arena: &'a Bump,
}

impl<'a> AstBuilder<'a> {
    /// Creates a builder that allocates in `arena`.
    pub fn new(arena: &'a Bump) -> AstBuilder<'a> {
        AstBuilder { arena }
    }

    fn slice<T>(self, items: impl IntoIterator<Item = T>) -> &'a [T] {
        BumpVec::from_iter_in(items, self.arena).into_bump_slice()
    }

    fn text(self, text: &str) -> &'a str {
        self.arena.alloc_str(text)
    }

    fn node(self, expression: Expression<'a>) -> &'a Expression<'a> {
        self.arena.alloc(expression)
    }

    pub fn program(self, statements: impl IntoIterator<Item = Statement<'a>>) -> Program<'a> {
        Program {
            statements: self.slice(statements),
        }
    }

    pub fn block(self, statements: impl IntoIterator<Item = Statement<'a>>) -> Block<'a> {
        Block {
            statements: self.slice(statements),
        }
    }

    pub fn let_statement(self, name: &str, value: Expression<'a>) -> Statement<'a> {
        Statement::Let {
            name: self.text(name),
            value: self.node(value),
        }
    }

    pub fn return_statement(self, value: Expression<'a>) -> Statement<'a> {
        Statement::Return(self.node(value))
    }

    pub fn expression_statement(self, value: Expression<'a>) -> Statement<'a> {
        Statement::Expression(self.node(value))
    }

    pub fn identifier(self, name: &str) -> Expression<'a> {
        Expression::Identifier(self.text(name))
    }

    pub fn integer(self, value: i64) -> Expression<'a> {
        Expression::Integer(value)
    }

    pub fn string(self, value: &str) -> Expression<'a> {
        Expression::String(self.text(value))
    }

    pub fn boolean(self, value: bool) -> Expression<'a> {
        Expression::Boolean(value)
    }

    pub fn array(self, elements: impl IntoIterator<Item = Expression<'a>>) -> Expression<'a> {
        Expression::Array(self.slice(elements))
    }

    pub fn hash(
        self,
        pairs: impl IntoIterator<Item = (Expression<'a>, Expression<'a>)>,
    ) -> Expression<'a> {
        Expression::Hash(self.slice(pairs))
    }

    pub fn prefix(self, operator: &str, right: Expression<'a>) -> Expression<'a> {
        Expression::Prefix {
            operator: self.text(operator),
            right: self.node(right),
        }
    }

    pub fn infix(
        self,
        left: Expression<'a>,
        operator: &str,
        right: Expression<'a>,
    ) -> Expression<'a> {
        Expression::Infix {
            operator: self.text(operator),
            left: self.node(left),
            right: self.node(right),
        }
    }

    pub fn if_expression(
        self,
        condition: Expression<'a>,
        consequence: Block<'a>,
        alternative: Option<Block<'a>>,
    ) -> Expression<'a> {
        Expression::If {
            condition: self.node(condition),
            consequence,
            alternative,
        }
    }

    pub fn function(self, parameters: &[&str], body: Block<'a>) -> Expression<'a> {
        Expression::Function {
            parameters: self.slice(parameters.iter().map(|p| self.text(p))),
            body,
        }
    }

    pub fn call(
        self,
        function: Expression<'a>,
        arguments: impl IntoIterator<Item = Expression<'a>>,
    ) -> Expression<'a> {
        Expression::Call {
            function: self.node(function),
            arguments: self.slice(arguments),
        }
    }

    pub fn index(self, left: Expression<'a>, index: Expression<'a>) -> Expression<'a> {
        Expression::Index {
            left: self.node(left),
            index: self.node(index),
        }
    }
}

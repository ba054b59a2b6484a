//! Typed AST input surface.
//!
//! The tree this backend consumes. The front end has already resolved source
//! types: every type annotation arrives as a JVM descriptor string. Spans are
//! byte offsets into the original source, carried through to errors.

/// A half-open byte range in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i32),
    Long(i64),
    Double(f64),
    Bool(bool),
    Str(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// A function or closure parameter. `type_annotation` is a descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub type_annotation: Option<String>,
    pub rest: bool,
    pub span: Span,
}

impl Param {
    pub fn new(name: &str, type_annotation: &str) -> Self {
        Self {
            name: name.to_string(),
            type_annotation: Some(type_annotation.to_string()),
            rest: false,
            span: Span::default(),
        }
    }
}

/// One call argument, optionally spread.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub expr: Expr,
    pub spread: bool,
}

impl Arg {
    pub fn plain(expr: Expr) -> Self {
        Self { expr, spread: false }
    }
}

/// What a call expression invokes.
#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    Expr(Box<Expr>),
    Super,
    SuperMember { name: String },
}

/// An arrow body is either a bare expression or a block.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrowBody {
    Expr(Box<Expr>),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Ident(String),
    This,
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: Callee,
        args: Vec<Arg>,
    },
    /// Arrow function literal. Captures the enclosing receiver when its body
    /// uses `this`.
    Arrow {
        params: Vec<Param>,
        body: ArrowBody,
        return_type: Option<String>,
        is_async: bool,
    },
    /// Detached function expression. Has its own `this`, so the enclosing
    /// receiver is never captured.
    Function {
        params: Vec<Param>,
        body: Vec<Stmt>,
        return_type: Option<String>,
        is_async: bool,
        is_generator: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self { kind, span: Span::default() }
    }

    pub fn int(value: i32) -> Self {
        Self::new(ExprKind::Literal(Literal::Int(value)))
    }

    pub fn str(value: &str) -> Self {
        Self::new(ExprKind::Literal(Literal::Str(value.to_string())))
    }

    pub fn ident(name: &str) -> Self {
        Self::new(ExprKind::Ident(name.to_string()))
    }

    pub fn member(object: Expr, property: &str) -> Self {
        Self::new(ExprKind::Member {
            object: Box::new(object),
            property: property.to_string(),
        })
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call {
            callee: Callee::Expr(Box::new(callee)),
            args: args.into_iter().map(Arg::plain).collect(),
        })
    }

    pub fn method_call(object: Expr, property: &str, args: Vec<Expr>) -> Self {
        Self::call(Self::member(object, property), args)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    VarDecl {
        name: String,
        type_annotation: Option<String>,
        init: Option<Expr>,
    },
    Return(Option<Expr>),
    Block(Vec<Stmt>),
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self { kind, span: Span::default() }
    }

    pub fn expr(expr: Expr) -> Self {
        Self::new(StmtKind::Expr(expr))
    }

    pub fn ret(expr: Expr) -> Self {
        Self::new(StmtKind::Return(Some(expr)))
    }
}

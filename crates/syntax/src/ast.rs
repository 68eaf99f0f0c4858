//! Abstract syntax tree
//!
//! Nodes own their children (`Box`/`Vec`); the parent destroys the
//! subtree and there are no cycles. Every node carries a [`Span`] with
//! the 1-indexed line and column of its first token.

use crate::token::PolyglotLiteral;
use crate::types::Type;

/// 1-indexed source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Span { line, column }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
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
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// A function or lambda parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

/// A named function declaration. Lambdas reuse this shape with an empty
/// name.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub type_params: Vec<String>,
    pub params: Vec<Param>,
    /// `Any` when omitted in source; return-type inference runs at
    /// declaration time in that case.
    pub return_type: Type,
    /// True when the return type was written explicitly.
    pub explicit_return: bool,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// One field of a struct declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Type,
    /// `weak` fields are non-owning: the cycle collector does not
    /// traverse them.
    pub weak: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: String,
    pub type_params: Vec<String>,
    pub fields: Vec<FieldDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<String>,
    pub span: Span,
}

/// The path form of a `use` statement.
#[derive(Debug, Clone, PartialEq)]
pub enum UsePath {
    /// `use string` / `use net.http`: a stdlib or file module.
    Module(Vec<String>),
    /// `use BLOCK-PY-00001 >= 1.2, < 2.0`.
    Block {
        id: String,
        /// Raw version-range text, parsed but only enforced as a
        /// deprecation warning.
        version_req: Option<String>,
    },
}

/// Assignment targets: `x = v`, `a[i] = v`, `s.field = v`.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Name(String),
    Index { target: Expr, index: Expr },
    Member { target: Expr, field: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLit {
        value: i64,
        span: Span,
    },
    FloatLit {
        value: f64,
        span: Span,
    },
    StrLit {
        value: String,
        span: Span,
    },
    BoolLit {
        value: bool,
        span: Span,
    },
    NullLit {
        span: Span,
    },
    ArrayLit {
        elements: Vec<Expr>,
        span: Span,
    },
    DictLit {
        entries: Vec<(String, Expr)>,
        span: Span,
    },
    Ident {
        name: String,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Call {
        callee: Box<Expr>,
        type_args: Vec<Type>,
        args: Vec<Expr>,
        span: Span,
    },
    Member {
        target: Box<Expr>,
        field: String,
        span: Span,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    /// `new Pair<int, string> { first: 1, second: "x" }`
    StructLit {
        name: String,
        type_args: Vec<Type>,
        fields: Vec<(String, Expr)>,
        span: Span,
    },
    /// `if cond { a } else { b }` in expression position.
    IfExpr {
        cond: Box<Expr>,
        then_value: Box<Expr>,
        else_value: Box<Expr>,
        span: Span,
    },
    Lambda {
        decl: Box<FunctionDecl>,
        span: Span,
    },
    /// `value |> stage`: the right side is evaluated lazily, after the
    /// left, and receives the left value as its first argument.
    Pipeline {
        value: Box<Expr>,
        stage: Box<Expr>,
        span: Span,
    },
    Polyglot {
        literal: PolyglotLiteral,
        span: Span,
    },
    /// A block identifier in expression position: `BLOCK-PY-00001`.
    BlockUse {
        id: String,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::IntLit { span, .. }
            | Expr::FloatLit { span, .. }
            | Expr::StrLit { span, .. }
            | Expr::BoolLit { span, .. }
            | Expr::NullLit { span }
            | Expr::ArrayLit { span, .. }
            | Expr::DictLit { span, .. }
            | Expr::Ident { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Compare { span, .. }
            | Expr::Logical { span, .. }
            | Expr::Call { span, .. }
            | Expr::Member { span, .. }
            | Expr::Index { span, .. }
            | Expr::StructLit { span, .. }
            | Expr::IfExpr { span, .. }
            | Expr::Lambda { span, .. }
            | Expr::Pipeline { span, .. }
            | Expr::Polyglot { span, .. }
            | Expr::BlockUse { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let {
        name: String,
        is_const: bool,
        declared_type: Option<Type>,
        value: Expr,
        span: Span,
    },
    Assign {
        target: AssignTarget,
        value: Expr,
        span: Span,
    },
    /// A bare `{ ... }` scope.
    Block {
        statements: Vec<Stmt>,
        span: Span,
    },
    If {
        cond: Expr,
        then_block: Vec<Stmt>,
        else_block: Option<Vec<Stmt>>,
        span: Span,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    For {
        var: String,
        iterable: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    Break {
        span: Span,
    },
    Continue {
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Function(FunctionDecl),
    Struct(StructDecl),
    Enum(EnumDecl),
    Use {
        path: UsePath,
        alias: Option<String>,
        span: Span,
    },
    Import {
        path: Vec<String>,
        alias: Option<String>,
        span: Span,
    },
    Export {
        inner: Box<Stmt>,
        span: Span,
    },
    Main {
        body: Vec<Stmt>,
        span: Span,
    },
    Try {
        try_block: Vec<Stmt>,
        catch_name: Option<String>,
        catch_block: Vec<Stmt>,
        finally_block: Option<Vec<Stmt>>,
        span: Span,
    },
    Throw {
        value: Expr,
        span: Span,
    },
    Expr {
        expr: Expr,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Let { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::Block { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::For { span, .. }
            | Stmt::Break { span }
            | Stmt::Continue { span }
            | Stmt::Return { span, .. }
            | Stmt::Use { span, .. }
            | Stmt::Import { span, .. }
            | Stmt::Export { span, .. }
            | Stmt::Main { span, .. }
            | Stmt::Try { span, .. }
            | Stmt::Throw { span, .. }
            | Stmt::Expr { span, .. } => *span,
            Stmt::Function(decl) => decl.span,
            Stmt::Struct(decl) => decl.span,
            Stmt::Enum(decl) => decl.span,
        }
    }
}

/// A parsed source file: top-level items only.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    /// The `main { ... }` body, if the program has one.
    pub fn main_body(&self) -> Option<&[Stmt]> {
        self.statements.iter().find_map(|stmt| match stmt {
            Stmt::Main { body, .. } => Some(body.as_slice()),
            _ => None,
        })
    }
}

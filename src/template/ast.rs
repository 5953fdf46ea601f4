//! Handler IR produced by the parser and interpreted by the runtime.

use std::sync::Arc;

use serde_json::Value;

/// A statement sequence. Shared so async callbacks can hold on to it.
pub type Block = Arc<[Stmt]>;

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Literal markup, printed without escaping.
    Markup(String),
    /// HTML-escaped print.
    Print(Expr),
    /// Unescaped print.
    Echo(Expr),
    Let(String, Expr),
    Assign(String, Expr),
    If {
        cond: Expr,
        then_branch: Block,
        else_branch: Option<Block>,
    },
    For {
        binding: String,
        iterable: Expr,
        body: Block,
    },
    Call(Call),
    Async(AsyncCall),
    /// Run-after block, executed once the ledger drains.
    Defer(Block),
    Throw(Expr),
    Return,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Expr>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AsyncCall {
    pub call: Call,
    pub then: Option<Callback>,
    pub catch: Option<Callback>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Callback {
    pub binding: Option<String>,
    pub body: Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Ne => 3,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Call(Call),
    Index(Box<Expr>, Box<Expr>),
    Field(Box<Expr>, String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

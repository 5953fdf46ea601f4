//! Recursive-descent parser from tokens to the handler IR.

use std::sync::Arc;

use serde_json::Value;

use super::ast::{AsyncCall, BinaryOp, Block, Call, Callback, Expr, Stmt, StmtKind, UnaryOp};
use super::builtins::{self, BuiltinKind};
use super::lexer::{Token, TokenKind};
use super::CompileError;

const KEYWORDS: &[&str] = &[
    "let", "print", "echo", "if", "else", "for", "in", "defer", "throw", "return", "then", "catch",
    "true", "false", "null",
];

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source_name: &'a str,
}

impl<'a> Parser<'a> {
    /// `tokens` must end with an `Eof` token.
    pub fn new(tokens: Vec<Token>, source_name: &'a str) -> Self {
        Self {
            tokens,
            pos: 0,
            source_name,
        }
    }

    pub fn parse_program(mut self) -> Result<Vec<Stmt>, CompileError> {
        let mut stmts = Vec::new();
        loop {
            match self.current().kind.clone() {
                TokenKind::Eof => return Ok(stmts),
                TokenKind::RBrace => return Err(self.error("unexpected '}'")),
                _ => {
                    if let Some(stmt) = self.parse_stmt()? {
                        stmts.push(stmt);
                    }
                }
            }
        }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].kind
    }

    fn bump(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn line(&self) -> usize {
        self.current().line
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(message, Some(self.line()), self.source_name)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), CompileError> {
        if self.current().kind == kind {
            self.bump();
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {}, found {}",
                kind.describe(),
                self.current().kind.describe()
            )))
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(&self.current().kind, TokenKind::Ident(name) if name == word)
    }

    fn expect_name(&mut self) -> Result<String, CompileError> {
        match &self.current().kind {
            TokenKind::Ident(name) if !KEYWORDS.contains(&name.as_str()) => {
                let name = name.clone();
                self.bump();
                Ok(name)
            }
            other => Err(self.error(format!("expected a name, found {}", other.describe()))),
        }
    }

    /// Statements end with `;`, which may be omitted before `}`, markup or the end.
    fn end_simple(&mut self) -> Result<(), CompileError> {
        match self.current().kind.clone() {
            TokenKind::Semi => {
                self.bump();
                Ok(())
            }
            TokenKind::RBrace | TokenKind::Markup(_) | TokenKind::Eof => Ok(()),
            other => Err(self.error(format!(
                "expected ';' after statement, found {}",
                other.describe()
            ))),
        }
    }

    fn parse_block(&mut self) -> Result<Block, CompileError> {
        let opened = self.line();
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        loop {
            match self.current().kind.clone() {
                TokenKind::RBrace => {
                    self.bump();
                    return Ok(Arc::from(stmts));
                }
                TokenKind::Eof => {
                    return Err(CompileError::new(
                        "unclosed '{'",
                        Some(opened),
                        self.source_name,
                    ))
                }
                _ => {
                    if let Some(stmt) = self.parse_stmt()? {
                        stmts.push(stmt);
                    }
                }
            }
        }
    }

    fn parse_stmt(&mut self) -> Result<Option<Stmt>, CompileError> {
        let line = self.line();
        let kind = match self.current().kind.clone() {
            TokenKind::Semi => {
                self.bump();
                return Ok(None);
            }
            TokenKind::Markup(text) => {
                self.bump();
                StmtKind::Markup(text)
            }
            TokenKind::Ident(word) => match word.as_str() {
                "print" | "echo" => {
                    self.bump();
                    let expr = self.parse_expr(0)?;
                    self.end_simple()?;
                    if word == "print" {
                        StmtKind::Print(expr)
                    } else {
                        StmtKind::Echo(expr)
                    }
                }
                "let" => {
                    self.bump();
                    let name = self.expect_name()?;
                    self.expect(TokenKind::Assign)?;
                    let expr = self.parse_expr(0)?;
                    self.end_simple()?;
                    StmtKind::Let(name, expr)
                }
                "if" => self.parse_if()?,
                "for" => {
                    self.bump();
                    let binding = self.expect_name()?;
                    if !self.is_keyword("in") {
                        return Err(self.error("expected 'in' after loop variable"));
                    }
                    self.bump();
                    let iterable = self.parse_expr(0)?;
                    let body = self.parse_block()?;
                    StmtKind::For {
                        binding,
                        iterable,
                        body,
                    }
                }
                "defer" => {
                    self.bump();
                    StmtKind::Defer(self.parse_block()?)
                }
                "throw" => {
                    self.bump();
                    let expr = self.parse_expr(0)?;
                    self.end_simple()?;
                    StmtKind::Throw(expr)
                }
                "return" => {
                    self.bump();
                    self.end_simple()?;
                    StmtKind::Return
                }
                "then" | "catch" => {
                    return Err(self.error(format!(
                        "'{word}' must follow an asynchronous call"
                    )))
                }
                "else" => return Err(self.error("'else' without 'if'")),
                _ if *self.peek() == TokenKind::Assign => {
                    let name = self.expect_name()?;
                    self.bump();
                    let expr = self.parse_expr(0)?;
                    self.end_simple()?;
                    StmtKind::Assign(name, expr)
                }
                _ if *self.peek() == TokenKind::LParen => self.parse_call_stmt()?,
                _ => return Err(self.error(format!("expected a statement, found '{word}'"))),
            },
            other => {
                return Err(self.error(format!(
                    "expected a statement, found {}",
                    other.describe()
                )))
            }
        };
        Ok(Some(Stmt { kind, line }))
    }

    fn parse_if(&mut self) -> Result<StmtKind, CompileError> {
        self.bump(); // consume if
        let cond = self.parse_expr(0)?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.is_keyword("else") {
            self.bump();
            if self.is_keyword("if") {
                let line = self.line();
                let nested = self.parse_if()?;
                Some(Arc::from(vec![Stmt { kind: nested, line }]))
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(StmtKind::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_call_stmt(&mut self) -> Result<StmtKind, CompileError> {
        let call = self.parse_call()?;
        let kind = builtins::lookup(&call.name).map(|b| b.kind);
        if kind != Some(BuiltinKind::Async) {
            if self.is_keyword("then") || self.is_keyword("catch") {
                return Err(self.error(format!("'{}' is not asynchronous", call.name)));
            }
            self.end_simple()?;
            return Ok(StmtKind::Call(call));
        }

        let mut then = None;
        let mut catch = None;
        loop {
            if self.is_keyword("then") && then.is_none() {
                self.bump();
                then = Some(self.parse_callback()?);
            } else if self.is_keyword("catch") && catch.is_none() {
                self.bump();
                catch = Some(self.parse_callback()?);
            } else {
                break;
            }
        }
        if then.is_none() && catch.is_none() {
            self.end_simple()?;
        }
        Ok(StmtKind::Async(AsyncCall { call, then, catch }))
    }

    fn parse_callback(&mut self) -> Result<Callback, CompileError> {
        let binding = if self.current().kind == TokenKind::LBrace {
            None
        } else {
            Some(self.expect_name()?)
        };
        let body = self.parse_block()?;
        Ok(Callback { binding, body })
    }

    /// Parses `name(args)` and checks it against the builtin table.
    fn parse_call(&mut self) -> Result<Call, CompileError> {
        let line = self.line();
        let name = self.expect_name()?;
        let Some(spec) = builtins::lookup(&name) else {
            return Err(CompileError::new(
                format!("unknown function '{name}'"),
                Some(line),
                self.source_name,
            ));
        };
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        while self.current().kind != TokenKind::RParen {
            args.push(self.parse_expr(0)?);
            if self.current().kind == TokenKind::Comma {
                self.bump();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;

        if args.len() < spec.min_args || args.len() > spec.max_args {
            let expected = if spec.min_args == spec.max_args {
                spec.min_args.to_string()
            } else {
                format!("{} to {}", spec.min_args, spec.max_args)
            };
            return Err(CompileError::new(
                format!(
                    "'{name}' takes {expected} argument(s), {} given",
                    args.len()
                ),
                Some(line),
                self.source_name,
            ));
        }
        Ok(Call { name, args, line })
    }

    fn binary_op(&self) -> Option<BinaryOp> {
        Some(match self.current().kind {
            TokenKind::OrOr => BinaryOp::Or,
            TokenKind::AndAnd => BinaryOp::And,
            TokenKind::EqEq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Rem,
            _ => return None,
        })
    }

    fn parse_expr(&mut self, min_prec: u8) -> Result<Expr, CompileError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.binary_op() {
            let prec = op.precedence();
            if prec <= min_prec {
                break;
            }
            self.bump();
            let right = self.parse_expr(prec)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        match self.current().kind.clone() {
            TokenKind::Bang => {
                self.bump();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
            }
            TokenKind::Minus => {
                self.bump();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.current().kind.clone() {
                TokenKind::Dot => {
                    self.bump();
                    let field = match self.bump().kind {
                        TokenKind::Ident(name) => name,
                        other => {
                            return Err(self.error(format!(
                                "expected a field name, found {}",
                                other.describe()
                            )))
                        }
                    };
                    expr = Expr::Field(Box::new(expr), field);
                }
                TokenKind::LBracket => {
                    self.bump();
                    let index = self.parse_expr(0)?;
                    self.expect(TokenKind::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        match self.current().kind.clone() {
            TokenKind::Num(n) => {
                self.bump();
                Ok(Expr::Literal(number(n)))
            }
            TokenKind::Str(s) => {
                self.bump();
                Ok(Expr::Literal(Value::String(s)))
            }
            TokenKind::Ident(word) => match word.as_str() {
                "true" | "false" => {
                    self.bump();
                    Ok(Expr::Literal(Value::Bool(word == "true")))
                }
                "null" => {
                    self.bump();
                    Ok(Expr::Literal(Value::Null))
                }
                _ if *self.peek() == TokenKind::LParen => {
                    let call = self.parse_call()?;
                    if builtins::lookup(&call.name).map(|b| b.kind) == Some(BuiltinKind::Async) {
                        return Err(CompileError::new(
                            format!(
                                "'{}' is asynchronous and cannot be used as a value",
                                call.name
                            ),
                            Some(call.line),
                            self.source_name,
                        ));
                    }
                    Ok(Expr::Call(call))
                }
                _ => Ok(Expr::Var(self.expect_name()?)),
            },
            TokenKind::LParen => {
                self.bump();
                let expr = self.parse_expr(0)?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.bump();
                let mut items = Vec::new();
                while self.current().kind != TokenKind::RBracket {
                    items.push(self.parse_expr(0)?);
                    if self.current().kind == TokenKind::Comma {
                        self.bump();
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Ok(Expr::List(items))
            }
            TokenKind::LBrace => {
                self.bump();
                let mut entries = Vec::new();
                while self.current().kind != TokenKind::RBrace {
                    let key = match self.bump().kind {
                        TokenKind::Str(key) | TokenKind::Ident(key) => key,
                        other => {
                            return Err(self.error(format!(
                                "expected a map key, found {}",
                                other.describe()
                            )))
                        }
                    };
                    self.expect(TokenKind::Colon)?;
                    entries.push((key, self.parse_expr(0)?));
                    if self.current().kind == TokenKind::Comma {
                        self.bump();
                    } else {
                        break;
                    }
                }
                self.expect(TokenKind::RBrace)?;
                Ok(Expr::Map(entries))
            }
            other => Err(self.error(format!(
                "expected an expression, found {}",
                other.describe()
            ))),
        }
    }
}

/// Whole numbers are kept as integers so they print without a fraction.
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

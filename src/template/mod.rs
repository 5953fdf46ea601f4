//! Template compiler.
//!
//! # Data Flow
//! ```text
//! source document (.jscp)
//!     → scanner.rs (markup/script regions, escapes, warnings)
//!     → lexer.rs (script tokens; markup regions become single tokens)
//!     → parser.rs (statement tree, builtin arity checks)
//!     → CompiledHandler (immutable IR, shared via Arc)
//!     → interpreted per request by runtime::interpreter
//! ```
//!
//! # Design Decisions
//! - No code generation: the handler is a statement tree walked at runtime
//! - Markup is tokenised inside the script stream, so a `{` opened in one
//!   script region may be closed in a later one
//! - Every compile failure carries a line number when one is derivable

pub mod ast;
pub mod builtins;
pub mod lexer;
pub mod parser;
pub mod scanner;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use self::ast::{Block, Stmt};
use self::lexer::{Token, TokenKind};
use self::parser::Parser;
pub use self::scanner::Markers;
use self::scanner::SegmentKind;

/// Renders an optional source line, `(unknown)` when absent.
pub struct LineLabel(pub Option<usize>);

impl LineLabel {
    pub fn of(line: &Option<usize>) -> Self {
        Self(*line)
    }
}

impl fmt::Display for LineLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(line) => write!(f, "{line}"),
            None => f.write_str("(unknown)"),
        }
    }
}

/// A source document that failed to produce a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{source_name}:{}: {message}", LineLabel::of(.line))]
pub struct CompileError {
    pub message: String,
    pub line: Option<usize>,
    pub source_name: String,
}

impl CompileError {
    pub fn new(message: impl Into<String>, line: Option<usize>, source_name: &str) -> Self {
        Self {
            message: message.into(),
            line,
            source_name: source_name.to_string(),
        }
    }
}

/// A non-fatal observation made while compiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileWarning {
    pub message: String,
    pub line: usize,
}

/// An executable unit produced once from one source document.
#[derive(Debug)]
pub struct CompiledHandler {
    name: String,
    program: Block,
    warnings: Vec<CompileWarning>,
}

impl CompiledHandler {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> &Block {
        &self.program
    }

    pub fn warnings(&self) -> &[CompileWarning] {
        &self.warnings
    }
}

/// Compile with the default `<?` / `?>` markers.
pub fn compile(source: &str, name: &str) -> Result<Arc<CompiledHandler>, CompileError> {
    compile_with(source, name, &Markers::default())
}

pub fn compile_with(
    source: &str,
    name: &str,
    markers: &Markers,
) -> Result<Arc<CompiledHandler>, CompileError> {
    let scan = scanner::scan(source, markers, name)?;

    let mut tokens = Vec::new();
    let mut last_line = 1;
    for segment in scan.segments {
        last_line = segment.line;
        match segment.kind {
            SegmentKind::Markup => tokens.push(Token {
                kind: TokenKind::Markup(segment.text),
                line: segment.line,
            }),
            SegmentKind::Script => lexer::tokenize(&segment.text, segment.line, name, &mut tokens)?,
        }
    }
    let eof_line = tokens.last().map(|t| t.line).unwrap_or(last_line);
    tokens.push(Token {
        kind: TokenKind::Eof,
        line: eof_line,
    });

    let stmts: Vec<Stmt> = Parser::new(tokens, name).parse_program()?;

    for warning in &scan.warnings {
        tracing::warn!(
            handler = %name,
            line = warning.line,
            "{}",
            warning.message
        );
    }

    Ok(Arc::new(CompiledHandler {
        name: name.to_string(),
        program: Arc::from(stmts),
        warnings: scan.warnings,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ast::StmtKind;

    #[test]
    fn test_empty_document() {
        let handler = compile("", "empty.jscp").unwrap();
        assert!(handler.program().is_empty());
    }

    #[test]
    fn test_markup_only() {
        let handler = compile("<h1>Hi</h1>", "t").unwrap();
        assert_eq!(handler.program().len(), 1);
        assert_eq!(
            handler.program()[0].kind,
            StmtKind::Markup("<h1>Hi</h1>".into())
        );
    }

    #[test]
    fn test_block_spans_regions() {
        let source = "<? if param('x') { ?><b>yes</b><? } else { ?>no<? } ?>";
        let handler = compile(source, "t").unwrap();
        assert_eq!(handler.program().len(), 1);
        assert!(matches!(handler.program()[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = compile("<p>\n<? print ( ?>", "page.jscp").unwrap_err();
        assert_eq!(err.line, Some(2));
        assert!(err.to_string().starts_with("page.jscp:2: "));

        let err = CompileError::new("boom", None, "page.jscp");
        assert_eq!(err.to_string(), "page.jscp:(unknown): boom");
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let source = "a<? let x = 1; print x + 2 ?>b";
        let first = compile(source, "t").unwrap();
        let second = compile(source, "t").unwrap();
        assert_eq!(first.program(), second.program());
    }
}

//! Script tokenizer.

use super::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Num(f64),
    /// A whole markup region, spliced into the script token stream.
    Markup(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Dot,
    Colon,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,
    Eof,
}

impl TokenKind {
    /// Short human-readable form for error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("'{name}'"),
            TokenKind::Str(_) => "string".to_string(),
            TokenKind::Num(n) => format!("number {n}"),
            TokenKind::Markup(_) => "markup".to_string(),
            TokenKind::Eof => "end of document".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Semi => ";",
            TokenKind::Dot => ".",
            TokenKind::Colon => ":",
            TokenKind::Assign => "=",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Bang => "!",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            _ => "?",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    source_name: &'a str,
}

impl<'a> Lexer<'a> {
    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(message, Some(self.line), self.source_name)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), CompileError> {
        let start = self.line;
        while let Some(c) = self.bump() {
            if c == '*' && self.eat('/') {
                return Ok(());
            }
        }
        Err(CompileError::new(
            "unterminated comment",
            Some(start),
            self.source_name,
        ))
    }

    fn string(&mut self, quote: char) -> Result<TokenKind, CompileError> {
        let start = self.line;
        let mut value = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(CompileError::new(
                        "unterminated string",
                        Some(start),
                        self.source_name,
                    ))
                }
                Some(c) if c == quote => return Ok(TokenKind::Str(value)),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some(other) => value.push(other),
                    None => {
                        return Err(CompileError::new(
                            "unterminated string",
                            Some(start),
                            self.source_name,
                        ))
                    }
                },
                Some(c) => value.push(c),
            }
        }
    }

    fn number(&mut self, first: char) -> Result<TokenKind, CompileError> {
        let mut text = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '.' || c == '_' {
                if c != '_' {
                    text.push(c);
                }
                self.bump();
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map(TokenKind::Num)
            .map_err(|_| self.error(format!("invalid number '{text}'")))
    }

    fn ident(&mut self, first: char) -> TokenKind {
        let mut name = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        TokenKind::Ident(name)
    }

    fn next_token(&mut self) -> Result<Option<Token>, CompileError> {
        loop {
            let Some(c) = self.bump() else {
                return Ok(None);
            };
            let line = self.line;
            let kind = match c {
                c if c.is_whitespace() => continue,
                '/' if self.eat('/') => {
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                    continue;
                }
                '/' if self.eat('*') => {
                    self.skip_block_comment()?;
                    continue;
                }
                '"' | '\'' => self.string(c)?,
                c if c.is_ascii_digit() => self.number(c)?,
                c if c.is_alphabetic() || c == '_' => self.ident(c),
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                '{' => TokenKind::LBrace,
                '}' => TokenKind::RBrace,
                '[' => TokenKind::LBracket,
                ']' => TokenKind::RBracket,
                ',' => TokenKind::Comma,
                ';' => TokenKind::Semi,
                '.' => TokenKind::Dot,
                ':' => TokenKind::Colon,
                '+' => TokenKind::Plus,
                '-' => TokenKind::Minus,
                '*' => TokenKind::Star,
                '/' => TokenKind::Slash,
                '%' => TokenKind::Percent,
                '=' if self.eat('=') => TokenKind::EqEq,
                '=' => TokenKind::Assign,
                '!' if self.eat('=') => TokenKind::NotEq,
                '!' => TokenKind::Bang,
                '<' if self.eat('=') => TokenKind::Le,
                '<' => TokenKind::Lt,
                '>' if self.eat('=') => TokenKind::Ge,
                '>' => TokenKind::Gt,
                '&' if self.eat('&') => TokenKind::AndAnd,
                '|' if self.eat('|') => TokenKind::OrOr,
                other => return Err(self.error(format!("unexpected character '{other}'"))),
            };
            return Ok(Some(Token { kind, line }));
        }
    }
}

/// Tokenize one script region starting at `start_line`, appending to `out`.
pub fn tokenize(
    text: &str,
    start_line: usize,
    source_name: &str,
    out: &mut Vec<Token>,
) -> Result<(), CompileError> {
    let mut lexer = Lexer {
        chars: text.chars().peekable(),
        line: start_line,
        source_name,
    };
    while let Some(token) = lexer.next_token()? {
        out.push(token);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        let mut out = Vec::new();
        tokenize(text, 1, "t", &mut out).unwrap();
        out.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_operators_and_literals() {
        assert_eq!(
            kinds("let x = 'a\\n' + 1.5; x <= 2 && !y"),
            vec![
                TokenKind::Ident("let".into()),
                TokenKind::Ident("x".into()),
                TokenKind::Assign,
                TokenKind::Str("a\n".into()),
                TokenKind::Plus,
                TokenKind::Num(1.5),
                TokenKind::Semi,
                TokenKind::Ident("x".into()),
                TokenKind::Le,
                TokenKind::Num(2.0),
                TokenKind::AndAnd,
                TokenKind::Bang,
                TokenKind::Ident("y".into()),
            ]
        );
    }

    #[test]
    fn test_comments_and_lines() {
        let mut out = Vec::new();
        tokenize("// one\n/* two\n */ a", 5, "t", &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].line, 7);
    }

    #[test]
    fn test_unterminated_string() {
        let mut out = Vec::new();
        let err = tokenize("\n\"abc", 1, "t", &mut out).unwrap_err();
        assert_eq!(err.line, Some(2));
    }
}

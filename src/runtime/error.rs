use thiserror::Error;

use crate::template::LineLabel;

/// An error raised by handler code, synchronously or inside a callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{source_name}:{}: {message}", LineLabel::of(.line))]
pub struct RuntimeError {
    pub message: String,
    pub line: Option<usize>,
    pub source_name: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            source_name: "(unknown)".to_string(),
        }
    }

    /// Attach a line if none is known yet; the innermost position wins.
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    pub fn in_source(mut self, name: &str) -> Self {
        if self.source_name == "(unknown)" {
            self.source_name = name.to_string();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_fallback() {
        let err = RuntimeError::new("x is not defined");
        assert_eq!(err.to_string(), "(unknown):(unknown): x is not defined");

        let err = err.at_line(4).at_line(9).in_source("index.jscp");
        assert_eq!(err.to_string(), "index.jscp:4: x is not defined");
    }
}

//! Parse-time errors
//!
//! Parse errors share the interpreter-wide [`ErrorKind`] taxonomy so that
//! tooling can group diagnostics uniformly with runtime errors.

use naab_core::ErrorKind;
use std::fmt;

/// An error produced by the lexer or the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub kind: ErrorKind,
    pub message: String,
    /// 1-indexed line.
    pub line: usize,
    /// 1-indexed column.
    pub column: usize,
    /// Optional fix-it hint shown after the message.
    pub hint: Option<String>,
}

impl ParseError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, line: usize, column: usize) -> Self {
        ParseError {
            kind,
            message: message.into(),
            line,
            column,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at line {}, column {}: {}",
            self.kind, self.line, self.column, self.message
        )?;
        if let Some(hint) = &self.hint {
            write!(f, ". Help: {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_hint() {
        let err = ParseError::new(ErrorKind::MisplacedStatement, "'let' at top level", 3, 1)
            .with_hint("only use, import, export, struct, enum, function, and main may appear at top level");
        let rendered = err.to_string();
        assert!(rendered.starts_with("MisplacedStatement at line 3, column 1"));
        assert!(rendered.contains("Help:"));
    }

    #[test]
    fn test_display_without_hint() {
        let err = ParseError::new(ErrorKind::SyntaxError, "unexpected ')'", 1, 9);
        assert_eq!(
            err.to_string(),
            "SyntaxError at line 1, column 9: unexpected ')'"
        );
    }
}

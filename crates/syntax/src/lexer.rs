//! Lexer
//!
//! Hand-rolled scanner producing [`Token`]s with 1-indexed positions.
//!
//! Newline handling: a newline at paren/bracket depth zero is a statement
//! separator and becomes a `Newline` token; inside `(...)` or `[...]`
//! newlines are suppressed so expressions can wrap.
//!
//! Polyglot literals are captured whole here, body verbatim. The close
//! marker `>>` only counts at column 1; a mid-line `>>` is body text.

use crate::error::ParseError;
use crate::token::{PolyglotLiteral, Token, TokenKind, is_reserved};
use naab_core::ErrorKind;

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    /// Combined paren + bracket nesting; newlines are suppressed when > 0.
    group_depth: usize,
    tokens: Vec<Token>,
}

/// Tokenize a source file.
pub fn lex(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
        group_depth: 0,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn run(&mut self) -> Result<(), ParseError> {
        while !self.at_end() {
            self.scan_token()?;
        }
        self.push_simple(TokenKind::Eof, "");
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> char {
        self.chars.get(self.pos).copied().unwrap_or('\0')
    }

    fn peek_at(&self, offset: usize) -> char {
        self.chars.get(self.pos + offset).copied().unwrap_or('\0')
    }

    fn advance(&mut self) -> char {
        let c = self.peek();
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn matches(&mut self, expected: char) -> bool {
        if self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn push(&mut self, kind: TokenKind, lexeme: impl Into<String>, line: usize, column: usize) {
        self.tokens.push(Token::new(kind, lexeme, line, column));
    }

    fn push_simple(&mut self, kind: TokenKind, lexeme: &str) {
        let line = self.line;
        let column = self.column.saturating_sub(lexeme.chars().count().max(1));
        self.push(kind, lexeme, line, column.max(1));
    }

    fn error(&self, kind: ErrorKind, message: impl Into<String>) -> ParseError {
        ParseError::new(kind, message, self.line, self.column)
    }

    fn scan_token(&mut self) -> Result<(), ParseError> {
        let line = self.line;
        let column = self.column;
        let c = self.advance();
        match c {
            ' ' | '\t' | '\r' => {}
            '\n' => {
                if self.group_depth == 0
                    && !matches!(
                        self.tokens.last().map(|t| &t.kind),
                        Some(TokenKind::Newline) | None
                    )
                {
                    self.push(TokenKind::Newline, "\\n", line, column);
                }
            }
            '/' => {
                if self.matches('/') {
                    while !self.at_end() && self.peek() != '\n' {
                        self.advance();
                    }
                } else {
                    self.push(TokenKind::Slash, "/", line, column);
                }
            }
            '+' => self.push(TokenKind::Plus, "+", line, column),
            '-' => {
                if self.matches('>') {
                    self.push(TokenKind::Arrow, "->", line, column);
                } else {
                    self.push(TokenKind::Minus, "-", line, column);
                }
            }
            '*' => self.push(TokenKind::Star, "*", line, column),
            '%' => self.push(TokenKind::Percent, "%", line, column),
            '=' => {
                if self.matches('=') {
                    self.push(TokenKind::Eq, "==", line, column);
                } else if self.matches('>') {
                    self.push(TokenKind::FatArrow, "=>", line, column);
                } else {
                    self.push(TokenKind::Assign, "=", line, column);
                }
            }
            '!' => {
                if self.matches('=') {
                    self.push(TokenKind::NotEq, "!=", line, column);
                } else {
                    self.push(TokenKind::Bang, "!", line, column);
                }
            }
            '<' => {
                if self.peek() == '<' && (self.peek_at(1).is_ascii_alphabetic()) {
                    self.advance(); // second '<'
                    self.scan_polyglot(line, column)?;
                } else if self.matches('=') {
                    self.push(TokenKind::LtEq, "<=", line, column);
                } else {
                    self.push(TokenKind::Lt, "<", line, column);
                }
            }
            '>' => {
                if self.matches('=') {
                    self.push(TokenKind::GtEq, ">=", line, column);
                } else {
                    self.push(TokenKind::Gt, ">", line, column);
                }
            }
            '&' => {
                if self.matches('&') {
                    self.push(TokenKind::AndAnd, "&&", line, column);
                } else {
                    return Err(self.error(ErrorKind::SyntaxError, "unexpected '&'"));
                }
            }
            '|' => {
                if self.matches('|') {
                    self.push(TokenKind::OrOr, "||", line, column);
                } else if self.matches('>') {
                    self.push(TokenKind::PipeGt, "|>", line, column);
                } else {
                    self.push(TokenKind::Pipe, "|", line, column);
                }
            }
            '?' => self.push(TokenKind::Question, "?", line, column),
            '.' => self.push(TokenKind::Dot, ".", line, column),
            ',' => self.push(TokenKind::Comma, ",", line, column),
            ':' => self.push(TokenKind::Colon, ":", line, column),
            ';' => self.push(TokenKind::Semicolon, ";", line, column),
            '(' => {
                self.group_depth += 1;
                self.push(TokenKind::LParen, "(", line, column);
            }
            ')' => {
                self.group_depth = self.group_depth.saturating_sub(1);
                self.push(TokenKind::RParen, ")", line, column);
            }
            '[' => {
                self.group_depth += 1;
                self.push(TokenKind::LBracket, "[", line, column);
            }
            ']' => {
                self.group_depth = self.group_depth.saturating_sub(1);
                self.push(TokenKind::RBracket, "]", line, column);
            }
            '{' => self.push(TokenKind::LBrace, "{", line, column),
            '}' => self.push(TokenKind::RBrace, "}", line, column),
            '"' | '\'' => self.scan_string(c, line, column)?,
            c if c.is_ascii_digit() => self.scan_number(c, line, column)?,
            c if c.is_ascii_alphabetic() || c == '_' => self.scan_word(c, line, column),
            other => {
                return Err(self.error(
                    ErrorKind::SyntaxError,
                    format!("unexpected character '{}'", other),
                ));
            }
        }
        Ok(())
    }

    fn scan_string(&mut self, quote: char, line: usize, column: usize) -> Result<(), ParseError> {
        let mut value = String::new();
        loop {
            if self.at_end() {
                return Err(ParseError::new(
                    ErrorKind::SyntaxError,
                    "unclosed string literal",
                    line,
                    column,
                ));
            }
            let c = self.advance();
            if c == quote {
                break;
            }
            if c == '\n' {
                return Err(ParseError::new(
                    ErrorKind::SyntaxError,
                    "string literal crosses a line boundary",
                    line,
                    column,
                ));
            }
            if c == '\\' {
                let escaped = self.advance();
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '0' => value.push('\0'),
                    '\\' => value.push('\\'),
                    '"' => value.push('"'),
                    '\'' => value.push('\''),
                    other => {
                        return Err(self.error(
                            ErrorKind::SyntaxError,
                            format!("unknown escape '\\{}'", other),
                        ));
                    }
                }
            } else {
                value.push(c);
            }
        }
        let lexeme = value.clone();
        self.push(TokenKind::Str(value), lexeme, line, column);
        Ok(())
    }

    fn scan_number(&mut self, first: char, line: usize, column: usize) -> Result<(), ParseError> {
        let mut text = String::new();
        text.push(first);
        while self.peek().is_ascii_digit() || self.peek() == '_' {
            let c = self.advance();
            if c != '_' {
                text.push(c);
            }
        }
        // A '.' only makes this a float when a digit follows; `1.foo` is
        // member access on an int.
        if self.peek() == '.' && self.peek_at(1).is_ascii_digit() {
            text.push(self.advance()); // '.'
            while self.peek().is_ascii_digit() || self.peek() == '_' {
                let c = self.advance();
                if c != '_' {
                    text.push(c);
                }
            }
            let value: f64 = text.parse().map_err(|_| {
                ParseError::new(
                    ErrorKind::SyntaxError,
                    format!("malformed float literal '{}'", text),
                    line,
                    column,
                )
            })?;
            self.push(TokenKind::Float(value), text, line, column);
        } else {
            let value: i64 = text.parse().map_err(|_| {
                ParseError::new(
                    ErrorKind::Overflow,
                    format!("integer literal '{}' does not fit in 64 bits", text),
                    line,
                    column,
                )
            })?;
            self.push(TokenKind::Int(value), text, line, column);
        }
        Ok(())
    }

    fn scan_word(&mut self, first: char, line: usize, column: usize) {
        let mut text = String::new();
        text.push(first);
        while self.peek().is_ascii_alphanumeric() || self.peek() == '_' {
            text.push(self.advance());
        }

        // Block identifiers (`BLOCK-PY-00001`) are a single token. Only
        // commit when the full shape matches; otherwise `BLOCK` stays an
        // ordinary identifier and '-' lexes as minus.
        if text == "BLOCK" && self.peek() == '-' {
            if let Some(id) = self.try_scan_block_id() {
                let full = format!("BLOCK{}", id);
                self.push(TokenKind::BlockId(full.clone()), full, line, column);
                return;
            }
        }

        if is_reserved(&text) {
            self.push(TokenKind::Keyword(text.clone()), text, line, column);
        } else {
            self.push(TokenKind::Ident(text.clone()), text, line, column);
        }
    }

    /// Attempt `-[A-Z]+-\d{5}` at the current position. Restores the
    /// scanner on failure.
    fn try_scan_block_id(&mut self) -> Option<String> {
        let saved = (self.pos, self.line, self.column);
        let mut suffix = String::new();

        suffix.push(self.advance()); // '-'
        let mut letters = 0;
        while self.peek().is_ascii_uppercase() {
            suffix.push(self.advance());
            letters += 1;
        }
        let shape_ok = letters > 0 && self.peek() == '-';
        if shape_ok {
            suffix.push(self.advance()); // second '-'
            let mut digits = 0;
            while self.peek().is_ascii_digit() {
                suffix.push(self.advance());
                digits += 1;
            }
            if digits == 5 {
                return Some(suffix);
            }
        }
        (self.pos, self.line, self.column) = saved;
        None
    }

    /// Scan `<<lang[bindings]` + verbatim body + column-1 `>>`.
    /// Called with both '<' already consumed.
    fn scan_polyglot(&mut self, line: usize, column: usize) -> Result<(), ParseError> {
        let mut language = String::new();
        while self.peek().is_ascii_alphanumeric() {
            language.push(self.advance());
        }
        if language.is_empty() {
            return Err(ParseError::new(
                ErrorKind::MalformedPolyglotBlock,
                "expected a language name after '<<'",
                line,
                column,
            ));
        }
        let language = language.to_lowercase();

        let mut bindings = Vec::new();
        if self.peek() == '[' {
            self.advance();
            loop {
                while self.peek() == ' ' || self.peek() == '\t' {
                    self.advance();
                }
                if self.peek() == ']' {
                    self.advance();
                    break;
                }
                let mut name = String::new();
                while self.peek().is_ascii_alphanumeric() || self.peek() == '_' {
                    name.push(self.advance());
                }
                if name.is_empty() {
                    return Err(self.error(
                        ErrorKind::MalformedPolyglotBlock,
                        format!("malformed binding list in <<{} block", language),
                    ));
                }
                bindings.push(name);
                while self.peek() == ' ' || self.peek() == '\t' {
                    self.advance();
                }
                if self.peek() == ',' {
                    self.advance();
                } else if self.peek() != ']' {
                    return Err(self.error(
                        ErrorKind::MalformedPolyglotBlock,
                        "expected ',' or ']' in binding list",
                    ));
                }
            }
        }

        // Rest of the opener line must be blank.
        while self.peek() == ' ' || self.peek() == '\t' || self.peek() == '\r' {
            self.advance();
        }
        if self.at_end() {
            return Err(ParseError::new(
                ErrorKind::MalformedPolyglotBlock,
                format!("<<{} block is never closed (expected '>>' at column 1)", language),
                line,
                column,
            ));
        }
        if self.peek() != '\n' {
            return Err(self.error(
                ErrorKind::MalformedPolyglotBlock,
                format!("unexpected text after <<{} opener", language),
            ));
        }
        self.advance(); // consume opener newline

        // Capture body lines until a line that BEGINS with '>>'.
        let mut body = String::new();
        loop {
            if self.at_end() {
                return Err(ParseError::new(
                    ErrorKind::MalformedPolyglotBlock,
                    format!("<<{} block is never closed (expected '>>' at column 1)", language),
                    line,
                    column,
                ));
            }
            // At this point we are at column 1 of a body or marker line.
            if self.peek() == '>' && self.peek_at(1) == '>' {
                self.advance();
                self.advance();
                break;
            }
            // Copy one whole line verbatim, including its newline.
            loop {
                if self.at_end() {
                    break;
                }
                let c = self.advance();
                body.push(c);
                if c == '\n' {
                    break;
                }
            }
        }

        self.push(
            TokenKind::Polyglot(PolyglotLiteral {
                language: language.clone(),
                bindings,
                body,
            }),
            format!("<<{}", language),
            line,
            column,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_let() {
        let toks = lex("let a = 10").unwrap();
        assert!(toks[0].is_keyword("let"));
        assert_eq!(toks[1].kind, TokenKind::Ident("a".into()));
        assert_eq!(toks[2].kind, TokenKind::Assign);
        assert_eq!(toks[3].kind, TokenKind::Int(10));
    }

    #[test]
    fn test_positions_are_one_indexed() {
        let toks = lex("let a = 10").unwrap();
        assert_eq!((toks[0].line, toks[0].column), (1, 1));
        assert_eq!((toks[1].line, toks[1].column), (1, 5));
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a <= b != c |> d"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::LtEq,
                TokenKind::Ident("b".into()),
                TokenKind::NotEq,
                TokenKind::Ident("c".into()),
                TokenKind::PipeGt,
                TokenKind::Ident("d".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_float_vs_member_access() {
        assert!(matches!(kinds("1.5")[0], TokenKind::Float(_)));
        assert_eq!(
            kinds("x.len")[1],
            TokenKind::Dot,
            "dot after identifier is member access"
        );
    }

    #[test]
    fn test_string_escapes() {
        let toks = lex(r#""a\nb" 'c\'d'"#).unwrap();
        assert_eq!(toks[0].kind, TokenKind::Str("a\nb".into()));
        assert_eq!(toks[1].kind, TokenKind::Str("c'd".into()));
    }

    #[test]
    fn test_unclosed_string() {
        let err = lex("\"abc").unwrap_err();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
    }

    #[test]
    fn test_newlines_suppressed_in_groups() {
        let toks = kinds("f(\n  1,\n  2\n)");
        assert!(!toks.contains(&TokenKind::Newline));
    }

    #[test]
    fn test_block_id_token() {
        let toks = lex("use BLOCK-PY-00001 as adder").unwrap();
        assert_eq!(toks[1].kind, TokenKind::BlockId("BLOCK-PY-00001".into()));
    }

    #[test]
    fn test_block_prefix_without_id_shape() {
        // `BLOCK-3` is not a block id; it lexes as ident minus int.
        let toks = kinds("BLOCK-3");
        assert_eq!(toks[0], TokenKind::Ident("BLOCK".into()));
        assert_eq!(toks[1], TokenKind::Minus);
    }

    #[test]
    fn test_polyglot_literal() {
        let source = "let s = <<python[a, b]\na + b\n>>\n";
        let toks = lex(source).unwrap();
        let poly = toks
            .iter()
            .find_map(|t| match &t.kind {
                TokenKind::Polyglot(p) => Some(p.clone()),
                _ => None,
            })
            .expect("polyglot token");
        assert_eq!(poly.language, "python");
        assert_eq!(poly.bindings, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(poly.body, "a + b\n");
    }

    #[test]
    fn test_polyglot_midline_marker_does_not_close() {
        let source = "let s = <<python\nx = \"a >> b\"\nprint(x)\n>>\n";
        let toks = lex(source).unwrap();
        let poly = toks
            .iter()
            .find_map(|t| match &t.kind {
                TokenKind::Polyglot(p) => Some(p.clone()),
                _ => None,
            })
            .expect("polyglot token");
        assert_eq!(poly.body, "x = \"a >> b\"\nprint(x)\n");
    }

    #[test]
    fn test_polyglot_unterminated() {
        let err = lex("let s = <<python\nx = 1\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedPolyglotBlock);
    }

    #[test]
    fn test_polyglot_without_bindings() {
        let toks = lex("<<shell\nls\n>>\n").unwrap();
        match &toks[0].kind {
            TokenKind::Polyglot(p) => {
                assert_eq!(p.language, "shell");
                assert!(p.bindings.is_empty());
            }
            other => panic!("expected polyglot token, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_generics_close() {
        // No shift operator: '>>' outside a polyglot opener is two '>'.
        assert_eq!(
            kinds("list<list<int>>")
                .iter()
                .filter(|k| **k == TokenKind::Gt)
                .count(),
            2
        );
    }

    #[test]
    fn test_line_comment() {
        let toks = kinds("let a = 1 // trailing\n");
        assert!(toks.iter().all(|k| !matches!(k, TokenKind::Slash)));
    }

    #[test]
    fn test_keyword_tokens() {
        let toks = lex("if else while").unwrap();
        assert!(toks[0].is_keyword("if"));
        assert!(toks[1].is_keyword("else"));
        assert!(toks[2].is_keyword("while"));
    }
}

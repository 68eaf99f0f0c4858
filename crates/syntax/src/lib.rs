//! naab-syntax: lexer, parser, and AST for the NAAB language
//!
//! Source text flows `lex` → `parse` → [`ast::Program`]. The runtime
//! crate walks the resulting tree; nothing here evaluates anything.
//!
//! The one unusual lexical feature is the inline polyglot literal:
//!
//! ```text
//! let s = <<python[a, b]
//! a + b
//! >>
//! ```
//!
//! The body between the opener and the column-1 `>>` close marker is
//! captured verbatim; a `>>` anywhere but column 1 does not close it.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod token;
pub mod types;

pub use ast::{Expr, Program, Span, Stmt};
pub use error::ParseError;
pub use lexer::lex;
pub use parser::parse;
pub use types::{Type, TypeKind};

/// Convenience: lex and parse in one step.
pub fn parse_source(source: &str) -> Result<Program, ParseError> {
    let tokens = lex(source)?;
    parse(tokens)
}

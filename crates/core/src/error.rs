//! Error taxonomy shared across the interpreter
//!
//! Every error the parser or the evaluator can raise is tagged with one of
//! these kinds. The kind is stable API: scripts match on it in `catch`
//! clauses, and tooling groups diagnostics by it. Messages are free-form;
//! kinds are not.

use std::fmt;

/// The kind of an interpreter error.
///
/// Grouped by family: parse, type, reference, arithmetic, control, module,
/// polyglot, permission, integrity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Parse
    MisplacedStatement,
    ReservedKeywordAsIdentifier,
    AccidentalAssignment,
    MalformedPolyglotBlock,
    /// Catch-all for syntax errors that fit no finer kind
    SyntaxError,

    // Type
    TypeMismatch,
    TypeCoercion,
    NullSafety,
    NullMemberAccess,
    NullReference,
    GenericUnification,

    // Reference
    UnboundName,
    UnknownField,
    UnknownBlock,
    IndexOutOfBounds,

    // Arithmetic
    DivisionByZero,
    Overflow,
    TimeWraparound,

    // Control
    BreakOutsideLoop,
    ContinueOutsideLoop,
    ReturnOutsideFunction,

    // Module
    CircularImport,
    ModuleNotFound,
    UnsupportedLanguage,

    // Polyglot
    PolyglotError,
    PolyglotTimeout,

    // Permission
    PermissionDenied,

    // Integrity
    AuditChainBroken,

    /// Errors thrown by user code via `throw` with a non-error payload
    UserThrown,
}

impl ErrorKind {
    /// Stable name, used in messages and catch-clause matching.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MisplacedStatement => "MisplacedStatement",
            ErrorKind::ReservedKeywordAsIdentifier => "ReservedKeywordAsIdentifier",
            ErrorKind::AccidentalAssignment => "AccidentalAssignment",
            ErrorKind::MalformedPolyglotBlock => "MalformedPolyglotBlock",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::TypeCoercion => "TypeCoercion",
            ErrorKind::NullSafety => "NullSafety",
            ErrorKind::NullMemberAccess => "NullMemberAccess",
            ErrorKind::NullReference => "NullReference",
            ErrorKind::GenericUnification => "GenericUnification",
            ErrorKind::UnboundName => "UnboundName",
            ErrorKind::UnknownField => "UnknownField",
            ErrorKind::UnknownBlock => "UnknownBlock",
            ErrorKind::IndexOutOfBounds => "IndexOutOfBounds",
            ErrorKind::DivisionByZero => "DivisionByZero",
            ErrorKind::Overflow => "Overflow",
            ErrorKind::TimeWraparound => "TimeWraparound",
            ErrorKind::BreakOutsideLoop => "BreakOutsideLoop",
            ErrorKind::ContinueOutsideLoop => "ContinueOutsideLoop",
            ErrorKind::ReturnOutsideFunction => "ReturnOutsideFunction",
            ErrorKind::CircularImport => "CircularImport",
            ErrorKind::ModuleNotFound => "ModuleNotFound",
            ErrorKind::UnsupportedLanguage => "UnsupportedLanguage",
            ErrorKind::PolyglotError => "PolyglotError",
            ErrorKind::PolyglotTimeout => "PolyglotTimeout",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::AuditChainBroken => "AuditChainBroken",
            ErrorKind::UserThrown => "UserThrown",
        }
    }

    /// True for the kinds a `try/catch` is expected to recover from in
    /// normal programs. Everything is catchable; this just documents the
    /// recovery policy for tooling.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ErrorKind::AuditChainBroken)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for the foundation layer itself (safe time, audit log).
///
/// The runtime converts these into first-class throwable error values;
/// at this layer they are plain `kind + message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        CoreError {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(ErrorKind::TypeMismatch.as_str(), "TypeMismatch");
        assert_eq!(ErrorKind::PolyglotTimeout.as_str(), "PolyglotTimeout");
        assert_eq!(ErrorKind::AuditChainBroken.as_str(), "AuditChainBroken");
    }

    #[test]
    fn test_display_includes_kind_and_message() {
        let err = CoreError::new(ErrorKind::TimeWraparound, "deadline arithmetic overflowed");
        assert_eq!(
            err.to_string(),
            "TimeWraparound: deadline arithmetic overflowed"
        );
    }

    #[test]
    fn test_recovery_policy() {
        assert!(ErrorKind::PolyglotTimeout.is_recoverable());
        assert!(ErrorKind::TypeMismatch.is_recoverable());
        assert!(!ErrorKind::AuditChainBroken.is_recoverable());
    }
}

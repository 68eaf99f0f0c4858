//! Runtime errors, stack frames, and unwinding
//!
//! Every runtime error is a first-class throwable value: kind, message,
//! source location, a snapshot of the call stack taken at throw, and an
//! optional payload. `try/catch` catches them; unhandled errors terminate
//! the program with the frames printed newest-first.
//!
//! Control flow (`return`, `break`, `continue`) shares the unwinding
//! channel with thrown errors via [`Unwind`]; the evaluator's statement
//! loops stop the right variants at the right boundaries.

use crate::value::Value;
use naab_core::{CoreError, ErrorKind};
use naab_syntax::ast::Span;
use std::fmt;

/// One call-stack frame, recorded on call entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub function_name: String,
    pub source_file: String,
    pub call_site_line: usize,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "at {} ({}:{})",
            self.function_name, self.source_file, self.call_site_line
        )
    }
}

/// A runtime error. Immutable once thrown: re-throw preserves the
/// original frame snapshot.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<Span>,
    /// Call stack at throw, newest frame last.
    pub frames: Vec<Frame>,
    pub payload: Option<Value>,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        RuntimeError {
            kind,
            message: message.into(),
            location: None,
            frames: Vec::new(),
            payload: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.location = Some(span);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Render the stack newest-first, for unhandled-error output.
    pub fn render_stack(&self) -> String {
        let mut out = String::new();
        for frame in self.frames.iter().rev() {
            out.push_str("  ");
            out.push_str(&frame.to_string());
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(span) = &self.location {
            write!(f, " ({})", span)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

impl From<CoreError> for RuntimeError {
    fn from(err: CoreError) -> Self {
        RuntimeError::new(err.kind, err.message)
    }
}

/// Why evaluation of a statement or expression stopped early.
#[derive(Debug)]
pub enum Unwind {
    Throw(RuntimeError),
    Return(Value),
    Break,
    Continue,
}

impl From<RuntimeError> for Unwind {
    fn from(err: RuntimeError) -> Self {
        Unwind::Throw(err)
    }
}

pub type EvalResult = Result<Value, Unwind>;
pub type ExecResult = Result<(), Unwind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_location() {
        let err = RuntimeError::new(ErrorKind::DivisionByZero, "division by zero")
            .with_span(Span::new(3, 7));
        assert_eq!(
            err.to_string(),
            "DivisionByZero: division by zero (line 3, column 7)"
        );
    }

    #[test]
    fn test_stack_renders_newest_first() {
        let mut err = RuntimeError::new(ErrorKind::UnboundName, "x");
        err.frames = vec![
            Frame {
                function_name: "main".into(),
                source_file: "prog.naab".into(),
                call_site_line: 2,
            },
            Frame {
                function_name: "inner".into(),
                source_file: "prog.naab".into(),
                call_site_line: 9,
            },
        ];
        let rendered = err.render_stack();
        let first = rendered.lines().next().unwrap();
        assert!(first.contains("inner"), "newest frame first: {}", rendered);
    }

    #[test]
    fn test_core_error_conversion() {
        let core = CoreError::new(ErrorKind::TimeWraparound, "overflow");
        let runtime: RuntimeError = core.into();
        assert_eq!(runtime.kind, ErrorKind::TimeWraparound);
    }
}

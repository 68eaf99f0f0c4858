//! naab-runtime: the NAAB interpreter core
//!
//! Everything between a parsed program and its observable behavior:
//! values and environments, the tree-walking evaluator with its generics
//! solver and null-safety checks, the polyglot dispatcher with per-guest
//! executors and the parallel fan-out scheduler, the block and module
//! registries, and the cycle collector.
//!
//! # Quick start
//!
//! ```no_run
//! use naab_runtime::{Interpreter, RuntimeConfig};
//!
//! let source = r#"
//! main {
//!   let a = 10
//!   let b = 20
//!   print(a + b)
//! }
//! "#;
//! let program = naab_syntax::parse_source(source).expect("parse");
//! let mut interp = Interpreter::new(RuntimeConfig::from_env()).expect("init");
//! interp.run(&program).expect("run");
//! ```

pub mod blocks;
pub mod builtins;
pub mod config;
pub mod error;
pub mod eval;
pub mod gc;
pub mod generics;
pub mod modules;
pub mod polyglot;
pub mod structs;
pub mod suggest;
pub mod typecheck;
pub mod value;

pub use config::RuntimeConfig;
pub use error::{Frame, RuntimeError, Unwind};
pub use eval::Interpreter;
pub use value::Value;

use tracing_subscriber::EnvFilter;

/// Install the tracing subscriber (env-filtered, stderr). Call once from
/// the embedding binary; safe to skip in libraries and tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Parse and run a source string with the given configuration. On an
/// unhandled error, the error is returned with its stack snapshot; the
/// caller decides how to present it.
pub fn run_source(source: &str, config: RuntimeConfig) -> Result<(), RuntimeError> {
    let program = naab_syntax::parse_source(source).map_err(|e| {
        RuntimeError::new(e.kind, e.to_string())
    })?;
    let mut interp = Interpreter::new(config)?;
    interp.run(&program)
}

/// Format an unhandled error the way the CLI front-end prints it:
/// message first, then the stack newest-first.
pub fn format_unhandled(err: &RuntimeError) -> String {
    let mut out = err.to_string();
    let stack = err.render_stack();
    if !stack.is_empty() {
        out.push('\n');
        out.push_str(&stack);
    }
    out
}

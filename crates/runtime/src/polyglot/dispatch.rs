//! Polyglot dispatcher
//!
//! Owns one executor per guest language (table lookup by name), prepares
//! programs (marshalling + wrapping), runs them, and interprets the
//! output: sentinel-framed JSON wins, otherwise the per-language textual
//! rule applies. Shell is special: it always yields a
//! `{ exit_code, stdout, stderr }` struct and never throws on non-zero
//! exit.

use crate::error::RuntimeError;
use crate::polyglot::exec::{GuestOutput, run_prepared};
use crate::polyglot::langs::{
    CSharpExecutor, CppExecutor, Executor, GoExecutor, JavaScriptExecutor, Language, PhpExecutor,
    PreparedProgram, PythonExecutor, RubyExecutor, RustExecutor, ShellExecutor,
};
use crate::polyglot::marshal::{json_to_value, prelude_for};
use crate::polyglot::{END_RETURN_SENTINEL, RETURN_SENTINEL};
use crate::value::{StructValue, Value};
use naab_core::{CoreError, ErrorKind};
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tempfile::TempDir;
use tracing::debug;

/// Struct type name of the value every shell block returns.
pub const SHELL_RESULT_STRUCT: &str = "ShellResult";

#[derive(Debug, Clone)]
pub struct PolyglotConfig {
    /// Total timeout for interpreted guests.
    pub exec_timeout: Duration,
    /// Compile-step timeout for compiled guests.
    pub compile_timeout: Duration,
    /// Run-step timeout for compiled guests (default 10 s).
    pub compiled_run_timeout: Duration,
    /// Override for the per-thread temp root (`NAAB_TEMP_ROOT`).
    pub temp_root: Option<PathBuf>,
}

impl Default for PolyglotConfig {
    fn default() -> Self {
        PolyglotConfig {
            exec_timeout: Duration::from_secs(crate::config::DEFAULT_EXEC_TIMEOUT_SECS),
            compile_timeout: Duration::from_secs(crate::config::DEFAULT_COMPILE_TIMEOUT_SECS),
            compiled_run_timeout: Duration::from_secs(crate::config::DEFAULT_COMPILED_RUN_SECS),
            temp_root: None,
        }
    }
}

pub struct Dispatcher {
    executors: HashMap<Language, Arc<dyn Executor>>,
    pub config: PolyglotConfig,
}

impl Dispatcher {
    pub fn new(config: PolyglotConfig) -> Self {
        let mut executors: HashMap<Language, Arc<dyn Executor>> = HashMap::new();
        executors.insert(Language::Python, Arc::new(PythonExecutor));
        executors.insert(Language::JavaScript, Arc::new(JavaScriptExecutor));
        executors.insert(Language::Cpp, Arc::new(CppExecutor));
        executors.insert(Language::Rust, Arc::new(RustExecutor));
        executors.insert(Language::Go, Arc::new(GoExecutor));
        executors.insert(Language::Ruby, Arc::new(RubyExecutor));
        executors.insert(Language::Php, Arc::new(PhpExecutor));
        executors.insert(Language::CSharp, Arc::new(CSharpExecutor));
        executors.insert(Language::Shell, Arc::new(ShellExecutor));
        Dispatcher { executors, config }
    }

    /// Resolve a language name as written after `<<`.
    pub fn executor_for(&self, name: &str) -> Result<Arc<dyn Executor>, RuntimeError> {
        let language = Language::from_name(name).ok_or_else(|| {
            RuntimeError::new(
                ErrorKind::UnsupportedLanguage,
                format!("no executor registered for language '{}'", name),
            )
        })?;
        self.executors
            .get(&language)
            .cloned()
            .ok_or_else(|| {
                RuntimeError::new(
                    ErrorKind::UnsupportedLanguage,
                    format!("no executor registered for language '{}'", name),
                )
            })
    }

    /// Marshal bindings and wrap the body into a runnable program.
    /// Marshalling happens on the evaluator thread; the result is plain
    /// data and may cross into the fan-out pool.
    pub fn prepare(
        &self,
        language_name: &str,
        bindings: &[(String, Value)],
        body: &str,
    ) -> Result<PreparedProgram, RuntimeError> {
        let executor = self.executor_for(language_name)?;
        let language = executor.language();

        // Side-channel files for oversized bindings live in their own
        // directory: guests read them by path after the scratch dir for
        // the program itself is long decided.
        let scratch = self.sidechannel_dir()?;
        let prelude = prelude_for(language, bindings, scratch.path())?;
        let source = executor.wrap(&prelude, body);

        let exec_timeout = if language.is_compiled() {
            self.config.compiled_run_timeout
        } else {
            self.config.exec_timeout
        };

        Ok(PreparedProgram {
            language,
            source,
            exec_timeout,
            compile_timeout: self.config.compile_timeout,
            // The side-channel directory is unlinked when the prepared
            // program is dropped, after execution.
            sidechannel: Some(scratch),
        })
    }

    /// Run a prepared program to completion on the current thread.
    pub fn execute(&self, prepared: &PreparedProgram) -> Result<GuestOutput, CoreError> {
        let executor = self
            .executors
            .get(&prepared.language)
            .expect("prepared programs only exist for registered languages");
        run_prepared(prepared, executor.as_ref(), self.config.temp_root.as_deref())
    }

    fn sidechannel_dir(&self) -> Result<TempDir, RuntimeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("naab-bind-");
        match &self.config.temp_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| {
                    RuntimeError::new(
                        ErrorKind::PolyglotError,
                        format!("cannot create temp root: {}", e),
                    )
                })?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| {
            RuntimeError::new(
                ErrorKind::PolyglotError,
                format!("cannot create binding directory: {}", e),
            )
        })
    }
}

/// Extract the sentinel-framed JSON payload, if the guest printed one.
/// The sentinels must each sit on their own line.
pub fn extract_sentinel_payload(stdout: &str) -> Option<&str> {
    let open = stdout
        .lines()
        .scan(0usize, |offset, line| {
            let start = *offset;
            *offset = start + line.len() + 1;
            Some((start, line))
        })
        .find(|(_, line)| line.trim_end() == RETURN_SENTINEL)?;
    let after_open = open.0 + RETURN_SENTINEL.len();
    let rest = stdout.get(after_open..)?;
    let rest = rest.strip_prefix('\r').unwrap_or(rest);
    let rest = rest.strip_prefix('\n')?;
    let end = rest.find(END_RETURN_SENTINEL)?;
    Some(rest[..end].trim_end_matches(['\n', '\r']))
}

fn error_pattern(language: Language) -> Option<&'static Regex> {
    static PATTERNS: OnceLock<HashMap<Language, Regex>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            let mut map = HashMap::new();
            map.insert(
                Language::Python,
                Regex::new(r"(?m)^(Traceback \(most recent call last\)|\w*Error:)").expect("pattern"),
            );
            map.insert(
                Language::JavaScript,
                Regex::new(r"(?m)^\s*(\w*Error|Thrown):|^\s*throw ").expect("pattern"),
            );
            map.insert(Language::Ruby, Regex::new(r"(?m)\w+Error|\(RuntimeError\)").expect("pattern"));
            map.insert(Language::Php, Regex::new(r"(?m)^(PHP )?(Fatal|Parse) error:").expect("pattern"));
            map
        })
        .get(&language)
}

/// Interpret guest output per the result protocol. Returns the host
/// value; composites are NOT yet registered with the heap, so the caller
/// does that.
pub fn interpret_output(
    language: Language,
    body: &str,
    output: &GuestOutput,
) -> Result<Value, RuntimeError> {
    if output.timed_out {
        return Err(RuntimeError::new(
            ErrorKind::PolyglotTimeout,
            format!("{} block exceeded its deadline", language.name()),
        ));
    }

    // Shell never throws: the caller inspects exit_code.
    if language == Language::Shell {
        let mut fields = HashMap::new();
        fields.insert("exit_code".to_string(), Value::Int(output.exit_code as i64));
        fields.insert("stdout".to_string(), Value::Str(output.stdout.clone()));
        fields.insert("stderr".to_string(), Value::Str(output.stderr.clone()));
        return Ok(Value::Struct(std::rc::Rc::new(std::cell::RefCell::new(
            StructValue {
                name: SHELL_RESULT_STRUCT.to_string(),
                type_args: Vec::new(),
                fields,
            },
        ))));
    }

    let pattern_hit = error_pattern(language)
        .map(|p| p.is_match(&output.stderr))
        .unwrap_or(false);
    if output.exit_code != 0 || pattern_hit {
        return Err(guest_failure(language, body, output));
    }

    match extract_sentinel_payload(&output.stdout) {
        Some(payload) => {
            let json: serde_json::Value = serde_json::from_str(payload).map_err(|e| {
                RuntimeError::new(
                    ErrorKind::PolyglotError,
                    format!("{} block printed a malformed return payload: {}", language.name(), e),
                )
            })?;
            debug!(language = language.name(), "sentinel payload decoded");
            Ok(json_to_value(&json))
        }
        None => Ok(Value::Void),
    }
}

/// Build the catchable guest-failure error: language, guest message, a
/// body snippet with a caret, and (via the evaluator) the call site.
fn guest_failure(language: Language, body: &str, output: &GuestOutput) -> RuntimeError {
    let guest_message = output
        .stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("guest exited with an error")
        .trim()
        .to_string();

    let (line_no, column) = locate_guest_error(&output.stderr);
    let snippet = body
        .lines()
        .nth(line_no.saturating_sub(1))
        .unwrap_or_else(|| body.lines().next().unwrap_or(""));
    let caret = format!("{}^", " ".repeat(column.saturating_sub(1)));

    RuntimeError::new(
        ErrorKind::PolyglotError,
        format!(
            "{} block failed (exit {}): {}\n  {}\n  {}",
            language.name(),
            output.exit_code,
            guest_message,
            snippet,
            caret
        ),
    )
}

/// Best-effort extraction of a 1-indexed line/column in the BODY from a
/// guest stderr. The wrappers keep the body at a stable offset only for
/// shell, so this is heuristic: absent a match, point at line 1.
fn locate_guest_error(stderr: &str) -> (usize, usize) {
    static LINE_PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = LINE_PATTERN.get_or_init(|| {
        Regex::new(r"line (\d+)|:(\d+):(\d+)").expect("valid pattern")
    });
    for caps in pattern.captures_iter(stderr) {
        let line = caps
            .get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse::<usize>().ok());
        if let Some(line) = line {
            let column = caps
                .get(3)
                .and_then(|m| m.as_str().parse::<usize>().ok())
                .unwrap_or(1);
            return (line.max(1), column.max(1));
        }
    }
    (1, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_output(stdout: &str) -> GuestOutput {
        GuestOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
            timed_out: false,
        }
    }

    #[test]
    fn test_unsupported_language() {
        let dispatcher = Dispatcher::new(PolyglotConfig::default());
        let err = match dispatcher.executor_for("cobol") {
            Err(e) => e,
            Ok(_) => panic!("expected executor_for(\"cobol\") to fail"),
        };
        assert_eq!(err.kind, ErrorKind::UnsupportedLanguage);
    }

    #[test]
    fn test_sentinel_extraction() {
        let stdout = format!("noise\n{}\n30\n{}\ntrailing\n", RETURN_SENTINEL, END_RETURN_SENTINEL);
        assert_eq!(extract_sentinel_payload(&stdout), Some("30"));
    }

    #[test]
    fn test_sentinel_must_be_own_line() {
        let stdout = format!("prefix {}\n30\n{}\n", RETURN_SENTINEL, END_RETURN_SENTINEL);
        assert_eq!(extract_sentinel_payload(&stdout), None);
    }

    #[test]
    fn test_interpret_sentinel_int() {
        let stdout = format!("{}\n30\n{}\n", RETURN_SENTINEL, END_RETURN_SENTINEL);
        let value = interpret_output(Language::Python, "a + b", &ok_output(&stdout)).unwrap();
        assert_eq!(value, Value::Int(30));
    }

    #[test]
    fn test_interpret_no_sentinel_is_void() {
        let value = interpret_output(Language::Python, "x = 1", &ok_output("")).unwrap();
        assert!(value.is_void());
    }

    #[test]
    fn test_interpret_timeout() {
        let output = GuestOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            timed_out: true,
        };
        let err = interpret_output(Language::Python, "", &output).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PolyglotTimeout);
    }

    #[test]
    fn test_interpret_guest_error_carries_snippet() {
        let output = GuestOutput {
            stdout: String::new(),
            stderr: "Traceback (most recent call last):\n  File \"<naab>\", line 1\nZeroDivisionError: division by zero\n".to_string(),
            exit_code: 1,
            timed_out: false,
        };
        let err = interpret_output(Language::Python, "1 / 0", &output).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PolyglotError);
        assert!(err.message.contains("python"));
        assert!(err.message.contains("ZeroDivisionError"));
        assert!(err.message.contains("1 / 0"));
        assert!(err.message.contains('^'));
    }

    #[test]
    fn test_shell_always_returns_struct() {
        let output = GuestOutput {
            stdout: "out\n".to_string(),
            stderr: "err\n".to_string(),
            exit_code: 7,
            timed_out: false,
        };
        let value = interpret_output(Language::Shell, "exit 7", &output).unwrap();
        let Value::Struct(sv) = value else { panic!("expected struct") };
        let sv = sv.borrow();
        assert_eq!(sv.name, SHELL_RESULT_STRUCT);
        assert_eq!(sv.fields["exit_code"], Value::Int(7));
        assert_eq!(sv.fields["stdout"], Value::Str("out\n".into()));
    }

    #[test]
    fn test_prepare_python_program() {
        let dispatcher = Dispatcher::new(PolyglotConfig::default());
        let prepared = dispatcher
            .prepare(
                "python",
                &[
                    ("a".to_string(), Value::Int(10)),
                    ("b".to_string(), Value::Int(20)),
                ],
                "a + b\n",
            )
            .unwrap();
        assert_eq!(prepared.language, Language::Python);
        assert!(prepared.source.contains("a = 10"));
        assert!(prepared.source.contains(RETURN_SENTINEL));
    }
}

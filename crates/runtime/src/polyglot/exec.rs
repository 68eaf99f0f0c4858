//! Guest subprocess execution
//!
//! Writes the assembled program into a call-private scratch directory
//! under this thread's temp root, runs the toolchain steps, and enforces
//! the deadline: SIGTERM, a short grace period, then SIGKILL. Scratch
//! directories are removed on every path out (drop), and the whole temp
//! root vanishes with the thread.
//!
//! Errors at this layer are `CoreError` (plain data) so results can
//! cross the fan-out threads; the dispatcher upgrades them to runtime
//! errors with spans and snippets.

use crate::polyglot::langs::{Executor, PreparedProgram, Step};
use naab_core::safetime::Deadline;
use naab_core::{CoreError, ErrorKind};
use std::cell::OnceCell;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, warn};

thread_local! {
    /// Each thread owns a private temp root; per-call scratch
    /// directories are created inside it. The root (and anything a
    /// crashed call left behind) is unlinked when the thread exits.
    static THREAD_TEMP_ROOT: OnceCell<TempDir> = const { OnceCell::new() };
}

/// What came back from the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const TERM_GRACE: Duration = Duration::from_millis(500);

fn exec_err(detail: impl std::fmt::Display) -> CoreError {
    CoreError::new(ErrorKind::PolyglotError, detail.to_string())
}

/// Run a prepared program to completion (or deadline).
pub fn run_prepared(
    prepared: &PreparedProgram,
    executor: &dyn Executor,
    temp_root: Option<&Path>,
) -> Result<GuestOutput, CoreError> {
    let scratch = make_scratch(temp_root)?;
    let program_path = scratch
        .path()
        .join(format!("block.{}", executor.file_extension()));
    std::fs::write(&program_path, &prepared.source)
        .map_err(|e| exec_err(format!("cannot write guest program: {}", e)))?;

    let steps = executor.steps(&program_path, scratch.path());
    let mut last = GuestOutput {
        stdout: String::new(),
        stderr: String::new(),
        exit_code: 0,
        timed_out: false,
    };

    for step in steps {
        let timeout = if step.is_compile {
            prepared.compile_timeout
        } else {
            prepared.exec_timeout
        };
        debug!(
            language = prepared.language.name(),
            program = %step.program,
            compile = step.is_compile,
            "launching guest step"
        );
        last = run_step(&step, timeout)?;
        if last.timed_out || (step.is_compile && last.exit_code != 0) {
            // A failed compile never reaches the run step; the caller
            // sees the compiler's stderr.
            break;
        }
    }
    Ok(last)
}

/// This thread's private temp root, created on first use under the
/// configured override (or the system temp directory).
fn thread_temp_root(base: Option<&Path>) -> Result<PathBuf, CoreError> {
    THREAD_TEMP_ROOT.with(|cell| {
        if cell.get().is_none() {
            let mut builder = tempfile::Builder::new();
            builder.prefix("naab-tmp-");
            let dir = match base {
                Some(root) => {
                    std::fs::create_dir_all(root)
                        .map_err(|e| exec_err(format!("cannot create temp root: {}", e)))?;
                    builder.tempdir_in(root)
                }
                None => builder.tempdir(),
            }
            .map_err(|e| exec_err(format!("cannot create thread temp root: {}", e)))?;
            let _ = cell.set(dir);
        }
        Ok(cell.get().expect("temp root just set").path().to_path_buf())
    })
}

/// Per-call scratch directory inside this thread's temp root. `TempDir`
/// unlinks on drop, covering both normal completion and unwinds.
fn make_scratch(temp_root: Option<&Path>) -> Result<TempDir, CoreError> {
    let root = thread_temp_root(temp_root)?;
    tempfile::Builder::new()
        .prefix("naab-guest-")
        .tempdir_in(root)
        .map_err(|e| exec_err(format!("cannot create scratch directory: {}", e)))
}

fn run_step(step: &Step, timeout: Duration) -> Result<GuestOutput, CoreError> {
    let mut command = Command::new(&step.program);
    command
        .args(&step.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // Each guest gets its own process group so the kill escalation
    // reaches grandchildren still holding the output pipes.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    let mut child = command
        .spawn()
        .map_err(|e| exec_err(format!("cannot launch '{}': {}", step.program, e)))?;

    // Drain pipes off-thread so a chatty guest cannot deadlock against
    // the wait loop.
    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let deadline = Deadline::after(timeout);
    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => return Err(exec_err(format!("wait failed: {}", e))),
        }
        if deadline.expired() {
            timed_out = true;
            terminate(&mut child);
            let status = child
                .wait()
                .map_err(|e| exec_err(format!("wait after kill failed: {}", e)))?;
            break status;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout_reader
        .join()
        .unwrap_or_default();
    let stderr = stderr_reader
        .join()
        .unwrap_or_default();

    Ok(GuestOutput {
        stdout,
        stderr,
        exit_code: status.code().unwrap_or(-1),
        timed_out,
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    source: Option<R>,
) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(mut source) = source {
            let _ = source.read_to_string(&mut buffer);
        }
        buffer
    })
}

/// SIGTERM to the guest's process group, a grace period, then SIGKILL.
fn terminate(child: &mut Child) {
    let pid = child.id() as i32;
    warn!(pid, "guest exceeded its deadline; terminating");
    unsafe {
        // Negative pid addresses the whole process group.
        libc::kill(-pid, libc::SIGTERM);
    }
    let grace = Deadline::after(TERM_GRACE);
    while !grace.expired() {
        if let Ok(Some(_)) = child.try_wait() {
            // The leader is gone; sweep any stragglers in the group.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
            return;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
    let _ = child.kill();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyglot::langs::{Language, ShellExecutor};

    fn shell_program(body: &str, exec_timeout: Duration) -> PreparedProgram {
        PreparedProgram {
            language: Language::Shell,
            source: body.to_string(),
            exec_timeout,
            compile_timeout: Duration::from_secs(30),
            sidechannel: None,
        }
    }

    #[test]
    fn test_shell_output_captured() {
        let prepared = shell_program("echo hello\necho oops >&2\nexit 3\n", Duration::from_secs(10));
        let output = run_prepared(&prepared, &ShellExecutor, None).unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert_eq!(output.exit_code, 3);
        assert!(!output.timed_out);
    }

    #[test]
    fn test_timeout_kills_guest() {
        let prepared = shell_program("sleep 30\n", Duration::from_millis(200));
        let start = std::time::Instant::now();
        let output = run_prepared(&prepared, &ShellExecutor, None).unwrap();
        assert!(output.timed_out);
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "kill escalation must not wait out the sleep"
        );
    }

    #[test]
    fn test_missing_interpreter_is_an_error() {
        struct Bogus;
        impl Executor for Bogus {
            fn language(&self) -> Language {
                Language::Shell
            }
            fn file_extension(&self) -> &'static str {
                "sh"
            }
            fn wrap(&self, _prelude: &str, body: &str) -> String {
                body.to_string()
            }
            fn steps(&self, program: &Path, _scratch: &Path) -> Vec<Step> {
                vec![Step {
                    program: "definitely-not-a-real-binary".to_string(),
                    args: vec![program.to_string_lossy().into_owned()],
                    is_compile: false,
                }]
            }
        }
        let prepared = shell_program("true\n", Duration::from_secs(1));
        let err = run_prepared(&prepared, &Bogus, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PolyglotError);
    }

    #[test]
    fn test_scratch_cleaned_up() {
        let root = tempfile::tempdir().unwrap();
        let prepared = shell_program("true\n", Duration::from_secs(5));
        run_prepared(&prepared, &ShellExecutor, Some(root.path())).unwrap();

        // The thread's temp root may still exist (it lives until thread
        // exit), but the per-call scratch directory inside it must be
        // gone.
        for entry in std::fs::read_dir(root.path()).unwrap().flatten() {
            let inner: Vec<_> = std::fs::read_dir(entry.path()).unwrap().collect();
            assert!(
                inner.is_empty(),
                "per-call scratch must be unlinked on completion"
            );
        }
    }
}

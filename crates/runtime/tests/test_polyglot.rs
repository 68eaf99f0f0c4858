//! Polyglot end-to-end tests.
//!
//! Shell tests assume a POSIX `sh` (always true on the supported
//! platforms). Tests that need other guest toolchains check for them
//! first and return early when absent, so CI without e.g. python3 still
//! passes.

use naab_core::ErrorKind;
use naab_runtime::{Interpreter, RuntimeConfig, RuntimeError};
use std::process::Command;

fn run_with_config(
    source: &str,
    config: RuntimeConfig,
) -> (Result<(), RuntimeError>, String) {
    let program = naab_syntax::parse_source(source).expect("parse");
    let mut interp = Interpreter::new(config).expect("init");
    let buffer = interp.capture_output();
    let result = interp.run(&program);
    let output = buffer.borrow().clone();
    (result, output)
}

fn run_captured(source: &str) -> (Result<(), RuntimeError>, String) {
    run_with_config(source, RuntimeConfig::default())
}

fn has_guest(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[test]
fn test_python_addition_scenario() {
    // Scenario 1: polyglot addition prints 30.
    if !has_guest("python3") {
        eprintln!("skipping: python3 not available");
        return;
    }
    let source = "main {\n  let a = 10\n  let b = 20\n  let s = <<python[a, b]\na + b\n>>\n  print(s)\n}\n";
    let (result, output) = run_captured(source);
    result.unwrap();
    assert_eq!(output, "30\n");
}

#[test]
fn test_python_multi_statement_is_void() {
    if !has_guest("python3") {
        eprintln!("skipping: python3 not available");
        return;
    }
    let source = "main {\n  let s = <<python\nx = 1\ny = 2\n>>\n  print(s)\n}\n";
    let (result, output) = run_captured(source);
    result.unwrap();
    assert_eq!(output, "null\n");
}

#[test]
fn test_python_exception_propagates() {
    if !has_guest("python3") {
        eprintln!("skipping: python3 not available");
        return;
    }
    let source = "main {\n  try {\n    let s = <<python\n1 / 0\n>>\n    print(s)\n  } catch e {\n    print(e.kind)\n  }\n}\n";
    let (result, output) = run_captured(source);
    result.unwrap();
    assert_eq!(output, "PolyglotError\n");
}

#[test]
fn test_shell_returns_result_struct() {
    let source = "main {\n  let r = <<shell\necho out\necho err >&2\nexit 4\n>>\n  print(r.exit_code)\n  print(r.stdout)\n  print(r.stderr)\n}\n";
    let (result, output) = run_captured(source);
    result.unwrap();
    assert_eq!(output, "4\nout\n\nerr\n\n");
}

#[test]
fn test_shell_sees_bound_values() {
    let source = "main {\n  let name = \"naab\"\n  let r = <<shell[name]\necho \"hello $name\"\n>>\n  print(r.stdout)\n}\n";
    let (result, output) = run_captured(source);
    result.unwrap();
    assert_eq!(output, "hello naab\n\n");
}

#[test]
fn test_unbound_binding_fails_before_launch() {
    let source = "main {\n  let s = <<shell[missing]\necho never\n>>\n}\n";
    let (result, _) = run_captured(source);
    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnboundName);
}

#[test]
fn test_unsupported_language() {
    let source = "main {\n  try {\n    let s = <<cobol\nDISPLAY 'HI'\n>>\n  } catch e {\n    print(e.kind)\n  }\n}\n";
    let (result, output) = run_captured(source);
    result.unwrap();
    assert_eq!(output, "UnsupportedLanguage\n");
}

#[test]
fn test_timeout_is_catchable() {
    let mut config = RuntimeConfig::default();
    config.polyglot_timeout_secs = 1;
    let source = "main {\n  try {\n    let s = <<shell\nsleep 30\n>>\n    print(\"not reached\")\n  } catch e {\n    print(e.kind)\n  }\n}\n";
    let start = std::time::Instant::now();
    let (result, output) = run_with_config(source, config);
    result.unwrap();
    assert_eq!(output, "PolyglotTimeout\n");
    assert!(
        start.elapsed() < std::time::Duration::from_secs(10),
        "SIGTERM/SIGKILL escalation must not wait out the sleep"
    );
}

#[test]
fn test_fanout_results_bind_in_source_order() {
    // Two consecutive independent shell blocks fan out; both results
    // are visible afterwards, in source order.
    let source = "main {\n  let a = <<shell\nsleep 0.2\necho first\n>>\n  let b = <<shell\necho second\n>>\n  print(a.stdout)\n  print(b.stdout)\n}\n";
    let (result, output) = run_captured(source);
    result.unwrap();
    assert_eq!(output, "first\n\nsecond\n\n");
}

#[test]
fn test_fanout_runs_concurrently() {
    let source = "main {\n  let a = <<shell\nsleep 0.4\necho a\n>>\n  let b = <<shell\nsleep 0.4\necho b\n>>\n  print(a.exit_code + b.exit_code)\n}\n";
    let start = std::time::Instant::now();
    let (result, output) = run_captured(source);
    result.unwrap();
    assert_eq!(output, "0\n");
    assert!(
        start.elapsed() < std::time::Duration::from_millis(700),
        "independent blocks must overlap: {:?}",
        start.elapsed()
    );
}

#[test]
fn test_dependent_block_waits_for_result() {
    // The second block's binding list names the first block's result, so
    // it runs in a later wave with the real value bound.
    let source = "main {\n  let a = <<shell\necho -n 5\n>>\n  let b = <<shell[a]\necho \"got $a\"\n>>\n  print(b.stdout)\n}\n";
    let (result, output) = run_captured(source);
    result.unwrap();
    assert!(output.contains("got"), "output: {}", output);
}

#[test]
fn test_audit_log_records_subprocesses() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("audit.ndjson");
    let mut config = RuntimeConfig::default();
    config.audit_log_path = Some(log_path.clone());

    let source = "main {\n  let r = <<shell\ntrue\n>>\n  print(r.exit_code)\n}\n";
    let (result, _) = run_with_config(source, config);
    result.unwrap();

    let report = naab_core::verify_log(&log_path).unwrap();
    assert!(report.is_intact(), "report: {}", report);
    let contents = std::fs::read_to_string(&log_path).unwrap();
    assert!(contents.contains("subprocess_launch"), "{}", contents);
}

#[test]
fn test_block_use_and_invocation() {
    if !has_guest("python3") {
        eprintln!("skipping: python3 not available");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let lang_dir = dir.path().join("python");
    std::fs::create_dir_all(&lang_dir).unwrap();
    std::fs::write(
        lang_dir.join("BLOCK-PY-00001.json"),
        serde_json::json!({
            "id": "BLOCK-PY-00001",
            "language": "python",
            "code": "arg0 + arg1",
            "source_file": "adders.py",
            "source_line": 3,
            "validation_status": "validated",
            "version": "1.0.0",
            "description": "add two values"
        })
        .to_string(),
    )
    .unwrap();

    let mut config = RuntimeConfig::default();
    config.blocks_root = dir.path().to_path_buf();
    let source = "use BLOCK-PY-00001 as adder\nmain {\n  print(adder(19, 23))\n}\n";
    let (result, output) = run_with_config(source, config);
    result.unwrap();
    assert_eq!(output, "42\n");
}

#[test]
fn test_block_search_builtin() {
    let dir = tempfile::tempdir().unwrap();
    let lang_dir = dir.path().join("python");
    std::fs::create_dir_all(&lang_dir).unwrap();
    std::fs::write(
        lang_dir.join("BLOCK-PY-00007.json"),
        serde_json::json!({
            "id": "BLOCK-PY-00007",
            "language": "python",
            "code": "rows = parse_csv(arg0)",
            "source_file": "csv.py",
            "source_line": 1,
            "validation_status": "validated",
            "description": "parse csv rows"
        })
        .to_string(),
    )
    .unwrap();

    let mut config = RuntimeConfig::default();
    config.blocks_root = dir.path().to_path_buf();
    let source = "main {\n  let hits = block_search(\"csv\")\n  print(len(hits))\n  print(hits[0])\n}\n";
    let (result, output) = run_with_config(source, config);
    result.unwrap();
    assert_eq!(output, "1\nBLOCK-PY-00007\n");
}

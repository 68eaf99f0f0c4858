//! End-to-end interpreter tests that need no guest toolchains.

use naab_core::ErrorKind;
use naab_runtime::modules::StdlibModule;
use naab_runtime::{Interpreter, RuntimeConfig, RuntimeError, Value};

fn run_captured(source: &str) -> (Result<(), RuntimeError>, String) {
    let program = naab_syntax::parse_source(source).expect("parse");
    let mut interp = Interpreter::new(RuntimeConfig::default()).expect("init");
    let buffer = interp.capture_output();
    let result = interp.run(&program);
    let output = buffer.borrow().clone();
    (result, output)
}

fn run_ok(source: &str) -> String {
    let (result, output) = run_captured(source);
    if let Err(err) = result {
        panic!("program failed: {}\noutput so far: {}", err, output);
    }
    output
}

fn run_err(source: &str) -> RuntimeError {
    let (result, output) = run_captured(source);
    match result {
        Ok(()) => panic!("expected failure, got output: {}", output),
        Err(err) => err,
    }
}

#[test]
fn test_arithmetic_and_print() {
    let output = run_ok("main {\n  let a = 10\n  let b = 20\n  print(a + b)\n}\n");
    assert_eq!(output, "30\n");
}

#[test]
fn test_strict_arithmetic_promotion() {
    let output = run_ok("main {\n  print(1 + 2.5)\n  print(7 / 2)\n  print(7.0 / 2)\n}\n");
    assert_eq!(output, "3.5\n3\n3.5\n");
}

#[test]
fn test_string_concat_coerces() {
    let output = run_ok("main {\n  print(\"n = \" + 42)\n  print(1 + \"\")\n}\n");
    assert_eq!(output, "n = 42\n1\n");
}

#[test]
fn test_type_coercion_rejected() {
    let err = run_err("main {\n  let x = 1 - \"a\"\n}\n");
    assert_eq!(err.kind, ErrorKind::TypeCoercion);
}

#[test]
fn test_division_by_zero() {
    let err = run_err("main {\n  let x = 1 / 0\n}\n");
    assert_eq!(err.kind, ErrorKind::DivisionByZero);
    let err = run_err("main {\n  let x = 1 % 0\n}\n");
    assert_eq!(err.kind, ErrorKind::DivisionByZero);
}

#[test]
fn test_integer_overflow_raises() {
    let err = run_err("main {\n  let max = 9223372036854775807\n  let x = max + max\n}\n");
    assert_eq!(err.kind, ErrorKind::Overflow);
}

#[test]
fn test_null_safety_message() {
    // Scenario: `let x: int = null` terminates with the exact message.
    let err = run_err("main {\n  let x: int = null\n}\n");
    assert_eq!(err.kind, ErrorKind::NullSafety);
    assert!(
        err.to_string().starts_with(
            "NullSafety: Cannot assign null to non-nullable 'x' of type int. Help: declare as int?"
        ),
        "unexpected message: {}",
        err
    );
}

#[test]
fn test_nullable_binding_accepts_null() {
    let output = run_ok("main {\n  let x: int? = null\n  print(x)\n}\n");
    assert_eq!(output, "null\n");
}

#[test]
fn test_union_binding() {
    let output = run_ok(
        "main {\n  let x: int | string = 1\n  print(x)\n  x = \"two\"\n  print(x)\n}\n",
    );
    assert_eq!(output, "1\ntwo\n");

    let err = run_err("main {\n  let x: int | string = true\n}\n");
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
    assert!(err.message.contains("int | string"));
}

#[test]
fn test_unbound_name_suggestion() {
    let err = run_err("main {\n  let count = 1\n  print(coutn)\n}\n");
    assert_eq!(err.kind, ErrorKind::UnboundName);
    assert!(err.message.contains("Did you mean 'count'"), "{}", err.message);
}

#[test]
fn test_generic_inference() {
    // Scenario: first([1,2,3]) yields 1 and first(["a"]) yields "a",
    // with no explicit type arguments.
    let output = run_ok(
        "function first<T>(xs: list<T>) -> T {\n  return xs[0]\n}\nmain {\n  print(first([1, 2, 3]))\n  print(first([\"a\"]))\n}\n",
    );
    assert_eq!(output, "1\na\n");
}

#[test]
fn test_generic_explicit_arguments() {
    let output = run_ok(
        "function first<T>(xs: list<T>) -> T {\n  return xs[0]\n}\nmain {\n  print(first<int>([7]))\n}\n",
    );
    assert_eq!(output, "7\n");
}

#[test]
fn test_generic_return_type_enforced() {
    let err = run_err(
        "function ident<T>(x: T) -> int {\n  return x\n}\nmain {\n  print(ident(\"not an int\"))\n}\n",
    );
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
}

#[test]
fn test_nonnullable_return_fall_through_is_null_safety() {
    // A non-nullable declared return with a void fall-through path
    // fails null safety.
    let err = run_err(
        "function f(flag: bool) -> int {\n  if flag {\n    return 1\n  }\n}\nmain {\n  print(f(false))\n}\n",
    );
    assert_eq!(err.kind, ErrorKind::NullSafety);
}

#[test]
fn test_closures_share_captured_state() {
    let output = run_ok(
        "function make_counter() {\n  let count = 0\n  return fn() {\n    count = count + 1\n    return count\n  }\n}\nmain {\n  let tick = make_counter()\n  print(tick())\n  print(tick())\n  print(tick())\n}\n",
    );
    assert_eq!(output, "1\n2\n3\n");
}

#[test]
fn test_copy_on_assignment_outer_only() {
    let output = run_ok(
        "main {\n  let a = [1, 2]\n  let b = a\n  b[0] = 99\n  print(a[0])\n  print(b[0])\n}\n",
    );
    // The outer container was copied, so mutating b leaves a alone.
    assert_eq!(output, "1\n99\n");
}

#[test]
fn test_inner_values_stay_shared() {
    // Copying `a` to `b` duplicates only the outer container; the
    // nested list is the same allocation, so element mutation through
    // either name is visible everywhere.
    let output = run_ok(
        "main {\n  let inner = [1]\n  let a = [inner]\n  let b = a\n  a[0][0] = 42\n  print(inner[0])\n  print(b[0][0])\n}\n",
    );
    assert_eq!(output, "42\n42\n");
}

#[test]
fn test_struct_literal_and_field_mutation() {
    let output = run_ok(
        "struct Point {\n  x: int\n  y: int\n}\nmain {\n  let p = new Point { x: 1, y: 2 }\n  p.x = 10\n  print(p.x + p.y)\n}\n",
    );
    assert_eq!(output, "12\n");
}

#[test]
fn test_struct_unknown_field_suggests() {
    let err = run_err(
        "struct Point {\n  x: int\n  y: int\n}\nmain {\n  let p = new Point { x: 1, y: 2 }\n  print(p.z)\n}\n",
    );
    assert_eq!(err.kind, ErrorKind::UnknownField);
}

#[test]
fn test_struct_field_type_checked() {
    let err = run_err(
        "struct Point {\n  x: int\n  y: int\n}\nmain {\n  let p = new Point { x: \"no\", y: 2 }\n}\n",
    );
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
}

#[test]
fn test_missing_nonnullable_field_rejected() {
    let err = run_err(
        "struct Point {\n  x: int\n  y: int\n}\nmain {\n  let p = new Point { x: 1 }\n}\n",
    );
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
    assert!(err.message.contains("y"));
}

#[test]
fn test_generic_struct() {
    let output = run_ok(
        "struct Pair<T, U> {\n  first: T\n  second: U\n}\nmain {\n  let p = new Pair<int, string> { first: 1, second: \"a\" }\n  print(p.first)\n  print(p.second)\n}\n",
    );
    assert_eq!(output, "1\na\n");
}

#[test]
fn test_null_member_access() {
    let err = run_err("main {\n  let x = null\n  print(x.field)\n}\n");
    assert_eq!(err.kind, ErrorKind::NullMemberAccess);
}

#[test]
fn test_null_member_access_on_declared_nullable_is_null_reference() {
    let err = run_err(
        "struct Point {\n  x: int\n}\nmain {\n  let p: Point? = null\n  print(p.x)\n}\n",
    );
    assert_eq!(err.kind, ErrorKind::NullReference);
}

#[test]
fn test_try_catch_finally_order() {
    let output = run_ok(
        "main {\n  try {\n    throw \"boom\"\n  } catch e {\n    print(\"caught: \" + e.message)\n  } finally {\n    print(\"finally\")\n  }\n  print(\"after\")\n}\n",
    );
    assert_eq!(output, "caught: boom\nfinally\nafter\n");
}

#[test]
fn test_catch_binds_error_kind() {
    let output = run_ok(
        "main {\n  try {\n    let x = 1 / 0\n  } catch e {\n    print(e.kind)\n  }\n}\n",
    );
    assert_eq!(output, "DivisionByZero\n");
}

#[test]
fn test_rethrow_preserves_trace() {
    let output = run_ok(
        "main {\n  try {\n    try {\n      throw \"inner\"\n    } catch e {\n      throw e\n    }\n  } catch e {\n    print(e.message)\n  }\n}\n",
    );
    assert_eq!(output, "inner\n");
}

#[test]
fn test_finally_runs_on_success_path() {
    let output = run_ok(
        "main {\n  try {\n    print(\"body\")\n  } catch e {\n    print(\"never\")\n  } finally {\n    print(\"cleanup\")\n  }\n}\n",
    );
    assert_eq!(output, "body\ncleanup\n");
}

#[test]
fn test_unhandled_error_has_stack_newest_first() {
    let err = run_err(
        "function inner() {\n  throw \"deep\"\n}\nfunction outer() {\n  inner()\n}\nmain {\n  outer()\n}\n",
    );
    assert_eq!(err.kind, ErrorKind::UserThrown);
    let stack = err.render_stack();
    let frames: Vec<&str> = stack.lines().collect();
    assert!(frames[0].contains("inner"), "stack: {}", stack);
    assert!(frames[1].contains("outer"), "stack: {}", stack);
}

#[test]
fn test_aliased_stdlib_module() {
    // Scenario: with `use string as str`, str.upper("hi") yields "HI".
    let program = naab_syntax::parse_source(
        "use string as str\nmain {\n  print(str.upper(\"hi\"))\n}\n",
    )
    .unwrap();
    let mut interp = Interpreter::new(RuntimeConfig::default()).unwrap();
    interp
        .modules
        .register(StdlibModule::new("string").with_function("upper", |args| {
            match args {
                [Value::Str(s)] => Ok(Value::Str(s.to_uppercase())),
                _ => Err(RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    "string.upper expects one string argument",
                )),
            }
        }))
        .unwrap();
    let buffer = interp.capture_output();
    interp.run(&program).unwrap();
    assert_eq!(buffer.borrow().as_str(), "HI\n");
}

#[test]
fn test_cycle_collection_scenario() {
    // Scenario: two structs in a cycle, unreachable after nulling the
    // roots; gc() reports both collected.
    let output = run_ok(
        "struct Node {\n  value: int\n  next: Node?\n}\nmain {\n  let a = new Node { value: 1 }\n  let b = new Node { value: 2 }\n  a.next = b\n  b.next = a\n  a = null\n  b = null\n  print(gc())\n}\n",
    );
    assert_eq!(output, "2\n");
}

#[test]
fn test_gc_keeps_reachable_values() {
    let output = run_ok(
        "struct Node {\n  value: int\n  next: Node?\n}\nmain {\n  let a = new Node { value: 1 }\n  let b = new Node { value: 2 }\n  a.next = b\n  b.next = a\n  print(gc())\n  print(a.value)\n}\n",
    );
    assert_eq!(output, "0\n1\n");
}

#[test]
fn test_weak_field_not_traversed() {
    // The ring hangs off `keeper` only through a weak edge, so once the
    // direct names are gone the pair is collectable.
    let output = run_ok(
        "struct Node {\n  value: int\n  weak next: Node?\n}\nmain {\n  let a = new Node { value: 1 }\n  let b = new Node { value: 2 }\n  a.next = b\n  b.next = a\n  a = null\n  b = null\n  print(gc())\n}\n",
    );
    assert_eq!(output, "2\n");
}

#[test]
fn test_circular_struct_rejected() {
    let err = run_err(
        "struct Node {\n  next: Node\n}\nmain {\n}\n",
    );
    assert!(err.message.contains("circular"), "{}", err.message);
}

#[test]
fn test_loops_and_control_flow() {
    let output = run_ok(
        "main {\n  let total = 0\n  for i in range(10) {\n    if i % 2 == 0 {\n      continue\n    }\n    if i > 7 {\n      break\n    }\n    total = total + i\n  }\n  print(total)\n}\n",
    );
    // 1 + 3 + 5 + 7 = 16
    assert_eq!(output, "16\n");
}

#[test]
fn test_while_loop() {
    let output = run_ok(
        "main {\n  let i = 0\n  while i < 3 {\n    print(i)\n    i = i + 1\n  }\n}\n",
    );
    assert_eq!(output, "0\n1\n2\n");
}

#[test]
fn test_pipeline_operator() {
    let output = run_ok(
        "function double(x: int) -> int {\n  return x * 2\n}\nfunction add(x: int, y: int) -> int {\n  return x + y\n}\nmain {\n  print(5 |> double |> add(1))\n}\n",
    );
    // double(5) = 10, then add(10, 1) = 11.
    assert_eq!(output, "11\n");
}

#[test]
fn test_enum_members() {
    let output = run_ok(
        "enum Color {\n  Red\n  Green\n}\nmain {\n  print(Color.Red)\n}\n",
    );
    assert_eq!(output, "Red\n");
}

#[test]
fn test_const_rebinding_rejected() {
    let err = run_err("main {\n  const k = 1\n  k = 2\n}\n");
    assert_eq!(err.kind, ErrorKind::PermissionDenied);
}

#[test]
fn test_index_out_of_bounds() {
    let err = run_err("main {\n  let xs = [1]\n  print(xs[5])\n}\n");
    assert_eq!(err.kind, ErrorKind::IndexOutOfBounds);
}

#[test]
fn test_if_expression_and_ternary() {
    let output = run_ok(
        "main {\n  let a = if 1 < 2 { \"yes\" } else { \"no\" }\n  let b = 1 > 2 ? \"yes\" : \"no\"\n  print(a)\n  print(b)\n}\n",
    );
    assert_eq!(output, "yes\nno\n");
}

#[test]
fn test_dict_literal_and_member_sugar() {
    let output = run_ok(
        "main {\n  let d = { \"name\": \"naab\", \"age\": 1 }\n  print(d.name)\n  print(d[\"age\"])\n  d.age = 2\n  print(d.age)\n}\n",
    );
    assert_eq!(output, "naab\n1\n2\n");
}

#[test]
fn test_assignment_type_rechecked() {
    let err = run_err("main {\n  let x: int = 1\n  x = \"nope\"\n}\n");
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
}

#[test]
fn test_composite_equality_is_identity() {
    let output = run_ok(
        "main {\n  let a = [1, 2]\n  let b = [1, 2]\n  print(a == b)\n  print(a == a)\n}\n",
    );
    assert_eq!(output, "false\ntrue\n");
}

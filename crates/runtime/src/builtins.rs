//! Native builtins
//!
//! The handful of functions every program sees without any `use`:
//! printing, length, ranges, string coercion, and the collector and
//! block-search hooks. Anything bigger belongs in a stdlib module
//! registered through the module registry.

use crate::blocks::DEFAULT_RESULT_CAP;
use crate::error::{RuntimeError, Unwind};
use crate::eval::Interpreter;
use crate::value::{Binding, EnvRef, FunctionValue, Value};
use naab_core::ErrorKind;
use naab_syntax::ast::Span;
use std::collections::HashMap;
use std::rc::Rc;

const BUILTIN_NAMES: &[&str] = &[
    "print",
    "println",
    "len",
    "range",
    "str",
    "gc",
    "gc_stats",
    "block_search",
];

/// Install the builtins into a root environment.
pub fn register_builtins(globals: &EnvRef) {
    let mut globals = globals.borrow_mut();
    for name in BUILTIN_NAMES {
        globals.define(
            *name,
            Binding {
                value: Value::Function(Rc::new(FunctionValue::Native { name })),
                declared_type: None,
                is_const: true,
            },
        );
    }
}

fn arity_error(name: &str, expected: &str, got: usize) -> RuntimeError {
    RuntimeError::new(
        ErrorKind::TypeMismatch,
        format!("{} expects {} argument(s) but got {}", name, expected, got),
    )
}

/// Dispatch a native call.
pub fn call_native(
    interp: &mut Interpreter,
    name: &str,
    args: &[Value],
    span: Span,
    _env: &EnvRef,
) -> Result<Value, Unwind> {
    match name {
        "print" | "println" => {
            let line = args
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            interp.out.write_line(&line);
            Ok(Value::Void)
        }

        "len" => match args {
            [Value::List(list)] => Ok(Value::Int(list.borrow().len() as i64)),
            [Value::Dict(dict)] => Ok(Value::Int(dict.borrow().len() as i64)),
            [Value::Str(s)] => Ok(Value::Int(s.chars().count() as i64)),
            [other] => Err(interp.throw(
                RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    format!("len expects a list, dict, or string, got {}", other.type_name()),
                ),
                span,
            )),
            _ => Err(interp.throw(arity_error("len", "1", args.len()), span)),
        },

        "range" => {
            let (start, end) = match args {
                [Value::Int(end)] => (0, *end),
                [Value::Int(start), Value::Int(end)] => (*start, *end),
                _ => {
                    return Err(interp.throw(
                        arity_error("range", "1 or 2 int", args.len()),
                        span,
                    ));
                }
            };
            let items: Vec<Value> = (start..end).map(Value::Int).collect();
            Ok(interp.make_list(items))
        }

        "str" => match args {
            [value] => Ok(Value::Str(value.to_string())),
            _ => Err(interp.throw(arity_error("str", "1", args.len()), span)),
        },

        "gc" => {
            if !args.is_empty() {
                return Err(interp.throw(arity_error("gc", "0", args.len()), span));
            }
            let collected = interp.collect_garbage();
            Ok(Value::Int(collected as i64))
        }

        "gc_stats" => {
            if !args.is_empty() {
                return Err(interp.throw(arity_error("gc_stats", "0", args.len()), span));
            }
            let stats = interp.gc_stats();
            let mut entries = HashMap::new();
            entries.insert("collections".to_string(), Value::Int(stats.collections as i64));
            entries.insert(
                "collected_total".to_string(),
                Value::Int(stats.collected_total as i64),
            );
            entries.insert(
                "last_collected".to_string(),
                Value::Int(stats.last_collected as i64),
            );
            entries.insert(
                "live_tracked".to_string(),
                Value::Int(stats.live_tracked as i64),
            );
            entries.insert(
                "clock_backwards_jumps".to_string(),
                Value::Int(naab_core::safetime::backwards_jump_count() as i64),
            );
            Ok(interp.make_dict(entries))
        }

        "block_search" => match args {
            [Value::Str(query)] => {
                let ids = interp
                    .search_blocks(query, DEFAULT_RESULT_CAP)
                    .map_err(|e| interp.throw(e, span))?;
                let items: Vec<Value> = ids.into_iter().map(Value::Str).collect();
                Ok(interp.make_list(items))
            }
            _ => Err(interp.throw(
                arity_error("block_search", "1 string", args.len()),
                span,
            )),
        },

        other => Err(interp.throw(
            RuntimeError::new(
                ErrorKind::UnboundName,
                format!("unknown builtin '{}'", other),
            ),
            span,
        )),
    }
}

//! Value marshalling
//!
//! Renders host values as guest-language literals and declarations, one
//! generator per guest. The table is part of the language contract:
//! ints are `int`/`Number`-or-`BigInt`/`long long`/`i64`/decimal text,
//! heterogeneous containers are rejected where the guest is statically
//! typed, and null maps to each guest's own absent value.
//!
//! Values whose JSON rendering exceeds [`INLINE_LIMIT`] are written to a
//! side-channel file in the call's scratch directory and the variable is
//! bound to that path instead.

use crate::error::RuntimeError;
use crate::polyglot::langs::Language;
use crate::value::Value;
use naab_core::ErrorKind;
use std::path::Path;

/// Largest literal embedded directly in a guest program.
pub const INLINE_LIMIT: usize = 64 * 1024;

/// JavaScript's exact-integer boundary: |n| ≤ 2^53 stays `Number`.
pub const JS_SAFE_INT: i64 = 1 << 53;

fn marshal_err(language: Language, detail: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::new(
        ErrorKind::PolyglotError,
        format!("cannot marshal value for {}: {}", language.name(), detail),
    )
}

/// Convert a host value to JSON (used by side-channel files, struct
/// marshalling, and the shell's struct rendering). Functions, blocks,
/// and modules do not cross the boundary.
pub fn value_to_json(value: &Value) -> Result<serde_json::Value, RuntimeError> {
    Ok(match value {
        Value::Void => serde_json::Value::Null,
        Value::Int(n) => serde_json::Value::from(*n),
        Value::Float(x) => serde_json::Number::from_f64(*x)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Bool(b) => serde_json::Value::from(*b),
        Value::Str(s) => serde_json::Value::from(s.as_str()),
        Value::List(list) => serde_json::Value::Array(
            list.borrow()
                .iter()
                .map(value_to_json)
                .collect::<Result<_, _>>()?,
        ),
        Value::Dict(dict) => {
            let mut object = serde_json::Map::new();
            let dict = dict.borrow();
            let mut keys: Vec<&String> = dict.keys().collect();
            keys.sort();
            for key in keys {
                object.insert(key.clone(), value_to_json(&dict[key])?);
            }
            serde_json::Value::Object(object)
        }
        Value::Struct(sv) => {
            let sv = sv.borrow();
            let mut object = serde_json::Map::new();
            let mut keys: Vec<&String> = sv.fields.keys().collect();
            keys.sort();
            for key in keys {
                object.insert(key.clone(), value_to_json(&sv.fields[key])?);
            }
            serde_json::Value::Object(object)
        }
        other => {
            return Err(RuntimeError::new(
                ErrorKind::PolyglotError,
                format!("a {} value cannot cross the language boundary", other.type_name()),
            ));
        }
    })
}

/// Convert a guest JSON payload back to a host value. The caller is
/// responsible for registering the composites with the heap.
pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Void,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => Value::List(std::rc::Rc::new(std::cell::RefCell::new(
            items.iter().map(json_to_value).collect(),
        ))),
        serde_json::Value::Object(object) => {
            let map = object
                .iter()
                .map(|(k, v)| (k.clone(), json_to_value(v)))
                .collect();
            Value::Dict(std::rc::Rc::new(std::cell::RefCell::new(map)))
        }
    }
}

/// Build the guest prelude declaring every binding. Large values are
/// diverted to side-channel files under `scratch`.
pub fn prelude_for(
    language: Language,
    bindings: &[(String, Value)],
    scratch: &Path,
) -> Result<String, RuntimeError> {
    let mut prelude = String::new();
    for (name, value) in bindings {
        let value = match sidechannel(language, name, value, scratch)? {
            Some(path) => Value::Str(path),
            None => value.clone(),
        };
        let decl = match language {
            Language::Python => format!("{} = {}\n", name, python_literal(&value)?),
            Language::JavaScript => format!("const {} = {};\n", name, js_literal(&value)?),
            Language::Cpp => cpp_decl(name, &value)?,
            Language::Rust => rust_decl(name, &value)?,
            Language::Go => go_decl(name, &value)?,
            Language::Ruby => format!("{} = {}\n", name, ruby_literal(&value)?),
            Language::Php => format!("${} = {};\n", name, php_literal(&value)?),
            Language::CSharp => csharp_decl(name, &value)?,
            Language::Shell => shell_decl(name, &value)?,
        };
        prelude.push_str(&decl);
    }
    Ok(prelude)
}

/// Divert oversized values to a file; returns the bound path when the
/// value went sideways.
fn sidechannel(
    language: Language,
    name: &str,
    value: &Value,
    scratch: &Path,
) -> Result<Option<String>, RuntimeError> {
    let json = match value {
        Value::List(_) | Value::Dict(_) | Value::Struct(_) | Value::Str(_) => {
            value_to_json(value)?
        }
        _ => return Ok(None),
    };
    let rendered = serde_json::to_string(&json).map_err(|e| marshal_err(language, e))?;
    if rendered.len() <= INLINE_LIMIT {
        return Ok(None);
    }
    let path = scratch.join(format!("{}.json", name));
    std::fs::write(&path, rendered)
        .map_err(|e| marshal_err(language, format!("side-channel write failed: {}", e)))?;
    Ok(Some(path.to_string_lossy().into_owned()))
}

/// Double-quoted, JSON-escaped string literal. Valid in Python, JS,
/// Rust, C#, Ruby, and C++ sources alike.
fn quoted(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

// ---------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------

pub fn python_literal(value: &Value) -> Result<String, RuntimeError> {
    Ok(match value {
        Value::Void => "None".to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(x) => format_float(*x),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Str(s) => quoted(s),
        Value::List(list) => {
            let items: Result<Vec<String>, RuntimeError> =
                list.borrow().iter().map(python_literal).collect();
            format!("[{}]", items?.join(", "))
        }
        Value::Dict(dict) => {
            let dict = dict.borrow();
            let mut keys: Vec<&String> = dict.keys().collect();
            keys.sort();
            let items: Result<Vec<String>, RuntimeError> = keys
                .iter()
                .map(|k| Ok(format!("{}: {}", quoted(k), python_literal(&dict[*k])?)))
                .collect();
            format!("{{{}}}", items?.join(", "))
        }
        Value::Struct(sv) => {
            let sv = sv.borrow();
            let mut keys: Vec<&String> = sv.fields.keys().collect();
            keys.sort();
            let items: Result<Vec<String>, RuntimeError> = keys
                .iter()
                .map(|k| Ok(format!("{}: {}", quoted(k), python_literal(&sv.fields[*k])?)))
                .collect();
            format!("{{{}}}", items?.join(", "))
        }
        other => return Err(marshal_err(Language::Python, other.type_name())),
    })
}

// ---------------------------------------------------------------------
// JavaScript
// ---------------------------------------------------------------------

pub fn js_literal(value: &Value) -> Result<String, RuntimeError> {
    Ok(match value {
        Value::Void => "null".to_string(),
        Value::Int(n) => {
            if n.abs() <= JS_SAFE_INT {
                n.to_string()
            } else {
                // Beyond 2^53 Number loses exactness; escalate to BigInt.
                format!("{}n", n)
            }
        }
        Value::Float(x) => format_float(*x),
        Value::Bool(b) => b.to_string(),
        Value::Str(s) => quoted(s),
        Value::List(list) => {
            let items: Result<Vec<String>, RuntimeError> =
                list.borrow().iter().map(js_literal).collect();
            format!("[{}]", items?.join(", "))
        }
        Value::Dict(dict) => {
            let dict = dict.borrow();
            let mut keys: Vec<&String> = dict.keys().collect();
            keys.sort();
            let items: Result<Vec<String>, RuntimeError> = keys
                .iter()
                .map(|k| Ok(format!("{}: {}", quoted(k), js_literal(&dict[*k])?)))
                .collect();
            format!("{{{}}}", items?.join(", "))
        }
        Value::Struct(sv) => {
            let sv = sv.borrow();
            let mut keys: Vec<&String> = sv.fields.keys().collect();
            keys.sort();
            let items: Result<Vec<String>, RuntimeError> = keys
                .iter()
                .map(|k| Ok(format!("{}: {}", quoted(k), js_literal(&sv.fields[*k])?)))
                .collect();
            format!("{{{}}}", items?.join(", "))
        }
        other => return Err(marshal_err(Language::JavaScript, other.type_name())),
    })
}

// ---------------------------------------------------------------------
// C++ (typed declarations)
// ---------------------------------------------------------------------

/// C++ scalar type of a value, for container element typing.
fn cpp_scalar_type(value: &Value) -> Option<&'static str> {
    match value {
        Value::Int(_) => Some("long long"),
        Value::Float(_) => Some("double"),
        Value::Bool(_) => Some("bool"),
        Value::Str(_) => Some("std::string"),
        _ => None,
    }
}

fn cpp_scalar_literal(value: &Value) -> Option<String> {
    match value {
        Value::Int(n) => Some(format!("{}LL", n)),
        Value::Float(x) => Some(format_float(*x)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Str(s) => Some(format!("std::string({})", quoted(s))),
        _ => None,
    }
}

pub fn cpp_decl(name: &str, value: &Value) -> Result<String, RuntimeError> {
    Ok(match value {
        Value::Void => format!("std::optional<long long> {}{{}};\n", name),
        Value::Int(n) => format!("long long {} = {}LL;\n", name, n),
        Value::Float(x) => format!("double {} = {};\n", name, format_float(*x)),
        Value::Bool(b) => format!("bool {} = {};\n", name, b),
        Value::Str(s) => format!("std::string {} = {};\n", name, quoted(s)),
        Value::List(list) => {
            let list = list.borrow();
            let elem = list.first().and_then(cpp_scalar_type).ok_or_else(|| {
                marshal_err(Language::Cpp, "only non-empty lists of scalars map to std::vector")
            })?;
            let items: Result<Vec<String>, RuntimeError> = list
                .iter()
                .map(|v| {
                    if cpp_scalar_type(v) != Some(elem) {
                        return Err(marshal_err(
                            Language::Cpp,
                            "heterogeneous list has no std::vector element type",
                        ));
                    }
                    Ok(cpp_scalar_literal(v).expect("scalar"))
                })
                .collect();
            format!("std::vector<{}> {} = {{{}}};\n", elem, name, items?.join(", "))
        }
        Value::Dict(dict) => {
            let dict = dict.borrow();
            let mut keys: Vec<&String> = dict.keys().collect();
            keys.sort();
            let elem = keys
                .first()
                .and_then(|k| cpp_scalar_type(&dict[*k]))
                .ok_or_else(|| {
                    marshal_err(Language::Cpp, "only non-empty dicts of scalars map to std::map")
                })?;
            let items: Result<Vec<String>, RuntimeError> = keys
                .iter()
                .map(|k| {
                    let v = &dict[*k];
                    if cpp_scalar_type(v) != Some(elem) {
                        return Err(marshal_err(
                            Language::Cpp,
                            "heterogeneous dict has no std::map value type",
                        ));
                    }
                    Ok(format!("{{{}, {}}}", quoted(k), cpp_scalar_literal(v).expect("scalar")))
                })
                .collect();
            format!(
                "std::map<std::string, {}> {} = {{{}}};\n",
                elem,
                name,
                items?.join(", ")
            )
        }
        Value::Struct(sv) => {
            let sv = sv.borrow();
            let mut keys: Vec<&String> = sv.fields.keys().collect();
            keys.sort();
            let mut fields = String::new();
            let mut init = Vec::new();
            for key in keys {
                let field_value = &sv.fields[key];
                let ty = cpp_scalar_type(field_value).ok_or_else(|| {
                    marshal_err(Language::Cpp, "struct fields must be scalars to generate a POD")
                })?;
                fields.push_str(&format!("    {} {};\n", ty, key));
                init.push(cpp_scalar_literal(field_value).expect("scalar"));
            }
            format!(
                "struct Naab_{ty_name} {{\n{fields}}};\nNaab_{ty_name} {name} = {{{init}}};\n",
                ty_name = sv.name,
                fields = fields,
                name = name,
                init = init.join(", "),
            )
        }
        other => return Err(marshal_err(Language::Cpp, other.type_name())),
    })
}

// ---------------------------------------------------------------------
// Rust
// ---------------------------------------------------------------------

fn rust_scalar_type(value: &Value) -> Option<&'static str> {
    match value {
        Value::Int(_) => Some("i64"),
        Value::Float(_) => Some("f64"),
        Value::Bool(_) => Some("bool"),
        Value::Str(_) => Some("String"),
        _ => None,
    }
}

fn rust_scalar_literal(value: &Value) -> Option<String> {
    match value {
        Value::Int(n) => Some(format!("{}i64", n)),
        Value::Float(x) => Some(format!("{}f64", format_float(*x))),
        Value::Bool(b) => Some(b.to_string()),
        Value::Str(s) => Some(format!("{}.to_string()", quoted(s))),
        _ => None,
    }
}

pub fn rust_decl(name: &str, value: &Value) -> Result<String, RuntimeError> {
    Ok(match value {
        Value::Void => format!("let {}: Option<i64> = None;\n", name),
        Value::Int(n) => format!("let {}: i64 = {};\n", name, n),
        Value::Float(x) => format!("let {}: f64 = {};\n", name, format_float(*x)),
        Value::Bool(b) => format!("let {}: bool = {};\n", name, b),
        Value::Str(s) => format!("let {}: String = {}.to_string();\n", name, quoted(s)),
        Value::List(list) => {
            let list = list.borrow();
            let elem = list.first().and_then(rust_scalar_type).ok_or_else(|| {
                marshal_err(Language::Rust, "only non-empty lists of scalars map to Vec<T>")
            })?;
            let items: Result<Vec<String>, RuntimeError> = list
                .iter()
                .map(|v| {
                    if rust_scalar_type(v) != Some(elem) {
                        return Err(marshal_err(
                            Language::Rust,
                            "heterogeneous list has no Vec element type",
                        ));
                    }
                    Ok(rust_scalar_literal(v).expect("scalar"))
                })
                .collect();
            format!("let {}: Vec<{}> = vec![{}];\n", name, elem, items?.join(", "))
        }
        Value::Dict(dict) => {
            let dict = dict.borrow();
            let mut keys: Vec<&String> = dict.keys().collect();
            keys.sort();
            let elem = keys
                .first()
                .and_then(|k| rust_scalar_type(&dict[*k]))
                .ok_or_else(|| {
                    marshal_err(Language::Rust, "only non-empty dicts of scalars map to HashMap")
                })?;
            let items: Result<Vec<String>, RuntimeError> = keys
                .iter()
                .map(|k| {
                    let v = &dict[*k];
                    if rust_scalar_type(v) != Some(elem) {
                        return Err(marshal_err(
                            Language::Rust,
                            "heterogeneous dict has no HashMap value type",
                        ));
                    }
                    Ok(format!(
                        "({}.to_string(), {})",
                        quoted(k),
                        rust_scalar_literal(v).expect("scalar")
                    ))
                })
                .collect();
            format!(
                "let {}: std::collections::HashMap<String, {}> = std::collections::HashMap::from([{}]);\n",
                name,
                elem,
                items?.join(", ")
            )
        }
        Value::Struct(sv) => {
            let sv = sv.borrow();
            let mut keys: Vec<&String> = sv.fields.keys().collect();
            keys.sort();
            let mut fields = String::new();
            let mut init = Vec::new();
            for key in keys {
                let field_value = &sv.fields[key];
                let ty = rust_scalar_type(field_value).ok_or_else(|| {
                    marshal_err(Language::Rust, "struct fields must be scalars to generate a struct")
                })?;
                fields.push_str(&format!("    {}: {},\n", key, ty));
                init.push(format!(
                    "{}: {}",
                    key,
                    rust_scalar_literal(field_value).expect("scalar")
                ));
            }
            format!(
                "#[allow(dead_code)]\nstruct Naab{ty_name} {{\n{fields}}}\nlet {name} = Naab{ty_name} {{ {init} }};\n",
                ty_name = sv.name,
                fields = fields,
                name = name,
                init = init.join(", "),
            )
        }
        other => return Err(marshal_err(Language::Rust, other.type_name())),
    })
}

// ---------------------------------------------------------------------
// Go
// ---------------------------------------------------------------------

fn go_scalar_type(value: &Value) -> Option<&'static str> {
    match value {
        Value::Int(_) => Some("int64"),
        Value::Float(_) => Some("float64"),
        Value::Bool(_) => Some("bool"),
        Value::Str(_) => Some("string"),
        _ => None,
    }
}

fn go_scalar_literal(value: &Value) -> Option<String> {
    match value {
        Value::Int(n) => Some(format!("int64({})", n)),
        Value::Float(x) => Some(format_float(*x)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Str(s) => Some(quoted(s)),
        _ => None,
    }
}

pub fn go_decl(name: &str, value: &Value) -> Result<String, RuntimeError> {
    let decl = match value {
        Value::Void => format!("var {} interface{{}} = nil\n", name),
        Value::Int(n) => format!("{} := int64({})\n", name, n),
        Value::Float(x) => format!("{} := {}\n", name, format_float(*x)),
        Value::Bool(b) => format!("{} := {}\n", name, b),
        Value::Str(s) => format!("{} := {}\n", name, quoted(s)),
        Value::List(list) => {
            let list = list.borrow();
            let elem = list.first().and_then(go_scalar_type).ok_or_else(|| {
                marshal_err(Language::Go, "only non-empty lists of scalars map to a slice")
            })?;
            let items: Result<Vec<String>, RuntimeError> = list
                .iter()
                .map(|v| {
                    if go_scalar_type(v) != Some(elem) {
                        return Err(marshal_err(
                            Language::Go,
                            "heterogeneous list has no slice element type",
                        ));
                    }
                    Ok(go_scalar_literal(v).expect("scalar"))
                })
                .collect();
            format!("{} := []{}{{{}}}\n", name, elem, items?.join(", "))
        }
        Value::Dict(dict) => {
            let dict = dict.borrow();
            let mut keys: Vec<&String> = dict.keys().collect();
            keys.sort();
            let elem = keys
                .first()
                .and_then(|k| go_scalar_type(&dict[*k]))
                .ok_or_else(|| {
                    marshal_err(Language::Go, "only non-empty dicts of scalars map to a map")
                })?;
            let items: Result<Vec<String>, RuntimeError> = keys
                .iter()
                .map(|k| {
                    let v = &dict[*k];
                    if go_scalar_type(v) != Some(elem) {
                        return Err(marshal_err(
                            Language::Go,
                            "heterogeneous dict has no map value type",
                        ));
                    }
                    Ok(format!("{}: {}", quoted(k), go_scalar_literal(v).expect("scalar")))
                })
                .collect();
            format!("{} := map[string]{}{{{}}}\n", name, elem, items?.join(", "))
        }
        other => {
            let json = value_to_json(other)?;
            format!(
                "{} := {}\n",
                name,
                quoted(&serde_json::to_string(&json).unwrap_or_default())
            )
        }
    };
    // Go refuses to compile unused variables.
    Ok(format!("{}_ = {}\n", decl, name))
}

// ---------------------------------------------------------------------
// Ruby
// ---------------------------------------------------------------------

pub fn ruby_literal(value: &Value) -> Result<String, RuntimeError> {
    Ok(match value {
        Value::Void => "nil".to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(x) => format_float(*x),
        Value::Bool(b) => b.to_string(),
        Value::Str(s) => quoted(s),
        Value::List(list) => {
            let items: Result<Vec<String>, RuntimeError> =
                list.borrow().iter().map(ruby_literal).collect();
            format!("[{}]", items?.join(", "))
        }
        Value::Dict(dict) => {
            let dict = dict.borrow();
            let mut keys: Vec<&String> = dict.keys().collect();
            keys.sort();
            let items: Result<Vec<String>, RuntimeError> = keys
                .iter()
                .map(|k| Ok(format!("{} => {}", quoted(k), ruby_literal(&dict[*k])?)))
                .collect();
            format!("{{{}}}", items?.join(", "))
        }
        Value::Struct(sv) => {
            let sv = sv.borrow();
            let mut keys: Vec<&String> = sv.fields.keys().collect();
            keys.sort();
            let items: Result<Vec<String>, RuntimeError> = keys
                .iter()
                .map(|k| Ok(format!("{} => {}", quoted(k), ruby_literal(&sv.fields[*k])?)))
                .collect();
            format!("{{{}}}", items?.join(", "))
        }
        other => return Err(marshal_err(Language::Ruby, other.type_name())),
    })
}

// ---------------------------------------------------------------------
// PHP
// ---------------------------------------------------------------------

/// Single-quoted PHP string: no `$` interpolation hazard.
fn php_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

pub fn php_literal(value: &Value) -> Result<String, RuntimeError> {
    Ok(match value {
        Value::Void => "null".to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(x) => format_float(*x),
        Value::Bool(b) => b.to_string(),
        Value::Str(s) => php_quoted(s),
        Value::List(list) => {
            let items: Result<Vec<String>, RuntimeError> =
                list.borrow().iter().map(php_literal).collect();
            format!("[{}]", items?.join(", "))
        }
        Value::Dict(dict) => {
            let dict = dict.borrow();
            let mut keys: Vec<&String> = dict.keys().collect();
            keys.sort();
            let items: Result<Vec<String>, RuntimeError> = keys
                .iter()
                .map(|k| Ok(format!("{} => {}", php_quoted(k), php_literal(&dict[*k])?)))
                .collect();
            format!("[{}]", items?.join(", "))
        }
        Value::Struct(sv) => {
            let sv = sv.borrow();
            let mut keys: Vec<&String> = sv.fields.keys().collect();
            keys.sort();
            let items: Result<Vec<String>, RuntimeError> = keys
                .iter()
                .map(|k| Ok(format!("{} => {}", php_quoted(k), php_literal(&sv.fields[*k])?)))
                .collect();
            format!("[{}]", items?.join(", "))
        }
        other => return Err(marshal_err(Language::Php, other.type_name())),
    })
}

// ---------------------------------------------------------------------
// C#
// ---------------------------------------------------------------------

fn csharp_scalar_type(value: &Value) -> Option<&'static str> {
    match value {
        Value::Int(_) => Some("long"),
        Value::Float(_) => Some("double"),
        Value::Bool(_) => Some("bool"),
        Value::Str(_) => Some("string"),
        _ => None,
    }
}

fn csharp_scalar_literal(value: &Value) -> Option<String> {
    match value {
        Value::Int(n) => Some(format!("{}L", n)),
        Value::Float(x) => Some(format_float(*x)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Str(s) => Some(quoted(s)),
        _ => None,
    }
}

pub fn csharp_decl(name: &str, value: &Value) -> Result<String, RuntimeError> {
    Ok(match value {
        Value::Void => format!("object {} = null;\n", name),
        Value::Int(n) => format!("long {} = {}L;\n", name, n),
        Value::Float(x) => format!("double {} = {};\n", name, format_float(*x)),
        Value::Bool(b) => format!("bool {} = {};\n", name, b),
        Value::Str(s) => format!("string {} = {};\n", name, quoted(s)),
        Value::List(list) => {
            let list = list.borrow();
            let elem = list.first().and_then(csharp_scalar_type).ok_or_else(|| {
                marshal_err(Language::CSharp, "only non-empty lists of scalars map to arrays")
            })?;
            let items: Result<Vec<String>, RuntimeError> = list
                .iter()
                .map(|v| {
                    if csharp_scalar_type(v) != Some(elem) {
                        return Err(marshal_err(
                            Language::CSharp,
                            "heterogeneous list has no array element type",
                        ));
                    }
                    Ok(csharp_scalar_literal(v).expect("scalar"))
                })
                .collect();
            format!("{}[] {} = new {}[]{{{}}};\n", elem, name, elem, items?.join(", "))
        }
        Value::Dict(dict) => {
            let dict = dict.borrow();
            let mut keys: Vec<&String> = dict.keys().collect();
            keys.sort();
            let elem = keys
                .first()
                .and_then(|k| csharp_scalar_type(&dict[*k]))
                .ok_or_else(|| {
                    marshal_err(Language::CSharp, "only non-empty dicts of scalars map to Dictionary")
                })?;
            let items: Result<Vec<String>, RuntimeError> = keys
                .iter()
                .map(|k| {
                    let v = &dict[*k];
                    if csharp_scalar_type(v) != Some(elem) {
                        return Err(marshal_err(
                            Language::CSharp,
                            "heterogeneous dict has no Dictionary value type",
                        ));
                    }
                    Ok(format!("{{{}, {}}}", quoted(k), csharp_scalar_literal(v).expect("scalar")))
                })
                .collect();
            format!(
                "var {} = new System.Collections.Generic.Dictionary<string, {}>{{{}}};\n",
                name,
                elem,
                items?.join(", ")
            )
        }
        Value::Struct(_) => {
            let json = value_to_json(value)?;
            format!(
                "string {} = {};\n",
                name,
                quoted(&serde_json::to_string(&json).unwrap_or_default())
            )
        }
        other => return Err(marshal_err(Language::CSharp, other.type_name())),
    })
}

// ---------------------------------------------------------------------
// Shell
// ---------------------------------------------------------------------

/// Single-quoted shell word, `'` escaped the POSIX way.
fn shell_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

pub fn shell_decl(name: &str, value: &Value) -> Result<String, RuntimeError> {
    let rendered = match value {
        Value::Void => String::new(),
        Value::Int(n) => n.to_string(),
        Value::Float(x) => format_float(*x),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Str(s) => s.clone(),
        Value::List(list) => {
            let items: Vec<String> = list
                .borrow()
                .iter()
                .map(|v| match v {
                    Value::Str(s) => Ok(s.clone()),
                    Value::Int(n) => Ok(n.to_string()),
                    Value::Float(x) => Ok(format_float(*x)),
                    Value::Bool(true) => Ok("1".to_string()),
                    Value::Bool(false) => Ok("0".to_string()),
                    other => Err(marshal_err(Language::Shell, other.type_name())),
                })
                .collect::<Result<_, _>>()?;
            items.join("\n")
        }
        Value::Dict(dict) => {
            let dict = dict.borrow();
            let mut keys: Vec<&String> = dict.keys().collect();
            keys.sort();
            let items: Vec<String> = keys
                .iter()
                .map(|k| match &dict[*k] {
                    Value::Str(s) => Ok(format!("{}={}", k, s)),
                    Value::Int(n) => Ok(format!("{}={}", k, n)),
                    Value::Float(x) => Ok(format!("{}={}", k, format_float(*x))),
                    Value::Bool(b) => Ok(format!("{}={}", k, if *b { 1 } else { 0 })),
                    other => Err(marshal_err(Language::Shell, other.type_name())),
                })
                .collect::<Result<_, _>>()?;
            items.join("\n")
        }
        Value::Struct(_) => {
            let json = value_to_json(value)?;
            serde_json::to_string(&json).unwrap_or_default()
        }
        other => return Err(marshal_err(Language::Shell, other.type_name())),
    };
    Ok(format!("{}={}\n", name, shell_quoted(&rendered)))
}

/// Render a float so every guest re-reads it as a float (`2` → `2.0`).
fn format_float(x: f64) -> String {
    if x.fract() == 0.0 && x.is_finite() && x.abs() < 1e15 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    fn dict(pairs: &[(&str, Value)]) -> Value {
        let map: HashMap<String, Value> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Value::Dict(Rc::new(RefCell::new(map)))
    }

    #[test]
    fn test_python_literals() {
        assert_eq!(python_literal(&Value::Int(5)).unwrap(), "5");
        assert_eq!(python_literal(&Value::Bool(true)).unwrap(), "True");
        assert_eq!(python_literal(&Value::Void).unwrap(), "None");
        assert_eq!(python_literal(&Value::Float(2.0)).unwrap(), "2.0");
        assert_eq!(
            python_literal(&list(vec![Value::Int(1), Value::Str("a".into())])).unwrap(),
            "[1, \"a\"]"
        );
        assert_eq!(
            python_literal(&dict(&[("k", Value::Int(1))])).unwrap(),
            "{\"k\": 1}"
        );
    }

    #[test]
    fn test_js_bigint_boundary() {
        assert_eq!(js_literal(&Value::Int(42)).unwrap(), "42");
        let big = (1i64 << 53) + 1;
        assert_eq!(js_literal(&Value::Int(big)).unwrap(), format!("{}n", big));
        assert_eq!(
            js_literal(&Value::Int(JS_SAFE_INT)).unwrap(),
            JS_SAFE_INT.to_string()
        );
    }

    #[test]
    fn test_cpp_homogeneous_vector() {
        let decl = cpp_decl("xs", &list(vec![Value::Int(1), Value::Int(2)])).unwrap();
        assert_eq!(decl, "std::vector<long long> xs = {1LL, 2LL};\n");
    }

    #[test]
    fn test_cpp_heterogeneous_rejected() {
        let err = cpp_decl("xs", &list(vec![Value::Int(1), Value::Str("a".into())])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PolyglotError);
    }

    #[test]
    fn test_cpp_null_is_empty_optional() {
        assert_eq!(
            cpp_decl("x", &Value::Void).unwrap(),
            "std::optional<long long> x{};\n"
        );
    }

    #[test]
    fn test_rust_decls() {
        assert_eq!(rust_decl("n", &Value::Int(7)).unwrap(), "let n: i64 = 7;\n");
        assert_eq!(
            rust_decl("xs", &list(vec![Value::Int(1)])).unwrap(),
            "let xs: Vec<i64> = vec![1i64];\n"
        );
        assert_eq!(
            rust_decl("x", &Value::Void).unwrap(),
            "let x: Option<i64> = None;\n"
        );
    }

    #[test]
    fn test_shell_quoting() {
        let decl = shell_decl("s", &Value::Str("it's".into())).unwrap();
        assert_eq!(decl, "s='it'\\''s'\n");
        assert_eq!(shell_decl("b", &Value::Bool(true)).unwrap(), "b='1'\n");
        assert_eq!(shell_decl("x", &Value::Void).unwrap(), "x=''\n");
    }

    #[test]
    fn test_shell_list_newline_joined() {
        let decl = shell_decl("xs", &list(vec![Value::Int(1), Value::Int(2)])).unwrap();
        assert_eq!(decl, "xs='1\n2'\n");
    }

    #[test]
    fn test_php_no_interpolation() {
        let rendered = php_literal(&Value::Str("costs $5".into())).unwrap();
        assert_eq!(rendered, "'costs $5'");
    }

    #[test]
    fn test_json_round_trip_primitives_and_containers() {
        let original = dict(&[
            ("n", Value::Int(3)),
            ("s", Value::Str("x".into())),
            ("xs", list(vec![Value::Int(1), Value::Int(2)])),
        ]);
        let json = value_to_json(&original).unwrap();
        let back = json_to_value(&json);

        let Value::Dict(back) = back else { panic!("expected dict") };
        let back = back.borrow();
        assert_eq!(back["n"], Value::Int(3));
        assert_eq!(back["s"], Value::Str("x".into()));
        let Value::List(xs) = &back["xs"] else { panic!("expected list") };
        assert_eq!(xs.borrow().as_slice(), &[Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_function_cannot_cross_boundary() {
        use crate::value::FunctionValue;
        let func = Value::Function(Rc::new(FunctionValue::Native { name: "print" }));
        assert!(value_to_json(&func).is_err());
    }

    #[test]
    fn test_sidechannel_threshold() {
        let scratch = tempfile::tempdir().unwrap();
        let big = Value::Str("x".repeat(INLINE_LIMIT + 10));
        let path = sidechannel(Language::Python, "data", &big, scratch.path())
            .unwrap()
            .expect("diverted");
        assert!(std::path::Path::new(&path).is_file());

        let small = Value::Str("tiny".into());
        assert!(
            sidechannel(Language::Python, "t", &small, scratch.path())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_prelude_python() {
        let scratch = tempfile::tempdir().unwrap();
        let prelude = prelude_for(
            Language::Python,
            &[
                ("a".to_string(), Value::Int(10)),
                ("b".to_string(), Value::Int(20)),
            ],
            scratch.path(),
        )
        .unwrap();
        assert_eq!(prelude, "a = 10\nb = 20\n");
    }
}

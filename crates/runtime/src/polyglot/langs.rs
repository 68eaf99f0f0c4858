//! Guest languages and their executors
//!
//! An [`Executor`] knows three things about its guest: how to wrap a
//! prelude + body into a runnable program, which file extension the
//! toolchain expects, and which commands compile and/or run it.
//!
//! Wrapping rules are part of the language contract:
//! - Python: a single expression is `eval`-ed and its value returned via
//!   the sentinel protocol; multi-statement bodies are `exec`-ed (void).
//! - JavaScript: the body runs inside an IIFE so `const`/`let` never
//!   collide across blocks; the IIFE's value is returned.
//! - C++: the body lands inside a generated `main` with the standard
//!   header set; guests call `naab_return(...)` to send a value back.
//! - Shell: no wrapping beyond the prelude; the caller always receives
//!   `{ exit_code, stdout, stderr }` and nothing ever throws.

use crate::polyglot::{END_RETURN_SENTINEL, RETURN_SENTINEL};
use std::fmt;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    Cpp,
    Rust,
    Go,
    Ruby,
    Php,
    CSharp,
    Shell,
}

impl Language {
    /// Canonical lower-case name.
    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Cpp => "cpp",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::CSharp => "csharp",
            Language::Shell => "shell",
        }
    }

    /// Accepts canonical names and common aliases, as written after `<<`.
    pub fn from_name(name: &str) -> Option<Language> {
        match name {
            "python" | "py" => Some(Language::Python),
            "javascript" | "js" | "node" => Some(Language::JavaScript),
            "cpp" | "c++" => Some(Language::Cpp),
            "rust" | "rs" => Some(Language::Rust),
            "go" => Some(Language::Go),
            "ruby" | "rb" => Some(Language::Ruby),
            "php" => Some(Language::Php),
            "csharp" | "cs" => Some(Language::CSharp),
            "shell" | "sh" | "bash" => Some(Language::Shell),
            _ => None,
        }
    }

    /// Compiled guests get a compile step with its own timeout.
    pub fn is_compiled(&self) -> bool {
        matches!(
            self,
            Language::Cpp | Language::Rust | Language::Go | Language::CSharp
        )
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One toolchain invocation. `is_compile` selects which timeout applies.
#[derive(Debug, Clone)]
pub struct Step {
    pub program: String,
    pub args: Vec<String>,
    pub is_compile: bool,
}

impl Step {
    fn run(program: &str, args: Vec<String>) -> Step {
        Step {
            program: program.to_string(),
            args,
            is_compile: false,
        }
    }

    fn compile(program: &str, args: Vec<String>) -> Step {
        Step {
            program: program.to_string(),
            args,
            is_compile: true,
        }
    }
}

/// A fully assembled guest program, ready to run off-thread. Nothing
/// here touches `Rc`, so jobs can cross into the fan-out pool.
#[derive(Debug)]
pub struct PreparedProgram {
    pub language: Language,
    pub source: String,
    pub exec_timeout: Duration,
    pub compile_timeout: Duration,
    /// Holds side-channel binding files alive until the guest has run;
    /// dropped (and unlinked) with the program.
    pub sidechannel: Option<tempfile::TempDir>,
}

pub trait Executor: Send + Sync {
    fn language(&self) -> Language;

    /// Source-file extension the toolchain expects.
    fn file_extension(&self) -> &'static str;

    /// Assemble prelude + body into a complete program.
    fn wrap(&self, prelude: &str, body: &str) -> String;

    /// Commands to compile (optionally) and run the written program.
    /// `scratch` is the call-private directory holding the source file.
    fn steps(&self, program: &Path, scratch: &Path) -> Vec<Step>;
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// ---------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------

pub struct PythonExecutor;

impl Executor for PythonExecutor {
    fn language(&self) -> Language {
        Language::Python
    }

    fn file_extension(&self) -> &'static str {
        "py"
    }

    fn wrap(&self, prelude: &str, body: &str) -> String {
        // The body is embedded as a literal and compiled at guest time:
        // eval for a single expression, exec (void result) otherwise.
        let body_literal = serde_json::to_string(body).unwrap_or_else(|_| "\"\"".to_string());
        format!(
            "import json as _naab_json\n\
             {prelude}\
             _naab_body = {body_literal}\n\
             try:\n\
             \x20   _naab_code = compile(_naab_body, \"<naab>\", \"eval\")\n\
             except SyntaxError:\n\
             \x20   _naab_code = None\n\
             if _naab_code is not None:\n\
             \x20   _naab_result = eval(_naab_code)\n\
             \x20   if _naab_result is not None:\n\
             \x20       print(\"{open}\")\n\
             \x20       print(_naab_json.dumps(_naab_result, default=str))\n\
             \x20       print(\"{close}\")\n\
             else:\n\
             \x20   exec(compile(_naab_body, \"<naab>\", \"exec\"))\n",
            prelude = prelude,
            body_literal = body_literal,
            open = RETURN_SENTINEL,
            close = END_RETURN_SENTINEL,
        )
    }

    fn steps(&self, program: &Path, _scratch: &Path) -> Vec<Step> {
        vec![Step::run("python3", vec![path_str(program)])]
    }
}

// ---------------------------------------------------------------------
// JavaScript
// ---------------------------------------------------------------------

pub struct JavaScriptExecutor;

/// Is the body a single expression line (no statement keyword, no
/// semicolons, one line)? Such bodies get an implicit `return`.
fn js_single_expression(body: &str) -> Option<&str> {
    let lines: Vec<&str> = body.lines().filter(|l| !l.trim().is_empty()).collect();
    let [line] = lines.as_slice() else { return None };
    let trimmed = line.trim();
    let first_word = trimmed.split(|c: char| !c.is_ascii_alphanumeric()).next()?;
    const STATEMENT_KEYWORDS: &[&str] = &[
        "const", "let", "var", "if", "for", "while", "return", "function", "throw", "switch",
        "class", "try",
    ];
    if STATEMENT_KEYWORDS.contains(&first_word) || trimmed.contains(';') {
        None
    } else {
        Some(trimmed)
    }
}

impl Executor for JavaScriptExecutor {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn file_extension(&self) -> &'static str {
        "js"
    }

    fn wrap(&self, prelude: &str, body: &str) -> String {
        let inner = match js_single_expression(body) {
            Some(expr) => format!("return ({});", expr),
            None => body.to_string(),
        };
        format!(
            "{prelude}\
             const __naab_result = (() => {{\n{inner}\n}})();\n\
             if (__naab_result !== undefined) {{\n\
             \x20 const __naab_payload = JSON.stringify(__naab_result, (__k, __v) =>\n\
             \x20   typeof __v === \"bigint\" ? __v.toString() : __v);\n\
             \x20 console.log(\"{open}\");\n\
             \x20 console.log(__naab_payload);\n\
             \x20 console.log(\"{close}\");\n\
             }}\n",
            prelude = prelude,
            inner = inner,
            open = RETURN_SENTINEL,
            close = END_RETURN_SENTINEL,
        )
    }

    fn steps(&self, program: &Path, _scratch: &Path) -> Vec<Step> {
        vec![Step::run("node", vec![path_str(program)])]
    }
}

// ---------------------------------------------------------------------
// C++
// ---------------------------------------------------------------------

pub struct CppExecutor;

/// The standard header set every generated C++ program gets, plus
/// `<optional>` for null bindings and `<cstdio>` for the return helpers.
const CPP_HEADERS: &[&str] = &[
    "iostream",
    "vector",
    "algorithm",
    "string",
    "map",
    "unordered_map",
    "set",
    "unordered_set",
    "memory",
    "utility",
    "cmath",
    "cstdlib",
    "optional",
];

impl Executor for CppExecutor {
    fn language(&self) -> Language {
        Language::Cpp
    }

    fn file_extension(&self) -> &'static str {
        "cpp"
    }

    fn wrap(&self, prelude: &str, body: &str) -> String {
        let mut out = String::new();
        for header in CPP_HEADERS {
            out.push_str(&format!("#include <{}>\n", header));
        }
        out.push_str(&format!(
            "\nstatic void naab_return_json(const std::string& json) {{\n\
             \x20   std::cout << \"{open}\\n\" << json << \"\\n{close}\\n\";\n\
             }}\n\
             static std::string naab_escape(const std::string& raw) {{\n\
             \x20   std::string out;\n\
             \x20   for (char c : raw) {{\n\
             \x20       if (c == '\"' || c == '\\\\') {{ out += '\\\\'; out += c; }}\n\
             \x20       else if (c == '\\n') {{ out += \"\\\\n\"; }}\n\
             \x20       else {{ out += c; }}\n\
             \x20   }}\n\
             \x20   return out;\n\
             }}\n\
             static void naab_return(long long v) {{ naab_return_json(std::to_string(v)); }}\n\
             static void naab_return(double v) {{ naab_return_json(std::to_string(v)); }}\n\
             static void naab_return(bool v) {{ naab_return_json(v ? \"true\" : \"false\"); }}\n\
             static void naab_return(const std::string& v) {{ naab_return_json(\"\\\"\" + naab_escape(v) + \"\\\"\"); }}\n\
             static void naab_return(const char* v) {{ naab_return(std::string(v)); }}\n\n",
            open = RETURN_SENTINEL,
            close = END_RETURN_SENTINEL,
        ));
        out.push_str("int main() {\n");
        out.push_str(prelude);
        out.push_str(body);
        if !body.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("    return 0;\n}\n");
        out
    }

    fn steps(&self, program: &Path, scratch: &Path) -> Vec<Step> {
        let binary = scratch.join("block_bin");
        vec![
            Step::compile(
                "c++",
                vec![
                    "-std=c++17".to_string(),
                    "-O1".to_string(),
                    path_str(program),
                    "-o".to_string(),
                    path_str(&binary),
                ],
            ),
            Step::run(&path_str(&binary), Vec::new()),
        ]
    }
}

// ---------------------------------------------------------------------
// Rust
// ---------------------------------------------------------------------

pub struct RustExecutor;

impl Executor for RustExecutor {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn file_extension(&self) -> &'static str {
        "rs"
    }

    fn wrap(&self, prelude: &str, body: &str) -> String {
        format!(
            "#![allow(unused)]\n\
             fn naab_return_json(json: &str) {{\n\
             \x20   println!(\"{open}\");\n\
             \x20   println!(\"{{}}\", json);\n\
             \x20   println!(\"{close}\");\n\
             }}\n\
             fn naab_return<T: std::fmt::Display>(v: T) {{\n\
             \x20   naab_return_json(&v.to_string());\n\
             }}\n\
             fn naab_return_str(v: &str) {{\n\
             \x20   let escaped = v.replace('\\\\', \"\\\\\\\\\").replace('\"', \"\\\\\\\"\").replace('\\n', \"\\\\n\");\n\
             \x20   naab_return_json(&format!(\"\\\"{{}}\\\"\", escaped));\n\
             }}\n\
             fn main() {{\n\
             {prelude}\
             {body}{newline}\
             }}\n",
            open = RETURN_SENTINEL,
            close = END_RETURN_SENTINEL,
            prelude = prelude,
            body = body,
            newline = if body.ends_with('\n') { "" } else { "\n" },
        )
    }

    fn steps(&self, program: &Path, scratch: &Path) -> Vec<Step> {
        let binary = scratch.join("block_bin");
        vec![
            Step::compile(
                "rustc",
                vec![
                    "-O".to_string(),
                    path_str(program),
                    "-o".to_string(),
                    path_str(&binary),
                ],
            ),
            Step::run(&path_str(&binary), Vec::new()),
        ]
    }
}

// ---------------------------------------------------------------------
// Go
// ---------------------------------------------------------------------

pub struct GoExecutor;

impl Executor for GoExecutor {
    fn language(&self) -> Language {
        Language::Go
    }

    fn file_extension(&self) -> &'static str {
        "go"
    }

    fn wrap(&self, prelude: &str, body: &str) -> String {
        format!(
            "package main\n\n\
             import (\n\
             \x20   \"encoding/json\"\n\
             \x20   \"fmt\"\n\
             )\n\n\
             func naabReturn(v interface{{}}) {{\n\
             \x20   payload, _ := json.Marshal(v)\n\
             \x20   fmt.Println(\"{open}\")\n\
             \x20   fmt.Println(string(payload))\n\
             \x20   fmt.Println(\"{close}\")\n\
             }}\n\n\
             func main() {{\n\
             \x20   _ = naabReturn\n\
             {prelude}\
             {body}{newline}\
             }}\n",
            open = RETURN_SENTINEL,
            close = END_RETURN_SENTINEL,
            prelude = prelude,
            body = body,
            newline = if body.ends_with('\n') { "" } else { "\n" },
        )
    }

    fn steps(&self, program: &Path, _scratch: &Path) -> Vec<Step> {
        vec![Step::run("go", vec!["run".to_string(), path_str(program)])]
    }
}

// ---------------------------------------------------------------------
// Ruby
// ---------------------------------------------------------------------

pub struct RubyExecutor;

impl Executor for RubyExecutor {
    fn language(&self) -> Language {
        Language::Ruby
    }

    fn file_extension(&self) -> &'static str {
        "rb"
    }

    fn wrap(&self, prelude: &str, body: &str) -> String {
        format!(
            "require 'json'\n\
             def naab_return(v)\n\
             \x20 puts \"{open}\"\n\
             \x20 puts JSON.generate(v)\n\
             \x20 puts \"{close}\"\n\
             end\n\
             {prelude}\
             {body}{newline}",
            open = RETURN_SENTINEL,
            close = END_RETURN_SENTINEL,
            prelude = prelude,
            body = body,
            newline = if body.ends_with('\n') { "" } else { "\n" },
        )
    }

    fn steps(&self, program: &Path, _scratch: &Path) -> Vec<Step> {
        vec![Step::run("ruby", vec![path_str(program)])]
    }
}

// ---------------------------------------------------------------------
// PHP
// ---------------------------------------------------------------------

pub struct PhpExecutor;

impl Executor for PhpExecutor {
    fn language(&self) -> Language {
        Language::Php
    }

    fn file_extension(&self) -> &'static str {
        "php"
    }

    fn wrap(&self, prelude: &str, body: &str) -> String {
        format!(
            "<?php\n\
             function naab_return($v) {{\n\
             \x20   echo \"{open}\\n\";\n\
             \x20   echo json_encode($v), \"\\n\";\n\
             \x20   echo \"{close}\\n\";\n\
             }}\n\
             {prelude}\
             {body}{newline}",
            open = RETURN_SENTINEL,
            close = END_RETURN_SENTINEL,
            prelude = prelude,
            body = body,
            newline = if body.ends_with('\n') { "" } else { "\n" },
        )
    }

    fn steps(&self, program: &Path, _scratch: &Path) -> Vec<Step> {
        vec![Step::run("php", vec![path_str(program)])]
    }
}

// ---------------------------------------------------------------------
// C#
// ---------------------------------------------------------------------

pub struct CSharpExecutor;

impl Executor for CSharpExecutor {
    fn language(&self) -> Language {
        Language::CSharp
    }

    fn file_extension(&self) -> &'static str {
        "cs"
    }

    fn wrap(&self, prelude: &str, body: &str) -> String {
        format!(
            "using System;\n\
             using System.Collections.Generic;\n\n\
             class NaabProgram {{\n\
             \x20   static void NaabReturnJson(string json) {{\n\
             \x20       Console.WriteLine(\"{open}\");\n\
             \x20       Console.WriteLine(json);\n\
             \x20       Console.WriteLine(\"{close}\");\n\
             \x20   }}\n\
             \x20   static void NaabReturn(long v) {{ NaabReturnJson(v.ToString()); }}\n\
             \x20   static void NaabReturn(double v) {{ NaabReturnJson(v.ToString(System.Globalization.CultureInfo.InvariantCulture)); }}\n\
             \x20   static void NaabReturn(bool v) {{ NaabReturnJson(v ? \"true\" : \"false\"); }}\n\
             \x20   static void NaabReturn(string v) {{\n\
             \x20       var escaped = v.Replace(\"\\\\\", \"\\\\\\\\\").Replace(\"\\\"\", \"\\\\\\\"\").Replace(\"\\n\", \"\\\\n\");\n\
             \x20       NaabReturnJson(\"\\\"\" + escaped + \"\\\"\");\n\
             \x20   }}\n\
             \x20   static void Main() {{\n\
             {prelude}\
             {body}{newline}\
             \x20   }}\n\
             }}\n",
            open = RETURN_SENTINEL,
            close = END_RETURN_SENTINEL,
            prelude = prelude,
            body = body,
            newline = if body.ends_with('\n') { "" } else { "\n" },
        )
    }

    fn steps(&self, program: &Path, scratch: &Path) -> Vec<Step> {
        let binary = scratch.join("block_bin.exe");
        vec![
            Step::compile(
                "mcs",
                vec![
                    format!("-out:{}", path_str(&binary)),
                    path_str(program),
                ],
            ),
            Step::run("mono", vec![path_str(&binary)]),
        ]
    }
}

// ---------------------------------------------------------------------
// Shell
// ---------------------------------------------------------------------

pub struct ShellExecutor;

impl Executor for ShellExecutor {
    fn language(&self) -> Language {
        Language::Shell
    }

    fn file_extension(&self) -> &'static str {
        "sh"
    }

    fn wrap(&self, prelude: &str, body: &str) -> String {
        format!("{}{}", prelude, body)
    }

    fn steps(&self, program: &Path, _scratch: &Path) -> Vec<Step> {
        vec![Step::run("sh", vec![path_str(program)])]
    }
}

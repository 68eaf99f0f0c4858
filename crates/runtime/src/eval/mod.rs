//! The tree-walking evaluator
//!
//! One [`Interpreter`] drives one program on one thread. It threads the
//! current environment, the call stack, and the innermost generic call's
//! type substitutions through the visit; everything process-wide
//! (struct/module/block registries, audit log) lives behind `Arc`.
//!
//! Each interpreter constructs an isolated set of registries, so tests
//! and embedders get fresh state per run.

mod expr;
mod stmt;

use crate::blocks::{BlockRegistry, SearchIndex};
use crate::config::RuntimeConfig;
use crate::error::{EvalResult, Frame, RuntimeError, Unwind};
use crate::gc::{GcStats, Heap};
use crate::generics::Substitutions;
use crate::modules::ModuleRegistry;
use crate::polyglot::dispatch::{Dispatcher, PolyglotConfig, SHELL_RESULT_STRUCT};
use crate::structs::{FieldInfo, StructDef, StructRegistry};
use crate::value::{Binding, EnvRef, Environment, Value};
use naab_core::audit::{AuditEvent, AuditLog};
use naab_core::ErrorKind;
use naab_syntax::ast::{Program, Span, Stmt};
use naab_syntax::types::Type;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Where `print` goes. Tests capture; everything else streams to
/// stdout.
#[derive(Clone)]
pub enum OutputSink {
    Stdout,
    Buffer(Rc<RefCell<String>>),
}

impl OutputSink {
    pub fn write_line(&self, line: &str) {
        match self {
            OutputSink::Stdout => println!("{}", line),
            OutputSink::Buffer(buffer) => {
                let mut buffer = buffer.borrow_mut();
                buffer.push_str(line);
                buffer.push('\n');
            }
        }
    }
}

pub struct Interpreter {
    pub globals: EnvRef,
    pub structs: Arc<StructRegistry>,
    pub modules: Arc<ModuleRegistry>,
    pub blocks: Arc<BlockRegistry>,
    pub dispatcher: Dispatcher,
    pub heap: Heap,
    pub audit: Option<Arc<AuditLog>>,
    pub config: RuntimeConfig,
    pub(crate) out: OutputSink,

    call_stack: Vec<Frame>,
    subs_stack: Vec<Substitutions>,
    /// Every environment currently on the Rust evaluation stack; these
    /// are the collector's roots besides the globals.
    active_envs: Vec<EnvRef>,
    /// Evaluated file modules, keyed by canonical path.
    module_cache: HashMap<PathBuf, Value>,
    /// Visiting set for circular-import detection.
    loading: HashSet<PathBuf>,
    source_file: PathBuf,
}

impl Interpreter {
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let audit = match &config.audit_log_path {
            Some(path) => Some(Arc::new(AuditLog::open(path)?)),
            None => None,
        };

        let polyglot_config = PolyglotConfig {
            exec_timeout: checked_timeout(config.polyglot_timeout_secs)?,
            compile_timeout: checked_timeout(config.compile_timeout_secs)?,
            compiled_run_timeout: Duration::from_secs(crate::config::DEFAULT_COMPILED_RUN_SECS),
            temp_root: config.temp_root.clone(),
        };

        let structs = Arc::new(StructRegistry::new());
        // The struct every shell block returns.
        structs.clear_and_seed(vec![StructDef {
            name: SHELL_RESULT_STRUCT.to_string(),
            type_params: Vec::new(),
            fields: vec![
                FieldInfo {
                    name: "exit_code".to_string(),
                    ty: Type::int(),
                    weak: false,
                },
                FieldInfo {
                    name: "stdout".to_string(),
                    ty: Type::string(),
                    weak: false,
                },
                FieldInfo {
                    name: "stderr".to_string(),
                    ty: Type::string(),
                    weak: false,
                },
            ],
        }]);

        let globals = Environment::new_root();
        crate::builtins::register_builtins(&globals);

        Ok(Interpreter {
            globals,
            structs,
            modules: Arc::new(ModuleRegistry::new()),
            blocks: Arc::new(BlockRegistry::new(config.blocks_root.clone())),
            dispatcher: Dispatcher::new(polyglot_config),
            heap: Heap::new(config.gc_threshold),
            audit,
            config,
            out: OutputSink::Stdout,
            call_stack: Vec::new(),
            subs_stack: vec![Substitutions::new()],
            active_envs: Vec::new(),
            module_cache: HashMap::new(),
            loading: HashSet::new(),
            source_file: PathBuf::from("<main>"),
        })
    }

    /// Name used in stack frames and module resolution.
    pub fn set_source_file(&mut self, path: impl Into<PathBuf>) {
        self.source_file = path.into();
    }

    /// Redirect `print` into a buffer and return it.
    pub fn capture_output(&mut self) -> Rc<RefCell<String>> {
        let buffer = Rc::new(RefCell::new(String::new()));
        self.out = OutputSink::Buffer(Rc::clone(&buffer));
        buffer
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    // ------------------------------------------------------------------
    // Program entry
    // ------------------------------------------------------------------

    /// Run a parsed program: declarations first, then `main`.
    pub fn run(&mut self, program: &Program) -> Result<(), RuntimeError> {
        let globals = Rc::clone(&self.globals);
        let mut main_body: Option<&[Stmt]> = None;

        for stmt in &program.statements {
            match stmt {
                Stmt::Main { body, .. } => {
                    if main_body.is_some() {
                        return Err(RuntimeError::new(
                            ErrorKind::MisplacedStatement,
                            "program has more than one main block",
                        ));
                    }
                    main_body = Some(body);
                }
                Stmt::Export { inner, .. } => {
                    self.exec_top_decl(inner, &globals)?;
                }
                other => self.exec_top_decl(other, &globals)?,
            }
        }

        let body = main_body.ok_or_else(|| {
            RuntimeError::new(ErrorKind::MisplacedStatement, "program has no main block")
        })?;

        let main_env = Environment::child(&globals);
        self.call_stack.push(Frame {
            function_name: "main".to_string(),
            source_file: self.source_file.to_string_lossy().into_owned(),
            call_site_line: 0,
        });
        let outcome = self.exec_block_in(body, &main_env);
        self.call_stack.pop();

        match outcome {
            Ok(()) | Err(Unwind::Return(_)) => Ok(()),
            Err(Unwind::Throw(err)) => Err(err),
            Err(Unwind::Break) | Err(Unwind::Continue) => unreachable!("parser rejects these"),
        }
    }

    fn exec_top_decl(&mut self, stmt: &Stmt, globals: &EnvRef) -> Result<(), RuntimeError> {
        match self.exec_stmt(stmt, globals) {
            Ok(()) => Ok(()),
            Err(Unwind::Throw(err)) => Err(err),
            Err(_) => Err(RuntimeError::new(
                ErrorKind::MisplacedStatement,
                "control flow is not allowed at top level",
            )),
        }
    }

    // ------------------------------------------------------------------
    // Shared plumbing for the statement/expression visitors
    // ------------------------------------------------------------------

    /// Wrap an error into an unwind, attaching the current stack and a
    /// span if the error does not carry them yet.
    pub(crate) fn throw(&self, mut err: RuntimeError, span: Span) -> Unwind {
        if err.frames.is_empty() {
            err.frames = self.call_stack.clone();
        }
        if err.location.is_none() {
            err.location = Some(span);
        }
        Unwind::Throw(err)
    }

    pub(crate) fn push_frame(&mut self, function_name: &str, call_site_line: usize) {
        self.call_stack.push(Frame {
            function_name: function_name.to_string(),
            source_file: self.source_file.to_string_lossy().into_owned(),
            call_site_line,
        });
    }

    pub(crate) fn pop_frame(&mut self) {
        self.call_stack.pop();
    }

    pub(crate) fn current_subs(&self) -> &Substitutions {
        self.subs_stack.last().expect("substitution stack never empty")
    }

    pub(crate) fn push_subs(&mut self, subs: Substitutions) {
        self.subs_stack.push(subs);
    }

    pub(crate) fn pop_subs(&mut self) {
        self.subs_stack.pop();
        debug_assert!(!self.subs_stack.is_empty());
    }

    pub(crate) fn push_active_env(&mut self, env: &EnvRef) {
        self.active_envs.push(Rc::clone(env));
    }

    pub(crate) fn pop_active_env(&mut self) {
        self.active_envs.pop();
    }

    /// Collect cycles now. Roots: globals plus every environment on the
    /// evaluation stack.
    pub fn collect_garbage(&mut self) -> usize {
        let mut roots = vec![Rc::clone(&self.globals)];
        roots.extend(self.active_envs.iter().cloned());
        self.heap.collect(&roots, &self.structs)
    }

    pub(crate) fn maybe_collect(&mut self) {
        if self.heap.should_collect() {
            let collected = self.collect_garbage();
            debug!(collected, "automatic cycle collection");
        }
    }

    // ------------------------------------------------------------------
    // Audit hooks
    // ------------------------------------------------------------------

    pub(crate) fn audit_event(&self, event: AuditEvent, details: &str, metadata: &[(&str, &str)]) {
        if let Some(audit) = &self.audit {
            if let Err(err) = audit.append(event, details, metadata) {
                // Audit failures never corrupt the running program.
                warn!(error = %err, "audit append failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    pub(crate) fn load_block_value(&mut self, id: &str, span: Span) -> EvalResult {
        let meta = self
            .blocks
            .load(id)
            .map_err(|e| self.throw(e, span))?;
        let fingerprint = self.blocks.code_fingerprint(id).unwrap_or_default();
        self.audit_event(
            AuditEvent::BlockLoad,
            id,
            &[
                ("language", meta.language.as_str()),
                ("sha256", fingerprint.as_str()),
            ],
        );
        if meta.is_deprecated() {
            let note = meta
                .deprecated_message
                .as_deref()
                .unwrap_or("no replacement suggested");
            warn!(block = id, note, "deprecated block in use");
        }
        Ok(Value::Block(Rc::new(crate::value::BlockValue { meta })))
    }

    /// Build (or load) the search index and run a query. Exposed to
    /// programs through the `block_search` builtin.
    pub fn search_blocks(&self, query: &str, cap: usize) -> Result<Vec<String>, RuntimeError> {
        let index = match &self.config.search_index_path {
            Some(path) if path.is_file() => SearchIndex::load(path)?,
            Some(path) => {
                let index = SearchIndex::build_from(&self.blocks);
                index.save(path)?;
                index
            }
            None => SearchIndex::build_from(&self.blocks),
        };
        Ok(index.query(query, cap).into_iter().map(|hit| hit.id).collect())
    }

    // ------------------------------------------------------------------
    // File modules
    // ------------------------------------------------------------------

    pub(crate) fn load_file_module(&mut self, path: PathBuf, span: Span) -> EvalResult {
        let canonical = path.canonicalize().unwrap_or(path);
        if let Some(cached) = self.module_cache.get(&canonical) {
            return Ok(cached.clone());
        }
        if !self.loading.insert(canonical.clone()) {
            return Err(self.throw(
                RuntimeError::new(
                    ErrorKind::CircularImport,
                    format!("circular import of {}", canonical.display()),
                ),
                span,
            ));
        }

        let result = self.evaluate_module_file(&canonical, span);
        self.loading.remove(&canonical);

        if let Ok(value) = &result {
            self.module_cache.insert(canonical, value.clone());
        }
        result
    }

    fn evaluate_module_file(&mut self, path: &std::path::Path, span: Span) -> EvalResult {
        let source = std::fs::read_to_string(path).map_err(|e| {
            self.throw(
                RuntimeError::new(
                    ErrorKind::ModuleNotFound,
                    format!("cannot read module {}: {}", path.display(), e),
                ),
                span,
            )
        })?;
        let program = naab_syntax::parse_source(&source).map_err(|e| {
            self.throw(
                RuntimeError::new(
                    ErrorKind::SyntaxError,
                    format!("in module {}: {}", path.display(), e),
                ),
                span,
            )
        })?;
        self.audit_event(AuditEvent::ModuleLoad, &path.to_string_lossy(), &[]);

        // Modules evaluate in their own scope under the globals; only
        // exported declarations become visible to the importer.
        let module_env = Environment::child(&self.globals);
        let saved_file = std::mem::replace(&mut self.source_file, path.to_path_buf());
        let mut exports: HashMap<String, Value> = HashMap::new();

        for stmt in &program.statements {
            let (inner, exported) = match stmt {
                Stmt::Export { inner, .. } => (inner.as_ref(), true),
                other => (other, false),
            };
            if let Stmt::Main { .. } = inner {
                // A module's main is inert when imported.
                continue;
            }
            if let Err(unwind) = self.exec_stmt(inner, &module_env) {
                self.source_file = saved_file;
                return Err(match unwind {
                    Unwind::Throw(err) => Unwind::Throw(err),
                    _ => self.throw(
                        RuntimeError::new(
                            ErrorKind::MisplacedStatement,
                            "control flow is not allowed at module top level",
                        ),
                        span,
                    ),
                });
            }
            if exported {
                if let Some(name) = declared_name(inner) {
                    if let Some(value) = Environment::lookup(&module_env, &name) {
                        exports.insert(name, value);
                    }
                }
            }
        }
        self.source_file = saved_file;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".to_string());
        Ok(Value::Module(Rc::new(crate::value::ModuleHandle::File {
            name,
            exports: RefCell::new(exports),
        })))
    }

    // ------------------------------------------------------------------
    // Allocation helpers (every composite goes through the heap)
    // ------------------------------------------------------------------

    pub(crate) fn make_list(&mut self, items: Vec<Value>) -> Value {
        Value::List(self.heap.alloc_list(items))
    }

    pub(crate) fn make_dict(&mut self, entries: HashMap<String, Value>) -> Value {
        Value::Dict(self.heap.alloc_dict(entries))
    }

    /// Copy-on-assignment for aliasing expressions: fresh outer
    /// container, shared inner values, tracked by the heap.
    pub(crate) fn assign_copy(&mut self, value: Value) -> Value {
        match value {
            Value::List(list) => {
                let items = list.borrow().clone();
                self.make_list(items)
            }
            Value::Dict(dict) => {
                let entries = dict.borrow().clone();
                self.make_dict(entries)
            }
            other => other,
        }
    }

    pub(crate) fn define(
        &mut self,
        env: &EnvRef,
        name: &str,
        value: Value,
        declared_type: Option<Type>,
        is_const: bool,
    ) {
        env.borrow_mut().define(
            name,
            Binding {
                value,
                declared_type,
                is_const,
            },
        );
    }
}

/// Deadline arithmetic goes through the checked routines: a timeout too
/// large to express in nanoseconds is `TimeWraparound`, not a wrap.
fn checked_timeout(secs: u64) -> Result<Duration, RuntimeError> {
    let nanos = naab_core::safetime::checked_mul(
        i64::try_from(secs).map_err(|_| {
            RuntimeError::new(
                ErrorKind::TimeWraparound,
                format!("timeout of {} seconds does not fit in i64", secs),
            )
        })?,
        1_000_000_000,
    )?;
    Ok(Duration::from_nanos(nanos as u64))
}

/// The name a declaration binds, for export collection.
fn declared_name(stmt: &Stmt) -> Option<String> {
    match stmt {
        Stmt::Function(decl) => Some(decl.name.clone()),
        Stmt::Struct(decl) => Some(decl.name.clone()),
        Stmt::Enum(decl) => Some(decl.name.clone()),
        Stmt::Let { name, .. } => Some(name.clone()),
        _ => None,
    }
}

//! Statement evaluation
//!
//! The block walker also hosts the polyglot fan-out prepass: a maximal
//! run of consecutive `let name = <<lang …>>` statements is partitioned
//! into dependency waves, and each wave's subprocesses run concurrently
//! before their results are bound in source order.

use crate::error::{ExecResult, RuntimeError, Unwind};
use crate::eval::Interpreter;
use crate::generics::{infer_return_type, substitute};
use crate::polyglot::dispatch::interpret_output;
use crate::polyglot::schedule::{FanOutJob, run_fanout};
use crate::suggest::suggestion_suffix;
use crate::typecheck::check_binding;
use crate::value::{AssignOutcome, EnvRef, Environment, FunctionValue, Value};
use naab_core::ErrorKind;
use naab_core::audit::AuditEvent;
use naab_syntax::ast::{AssignTarget, Expr, Span, Stmt, UsePath};
use naab_syntax::token::PolyglotLiteral;
use naab_syntax::types::Type;
use std::rc::Rc;

/// A `let name = <<lang …>>` statement, unpacked for the fan-out pass.
struct PolyglotLet<'a> {
    name: &'a str,
    is_const: bool,
    declared_type: Option<&'a Type>,
    literal: &'a PolyglotLiteral,
    span: Span,
}

fn as_polyglot_let(stmt: &Stmt) -> Option<PolyglotLet<'_>> {
    match stmt {
        Stmt::Let {
            name,
            is_const,
            declared_type,
            value: Expr::Polyglot { literal, span },
            ..
        } => Some(PolyglotLet {
            name,
            is_const: *is_const,
            declared_type: declared_type.as_ref(),
            literal,
            span: *span,
        }),
        _ => None,
    }
}

impl Interpreter {
    /// Execute a statement list in `env`, fanning out runs of
    /// independent polyglot lets. `env` stays registered as a collector
    /// root for the duration.
    pub(crate) fn exec_block_in(&mut self, stmts: &[Stmt], env: &EnvRef) -> ExecResult {
        self.push_active_env(env);
        let result = self.exec_block_inner(stmts, env);
        self.pop_active_env();
        result
    }

    fn exec_block_inner(&mut self, stmts: &[Stmt], env: &EnvRef) -> ExecResult {
        let mut i = 0;
        while i < stmts.len() {
            // Statement boundaries are the collector's safe points.
            self.maybe_collect();

            let run_len = stmts[i..]
                .iter()
                .take_while(|s| as_polyglot_let(s).is_some())
                .count();
            if run_len >= 2 {
                self.exec_polyglot_run(&stmts[i..i + run_len], env)?;
                i += run_len;
            } else {
                self.exec_stmt(&stmts[i], env)?;
                i += 1;
            }
        }
        Ok(())
    }

    /// Fan a run of polyglot lets out in dependency waves: a statement
    /// whose binding list names a result bound earlier in the run starts
    /// the next wave, because its inputs only exist after the join.
    fn exec_polyglot_run(&mut self, stmts: &[Stmt], env: &EnvRef) -> ExecResult {
        let lets: Vec<PolyglotLet> = stmts
            .iter()
            .map(|s| as_polyglot_let(s).expect("prefiltered"))
            .collect();

        let mut wave_start = 0;
        while wave_start < lets.len() {
            let mut bound_in_wave: Vec<&str> = Vec::new();
            let mut wave_end = wave_start;
            while wave_end < lets.len() {
                let depends = lets[wave_end]
                    .literal
                    .bindings
                    .iter()
                    .any(|b| bound_in_wave.contains(&b.as_str()));
                if depends {
                    break;
                }
                bound_in_wave.push(lets[wave_end].name);
                wave_end += 1;
            }
            self.exec_polyglot_wave(&lets[wave_start..wave_end], env)?;
            wave_start = wave_end;
        }
        Ok(())
    }

    fn exec_polyglot_wave(&mut self, wave: &[PolyglotLet], env: &EnvRef) -> ExecResult {
        // Marshal everything up front, on this thread; a missing binding
        // fails before any subprocess launches.
        let mut jobs = Vec::with_capacity(wave.len());
        for entry in wave {
            let bindings = self.resolve_bindings(entry.literal, env, entry.span)?;
            let prepared = self
                .dispatcher
                .prepare(&entry.literal.language, &bindings, &entry.literal.body)
                .map_err(|e| self.throw(e, entry.span))?;
            self.audit_event(
                AuditEvent::SubprocessLaunch,
                entry.literal.language.as_str(),
                &[("binding", entry.name), ("mode", "fanout")],
            );
            jobs.push(FanOutJob {
                name: entry.name.to_string(),
                prepared,
                deps: Vec::new(),
            });
        }

        let results = run_fanout(&self.dispatcher, jobs);

        // Surface results in source order; the first failure wins.
        for (entry, result) in wave.iter().zip(results) {
            let output = result.map_err(|core| self.throw(core.into(), entry.span))?;
            if output.timed_out {
                self.audit_event(AuditEvent::Timeout, entry.literal.language.as_str(), &[]);
            }
            let language = self
                .dispatcher
                .executor_for(&entry.literal.language)
                .map_err(|e| self.throw(e, entry.span))?
                .language();
            let value = interpret_output(language, &entry.literal.body, &output)
                .map_err(|e| self.throw(e, entry.span))?;
            self.heap.track_value(&value);
            self.bind_let(
                env,
                entry.name,
                value,
                entry.declared_type.cloned(),
                entry.is_const,
                entry.span,
            )?;
        }
        Ok(())
    }

    pub(crate) fn resolve_bindings(
        &mut self,
        literal: &PolyglotLiteral,
        env: &EnvRef,
        span: Span,
    ) -> Result<Vec<(String, Value)>, Unwind> {
        let mut bindings = Vec::with_capacity(literal.bindings.len());
        for name in &literal.bindings {
            match Environment::lookup(env, name) {
                Some(value) => bindings.push((name.clone(), value)),
                None => {
                    let visible = Environment::visible_names(env);
                    let suffix =
                        suggestion_suffix(name, visible.iter().map(|s| s.as_str()));
                    return Err(self.throw(
                        RuntimeError::new(
                            ErrorKind::UnboundName,
                            format!("'{}' in the binding list is not defined{}", name, suffix),
                        ),
                        span,
                    ));
                }
            }
        }
        Ok(bindings)
    }

    fn bind_let(
        &mut self,
        env: &EnvRef,
        name: &str,
        value: Value,
        declared_type: Option<Type>,
        is_const: bool,
        span: Span,
    ) -> ExecResult {
        let declared_type = declared_type.map(|t| substitute(&t, self.current_subs()));
        if let Some(ty) = &declared_type {
            check_binding(name, &value, ty, &self.structs)
                .map_err(|e| self.throw(e, span))?;
        }
        self.define(env, name, value, declared_type, is_const);
        Ok(())
    }

    pub(crate) fn exec_stmt(&mut self, stmt: &Stmt, env: &EnvRef) -> ExecResult {
        match stmt {
            Stmt::Let {
                name,
                is_const,
                declared_type,
                value,
                span,
            } => {
                let mut evaluated = self.eval_expr(value, env)?;
                if aliases_existing_value(value) {
                    evaluated = self.assign_copy(evaluated);
                }
                self.bind_let(env, name, evaluated, declared_type.clone(), *is_const, *span)
            }

            Stmt::Assign { target, value, span } => self.exec_assign(target, value, *span, env),

            Stmt::Block { statements, .. } => {
                let child = Environment::child(env);
                self.exec_block_in(statements, &child)
            }

            Stmt::If {
                cond,
                then_block,
                else_block,
                span,
            } => {
                if self.eval_condition(cond, env, *span)? {
                    let child = Environment::child(env);
                    self.exec_block_in(then_block, &child)
                } else if let Some(else_block) = else_block {
                    let child = Environment::child(env);
                    self.exec_block_in(else_block, &child)
                } else {
                    Ok(())
                }
            }

            Stmt::While { cond, body, span } => {
                while self.eval_condition(cond, env, *span)? {
                    let child = Environment::child(env);
                    match self.exec_block_in(body, &child) {
                        Ok(()) => {}
                        Err(Unwind::Break) => break,
                        Err(Unwind::Continue) => continue,
                        Err(other) => return Err(other),
                    }
                }
                Ok(())
            }

            Stmt::For {
                var,
                iterable,
                body,
                span,
            } => self.exec_for(var, iterable, body, *span, env),

            Stmt::Break { .. } => Err(Unwind::Break),
            Stmt::Continue { .. } => Err(Unwind::Continue),

            Stmt::Return { value, .. } => {
                let result = match value {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Void,
                };
                Err(Unwind::Return(result))
            }

            Stmt::Throw { value, span } => {
                let thrown = self.eval_expr(value, env)?;
                Err(self.raise_value(thrown, *span))
            }

            Stmt::Try {
                try_block,
                catch_name,
                catch_block,
                finally_block,
                ..
            } => self.exec_try(try_block, catch_name.as_deref(), catch_block, finally_block.as_deref(), env),

            Stmt::Function(decl) => {
                let return_type = if decl.explicit_return {
                    decl.return_type.clone()
                } else {
                    infer_return_type(&decl.body)
                };
                let func = Value::Function(Rc::new(FunctionValue::User {
                    decl: Rc::new(decl.clone()),
                    env: Rc::clone(env),
                    return_type,
                }));
                self.define(env, &decl.name, func, None, false);
                Ok(())
            }

            Stmt::Struct(decl) => {
                self.structs
                    .register(decl)
                    .map_err(|e| self.throw(e, decl.span))?;
                Ok(())
            }

            Stmt::Enum(decl) => {
                // An enum binds a frozen dict of variant names: member
                // access `Color.Red` yields the string "Red".
                let entries = decl
                    .variants
                    .iter()
                    .map(|v| (v.clone(), Value::Str(v.clone())))
                    .collect();
                let value = self.make_dict(entries);
                self.define(env, &decl.name, value, None, true);
                Ok(())
            }

            Stmt::Use { path, alias, span } => self.exec_use(path, alias.as_deref(), *span, env),

            Stmt::Import { path, alias, span } => {
                self.exec_use(&UsePath::Module(path.clone()), alias.as_deref(), *span, env)
            }

            Stmt::Export { inner, .. } => {
                // Outside module loading, export is just the declaration.
                self.exec_stmt(inner, env)
            }

            Stmt::Main { span, .. } => Err(self.throw(
                RuntimeError::new(
                    ErrorKind::MisplacedStatement,
                    "main may only appear at top level",
                ),
                *span,
            )),

            Stmt::Expr { expr, .. } => {
                self.eval_expr(expr, env)?;
                Ok(())
            }
        }
    }

    /// Turn a thrown value into an unwind. Error values re-throw with
    /// their original frame snapshot; anything else becomes a
    /// `UserThrown` error carrying the value as payload.
    pub(crate) fn raise_value(&self, thrown: Value, span: Span) -> Unwind {
        match thrown {
            Value::Error(err) => Unwind::Throw((*err).clone()),
            other => self.throw(
                RuntimeError::new(ErrorKind::UserThrown, format!("{}", other))
                    .with_payload(other),
                span,
            ),
        }
    }

    fn exec_assign(
        &mut self,
        target: &AssignTarget,
        value: &Expr,
        span: Span,
        env: &EnvRef,
    ) -> ExecResult {
        let mut evaluated = self.eval_expr(value, env)?;
        match target {
            AssignTarget::Name(name) => {
                if aliases_existing_value(value) {
                    evaluated = self.assign_copy(evaluated);
                }
                if let Some(ty) = Environment::declared_type(env, name) {
                    let ty = substitute(&ty, self.current_subs());
                    check_binding(name, &evaluated, &ty, &self.structs)
                        .map_err(|e| self.throw(e, span))?;
                }
                match Environment::assign(env, name, evaluated) {
                    AssignOutcome::Ok => Ok(()),
                    AssignOutcome::ConstViolation => Err(self.throw(
                        RuntimeError::new(
                            ErrorKind::PermissionDenied,
                            format!("cannot assign to constant '{}'", name),
                        ),
                        span,
                    )),
                    AssignOutcome::NotFound => {
                        let visible = Environment::visible_names(env);
                        let suffix =
                            suggestion_suffix(name, visible.iter().map(|s| s.as_str()));
                        Err(self.throw(
                            RuntimeError::new(
                                ErrorKind::UnboundName,
                                format!("cannot assign to undefined '{}'{}", name, suffix),
                            ),
                            span,
                        ))
                    }
                }
            }

            AssignTarget::Index { target, index } => {
                let container = self.eval_expr(target, env)?;
                let index_value = self.eval_expr(index, env)?;
                match (&container, &index_value) {
                    (Value::List(list), Value::Int(i)) => {
                        let mut list = list.borrow_mut();
                        let len = list.len();
                        let slot = usize::try_from(*i)
                            .ok()
                            .filter(|i| *i < len)
                            .ok_or_else(|| {
                                self.throw(
                                    RuntimeError::new(
                                        ErrorKind::IndexOutOfBounds,
                                        format!("index {} out of bounds for list of length {}", i, len),
                                    ),
                                    span,
                                )
                            })?;
                        list[slot] = evaluated;
                        Ok(())
                    }
                    (Value::Dict(dict), Value::Str(key)) => {
                        dict.borrow_mut().insert(key.clone(), evaluated);
                        Ok(())
                    }
                    (Value::List(_), other) => Err(self.throw(
                        RuntimeError::new(
                            ErrorKind::TypeMismatch,
                            format!("list index must be int, got {}", other.type_name()),
                        ),
                        span,
                    )),
                    (Value::Dict(_), other) => Err(self.throw(
                        RuntimeError::new(
                            ErrorKind::TypeMismatch,
                            format!("dict key must be string, got {}", other.type_name()),
                        ),
                        span,
                    )),
                    (other, _) => Err(self.throw(
                        RuntimeError::new(
                            ErrorKind::TypeMismatch,
                            format!("cannot index into {}", other.type_name()),
                        ),
                        span,
                    )),
                }
            }

            AssignTarget::Member { target, field } => {
                let object = self.eval_expr(target, env)?;
                match &object {
                    Value::Struct(sv) => {
                        let def = {
                            let sv = sv.borrow();
                            self.structs.get(&sv.name)
                        };
                        let Some(def) = def else {
                            return Err(self.throw(
                                RuntimeError::new(
                                    ErrorKind::UnknownField,
                                    format!("unknown struct type '{}'", sv.borrow().name),
                                ),
                                span,
                            ));
                        };
                        let Some(field_info) = def.field(field) else {
                            let suffix = suggestion_suffix(
                                field,
                                def.fields.iter().map(|f| f.name.as_str()),
                            );
                            return Err(self.throw(
                                RuntimeError::new(
                                    ErrorKind::UnknownField,
                                    format!("struct '{}' has no field '{}'{}", def.name, field, suffix),
                                ),
                                span,
                            ));
                        };
                        let field_ty = substitute(&field_info.ty, self.current_subs());
                        check_binding(field, &evaluated, &field_ty, &self.structs)
                            .map_err(|e| self.throw(e, span))?;
                        sv.borrow_mut().fields.insert(field.clone(), evaluated);
                        Ok(())
                    }
                    Value::Dict(dict) => {
                        dict.borrow_mut().insert(field.clone(), evaluated);
                        Ok(())
                    }
                    Value::Void => Err(self.null_member_error(target, field, span, env)),
                    other => Err(self.throw(
                        RuntimeError::new(
                            ErrorKind::TypeMismatch,
                            format!("cannot set field '{}' on {}", field, other.type_name()),
                        ),
                        span,
                    )),
                }
            }
        }
    }

    fn exec_for(
        &mut self,
        var: &str,
        iterable: &Expr,
        body: &[Stmt],
        span: Span,
        env: &EnvRef,
    ) -> ExecResult {
        let iterable_value = self.eval_expr(iterable, env)?;
        let items: Vec<Value> = match &iterable_value {
            // Iterate a snapshot so body mutation cannot skip elements.
            Value::List(list) => list.borrow().clone(),
            Value::Dict(dict) => {
                let dict = dict.borrow();
                let mut keys: Vec<&String> = dict.keys().collect();
                keys.sort();
                keys.into_iter().map(|k| Value::Str(k.clone())).collect()
            }
            Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
            other => {
                return Err(self.throw(
                    RuntimeError::new(
                        ErrorKind::TypeMismatch,
                        format!("cannot iterate over {}", other.type_name()),
                    ),
                    span,
                ));
            }
        };

        for item in items {
            let child = Environment::child(env);
            self.define(&child, var, item, None, false);
            match self.exec_block_in(body, &child) {
                Ok(()) => {}
                Err(Unwind::Break) => break,
                Err(Unwind::Continue) => continue,
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    fn exec_try(
        &mut self,
        try_block: &[Stmt],
        catch_name: Option<&str>,
        catch_block: &[Stmt],
        finally_block: Option<&[Stmt]>,
        env: &EnvRef,
    ) -> ExecResult {
        let child = Environment::child(env);
        let mut outcome = self.exec_block_in(try_block, &child);

        if let Err(Unwind::Throw(err)) = outcome {
            let catch_env = Environment::child(env);
            if let Some(name) = catch_name {
                self.define(
                    &catch_env,
                    name,
                    Value::Error(Rc::new(err)),
                    None,
                    false,
                );
            }
            outcome = self.exec_block_in(catch_block, &catch_env);
        }

        if let Some(finally_block) = finally_block {
            let finally_env = Environment::child(env);
            let finally_outcome = self.exec_block_in(finally_block, &finally_env);
            // finally runs on every path; it only replaces the in-flight
            // outcome by unwinding itself.
            if finally_outcome.is_err() {
                return finally_outcome;
            }
        }
        outcome
    }

    fn exec_use(
        &mut self,
        path: &UsePath,
        alias: Option<&str>,
        span: Span,
        env: &EnvRef,
    ) -> ExecResult {
        match path {
            UsePath::Block { id, version_req } => {
                if let Some(req) = version_req {
                    tracing::debug!(block = %id, range = %req, "version range noted");
                }
                let value = self.load_block_value(id, span)?;
                let name = alias.unwrap_or(id);
                self.define(env, name, value, None, false);
                Ok(())
            }
            UsePath::Module(segments) => {
                // Precedence: stdlib name, then file path. (Block ids
                // arrive as the Block variant straight from the lexer.)
                if segments.len() == 1 && self.modules.has_stdlib(&segments[0]) {
                    let module_name = segments[0].clone();
                    self.audit_event(AuditEvent::ModuleLoad, &module_name, &[("kind", "stdlib")]);
                    let value = Value::Module(Rc::new(crate::value::ModuleHandle::Stdlib {
                        name: module_name,
                    }));
                    let name = alias.unwrap_or(&segments[0]);
                    self.define(env, name, value, None, false);
                    return Ok(());
                }

                let importer_dir = self.source_dir();
                let resolved = self
                    .modules
                    .resolve_file(segments, &importer_dir, &self.config.module_search_path)
                    .ok_or_else(|| {
                        self.throw(
                            RuntimeError::new(
                                ErrorKind::ModuleNotFound,
                                format!("module '{}' not found", segments.join(".")),
                            ),
                            span,
                        )
                    })?;
                let value = self.load_file_module(resolved, span)?;
                let default_name = segments.last().expect("nonempty path").as_str();
                let name = alias.unwrap_or(default_name);
                self.define(env, name, value, None, false);
                Ok(())
            }
        }
    }

    fn source_dir(&self) -> std::path::PathBuf {
        self.source_file
            .parent()
            .map(|p| p.to_path_buf())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::PathBuf::from("."))
    }
}

/// Does this expression alias an existing binding (so assignment must
/// copy the outer container)?
fn aliases_existing_value(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Ident { .. } | Expr::Member { .. } | Expr::Index { .. }
    )
}

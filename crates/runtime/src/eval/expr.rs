//! Expression evaluation
//!
//! Strict arithmetic (no implicit numeric coercion beyond int/float
//! promotion), short-circuit logic, identity equality for composites,
//! generic calls through the unification solver, and single polyglot
//! dispatch.

use crate::error::{EvalResult, RuntimeError, Unwind};
use crate::eval::Interpreter;
use crate::generics::{Substitutions, infer_return_type, substitute, unify};
use crate::polyglot::dispatch::interpret_output;
use crate::suggest::suggestion_suffix;
use crate::typecheck::{check_binding, check_return, runtime_type_of};
use crate::value::{EnvRef, Environment, FunctionValue, ModuleHandle, StructValue, Value};
use naab_core::ErrorKind;
use naab_core::audit::AuditEvent;
use naab_syntax::ast::{BinaryOp, CompareOp, Expr, FunctionDecl, LogicalOp, Span, UnaryOp};
use naab_syntax::token::PolyglotLiteral;
use naab_syntax::types::Type;
use std::collections::HashMap;
use std::rc::Rc;

impl Interpreter {
    pub(crate) fn eval_expr(&mut self, expr: &Expr, env: &EnvRef) -> EvalResult {
        match expr {
            Expr::IntLit { value, .. } => Ok(Value::Int(*value)),
            Expr::FloatLit { value, .. } => Ok(Value::Float(*value)),
            Expr::StrLit { value, .. } => Ok(Value::Str(value.clone())),
            Expr::BoolLit { value, .. } => Ok(Value::Bool(*value)),
            Expr::NullLit { .. } => Ok(Value::Void),

            Expr::ArrayLit { elements, .. } => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval_expr(element, env)?);
                }
                Ok(self.make_list(items))
            }

            Expr::DictLit { entries, .. } => {
                let mut map = HashMap::with_capacity(entries.len());
                for (key, value_expr) in entries {
                    map.insert(key.clone(), self.eval_expr(value_expr, env)?);
                }
                Ok(self.make_dict(map))
            }

            Expr::Ident { name, span } => match Environment::lookup(env, name) {
                Some(value) => Ok(value),
                None => {
                    let visible = Environment::visible_names(env);
                    let suffix = suggestion_suffix(name, visible.iter().map(|s| s.as_str()));
                    Err(self.throw(
                        RuntimeError::new(
                            ErrorKind::UnboundName,
                            format!("'{}' is not defined{}", name, suffix),
                        ),
                        *span,
                    ))
                }
            },

            Expr::Unary { op, operand, span } => {
                let value = self.eval_expr(operand, env)?;
                self.eval_unary(*op, value, *span)
            }

            Expr::Binary { op, left, right, span } => {
                let lhs = self.eval_expr(left, env)?;
                let rhs = self.eval_expr(right, env)?;
                self.eval_binary(*op, lhs, rhs, *span)
            }

            Expr::Compare { op, left, right, span } => {
                let lhs = self.eval_expr(left, env)?;
                let rhs = self.eval_expr(right, env)?;
                self.eval_compare(*op, lhs, rhs, *span)
            }

            Expr::Logical { op, left, right, span } => {
                let lhs = self.eval_expr(left, env)?;
                let lhs = self.expect_bool(lhs, "logical operand", *span)?;
                match (op, lhs) {
                    (LogicalOp::And, false) => Ok(Value::Bool(false)),
                    (LogicalOp::Or, true) => Ok(Value::Bool(true)),
                    _ => {
                        let rhs = self.eval_expr(right, env)?;
                        let rhs = self.expect_bool(rhs, "logical operand", *span)?;
                        Ok(Value::Bool(rhs))
                    }
                }
            }

            Expr::IfExpr {
                cond,
                then_value,
                else_value,
                span,
            } => {
                if self.eval_condition(cond, env, *span)? {
                    self.eval_expr(then_value, env)
                } else {
                    self.eval_expr(else_value, env)
                }
            }

            Expr::Lambda { decl, .. } => {
                let return_type = if decl.explicit_return {
                    decl.return_type.clone()
                } else {
                    infer_return_type(&decl.body)
                };
                Ok(Value::Function(Rc::new(FunctionValue::User {
                    decl: Rc::new((**decl).clone()),
                    env: Rc::clone(env),
                    return_type,
                })))
            }

            Expr::Pipeline { value, stage, span } => {
                let piped = self.eval_expr(value, env)?;
                self.eval_pipeline_stage(piped, stage, env, *span)
            }

            Expr::Member { target, field, span } => self.eval_member(target, field, *span, env),

            Expr::Index { target, index, span } => {
                let container = self.eval_expr(target, env)?;
                let index_value = self.eval_expr(index, env)?;
                self.eval_index(container, index_value, *span)
            }

            Expr::Call {
                callee,
                type_args,
                args,
                span,
            } => self.eval_call(callee, type_args, args, *span, env),

            Expr::StructLit {
                name,
                type_args,
                fields,
                span,
            } => self.eval_struct_literal(name, type_args, fields, *span, env),

            Expr::Polyglot { literal, span } => self.eval_polyglot(literal, *span, env),

            Expr::BlockUse { id, span } => self.load_block_value(id, *span),
        }
    }

    /// Conditions are strictly boolean.
    pub(crate) fn eval_condition(
        &mut self,
        cond: &Expr,
        env: &EnvRef,
        span: Span,
    ) -> Result<bool, Unwind> {
        let value = self.eval_expr(cond, env)?;
        self.expect_bool(value, "condition", span)
    }

    fn expect_bool(&self, value: Value, what: &str, span: Span) -> Result<bool, Unwind> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(self.throw(
                RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    format!("{} must be bool, got {}", what, other.type_name()),
                ),
                span,
            )),
        }
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    fn eval_unary(&self, op: UnaryOp, value: Value, span: Span) -> EvalResult {
        match (op, value) {
            (UnaryOp::Neg, Value::Int(n)) => n.checked_neg().map(Value::Int).ok_or_else(|| {
                self.throw(
                    RuntimeError::new(ErrorKind::Overflow, "integer negation overflowed"),
                    span,
                )
            }),
            (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::Neg, other) => Err(self.throw(
                RuntimeError::new(
                    ErrorKind::TypeCoercion,
                    format!("cannot negate {}", other.type_name()),
                ),
                span,
            )),
            (UnaryOp::Not, other) => Err(self.throw(
                RuntimeError::new(
                    ErrorKind::TypeCoercion,
                    format!("'!' needs bool, got {}", other.type_name()),
                ),
                span,
            )),
        }
    }

    fn eval_binary(&self, op: BinaryOp, lhs: Value, rhs: Value, span: Span) -> EvalResult {
        use BinaryOp::*;
        use Value::*;

        // String concatenation: `+` with a string on either side coerces
        // the other operand's textual form.
        if op == Add {
            match (&lhs, &rhs) {
                (Str(a), Str(b)) => return Ok(Str(format!("{}{}", a, b))),
                (Str(a), b) => return Ok(Str(format!("{}{}", a, b))),
                (a, Str(b)) => return Ok(Str(format!("{}{}", a, b))),
                _ => {}
            }
        }

        let overflow = |what: &str| {
            self.throw(
                RuntimeError::new(ErrorKind::Overflow, format!("integer {} overflowed", what)),
                span,
            )
        };

        match (op, &lhs, &rhs) {
            (Add, Int(a), Int(b)) => a.checked_add(*b).map(Int).ok_or_else(|| overflow("addition")),
            (Sub, Int(a), Int(b)) => a.checked_sub(*b).map(Int).ok_or_else(|| overflow("subtraction")),
            (Mul, Int(a), Int(b)) => a.checked_mul(*b).map(Int).ok_or_else(|| overflow("multiplication")),
            (Div, Int(a), Int(b)) => {
                if *b == 0 {
                    Err(self.throw(
                        RuntimeError::new(ErrorKind::DivisionByZero, "division by zero"),
                        span,
                    ))
                } else {
                    a.checked_div(*b).map(Int).ok_or_else(|| overflow("division"))
                }
            }
            (Mod, Int(a), Int(b)) => {
                if *b == 0 {
                    Err(self.throw(
                        RuntimeError::new(ErrorKind::DivisionByZero, "modulo by zero"),
                        span,
                    ))
                } else {
                    a.checked_rem(*b).map(Int).ok_or_else(|| overflow("remainder"))
                }
            }

            (Add, Float(a), Float(b)) => Ok(Float(a + b)),
            (Sub, Float(a), Float(b)) => Ok(Float(a - b)),
            (Mul, Float(a), Float(b)) => Ok(Float(a * b)),
            (Div, Float(a), Float(b)) => Ok(Float(a / b)),
            (Mod, Float(a), Float(b)) => Ok(Float(a % b)),

            // int/float promotion.
            (_, Int(a), Float(b)) => self.eval_binary(op, Float(*a as f64), Float(*b), span),
            (_, Float(a), Int(b)) => self.eval_binary(op, Float(*a), Float(*b as f64), span),

            _ => Err(self.throw(
                RuntimeError::new(
                    ErrorKind::TypeCoercion,
                    format!(
                        "no implicit coercion between {} and {}",
                        lhs.type_name(),
                        rhs.type_name()
                    ),
                ),
                span,
            )),
        }
    }

    fn eval_compare(&self, op: CompareOp, lhs: Value, rhs: Value, span: Span) -> EvalResult {
        use CompareOp::*;
        match op {
            // Structural for primitives, identity for composites.
            Eq => Ok(Value::Bool(lhs == rhs)),
            NotEq => Ok(Value::Bool(lhs != rhs)),
            _ => {
                let ordering = match (&lhs, &rhs) {
                    (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
                    (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
                    (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
                    (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
                    (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                    _ => None,
                };
                let Some(ordering) = ordering else {
                    return Err(self.throw(
                        RuntimeError::new(
                            ErrorKind::TypeMismatch,
                            format!(
                                "cannot order {} against {}",
                                lhs.type_name(),
                                rhs.type_name()
                            ),
                        ),
                        span,
                    ));
                };
                let result = match op {
                    Lt => ordering.is_lt(),
                    LtEq => ordering.is_le(),
                    Gt => ordering.is_gt(),
                    GtEq => ordering.is_ge(),
                    Eq | NotEq => unreachable!(),
                };
                Ok(Value::Bool(result))
            }
        }
    }

    // ------------------------------------------------------------------
    // Member and index access
    // ------------------------------------------------------------------

    fn eval_member(&mut self, target: &Expr, field: &str, span: Span, env: &EnvRef) -> EvalResult {
        let object = self.eval_expr(target, env)?;
        match &object {
            Value::Void => Err(self.null_member_error(target, field, span, env)),

            Value::Struct(sv) => {
                let sv = sv.borrow();
                match sv.fields.get(field) {
                    Some(value) => Ok(value.clone()),
                    None => {
                        let suffix = suggestion_suffix(
                            field,
                            sv.fields.keys().map(|s| s.as_str()),
                        );
                        Err(self.throw(
                            RuntimeError::new(
                                ErrorKind::UnknownField,
                                format!("struct '{}' has no field '{}'{}", sv.name, field, suffix),
                            ),
                            span,
                        ))
                    }
                }
            }

            Value::Dict(dict) => {
                let dict = dict.borrow();
                match dict.get(field) {
                    Some(value) => Ok(value.clone()),
                    None => {
                        let suffix =
                            suggestion_suffix(field, dict.keys().map(|s| s.as_str()));
                        Err(self.throw(
                            RuntimeError::new(
                                ErrorKind::UnknownField,
                                format!("no key '{}' in dict{}", field, suffix),
                            ),
                            span,
                        ))
                    }
                }
            }

            Value::Module(module) => match module.as_ref() {
                ModuleHandle::Stdlib { name } => Err(self.throw(
                    RuntimeError::new(
                        ErrorKind::UnknownField,
                        format!(
                            "stdlib module function '{}.{}' must be called, not referenced",
                            name, field
                        ),
                    ),
                    span,
                )),
                ModuleHandle::File { name, exports } => {
                    match exports.borrow().get(field) {
                        Some(value) => Ok(value.clone()),
                        None => {
                            let exports = exports.borrow();
                            let suffix = suggestion_suffix(
                                field,
                                exports.keys().map(|s| s.as_str()),
                            );
                            Err(self.throw(
                                RuntimeError::new(
                                    ErrorKind::UnknownField,
                                    format!("module '{}' does not export '{}'{}", name, field, suffix),
                                ),
                                span,
                            ))
                        }
                    }
                }
            },

            Value::Error(err) => match field {
                "kind" => Ok(Value::Str(err.kind.as_str().to_string())),
                "message" => Ok(Value::Str(err.message.clone())),
                "payload" => Ok(err.payload.clone().unwrap_or(Value::Void)),
                _ => Err(self.throw(
                    RuntimeError::new(
                        ErrorKind::UnknownField,
                        format!("error values have kind, message, and payload, not '{}'", field),
                    ),
                    span,
                )),
            },

            other => Err(self.throw(
                RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    format!("{} has no members", other.type_name()),
                ),
                span,
            )),
        }
    }

    /// Null member access: `NullReference` when the target's declared
    /// type was nullable (the programmer opted into null), otherwise
    /// `NullMemberAccess`.
    pub(crate) fn null_member_error(
        &self,
        target: &Expr,
        field: &str,
        span: Span,
        env: &EnvRef,
    ) -> Unwind {
        let declared_nullable = match target {
            Expr::Ident { name, .. } => Environment::declared_type(env, name)
                .map(|t| t.nullable)
                .unwrap_or(false),
            _ => false,
        };
        let kind = if declared_nullable {
            ErrorKind::NullReference
        } else {
            ErrorKind::NullMemberAccess
        };
        self.throw(
            RuntimeError::new(kind, format!("cannot access '{}' on null", field)),
            span,
        )
    }

    fn eval_index(&self, container: Value, index: Value, span: Span) -> EvalResult {
        match (&container, &index) {
            (Value::List(list), Value::Int(i)) => {
                let list = list.borrow();
                usize::try_from(*i)
                    .ok()
                    .and_then(|i| list.get(i).cloned())
                    .ok_or_else(|| {
                        self.throw(
                            RuntimeError::new(
                                ErrorKind::IndexOutOfBounds,
                                format!("index {} out of bounds for list of length {}", i, list.len()),
                            ),
                            span,
                        )
                    })
            }
            (Value::Dict(dict), Value::Str(key)) => {
                dict.borrow().get(key).cloned().ok_or_else(|| {
                    self.throw(
                        RuntimeError::new(
                            ErrorKind::UnknownField,
                            format!("no key '{}' in dict", key),
                        ),
                        span,
                    )
                })
            }
            (Value::Str(s), Value::Int(i)) => usize::try_from(*i)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::Str(c.to_string()))
                .ok_or_else(|| {
                    self.throw(
                        RuntimeError::new(
                            ErrorKind::IndexOutOfBounds,
                            format!("index {} out of bounds for string of length {}", i, s.chars().count()),
                        ),
                        span,
                    )
                }),
            (Value::List(_), other) | (Value::Str(_), other) => Err(self.throw(
                RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    format!("index must be int, got {}", other.type_name()),
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

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn eval_call(
        &mut self,
        callee: &Expr,
        type_args: &[Type],
        args: &[Expr],
        span: Span,
        env: &EnvRef,
    ) -> EvalResult {
        // `module.function(args)` dispatches into the registry without
        // materializing the member.
        if let Expr::Member { target, field, .. } = callee {
            let object = self.eval_expr(target, env)?;
            if let Value::Module(module) = &object {
                if let ModuleHandle::Stdlib { name } = module.as_ref() {
                    let module_name = name.clone();
                    let mut evaluated = Vec::with_capacity(args.len());
                    for arg in args {
                        evaluated.push(self.eval_expr(arg, env)?);
                    }
                    let result = self
                        .modules
                        .call(&module_name, field, &evaluated)
                        .map_err(|e| self.throw(e, span))?;
                    self.heap.track_value(&result);
                    return Ok(result);
                }
            }
            // Member call on anything else: look the member up on the
            // already-evaluated target (evaluating it twice would
            // duplicate side effects), then call it.
            let callable = if object.is_void() {
                return Err(self.null_member_error(target, field, span, env));
            } else {
                self.member_on_value(&object, field, span)?
            };
            return self.call_callable(callable, type_args, args, span, env);
        }

        let callable = self.eval_expr(callee, env)?;
        self.call_callable(callable, type_args, args, span, env)
    }

    fn member_on_value(&mut self, object: &Value, field: &str, span: Span) -> EvalResult {
        match object {
            Value::Struct(sv) => {
                let sv = sv.borrow();
                sv.fields.get(field).cloned().ok_or_else(|| {
                    let suffix =
                        suggestion_suffix(field, sv.fields.keys().map(|s| s.as_str()));
                    self.throw(
                        RuntimeError::new(
                            ErrorKind::UnknownField,
                            format!("struct '{}' has no field '{}'{}", sv.name, field, suffix),
                        ),
                        span,
                    )
                })
            }
            Value::Dict(dict) => {
                let dict = dict.borrow();
                dict.get(field).cloned().ok_or_else(|| {
                    let suffix = suggestion_suffix(field, dict.keys().map(|s| s.as_str()));
                    self.throw(
                        RuntimeError::new(
                            ErrorKind::UnknownField,
                            format!("no key '{}' in dict{}", field, suffix),
                        ),
                        span,
                    )
                })
            }
            Value::Module(module) => match module.as_ref() {
                ModuleHandle::File { name, exports } => {
                    exports.borrow().get(field).cloned().ok_or_else(|| {
                        self.throw(
                            RuntimeError::new(
                                ErrorKind::UnknownField,
                                format!("module '{}' does not export '{}'", name, field),
                            ),
                            span,
                        )
                    })
                }
                ModuleHandle::Stdlib { name } => Err(self.throw(
                    RuntimeError::new(
                        ErrorKind::UnknownField,
                        format!(
                            "stdlib module function '{}.{}' must be called, not referenced",
                            name, field
                        ),
                    ),
                    span,
                )),
            },
            other => Err(self.throw(
                RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    format!("{} has no members", other.type_name()),
                ),
                span,
            )),
        }
    }

    fn call_callable(
        &mut self,
        callable: Value,
        type_args: &[Type],
        args: &[Expr],
        span: Span,
        env: &EnvRef,
    ) -> EvalResult {
        let mut evaluated = Vec::with_capacity(args.len());
        for arg in args {
            evaluated.push(self.eval_expr(arg, env)?);
        }
        self.call_value(callable, type_args, evaluated, span, env)
    }

    pub(crate) fn call_value(
        &mut self,
        callable: Value,
        type_args: &[Type],
        args: Vec<Value>,
        span: Span,
        env: &EnvRef,
    ) -> EvalResult {
        match callable {
            Value::Function(func) => match func.as_ref() {
                FunctionValue::User { .. } => self.call_user_function(&func, type_args, args, span),
                FunctionValue::Native { name } => {
                    crate::builtins::call_native(self, name, &args, span, env)
                }
            },
            Value::Block(block) => self.call_block(&block, args, span),
            other => Err(self.throw(
                RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    format!("a {} value is not callable", other.type_name()),
                ),
                span,
            )),
        }
    }

    fn call_user_function(
        &mut self,
        func: &Rc<FunctionValue>,
        type_args: &[Type],
        args: Vec<Value>,
        span: Span,
    ) -> EvalResult {
        let FunctionValue::User {
            decl,
            env: captured,
            return_type,
        } = func.as_ref()
        else {
            unreachable!("caller matched User");
        };

        if args.len() != decl.params.len() {
            return Err(self.throw(
                RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    format!(
                        "{} expects {} argument(s) but got {}",
                        display_name(decl),
                        decl.params.len(),
                        args.len()
                    ),
                ),
                span,
            ));
        }

        // Resolve the generic instantiation for this call.
        let subs = self
            .solve_type_arguments(decl, type_args, &args)
            .map_err(|e| self.throw(e, span))?;

        let call_env = Environment::child(captured);
        for (param, arg) in decl.params.iter().zip(args) {
            let declared = substitute(&param.ty, &subs);
            check_binding(&param.name, &arg, &declared, &self.structs)
                .map_err(|e| self.throw(e, span))?;
            self.define(&call_env, &param.name, arg, Some(declared), false);
        }

        self.push_frame(display_name(decl), span.line);
        self.push_subs(subs.clone());
        let outcome = self.exec_block_in(&decl.body, &call_env);
        self.pop_subs();
        self.pop_frame();

        let result = match outcome {
            Ok(()) => Value::Void,
            Err(Unwind::Return(value)) => value,
            Err(other) => return Err(other),
        };

        let declared_return = substitute(return_type, &subs);
        check_return(display_name(decl), &result, &declared_return, &self.structs)
            .map_err(|e| self.throw(e, span))?;
        Ok(result)
    }

    /// Explicit type arguments (arity-checked) or unification against
    /// the actual argument types. Unresolved parameters default to any
    /// at substitution time.
    fn solve_type_arguments(
        &self,
        decl: &FunctionDecl,
        type_args: &[Type],
        args: &[Value],
    ) -> Result<Substitutions, RuntimeError> {
        let mut subs = Substitutions::new();
        if decl.type_params.is_empty() {
            return Ok(subs);
        }

        if !type_args.is_empty() {
            if type_args.len() != decl.type_params.len() {
                return Err(RuntimeError::new(
                    ErrorKind::GenericUnification,
                    format!(
                        "{} takes {} type argument(s) but got {}",
                        display_name(decl),
                        decl.type_params.len(),
                        type_args.len()
                    ),
                ));
            }
            for (param, ty) in decl.type_params.iter().zip(type_args) {
                subs.insert(param.clone(), ty.clone());
            }
            return Ok(subs);
        }

        for (param, arg) in decl.params.iter().zip(args) {
            let actual = runtime_type_of(arg);
            unify(&param.ty, &actual, &mut subs)?;
        }
        Ok(subs)
    }

    /// Invoke an imported block: arguments are marshalled as `arg0`,
    /// `arg1`, … bindings and the block body runs as a polyglot block in
    /// its declared language.
    fn call_block(
        &mut self,
        block: &Rc<crate::value::BlockValue>,
        args: Vec<Value>,
        span: Span,
    ) -> EvalResult {
        let bindings: Vec<(String, Value)> = args
            .into_iter()
            .enumerate()
            .map(|(i, v)| (format!("arg{}", i), v))
            .collect();

        self.push_frame(&block.meta.id, span.line);
        let result = self.dispatch_polyglot(
            &block.meta.language,
            &bindings,
            &block.meta.code,
            span,
        );
        self.pop_frame();
        result
    }

    // ------------------------------------------------------------------
    // Struct literals
    // ------------------------------------------------------------------

    fn eval_struct_literal(
        &mut self,
        name: &str,
        type_args: &[Type],
        fields: &[(String, Expr)],
        span: Span,
        env: &EnvRef,
    ) -> EvalResult {
        let Some(def) = self.structs.get(name) else {
            let known = self.structs.names();
            let suffix = suggestion_suffix(name, known.iter().map(|s| s.as_str()));
            return Err(self.throw(
                RuntimeError::new(
                    ErrorKind::UnboundName,
                    format!("unknown struct type '{}'{}", name, suffix),
                ),
                span,
            ));
        };

        if !type_args.is_empty() && type_args.len() != def.type_params.len() {
            return Err(self.throw(
                RuntimeError::new(
                    ErrorKind::GenericUnification,
                    format!(
                        "struct '{}' takes {} type argument(s) but got {}",
                        name,
                        def.type_params.len(),
                        type_args.len()
                    ),
                ),
                span,
            ));
        }
        let mut subs = Substitutions::new();
        for (param, ty) in def.type_params.iter().zip(type_args) {
            subs.insert(param.clone(), ty.clone());
        }

        let mut values: HashMap<String, Value> = HashMap::with_capacity(fields.len());
        for (field_name, field_expr) in fields {
            let Some(field_info) = def.field(field_name) else {
                let suffix =
                    suggestion_suffix(field_name, def.fields.iter().map(|f| f.name.as_str()));
                return Err(self.throw(
                    RuntimeError::new(
                        ErrorKind::UnknownField,
                        format!("struct '{}' has no field '{}'{}", name, field_name, suffix),
                    ),
                    span,
                ));
            };
            let value = self.eval_expr(field_expr, env)?;
            let declared = substitute(&field_info.ty, &subs);
            check_binding(field_name, &value, &declared, &self.structs)
                .map_err(|e| self.throw(e, span))?;
            values.insert(field_name.clone(), value);
        }

        // The instance's field set must equal the definition's.
        for field in &def.fields {
            if !values.contains_key(&field.name) {
                if field.ty.nullable {
                    values.insert(field.name.clone(), Value::Void);
                } else {
                    return Err(self.throw(
                        RuntimeError::new(
                            ErrorKind::TypeMismatch,
                            format!(
                                "struct literal for '{}' is missing non-nullable field '{}'",
                                name, field.name
                            ),
                        ),
                        span,
                    ));
                }
            }
        }

        let resolved_args: Vec<Type> = type_args.to_vec();
        let sv = self.heap.alloc_struct(StructValue {
            name: name.to_string(),
            type_args: resolved_args,
            fields: values,
        });
        Ok(Value::Struct(sv))
    }

    // ------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------

    /// `value |> stage`: the stage is evaluated lazily, after the value,
    /// and receives the value as its first argument.
    fn eval_pipeline_stage(
        &mut self,
        piped: Value,
        stage: &Expr,
        env: &EnvRef,
        span: Span,
    ) -> EvalResult {
        match stage {
            Expr::Call {
                callee,
                type_args,
                args,
                span: call_span,
            } => {
                let callable = self.eval_expr(callee, env)?;
                let mut evaluated = Vec::with_capacity(args.len() + 1);
                evaluated.push(piped);
                for arg in args {
                    evaluated.push(self.eval_expr(arg, env)?);
                }
                self.call_value(callable, type_args, evaluated, *call_span, env)
            }
            other => {
                let callable = self.eval_expr(other, env)?;
                self.call_value(callable, &[], vec![piped], span, env)
            }
        }
    }

    // ------------------------------------------------------------------
    // Polyglot (single block)
    // ------------------------------------------------------------------

    pub(crate) fn eval_polyglot(
        &mut self,
        literal: &PolyglotLiteral,
        span: Span,
        env: &EnvRef,
    ) -> EvalResult {
        // Binding lookups fail before any subprocess is launched.
        let bindings = self.resolve_bindings(literal, env, span)?;
        self.dispatch_polyglot(&literal.language, &bindings, &literal.body, span)
    }

    fn dispatch_polyglot(
        &mut self,
        language_name: &str,
        bindings: &[(String, Value)],
        body: &str,
        span: Span,
    ) -> EvalResult {
        let prepared = self
            .dispatcher
            .prepare(language_name, bindings, body)
            .map_err(|e| self.throw(e, span))?;
        self.audit_event(AuditEvent::SubprocessLaunch, language_name, &[]);

        let output = self
            .dispatcher
            .execute(&prepared)
            .map_err(|core| self.throw(core.into(), span))?;
        if output.timed_out {
            self.audit_event(AuditEvent::Timeout, language_name, &[]);
        }

        let value = interpret_output(prepared.language, body, &output)
            .map_err(|e| self.throw(e, span))?;
        self.heap.track_value(&value);
        Ok(value)
    }
}

fn display_name(decl: &FunctionDecl) -> &str {
    if decl.name.is_empty() {
        "<lambda>"
    } else {
        &decl.name
    }
}

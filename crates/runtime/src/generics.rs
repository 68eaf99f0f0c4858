//! Generics solver
//!
//! Per-call unification of declared parameter shapes against actual
//! runtime types. The solver produces a `TypeParam → Type` map which is
//! swapped in for the duration of the call and restored on exit.
//!
//! Substitution is idempotent: substituting an already-substituted type
//! is a fixed point, which the tests pin down.

use crate::error::RuntimeError;
use naab_core::ErrorKind;
use naab_syntax::ast::{Expr, Stmt};
use naab_syntax::types::{Type, TypeKind};
use std::collections::HashMap;

pub type Substitutions = HashMap<String, Type>;

/// Unify a declared type shape against an actual runtime type,
/// collecting type-parameter bindings. Conflicting bindings for the same
/// parameter raise `GenericUnification`.
pub fn unify(declared: &Type, actual: &Type, subs: &mut Substitutions) -> Result<(), RuntimeError> {
    match (&declared.kind, &actual.kind) {
        (TypeKind::TypeParam(name), _) => {
            // Binding a parameter to null tells us nothing about it.
            if actual.is_void() {
                return Ok(());
            }
            match subs.get(name) {
                None => {
                    subs.insert(name.clone(), actual.clone());
                    Ok(())
                }
                Some(existing) if types_compatible(existing, actual) => Ok(()),
                Some(existing) => Err(RuntimeError::new(
                    ErrorKind::GenericUnification,
                    format!(
                        "type parameter {} is bound to {} but argument has type {}",
                        name, existing, actual
                    ),
                )),
            }
        }
        (TypeKind::List(d_elem), TypeKind::List(a_elem)) => unify(d_elem, a_elem, subs),
        (TypeKind::Dict(d_key, d_value), TypeKind::Dict(a_key, a_value)) => {
            unify(d_key, a_key, subs)?;
            unify(d_value, a_value, subs)
        }
        (
            TypeKind::Struct { name: d_name, args: d_args },
            TypeKind::Struct { name: a_name, args: a_args },
        ) if d_name == a_name && d_args.len() == a_args.len() => {
            for (d, a) in d_args.iter().zip(a_args) {
                unify(d, a, subs)?;
            }
            Ok(())
        }
        (TypeKind::Union(members), _) => {
            // Descend into the member that mentions parameters only when
            // it is the lone candidate; otherwise unions learn nothing.
            let parametric: Vec<&Type> = members
                .iter()
                .filter(|m| matches!(m.kind, TypeKind::TypeParam(_)))
                .collect();
            if let [only] = parametric.as_slice() {
                unify(only, actual, subs)?;
            }
            Ok(())
        }
        // Non-parametric shapes carry no bindings; mismatches surface at
        // the binding check, not here.
        _ => Ok(()),
    }
}

fn types_compatible(a: &Type, b: &Type) -> bool {
    a.kind == b.kind || a.is_any() || b.is_any()
}

/// Replace type parameters by their bindings. Unresolved parameters
/// default to `any`.
pub fn substitute(ty: &Type, subs: &Substitutions) -> Type {
    let mut result = match &ty.kind {
        TypeKind::TypeParam(name) => match subs.get(name) {
            Some(bound) => bound.clone(),
            None => Type::any(),
        },
        TypeKind::List(elem) => Type::list(substitute(elem, subs)),
        TypeKind::Dict(key, value) => {
            Type::dict(substitute(key, subs), substitute(value, subs))
        }
        TypeKind::Struct { name, args } => Type::new(TypeKind::Struct {
            name: name.clone(),
            args: args.iter().map(|a| substitute(a, subs)).collect(),
        }),
        TypeKind::Union(members) => {
            Type::union(members.iter().map(|m| substitute(m, subs)).collect())
        }
        other => Type::new(other.clone()),
    };
    result.nullable = result.nullable || ty.nullable;
    result
}

/// Syntactic return-type inference, applied when a function omits its
/// return type. Collects the statically determinable type of every
/// reachable `return` expression: none ⇒ void, one ⇒ it, several ⇒ a
/// union of the distinct types.
pub fn infer_return_type(body: &[Stmt]) -> Type {
    let mut found = Vec::new();
    collect_return_types(body, &mut found);

    let mut distinct: Vec<Type> = Vec::new();
    for ty in found {
        if ty.is_any() {
            // One opaque return poisons the set; the whole function
            // stays dynamically typed.
            return Type::any();
        }
        if !distinct.contains(&ty) {
            distinct.push(ty);
        }
    }
    match distinct.len() {
        0 => Type::void(),
        1 => distinct.pop().expect("one type"),
        _ => Type::union(distinct),
    }
}

fn collect_return_types(body: &[Stmt], out: &mut Vec<Type>) {
    for stmt in body {
        match stmt {
            Stmt::Return { value, .. } => match value {
                Some(expr) => out.push(syntactic_type(expr)),
                None => out.push(Type::void()),
            },
            Stmt::If {
                then_block,
                else_block,
                ..
            } => {
                collect_return_types(then_block, out);
                if let Some(else_block) = else_block {
                    collect_return_types(else_block, out);
                }
            }
            Stmt::While { body, .. } | Stmt::For { body, .. } => collect_return_types(body, out),
            Stmt::Block { statements, .. } => collect_return_types(statements, out),
            Stmt::Try {
                try_block,
                catch_block,
                finally_block,
                ..
            } => {
                collect_return_types(try_block, out);
                collect_return_types(catch_block, out);
                if let Some(finally_block) = finally_block {
                    collect_return_types(finally_block, out);
                }
            }
            // Nested functions and lambdas have their own returns.
            _ => {}
        }
    }
}

/// Best-effort static type of an expression; `any` when it depends on
/// runtime values.
fn syntactic_type(expr: &Expr) -> Type {
    match expr {
        Expr::IntLit { .. } => Type::int(),
        Expr::FloatLit { .. } => Type::float(),
        Expr::StrLit { .. } => Type::string(),
        Expr::BoolLit { .. } => Type::bool(),
        Expr::NullLit { .. } => Type::nullable(TypeKind::Any),
        Expr::ArrayLit { elements, .. } => {
            let elem_types: Vec<Type> = elements.iter().map(syntactic_type).collect();
            match elem_types.first() {
                Some(first) if elem_types.iter().all(|t| t == first) && !first.is_any() => {
                    Type::list(first.clone())
                }
                _ => Type::list(Type::any()),
            }
        }
        Expr::DictLit { .. } => Type::dict(Type::string(), Type::any()),
        Expr::StructLit { name, type_args, .. } => Type::new(TypeKind::Struct {
            name: name.clone(),
            args: type_args.clone(),
        }),
        Expr::Lambda { .. } => Type::new(TypeKind::Function),
        Expr::Compare { .. } | Expr::Logical { .. } => Type::bool(),
        _ => Type::any(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use naab_syntax::parse_source;

    #[test]
    fn test_unify_list_element() {
        let declared = Type::list(Type::param("T"));
        let actual = Type::list(Type::int());
        let mut subs = Substitutions::new();
        unify(&declared, &actual, &mut subs).unwrap();
        assert_eq!(subs.get("T"), Some(&Type::int()));
    }

    #[test]
    fn test_unify_dict_key_value() {
        let declared = Type::dict(Type::param("K"), Type::param("V"));
        let actual = Type::dict(Type::string(), Type::float());
        let mut subs = Substitutions::new();
        unify(&declared, &actual, &mut subs).unwrap();
        assert_eq!(subs.get("K"), Some(&Type::string()));
        assert_eq!(subs.get("V"), Some(&Type::float()));
    }

    #[test]
    fn test_unify_conflict() {
        let declared = Type::param("T");
        let mut subs = Substitutions::new();
        unify(&declared, &Type::int(), &mut subs).unwrap();
        let err = unify(&declared, &Type::string(), &mut subs).unwrap_err();
        assert_eq!(err.kind, ErrorKind::GenericUnification);
    }

    #[test]
    fn test_unify_struct_args() {
        let declared = Type::new(TypeKind::Struct {
            name: "Pair".into(),
            args: vec![Type::param("T"), Type::param("U")],
        });
        let actual = Type::new(TypeKind::Struct {
            name: "Pair".into(),
            args: vec![Type::int(), Type::string()],
        });
        let mut subs = Substitutions::new();
        unify(&declared, &actual, &mut subs).unwrap();
        assert_eq!(subs.get("T"), Some(&Type::int()));
        assert_eq!(subs.get("U"), Some(&Type::string()));
    }

    #[test]
    fn test_substitute_unresolved_defaults_to_any() {
        let subs = Substitutions::new();
        assert!(substitute(&Type::param("T"), &subs).is_any());
    }

    #[test]
    fn test_substitution_is_idempotent() {
        let mut subs = Substitutions::new();
        subs.insert("T".to_string(), Type::int());
        let declared = Type::list(Type::param("T"));

        let once = substitute(&declared, &subs);
        let twice = substitute(&once, &subs);
        assert_eq!(once, twice);
        assert_eq!(once.to_string(), "list<int>");
    }

    #[test]
    fn test_nullable_survives_substitution() {
        let mut subs = Substitutions::new();
        subs.insert("T".to_string(), Type::int());
        let mut declared = Type::param("T");
        declared.nullable = true;
        let substituted = substitute(&declared, &subs);
        assert!(substituted.nullable);
        assert_eq!(substituted.to_string(), "int?");
    }

    fn body_of(source: &str) -> Vec<Stmt> {
        let program = parse_source(source).unwrap();
        match &program.statements[0] {
            Stmt::Function(decl) => decl.body.clone(),
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_infer_void_when_no_returns() {
        let body = body_of("function f() {\n  let x = 1\n}\nmain {\n}\n");
        assert!(infer_return_type(&body).is_void());
    }

    #[test]
    fn test_infer_single_type() {
        let body = body_of("function f() {\n  return 42\n}\nmain {\n}\n");
        assert_eq!(infer_return_type(&body), Type::int());
    }

    #[test]
    fn test_infer_union_of_branches() {
        let body = body_of(
            "function f(c: bool) {\n  if c {\n    return 1\n  }\n  return \"x\"\n}\nmain {\n}\n",
        );
        let inferred = infer_return_type(&body);
        assert_eq!(inferred.to_string(), "int | string");
    }

    #[test]
    fn test_infer_opaque_return_is_any() {
        let body = body_of("function f(x: int) {\n  return x + 1\n}\nmain {\n}\n");
        assert!(infer_return_type(&body).is_any());
    }
}

//! Binding-time type checks
//!
//! There is no ahead-of-time checker; a value meets its declared type at
//! every binding point (definition, parameter binding, assignment,
//! struct-literal field set, return) or the binding fails with
//! `TypeMismatch` / `NullSafety`.

use crate::error::RuntimeError;
use crate::structs::StructRegistry;
use crate::value::Value;
use naab_core::ErrorKind;
use naab_syntax::types::{Type, TypeKind};

/// The runtime type of a value, for unification and error messages.
pub fn runtime_type_of(value: &Value) -> Type {
    match value {
        Value::Void => Type::void(),
        Value::Int(_) => Type::int(),
        Value::Float(_) => Type::float(),
        Value::Bool(_) => Type::bool(),
        Value::Str(_) => Type::string(),
        Value::List(list) => {
            let list = list.borrow();
            match list.first() {
                Some(first) => {
                    let elem = runtime_type_of(first);
                    if list.iter().all(|v| runtime_type_of(v).kind == elem.kind) {
                        Type::list(elem)
                    } else {
                        Type::list(Type::any())
                    }
                }
                None => Type::list(Type::any()),
            }
        }
        Value::Dict(_) => Type::dict(Type::string(), Type::any()),
        Value::Struct(sv) => {
            let sv = sv.borrow();
            Type::new(TypeKind::Struct {
                name: sv.name.clone(),
                args: sv.type_args.clone(),
            })
        }
        Value::Function(_) | Value::Block(_) => Type::new(TypeKind::Function),
        Value::Module(_) => Type::any(),
        Value::Error(_) => Type::any(),
    }
}

/// Does `value` satisfy `ty`? Null only satisfies nullable (or any/void)
/// types; unions satisfy if any member does.
pub fn matches_type(value: &Value, ty: &Type, structs: &StructRegistry) -> bool {
    if ty.is_any() {
        return true;
    }
    if value.is_void() {
        return ty.nullable || ty.is_void();
    }
    match (&ty.kind, value) {
        (TypeKind::Int, Value::Int(_)) => true,
        (TypeKind::Float, Value::Float(_)) => true,
        (TypeKind::Bool, Value::Bool(_)) => true,
        (TypeKind::String, Value::Str(_)) => true,
        (TypeKind::Union(members), _) => {
            members.iter().any(|m| matches_type(value, m, structs))
        }
        (TypeKind::List(elem), Value::List(list)) => {
            if elem.is_any() {
                return true;
            }
            list.borrow().iter().all(|v| matches_type(v, elem, structs))
        }
        (TypeKind::Dict(key, value_ty), Value::Dict(dict)) => {
            // Keys are always strings at runtime.
            if !matches!(key.kind, TypeKind::String | TypeKind::Any) {
                return false;
            }
            if value_ty.is_any() {
                return true;
            }
            dict.borrow().values().all(|v| matches_type(v, value_ty, structs))
        }
        (TypeKind::Struct { name, args }, Value::Struct(sv)) => {
            let sv = sv.borrow();
            if sv.name != *name {
                return false;
            }
            // An uninstantiated declared type accepts any instantiation.
            args.is_empty()
                || sv.type_args.is_empty()
                || args
                    .iter()
                    .zip(&sv.type_args)
                    .all(|(a, b)| a.is_any() || b.is_any() || a.kind == b.kind)
        }
        (TypeKind::Function, Value::Function(_) | Value::Block(_)) => true,
        // An unresolved type parameter behaves like `any`; the solver
        // substitutes before validation, so reaching one here means it
        // stayed unbound.
        (TypeKind::TypeParam(_), _) => true,
        _ => false,
    }
}

/// Check a value against a declared type at a binding point named
/// `name`. Null into a non-nullable type is `NullSafety`; every other
/// failure is `TypeMismatch` listing declared and actual types.
pub fn check_binding(
    name: &str,
    value: &Value,
    ty: &Type,
    structs: &StructRegistry,
) -> Result<(), RuntimeError> {
    if matches_type(value, ty, structs) {
        return Ok(());
    }
    if value.is_void() {
        return Err(RuntimeError::new(
            ErrorKind::NullSafety,
            format!(
                "Cannot assign null to non-nullable '{}' of type {}. Help: declare as {}?",
                name, ty, ty
            ),
        ));
    }
    Err(RuntimeError::new(
        ErrorKind::TypeMismatch,
        format!(
            "'{}' expects {} but got {}",
            name,
            ty,
            runtime_type_of(value)
        ),
    ))
}

/// Check a function's return value. A non-nullable declared return that
/// produces null (including falling off the end) is `NullSafety`.
pub fn check_return(
    function_name: &str,
    value: &Value,
    ty: &Type,
    structs: &StructRegistry,
) -> Result<(), RuntimeError> {
    if matches_type(value, ty, structs) {
        return Ok(());
    }
    if value.is_void() {
        return Err(RuntimeError::new(
            ErrorKind::NullSafety,
            format!(
                "function '{}' is declared to return {} but returned null",
                function_name, ty
            ),
        ));
    }
    Err(RuntimeError::new(
        ErrorKind::TypeMismatch,
        format!(
            "function '{}' is declared to return {} but returned {}",
            function_name,
            ty,
            runtime_type_of(value)
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ListRef, StructValue};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    fn registry() -> StructRegistry {
        StructRegistry::new()
    }

    #[test]
    fn test_primitives_match() {
        let structs = registry();
        assert!(matches_type(&Value::Int(1), &Type::int(), &structs));
        assert!(matches_type(&Value::Str("x".into()), &Type::string(), &structs));
        assert!(!matches_type(&Value::Int(1), &Type::string(), &structs));
        assert!(!matches_type(&Value::Int(1), &Type::float(), &structs));
    }

    #[test]
    fn test_null_needs_nullable() {
        let structs = registry();
        assert!(!matches_type(&Value::Void, &Type::int(), &structs));
        assert!(matches_type(&Value::Void, &Type::nullable(TypeKind::Int), &structs));
        assert!(matches_type(&Value::Void, &Type::any(), &structs));
    }

    #[test]
    fn test_union_membership() {
        let structs = registry();
        let ty = Type::union(vec![Type::int(), Type::string()]);
        assert!(matches_type(&Value::Int(1), &ty, &structs));
        assert!(matches_type(&Value::Str("a".into()), &ty, &structs));
        assert!(!matches_type(&Value::Bool(true), &ty, &structs));
    }

    #[test]
    fn test_list_elements_checked() {
        let structs = registry();
        let ints: ListRef = Rc::new(RefCell::new(vec![Value::Int(1), Value::Int(2)]));
        let mixed: ListRef = Rc::new(RefCell::new(vec![Value::Int(1), Value::Str("a".into())]));
        let ty = Type::list(Type::int());
        assert!(matches_type(&Value::List(ints), &ty, &structs));
        assert!(!matches_type(&Value::List(mixed), &ty, &structs));
    }

    #[test]
    fn test_struct_name_checked() {
        let structs = registry();
        let sv = Rc::new(RefCell::new(StructValue {
            name: "Point".into(),
            type_args: Vec::new(),
            fields: HashMap::new(),
        }));
        let point_ty = Type::new(TypeKind::Struct {
            name: "Point".into(),
            args: Vec::new(),
        });
        let other_ty = Type::new(TypeKind::Struct {
            name: "Line".into(),
            args: Vec::new(),
        });
        assert!(matches_type(&Value::Struct(Rc::clone(&sv)), &point_ty, &structs));
        assert!(!matches_type(&Value::Struct(sv), &other_ty, &structs));
    }

    #[test]
    fn test_null_binding_message_is_exact() {
        let structs = registry();
        let err = check_binding("x", &Value::Void, &Type::int(), &structs).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NullSafety);
        assert_eq!(
            format!("{}", err),
            "NullSafety: Cannot assign null to non-nullable 'x' of type int. Help: declare as int?"
        );
    }

    #[test]
    fn test_mismatch_lists_both_types() {
        let structs = registry();
        let err = check_binding(
            "x",
            &Value::Str("a".into()),
            &Type::union(vec![Type::int(), Type::float()]),
            &structs,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
        assert!(err.message.contains("int | float"));
        assert!(err.message.contains("string"));
    }

    #[test]
    fn test_return_null_from_nonnullable() {
        let structs = registry();
        let err = check_return("f", &Value::Void, &Type::int(), &structs).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NullSafety);
    }

    #[test]
    fn test_runtime_type_of_homogeneous_list() {
        let ints: ListRef = Rc::new(RefCell::new(vec![Value::Int(1), Value::Int(2)]));
        assert_eq!(runtime_type_of(&Value::List(ints)).to_string(), "list<int>");
    }
}

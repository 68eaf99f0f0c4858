//! The declared-type surface of the language
//!
//! Types are written in source (`let x: list<int?>`), carried through the
//! AST, and checked against runtime values at binding time. There is no
//! ahead-of-time checker; these shapes exist so the evaluator can validate
//! and the generics solver can unify.

use std::fmt;

/// Type constructors.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Int,
    Float,
    Bool,
    String,
    Void,
    /// Matches anything, including null.
    Any,
    List(Box<Type>),
    Dict(Box<Type>, Box<Type>),
    /// A named struct, possibly instantiated: `Pair<int, string>`.
    Struct {
        name: String,
        args: Vec<Type>,
    },
    /// An unbound type parameter; the generics solver binds it per call.
    TypeParam(String),
    /// Matches if any member matches.
    Union(Vec<Type>),
    Function,
}

/// A declared type: a constructor plus a nullability flag.
///
/// A nullable type accepts null in addition to its base; a non-nullable
/// type never accepts null.
#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub kind: TypeKind,
    pub nullable: bool,
}

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Type {
            kind,
            nullable: false,
        }
    }

    pub fn nullable(kind: TypeKind) -> Self {
        Type {
            kind,
            nullable: true,
        }
    }

    pub fn int() -> Self {
        Type::new(TypeKind::Int)
    }

    pub fn float() -> Self {
        Type::new(TypeKind::Float)
    }

    pub fn bool() -> Self {
        Type::new(TypeKind::Bool)
    }

    pub fn string() -> Self {
        Type::new(TypeKind::String)
    }

    pub fn void() -> Self {
        Type::new(TypeKind::Void)
    }

    pub fn any() -> Self {
        Type::new(TypeKind::Any)
    }

    pub fn list(elem: Type) -> Self {
        Type::new(TypeKind::List(Box::new(elem)))
    }

    pub fn dict(key: Type, value: Type) -> Self {
        Type::new(TypeKind::Dict(Box::new(key), Box::new(value)))
    }

    pub fn param(name: impl Into<String>) -> Self {
        Type::new(TypeKind::TypeParam(name.into()))
    }

    pub fn union(members: Vec<Type>) -> Self {
        Type::new(TypeKind::Union(members))
    }

    pub fn is_any(&self) -> bool {
        matches!(self.kind, TypeKind::Any)
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeKind::Void)
    }

    /// Does this type mention the given type parameter anywhere?
    pub fn mentions_param(&self, param: &str) -> bool {
        match &self.kind {
            TypeKind::TypeParam(name) => name == param,
            TypeKind::List(elem) => elem.mentions_param(param),
            TypeKind::Dict(k, v) => k.mentions_param(param) || v.mentions_param(param),
            TypeKind::Struct { args, .. } => args.iter().any(|a| a.mentions_param(param)),
            TypeKind::Union(members) => members.iter().any(|m| m.mentions_param(param)),
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Int => write!(f, "int")?,
            TypeKind::Float => write!(f, "float")?,
            TypeKind::Bool => write!(f, "bool")?,
            TypeKind::String => write!(f, "string")?,
            TypeKind::Void => write!(f, "void")?,
            TypeKind::Any => write!(f, "any")?,
            TypeKind::List(elem) => write!(f, "list<{}>", elem)?,
            TypeKind::Dict(k, v) => write!(f, "dict<{}, {}>", k, v)?,
            TypeKind::Struct { name, args } => {
                write!(f, "{}", name)?;
                if !args.is_empty() {
                    let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                    write!(f, "<{}>", rendered.join(", "))?;
                }
            }
            TypeKind::TypeParam(name) => write!(f, "{}", name)?,
            TypeKind::Union(members) => {
                let rendered: Vec<String> = members.iter().map(|m| m.to_string()).collect();
                write!(f, "{}", rendered.join(" | "))?;
            }
            TypeKind::Function => write!(f, "function")?,
        }
        if self.nullable {
            write!(f, "?")?;
        }
        Ok(())
    }
}

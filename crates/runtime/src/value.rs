//! Runtime values
//!
//! The language talks about tagged-variant [`Value`]s. Primitives are
//! plain data; composites (lists, dicts, structs) are shared via `Rc` so
//! assignment and argument passing alias the same storage. Equality is
//! structural for primitives and by identity (`Rc::ptr_eq`) for
//! composites.
//!
//! Values are confined to the evaluator thread. Only marshalled text ever
//! crosses into the polyglot fan-out threads.

use crate::error::RuntimeError;
use naab_syntax::ast::FunctionDecl;
use naab_syntax::types::Type;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type DictRef = Rc<RefCell<HashMap<String, Value>>>;
pub type StructRef = Rc<RefCell<StructValue>>;

/// A struct instance: its type name, the instantiation's type arguments,
/// and a field map. The field set always equals the registered
/// definition's field set; the evaluator enforces that at construction.
#[derive(Debug)]
pub struct StructValue {
    pub name: String,
    pub type_args: Vec<Type>,
    pub fields: HashMap<String, Value>,
}

/// A callable: either a user function/lambda with its captured
/// environment, or a named native builtin.
#[derive(Debug)]
pub enum FunctionValue {
    User {
        decl: Rc<FunctionDecl>,
        /// The defining environment (closure capture).
        env: EnvRef,
        /// Declared return type, or the inferred one when the source
        /// omitted it.
        return_type: Type,
    },
    Native {
        name: &'static str,
    },
}

impl FunctionValue {
    pub fn name(&self) -> &str {
        match self {
            FunctionValue::User { decl, .. } if decl.name.is_empty() => "<lambda>",
            FunctionValue::User { decl, .. } => &decl.name,
            FunctionValue::Native { name } => name,
        }
    }
}

/// An imported block, invocable like a function.
#[derive(Debug, Clone)]
pub struct BlockValue {
    pub meta: std::sync::Arc<crate::blocks::BlockMeta>,
}

/// What a `use` of a stdlib module or a source file binds.
#[derive(Debug)]
pub enum ModuleHandle {
    /// Opaque marker: `name.member(args)` dispatches into the module
    /// registry's handler table.
    Stdlib { name: String },
    /// An evaluated source-file module and its exports.
    File {
        name: String,
        exports: RefCell<HashMap<String, Value>>,
    },
}

impl ModuleHandle {
    pub fn name(&self) -> &str {
        match self {
            ModuleHandle::Stdlib { name } => name,
            ModuleHandle::File { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    /// The null / absent value. A non-nullable binding never holds it.
    Void,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(ListRef),
    Dict(DictRef),
    Struct(StructRef),
    Function(Rc<FunctionValue>),
    Block(Rc<BlockValue>),
    Module(Rc<ModuleHandle>),
    /// A caught or thrown error as a first-class value.
    Error(Rc<RuntimeError>),
}

impl Value {
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    /// Short type name for messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Struct(_) => "struct",
            Value::Function(_) => "function",
            Value::Block(_) => "block",
            Value::Module(_) => "module",
            Value::Error(_) => "error",
        }
    }

    /// Copy-on-assignment: lists and dicts get a fresh outer container
    /// whose elements still alias the originals; everything else clones
    /// the handle (or the primitive).
    pub fn assign_copy(&self) -> Value {
        match self {
            Value::List(list) => {
                Value::List(Rc::new(RefCell::new(list.borrow().clone())))
            }
            Value::Dict(dict) => {
                Value::Dict(Rc::new(RefCell::new(dict.borrow().clone())))
            }
            other => other.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            // Composites compare by identity.
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Struct(a), Value::Struct(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Block(a), Value::Block(b)) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "null"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => {
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(list) => {
                write!(f, "[")?;
                for (i, item) in list.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", DisplayQuoted(item))?;
                }
                write!(f, "]")
            }
            Value::Dict(dict) => {
                let dict = dict.borrow();
                let mut keys: Vec<&String> = dict.keys().collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "\"{}\": {}", key, DisplayQuoted(&dict[*key]))?;
                }
                write!(f, "}}")
            }
            Value::Struct(sv) => {
                let sv = sv.borrow();
                let mut keys: Vec<&String> = sv.fields.keys().collect();
                keys.sort();
                write!(f, "{} {{ ", sv.name)?;
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, DisplayQuoted(&sv.fields[*key]))?;
                }
                write!(f, " }}")
            }
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Block(block) => write!(f, "<block {}>", block.meta.id),
            Value::Module(module) => write!(f, "<module {}>", module.name()),
            Value::Error(err) => write!(f, "{}", err),
        }
    }
}

/// Nested display: strings are quoted inside containers, bare at top
/// level.
struct DisplayQuoted<'a>(&'a Value);

impl fmt::Display for DisplayQuoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::Str(s) => write!(f, "\"{}\"", s),
            other => write!(f, "{}", other),
        }
    }
}

// ---------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------

pub type EnvRef = Rc<RefCell<Environment>>;

/// One binding in a scope. The declared type (when present) is re-checked
/// on every assignment through this name.
#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub declared_type: Option<Type>,
    pub is_const: bool,
}

/// A lexical scope: name → binding, plus the enclosing scope.
///
/// Parent links only ever point upward (the scope graph is a tree), so
/// the chain itself cannot cycle; env ↔ closure cycles are the cycle
/// collector's problem.
#[derive(Debug, Default)]
pub struct Environment {
    vars: HashMap<String, Binding>,
    parent: Option<EnvRef>,
}

/// Outcome of an assignment attempt, so the evaluator can pick the right
/// error kind. (Type checks run in the evaluator before assignment; the
/// environment only enforces existence and constness.)
pub enum AssignOutcome {
    Ok,
    NotFound,
    ConstViolation,
}

impl Environment {
    pub fn new_root() -> EnvRef {
        Rc::new(RefCell::new(Environment::default()))
    }

    pub fn child(parent: &EnvRef) -> EnvRef {
        Rc::new(RefCell::new(Environment {
            vars: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    pub fn parent(&self) -> Option<EnvRef> {
        self.parent.clone()
    }

    /// Define (or shadow) a name in this scope.
    pub fn define(&mut self, name: impl Into<String>, binding: Binding) {
        self.vars.insert(name.into(), binding);
    }

    pub fn lookup(env: &EnvRef, name: &str) -> Option<Value> {
        let mut current = Rc::clone(env);
        loop {
            if let Some(binding) = current.borrow().vars.get(name) {
                return Some(binding.value.clone());
            }
            let parent = current.borrow().parent.clone();
            match parent {
                Some(p) => current = p,
                None => return None,
            }
        }
    }

    pub fn lookup_binding(env: &EnvRef, name: &str) -> Option<Binding> {
        let mut current = Rc::clone(env);
        loop {
            if let Some(binding) = current.borrow().vars.get(name) {
                return Some(binding.clone());
            }
            let parent = current.borrow().parent.clone();
            match parent {
                Some(p) => current = p,
                None => return None,
            }
        }
    }

    /// Assign through the scope chain. The caller turns the outcome into
    /// the appropriate error; the type check itself happens in the
    /// evaluator (which owns the struct registry).
    pub fn assign(env: &EnvRef, name: &str, value: Value) -> AssignOutcome {
        let mut current = Rc::clone(env);
        loop {
            {
                let mut scope = current.borrow_mut();
                if let Some(binding) = scope.vars.get_mut(name) {
                    if binding.is_const {
                        return AssignOutcome::ConstViolation;
                    }
                    binding.value = value;
                    return AssignOutcome::Ok;
                }
            }
            let parent = current.borrow().parent.clone();
            match parent {
                Some(p) => current = p,
                None => return AssignOutcome::NotFound,
            }
        }
    }

    /// The declared type of a name, if any scope declares one.
    pub fn declared_type(env: &EnvRef, name: &str) -> Option<Type> {
        Environment::lookup_binding(env, name).and_then(|b| b.declared_type)
    }

    /// All names visible from this scope, for "did you mean".
    pub fn visible_names(env: &EnvRef) -> Vec<String> {
        let mut names = Vec::new();
        let mut current = Rc::clone(env);
        loop {
            names.extend(current.borrow().vars.keys().cloned());
            let parent = current.borrow().parent.clone();
            match parent {
                Some(p) => current = p,
                None => break,
            }
        }
        names.sort();
        names.dedup();
        names
    }

    /// Iterate this scope's own bindings (not the chain). Used by the
    /// cycle collector's mark phase.
    pub fn local_values(&self) -> impl Iterator<Item = &Value> {
        self.vars.values().map(|b| &b.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(value: Value) -> Binding {
        Binding {
            value,
            declared_type: None,
            is_const: false,
        }
    }

    #[test]
    fn test_primitive_equality_is_structural() {
        assert_eq!(Value::Int(3), Value::Int(3));
        assert_eq!(Value::Str("a".into()), Value::Str("a".into()));
        assert_eq!(Value::Int(3), Value::Float(3.0));
        assert_ne!(Value::Int(3), Value::Int(4));
    }

    #[test]
    fn test_composite_equality_is_identity() {
        let a: ListRef = Rc::new(RefCell::new(vec![Value::Int(1)]));
        let b: ListRef = Rc::new(RefCell::new(vec![Value::Int(1)]));
        assert_eq!(Value::List(Rc::clone(&a)), Value::List(Rc::clone(&a)));
        assert_ne!(Value::List(a), Value::List(b));
    }

    #[test]
    fn test_assign_copy_shares_inner_values() {
        let inner: ListRef = Rc::new(RefCell::new(vec![Value::Int(1)]));
        let outer: ListRef = Rc::new(RefCell::new(vec![Value::List(Rc::clone(&inner))]));
        let copied = Value::List(outer).assign_copy();

        // New outer container…
        let Value::List(copy) = &copied else {
            panic!("expected list")
        };
        // …but the nested list is the same allocation.
        let Value::List(nested) = copy.borrow()[0].clone() else {
            panic!("expected nested list")
        };
        assert!(Rc::ptr_eq(&nested, &inner));
    }

    #[test]
    fn test_scope_shadowing() {
        let root = Environment::new_root();
        root.borrow_mut().define("x", plain(Value::Int(1)));
        let child = Environment::child(&root);
        child.borrow_mut().define("x", plain(Value::Int(2)));

        assert_eq!(Environment::lookup(&child, "x"), Some(Value::Int(2)));
        assert_eq!(Environment::lookup(&root, "x"), Some(Value::Int(1)));
    }

    #[test]
    fn test_assign_walks_chain() {
        let root = Environment::new_root();
        root.borrow_mut().define("x", plain(Value::Int(1)));
        let child = Environment::child(&root);

        assert!(matches!(
            Environment::assign(&child, "x", Value::Int(5)),
            AssignOutcome::Ok
        ));
        assert_eq!(Environment::lookup(&root, "x"), Some(Value::Int(5)));
    }

    #[test]
    fn test_const_assignment_rejected() {
        let root = Environment::new_root();
        root.borrow_mut().define(
            "k",
            Binding {
                value: Value::Int(1),
                declared_type: None,
                is_const: true,
            },
        );
        assert!(matches!(
            Environment::assign(&root, "k", Value::Int(2)),
            AssignOutcome::ConstViolation
        ));
    }

    #[test]
    fn test_assign_unknown_name() {
        let root = Environment::new_root();
        assert!(matches!(
            Environment::assign(&root, "nope", Value::Int(1)),
            AssignOutcome::NotFound
        ));
    }

    #[test]
    fn test_display_values() {
        assert_eq!(Value::Int(30).to_string(), "30");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Str("hi".into()).to_string(), "hi");
        let list: ListRef = Rc::new(RefCell::new(vec![
            Value::Int(1),
            Value::Str("a".into()),
        ]));
        assert_eq!(Value::List(list).to_string(), "[1, \"a\"]");
    }
}

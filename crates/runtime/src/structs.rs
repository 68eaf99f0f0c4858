//! Struct registry
//!
//! Process-wide table of struct definitions. Registration happens while a
//! program's declarations are evaluated (single writer); lookups are
//! read-guarded and may come from any thread that needs type shapes (the
//! cycle collector, the marshaller).
//!
//! A struct whose non-nullable, non-weak fields cycle back to itself can
//! never be instantiated, so the cycle is rejected at declaration time by
//! DFS. Nullable or `weak` fields break the cycle and are fine.

use crate::error::RuntimeError;
use naab_core::ErrorKind;
use naab_syntax::ast::StructDecl;
use naab_syntax::types::{Type, TypeKind};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub ty: Type,
    pub weak: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub name: String,
    pub type_params: Vec<String>,
    /// Declaration order is preserved.
    pub fields: Vec<FieldInfo>,
}

impl StructDef {
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

#[derive(Debug, Default)]
pub struct StructRegistry {
    defs: RwLock<HashMap<String, StructDef>>,
}

impl StructRegistry {
    pub fn new() -> Self {
        StructRegistry::default()
    }

    /// Register a declaration, rejecting duplicates and field cycles.
    pub fn register(&self, decl: &StructDecl) -> Result<(), RuntimeError> {
        let def = StructDef {
            name: decl.name.clone(),
            type_params: decl.type_params.clone(),
            fields: decl
                .fields
                .iter()
                .map(|f| FieldInfo {
                    name: f.name.clone(),
                    ty: f.ty.clone(),
                    weak: f.weak,
                })
                .collect(),
        };

        let mut seen = HashSet::new();
        for field in &def.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    format!(
                        "duplicate field '{}' in struct '{}'",
                        field.name, def.name
                    ),
                ));
            }
        }

        let mut defs = self.defs.write().expect("struct registry poisoned");
        if defs.contains_key(&def.name) {
            return Err(RuntimeError::new(
                ErrorKind::TypeMismatch,
                format!("struct '{}' is already defined", def.name),
            ));
        }

        // DFS over required (non-nullable, non-weak) struct fields; a
        // path back to the new struct means no instance could ever be
        // built.
        let mut visiting = Vec::new();
        if Self::has_required_cycle(&defs, &def, &def.name, &mut visiting) {
            return Err(RuntimeError::new(
                ErrorKind::TypeMismatch,
                format!(
                    "struct '{}' has a circular non-nullable field dependency ({}); make a field nullable or weak",
                    def.name,
                    visiting.join(" -> "),
                ),
            ));
        }

        defs.insert(def.name.clone(), def);
        Ok(())
    }

    fn has_required_cycle(
        defs: &HashMap<String, StructDef>,
        def: &StructDef,
        target: &str,
        visiting: &mut Vec<String>,
    ) -> bool {
        visiting.push(def.name.clone());
        for field in &def.fields {
            if field.weak || field.ty.nullable {
                continue;
            }
            if let TypeKind::Struct { name, .. } = &field.ty.kind {
                if name == target {
                    visiting.push(name.clone());
                    return true;
                }
                // Re-visiting a non-target struct on this path cannot add
                // a new route to the target.
                if visiting.iter().any(|v| v == name) {
                    continue;
                }
                if let Some(next) = defs.get(name) {
                    if Self::has_required_cycle(defs, next, target, visiting) {
                        return true;
                    }
                }
            }
        }
        visiting.pop();
        false
    }

    pub fn get(&self, name: &str) -> Option<StructDef> {
        self.defs
            .read()
            .expect("struct registry poisoned")
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs
            .read()
            .expect("struct registry poisoned")
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .defs
            .read()
            .expect("struct registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Drop everything and install the given definitions. Test-harness
    /// hook; the interpreter also uses it to seed built-in structs.
    pub fn clear_and_seed(&self, seed: Vec<StructDef>) {
        let mut defs = self.defs.write().expect("struct registry poisoned");
        defs.clear();
        for def in seed {
            defs.insert(def.name.clone(), def);
        }
    }
}

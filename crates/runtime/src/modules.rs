//! Module registry
//!
//! Resolves the three `use` forms in fixed precedence: stdlib name,
//! block identifier, file path. Stdlib modules register `{ name,
//! functions }` tables here at initialization (collisions fail); file
//! modules are resolved to paths here but evaluated by the interpreter,
//! which owns the per-run export cache.
//!
//! The registry is process-wide: registration happens at init (single
//! writer), lookups are read-guarded and callable from any thread.

use crate::error::RuntimeError;
use crate::suggest::suggestion_suffix;
use crate::value::Value;
use naab_core::ErrorKind;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// A stdlib function: takes evaluated arguments, returns a value or a
/// typed error. Handlers must not retain the arguments.
pub type StdlibHandler = Box<dyn Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

/// One registered stdlib module.
pub struct StdlibModule {
    pub name: String,
    functions: HashMap<String, StdlibHandler>,
}

impl StdlibModule {
    pub fn new(name: impl Into<String>) -> Self {
        StdlibModule {
            name: name.into(),
            functions: HashMap::new(),
        }
    }

    /// Builder-style function registration.
    pub fn with_function(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    ) -> Self {
        self.functions.insert(name.into(), Box::new(handler));
        self
    }

    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Source-file extension for NAAB modules.
pub const MODULE_EXTENSION: &str = "naab";

#[derive(Default)]
pub struct ModuleRegistry {
    stdlib: RwLock<HashMap<String, StdlibModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        ModuleRegistry::default()
    }

    /// Register a stdlib module. A name collision fails registration.
    pub fn register(&self, module: StdlibModule) -> Result<(), RuntimeError> {
        let mut stdlib = self.stdlib.write().expect("module registry poisoned");
        if stdlib.contains_key(&module.name) {
            return Err(RuntimeError::new(
                ErrorKind::ModuleNotFound,
                format!("stdlib module '{}' is already registered", module.name),
            ));
        }
        debug!(module = %module.name, "stdlib module registered");
        stdlib.insert(module.name.clone(), module);
        Ok(())
    }

    pub fn has_stdlib(&self, name: &str) -> bool {
        self.stdlib
            .read()
            .expect("module registry poisoned")
            .contains_key(name)
    }

    /// Dispatch `module.function(args)` into the handler table.
    pub fn call(
        &self,
        module: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let stdlib = self.stdlib.read().expect("module registry poisoned");
        let entry = stdlib.get(module).ok_or_else(|| {
            RuntimeError::new(
                ErrorKind::ModuleNotFound,
                format!("stdlib module '{}' is not registered", module),
            )
        })?;
        match entry.functions.get(function) {
            Some(handler) => handler(args),
            None => {
                let names = entry.function_names();
                let suffix =
                    suggestion_suffix(function, names.iter().map(|s| s.as_str()));
                Err(RuntimeError::new(
                    ErrorKind::UnknownField,
                    format!("module '{}' has no function '{}'{}", module, function, suffix),
                ))
            }
        }
    }

    /// Resolve a dotted module path to a file: `a.b.c` → `a/b/c.naab`
    /// relative to the importing file's directory, then each entry of
    /// the search path. First hit wins.
    pub fn resolve_file(
        &self,
        segments: &[String],
        importer_dir: &Path,
        search_path: &[PathBuf],
    ) -> Option<PathBuf> {
        let mut relative = PathBuf::new();
        for segment in segments {
            relative.push(segment);
        }
        relative.set_extension(MODULE_EXTENSION);

        let direct = importer_dir.join(&relative);
        if direct.is_file() {
            return Some(direct);
        }
        for root in search_path {
            let candidate = root.join(&relative);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// Drop all registrations. Test-harness hook.
    pub fn clear(&self) {
        self.stdlib
            .write()
            .expect("module registry poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_module() -> StdlibModule {
        StdlibModule::new("string")
            .with_function("upper", |args| match args {
                [Value::Str(s)] => Ok(Value::Str(s.to_uppercase())),
                _ => Err(RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    "string.upper expects one string argument",
                )),
            })
            .with_function("lower", |args| match args {
                [Value::Str(s)] => Ok(Value::Str(s.to_lowercase())),
                _ => Err(RuntimeError::new(
                    ErrorKind::TypeMismatch,
                    "string.lower expects one string argument",
                )),
            })
    }

    #[test]
    fn test_register_and_call() {
        let registry = ModuleRegistry::new();
        registry.register(string_module()).unwrap();

        let result = registry
            .call("string", "upper", &[Value::Str("hi".into())])
            .unwrap();
        assert_eq!(result, Value::Str("HI".into()));
    }

    #[test]
    fn test_collision_fails() {
        let registry = ModuleRegistry::new();
        registry.register(string_module()).unwrap();
        assert!(registry.register(string_module()).is_err());
    }

    #[test]
    fn test_unknown_function_suggests() {
        let registry = ModuleRegistry::new();
        registry.register(string_module()).unwrap();

        let err = registry
            .call("string", "uper", &[Value::Str("hi".into())])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownField);
        assert!(err.message.contains("Did you mean 'upper'"), "{}", err.message);
    }

    #[test]
    fn test_handler_errors_propagate() {
        let registry = ModuleRegistry::new();
        registry.register(string_module()).unwrap();
        let err = registry.call("string", "upper", &[Value::Int(3)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_resolve_file() {
        let dir = tempfile::tempdir().unwrap();
        let module_dir = dir.path().join("util");
        std::fs::create_dir_all(&module_dir).unwrap();
        std::fs::write(module_dir.join("text.naab"), "export function f() { return 1 }\n")
            .unwrap();

        let registry = ModuleRegistry::new();
        let found = registry
            .resolve_file(
                &["util".to_string(), "text".to_string()],
                dir.path(),
                &[],
            )
            .expect("resolved");
        assert!(found.ends_with("util/text.naab"));
        assert!(
            registry
                .resolve_file(&["missing".to_string()], dir.path(), &[])
                .is_none()
        );
    }
}

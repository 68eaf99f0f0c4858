//! Runtime configuration
//!
//! All knobs are optional environment variables:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `NAAB_TEMP_ROOT` | system temp | Root for per-thread guest-program directories |
//! | `NAAB_SEARCH_INDEX` | none | Path of the persisted block search index |
//! | `NAAB_AUDIT_LOG` | none (disabled) | Path of the append-only audit log |
//! | `NAAB_POLYGLOT_TIMEOUT` | `30` | Guest execution timeout in seconds |
//! | `NAAB_COMPILE_TIMEOUT` | `30` | Guest compilation timeout in seconds (compiled languages) |
//! | `NAAB_GC_THRESHOLD` | `1000` | Allocations between automatic cycle-collector passes |
//! | `NAAB_BLOCKS_ROOT` | `./blocks` | Root of the on-disk block library |
//! | `NAAB_MODULE_PATH` | empty | Colon-separated module search path |

use std::path::PathBuf;

pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_COMPILE_TIMEOUT_SECS: u64 = 30;
/// Post-compile run timeout for compiled guests.
pub const DEFAULT_COMPILED_RUN_SECS: u64 = 10;
pub const DEFAULT_GC_THRESHOLD: usize = 1000;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub temp_root: Option<PathBuf>,
    pub search_index_path: Option<PathBuf>,
    pub audit_log_path: Option<PathBuf>,
    pub polyglot_timeout_secs: u64,
    pub compile_timeout_secs: u64,
    pub gc_threshold: usize,
    pub blocks_root: PathBuf,
    pub module_search_path: Vec<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            temp_root: None,
            search_index_path: None,
            audit_log_path: None,
            polyglot_timeout_secs: DEFAULT_EXEC_TIMEOUT_SECS,
            compile_timeout_secs: DEFAULT_COMPILE_TIMEOUT_SECS,
            gc_threshold: DEFAULT_GC_THRESHOLD,
            blocks_root: PathBuf::from("blocks"),
            module_search_path: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let temp_root = std::env::var("NAAB_TEMP_ROOT").ok().map(PathBuf::from);
        let search_index_path = std::env::var("NAAB_SEARCH_INDEX").ok().map(PathBuf::from);
        let audit_log_path = std::env::var("NAAB_AUDIT_LOG").ok().map(PathBuf::from);

        let polyglot_timeout_secs = std::env::var("NAAB_POLYGLOT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(defaults.polyglot_timeout_secs);

        let compile_timeout_secs = std::env::var("NAAB_COMPILE_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(defaults.compile_timeout_secs);

        let gc_threshold = std::env::var("NAAB_GC_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(defaults.gc_threshold);

        let blocks_root = std::env::var("NAAB_BLOCKS_ROOT")
            .ok()
            .map(PathBuf::from)
            .unwrap_or(defaults.blocks_root);

        let module_search_path = std::env::var("NAAB_MODULE_PATH")
            .ok()
            .map(|raw| raw.split(':').filter(|s| !s.is_empty()).map(PathBuf::from).collect())
            .unwrap_or_default();

        Self {
            temp_root,
            search_index_path,
            audit_log_path,
            polyglot_timeout_secs,
            compile_timeout_secs,
            gc_threshold,
            blocks_root,
            module_search_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.polyglot_timeout_secs, 30);
        assert_eq!(config.gc_threshold, 1000);
        assert!(config.audit_log_path.is_none());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        unsafe {
            std::env::set_var("NAAB_POLYGLOT_TIMEOUT", "5");
            std::env::set_var("NAAB_GC_THRESHOLD", "42");
            std::env::set_var("NAAB_MODULE_PATH", "/a:/b");
        }
        let config = RuntimeConfig::from_env();
        assert_eq!(config.polyglot_timeout_secs, 5);
        assert_eq!(config.gc_threshold, 42);
        assert_eq!(
            config.module_search_path,
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
        unsafe {
            std::env::remove_var("NAAB_POLYGLOT_TIMEOUT");
            std::env::remove_var("NAAB_GC_THRESHOLD");
            std::env::remove_var("NAAB_MODULE_PATH");
        }
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back() {
        unsafe {
            std::env::set_var("NAAB_POLYGLOT_TIMEOUT", "not-a-number");
            std::env::set_var("NAAB_GC_THRESHOLD", "0");
        }
        let config = RuntimeConfig::from_env();
        assert_eq!(config.polyglot_timeout_secs, DEFAULT_EXEC_TIMEOUT_SECS);
        assert_eq!(config.gc_threshold, DEFAULT_GC_THRESHOLD);
        unsafe {
            std::env::remove_var("NAAB_POLYGLOT_TIMEOUT");
            std::env::remove_var("NAAB_GC_THRESHOLD");
        }
    }
}

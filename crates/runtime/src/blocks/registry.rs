//! Block registry
//!
//! Blocks are pre-written guest-language snippets stored as JSON under
//! `<root>/<lang>/<id>.json` and addressed by stable identifiers like
//! `BLOCK-PY-00001`. Entries load lazily on first lookup and stay cached;
//! the registry treats the JSON as metadata plus an opaque body.

use crate::error::RuntimeError;
use naab_core::{ErrorKind, SecureBuffer, sha256_fingerprint};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Required and optional keys of a block JSON entry (§ block contract).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub id: String,
    /// Lower-case guest language name.
    pub language: String,
    pub code: String,
    pub source_file: String,
    pub source_line: u64,
    /// `"validated"`, `"unvalidated"`, or `"deprecated"`.
    pub validation_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl BlockMeta {
    pub fn is_deprecated(&self) -> bool {
        self.validation_status == "deprecated"
    }
}

/// Does `id` match `BLOCK-[A-Z]+-\d{5}`?
pub fn validate_block_id(id: &str) -> bool {
    let mut parts = id.splitn(3, '-');
    let (Some(prefix), Some(lang), Some(number)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    prefix == "BLOCK"
        && !lang.is_empty()
        && lang.chars().all(|c| c.is_ascii_uppercase())
        && number.len() == 5
        && number.chars().all(|c| c.is_ascii_digit())
}

/// Map the id's language code to the library subdirectory.
fn language_dir(code: &str) -> Option<&'static str> {
    match code {
        "PY" => Some("python"),
        "JS" => Some("javascript"),
        "CPP" => Some("cpp"),
        "RS" => Some("rust"),
        "GO" => Some("go"),
        "RB" => Some("ruby"),
        "PHP" => Some("php"),
        "CS" => Some("csharp"),
        "SH" => Some("shell"),
        _ => None,
    }
}

struct CachedBlock {
    meta: Arc<BlockMeta>,
    /// SHA-256 of the block body, kept as secure integrity material.
    fingerprint: SecureBuffer,
}

pub struct BlockRegistry {
    root: PathBuf,
    cache: RwLock<HashMap<String, CachedBlock>>,
}

impl BlockRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        BlockRegistry {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look a block up, loading its JSON on first access.
    pub fn load(&self, id: &str) -> Result<Arc<BlockMeta>, RuntimeError> {
        if !validate_block_id(id) {
            return Err(RuntimeError::new(
                ErrorKind::UnknownBlock,
                format!("'{}' is not a valid block identifier", id),
            ));
        }
        if let Some(cached) = self.cache.read().expect("block cache poisoned").get(id) {
            return Ok(Arc::clone(&cached.meta));
        }

        let path = self.locate(id).ok_or_else(|| {
            RuntimeError::new(
                ErrorKind::UnknownBlock,
                format!("block '{}' not found under {}", id, self.root.display()),
            )
        })?;
        let meta = Self::read_entry(&path)?;
        if meta.id != id {
            return Err(RuntimeError::new(
                ErrorKind::UnknownBlock,
                format!(
                    "block file {} declares id '{}' but was looked up as '{}'",
                    path.display(),
                    meta.id,
                    id
                ),
            ));
        }
        debug!(id, path = %path.display(), "block loaded");

        let meta = Arc::new(meta);
        let fingerprint = sha256_fingerprint(meta.code.as_bytes());
        self.cache.write().expect("block cache poisoned").insert(
            id.to_string(),
            CachedBlock {
                meta: Arc::clone(&meta),
                fingerprint,
            },
        );
        Ok(meta)
    }

    /// Hex SHA-256 of a cached block's body; None until the block has
    /// been loaded.
    pub fn code_fingerprint(&self, id: &str) -> Option<String> {
        self.cache
            .read()
            .expect("block cache poisoned")
            .get(id)
            .map(|c| c.fingerprint.to_hex())
    }

    /// Constant-time check that a cached block's body still matches the
    /// given code.
    pub fn fingerprint_matches(&self, id: &str, code: &[u8]) -> bool {
        let cache = self.cache.read().expect("block cache poisoned");
        match cache.get(id) {
            Some(cached) => cached.fingerprint.ct_eq(&sha256_fingerprint(code)),
            None => false,
        }
    }

    fn locate(&self, id: &str) -> Option<PathBuf> {
        let code = id.split('-').nth(1)?;
        if let Some(dir) = language_dir(code) {
            let candidate = self.root.join(dir).join(format!("{}.json", id));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        // Unknown code, or the library uses nonstandard directory names:
        // scan one level of subdirectories.
        let entries = std::fs::read_dir(&self.root).ok()?;
        for entry in entries.flatten() {
            let candidate = entry.path().join(format!("{}.json", id));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    fn read_entry(path: &Path) -> Result<BlockMeta, RuntimeError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::new(
                ErrorKind::UnknownBlock,
                format!("cannot read block file {}: {}", path.display(), e),
            )
        })?;
        let meta: BlockMeta = serde_json::from_str(&raw).map_err(|e| {
            RuntimeError::new(
                ErrorKind::UnknownBlock,
                format!("malformed block JSON in {}: {}", path.display(), e),
            )
        })?;
        if !validate_block_id(&meta.id) {
            return Err(RuntimeError::new(
                ErrorKind::UnknownBlock,
                format!("block file {} has invalid id '{}'", path.display(), meta.id),
            ));
        }
        Ok(meta)
    }

    /// Walk the whole library (for index builds). Unparseable entries
    /// are skipped with a warning rather than failing the walk.
    pub fn all_blocks(&self) -> Vec<Arc<BlockMeta>> {
        let mut blocks = Vec::new();
        let Ok(langs) = std::fs::read_dir(&self.root) else {
            return blocks;
        };
        for lang in langs.flatten() {
            let Ok(entries) = std::fs::read_dir(lang.path()) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match Self::read_entry(&path) {
                    Ok(meta) => blocks.push(Arc::new(meta)),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping block entry"),
                }
            }
        }
        blocks.sort_by(|a, b| a.id.cmp(&b.id));
        blocks
    }

    /// Drop the cache (test-harness hook; also forces re-reads after an
    /// on-disk library change).
    pub fn clear_cache(&self) {
        self.cache.write().expect("block cache poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_block(root: &Path, dir: &str, meta: &BlockMeta) {
        let lang_dir = root.join(dir);
        std::fs::create_dir_all(&lang_dir).unwrap();
        std::fs::write(
            lang_dir.join(format!("{}.json", meta.id)),
            serde_json::to_string_pretty(meta).unwrap(),
        )
        .unwrap();
    }

    fn sample(id: &str, language: &str) -> BlockMeta {
        BlockMeta {
            id: id.to_string(),
            language: language.to_string(),
            code: "a + b".to_string(),
            source_file: "lib.py".to_string(),
            source_line: 12,
            validation_status: "validated".to_string(),
            version: Some("1.4.0".to_string()),
            deprecated_message: None,
            description: Some("add two numbers".to_string()),
        }
    }

    #[test]
    fn test_id_validation() {
        assert!(validate_block_id("BLOCK-PY-00001"));
        assert!(validate_block_id("BLOCK-CPP-99999"));
        assert!(!validate_block_id("BLOCK-py-00001"));
        assert!(!validate_block_id("BLOCK-PY-001"));
        assert!(!validate_block_id("BLK-PY-00001"));
        assert!(!validate_block_id("BLOCK-PY-00001-extra"));
        assert!(!validate_block_id("BLOCK--00001"));
    }

    #[test]
    fn test_lazy_load_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let meta = sample("BLOCK-PY-00001", "python");
        write_block(dir.path(), "python", &meta);

        let registry = BlockRegistry::new(dir.path());
        assert!(registry.code_fingerprint("BLOCK-PY-00001").is_none());
        let loaded = registry.load("BLOCK-PY-00001").unwrap();
        assert_eq!(loaded.code, "a + b");

        // Delete the file: the cached entry must still resolve.
        std::fs::remove_file(dir.path().join("python/BLOCK-PY-00001.json")).unwrap();
        assert!(registry.load("BLOCK-PY-00001").is_ok());
    }

    #[test]
    fn test_code_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        write_block(dir.path(), "python", &sample("BLOCK-PY-00001", "python"));

        let registry = BlockRegistry::new(dir.path());
        registry.load("BLOCK-PY-00001").unwrap();

        let hex = registry.code_fingerprint("BLOCK-PY-00001").unwrap();
        assert_eq!(hex.len(), 64);
        assert!(registry.fingerprint_matches("BLOCK-PY-00001", b"a + b"));
        assert!(!registry.fingerprint_matches("BLOCK-PY-00001", b"a - b"));
    }

    #[test]
    fn test_unknown_block() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BlockRegistry::new(dir.path());
        let err = registry.load("BLOCK-PY-00042").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownBlock);
    }

    #[test]
    fn test_invalid_id_rejected_before_disk() {
        let registry = BlockRegistry::new("/nonexistent");
        let err = registry.load("not-a-block").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownBlock);
    }

    #[test]
    fn test_id_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut meta = sample("BLOCK-PY-00002", "python");
        meta.id = "BLOCK-PY-00099".to_string();
        let lang_dir = dir.path().join("python");
        std::fs::create_dir_all(&lang_dir).unwrap();
        std::fs::write(
            lang_dir.join("BLOCK-PY-00002.json"),
            serde_json::to_string(&meta).unwrap(),
        )
        .unwrap();

        let registry = BlockRegistry::new(dir.path());
        assert!(registry.load("BLOCK-PY-00002").is_err());
    }

    #[test]
    fn test_all_blocks_walk() {
        let dir = tempfile::tempdir().unwrap();
        write_block(dir.path(), "python", &sample("BLOCK-PY-00001", "python"));
        write_block(dir.path(), "rust", &sample("BLOCK-RS-00002", "rust"));

        let registry = BlockRegistry::new(dir.path());
        let all = registry.all_blocks();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "BLOCK-PY-00001");
    }
}

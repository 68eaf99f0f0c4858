//! Block search index
//!
//! A small full-text index over block id, description, language, and
//! code. Built in one O(N) pass over the registry, persisted with
//! bincode, rebuilt on demand. Queries AND their terms, rank by total
//! term hits, and are capped (default 100).

use crate::blocks::registry::BlockRegistry;
use crate::error::RuntimeError;
use naab_core::ErrorKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// Default cap on results per query.
pub const DEFAULT_RESULT_CAP: usize = 100;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[a-z0-9_]+").expect("valid token pattern"))
}

/// Lower-cased word tokens of a text.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    token_pattern()
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub language: String,
    /// Number of query-term occurrences matched.
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DocEntry {
    language: String,
    /// Term → occurrence count within this block.
    term_counts: BTreeMap<String, u32>,
}

/// Inverted index over the block library.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SearchIndex {
    /// Term → ids containing it.
    postings: HashMap<String, BTreeSet<String>>,
    docs: BTreeMap<String, DocEntry>,
}

impl SearchIndex {
    /// Build from every block in the registry. Building twice over the
    /// same library yields the same index.
    pub fn build_from(registry: &BlockRegistry) -> Self {
        let mut index = SearchIndex::default();
        for block in registry.all_blocks() {
            let mut term_counts: BTreeMap<String, u32> = BTreeMap::new();
            let description = block.description.as_deref().unwrap_or("");
            for source in [
                block.id.as_str(),
                description,
                block.language.as_str(),
                block.code.as_str(),
            ] {
                for token in tokenize(source) {
                    *term_counts.entry(token).or_insert(0) += 1;
                }
            }
            for term in term_counts.keys() {
                index
                    .postings
                    .entry(term.clone())
                    .or_default()
                    .insert(block.id.clone());
            }
            index.docs.insert(
                block.id.clone(),
                DocEntry {
                    language: block.language.clone(),
                    term_counts,
                },
            );
        }
        debug!(blocks = index.docs.len(), terms = index.postings.len(), "search index built");
        index
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// All query terms must match; hits are ranked by total term count,
    /// ties broken by id for determinism.
    pub fn query(&self, query: &str, cap: usize) -> Vec<SearchHit> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }

        // Intersect posting lists, smallest first.
        let mut lists: Vec<&BTreeSet<String>> = Vec::with_capacity(terms.len());
        for term in &terms {
            match self.postings.get(term) {
                Some(ids) => lists.push(ids),
                None => return Vec::new(),
            }
        }
        lists.sort_by_key(|ids| ids.len());
        let (first, rest) = lists.split_first().expect("nonempty");

        let mut hits: Vec<SearchHit> = first
            .iter()
            .filter(|id| rest.iter().all(|ids| ids.contains(*id)))
            .map(|id| {
                let doc = &self.docs[id];
                let score = terms
                    .iter()
                    .map(|t| doc.term_counts.get(t).copied().unwrap_or(0))
                    .sum();
                SearchHit {
                    id: id.clone(),
                    language: doc.language.clone(),
                    score,
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(cap);
        hits
    }

    /// Persist with bincode.
    pub fn save(&self, path: &Path) -> Result<(), RuntimeError> {
        let encoded = bincode::serialize(self).map_err(|e| {
            RuntimeError::new(
                ErrorKind::UnknownBlock,
                format!("search index serialization failed: {}", e),
            )
        })?;
        std::fs::write(path, encoded).map_err(|e| {
            RuntimeError::new(
                ErrorKind::UnknownBlock,
                format!("cannot write search index {}: {}", path.display(), e),
            )
        })
    }

    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let raw = std::fs::read(path).map_err(|e| {
            RuntimeError::new(
                ErrorKind::UnknownBlock,
                format!("cannot read search index {}: {}", path.display(), e),
            )
        })?;
        bincode::deserialize(&raw).map_err(|e| {
            RuntimeError::new(
                ErrorKind::UnknownBlock,
                format!("corrupt search index {}: {}", path.display(), e),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::registry::BlockMeta;

    fn seed_library(dir: &Path) {
        for (id, lang_dir, language, code, description) in [
            (
                "BLOCK-PY-00001",
                "python",
                "python",
                "def add(a, b):\n    return a + b",
                "add two numbers",
            ),
            (
                "BLOCK-PY-00002",
                "python",
                "python",
                "import csv\nrows = list(csv.reader(open(path)))",
                "parse csv rows",
            ),
            (
                "BLOCK-RS-00003",
                "rust",
                "rust",
                "fn add(a: i64, b: i64) -> i64 { a + b }",
                "fast add",
            ),
        ] {
            let meta = BlockMeta {
                id: id.to_string(),
                language: language.to_string(),
                code: code.to_string(),
                source_file: "lib".to_string(),
                source_line: 1,
                validation_status: "validated".to_string(),
                version: None,
                deprecated_message: None,
                description: Some(description.to_string()),
            };
            let lang_path = dir.join(lang_dir);
            std::fs::create_dir_all(&lang_path).unwrap();
            std::fs::write(
                lang_path.join(format!("{}.json", id)),
                serde_json::to_string(&meta).unwrap(),
            )
            .unwrap();
        }
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("BLOCK-PY-00001 Add_Two numbers!"),
            vec!["block", "py", "00001", "add_two", "numbers"]
        );
    }

    #[test]
    fn test_build_and_query() {
        let dir = tempfile::tempdir().unwrap();
        seed_library(dir.path());
        let registry = BlockRegistry::new(dir.path());
        let index = SearchIndex::build_from(&registry);
        assert_eq!(index.len(), 3);

        let hits = index.query("add", DEFAULT_RESULT_CAP);
        assert_eq!(hits.len(), 2);

        let hits = index.query("add python", DEFAULT_RESULT_CAP);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "BLOCK-PY-00001");
    }

    #[test]
    fn test_all_terms_required() {
        let dir = tempfile::tempdir().unwrap();
        seed_library(dir.path());
        let registry = BlockRegistry::new(dir.path());
        let index = SearchIndex::build_from(&registry);

        assert!(index.query("csv rust", DEFAULT_RESULT_CAP).is_empty());
    }

    #[test]
    fn test_result_cap() {
        let dir = tempfile::tempdir().unwrap();
        seed_library(dir.path());
        let registry = BlockRegistry::new(dir.path());
        let index = SearchIndex::build_from(&registry);

        let hits = index.query("add", 1);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_build_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        seed_library(dir.path());
        let registry = BlockRegistry::new(dir.path());

        let a = SearchIndex::build_from(&registry);
        let b = SearchIndex::build_from(&registry);
        assert_eq!(
            bincode::serialize(&a.docs).unwrap(),
            bincode::serialize(&b.docs).unwrap()
        );
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        seed_library(dir.path());
        let registry = BlockRegistry::new(dir.path());
        let index = SearchIndex::build_from(&registry);

        let path = dir.path().join("blocks.idx");
        index.save(&path).unwrap();
        let reloaded = SearchIndex::load(&path).unwrap();
        assert_eq!(reloaded.len(), index.len());
        assert_eq!(
            reloaded.query("csv", 10),
            index.query("csv", 10)
        );
    }
}

//! Hash-chained, tamper-evident audit log
//!
//! Every security-relevant event in the interpreter (block load, module
//! load, subprocess launch, credential read, timeout, permission denial)
//! is appended here. Entries are newline-delimited JSON; each entry's
//! `hash` is a SHA-256 over the previous entry's hash plus its own fields,
//! so any post-hoc edit breaks the chain at or before the next entry.
//!
//! The verifier (`verify_log`) re-reads the file and checks the chain. It
//! never writes, and a broken chain is reported, not thrown into the
//! running program.
//!
//! # Format
//!
//! One JSON object per line. The genesis line has `"sequence":0` and a
//! `prev_hash` of 64 zero characters.

use crate::error::{CoreError, ErrorKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// The genesis `prev_hash`: 64 zero characters.
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Event kinds recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    Genesis,
    BlockLoad,
    ModuleLoad,
    SubprocessLaunch,
    CredentialRead,
    Timeout,
    PermissionDenied,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::Genesis => "genesis",
            AuditEvent::BlockLoad => "block_load",
            AuditEvent::ModuleLoad => "module_load",
            AuditEvent::SubprocessLaunch => "subprocess_launch",
            AuditEvent::CredentialRead => "credential_read",
            AuditEvent::Timeout => "timeout",
            AuditEvent::PermissionDenied => "permission_denied",
        }
    }
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    /// Microseconds since the Unix epoch.
    pub timestamp: u64,
    pub prev_hash: String,
    pub event_kind: String,
    pub details: String,
    /// BTreeMap keeps metadata sorted, which the hash preimage requires.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub hash: String,
}

impl AuditEntry {
    /// Recompute this entry's hash from its fields.
    ///
    /// Preimage: `prev_hash ∥ timestamp ∥ event_kind ∥ details ∥ k=v;…`
    /// with metadata pairs in key order.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(self.timestamp.to_string().as_bytes());
        hasher.update(self.event_kind.as_bytes());
        hasher.update(self.details.as_bytes());
        for (k, v) in &self.metadata {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b";");
        }
        hex::encode(hasher.finalize())
    }
}

struct LogInner {
    file: File,
    next_sequence: u64,
    last_hash: String,
}

/// Append-only hash-chained log. Safe to share across threads; appends
/// are serialized by an internal mutex (single-writer discipline).
pub struct AuditLog {
    path: PathBuf,
    inner: Mutex<LogInner>,
}

impl AuditLog {
    /// Open (or create) the log at `path`.
    ///
    /// A fresh file gets a genesis entry. An existing file is scanned so
    /// appends continue the chain; a malformed tail is refused rather
    /// than silently forked.
    pub fn open(path: impl Into<PathBuf>) -> Result<AuditLog, CoreError> {
        let path = path.into();
        let existing = match File::open(&path) {
            Ok(f) => {
                let mut last: Option<AuditEntry> = None;
                for line in BufReader::new(f).lines() {
                    let line = line.map_err(io_err)?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let entry: AuditEntry = serde_json::from_str(&line).map_err(|e| {
                        CoreError::new(
                            ErrorKind::AuditChainBroken,
                            format!("unparseable audit line in {}: {}", path.display(), e),
                        )
                    })?;
                    last = Some(entry);
                }
                last
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_err(e)),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        let mut log = AuditLog {
            path,
            inner: Mutex::new(LogInner {
                file,
                next_sequence: 0,
                last_hash: GENESIS_PREV_HASH.to_string(),
            }),
        };

        match existing {
            Some(entry) => {
                let inner = log.inner.get_mut().expect("audit mutex poisoned");
                inner.next_sequence = entry.sequence + 1;
                inner.last_hash = entry.hash;
            }
            None => {
                log.append(AuditEvent::Genesis, "", &[])?;
            }
        }
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event, returning its sequence number.
    pub fn append(
        &self,
        event: AuditEvent,
        details: &str,
        metadata: &[(&str, &str)],
    ) -> Result<u64, CoreError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        let mut inner = self.inner.lock().expect("audit mutex poisoned");
        let mut entry = AuditEntry {
            sequence: inner.next_sequence,
            timestamp,
            prev_hash: inner.last_hash.clone(),
            event_kind: event.as_str().to_string(),
            details: details.to_string(),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();

        let line = serde_json::to_string(&entry).map_err(|e| {
            CoreError::new(
                ErrorKind::AuditChainBroken,
                format!("audit entry serialization failed: {}", e),
            )
        })?;
        writeln!(inner.file, "{}", line).map_err(io_err)?;
        inner.file.flush().map_err(io_err)?;

        inner.next_sequence = entry.sequence + 1;
        inner.last_hash = entry.hash.clone();
        debug!(sequence = entry.sequence, event = %entry.event_kind, "audit append");
        Ok(entry.sequence)
    }
}

fn io_err(e: std::io::Error) -> CoreError {
    CoreError::new(ErrorKind::AuditChainBroken, format!("audit log I/O: {}", e))
}

/// Result of a verification pass.
///
/// `valid` counts non-genesis entries whose hashes checked out before the
/// first break. Entries after a break are untrusted and are not counted
/// either way.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerifyReport {
    pub valid: u64,
    pub invalid: u64,
    pub missing: u64,
    /// Sequence number at which the chain first broke, if it did.
    pub first_broken: Option<u64>,
    /// Human-readable findings, one per problem.
    pub findings: Vec<String>,
}

impl VerifyReport {
    pub fn is_intact(&self) -> bool {
        self.invalid == 0 && self.missing == 0
    }
}

impl std::fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.first_broken {
            Some(seq) => write!(
                f,
                "tampered at sequence {}: valid={}, invalid={}, missing={}",
                seq, self.valid, self.invalid, self.missing
            ),
            None => write!(
                f,
                "chain intact: valid={}, invalid={}, missing={}",
                self.valid, self.invalid, self.missing
            ),
        }
    }
}

/// Re-read a log file and validate the hash chain. Read-only.
pub fn verify_log(path: impl AsRef<Path>) -> Result<VerifyReport, CoreError> {
    let file = File::open(path.as_ref()).map_err(io_err)?;
    let mut report = VerifyReport::default();
    let mut expected_seq: u64 = 0;
    let mut prev_hash = GENESIS_PREV_HASH.to_string();

    for line in BufReader::new(file).lines() {
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = match serde_json::from_str(&line) {
            Ok(e) => e,
            Err(e) => {
                report.invalid += 1;
                report.first_broken.get_or_insert(expected_seq);
                report
                    .findings
                    .push(format!("sequence {}: unparseable entry: {}", expected_seq, e));
                break;
            }
        };

        if entry.sequence != expected_seq {
            if entry.sequence > expected_seq {
                let gap = entry.sequence - expected_seq;
                report.missing += gap;
                for missing in expected_seq..entry.sequence {
                    report.findings.push(format!("sequence {}: missing", missing));
                }
            } else {
                report
                    .findings
                    .push(format!("sequence {}: out of order", entry.sequence));
            }
            report.first_broken.get_or_insert(expected_seq);
            break;
        }

        if entry.prev_hash != prev_hash {
            report.invalid += 1;
            report.first_broken.get_or_insert(entry.sequence);
            report.findings.push(format!(
                "sequence {}: prev_hash does not match preceding entry",
                entry.sequence
            ));
            break;
        }

        if entry.compute_hash() != entry.hash {
            report.invalid += 1;
            report.first_broken.get_or_insert(entry.sequence);
            report
                .findings
                .push(format!("sequence {}: hash mismatch", entry.sequence));
            break;
        }

        if entry.sequence == 0 {
            if entry.prev_hash != GENESIS_PREV_HASH {
                report.invalid += 1;
                report.first_broken.get_or_insert(0);
                report.findings.push("sequence 0: bad genesis prev_hash".to_string());
                break;
            }
        } else {
            report.valid += 1;
        }

        prev_hash = entry.hash.clone();
        expected_seq = entry.sequence + 1;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn temp_log() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audit.ndjson");
        (dir, path)
    }

    #[test]
    fn test_genesis_written_on_create() {
        let (_dir, path) = temp_log();
        let _log = AuditLog::open(&path).unwrap();

        let mut contents = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        let genesis: AuditEntry = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(genesis.sequence, 0);
        assert_eq!(genesis.prev_hash, GENESIS_PREV_HASH);
        assert_eq!(genesis.event_kind, "genesis");
    }

    #[test]
    fn test_chain_links_prev_hash() {
        let (_dir, path) = temp_log();
        let log = AuditLog::open(&path).unwrap();
        log.append(AuditEvent::BlockLoad, "BLOCK-PY-00001", &[]).unwrap();
        log.append(AuditEvent::SubprocessLaunch, "python3", &[("pid", "123")])
            .unwrap();

        let report = verify_log(&path).unwrap();
        assert!(report.is_intact());
        assert_eq!(report.valid, 2);
    }

    #[test]
    fn test_reopen_continues_chain() {
        let (_dir, path) = temp_log();
        {
            let log = AuditLog::open(&path).unwrap();
            log.append(AuditEvent::ModuleLoad, "string", &[]).unwrap();
        }
        {
            let log = AuditLog::open(&path).unwrap();
            let seq = log.append(AuditEvent::ModuleLoad, "json", &[]).unwrap();
            assert_eq!(seq, 2);
        }
        let report = verify_log(&path).unwrap();
        assert!(report.is_intact());
        assert_eq!(report.valid, 2);
    }

    #[test]
    fn test_single_byte_tamper_detected() {
        let (_dir, path) = temp_log();
        let log = AuditLog::open(&path).unwrap();
        for i in 0..100 {
            log.append(AuditEvent::BlockLoad, &format!("BLOCK-PY-{:05}", i), &[])
                .unwrap();
        }

        // Flip one character in entry 47's details.
        let contents = std::fs::read_to_string(&path).unwrap();
        let mutated: Vec<String> = contents
            .lines()
            .map(|line| {
                let entry: AuditEntry = serde_json::from_str(line).unwrap();
                if entry.sequence == 47 {
                    line.replacen("BLOCK-PY-00046", "BLOCK-PY-99946", 1)
                } else {
                    line.to_string()
                }
            })
            .collect();
        std::fs::write(&path, mutated.join("\n") + "\n").unwrap();

        let report = verify_log(&path).unwrap();
        assert_eq!(report.first_broken, Some(47));
        assert_eq!(report.valid, 46);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.missing, 0);
        assert_eq!(
            report.to_string(),
            "tampered at sequence 47: valid=46, invalid=1, missing=0"
        );
    }

    #[test]
    fn test_missing_sequence_detected() {
        let (_dir, path) = temp_log();
        let log = AuditLog::open(&path).unwrap();
        for _ in 0..5 {
            log.append(AuditEvent::Timeout, "python3", &[]).unwrap();
        }
        // Drop entry with sequence 3.
        let contents = std::fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = contents
            .lines()
            .filter(|line| {
                let entry: AuditEntry = serde_json::from_str(line).unwrap();
                entry.sequence != 3
            })
            .collect();
        std::fs::write(&path, kept.join("\n") + "\n").unwrap();

        let report = verify_log(&path).unwrap();
        assert_eq!(report.missing, 1);
        assert_eq!(report.first_broken, Some(3));
    }

    #[test]
    fn test_metadata_order_does_not_change_hash() {
        let mut a = AuditEntry {
            sequence: 1,
            timestamp: 1000,
            prev_hash: GENESIS_PREV_HASH.to_string(),
            event_kind: "block_load".to_string(),
            details: "x".to_string(),
            metadata: BTreeMap::new(),
            hash: String::new(),
        };
        a.metadata.insert("zeta".into(), "1".into());
        a.metadata.insert("alpha".into(), "2".into());

        let mut b = a.clone();
        b.metadata = BTreeMap::new();
        b.metadata.insert("alpha".into(), "2".into());
        b.metadata.insert("zeta".into(), "1".into());

        assert_eq!(a.compute_hash(), b.compute_hash());
    }

    #[test]
    fn test_verifier_never_writes() {
        let (_dir, path) = temp_log();
        let log = AuditLog::open(&path).unwrap();
        log.append(AuditEvent::CredentialRead, "env:API_KEY", &[]).unwrap();

        let before = std::fs::read(&path).unwrap();
        let _ = verify_log(&path).unwrap();
        let after = std::fs::read(&path).unwrap();
        assert_eq!(before, after);
    }
}

//! Append-only JSONL writer with an optional SHA-256 hash chain.
//!
//! Several processes may append to the same log. Each append holds an
//! exclusive advisory lock on the file and re-reads the last line under it,
//! so log ids and the chain continue from whatever another writer appended.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Namespace for deterministic event ids.
const EVENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_2c3a_8e4b_4c17_9a55_0b7e_3d21_c9a4);

/// One line of the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLine {
    /// 1-based position in the log; never reused.
    pub log_id: u64,
    pub event_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub event_type: String,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

pub struct AuditWriter {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    /// Last `log_id` seen in the file; the next line gets `seq + 1`.
    seq: u64,
}

impl AuditWriter {
    /// Writer for a fresh log. Creates parent dirs.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create_dir_all {:?}", parent))?;
            }
        }
        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        })
    }

    /// Writer that continues an existing log: `seq` and the last hash are
    /// restored from the final line so the chain stays unbroken.
    pub fn resume(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let mut w = Self::new(path, hash_chain)?;
        for line in read_lines(&w.path)? {
            w.seq = line.log_id;
            w.last_hash = line.hash_self;
        }
        Ok(w)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    pub fn append(
        &mut self,
        ts_utc: DateTime<Utc>,
        event_type: &str,
        payload: Value,
    ) -> Result<AuditLine> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open audit log {:?}", self.path))?;
        // Released when `file` drops.
        file.lock_exclusive()
            .with_context(|| format!("lock audit log {:?}", self.path))?;
        self.catch_up(&mut file)?;

        let log_id = self.seq + 1;
        let event_id = derive_event_id(self.last_hash.as_deref(), log_id, &payload)?;

        let mut line = AuditLine {
            log_id,
            event_id,
            ts_utc,
            event_type: event_type.to_string(),
            payload,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            line.hash_prev = self.last_hash.clone();
            line.hash_self = Some(compute_line_hash(&line)?);
        }

        write_line(&mut file, &canonical_json_line(&line)?)?;

        // Advance only after the bytes are on disk.
        self.seq = log_id;
        if self.hash_chain {
            self.last_hash = line.hash_self.clone();
        }
        Ok(line)
    }

    /// Adopt the file's last line as the chain head.
    fn catch_up(&mut self, file: &mut File) -> Result<()> {
        let mut content = String::new();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_string(&mut content))
            .with_context(|| format!("read audit log {:?}", self.path))?;
        let Some(last) = content.lines().map(str::trim).rev().find(|l| !l.is_empty()) else {
            self.seq = 0;
            self.last_hash = None;
            return Ok(());
        };
        let line: AuditLine =
            serde_json::from_str(last).context("parse last audit line")?;
        self.seq = line.log_id;
        self.last_hash = line.hash_self;
        Ok(())
    }
}

/// Read every line of an existing log. A missing file is an empty log.
pub fn read_lines(path: &Path) -> Result<Vec<AuditLine>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("read audit log {:?}", path)),
    };
    let mut out = Vec::new();
    for (i, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let line: AuditLine = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit line {}", i + 1))?;
        out.push(line);
    }
    Ok(out)
}

fn derive_event_id(prev_hash: Option<&str>, log_id: u64, payload: &Value) -> Result<Uuid> {
    let mut material = String::new();
    material.push_str(prev_hash.unwrap_or("GENESIS"));
    material.push('|');
    material.push_str(&log_id.to_string());
    material.push('|');
    material.push_str(&canonical_json_line(payload)?);
    Ok(Uuid::new_v5(&EVENT_ID_NAMESPACE, material.as_bytes()))
}

fn write_line(f: &mut File, line: &str) -> Result<()> {
    f.write_all(line.as_bytes())
        .context("write audit line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    f.sync_data().context("fsync audit log failed")?;
    Ok(())
}

fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit line failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for k in keys {
                sorted.insert(k.clone(), sort_keys(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Hash of the canonical line with `hash_self` blanked.
pub fn compute_line_hash(line: &AuditLine) -> Result<String> {
    let mut clone = line.clone();
    clone.hash_self = None;
    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}

pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

/// Checks, per line: parseable, `log_id` contiguous, `hash_prev` equals the
/// previous `hash_self`, and `hash_self` matches the recomputed hash.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut expected_id = 1u64;
    let mut count = 0usize;

    for (i, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lineno = i + 1;

        let line: AuditLine = match serde_json::from_str(trimmed) {
            Ok(l) => l,
            Err(e) => {
                return Ok(VerifyResult::Broken {
                    line: lineno,
                    reason: format!("unparseable line: {e}"),
                })
            }
        };
        count += 1;

        if line.log_id != expected_id {
            return Ok(VerifyResult::Broken {
                line: lineno,
                reason: format!("log_id gap: expected {expected_id}, got {}", line.log_id),
            });
        }
        expected_id += 1;

        if line.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: lineno,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, line.hash_prev
                ),
            });
        }

        if let Some(ref claimed) = line.hash_self {
            let recomputed = compute_line_hash(&line)?;
            if *claimed != recomputed {
                return Ok(VerifyResult::Broken {
                    line: lineno,
                    reason: format!("hash_self mismatch: claimed {claimed}, recomputed {recomputed}"),
                });
            }
        }

        prev_hash = line.hash_self;
    }

    Ok(VerifyResult::Valid { lines: count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resume_continues_ids_and_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let mut w = AuditWriter::new(&path, true).unwrap();
            w.append(Utc::now(), "T", json!({"i": 1})).unwrap();
            w.append(Utc::now(), "T", json!({"i": 2})).unwrap();
        }
        let mut w = AuditWriter::resume(&path, true).unwrap();
        assert_eq!(w.seq(), 2);
        let third = w.append(Utc::now(), "T", json!({"i": 3})).unwrap();
        assert_eq!(third.log_id, 3);

        assert_eq!(
            verify_hash_chain(&path).unwrap(),
            VerifyResult::Valid { lines: 3 }
        );
    }

    #[test]
    fn stale_writer_continues_from_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut a = AuditWriter::resume(&path, true).unwrap();
        let mut b = AuditWriter::resume(&path, true).unwrap();
        a.append(Utc::now(), "T", json!({"w": "a"})).unwrap();
        let l = b.append(Utc::now(), "T", json!({"w": "b"})).unwrap();
        assert_eq!(l.log_id, 2);
        assert_eq!(a.append(Utc::now(), "T", json!({"w": "a"})).unwrap().log_id, 3);
        assert_eq!(
            verify_hash_chain(&path).unwrap(),
            VerifyResult::Valid { lines: 3 }
        );
    }

    #[test]
    fn event_ids_are_deterministic_for_same_chain_state() {
        let a = derive_event_id(None, 1, &json!({"x": 1, "y": 2})).unwrap();
        let b = derive_event_id(None, 1, &json!({"y": 2, "x": 1})).unwrap();
        assert_eq!(a, b);
        let c = derive_event_id(Some("abc"), 1, &json!({"x": 1, "y": 2})).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn unchained_log_still_verifies_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.jsonl");
        let mut w = AuditWriter::new(&path, false).unwrap();
        for i in 0..3 {
            let l = w.append(Utc::now(), "T", json!({ "i": i })).unwrap();
            assert!(l.hash_self.is_none());
        }
        assert_eq!(
            verify_hash_chain(&path).unwrap(),
            VerifyResult::Valid { lines: 3 }
        );
    }
}

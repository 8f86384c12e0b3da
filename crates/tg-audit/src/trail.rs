use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

use crate::attempt::{AttemptResult, AuditStats, ExecutionAttempt};
use crate::writer::{read_lines, AuditWriter};

pub const EXECUTION_ATTEMPT_EVENT: &str = "EXECUTION_ATTEMPT";

/// Append-only record of every execution attempt.
///
/// `append` returns the new log id. There is no update or delete. Query
/// methods are provided on top of `attempts`.
pub trait AuditTrail: Send + Sync {
    fn append(&self, attempt: &ExecutionAttempt) -> Result<u64>;

    /// All attempts in append order.
    fn attempts(&self) -> Result<Vec<ExecutionAttempt>>;

    fn count(&self, result: Option<AttemptResult>) -> Result<usize> {
        let all = self.attempts()?;
        Ok(match result {
            None => all.len(),
            Some(r) => all.iter().filter(|a| a.result == r).count(),
        })
    }

    /// Blocked attempts grouped by block code.
    fn block_breakdown(&self) -> Result<BTreeMap<String, usize>> {
        let mut out = BTreeMap::new();
        for a in self.attempts()? {
            if a.result == AttemptResult::Blocked {
                let key = a.block_code.unwrap_or_else(|| "UNKNOWN".to_string());
                *out.entry(key).or_insert(0) += 1;
            }
        }
        Ok(out)
    }

    fn selectivity_ratio(&self) -> Result<f64> {
        let total = self.count(None)?;
        if total == 0 {
            return Ok(0.0);
        }
        Ok(self.count(Some(AttemptResult::Allowed))? as f64 / total as f64)
    }

    fn stats(&self) -> Result<AuditStats> {
        let all = self.attempts()?;
        let total = all.len();
        let allowed = all
            .iter()
            .filter(|a| a.result == AttemptResult::Allowed)
            .count();
        Ok(AuditStats {
            total_attempts: total,
            allowed,
            blocked: total - allowed,
            selectivity_ratio: if total == 0 {
                0.0
            } else {
                allowed as f64 / total as f64
            },
            block_reasons: self.block_breakdown()?,
        })
    }

    /// Oldest first.
    fn attempts_for_token(&self, token_id: Uuid) -> Result<Vec<ExecutionAttempt>> {
        Ok(self
            .attempts()?
            .into_iter()
            .filter(|a| a.token_id == Some(token_id))
            .collect())
    }

    /// Newest first.
    fn attempts_for_symbol(&self, symbol: &str) -> Result<Vec<ExecutionAttempt>> {
        let mut v: Vec<_> = self
            .attempts()?
            .into_iter()
            .filter(|a| a.symbol == symbol)
            .collect();
        v.reverse();
        Ok(v)
    }

    /// Newest first, at most `limit`.
    fn recent(&self, limit: usize) -> Result<Vec<ExecutionAttempt>> {
        let all = self.attempts()?;
        Ok(all.into_iter().rev().take(limit).collect())
    }
}

impl<T: AuditTrail + ?Sized> AuditTrail for std::sync::Arc<T> {
    fn append(&self, attempt: &ExecutionAttempt) -> Result<u64> {
        (**self).append(attempt)
    }

    fn attempts(&self) -> Result<Vec<ExecutionAttempt>> {
        (**self).attempts()
    }
}

// ---------------------------------------------------------------------------
// MemoryAuditTrail
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryAuditTrail {
    rows: Mutex<Vec<ExecutionAttempt>>,
}

impl MemoryAuditTrail {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditTrail for MemoryAuditTrail {
    fn append(&self, attempt: &ExecutionAttempt) -> Result<u64> {
        let mut g = self.rows.lock();
        g.push(attempt.clone());
        Ok(g.len() as u64)
    }

    fn attempts(&self) -> Result<Vec<ExecutionAttempt>> {
        Ok(self.rows.lock().clone())
    }
}

// ---------------------------------------------------------------------------
// JsonlAuditTrail
// ---------------------------------------------------------------------------

/// File-backed trail. Appends go through one `AuditWriter` behind a lock so
/// log ids and the hash chain stay linear under concurrent gate calls; the
/// writer's file lock extends that to other trails on the same path.
pub struct JsonlAuditTrail {
    writer: Mutex<AuditWriter>,
}

impl JsonlAuditTrail {
    /// Opens (or creates) the log and resumes its sequence and chain.
    pub fn open(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let writer = AuditWriter::resume(path, hash_chain)?;
        tracing::debug!(path = ?writer.path(), seq = writer.seq(), "audit trail opened");
        Ok(Self {
            writer: Mutex::new(writer),
        })
    }
}

impl AuditTrail for JsonlAuditTrail {
    fn append(&self, attempt: &ExecutionAttempt) -> Result<u64> {
        let payload = serde_json::to_value(attempt).context("serialize execution attempt")?;
        let mut w = self.writer.lock();
        let line = w.append(attempt.attempted_at, EXECUTION_ATTEMPT_EVENT, payload)?;
        Ok(line.log_id)
    }

    fn attempts(&self) -> Result<Vec<ExecutionAttempt>> {
        let w = self.writer.lock();
        let mut out = Vec::new();
        for line in read_lines(w.path())? {
            if line.event_type != EXECUTION_ATTEMPT_EVENT {
                continue;
            }
            let a: ExecutionAttempt = serde_json::from_value(line.payload)
                .with_context(|| format!("decode attempt at log_id {}", line.log_id))?;
            out.push(a);
        }
        Ok(out)
    }
}

//! tg-audit
//!
//! Immutable record of every execution attempt, allowed or blocked.
//! JSON Lines on disk, one attempt per line, optionally hash-chained so any
//! after-the-fact edit is detectable with [`verify_hash_chain`].

mod attempt;
mod trail;
mod writer;

pub use attempt::{AttemptResult, AuditStats, ExecutionAttempt, RiskBudgetStatus};
pub use trail::{AuditTrail, JsonlAuditTrail, MemoryAuditTrail, EXECUTION_ATTEMPT_EVENT};
pub use writer::{
    compute_line_hash, read_lines, verify_hash_chain, verify_hash_chain_str, AuditLine,
    AuditWriter, VerifyResult,
};

use anyhow::Result;
use clap::Subcommand;
use serde_json::json;
use std::path::PathBuf;
use tg_audit::{verify_hash_chain, AuditTrail, VerifyResult};
use uuid::Uuid;

use super::{load_session, print_json, Outcome};

#[derive(Subcommand)]
pub enum AuditCmd {
    /// Attempt counts, selectivity ratio and block breakdown
    Stats,

    /// Most recent attempts, newest first
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Only attempts for this symbol
        #[arg(long, conflicts_with = "token_id")]
        symbol: Option<String>,

        /// Only attempts for this token (oldest first)
        #[arg(long = "token-id")]
        token_id: Option<Uuid>,
    },

    /// Verify the audit log's hash chain
    Verify {
        /// Log to verify (defaults to the session's audit log)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

pub fn run(config_paths: &[String], cmd: AuditCmd) -> Result<Outcome> {
    match cmd {
        AuditCmd::Stats => {
            let trail = load_session(config_paths)?.audit()?;
            print_json(&trail.stats()?)?;
            Ok(Outcome::Done)
        }

        AuditCmd::Recent {
            limit,
            symbol,
            token_id,
        } => {
            let trail = load_session(config_paths)?.audit()?;
            let rows = match (symbol, token_id) {
                (_, Some(id)) => trail.attempts_for_token(id)?,
                (Some(s), None) => trail.attempts_for_symbol(&s)?,
                (None, None) => trail.recent(limit)?,
            };
            let rows: Vec<_> = rows.into_iter().take(limit).collect();
            print_json(&rows)?;
            Ok(Outcome::Done)
        }

        AuditCmd::Verify { path } => {
            let path = match path {
                Some(p) => p,
                None => load_session(config_paths)?.config.audit_log_path(),
            };
            match verify_hash_chain(&path)? {
                VerifyResult::Valid { lines } => {
                    print_json(&json!({ "valid": true, "lines": lines, "path": path }))?;
                    Ok(Outcome::Done)
                }
                VerifyResult::Broken { line, reason } => {
                    print_json(&json!({
                        "valid": false,
                        "line": line,
                        "reason": reason,
                        "path": path,
                    }))?;
                    Ok(Outcome::Refused)
                }
            }
        }
    }
}

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::{DailyLedgerRow, RiskEvent, SessionSnapshot, StateStore, TokenRegistration};

const SESSIONS_FILE: &str = "sessions.jsonl";
const DAILY_FILE: &str = "daily_ledger.jsonl";
const EVENTS_FILE: &str = "risk_events.jsonl";
const TOKENS_DIR: &str = "tokens";

/// Directory-backed store.
///
/// ```text
/// <root>/sessions.jsonl
/// <root>/daily_ledger.jsonl
/// <root>/risk_events.jsonl
/// <root>/tokens/<token_id>.issued
/// <root>/tokens/<token_id>.consumed
/// ```
///
/// Single writer per session is assumed for the JSONL files (the ledger
/// serialises its own writes). The per-token files are safe across
/// processes: `create_new` is an atomic create-or-fail on every platform we
/// run on.
#[derive(Debug, Clone)]
pub struct JsonlStateStore {
    root: PathBuf,
}

impl JsonlStateStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(TOKENS_DIR))
            .with_context(|| format!("create state dir {:?}", root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn token_marker(&self, token_id: Uuid) -> PathBuf {
        self.root.join(TOKENS_DIR).join(format!("{token_id}.consumed"))
    }

    fn token_issue_record(&self, token_id: Uuid) -> PathBuf {
        self.root.join(TOKENS_DIR).join(format!("{token_id}.issued"))
    }
}

fn append_json<T: Serialize>(path: &Path, v: &T) -> Result<()> {
    let line = serde_json::to_string(v).context("serialize state row failed")?;
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open state file {:?}", path))?;
    f.write_all(line.as_bytes())
        .and_then(|_| f.write_all(b"\n"))
        .with_context(|| format!("append to {:?}", path))?;
    f.sync_data()
        .with_context(|| format!("fsync {:?}", path))?;
    Ok(())
}

fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("read state file {:?}", path)),
    };
    let mut out = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let v = serde_json::from_str(trimmed)
            .with_context(|| format!("parse {:?} at line {}", path, i + 1))?;
        out.push(v);
    }
    Ok(out)
}

impl StateStore for JsonlStateStore {
    fn save_session_snapshot(&self, snap: &SessionSnapshot) -> Result<()> {
        append_json(&self.root.join(SESSIONS_FILE), snap)
    }

    fn latest_session_snapshot(&self, session_id: &str) -> Result<Option<SessionSnapshot>> {
        let all: Vec<SessionSnapshot> = read_json_lines(&self.root.join(SESSIONS_FILE))?;
        Ok(all.into_iter().rev().find(|s| s.session_id == session_id))
    }

    fn append_daily_row(&self, row: &DailyLedgerRow) -> Result<()> {
        append_json(&self.root.join(DAILY_FILE), row)
    }

    fn daily_rows(&self, session_id: &str, date: NaiveDate) -> Result<Vec<DailyLedgerRow>> {
        let all: Vec<DailyLedgerRow> = read_json_lines(&self.root.join(DAILY_FILE))?;
        Ok(all
            .into_iter()
            .filter(|r| r.session_id == session_id && r.trading_date == date)
            .collect())
    }

    fn log_risk_event(&self, ev: &RiskEvent) -> Result<()> {
        append_json(&self.root.join(EVENTS_FILE), ev)
    }

    fn risk_events(&self, session_id: &str) -> Result<Vec<RiskEvent>> {
        let all: Vec<RiskEvent> = read_json_lines(&self.root.join(EVENTS_FILE))?;
        Ok(all
            .into_iter()
            .filter(|e| e.session_id == session_id)
            .collect())
    }

    fn register_token(&self, reg: &TokenRegistration) -> Result<()> {
        let path = self.token_issue_record(reg.token_id);
        let body = serde_json::to_vec(reg).context("serialize token registration")?;
        let mut f = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("create token registration {:?}", path))?;
        f.write_all(&body)
            .with_context(|| format!("write token registration {:?}", path))?;
        f.sync_data()
            .with_context(|| format!("fsync {:?}", path))?;
        Ok(())
    }

    fn token_registration(&self, token_id: Uuid) -> Result<Option<TokenRegistration>> {
        let path = self.token_issue_record(token_id);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read token registration {:?}", path)),
        };
        let reg = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse token registration {:?}", path))?;
        Ok(Some(reg))
    }

    fn mark_token_consumed(&self, token_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let issued = self.token_issue_record(token_id);
        if !issued
            .try_exists()
            .with_context(|| format!("stat token registration {:?}", issued))?
        {
            anyhow::bail!("token {token_id} was never registered");
        }
        let path = self.token_marker(token_id);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut f) => {
                f.write_all(at.to_rfc3339().as_bytes())
                    .with_context(|| format!("write token marker {:?}", path))?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tracing::warn!(%token_id, "token already marked consumed");
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("create token marker {:?}", path)),
        }
    }

    fn is_token_consumed(&self, token_id: Uuid) -> Result<bool> {
        let path = self.token_marker(token_id);
        path.try_exists()
            .with_context(|| format!("stat token marker {:?}", path))
    }
}

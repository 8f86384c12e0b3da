use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use crate::{DailyLedgerRow, RiskEvent, SessionSnapshot, StateStore, TokenRegistration};

#[derive(Debug, Default)]
struct Inner {
    snapshots: Vec<SessionSnapshot>,
    daily: Vec<DailyLedgerRow>,
    events: Vec<RiskEvent>,
    registered: HashMap<Uuid, TokenRegistration>,
    consumed: HashMap<Uuid, DateTime<Utc>>,
}

/// Process-local store. Survives ledger restarts within one process, which
/// is what the restore tests need.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot_count(&self) -> usize {
        self.inner.lock().snapshots.len()
    }
}

impl StateStore for MemoryStateStore {
    fn save_session_snapshot(&self, snap: &SessionSnapshot) -> Result<()> {
        self.inner.lock().snapshots.push(snap.clone());
        Ok(())
    }

    fn latest_session_snapshot(&self, session_id: &str) -> Result<Option<SessionSnapshot>> {
        Ok(self
            .inner
            .lock()
            .snapshots
            .iter()
            .rev()
            .find(|s| s.session_id == session_id)
            .cloned())
    }

    fn append_daily_row(&self, row: &DailyLedgerRow) -> Result<()> {
        self.inner.lock().daily.push(row.clone());
        Ok(())
    }

    fn daily_rows(&self, session_id: &str, date: NaiveDate) -> Result<Vec<DailyLedgerRow>> {
        Ok(self
            .inner
            .lock()
            .daily
            .iter()
            .filter(|r| r.session_id == session_id && r.trading_date == date)
            .cloned()
            .collect())
    }

    fn log_risk_event(&self, ev: &RiskEvent) -> Result<()> {
        self.inner.lock().events.push(ev.clone());
        Ok(())
    }

    fn risk_events(&self, session_id: &str) -> Result<Vec<RiskEvent>> {
        Ok(self
            .inner
            .lock()
            .events
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }

    fn register_token(&self, reg: &TokenRegistration) -> Result<()> {
        let mut g = self.inner.lock();
        if g.registered.contains_key(&reg.token_id) {
            anyhow::bail!("token {} is already registered", reg.token_id);
        }
        g.registered.insert(reg.token_id, reg.clone());
        Ok(())
    }

    fn token_registration(&self, token_id: Uuid) -> Result<Option<TokenRegistration>> {
        Ok(self.inner.lock().registered.get(&token_id).cloned())
    }

    fn mark_token_consumed(&self, token_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut g = self.inner.lock();
        if !g.registered.contains_key(&token_id) {
            anyhow::bail!("token {token_id} was never registered");
        }
        if g.consumed.contains_key(&token_id) {
            return Ok(false);
        }
        g.consumed.insert(token_id, at);
        Ok(true)
    }

    fn is_token_consumed(&self, token_id: Uuid) -> Result<bool> {
        Ok(self.inner.lock().consumed.contains_key(&token_id))
    }
}

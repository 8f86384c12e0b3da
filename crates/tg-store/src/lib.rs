//! tg-store
//!
//! Durable session state for the risk ledger and the gate.
//!
//! Everything here is append-only: session snapshots, daily ledger rows and
//! risk events are only ever added. Tokens are written twice at most: once
//! when the ledger issues them (the registration) and once when the gate
//! spends them (the consumed marker, set-if-unconsumed, never cleared). Only
//! a registered token can be marked consumed.
//!
//! Two implementations:
//! - [`MemoryStateStore`] for tests and single-process embedding
//! - [`JsonlStateStore`] for a directory of JSONL files plus per-token files
//!   (atomic across processes via `create_new`)

mod jsonl;
mod memory;

pub use jsonl::JsonlStateStore;
pub use memory::MemoryStateStore;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tg_schemas::{AlignmentState, MarketMode, Scenario, SystemState};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Per-session record; the latest one wins on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub mode: MarketMode,
    pub starting_equity: f64,
    pub trading_date: NaiveDate,
    pub total_decisions: u64,
    pub wins: u64,
    pub losses: u64,
    pub loss_streak: u32,
    pub max_loss_streak: u32,
    pub final_state: SystemState,
    /// Positions still open when the snapshot was taken.
    #[serde(default)]
    pub open_positions: u32,
    #[serde(default)]
    pub open_risk: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerRowKind {
    /// A position was opened against an allowance.
    Entry,
    /// A position closed with a realized pnl.
    Outcome,
    /// `reset_daily_state` ran: pnl and per-symbol/sector usage start over.
    DailyReset,
    /// Lockdown was lifted: the day's pnl starts over.
    LockdownReset,
}

/// One row of the daily outcome ledger, keyed by (session, date, symbol).
/// Reset markers carry an empty symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLedgerRow {
    pub session_id: String,
    pub trading_date: NaiveDate,
    pub symbol: String,
    pub kind: LedgerRowKind,
    pub sector: Option<String>,
    /// Fraction of equity allocated (entry) or released (outcome).
    pub risk_used: f64,
    /// Currency; zero for entries.
    pub realized_pnl: f64,
    pub recorded_at: DateTime<Utc>,
}

/// One ledger evaluation, allowed or denied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    pub session_id: String,
    pub symbol: String,
    pub scenario: Scenario,
    pub alignment_state: AlignmentState,
    pub is_unstable: bool,
    pub active_probability: f64,
    pub allowed: bool,
    pub max_risk_amount: f64,
    pub max_risk_percent: f64,
    pub denial: Option<String>,
    pub reason: String,
    pub loss_streak: u32,
    pub system_state: SystemState,
    pub recorded_at: DateTime<Utc>,
}

/// Terms a token was issued with, recorded by the ledger at mint time.
///
/// The gate redeems only tokens whose id is registered here and whose terms
/// match the registration exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRegistration {
    pub token_id: Uuid,
    pub session_id: String,
    pub symbol: String,
    pub scenario: Scenario,
    pub mode: MarketMode,
    pub alignment_state: AlignmentState,
    pub probability_active: f64,
    pub max_risk: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

pub trait StateStore: Send + Sync {
    fn save_session_snapshot(&self, snap: &SessionSnapshot) -> Result<()>;

    fn latest_session_snapshot(&self, session_id: &str) -> Result<Option<SessionSnapshot>>;

    fn append_daily_row(&self, row: &DailyLedgerRow) -> Result<()>;

    /// Rows for one session and trading date, in append order.
    fn daily_rows(&self, session_id: &str, date: NaiveDate) -> Result<Vec<DailyLedgerRow>>;

    fn log_risk_event(&self, ev: &RiskEvent) -> Result<()>;

    fn risk_events(&self, session_id: &str) -> Result<Vec<RiskEvent>>;

    /// Record an issued token. Registering the same id twice is an error.
    fn register_token(&self, reg: &TokenRegistration) -> Result<()>;

    fn token_registration(&self, token_id: Uuid) -> Result<Option<TokenRegistration>>;

    /// Set-if-unconsumed. `Ok(true)` only for the single caller that flipped
    /// the marker; every later caller gets `Ok(false)`. An unregistered id is
    /// an error.
    fn mark_token_consumed(&self, token_id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    fn is_token_consumed(&self, token_id: Uuid) -> Result<bool>;
}

impl<S: StateStore + ?Sized> StateStore for Arc<S> {
    fn save_session_snapshot(&self, snap: &SessionSnapshot) -> Result<()> {
        (**self).save_session_snapshot(snap)
    }

    fn latest_session_snapshot(&self, session_id: &str) -> Result<Option<SessionSnapshot>> {
        (**self).latest_session_snapshot(session_id)
    }

    fn append_daily_row(&self, row: &DailyLedgerRow) -> Result<()> {
        (**self).append_daily_row(row)
    }

    fn daily_rows(&self, session_id: &str, date: NaiveDate) -> Result<Vec<DailyLedgerRow>> {
        (**self).daily_rows(session_id, date)
    }

    fn log_risk_event(&self, ev: &RiskEvent) -> Result<()> {
        (**self).log_risk_event(ev)
    }

    fn risk_events(&self, session_id: &str) -> Result<Vec<RiskEvent>> {
        (**self).risk_events(session_id)
    }

    fn register_token(&self, reg: &TokenRegistration) -> Result<()> {
        (**self).register_token(reg)
    }

    fn token_registration(&self, token_id: Uuid) -> Result<Option<TokenRegistration>> {
        (**self).token_registration(token_id)
    }

    fn mark_token_consumed(&self, token_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        (**self).mark_token_consumed(token_id, at)
    }

    fn is_token_consumed(&self, token_id: Uuid) -> Result<bool> {
        (**self).is_token_consumed(token_id)
    }
}

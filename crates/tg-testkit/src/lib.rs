//! Shared harness for cross-crate scenarios.
//!
//! `Harness` wires one session the way the binary does: file-backed state
//! store and audit log in a temp dir, a `FixedClock`, a `SharedLedger` and an
//! `ExecutionGatekeeper`, all over the same files.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tg_audit::{AuditTrail, ExecutionAttempt, JsonlAuditTrail};
use tg_gate::{ExecutionGatekeeper, GateRequest};
use tg_risk::{token_registration, Allowance, EvaluateRequest, RiskLedger, SharedLedger};
use tg_schemas::{
    AlignmentState, ExecutionType, FixedClock, MarketMode, Scenario, ScenarioProbabilities,
};
use tg_store::{
    DailyLedgerRow, JsonlStateStore, RiskEvent, SessionSnapshot, StateStore, TokenRegistration,
};
use tg_token::{PermissionToken, TokenTerms};
use uuid::Uuid;

pub const SESSION_ID: &str = "scenario";

/// 10:00 IST on a Monday.
pub fn before_cutoff() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 4, 30, 0).single().unwrap_or_default()
}

/// 15:20 IST, same day.
pub fn after_cutoff() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 50, 0).single().unwrap_or_default()
}

pub type FileLedger = SharedLedger<Arc<JsonlStateStore>, Arc<FixedClock>>;
pub type FileGate = ExecutionGatekeeper<Arc<JsonlAuditTrail>, Arc<JsonlStateStore>, Arc<FixedClock>>;

pub struct Harness {
    dir: TempDir,
    pub mode: MarketMode,
    pub equity: f64,
    pub clock: Arc<FixedClock>,
    pub store: Arc<JsonlStateStore>,
    pub audit: Arc<JsonlAuditTrail>,
    pub ledger: FileLedger,
    pub gate: FileGate,
}

impl Harness {
    pub fn new(mode: MarketMode, equity: f64) -> Result<Self> {
        Self::at(mode, equity, before_cutoff())
    }

    pub fn at(mode: MarketMode, equity: f64, now: DateTime<Utc>) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let clock = Arc::new(FixedClock::new(now));
        let store = Arc::new(JsonlStateStore::open(dir.path().join("state"))?);
        let audit = Arc::new(JsonlAuditTrail::open(
            dir.path().join("execution_audit.jsonl"),
            true,
        )?);
        let ledger = SharedLedger::new(RiskLedger::open(
            SESSION_ID,
            mode,
            equity,
            Arc::clone(&store),
            Arc::clone(&clock),
        )?);
        let gate = ExecutionGatekeeper::new(
            Arc::clone(&audit),
            Arc::clone(&store),
            Arc::clone(&clock),
        );
        Ok(Self {
            dir,
            mode,
            equity,
            clock,
            store,
            audit,
            ledger,
            gate,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.dir.path().join("execution_audit.jsonl")
    }

    /// A second ledger over the same files, as a restarted process would see.
    pub fn reopen_ledger(&self) -> Result<FileLedger> {
        Ok(SharedLedger::new(RiskLedger::open(
            SESSION_ID,
            self.mode,
            self.equity,
            Arc::new(JsonlStateStore::open(self.state_dir())?),
            Arc::clone(&self.clock),
        )?))
    }

    /// A gatekeeper in another process: same state dir, same audit log,
    /// opened independently.
    pub fn second_gate(&self) -> Result<FileGate> {
        Ok(ExecutionGatekeeper::new(
            Arc::new(JsonlAuditTrail::open(self.audit_path(), true)?),
            Arc::new(JsonlStateStore::open(self.state_dir())?),
            Arc::clone(&self.clock),
        ))
    }

    /// A token with exactly these terms, registered as if this session's
    /// ledger had minted it.
    pub fn issue(
        &self,
        symbol: &str,
        scenario: Scenario,
        mode: MarketMode,
        probability_active: f64,
        max_risk: f64,
        created_at: DateTime<Utc>,
    ) -> Result<PermissionToken> {
        let t = token(symbol, scenario, mode, probability_active, max_risk, created_at)?;
        register(self.store.as_ref(), &t)?;
        Ok(t)
    }

    /// Evaluate and, if allowed, mint. The allowance is retired on mint.
    pub fn approve(&self, req: &EvaluateRequest) -> Result<(Allowance, Option<PermissionToken>)> {
        let mut l = self.ledger.lock();
        let a = l.evaluate(req);
        if !a.allowed {
            return Ok((a, None));
        }
        let t = l.mint_token(&a)?;
        l.consume_allowance(a.id);
        Ok((a, Some(t)))
    }
}

pub fn evaluate_request(symbol: &str, scenario: Scenario, p: f64) -> EvaluateRequest {
    EvaluateRequest {
        symbol: symbol.to_string(),
        scenario,
        active_probability: p,
        alignment: AlignmentState::Full,
        is_unstable: false,
        sector: None,
    }
}

/// A token built directly, bypassing the ledger. Nothing registers it, so
/// the gate does not recognise it until [`register`] is called.
pub fn token(
    symbol: &str,
    scenario: Scenario,
    mode: MarketMode,
    probability_active: f64,
    max_risk: f64,
    created_at: DateTime<Utc>,
) -> Result<PermissionToken> {
    Ok(PermissionToken::issue_at(
        TokenTerms {
            symbol: symbol.to_string(),
            scenario,
            mode,
            alignment_state: AlignmentState::Full,
            probability_active,
        },
        max_risk,
        created_at,
    )?)
}

/// Record `t` in `store` the way `RiskLedger::mint_token` does.
pub fn register(store: &(impl StateStore + ?Sized), t: &PermissionToken) -> Result<()> {
    store.register_token(&token_registration(SESSION_ID, t))
}

/// Live facts that agree with `t` and ask for `risk_requested`.
pub fn matching_request(t: &PermissionToken, risk_requested: f64) -> GateRequest {
    let mut probs = ScenarioProbabilities::default();
    let rest = (1.0 - t.probability_active()) / 2.0;
    probs.a = rest;
    probs.b = rest;
    probs.c = rest;
    match t.scenario() {
        Scenario::A => probs.a = t.probability_active(),
        Scenario::B => probs.b = t.probability_active(),
        Scenario::C => probs.c = t.probability_active(),
    }
    GateRequest {
        symbol: t.symbol().to_string(),
        timeframe: "15m".to_string(),
        scenario_active: t.scenario(),
        probabilities: probs,
        alignment_state: AlignmentState::Full,
        risk_requested,
        market_mode: t.mode(),
        execution_type: ExecutionType::Manual,
    }
}

// ---------------------------------------------------------------------------
// Failing collaborators
// ---------------------------------------------------------------------------

/// State store whose every call fails.
#[derive(Debug, Default)]
pub struct UnavailableStore;

impl StateStore for UnavailableStore {
    fn save_session_snapshot(&self, _: &SessionSnapshot) -> Result<()> {
        anyhow::bail!("state store unavailable")
    }

    fn latest_session_snapshot(&self, _: &str) -> Result<Option<SessionSnapshot>> {
        anyhow::bail!("state store unavailable")
    }

    fn append_daily_row(&self, _: &DailyLedgerRow) -> Result<()> {
        anyhow::bail!("state store unavailable")
    }

    fn daily_rows(&self, _: &str, _: NaiveDate) -> Result<Vec<DailyLedgerRow>> {
        anyhow::bail!("state store unavailable")
    }

    fn log_risk_event(&self, _: &RiskEvent) -> Result<()> {
        anyhow::bail!("state store unavailable")
    }

    fn risk_events(&self, _: &str) -> Result<Vec<RiskEvent>> {
        anyhow::bail!("state store unavailable")
    }

    fn register_token(&self, _: &TokenRegistration) -> Result<()> {
        anyhow::bail!("state store unavailable")
    }

    fn token_registration(&self, _: Uuid) -> Result<Option<TokenRegistration>> {
        anyhow::bail!("state store unavailable")
    }

    fn mark_token_consumed(&self, _: Uuid, _: DateTime<Utc>) -> Result<bool> {
        anyhow::bail!("state store unavailable")
    }

    fn is_token_consumed(&self, _: Uuid) -> Result<bool> {
        anyhow::bail!("state store unavailable")
    }
}

/// Reads pass through to `inner`; writes fail.
pub struct ReadOnlyStore<S> {
    pub inner: S,
}

impl<S: StateStore> StateStore for ReadOnlyStore<S> {
    fn save_session_snapshot(&self, _: &SessionSnapshot) -> Result<()> {
        anyhow::bail!("state store is read-only")
    }

    fn latest_session_snapshot(&self, session_id: &str) -> Result<Option<SessionSnapshot>> {
        self.inner.latest_session_snapshot(session_id)
    }

    fn append_daily_row(&self, _: &DailyLedgerRow) -> Result<()> {
        anyhow::bail!("state store is read-only")
    }

    fn daily_rows(&self, session_id: &str, date: NaiveDate) -> Result<Vec<DailyLedgerRow>> {
        self.inner.daily_rows(session_id, date)
    }

    fn log_risk_event(&self, _: &RiskEvent) -> Result<()> {
        anyhow::bail!("state store is read-only")
    }

    fn risk_events(&self, session_id: &str) -> Result<Vec<RiskEvent>> {
        self.inner.risk_events(session_id)
    }

    fn register_token(&self, _: &TokenRegistration) -> Result<()> {
        anyhow::bail!("state store is read-only")
    }

    fn token_registration(&self, token_id: Uuid) -> Result<Option<TokenRegistration>> {
        self.inner.token_registration(token_id)
    }

    fn mark_token_consumed(&self, _: Uuid, _: DateTime<Utc>) -> Result<bool> {
        anyhow::bail!("state store is read-only")
    }

    fn is_token_consumed(&self, token_id: Uuid) -> Result<bool> {
        self.inner.is_token_consumed(token_id)
    }
}

/// Audit trail that refuses every append.
#[derive(Debug, Default)]
pub struct UnavailableAudit;

impl AuditTrail for UnavailableAudit {
    fn append(&self, _: &ExecutionAttempt) -> Result<u64> {
        anyhow::bail!("audit log unavailable")
    }

    fn attempts(&self) -> Result<Vec<ExecutionAttempt>> {
        anyhow::bail!("audit log unavailable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_starts_operational_before_cutoff() {
        let h = Harness::new(MarketMode::Intraday, 1_000_000.0).unwrap();
        assert!(h.ledger.status().is_operational);
        assert!(h.state_dir().is_dir());
        assert!(!tg_gate::policy::past_intraday_cutoff(before_cutoff()));
        assert!(tg_gate::policy::past_intraday_cutoff(after_cutoff()));
    }

    #[test]
    fn matching_request_agrees_with_token() {
        let t = token("TCS", Scenario::B, MarketMode::Swing, 0.7, 500.0, before_cutoff()).unwrap();
        let r = matching_request(&t, 100.0);
        assert_eq!(r.scenario_active, Scenario::B);
        assert!((r.active_probability() - 0.7).abs() < 1e-12);
        assert_eq!(r.market_mode, MarketMode::Swing);
    }
}

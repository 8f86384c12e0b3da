//! Stateful ledger service: engine + store + clock.
//!
//! One `RiskLedger` per session. Mutation takes `&mut self`; share it across
//! threads through [`SharedLedger`], which serialises every call behind one
//! lock so there is a single writer and reads see the latest write.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use tg_schemas::{Clock, MarketMode, SystemState};
use tg_store::{DailyLedgerRow, LedgerRowKind, RiskEvent, StateStore, TokenRegistration};
use tg_token::{PermissionToken, TokenError, TokenTerms};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::caps::allowance_lifetime;
use crate::engine;
use crate::restore::restore_state;
use crate::types::{Allowance, Denial, DenialCode, EvaluateRequest, LedgerState, RiskStatus};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MintError {
    #[error("allowance {0} was denied")]
    Denied(Uuid),
    #[error("allowance {0} has expired")]
    Expired(Uuid),
    #[error("allowance {0} is not outstanding on this ledger")]
    NotOutstanding(Uuid),
    #[error("allowance {0} does not match the issued terms")]
    TermsMismatch(Uuid),
    #[error("token registration failed: {0}")]
    Registration(String),
    #[error(transparent)]
    Token(#[from] TokenError),
}

#[derive(Debug, Clone)]
struct Outstanding {
    max_risk_amount: f64,
    expiry: DateTime<Utc>,
}

pub struct RiskLedger<S, C> {
    state: LedgerState,
    store: S,
    clock: C,
    outstanding: HashMap<Uuid, Outstanding>,
}

impl<S: StateStore, C: Clock> RiskLedger<S, C> {
    /// Open a session, restoring whatever the store remembers about it.
    ///
    /// A store that cannot be read is an error: starting fresh would let a
    /// crash erase a lockdown.
    pub fn open(
        session_id: &str,
        mode: MarketMode,
        account_equity: f64,
        store: S,
        clock: C,
    ) -> Result<Self> {
        if !account_equity.is_finite() || account_equity <= 0.0 {
            anyhow::bail!("account_equity must be > 0 (got {account_equity})");
        }

        let today = clock.now().date_naive();
        let snapshot = store
            .latest_session_snapshot(session_id)
            .context("restore: read latest session snapshot")?;
        let rows = store
            .daily_rows(session_id, today)
            .context("restore: read today's ledger rows")?;

        if let Some(snap) = &snapshot {
            if snap.mode != mode || snap.starting_equity != account_equity {
                warn!(
                    session_id,
                    snapshot_mode = %snap.mode,
                    snapshot_equity = snap.starting_equity,
                    "session snapshot was taken under different mode/equity"
                );
            }
        }

        let state = restore_state(
            session_id,
            mode,
            account_equity,
            today,
            snapshot.as_ref(),
            &rows,
        );

        match state.system_state {
            SystemState::Lockdown => warn!(
                session_id,
                loss_streak = state.loss_streak,
                "restored LOCKDOWN; manual reset required"
            ),
            SystemState::HaltedToday => warn!(
                session_id,
                daily_pnl = state.daily_realized_pnl,
                "restored HALTED_TODAY"
            ),
            SystemState::Operational => {}
        }
        info!(
            session_id,
            %mode,
            account_equity,
            loss_streak = state.loss_streak,
            state = %state.system_state,
            "risk ledger opened"
        );

        Ok(Self {
            state,
            store,
            clock,
            outstanding: HashMap::new(),
        })
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn system_state(&self) -> SystemState {
        self.state.system_state
    }

    pub fn loss_streak(&self) -> u32 {
        self.state.loss_streak
    }

    pub fn mode(&self) -> MarketMode {
        self.state.mode
    }

    pub fn account_equity(&self) -> f64 {
        self.state.account_equity
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn persist_snapshot(&self) -> Result<()> {
        let snap = self.state.to_snapshot(self.clock.now());
        self.store
            .save_session_snapshot(&snap)
            .context("persist session snapshot")
    }

    /// Convert context into a risk allowance.
    ///
    /// Never fails: every problem, including an unwritable risk-event log,
    /// comes back as a denied allowance with a reason.
    pub fn evaluate(&mut self, req: &EvaluateRequest) -> Allowance {
        let now = self.clock.now();
        let before = self.state.system_state;
        let verdict = engine::assess(&mut self.state, req);

        if self.state.system_state != before {
            error!(
                symbol = %req.symbol,
                loss_streak = self.state.loss_streak,
                from = %before,
                to = %self.state.system_state,
                "loss streak escalated system state"
            );
            if let Err(e) = self.persist_snapshot() {
                error!(error = %e, "failed to persist escalated state");
            }
        }

        let mut allowance = match verdict {
            Ok(grant) => {
                info!(
                    symbol = %req.symbol,
                    scenario = %req.scenario,
                    amount = grant.max_risk_amount,
                    fraction = grant.risk_fraction,
                    base = grant.base_risk,
                    prob = req.active_probability,
                    align = grant.alignment_factor,
                    streak_mult = grant.streak_multiplier,
                    "risk allowance granted"
                );
                Allowance {
                    id: Uuid::new_v4(),
                    allowed: true,
                    max_risk_amount: grant.max_risk_amount,
                    max_risk_percent: grant.risk_fraction,
                    issued_at: now,
                    expiry: now + allowance_lifetime(),
                    reason: format!(
                        "Allocated {:.2}% risk for {} ({})",
                        grant.risk_fraction * 100.0,
                        req.symbol,
                        req.scenario
                    ),
                    denial: None,
                    symbol: req.symbol.clone(),
                    scenario: req.scenario,
                    alignment: req.alignment,
                    active_probability: req.active_probability,
                }
            }
            Err(denial) => {
                warn!(symbol = %req.symbol, code = %denial.code, reason = %denial.reason, "risk allowance denied");
                denied(req, now, denial)
            }
        };

        let event = RiskEvent {
            session_id: self.state.session_id.clone(),
            symbol: req.symbol.clone(),
            scenario: req.scenario,
            alignment_state: req.alignment,
            is_unstable: req.is_unstable,
            active_probability: req.active_probability,
            allowed: allowance.allowed,
            max_risk_amount: allowance.max_risk_amount,
            max_risk_percent: allowance.max_risk_percent,
            denial: allowance.denial.map(|d| d.as_str().to_string()),
            reason: allowance.reason.clone(),
            loss_streak: self.state.loss_streak,
            system_state: self.state.system_state,
            recorded_at: now,
        };
        if let Err(e) = self.store.log_risk_event(&event) {
            error!(error = %e, symbol = %req.symbol, "risk event log unavailable");
            if allowance.allowed {
                allowance = denied(
                    req,
                    now,
                    Denial::new(
                        DenialCode::StateStoreUnavailable,
                        format!("STATE_STORE_UNAVAILABLE: risk event not recorded ({e})."),
                    ),
                );
            }
        }

        if allowance.allowed {
            self.outstanding.insert(
                allowance.id,
                Outstanding {
                    max_risk_amount: allowance.max_risk_amount,
                    expiry: allowance.expiry,
                },
            );
        }
        allowance
    }

    /// Book an opened position so later evaluations see the exposure.
    pub fn record_entry(
        &mut self,
        symbol: &str,
        sector: Option<&str>,
        risk_fraction: f64,
    ) -> Result<()> {
        if !risk_fraction.is_finite() || risk_fraction < 0.0 {
            anyhow::bail!("risk_fraction must be a finite non-negative fraction (got {risk_fraction})");
        }
        let now = self.clock.now();
        self.store
            .append_daily_row(&DailyLedgerRow {
                session_id: self.state.session_id.clone(),
                trading_date: self.state.trading_date,
                symbol: symbol.to_string(),
                kind: LedgerRowKind::Entry,
                sector: sector.map(str::to_string),
                risk_used: risk_fraction,
                realized_pnl: 0.0,
                recorded_at: now,
            })
            .context("record entry")?;
        engine::apply_entry(&mut self.state, symbol, sector, risk_fraction);
        info!(
            symbol,
            sector = sector.unwrap_or("-"),
            risk_fraction,
            open_positions = self.state.open_positions,
            "entry recorded"
        );
        self.persist_snapshot()
    }

    /// Close the loop after a trade: streak, drawdown, breakers.
    pub fn record_outcome(&mut self, symbol: &str, realized_pnl: f64, risk_used: f64) -> Result<()> {
        if !realized_pnl.is_finite() {
            anyhow::bail!("realized_pnl must be finite (got {realized_pnl})");
        }
        let risk_used = if risk_used.is_finite() { risk_used.max(0.0) } else { 0.0 };
        let now = self.clock.now();

        // Durable row first; the snapshot follows. Restore replays rows newer
        // than the latest snapshot.
        self.store
            .append_daily_row(&DailyLedgerRow {
                session_id: self.state.session_id.clone(),
                trading_date: self.state.trading_date,
                symbol: symbol.to_string(),
                kind: LedgerRowKind::Outcome,
                sector: None,
                risk_used,
                realized_pnl,
                recorded_at: now,
            })
            .context("record outcome")?;

        let fx = engine::apply_outcome(&mut self.state, realized_pnl, risk_used);

        if realized_pnl < 0.0 {
            warn!(symbol, realized_pnl, loss_streak = self.state.loss_streak, "loss recorded");
        } else {
            info!(symbol, realized_pnl, "win recorded; streak reset");
        }
        if fx.daily_loss_breached {
            error!(
                drawdown_pct = self.state.daily_realized_loss_pct() * 100.0,
                "daily loss limit breached; halted until next trading day"
            );
        }
        if fx.locked_down {
            error!(
                loss_streak = self.state.loss_streak,
                "system lockdown; manual reset required"
            );
        }

        self.persist_snapshot()
    }

    /// Marker row so restore replays the reset instead of the losses before it.
    fn append_reset_marker(&self, kind: LedgerRowKind, trading_date: NaiveDate) -> Result<()> {
        self.store
            .append_daily_row(&DailyLedgerRow {
                session_id: self.state.session_id.clone(),
                trading_date,
                symbol: String::new(),
                kind,
                sector: None,
                risk_used: 0.0,
                realized_pnl: 0.0,
                recorded_at: self.clock.now(),
            })
            .context("record reset marker")
    }

    /// Start a new trading day at the clock's current date.
    pub fn reset_daily_state(&mut self) -> Result<()> {
        let today = self.clock.now().date_naive();
        self.append_reset_marker(LedgerRowKind::DailyReset, today)?;
        engine::reset_daily(&mut self.state, today);
        self.outstanding.clear();
        info!(
            loss_streak = self.state.loss_streak,
            state = %self.state.system_state,
            %today,
            "daily risk state reset"
        );
        self.persist_snapshot()
    }

    /// Exit LOCKDOWN. `Ok(false)` for a wrong code or a ledger not in lockdown.
    pub fn manual_reset_lockdown(&mut self, code: &str) -> Result<bool> {
        if !engine::lockdown_reset_accepted(&self.state, code) {
            error!(state = %self.state.system_state, "lockdown reset rejected");
            return Ok(false);
        }
        self.append_reset_marker(LedgerRowKind::LockdownReset, self.state.trading_date)?;
        engine::manual_reset(&mut self.state, code);
        warn!("manual lockdown reset; loss streak cleared");
        self.persist_snapshot()?;
        Ok(true)
    }

    pub fn status(&self) -> RiskStatus {
        let caps = self.state.caps();
        RiskStatus {
            session_id: self.state.session_id.clone(),
            trading_date: self.state.trading_date,
            system_state: self.state.system_state,
            mode: self.state.mode,
            account_equity: self.state.account_equity,
            loss_streak: self.state.loss_streak,
            max_loss_streak: self.state.max_loss_streak,
            daily_realized_pnl: self.state.daily_realized_pnl,
            daily_drawdown_pct: self.state.daily_realized_loss_pct(),
            daily_loss_limit_pct: caps.max_daily_loss,
            open_positions: self.state.open_positions,
            max_positions: caps.max_open_positions,
            open_risk: self.state.open_risk,
            risk_caps: caps,
            total_decisions: self.state.total_decisions,
            wins: self.state.wins,
            losses: self.state.losses,
            outstanding_allowances: self.outstanding.len(),
            is_operational: self.state.system_state.is_operational(),
        }
    }

    /// Allowed, unexpired, issued here and unaltered.
    pub fn validate_allowance(&self, a: &Allowance) -> Result<(), MintError> {
        if !a.allowed {
            return Err(MintError::Denied(a.id));
        }
        let Some(issued) = self.outstanding.get(&a.id) else {
            return Err(MintError::NotOutstanding(a.id));
        };
        if a.max_risk_amount != issued.max_risk_amount || a.expiry != issued.expiry {
            return Err(MintError::TermsMismatch(a.id));
        }
        if a.is_expired_at(self.clock.now()) {
            return Err(MintError::Expired(a.id));
        }
        Ok(())
    }

    /// Retire an allowance. Returns whether it was outstanding.
    pub fn consume_allowance(&mut self, id: Uuid) -> bool {
        self.outstanding.remove(&id).is_some()
    }

    /// Bind a valid allowance into a permission token whose ceiling is the
    /// allowance's amount, and register it so the gate will honour it. The
    /// allowance stays outstanding.
    pub fn mint_token(&self, a: &Allowance) -> Result<PermissionToken, MintError> {
        self.validate_allowance(a)?;
        let terms = TokenTerms {
            symbol: a.symbol.clone(),
            scenario: a.scenario,
            mode: self.state.mode,
            alignment_state: a.alignment,
            probability_active: a.active_probability,
        };
        let token = PermissionToken::issue_at(terms, a.max_risk_amount, self.clock.now())?;
        self.store
            .register_token(&token_registration(&self.state.session_id, &token))
            .map_err(|e| {
                error!(token_id = %token.id(), error = %e, "token registration failed");
                MintError::Registration(format!("{e:#}"))
            })?;
        info!(
            token_id = %token.id(),
            allowance_id = %a.id,
            symbol = %a.symbol,
            max_risk = a.max_risk_amount,
            "permission token minted"
        );
        Ok(token)
    }
}

/// The issue-time record of `token`, as the gate will check it.
pub fn token_registration(session_id: &str, token: &PermissionToken) -> TokenRegistration {
    TokenRegistration {
        token_id: token.id(),
        session_id: session_id.to_string(),
        symbol: token.symbol().to_string(),
        scenario: token.scenario(),
        mode: token.mode(),
        alignment_state: token.alignment_state_at_issue(),
        probability_active: token.probability_active(),
        max_risk: token.max_risk(),
        created_at: token.created_at(),
        expires_at: token.expires_at(),
    }
}

fn denied(req: &EvaluateRequest, now: DateTime<Utc>, denial: Denial) -> Allowance {
    Allowance {
        id: Uuid::new_v4(),
        allowed: false,
        max_risk_amount: 0.0,
        max_risk_percent: 0.0,
        issued_at: now,
        expiry: now,
        reason: denial.reason,
        denial: Some(denial.code),
        symbol: req.symbol.clone(),
        scenario: req.scenario,
        alignment: req.alignment,
        active_probability: req.active_probability,
    }
}

// ---------------------------------------------------------------------------
// SharedLedger
// ---------------------------------------------------------------------------

/// Cloneable, serialised handle to one session's ledger.
pub struct SharedLedger<S, C> {
    inner: Arc<Mutex<RiskLedger<S, C>>>,
}

impl<S, C> Clone for SharedLedger<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: StateStore, C: Clock> SharedLedger<S, C> {
    pub fn new(ledger: RiskLedger<S, C>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    /// Exclusive access for multi-step sequences (evaluate then mint).
    pub fn lock(&self) -> MutexGuard<'_, RiskLedger<S, C>> {
        self.inner.lock()
    }

    pub fn evaluate(&self, req: &EvaluateRequest) -> Allowance {
        self.inner.lock().evaluate(req)
    }

    pub fn record_entry(&self, symbol: &str, sector: Option<&str>, risk_fraction: f64) -> Result<()> {
        self.inner.lock().record_entry(symbol, sector, risk_fraction)
    }

    pub fn record_outcome(&self, symbol: &str, realized_pnl: f64, risk_used: f64) -> Result<()> {
        self.inner.lock().record_outcome(symbol, realized_pnl, risk_used)
    }

    pub fn reset_daily_state(&self) -> Result<()> {
        self.inner.lock().reset_daily_state()
    }

    pub fn manual_reset_lockdown(&self, code: &str) -> Result<bool> {
        self.inner.lock().manual_reset_lockdown(code)
    }

    pub fn status(&self) -> RiskStatus {
        self.inner.lock().status()
    }

    pub fn system_state(&self) -> SystemState {
        self.inner.lock().system_state()
    }

    pub fn loss_streak(&self) -> u32 {
        self.inner.lock().loss_streak()
    }
}

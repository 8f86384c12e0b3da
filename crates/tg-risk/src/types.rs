use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tg_schemas::{AlignmentState, MarketMode, Scenario, SystemState};
use tg_store::SessionSnapshot;
use uuid::Uuid;

use crate::caps::RiskCaps;

/// Mutable governor state for one session.
///
/// `mode` and `account_equity` are fixed for the life of the session; the
/// rest is driven only through the engine functions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerState {
    pub session_id: String,
    pub mode: MarketMode,
    pub account_equity: f64,
    pub trading_date: NaiveDate,

    pub loss_streak: u32,
    pub max_loss_streak: u32,
    pub system_state: SystemState,

    /// Sum of today's realized pnl, in currency. Wins offset losses.
    pub daily_realized_pnl: f64,
    pub open_positions: u32,
    /// Allocated and not yet released fraction of equity.
    pub open_risk: f64,
    pub symbol_risk_today: BTreeMap<String, f64>,
    pub sector_exposure: BTreeMap<String, u32>,

    pub total_decisions: u64,
    pub wins: u64,
    pub losses: u64,
}

impl LedgerState {
    pub fn new(
        session_id: impl Into<String>,
        mode: MarketMode,
        account_equity: f64,
        trading_date: NaiveDate,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            mode,
            account_equity,
            trading_date,
            loss_streak: 0,
            max_loss_streak: 0,
            system_state: SystemState::Operational,
            daily_realized_pnl: 0.0,
            open_positions: 0,
            open_risk: 0.0,
            symbol_risk_today: BTreeMap::new(),
            sector_exposure: BTreeMap::new(),
            total_decisions: 0,
            wins: 0,
            losses: 0,
        }
    }

    pub fn caps(&self) -> RiskCaps {
        RiskCaps::for_mode(self.mode)
    }

    /// Today's realized loss as a fraction of equity; never positive.
    pub fn daily_realized_loss_pct(&self) -> f64 {
        self.daily_realized_pnl.min(0.0) / self.account_equity
    }

    pub fn daily_loss_breached(&self) -> bool {
        self.daily_realized_loss_pct() <= -self.caps().max_daily_loss
    }

    pub fn symbol_risk_used(&self, symbol: &str) -> f64 {
        self.symbol_risk_today.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn to_snapshot(&self, recorded_at: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            mode: self.mode,
            starting_equity: self.account_equity,
            trading_date: self.trading_date,
            total_decisions: self.total_decisions,
            wins: self.wins,
            losses: self.losses,
            loss_streak: self.loss_streak,
            max_loss_streak: self.max_loss_streak,
            final_state: self.system_state,
            open_positions: self.open_positions,
            open_risk: self.open_risk,
            recorded_at,
        }
    }
}

/// Why an allowance was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialCode {
    SystemLockdown,
    DailyDrawdownBreached,
    ExecutionHalt,
    InvalidInput,
    AlignmentForbidden,
    MaxPositions,
    CorrelationRisk,
    SymbolRiskExhausted,
    ZeroRisk,
    PortfolioRiskLimit,
    StateStoreUnavailable,
}

impl DenialCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialCode::SystemLockdown => "SYSTEM_LOCKDOWN",
            DenialCode::DailyDrawdownBreached => "DAILY_DRAWDOWN_BREACHED",
            DenialCode::ExecutionHalt => "EXECUTION_HALT",
            DenialCode::InvalidInput => "INVALID_INPUT",
            DenialCode::AlignmentForbidden => "ALIGNMENT_FORBIDDEN",
            DenialCode::MaxPositions => "MAX_POSITIONS",
            DenialCode::CorrelationRisk => "CORRELATION_RISK",
            DenialCode::SymbolRiskExhausted => "SYMBOL_RISK_EXHAUSTED",
            DenialCode::ZeroRisk => "ZERO_RISK",
            DenialCode::PortfolioRiskLimit => "PORTFOLIO_RISK_LIMIT",
            DenialCode::StateStoreUnavailable => "STATE_STORE_UNAVAILABLE",
        }
    }
}

impl fmt::Display for DenialCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context for one allowance request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub symbol: String,
    pub scenario: Scenario,
    pub active_probability: f64,
    pub alignment: AlignmentState,
    pub is_unstable: bool,
    pub sector: Option<String>,
}

/// Outcome of one ledger evaluation.
///
/// Denied allowances carry zero amounts and a `denial` code. Allowed ones are
/// registered as outstanding by the ledger that issued them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allowance {
    pub id: Uuid,
    pub allowed: bool,
    pub max_risk_amount: f64,
    pub max_risk_percent: f64,
    pub issued_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub reason: String,
    pub denial: Option<DenialCode>,

    pub symbol: String,
    pub scenario: Scenario,
    pub alignment: AlignmentState,
    pub active_probability: f64,
}

impl Allowance {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry
    }
}

/// Sizing detail of a granted evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Grant {
    pub risk_fraction: f64,
    pub max_risk_amount: f64,
    pub base_risk: f64,
    pub alignment_factor: f64,
    pub streak_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Denial {
    pub code: DenialCode,
    pub reason: String,
}

impl Denial {
    pub(crate) fn new(code: DenialCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// What an outcome did to the breakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutcomeEffects {
    pub daily_loss_breached: bool,
    pub locked_down: bool,
}

/// Serialisable summary for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskStatus {
    pub session_id: String,
    pub trading_date: NaiveDate,
    pub system_state: SystemState,
    pub mode: MarketMode,
    pub account_equity: f64,
    pub loss_streak: u32,
    pub max_loss_streak: u32,
    pub daily_realized_pnl: f64,
    pub daily_drawdown_pct: f64,
    pub daily_loss_limit_pct: f64,
    pub open_positions: u32,
    pub max_positions: u32,
    pub open_risk: f64,
    pub risk_caps: RiskCaps,
    pub total_decisions: u64,
    pub wins: u64,
    pub losses: u64,
    pub outstanding_allowances: usize,
    pub is_operational: bool,
}

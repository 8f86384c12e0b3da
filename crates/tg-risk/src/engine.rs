//! Pure governor logic over `&mut LedgerState`. No IO, no clock.

use chrono::NaiveDate;
use tg_schemas::SystemState;

use crate::caps::{
    alignment_factor, loss_streak_multiplier, HALT_STREAK, LOCKDOWN_ACK_CODE, LOCKDOWN_STREAK,
    RISK_EPSILON,
};
use crate::types::{Denial, DenialCode, EvaluateRequest, Grant, LedgerState, OutcomeEffects};

/// Size one decision, or refuse it.
///
/// Vetoes short-circuit in a fixed order. The streak veto also worsens
/// `system_state`; every other path leaves the breaker untouched.
pub fn assess(st: &mut LedgerState, req: &EvaluateRequest) -> Result<Grant, Denial> {
    st.total_decisions += 1;
    let caps = st.caps();

    // 1) Lockdown.
    if st.system_state == SystemState::Lockdown {
        return Err(Denial::new(
            DenialCode::SystemLockdown,
            "SYSTEM_LOCKDOWN: 5+ consecutive losses. Manual reset required.",
        ));
    }

    // 2) Daily halt.
    if st.system_state == SystemState::HaltedToday {
        return Err(Denial::new(
            DenialCode::DailyDrawdownBreached,
            format!(
                "DAILY_DRAWDOWN_BREACHED: Loss limit {:.2}% exceeded.",
                caps.max_daily_loss * 100.0
            ),
        ));
    }

    // 3) Streak governor; escalates.
    if st.loss_streak >= HALT_STREAK {
        let escalated = if st.loss_streak >= LOCKDOWN_STREAK {
            SystemState::Lockdown
        } else {
            SystemState::HaltedToday
        };
        st.system_state = st.system_state.worsen(escalated);
        return Err(Denial::new(
            DenialCode::ExecutionHalt,
            format!("EXECUTION_HALT: {} consecutive losses.", st.loss_streak),
        ));
    }

    let p = req.active_probability;
    if !p.is_finite() || !(0.0..=1.0).contains(&p) {
        return Err(Denial::new(
            DenialCode::InvalidInput,
            format!("INVALID_INPUT: active_probability {p} outside [0, 1]."),
        ));
    }

    // 4) Alignment.
    let align = alignment_factor(req.alignment, req.is_unstable);
    if align == 0.0 {
        return Err(Denial::new(
            DenialCode::AlignmentForbidden,
            format!("ALIGNMENT_FORBIDDEN: {} prevents execution.", req.alignment),
        ));
    }

    // 5) Position count.
    if st.open_positions >= caps.max_open_positions {
        return Err(Denial::new(
            DenialCode::MaxPositions,
            format!(
                "MAX_POSITIONS: {}/{} positions open.",
                st.open_positions, caps.max_open_positions
            ),
        ));
    }

    // 6) One position per sector per day.
    if let Some(sector) = req.sector.as_deref() {
        if st.sector_exposure.get(sector).copied().unwrap_or(0) >= 1 {
            return Err(Denial::new(
                DenialCode::CorrelationRisk,
                format!("CORRELATION_RISK: Already exposed to {sector} sector."),
            ));
        }
    }

    // 7) Symbol daily budget.
    let symbol_used = st.symbol_risk_used(&req.symbol);
    if symbol_used >= caps.max_risk_per_symbol_day - RISK_EPSILON {
        return Err(Denial::new(
            DenialCode::SymbolRiskExhausted,
            format!(
                "SYMBOL_RISK_EXHAUSTED: {} risk budget used ({:.2}%).",
                req.symbol,
                symbol_used * 100.0
            ),
        ));
    }

    // 8) Deterministic sizing.
    let base = caps.max_risk_per_decision;
    let streak_mult = loss_streak_multiplier(st.loss_streak);
    let mut fraction = base * p * align * streak_mult;
    if fraction <= RISK_EPSILON {
        return Err(Denial::new(
            DenialCode::ZeroRisk,
            format!(
                "ZERO_RISK: base={:.2}% x prob={p:.2} x align={align} x streak_mult={streak_mult} is zero.",
                base * 100.0
            ),
        ));
    }

    let symbol_headroom = caps.max_risk_per_symbol_day - symbol_used;
    if fraction > symbol_headroom {
        fraction = symbol_headroom;
        if fraction <= RISK_EPSILON {
            return Err(Denial::new(
                DenialCode::SymbolRiskExhausted,
                format!(
                    "SYMBOL_RISK_EXHAUSTED: Cannot allocate more risk to {} today.",
                    req.symbol
                ),
            ));
        }
    }

    let portfolio_headroom = caps.max_portfolio_risk - st.open_risk;
    if fraction > portfolio_headroom {
        fraction = portfolio_headroom;
        if fraction <= RISK_EPSILON {
            return Err(Denial::new(
                DenialCode::PortfolioRiskLimit,
                format!(
                    "PORTFOLIO_RISK_LIMIT: Would exceed {:.2}% max.",
                    caps.max_portfolio_risk * 100.0
                ),
            ));
        }
    }

    // 9) Amount.
    Ok(Grant {
        risk_fraction: fraction,
        max_risk_amount: st.account_equity * fraction,
        base_risk: base,
        alignment_factor: align,
        streak_multiplier: streak_mult,
    })
}

/// Book an opened position against today's budgets.
pub fn apply_entry(st: &mut LedgerState, symbol: &str, sector: Option<&str>, risk_fraction: f64) {
    book_daily_usage(st, symbol, sector, risk_fraction);
    open_position(st, risk_fraction);
}

pub(crate) fn book_daily_usage(
    st: &mut LedgerState,
    symbol: &str,
    sector: Option<&str>,
    risk_fraction: f64,
) {
    *st.symbol_risk_today.entry(symbol.to_string()).or_insert(0.0) += risk_fraction;
    if let Some(sector) = sector {
        *st.sector_exposure.entry(sector.to_string()).or_insert(0) += 1;
    }
}

pub(crate) fn open_position(st: &mut LedgerState, risk_fraction: f64) {
    st.open_positions = st.open_positions.saturating_add(1);
    st.open_risk += risk_fraction;
}

/// Release a closed position's allocation. Saturates at zero so an outcome
/// without a matching entry cannot drive counters negative.
pub(crate) fn release_position(st: &mut LedgerState, risk_used: f64) {
    st.open_positions = st.open_positions.saturating_sub(1);
    st.open_risk = (st.open_risk - risk_used).max(0.0);
}

/// Update streak and pnl from one closed trade.
///
/// Both breakers are checked independently after the update; either can
/// fire, and neither can improve the state.
pub fn apply_outcome(st: &mut LedgerState, realized_pnl: f64, risk_used: f64) -> OutcomeEffects {
    apply_streak(st, realized_pnl);
    st.daily_realized_pnl += realized_pnl;
    release_position(st, risk_used);
    enforce_breakers(st)
}

pub(crate) fn apply_streak(st: &mut LedgerState, realized_pnl: f64) {
    if realized_pnl < 0.0 {
        st.loss_streak = st.loss_streak.saturating_add(1);
        st.losses += 1;
    } else {
        st.loss_streak = 0;
        if realized_pnl > 0.0 {
            st.wins += 1;
        }
    }
    st.max_loss_streak = st.max_loss_streak.max(st.loss_streak);
}

pub(crate) fn enforce_breakers(st: &mut LedgerState) -> OutcomeEffects {
    let mut fx = OutcomeEffects::default();
    if st.daily_loss_breached() {
        st.system_state = st.system_state.worsen(SystemState::HaltedToday);
        fx.daily_loss_breached = true;
    }
    if st.loss_streak >= LOCKDOWN_STREAK {
        st.system_state = st.system_state.worsen(SystemState::Lockdown);
        fx.locked_down = true;
    }
    fx
}

/// Start a new trading day. Streak and lockdown carry over.
pub fn reset_daily(st: &mut LedgerState, trading_date: NaiveDate) {
    st.trading_date = trading_date;
    clear_daily_usage(st);
    if st.system_state == SystemState::HaltedToday {
        st.system_state = SystemState::Operational;
    }
}

/// Day accumulators only. Open positions and open risk survive.
pub(crate) fn clear_daily_usage(st: &mut LedgerState) {
    st.daily_realized_pnl = 0.0;
    st.symbol_risk_today.clear();
    st.sector_exposure.clear();
}

/// Exact acknowledgement code, on a ledger that is actually locked.
pub fn lockdown_reset_accepted(st: &LedgerState, code: &str) -> bool {
    code == LOCKDOWN_ACK_CODE && st.system_state == SystemState::Lockdown
}

/// Leave lockdown. Anything [`lockdown_reset_accepted`] refuses changes
/// nothing.
pub fn manual_reset(st: &mut LedgerState, code: &str) -> bool {
    if !lockdown_reset_accepted(st, code) {
        return false;
    }
    st.system_state = SystemState::Operational;
    st.loss_streak = 0;
    st.daily_realized_pnl = 0.0;
    true
}

//! Fixed capital-preservation tables.
//!
//! These are policy, not configuration: every lookup is an exhaustive match
//! so a new mode or alignment value fails to compile until it is priced.

use chrono::Duration;
use serde::Serialize;
use tg_schemas::{AlignmentState, MarketMode};

/// Per-mode limits. All fractions are of account equity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskCaps {
    pub max_risk_per_decision: f64,
    pub max_risk_per_symbol_day: f64,
    pub max_portfolio_risk: f64,
    pub max_open_positions: u32,
    pub max_daily_loss: f64,
}

impl RiskCaps {
    pub const INTRADAY: RiskCaps = RiskCaps {
        max_risk_per_decision: 0.0025,
        max_risk_per_symbol_day: 0.005,
        max_portfolio_risk: 0.01,
        max_open_positions: 2,
        max_daily_loss: 0.01,
    };

    pub const SWING: RiskCaps = RiskCaps {
        max_risk_per_decision: 0.005,
        max_risk_per_symbol_day: 0.01,
        max_portfolio_risk: 0.02,
        max_open_positions: 3,
        max_daily_loss: 0.02,
    };

    pub fn for_mode(mode: MarketMode) -> RiskCaps {
        match mode {
            MarketMode::Intraday => Self::INTRADAY,
            MarketMode::Swing => Self::SWING,
        }
    }
}

/// Structural-agreement weight. Zero means execution is forbidden.
pub fn alignment_factor(alignment: AlignmentState, is_unstable: bool) -> f64 {
    match (alignment, is_unstable) {
        (AlignmentState::Full, false) => 1.0,
        (AlignmentState::Full, true) => 0.7,
        (AlignmentState::Partial, _) => 0.5,
        (AlignmentState::Unstable, _) | (AlignmentState::Conflict, _) => 0.0,
    }
}

/// Position-size reduction after consecutive losses.
pub fn loss_streak_multiplier(loss_streak: u32) -> f64 {
    match loss_streak {
        0 | 1 => 1.0,
        2 => 0.75,
        3 => 0.50,
        _ => 0.0,
    }
}

/// Streak at which evaluation refuses and halts for the day.
pub const HALT_STREAK: u32 = 4;

/// Streak at which the ledger locks down until a manual reset.
pub const LOCKDOWN_STREAK: u32 = 5;

/// The only string that releases a lockdown.
pub const LOCKDOWN_ACK_CODE: &str = "RESET_ACKNOWLEDGED";

/// Validity window of an allowance.
pub fn allowance_lifetime() -> Duration {
    Duration::minutes(15)
}

/// Fractions at or below this are treated as zero.
pub(crate) const RISK_EPSILON: f64 = 1e-12;

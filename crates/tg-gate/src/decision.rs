use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tg_schemas::{
    AlignmentState, ExecutionType, GateStep, MarketMode, Scenario, ScenarioProbabilities,
};
use uuid::Uuid;

/// Live market facts at redemption time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateRequest {
    pub symbol: String,
    pub timeframe: String,
    pub scenario_active: Scenario,
    pub probabilities: ScenarioProbabilities,
    pub alignment_state: AlignmentState,
    /// Currency amount the caller wants to put at risk.
    pub risk_requested: f64,
    pub market_mode: MarketMode,
    pub execution_type: ExecutionType,
}

impl GateRequest {
    pub fn active_probability(&self) -> f64 {
        self.probabilities.get(self.scenario_active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockCode {
    NoToken,
    TokenUnrecognized,
    TokenReuse,
    TokenExpired,
    SymbolMismatch,
    ScenarioMismatch,
    StructuralConflict,
    RiskOverflow,
    TimeCutoff,
    AutoThreshold,
    TokenConsumptionError,
}

impl BlockCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockCode::NoToken => "NO_TOKEN",
            BlockCode::TokenUnrecognized => "TOKEN_UNRECOGNIZED",
            BlockCode::TokenReuse => "TOKEN_REUSE",
            BlockCode::TokenExpired => "TOKEN_EXPIRED",
            BlockCode::SymbolMismatch => "SYMBOL_MISMATCH",
            BlockCode::ScenarioMismatch => "SCENARIO_MISMATCH",
            BlockCode::StructuralConflict => "STRUCTURAL_CONFLICT",
            BlockCode::RiskOverflow => "RISK_OVERFLOW",
            BlockCode::TimeCutoff => "TIME_CUTOFF",
            BlockCode::AutoThreshold => "AUTO_THRESHOLD",
            BlockCode::TokenConsumptionError => "TOKEN_CONSUMPTION_ERROR",
        }
    }
}

impl fmt::Display for BlockCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of one gate evaluation. Only `allowed == true` permits execution,
/// and then only up to the token's ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: String,
    pub block: Option<BlockCode>,
    pub block_gate: Option<GateStep>,
    /// This call won the durable consumption. A STEP_7 registry failure
    /// reports `false` yet still leaves the presented token spent in memory,
    /// so a retry with the same instance is a reuse.
    pub token_consumed: bool,
    pub token_id: Option<Uuid>,
    pub audit_log_id: u64,
    pub decided_at: DateTime<Utc>,
}

/// The call could not be recorded, so it produced no verdict at all.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GateError {
    #[error("AUDIT_UNAVAILABLE: attempt could not be recorded: {reason}")]
    AuditUnavailable { reason: String },
}

/// A terminal step outcome.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Block {
    pub code: BlockCode,
    pub gate: GateStep,
    pub reason: String,
}

impl Block {
    pub fn new(code: BlockCode, gate: GateStep, reason: impl Into<String>) -> Self {
        Self {
            code,
            gate,
            reason: reason.into(),
        }
    }

    /// Block whose reason is just the code.
    pub fn bare(code: BlockCode, gate: GateStep) -> Self {
        Self::new(code, gate, code.as_str())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tg_schemas::{AlignmentState, ExecutionType, GateStep, MarketMode, Scenario, TokenStatus};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptResult {
    Allowed,
    Blocked,
}

impl AttemptResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptResult::Allowed => "ALLOWED",
            AttemptResult::Blocked => "BLOCKED",
        }
    }
}

/// Whether the requested risk fit within the token's ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskBudgetStatus {
    Allowed,
    Blocked,
}

/// One gate evaluation, exactly as it was decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub attempted_at: DateTime<Utc>,
    pub token_id: Option<Uuid>,
    pub token_status: TokenStatus,
    pub symbol: String,
    pub timeframe: String,
    pub market_mode: MarketMode,
    pub scenario_active: Scenario,
    pub prob_a: f64,
    pub prob_b: f64,
    pub prob_c: f64,
    pub alignment_state: AlignmentState,
    /// `None` when the caller passed a non-finite amount.
    pub risk_requested: Option<f64>,
    /// Token ceiling; zero without a token.
    pub risk_allowed: f64,
    pub risk_budget_status: RiskBudgetStatus,
    pub execution_type: ExecutionType,
    pub attempted: bool,
    pub result: AttemptResult,
    pub block_code: Option<String>,
    pub block_reason: Option<String>,
    pub block_gate: Option<GateStep>,
}

/// Summary for selectivity reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_attempts: usize,
    pub allowed: usize,
    pub blocked: usize,
    /// allowed / total; 0 on an empty log.
    pub selectivity_ratio: f64,
    pub block_reasons: BTreeMap<String, usize>,
}

//! The execution gatekeeper.
//!
//! Seven steps, first failure wins, order fixed:
//!
//! ```text
//! evaluate(token?, request)
//!     │
//!     ├── STEP_1 token present, issued on these terms, unused (memory + registry), unexpired
//!     ├── STEP_2 live symbol and scenario == token's
//!     ├── STEP_3 live alignment is FULL
//!     ├── STEP_4 risk_requested <= token.max_risk
//!     ├── STEP_5 INTRADAY not past the exchange cutoff
//!     ├── STEP_6 AUTO needs active probability >= threshold
//!     ├── STEP_7 consume: in-memory check-and-set, then durable set-if-unconsumed
//!     │
//!     └── audit append ── then return
//! ```
//!
//! Each step is a plain function returning `Result<(), Block>`; `run_steps`
//! chains them with `?`. There is no flag that skips a step.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tg_audit::{AttemptResult, AuditTrail, ExecutionAttempt, RiskBudgetStatus};
use tg_schemas::{AlignmentState, Clock, ExecutionType, GateStep, MarketMode, TokenStatus};
use tg_store::{StateStore, TokenRegistration};
use tg_token::{PermissionToken, TokenError};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::decision::{Block, BlockCode, GateDecision, GateError, GateRequest};
use crate::policy::{market_time, past_intraday_cutoff, AUTO_PROBABILITY_THRESHOLD, INTRADAY_CUTOFF};

pub const ALL_CHECKS_PASSED: &str = "ALL_CHECKS_PASSED";

/// Durable, cross-process record of issued and spent tokens.
///
/// `registration` is what the ledger recorded when it minted the token.
/// `mark_consumed` must be an atomic set-if-unconsumed: `Ok(true)` for the
/// single caller that flipped the flag, `Ok(false)` for everyone else.
pub trait TokenRegistry: Send + Sync {
    fn registration(&self, token_id: Uuid) -> Result<Option<TokenRegistration>>;
    fn is_consumed(&self, token_id: Uuid) -> Result<bool>;
    fn mark_consumed(&self, token_id: Uuid, at: DateTime<Utc>) -> Result<bool>;
}

impl<S: StateStore + ?Sized> TokenRegistry for S {
    fn registration(&self, token_id: Uuid) -> Result<Option<TokenRegistration>> {
        self.token_registration(token_id)
    }

    fn is_consumed(&self, token_id: Uuid) -> Result<bool> {
        self.is_token_consumed(token_id)
    }

    fn mark_consumed(&self, token_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.mark_token_consumed(token_id, at)
    }
}

pub struct ExecutionGatekeeper<A, R, C> {
    audit: A,
    registry: R,
    clock: C,
}

impl<A, R, C> ExecutionGatekeeper<A, R, C>
where
    A: AuditTrail,
    R: TokenRegistry,
    C: Clock,
{
    pub fn new(audit: A, registry: R, clock: C) -> Self {
        Self {
            audit,
            registry,
            clock,
        }
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Decide whether `token` may be redeemed for `req`, and record the
    /// attempt.
    ///
    /// Every call is appended to the audit trail before it returns. If the
    /// append fails the call returns `GateError` instead of a decision; the
    /// caller must treat that as a refusal. A token consumed in STEP_7 stays
    /// consumed in that case.
    pub fn evaluate(
        &self,
        token: Option<&PermissionToken>,
        req: &GateRequest,
    ) -> Result<GateDecision, GateError> {
        let now = self.clock.now();
        let verdict = run_steps(token, req, &self.registry, now);
        let attempt = attempt_record(token, req, now, &verdict);

        let audit_log_id = self.audit.append(&attempt).map_err(|e| {
            error!(
                symbol = %req.symbol,
                token_id = ?token.map(PermissionToken::id),
                allowed = verdict.is_ok(),
                error = %e,
                "audit append failed; refusing to return a decision"
            );
            GateError::AuditUnavailable {
                reason: format!("{e:#}"),
            }
        })?;

        let decision = match verdict {
            Ok(()) => {
                info!(
                    symbol = %req.symbol,
                    token_id = ?token.map(PermissionToken::id),
                    risk = req.risk_requested,
                    audit_log_id,
                    "execution allowed"
                );
                GateDecision {
                    allowed: true,
                    reason: ALL_CHECKS_PASSED.to_string(),
                    block: None,
                    block_gate: None,
                    token_consumed: true,
                    token_id: token.map(PermissionToken::id),
                    audit_log_id,
                    decided_at: now,
                }
            }
            Err(b) => {
                warn!(
                    symbol = %req.symbol,
                    token_id = ?token.map(PermissionToken::id),
                    gate = %b.gate,
                    code = %b.code,
                    reason = %b.reason,
                    audit_log_id,
                    "execution blocked"
                );
                GateDecision {
                    allowed: false,
                    reason: b.reason,
                    block: Some(b.code),
                    block_gate: Some(b.gate),
                    token_consumed: false,
                    token_id: token.map(PermissionToken::id),
                    audit_log_id,
                    decided_at: now,
                }
            }
        };
        Ok(decision)
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

fn run_steps<R: TokenRegistry + ?Sized>(
    token: Option<&PermissionToken>,
    req: &GateRequest,
    registry: &R,
    now: DateTime<Utc>,
) -> Result<(), Block> {
    let token = check_token(token, registry, now)?;
    check_symbol(token, req)?;
    check_scenario(token, req)?;
    check_alignment(req)?;
    check_risk(token, req)?;
    check_mode(req, now)?;
    check_execution_type(req)?;
    commit(token, registry, now)
}

/// STEP_1
fn check_token<'t, R: TokenRegistry + ?Sized>(
    token: Option<&'t PermissionToken>,
    registry: &R,
    now: DateTime<Utc>,
) -> Result<&'t PermissionToken, Block> {
    let Some(token) = token else {
        return Err(Block::bare(BlockCode::NoToken, GateStep::Step1));
    };
    if token.is_used() {
        return Err(Block::bare(BlockCode::TokenReuse, GateStep::Step1));
    }
    match registry.registration(token.id()) {
        Ok(Some(reg)) => {
            if let Some(term) = differing_term(token, &reg) {
                return Err(Block::new(
                    BlockCode::TokenUnrecognized,
                    GateStep::Step1,
                    format!("TOKEN_UNRECOGNIZED: {term} differs from the issue record"),
                ));
            }
        }
        Ok(None) => {
            return Err(Block::new(
                BlockCode::TokenUnrecognized,
                GateStep::Step1,
                format!("TOKEN_UNRECOGNIZED: no issue record for {}", token.id()),
            ))
        }
        Err(e) => {
            return Err(Block::new(
                BlockCode::TokenConsumptionError,
                GateStep::Step1,
                format!("TOKEN_CONSUMPTION_ERROR: token registry unreadable: {e:#}"),
            ))
        }
    }
    match registry.is_consumed(token.id()) {
        Ok(true) => return Err(Block::bare(BlockCode::TokenReuse, GateStep::Step1)),
        Ok(false) => {}
        Err(e) => {
            return Err(Block::new(
                BlockCode::TokenConsumptionError,
                GateStep::Step1,
                format!("TOKEN_CONSUMPTION_ERROR: consumed registry unreadable: {e:#}"),
            ))
        }
    }
    if token.is_expired_at(now) {
        return Err(Block::bare(BlockCode::TokenExpired, GateStep::Step1));
    }
    Ok(token)
}

/// First term of `token` that is not what the ledger issued.
fn differing_term(token: &PermissionToken, reg: &TokenRegistration) -> Option<&'static str> {
    if token.symbol() != reg.symbol {
        Some("symbol")
    } else if token.scenario() != reg.scenario {
        Some("scenario")
    } else if token.mode() != reg.mode {
        Some("mode")
    } else if token.alignment_state_at_issue() != reg.alignment_state {
        Some("alignment_state")
    } else if token.probability_active().to_bits() != reg.probability_active.to_bits() {
        Some("probability_active")
    } else if token.max_risk().to_bits() != reg.max_risk.to_bits() {
        Some("max_risk")
    } else if token.created_at() != reg.created_at {
        Some("created_at")
    } else if token.expires_at() != reg.expires_at {
        Some("expires_at")
    } else {
        None
    }
}

/// STEP_2: a token is for one instrument.
fn check_symbol(token: &PermissionToken, req: &GateRequest) -> Result<(), Block> {
    if req.symbol != token.symbol() {
        return Err(Block::new(
            BlockCode::SymbolMismatch,
            GateStep::Step2,
            format!("SYMBOL_MISMATCH: Token={}, Current={}", token.symbol(), req.symbol),
        ));
    }
    Ok(())
}

/// STEP_2: the thesis must not have drifted since approval.
fn check_scenario(token: &PermissionToken, req: &GateRequest) -> Result<(), Block> {
    if req.scenario_active != token.scenario() {
        return Err(Block::new(
            BlockCode::ScenarioMismatch,
            GateStep::Step2,
            format!(
                "SCENARIO_MISMATCH: Token={}, Current={}",
                token.scenario(),
                req.scenario_active
            ),
        ));
    }
    Ok(())
}

/// STEP_3: structure outranks probability. Only FULL passes.
fn check_alignment(req: &GateRequest) -> Result<(), Block> {
    match req.alignment_state {
        AlignmentState::Full => Ok(()),
        AlignmentState::Partial | AlignmentState::Unstable | AlignmentState::Conflict => {
            Err(Block::new(
                BlockCode::StructuralConflict,
                GateStep::Step3,
                format!("STRUCTURAL_CONFLICT: Alignment={}", req.alignment_state),
            ))
        }
    }
}

/// STEP_4: the token's ceiling is never negotiable upward.
fn check_risk(token: &PermissionToken, req: &GateRequest) -> Result<(), Block> {
    // Written so that NaN fails too.
    if !(req.risk_requested <= token.max_risk()) {
        return Err(Block::new(
            BlockCode::RiskOverflow,
            GateStep::Step4,
            format!(
                "RISK_OVERFLOW: Requested={:.2}, Allowed={:.2}",
                req.risk_requested,
                token.max_risk()
            ),
        ));
    }
    Ok(())
}

/// STEP_5
fn check_mode(req: &GateRequest, now: DateTime<Utc>) -> Result<(), Block> {
    match req.market_mode {
        MarketMode::Swing => Ok(()),
        MarketMode::Intraday if !past_intraday_cutoff(now) => Ok(()),
        MarketMode::Intraday => Err(Block::new(
            BlockCode::TimeCutoff,
            GateStep::Step5,
            format!(
                "TIME_CUTOFF: Current={}, Cutoff={}",
                market_time(now).format("%H:%M:%S"),
                INTRADAY_CUTOFF.format("%H:%M:%S")
            ),
        )),
    }
}

/// STEP_6
fn check_execution_type(req: &GateRequest) -> Result<(), Block> {
    match req.execution_type {
        ExecutionType::Manual => Ok(()),
        ExecutionType::Auto => {
            let p = req.active_probability();
            if p >= AUTO_PROBABILITY_THRESHOLD {
                return Ok(());
            }
            Err(Block::new(
                BlockCode::AutoThreshold,
                GateStep::Step6,
                format!("AUTO_THRESHOLD: Probability={p:.2} < {AUTO_PROBABILITY_THRESHOLD}"),
            ))
        }
    }
}

/// STEP_7: spend the token. Losing either race is a reuse, not an error.
///
/// The in-memory consume happens first and is not undone if the registry
/// write then fails: the instance stays spent and the call is blocked.
fn commit<R: TokenRegistry + ?Sized>(
    token: &PermissionToken,
    registry: &R,
    now: DateTime<Utc>,
) -> Result<(), Block> {
    match token.consume_at(now) {
        Ok(_) => {}
        Err(TokenError::TokenReuse { .. }) => {
            return Err(Block::bare(BlockCode::TokenReuse, GateStep::Step7))
        }
        Err(TokenError::TokenExpired { .. }) => {
            return Err(Block::bare(BlockCode::TokenExpired, GateStep::Step7))
        }
        Err(e @ TokenError::Validation(_)) => {
            return Err(Block::new(
                BlockCode::TokenConsumptionError,
                GateStep::Step7,
                format!("TOKEN_CONSUMPTION_ERROR: {e}"),
            ))
        }
    }
    match registry.mark_consumed(token.id(), now) {
        Ok(true) => Ok(()),
        Ok(false) => Err(Block::bare(BlockCode::TokenReuse, GateStep::Step7)),
        Err(e) => Err(Block::new(
            BlockCode::TokenConsumptionError,
            GateStep::Step7,
            format!("TOKEN_CONSUMPTION_ERROR: {e:#}"),
        )),
    }
}

// ---------------------------------------------------------------------------
// Audit row
// ---------------------------------------------------------------------------

fn attempt_record(
    token: Option<&PermissionToken>,
    req: &GateRequest,
    now: DateTime<Utc>,
    verdict: &Result<(), Block>,
) -> ExecutionAttempt {
    let token_status = match (token, verdict) {
        (None, _) => TokenStatus::Missing,
        (Some(_), Ok(())) => TokenStatus::Valid,
        (Some(_), Err(b)) => match b.code {
            BlockCode::TokenReuse => TokenStatus::Reused,
            BlockCode::TokenExpired => TokenStatus::Expired,
            BlockCode::TokenUnrecognized => TokenStatus::Unrecognized,
            BlockCode::TokenConsumptionError => TokenStatus::Error,
            _ => TokenStatus::Valid,
        },
    };
    let risk_budget_status = match verdict {
        Err(b) if b.gate == GateStep::Step1 || b.gate == GateStep::Step4 => {
            RiskBudgetStatus::Blocked
        }
        _ => RiskBudgetStatus::Allowed,
    };
    let (result, block_code, block_reason, block_gate) = match verdict {
        Ok(()) => (AttemptResult::Allowed, None, None, None),
        Err(b) => (
            AttemptResult::Blocked,
            Some(b.code.as_str().to_string()),
            Some(b.reason.clone()),
            Some(b.gate),
        ),
    };

    ExecutionAttempt {
        attempted_at: now,
        token_id: token.map(PermissionToken::id),
        token_status,
        symbol: req.symbol.clone(),
        timeframe: req.timeframe.clone(),
        market_mode: req.market_mode,
        scenario_active: req.scenario_active,
        prob_a: req.probabilities.a,
        prob_b: req.probabilities.b,
        prob_c: req.probabilities.c,
        alignment_state: req.alignment_state,
        risk_requested: req.risk_requested.is_finite().then_some(req.risk_requested),
        risk_allowed: token.map_or(0.0, PermissionToken::max_risk),
        risk_budget_status,
        execution_type: req.execution_type,
        attempted: verdict.is_ok(),
        result,
        block_code,
        block_reason,
        block_gate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use tg_audit::MemoryAuditTrail;
    use tg_schemas::{FixedClock, Scenario, ScenarioProbabilities};
    use tg_store::MemoryStateStore;
    use tg_token::TokenTerms;

    type Gate = ExecutionGatekeeper<Arc<MemoryAuditTrail>, Arc<MemoryStateStore>, Arc<FixedClock>>;

    // 09:30 IST
    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 4, 0, 0).unwrap()
    }

    fn gate() -> (Gate, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(t0()));
        let g = ExecutionGatekeeper::new(
            Arc::new(MemoryAuditTrail::new()),
            Arc::new(MemoryStateStore::new()),
            Arc::clone(&clock),
        );
        (g, clock)
    }

    fn token(max_risk: f64) -> PermissionToken {
        PermissionToken::issue_at(
            TokenTerms {
                symbol: "NIFTY".into(),
                scenario: Scenario::A,
                mode: MarketMode::Intraday,
                alignment_state: AlignmentState::Full,
                probability_active: 0.6,
            },
            max_risk,
            t0(),
        )
        .unwrap()
    }

    fn registration(t: &PermissionToken) -> TokenRegistration {
        TokenRegistration {
            token_id: t.id(),
            session_id: "s".into(),
            symbol: t.symbol().to_string(),
            scenario: t.scenario(),
            mode: t.mode(),
            alignment_state: t.alignment_state_at_issue(),
            probability_active: t.probability_active(),
            max_risk: t.max_risk(),
            created_at: t.created_at(),
            expires_at: t.expires_at(),
        }
    }

    fn issued(g: &Gate, max_risk: f64) -> PermissionToken {
        let t = token(max_risk);
        g.registry().register_token(&registration(&t)).unwrap();
        t
    }

    fn req() -> GateRequest {
        GateRequest {
            symbol: "NIFTY".into(),
            timeframe: "15m".into(),
            scenario_active: Scenario::A,
            probabilities: ScenarioProbabilities::new(0.6, 0.3, 0.1),
            alignment_state: AlignmentState::Full,
            risk_requested: 2_000.0,
            market_mode: MarketMode::Intraday,
            execution_type: ExecutionType::Manual,
        }
    }

    #[test]
    fn clean_request_is_allowed_and_consumes() {
        let (g, _) = gate();
        let t = issued(&g, 2_500.0);
        let d = g.evaluate(Some(&t), &req()).unwrap();
        assert!(d.allowed);
        assert_eq!(d.reason, ALL_CHECKS_PASSED);
        assert!(d.token_consumed);
        assert_eq!(d.block_gate, None);
        assert_eq!(d.audit_log_id, 1);
        assert!(t.is_used());
        assert!(g.registry().is_consumed(t.id()).unwrap());

        let a = &g.audit().attempts().unwrap()[0];
        assert_eq!(a.result, AttemptResult::Allowed);
        assert_eq!(a.token_status, TokenStatus::Valid);
        assert!(a.attempted);
        assert_eq!(a.risk_allowed, 2_500.0);
    }

    #[test]
    fn no_token_blocks_at_step_1() {
        let (g, _) = gate();
        let d = g.evaluate(None, &req()).unwrap();
        assert_eq!(d.block, Some(BlockCode::NoToken));
        assert_eq!(d.block_gate, Some(GateStep::Step1));
        assert_eq!(d.reason, "NO_TOKEN");
        let a = &g.audit().attempts().unwrap()[0];
        assert_eq!(a.token_status, TokenStatus::Missing);
        assert_eq!(a.risk_budget_status, RiskBudgetStatus::Blocked);
        assert_eq!(a.risk_allowed, 0.0);
    }

    #[test]
    fn second_redemption_is_reuse() {
        let (g, _) = gate();
        let t = issued(&g, 2_500.0);
        assert!(g.evaluate(Some(&t), &req()).unwrap().allowed);
        let d = g.evaluate(Some(&t), &req()).unwrap();
        assert_eq!(d.block, Some(BlockCode::TokenReuse));
        assert_eq!(d.block_gate, Some(GateStep::Step1));
        assert!(!d.token_consumed);
    }

    #[test]
    fn registry_mark_alone_is_reuse() {
        // Another process already spent it.
        let (g, _) = gate();
        let t = issued(&g, 2_500.0);
        assert!(g.registry().mark_consumed(t.id(), t0()).unwrap());
        let d = g.evaluate(Some(&t), &req()).unwrap();
        assert_eq!(d.block, Some(BlockCode::TokenReuse));
        assert!(!t.is_used());
    }

    #[test]
    fn expiry_blocks_at_step_1() {
        let (g, clock) = gate();
        let t = issued(&g, 2_500.0);
        clock.advance(Duration::minutes(15) + Duration::seconds(1));
        let d = g.evaluate(Some(&t), &req()).unwrap();
        assert_eq!(d.block, Some(BlockCode::TokenExpired));
        assert_eq!(d.block_gate, Some(GateStep::Step1));
        assert!(!t.is_used());
    }

    #[test]
    fn exactly_at_expiry_still_redeems() {
        let (g, clock) = gate();
        let t = issued(&g, 2_500.0);
        clock.advance(Duration::minutes(15));
        assert!(g.evaluate(Some(&t), &req()).unwrap().allowed);
    }

    #[test]
    fn alignment_other_than_full_is_structural_conflict() {
        for alignment in [
            AlignmentState::Partial,
            AlignmentState::Unstable,
            AlignmentState::Conflict,
        ] {
            let (g, _) = gate();
            let t = issued(&g, 2_500.0);
            let mut r = req();
            r.alignment_state = alignment;
            r.probabilities = ScenarioProbabilities::new(0.99, 0.01, 0.0);
            let d = g.evaluate(Some(&t), &r).unwrap();
            assert_eq!(d.block, Some(BlockCode::StructuralConflict));
            assert_eq!(d.block_gate, Some(GateStep::Step3));
            assert_eq!(d.reason, format!("STRUCTURAL_CONFLICT: Alignment={alignment}"));
            assert!(!t.is_used());
        }
    }

    #[test]
    fn risk_over_ceiling_overflows() {
        let (g, _) = gate();
        let t = issued(&g, 2_500.0);
        let mut r = req();
        r.risk_requested = 2_500.01;
        let d = g.evaluate(Some(&t), &r).unwrap();
        assert_eq!(d.block, Some(BlockCode::RiskOverflow));
        assert_eq!(d.block_gate, Some(GateStep::Step4));
        assert_eq!(d.reason, "RISK_OVERFLOW: Requested=2500.01, Allowed=2500.00");
        let a = &g.audit().attempts().unwrap()[0];
        assert_eq!(a.risk_budget_status, RiskBudgetStatus::Blocked);

        r.risk_requested = f64::NAN;
        let d = g.evaluate(Some(&t), &r).unwrap();
        assert_eq!(d.block, Some(BlockCode::RiskOverflow));
        assert_eq!(g.audit().attempts().unwrap()[1].risk_requested, None);
    }

    #[test]
    fn risk_equal_to_ceiling_passes() {
        let (g, _) = gate();
        let t = issued(&g, 2_500.0);
        let mut r = req();
        r.risk_requested = 2_500.0;
        assert!(g.evaluate(Some(&t), &r).unwrap().allowed);
    }

    #[test]
    fn intraday_after_cutoff_is_blocked_swing_is_not() {
        let (g, clock) = gate();
        // 15:20:00 IST
        clock.set(Utc.with_ymd_and_hms(2026, 3, 2, 9, 50, 0).unwrap());
        let t = PermissionToken::issue_at(token(2_500.0).terms().clone(), 2_500.0, clock.now())
            .unwrap();
        g.registry().register_token(&registration(&t)).unwrap();
        let d = g.evaluate(Some(&t), &req()).unwrap();
        assert_eq!(d.block, Some(BlockCode::TimeCutoff));
        assert_eq!(d.block_gate, Some(GateStep::Step5));
        assert_eq!(d.reason, "TIME_CUTOFF: Current=15:20:00, Cutoff=15:15:00");

        let mut r = req();
        r.market_mode = MarketMode::Swing;
        assert!(g.evaluate(Some(&t), &r).unwrap().allowed);
    }

    #[test]
    fn auto_threshold_reason_format() {
        let (g, _) = gate();
        let t = issued(&g, 2_500.0);
        let mut r = req();
        r.execution_type = ExecutionType::Auto;
        r.probabilities = ScenarioProbabilities::new(0.5, 0.3, 0.2);
        let d = g.evaluate(Some(&t), &r).unwrap();
        assert_eq!(d.block, Some(BlockCode::AutoThreshold));
        assert_eq!(d.block_gate, Some(GateStep::Step6));
        assert_eq!(d.reason, "AUTO_THRESHOLD: Probability=0.50 < 0.55");
    }

    #[test]
    fn auto_at_threshold_passes() {
        let (g, _) = gate();
        let t = issued(&g, 2_500.0);
        let mut r = req();
        r.execution_type = ExecutionType::Auto;
        r.probabilities = ScenarioProbabilities::new(0.55, 0.3, 0.15);
        assert!(g.evaluate(Some(&t), &r).unwrap().allowed);
    }

    #[test]
    fn earlier_step_wins_when_several_fail() {
        let (g, _) = gate();
        let t = issued(&g, 2_500.0);
        let mut r = req();
        r.scenario_active = Scenario::C;
        r.alignment_state = AlignmentState::Conflict;
        r.risk_requested = 1e9;
        r.execution_type = ExecutionType::Auto;
        let d = g.evaluate(Some(&t), &r).unwrap();
        assert_eq!(d.block_gate, Some(GateStep::Step2));
        assert_eq!(d.reason, "SCENARIO_MISMATCH: Token=A, Current=C");
    }

    #[test]
    fn unissued_token_is_unrecognized() {
        let (g, _) = gate();
        let t = token(2_500.0);
        let d = g.evaluate(Some(&t), &req()).unwrap();
        assert_eq!(d.block, Some(BlockCode::TokenUnrecognized));
        assert_eq!(d.block_gate, Some(GateStep::Step1));
        assert_eq!(d.reason, format!("TOKEN_UNRECOGNIZED: no issue record for {}", t.id()));
        assert!(!t.is_used());
        assert!(!g.registry().is_consumed(t.id()).unwrap());
        let a = &g.audit().attempts().unwrap()[0];
        assert_eq!(a.token_status, TokenStatus::Unrecognized);
        assert_eq!(a.risk_budget_status, RiskBudgetStatus::Blocked);
    }

    #[test]
    fn raised_ceiling_is_unrecognized() {
        let (g, _) = gate();
        let genuine = issued(&g, 2_500.0);
        let mut record = genuine.to_record();
        record.max_risk = 1e9;
        let inflated = PermissionToken::from_record(record).unwrap();

        let mut r = req();
        r.risk_requested = 5e8;
        let d = g.evaluate(Some(&inflated), &r).unwrap();
        assert_eq!(d.block, Some(BlockCode::TokenUnrecognized));
        assert_eq!(d.reason, "TOKEN_UNRECOGNIZED: max_risk differs from the issue record");
        assert!(!g.registry().is_consumed(genuine.id()).unwrap());

        assert!(g.evaluate(Some(&genuine), &req()).unwrap().allowed);
    }

    #[test]
    fn other_symbol_is_a_mismatch() {
        let (g, _) = gate();
        let t = issued(&g, 2_500.0);
        let mut r = req();
        r.symbol = "BANKNIFTY".into();
        let d = g.evaluate(Some(&t), &r).unwrap();
        assert_eq!(d.block, Some(BlockCode::SymbolMismatch));
        assert_eq!(d.block_gate, Some(GateStep::Step2));
        assert_eq!(d.reason, "SYMBOL_MISMATCH: Token=NIFTY, Current=BANKNIFTY");
        assert!(!t.is_used());
    }

    struct FailingAudit;

    impl AuditTrail for FailingAudit {
        fn append(&self, _: &ExecutionAttempt) -> Result<u64> {
            anyhow::bail!("disk full")
        }

        fn attempts(&self) -> Result<Vec<ExecutionAttempt>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn audit_failure_never_yields_a_decision() {
        let store = MemoryStateStore::new();
        let t = token(2_500.0);
        store.register_token(&registration(&t)).unwrap();
        let g = ExecutionGatekeeper::new(FailingAudit, store, FixedClock::new(t0()));
        let err = g.evaluate(Some(&t), &req()).unwrap_err();
        assert!(matches!(err, GateError::AuditUnavailable { .. }));
        assert!(err.to_string().contains("disk full"));
    }
}

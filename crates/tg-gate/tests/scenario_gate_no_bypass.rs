//! Scenario: the gate cannot be talked past.
//!
//! GREEN when:
//! - a token minted for scenario A at probability 0.60, redeemed while the
//!   live scenario is B, is BLOCKED at STEP_2 with `SCENARIO_MISMATCH` and the
//!   token stays unused (and redeemable once the thesis is back)
//! - AUTO below the auto threshold is BLOCKED `AUTO_THRESHOLD`, and the very
//!   same inputs as MANUAL are ALLOWED
//! - every call, allowed or blocked, lands in the file-backed audit log, and
//!   the log's hash chain verifies

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tg_audit::{verify_hash_chain, AttemptResult, AuditTrail, JsonlAuditTrail, VerifyResult};
use tg_gate::{BlockCode, ExecutionGatekeeper, GateRequest};
use tg_schemas::{
    AlignmentState, ExecutionType, FixedClock, GateStep, MarketMode, Scenario,
    ScenarioProbabilities,
};
use tg_store::{JsonlStateStore, StateStore, TokenRegistration};
use tg_token::{PermissionToken, TokenTerms};

fn t0() -> DateTime<Utc> {
    // 10:00 IST
    Utc.with_ymd_and_hms(2026, 3, 2, 4, 30, 0).unwrap()
}

/// A token as the ledger would mint it: issued and registered in `store`.
fn issue(store: &impl StateStore, probability_active: f64) -> PermissionToken {
    let t = PermissionToken::issue_at(
        TokenTerms {
            symbol: "BANKNIFTY".into(),
            scenario: Scenario::A,
            mode: MarketMode::Intraday,
            alignment_state: AlignmentState::Full,
            probability_active,
        },
        1_500.0,
        t0(),
    )
    .unwrap();
    store
        .register_token(&TokenRegistration {
            token_id: t.id(),
            session_id: "desk".into(),
            symbol: t.symbol().to_string(),
            scenario: t.scenario(),
            mode: t.mode(),
            alignment_state: t.alignment_state_at_issue(),
            probability_active: t.probability_active(),
            max_risk: t.max_risk(),
            created_at: t.created_at(),
            expires_at: t.expires_at(),
        })
        .unwrap();
    t
}

fn request(scenario_active: Scenario, probs: ScenarioProbabilities, exec: ExecutionType) -> GateRequest {
    GateRequest {
        symbol: "BANKNIFTY".into(),
        timeframe: "5m".into(),
        scenario_active,
        probabilities: probs,
        alignment_state: AlignmentState::Full,
        risk_requested: 1_000.0,
        market_mode: MarketMode::Intraday,
        execution_type: exec,
    }
}

#[test]
fn drifted_scenario_blocks_without_spending_the_token() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("execution_audit.jsonl");
    let gate = ExecutionGatekeeper::new(
        JsonlAuditTrail::open(&audit_path, true).unwrap(),
        JsonlStateStore::open(dir.path().join("state")).unwrap(),
        Arc::new(FixedClock::new(t0())),
    );
    let t = issue(gate.registry(), 0.60);

    let d = gate
        .evaluate(
            Some(&t),
            &request(
                Scenario::B,
                ScenarioProbabilities::new(0.30, 0.60, 0.10),
                ExecutionType::Manual,
            ),
        )
        .unwrap();
    assert!(!d.allowed);
    assert!(d.reason.contains("SCENARIO_MISMATCH"));
    assert_eq!(d.block, Some(BlockCode::ScenarioMismatch));
    assert_eq!(d.block_gate, Some(GateStep::Step2));
    assert!(!d.token_consumed);
    assert!(!t.is_used());

    // Thesis restored: the same token is still good.
    let d = gate
        .evaluate(
            Some(&t),
            &request(
                Scenario::A,
                ScenarioProbabilities::new(0.60, 0.30, 0.10),
                ExecutionType::Manual,
            ),
        )
        .unwrap();
    assert!(d.allowed);
    assert!(t.is_used());

    let attempts = gate.audit().attempts().unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].result, AttemptResult::Blocked);
    assert_eq!(attempts[0].block_gate, Some(GateStep::Step2));
    assert_eq!(attempts[1].result, AttemptResult::Allowed);
    assert_eq!(
        verify_hash_chain(&audit_path).unwrap(),
        VerifyResult::Valid { lines: 2 }
    );
}

#[test]
fn auto_needs_threshold_manual_does_not() {
    let dir = tempfile::tempdir().unwrap();
    let gate = ExecutionGatekeeper::new(
        JsonlAuditTrail::open(dir.path().join("audit.jsonl"), true).unwrap(),
        JsonlStateStore::open(dir.path()).unwrap(),
        FixedClock::new(t0()),
    );
    let probs = ScenarioProbabilities::new(0.52, 0.33, 0.15);

    let auto_token = issue(gate.registry(), 0.52);
    let d = gate
        .evaluate(Some(&auto_token), &request(Scenario::A, probs, ExecutionType::Auto))
        .unwrap();
    assert!(!d.allowed);
    assert_eq!(d.block, Some(BlockCode::AutoThreshold));
    assert_eq!(d.block_gate, Some(GateStep::Step6));
    assert!(!auto_token.is_used());

    let manual_token = issue(gate.registry(), 0.52);
    let d = gate
        .evaluate(Some(&manual_token), &request(Scenario::A, probs, ExecutionType::Manual))
        .unwrap();
    assert!(d.allowed);
    assert!(d.token_consumed);

    let stats = gate.audit().stats().unwrap();
    assert_eq!(stats.total_attempts, 2);
    assert_eq!(stats.allowed, 1);
    assert_eq!(stats.block_reasons.get("AUTO_THRESHOLD"), Some(&1));
    assert!((stats.selectivity_ratio - 0.5).abs() < 1e-12);
}

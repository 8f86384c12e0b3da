//! Scenario: each later step blocks on its own, and leaves the token alone.
//!
//! GREEN when:
//! - INTRADAY after 15:15 IST is BLOCKED `TIME_CUTOFF` at STEP_5; the same
//!   token redeemed as SWING is ALLOWED
//! - PARTIAL, UNSTABLE and CONFLICT alignment are BLOCKED
//!   `STRUCTURAL_CONFLICT` at STEP_3 even at probability 0.95
//! - a request above the ceiling is BLOCKED `RISK_OVERFLOW` at STEP_4
//! - none of the blocks consumes the token
//! - the audit breakdown counts each block code

use tg_audit::AuditTrail;
use tg_gate::BlockCode;
use tg_schemas::{AlignmentState, GateStep, MarketMode, Scenario, ScenarioProbabilities};
use tg_testkit::{after_cutoff, before_cutoff, matching_request, Harness};

#[test]
fn intraday_cutoff_blocks_at_step_5() {
    let h = Harness::at(MarketMode::Intraday, 1_000_000.0, after_cutoff()).unwrap();
    let t = h.issue("NIFTY", Scenario::A, MarketMode::Intraday, 0.6, 2_000.0, after_cutoff()).unwrap();

    let d = h.gate.evaluate(Some(&t), &matching_request(&t, 1_000.0)).unwrap();
    assert!(!d.allowed);
    assert_eq!(d.block, Some(BlockCode::TimeCutoff));
    assert_eq!(d.block_gate, Some(GateStep::Step5));
    assert!(d.reason.starts_with("TIME_CUTOFF: Current=15:20:00"));
    assert!(!t.is_used());

    let mut swing = matching_request(&t, 1_000.0);
    swing.market_mode = MarketMode::Swing;
    assert!(h.gate.evaluate(Some(&t), &swing).unwrap().allowed);
}

#[test]
fn structure_outranks_probability_at_step_3() {
    let h = Harness::new(MarketMode::Swing, 1_000_000.0).unwrap();
    let t = h.issue("RELIANCE", Scenario::B, MarketMode::Swing, 0.95, 5_000.0, before_cutoff()).unwrap();

    for alignment in [
        AlignmentState::Partial,
        AlignmentState::Unstable,
        AlignmentState::Conflict,
    ] {
        let mut r = matching_request(&t, 1.0);
        r.alignment_state = alignment;
        r.probabilities = ScenarioProbabilities::new(0.02, 0.95, 0.03);
        let d = h.gate.evaluate(Some(&t), &r).unwrap();
        assert_eq!(d.block, Some(BlockCode::StructuralConflict));
        assert_eq!(d.block_gate, Some(GateStep::Step3));
        assert!(d.reason.contains(alignment.as_str()));
    }
    assert!(!t.is_used());
    assert_eq!(
        h.audit.block_breakdown().unwrap().get("STRUCTURAL_CONFLICT"),
        Some(&3)
    );
}

#[test]
fn ceiling_is_not_renegotiable_at_step_4() {
    let h = Harness::new(MarketMode::Swing, 1_000_000.0).unwrap();
    let t = h.issue("TCS", Scenario::A, MarketMode::Swing, 0.7, 3_500.0, before_cutoff()).unwrap();

    let d = h.gate.evaluate(Some(&t), &matching_request(&t, 3_500.5)).unwrap();
    assert_eq!(d.block, Some(BlockCode::RiskOverflow));
    assert_eq!(d.block_gate, Some(GateStep::Step4));
    assert_eq!(d.reason, "RISK_OVERFLOW: Requested=3500.50, Allowed=3500.00");
    assert!(!t.is_used());

    // Asking for less than the ceiling is fine.
    let d = h.gate.evaluate(Some(&t), &matching_request(&t, 2_000.0)).unwrap();
    assert!(d.allowed);

    let stats = h.audit.stats().unwrap();
    assert_eq!(stats.total_attempts, 2);
    assert_eq!(stats.block_reasons.get("RISK_OVERFLOW"), Some(&1));
}

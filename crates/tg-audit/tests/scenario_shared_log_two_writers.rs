//! Two trails, one file.
//!
//! GREEN when:
//! - two independently opened trails on the same path, appending from
//!   separate threads, hand out every log id exactly once
//! - the interleaved file still verifies as one unbroken hash chain
//! - a trail opened before the other one wrote continues after its lines

use chrono::{Duration, TimeZone, Utc};
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;
use tg_audit::{
    verify_hash_chain, AttemptResult, AuditTrail, ExecutionAttempt, JsonlAuditTrail,
    RiskBudgetStatus, VerifyResult,
};
use tg_schemas::{AlignmentState, ExecutionType, GateStep, MarketMode, Scenario, TokenStatus};

fn attempt(symbol: &str, i: i64) -> ExecutionAttempt {
    ExecutionAttempt {
        attempted_at: Utc.with_ymd_and_hms(2026, 3, 2, 4, 0, 0).unwrap() + Duration::seconds(i),
        token_id: None,
        token_status: TokenStatus::Missing,
        symbol: symbol.into(),
        timeframe: "5m".into(),
        market_mode: MarketMode::Intraday,
        scenario_active: Scenario::A,
        prob_a: 0.6,
        prob_b: 0.3,
        prob_c: 0.1,
        alignment_state: AlignmentState::Full,
        risk_requested: Some(100.0),
        risk_allowed: 0.0,
        risk_budget_status: RiskBudgetStatus::Blocked,
        execution_type: ExecutionType::Manual,
        attempted: false,
        result: AttemptResult::Blocked,
        block_code: Some("NO_TOKEN".into()),
        block_reason: Some("NO_TOKEN".into()),
        block_gate: Some(GateStep::Step1),
    }
}

#[test]
fn concurrent_trails_share_one_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("execution_audit.jsonl");
    let per_writer = 20;

    let trails = [
        Arc::new(JsonlAuditTrail::open(&path, true).unwrap()),
        Arc::new(JsonlAuditTrail::open(&path, true).unwrap()),
    ];
    let barrier = Arc::new(Barrier::new(trails.len()));
    let handles: Vec<_> = trails
        .iter()
        .zip(["NIFTY", "BANKNIFTY"])
        .map(|(trail, symbol)| {
            let trail = Arc::clone(trail);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..per_writer)
                    .map(|i| trail.append(&attempt(symbol, i)).unwrap())
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut ids = BTreeSet::new();
    for h in handles {
        for id in h.join().unwrap() {
            assert!(ids.insert(id), "log id {id} handed out twice");
        }
    }
    let total = 2 * per_writer as u64;
    assert_eq!(ids, (1..=total).collect::<BTreeSet<_>>());
    assert_eq!(
        verify_hash_chain(&path).unwrap(),
        VerifyResult::Valid { lines: total as usize }
    );
    assert_eq!(trails[0].attempts().unwrap().len(), total as usize);
}

#[test]
fn trail_opened_early_continues_after_the_other() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("execution_audit.jsonl");
    let first = JsonlAuditTrail::open(&path, true).unwrap();
    let second = JsonlAuditTrail::open(&path, true).unwrap();

    assert_eq!(first.append(&attempt("NIFTY", 0)).unwrap(), 1);
    assert_eq!(second.append(&attempt("NIFTY", 1)).unwrap(), 2);
    assert_eq!(second.append(&attempt("NIFTY", 2)).unwrap(), 3);
    assert_eq!(first.append(&attempt("NIFTY", 3)).unwrap(), 4);
    assert_eq!(verify_hash_chain(&path).unwrap(), VerifyResult::Valid { lines: 4 });
}

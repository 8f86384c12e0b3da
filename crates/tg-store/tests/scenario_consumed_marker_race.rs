//! Durable consumed-marker under contention.
//!
//! GREEN when:
//! - independent store handles on one directory (stand-ins for separate
//!   processes) racing `mark_token_consumed` yield exactly one `true`
//! - the in-memory store gives the same guarantee across threads
//! - an id nobody registered cannot be marked at all, from any handle

use chrono::{Duration, Utc};
use std::sync::{Arc, Barrier};
use tg_schemas::{AlignmentState, MarketMode, Scenario};
use tg_store::{JsonlStateStore, MemoryStateStore, StateStore, TokenRegistration};
use uuid::Uuid;

const N: usize = 6;

fn issued(store: &impl StateStore) -> Uuid {
    let token_id = Uuid::new_v4();
    let now = Utc::now();
    store
        .register_token(&TokenRegistration {
            token_id,
            session_id: "race".into(),
            symbol: "NIFTY".into(),
            scenario: Scenario::A,
            mode: MarketMode::Intraday,
            alignment_state: AlignmentState::Full,
            probability_active: 0.7,
            max_risk: 100.0,
            created_at: now,
            expires_at: now + Duration::minutes(15),
        })
        .unwrap();
    token_id
}

fn race<S: StateStore>(stores: Vec<S>, token_id: Uuid) -> usize {
    let barrier = Barrier::new(stores.len());
    std::thread::scope(|s| {
        let handles: Vec<_> = stores
            .iter()
            .map(|store| {
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    store.mark_token_consumed(token_id, Utc::now()).unwrap()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count()
    })
}

#[test]
fn file_marker_has_single_winner_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let stores: Vec<JsonlStateStore> = (0..N)
        .map(|_| JsonlStateStore::open(dir.path()).unwrap())
        .collect();
    let id = issued(&stores[0]);
    assert_eq!(race(stores, id), 1);
    assert!(JsonlStateStore::open(dir.path())
        .unwrap()
        .is_token_consumed(id)
        .unwrap());
}

#[test]
fn memory_marker_has_single_winner_across_threads() {
    let shared = Arc::new(MemoryStateStore::new());
    let stores: Vec<Arc<MemoryStateStore>> = (0..N).map(|_| Arc::clone(&shared)).collect();
    let id = issued(&shared);
    assert_eq!(race(stores, id), 1);
    assert!(shared.is_token_consumed(id).unwrap());
}

#[test]
fn unregistered_id_is_refused_by_every_handle() {
    let dir = tempfile::tempdir().unwrap();
    let stranger = Uuid::new_v4();
    for _ in 0..3 {
        let store = JsonlStateStore::open(dir.path()).unwrap();
        assert!(store.mark_token_consumed(stranger, Utc::now()).is_err());
    }
    assert!(!JsonlStateStore::open(dir.path())
        .unwrap()
        .is_token_consumed(stranger)
        .unwrap());
}

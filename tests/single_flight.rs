//! Concurrency semantics: single-flight deduplication and the
//! store-versus-invalidation race.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{case_key, seeded_engine};
use context_engine::{RetrieveRequest, Scope};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifty_concurrent_cold_retrievals_build_once() {
    let (engine, transport, _) = seeded_engine();
    // Slow the upstream so every caller joins the same flight.
    transport.set_delay(Duration::from_millis(100));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine.retrieve(RetrieveRequest::scoped(case_key(), Scope::Standard)).await
        }));
    }

    let mut records = Vec::new();
    for handle in handles {
        records.push(handle.await.unwrap().unwrap());
    }

    // One build's worth of upstream traffic, not fifty.
    assert_eq!(transport.calls_for("/api/v1/entities:PARTY"), 1);
    assert_eq!(transport.calls_for("/api/v1/entities:JUDGE"), 1);
    assert_eq!(transport.calls_for("/api/v1/entities:LEGAL_ISSUE"), 1);
    assert_eq!(transport.calls_for("/api/v1/relationships"), 1);
    assert_eq!(transport.total_calls(), 10);

    // Everyone saw the same content; exactly the leader reports a fresh build.
    let first = &records[0];
    for record in &records {
        assert_eq!(record.context_score, first.context_score);
        assert_eq!(record.dimensions, first.dimensions);
    }
    let fresh = records.iter().filter(|r| !r.cached).count();
    assert_eq!(fresh, 1, "exactly one caller performed the build");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_flights_for_distinct_cases_do_not_interfere() {
    let (engine, transport, store) = seeded_engine();
    common::seed_full_store(&store, &context_engine::CaseKey::new("C1", "K2"));
    transport.set_delay(Duration::from_millis(50));

    let a = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine.retrieve(RetrieveRequest::scoped(case_key(), Scope::Minimal)).await
        })
    };
    let b = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .retrieve(RetrieveRequest::scoped(
                    context_engine::CaseKey::new("C1", "K2"),
                    Scope::Minimal,
                ))
                .await
        })
    };

    let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
    assert!(!a.cached && !b.cached, "distinct keys each run their own build");
    assert_eq!(a.case_key.case_id, "K1");
    assert_eq!(b.case_key.case_id, "K2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalidation_during_a_build_defeats_its_store() {
    let (engine, transport, _) = seeded_engine();
    transport.set_delay(Duration::from_millis(200));

    let in_flight = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine.retrieve(RetrieveRequest::scoped(case_key(), Scope::Comprehensive)).await
        })
    };

    // Let the build get under way, then invalidate the case beneath it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.invalidate_case(&case_key()).unwrap();

    let raced = in_flight.await.unwrap().unwrap();
    assert!(!raced.cached, "the racing caller still gets its (fresh) result");

    // The racing build's store was dropped: the next retrieve rebuilds.
    let calls_before = transport.total_calls();
    transport.set_delay(Duration::ZERO);
    let next =
        engine.retrieve(RetrieveRequest::scoped(case_key(), Scope::Comprehensive)).await.unwrap();
    assert!(!next.cached, "nothing from the in-flight build may be served");
    assert!(transport.total_calls() > calls_before, "a fresh build went upstream");

    // And the fresh build's store is good: a further retrieve hits.
    let warm =
        engine.retrieve(RetrieveRequest::scoped(case_key(), Scope::Comprehensive)).await.unwrap();
    assert!(warm.cached);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn leader_failure_is_shared_with_every_follower() {
    let (engine, transport, _) = seeded_engine();
    transport.set_delay(Duration::from_millis(100));

    // An unknown case: the leader's CaseNotFound must fan out to followers
    // instead of each follower re-running the lookup.
    let missing = context_engine::CaseKey::new("C1", "GONE");
    let mut handles = Vec::new();
    for _ in 0..10 {
        let engine = Arc::clone(&engine);
        let key = missing.clone();
        handles.push(tokio::spawn(async move {
            engine.retrieve(RetrieveRequest::scoped(key, Scope::Minimal)).await
        }));
    }

    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_case_not_found());
    }
    assert_eq!(transport.total_calls(), 0, "metadata gate fails before any graph traffic");
}

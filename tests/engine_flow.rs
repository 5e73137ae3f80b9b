//! End-to-end retrieval flows against a scripted graph and seeded store.

mod common;

use std::sync::Arc;

use common::{
    case_key, engine_with, seed_full_graph, seed_full_store, seeded_engine, test_config,
    MockGraphTransport,
};
use context_engine::{
    CaseKey, DimensionName, DimensionOutcome, EngineError, MemoryCaseStore, RetrieveRequest,
    Scope, TransportError,
};

#[tokio::test]
async fn cold_comprehensive_build_scores_one() {
    let (engine, _, _) = seeded_engine();

    let record =
        engine.retrieve(RetrieveRequest::scoped(case_key(), Scope::Comprehensive)).await.unwrap();

    assert_eq!(record.context_score, 1.0);
    assert!(record.is_complete);
    assert!(!record.cached);
    assert_eq!(record.dimensions.len(), 5);
    assert!(record.dimensions.values().all(|o| o.is_present()));
    assert_eq!(record.case_name.as_deref(), Some("Smith v. Jones"));
}

#[tokio::test]
async fn warm_hit_returns_identical_content_marked_cached() {
    let (engine, transport, _) = seeded_engine();
    let request = RetrieveRequest::scoped(case_key(), Scope::Comprehensive);

    let first = engine.retrieve(request.clone()).await.unwrap();
    let calls_after_build = transport.total_calls();

    let second = engine.retrieve(request).await.unwrap();
    assert!(second.cached);
    assert!(!first.cached);
    assert_eq!(second.context_score, first.context_score);
    assert_eq!(second.dimensions, first.dimensions);
    assert_eq!(transport.total_calls(), calls_after_build, "hit makes no upstream calls");
}

#[tokio::test]
async fn why_failure_yields_partial_context_not_an_error() {
    let transport = MockGraphTransport::new();
    seed_full_graph(&transport);
    // Both WHY sources reject; everything else stays healthy.
    transport.route(
        "/api/v1/query",
        Err(TransportError::Status { status: 400, body: "strategy index offline".into() }),
    );
    transport.route(
        "/api/v1/research",
        Err(TransportError::Status { status: 400, body: "research index offline".into() }),
    );
    let store = Arc::new(MemoryCaseStore::new());
    seed_full_store(&store, &case_key());
    let engine = engine_with(test_config(), Arc::clone(&transport), store);

    let record =
        engine.retrieve(RetrieveRequest::scoped(case_key(), Scope::Comprehensive)).await.unwrap();

    // (1+1+1+1+0)/5 × 4/5.
    assert!((record.context_score - 0.64).abs() < 1e-9);
    assert!(!record.is_complete);
    assert!(matches!(
        record.dimensions[&DimensionName::Why],
        DimensionOutcome::Failed(_)
    ));
    for dim in [DimensionName::Who, DimensionName::What, DimensionName::Where, DimensionName::When] {
        assert!(record.dimensions[&dim].is_present(), "{dim} should have survived");
    }
}

#[tokio::test]
async fn unknown_case_is_not_found_and_writes_no_cache_entry() {
    let (engine, _, _) = seeded_engine();
    let missing = CaseKey::new("C1", "DOES_NOT_EXIST");

    let err = engine
        .retrieve(RetrieveRequest::scoped(missing.clone(), Scope::Minimal))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::CaseNotFound { case_id: "DOES_NOT_EXIST".into() });

    let stats = engine.cache_stats();
    assert_eq!(stats.tiers[0].stats.sets, 0, "failed builds must not be stored");
}

#[tokio::test]
async fn refresh_rebuilds_and_restores_equivalent_content() {
    let (engine, transport, _) = seeded_engine();
    let request = RetrieveRequest::scoped(case_key(), Scope::Standard);

    let first = engine.retrieve(request.clone()).await.unwrap();
    let refreshed = engine.refresh(case_key(), Some(Scope::Standard)).await.unwrap();
    let third = engine.retrieve(request).await.unwrap();

    assert!(!refreshed.cached, "refresh is always a fresh build");
    assert!(third.cached, "refresh stored its result");
    // Content-equal modulo caching metadata and timing.
    assert_eq!(first.context_score, third.context_score);
    assert_eq!(first.dimensions, third.dimensions);
    assert_eq!(refreshed.dimensions, first.dimensions);
    assert!(transport.total_calls() >= 20, "refresh went back upstream");
}

#[tokio::test]
async fn invalidate_case_forces_the_next_retrieve_to_rebuild() {
    let (engine, _, _) = seeded_engine();
    let request = RetrieveRequest::scoped(case_key(), Scope::Standard);

    engine.retrieve(request.clone()).await.unwrap();
    let removed = engine.invalidate_case(&case_key()).unwrap();
    assert_eq!(removed, 1);

    let rebuilt = engine.retrieve(request).await.unwrap();
    assert!(!rebuilt.cached);
}

#[tokio::test]
async fn scoped_invalidate_only_touches_that_dimension_set() {
    let (engine, _, _) = seeded_engine();
    engine.retrieve(RetrieveRequest::scoped(case_key(), Scope::Minimal)).await.unwrap();
    engine.retrieve(RetrieveRequest::scoped(case_key(), Scope::Standard)).await.unwrap();

    let removed = engine.invalidate(&case_key(), Some(Scope::Minimal)).unwrap();
    assert_eq!(removed, 1);

    let standard = engine.retrieve(RetrieveRequest::scoped(case_key(), Scope::Standard)).await.unwrap();
    assert!(standard.cached, "the standard entry survived");
    let minimal = engine.retrieve(RetrieveRequest::scoped(case_key(), Scope::Minimal)).await.unwrap();
    assert!(!minimal.cached, "the minimal entry was dropped");
}

#[tokio::test]
async fn scope_and_equivalent_explicit_set_share_one_cache_entry() {
    let (engine, transport, _) = seeded_engine();

    engine.retrieve(RetrieveRequest::scoped(case_key(), Scope::Standard)).await.unwrap();
    let calls_after_build = transport.total_calls();

    let explicit = engine
        .retrieve(RetrieveRequest {
            case_key: case_key(),
            scope: None,
            include_dimensions: Some(vec![
                "when".into(),
                "where".into(),
                "what".into(),
                "who".into(),
            ]),
            use_cache: true,
        })
        .await
        .unwrap();

    assert!(explicit.cached, "equivalent explicit set must hit the scope's entry");
    assert_eq!(transport.total_calls(), calls_after_build);
}

#[tokio::test]
async fn single_dimension_request_scores_its_own_completeness() {
    let (engine, _, _) = seeded_engine();

    let (name, record) = engine.retrieve_dimension(case_key(), "who").await.unwrap();
    assert_eq!(name, DimensionName::Who);
    assert_eq!(record.dimensions.len(), 1);
    match &record.dimensions[&DimensionName::Who] {
        DimensionOutcome::Present(data) => {
            assert_eq!(record.context_score, data.completeness);
        }
        other => panic!("expected WHO present, got {other:?}"),
    }
}

#[tokio::test]
async fn uncached_request_bypasses_read_and_write() {
    let (engine, _, _) = seeded_engine();
    let mut request = RetrieveRequest::scoped(case_key(), Scope::Minimal);
    request.use_cache = false;

    let first = engine.retrieve(request.clone()).await.unwrap();
    let second = engine.retrieve(request).await.unwrap();
    assert!(!first.cached);
    assert!(!second.cached, "use_cache=false never serves from cache");
    assert_eq!(engine.cache_stats().tiers[0].stats.sets, 0);
}

#[tokio::test]
async fn batch_retrieve_reports_per_case_outcomes() {
    let (engine, _, store) = seeded_engine();
    let other = CaseKey::new("C1", "K2");
    seed_full_store(&store, &other);
    // K2's graph data comes back empty (unrouted kinds), which is fine —
    // the point is per-case success/failure accounting.

    let outcome = engine
        .batch_retrieve(
            "C1",
            &["K1".to_string(), "K2".to_string(), "MISSING".to_string()],
            Scope::Minimal,
        )
        .await
        .unwrap();

    assert_eq!(outcome.total, 3);
    assert_eq!(outcome.successful, 2);
    assert_eq!(outcome.failed, 1);
    assert!(outcome.errors.contains_key("MISSING"));
    assert_eq!(outcome.contexts.len(), 2);
}

#[tokio::test]
async fn batch_above_the_cap_is_rejected_before_any_fanout() {
    let (engine, transport, _) = seeded_engine();
    let case_ids: Vec<String> = (0..51).map(|i| format!("K{i}")).collect();

    let err = engine.batch_retrieve("C1", &case_ids, Scope::Minimal).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test]
async fn warmup_then_retrieve_hits_for_every_successful_case() {
    let (engine, _, store) = seeded_engine();
    let other = CaseKey::new("C1", "K2");
    seed_full_store(&store, &other);

    let outcome =
        engine.warmup("C1", &["K1".to_string(), "K2".to_string()], Scope::Standard).await.unwrap();
    assert_eq!(outcome.successful, 2);

    for case_id in ["K1", "K2"] {
        let record = engine
            .retrieve(RetrieveRequest::scoped(CaseKey::new("C1", case_id), Scope::Standard))
            .await
            .unwrap();
        assert!(record.cached, "warmup should have populated {case_id}");
    }
}

#[tokio::test]
async fn minimal_scope_builds_only_its_dimensions() {
    let (engine, transport, _) = seeded_engine();

    let record =
        engine.retrieve(RetrieveRequest::scoped(case_key(), Scope::Minimal)).await.unwrap();

    assert_eq!(record.dimensions.len(), 2);
    assert!(record.dimensions.contains_key(&DimensionName::Who));
    assert!(record.dimensions.contains_key(&DimensionName::Where));
    // WHAT/WHEN/WHY analyzers never ran: no issue/citation/strategy calls.
    assert_eq!(transport.calls_for("/api/v1/entities:LEGAL_ISSUE"), 0);
    assert_eq!(transport.calls_for("/api/v1/query"), 0);
    assert_eq!(transport.calls_for("/api/v1/research"), 0);
}

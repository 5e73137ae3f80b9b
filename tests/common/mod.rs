//! Shared fixtures: a scriptable graph transport with call accounting, a
//! fully-seeded case, and an engine wired for fast test turnaround.

// Each test binary uses a different slice of these helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};

use context_engine::{
    CaseEvent, CaseKey, CaseMetadata, CaseStatus, CircuitBreaker, ContextEngine, EngineConfig,
    EventKind, GraphClient, GraphRequest, GraphTransport, InstantSleeper, MemoryCaseStore,
    TransportError,
};

/// Routes requests by path (refined with the `entity_type` body field),
/// counts every call, and can delay responses to widen race windows.
pub struct MockGraphTransport {
    routes: Mutex<HashMap<String, Result<Value, TransportError>>>,
    calls: Mutex<Vec<String>>,
    total: AtomicUsize,
    delay: Mutex<Duration>,
}

impl MockGraphTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            total: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn route(&self, key: &str, outcome: Result<Value, TransportError>) {
        self.routes.lock().unwrap().insert(key.to_string(), outcome);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|k| k.as_str() == key).count()
    }

    fn key_for(request: &GraphRequest) -> String {
        let entity_type = request
            .body
            .as_ref()
            .and_then(|b| b.get("entity_type"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        match entity_type {
            Some(kind) => format!("{}:{kind}", request.path),
            None => request.path.to_string(),
        }
    }
}

#[async_trait]
impl GraphTransport for MockGraphTransport {
    async fn execute(&self, request: GraphRequest) -> Result<Value, TransportError> {
        let key = Self::key_for(&request);
        self.calls.lock().unwrap().push(key.clone());
        self.total.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let routes = self.routes.lock().unwrap();
        routes.get(&key).cloned().unwrap_or_else(|| Ok(json!({})))
    }

    fn endpoint(&self) -> &str {
        "mock://graph"
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        build_overall_deadline: Duration::from_secs(5),
        metadata_fetch_timeout: Duration::from_secs(1),
        scoring_budget: Duration::from_millis(50),
        memory_cache_capacity: 100,
        graph_timeout: Duration::from_secs(2),
        graph_max_retries: 1,
        graph_retry_base: Duration::from_millis(1),
        breaker_failure_threshold: 50,
        ..EngineConfig::default()
    }
}

pub fn engine_with(
    config: EngineConfig,
    transport: Arc<MockGraphTransport>,
    store: Arc<MemoryCaseStore>,
) -> Arc<ContextEngine> {
    let breaker = CircuitBreaker::new(
        config.breaker_failure_threshold,
        config.breaker_open_duration,
    );
    let graph = Arc::new(
        GraphClient::new(
            transport,
            breaker,
            config.graph_timeout,
            config.graph_max_retries,
            config.graph_retry_base,
        )
        .with_sleeper(InstantSleeper),
    );
    Arc::new(ContextEngine::new(config, graph, store))
}

pub fn case_key() -> CaseKey {
    CaseKey::new("C1", "K1")
}

fn entity(id: &str, kind: &str, confidence: f64) -> Value {
    json!({"id": id, "case_id": "K1", "kind": kind, "name": id, "confidence": confidence})
}

fn entities(prefix: &str, kind: &str, n: usize) -> Value {
    let list: Vec<Value> =
        (0..n).map(|i| entity(&format!("{prefix}{i}"), kind, 0.9)).collect();
    json!({"entities": list})
}

/// Script every graph route so all five dimensions come back with
/// completeness 1.0.
pub fn seed_full_graph(transport: &MockGraphTransport) {
    transport.route(
        "/api/v1/entities:PARTY",
        Ok(json!({"entities": [entity("p1", "PARTY", 0.9), entity("p2", "PARTY", 0.9)]})),
    );
    transport.route("/api/v1/entities:JUDGE", Ok(entities("j", "JUDGE", 1)));
    transport.route("/api/v1/entities:ATTORNEY", Ok(entities("a", "ATTORNEY", 2)));
    transport.route("/api/v1/entities:WITNESS", Ok(entities("w", "WITNESS", 2)));
    transport.route(
        "/api/v1/relationships",
        Ok(json!({"relationships": [
            {"id": "r1", "kind": "REPRESENTS", "source_id": "a0", "target_id": "p1", "case_id": "K1", "confidence": 0.9},
            {"id": "r2", "kind": "REPRESENTS", "source_id": "a1", "target_id": "p2", "case_id": "K1", "confidence": 0.9},
        ]})),
    );

    transport.route("/api/v1/entities:LEGAL_ISSUE", Ok(entities("i", "LEGAL_ISSUE", 3)));
    transport.route("/api/v1/entities:CAUSE_OF_ACTION", Ok(entities("c", "CAUSE_OF_ACTION", 2)));
    transport.route("/api/v1/entities:STATUTE_CITATION", Ok(entities("s", "STATUTE_CITATION", 6)));
    transport.route("/api/v1/entities:CASE_CITATION", Ok(entities("cc", "CASE_CITATION", 4)));
    transport.route("/api/v1/entities:LEGAL_DOCTRINE", Ok(entities("d", "LEGAL_DOCTRINE", 1)));

    transport.route(
        "/api/v1/query",
        Ok(json!({
            "entities": [
                entity("t1", "LEGAL_THEORY", 0.85),
                entity("t2", "LEGAL_THEORY", 0.8),
            ],
            "facts": {
                "risks": ["limitations defense"],
                "mitigations": ["equitable tolling"],
                "judge_patterns": ["rarely grants early dismissal"],
            },
        })),
    );
    let precedents: Vec<Value> =
        (0..10).map(|i| entity(&format!("pre{i}"), "CASE_CITATION", 0.75)).collect();
    transport.route(
        "/api/v1/research",
        Ok(json!({
            "entities": precedents,
            "facts": {"similar_outcomes": ["settlement", "plaintiff verdict"]},
        })),
    );

    transport.route("/api/v1/health", Ok(json!({"status": "ok"})));
}

/// Seed the case store so WHERE and WHEN score 1.0.
pub fn seed_full_store(store: &MemoryCaseStore, key: &CaseKey) {
    let now = Utc::now();
    store.insert_case(
        key.clone(),
        CaseMetadata {
            status: CaseStatus::Active,
            title: Some("Smith v. Jones".into()),
            filing_date: Some(now - ChronoDuration::days(90)),
            jurisdiction: Some("N.D. Cal.".into()),
            court: Some("U.S. District Court".into()),
            venue: Some("San Francisco".into()),
        },
    );

    let mut events: Vec<CaseEvent> = (0..10)
        .map(|i| CaseEvent {
            id: format!("e{i}"),
            title: format!("hearing {i}"),
            at: now - ChronoDuration::days(60 - i),
            kind: EventKind::Hearing,
        })
        .collect();
    for i in 0..5 {
        events.push(CaseEvent {
            id: format!("dl{i}"),
            title: format!("deadline {i}"),
            at: now + ChronoDuration::days(7 + i),
            kind: EventKind::Deadline,
        });
    }
    store.add_events(key, events);
}

/// An engine over a fully-seeded world: every dimension scores 1.0.
pub fn seeded_engine() -> (Arc<ContextEngine>, Arc<MockGraphTransport>, Arc<MemoryCaseStore>) {
    let transport = MockGraphTransport::new();
    seed_full_graph(&transport);
    let store = Arc::new(MemoryCaseStore::new());
    seed_full_store(&store, &case_key());
    let engine = engine_with(test_config(), Arc::clone(&transport), Arc::clone(&store));
    (engine, transport, store)
}

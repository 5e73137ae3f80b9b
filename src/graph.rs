//! Case-scoped knowledge-graph client.
//!
//! The only way the engine talks to the GraphRAG upstream. Responsibilities:
//! case-isolation enforcement before any I/O leaves the process, retry of
//! transient faults, circuit breaking per endpoint, and verification that
//! responses stay inside the requesting case.
//!
//! Composition order is retry → breaker → transport: every attempt passes
//! through the breaker, and a breaker-open outcome is never retried.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::breaker::{BreakerError, CircuitBreaker};
use crate::deadline::Deadline;
use crate::error::EngineError;
use crate::model::{CaseKey, Entity, EntityKind, Relationship};
use crate::retry::{RetryError, RetryPolicy};

/// Transport-level fault classification. The retry predicate keys off
/// `is_transient`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response payload: {0}")]
    Decode(String),
    #[error("request budget exhausted before dispatch")]
    BudgetExhausted,
}

impl TransportError {
    /// Transient: transport timeout, connection refused, 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connect(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Decode(_) | Self::BudgetExhausted => false,
        }
    }
}

/// One request to the graph service. `body: None` issues a GET.
#[derive(Debug, Clone)]
pub struct GraphRequest {
    pub path: &'static str,
    pub body: Option<Value>,
    pub timeout: Duration,
}

/// The transport seam. Production uses HTTP; tests script responses.
#[async_trait]
pub trait GraphTransport: Send + Sync {
    async fn execute(&self, request: GraphRequest) -> Result<Value, TransportError>;

    /// Base URL (or other identity) for breaker keying and diagnostics.
    fn endpoint(&self) -> &str;
}

/// HTTP transport over reqwest.
#[derive(Debug, Clone)]
pub struct HttpGraphTransport {
    base: String,
    client: reqwest::Client,
}

impl HttpGraphTransport {
    pub fn new(base: impl Into<String>) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| EngineError::Internal(format!("http client construction failed: {e}")))?;
        Ok(Self { base: base.into().trim_end_matches('/').to_string(), client })
    }
}

#[async_trait]
impl GraphTransport for HttpGraphTransport {
    async fn execute(&self, request: GraphRequest) -> Result<Value, TransportError> {
        let url = format!("{}{}", self.base, request.path);
        let builder = match &request.body {
            Some(body) => self.client.post(&url).json(body),
            None => self.client.get(&url),
        };
        let response = builder.timeout(request.timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(request.timeout)
            } else {
                TransportError::Connect(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Connect(format!("reading response body: {e}")))?;
        if !status.is_success() {
            return Err(TransportError::Status { status: status.as_u16(), body: text });
        }
        serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
    }

    fn endpoint(&self) -> &str {
        &self.base
    }
}

/// Search mode for case-scoped queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchType {
    Local,
    Global,
    Hybrid,
}

/// Cross-case research is restricted to the global modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResearchMode {
    Global,
    Hybrid,
}

/// Result of a graph query after case-scope verification. `warnings` carries
/// data-quality tags (entities the upstream failed to stamp with a case id).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub facts: Map<String, Value>,
    pub warnings: Vec<String>,
}

/// Upstream health as reported by the graph service.
#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
pub struct UpstreamHealth {
    pub status: String,
}

/// Failures surfaced by the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Client bug: a case-scoped call without a case id. Never retried.
    #[error("case_id is required for case-scoped graph queries")]
    MissingCaseId,
    #[error("client_id is required for graph queries")]
    MissingClientId,
    /// Breaker open or retries exhausted.
    #[error("graph upstream unavailable: {detail}")]
    Unavailable { detail: String },
    /// 4xx from upstream.
    #[error("graph upstream rejected the request ({status}): {detail}")]
    Rejected { status: u16, detail: String },
    /// 2xx with an undecodable payload.
    #[error("graph response could not be decoded: {0}")]
    Protocol(String),
    #[error("deadline exceeded before the graph call completed")]
    DeadlineExceeded,
}

impl From<GraphError> for EngineError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::MissingCaseId => EngineError::MissingCaseId,
            GraphError::MissingClientId => {
                EngineError::Validation("client_id must not be empty".into())
            }
            GraphError::Unavailable { detail } => EngineError::UpstreamUnavailable { detail },
            GraphError::Rejected { status, detail } => {
                EngineError::UpstreamRejected { status, detail }
            }
            GraphError::Protocol(detail) => {
                EngineError::Internal(format!("graph protocol error: {detail}"))
            }
            GraphError::DeadlineExceeded => EngineError::DeadlineExceeded { elapsed_ms: 0 },
        }
    }
}

#[derive(Deserialize, Default)]
struct RawQueryResponse {
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default)]
    relationships: Vec<Relationship>,
    #[serde(default)]
    facts: Map<String, Value>,
}

#[derive(Deserialize, Default)]
struct RawEntityList {
    #[serde(default)]
    entities: Vec<Entity>,
}

#[derive(Deserialize, Default)]
struct RawRelationshipList {
    #[serde(default)]
    relationships: Vec<Relationship>,
}

/// Case-scoped client for the knowledge-graph service.
pub struct GraphClient {
    transport: Arc<dyn GraphTransport>,
    breaker: CircuitBreaker,
    retry: RetryPolicy<BreakerError<TransportError>>,
    request_timeout: Duration,
}

impl fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphClient")
            .field("endpoint", &self.transport.endpoint())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl GraphClient {
    pub fn new(
        transport: Arc<dyn GraphTransport>,
        breaker: CircuitBreaker,
        request_timeout: Duration,
        max_retries: u32,
        retry_base: Duration,
    ) -> Self {
        let retry = RetryPolicy::new(max_retries, retry_base)
            .should_retry(|e: &BreakerError<TransportError>| {
                matches!(e, BreakerError::Inner(t) if t.is_transient())
            });
        Self { transport, breaker, retry, request_timeout }
    }

    /// Swap the retry sleeper; tests use this to run without real delays.
    pub fn with_sleeper<S: crate::retry::Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.retry = self.retry.with_sleeper(sleeper);
        self
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn call(
        &self,
        path: &'static str,
        body: Option<Value>,
        deadline: Deadline,
    ) -> Result<Value, GraphError> {
        // Per-request budget: independent of, but never beyond, the caller's
        // deadline. Retries spend from the same budget.
        let op_deadline = deadline.cap(self.request_timeout);

        let result = self
            .retry
            .execute(|| {
                let transport = Arc::clone(&self.transport);
                let breaker = self.breaker.clone();
                let request = GraphRequest {
                    path,
                    body: body.clone(),
                    timeout: op_deadline.remaining(),
                };
                async move {
                    if request.timeout.is_zero() {
                        return Err(BreakerError::Inner(TransportError::BudgetExhausted));
                    }
                    breaker.execute(|| transport.execute(request)).await
                }
            })
            .await;

        result.map_err(|e| self.classify(e, deadline))
    }

    fn classify(
        &self,
        err: RetryError<BreakerError<TransportError>>,
        deadline: Deadline,
    ) -> GraphError {
        match err {
            RetryError::Aborted(BreakerError::Open { failure_count, .. }) => {
                GraphError::Unavailable {
                    detail: format!(
                        "circuit breaker open for {} after {failure_count} consecutive failures",
                        self.transport.endpoint()
                    ),
                }
            }
            RetryError::Exhausted { attempts, last } => match last {
                BreakerError::Open { .. } => GraphError::Unavailable {
                    detail: format!("circuit breaker open for {}", self.transport.endpoint()),
                },
                BreakerError::Inner(t) => GraphError::Unavailable {
                    detail: format!("retries exhausted after {attempts} attempts: {t}"),
                },
            },
            RetryError::Aborted(BreakerError::Inner(t)) => match t {
                TransportError::Status { status, body } if (400..500).contains(&status) => {
                    GraphError::Rejected { status, detail: body }
                }
                TransportError::Decode(m) => GraphError::Protocol(m),
                TransportError::BudgetExhausted => {
                    if deadline.expired() {
                        GraphError::DeadlineExceeded
                    } else {
                        GraphError::Unavailable { detail: "request budget exhausted".into() }
                    }
                }
                other => GraphError::Unavailable { detail: other.to_string() },
            },
        }
    }

    /// Drop entities tagged with a foreign case and tag untagged ones as
    /// data-quality warnings. Relationships get the same treatment minus the
    /// warning channel.
    fn enforce_case_scope(
        key: &CaseKey,
        entities: Vec<Entity>,
        warnings: &mut Vec<String>,
    ) -> Vec<Entity> {
        entities
            .into_iter()
            .filter(|entity| match entity.case_id.as_deref() {
                Some(case_id) if case_id == key.case_id => true,
                Some(other) => {
                    tracing::warn!(
                        entity_id = %entity.id,
                        expected = %key.case_id,
                        actual = %other,
                        "dropping entity from a foreign case"
                    );
                    false
                }
                None => {
                    tracing::warn!(entity_id = %entity.id, case_id = %key.case_id, "entity missing case id");
                    warnings.push(format!("entity {} has no case id", entity.id));
                    true
                }
            })
            .collect()
    }

    fn scope_relationships(key: &CaseKey, relationships: Vec<Relationship>) -> Vec<Relationship> {
        relationships
            .into_iter()
            .filter(|rel| match rel.case_id.as_deref() {
                Some(case_id) if case_id != key.case_id => {
                    tracing::warn!(relationship_id = %rel.id, "dropping relationship from a foreign case");
                    false
                }
                _ => true,
            })
            .collect()
    }

    /// Case-scoped query. Fails with `MissingCaseId` before any I/O when the
    /// key has no case id.
    pub async fn query_case(
        &self,
        key: &CaseKey,
        query_text: &str,
        search_type: SearchType,
        result_limit: usize,
        deadline: Deadline,
    ) -> Result<QueryResult, GraphError> {
        Self::require_case(key)?;
        let body = json!({
            "client_id": key.client_id,
            "case_id": key.case_id,
            "query": query_text,
            "search_type": search_type,
            "limit": result_limit,
        });
        let value = self.call("/api/v1/query", Some(body), deadline).await?;
        let raw: RawQueryResponse =
            serde_json::from_value(value).map_err(|e| GraphError::Protocol(e.to_string()))?;

        let mut warnings = Vec::new();
        let entities = Self::enforce_case_scope(key, raw.entities, &mut warnings);
        let relationships = Self::scope_relationships(key, raw.relationships);
        Ok(QueryResult { entities, relationships, facts: raw.facts, warnings })
    }

    pub async fn list_case_entities(
        &self,
        key: &CaseKey,
        entity_type: Option<EntityKind>,
        min_confidence: Option<f64>,
        limit: usize,
        deadline: Deadline,
    ) -> Result<Vec<Entity>, GraphError> {
        Self::require_case(key)?;
        let body = json!({
            "client_id": key.client_id,
            "case_id": key.case_id,
            "entity_type": entity_type,
            "min_confidence": min_confidence,
            "limit": limit,
        });
        let value = self.call("/api/v1/entities", Some(body), deadline).await?;
        let raw: RawEntityList =
            serde_json::from_value(value).map_err(|e| GraphError::Protocol(e.to_string()))?;
        let mut warnings = Vec::new();
        Ok(Self::enforce_case_scope(key, raw.entities, &mut warnings))
    }

    pub async fn list_case_relationships(
        &self,
        key: &CaseKey,
        relationship_type: Option<&str>,
        min_confidence: Option<f64>,
        deadline: Deadline,
    ) -> Result<Vec<Relationship>, GraphError> {
        Self::require_case(key)?;
        let body = json!({
            "client_id": key.client_id,
            "case_id": key.case_id,
            "relationship_type": relationship_type,
            "min_confidence": min_confidence,
        });
        let value = self.call("/api/v1/relationships", Some(body), deadline).await?;
        let raw: RawRelationshipList =
            serde_json::from_value(value).map_err(|e| GraphError::Protocol(e.to_string()))?;
        Ok(Self::scope_relationships(key, raw.relationships))
    }

    /// Cross-case research. Requires a client id only; results are tagged
    /// with the querying case id before they leave the client.
    pub async fn research(
        &self,
        key: &CaseKey,
        query_text: &str,
        jurisdiction: Option<&str>,
        mode: ResearchMode,
        deadline: Deadline,
    ) -> Result<QueryResult, GraphError> {
        if key.client_id.trim().is_empty() {
            return Err(GraphError::MissingClientId);
        }
        let body = json!({
            "client_id": key.client_id,
            "query": query_text,
            "jurisdiction": jurisdiction,
            "search_type": mode,
        });
        let value = self.call("/api/v1/research", Some(body), deadline).await?;
        let raw: RawQueryResponse =
            serde_json::from_value(value).map_err(|e| GraphError::Protocol(e.to_string()))?;

        let tag = (!key.case_id.trim().is_empty()).then(|| key.case_id.clone());
        let entities = raw
            .entities
            .into_iter()
            .map(|mut entity| {
                if let Some(tag) = &tag {
                    entity.case_id = Some(tag.clone());
                }
                entity
            })
            .collect();
        Ok(QueryResult {
            entities,
            relationships: raw.relationships,
            facts: raw.facts,
            warnings: Vec::new(),
        })
    }

    /// Upstream liveness probe. Bypasses retry so a slow upstream does not
    /// stall the health endpoint.
    pub async fn health(&self, deadline: Deadline) -> Result<UpstreamHealth, GraphError> {
        let timeout = deadline.cap(self.request_timeout).remaining();
        if timeout.is_zero() {
            return Err(GraphError::DeadlineExceeded);
        }
        let request = GraphRequest { path: "/api/v1/health", body: None, timeout };
        let value = self
            .transport
            .execute(request)
            .await
            .map_err(|e| GraphError::Unavailable { detail: e.to_string() })?;
        serde_json::from_value(value).map_err(|e| GraphError::Protocol(e.to_string()))
    }

    fn require_case(key: &CaseKey) -> Result<(), GraphError> {
        if key.client_id.trim().is_empty() {
            return Err(GraphError::MissingClientId);
        }
        if key.case_id.trim().is_empty() {
            return Err(GraphError::MissingCaseId);
        }
        Ok(())
    }
}

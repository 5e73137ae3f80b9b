//! HTTP surface. Thin adapters only: parse, call the engine, shape the
//! envelope, map errors to status codes. Unknown request fields are ignored.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::engine::{BatchOutcome, ContextEngine, RetrieveRequest};
use crate::error::EngineError;
use crate::model::{CaseKey, ContextRecord, DimensionName, DimensionOutcome, Scope};

pub fn router(engine: Arc<ContextEngine>) -> Router {
    let api = Router::new()
        .route("/context/retrieve", post(retrieve_post).get(retrieve_get))
        .route("/context/dimension/retrieve", post(dimension_retrieve))
        .route("/context/refresh", post(refresh))
        .route("/context/batch/retrieve", post(batch_retrieve))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/invalidate", delete(invalidate))
        .route("/cache/invalidate/case", post(invalidate_case))
        .route("/cache/warmup", post(warmup))
        .route("/health", get(health));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health))
        .with_state(engine)
}

// ---------------------------------------------------------------------------
// Error mapping

enum ApiError {
    Engine(EngineError),
    /// The request body did not match the expected shape (422, distinct
    /// from the 400 used for semantic validation).
    Shape(String),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = match self {
            ApiError::Shape(detail) => {
                let body = json!({ "detail": detail, "error_code": "shape_validation" });
                return (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response();
            }
            ApiError::Engine(error) => error,
        };
        let status = match &error {
            EngineError::Validation(_) | EngineError::MissingCaseId => StatusCode::BAD_REQUEST,
            EngineError::CaseNotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
            EngineError::UpstreamUnavailable { .. } | EngineError::BuildCancelled => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            EngineError::UpstreamRejected { .. } | EngineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let mut body = json!({
            "detail": match &error {
                EngineError::CaseNotFound { .. } => "Case not found".to_string(),
                other => other.to_string(),
            },
            "error_code": error.code(),
        });
        if let EngineError::CaseNotFound { case_id } = &error {
            body["case_id"] = json!(case_id);
        }
        if status.is_server_error() {
            tracing::error!(%error, status = status.as_u16(), "request failed");
        }
        (status, Json(body)).into_response()
    }
}

fn parse_scope(scope: Option<&str>) -> Result<Option<Scope>, ApiError> {
    scope.map(|s| s.parse::<Scope>()).transpose().map_err(ApiError::Engine)
}

/// `Json<T>` with this service's error envelope: a body that fails to
/// deserialize comes back as a 422 `{"detail", "error_code"}` response (or
/// 400 for non-shape failures such as invalid JSON syntax) instead of
/// axum's default rejection.
struct Body<T>(T);

#[async_trait]
impl<S, T> FromRequest<S> for Body<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Body(value)),
            Err(JsonRejection::JsonDataError(e)) => Err(ApiError::Shape(e.body_text())),
            Err(other) => Err(ApiError::Engine(EngineError::Validation(other.body_text()))),
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope

#[derive(Debug, Serialize)]
struct ContextEnvelope {
    query_id: Uuid,
    case_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    case_name: Option<String>,
    who: Value,
    what: Value,
    r#where: Value,
    when: Value,
    why: Value,
    context_score: f64,
    is_complete: bool,
    cached: bool,
    execution_time_ms: u64,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<BTreeMap<String, String>>,
}

impl ContextEnvelope {
    /// Dimensions outside the effective set — and failed ones — render null.
    fn from_record(record: &ContextRecord, execution_time_ms: u64) -> Self {
        let payload = |name: DimensionName| -> Value {
            match record.dimensions.get(&name) {
                Some(DimensionOutcome::Present(data)) => {
                    serde_json::to_value(data).unwrap_or(Value::Null)
                }
                _ => Value::Null,
            }
        };
        let failures = record.failures();
        let errors = (!failures.is_empty())
            .then(|| failures.into_iter().map(|(k, v)| (k.as_str().to_string(), v)).collect());
        Self {
            query_id: Uuid::new_v4(),
            case_id: record.case_key.case_id.clone(),
            case_name: record.case_name.clone(),
            who: payload(DimensionName::Who),
            what: payload(DimensionName::What),
            r#where: payload(DimensionName::Where),
            when: payload(DimensionName::When),
            why: payload(DimensionName::Why),
            context_score: record.context_score,
            is_complete: record.is_complete,
            cached: record.cached,
            execution_time_ms,
            timestamp: Utc::now(),
            errors,
        }
    }
}

// ---------------------------------------------------------------------------
// Request shapes

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RetrieveBody {
    client_id: String,
    case_id: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    include_dimensions: Option<Vec<String>>,
    #[serde(default = "default_true")]
    use_cache: bool,
}

#[derive(Debug, Deserialize)]
struct RetrieveQuery {
    client_id: String,
    case_id: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default = "default_true")]
    use_cache: bool,
}

#[derive(Debug, Deserialize)]
struct DimensionBody {
    client_id: String,
    case_id: String,
    dimension: String,
}

#[derive(Debug, Deserialize)]
struct RefreshBody {
    client_id: String,
    case_id: String,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchBody {
    client_id: String,
    case_ids: Vec<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CaseQuery {
    client_id: String,
    case_id: String,
    #[serde(default)]
    scope: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers

async fn run_retrieve(
    engine: &ContextEngine,
    request: RetrieveRequest,
) -> Result<Json<ContextEnvelope>, ApiError> {
    let started = std::time::Instant::now();
    let record = engine.retrieve(request).await?;
    let elapsed = started.elapsed().as_millis().max(1) as u64;
    Ok(Json(ContextEnvelope::from_record(&record, elapsed)))
}

async fn retrieve_post(
    State(engine): State<Arc<ContextEngine>>,
    Body(body): Body<RetrieveBody>,
) -> Result<Json<ContextEnvelope>, ApiError> {
    let scope = parse_scope(body.scope.as_deref())?;
    let request = RetrieveRequest {
        case_key: CaseKey::new(body.client_id, body.case_id),
        scope,
        include_dimensions: body.include_dimensions,
        use_cache: body.use_cache,
    };
    run_retrieve(&engine, request).await
}

async fn retrieve_get(
    State(engine): State<Arc<ContextEngine>>,
    Query(query): Query<RetrieveQuery>,
) -> Result<Json<ContextEnvelope>, ApiError> {
    let scope = parse_scope(query.scope.as_deref())?;
    let request = RetrieveRequest {
        case_key: CaseKey::new(query.client_id, query.case_id),
        scope,
        include_dimensions: None,
        use_cache: query.use_cache,
    };
    run_retrieve(&engine, request).await
}

async fn dimension_retrieve(
    State(engine): State<Arc<ContextEngine>>,
    Body(body): Body<DimensionBody>,
) -> Result<Json<Value>, ApiError> {
    let case_key = CaseKey::new(body.client_id, body.case_id);
    let (name, record) = engine.retrieve_dimension(case_key, &body.dimension).await?;
    let data = match record.dimensions.get(&name) {
        Some(DimensionOutcome::Present(data)) => serde_json::to_value(data).unwrap_or(Value::Null),
        _ => Value::Null,
    };
    Ok(Json(json!({
        "case_id": record.case_key.case_id,
        "dimension": name.as_str(),
        "data": data,
    })))
}

async fn refresh(
    State(engine): State<Arc<ContextEngine>>,
    Body(body): Body<RefreshBody>,
) -> Result<Json<ContextEnvelope>, ApiError> {
    let scope = parse_scope(body.scope.as_deref())?;
    let started = std::time::Instant::now();
    let record = engine.refresh(CaseKey::new(body.client_id, body.case_id), scope).await?;
    let elapsed = started.elapsed().as_millis().max(1) as u64;
    Ok(Json(ContextEnvelope::from_record(&record, elapsed)))
}

#[derive(Debug, Serialize)]
struct BatchResponse {
    total: usize,
    successful: usize,
    failed: usize,
    contexts: Vec<ContextEnvelope>,
    errors: BTreeMap<String, String>,
}

impl BatchResponse {
    fn from_outcome(outcome: BatchOutcome, elapsed_ms: u64) -> Self {
        let contexts = outcome
            .contexts
            .iter()
            .map(|record| ContextEnvelope::from_record(record, elapsed_ms))
            .collect();
        Self {
            total: outcome.total,
            successful: outcome.successful,
            failed: outcome.failed,
            contexts,
            errors: outcome.errors,
        }
    }
}

async fn batch_retrieve(
    State(engine): State<Arc<ContextEngine>>,
    Body(body): Body<BatchBody>,
) -> Result<Json<BatchResponse>, ApiError> {
    let scope = parse_scope(body.scope.as_deref())?.unwrap_or(Scope::Standard);
    let started = std::time::Instant::now();
    let outcome = engine.batch_retrieve(&body.client_id, &body.case_ids, scope).await?;
    let elapsed = started.elapsed().as_millis().max(1) as u64;
    Ok(Json(BatchResponse::from_outcome(outcome, elapsed)))
}

async fn warmup(
    State(engine): State<Arc<ContextEngine>>,
    Body(body): Body<BatchBody>,
) -> Result<Json<Value>, ApiError> {
    let scope = parse_scope(body.scope.as_deref())?.unwrap_or(Scope::Standard);
    let outcome = engine.warmup(&body.client_id, &body.case_ids, scope).await?;
    Ok(Json(json!({
        "successful": outcome.successful,
        "failed": outcome.failed,
    })))
}

async fn cache_stats(State(engine): State<Arc<ContextEngine>>) -> Json<Value> {
    Json(serde_json::to_value(engine.cache_stats()).unwrap_or(Value::Null))
}

async fn invalidate(
    State(engine): State<Arc<ContextEngine>>,
    Query(query): Query<CaseQuery>,
) -> Result<Json<Value>, ApiError> {
    let scope = parse_scope(query.scope.as_deref())?;
    let removed =
        engine.invalidate(&CaseKey::new(query.client_id, query.case_id), scope)?;
    Ok(Json(json!({ "removed": removed })))
}

async fn invalidate_case(
    State(engine): State<Arc<ContextEngine>>,
    Query(query): Query<CaseQuery>,
) -> Result<Json<Value>, ApiError> {
    let removed = engine.invalidate_case(&CaseKey::new(query.client_id, query.case_id))?;
    Ok(Json(json!({ "removed": removed })))
}

async fn health(State(engine): State<Arc<ContextEngine>>) -> Json<Value> {
    Json(serde_json::to_value(engine.health().await).unwrap_or(json!({"status": "unknown"})))
}

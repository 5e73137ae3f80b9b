//! Service facade: the public entry points over the cache and the builder.
//!
//! One engine per process, constructed at startup and shared behind an
//! `Arc`. Handlers call these methods; nothing below this layer knows HTTP.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::breaker::CircuitState;
use crate::builder::ContextBuilder;
use crate::cache::{
    await_leader, CacheKey, CacheManager, CacheStatsSnapshot, CacheTier, FlightRole, MemoryTier,
    NullTier,
};
use crate::config::EngineConfig;
use crate::deadline::Deadline;
use crate::error::EngineError;
use crate::graph::GraphClient;
use crate::model::{CaseKey, ContextRecord, DimSet, DimensionName, Scope};
use crate::store::CaseStore;

/// One retrieval. `include_dimensions` overrides the scope's bundle when
/// non-empty; `use_cache: false` forces a private, uncached build.
#[derive(Debug, Clone)]
pub struct RetrieveRequest {
    pub case_key: CaseKey,
    pub scope: Option<Scope>,
    pub include_dimensions: Option<Vec<String>>,
    pub use_cache: bool,
}

impl RetrieveRequest {
    pub fn scoped(case_key: CaseKey, scope: Scope) -> Self {
        Self { case_key, scope: Some(scope), include_dimensions: None, use_cache: true }
    }
}

/// Outcome summary for warmup and batch operations.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    #[serde(skip)]
    pub contexts: Vec<ContextRecord>,
    pub errors: BTreeMap<String, String>,
}

/// Service health, including the graph upstream and its breaker.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub graph_endpoint: String,
    pub graph_reachable: bool,
    pub breaker_state: CircuitState,
}

pub struct ContextEngine {
    config: EngineConfig,
    cache: CacheManager,
    builder: ContextBuilder,
    graph: Arc<GraphClient>,
    memory_tier: Option<Arc<MemoryTier>>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ContextEngine {
    pub fn new(config: EngineConfig, graph: Arc<GraphClient>, store: Arc<dyn CaseStore>) -> Self {
        let mut tiers: Vec<Arc<dyn CacheTier>> = Vec::new();
        let memory_tier = config.enable_memory_cache.then(|| {
            let tier = Arc::new(MemoryTier::new(config.memory_cache_capacity));
            tiers.push(Arc::clone(&tier) as Arc<dyn CacheTier>);
            tier
        });
        if config.enable_persistent_cache {
            tiers.push(Arc::new(NullTier::new()));
        }
        let cache = CacheManager::new(
            tiers,
            config.memory_cache_ttl,
            config.active_case_ttl,
            config.closed_case_ttl,
        );
        let builder = ContextBuilder::new(
            Arc::clone(&graph),
            store,
            config.metadata_fetch_timeout,
            config.scoring_budget,
        )
        .with_dimension_budget(config.per_dimension_deadline);
        Self { config, cache, builder, graph, memory_tier, sweeper: Mutex::new(None) }
    }

    /// Start the background expiry sweep for the memory tier.
    pub fn start_sweeper(&self) {
        if let Some(tier) = &self.memory_tier {
            let handle = Arc::clone(tier).spawn_sweeper(self.config.cache_sweep_interval);
            let mut slot = self.sweeper.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve the effective dimension set and the scope to record. An
    /// explicit non-empty dimension list wins over the scope.
    fn resolve(
        scope: Option<Scope>,
        include_dimensions: Option<&[String]>,
    ) -> Result<(DimSet, Option<Scope>), EngineError> {
        match include_dimensions {
            Some(names) if !names.is_empty() => Ok((DimSet::from_names(names)?, scope)),
            _ => {
                let scope = scope.unwrap_or(Scope::Standard);
                Ok((DimSet::from_scope(scope), Some(scope)))
            }
        }
    }

    pub async fn retrieve(&self, request: RetrieveRequest) -> Result<ContextRecord, EngineError> {
        request.case_key.validate()?;
        let (dims, scope) =
            Self::resolve(request.scope, request.include_dimensions.as_deref())?;
        let deadline = Deadline::from_now(self.config.build_overall_deadline);
        let cache_key = CacheKey::new(&request.case_key, &dims);

        if !request.use_cache {
            let built =
                self.builder.build(&request.case_key, &dims, scope, deadline).await?;
            return Ok(built.record);
        }

        if let Some(hit) = self.cache.lookup(&cache_key) {
            return Ok(hit);
        }

        match self.cache.begin_flight(&cache_key) {
            FlightRole::Leader(guard) => {
                match self.builder.build(&request.case_key, &dims, scope, deadline).await {
                    Ok(built) => {
                        let record = Arc::new(built.record);
                        self.cache.store(
                            &cache_key,
                            Arc::clone(&record),
                            built.case_status,
                            built.build_started,
                        );
                        guard.complete(Ok(Arc::clone(&record)));
                        Ok((*record).clone())
                    }
                    Err(error) => {
                        guard.complete(Err(error.clone()));
                        Err(error)
                    }
                }
            }
            FlightRole::Follower(receiver) => {
                let record = await_leader(receiver, deadline).await?;
                // Followers were served a shared build, not their own.
                let mut shared = (*record).clone();
                shared.cached = true;
                Ok(shared)
            }
        }
    }

    /// Single-dimension retrieval; shares cache keys and single-flight with
    /// the equivalent explicit-set retrieve.
    pub async fn retrieve_dimension(
        &self,
        case_key: CaseKey,
        dimension: &str,
    ) -> Result<(DimensionName, ContextRecord), EngineError> {
        let name = DimensionName::parse(dimension)?;
        let record = self
            .retrieve(RetrieveRequest {
                case_key,
                scope: None,
                include_dimensions: Some(vec![name.as_str().to_string()]),
                use_cache: true,
            })
            .await?;
        Ok((name, record))
    }

    /// Forced miss: drop the entry, rebuild, store, return the fresh record.
    pub async fn refresh(
        &self,
        case_key: CaseKey,
        scope: Option<Scope>,
    ) -> Result<ContextRecord, EngineError> {
        case_key.validate()?;
        let (dims, scope) = Self::resolve(scope, None)?;
        let cache_key = CacheKey::new(&case_key, &dims);
        self.cache.invalidate(&cache_key);

        let deadline = Deadline::from_now(self.config.build_overall_deadline);
        let built = self.builder.build(&case_key, &dims, scope, deadline).await?;
        let record = Arc::new(built.record);
        self.cache.store(&cache_key, Arc::clone(&record), built.case_status, built.build_started);
        Ok((*record).clone())
    }

    /// Remove cache entries for a case; a scope narrows it to one entry.
    pub fn invalidate(&self, case_key: &CaseKey, scope: Option<Scope>) -> Result<usize, EngineError> {
        case_key.validate()?;
        Ok(match scope {
            Some(scope) => {
                let cache_key = CacheKey::new(case_key, &DimSet::from_scope(scope));
                self.cache.invalidate(&cache_key)
            }
            None => self.cache.invalidate_case(case_key),
        })
    }

    /// Case-wide invalidation, used after document ingestion. In-flight
    /// builds that started earlier will not be stored.
    pub fn invalidate_case(&self, case_key: &CaseKey) -> Result<usize, EngineError> {
        case_key.validate()?;
        Ok(self.cache.invalidate_case(case_key))
    }

    /// Fan a scope retrieval across up to `max_batch_size` cases.
    pub async fn batch_retrieve(
        &self,
        client_id: &str,
        case_ids: &[String],
        scope: Scope,
    ) -> Result<BatchOutcome, EngineError> {
        if client_id.trim().is_empty() {
            return Err(EngineError::Validation("client_id must not be empty".into()));
        }
        if case_ids.is_empty() {
            return Err(EngineError::Validation("case_ids must not be empty".into()));
        }
        if case_ids.len() > self.config.max_batch_size {
            return Err(EngineError::Validation(format!(
                "batch size {} exceeds the maximum of {}",
                case_ids.len(),
                self.config.max_batch_size
            )));
        }

        // Concurrent, not spawned: the heavy parallelism lives inside each
        // build's own fan-out, and borrowing `self` keeps this free of
        // lifetime gymnastics.
        let results = futures::future::join_all(case_ids.iter().map(|case_id| {
            let request =
                RetrieveRequest::scoped(CaseKey::new(client_id.to_string(), case_id.clone()), scope);
            self.retrieve(request)
        }))
        .await;

        let mut contexts = Vec::new();
        let mut errors = BTreeMap::new();
        for (case_id, result) in case_ids.iter().zip(results) {
            match result {
                Ok(record) => contexts.push(record),
                Err(error) => {
                    errors.insert(case_id.clone(), error.to_string());
                }
            }
        }
        Ok(BatchOutcome {
            total: case_ids.len(),
            successful: contexts.len(),
            failed: errors.len(),
            contexts,
            errors,
        })
    }

    /// Pre-build and store contexts for a set of cases.
    pub async fn warmup(
        &self,
        client_id: &str,
        case_ids: &[String],
        scope: Scope,
    ) -> Result<BatchOutcome, EngineError> {
        self.batch_retrieve(client_id, case_ids, scope).await
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    pub async fn health(&self) -> HealthReport {
        let deadline = Deadline::from_now(std::time::Duration::from_secs(2));
        let graph_reachable = self.graph.health(deadline).await.is_ok();
        let breaker_state = self.graph.breaker().state();
        let status = if graph_reachable && breaker_state == CircuitState::Closed {
            "ok"
        } else {
            "degraded"
        };
        HealthReport {
            status,
            graph_endpoint: self.graph.endpoint().to_string(),
            graph_reachable,
            breaker_state,
        }
    }
}

impl Drop for ContextEngine {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

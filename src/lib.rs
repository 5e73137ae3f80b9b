#![forbid(unsafe_code)]

//! # Context Engine
//!
//! Case-scoped context assembly for a legal document platform. Given a
//! `(client_id, case_id)` pair and a scope, the engine fans out to a
//! knowledge-graph service and the case store, assembles a five-dimensional
//! context record (WHO, WHAT, WHERE, WHEN, WHY), scores it, and serves it
//! through a multi-tier cache.
//!
//! ## What lives where
//!
//! - **Resilient upstream access**: [`GraphClient`] wraps the knowledge
//!   graph with retry, a per-endpoint circuit breaker, and mandatory
//!   case-isolation enforcement.
//! - **Caching**: an LRU + TTL memory tier behind the [`CacheTier`]
//!   interface, composed read-through/write-through by the `CacheManager`,
//!   with single-flight deduplication of concurrent misses.
//! - **Assembly**: one [`DimensionAnalyzer`] per dimension, orchestrated in
//!   parallel by the `ContextBuilder` under an explicit [`Deadline`].
//! - **Facade**: [`ContextEngine`] exposes retrieve / refresh / invalidate /
//!   warmup / stats; `http` adapts it to an axum router.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use context_engine::{
//!     BreakerRegistry, ContextEngine, EngineConfig, GraphClient, HttpGraphTransport,
//!     MemoryCaseStore, RetrieveRequest, CaseKey, Scope,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default();
//!     let breakers =
//!         BreakerRegistry::new(config.breaker_failure_threshold, config.breaker_open_duration);
//!     let transport = Arc::new(HttpGraphTransport::new(config.graph_endpoint.clone())?);
//!     let graph = Arc::new(GraphClient::new(
//!         transport,
//!         breakers.breaker_for(&config.graph_endpoint),
//!         config.graph_timeout,
//!         config.graph_max_retries,
//!         config.graph_retry_base,
//!     ));
//!     let store = Arc::new(MemoryCaseStore::new());
//!     let engine = Arc::new(ContextEngine::new(config, graph, store));
//!     engine.start_sweeper();
//!
//!     let record = engine
//!         .retrieve(RetrieveRequest::scoped(CaseKey::new("client-1", "case-1"), Scope::Standard))
//!         .await?;
//!     println!("score: {}", record.context_score);
//!     Ok(())
//! }
//! ```

mod breaker;
mod builder;
mod cache;
mod config;
mod deadline;
mod dimensions;
mod error;
mod graph;
mod model;
mod retry;
mod store;

pub mod engine;
pub mod http;

// Re-exports
pub use breaker::{BreakerRegistry, CircuitBreaker, CircuitState, Clock, MonotonicClock};
pub use builder::{BuiltContext, ContextBuilder};
pub use cache::{
    CacheEntry, CacheKey, CacheManager, CacheStatsSnapshot, CacheTier, MemoryTier, NullTier,
    TierKind, TierStats,
};
pub use config::EngineConfig;
pub use deadline::Deadline;
pub use dimensions::{
    DimensionAnalyzer, WhatAnalyzer, WhenAnalyzer, WhereAnalyzer, WhoAnalyzer, WhyAnalyzer,
};
pub use engine::{BatchOutcome, ContextEngine, HealthReport, RetrieveRequest};
pub use error::EngineError;
pub use graph::{
    GraphClient, GraphError, GraphRequest, GraphTransport, HttpGraphTransport, QueryResult,
    ResearchMode, SearchType, TransportError, UpstreamHealth,
};
pub use model::{
    CaseEvent, CaseKey, CaseMetadata, CaseStatus, ContextRecord, DimSet, DimensionData,
    DimensionFailure, DimensionName, DimensionOutcome, Entity, EntityKind, EventKind, Relationship,
    Scope, COMPLETENESS_THRESHOLD,
};
pub use retry::{InstantSleeper, RetryError, RetryPolicy, Sleeper, TokioSleeper, TrackingSleeper};
pub use store::{CaseStore, MemoryCaseStore, StoreError};

//! Context builder: parallel dimension fan-out and quality scoring.
//!
//! A build never fails because a dimension failed — partial results come
//! back with a depressed score. It fails only for invalid input or when the
//! case store positively says the case does not exist.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::deadline::Deadline;
use crate::dimensions::{
    DimensionAnalyzer, WhatAnalyzer, WhenAnalyzer, WhereAnalyzer, WhoAnalyzer, WhyAnalyzer,
};
use crate::error::EngineError;
use crate::graph::GraphClient;
use crate::model::{
    CaseKey, CaseStatus, ContextRecord, DimSet, DimensionFailure, DimensionName, DimensionOutcome,
    Scope, COMPLETENESS_THRESHOLD,
};
use crate::store::{CaseStore, StoreError};

/// A finished build plus what the cache layer needs to store it correctly.
#[derive(Debug)]
pub struct BuiltContext {
    pub record: ContextRecord,
    pub case_status: CaseStatus,
    /// When the build began; compared against invalidation markers.
    pub build_started: Instant,
}

pub struct ContextBuilder {
    analyzers: Vec<Arc<dyn DimensionAnalyzer>>,
    store: Arc<dyn CaseStore>,
    metadata_timeout: Duration,
    scoring_budget: Duration,
    dimension_budget: Option<Duration>,
}

impl ContextBuilder {
    /// The standard five-analyzer lineup.
    pub fn new(
        graph: Arc<GraphClient>,
        store: Arc<dyn CaseStore>,
        metadata_timeout: Duration,
        scoring_budget: Duration,
    ) -> Self {
        let analyzers: Vec<Arc<dyn DimensionAnalyzer>> = vec![
            Arc::new(WhoAnalyzer::new(Arc::clone(&graph))),
            Arc::new(WhatAnalyzer::new(Arc::clone(&graph))),
            Arc::new(WhereAnalyzer::new(Arc::clone(&store))),
            Arc::new(WhenAnalyzer::new(Arc::clone(&store))),
            Arc::new(WhyAnalyzer::new(graph)),
        ];
        Self::with_analyzers(analyzers, store, metadata_timeout, scoring_budget)
    }

    /// Custom analyzer set; tests substitute stubs here.
    pub fn with_analyzers(
        analyzers: Vec<Arc<dyn DimensionAnalyzer>>,
        store: Arc<dyn CaseStore>,
        metadata_timeout: Duration,
        scoring_budget: Duration,
    ) -> Self {
        Self { analyzers, store, metadata_timeout, scoring_budget, dimension_budget: None }
    }

    /// Bound each analyzer to its own budget on top of the shared deadline;
    /// `None` inherits the request deadline.
    pub fn with_dimension_budget(mut self, budget: Option<Duration>) -> Self {
        self.dimension_budget = budget;
        self
    }

    /// `(Σ completeness / N_requested) × (N_successful / N_requested)`,
    /// failures contributing zero completeness. The deliberate double
    /// penalty: a failed dimension drags both factors down.
    fn score(dimensions: &BTreeMap<DimensionName, DimensionOutcome>, requested: usize) -> f64 {
        if requested == 0 {
            return 0.0;
        }
        let n = requested as f64;
        let sum: f64 = dimensions.values().map(DimensionOutcome::completeness).sum();
        let successful = dimensions.values().filter(|o| o.is_present()).count() as f64;
        ((sum / n) * (successful / n)).clamp(0.0, 1.0)
    }

    pub async fn build(
        &self,
        key: &CaseKey,
        dims: &DimSet,
        scope_requested: Option<Scope>,
        deadline: Deadline,
    ) -> Result<BuiltContext, EngineError> {
        key.validate()?;
        if dims.is_empty() {
            return Err(EngineError::Validation("dimension set must not be empty".into()));
        }

        let build_started = Instant::now();
        let built_at = Utc::now();

        // Short-deadline metadata prefetch: NotFound aborts the build, any
        // other failure degrades the status to unknown and continues.
        let metadata_deadline = deadline.cap(self.metadata_timeout);
        let metadata =
            match tokio::time::timeout_at(metadata_deadline.instant(), self.store.case_metadata(key))
                .await
            {
                Ok(Ok(metadata)) => Some(metadata),
                Ok(Err(StoreError::NotFound)) => {
                    return Err(EngineError::CaseNotFound { case_id: key.case_id.clone() });
                }
                Ok(Err(StoreError::Unavailable(detail))) => {
                    tracing::warn!(case = %key, %detail, "case store unavailable; degrading status to unknown");
                    None
                }
                Err(_) => {
                    tracing::warn!(case = %key, "case metadata fetch timed out; degrading status to unknown");
                    None
                }
            };
        let case_status = metadata.as_ref().map(|m| m.status).unwrap_or(CaseStatus::Unknown);
        let case_name = metadata.and_then(|m| m.title);

        // Everything the analyzers get is the request deadline minus a
        // small scoring reserve, tightened further by any per-dimension
        // budget.
        let mut analyzer_deadline = deadline.shrink(self.scoring_budget);
        if let Some(budget) = self.dimension_budget {
            analyzer_deadline = analyzer_deadline.cap(budget);
        }
        let mut join_set = JoinSet::new();
        for analyzer in self.analyzers.iter().filter(|a| dims.contains(a.name())) {
            let analyzer = Arc::clone(analyzer);
            let key = key.clone();
            join_set.spawn(async move {
                let name = analyzer.name();
                let outcome = match tokio::time::timeout_at(
                    analyzer_deadline.instant(),
                    analyzer.analyze(&key, analyzer_deadline),
                )
                .await
                {
                    Ok(Ok(data)) => DimensionOutcome::Present(data),
                    Ok(Err(failure)) => DimensionOutcome::Failed(failure),
                    Err(_) => DimensionOutcome::Failed(DimensionFailure::DeadlineExceeded),
                };
                (name, outcome)
            });
        }

        let mut dimensions: BTreeMap<DimensionName, DimensionOutcome> = BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, outcome)) => {
                    if let DimensionOutcome::Failed(reason) = &outcome {
                        tracing::warn!(case = %key, dimension = %name, %reason, "dimension failed");
                    }
                    dimensions.insert(name, outcome);
                }
                Err(join_error) => {
                    tracing::error!(case = %key, %join_error, "dimension task aborted");
                }
            }
        }
        // A panicked task (or a dimension with no analyzer wired) still owes
        // the record an entry.
        for dim in dims.iter() {
            dimensions.entry(dim).or_insert_with(|| {
                DimensionOutcome::Failed(DimensionFailure::Upstream {
                    message: "analyzer did not produce a result".into(),
                })
            });
        }

        let context_score = Self::score(&dimensions, dims.len());
        let record = ContextRecord {
            case_key: key.clone(),
            scope_requested,
            case_name,
            case_status,
            dimensions,
            context_score,
            is_complete: context_score >= COMPLETENESS_THRESHOLD,
            built_at,
            cached: false,
            build_ms: build_started.elapsed().as_millis() as u64,
        };
        Ok(BuiltContext { record, case_status, build_started })
    }
}

//! Per-dimension analyzers.
//!
//! One analyzer per dimension, all sharing a single contract: case-scoped
//! input, a deadline, and a `DimensionData` (or failure) out. Analyzers are
//! independently re-runnable — no ordering dependencies between them — and
//! every upstream call they make carries the case key.

mod what;
mod when;
mod where_;
mod who;
mod why;

pub use what::WhatAnalyzer;
pub use when::WhenAnalyzer;
pub use where_::WhereAnalyzer;
pub use who::WhoAnalyzer;
pub use why::WhyAnalyzer;

use async_trait::async_trait;
use serde_json::Value;

use crate::deadline::Deadline;
use crate::graph::GraphError;
use crate::model::{CaseKey, DimensionData, DimensionFailure, DimensionName, Entity};
use crate::store::StoreError;

#[async_trait]
pub trait DimensionAnalyzer: Send + Sync {
    fn name(&self) -> DimensionName;

    async fn analyze(
        &self,
        key: &CaseKey,
        deadline: Deadline,
    ) -> Result<DimensionData, DimensionFailure>;
}

impl From<GraphError> for DimensionFailure {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::DeadlineExceeded => DimensionFailure::DeadlineExceeded,
            other => DimensionFailure::Upstream { message: other.to_string() },
        }
    }
}

impl From<StoreError> for DimensionFailure {
    fn from(e: StoreError) -> Self {
        DimensionFailure::Upstream { message: e.to_string() }
    }
}

/// Deterministic presentation order: confidence descending, id ascending.
pub(crate) fn sort_entities(entities: &mut [Entity]) {
    entities.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Mean entity confidence; zero for an empty slice.
pub(crate) fn mean_confidence(entities: &[Entity]) -> f64 {
    if entities.is_empty() {
        return 0.0;
    }
    let sum: f64 = entities.iter().map(|e| e.confidence).sum();
    (sum / entities.len() as f64).clamp(0.0, 1.0)
}

pub(crate) fn entities_value(entities: &[Entity]) -> Value {
    serde_json::to_value(entities).unwrap_or(Value::Array(Vec::new()))
}

/// `count / scale` capped at 1.0; the "scaled to N" predicates of the
/// completeness formulas.
pub(crate) fn scaled(count: usize, scale: usize) -> f64 {
    if scale == 0 {
        return 0.0;
    }
    (count as f64 / scale as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKind;

    fn entity(id: &str, confidence: f64) -> Entity {
        Entity {
            id: id.into(),
            case_id: Some("K1".into()),
            kind: EntityKind::Party,
            name: id.into(),
            confidence,
            attrs: Default::default(),
        }
    }

    #[test]
    fn sort_is_confidence_desc_then_id_asc() {
        let mut entities =
            vec![entity("b", 0.5), entity("a", 0.5), entity("c", 0.9), entity("d", 0.1)];
        sort_entities(&mut entities);
        let ids: Vec<_> = entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn mean_confidence_handles_empty_and_clamps() {
        assert_eq!(mean_confidence(&[]), 0.0);
        let entities = vec![entity("a", 0.8), entity("b", 0.4)];
        assert!((mean_confidence(&entities) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn scaled_caps_at_one() {
        assert_eq!(scaled(0, 10), 0.0);
        assert_eq!(scaled(5, 10), 0.5);
        assert_eq!(scaled(25, 10), 1.0);
    }
}

//! WHAT: the legal substance — issues, causes of action, citations, and the
//! governing doctrine.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{json, Map};

use crate::deadline::Deadline;
use crate::dimensions::{entities_value, mean_confidence, scaled, sort_entities, DimensionAnalyzer};
use crate::graph::GraphClient;
use crate::model::{CaseKey, DimensionData, DimensionFailure, DimensionName, Entity, EntityKind};

const SUBSTANCE_KINDS: [EntityKind; 5] = [
    EntityKind::LegalIssue,
    EntityKind::CauseOfAction,
    EntityKind::StatuteCitation,
    EntityKind::CaseCitation,
    EntityKind::LegalDoctrine,
];
const PER_KIND_LIMIT: usize = 50;
const CITATION_SCALE: usize = 10;

const W_ISSUES: f64 = 0.25;
const W_CAUSES: f64 = 0.25;
const W_CITATIONS: f64 = 0.30;
const W_THEORY: f64 = 0.20;

pub struct WhatAnalyzer {
    graph: Arc<GraphClient>,
}

impl WhatAnalyzer {
    pub fn new(graph: Arc<GraphClient>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl DimensionAnalyzer for WhatAnalyzer {
    fn name(&self) -> DimensionName {
        DimensionName::What
    }

    async fn analyze(
        &self,
        key: &CaseKey,
        deadline: Deadline,
    ) -> Result<DimensionData, DimensionFailure> {
        let fetches = SUBSTANCE_KINDS.iter().map(|kind| {
            self.graph.list_case_entities(key, Some(*kind), None, PER_KIND_LIMIT, deadline)
        });
        let mut by_kind = try_join_all(fetches).await?;
        for group in &mut by_kind {
            sort_entities(group);
        }
        let doctrines = by_kind.pop().unwrap_or_default();
        let case_citations = by_kind.pop().unwrap_or_default();
        let statute_citations = by_kind.pop().unwrap_or_default();
        let causes = by_kind.pop().unwrap_or_default();
        let issues = by_kind.pop().unwrap_or_default();

        let citation_count = statute_citations.len() + case_citations.len();
        let completeness = f64::from(issues.len() >= 3) * W_ISSUES
            + f64::from(!causes.is_empty()) * W_CAUSES
            + scaled(citation_count, CITATION_SCALE) * W_CITATIONS
            + f64::from(!doctrines.is_empty()) * W_THEORY;

        let all: Vec<Entity> = issues
            .iter()
            .chain(&causes)
            .chain(&statute_citations)
            .chain(&case_citations)
            .chain(&doctrines)
            .cloned()
            .collect();
        let data_points = all.len() as u32;
        let confidence = mean_confidence(&all);

        let mut data = Map::new();
        data.insert("legal_issues".into(), entities_value(&issues));
        data.insert("causes_of_action".into(), entities_value(&causes));
        data.insert("statute_citations".into(), entities_value(&statute_citations));
        data.insert("case_citations".into(), entities_value(&case_citations));
        data.insert("doctrines".into(), entities_value(&doctrines));
        data.insert(
            "primary_theory".into(),
            doctrines.first().map(|d| json!(d.name)).unwrap_or(json!(null)),
        );

        Ok(DimensionData::new(data, completeness, confidence, data_points))
    }
}

//! WHO: the people in the case — parties, counsel, the judge, witnesses,
//! and the representation map connecting them.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{json, Map};

use crate::deadline::Deadline;
use crate::dimensions::{entities_value, mean_confidence, sort_entities, DimensionAnalyzer};
use crate::graph::GraphClient;
use crate::model::{
    CaseKey, DimensionData, DimensionFailure, DimensionName, Entity, EntityKind, Relationship,
};

const ROSTER_KINDS: [EntityKind; 4] =
    [EntityKind::Party, EntityKind::Judge, EntityKind::Attorney, EntityKind::Witness];
const PER_KIND_LIMIT: usize = 50;
const REPRESENTS: &str = "REPRESENTS";

// Completeness weights; they sum to 1.0.
const W_PARTIES: f64 = 0.30;
const W_COUNSEL: f64 = 0.20;
const W_JUDGE: f64 = 0.20;
const W_WITNESSES: f64 = 0.10;
const W_RELATIONSHIPS: f64 = 0.20;

pub struct WhoAnalyzer {
    graph: Arc<GraphClient>,
}

impl WhoAnalyzer {
    pub fn new(graph: Arc<GraphClient>) -> Self {
        Self { graph }
    }

    fn party_is_represented(party: &Entity, relationships: &[Relationship]) -> bool {
        relationships
            .iter()
            .any(|r| r.kind == REPRESENTS && (r.target_id == party.id || r.source_id == party.id))
    }
}

#[async_trait]
impl DimensionAnalyzer for WhoAnalyzer {
    fn name(&self) -> DimensionName {
        DimensionName::Who
    }

    async fn analyze(
        &self,
        key: &CaseKey,
        deadline: Deadline,
    ) -> Result<DimensionData, DimensionFailure> {
        let fetches = ROSTER_KINDS.iter().map(|kind| {
            self.graph.list_case_entities(key, Some(*kind), None, PER_KIND_LIMIT, deadline)
        });
        let mut by_kind = try_join_all(fetches).await?;
        let relationships = self.graph.list_case_relationships(key, None, None, deadline).await?;

        for group in &mut by_kind {
            sort_entities(group);
        }
        let witnesses = by_kind.pop().unwrap_or_default();
        let attorneys = by_kind.pop().unwrap_or_default();
        let judges = by_kind.pop().unwrap_or_default();
        let parties = by_kind.pop().unwrap_or_default();

        let every_party_represented = !parties.is_empty()
            && parties.iter().all(|p| Self::party_is_represented(p, &relationships));

        let completeness = f64::from(parties.len() >= 2) * W_PARTIES
            + f64::from(every_party_represented) * W_COUNSEL
            + f64::from(!judges.is_empty()) * W_JUDGE
            + f64::from(!witnesses.is_empty()) * W_WITNESSES
            + f64::from(!relationships.is_empty()) * W_RELATIONSHIPS;

        let all: Vec<Entity> = parties
            .iter()
            .chain(&judges)
            .chain(&attorneys)
            .chain(&witnesses)
            .cloned()
            .collect();
        let data_points = (all.len() + relationships.len()) as u32;
        let confidence = mean_confidence(&all);

        let mut data = Map::new();
        data.insert("parties".into(), entities_value(&parties));
        data.insert("judge".into(), judges.first().map(|j| json!(j)).unwrap_or(json!(null)));
        data.insert("attorneys".into(), entities_value(&attorneys));
        data.insert("witnesses".into(), entities_value(&witnesses));
        data.insert(
            "representation".into(),
            serde_json::to_value(&relationships).unwrap_or_default(),
        );

        Ok(DimensionData::new(data, completeness, confidence, data_points))
    }
}

//! WHY: strategy — legal theories, the supporting precedent network, risks
//! and their mitigations, and how this judge and similar cases have gone.
//!
//! The precedent fetch is the one deliberately cross-case path in the
//! system; the client tags everything it returns with the querying case id.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::deadline::Deadline;
use crate::dimensions::{entities_value, mean_confidence, scaled, sort_entities, DimensionAnalyzer};
use crate::graph::{GraphClient, ResearchMode, SearchType};
use crate::model::{CaseKey, DimensionData, DimensionFailure, DimensionName, Entity, EntityKind};

const QUERY_LIMIT: usize = 25;
const PRECEDENT_SCALE: usize = 10;

const W_THEORIES: f64 = 0.20;
const W_PRECEDENTS: f64 = 0.30;
const W_RISKS: f64 = 0.20;
const W_JUDGE_PATTERNS: f64 = 0.15;
const W_OUTCOMES: f64 = 0.15;

pub struct WhyAnalyzer {
    graph: Arc<GraphClient>,
}

impl WhyAnalyzer {
    pub fn new(graph: Arc<GraphClient>) -> Self {
        Self { graph }
    }

    fn fact_array(facts: &Map<String, Value>, name: &str) -> Vec<Value> {
        facts.get(name).and_then(|v| v.as_array()).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl DimensionAnalyzer for WhyAnalyzer {
    fn name(&self) -> DimensionName {
        DimensionName::Why
    }

    async fn analyze(
        &self,
        key: &CaseKey,
        deadline: Deadline,
    ) -> Result<DimensionData, DimensionFailure> {
        let strategy = self
            .graph
            .query_case(key, "legal theories, risks, and strategy posture", SearchType::Local, QUERY_LIMIT, deadline)
            .await?;
        let precedent_net = self
            .graph
            .research(key, "supporting and adverse precedent for the case's theories", None, ResearchMode::Hybrid, deadline)
            .await?;

        let mut theories: Vec<Entity> = strategy
            .entities
            .iter()
            .filter(|e| e.kind == EntityKind::LegalTheory)
            .cloned()
            .collect();
        sort_entities(&mut theories);
        let mut precedents: Vec<Entity> = precedent_net
            .entities
            .iter()
            .filter(|e| matches!(e.kind, EntityKind::CaseCitation | EntityKind::Unknown))
            .cloned()
            .collect();
        sort_entities(&mut precedents);

        let mut facts = strategy.facts.clone();
        for (k, v) in &precedent_net.facts {
            facts.entry(k.clone()).or_insert_with(|| v.clone());
        }
        let risks = Self::fact_array(&facts, "risks");
        let mitigations = Self::fact_array(&facts, "mitigations");
        let judge_patterns = Self::fact_array(&facts, "judge_patterns");
        let similar_outcomes = Self::fact_array(&facts, "similar_outcomes");

        let completeness = f64::from(theories.len() >= 2) * W_THEORIES
            + scaled(precedents.len(), PRECEDENT_SCALE) * W_PRECEDENTS
            + f64::from(!risks.is_empty() && !mitigations.is_empty()) * W_RISKS
            + f64::from(!judge_patterns.is_empty()) * W_JUDGE_PATTERNS
            + f64::from(!similar_outcomes.is_empty()) * W_OUTCOMES;

        let scored: Vec<Entity> = theories.iter().chain(&precedents).cloned().collect();
        let confidence = mean_confidence(&scored);
        let data_points = (scored.len()
            + risks.len()
            + mitigations.len()
            + judge_patterns.len()
            + similar_outcomes.len()) as u32;

        let mut data = Map::new();
        data.insert("theories".into(), entities_value(&theories));
        data.insert("precedents".into(), entities_value(&precedents));
        data.insert("risks".into(), Value::Array(risks));
        data.insert("mitigations".into(), Value::Array(mitigations));
        data.insert("judge_patterns".into(), Value::Array(judge_patterns));
        data.insert("similar_outcomes".into(), Value::Array(similar_outcomes));
        if !strategy.warnings.is_empty() {
            data.insert("data_quality_warnings".into(), json!(strategy.warnings));
        }

        Ok(DimensionData::new(data, completeness, confidence, data_points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::{test_client, RouteTransport};
    use crate::graph::TransportError;
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::from_now(Duration::from_secs(30))
    }

    fn key() -> CaseKey {
        CaseKey::new("C1", "K1")
    }

    fn theory(id: &str) -> Value {
        json!({"id": id, "case_id": "K1", "kind": "LEGAL_THEORY", "name": id, "confidence": 0.8})
    }

    fn precedent(id: &str, confidence: f64) -> Value {
        json!({"id": id, "case_id": "SOURCE", "kind": "CASE_CITATION", "name": id, "confidence": confidence})
    }

    #[tokio::test]
    async fn full_strategy_scores_complete() {
        let transport = RouteTransport::new();
        transport.route(
            "/api/v1/query",
            Ok(json!({
                "entities": [theory("negligence"), theory("strict-liability")],
                "facts": {
                    "risks": ["statute of limitations"],
                    "mitigations": ["tolling argument"],
                    "judge_patterns": ["grants early summary judgment rarely"],
                },
            })),
        );
        let precedents: Vec<Value> = (0..10).map(|i| precedent(&format!("p{i}"), 0.7)).collect();
        transport.route(
            "/api/v1/research",
            Ok(json!({
                "entities": precedents,
                "facts": {"similar_outcomes": ["settled", "plaintiff verdict"]},
            })),
        );
        let analyzer = WhyAnalyzer::new(Arc::new(test_client(transport)));

        let data = analyzer.analyze(&key(), deadline()).await.unwrap();
        assert!((data.completeness - 1.0).abs() < 1e-9);
        assert!(data.sufficient);
        assert_eq!(data.data["theories"].as_array().unwrap().len(), 2);
        assert_eq!(data.data["precedents"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn precedents_carry_the_querying_case_id() {
        let transport = RouteTransport::new();
        transport.route(
            "/api/v1/research",
            Ok(json!({"entities": [precedent("p1", 0.9)]})),
        );
        let analyzer = WhyAnalyzer::new(Arc::new(test_client(transport)));

        let data = analyzer.analyze(&key(), deadline()).await.unwrap();
        assert_eq!(data.data["precedents"][0]["case_id"], "K1");
    }

    #[tokio::test]
    async fn risks_without_mitigations_do_not_count() {
        let transport = RouteTransport::new();
        transport.route(
            "/api/v1/query",
            Ok(json!({"facts": {"risks": ["limitations"]}})),
        );
        let analyzer = WhyAnalyzer::new(Arc::new(test_client(transport)));

        let data = analyzer.analyze(&key(), deadline()).await.unwrap();
        assert_eq!(data.completeness, 0.0);
    }

    #[tokio::test]
    async fn unavailable_graph_fails_the_dimension() {
        let transport = RouteTransport::new();
        transport.route("/api/v1/query", Err(TransportError::Connect("refused".into())));
        let analyzer = WhyAnalyzer::new(Arc::new(test_client(transport)));

        let err = analyzer.analyze(&key(), deadline()).await.unwrap_err();
        assert!(matches!(err, DimensionFailure::Upstream { .. }));
    }
}

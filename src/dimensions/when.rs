//! WHEN: the clock — filing date, timeline, deadlines, and an urgency score.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map};

use crate::deadline::Deadline;
use crate::dimensions::{scaled, DimensionAnalyzer};
use crate::model::{CaseEvent, CaseKey, DimensionData, DimensionFailure, DimensionName, EventKind};
use crate::store::CaseStore;

const TIMELINE_SCALE: usize = 10;
const DEADLINE_SCALE: usize = 5;

const W_FILING: f64 = 0.30;
const W_TIMELINE: f64 = 0.30;
const W_DEADLINES: f64 = 0.40;

// Urgency blend; weights sum to 1.0 and every input is clamped to [0, 1].
const U_NEXT: f64 = 0.40;
const U_OVERDUE: f64 = 0.30;
const U_DENSITY: f64 = 0.20;
const U_AGE: f64 = 0.10;

const NEXT_HORIZON_DAYS: f64 = 30.0;
const OVERDUE_SATURATION: f64 = 4.0;
const DENSITY_SATURATION: f64 = 5.0;
const AGE_SATURATION_DAYS: f64 = 730.0;

pub struct WhenAnalyzer {
    store: Arc<dyn CaseStore>,
}

impl WhenAnalyzer {
    pub fn new(store: Arc<dyn CaseStore>) -> Self {
        Self { store }
    }

    fn urgency(
        now: DateTime<Utc>,
        filing_date: Option<DateTime<Utc>>,
        deadlines: &[CaseEvent],
    ) -> (f64, usize, Option<i64>) {
        let overdue = deadlines.iter().filter(|d| d.at < now).count();
        let next = deadlines.iter().find(|d| d.at >= now);
        let days_until_next = next.map(|d| (d.at - now).num_days());

        let next_component = days_until_next
            .map(|days| (1.0 - days as f64 / NEXT_HORIZON_DAYS).clamp(0.0, 1.0))
            .unwrap_or(0.0);
        let overdue_component = (overdue as f64 / OVERDUE_SATURATION).min(1.0);
        let density = deadlines
            .iter()
            .filter(|d| d.at >= now && (d.at - now).num_days() <= NEXT_HORIZON_DAYS as i64)
            .count();
        let density_component = (density as f64 / DENSITY_SATURATION).min(1.0);
        let age_component = filing_date
            .map(|filed| ((now - filed).num_days().max(0) as f64 / AGE_SATURATION_DAYS).min(1.0))
            .unwrap_or(0.0);

        let urgency = (U_NEXT * next_component
            + U_OVERDUE * overdue_component
            + U_DENSITY * density_component
            + U_AGE * age_component)
            .clamp(0.0, 1.0);
        (urgency, overdue, days_until_next)
    }
}

#[async_trait]
impl DimensionAnalyzer for WhenAnalyzer {
    fn name(&self) -> DimensionName {
        DimensionName::When
    }

    async fn analyze(
        &self,
        key: &CaseKey,
        deadline: Deadline,
    ) -> Result<DimensionData, DimensionFailure> {
        let at = deadline.instant();
        let metadata = tokio::time::timeout_at(at, self.store.case_metadata(key))
            .await
            .map_err(|_| DimensionFailure::DeadlineExceeded)??;
        let mut events = tokio::time::timeout_at(at, self.store.events(key, None, None))
            .await
            .map_err(|_| DimensionFailure::DeadlineExceeded)??;

        events.sort_by_key(|e| e.at);
        let deadlines: Vec<CaseEvent> =
            events.iter().filter(|e| e.kind == EventKind::Deadline).cloned().collect();

        let now = Utc::now();
        let (urgency, overdue, days_until_next) =
            Self::urgency(now, metadata.filing_date, &deadlines);

        let completeness = f64::from(metadata.filing_date.is_some()) * W_FILING
            + scaled(events.len(), TIMELINE_SCALE) * W_TIMELINE
            + scaled(deadlines.len(), DEADLINE_SCALE) * W_DEADLINES;

        let sources_present = [
            metadata.filing_date.is_some(),
            !events.is_empty(),
            !deadlines.is_empty(),
        ]
        .iter()
        .filter(|p| **p)
        .count();
        let confidence = sources_present as f64 / 3.0;

        let data_points = events.len() as u32 + u32::from(metadata.filing_date.is_some());

        let mut data = Map::new();
        data.insert(
            "filing_date".into(),
            metadata.filing_date.map(|d| json!(d)).unwrap_or(json!(null)),
        );
        data.insert("timeline".into(), serde_json::to_value(&events).unwrap_or_default());
        data.insert("deadlines".into(), serde_json::to_value(&deadlines).unwrap_or_default());
        data.insert(
            "next_deadline".into(),
            deadlines.iter().find(|d| d.at >= now).map(|d| json!(d)).unwrap_or(json!(null)),
        );
        data.insert(
            "days_until_next_deadline".into(),
            days_until_next.map(|d| json!(d)).unwrap_or(json!(null)),
        );
        data.insert("overdue_deadlines".into(), json!(overdue));
        data.insert("urgency_score".into(), json!(urgency));

        Ok(DimensionData::new(data, completeness, confidence, data_points))
    }
}

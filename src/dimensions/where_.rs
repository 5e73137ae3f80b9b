//! WHERE: the forum — jurisdiction, court, and venue from case metadata.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map};

use crate::deadline::Deadline;
use crate::dimensions::DimensionAnalyzer;
use crate::model::{CaseKey, DimensionData, DimensionFailure, DimensionName};
use crate::store::CaseStore;

pub struct WhereAnalyzer {
    store: Arc<dyn CaseStore>,
}

impl WhereAnalyzer {
    pub fn new(store: Arc<dyn CaseStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DimensionAnalyzer for WhereAnalyzer {
    fn name(&self) -> DimensionName {
        DimensionName::Where
    }

    async fn analyze(
        &self,
        key: &CaseKey,
        deadline: Deadline,
    ) -> Result<DimensionData, DimensionFailure> {
        let metadata = tokio::time::timeout_at(deadline.instant(), self.store.case_metadata(key))
            .await
            .map_err(|_| DimensionFailure::DeadlineExceeded)??;

        let fields = [
            ("jurisdiction", metadata.jurisdiction),
            ("court", metadata.court),
            ("venue", metadata.venue),
        ];
        let present = fields.iter().filter(|(_, v)| v.is_some()).count();
        let completeness = present as f64 / fields.len() as f64;

        let mut data = Map::new();
        for (name, value) in fields {
            data.insert(name.into(), value.map(|v| json!(v)).unwrap_or(json!(null)));
        }

        Ok(DimensionData::new(data, completeness, completeness, present as u32))
    }
}

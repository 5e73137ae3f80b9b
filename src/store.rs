//! Narrow interface to the relational case store.
//!
//! The engine only ever needs three reads; connection ownership, pooling and
//! retries live with the implementation. Every query is filtered by the full
//! `(client_id, case_id)` pair — the in-memory store gets that for free by
//! keying on `CaseKey`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{CaseEvent, CaseKey, CaseMetadata, Entity, EntityKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("case not found")]
    NotFound,
    #[error("case store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn case_metadata(&self, key: &CaseKey) -> Result<CaseMetadata, StoreError>;

    async fn entities(
        &self,
        key: &CaseKey,
        kinds: &[EntityKind],
        limit: usize,
    ) -> Result<Vec<Entity>, StoreError>;

    async fn events(
        &self,
        key: &CaseKey,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<CaseEvent>, StoreError>;
}

#[derive(Debug, Clone, Default)]
struct CaseRow {
    metadata: CaseMetadata,
    entities: Vec<Entity>,
    events: Vec<CaseEvent>,
}

/// In-memory case store. Backs the test suites and the demo binary wiring;
/// a deployment substitutes its own `CaseStore` over the real CaseDB.
#[derive(Debug, Default)]
pub struct MemoryCaseStore {
    rows: RwLock<HashMap<CaseKey, CaseRow>>,
}

impl MemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_case(&self, key: CaseKey, metadata: CaseMetadata) {
        let mut rows = self.rows.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        rows.entry(key).or_default().metadata = metadata;
    }

    pub fn add_entities(&self, key: &CaseKey, entities: Vec<Entity>) {
        let mut rows = self.rows.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        rows.entry(key.clone()).or_default().entities.extend(entities);
    }

    pub fn add_events(&self, key: &CaseKey, events: Vec<CaseEvent>) {
        let mut rows = self.rows.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        rows.entry(key.clone()).or_default().events.extend(events);
    }
}

#[async_trait]
impl CaseStore for MemoryCaseStore {
    async fn case_metadata(&self, key: &CaseKey) -> Result<CaseMetadata, StoreError> {
        let rows = self.rows.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        rows.get(key).map(|row| row.metadata.clone()).ok_or(StoreError::NotFound)
    }

    async fn entities(
        &self,
        key: &CaseKey,
        kinds: &[EntityKind],
        limit: usize,
    ) -> Result<Vec<Entity>, StoreError> {
        let rows = self.rows.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let row = rows.get(key).ok_or(StoreError::NotFound)?;
        Ok(row
            .entities
            .iter()
            .filter(|e| kinds.is_empty() || kinds.contains(&e.kind))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn events(
        &self,
        key: &CaseKey,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<CaseEvent>, StoreError> {
        let rows = self.rows.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let row = rows.get(key).ok_or(StoreError::NotFound)?;
        let mut events: Vec<_> = row
            .events
            .iter()
            .filter(|e| since.map_or(true, |s| e.at >= s) && until.map_or(true, |u| e.at <= u))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.at);
        Ok(events)
    }
}

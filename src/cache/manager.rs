//! Tier composition, TTL policy, invalidation, and single-flight access.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::cache::flight::{FlightRegistry, FlightRole};
use crate::cache::tier::{CacheEntry, CacheTier, TierKind, TierStats};
use crate::cache::CacheKey;
use crate::model::{CaseKey, CaseStatus, ContextRecord};

/// Per-tier counters plus the overall hit rate, as one readable snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub tiers: Vec<TierStatsEntry>,
    pub overall_hit_rate: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TierStatsEntry {
    pub tier: &'static str,
    #[serde(flatten)]
    pub stats: TierStats,
}

pub struct CacheManager {
    tiers: Vec<Arc<dyn CacheTier>>,
    memory_ttl: Duration,
    active_ttl: Duration,
    closed_ttl: Duration,
    flights: FlightRegistry,
    /// Last `invalidate_case` instant per case; consulted on every store so
    /// builds that started before the invalidation are dropped.
    invalidations: Mutex<HashMap<CaseKey, Instant>>,
}

impl CacheManager {
    pub fn new(
        tiers: Vec<Arc<dyn CacheTier>>,
        memory_ttl: Duration,
        active_ttl: Duration,
        closed_ttl: Duration,
    ) -> Self {
        Self {
            tiers,
            memory_ttl,
            active_ttl,
            closed_ttl,
            flights: FlightRegistry::new(),
            invalidations: Mutex::new(HashMap::new()),
        }
    }

    pub fn has_tiers(&self) -> bool {
        !self.tiers.is_empty()
    }

    /// TTL for a tier: memory tiers use the flat memory TTL, persistent
    /// tiers vary by the case status frozen at build time.
    fn ttl_for(&self, kind: TierKind, status: CaseStatus) -> Duration {
        match kind {
            TierKind::Memory => self.memory_ttl,
            TierKind::Persistent => match status {
                CaseStatus::Closed => self.closed_ttl,
                CaseStatus::Active | CaseStatus::Unknown => self.active_ttl,
            },
        }
    }

    /// Read-through lookup. A hit in a colder tier is promoted into every
    /// warmer tier (its expiry capped by both the original expiry and the
    /// warmer tier's TTL). The returned record is marked `cached`.
    pub fn lookup(&self, key: &CacheKey) -> Option<ContextRecord> {
        for (depth, tier) in self.tiers.iter().enumerate() {
            if let Some(entry) = tier.get(key) {
                tracing::debug!(key = %key, tier = tier.name(), "cache hit");
                for warmer in &self.tiers[..depth] {
                    let ttl = self.ttl_for(warmer.kind(), entry.case_status_at_insert);
                    let mut promoted = CacheEntry::new(
                        Arc::clone(&entry.record),
                        ttl,
                        entry.case_status_at_insert,
                    );
                    promoted.inserted_at = entry.inserted_at;
                    promoted.expires_at = promoted.expires_at.min(entry.expires_at);
                    warmer.put(key.clone(), promoted);
                }
                let mut record = (*entry.record).clone();
                record.cached = true;
                return Some(record);
            }
        }
        None
    }

    /// Write-through store. Returns `false` (and writes nothing) when the
    /// build started at or before the case's last invalidation — a store
    /// racing an invalidation must lose.
    pub fn store(
        &self,
        key: &CacheKey,
        record: Arc<ContextRecord>,
        status: CaseStatus,
        build_started: Instant,
    ) -> bool {
        let case = CaseKey::new(key.client_id.clone(), key.case_id.clone());
        {
            let invalidations =
                self.invalidations.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(marker) = invalidations.get(&case) {
                if build_started <= *marker {
                    tracing::info!(key = %key, "dropping store: build predates case invalidation");
                    return false;
                }
            }
        }
        for tier in &self.tiers {
            let ttl = self.ttl_for(tier.kind(), status);
            tier.put(key.clone(), CacheEntry::new(Arc::clone(&record), ttl, status));
        }
        true
    }

    /// Remove a single dimension-set entry from every tier.
    pub fn invalidate(&self, key: &CacheKey) -> usize {
        self.tiers.iter().map(|tier| tier.delete(key)).sum()
    }

    /// Remove every entry for a case from every tier and record the marker
    /// that defeats in-flight stores.
    pub fn invalidate_case(&self, case: &CaseKey) -> usize {
        {
            let mut invalidations =
                self.invalidations.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            invalidations.insert(case.clone(), Instant::now());
        }
        let removed: usize = self.tiers.iter().map(|tier| tier.delete_case(case)).sum();
        tracing::info!(case = %case, removed, "invalidated case across all tiers");
        removed
    }

    /// Join (or start) the single flight for `key`.
    pub fn begin_flight(&self, key: &CacheKey) -> FlightRole {
        self.flights.join(key)
    }

    pub fn flights_in_progress(&self) -> usize {
        self.flights.in_flight()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let tiers: Vec<TierStatsEntry> = self
            .tiers
            .iter()
            .map(|tier| TierStatsEntry { tier: tier.name(), stats: tier.stats() })
            .collect();
        let (hits, misses) = tiers
            .iter()
            .fold((0u64, 0u64), |(h, m), t| (h + t.stats.hits, m + t.stats.misses));
        let total = hits + misses;
        let overall_hit_rate = if total == 0 { 0.0 } else { hits as f64 / total as f64 };
        CacheStatsSnapshot { tiers, overall_hit_rate }
    }
}

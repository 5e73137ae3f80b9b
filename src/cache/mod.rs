//! Multi-tier context cache.
//!
//! Tiers are ordered warmest-first behind the [`CacheTier`] interface; the
//! [`CacheManager`] composes them as a read-through/write-through chain,
//! owns TTL selection and invalidation, and deduplicates concurrent misses
//! through the single-flight registry.

mod flight;
mod manager;
mod memory;
mod tier;

pub use flight::{await_leader, FlightGuard, FlightRegistry, FlightResult, FlightRole};
pub use manager::{CacheManager, CacheStatsSnapshot, TierStatsEntry};
pub use memory::MemoryTier;
pub use tier::{CacheEntry, CacheTier, NullTier, TierKind, TierStats};

use std::fmt;

use crate::model::{CaseKey, DimSet};

/// Cache key: the case key plus the effective dimension-set fingerprint.
/// Distinct from `CaseKey` — one case holds an entry per dimension set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub client_id: String,
    pub case_id: String,
    pub dimset: String,
}

impl CacheKey {
    pub fn new(case: &CaseKey, dims: &DimSet) -> Self {
        Self {
            client_id: case.client_id.clone(),
            case_id: case.case_id.clone(),
            dimset: dims.fingerprint(),
        }
    }

    /// True when this entry belongs to the given case, any dimension set.
    pub fn matches_case(&self, case: &CaseKey) -> bool {
        self.client_id == case.client_id && self.case_id == case.case_id
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.client_id, self.case_id, self.dimset)
    }
}

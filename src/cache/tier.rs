//! The tier interface and the shared entry shape.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::cache::CacheKey;
use crate::model::{CaseKey, CaseStatus, ContextRecord};

/// One cached build. `case_status_at_insert` is frozen at build time so the
/// manager can reason about TTLs without re-consulting the case store.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub record: Arc<ContextRecord>,
    pub inserted_at: Instant,
    pub expires_at: Instant,
    pub case_status_at_insert: CaseStatus,
    pub access_count: u64,
}

impl CacheEntry {
    pub fn new(record: Arc<ContextRecord>, ttl: Duration, status: CaseStatus) -> Self {
        let now = Instant::now();
        Self {
            record,
            inserted_at: now,
            expires_at: now + ttl,
            case_status_at_insert: status,
            access_count: 0,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Counter snapshot for one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub size: usize,
    pub capacity: usize,
}

/// Memory tiers use the flat memory TTL; persistent tiers get the
/// status-dependent one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierKind {
    Memory,
    Persistent,
}

/// A keyed store in the read-through chain. Implementations synchronize
/// internally; callers issue concurrent reads and writes freely.
pub trait CacheTier: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> TierKind;

    /// Must not return expired entries.
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Atomic replace.
    fn put(&self, key: CacheKey, entry: CacheEntry);

    fn delete(&self, key: &CacheKey) -> usize;

    /// Case-wide invalidation, every dimension set.
    fn delete_case(&self, case: &CaseKey) -> usize;

    fn stats(&self) -> TierStats;
}

/// Stand-in for a distributed or persistent tier that is not wired up.
/// Always misses; write-through and invalidation are counted no-ops, so the
/// chain can be exercised end-to-end before a real backend exists.
#[derive(Debug, Default)]
pub struct NullTier {
    sets: AtomicU64,
    misses: AtomicU64,
    deletes: AtomicU64,
}

impl NullTier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheTier for NullTier {
    fn name(&self) -> &'static str {
        "persistent-stub"
    }

    fn kind(&self) -> TierKind {
        TierKind::Persistent
    }

    fn get(&self, _key: &CacheKey) -> Option<CacheEntry> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn put(&self, _key: CacheKey, _entry: CacheEntry) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    fn delete(&self, _key: &CacheKey) -> usize {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        0
    }

    fn delete_case(&self, _case: &CaseKey) -> usize {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        0
    }

    fn stats(&self) -> TierStats {
        TierStats {
            hits: 0,
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            size: 0,
            capacity: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CaseKey as Case, DimSet, Scope};

    fn sample_key() -> CacheKey {
        CacheKey::new(&Case::new("C1", "K1"), &DimSet::from_scope(Scope::Minimal))
    }

    fn sample_entry() -> CacheEntry {
        let record = Arc::new(crate::builder::test_support::record_fixture());
        CacheEntry::new(record, Duration::from_secs(60), CaseStatus::Active)
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expiry_is_absolute() {
        let entry = sample_entry();
        assert!(!entry.is_expired(Instant::now()));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(entry.is_expired(Instant::now()));
    }

    #[tokio::test]
    async fn null_tier_always_misses_but_counts() {
        let tier = NullTier::new();
        assert!(tier.get(&sample_key()).is_none());
        tier.put(sample_key(), sample_entry());
        assert_eq!(tier.delete(&sample_key()), 0);
        assert_eq!(tier.delete_case(&Case::new("C1", "K1")), 0);

        let stats = tier.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.deletes, 2);
        assert_eq!(stats.hits, 0);
    }
}

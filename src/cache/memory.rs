//! In-process memory tier: bounded LRU with absolute per-entry TTL.
//!
//! Mutations serialize through one mutex to protect the LRU ordering; the
//! critical sections never span I/O. Expired entries are treated as absent
//! and purged lazily on access; a background sweep reclaims the rest.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;

use crate::cache::tier::{CacheEntry, CacheTier, TierKind, TierStats};
use crate::cache::CacheKey;
use crate::model::CaseKey;

const DEFAULT_CAPACITY: usize = 1000;

pub struct MemoryTier {
    inner: Mutex<LruCache<CacheKey, CacheEntry>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl std::fmt::Debug for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTier")
            .field("capacity", &self.capacity)
            .field("size", &self.lock().len())
            .finish()
    }
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY).expect("non-zero default"));
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            capacity: cap.get(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<CacheKey, CacheEntry>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remove every expired entry. Returns how many were reclaimed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut cache = self.lock();
        let expired: Vec<CacheKey> = cache
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            cache.pop(key);
        }
        expired.len()
    }

    /// Periodic sweep off the hot path. The handle is detached on drop; the
    /// owner aborts it at shutdown.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let tier = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reclaimed = tier.sweep_expired();
                if reclaimed > 0 {
                    tracing::debug!(reclaimed, "memory tier sweep reclaimed expired entries");
                }
            }
        })
    }
}

impl CacheTier for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = Instant::now();
        let mut cache = self.lock();

        let expired = cache.peek(key).map(|entry| entry.is_expired(now));
        match expired {
            Some(true) => {
                cache.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(false) => {
                // `get_mut` promotes to most-recently-used.
                let entry = cache.get_mut(key).expect("peeked entry present under lock");
                entry.access_count += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn put(&self, key: CacheKey, entry: CacheEntry) {
        let mut cache = self.lock();
        if let Some((evicted_key, _)) = cache.push(key.clone(), entry) {
            if evicted_key != key {
                tracing::debug!(key = %evicted_key, "memory tier evicted least-recently-used entry");
            }
        }
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    fn delete(&self, key: &CacheKey) -> usize {
        let removed = usize::from(self.lock().pop(key).is_some());
        self.deletes.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    fn delete_case(&self, case: &CaseKey) -> usize {
        let mut cache = self.lock();
        let matching: Vec<CacheKey> = cache
            .iter()
            .filter(|(key, _)| key.matches_case(case))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matching {
            cache.pop(key);
        }
        drop(cache);
        self.deletes.fetch_add(matching.len() as u64, Ordering::Relaxed);
        matching.len()
    }

    fn stats(&self) -> TierStats {
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            size: self.lock().len(),
            capacity: self.capacity,
        }
    }
}

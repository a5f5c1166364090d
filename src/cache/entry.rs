//! `CacheEntry` and the per-cache `CacheStats` counters (§3).

use crate::types::now_secs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// One of HOT / WARM / COLD (§4.2). Controls the effective TTL multiplier
/// and warming priority of entries in a category or key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Cold,
    Warm,
    Hot,
}

impl Tier {
    pub fn ttl_multiplier(self, hot: f64, warm: f64, cold: f64) -> f64 {
        match self {
            Tier::Hot => hot,
            Tier::Warm => warm,
            Tier::Cold => cold,
        }
    }
}

/// A single cached value plus the bookkeeping needed for eviction, TTL,
/// and the disk write-through format (§3, §6 persisted state layout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: u64,
    pub last_accessed_at: u64,
    pub ttl_seconds: u64,
    pub access_count: u64,
    /// Number of `get` calls against this key that found it present and
    /// unexpired, used by the smart-TTL hit-rate gate.
    pub hit_count: u64,
    pub size_bytes: usize,
    pub category: String,
    pub priority: u8,
    pub tier: Tier,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        value: serde_json::Value,
        ttl_seconds: u64,
        category: impl Into<String>,
        priority: u8,
        tier: Tier,
    ) -> Self {
        let now = now_secs();
        let key = key.into();
        let category = category.into();
        let size_bytes = estimate_size(&key, &value, &category);
        Self {
            key,
            value,
            created_at: now,
            last_accessed_at: now,
            ttl_seconds: ttl_seconds.max(1),
            access_count: 0,
            hit_count: 0,
            size_bytes,
            category,
            priority: priority.clamp(1, 5),
            tier,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.created_at) > self.ttl_seconds
    }

    pub fn touch(&mut self, now: u64) {
        self.last_accessed_at = now;
        self.access_count += 1;
        self.hit_count += 1;
    }

    pub fn hit_rate(&self) -> f64 {
        if self.access_count == 0 {
            0.0
        } else {
            self.hit_count as f64 / self.access_count as f64
        }
    }

    /// Smart-TTL extension gate (§4.1): doubled, capped at `4 x default_ttl`,
    /// `created_at` reset so the new window starts now.
    pub fn maybe_extend_ttl(&mut self, default_ttl: u64, now: u64) {
        if self.access_count >= 5 && self.hit_rate() >= 0.7 {
            let cap = default_ttl.saturating_mul(4);
            self.ttl_seconds = (self.ttl_seconds.saturating_mul(2)).min(cap);
            self.created_at = now;
        }
    }
}

fn estimate_size(key: &str, value: &serde_json::Value, category: &str) -> usize {
    key.len() + category.len() + serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}

/// Monotonic counters plus derived stats, exposed via `cache.stats()`.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub deletes: AtomicU64,
    pub evictions: AtomicU64,
    pub expirations: AtomicU64,
    pub memory_pressure_events: AtomicU64,
}

impl CacheStats {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        crate::metrics::CACHE_HITS_TOTAL.inc();
    }
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::CACHE_MISSES_TOTAL.inc();
    }
    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        crate::metrics::CACHE_EVICTIONS_TOTAL.inc();
    }
    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
        crate::metrics::CACHE_EXPIRATIONS_TOTAL.inc();
    }
    pub fn record_memory_pressure(&self) {
        self.memory_pressure_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.hits.load(Ordering::Relaxed) + self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.hits.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    pub fn snapshot(&self, memory_bytes: usize, entries: usize) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            total_requests: self.total_requests(),
            memory_bytes,
            entries,
            memory_pressure_events: self.memory_pressure_events.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Serializable point-in-time snapshot of `CacheStats`, returned by
/// `cache.stats()`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub total_requests: u64,
    pub memory_bytes: usize,
    pub entries: usize,
    pub memory_pressure_events: u64,
    pub hit_rate: f64,
}

/// The bounded top-N "popular keys" set (§4.1 supplement): entries with
/// `access_count > 10` and `hit_rate > 0.8`, read by the warmer's pattern
/// loop as a seed list.
#[derive(Debug, Default)]
pub struct PopularKeys {
    pub keys: HashSet<String>,
}

impl PopularKeys {
    pub const CAPACITY: usize = 100;

    pub fn consider(&mut self, entry: &CacheEntry) {
        let qualifies = entry.access_count > 10 && entry.hit_rate() > 0.8;
        if qualifies && self.keys.len() < Self::CAPACITY {
            self.keys.insert(entry.key.clone());
        } else if !qualifies {
            self.keys.remove(&entry.key);
        }
    }
}

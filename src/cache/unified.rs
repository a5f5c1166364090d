//! L3: `UnifiedCache` — composes the memory store and the optional disk
//! tier; owns TTL/smart-TTL, priority+memory eviction, categories, and
//! stats (§4.1).

use super::disk::DiskStore;
use super::entry::{CacheEntry, CacheStats, CacheStatsSnapshot, Tier};
use super::memory::{MemoryStore, MemoryStoreConfig};
use crate::error::{Error, Result};
use crate::types::now_secs;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_memory_mb: usize,
    pub default_ttl_seconds: u64,
    pub enable_disk_cache: bool,
    pub cache_dir: String,
    pub cleanup_interval_seconds: u64,
    pub enable_smart_ttl: bool,
    pub enable_predictive_warming: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_memory_mb: 512,
            default_ttl_seconds: 1800,
            enable_disk_cache: true,
            cache_dir: ".cache/router-core".to_string(),
            cleanup_interval_seconds: 300,
            enable_smart_ttl: true,
            enable_predictive_warming: true,
        }
    }
}

pub struct UnifiedCache {
    config: CacheConfig,
    memory: MemoryStore,
    disk: Option<DiskStore>,
    stats: CacheStats,
}

impl UnifiedCache {
    pub fn new(config: CacheConfig) -> Result<Self> {
        let disk = if config.enable_disk_cache {
            Some(DiskStore::new(&config.cache_dir).map_err(Error::DiskIo)?)
        } else {
            None
        };
        let memory = MemoryStore::new(MemoryStoreConfig {
            max_entries: config.max_entries,
            max_memory_bytes: config.max_memory_mb * 1024 * 1024,
        });
        Ok(Self {
            config,
            memory,
            disk,
            stats: CacheStats::default(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// `get(key, category)`: category is accepted for interface symmetry
    /// with `set`, but lookups are by key alone — categories do not create
    /// separate namespaces (§4.1).
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = now_secs();
        if let Some(entry) = self.memory.get(key, now) {
            self.stats.record_hit();
            if self.config.enable_smart_ttl {
                self.memory.with_entry_mut(key, |e| {
                    e.maybe_extend_ttl(self.config.default_ttl_seconds, now)
                });
            }
            return Some(entry.value);
        }

        if let Some(disk) = &self.disk {
            if let Some(disk_entry) = disk.read(key, now, Tier::Warm) {
                let value = disk_entry.value.clone();
                self.memory.set(disk_entry);
                self.stats.record_hit();
                return Some(value);
            }
        }

        self.stats.record_miss();
        None
    }

    pub fn get_many(&self, keys: &[String]) -> Vec<(String, Option<serde_json::Value>)> {
        keys.iter().map(|k| (k.clone(), self.get(k))).collect()
    }

    pub fn has(&self, key: &str) -> bool {
        self.memory.has(key, now_secs())
    }

    /// Admits a new entry, evicting as needed. Returns `Ok(true)` if
    /// admitted, `Ok(false)` if refused because the value alone exceeds the
    /// memory budget (`AdmissionRefused`, never a panic).
    pub fn set(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
        ttl_seconds: u64,
        category: impl Into<String>,
        priority: u8,
    ) -> Result<bool> {
        self.set_tiered(key, value, ttl_seconds, category, priority, Tier::Warm)
    }

    pub fn set_tiered(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
        ttl_seconds: u64,
        category: impl Into<String>,
        priority: u8,
        tier: Tier,
    ) -> Result<bool> {
        let entry = CacheEntry::new(key, value, ttl_seconds, category, priority, tier);
        let report = self.memory.set(entry.clone());
        self.stats.record_set();
        for _ in 0..report.evicted {
            self.stats.record_eviction();
        }
        if report.memory_pressure {
            self.stats.record_memory_pressure();
        }
        if !report.admitted {
            return Ok(false);
        }
        if let Some(disk) = &self.disk {
            disk.write(&entry);
        }
        Ok(true)
    }

    pub fn set_many(
        &self,
        items: Vec<(String, serde_json::Value, u64, String, u8)>,
    ) -> Vec<(String, Result<bool>)> {
        items
            .into_iter()
            .map(|(k, v, ttl, cat, pri)| {
                let key = k.clone();
                (key, self.set(k, v, ttl, cat, pri))
            })
            .collect()
    }

    pub fn delete(&self, key: &str) -> bool {
        let removed = self.memory.delete(key);
        if removed {
            self.stats.record_delete();
        }
        if let Some(disk) = &self.disk {
            disk.delete(key);
        }
        removed
    }

    pub fn delete_many(&self, keys: &[String]) -> Vec<(String, bool)> {
        keys.iter().map(|k| (k.clone(), self.delete(k))).collect()
    }

    pub fn clear(&self, category: Option<&str>) -> usize {
        let count = self.memory.clear(category);
        if let Some(disk) = &self.disk {
            disk.clear(category);
        }
        count
    }

    /// -2 if absent, -1 if the entry has no meaningful remaining TTL to
    /// report (never emitted by this implementation since every entry
    /// carries a positive ttl_seconds), otherwise seconds remaining.
    pub fn ttl(&self, key: &str) -> i64 {
        self.memory.ttl_of(key, now_secs()).unwrap_or(-2)
    }

    pub fn categories(&self) -> Vec<String> {
        self.memory.categories()
    }

    pub fn memory_keys_in_category(&self, category: &str) -> Vec<String> {
        self.memory.keys_in_category(category)
    }

    pub fn popular_keys(&self) -> Vec<String> {
        self.memory.popular_keys()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats
            .snapshot(self.memory.memory_bytes(), self.memory.len())
    }

    pub fn memory_usage_fraction(&self) -> f64 {
        if self.memory.max_memory_bytes() == 0 {
            0.0
        } else {
            self.memory.memory_bytes() as f64 / self.memory.max_memory_bytes() as f64
        }
    }

    /// One sweep of the periodic expiration task (§4.1).
    pub fn sweep_expired(&self) -> usize {
        let expired = self.memory.sweep_expired(now_secs());
        for _ in 0..expired.len() {
            self.stats.record_expiration();
        }
        expired.len()
    }

    /// Low-frequency consistency check (§4.1 supplement): samples up to
    /// `sample_size` memory-resident keys that also have a disk copy and
    /// compares them for value mismatch or timestamp skew beyond 1 second.
    /// Observability only — a divergent pair is reported, never repaired.
    /// Returns 0 whenever the disk tier is disabled.
    pub fn sample_consistency(&self, sample_size: usize) -> usize {
        let Some(disk) = &self.disk else {
            return 0;
        };
        let mut mismatches = 0;
        for entry in self.memory.all_entries_snapshot().into_iter().take(sample_size) {
            if let Some(disk_entry) = disk.read_raw(&entry.key, entry.tier) {
                let value_mismatch = disk_entry.value != entry.value;
                let skew = entry.created_at.abs_diff(disk_entry.created_at);
                if value_mismatch || skew > 1 {
                    mismatches += 1;
                }
            }
        }
        mismatches
    }
}

/// Spawns the independently-cancellable cleanup loop (§5, §9: rearchitected
/// away from a single cooperative loop into its own task + shutdown
/// signal).
pub fn spawn_cleanup_loop(
    cache: Arc<UnifiedCache>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let interval = std::time::Duration::from_secs(cache.config().cleanup_interval_seconds.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cache.sweep_expired();
                    if removed > 0 {
                        debug!(removed, "cache cleanup sweep removed expired entries");
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("cache cleanup loop shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn cache(max_entries: usize) -> UnifiedCache {
        UnifiedCache::new(CacheConfig {
            max_entries,
            max_memory_mb: 64,
            default_ttl_seconds: 1800,
            enable_disk_cache: false,
            cache_dir: String::new(),
            cleanup_interval_seconds: 300,
            enable_smart_ttl: true,
            enable_predictive_warming: true,
        })
        .unwrap()
    }

    // S1 — LRU eviction with priority.
    #[test]
    fn s1_lru_eviction_with_priority() {
        let c = cache(3);
        c.set("a", json!(1), 300, "t", 1).unwrap();
        c.set("b", json!(2), 300, "t", 1).unwrap();
        c.set("c", json!(3), 300, "t", 5).unwrap();
        assert_eq!(c.get("a"), Some(json!(1)));
        assert_eq!(c.get("a"), Some(json!(1)));
        c.set("d", json!(4), 300, "t", 1).unwrap();

        assert_eq!(c.get("b"), None);
        assert_eq!(c.get("a"), Some(json!(1)));
        assert_eq!(c.get("c"), Some(json!(3)));
        assert_eq!(c.get("d"), Some(json!(4)));
    }

    // S2 — TTL expiration.
    #[tokio::test]
    async fn s2_ttl_expiration() {
        let c = cache(100);
        c.set("x", json!(1), 2, "t", 1).unwrap();
        assert_eq!(c.get("x"), Some(json!(1)));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(c.sweep_expired(), 1);
        assert_eq!(c.stats().expirations, 1);
        assert_eq!(c.get("x"), None);
    }

    // S3 — Smart TTL extension.
    #[test]
    fn s3_smart_ttl_extension() {
        let c = cache(100);
        c.set("y", json!(1), 10, "t", 1).unwrap();
        for _ in 0..6 {
            assert_eq!(c.get("y"), Some(json!(1)));
        }
        let ttl = c.ttl("y");
        assert!(ttl >= 20 && ttl <= 40, "ttl was {}", ttl);
    }

    #[test]
    fn hits_plus_misses_equals_total() {
        let c = cache(10);
        c.set("a", json!(1), 300, "t", 1).unwrap();
        c.get("a");
        c.get("missing");
        let stats = c.stats();
        assert_eq!(stats.hits + stats.misses, stats.total_requests);
    }

    #[test]
    fn oversized_value_is_admission_refused() {
        let c = UnifiedCache::new(CacheConfig {
            max_entries: 10,
            max_memory_mb: 0,
            default_ttl_seconds: 300,
            enable_disk_cache: false,
            cache_dir: String::new(),
            cleanup_interval_seconds: 300,
            enable_smart_ttl: false,
            enable_predictive_warming: false,
        })
        .unwrap();
        let admitted = c.set("big", json!("x".repeat(1024)), 300, "t", 1).unwrap();
        assert!(!admitted);
    }
}

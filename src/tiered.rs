//! L7: `TieredCacheManager` — a tier classification layered on top of
//! `UnifiedCache`, composing the warmer, the monitor, and a distributed
//! lock for batch warming (§4.2).
//!
//! Tiering never moves bytes between stores — it only modulates the
//! effective TTL multiplier and the warmer's notion of priority.

use crate::cache::entry::Tier;
use crate::cache::unified::UnifiedCache;
use crate::error::Result;
use crate::lock::DistributedLock;
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Default category → tier assignments (§4.2).
pub fn default_category_tiers() -> HashMap<&'static str, Tier> {
    let mut map = HashMap::new();
    for category in ["models", "config", "tokens"] {
        map.insert(category, Tier::Hot);
    }
    for category in ["responses", "summaries", "metrics", "sessions", "queries", "results"] {
        map.insert(category, Tier::Warm);
    }
    map.insert("analytics", Tier::Cold);
    map
}

#[derive(Debug, Clone)]
pub struct TieredCacheConfig {
    pub base_ttl_seconds: u64,
    pub hot_multiplier: f64,
    pub warm_multiplier: f64,
    pub cold_multiplier: f64,
    pub promote_hot_threshold: u64,
    pub promote_warm_threshold: u64,
    pub max_concurrent_warmings: usize,
    pub warm_batch_lock_ttl: Duration,
    pub warm_batch_lock_deadline: Duration,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            base_ttl_seconds: 1800,
            hot_multiplier: 2.0,
            warm_multiplier: 1.0,
            cold_multiplier: 0.5,
            promote_hot_threshold: 10,
            promote_warm_threshold: 3,
            max_concurrent_warmings: 10,
            warm_batch_lock_ttl: Duration::from_secs(60),
            warm_batch_lock_deadline: Duration::from_secs(30),
        }
    }
}

pub struct TieredCacheManager {
    config: TieredCacheConfig,
    cache: Arc<UnifiedCache>,
    lock: Arc<dyn DistributedLock>,
    category_tiers: DashMap<String, Tier>,
    key_access_counts: DashMap<String, u64>,
    key_promotions: DashMap<String, Tier>,
}

impl TieredCacheManager {
    pub fn new(config: TieredCacheConfig, cache: Arc<UnifiedCache>, lock: Arc<dyn DistributedLock>) -> Arc<Self> {
        let category_tiers = DashMap::new();
        for (category, tier) in default_category_tiers() {
            category_tiers.insert(category.to_string(), tier);
        }
        Arc::new(Self {
            config,
            cache,
            lock,
            category_tiers,
            key_access_counts: DashMap::new(),
            key_promotions: DashMap::new(),
        })
    }

    pub fn base_ttl_seconds(&self) -> u64 {
        self.config.base_ttl_seconds
    }

    pub fn set_category_tier(&self, category: &str, tier: Tier) {
        self.category_tiers.insert(category.to_string(), tier);
    }

    fn category_tier(&self, category: &str) -> Tier {
        self.category_tiers.get(category).map(|t| *t).unwrap_or(Tier::Warm)
    }

    /// Effective tier for a specific key: the higher of its category default
    /// and any access-driven promotion (§4.2).
    pub fn effective_tier(&self, key: &str, category: &str) -> Tier {
        let base = self.category_tier(category);
        match self.key_promotions.get(key) {
            Some(promoted) => base.max(*promoted),
            None => base,
        }
    }

    fn record_key_access(&self, key: &str) {
        let mut count = self.key_access_counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        if *count >= self.config.promote_hot_threshold {
            self.key_promotions.insert(key.to_string(), Tier::Hot);
        } else if *count >= self.config.promote_warm_threshold {
            self.key_promotions
                .entry(key.to_string())
                .or_insert(Tier::Warm);
        }
    }

    fn effective_ttl(&self, tier: Tier) -> u64 {
        let multiplier = tier.ttl_multiplier(self.config.hot_multiplier, self.config.warm_multiplier, self.config.cold_multiplier);
        ((self.config.base_ttl_seconds as f64) * multiplier).max(1.0) as u64
    }

    pub fn get(&self, key: &str, category: &str) -> Option<serde_json::Value> {
        self.record_key_access(key);
        let _ = category;
        self.cache.get(key)
    }

    pub fn get_many(&self, keys: &[String], category: &str) -> Vec<(String, Option<serde_json::Value>)> {
        keys.iter().map(|k| (k.clone(), self.get(k, category))).collect()
    }

    /// `set` with this key's own effective tier-adjusted TTL (§4.2).
    pub fn set(&self, key: &str, value: serde_json::Value, category: &str, priority: u8) -> Result<bool> {
        let tier = self.effective_tier(key, category);
        let ttl = self.effective_ttl(tier);
        self.cache.set_tiered(key, value, ttl, category, priority, tier)
    }

    /// Used by the warmer's dispatch loop, which has already computed its
    /// own kind-specific TTL (demand/predictive/scheduled) and should not
    /// have it overridden by tier TTL math.
    pub fn warm_set(&self, key: &str, value: serde_json::Value, ttl_seconds: u64, category: &str) -> Result<bool> {
        let tier = self.effective_tier(key, category);
        self.cache.set_tiered(key, value, ttl_seconds, category, 3, tier)
    }

    pub fn keys_in_category(&self, category: &str) -> Vec<String> {
        self.cache
            .memory_keys_in_category(category)
    }

    fn batch_id(keys: &[String]) -> String {
        let mut sorted: Vec<&String> = keys.iter().collect();
        sorted.sort();
        let joined = sorted.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(",");
        format!("{:x}", blake3::hash(joined.as_bytes()))
    }

    /// Batch warming entry point (§4.2). Blocks until the distributed lock
    /// is acquired, fetches only the keys not already present, and fans the
    /// getter calls out with bounded concurrency.
    pub async fn warm_cache_batch<F, Fut>(
        &self,
        keys: Vec<String>,
        category: &str,
        getter: F,
    ) -> Result<Vec<(String, bool)>>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<serde_json::Value>> + Send,
    {
        let batch_id = Self::batch_id(&keys);
        let lock_key = format!("warm_batch:{}:{}", category, batch_id);
        let token = self
            .lock
            .acquire(&lock_key, self.config.warm_batch_lock_ttl, self.config.warm_batch_lock_deadline)
            .await?;

        let now_present = self.get_many(&keys, category);
        let missing: Vec<String> = now_present
            .into_iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k)
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_warmings));
        let outcomes = Arc::new(DashMap::new());
        let mut handles = Vec::new();
        let total_warmed = Arc::new(AtomicU64::new(0));
        for key in missing {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let outcomes = outcomes.clone();
            let category = category.to_string();
            let getter_key = key.clone();
            let total_warmed = total_warmed.clone();
            let value_fut = getter(getter_key.clone());
            let cache = self.cache.clone();
            let tier = self.effective_tier(&key, &category);
            let ttl = self.effective_ttl(tier);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let value = value_fut.await;
                let ok = match value {
                    Some(v) => {
                        let admitted = cache.set_tiered(getter_key.clone(), v, ttl, category, 3, tier).unwrap_or(false);
                        if admitted {
                            total_warmed.fetch_add(1, Ordering::Relaxed);
                        }
                        admitted
                    },
                    None => false,
                };
                outcomes.insert(getter_key, ok);
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        self.lock.release(&lock_key, &token).await;

        let mut results: Vec<(String, bool)> = keys
            .into_iter()
            .map(|k| {
                let warmed = outcomes.get(&k).map(|v| *v).unwrap_or(true);
                (k, warmed)
            })
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::unified::CacheConfig;
    use crate::lock::LocalLock;

    fn manager() -> Arc<TieredCacheManager> {
        let cache = Arc::new(
            UnifiedCache::new(CacheConfig {
                enable_disk_cache: false,
                cache_dir: String::new(),
                ..CacheConfig::default()
            })
            .unwrap(),
        );
        TieredCacheManager::new(TieredCacheConfig::default(), cache, Arc::new(LocalLock::new()))
    }

    #[test]
    fn models_category_defaults_to_hot() {
        let mgr = manager();
        assert_eq!(mgr.effective_tier("m1", "models"), Tier::Hot);
        assert_eq!(mgr.effective_tier("a1", "analytics"), Tier::Cold);
    }

    #[test]
    fn frequent_access_promotes_key_to_hot() {
        let mgr = manager();
        for _ in 0..10 {
            mgr.get("k", "analytics");
        }
        assert_eq!(mgr.effective_tier("k", "analytics"), Tier::Hot);
    }

    #[tokio::test]
    async fn warm_cache_batch_fills_missing_keys() {
        let mgr = manager();
        mgr.set("already", serde_json::json!(1), "responses", 3).unwrap();
        let keys = vec!["already".to_string(), "fresh".to_string()];
        let results = mgr
            .warm_cache_batch(keys, "responses", |k| async move { Some(serde_json::json!(k)) })
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(mgr.get("fresh", "responses").is_some());
    }

    // S4 — two "instances" sharing one cache and one distributed lock race
    // to warm the same batch; the getter must still run exactly once per
    // missing key across both callers.
    #[tokio::test]
    async fn warm_cache_batch_across_two_instances_invokes_getter_once_per_key() {
        let cache = Arc::new(
            UnifiedCache::new(CacheConfig {
                enable_disk_cache: false,
                cache_dir: String::new(),
                ..CacheConfig::default()
            })
            .unwrap(),
        );
        let lock = Arc::new(LocalLock::new());
        let mgr_a = TieredCacheManager::new(TieredCacheConfig::default(), cache.clone(), lock.clone());
        let mgr_b = TieredCacheManager::new(TieredCacheConfig::default(), cache, lock);

        let calls = Arc::new(AtomicU64::new(0));
        let calls_a = calls.clone();
        let calls_b = calls.clone();
        let keys = || vec!["k1".to_string(), "k2".to_string()];

        let run_a = mgr_a.warm_cache_batch(keys(), "test", move |k| {
            let calls_a = calls_a.clone();
            async move {
                calls_a.fetch_add(1, Ordering::Relaxed);
                Some(serde_json::json!(k))
            }
        });
        let run_b = mgr_b.warm_cache_batch(keys(), "test", move |k| {
            let calls_b = calls_b.clone();
            async move {
                calls_b.fetch_add(1, Ordering::Relaxed);
                Some(serde_json::json!(k))
            }
        });

        let (res_a, res_b) = tokio::join!(run_a, run_b);
        assert_eq!(res_a.unwrap().len(), 2);
        assert_eq!(res_b.unwrap().len(), 2);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }
}

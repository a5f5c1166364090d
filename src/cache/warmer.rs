//! L4: `CacheWarmer` — access-pattern analysis plus predictive and
//! scheduled warming (§4.3).
//!
//! Three cooperating but independently cancellable loops (§9): a pattern
//! analysis loop, a schedule loop, and a dispatch loop draining a bounded
//! queue. `record_access` is a fire-and-forget, non-blocking write.

use crate::tiered::TieredCacheManager;
use crate::types::now_secs;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A key's access history, trimmed to a 7-day window (§3 AccessPattern).
#[derive(Debug, Clone)]
pub struct AccessPattern {
    pub key: String,
    pub category: String,
    pub access_count: u64,
    pub last_accessed_at: u64,
    pub sample_window: VecDeque<u64>,
    pub priority: u8,
}

const SEVEN_DAYS_SECS: u64 = 7 * 24 * 3600;
const ONE_DAY_SECS: u64 = 24 * 3600;

impl AccessPattern {
    fn new(key: String, category: String) -> Self {
        Self {
            key,
            category,
            access_count: 0,
            last_accessed_at: 0,
            sample_window: VecDeque::new(),
            priority: 3,
        }
    }

    fn record(&mut self, now: u64) {
        self.sample_window.push_back(now);
        while self
            .sample_window
            .front()
            .is_some_and(|t| now.saturating_sub(*t) > SEVEN_DAYS_SECS)
        {
            self.sample_window.pop_front();
        }
        self.access_count += 1;
        self.last_accessed_at = now;
    }

    /// Accesses within the trailing 24h, expressed as a per-hour rate.
    pub fn frequency_last_24h(&self, now: u64) -> f64 {
        let count = self
            .sample_window
            .iter()
            .filter(|t| now.saturating_sub(**t) <= ONE_DAY_SECS)
            .count();
        count as f64 / 24.0
    }

    fn recency_decay(&self, now: u64) -> f64 {
        let age = now.saturating_sub(self.last_accessed_at) as f64;
        (-age / ONE_DAY_SECS as f64).exp()
    }

    /// `frequency_last_24h x recency_decay(24h) x (priority/5)` (§3).
    pub fn predictive_score(&self, now: u64) -> f64 {
        self.frequency_last_24h(now) * self.recency_decay(now) * (self.priority as f64 / 5.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmingSchedule {
    pub name: String,
    pub interval_seconds: u64,
    pub enabled: bool,
    pub priority: u8,
    pub target_categories: Vec<String>,
    pub max_concurrent: usize,
    #[serde(skip)]
    pub last_run: u64,
}

impl WarmingSchedule {
    pub fn new(name: &str, interval_seconds: u64, target_categories: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            interval_seconds,
            enabled: true,
            priority: 3,
            target_categories: target_categories.iter().map(|s| s.to_string()).collect(),
            max_concurrent: 10,
            last_run: 0,
        }
    }
}

/// Default schedules (§4.3 supplement), pre-registered unless overridden.
pub fn default_schedules() -> Vec<WarmingSchedule> {
    vec![
        WarmingSchedule::new("high_frequency", 1800, &["responses", "queries"]),
        WarmingSchedule::new("medium_frequency", 7200, &["summaries", "results"]),
        WarmingSchedule::new("low_frequency", 21600, &["analytics"]),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WarmingKind {
    Demand,
    Predictive,
    Scheduled { interval_seconds: u64 },
}

impl WarmingKind {
    fn ttl_seconds(self, base: u64) -> u64 {
        match self {
            WarmingKind::Demand => (base as f64 * 1.5) as u64,
            WarmingKind::Predictive => base,
            WarmingKind::Scheduled { interval_seconds } => {
                (2 * interval_seconds).min(4 * base)
            },
        }
    }
}

pub type Getter =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Option<serde_json::Value>> + Send>> + Send + Sync>;

struct WarmingTask {
    key: String,
    category: String,
    kind: WarmingKind,
    getter: Getter,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct WarmerStats {
    pub patterns_tracked: usize,
    pub warmed_total: u64,
    pub queue_depth: usize,
    pub queue_rejections: u64,
}

#[derive(Debug, Clone)]
pub struct CacheWarmerConfig {
    pub max_concurrent_warmings: usize,
    pub warming_queue_capacity: usize,
}

impl Default for CacheWarmerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_warmings: 10,
            warming_queue_capacity: 1000,
        }
    }
}

pub struct CacheWarmer {
    config: CacheWarmerConfig,
    patterns: DashMap<String, AccessPattern>,
    schedules: Mutex<Vec<WarmingSchedule>>,
    queue: Mutex<VecDeque<WarmingTask>>,
    semaphore: Arc<Semaphore>,
    warmed_total: AtomicU64,
    queue_rejections: AtomicU64,
    in_flight: DashMap<String, ()>,
    pending_getters: DashMap<String, Getter>,
}

impl CacheWarmer {
    pub fn new(config: CacheWarmerConfig) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_warmings));
        Arc::new(Self {
            config,
            patterns: DashMap::new(),
            schedules: Mutex::new(default_schedules()),
            queue: Mutex::new(VecDeque::new()),
            semaphore,
            warmed_total: AtomicU64::new(0),
            queue_rejections: AtomicU64::new(0),
            in_flight: DashMap::new(),
            pending_getters: DashMap::new(),
        })
    }

    /// Registers (or refreshes) a getter a key's own reconstruction logic
    /// supplies, so predictive warming can re-fetch without the caller in
    /// the loop.
    pub fn register_getter(&self, key: &str, getter: Getter) {
        self.pending_getters.insert(key.to_string(), getter);
    }

    pub fn record_access(&self, key: &str, category: &str) {
        let now = now_secs();
        let mut pattern = self
            .patterns
            .entry(key.to_string())
            .or_insert_with(|| AccessPattern::new(key.to_string(), category.to_string()));
        pattern.record(now);
    }

    async fn enqueue(&self, task: WarmingTask) -> bool {
        if self.in_flight.contains_key(&task.key) {
            return false;
        }
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.config.warming_queue_capacity {
            self.queue_rejections.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            crate::metrics::WARMER_QUEUE_REJECTIONS_TOTAL.inc();
            return false;
        }
        self.in_flight.insert(task.key.clone(), ());
        queue.push_back(task);
        true
    }

    /// Demand warming: `warm_key` fails fast when the queue is full (§5
    /// backpressure).
    pub async fn warm_key(&self, key: &str, category: &str, getter: Getter) -> bool {
        self.enqueue(WarmingTask {
            key: key.to_string(),
            category: category.to_string(),
            kind: WarmingKind::Demand,
            getter,
        })
        .await
    }

    pub async fn stats(&self) -> WarmerStats {
        let stats = WarmerStats {
            patterns_tracked: self.patterns.len(),
            warmed_total: self.warmed_total.load(std::sync::atomic::Ordering::Relaxed),
            queue_depth: self.queue.lock().await.len(),
            queue_rejections: self.queue_rejections.load(std::sync::atomic::Ordering::Relaxed),
        };
        crate::metrics::sync_warmer_stats(&stats);
        stats
    }

    /// Pull-style diagnostic; never mutates the warmer's own configuration
    /// (§4.3 supplement).
    pub fn optimize_strategy(&self) -> Vec<String> {
        let mut suggestions = Vec::new();
        if self.queue_rejections.load(std::sync::atomic::Ordering::Relaxed) > 0 {
            suggestions.push("warming queue saturating; consider raising max_concurrent_warmings or warming_queue_capacity".to_string());
        }
        suggestions
    }
}

fn spawn_pattern_loop(
    warmer: Arc<CacheWarmer>,
    cache: Arc<TieredCacheManager>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = now_secs();
                    let mut scored: Vec<(String, String, f64)> = Vec::new();
                    for mut entry in warmer.patterns.iter_mut() {
                        let freq = entry.frequency_last_24h(now);
                        if freq > 10.0 {
                            entry.priority = (entry.priority + 1).min(5);
                        } else if freq < 1.0 {
                            entry.priority = entry.priority.saturating_sub(1).max(1);
                        }
                        let score = entry.predictive_score(now);
                        if score > 0.5 {
                            scored.push((entry.key.clone(), entry.category.clone(), score));
                        }
                    }
                    scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
                    for (key, category, _) in scored.into_iter().take(10) {
                        let Some(getter) = warmer.pending_getters.get(&key).map(|g| g.clone()) else {
                            continue;
                        };
                        let _ = warmer
                            .enqueue(WarmingTask { key, category, kind: WarmingKind::Predictive, getter })
                            .await;
                    }
                    let _ = &cache;
                }
                _ = shutdown.cancelled() => {
                    info!("warming pattern loop shutting down");
                    break;
                }
            }
        }
    })
}

fn spawn_schedule_loop(
    warmer: Arc<CacheWarmer>,
    cache: Arc<TieredCacheManager>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = now_secs();
                    let mut schedules = warmer.schedules.lock().await;
                    for schedule in schedules.iter_mut() {
                        if !schedule.enabled || now.saturating_sub(schedule.last_run) < schedule.interval_seconds {
                            continue;
                        }
                        schedule.last_run = now;
                        let mut enqueued = 0usize;
                        for category in &schedule.target_categories {
                            for key in cache.keys_in_category(category) {
                                if enqueued >= schedule.max_concurrent {
                                    break;
                                }
                                let Some(getter) = warmer.pending_getters.get(&key).map(|g| g.clone()) else {
                                    continue;
                                };
                                let task = WarmingTask {
                                    key,
                                    category: category.clone(),
                                    kind: WarmingKind::Scheduled { interval_seconds: schedule.interval_seconds },
                                    getter,
                                };
                                if warmer.enqueue(task).await {
                                    enqueued += 1;
                                }
                            }
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("warming schedule loop shutting down");
                    break;
                }
            }
        }
    })
}

fn spawn_dispatch_loop(
    warmer: Arc<CacheWarmer>,
    cache: Arc<TieredCacheManager>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {
                    let task = {
                        let mut queue = warmer.queue.lock().await;
                        queue.pop_front()
                    };
                    let Some(task) = task else { continue; };
                    let permit = warmer.semaphore.clone().acquire_owned().await;
                    let warmer = warmer.clone();
                    let cache = cache.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let value = (task.getter)(task.key.clone()).await;
                        if let Some(value) = value {
                            let ttl = task.kind.ttl_seconds(cache.base_ttl_seconds());
                            let _ = cache.warm_set(&task.key, value, ttl, &task.category);
                            warmer.warmed_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            crate::metrics::WARMER_WARMED_TOTAL.inc();
                        } else {
                            warn!(key = %task.key, "warming getter returned nothing");
                        }
                        warmer.in_flight.remove(&task.key);
                    });
                }
                _ = shutdown.cancelled() => {
                    info!("warming dispatch loop shutting down");
                    break;
                }
            }
        }
    })
}

pub fn spawn_warmer_loops(
    warmer: Arc<CacheWarmer>,
    cache: Arc<TieredCacheManager>,
    shutdown: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        spawn_pattern_loop(warmer.clone(), cache.clone(), shutdown.clone()),
        spawn_schedule_loop(warmer.clone(), cache.clone(), shutdown.clone()),
        spawn_dispatch_loop(warmer, cache, shutdown),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predictive_score_decays_with_age() {
        let mut pattern = AccessPattern::new("k".into(), "c".into());
        let now = 1_000_000u64;
        for _ in 0..20 {
            pattern.record(now);
        }
        pattern.priority = 5;
        let fresh_score = pattern.predictive_score(now);
        let stale_score = pattern.predictive_score(now + 2 * ONE_DAY_SECS);
        assert!(stale_score < fresh_score);
    }

    #[tokio::test]
    async fn warm_key_fails_fast_when_queue_full() {
        let warmer = CacheWarmer::new(CacheWarmerConfig {
            max_concurrent_warmings: 1,
            warming_queue_capacity: 1,
        });
        let getter: Getter = Arc::new(|_| Box::pin(async { Some(serde_json::json!(1)) }));
        assert!(warmer.warm_key("a", "cat", getter.clone()).await);
        assert!(!warmer.warm_key("b", "cat", getter).await);
    }
}

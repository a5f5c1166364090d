//! L5: `CacheMonitor` — periodic health sampling and threshold-based
//! alerting, folded with the consistency-monitor supplement (§4.1, §4.4).
//!
//! Pull-only interface: the monitor never mutates cache state, it only
//! samples `UnifiedCache::stats()` and compares against configured
//! thresholds. Callers poll `latest_report()` or subscribe via
//! `spawn_monitor_loop`'s broadcast channel.

use super::unified::UnifiedCache;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowHitRate,
    HighMemoryPressure,
    HighExpirationRate,
    /// Supplement (§4.4): disk and memory tiers disagree for a sampled key
    /// more often than expected — surfaced here rather than a separate
    /// consistency-monitor type.
    ConsistencyDrift,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    pub observed: f64,
    pub threshold: f64,
    pub sampled_at: u64,
}

#[derive(Debug, Clone)]
pub struct MonitorThresholds {
    pub min_hit_rate: f64,
    pub max_memory_usage_fraction: f64,
    pub max_expiration_rate_per_sample: f64,
    pub max_consistency_mismatches_per_sample: u64,
    /// Number of memory-resident keys spot-checked against disk per sample
    /// (§4.1 supplement: "a bounded number of keys").
    pub consistency_sample_size: usize,
    /// Hit rate must stay below `min_hit_rate` for this many consecutive
    /// samples before `LowHitRate` fires (§4.4: "two consecutive samples").
    pub low_hit_rate_consecutive_samples: u32,
    /// Memory usage must stay above `max_memory_usage_fraction` for this
    /// many consecutive samples before `HighMemoryPressure` fires (§4.4:
    /// "three consecutive samples").
    pub high_memory_consecutive_samples: u32,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            min_hit_rate: 0.9,
            max_memory_usage_fraction: 0.85,
            max_expiration_rate_per_sample: 0.3,
            max_consistency_mismatches_per_sample: 5,
            consistency_sample_size: 20,
            low_hit_rate_consecutive_samples: 2,
            high_memory_consecutive_samples: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub sampled_at: u64,
    pub hit_rate: f64,
    pub memory_usage_fraction: f64,
    pub entries: usize,
    pub alerts: Vec<Alert>,
}

pub struct CacheMonitor {
    thresholds: MonitorThresholds,
    latest: parking_lot::Mutex<Option<HealthReport>>,
    previous_expirations: AtomicU64,
    previous_total_requests: AtomicU64,
    consistency_mismatches_this_sample: AtomicU64,
    consecutive_low_hit_rate: AtomicU64,
    consecutive_high_memory: AtomicU64,
    alert_tx: broadcast::Sender<Alert>,
}

impl CacheMonitor {
    pub fn new(thresholds: MonitorThresholds) -> Arc<Self> {
        let (alert_tx, _rx) = broadcast::channel(256);
        Arc::new(Self {
            thresholds,
            latest: parking_lot::Mutex::new(None),
            previous_expirations: AtomicU64::new(0),
            previous_total_requests: AtomicU64::new(0),
            consistency_mismatches_this_sample: AtomicU64::new(0),
            consecutive_low_hit_rate: AtomicU64::new(0),
            consecutive_high_memory: AtomicU64::new(0),
            alert_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.alert_tx.subscribe()
    }

    pub fn latest_report(&self) -> Option<HealthReport> {
        self.latest.lock().clone()
    }

    /// Records a disk/memory mismatch observed by the caller (e.g. during a
    /// spot-check read) so the next sample can fold it into `ConsistencyDrift`.
    pub fn note_consistency_mismatch(&self) {
        self.consistency_mismatches_this_sample.fetch_add(1, Ordering::Relaxed);
    }

    fn sample(&self, cache: &UnifiedCache, now: u64) -> HealthReport {
        let stats = cache.stats();
        crate::metrics::sync_cache_stats(&stats);
        crate::metrics::CACHE_MEMORY_USAGE_FRACTION.set(cache.memory_usage_fraction());
        let mut alerts = Vec::new();

        if stats.total_requests > 0 && stats.hit_rate < self.thresholds.min_hit_rate {
            let streak = self.consecutive_low_hit_rate.fetch_add(1, Ordering::Relaxed) + 1;
            if streak >= self.thresholds.low_hit_rate_consecutive_samples as u64 {
                alerts.push(Alert {
                    kind: AlertKind::LowHitRate,
                    message: format!(
                        "hit rate {:.2} below threshold {:.2} for {} consecutive samples",
                        stats.hit_rate, self.thresholds.min_hit_rate, streak
                    ),
                    observed: stats.hit_rate,
                    threshold: self.thresholds.min_hit_rate,
                    sampled_at: now,
                });
            }
        } else {
            self.consecutive_low_hit_rate.store(0, Ordering::Relaxed);
        }

        let memory_fraction = cache.memory_usage_fraction();
        if memory_fraction > self.thresholds.max_memory_usage_fraction {
            let streak = self.consecutive_high_memory.fetch_add(1, Ordering::Relaxed) + 1;
            if streak >= self.thresholds.high_memory_consecutive_samples as u64 {
                alerts.push(Alert {
                    kind: AlertKind::HighMemoryPressure,
                    message: format!(
                        "memory usage {:.2} exceeds threshold {:.2} for {} consecutive samples",
                        memory_fraction, self.thresholds.max_memory_usage_fraction, streak
                    ),
                    observed: memory_fraction,
                    threshold: self.thresholds.max_memory_usage_fraction,
                    sampled_at: now,
                });
            }
        } else {
            self.consecutive_high_memory.store(0, Ordering::Relaxed);
        }

        let prev_expirations = self.previous_expirations.swap(stats.expirations, Ordering::Relaxed);
        let prev_total = self.previous_total_requests.swap(stats.total_requests, Ordering::Relaxed);
        let delta_expirations = stats.expirations.saturating_sub(prev_expirations) as f64;
        let delta_requests = stats.total_requests.saturating_sub(prev_total).max(1) as f64;
        let expiration_rate = delta_expirations / delta_requests;
        if expiration_rate > self.thresholds.max_expiration_rate_per_sample {
            alerts.push(Alert {
                kind: AlertKind::HighExpirationRate,
                message: format!("expiration rate {:.2} exceeds threshold {:.2}", expiration_rate, self.thresholds.max_expiration_rate_per_sample),
                observed: expiration_rate,
                threshold: self.thresholds.max_expiration_rate_per_sample,
                sampled_at: now,
            });
        }

        let sampled_mismatches = cache.sample_consistency(self.thresholds.consistency_sample_size);
        for _ in 0..sampled_mismatches {
            self.note_consistency_mismatch();
        }
        let mismatches = self.consistency_mismatches_this_sample.swap(0, Ordering::Relaxed);
        if mismatches > self.thresholds.max_consistency_mismatches_per_sample {
            alerts.push(Alert {
                kind: AlertKind::ConsistencyDrift,
                message: format!("{} disk/memory mismatches observed this sample", mismatches),
                observed: mismatches as f64,
                threshold: self.thresholds.max_consistency_mismatches_per_sample as f64,
                sampled_at: now,
            });
        }

        HealthReport {
            sampled_at: now,
            hit_rate: stats.hit_rate,
            memory_usage_fraction: memory_fraction,
            entries: stats.entries,
            alerts,
        }
    }
}

pub fn spawn_monitor_loop(
    monitor: Arc<CacheMonitor>,
    cache: Arc<UnifiedCache>,
    interval_seconds: u64,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_seconds.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = crate::types::now_secs();
                    let report = monitor.sample(&cache, now);
                    for alert in &report.alerts {
                        warn!(kind = ?alert.kind, observed = alert.observed, threshold = alert.threshold, "{}", alert.message);
                        let _ = monitor.alert_tx.send(alert.clone());
                    }
                    *monitor.latest.lock() = Some(report);
                }
                _ = shutdown.cancelled() => {
                    info!("cache monitor loop shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::unified::CacheConfig;

    #[test]
    fn low_hit_rate_raises_alert() {
        let cache = UnifiedCache::new(CacheConfig {
            enable_disk_cache: false,
            cache_dir: String::new(),
            ..CacheConfig::default()
        })
        .unwrap();
        cache.set("k", serde_json::json!(1), 300, "t", 1).unwrap();
        for _ in 0..10 {
            cache.get("missing-key");
        }
        let monitor = CacheMonitor::new(MonitorThresholds::default());
        // First breach only arms the streak (§4.4: two consecutive samples).
        let report = monitor.sample(&cache, 1);
        assert!(!report.alerts.iter().any(|a| a.kind == AlertKind::LowHitRate));
        let report = monitor.sample(&cache, 2);
        assert!(report.alerts.iter().any(|a| a.kind == AlertKind::LowHitRate));
    }

    #[test]
    fn consistency_mismatch_alert_resets_after_sample() {
        let cache = UnifiedCache::new(CacheConfig {
            enable_disk_cache: false,
            cache_dir: String::new(),
            ..CacheConfig::default()
        })
        .unwrap();
        let monitor = CacheMonitor::new(MonitorThresholds {
            max_consistency_mismatches_per_sample: 1,
            ..MonitorThresholds::default()
        });
        monitor.note_consistency_mismatch();
        monitor.note_consistency_mismatch();
        monitor.note_consistency_mismatch();
        let report = monitor.sample(&cache, 1);
        assert!(report.alerts.iter().any(|a| a.kind == AlertKind::ConsistencyDrift));
        let report2 = monitor.sample(&cache, 2);
        assert!(!report2.alerts.iter().any(|a| a.kind == AlertKind::ConsistencyDrift));
    }

    // A diverged disk copy must be picked up by the sampling pass itself,
    // not just by the external `note_consistency_mismatch` hook.
    #[test]
    fn sample_detects_diverged_disk_copy() {
        let dir = tempfile::tempdir().unwrap();
        let cache = UnifiedCache::new(CacheConfig {
            enable_disk_cache: true,
            cache_dir: dir.path().to_string_lossy().to_string(),
            ..CacheConfig::default()
        })
        .unwrap();
        cache.set("k", serde_json::json!("memory-value"), 300, "t", 1).unwrap();

        // Simulate drift: rewrite the on-disk record with a different value.
        use md5::{Digest, Md5};
        let mut hasher = Md5::new();
        hasher.update(b"k");
        let disk_path = dir.path().join(format!("{:x}.json", hasher.finalize()));
        let mut record: serde_json::Value = serde_json::from_slice(&std::fs::read(&disk_path).unwrap()).unwrap();
        record["value"] = serde_json::json!("stale-disk-value");
        std::fs::write(&disk_path, serde_json::to_vec(&record).unwrap()).unwrap();

        let monitor = CacheMonitor::new(MonitorThresholds {
            max_consistency_mismatches_per_sample: 0,
            consistency_sample_size: 20,
            ..MonitorThresholds::default()
        });
        let report = monitor.sample(&cache, 1);
        assert!(report.alerts.iter().any(|a| a.kind == AlertKind::ConsistencyDrift));
    }
}

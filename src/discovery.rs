//! L8: `ProviderDiscovery` — EWMA-smoothed health bucketing per provider
//! (§4.6), grounded in the teacher's `health::checker` sampling loop but
//! replacing active HTTP probing with passive result recording plus an
//! optional probe hook.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const EWMA_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProviderHealth {
    Unhealthy,
    Poor,
    Fair,
    Good,
    Excellent,
}

struct MetricsInner {
    success_rate: f64,
    recent_latency_ms: f64,
}

/// Per-provider EWMA state plus raw counters, behind a lock since the two
/// EWMAs must update atomically with respect to each other.
pub struct ProviderMetrics {
    inner: parking_lot::Mutex<MetricsInner>,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    last_request_at: AtomicU64,
    models: parking_lot::Mutex<Vec<String>>,
}

impl ProviderMetrics {
    fn new() -> Self {
        Self {
            inner: parking_lot::Mutex::new(MetricsInner {
                success_rate: 1.0,
                recent_latency_ms: 0.0,
            }),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            last_request_at: AtomicU64::new(0),
            models: parking_lot::Mutex::new(Vec::new()),
        }
    }

    fn record(&self, success: bool, latency_ms: f64, now: u64) {
        let mut inner = self.inner.lock();
        let observed_success = if success { 1.0 } else { 0.0 };
        inner.success_rate = EWMA_ALPHA * observed_success + (1.0 - EWMA_ALPHA) * inner.success_rate;
        inner.recent_latency_ms = EWMA_ALPHA * latency_ms + (1.0 - EWMA_ALPHA) * inner.recent_latency_ms;
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.last_request_at.store(now, Ordering::Relaxed);
    }

    fn health(&self) -> ProviderHealth {
        let inner = self.inner.lock();
        bucket(inner.success_rate, inner.recent_latency_ms)
    }

    /// Higher is better; combines success rate with an inverse-latency term
    /// so two EXCELLENT providers still order sensibly.
    fn performance_score(&self) -> f64 {
        let inner = self.inner.lock();
        inner.success_rate * (1.0 / (1.0 + inner.recent_latency_ms / 1000.0))
    }

    pub fn snapshot(&self) -> ProviderMetricsSnapshot {
        let inner = self.inner.lock();
        ProviderMetricsSnapshot {
            success_rate: inner.success_rate,
            recent_latency_ms: inner.recent_latency_ms,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            last_request_at: self.last_request_at.load(Ordering::Relaxed),
            health: bucket(inner.success_rate, inner.recent_latency_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderMetricsSnapshot {
    pub success_rate: f64,
    pub recent_latency_ms: f64,
    pub total_requests: u64,
    pub total_failures: u64,
    pub last_request_at: u64,
    pub health: ProviderHealth,
}

fn bucket(success_rate: f64, latency_ms: f64) -> ProviderHealth {
    if success_rate >= 0.98 && latency_ms <= 300.0 {
        ProviderHealth::Excellent
    } else if success_rate >= 0.90 {
        ProviderHealth::Good
    } else if success_rate >= 0.70 {
        ProviderHealth::Fair
    } else if success_rate >= 0.40 {
        ProviderHealth::Poor
    } else {
        ProviderHealth::Unhealthy
    }
}

pub struct ProviderDiscovery {
    metrics: DashMap<String, Arc<ProviderMetrics>>,
}

impl Default for ProviderDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderDiscovery {
    pub fn new() -> Self {
        Self { metrics: DashMap::new() }
    }

    fn metrics_for(&self, provider: &str) -> Arc<ProviderMetrics> {
        self.metrics
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(ProviderMetrics::new()))
            .clone()
    }

    pub fn register_models(&self, provider: &str, models: Vec<String>) {
        let metrics = self.metrics_for(provider);
        *metrics.models.lock() = models;
    }

    pub fn record_request_result(&self, provider: &str, success: bool, latency_ms: f64) {
        let now = crate::types::now_secs();
        let metrics = self.metrics_for(provider);
        metrics.record(success, latency_ms, now);
        crate::metrics::record_provider_request(provider, success, latency_ms);
        crate::metrics::update_provider_health(provider, metrics.health());
    }

    pub fn get_provider_health(&self, provider: &str) -> ProviderHealth {
        self.metrics
            .get(provider)
            .map(|m| m.health())
            .unwrap_or(ProviderHealth::Good)
    }

    pub fn performance_score(&self, provider: &str) -> f64 {
        self.metrics.get(provider).map(|m| m.performance_score()).unwrap_or(1.0)
    }

    pub fn snapshot(&self, provider: &str) -> Option<ProviderMetricsSnapshot> {
        self.metrics.get(provider).map(|m| m.snapshot())
    }

    /// Providers advertising `model`, filtered to not-`UNHEALTHY`, ordered
    /// by performance score descending (§4.6).
    pub fn get_healthy_providers_for_model(&self, model: &str) -> Vec<String> {
        let mut candidates: Vec<(String, f64)> = self
            .metrics
            .iter()
            .filter(|entry| entry.models.lock().iter().any(|m| m == model))
            .filter(|entry| entry.health() != ProviderHealth::Unhealthy)
            .map(|entry| (entry.key().clone(), entry.performance_score()))
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        candidates.into_iter().map(|(name, _)| name).collect()
    }

    pub fn providers(&self) -> Vec<String> {
        self.metrics.iter().map(|e| e.key().clone()).collect()
    }
}

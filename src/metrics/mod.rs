//! Prometheus metrics for the routing substrate, following the same
//! `lazy_static` + `prometheus` macro + registry-gather idiom the base
//! server uses, with names and labels rebuilt around cache/breaker/
//! discovery/balancer/engine/warmer instead of MCP-proxy concerns.

use lazy_static::lazy_static;
use prometheus::{
    histogram_opts, opts, register_counter_vec, register_gauge_vec, register_histogram_vec, register_int_counter,
    register_int_gauge, CounterVec, Encoder, GaugeVec, HistogramVec, IntCounter, IntGauge, Registry, TextEncoder,
};
use std::time::Duration;

lazy_static! {
    // Cache
    pub static ref CACHE_HITS_TOTAL: IntCounter =
        register_int_counter!("router_core_cache_hits_total", "Total cache hits").unwrap();

    pub static ref CACHE_MISSES_TOTAL: IntCounter =
        register_int_counter!("router_core_cache_misses_total", "Total cache misses").unwrap();

    pub static ref CACHE_EVICTIONS_TOTAL: IntCounter =
        register_int_counter!("router_core_cache_evictions_total", "Total cache evictions").unwrap();

    pub static ref CACHE_EXPIRATIONS_TOTAL: IntCounter =
        register_int_counter!("router_core_cache_expirations_total", "Total cache expirations").unwrap();

    pub static ref CACHE_SIZE_ENTRIES: IntGauge =
        register_int_gauge!("router_core_cache_size_entries", "Current number of entries in the memory cache").unwrap();

    pub static ref CACHE_MEMORY_USAGE_FRACTION: prometheus::Gauge = prometheus::register_gauge!(
        "router_core_cache_memory_usage_fraction",
        "Fraction of the configured memory budget currently in use (0-1)"
    ).unwrap();

    // Warmer
    pub static ref WARMER_QUEUE_DEPTH: IntGauge =
        register_int_gauge!("router_core_warmer_queue_depth", "Number of tasks waiting in the warming queue").unwrap();

    pub static ref WARMER_WARMED_TOTAL: IntCounter =
        register_int_counter!("router_core_warmer_warmed_total", "Total keys successfully warmed").unwrap();

    pub static ref WARMER_QUEUE_REJECTIONS_TOTAL: IntCounter = register_int_counter!(
        "router_core_warmer_queue_rejections_total",
        "Total warming tasks rejected because the queue was full"
    ).unwrap();

    // Circuit breaker, per provider
    pub static ref BREAKER_STATE: GaugeVec = register_gauge_vec!(
        opts!("router_core_breaker_state", "Circuit breaker state (0=closed, 1=open, 2=half_open)"),
        &["provider"]
    ).unwrap();

    pub static ref BREAKER_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        opts!("router_core_breaker_failures_total", "Total circuit breaker failures"),
        &["provider"]
    ).unwrap();

    pub static ref BREAKER_TIMEOUT_MS: GaugeVec = register_gauge_vec!(
        opts!("router_core_breaker_timeout_ms", "Current adaptive timeout for a provider, in milliseconds"),
        &["provider"]
    ).unwrap();

    // Provider discovery / health
    pub static ref PROVIDER_HEALTH: GaugeVec = register_gauge_vec!(
        opts!(
            "router_core_provider_health",
            "Provider health bucket (0=unhealthy, 1=poor, 2=fair, 3=good, 4=excellent)"
        ),
        &["provider"]
    ).unwrap();

    pub static ref PROVIDER_LATENCY_SECONDS: HistogramVec = register_histogram_vec!(
        histogram_opts!(
            "router_core_provider_latency_seconds",
            "Provider call latency",
            vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        ),
        &["provider"]
    ).unwrap();

    pub static ref PROVIDER_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        opts!("router_core_provider_requests_total", "Total provider requests by outcome"),
        &["provider", "outcome"]
    ).unwrap();

    // Load balancer
    pub static ref BALANCER_SELECTIONS_TOTAL: CounterVec = register_counter_vec!(
        opts!("router_core_balancer_selections_total", "Total provider selections by strategy"),
        &["provider", "strategy"]
    ).unwrap();

    // Parallel fallback engine
    pub static ref ENGINE_EXECUTIONS_TOTAL: CounterVec = register_counter_vec!(
        opts!("router_core_engine_executions_total", "Total orchestrator executions by outcome"),
        &["mode", "outcome"]
    ).unwrap();

    pub static ref ENGINE_EXECUTION_LATENCY_SECONDS: HistogramVec = register_histogram_vec!(
        histogram_opts!(
            "router_core_engine_execution_latency_seconds",
            "End-to-end latency of a single orchestrator execution",
            vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        ),
        &["mode"]
    ).unwrap();

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        registry.register(Box::new(CACHE_HITS_TOTAL.clone())).unwrap();
        registry.register(Box::new(CACHE_MISSES_TOTAL.clone())).unwrap();
        registry.register(Box::new(CACHE_EVICTIONS_TOTAL.clone())).unwrap();
        registry.register(Box::new(CACHE_EXPIRATIONS_TOTAL.clone())).unwrap();
        registry.register(Box::new(CACHE_SIZE_ENTRIES.clone())).unwrap();
        registry.register(Box::new(CACHE_MEMORY_USAGE_FRACTION.clone())).unwrap();
        registry.register(Box::new(WARMER_QUEUE_DEPTH.clone())).unwrap();
        registry.register(Box::new(WARMER_WARMED_TOTAL.clone())).unwrap();
        registry.register(Box::new(WARMER_QUEUE_REJECTIONS_TOTAL.clone())).unwrap();
        registry.register(Box::new(BREAKER_STATE.clone())).unwrap();
        registry.register(Box::new(BREAKER_FAILURES_TOTAL.clone())).unwrap();
        registry.register(Box::new(BREAKER_TIMEOUT_MS.clone())).unwrap();
        registry.register(Box::new(PROVIDER_HEALTH.clone())).unwrap();
        registry.register(Box::new(PROVIDER_LATENCY_SECONDS.clone())).unwrap();
        registry.register(Box::new(PROVIDER_REQUESTS_TOTAL.clone())).unwrap();
        registry.register(Box::new(BALANCER_SELECTIONS_TOTAL.clone())).unwrap();
        registry.register(Box::new(ENGINE_EXECUTIONS_TOTAL.clone())).unwrap();
        registry.register(Box::new(ENGINE_EXECUTION_LATENCY_SECONDS.clone())).unwrap();
        registry
    };
}

fn health_bucket_value(health: crate::discovery::ProviderHealth) -> f64 {
    use crate::discovery::ProviderHealth::*;
    match health {
        Unhealthy => 0.0,
        Poor => 1.0,
        Fair => 2.0,
        Good => 3.0,
        Excellent => 4.0,
    }
}

fn breaker_state_value(state: crate::breaker::BreakerState) -> f64 {
    use crate::breaker::BreakerState::*;
    match state {
        Closed => 0.0,
        Open => 1.0,
        HalfOpen => 2.0,
    }
}

pub fn record_provider_request(provider: &str, success: bool, latency_ms: f64) {
    let outcome = if success { "success" } else { "failure" };
    PROVIDER_REQUESTS_TOTAL.with_label_values(&[provider, outcome]).inc();
    PROVIDER_LATENCY_SECONDS.with_label_values(&[provider]).observe(latency_ms / 1000.0);
}

pub fn update_provider_health(provider: &str, health: crate::discovery::ProviderHealth) {
    PROVIDER_HEALTH.with_label_values(&[provider]).set(health_bucket_value(health));
}

pub fn update_breaker_state(provider: &str, state: crate::breaker::BreakerState) {
    BREAKER_STATE.with_label_values(&[provider]).set(breaker_state_value(state));
}

pub fn record_breaker_failure(provider: &str) {
    BREAKER_FAILURES_TOTAL.with_label_values(&[provider]).inc();
}

pub fn update_breaker_timeout(provider: &str, timeout: Duration) {
    BREAKER_TIMEOUT_MS.with_label_values(&[provider]).set(timeout.as_millis() as f64);
}

pub fn record_balancer_selection(provider: &str, strategy: &str) {
    BALANCER_SELECTIONS_TOTAL.with_label_values(&[provider, strategy]).inc();
}

pub fn record_engine_execution(mode: &str, success: bool, latency_ms: u64) {
    let outcome = if success { "success" } else { "failure" };
    ENGINE_EXECUTIONS_TOTAL.with_label_values(&[mode, outcome]).inc();
    ENGINE_EXECUTION_LATENCY_SECONDS.with_label_values(&[mode]).observe(latency_ms as f64 / 1000.0);
}

/// Folds a [`crate::cache::CacheStatsSnapshot`] into the gauges/counters
/// above. Counters only move forward, so this is safe to call repeatedly
/// with cumulative totals from the same cache instance.
pub fn sync_cache_stats(snapshot: &crate::cache::CacheStatsSnapshot) {
    CACHE_SIZE_ENTRIES.set(snapshot.entries as i64);
}

pub fn sync_warmer_stats(stats: &crate::cache::warmer::WarmerStats) {
    WARMER_QUEUE_DEPTH.set(stats.queue_depth as i64);
}

/// Renders the registry in Prometheus text exposition format, for the
/// `/metrics` HTTP handler.
pub fn gather() -> std::result::Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_produces_prometheus_text_format() {
        record_provider_request("p1", true, 42.0);
        let bytes = gather().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("# TYPE"));
        assert!(text.contains("router_core_provider_requests_total"));
    }

    #[test]
    fn breaker_state_metric_round_trips() {
        update_breaker_state("p1", crate::breaker::BreakerState::Open);
        let families = REGISTRY.gather();
        assert!(!families.is_empty());
    }
}

//! L10: `LoadBalancer` — six selection strategies over per-provider
//! `LoadMetrics`, grounded in the teacher's `routing::load_balancer`
//! (atomics-per-backend, `ArcSwap` rotating index) but redirected from
//! backend/session routing to provider/model selection (§4.8).

use crate::discovery::{ProviderDiscovery, ProviderHealth};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BalancerStrategy {
    RoundRobin,
    LeastConnections,
    WeightedRandom,
    LeastLatency,
    CostOptimized,
    Adaptive,
}

struct LoadMetrics {
    active_connections: AtomicUsize,
    recent_latency_ms: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    last_request_at: AtomicI64,
}

impl LoadMetrics {
    fn new() -> Self {
        Self {
            active_connections: AtomicUsize::new(0),
            recent_latency_ms: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_request_at: AtomicI64::new(0),
        }
    }
}

const LATENCY_EWMA_ALPHA: f64 = 0.2;

fn strategy_label(strategy: BalancerStrategy) -> &'static str {
    match strategy {
        BalancerStrategy::RoundRobin => "round_robin",
        BalancerStrategy::LeastConnections => "least_connections",
        BalancerStrategy::WeightedRandom => "weighted_random",
        BalancerStrategy::LeastLatency => "least_latency",
        BalancerStrategy::CostOptimized => "cost_optimized",
        BalancerStrategy::Adaptive => "adaptive",
    }
}

fn health_multiplier(health: ProviderHealth) -> f64 {
    match health {
        ProviderHealth::Excellent => 1.2,
        ProviderHealth::Good => 1.0,
        ProviderHealth::Fair => 0.9,
        ProviderHealth::Poor => 0.7,
        ProviderHealth::Unhealthy => 0.3,
    }
}

pub struct LoadBalancer {
    metrics: DashMap<String, LoadMetrics>,
    round_robin_index: DashMap<String, Arc<AtomicUsize>>,
    cost_table: ArcSwap<DashMap<(String, String), f64>>,
    discovery: Arc<ProviderDiscovery>,
}

fn default_cost_table() -> DashMap<(String, String), f64> {
    let table = DashMap::new();
    table.insert(("openai".to_string(), "gpt-4".to_string()), 0.03);
    table.insert(("openai".to_string(), "gpt-3.5-turbo".to_string()), 0.002);
    table.insert(("anthropic".to_string(), "claude-3-opus".to_string()), 0.015);
    table.insert(("anthropic".to_string(), "claude-3-sonnet".to_string()), 0.003);
    table
}

impl LoadBalancer {
    pub fn new(discovery: Arc<ProviderDiscovery>) -> Self {
        Self {
            metrics: DashMap::new(),
            round_robin_index: DashMap::new(),
            cost_table: ArcSwap::from_pointee(default_cost_table()),
            discovery,
        }
    }

    fn metrics_for(&self, provider: &str) {
        self.metrics.entry(provider.to_string()).or_insert_with(LoadMetrics::new);
    }

    pub fn record_request_start(&self, provider: &str, _request_id: &str) {
        self.metrics_for(provider);
        if let Some(m) = self.metrics.get(provider) {
            m.active_connections.fetch_add(1, Ordering::Relaxed);
            m.last_request_at.store(crate::types::now_secs() as i64, Ordering::Relaxed);
        }
    }

    pub fn record_request_complete(&self, provider: &str, _request_id: &str, success: bool, latency_ms: f64) {
        if let Some(m) = self.metrics.get(provider) {
            m.active_connections.fetch_sub(1, Ordering::Relaxed);
            if success {
                m.completed.fetch_add(1, Ordering::Relaxed);
            } else {
                m.failed.fetch_add(1, Ordering::Relaxed);
            }
            let prev = m.recent_latency_ms.load(Ordering::Relaxed) as f64;
            let next = LATENCY_EWMA_ALPHA * latency_ms + (1.0 - LATENCY_EWMA_ALPHA) * prev;
            m.recent_latency_ms.store(next as u64, Ordering::Relaxed);
        }
    }

    fn active_connections(&self, provider: &str) -> usize {
        self.metrics.get(provider).map(|m| m.active_connections.load(Ordering::Relaxed)).unwrap_or(0)
    }

    fn recent_latency_ms(&self, provider: &str) -> f64 {
        self.metrics.get(provider).map(|m| m.recent_latency_ms.load(Ordering::Relaxed) as f64).unwrap_or(0.0)
    }

    pub fn cost_per_token(&self, provider: &str, model: &str) -> f64 {
        self.cost_table
            .load()
            .get(&(provider.to_string(), model.to_string()))
            .map(|v| *v)
            .unwrap_or(0.01)
    }

    /// Explicit refresh hook; there is no autonomous refresh loop (§4.8
    /// supplement, resolving the Open Question in favor of caller control).
    pub fn update_cost_table(&self, entries: Vec<((String, String), f64)>) {
        let table = DashMap::new();
        for (key, value) in entries {
            table.insert(key, value);
        }
        self.cost_table.store(Arc::new(table));
    }

    fn candidates_for_model(&self, model: &str, exclude: Option<&HashSet<String>>) -> Vec<String> {
        self.discovery
            .get_healthy_providers_for_model(model)
            .into_iter()
            .filter(|p| exclude.map(|ex| !ex.contains(p)).unwrap_or(true))
            .collect()
    }

    pub fn select_provider(&self, model: &str, strategy: BalancerStrategy, exclude: Option<&HashSet<String>>) -> Option<String> {
        let candidates = self.candidates_for_model(model, exclude);
        if candidates.is_empty() {
            return None;
        }
        for provider in &candidates {
            self.metrics_for(provider);
        }

        let selected = self.select_provider_inner(model, strategy, candidates);
        if let Some(provider) = &selected {
            crate::metrics::record_balancer_selection(provider, strategy_label(strategy));
        }
        selected
    }

    fn select_provider_inner(&self, model: &str, strategy: BalancerStrategy, candidates: Vec<String>) -> Option<String> {
        match strategy {
            BalancerStrategy::RoundRobin => {
                let counter = self
                    .round_robin_index
                    .entry(model.to_string())
                    .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
                    .clone();
                let idx = counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
                Some(candidates[idx].clone())
            },
            BalancerStrategy::LeastConnections => candidates
                .into_iter()
                .min_by_key(|p| self.active_connections(p)),
            BalancerStrategy::WeightedRandom => {
                let weights: Vec<f64> = candidates
                    .iter()
                    .map(|p| self.discovery.performance_score(p) / (self.active_connections(p) as f64 + 1.0))
                    .collect();
                let total: f64 = weights.iter().sum();
                if total <= 0.0 {
                    return candidates.into_iter().next();
                }
                let mut pick = rand::thread_rng().gen_range(0.0..total);
                for (provider, weight) in candidates.into_iter().zip(weights) {
                    if pick <= weight {
                        return Some(provider);
                    }
                    pick -= weight;
                }
                None
            },
            BalancerStrategy::LeastLatency => candidates
                .into_iter()
                .min_by(|a, b| self.recent_latency_ms(a).partial_cmp(&self.recent_latency_ms(b)).unwrap_or(std::cmp::Ordering::Equal)),
            BalancerStrategy::CostOptimized => candidates.into_iter().min_by(|a, b| {
                let score_a = self.cost_per_token(a, model) * (2.0 - self.discovery.performance_score(a));
                let score_b = self.cost_per_token(b, model) * (2.0 - self.discovery.performance_score(b));
                score_a.partial_cmp(&score_b).unwrap_or(std::cmp::Ordering::Equal)
            }),
            BalancerStrategy::Adaptive => candidates
                .into_iter()
                .map(|p| {
                    let health = self.discovery.get_provider_health(&p);
                    let performance = self.discovery.performance_score(&p);
                    let load_penalty = (self.active_connections(&p) as f64 / 10.0).min(0.5);
                    let cost_factor = (self.cost_per_token(&p, model) / 0.01).min(2.0);
                    let score = performance * health_multiplier(health) * (1.0 - load_penalty) / (1.0 + cost_factor);
                    (p, score)
                })
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(p, _)| p),
        }
    }

    /// Ordered provider list for parallel dispatch (§4.8).
    pub fn prioritize_providers_for_parallel(&self, model: &str, max: usize) -> Vec<String> {
        let mut candidates = self.candidates_for_model(model, None);
        candidates.sort_by(|a, b| {
            self.discovery
                .performance_score(b)
                .partial_cmp(&self.discovery.performance_score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(max);
        candidates
    }

    /// Coefficient-of-variation-based choice in `2..=5` (§4.8).
    pub fn optimal_provider_count(&self, model: &str) -> usize {
        let candidates = self.candidates_for_model(model, None);
        if candidates.len() < 2 {
            return candidates.len().max(1);
        }
        let scores: Vec<f64> = candidates.iter().map(|p| self.discovery.performance_score(p)).collect();
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        if mean <= 0.0 {
            return 2.min(candidates.len());
        }
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
        let cv = variance.sqrt() / mean;
        let count = if cv < 0.1 {
            2
        } else if cv < 0.3 {
            3
        } else if cv < 0.6 {
            4
        } else {
            5
        };
        count.min(candidates.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<ProviderDiscovery>, LoadBalancer) {
        let discovery = Arc::new(ProviderDiscovery::new());
        discovery.register_models("a", vec!["m".to_string()]);
        discovery.register_models("b", vec!["m".to_string()]);
        for _ in 0..20 {
            discovery.record_request_result("a", true, 50.0);
            discovery.record_request_result("b", true, 500.0);
        }
        let balancer = LoadBalancer::new(discovery.clone());
        (discovery, balancer)
    }

    #[test]
    fn least_latency_prefers_faster_provider() {
        let (_discovery, balancer) = setup();
        balancer.record_request_complete("a", "r1", true, 10.0);
        balancer.record_request_complete("b", "r2", true, 900.0);
        let chosen = balancer.select_provider("m", BalancerStrategy::LeastLatency, None);
        assert_eq!(chosen, Some("a".to_string()));
    }

    #[test]
    fn round_robin_alternates() {
        let (_discovery, balancer) = setup();
        let first = balancer.select_provider("m", BalancerStrategy::RoundRobin, None).unwrap();
        let second = balancer.select_provider("m", BalancerStrategy::RoundRobin, None).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn optimal_count_clamped_between_two_and_five() {
        let (_discovery, balancer) = setup();
        let count = balancer.optimal_provider_count("m");
        assert!((1..=5).contains(&count));
    }
}

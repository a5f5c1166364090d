//! L12: `Orchestrator` — wires L7..L11 and exposes the single
//! `execute(model, request)` entry point the boundary calls (§2 data flow).
//!
//! Construction order mirrors the dependency graph: `ProviderDiscovery`
//! first (nothing depends on anything), then `CircuitBreakerPool` and
//! `LoadBalancer` (both need discovery), then `ParallelFallbackEngine`
//! (needs registry/discovery/breakers/balancer), and finally the cache
//! stack (`UnifiedCache` → `TieredCacheManager` → `CacheWarmer` +
//! `CacheMonitor`), which is independent of the provider graph and only
//! meets it here.

use crate::balancer::LoadBalancer;
use crate::breaker::{self, BreakerConfig, CircuitBreakerPool};
use crate::cache::{CacheConfig, CacheMonitor, CacheWarmer, CacheWarmerConfig, MonitorThresholds, UnifiedCache};
use crate::discovery::ProviderDiscovery;
use crate::engine::{EngineConfig, ExecutionMode, ExecutionResult, ParallelFallbackEngine};
use crate::error::Result;
use crate::lock::{DistributedLock, LocalLock};
use crate::provider::{Provider, ProviderRegistry};
use crate::tiered::{TieredCacheConfig, TieredCacheManager};
use crate::types::ProviderRequest;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub cache: CacheConfig,
    pub tiered: TieredCacheConfig,
    pub warmer: CacheWarmerConfig,
    pub monitor_thresholds: MonitorThresholds,
    pub monitor_interval_seconds: u64,
    pub breaker: BreakerConfig,
    pub engine: EngineConfig,
    pub default_mode: ExecutionMode,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            tiered: TieredCacheConfig::default(),
            warmer: CacheWarmerConfig::default(),
            monitor_thresholds: MonitorThresholds::default(),
            monitor_interval_seconds: 60,
            breaker: BreakerConfig::default(),
            engine: EngineConfig::default(),
            default_mode: ExecutionMode::default(),
        }
    }
}

/// The substrate's top-level handle. Holds every long-lived component and
/// the join handles of the background loops it spawns; `shutdown` cancels
/// all of them cooperatively.
pub struct Orchestrator {
    pub registry: Arc<ProviderRegistry>,
    pub discovery: Arc<ProviderDiscovery>,
    pub breakers: Arc<CircuitBreakerPool>,
    pub balancer: Arc<LoadBalancer>,
    pub engine: Arc<ParallelFallbackEngine>,
    pub cache: Arc<UnifiedCache>,
    pub tiered: Arc<TieredCacheManager>,
    pub warmer: Arc<CacheWarmer>,
    pub monitor: Arc<CacheMonitor>,
    default_mode: ExecutionMode,
    shutdown: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        Self::with_lock(config, Arc::new(LocalLock::new()))
    }

    pub fn with_lock(config: OrchestratorConfig, lock: Arc<dyn DistributedLock>) -> Result<Self> {
        let registry = Arc::new(ProviderRegistry::new());
        let discovery = Arc::new(ProviderDiscovery::new());
        let breakers = CircuitBreakerPool::new(config.breaker, discovery.clone());
        let balancer = Arc::new(LoadBalancer::new(discovery.clone()));
        let engine = Arc::new(ParallelFallbackEngine::new(
            config.engine,
            registry.clone(),
            discovery.clone(),
            breakers.clone(),
            balancer.clone(),
        ));

        let cache = Arc::new(UnifiedCache::new(config.cache)?);
        let tiered = TieredCacheManager::new(config.tiered, cache.clone(), lock);
        let warmer = CacheWarmer::new(config.warmer);
        let monitor = CacheMonitor::new(config.monitor_thresholds);

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();
        tasks.push(crate::cache::spawn_cleanup_loop(cache.clone(), shutdown.clone()));
        tasks.push(breaker::spawn_timeout_maintenance_loop(breakers.clone(), shutdown.clone()));
        tasks.push(crate::cache::spawn_monitor_loop(
            monitor.clone(),
            cache.clone(),
            config.monitor_interval_seconds,
            shutdown.clone(),
        ));
        tasks.extend(crate::cache::spawn_warmer_loops(warmer.clone(), tiered.clone(), shutdown.clone()));

        Ok(Self {
            registry,
            discovery,
            breakers,
            balancer,
            engine,
            cache,
            tiered,
            warmer,
            monitor,
            default_mode: config.default_mode,
            shutdown,
            tasks,
        })
    }

    pub fn register_provider(&self, provider: Arc<dyn Provider>) {
        self.discovery.register_models(provider.name(), provider.models());
        self.registry.register(provider);
    }

    /// The single entry point the boundary calls (§2). Runs the request
    /// through the parallel fallback engine at the configured default mode.
    pub async fn execute(&self, model: &str, request: ProviderRequest) -> ExecutionResult {
        self.engine.execute(model, request, self.default_mode).await
    }

    pub async fn execute_with_mode(&self, model: &str, request: ProviderRequest, mode: ExecutionMode) -> ExecutionResult {
        self.engine.execute(model, request, mode).await
    }

    pub async fn execute_with_timeout(
        &self,
        model: &str,
        request: ProviderRequest,
        mode: ExecutionMode,
        timeout: Duration,
    ) -> ExecutionResult {
        self.engine.execute_with_timeout(model, request, mode, timeout).await
    }

    /// Signals every background loop to stop and awaits them, in the order
    /// they were spawned. Idempotent calls beyond the first are harmless —
    /// the token is already cancelled and the joins resolve immediately.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::test_support::ScriptedProvider;
    use crate::types::ChatMessage;

    fn request() -> ProviderRequest {
        ProviderRequest::Chat {
            model: "m".to_string(),
            messages: vec![ChatMessage { role: "user".to_string(), content: "hi".to_string() }],
        }
    }

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            cache: CacheConfig { enable_disk_cache: false, ..CacheConfig::default() },
            ..OrchestratorConfig::default()
        }
    }

    #[tokio::test]
    async fn executes_against_registered_provider() {
        let orchestrator = Orchestrator::new(test_config()).unwrap();
        orchestrator.register_provider(ScriptedProvider::new("p1", "m", Duration::from_millis(5), true));

        let result = orchestrator.execute("m", request()).await;
        assert!(result.success);
        assert_eq!(result.provider, Some("p1".to_string()));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn reports_no_healthy_providers_for_unknown_model() {
        let orchestrator = Orchestrator::new(test_config()).unwrap();
        let result = orchestrator.execute("missing-model", request()).await;
        assert!(!result.success);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn tiered_cache_is_reachable_through_orchestrator() {
        let orchestrator = Orchestrator::new(test_config()).unwrap();
        orchestrator.tiered.set("k", serde_json::json!(1), "responses", 3).unwrap();
        assert_eq!(orchestrator.tiered.get("k", "responses"), Some(serde_json::json!(1)));
        orchestrator.shutdown().await;
    }
}

//! L9: `CircuitBreakerPool` — per-provider three-state breaker with an
//! adaptive timeout controller (§4.7), grounded in the teacher's
//! `health::circuit_breaker` state machine but keyed by provider and
//! wired to [`crate::discovery::ProviderDiscovery`].

mod timeout;

pub use timeout::{AdaptiveTimeoutController, TimeoutStrategy};

use crate::discovery::ProviderDiscovery;
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_limit: u32,
    pub timeout_strategy: TimeoutStrategy,
    pub base_timeout: Duration,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            half_open_limit: 3,
            timeout_strategy: TimeoutStrategy::Adaptive,
            base_timeout: Duration::from_secs(30),
            min_timeout: Duration::from_secs(5),
            max_timeout: Duration::from_secs(120),
        }
    }
}

struct Breaker {
    provider: String,
    state: RwLock<BreakerState>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    half_open_inflight: AtomicU32,
    last_state_change_ms: AtomicI64,
    config: BreakerConfig,
    timeout: AdaptiveTimeoutController,
}

impl Breaker {
    fn new(provider: String, config: BreakerConfig) -> Self {
        let timeout =
            AdaptiveTimeoutController::new(config.timeout_strategy, config.base_timeout, config.min_timeout, config.max_timeout);
        Self {
            provider,
            state: RwLock::new(BreakerState::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            half_open_inflight: AtomicU32::new(0),
            last_state_change_ms: AtomicI64::new(crate::types::now_ms() as i64),
            config,
            timeout,
        }
    }

    async fn pre_flight(&self) -> Result<()> {
        let state = *self.state.read().await;
        match state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed_ms = crate::types::now_ms() as i64 - self.last_state_change_ms.load(Ordering::Relaxed);
                if elapsed_ms >= self.config.recovery_timeout.as_millis() as i64 {
                    self.transition(BreakerState::HalfOpen).await;
                    Ok(())
                } else {
                    Err(Error::BreakerOpen(self.provider.clone()))
                }
            },
            BreakerState::HalfOpen => {
                let inflight = self.half_open_inflight.fetch_add(1, Ordering::Relaxed);
                if inflight < self.config.half_open_limit {
                    Ok(())
                } else {
                    self.half_open_inflight.fetch_sub(1, Ordering::Relaxed);
                    Err(Error::BreakerOpen(self.provider.clone()))
                }
            },
        }
    }

    async fn on_success(&self) {
        let state = *self.state.read().await;
        match state {
            BreakerState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            },
            BreakerState::HalfOpen => {
                let count = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
                if count >= self.config.success_threshold {
                    self.transition(BreakerState::Closed).await;
                }
            },
            BreakerState::Open => {},
        }
    }

    async fn on_failure(&self) {
        let state = *self.state.read().await;
        match state {
            BreakerState::Closed => {
                let count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                if count >= self.config.failure_threshold {
                    self.transition(BreakerState::Open).await;
                }
            },
            BreakerState::HalfOpen => {
                self.transition(BreakerState::Open).await;
            },
            BreakerState::Open => {},
        }
    }

    async fn transition(&self, next: BreakerState) {
        let mut state = self.state.write().await;
        *state = next;
        self.last_state_change_ms.store(crate::types::now_ms() as i64, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        self.half_open_inflight.store(0, Ordering::Relaxed);
        match next {
            BreakerState::Open => warn!(provider = %self.provider, "circuit breaker open"),
            BreakerState::HalfOpen => info!(provider = %self.provider, "circuit breaker half-open"),
            BreakerState::Closed => info!(provider = %self.provider, "circuit breaker closed"),
        }
        crate::metrics::update_breaker_state(&self.provider, next);
    }

    async fn reset(&self) {
        self.transition(BreakerState::Closed).await;
        self.timeout.reset();
    }
}

/// Owns one `Breaker` per provider plus the shared discovery handle every
/// `execute` call reports into after completion (§4.7).
pub struct CircuitBreakerPool {
    breakers: DashMap<String, Arc<Breaker>>,
    default_config: BreakerConfig,
    discovery: Arc<ProviderDiscovery>,
}

impl CircuitBreakerPool {
    pub fn new(default_config: BreakerConfig, discovery: Arc<ProviderDiscovery>) -> Arc<Self> {
        Arc::new(Self {
            breakers: DashMap::new(),
            default_config,
            discovery,
        })
    }

    fn breaker_for(&self, provider: &str) -> Arc<Breaker> {
        self.breakers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Breaker::new(provider.to_string(), self.default_config.clone())))
            .clone()
    }

    pub fn current_timeout(&self, provider: &str) -> Duration {
        self.breaker_for(provider).timeout.current()
    }

    pub async fn state(&self, provider: &str) -> BreakerState {
        *self.breaker_for(provider).state.read().await
    }

    /// Wraps `call` with admission control, latency timing, adaptive
    /// timeout enforcement, and discovery reporting (§4.7).
    pub async fn execute<F, Fut, T>(&self, provider: &str, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let breaker = self.breaker_for(provider);
        breaker.pre_flight().await?;

        let timeout = breaker.timeout.current();
        let started = tokio::time::Instant::now();
        let outcome = tokio::time::timeout(timeout, call()).await;
        let latency_ms = started.elapsed().as_millis() as f64;

        match outcome {
            Ok(Ok(value)) => {
                breaker.on_success().await;
                breaker.timeout.record(latency_ms);
                self.discovery.record_request_result(provider, true, latency_ms);
                Ok(value)
            },
            Ok(Err(err)) => {
                if err.counts_as_provider_failure() {
                    breaker.on_failure().await;
                    crate::metrics::record_breaker_failure(provider);
                }
                self.discovery.record_request_result(provider, false, latency_ms);
                Err(err)
            },
            Err(_elapsed) => {
                breaker.on_failure().await;
                crate::metrics::record_breaker_failure(provider);
                self.discovery.record_request_result(provider, false, latency_ms);
                Err(Error::Timeout(timeout.as_millis() as u64))
            },
        }
    }

    pub async fn reset(&self, provider: &str) {
        if let Some(breaker) = self.breakers.get(provider) {
            breaker.reset().await;
        }
    }

    pub async fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset().await;
        }
    }

    /// Evaluated every 60s per provider by the maintenance loop (§4.7).
    pub fn evaluate_timeouts(&self) {
        for entry in self.breakers.iter() {
            entry.value().timeout.maybe_reevaluate();
            crate::metrics::update_breaker_timeout(entry.key(), entry.value().timeout.current());
        }
    }
}

pub fn spawn_timeout_maintenance_loop(
    pool: Arc<CircuitBreakerPool>,
    shutdown: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = ticker.tick() => pool.evaluate_timeouts(),
                _ = shutdown.cancelled() => {
                    info!("breaker timeout maintenance loop shutting down");
                    break;
                }
            }
        }
    })
}

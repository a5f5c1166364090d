//! L11: `ParallelFallbackEngine` — first-success-wins parallel dispatch
//! with richer BEST_RESPONSE/LOAD_BALANCED/ADAPTIVE modes (§4.9).
//!
//! Grounded in the shape of the original parallel-fallback engine (launch
//! one task per candidate provider, a shared completion signal, cancel
//! the rest), rewritten around `tokio::select!` and
//! `tokio_util::sync::CancellationToken` instead of a cooperative
//! single-event-loop cancellation (§9 redesign: independently cancellable
//! tasks, not a shared asyncio event loop).

use crate::balancer::LoadBalancer;
use crate::breaker::CircuitBreakerPool;
use crate::discovery::ProviderDiscovery;
use crate::provider::ProviderRegistry;
use crate::types::{now_ms, ExecutionAttempt, ProviderRequest, ProviderResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    FirstSuccess,
    BestResponse,
    LoadBalanced,
    Adaptive,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::FirstSuccess
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub response: Option<ProviderResponse>,
    pub provider: Option<String>,
    pub latency_ms: u64,
    pub attempts: Vec<ExecutionAttempt>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_providers: usize,
    pub default_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_providers: 5,
            default_timeout: Duration::from_secs(30),
        }
    }
}

fn mode_label(mode: ExecutionMode) -> &'static str {
    match mode {
        ExecutionMode::FirstSuccess => "first_success",
        ExecutionMode::BestResponse => "best_response",
        ExecutionMode::LoadBalanced => "load_balanced",
        ExecutionMode::Adaptive => "adaptive",
    }
}

pub struct ParallelFallbackEngine {
    config: EngineConfig,
    registry: Arc<ProviderRegistry>,
    discovery: Arc<ProviderDiscovery>,
    breakers: Arc<CircuitBreakerPool>,
    balancer: Arc<LoadBalancer>,
}

impl ParallelFallbackEngine {
    pub fn new(
        config: EngineConfig,
        registry: Arc<ProviderRegistry>,
        discovery: Arc<ProviderDiscovery>,
        breakers: Arc<CircuitBreakerPool>,
        balancer: Arc<LoadBalancer>,
    ) -> Self {
        Self {
            config,
            registry,
            discovery,
            breakers,
            balancer,
        }
    }

    fn candidate_providers(&self, model: &str, mode: ExecutionMode) -> Vec<String> {
        match mode {
            ExecutionMode::LoadBalanced => self.balancer.prioritize_providers_for_parallel(model, self.config.max_providers),
            ExecutionMode::Adaptive => {
                let mut candidates = self.discovery.get_healthy_providers_for_model(model);
                candidates.truncate(self.config.max_providers);
                candidates
            },
            ExecutionMode::FirstSuccess | ExecutionMode::BestResponse => {
                let mut candidates = self.discovery.get_healthy_providers_for_model(model);
                candidates.truncate(self.config.max_providers);
                candidates
            },
        }
    }

    pub async fn execute(&self, model: &str, request: ProviderRequest, mode: ExecutionMode) -> ExecutionResult {
        self.execute_with_timeout(model, request, mode, self.config.default_timeout).await
    }

    pub async fn execute_with_timeout(
        &self,
        model: &str,
        request: ProviderRequest,
        mode: ExecutionMode,
        timeout: Duration,
    ) -> ExecutionResult {
        let execution_id = Uuid::new_v4().to_string();
        let started_at = now_ms();
        let providers = self.candidate_providers(model, mode);

        if providers.is_empty() {
            return ExecutionResult {
                success: false,
                response: None,
                provider: None,
                latency_ms: 0,
                attempts: Vec::new(),
                error: Some("no providers".to_string()),
            };
        }

        info!(execution_id = %execution_id, model, providers = ?providers, mode = ?mode, "starting parallel execution");

        let result = if mode == ExecutionMode::BestResponse {
            self.execute_best_response(providers, model, request, timeout).await
        } else {
            self.execute_first_success(providers, model, request, timeout).await
        }
        .finish(started_at);

        crate::metrics::record_engine_execution(mode_label(mode), result.success, result.latency_ms);
        result
    }

    async fn execute_first_success(
        &self,
        providers: Vec<String>,
        model: &str,
        request: ProviderRequest,
        timeout: Duration,
    ) -> PartialResult {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(String, ExecutionAttempt, Option<ProviderResponse>)>();

        let mut handles = Vec::new();
        for provider in providers {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let engine_registry = self.registry.clone();
            let engine_breakers = self.breakers.clone();
            let engine_balancer = self.balancer.clone();
            let request = request.clone();
            let model = model.to_string();
            handles.push(tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let mut attempt = ExecutionAttempt::started(provider.clone());
                        attempt.finish_failure("cancelled after a faster provider won");
                        let _ = tx.send((provider, attempt, None));
                    },
                    result = run_attempt(engine_registry, engine_breakers, engine_balancer, provider.clone(), model, request) => {
                        let (attempt, response) = result;
                        let _ = tx.send((provider, attempt, response));
                    }
                }
            }));
        }
        drop(tx);

        let mut attempts = Vec::new();
        let mut winner: Option<(String, ProviderResponse)> = None;
        let mut deadline_elapsed = false;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            if winner.is_some() {
                break;
            }
            tokio::select! {
                maybe_msg = rx.recv() => {
                    match maybe_msg {
                        Some((provider, mut attempt, response)) => {
                            if let Some(resp) = response {
                                attempt.is_winner = true;
                                winner = Some((provider, resp));
                                cancel.cancel();
                            }
                            attempts.push(attempt);
                        },
                        None => break,
                    }
                },
                _ = &mut deadline => {
                    deadline_elapsed = true;
                    cancel.cancel();
                    break;
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }
        while let Ok((_, attempt, _)) = rx.try_recv() {
            attempts.push(attempt);
        }

        match winner {
            Some((provider, response)) => PartialResult {
                success: true,
                response: Some(response),
                provider: Some(provider),
                attempts,
                error: None,
            },
            None => PartialResult {
                success: false,
                response: None,
                provider: None,
                error: Some(if deadline_elapsed { "timeout".to_string() } else { "all providers failed".to_string() }),
                attempts,
            },
        }
    }

    /// Waits for every candidate rather than stopping at the first success,
    /// but still honors the overall run timeout: on expiry the shared
    /// `CancellationToken` is fired so every still-running task drops its
    /// in-flight provider call instead of continuing in the background
    /// (§4.9 step 5, §5 "cancellation is propagated top-down"), and
    /// whatever attempts had already completed are still reported rather
    /// than discarded.
    async fn execute_best_response(
        &self,
        providers: Vec<String>,
        model: &str,
        request: ProviderRequest,
        timeout: Duration,
    ) -> PartialResult {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(ExecutionAttempt, Option<ProviderResponse>)>();

        let mut handles = Vec::new();
        for provider in providers {
            let tx = tx.clone();
            let cancel = cancel.clone();
            let engine_registry = self.registry.clone();
            let engine_breakers = self.breakers.clone();
            let engine_balancer = self.balancer.clone();
            let request = request.clone();
            let model = model.to_string();
            handles.push(tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let mut attempt = ExecutionAttempt::started(provider.clone());
                        attempt.finish_failure("cancelled after run timeout elapsed");
                        let _ = tx.send((attempt, None));
                    },
                    result = run_attempt(engine_registry, engine_breakers, engine_balancer, provider, model, request) => {
                        let _ = tx.send(result);
                    }
                }
            }));
        }
        drop(tx);

        let mut attempts = Vec::new();
        let mut best: Option<(String, ProviderResponse, f64, u64)> = None;
        let mut deadline_elapsed = false;
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                maybe_msg = rx.recv() => {
                    match maybe_msg {
                        Some((attempt, response)) => {
                            if let Some(resp) = response {
                                let score = attempt.quality_score();
                                let latency = attempt.latency_ms.unwrap_or(u64::MAX);
                                let better = match &best {
                                    None => true,
                                    Some((_, _, best_score, best_latency)) => {
                                        score > *best_score || (score == *best_score && latency < *best_latency)
                                    },
                                };
                                if better {
                                    best = Some((attempt.provider.clone(), resp, score, latency));
                                }
                            }
                            attempts.push(attempt);
                        },
                        None => break,
                    }
                },
                _ = &mut deadline, if !deadline_elapsed => {
                    deadline_elapsed = true;
                    cancel.cancel();
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        if let Some((provider, response, _, _)) = best {
            for attempt in attempts.iter_mut() {
                attempt.is_winner = attempt.provider == provider;
            }
            PartialResult {
                success: true,
                response: Some(response),
                provider: Some(provider),
                error: None,
                attempts,
            }
        } else {
            PartialResult {
                success: false,
                response: None,
                provider: None,
                error: Some(if deadline_elapsed { "timeout".to_string() } else { "all providers failed".to_string() }),
                attempts,
            }
        }
    }
}

struct PartialResult {
    success: bool,
    response: Option<ProviderResponse>,
    provider: Option<String>,
    attempts: Vec<ExecutionAttempt>,
    error: Option<String>,
}

impl PartialResult {
    fn finish(self, started_at: u64) -> ExecutionResult {
        ExecutionResult {
            success: self.success,
            response: self.response,
            provider: self.provider,
            latency_ms: now_ms().saturating_sub(started_at),
            attempts: self.attempts,
            error: self.error,
        }
    }
}

/// One provider's attempt, wrapped in its breaker, reporting into
/// discovery through `CircuitBreakerPool::execute` (§4.9 steps 3-4) and
/// into the balancer's in-flight set for the duration of the call so
/// `LEAST_CONNECTIONS`/`WEIGHTED_RANDOM`/`ADAPTIVE` selection sees live load.
async fn run_attempt(
    registry: Arc<ProviderRegistry>,
    breakers: Arc<CircuitBreakerPool>,
    balancer: Arc<LoadBalancer>,
    provider_name: String,
    model: String,
    request: ProviderRequest,
) -> (ExecutionAttempt, Option<ProviderResponse>) {
    let mut attempt = ExecutionAttempt::started(provider_name.clone());
    let Some(provider) = registry.get(&provider_name) else {
        attempt.finish_failure("provider not registered".to_string());
        return (attempt, None);
    };
    let _ = &model;

    let request_id = Uuid::new_v4().to_string();
    balancer.record_request_start(&provider_name, &request_id);

    let result = breakers
        .execute(&provider_name, || async { provider.call(request).await })
        .await;

    let (success, latency_ms) = match &result {
        Ok(_) => {
            attempt.finish_success();
            (true, attempt.latency_ms.unwrap_or(0) as f64)
        },
        Err(err) => {
            warn!(provider = %provider_name, error = %err, "provider attempt failed");
            attempt.finish_failure(err.to_string());
            (false, attempt.latency_ms.unwrap_or(0) as f64)
        },
    };
    balancer.record_request_complete(&provider_name, &request_id, success, latency_ms);

    match result {
        Ok(response) => (attempt, Some(response)),
        Err(_) => (attempt, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::provider::test_support::ScriptedProvider;
    use crate::types::ChatMessage;
    use std::time::Duration as StdDuration;

    fn request() -> ProviderRequest {
        ProviderRequest::Chat {
            model: "m".to_string(),
            messages: vec![ChatMessage { role: "user".to_string(), content: "hi".to_string() }],
        }
    }

    fn setup(providers: Vec<(&str, u64, bool)>) -> ParallelFallbackEngine {
        let registry = Arc::new(ProviderRegistry::new());
        let discovery = Arc::new(ProviderDiscovery::new());
        for (name, latency_ms, succeed) in providers {
            registry.register(Arc::new(ScriptedProvider::new(name, "m", StdDuration::from_millis(latency_ms), succeed)));
            discovery.register_models(name, vec!["m".to_string()]);
            for _ in 0..5 {
                discovery.record_request_result(name, true, latency_ms as f64);
            }
        }
        let breakers = CircuitBreakerPool::new(BreakerConfig::default(), discovery.clone());
        let balancer = Arc::new(LoadBalancer::new(discovery.clone()));
        ParallelFallbackEngine::new(EngineConfig::default(), registry, discovery, breakers, balancer)
    }

    #[tokio::test]
    async fn first_success_returns_fastest_winner() {
        let engine = setup(vec![("slow", 80, true), ("fast", 5, true)]);
        let result = engine.execute("m", request(), ExecutionMode::FirstSuccess).await;
        assert!(result.success);
        assert_eq!(result.provider, Some("fast".to_string()));
    }

    // S5 — parallel first-success: the fastest of three succeeding
    // providers wins well within the run timeout, and every other attempt
    // is recorded but not the winner.
    #[tokio::test]
    async fn s5_parallel_first_success() {
        let engine = setup(vec![("p_slow", 2000, true), ("p_med", 500, true), ("p_fast", 100, true)]);
        let result = engine
            .execute_with_timeout("m", request(), ExecutionMode::FirstSuccess, StdDuration::from_millis(1500))
            .await;

        assert!(result.success);
        assert_eq!(result.provider, Some("p_fast".to_string()));
        assert!(result.latency_ms <= 300, "latency_ms was {}", result.latency_ms);
        assert_eq!(result.attempts.iter().filter(|a| a.is_winner).count(), 1);
        let winner = result.attempts.iter().find(|a| a.is_winner).unwrap();
        assert_eq!(winner.provider, "p_fast");
    }

    #[tokio::test]
    async fn no_providers_reports_failure_without_attempts() {
        let registry = Arc::new(ProviderRegistry::new());
        let discovery = Arc::new(ProviderDiscovery::new());
        let breakers = CircuitBreakerPool::new(BreakerConfig::default(), discovery.clone());
        let balancer = Arc::new(LoadBalancer::new(discovery.clone()));
        let engine = ParallelFallbackEngine::new(EngineConfig::default(), registry, discovery, breakers, balancer);
        let result = engine.execute("missing-model", request(), ExecutionMode::FirstSuccess).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no providers"));
    }

    #[tokio::test]
    async fn best_response_prefers_higher_quality_score() {
        let engine = setup(vec![("slow", 900, true), ("fast", 5, true)]);
        let result = engine.execute("m", request(), ExecutionMode::BestResponse).await;
        assert!(result.success);
        assert_eq!(result.provider, Some("fast".to_string()));
        assert_eq!(result.attempts.len(), 2);
    }

    // A run-level timeout with no surviving success must be reported as
    // "timeout", not misread as "all providers failed" just because the
    // cancelled-attempt records had already landed in `attempts`.
    #[tokio::test]
    async fn first_success_reports_timeout_not_all_failed() {
        let engine = setup(vec![("too-slow", 500, true)]);
        let result = engine
            .execute_with_timeout("m", request(), ExecutionMode::FirstSuccess, StdDuration::from_millis(50))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("timeout"));
        assert_eq!(result.attempts.len(), 1);
        assert!(!result.attempts[0].is_winner);
    }

    #[tokio::test]
    async fn best_response_reports_timeout_and_keeps_completed_attempts() {
        let engine = setup(vec![("fast-fail", 5, false), ("too-slow", 500, true)]);
        let result = engine
            .execute_with_timeout("m", request(), ExecutionMode::BestResponse, StdDuration::from_millis(50))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("timeout"));
        // The fast-failing provider had time to complete and report in
        // before the deadline; its attempt must survive the timeout path.
        assert!(result.attempts.iter().any(|a| a.provider == "fast-fail"));
    }
}

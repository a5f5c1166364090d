//! The `Provider` capability and its registry.
//!
//! Models an upstream LLM provider as a capability set rather than a
//! dynamically dispatched object with an unconstrained interface: each
//! provider advertises which of `chat`/`text`/`embeddings` it implements,
//! and the engine only ever calls the one matching the request's tag.

use crate::error::{Error, Result};
use crate::types::{ModelId, ProviderId, ProviderRequest, ProviderResponse};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Capability set advertised by an upstream provider. An implementation
/// need only override the methods it supports; the defaults report
/// "unsupported" without making network calls.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Models this provider advertises, used by discovery/balancer
    /// filtering (`get_healthy_providers_for_model`).
    fn models(&self) -> Vec<ModelId>;

    async fn chat(&self, _request: ProviderRequest) -> Result<ProviderResponse> {
        Err(Error::ProviderError(
            self.name().to_string(),
            "chat capability not implemented".into(),
        ))
    }

    async fn text(&self, _request: ProviderRequest) -> Result<ProviderResponse> {
        Err(Error::ProviderError(
            self.name().to_string(),
            "text capability not implemented".into(),
        ))
    }

    async fn embeddings(&self, _request: ProviderRequest) -> Result<ProviderResponse> {
        Err(Error::ProviderError(
            self.name().to_string(),
            "embeddings capability not implemented".into(),
        ))
    }

    /// Dispatches on the request's own tag. Implementors should not need to
    /// override this — it exists so callers have one entry point.
    async fn call(&self, request: ProviderRequest) -> Result<ProviderResponse> {
        match &request {
            ProviderRequest::Chat { .. } => self.chat(request).await,
            ProviderRequest::Text { .. } => self.text(request).await,
            ProviderRequest::Embeddings { .. } => self.embeddings(request).await,
        }
    }
}

/// Maps provider names to capability implementations. Replaces the
/// original system's dynamic-type dispatch with an explicit, typed lookup.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Arc<DashMap<ProviderId, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).map(|entry| entry.clone())
    }

    pub fn names(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Providers advertising the given model.
    pub fn providers_for_model(&self, model: &str) -> Vec<ProviderId> {
        self.providers
            .iter()
            .filter(|entry| entry.value().models().iter().any(|m| m == model))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::types::ChatMessage;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// A provider whose latency and outcome are scripted, for deterministic
    /// tests of the engine and breaker pool.
    pub struct ScriptedProvider {
        pub id: ProviderId,
        pub model: ModelId,
        pub latency: Duration,
        pub succeed: bool,
        pub calls: AtomicU64,
    }

    impl ScriptedProvider {
        pub fn new(id: &str, model: &str, latency: Duration, succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                model: model.to_string(),
                latency,
                succeed,
                calls: AtomicU64::new(0),
            })
        }

        pub fn call_count(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.id
        }

        fn models(&self) -> Vec<ModelId> {
            vec![self.model.clone()]
        }

        async fn chat(&self, _request: ProviderRequest) -> Result<ProviderResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            if self.succeed {
                Ok(ProviderResponse::Chat {
                    message: ChatMessage {
                        role: "assistant".into(),
                        content: format!("response from {}", self.id),
                    },
                })
            } else {
                Err(Error::ProviderError(self.id.clone(), "scripted failure".into()))
            }
        }
    }
}

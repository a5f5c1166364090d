//! Shared value types that cross component boundaries: provider requests
//! and responses, execution attempts, and small id newtypes.
//!
//! Kept deliberately thin — this is the tagged-variant replacement for the
//! dynamically-typed, dict-shaped requests the original system passed
//! around (see DESIGN.md).

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub type ProviderId = String;
pub type ModelId = String;

/// A single message in a chat-style conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Tagged request variants, one per provider capability. The engine routes
/// purely on which variant it holds; it never inspects provider-specific
/// wire formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderRequest {
    Chat {
        model: ModelId,
        messages: Vec<ChatMessage>,
    },
    Text {
        model: ModelId,
        prompt: String,
    },
    Embeddings {
        model: ModelId,
        input: Vec<String>,
    },
}

impl ProviderRequest {
    pub fn model(&self) -> &str {
        match self {
            ProviderRequest::Chat { model, .. } => model,
            ProviderRequest::Text { model, .. } => model,
            ProviderRequest::Embeddings { model, .. } => model,
        }
    }
}

/// Tagged response variants mirroring `ProviderRequest`. The payload is
/// kept as opaque `serde_json::Value` beyond its tag so the cache can
/// store/retrieve it without understanding its shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderResponse {
    Chat { message: ChatMessage },
    Text { completion: String },
    Embeddings { vectors: Vec<Vec<f32>> },
}

/// One provider invocation within a parallel run (§3 ExecutionAttempt).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    pub provider: ProviderId,
    pub started_at: u64,
    pub ended_at: Option<u64>,
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub is_winner: bool,
}

impl ExecutionAttempt {
    pub fn started(provider: ProviderId) -> Self {
        Self {
            provider,
            started_at: now_ms(),
            ended_at: None,
            success: false,
            latency_ms: None,
            error: None,
            is_winner: false,
        }
    }

    pub fn finish_success(&mut self) {
        let ended = now_ms();
        self.ended_at = Some(ended);
        self.latency_ms = Some(ended.saturating_sub(self.started_at));
        self.success = true;
    }

    pub fn finish_failure(&mut self, error: impl Into<String>) {
        let ended = now_ms();
        self.ended_at = Some(ended);
        self.latency_ms = Some(ended.saturating_sub(self.started_at));
        self.success = false;
        self.error = Some(error.into());
    }

    /// Latency-weighted success proxy used by BEST_RESPONSE mode (§4.9,
    /// Open Question resolved in SPEC_FULL.md §9).
    pub fn quality_score(&self) -> f64 {
        if !self.success {
            return 0.0;
        }
        let latency = self.latency_ms.unwrap_or(0) as f64;
        1.0 / (1.0 + latency / 1000.0)
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

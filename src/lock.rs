//! L6: `DistributedLock` — external mutual exclusion for cross-instance
//! cache warming (§4.5).
//!
//! The trait is the contract; `LocalLock` is the one concrete, in-process
//! implementation this crate ships (suitable for a single instance and for
//! tests). A real deployment wires in a backend speaking the same
//! "set-if-not-exists with expiry" semantics against a shared keyspace
//! (e.g. Redis `SET NX PX`) — which backend to use is a deployment
//! decision, not something the core prescribes (§9: never fall back to
//! instance-local locking silently when a distributed backend is expected;
//! `LocalLock` is an explicit, named choice, not a silent fallback).

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Error, Result};

#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Blocks until `key` is newly claimed, or returns `LockTimeout` once
    /// `deadline` elapses. On success, returns an opaque token that must be
    /// presented to `release`.
    async fn acquire(&self, key: &str, ttl: Duration, deadline: Duration) -> Result<String>;

    /// Idempotent; a no-op if `token` does not match the current holder.
    async fn release(&self, key: &str, token: &str);
}

struct Holder {
    token: String,
    expires_at_ms: u64,
}

/// Sharded map of keyed slots with expiry; one holder per key at a time
/// (§8 invariant 7).
pub struct LocalLock {
    holders: Arc<DashMap<String, Holder>>,
}

impl Default for LocalLock {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalLock {
    pub fn new() -> Self {
        Self {
            holders: Arc::new(DashMap::new()),
        }
    }

    fn try_claim(&self, key: &str, ttl: Duration) -> Option<String> {
        let now = crate::types::now_ms();
        use dashmap::mapref::entry::Entry;
        match self.holders.entry(key.to_string()) {
            Entry::Occupied(mut occ) => {
                if occ.get().expires_at_ms <= now {
                    let token = Uuid::new_v4().to_string();
                    occ.insert(Holder {
                        token: token.clone(),
                        expires_at_ms: now + ttl.as_millis() as u64,
                    });
                    Some(token)
                } else {
                    None
                }
            },
            Entry::Vacant(vac) => {
                let token = Uuid::new_v4().to_string();
                vac.insert(Holder {
                    token: token.clone(),
                    expires_at_ms: now + ttl.as_millis() as u64,
                });
                Some(token)
            },
        }
    }
}

#[async_trait]
impl DistributedLock for LocalLock {
    async fn acquire(&self, key: &str, ttl: Duration, deadline: Duration) -> Result<String> {
        let started = tokio::time::Instant::now();
        loop {
            if let Some(token) = self.try_claim(key, ttl) {
                return Ok(token);
            }
            if started.elapsed() >= deadline {
                return Err(Error::LockTimeout(key.to_string()));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn release(&self, key: &str, token: &str) {
        if let Some(holder) = self.holders.get(key) {
            if holder.token != token {
                return;
            }
        } else {
            return;
        }
        self.holders.remove_if(key, |_, h| h.token == token);
    }
}

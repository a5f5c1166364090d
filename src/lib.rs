//! router-core: an LLM request-routing and caching substrate.
//!
//! Four layered subsystems sit behind a single [`Orchestrator`] handle: a
//! tiered memory/disk cache, a per-provider circuit-breaker pool with
//! adaptive timeouts, a load balancer with pluggable selection strategies,
//! and a parallel fallback dispatch engine. This crate can be embedded
//! directly, or driven over the network via the thin [`boundary`] module.

pub mod balancer;
pub mod boundary;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod tiered;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, OrchestratorConfig};

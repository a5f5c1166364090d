//! Configuration tree for the routing substrate.
//!
//! Mirrors the external configuration surface: cache, warmer, tiering,
//! breaker, engine, load-balancer, and monitor sections, each with
//! `#[serde(default)]` so a caller only has to spell out what they want to
//! override. Loadable from YAML or TOML via [`Config::from_file`], with
//! [`Config::discover_and_load`] checking a small set of conventional paths
//! first.

pub mod validation;

use crate::balancer::BalancerStrategy;
use crate::breaker::TimeoutStrategy;
use crate::engine::ExecutionMode;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheSection,
    pub warmer: WarmerSection,
    pub tiering: TieringSection,
    pub breaker: BreakerSection,
    pub engine: EngineSection,
    pub balancer: BalancerSection,
    pub monitor: MonitorSection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_entries: usize,
    pub max_memory_mb: usize,
    pub default_ttl_seconds: u64,
    pub enable_disk_cache: bool,
    pub cache_dir: String,
    pub cleanup_interval_seconds: u64,
    pub enable_smart_ttl: bool,
    pub enable_predictive_warming: bool,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_memory_mb: 512,
            default_ttl_seconds: 1800,
            enable_disk_cache: true,
            cache_dir: ".cache/router-core".to_string(),
            cleanup_interval_seconds: 300,
            enable_smart_ttl: true,
            enable_predictive_warming: true,
        }
    }
}

impl From<CacheSection> for crate::cache::CacheConfig {
    fn from(s: CacheSection) -> Self {
        Self {
            max_entries: s.max_entries,
            max_memory_mb: s.max_memory_mb,
            default_ttl_seconds: s.default_ttl_seconds,
            enable_disk_cache: s.enable_disk_cache,
            cache_dir: s.cache_dir,
            cleanup_interval_seconds: s.cleanup_interval_seconds,
            enable_smart_ttl: s.enable_smart_ttl,
            enable_predictive_warming: s.enable_predictive_warming,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WarmerSection {
    pub max_concurrent_warmings: usize,
    pub warming_queue_capacity: usize,
}

impl Default for WarmerSection {
    fn default() -> Self {
        Self { max_concurrent_warmings: 10, warming_queue_capacity: 1000 }
    }
}

impl From<WarmerSection> for crate::cache::CacheWarmerConfig {
    fn from(s: WarmerSection) -> Self {
        Self { max_concurrent_warmings: s.max_concurrent_warmings, warming_queue_capacity: s.warming_queue_capacity }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TieringSection {
    pub hot_ttl_multiplier: f64,
    pub warm_ttl_multiplier: f64,
    pub cold_ttl_multiplier: f64,
    pub hot_access_count: u64,
    pub warm_access_count: u64,
    pub max_concurrent_warmings: usize,
}

impl Default for TieringSection {
    fn default() -> Self {
        Self {
            hot_ttl_multiplier: 2.0,
            warm_ttl_multiplier: 1.0,
            cold_ttl_multiplier: 0.5,
            hot_access_count: 10,
            warm_access_count: 3,
            max_concurrent_warmings: 10,
        }
    }
}

impl From<TieringSection> for crate::tiered::TieredCacheConfig {
    fn from(s: TieringSection) -> Self {
        let defaults = Self::default();
        Self {
            base_ttl_seconds: defaults.base_ttl_seconds,
            hot_multiplier: s.hot_ttl_multiplier,
            warm_multiplier: s.warm_ttl_multiplier,
            cold_multiplier: s.cold_ttl_multiplier,
            promote_hot_threshold: s.hot_access_count,
            promote_warm_threshold: s.warm_access_count,
            max_concurrent_warmings: s.max_concurrent_warmings,
            warm_batch_lock_ttl: defaults.warm_batch_lock_ttl,
            warm_batch_lock_deadline: defaults.warm_batch_lock_deadline,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,
    pub success_threshold: u32,
    pub base_timeout_seconds: u64,
    pub min_timeout_seconds: u64,
    pub max_timeout_seconds: u64,
    pub strategy: TimeoutStrategy,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 60,
            success_threshold: 3,
            base_timeout_seconds: 30,
            min_timeout_seconds: 5,
            max_timeout_seconds: 120,
            strategy: TimeoutStrategy::Adaptive,
        }
    }
}

impl From<BreakerSection> for crate::breaker::BreakerConfig {
    fn from(s: BreakerSection) -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: s.failure_threshold,
            success_threshold: s.success_threshold,
            recovery_timeout: std::time::Duration::from_secs(s.recovery_timeout_seconds),
            half_open_limit: defaults.half_open_limit,
            timeout_strategy: s.strategy,
            base_timeout: std::time::Duration::from_secs(s.base_timeout_seconds),
            min_timeout: std::time::Duration::from_secs(s.min_timeout_seconds),
            max_timeout: std::time::Duration::from_secs(s.max_timeout_seconds),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_providers: usize,
    pub run_timeout_seconds: u64,
    pub mode: ExecutionMode,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self { max_providers: 5, run_timeout_seconds: 30, mode: ExecutionMode::FirstSuccess }
    }
}

impl From<EngineSection> for crate::engine::EngineConfig {
    fn from(s: EngineSection) -> Self {
        Self {
            max_providers: s.max_providers,
            default_timeout: std::time::Duration::from_secs(s.run_timeout_seconds),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerSection {
    pub strategy: BalancerStrategy,
}

impl Default for BalancerSection {
    fn default() -> Self {
        Self { strategy: BalancerStrategy::Adaptive }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorSection {
    pub target_hit_rate: f64,
    pub check_interval_seconds: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self { target_hit_rate: 0.9, check_interval_seconds: 60 }
    }
}

impl From<MonitorSection> for crate::cache::MonitorThresholds {
    fn from(s: MonitorSection) -> Self {
        let defaults = Self::default();
        Self { min_hit_rate: s.target_hit_rate, ..defaults }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

impl Config {
    /// Loads a config file, dispatching on its extension (`.yaml`/`.yml` or
    /// `.toml`). Anything else is rejected as `ConfigInvalid` rather than
    /// guessed at.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(Error::DiskIo)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&contents)?),
            Some("toml") => Ok(toml::from_str(&contents)?),
            other => Err(Error::ConfigInvalid(format!(
                "unsupported config extension: {:?} (expected yaml/yml/toml)",
                other
            ))),
        }
    }

    /// Checks a small set of conventional paths in order and loads the
    /// first one found; falls back to defaults if none exist.
    pub fn discover_and_load() -> Result<Self> {
        for candidate in Self::candidate_paths() {
            if candidate.exists() {
                return Self::from_file(&candidate);
            }
        }
        Ok(Self::default())
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("router-core.yaml"), PathBuf::from("router-core.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".router-core/config.yaml"));
        }
        paths.push(PathBuf::from("/etc/router-core/config.yaml"));
        paths
    }

    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

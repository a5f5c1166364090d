//! The cache subsystem (§4.1): `MemoryStore` (L1) + `DiskStore` (L2)
//! composed by `UnifiedCache` (L3), plus the `CacheWarmer` (L4) and
//! `CacheMonitor` (L5) that operate on it. `TieredCacheManager` (L7) lives
//! one level up in [`crate::tiered`] since it also depends on
//! [`crate::lock`].

pub mod disk;
pub mod entry;
pub mod memory;
pub mod monitor;
pub mod unified;
pub mod warmer;

pub use entry::{CacheEntry, CacheStats, CacheStatsSnapshot, Tier};
pub use monitor::{spawn_monitor_loop, Alert, AlertKind, CacheMonitor, HealthReport, MonitorThresholds};
pub use unified::{spawn_cleanup_loop, CacheConfig, UnifiedCache};
pub use warmer::{default_schedules, spawn_warmer_loops, CacheWarmer, CacheWarmerConfig, WarmingSchedule};

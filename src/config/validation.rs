//! Structural validation for [`super::Config`] beyond what serde's
//! `#[serde(default)]` already guarantees — ordering and non-zero
//! invariants that a malformed file could otherwise violate silently.

use super::Config;
use crate::error::{Error, Result};

pub fn validate(config: &Config) -> Result<()> {
    if config.cache.max_entries == 0 {
        return Err(Error::ConfigInvalid("cache.max_entries must be greater than zero".into()));
    }
    if config.cache.max_memory_mb == 0 {
        return Err(Error::ConfigInvalid("cache.max_memory_mb must be greater than zero".into()));
    }
    if config.breaker.min_timeout_seconds >= config.breaker.max_timeout_seconds {
        return Err(Error::ConfigInvalid(
            "breaker.min_timeout_seconds must be less than breaker.max_timeout_seconds".into(),
        ));
    }
    if !(config.breaker.min_timeout_seconds..=config.breaker.max_timeout_seconds)
        .contains(&config.breaker.base_timeout_seconds)
    {
        return Err(Error::ConfigInvalid(
            "breaker.base_timeout_seconds must fall within [min_timeout_seconds, max_timeout_seconds]".into(),
        ));
    }
    if config.breaker.failure_threshold == 0 {
        return Err(Error::ConfigInvalid("breaker.failure_threshold must be greater than zero".into()));
    }
    if config.engine.max_providers == 0 {
        return Err(Error::ConfigInvalid("engine.max_providers must be greater than zero".into()));
    }
    if !(0.0..=1.0).contains(&config.monitor.target_hit_rate) {
        return Err(Error::ConfigInvalid("monitor.target_hit_rate must be between 0.0 and 1.0".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_max_entries_is_rejected() {
        let mut config = Config::default();
        config.cache.max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_timeout_bounds_are_rejected() {
        let mut config = Config::default();
        config.breaker.min_timeout_seconds = 100;
        config.breaker.max_timeout_seconds = 10;
        assert!(config.validate().is_err());
    }
}

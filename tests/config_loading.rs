//! Integration tests for configuration file discovery, loading, and the
//! binary's CLI surface.

use assert_cmd::Command;
use predicates::prelude::*;
use router_core::config::Config;
use std::io::Write;

#[test]
fn loads_yaml_overrides_on_top_of_defaults() {
    // Given: a YAML file overriding a handful of cache and breaker settings
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        r#"
cache:
  max_entries: 42
  max_memory_mb: 64
breaker:
  failure_threshold: 2
"#
    )
    .unwrap();

    // When: the file is loaded
    let config = Config::from_file(file.path()).unwrap();

    // Then: overridden fields take the file's values, untouched ones keep defaults
    assert_eq!(config.cache.max_entries, 42);
    assert_eq!(config.cache.max_memory_mb, 64);
    assert_eq!(config.breaker.failure_threshold, 2);
    assert_eq!(config.breaker.success_threshold, 3);
    assert!(config.validate().is_ok());
}

#[test]
fn loads_toml_overrides_on_top_of_defaults() {
    // Given: a TOML file overriding the balancer strategy
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[balancer]
strategy = "round_robin"
"#
    )
    .unwrap();

    // When: the file is loaded
    let config = Config::from_file(file.path()).unwrap();

    // Then: the override is reflected, everything else is left at defaults
    assert_eq!(config.balancer.strategy, router_core::balancer::BalancerStrategy::RoundRobin);
    assert_eq!(config.cache.max_entries, 10_000);
}

#[test]
fn rejects_an_unrecognized_extension() {
    // Given: a config file with no yaml/yml/toml extension
    let mut file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
    writeln!(file, "cache.max_entries=1").unwrap();

    // When/Then: loading it is rejected rather than guessed at
    assert!(Config::from_file(file.path()).is_err());
}

#[test]
fn discover_and_load_falls_back_to_defaults_in_an_empty_directory() {
    // Given: a directory with none of the conventional config file names
    let dir = tempfile::tempdir().unwrap();
    let original = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    // When: discovery runs
    let config = Config::discover_and_load();

    std::env::set_current_dir(original).unwrap();

    // Then: it succeeds with built-in defaults rather than erroring
    let config = config.unwrap();
    assert_eq!(config.server.port, 8080);
}

#[test]
fn binary_reports_its_version() {
    Command::cargo_bin("router-core")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("router-core"));
}

#[test]
fn binary_rejects_a_malformed_config_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "cache: [this, is, not, a, mapping]").unwrap();

    Command::cargo_bin("router-core")
        .unwrap()
        .arg("--config")
        .arg(file.path())
        .assert()
        .failure();
}

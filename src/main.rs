//! router-core binary: wires the library to a minimal HTTP boundary.
//!
//! No auth, multi-tenant config, or CLI surface of its own — this exists
//! to prove the library is load-bearing over a real socket, not to be a
//! product in itself.

use clap::Parser;
use router_core::config::Config;
use router_core::orchestrator::{Orchestrator, OrchestratorConfig};
use router_core::{boundary, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "router-core")]
#[command(about = "LLM request-routing and caching substrate", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a YAML or TOML configuration file. Falls back to the
    /// conventional search path, then built-in defaults.
    #[arg(short, long, env = "ROUTER_CORE_CONFIG")]
    config: Option<PathBuf>,

    /// Bind host; overrides the config file's `server.host`.
    #[arg(long, env = "ROUTER_CORE_HOST")]
    host: Option<String>,

    /// Bind port; overrides the config file's `server.port`.
    #[arg(long, env = "ROUTER_CORE_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error); overrides `logging.level`.
    #[arg(long, env = "ROUTER_CORE_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::discover_and_load()?,
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;

    init_tracing(&config.logging);

    info!("router-core v{} starting", env!("CARGO_PKG_VERSION"));

    let orchestrator_config = OrchestratorConfig {
        cache: config.cache.clone().into(),
        tiered: config.tiering.clone().into(),
        warmer: config.warmer.clone().into(),
        breaker: config.breaker.clone().into(),
        engine: config.engine.clone().into(),
        default_mode: config.engine.mode,
        monitor_thresholds: config.monitor.clone().into(),
        monitor_interval_seconds: config.monitor.check_interval_seconds,
        ..OrchestratorConfig::default()
    };

    let orchestrator = Arc::new(Orchestrator::new(orchestrator_config)?);

    let addr = format!("{}:{}", config.server.host, config.server.port)
        .parse::<std::net::SocketAddr>()
        .map_err(|e| router_core::Error::ConfigInvalid(format!("invalid bind address: {e}")))?;

    boundary::serve(orchestrator.clone(), addr, shutdown_signal()).await?;

    match Arc::try_unwrap(orchestrator) {
        Ok(orchestrator) => orchestrator.shutdown().await,
        Err(_) => info!("orchestrator still has live references after boundary shutdown, skipping drain"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

fn init_tracing(logging: &router_core::config::LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::registry().with(filter).with(fmt::layer().json()).init();
    } else {
        tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
    }
}

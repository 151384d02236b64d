//! Resilience Engine Binary
//!
//! Runs the resilience layer standalone: health monitoring, automatic
//! recovery and transaction retention, with an optional Prometheus endpoint.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin resilience-engine
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `RESILIENCE_CONFIG`: Path to the YAML configuration (default: config.yaml,
//!   built-in defaults when the file does not exist)
//! - `RUST_LOG`: Log filter, overrides `observability.logging.level`
//!
//! Any `${VAR}` or `${VAR:-default}` in the configuration file is expanded
//! from the environment after `.env` is loaded.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use resilience_engine::observability::init_metrics;
use resilience_engine::telemetry::init_tracing;
use resilience_engine::{ResilienceConfig, ResilienceLayer, load_config};
use tokio::signal;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default configuration path.
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let config = read_config()?;
    init_tracing(&config.observability.logging).context("tracing setup failed")?;

    tracing::info!("Starting Resilience Engine");
    log_config(&config);

    if let Some(metrics) = config.observability.metrics.to_metrics_config() {
        init_metrics(&metrics).context("metrics exporter failed to start")?;
    }

    let layer = ResilienceLayer::new(config).context("resilience layer setup failed")?;
    layer.start();

    tracing::info!("Resilience engine ready");

    shutdown_signal().await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, layer.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Background services did not stop in time"
        );
    }

    let stats = layer.get_error_statistics();
    tracing::info!(
        total_errors = stats.total_errors,
        resolved_errors = stats.resolved_errors,
        "Resilience engine stopped"
    );
    Ok(())
}

/// Read the configuration file, or fall back to defaults when it is absent.
fn read_config() -> anyhow::Result<ResilienceConfig> {
    let path = std::env::var("RESILIENCE_CONFIG").ok();
    let resolved = path.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);

    if path.is_none() && !Path::new(resolved).exists() {
        return Ok(ResilienceConfig::default());
    }

    load_config(Some(resolved)).with_context(|| format!("failed to load {resolved}"))
}

/// Log the effective configuration at startup.
fn log_config(config: &ResilienceConfig) {
    tracing::info!(
        max_retries = config.retry.max_retries,
        base_delay_ms = config.retry.base_delay_ms,
        failure_threshold = config.circuit_breaker.default.failure_threshold,
        per_minute = config.rate_limits.default.per_minute,
        check_interval_secs = config.health.check_interval_secs,
        auto_recovery = config.health.auto_recovery,
        persistence = config.persistence.enabled,
        "Configuration loaded"
    );
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. A process that cannot
/// observe termination signals should fail at startup.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}

//! Stack Engine Binary
//!
//! Runs one stack handler on a fixed cadence until interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin stack-engine
//! ```
//!
//! # Environment Variables
//!
//! - `STACK_ENGINE_CONFIG`: path to the YAML config (default: config.yaml)
//! - `RUST_LOG`: log filter (default: `observability.log_filter`)
//!
//! Any `${VAR}` or `${VAR:-default}` inside the config file is substituted
//! from the environment as well.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use stack_engine::application::handler::StackHandler;
use stack_engine::config::{Config, load_config};
use stack_engine::domain::shared::HolderId;
use stack_engine::infrastructure::config::Container;
use stack_engine::observability::{MetricsConfig, init_metrics};
use tokio::signal;
use tracing_subscriber::EnvFilter;

/// Config path when `STACK_ENGINE_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path =
        std::env::var("STACK_ENGINE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(Some(&path)).with_context(|| format!("loading {path}"))?;

    init_tracing(&config);
    tracing::info!(config = %path, "Starting stack engine");

    if let Some(addr) = &config.observability.metrics_addr {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid metrics address {addr}"))?;
        init_metrics(&MetricsConfig::with_addr(addr))?;
    }

    let container = Container::from_config(&config).context("opening order stacks")?;
    let holder = HolderId::generate(&config.handler.holder_prefix);
    let handler = container.handler(holder);
    tracing::info!(
        holder = %handler.holder(),
        backend = ?config.persistence.backend,
        cycle_interval_secs = config.schedule.cycle_interval_secs,
        "Handler ready"
    );

    run(&handler, &config).await?;

    tracing::info!("Stack engine stopped");
    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured filter.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Run handler cycles until shutdown or a fatal error.
///
/// Cycles only start inside the configured trading window. A cycle that
/// overruns the interval delays the next one instead of overlapping it.
/// Shutdown is only observed between cycles, so a broker call is never
/// abandoned half way.
async fn run(handler: &StackHandler, config: &Config) -> anyhow::Result<()> {
    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.schedule.cycle_interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = &mut shutdown => return Ok(()),
        }
        let now = Utc::now();
        if let Some(window) = &config.schedule.window {
            if !window.contains(now.time()) {
                tracing::debug!("Outside trading window; cycle skipped");
                continue;
            }
        }

        let report = handler
            .run_cycle(now)
            .await
            .context("handler cycle aborted")?;
        tracing::debug!(
            lock_conflicts = report.lock_conflicts(),
            errors = report.errors(),
            "Cycle finished"
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler could not be installed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler could not be installed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}

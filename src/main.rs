//! Resilient upstream client (v1)
//!
//! Command-line front end for the `upstream_client` library.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller ──▶ ProxyCore ──▶ InstanceRegistry ──▶ LoadBalancer
//!                 │               │  (healthy + breaker admitting)
//!                 │               ▼
//!                 │         ServiceInstance ◀── HealthChecker (probes)
//!                 ▼               │
//!           CircuitBreaker ──▶ Retryer ──▶ operation(instance)
//!
//!   ConfigWatcher ──▶ registry.replace_from_config (changed instances only)
//! ```
//!
//! # Commands
//! - `run`: health-check the pool until Ctrl+C, reloading on config change
//! - `probe`: one health round, print instance status as JSON
//! - `call <path>`: one GET through the full resilience stack

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use upstream_client::config::watcher::ConfigWatcher;
use upstream_client::config::{load_config, UpstreamConfig};
use upstream_client::lifecycle::{signals, Shutdown};
use upstream_client::observability::logging;
use upstream_client::proxy::HttpCaller;
use upstream_client::{CallContext, HealthChecker, InstanceRegistry, ProxyCore};

#[derive(Parser)]
#[command(name = "upstream-client")]
#[command(about = "Resilient client for a pool of upstream instances", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "upstream.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Health-check instances until interrupted
    Run {
        /// Seconds between status log lines
        #[arg(long, default_value_t = 30)]
        status_interval: u64,
    },
    /// Probe every instance once and print status
    Probe,
    /// GET a path through the selected instance
    Call {
        path: String,
        /// Overall call timeout in milliseconds
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    logging::init(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?cli.config,
        instances = config.instances.len(),
        "upstream-client starting"
    );

    let core = ProxyCore::from_config(&config)?;

    match cli.command {
        Commands::Run { status_interval } => {
            run(&cli.config, config, core, Duration::from_secs(status_interval.max(1))).await?
        }
        Commands::Probe => {
            HealthChecker::new(core.registry().clone(), config.health_check.clone())?
                .check_all()
                .await;
            println!("{}", serde_json::to_string_pretty(&core.registry().status())?);
        }
        Commands::Call { path, timeout_ms } => {
            let caller = HttpCaller::new(Duration::from_millis(timeout_ms))?;
            let ctx = CallContext::with_timeout(Duration::from_millis(timeout_ms));
            let reply = core
                .execute(&ctx, |instance| {
                    let caller = caller.clone();
                    let path = path.clone();
                    async move { caller.get(&instance, &path).await }
                })
                .await?;
            eprintln!("{} {}", reply.instance, reply.status);
            println!("{}", reply.body);
        }
    }

    Ok(())
}

async fn run(
    path: &Path,
    config: UpstreamConfig,
    core: ProxyCore,
    status_interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = Shutdown::new();
    let registry = core.registry().clone();

    let mut tasks = Vec::new();
    tasks.push(HealthChecker::new(registry.clone(), config.health_check.clone())?.spawn(shutdown.subscribe()));
    tasks.push(tokio::spawn(log_status(registry.clone(), status_interval, shutdown.subscribe())));

    let (watcher, mut updates) = ConfigWatcher::new(path, &config);
    // Dropping the watcher stops file notifications.
    let _watcher = match watcher.run() {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!(error = %e, "Config watching unavailable, reload disabled");
            None
        }
    };

    let mut reload_shutdown = shutdown.subscribe();
    tasks.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(instances) = updates.recv() => {
                    match registry.replace_from_config(&instances) {
                        Ok(summary) => tracing::info!(
                            instances = registry.len(),
                            kept = summary.kept,
                            added = summary.added,
                            removed = summary.removed,
                            "Instance list reloaded"
                        ),
                        Err(e) => tracing::error!(error = %e, "Rejected instance list, keeping current"),
                    }
                }
                _ = reload_shutdown.recv() => break,
            }
        }
    }));

    signals::wait_for_signal().await?;
    shutdown.drain(tasks, Duration::from_secs(5)).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn log_status(
    registry: Arc<InstanceRegistry>,
    every: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for status in registry.status() {
                    tracing::info!(
                        instance = %status.id,
                        health = ?status.health,
                        circuit = %status.breaker.state,
                        active = status.active_connections,
                        eligible = status.eligible,
                        "Instance status"
                    );
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

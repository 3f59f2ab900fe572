//! runnerd — the RunnerGrid daemon.
//!
//! Single binary that assembles the fleet control plane:
//! - State store (redb)
//! - CI provider client (queue observer + runner registry)
//! - Compute provider
//! - Fleet manager with one tick loop per enabled fleet
//! - REST API
//!
//! The provider access token is read once from `RUNNERGRID_TOKEN`; it is
//! never persisted or logged.
//!
//! # Usage
//!
//! ```text
//! RUNNERGRID_TOKEN=... runnerd run \
//!     --provider-url http://ci.internal:8080 \
//!     --port 8090 --data-dir /var/lib/runnergrid
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use runnergrid_compute::{ComputeProvider, DevCompute};
use runnergrid_fleet::{ControllerConfig, FleetLifecycleManager, FleetManager, LifecycleConfig};
use runnergrid_provider::{HttpQueueObserver, HttpRunnerRegistry, ProviderClient};

#[derive(Parser)]
#[command(name = "runnerd", about = "RunnerGrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane.
    Run {
        /// Port the operator API listens on.
        #[arg(long, default_value = "8090")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/runnergrid")]
        data_dir: PathBuf,

        /// Base URL of the CI provider API.
        #[arg(long, default_value = "http://localhost:8080")]
        provider_url: String,

        /// Fleet tick interval in seconds.
        #[arg(long, default_value = "60")]
        tick_interval: u64,

        /// Provision/destroy operations in flight across all fleets.
        #[arg(long, default_value = "10")]
        max_concurrent_ops: usize,

        /// Compute backend ("dev" is the built-in in-process backend).
        #[arg(long, default_value = "dev")]
        compute: String,

        /// Rotate workers older than this many seconds (0 disables).
        #[arg(long, default_value = "0")]
        rotate_after: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,runnerd=debug,runnergrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            port,
            data_dir,
            provider_url,
            tick_interval,
            max_concurrent_ops,
            compute,
            rotate_after,
        } => {
            run(
                port,
                data_dir,
                provider_url,
                tick_interval,
                max_concurrent_ops,
                compute,
                rotate_after,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    port: u16,
    data_dir: PathBuf,
    provider_url: String,
    tick_interval: u64,
    max_concurrent_ops: usize,
    compute_backend: String,
    rotate_after: u64,
) -> anyhow::Result<()> {
    info!("RunnerGrid daemon starting");

    // The provider token lives only in process memory.
    let token = std::env::var("RUNNERGRID_TOKEN")
        .context("RUNNERGRID_TOKEN must be set in the environment")?;

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("runnergrid.redb");

    // ── Initialize subsystems ──────────────────────────────────

    // State store.
    let store = runnergrid_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // Compute provider.
    let compute: Arc<dyn ComputeProvider> = match compute_backend.as_str() {
        "dev" => Arc::new(DevCompute::new()),
        other => anyhow::bail!("unknown compute backend: {other}"),
    };
    info!(backend = %compute_backend, "compute provider initialized");

    // CI provider client.
    let client = ProviderClient::new(&provider_url, token)
        .map_err(|e| anyhow::anyhow!("invalid --provider-url: {e}"))?;
    let observer = Arc::new(HttpQueueObserver::new(client.clone()));
    let registry = Arc::new(HttpRunnerRegistry::new(client, compute.clone()));
    info!(url = %provider_url, "provider client initialized");

    // Fleet manager.
    let lifecycle = Arc::new(FleetLifecycleManager::new(
        registry,
        compute,
        LifecycleConfig::default(),
    ));
    let controller_config = ControllerConfig {
        tick_interval: Duration::from_secs(tick_interval),
        rotate_after: (rotate_after > 0).then(|| Duration::from_secs(rotate_after)),
        ..ControllerConfig::default()
    };
    let manager = Arc::new(FleetManager::new(
        store.clone(),
        observer,
        lifecycle,
        controller_config,
        max_concurrent_ops,
    ));
    info!(
        tick_interval,
        max_concurrent_ops, "fleet manager initialized"
    );

    // Resume fleets persisted as enabled.
    let resumed = manager.resume_enabled().await?;
    info!(resumed, "persisted fleets resumed");

    // ── Start API server ───────────────────────────────────────

    let router = runnergrid_api::build_router(store, manager.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
    });

    server.await?;

    // Stop fleet controllers; workers keep running and are resumed on the
    // next start from persisted specs.
    manager.shutdown_all().await;

    info!("RunnerGrid daemon stopped");
    Ok(())
}

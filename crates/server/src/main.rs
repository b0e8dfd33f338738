//! The codemem daemon binary: `serve` starts the sync HTTP server plus the
//! background sweeper/sync loops; `raw-events-gate` evaluates the raw-event
//! reliability metrics against a threshold and exits non-zero on failure,
//! for use as a CI/release gate.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codemem_db::Database;
use codemem_ingest::{evaluate_gate, GateThresholds, Sweeper};
use codemem_server::{DaemonHandle, NullClassifier, ServerConfig};
use codemem_sync::{sync_app, DeviceIdentity, SyncState};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "codemem", about = "Local-first developer memory store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sync HTTP server and background ingestion loops.
    Serve,
    /// Evaluate raw-event reliability metrics against documented
    /// thresholds, exiting non-zero if any are violated.
    RawEventsGate {
        /// Lookback window, in hours.
        #[arg(long, default_value_t = 24)]
        window_hours: i64,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => serve().await,
        Command::RawEventsGate { window_hours } => raw_events_gate(window_hours).await,
    }
}

async fn serve() -> Result<()> {
    let config = ServerConfig::from_env();

    let db_path = config.db_path.clone().context("could not resolve database path")?;
    let db = Arc::new(Database::new(&db_path).await.context("opening database")?);

    let keys_dir = config.keys_dir.clone().context("could not resolve keys directory")?;
    let identity = Arc::new(DeviceIdentity::load_or_create(&keys_dir).context("loading device identity")?);

    let sweeper = Arc::new(Sweeper::new(
        db.clone(),
        Arc::new(NullClassifier),
        config.device_id.clone(),
        config.raw_events.clone(),
    ));

    let _daemon = DaemonHandle::spawn(
        sweeper,
        config.raw_events.sweeper_interval,
        config.raw_events.sweeper_enabled,
        db.clone(),
        identity.clone(),
        Duration::from_secs(60),
    );

    let state = SyncState { db: db.clone(), identity };
    let app = sync_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.sync_port));
    tracing::info!(%addr, "sync server listening");

    let listener = tokio::net::TcpListener::bind(addr).await.context("binding sync server")?;
    axum::serve(listener, app).await.context("sync server exited")?;

    Ok(())
}

async fn raw_events_gate(window_hours: i64) -> Result<()> {
    let config = ServerConfig::from_env();
    let db_path = config.db_path.context("could not resolve database path")?;
    let db = Database::new(&db_path).await.context("opening database")?;

    let metrics = db.reliability_metrics(window_hours).await.context("computing reliability metrics")?;
    let report = evaluate_gate(metrics, &GateThresholds::default());

    for violation in &report.violations {
        tracing::warn!(violation = violation.as_str(), "raw-events-gate violation");
    }

    if report.passed() {
        tracing::info!("raw-events-gate passed");
        Ok(())
    } else {
        anyhow::bail!("raw-events-gate failed: {} violation(s)", report.violations.len());
    }
}

//! Silo Metrics Monitor
//!
//! Accumulates block-checkpointed metrics for the silo lending aggregator.
//! Features:
//! - Resumable checkpoint fetching into persisted CSV tables
//! - Collateral APY/APR, utilization, borrow/supply APY and oracle spread
//! - Borrower discovery and per-user LTV ranking
//! - One-shot or fixed-interval polling (`POLL_INTERVAL_SECS`)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use silo_api::{AddressSource, DuneClient, PollPolicy, QueryAddressSource};
use silo_chain::RpcChainReader;
use silo_core::{CsvTableStore, DashboardSnapshot, MonitorConfig, Pipeline, ResolvedConfig, Secrets};

/// Environment variable names.
mod env {
    pub const SILO_CONFIG: &str = "SILO_CONFIG";
    pub const POLL_INTERVAL_SECS: &str = "POLL_INTERVAL_SECS";
}

const DEFAULT_CONFIG_PATH: &str = "./config/silo.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,silo_core=debug,silo_chain=debug")),
        )
        .init();

    info!("Starting silo metrics monitor");

    // Secrets and configuration are required before anything is fetched
    let secrets = Secrets::from_env()?;
    let config = load_config(&secrets)?;
    config.log_config();

    let pipeline = initialize_pipeline(config, &secrets).await?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    match poll_interval()? {
        Some(interval) => run_loop(&pipeline, interval, &cancel).await,
        None => run_once(&pipeline, &cancel).await,
    }
}

fn load_config(secrets: &Secrets) -> Result<ResolvedConfig> {
    let path = std::env::var(env::SILO_CONFIG)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    info!(path = ?path, "Loading configuration");
    MonitorConfig::from_file(&path)?
        .resolve(secrets)
        .with_context(|| format!("Invalid configuration {:?}", path))
}

fn poll_interval() -> Result<Option<Duration>> {
    match std::env::var(env::POLL_INTERVAL_SECS) {
        Ok(value) => {
            let secs: u64 = value
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid {}: {}", env::POLL_INTERVAL_SECS, e))?;
            if secs == 0 {
                anyhow::bail!("{} must be non-zero", env::POLL_INTERVAL_SECS);
            }
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}

async fn initialize_pipeline(config: ResolvedConfig, secrets: &Secrets) -> Result<Pipeline> {
    info!("Initializing components...");

    // Chain reader
    let reader = RpcChainReader::new(&config.rpc_url, config.data_provider)?;
    let head = reader.health_check().await?;
    info!(head = head, "Chain reader connected");

    // Table store
    let store = CsvTableStore::new(config.storage.dir.clone());
    info!(dir = ?store.dir(), "Table store ready");

    // Address discovery
    let addresses: Option<Arc<dyn AddressSource>> = match &config.discovery {
        Some(discovery) => {
            let policy = PollPolicy {
                poll_interval: discovery.poll_interval(),
                max_wait: discovery.max_wait(),
            };
            let source = QueryAddressSource::new(
                DuneClient::new(secrets.dune_api_key.clone()),
                discovery.query_id,
                policy,
            )
            .with_performance(discovery.performance.clone());
            Some(Arc::new(source) as Arc<dyn AddressSource>)
        }
        None => {
            warn!("No [discovery] section, user risk uses the persisted address log only");
            None
        }
    };

    info!("All components initialized");

    Ok(Pipeline::new(config, Arc::new(reader), Arc::new(store), addresses))
}

async fn run_once(pipeline: &Pipeline, cancel: &CancellationToken) -> Result<()> {
    let output = pipeline.run(cancel).await?;
    let report = &output.report;

    info!(
        head = report.head,
        latest_block = ?report.latest_block,
        refreshed = report.refreshed,
        checkpoints = report.checkpoints,
        failed = report.failures.len(),
        latest_address_block = ?report.latest_address_block,
        discovery_ran = report.discovery_ran,
        users = report.users,
        risk_rows = output.risk.len(),
        "Cycle complete"
    );

    let config = pipeline.config();
    DashboardSnapshot::build(&config.strategies, &output).write(&config.storage.snapshot_path())?;
    Ok(())
}

async fn run_loop(
    pipeline: &Pipeline,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    info!(interval_secs = interval.as_secs(), "Starting polling loop");

    loop {
        if let Err(e) = run_once(pipeline, cancel).await {
            if cancel.is_cancelled() {
                break;
            }
            error!(error = %format!("{e:#}"), "Cycle failed");
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Polling loop stopped");
    Ok(())
}

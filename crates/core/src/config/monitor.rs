//! Monitor configuration loaded from TOML.
//!
//! Strategies are listed as records so that strategy, oracle and collateral
//! addresses always travel together.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use super::secrets::Secrets;

/// Top-level configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// JSON-RPC endpoint; `${VAR}` references are expanded from the secrets,
    /// then the environment
    pub rpc_url: String,
    /// Aggregator data provider contract (hex string)
    pub data_provider: String,
    /// Tracked strategies, in display order
    pub strategies: Vec<StrategyConfig>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub discovery: Option<DiscoveryConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// One silo strategy (TOML-loadable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Short id, used as the column suffix in persisted tables
    pub id: String,
    /// Human-readable name
    pub display_name: String,
    /// Strategy contract address
    pub strategy: String,
    /// Dual oracle address
    pub oracle: String,
    /// Collateral vault address (share price source)
    pub collateral: String,
}

/// Checkpoint schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Blocks between checkpoints
    #[serde(default = "default_block_interval")]
    pub block_interval: u64,
    /// First block of the checkpoint grid
    #[serde(default)]
    pub origin_block: u64,
}

fn default_block_interval() -> u64 {
    1200
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            block_interval: default_block_interval(),
            origin_block: 0,
        }
    }
}

/// Rate derivation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Rows between the current and the lagged share price
    #[serde(default = "default_lag_rows")]
    pub lag_rows: usize,
    /// Days the lag window represents
    #[serde(default = "default_apy_window_days")]
    pub apy_window_days: f64,
    /// Compounding periods per year for APY -> APR
    #[serde(default = "default_compounding_periods")]
    pub compounding_periods: f64,
}

fn default_lag_rows() -> usize {
    180
}
fn default_apy_window_days() -> f64 {
    30.0
}
fn default_compounding_periods() -> f64 {
    52.0
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            lag_rows: default_lag_rows(),
            apy_window_days: default_apy_window_days(),
            compounding_periods: default_compounding_periods(),
        }
    }
}

/// Borrower address discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Saved query id
    pub query_id: u64,
    /// Engine size
    #[serde(default = "default_performance")]
    pub performance: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    /// Re-run discovery once the head is this many blocks past the last run
    #[serde(default = "default_refresh_interval_blocks")]
    pub refresh_interval_blocks: u64,
}

fn default_performance() -> String {
    "medium".to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_max_wait_secs() -> u64 {
    600
}
fn default_refresh_interval_blocks() -> u64 {
    7200
}

impl DiscoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

/// Persisted table locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_strategy_table")]
    pub strategy_table: String,
    #[serde(default = "default_pps_table")]
    pub pps_table: String,
    #[serde(default = "default_address_table")]
    pub address_table: String,
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_strategy_table() -> String {
    "strategy_series".to_string()
}
fn default_pps_table() -> String {
    "pps_series".to_string()
}
fn default_address_table() -> String {
    "borrowers".to_string()
}
fn default_snapshot_file() -> String {
    "dashboard.json".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            strategy_table: default_strategy_table(),
            pps_table: default_pps_table(),
            address_table: default_address_table(),
            snapshot_file: default_snapshot_file(),
        }
    }
}

impl StorageConfig {
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(&self.snapshot_file)
    }
}

/// A strategy with parsed addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    pub id: String,
    pub display_name: String,
    pub strategy: Address,
    pub oracle: Address,
    pub collateral: Address,
}

/// Fully resolved, validated configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub rpc_url: String,
    pub data_provider: Address,
    pub strategies: Vec<Strategy>,
    pub schedule: ScheduleConfig,
    pub metrics: MetricsConfig,
    pub discovery: Option<DiscoveryConfig>,
    pub storage: StorageConfig,
}

fn parse_addr(field: &str, value: &str) -> Result<Address> {
    value
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid {} address '{}': {}", field, value, e))
}

impl StrategyConfig {
    fn resolve(&self) -> Result<Strategy> {
        Ok(Strategy {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            strategy: parse_addr("strategy", &self.strategy)?,
            oracle: parse_addr("oracle", &self.oracle)?,
            collateral: parse_addr("collateral", &self.collateral)?,
        })
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Validate and resolve addresses and environment references.
    pub fn resolve(&self, secrets: &Secrets) -> Result<ResolvedConfig> {
        if self.strategies.is_empty() {
            anyhow::bail!("At least one strategy must be configured");
        }
        if self.schedule.block_interval == 0 {
            anyhow::bail!("schedule.block_interval must be non-zero");
        }
        if self.metrics.lag_rows == 0 {
            anyhow::bail!("metrics.lag_rows must be non-zero");
        }

        let mut seen = HashSet::new();
        for strategy in &self.strategies {
            if strategy.id.is_empty() {
                anyhow::bail!("Strategy id must not be empty");
            }
            if !seen.insert(strategy.id.as_str()) {
                anyhow::bail!("Duplicate strategy id '{}'", strategy.id);
            }
        }

        let strategies = self
            .strategies
            .iter()
            .map(|s| s.resolve().with_context(|| format!("Strategy '{}'", s.id)))
            .collect::<Result<Vec<_>>>()?;

        Ok(ResolvedConfig {
            rpc_url: secrets.expand(&self.rpc_url)?,
            data_provider: parse_addr("data_provider", &self.data_provider)?,
            strategies,
            schedule: self.schedule.clone(),
            metrics: self.metrics.clone(),
            discovery: self.discovery.clone(),
            storage: self.storage.clone(),
        })
    }
}

impl ResolvedConfig {
    /// Log the loaded configuration (no secrets).
    pub fn log_config(&self) {
        info!(
            data_provider = %self.data_provider,
            strategies = self.strategies.len(),
            "Monitor configuration loaded"
        );
        for strategy in &self.strategies {
            info!(
                id = %strategy.id,
                name = %strategy.display_name,
                strategy = %strategy.strategy,
                oracle = %strategy.oracle,
                collateral = %strategy.collateral,
                "Strategy"
            );
        }
        info!(
            block_interval = self.schedule.block_interval,
            origin_block = self.schedule.origin_block,
            lag_rows = self.metrics.lag_rows,
            "Schedule"
        );
        match &self.discovery {
            Some(d) => info!(
                query_id = d.query_id,
                refresh_interval_blocks = d.refresh_interval_blocks,
                max_wait_secs = d.max_wait_secs,
                "Address discovery enabled"
            ),
            None => info!("Address discovery disabled"),
        }
        info!(dir = ?self.storage.dir, "Storage");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> Secrets {
        Secrets {
            alchemy_key: "key".to_string(),
            dune_api_key: "dune".to_string(),
        }
    }

    const SAMPLE: &str = r#"
        rpc_url = "https://rpc.example.org"
        data_provider = "0x69764e3e0f13ad6fb5f3a3c9b9b6a6e0d4d4a8c7"

        [schedule]
        block_interval = 1200
        origin_block = 18000000

        [discovery]
        query_id = 3237025

        [[strategies]]
        id = "A"
        display_name = "Strategy A"
        strategy = "0x1111111111111111111111111111111111111111"
        oracle = "0x2222222222222222222222222222222222222222"
        collateral = "0x3333333333333333333333333333333333333333"

        [[strategies]]
        id = "B"
        display_name = "Strategy B"
        strategy = "0x4444444444444444444444444444444444444444"
        oracle = "0x5555555555555555555555555555555555555555"
        collateral = "0x6666666666666666666666666666666666666666"
    "#;

    #[test]
    fn test_parse_and_resolve() {
        let config = MonitorConfig::from_toml(SAMPLE).unwrap();
        let resolved = config.resolve(&secrets()).unwrap();

        assert_eq!(resolved.strategies.len(), 2);
        assert_eq!(resolved.strategies[1].id, "B");
        assert_eq!(resolved.schedule.origin_block, 18_000_000);

        // Defaults
        assert_eq!(resolved.metrics.lag_rows, 180);
        assert_eq!(resolved.metrics.compounding_periods, 52.0);
        let discovery = resolved.discovery.unwrap();
        assert_eq!(discovery.performance, "medium");
        assert_eq!(discovery.poll_interval(), Duration::from_secs(1));
        assert_eq!(resolved.storage.strategy_table, "strategy_series");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut config = MonitorConfig::from_toml(SAMPLE).unwrap();
        config.strategies[1].id = "A".to_string();
        assert!(config.resolve(&secrets()).is_err());
    }

    #[test]
    fn test_bad_address_rejected() {
        let mut config = MonitorConfig::from_toml(SAMPLE).unwrap();
        config.strategies[0].oracle = "0x1234".to_string();
        let err = config.resolve(&secrets()).unwrap_err();
        assert!(format!("{err:#}").contains("Strategy 'A'"));
    }

    #[test]
    fn test_empty_strategies_rejected() {
        let mut config = MonitorConfig::from_toml(SAMPLE).unwrap();
        config.strategies.clear();
        assert!(config.resolve(&secrets()).is_err());
    }
}

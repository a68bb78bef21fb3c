//! One monitor cycle.
//!
//! Load persisted series, fetch missing checkpoints, append, derive the
//! master metrics table, refresh the borrower address list when due and
//! compute user risk.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ResolvedConfig;
use crate::fetch::{CollateralSeriesFetcher, FailedCheckpoint, StrategySeriesFetcher};
use crate::merge::{merge_series, MergedRow};
use crate::metrics::{MasterMetricsTable, MetricsDeriver};
use crate::risk::{UserRiskComputer, UserRiskRecord};
use crate::schedule::{needs_refresh, schedule};
use crate::store::TableStore;
use crate::table::{AddressLog, ColumnGroup, PpsTable, StrategyTable, WideTable};
use silo_api::{AddressSource, DiscoveryError};
use silo_chain::{ChainReader, CollateralRawRecord, StrategyRawRecord};

/// Which series a failed checkpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    Strategy,
    Collateral,
}

/// A dropped checkpoint, attributed to its strategy.
#[derive(Debug, Clone)]
pub struct SeriesFailure {
    pub strategy_id: String,
    pub kind: SeriesKind,
    pub checkpoint: FailedCheckpoint,
}

/// Scalar facts about one cycle.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub head: u64,
    /// Latest persisted strategy checkpoint after the cycle
    pub latest_block: Option<u64>,
    /// Whether new checkpoints were fetched
    pub refreshed: bool,
    pub checkpoints: usize,
    pub strategy_rows_added: usize,
    pub pps_rows_added: usize,
    pub failures: Vec<SeriesFailure>,
    pub latest_address_block: Option<u64>,
    pub discovery_ran: bool,
    pub users: usize,
    pub skipped_users: usize,
}

/// Everything a cycle produces for rendering.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub report: RunReport,
    pub master: MasterMetricsTable,
    pub risk: Vec<UserRiskRecord>,
}

/// The metrics accumulation pipeline.
pub struct Pipeline {
    config: ResolvedConfig,
    reader: Arc<dyn ChainReader>,
    store: Arc<dyn TableStore>,
    addresses: Option<Arc<dyn AddressSource>>,
}

impl Pipeline {
    pub fn new(
        config: ResolvedConfig,
        reader: Arc<dyn ChainReader>,
        store: Arc<dyn TableStore>,
        addresses: Option<Arc<dyn AddressSource>>,
    ) -> Self {
        Self {
            config,
            reader,
            store,
            addresses,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    fn strategy_ids(&self) -> Vec<String> {
        self.config.strategies.iter().map(|s| s.id.clone()).collect()
    }

    fn load_wide<R: ColumnGroup + Clone>(&self, name: &str) -> Result<WideTable<R>> {
        let ids = self.strategy_ids();
        match self.store.load(name)? {
            Some(raw) => Ok(WideTable::from_raw(name, &raw, ids)
                .with_context(|| format!("Failed to decode table '{}'", name))?),
            None => {
                info!(table = name, "No persisted table, starting empty");
                Ok(WideTable::new(ids))
            }
        }
    }

    fn load_address_log(&self) -> Result<AddressLog> {
        let name = &self.config.storage.address_table;
        match self.store.load(name)? {
            Some(raw) => Ok(AddressLog::from_raw(name, &raw)?),
            None => Ok(AddressLog::new()),
        }
    }

    /// Refuse to overwrite `name` if another writer advanced it past
    /// `expected`.
    fn ensure_unchanged<R: ColumnGroup + Clone>(
        &self,
        name: &str,
        expected: Option<u64>,
    ) -> Result<()> {
        let current = self.load_wide::<R>(name)?.latest_block();
        if current > expected {
            anyhow::bail!(
                "Table '{}' advanced to block {:?} (read {:?} at start); another writer is active",
                name,
                current,
                expected
            );
        }
        Ok(())
    }

    /// Run one full cycle.
    #[instrument(skip_all)]
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunOutput> {
        let storage = &self.config.storage;
        let mut strategy_table: StrategyTable = self.load_wide(&storage.strategy_table)?;
        let mut pps_table: PpsTable = self.load_wide(&storage.pps_table)?;

        let head = self.reader.head_block().await.context("Failed to read chain head")?;
        let mut report = RunReport {
            head,
            ..RunReport::default()
        };

        let interval = self.config.schedule.block_interval;
        let origin = self.config.schedule.origin_block;
        let latest = strategy_table.latest_block();
        let latest_or_origin = latest.unwrap_or(origin);

        info!(
            head = head,
            latest_block = ?latest,
            strategy_rows = strategy_table.len(),
            pps_rows = pps_table.len(),
            "Persisted state loaded"
        );

        if needs_refresh(latest_or_origin, head, interval) {
            let checkpoints = schedule(latest_or_origin, head, interval, origin);
            report.checkpoints = checkpoints.len();
            info!(
                checkpoints = checkpoints.len(),
                first = checkpoints.first().copied().unwrap_or_default(),
                last = head,
                "Fetching checkpoints"
            );

            let pps_latest = pps_table.latest_block();
            let (new_strategy, new_pps) = self.fetch_all(&checkpoints, &mut report, cancel).await?;

            report.strategy_rows_added = strategy_table.append(new_strategy);
            report.pps_rows_added = pps_table.append(new_pps);

            self.ensure_unchanged::<StrategyRawRecord>(&storage.strategy_table, latest)?;
            self.ensure_unchanged::<CollateralRawRecord>(&storage.pps_table, pps_latest)?;
            self.store.save(&storage.strategy_table, &strategy_table.to_raw())?;
            self.store.save(&storage.pps_table, &pps_table.to_raw())?;
            report.refreshed = true;

            info!(
                strategy_rows_added = report.strategy_rows_added,
                pps_rows_added = report.pps_rows_added,
                failed = report.failures.len(),
                "Persisted tables updated"
            );
        } else {
            debug!(head = head, latest_block = latest_or_origin, "Persisted tables are current");
        }
        report.latest_block = strategy_table.latest_block();

        let master = MetricsDeriver::new(&self.config.metrics).derive(&strategy_table, &pps_table);
        debug!(rows = master.rows.len(), "Master metrics derived");

        let addresses = self.refresh_addresses(head, &mut report, cancel).await?;
        let risk = self.compute_risk(&strategy_table, &addresses, &mut report).await;

        Ok(RunOutput {
            report,
            master,
            risk,
        })
    }

    /// Fetch and merge both series for every strategy.
    async fn fetch_all(
        &self,
        checkpoints: &[u64],
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) -> Result<(Vec<MergedRow<StrategyRawRecord>>, Vec<MergedRow<CollateralRawRecord>>)> {
        let strategy_fetcher = StrategySeriesFetcher::new(self.reader.clone());
        let collateral_fetcher = CollateralSeriesFetcher::new(self.reader.clone());

        let mut strategy_series = Vec::with_capacity(self.config.strategies.len());
        let mut pps_series = Vec::with_capacity(self.config.strategies.len());

        for strategy in &self.config.strategies {
            if cancel.is_cancelled() {
                anyhow::bail!("Cancelled before fetching strategy '{}'", strategy.id);
            }

            let outcome = strategy_fetcher.fetch(strategy, checkpoints).await;
            report.failures.extend(outcome.failed.into_iter().map(|checkpoint| SeriesFailure {
                strategy_id: strategy.id.clone(),
                kind: SeriesKind::Strategy,
                checkpoint,
            }));
            strategy_series.push(outcome.rows);

            let outcome = collateral_fetcher.fetch(strategy, checkpoints).await;
            report.failures.extend(outcome.failed.into_iter().map(|checkpoint| SeriesFailure {
                strategy_id: strategy.id.clone(),
                kind: SeriesKind::Collateral,
                checkpoint,
            }));
            pps_series.push(outcome.rows);
        }

        let strategy_rows = merge_series(&strategy_series);
        let pps_rows = merge_series(&pps_series);

        if strategy_rows.len() < checkpoints.len() {
            warn!(
                checkpoints = checkpoints.len(),
                merged = strategy_rows.len(),
                "Strategy checkpoints lost in merge"
            );
        }
        if pps_rows.len() < checkpoints.len() {
            warn!(
                checkpoints = checkpoints.len(),
                merged = pps_rows.len(),
                "Share-price checkpoints lost in merge"
            );
        }

        Ok((strategy_rows, pps_rows))
    }

    /// Current borrower addresses: rediscovered when the log is stale,
    /// otherwise the last logged set.
    async fn refresh_addresses(
        &self,
        head: u64,
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let mut log = self.load_address_log()?;
        let latest = log.latest_block();

        let due = match (&self.addresses, &self.config.discovery) {
            (Some(_), Some(discovery)) => latest
                .map(|block| head.saturating_sub(block) >= discovery.refresh_interval_blocks)
                .unwrap_or(true),
            _ => false,
        };

        if let (true, Some(source)) = (due, &self.addresses) {
            match source.discover(cancel).await {
                Ok(addresses) => {
                    log.record(head, &addresses);
                    self.store
                        .save(&self.config.storage.address_table, &log.to_raw())?;
                    report.discovery_ran = true;
                    info!(block = head, addresses = addresses.len(), "Borrower addresses refreshed");
                }
                Err(DiscoveryError::Cancelled) => {
                    anyhow::bail!("Cancelled during address discovery");
                }
                Err(e) => {
                    warn!(error = %e, last_block = ?latest, "Address discovery failed, reusing last list");
                }
            }
        }

        report.latest_address_block = log.latest_block();
        Ok(log.latest_addresses())
    }

    async fn compute_risk(
        &self,
        strategy_table: &StrategyTable,
        addresses: &[String],
        report: &mut RunReport,
    ) -> Vec<UserRiskRecord> {
        let Some(latest) = strategy_table.last() else {
            debug!("No strategy snapshot yet, skipping user risk");
            return Vec::new();
        };
        if addresses.is_empty() {
            debug!("No borrower addresses, skipping user risk");
            return Vec::new();
        }

        let max_ltv: Vec<f64> = latest.values.iter().map(|r| r.max_ltv).collect();
        let outcome = UserRiskComputer::new(self.reader.clone())
            .compute(addresses, &self.config.strategies, &max_ltv)
            .await;

        report.users = addresses.len();
        report.skipped_users = outcome.skipped_users;
        outcome.records
    }
}

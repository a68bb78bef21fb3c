//! Per-source series fetchers.
//!
//! Checkpoints are read one at a time in schedule order. A failed read drops
//! that checkpoint from the series and is reported in [`FetchOutcome::failed`];
//! it is never retried within the same run.

use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::config::Strategy;
use silo_chain::{ChainReadError, ChainReader, CollateralRawRecord, StrategyRawRecord};

/// A checkpoint whose read failed.
#[derive(Debug, Clone)]
pub struct FailedCheckpoint {
    pub block: u64,
    pub error: String,
}

/// Rows that were read plus the checkpoints that were dropped.
#[derive(Debug, Clone)]
pub struct FetchOutcome<R> {
    /// One row per successful checkpoint, ascending by block
    pub rows: Vec<R>,
    pub failed: Vec<FailedCheckpoint>,
}

impl<R> Default for FetchOutcome<R> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<R> FetchOutcome<R> {
    fn record(&mut self, block: u64, result: Result<R, ChainReadError>, source: &str) {
        match result {
            Ok(row) => self.rows.push(row),
            Err(e) => {
                debug!(source = source, block = block, error = %e, "Dropping checkpoint");
                self.failed.push(FailedCheckpoint {
                    block,
                    error: e.to_string(),
                });
            }
        }
    }

    fn log_summary(&self, source: &str, kind: &str) {
        info!(
            source = source,
            kind = kind,
            fetched = self.rows.len(),
            failed = self.failed.len(),
            "Series fetched"
        );
    }
}

/// Fetches the raw strategy series for one strategy.
pub struct StrategySeriesFetcher {
    reader: Arc<dyn ChainReader>,
}

impl StrategySeriesFetcher {
    pub fn new(reader: Arc<dyn ChainReader>) -> Self {
        Self { reader }
    }

    #[instrument(skip(self, strategy, checkpoints), fields(strategy = %strategy.id, checkpoints = checkpoints.len()))]
    pub async fn fetch(
        &self,
        strategy: &Strategy,
        checkpoints: &[u64],
    ) -> FetchOutcome<StrategyRawRecord> {
        let mut outcome = FetchOutcome::default();
        for &block in checkpoints {
            let result = self
                .reader
                .strategy_snapshot(strategy.strategy, strategy.oracle, block)
                .await;
            outcome.record(block, result, &strategy.id);
        }
        outcome.log_summary(&strategy.id, "strategy");
        outcome
    }
}

/// Fetches the collateral share-price series for one strategy's collateral.
pub struct CollateralSeriesFetcher {
    reader: Arc<dyn ChainReader>,
}

impl CollateralSeriesFetcher {
    pub fn new(reader: Arc<dyn ChainReader>) -> Self {
        Self { reader }
    }

    #[instrument(skip(self, strategy, checkpoints), fields(strategy = %strategy.id, checkpoints = checkpoints.len()))]
    pub async fn fetch(
        &self,
        strategy: &Strategy,
        checkpoints: &[u64],
    ) -> FetchOutcome<CollateralRawRecord> {
        let mut outcome = FetchOutcome::default();
        for &block in checkpoints {
            let result = self.reader.share_price(strategy.collateral, block).await;
            outcome.record(block, result, &strategy.id);
        }
        outcome.log_summary(&strategy.id, "collateral");
        outcome
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy::primitives::Address;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use silo_chain::UserStrategyBalance;
    use std::collections::{HashMap, HashSet};

    /// In-memory chain with per-block failures.
    #[derive(Default)]
    pub(crate) struct FakeChain {
        pub head: u64,
        /// (strategy address, block) pairs whose snapshot read fails
        pub failing_strategy_blocks: HashSet<(Address, u64)>,
        pub failing_pps_blocks: HashSet<(Address, u64)>,
        pub price_low: HashMap<Address, f64>,
        pub positions: HashMap<Address, Vec<UserStrategyBalance>>,
        pub calls: Mutex<Vec<u64>>,
    }

    pub(crate) fn raw_strategy(block: u64) -> StrategyRawRecord {
        StrategyRawRecord {
            block,
            collateral: Address::ZERO,
            collateral_symbol: "stETH".to_string(),
            pair_rate_per_sec: 1_000_000_000,
            full_utilization_rate: 5_000_000_000,
            low_exchange_rate: 1.0 + block as f64 / 1e6,
            high_exchange_rate: 1.01,
            max_ltv: 80.0,
            total_asset: 1_000.0,
            total_collateral: 900.0,
            total_borrow: 500.0,
            rate_per_sec: 3_170_979_198,
            fee_to_protocol_rate: 10_000,
        }
    }

    fn unavailable() -> ChainReadError {
        ChainReadError::InvalidAddress("unavailable".to_string())
    }

    #[async_trait]
    impl ChainReader for FakeChain {
        async fn head_block(&self) -> Result<u64, ChainReadError> {
            Ok(self.head)
        }

        async fn strategy_snapshot(
            &self,
            strategy: Address,
            _oracle: Address,
            block: u64,
        ) -> Result<StrategyRawRecord, ChainReadError> {
            self.calls.lock().push(block);
            if self.failing_strategy_blocks.contains(&(strategy, block)) {
                return Err(unavailable());
            }
            Ok(raw_strategy(block))
        }

        async fn share_price(
            &self,
            collateral: Address,
            block: u64,
        ) -> Result<CollateralRawRecord, ChainReadError> {
            if self.failing_pps_blocks.contains(&(collateral, block)) {
                return Err(unavailable());
            }
            Ok(CollateralRawRecord {
                block,
                share_price: 1.0 + block as f64 / 1e7,
            })
        }

        async fn oracle_price_low(
            &self,
            oracle: Address,
            _block: Option<u64>,
        ) -> Result<f64, ChainReadError> {
            self.price_low.get(&oracle).copied().ok_or_else(unavailable)
        }

        async fn user_positions(
            &self,
            user: Address,
        ) -> Result<Vec<UserStrategyBalance>, ChainReadError> {
            self.positions.get(&user).cloned().ok_or_else(unavailable)
        }
    }

    pub(crate) fn strategy(id: &str, byte: u8) -> Strategy {
        Strategy {
            id: id.to_string(),
            display_name: format!("Strategy {id}"),
            strategy: Address::repeat_byte(byte),
            oracle: Address::repeat_byte(byte + 1),
            collateral: Address::repeat_byte(byte + 2),
        }
    }

    #[tokio::test]
    async fn test_strategy_fetch_drops_failed_checkpoints() {
        let a = strategy("A", 0x10);
        let mut chain = FakeChain::default();
        chain.failing_strategy_blocks.insert((a.strategy, 200));

        let chain = Arc::new(chain);
        let fetcher = StrategySeriesFetcher::new(chain.clone());
        let outcome = fetcher.fetch(&a, &[100, 200, 300]).await;

        let blocks: Vec<u64> = outcome.rows.iter().map(|r| r.block).collect();
        assert_eq!(blocks, vec![100, 300]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].block, 200);

        // Sequential, in schedule order, no retry
        assert_eq!(*chain.calls.lock(), vec![100, 200, 300]);
    }

    #[tokio::test]
    async fn test_collateral_fetch_drops_failed_checkpoints() {
        let a = strategy("A", 0x10);
        let mut chain = FakeChain::default();
        chain.failing_pps_blocks.insert((a.collateral, 100));

        let fetcher = CollateralSeriesFetcher::new(Arc::new(chain));
        let outcome = fetcher.fetch(&a, &[100, 200]).await;

        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].block, 200);
        assert_eq!(outcome.failed[0].block, 100);
    }

    #[tokio::test]
    async fn test_empty_schedule() {
        let fetcher = StrategySeriesFetcher::new(Arc::new(FakeChain::default()));
        let outcome = fetcher.fetch(&strategy("A", 0x10), &[]).await;
        assert!(outcome.rows.is_empty());
        assert!(outcome.failed.is_empty());
    }
}

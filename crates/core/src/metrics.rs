//! Rate and risk metric derivation.
//!
//! Collateral yield comes from the share-price series: the price `lag_rows`
//! checkpoints earlier gives a windowed return, which is annualized (APY) and
//! then converted to a compounding-equivalent APR. The master table joins
//! those yields onto the strategy series.
//!
//! Nothing here clamps: a zero or missing denominator yields a non-finite
//! value, and consumers filter before display.

use serde::Serialize;
use std::collections::HashMap;

use crate::config::MetricsConfig;
use crate::table::{PpsTable, StrategyTable};

/// Seconds per 365-day year.
pub const SECONDS_PER_YEAR: f64 = 31_536_000.0;
/// Days per Gregorian year.
pub const DAYS_PER_YEAR: f64 = 365.2425;
/// Fixed-point scale of the per-second rate.
pub const RATE_PRECISION: f64 = 1e18;
/// Fee rate of 100%.
pub const FEE_PRECISION: f64 = 100_000.0;

/// The value `lag` positions earlier, or `None` for the first `lag` entries.
pub fn lagged(values: &[f64], lag: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| i.checked_sub(lag).map(|j| values[j]))
        .collect()
}

/// Annualized yield of moving from `lagged` to `current` over `window_days`.
pub fn apy(current: f64, lagged: Option<f64>, window_days: f64) -> f64 {
    let Some(lagged) = lagged else {
        return f64::NAN;
    };
    (1.0 + (current - lagged) / lagged).powf(DAYS_PER_YEAR / window_days) - 1.0
}

/// APR with `compounding` periods per year equivalent to `apy`.
pub fn apr(apy: f64, compounding: f64) -> f64 {
    compounding * (apy + 1.0).powf(1.0 / compounding) - compounding
}

pub fn utilization(total_borrow: f64, total_asset: f64) -> f64 {
    total_borrow / total_asset
}

/// Annualized borrow rate from the raw per-second rate.
pub fn borrow_apy(rate_per_sec: u64) -> f64 {
    rate_per_sec as f64 * SECONDS_PER_YEAR / RATE_PRECISION
}

/// Lender yield after the protocol fee (raw, 1e5 = 100%).
pub fn supply_apy(borrow_apy: f64, fee_to_protocol_rate: u32, utilization: f64) -> f64 {
    borrow_apy * (1.0 - fee_to_protocol_rate as f64 / FEE_PRECISION) * utilization
}

/// Yield of one collateral at one checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollateralYield {
    pub share_price: f64,
    pub lagged_share_price: Option<f64>,
    pub apy: f64,
    pub apr: f64,
}

/// Yields for every collateral at one checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YieldRow {
    pub block: u64,
    pub yields: Vec<CollateralYield>,
}

/// Derived metrics for one strategy at one checkpoint.
///
/// Fields that depend on the collateral price are `None` when the checkpoint
/// has no share-price row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyMetrics {
    pub reserve_size: f64,
    pub current_borrow: f64,
    pub utilization: f64,
    pub collateral_apr: Option<f64>,
    pub borrow_apy: f64,
    pub supply_apy: f64,
    pub spread: Option<f64>,
    pub oracle_low: f64,
    pub oracle_high: f64,
    pub oracle_normalized: Option<f64>,
    #[serde(rename = "maxLTV")]
    pub max_ltv: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MasterRow {
    pub block: u64,
    /// One entry per strategy, in strategy order
    pub strategies: Vec<StrategyMetrics>,
}

/// Per-checkpoint metrics for all strategies.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterMetricsTable {
    pub strategy_ids: Vec<String>,
    pub rows: Vec<MasterRow>,
}

impl MasterMetricsTable {
    pub fn latest(&self) -> Option<&MasterRow> {
        self.rows.last()
    }
}

/// Derives collateral yields and the master metrics table.
#[derive(Debug, Clone)]
pub struct MetricsDeriver {
    lag_rows: usize,
    window_days: f64,
    compounding: f64,
}

impl MetricsDeriver {
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            lag_rows: config.lag_rows,
            window_days: config.apy_window_days,
            compounding: config.compounding_periods,
        }
    }

    /// Lag and rate transforms over each collateral column.
    ///
    /// The lag counts rows, so it assumes evenly spaced checkpoints.
    pub fn collateral_yields(&self, pps: &PpsTable) -> Vec<YieldRow> {
        let columns: Vec<Vec<CollateralYield>> = (0..pps.ids().len())
            .map(|i| {
                let prices: Vec<f64> = pps.rows().iter().map(|r| r.values[i].share_price).collect();
                let lagged = lagged(&prices, self.lag_rows);
                prices
                    .iter()
                    .zip(lagged)
                    .map(|(&share_price, lagged_share_price)| {
                        let apy = apy(share_price, lagged_share_price, self.window_days);
                        CollateralYield {
                            share_price,
                            lagged_share_price,
                            apy,
                            apr: apr(apy, self.compounding),
                        }
                    })
                    .collect()
            })
            .collect();

        pps.rows()
            .iter()
            .enumerate()
            .map(|(row, r)| YieldRow {
                block: r.block,
                yields: columns.iter().map(|column| column[row]).collect(),
            })
            .collect()
    }

    /// Left join of the strategy series onto collateral yields by block.
    ///
    /// Collateral yields are matched by strategy id, so the two tables may
    /// carry their groups in different orders.
    pub fn derive(&self, strategies: &StrategyTable, pps: &PpsTable) -> MasterMetricsTable {
        let yields = self.collateral_yields(pps);
        let by_block: HashMap<u64, &YieldRow> = yields.iter().map(|y| (y.block, y)).collect();
        let pps_index: Vec<Option<usize>> = strategies
            .ids()
            .iter()
            .map(|id| pps.ids().iter().position(|p| p == id))
            .collect();

        let rows = strategies
            .rows()
            .iter()
            .map(|row| {
                let yield_row = by_block.get(&row.block);
                let metrics = row
                    .values
                    .iter()
                    .zip(&pps_index)
                    .map(|(raw, index)| {
                        let collateral = yield_row
                            .zip(*index)
                            .and_then(|(y, i)| y.yields.get(i).copied());

                        let utilization = utilization(raw.total_borrow, raw.total_asset);
                        let borrow_apy = borrow_apy(raw.rate_per_sec);
                        let collateral_apr = collateral.map(|c| c.apr);

                        StrategyMetrics {
                            reserve_size: raw.total_asset,
                            current_borrow: raw.total_borrow,
                            utilization,
                            collateral_apr,
                            borrow_apy,
                            supply_apy: supply_apy(
                                borrow_apy,
                                raw.fee_to_protocol_rate,
                                utilization,
                            ),
                            spread: collateral_apr.map(|apr| apr - borrow_apy),
                            oracle_low: raw.low_exchange_rate,
                            oracle_high: raw.high_exchange_rate,
                            oracle_normalized: collateral
                                .map(|c| raw.low_exchange_rate * c.share_price),
                            max_ltv: raw.max_ltv,
                        }
                    })
                    .collect();

                MasterRow {
                    block: row.block,
                    strategies: metrics,
                }
            })
            .collect();

        MasterMetricsTable {
            strategy_ids: strategies.ids().to_vec(),
            rows,
        }
    }
}

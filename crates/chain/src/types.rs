//! Decoded records produced by the chain reader.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// One strategy snapshot at one checkpoint.
///
/// Amounts and oracle rates are already scaled to whole units. The two rate
/// fields stay raw: `rate_per_sec` is the 1e18 fixed-point per-second borrow
/// rate, `fee_to_protocol_rate` has 1e5 precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRawRecord {
    /// Checkpoint block
    pub block: u64,
    /// Collateral token address
    pub collateral: Address,
    /// Collateral token symbol
    pub collateral_symbol: String,
    /// Rate per second from the data provider snapshot (raw)
    pub pair_rate_per_sec: u64,
    /// Full utilization rate (raw)
    pub full_utilization_rate: u64,
    /// Oracle low exchange rate
    pub low_exchange_rate: f64,
    /// Oracle high exchange rate
    pub high_exchange_rate: f64,
    /// Maximum LTV in percent
    pub max_ltv: f64,
    /// Total supplied asset
    pub total_asset: f64,
    /// Total posted collateral
    pub total_collateral: f64,
    /// Total borrowed asset
    pub total_borrow: f64,
    /// Per-second interest rate after accruing pending interest (raw, 1e18)
    pub rate_per_sec: u64,
    /// Protocol fee rate (raw, 1e5 = 100%)
    pub fee_to_protocol_rate: u32,
}

/// Share price of a collateral vault at one checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollateralRawRecord {
    /// Checkpoint block
    pub block: u64,
    /// Price per share, scaled to whole units
    pub share_price: f64,
}

/// A user's balances in one strategy, scaled to whole units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserStrategyBalance {
    /// Strategy contract address
    pub strategy: Address,
    pub asset_balance: f64,
    pub borrow_balance: f64,
    pub collateral_balance: f64,
}

//! Fixed-point conversions for values read from the aggregator contracts.
//!
//! Every balance and exchange rate is an 18-decimal integer on-chain; the
//! monitor works in `f64` since all downstream metrics are ratios.

use alloy::primitives::U256;

/// WAD scale (1e18).
pub const WAD: f64 = 1e18;

/// Max-LTV precision on the pair contracts (1e3 = 100%).
pub const LTV_PRECISION: f64 = 1e3;

/// Convert a raw integer to `f64` without scaling.
///
/// Precision past 2^53 is lost.
#[inline]
pub fn u256_to_f64(value: U256) -> f64 {
    if value <= U256::from(u128::MAX) {
        let value: u128 = value.to();
        value as f64
    } else {
        // Most significant limb first
        const LIMB: f64 = u64::MAX as f64 + 1.0;
        value
            .as_limbs()
            .iter()
            .rev()
            .fold(0.0, |acc, &limb| acc * LIMB + limb as f64)
    }
}

/// Convert an 18-decimal fixed-point value to `f64`.
#[inline]
pub fn wad_to_f64(value: U256) -> f64 {
    u256_to_f64(value) / WAD
}

/// Convert an on-chain max LTV (1e3 precision) to a percentage.
#[inline]
pub fn max_ltv_to_pct(value: U256) -> f64 {
    u256_to_f64(value) / LTV_PRECISION
}

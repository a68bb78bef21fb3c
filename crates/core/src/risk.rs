//! Per-user risk: LTV and liquidation price for every strategy.

use alloy::primitives::Address;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::Strategy;
use silo_chain::{parse_address, ChainReader, UserStrategyBalance};

/// A user's balances, one entry per configured strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct UserPositionRecord {
    pub user: Address,
    pub balances: Vec<UserStrategyBalance>,
}

impl UserPositionRecord {
    /// Match `positions` to `strategies` by strategy address. A strategy the
    /// user has no entry for gets zero balances.
    pub fn align(user: Address, strategies: &[Strategy], positions: &[UserStrategyBalance]) -> Self {
        let balances = strategies
            .iter()
            .map(|s| {
                positions
                    .iter()
                    .find(|p| p.strategy == s.strategy)
                    .copied()
                    .unwrap_or(UserStrategyBalance {
                        strategy: s.strategy,
                        asset_balance: 0.0,
                        borrow_balance: 0.0,
                        collateral_balance: 0.0,
                    })
            })
            .collect();
        Self { user, balances }
    }
}

/// Strategy-level inputs to the risk formulas.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyRiskInputs {
    pub id: String,
    /// Maximum LTV in percent, from the latest strategy snapshot
    pub max_ltv: f64,
    /// Oracle low price at the head
    pub price_low: f64,
}

/// Risk of one user in one strategy.
///
/// `ltv` is non-finite when the collateral balance is zero, and
/// `liquidation_price` when the borrow balance is zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRiskRecord {
    pub user: Address,
    pub strategy_id: String,
    pub asset_balance: f64,
    pub borrow_balance: f64,
    pub collateral_balance: f64,
    pub ltv: f64,
    pub liquidation_price: f64,
    pub share_price: f64,
}

/// LTV and liquidation price for every strategy of one position.
///
/// `inputs` must be in the same strategy order as `position.balances`.
pub fn compute_risk(
    position: &UserPositionRecord,
    inputs: &[StrategyRiskInputs],
) -> Vec<UserRiskRecord> {
    position
        .balances
        .iter()
        .zip(inputs)
        .map(|(balance, input)| UserRiskRecord {
            user: position.user,
            strategy_id: input.id.clone(),
            asset_balance: balance.asset_balance,
            borrow_balance: balance.borrow_balance,
            collateral_balance: balance.collateral_balance,
            ltv: balance.borrow_balance * input.price_low / balance.collateral_balance,
            liquidation_price: (input.max_ltv / 100.0) * balance.collateral_balance
                / balance.borrow_balance,
            share_price: input.price_low,
        })
        .collect()
}

/// Rows of `strategy_id` with a finite LTV, highest LTV first.
pub fn rank_by_ltv(records: &[UserRiskRecord], strategy_id: &str) -> Vec<UserRiskRecord> {
    let mut ranked: Vec<UserRiskRecord> = records
        .iter()
        .filter(|r| r.strategy_id == strategy_id && r.ltv.is_finite())
        .cloned()
        .collect();
    ranked.sort_by(|a, b| b.ltv.total_cmp(&a.ltv));
    ranked
}

/// Risk records plus the users that could not be evaluated.
#[derive(Debug, Clone, Default)]
pub struct RiskOutcome {
    pub records: Vec<UserRiskRecord>,
    pub skipped_users: usize,
}

/// Reads user positions and head oracle prices, then applies [`compute_risk`].
pub struct UserRiskComputer {
    reader: Arc<dyn ChainReader>,
}

impl UserRiskComputer {
    pub fn new(reader: Arc<dyn ChainReader>) -> Self {
        Self { reader }
    }

    /// Head oracle prices for `strategies`. A failed read gives NaN, which
    /// makes that strategy's LTVs non-finite.
    async fn head_prices(&self, strategies: &[Strategy]) -> Vec<f64> {
        let mut prices = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            let price = match self.reader.oracle_price_low(strategy.oracle, None).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(strategy = %strategy.id, error = %e, "Oracle price unavailable");
                    f64::NAN
                }
            };
            prices.push(price);
        }
        prices
    }

    /// Evaluate every address against `strategies`.
    ///
    /// `max_ltv` holds one value per strategy, from the latest snapshot.
    /// Addresses that do not parse or whose position read fails are skipped.
    #[instrument(skip_all, fields(users = addresses.len(), strategies = strategies.len()))]
    pub async fn compute(
        &self,
        addresses: &[String],
        strategies: &[Strategy],
        max_ltv: &[f64],
    ) -> RiskOutcome {
        let prices = self.head_prices(strategies).await;
        let inputs: Vec<StrategyRiskInputs> = strategies
            .iter()
            .zip(max_ltv)
            .zip(&prices)
            .map(|((s, &max_ltv), &price_low)| StrategyRiskInputs {
                id: s.id.clone(),
                max_ltv,
                price_low,
            })
            .collect();

        let mut outcome = RiskOutcome::default();
        for address in addresses {
            let user = match parse_address(address) {
                Ok(user) => user,
                Err(e) => {
                    debug!(address = %address, error = %e, "Skipping address");
                    outcome.skipped_users += 1;
                    continue;
                }
            };

            match self.reader.user_positions(user).await {
                Ok(positions) => {
                    let position = UserPositionRecord::align(user, strategies, &positions);
                    outcome.records.extend(compute_risk(&position, &inputs));
                }
                Err(e) => {
                    debug!(user = %user, error = %e, "Position read failed");
                    outcome.skipped_users += 1;
                }
            }
        }

        if outcome.skipped_users > 0 {
            warn!(skipped = outcome.skipped_users, "Some users were not evaluated");
        }
        info!(records = outcome.records.len(), "User risk computed");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::{strategy, FakeChain};

    fn balance(strategy: Address, borrow: f64, collateral: f64) -> UserStrategyBalance {
        UserStrategyBalance {
            strategy,
            asset_balance: 0.0,
            borrow_balance: borrow,
            collateral_balance: collateral,
        }
    }

    fn inputs(id: &str, max_ltv: f64, price_low: f64) -> StrategyRiskInputs {
        StrategyRiskInputs {
            id: id.to_string(),
            max_ltv,
            price_low,
        }
    }

    #[test]
    fn test_ltv_and_liquidation_price() {
        let position = UserPositionRecord {
            user: Address::repeat_byte(0xaa),
            balances: vec![balance(Address::ZERO, 50.0, 100.0)],
        };

        let records = compute_risk(&position, &[inputs("A", 80.0, 1.0)]);

        assert_eq!(records.len(), 1);
        assert!((records[0].ltv - 0.5).abs() < 1e-12);
        assert!((records[0].liquidation_price - 1.6).abs() < 1e-12);
        assert_eq!(records[0].share_price, 1.0);
    }

    #[test]
    fn test_degenerate_balances_are_non_finite() {
        let position = UserPositionRecord {
            user: Address::repeat_byte(0xaa),
            balances: vec![
                balance(Address::ZERO, 50.0, 0.0),
                balance(Address::ZERO, 0.0, 100.0),
            ],
        };

        let records = compute_risk(&position, &[inputs("A", 80.0, 1.0), inputs("B", 80.0, 1.0)]);

        assert!(!records[0].ltv.is_finite());
        assert_eq!(records[1].ltv, 0.0);
        assert!(!records[1].liquidation_price.is_finite());
    }

    #[test]
    fn test_rank_by_ltv() {
        let make = |byte: u8, id: &str, ltv: f64| UserRiskRecord {
            user: Address::repeat_byte(byte),
            strategy_id: id.to_string(),
            asset_balance: 0.0,
            borrow_balance: 0.0,
            collateral_balance: 0.0,
            ltv,
            liquidation_price: 0.0,
            share_price: 1.0,
        };
        let records = vec![
            make(1, "A", 0.3),
            make(2, "A", f64::NAN),
            make(3, "A", 0.7),
            make(4, "B", 0.9),
            make(5, "A", f64::INFINITY),
        ];

        let ranked = rank_by_ltv(&records, "A");
        let ltvs: Vec<f64> = ranked.iter().map(|r| r.ltv).collect();
        assert_eq!(ltvs, vec![0.7, 0.3]);
    }

    #[test]
    fn test_align_by_strategy_address() {
        let a = strategy("A", 0x10);
        let b = strategy("B", 0x20);
        let user = Address::repeat_byte(0xaa);

        // Reported in reverse order, A missing
        let positions = vec![balance(b.strategy, 5.0, 10.0)];
        let aligned = UserPositionRecord::align(user, &[a.clone(), b.clone()], &positions);

        assert_eq!(aligned.balances[0].strategy, a.strategy);
        assert_eq!(aligned.balances[0].collateral_balance, 0.0);
        assert_eq!(aligned.balances[1].borrow_balance, 5.0);
    }

    #[tokio::test]
    async fn test_computer_skips_bad_users() {
        let a = strategy("A", 0x10);
        let good = Address::repeat_byte(0xaa);

        let mut chain = FakeChain::default();
        chain.price_low.insert(a.oracle, 2.0);
        chain
            .positions
            .insert(good, vec![balance(a.strategy, 40.0, 100.0)]);

        let computer = UserRiskComputer::new(Arc::new(chain));
        let addresses = vec![
            good.to_string(),
            "not-an-address".to_string(),
            // Valid but unknown to the chain, so the read fails
            Address::repeat_byte(0xbb).to_string(),
        ];

        let outcome = computer.compute(&addresses, &[a], &[80.0]).await;

        assert_eq!(outcome.skipped_users, 2);
        assert_eq!(outcome.records.len(), 1);
        assert!((outcome.records[0].ltv - 0.8).abs() < 1e-12);
        assert!((outcome.records[0].liquidation_price - 2.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_missing_oracle_price_makes_ltv_non_finite() {
        let a = strategy("A", 0x10);
        let user = Address::repeat_byte(0xaa);

        let mut chain = FakeChain::default();
        chain
            .positions
            .insert(user, vec![balance(a.strategy, 40.0, 100.0)]);

        let computer = UserRiskComputer::new(Arc::new(chain));
        let outcome = computer.compute(&[user.to_string()], &[a], &[80.0]).await;

        assert!(outcome.records[0].ltv.is_nan());
        assert!(rank_by_ltv(&outcome.records, "A").is_empty());
    }
}

//! Dashboard snapshot handed to the rendering layer.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::config::Strategy;
use crate::metrics::MasterMetricsTable;
use crate::pipeline::RunOutput;
use crate::risk::{rank_by_ltv, UserRiskRecord};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyInfo {
    pub id: String,
    pub display_name: String,
}

/// Ranked user risk for one strategy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRiskTable {
    pub strategy_id: String,
    pub users: Vec<UserRiskRecord>,
}

/// Everything the dashboard renders, as one JSON document.
///
/// Non-finite numbers serialize as `null`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub latest_block: Option<u64>,
    pub latest_address_block: Option<u64>,
    pub discovery_ran: bool,
    pub strategies: Vec<StrategyInfo>,
    pub master: MasterMetricsTable,
    pub risk: Vec<StrategyRiskTable>,
}

impl DashboardSnapshot {
    pub fn build(strategies: &[Strategy], output: &RunOutput) -> Self {
        Self {
            generated_at: Utc::now(),
            latest_block: output.report.latest_block,
            latest_address_block: output.report.latest_address_block,
            discovery_ran: output.report.discovery_ran,
            strategies: strategies
                .iter()
                .map(|s| StrategyInfo {
                    id: s.id.clone(),
                    display_name: s.display_name.clone(),
                })
                .collect(),
            master: output.master.clone(),
            risk: strategies
                .iter()
                .map(|s| StrategyRiskTable {
                    strategy_id: s.id.clone(),
                    users: rank_by_ltv(&output.risk, &s.id),
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the snapshot to `path`, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write snapshot {:?}", path))?;
        info!(
            path = ?path,
            rows = self.master.rows.len(),
            "Dashboard snapshot written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::strategy;
    use crate::metrics::{MasterRow, StrategyMetrics};
    use crate::pipeline::RunReport;
    use alloy::primitives::Address;

    fn output() -> RunOutput {
        let metrics = StrategyMetrics {
            reserve_size: 0.0,
            current_borrow: 0.0,
            utilization: f64::NAN,
            collateral_apr: None,
            borrow_apy: 0.05,
            supply_apy: f64::NAN,
            spread: None,
            oracle_low: 1.0,
            oracle_high: 1.01,
            oracle_normalized: None,
            max_ltv: 80.0,
        };
        let risk = |byte: u8, ltv: f64| UserRiskRecord {
            user: Address::repeat_byte(byte),
            strategy_id: "A".to_string(),
            asset_balance: 0.0,
            borrow_balance: 1.0,
            collateral_balance: 1.0,
            ltv,
            liquidation_price: 0.8,
            share_price: 1.0,
        };

        RunOutput {
            report: RunReport {
                latest_block: Some(100),
                discovery_ran: true,
                ..RunReport::default()
            },
            master: MasterMetricsTable {
                strategy_ids: vec!["A".to_string()],
                rows: vec![MasterRow {
                    block: 100,
                    strategies: vec![metrics],
                }],
            },
            risk: vec![risk(1, 0.2), risk(2, f64::NAN), risk(3, 0.6)],
        }
    }

    #[test]
    fn test_snapshot_ranks_and_filters_risk() {
        let snapshot = DashboardSnapshot::build(&[strategy("A", 0x10)], &output());

        assert_eq!(snapshot.risk.len(), 1);
        let ltvs: Vec<f64> = snapshot.risk[0].users.iter().map(|u| u.ltv).collect();
        assert_eq!(ltvs, vec![0.6, 0.2]);
        assert_eq!(snapshot.strategies[0].display_name, "Strategy A");
    }

    #[test]
    fn test_non_finite_serializes_as_null() {
        let snapshot = DashboardSnapshot::build(&[strategy("A", 0x10)], &output());
        let json: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();

        let row = &json["master"]["rows"][0]["strategies"][0];
        assert!(row["utilization"].is_null());
        assert!(row["collateralApr"].is_null());
        assert_eq!(row["borrowApy"], 0.05);
        assert_eq!(row["maxLTV"], 80.0);

        assert_eq!(json["latestBlock"], 100);
        assert_eq!(json["discoveryRan"], true);
        assert!(json["latestAddressBlock"].is_null());
    }

    #[test]
    fn test_write_creates_directories() {
        let dir = std::env::temp_dir().join(format!("silo-snapshot-{}", std::process::id()));
        let path = dir.join("nested").join("dashboard.json");

        let snapshot = DashboardSnapshot::build(&[strategy("A", 0x10)], &output());
        snapshot.write(&path).unwrap();
        assert!(path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}

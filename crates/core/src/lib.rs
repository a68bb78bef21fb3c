//! Silo monitor core logic.
//!
//! This crate provides the metrics accumulation pipeline:
//! - Checkpoint scheduling on a fixed block grid
//! - Best-effort per-strategy series fetching
//! - Inner-join merging of per-strategy series on block
//! - Persisted block-indexed tables behind a named table store
//! - Collateral yield (APY/APR) and master metrics derivation
//! - Per-user LTV and liquidation price
//! - The run pipeline and the dashboard snapshot
//!
//! Chain access lives in `silo-chain`, address discovery in `silo-api`.

pub mod config;
mod fetch;
mod merge;
mod metrics;
mod pipeline;
mod risk;
mod schedule;
mod snapshot;
mod store;
mod table;

pub use config::{MonitorConfig, ResolvedConfig, Secrets, Strategy};
pub use fetch::{CollateralSeriesFetcher, FailedCheckpoint, FetchOutcome, StrategySeriesFetcher};
pub use merge::{merge_series, Checkpointed, MergedRow};
pub use metrics::{
    apr, apy, borrow_apy, lagged, supply_apy, utilization, CollateralYield, MasterMetricsTable,
    MasterRow, MetricsDeriver, StrategyMetrics, YieldRow,
};
pub use pipeline::{Pipeline, RunOutput, RunReport, SeriesFailure, SeriesKind};
pub use risk::{
    compute_risk, rank_by_ltv, RiskOutcome, StrategyRiskInputs, UserPositionRecord,
    UserRiskComputer, UserRiskRecord,
};
pub use schedule::{closest_lower_aligned, needs_refresh, schedule, ALIGNMENT_STRIDE};
pub use snapshot::{DashboardSnapshot, StrategyInfo, StrategyRiskTable};
pub use store::{CsvTableStore, MemoryTableStore, RawTable, StoreError, TableStore};
pub use table::{AddressLog, ColumnGroup, PpsTable, StrategyTable, WideTable};

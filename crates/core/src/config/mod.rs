//! Configuration for the silo monitor.
//!
//! This module provides:
//! - Strategy, schedule, metrics, discovery and storage settings (TOML)
//! - Validation and address resolution into [`ResolvedConfig`]
//! - Required API secrets and `${VAR}` expansion

mod monitor;
mod secrets;

pub use monitor::{
    DiscoveryConfig, MetricsConfig, MonitorConfig, ResolvedConfig, ScheduleConfig, StorageConfig,
    Strategy, StrategyConfig,
};
pub use secrets::{env, expand_env, Secrets};

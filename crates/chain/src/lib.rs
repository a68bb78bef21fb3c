//! Silo chain interaction layer.
//!
//! This crate provides:
//! - Contract bindings for the aggregator data provider, lending pairs,
//!   dual oracles and collateral share vaults
//! - The [`ChainReader`] trait: block-pinned reads decoded into typed records
//! - An HTTP JSON-RPC implementation ([`RpcChainReader`])
//! - Fixed-point unit conversion helpers

pub mod bindings;
mod error;
mod reader;
mod types;
pub mod units;

pub use error::ChainReadError;
pub use reader::{parse_address, ChainReader, RpcChainReader};
pub use types::{CollateralRawRecord, StrategyRawRecord, UserStrategyBalance};

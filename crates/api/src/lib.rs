//! Silo API clients for external services.
//!
//! This crate provides:
//! - Dune: saved-query execution used for borrower address discovery
//! - Bounded polling of query executions with cancellation

mod discovery;
mod dune;
mod error;

pub use discovery::{discover_addresses, AddressSource, PollPolicy, QueryAddressSource, QueryApi};
pub use dune::{DuneClient, ExecutionResults, ExecutionState, ResultSet};
pub use error::DiscoveryError;

use std::time::Duration;

use thiserror::Error;

use crate::dune::ExecutionState;

/// Address discovery failures.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("query did not complete within {waited:?}")]
    Timeout { waited: Duration },

    #[error("discovery cancelled")]
    Cancelled,

    #[error("query execution ended in state {state:?}")]
    QueryFailed { state: ExecutionState },

    #[error("execution {0} completed without a result set")]
    MissingResult(String),
}

use thiserror::Error;

/// Errors from a single contract read.
///
/// Callers of the series fetchers treat every variant the same way (drop the
/// checkpoint), but keep the variant for logging.
#[derive(Error, Debug)]
pub enum ChainReadError {
    #[error("rpc transport error: {0}")]
    Transport(#[from] alloy::transports::TransportError),

    #[error("contract call failed: {0}")]
    Contract(#[from] alloy::contract::Error),

    #[error("invalid address '{0}'")]
    InvalidAddress(String),
}

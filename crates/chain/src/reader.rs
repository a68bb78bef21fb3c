//! Chain reader: block-pinned contract reads for the aggregator.
//! Uses Alloy providers for type-safe RPC interactions.

use alloy::eips::BlockId;
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::transports::http::reqwest::Url;
use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::bindings::{IAggregatorDataProvider, IDualOracle, IShareVault, ISiloPair};
use crate::error::ChainReadError;
use crate::types::{CollateralRawRecord, StrategyRawRecord, UserStrategyBalance};
use crate::units::{max_ltv_to_pct, wad_to_f64};

/// Read access to the chain, keyed by contract address and block.
///
/// Every method is a single logical read; a failure means the value is
/// unavailable at that block and nothing else.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current chain head.
    async fn head_block(&self) -> Result<u64, ChainReadError>;

    /// Full strategy snapshot (data provider + oracle + pair) at `block`.
    async fn strategy_snapshot(
        &self,
        strategy: Address,
        oracle: Address,
        block: u64,
    ) -> Result<StrategyRawRecord, ChainReadError>;

    /// Collateral vault share price at `block`.
    async fn share_price(
        &self,
        collateral: Address,
        block: u64,
    ) -> Result<CollateralRawRecord, ChainReadError>;

    /// Oracle low price, at `block` or at the head when `None`.
    async fn oracle_price_low(
        &self,
        oracle: Address,
        block: Option<u64>,
    ) -> Result<f64, ChainReadError>;

    /// Per-strategy balances of `user` at the head.
    async fn user_positions(&self, user: Address)
        -> Result<Vec<UserStrategyBalance>, ChainReadError>;
}

/// [`ChainReader`] over an HTTP JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcChainReader {
    /// RPC endpoint (archive access needed for historical blocks)
    rpc_url: Url,
    /// Aggregator data provider contract
    data_provider: Address,
}

impl RpcChainReader {
    /// Create a reader for `rpc_url`.
    pub fn new(rpc_url: &str, data_provider: Address) -> Result<Self> {
        let rpc_url: Url = rpc_url.parse()?;

        info!(
            host = rpc_url.host_str().unwrap_or_default(),
            data_provider = %data_provider,
            "Initializing chain reader"
        );

        Ok(Self {
            rpc_url,
            data_provider,
        })
    }

    /// Data provider address.
    pub fn data_provider(&self) -> Address {
        self.data_provider
    }

    fn provider(&self) -> impl Provider {
        ProviderBuilder::new().on_http(self.rpc_url.clone())
    }

    /// Check that the endpoint answers.
    pub async fn health_check(&self) -> Result<u64, ChainReadError> {
        let block = self.head_block().await?;
        debug!(block = block, "Chain reader health check passed");
        Ok(block)
    }
}

fn block_id(block: Option<u64>) -> BlockId {
    block.map(BlockId::number).unwrap_or_else(BlockId::latest)
}

async fn read_price_low<P: Provider>(
    provider: &P,
    oracle: Address,
    at: BlockId,
) -> Result<f64, ChainReadError> {
    let contract = IDualOracle::new(oracle, provider);
    let prices = contract.getPrices().block(at).call().await?;
    Ok(wad_to_f64(prices._priceLow))
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn head_block(&self) -> Result<u64, ChainReadError> {
        let block = self.provider().get_block_number().await?;
        Ok(block)
    }

    #[instrument(skip(self), level = "debug")]
    async fn strategy_snapshot(
        &self,
        strategy: Address,
        oracle: Address,
        block: u64,
    ) -> Result<StrategyRawRecord, ChainReadError> {
        let provider = self.provider();
        let at = BlockId::number(block);

        let data_provider = IAggregatorDataProvider::new(self.data_provider, &provider);
        let strategy_data = data_provider.getStrategy(strategy).block(at).call().await?._0;
        let pair_data = strategy_data.pairData;

        let low_exchange_rate = read_price_low(&provider, oracle, at).await?;

        // Accrued rate and fee live on the pair itself
        let pair = ISiloPair::new(strategy_data.pair, &provider);
        let preview = pair.previewAddInterest().block(at).call().await?;
        let rate_info = pair.currentRateInfo().block(at).call().await?;

        Ok(StrategyRawRecord {
            block,
            collateral: pair_data.collateral,
            collateral_symbol: pair_data.collateralSymbol,
            pair_rate_per_sec: pair_data.ratePerSec,
            full_utilization_rate: pair_data.fullUtilizationRate,
            low_exchange_rate,
            high_exchange_rate: wad_to_f64(pair_data.highExchangeRate),
            max_ltv: max_ltv_to_pct(pair_data.maxLTV),
            total_asset: wad_to_f64(pair_data.totalAsset),
            total_collateral: wad_to_f64(pair_data.totalCollateral),
            total_borrow: wad_to_f64(pair_data.totalBorrow),
            rate_per_sec: preview._newCurrentRateInfo.ratePerSec,
            fee_to_protocol_rate: rate_info.feeToProtocolRate,
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn share_price(
        &self,
        collateral: Address,
        block: u64,
    ) -> Result<CollateralRawRecord, ChainReadError> {
        let provider = self.provider();
        let vault = IShareVault::new(collateral, &provider);
        let pps = vault
            .pricePerShare()
            .block(BlockId::number(block))
            .call()
            .await?
            ._0;

        Ok(CollateralRawRecord {
            block,
            share_price: wad_to_f64(pps),
        })
    }

    async fn oracle_price_low(
        &self,
        oracle: Address,
        block: Option<u64>,
    ) -> Result<f64, ChainReadError> {
        let provider = self.provider();
        read_price_low(&provider, oracle, block_id(block)).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn user_positions(
        &self,
        user: Address,
    ) -> Result<Vec<UserStrategyBalance>, ChainReadError> {
        let provider = self.provider();
        let data_provider = IAggregatorDataProvider::new(self.data_provider, &provider);
        let data = data_provider.getUserPositions(user).call().await?._0;

        Ok(data
            .userStrategyData
            .into_iter()
            .map(|entry| UserStrategyBalance {
                strategy: entry.strategy,
                asset_balance: wad_to_f64(entry.assetBalance),
                borrow_balance: wad_to_f64(entry.borrowBalance),
                collateral_balance: wad_to_f64(entry.collateralBalance),
            })
            .collect())
    }
}

/// Parse a hex address string (checksummed or not).
pub fn parse_address(value: &str) -> Result<Address, ChainReadError> {
    value
        .trim()
        .parse()
        .map_err(|_| ChainReadError::InvalidAddress(value.to_string()))
}

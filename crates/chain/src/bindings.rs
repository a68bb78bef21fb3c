//! Contract bindings for the silo aggregator.
//!
//! Only the view functions the monitor reads are declared. Struct layouts
//! follow the deployed ABIs field by field since decoding is positional.
//!
//! # Usage
//!
//! ```rust,ignore
//! use silo_chain::bindings::IAggregatorDataProvider;
//!
//! let provider = IAggregatorDataProvider::new(address, &rpc);
//! let data = provider.getStrategy(strategy).block(BlockId::number(block)).call().await?;
//! ```

use alloy::sol;

// ============================================================================
// Aggregator data provider
// ============================================================================

sol! {
    /// Per-pair market data exposed by the data provider.
    #[derive(Debug)]
    struct StrategyPairData {
        address asset;
        string assetSymbol;
        uint256 assetDecimals;
        address collateral;
        string collateralSymbol;
        uint256 collateralDecimals;
        address rateContract;
        address oracle;
        uint256 depositLimit;
        uint64 ratePerSec;
        uint64 fullUtilizationRate;
        uint32 feeToProtocolRate;
        uint32 maxOracleDeviation;
        uint256 lowExchangeRate;
        uint256 highExchangeRate;
        uint256 maxLTV;
        uint256 protocolLiquidationFee;
        uint256 totalAsset;
        uint256 totalCollateral;
        uint256 totalBorrow;
        uint256 version;
    }

    #[derive(Debug)]
    struct StrategyData {
        address deployedAt;
        address pair;
        StrategyPairData pairData;
    }

    #[derive(Debug)]
    struct UserVaultData {
        address vault;
        uint256 balance;
    }

    #[derive(Debug)]
    struct UserStrategyData {
        address strategy;
        uint256 assetBalance;
        uint256 borrowBalance;
        uint256 collateralBalance;
    }

    #[derive(Debug)]
    struct AggregatedUserData {
        UserVaultData[] userVaultData;
        UserStrategyData[] userStrategyData;
    }

    #[sol(rpc)]
    interface IAggregatorDataProvider {
        function getStrategy(address _strategy) external view returns (StrategyData memory);

        function getUserPositions(address user) external view returns (AggregatedUserData memory);
    }
}

// ============================================================================
// Lending pair
// ============================================================================

sol! {
    #[derive(Debug)]
    struct CurrentRateInfo {
        uint32 lastBlock;
        uint32 feeToProtocolRate;
        uint64 lastTimestamp;
        uint64 ratePerSec;
        uint64 fullUtilizationRate;
    }

    #[derive(Debug)]
    struct VaultAccount {
        uint128 amount;
        uint128 shares;
    }

    #[sol(rpc)]
    interface ISiloPair {
        function previewAddInterest() external view returns (
            uint256 _interestEarned,
            uint256 _feesAmount,
            uint256 _feesShare,
            CurrentRateInfo memory _newCurrentRateInfo,
            VaultAccount memory _totalAsset,
            VaultAccount memory _totalBorrow
        );

        function currentRateInfo() external view returns (
            uint32 lastBlock,
            uint32 feeToProtocolRate,
            uint64 lastTimestamp,
            uint64 ratePerSec,
            uint64 fullUtilizationRate
        );
    }
}

// ============================================================================
// Oracle and collateral vault
// ============================================================================

sol! {
    #[sol(rpc)]
    interface IDualOracle {
        function getPrices() external view returns (
            bool _isBadData,
            uint256 _priceLow,
            uint256 _priceHigh
        );
    }

    #[sol(rpc)]
    interface IShareVault {
        function pricePerShare() external view returns (uint256);
    }
}

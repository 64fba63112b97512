//! ERC-20 metadata and balance reads.

use crate::cache::TtlCache;
use crate::chain::RpcClient;
use crate::error::{Error, Result};
use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

alloy::sol! {
    /// ERC-20 subset plus the EIP-712 domain version exposed by USDC.
    interface IFungibleAsset {
        function name() external view returns (string name);
        function version() external view returns (string version);
        function decimals() external view returns (uint8 decimals);
        function balanceOf(address account) external view returns (uint256 balance);
    }
}

/// Largest scale a [`Decimal`] can carry.
const MAX_DECIMALS: u8 = 28;

/// Validated asset metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMetadata {
    /// Contract address.
    pub address: Address,
    /// Display name (EIP-712 domain name).
    pub name: String,
    /// EIP-712 domain version, if the contract exposes one.
    pub version: Option<String>,
    /// Decimal places of the smallest unit.
    pub decimals: u8,
}

impl AssetMetadata {
    /// Validate raw contract reads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] for an empty name or unsupported decimals.
    pub fn from_reads(
        address: Address,
        name: String,
        version: Option<String>,
        decimals: u8,
    ) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(Error::Rpc(format!("Asset {address} has an empty name")));
        }
        if decimals > MAX_DECIMALS {
            return Err(Error::Rpc(format!(
                "Asset {address} has unsupported decimals {decimals}"
            )));
        }
        Ok(Self {
            address,
            name,
            version,
            decimals,
        })
    }

    /// Convert an amount in smallest units to human units.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the amount does not fit a [`Decimal`].
    pub fn to_human(&self, amount: U256) -> Result<Decimal> {
        let raw = i128::try_from(amount)
            .map_err(|_| Error::Validation(format!("Amount {amount} too large")))?;
        Decimal::try_from_i128_with_scale(raw, u32::from(self.decimals))
            .map(|d| d.normalize())
            .map_err(|e| Error::Validation(format!("Amount {amount} too large: {e}")))
    }
}

/// Cached reads of one fungible asset contract.
#[derive(Debug, Clone)]
pub struct AssetReader {
    rpc: RpcClient,
    address: Address,
    metadata: TtlCache<Address, AssetMetadata>,
    balances: TtlCache<Address, U256>,
}

impl AssetReader {
    /// Create a reader caching metadata for `metadata_ttl` and balances for
    /// `balance_ttl`.
    #[must_use]
    pub fn new(
        rpc: RpcClient,
        address: Address,
        metadata_ttl: Duration,
        balance_ttl: Duration,
    ) -> Self {
        Self {
            rpc,
            address,
            metadata: TtlCache::new("asset-metadata", metadata_ttl),
            balances: TtlCache::new("asset-balance", balance_ttl),
        }
    }

    /// Contract address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Balance cache, for sweeping.
    #[must_use]
    pub fn balance_cache(&self) -> &TtlCache<Address, U256> {
        &self.balances
    }

    /// Name, version and decimals.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` or `decimals` cannot be read or validated.
    pub async fn metadata(&self) -> Result<AssetMetadata> {
        self.metadata
            .get_or_try_insert_with(self.address, || self.fetch_metadata())
            .await
    }

    /// Balance of `account` in smallest units.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn balance_of(&self, account: Address) -> Result<U256> {
        self.balances
            .get_or_try_insert_with(account, || async move {
                let ret = self
                    .rpc
                    .call(self.address, &IFungibleAsset::balanceOfCall { account })
                    .await?;
                Ok(ret.balance)
            })
            .await
    }

    async fn fetch_metadata(&self) -> Result<AssetMetadata> {
        let (name, decimals, version) = tokio::join!(
            self.rpc.call(self.address, &IFungibleAsset::nameCall {}),
            self.rpc.call(self.address, &IFungibleAsset::decimalsCall {}),
            self.rpc.call(self.address, &IFungibleAsset::versionCall {}),
        );

        let version = match version {
            Ok(ret) => Some(ret.version),
            Err(e) => {
                debug!("Asset {} has no version(): {e}", self.address);
                None
            }
        };

        AssetMetadata::from_reads(self.address, name?.name, version, decimals?.decimals)
    }
}

//! Peer discovery from an ERC-721 style agent registry.
//!
//! Ids are minted in increasing order and may later be burned. A discovery
//! walks the most recent `limit` ids downward and skips any id whose metadata
//! or owner can no longer be read, so the result may be shorter than `limit`.
//! Each call is an independent best-effort snapshot, not a consistent read.

use crate::cache::TtlCache;
use crate::chain::RpcClient;
use crate::error::{Error, Result};
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

alloy::sol! {
    /// Enumerable ERC-721 subset read by discovery.
    interface IAgentRegistry {
        function totalSupply() external view returns (uint256 supply);
        function tokenURI(uint256 tokenId) external view returns (string uri);
        function ownerOf(uint256 tokenId) external view returns (address owner);
    }
}

/// One registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Registry token id.
    pub id: u64,
    /// Agent metadata locator (`tokenURI`).
    pub metadata_uri: String,
    /// Current owner.
    pub owner: Address,
}

/// Outcome of reading one registry id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryReadResult {
    /// Both metadata and owner were read.
    Found(RegistryEntry),
    /// The id could not be read, usually because it was burned.
    Unreadable {
        /// Registry token id.
        id: u64,
        /// Why the read failed.
        reason: String,
    },
}

impl RegistryReadResult {
    /// The entry, if it was readable.
    #[must_use]
    pub fn into_entry(self) -> Option<RegistryEntry> {
        match self {
            Self::Found(entry) => Some(entry),
            Self::Unreadable { .. } => None,
        }
    }
}

/// Registry reads used by discovery.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Number of ids ever minted.
    async fn total_supply(&self) -> Result<u64>;

    /// Metadata locator for `id`.
    async fn token_uri(&self, id: u64) -> Result<String>;

    /// Owner of `id`.
    async fn owner_of(&self, id: u64) -> Result<Address>;
}

/// Registry contract read through JSON-RPC.
#[derive(Debug, Clone)]
pub struct OnChainRegistry {
    rpc: RpcClient,
    address: Address,
}

impl OnChainRegistry {
    /// Bind to the registry at `address`.
    #[must_use]
    pub fn new(rpc: RpcClient, address: Address) -> Self {
        Self { rpc, address }
    }

    /// Registry contract address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl RegistrySource for OnChainRegistry {
    async fn total_supply(&self) -> Result<u64> {
        let ret = self
            .rpc
            .call(self.address, &IAgentRegistry::totalSupplyCall {})
            .await?;
        u64::try_from(ret.supply)
            .map_err(|_| Error::Rpc(format!("totalSupply out of range: {}", ret.supply)))
    }

    async fn token_uri(&self, id: u64) -> Result<String> {
        let ret = self
            .rpc
            .call(
                self.address,
                &IAgentRegistry::tokenURICall {
                    tokenId: U256::from(id),
                },
            )
            .await?;
        Ok(ret.uri)
    }

    async fn owner_of(&self, id: u64) -> Result<Address> {
        let ret = self
            .rpc
            .call(
                self.address,
                &IAgentRegistry::ownerOfCall {
                    tokenId: U256::from(id),
                },
            )
            .await?;
        Ok(ret.owner)
    }
}

/// Walks a [`RegistrySource`] for the most recent agents.
pub struct RegistryReader<S> {
    source: S,
    cache: Option<TtlCache<String, Vec<RegistryEntry>>>,
}

impl<S: RegistrySource> RegistryReader<S> {
    /// Create a reader with no result cache.
    #[must_use]
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: None,
        }
    }

    /// Cache discovery results, keyed by limit.
    #[must_use]
    pub fn with_cache(mut self, cache: TtlCache<String, Vec<RegistryEntry>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The underlying source.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Discover up to `limit` of the most recently registered agents.
    ///
    /// Unreadable ids are skipped, never reported as errors.
    ///
    /// # Errors
    ///
    /// Returns an error only if the registry size cannot be read.
    pub async fn discover(&self, limit: u64) -> Result<Vec<RegistryEntry>> {
        let Some(ref cache) = self.cache else {
            return self.walk(limit).await;
        };
        cache
            .get_or_try_insert_with(format!("registry:{limit}"), || self.walk(limit))
            .await
    }

    /// Read every id in the discovery window, including unreadable ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry size cannot be read.
    pub async fn read_window(&self, limit: u64) -> Result<Vec<RegistryReadResult>> {
        let total = self.source.total_supply().await?;
        if limit == 0 || total == 0 {
            return Ok(Vec::new());
        }
        // total >= 1 and limit >= 1, so this stays within 1..=total.
        let lowest = total - limit.min(total) + 1;
        debug!("Registry holds {total} ids, reading {lowest}..={total}");

        let reads = (lowest..=total).rev().map(|id| self.read_entry(id));
        Ok(join_all(reads).await)
    }

    /// Read metadata and owner of one id.
    pub async fn read_entry(&self, id: u64) -> RegistryReadResult {
        match futures::try_join!(self.source.token_uri(id), self.source.owner_of(id)) {
            Ok((metadata_uri, owner)) => RegistryReadResult::Found(RegistryEntry {
                id,
                metadata_uri,
                owner,
            }),
            Err(e) => RegistryReadResult::Unreadable {
                id,
                reason: e.to_string(),
            },
        }
    }

    async fn walk(&self, limit: u64) -> Result<Vec<RegistryEntry>> {
        let window = self.read_window(limit).await?;
        let requested = window.len();

        let entries: Vec<RegistryEntry> = window
            .into_iter()
            .filter_map(|read| match read {
                RegistryReadResult::Found(entry) => Some(entry),
                RegistryReadResult::Unreadable { id, reason } => {
                    warn!("Skipping registry id {id}: {reason}");
                    None
                }
            })
            .collect();

        info!(
            "Discovered {} agents ({} unreadable)",
            entries.len(),
            requested - entries.len()
        );
        Ok(entries)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-memory registry with burned ids.
    struct FakeRegistry {
        total: Option<u64>,
        burned: HashSet<u64>,
        supply_reads: AtomicUsize,
    }

    impl FakeRegistry {
        fn new(total: u64, burned: &[u64]) -> Self {
            Self {
                total: Some(total),
                burned: burned.iter().copied().collect(),
                supply_reads: AtomicUsize::new(0),
            }
        }

        fn check(&self, id: u64) -> Result<()> {
            if self.burned.contains(&id) || id == 0 || Some(id) > self.total {
                return Err(Error::Rpc(format!("ERC721: invalid token ID {id}")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RegistrySource for FakeRegistry {
        async fn total_supply(&self) -> Result<u64> {
            self.supply_reads.fetch_add(1, Ordering::SeqCst);
            self.total
                .ok_or_else(|| Error::Rpc("execution reverted".to_string()))
        }

        async fn token_uri(&self, id: u64) -> Result<String> {
            self.check(id)?;
            Ok(format!("ipfs://agent/{id}"))
        }

        async fn owner_of(&self, id: u64) -> Result<Address> {
            self.check(id)?;
            Ok(Address::with_last_byte(u8::try_from(id % 256).unwrap()))
        }
    }

    #[tokio::test]
    async fn test_discover_skips_burned_ids() {
        for n in [6_u64, 10, 25] {
            let reader = RegistryReader::new(FakeRegistry::new(n, &[n - 2, n - 5]));
            let entries = reader.discover(10).await.expect("discover");

            let expected = usize::try_from(n.min(10)).unwrap() - 2;
            assert_eq!(entries.len(), expected, "n = {n}");
            assert!(entries.iter().all(|e| e.id != n - 2 && e.id != n - 5));
        }
    }

    #[tokio::test]
    async fn test_discover_walks_newest_first() {
        let reader = RegistryReader::new(FakeRegistry::new(30, &[]));
        let ids: Vec<u64> = reader
            .discover(5)
            .await
            .expect("discover")
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![30, 29, 28, 27, 26]);
    }

    #[tokio::test]
    async fn test_discover_small_registry() {
        let reader = RegistryReader::new(FakeRegistry::new(3, &[]));
        let entries = reader.discover(10).await.expect("discover");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].metadata_uri, "ipfs://agent/1");

        let empty = RegistryReader::new(FakeRegistry::new(0, &[]));
        assert!(empty.discover(10).await.expect("discover").is_empty());
    }

    #[tokio::test]
    async fn test_window_at_top_of_id_range() {
        let reader = RegistryReader::new(FakeRegistry::new(u64::MAX, &[]));
        assert!(reader.read_window(0).await.expect("window").is_empty());

        let ids: Vec<u64> = reader
            .discover(2)
            .await
            .expect("discover")
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![u64::MAX, u64::MAX - 1]);
        assert_eq!(reader.source().supply_reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreadable_supply_is_an_error() {
        let mut registry = FakeRegistry::new(0, &[]);
        registry.total = None;
        let reader = RegistryReader::new(registry);
        assert!(reader.discover(10).await.is_err());
    }

    #[tokio::test]
    async fn test_read_window_reports_unreadable() {
        let reader = RegistryReader::new(FakeRegistry::new(4, &[3]));
        let window = reader.read_window(10).await.expect("window");
        assert_eq!(window.len(), 4);
        assert!(matches!(window[1], RegistryReadResult::Unreadable { id: 3, .. }));
        assert!(window[0].clone().into_entry().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_discovery() {
        let cache = TtlCache::new("registry", Duration::from_secs(300));
        let reader = RegistryReader::new(FakeRegistry::new(12, &[])).with_cache(cache);

        reader.discover(10).await.expect("first");
        reader.discover(10).await.expect("cached");
        assert_eq!(reader.source().supply_reads.load(Ordering::SeqCst), 1);

        // Different limit, different key.
        reader.discover(5).await.expect("other limit");
        assert_eq!(reader.source().supply_reads.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(301)).await;
        reader.discover(10).await.expect("expired");
        assert_eq!(reader.source().supply_reads.load(Ordering::SeqCst), 3);
    }
}

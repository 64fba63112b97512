//! Cached market data from CoinGecko, DeFiLlama, DEX Screener and Glacier.
//!
//! Responses are validated into typed results at the boundary; anything
//! unexpected is an [`Error::Upstream`], never a silent zero.

use crate::cache::TtlCache;
use crate::config::{CacheConfig, MarketConfig};
use crate::error::{Error, Result};
use crate::maintenance::PeriodicTask;
use crate::payment::parse_address;
use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

/// Protocol categories that are not DeFi protocols proper.
const EXCLUDED_CATEGORIES: &[&str] = &["CEX", "Chain"];

/// Length of the merged top-pairs list.
const TOP_PAIRS: usize = 30;

/// Glacier page size and page cap for one subnet listing.
const GLACIER_PAGE_SIZE: usize = 100;
const GLACIER_MAX_PAGES: usize = 10;

/// Native token price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// CoinGecko coin id.
    pub coin_id: String,
    /// Price in USD.
    pub usd: Decimal,
    /// 24h change in percent.
    pub change_24h: Option<Decimal>,
}

/// Total value locked on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTvl {
    /// DeFiLlama chain name.
    pub chain: String,
    /// TVL in USD.
    pub tvl_usd: Decimal,
}

/// One protocol deployed on the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSummary {
    /// Protocol name.
    pub name: String,
    /// TVL on this chain in USD.
    pub tvl_usd: Decimal,
    /// DeFiLlama category.
    pub category: Option<String>,
}

/// Price and TVL fetched together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Native token price.
    pub price: PriceQuote,
    /// Chain TVL.
    pub tvl: ChainTvl,
}

/// Token side of a DEX pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairToken {
    /// Token contract.
    pub address: String,
    /// Token name.
    #[serde(default)]
    pub name: String,
    /// Ticker.
    #[serde(default)]
    pub symbol: String,
}

/// One DEX liquidity pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DexPair {
    /// DEX Screener chain id.
    pub chain_id: String,
    /// DEX Screener dex id (e.g. `traderjoe`).
    pub dex_id: String,
    /// Pair contract, unique per pair.
    pub pair_address: String,
    /// Base token.
    pub base_token: PairToken,
    /// Quote token.
    pub quote_token: PairToken,
    /// Base token price in USD, when the pair has one.
    pub price_usd: Option<Decimal>,
    /// 24h traded volume in USD.
    pub volume_24h: Decimal,
    /// Pooled liquidity in USD.
    pub liquidity_usd: Option<Decimal>,
}

/// A blockchain hosted by a subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetChain {
    /// Blockchain id.
    pub blockchain_id: String,
    /// Human name.
    pub name: String,
    /// VM id.
    pub vm_id: String,
    /// EVM chain id, for EVM chains.
    pub evm_chain_id: Option<u64>,
}

/// An Avalanche subnet or L1, as listed by Glacier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    /// Subnet id.
    pub subnet_id: String,
    /// Whether the subnet has converted to an L1.
    pub is_l1: bool,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Chains the subnet validates.
    pub chains: Vec<SubnetChain>,
}

#[derive(Debug, Deserialize)]
struct RawPrice {
    usd: f64,
    #[serde(default)]
    usd_24h_change: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawChain {
    name: String,
    #[serde(default)]
    tvl: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProtocol {
    name: String,
    #[serde(default)]
    tvl: Option<f64>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    chains: Vec<String>,
    #[serde(default)]
    chain_tvls: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct RawDexResponse {
    #[serde(default)]
    pairs: Option<Vec<RawPair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPair {
    chain_id: String,
    #[serde(default)]
    dex_id: String,
    pair_address: String,
    base_token: PairToken,
    quote_token: PairToken,
    #[serde(default)]
    price_usd: Option<String>,
    #[serde(default)]
    volume: Option<RawVolume>,
    #[serde(default)]
    liquidity: Option<RawLiquidity>,
}

#[derive(Debug, Deserialize)]
struct RawVolume {
    #[serde(default)]
    h24: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawLiquidity {
    #[serde(default)]
    usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSubnetPage {
    #[serde(default)]
    subnets: Vec<RawSubnet>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSubnet {
    subnet_id: String,
    #[serde(default, rename = "isL1")]
    is_l1: bool,
    #[serde(default)]
    create_block_timestamp: Option<i64>,
    #[serde(default)]
    blockchains: Vec<RawBlockchain>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlockchain {
    blockchain_id: String,
    #[serde(default)]
    blockchain_name: String,
    #[serde(default)]
    vm_id: String,
    #[serde(default)]
    evm_chain_id: Option<u64>,
}

/// Market data accessor with per-class caches.
#[derive(Debug, Clone)]
pub struct MarketData {
    client: reqwest::Client,
    config: MarketConfig,
    top_pair_tokens: Vec<Address>,
    prices: TtlCache<String, PriceQuote>,
    tvl: TtlCache<String, ChainTvl>,
    protocols: TtlCache<String, Vec<ProtocolSummary>>,
    pairs: TtlCache<String, Vec<DexPair>>,
    subnets: TtlCache<String, Vec<Subnet>>,
}

impl MarketData {
    /// Create an accessor from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the HTTP client cannot be built, or
    /// [`Error::Config`] if a top-pair token is not an address.
    pub fn new(config: &MarketConfig, cache: &CacheConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {e}")))?;

        let top_pair_tokens = config
            .top_pair_tokens
            .iter()
            .map(|t| {
                parse_address(t).map_err(|e| Error::Config(format!("market.top_pair_tokens: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            client,
            config: config.clone(),
            top_pair_tokens,
            prices: TtlCache::with_capacity("price", cache.price_ttl(), cache.capacity),
            tvl: TtlCache::with_capacity("tvl", cache.tvl_ttl(), cache.capacity),
            protocols: TtlCache::with_capacity("protocols", cache.protocols_ttl(), cache.capacity),
            pairs: TtlCache::with_capacity("dex", cache.dex_ttl(), cache.capacity),
            subnets: TtlCache::with_capacity("glacier", cache.glacier_ttl(), cache.capacity),
        })
    }

    /// Start sweepers for every cache.
    #[must_use]
    pub fn spawn_sweepers(&self, interval: Duration) -> Vec<PeriodicTask> {
        vec![
            self.prices.spawn_sweeper(interval),
            self.tvl.spawn_sweeper(interval),
            self.protocols.spawn_sweeper(interval),
            self.pairs.spawn_sweeper(interval),
            self.subnets.spawn_sweeper(interval),
        ]
    }

    /// Drop all cached market data.
    pub fn clear(&self) {
        self.prices.clear();
        self.tvl.clear();
        self.protocols.clear();
        self.pairs.clear();
        self.subnets.clear();
    }

    /// Price of the configured native token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] if CoinGecko fails or omits the coin.
    pub async fn native_price(&self) -> Result<PriceQuote> {
        let coin_id = self.config.coin_id.clone();
        self.prices
            .get_or_try_insert_with(format!("cg-price:{coin_id}"), || async move {
                let url = format!(
                    "{}/simple/price?ids={coin_id}&vs_currencies=usd&include_24hr_change=true",
                    self.config.coingecko_url.trim_end_matches('/')
                );
                let body: HashMap<String, RawPrice> = self.get_json(&url, &[]).await?;
                parse_price(&coin_id, &body)
            })
            .await
    }

    /// TVL of the configured chain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] if DeFiLlama fails or omits the chain.
    pub async fn chain_tvl(&self) -> Result<ChainTvl> {
        let chain = self.config.chain_name.clone();
        self.tvl
            .get_or_try_insert_with(format!("tvl:{chain}"), || async move {
                let url = format!(
                    "{}/v2/chains",
                    self.config.defillama_url.trim_end_matches('/')
                );
                let body: Vec<RawChain> = self.get_json(&url, &[]).await?;
                parse_chain_tvl(&chain, &body)
            })
            .await
    }

    /// Largest DeFi protocols on the configured chain, by chain TVL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] if DeFiLlama fails.
    pub async fn top_protocols(&self, limit: usize) -> Result<Vec<ProtocolSummary>> {
        let chain = self.config.chain_name.clone();
        let all = self
            .protocols
            .get_or_try_insert_with(format!("protocols:{chain}"), || async move {
                let url = format!(
                    "{}/protocols",
                    self.config.defillama_url.trim_end_matches('/')
                );
                let body: Vec<RawProtocol> = self.get_json(&url, &[]).await?;
                Ok(rank_protocols(&chain, body))
            })
            .await?;
        Ok(all.into_iter().take(limit).collect())
    }

    /// Pairs trading `token` on the configured DEX chain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] if DEX Screener fails.
    pub async fn dex_pairs(&self, token: Address) -> Result<Vec<DexPair>> {
        self.pairs
            .get_or_try_insert_with(format!("dex-pairs:{token}"), || self.fetch_pairs(token))
            .await
    }

    /// Highest-volume pairs across the configured top-pair tokens.
    ///
    /// Tokens whose lookup fails are skipped; pairs are deduplicated by pair
    /// address and the list is capped at 30.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] only if every token lookup fails.
    pub async fn top_pairs(&self) -> Result<Vec<DexPair>> {
        self.pairs
            .get_or_try_insert_with("dex-top-pairs".to_string(), || async move {
                let results = join_all(
                    self.top_pair_tokens
                        .iter()
                        .map(|token| self.fetch_pairs(*token)),
                )
                .await;

                let mut batches = Vec::with_capacity(results.len());
                let mut last_error = None;
                for (token, result) in self.top_pair_tokens.iter().zip(results) {
                    match result {
                        Ok(pairs) => batches.push(pairs),
                        Err(e) => {
                            warn!("Skipping pairs of {token}: {e}");
                            last_error = Some(e);
                        }
                    }
                }
                match last_error {
                    Some(e) if batches.is_empty() => Err(e),
                    _ => Ok(merge_top_pairs(batches)),
                }
            })
            .await
    }

    /// Every subnet Glacier lists for the configured network, newest first.
    ///
    /// Pages are followed up to a fixed cap. A failure after the first page
    /// ends paging and keeps what was read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] if the first page cannot be read.
    pub async fn l1s(&self) -> Result<Vec<Subnet>> {
        let network = self.config.glacier_network.clone();
        self.subnets
            .get_or_try_insert_with(format!("glacier-subnets:{network}"), || async move {
                let url = format!(
                    "{}/v1/networks/{network}/subnets",
                    self.config.glacier_url.trim_end_matches('/')
                );
                let mut subnets = Vec::new();
                let mut page_token: Option<String> = None;

                for page in 0..GLACIER_MAX_PAGES {
                    let mut query = vec![
                        ("pageSize", GLACIER_PAGE_SIZE.to_string()),
                        ("sortOrder", "desc".to_string()),
                    ];
                    if let Some(token) = page_token.take() {
                        query.push(("pageToken", token));
                    }

                    let body: RawSubnetPage = match self.get_json(&url, &query).await {
                        Ok(body) => body,
                        Err(e) if page > 0 => {
                            warn!("Glacier paging stopped after {page} pages: {e}");
                            break;
                        }
                        Err(e) => return Err(e),
                    };
                    subnets.extend(body.subnets.into_iter().map(Subnet::from));

                    match body.next_page_token.filter(|t| !t.is_empty()) {
                        Some(token) => page_token = Some(token),
                        None => break,
                    }
                }
                debug!("Glacier listed {} subnets", subnets.len());
                Ok(subnets)
            })
            .await
    }

    /// Price and TVL, fetched concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first upstream failure.
    pub async fn snapshot(&self) -> Result<MarketSnapshot> {
        let (price, tvl) = tokio::try_join!(self.native_price(), self.chain_tvl())?;
        Ok(MarketSnapshot { price, tvl })
    }

    async fn fetch_pairs(&self, token: Address) -> Result<Vec<DexPair>> {
        let url = format!(
            "{}/latest/dex/tokens/{token}",
            self.config.dexscreener_url.trim_end_matches('/')
        );
        let body: RawDexResponse = self.get_json(&url, &[]).await?;
        Ok(parse_pairs(&self.config.dex_chain, body))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        debug!("GET {url}");
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&e, self.config.timeout()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!("{url} answered HTTP {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("{url} returned unexpected JSON: {e}")))
    }
}

fn to_decimal(field: &str, value: f64) -> Result<Decimal> {
    Decimal::try_from(value).map_err(|e| Error::Upstream(format!("{field} is not a number: {e}")))
}

fn parse_price(coin_id: &str, body: &HashMap<String, RawPrice>) -> Result<PriceQuote> {
    let raw = body
        .get(coin_id)
        .ok_or_else(|| Error::Upstream(format!("CoinGecko has no price for {coin_id}")))?;
    let usd = to_decimal("usd", raw.usd)?;
    if usd <= Decimal::ZERO {
        return Err(Error::Upstream(format!("Non-positive price for {coin_id}")));
    }
    let change_24h = raw
        .usd_24h_change
        .map(|c| to_decimal("usd_24h_change", c))
        .transpose()?;
    Ok(PriceQuote {
        coin_id: coin_id.to_string(),
        usd,
        change_24h,
    })
}

fn parse_chain_tvl(chain: &str, body: &[RawChain]) -> Result<ChainTvl> {
    let raw = body
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(chain))
        .ok_or_else(|| Error::Upstream(format!("DeFiLlama has no chain {chain}")))?;
    let tvl = raw
        .tvl
        .ok_or_else(|| Error::Upstream(format!("DeFiLlama reports no TVL for {chain}")))?;
    Ok(ChainTvl {
        chain: raw.name.clone(),
        tvl_usd: to_decimal("tvl", tvl)?,
    })
}

fn rank_protocols(chain: &str, body: Vec<RawProtocol>) -> Vec<ProtocolSummary> {
    let mut ranked: Vec<ProtocolSummary> = body
        .into_iter()
        .filter(|p| p.chains.iter().any(|c| c == chain))
        .filter(|p| {
            !EXCLUDED_CATEGORIES.contains(&p.category.as_deref().unwrap_or_default())
        })
        .filter_map(|p| {
            let tvl = p.chain_tvls.get(chain).copied().or(p.tvl)?;
            Some(ProtocolSummary {
                name: p.name,
                tvl_usd: Decimal::try_from(tvl).ok()?,
                category: p.category,
            })
        })
        .collect();
    ranked.sort_by(|a, b| b.tvl_usd.cmp(&a.tvl_usd));
    ranked
}

impl From<RawSubnet> for Subnet {
    fn from(raw: RawSubnet) -> Self {
        Self {
            subnet_id: raw.subnet_id,
            is_l1: raw.is_l1,
            created_at: raw
                .create_block_timestamp
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            chains: raw
                .blockchains
                .into_iter()
                .map(|b| SubnetChain {
                    blockchain_id: b.blockchain_id,
                    name: b.blockchain_name,
                    vm_id: b.vm_id,
                    evm_chain_id: b.evm_chain_id,
                })
                .collect(),
        }
    }
}

/// Pairs on `chain` with usable numbers; the rest are dropped.
fn parse_pairs(chain: &str, body: RawDexResponse) -> Vec<DexPair> {
    body.pairs
        .unwrap_or_default()
        .into_iter()
        .filter(|p| p.chain_id == chain)
        .filter_map(|p| {
            let volume = p.volume.and_then(|v| v.h24).unwrap_or_default();
            let price_usd = match p.price_usd {
                Some(price) => Some(price.parse::<Decimal>().ok()?),
                None => None,
            };
            let liquidity_usd = match p.liquidity.and_then(|l| l.usd) {
                Some(usd) => Some(Decimal::try_from(usd).ok()?),
                None => None,
            };
            Some(DexPair {
                chain_id: p.chain_id,
                dex_id: p.dex_id,
                pair_address: p.pair_address,
                base_token: p.base_token,
                quote_token: p.quote_token,
                price_usd,
                volume_24h: Decimal::try_from(volume).ok()?,
                liquidity_usd,
            })
        })
        .collect()
}

/// Dedupe by pair address (first seen wins), order by 24h volume, cap.
fn merge_top_pairs(batches: Vec<Vec<DexPair>>) -> Vec<DexPair> {
    let mut seen = HashSet::new();
    let mut merged: Vec<DexPair> = batches
        .into_iter()
        .flatten()
        .filter(|p| seen.insert(p.pair_address.clone()))
        .collect();
    merged.sort_by(|a, b| b.volume_24h.cmp(&a.volume_24h));
    merged.truncate(TOP_PAIRS);
    merged
}

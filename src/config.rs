//! Configuration for a2a-paygate.
//!
//! Payment settings have no usable defaults: addresses, network and the
//! facilitator URL must be supplied explicitly (or taken from a named preset
//! such as [`PaymentConfig::fuji_testnet`]) and are checked by
//! [`AgentConfig::validate`] at startup.

use crate::payment::parse_address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Payment protocol settings.
    #[serde(default)]
    pub payment: PaymentConfig,

    /// Inbound admission control.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Upstream cache lifetimes.
    #[serde(default)]
    pub cache: CacheConfig,

    /// On-chain read settings.
    #[serde(default)]
    pub chain: ChainConfig,

    /// Third-party market data APIs.
    #[serde(default)]
    pub market: MarketConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Payment protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Facilitator base URL (verify/settle endpoints live under it).
    #[serde(default)]
    pub facilitator_url: String,

    /// Fungible asset contract (EIP-712 verifying contract).
    #[serde(default)]
    pub asset_address: String,

    /// Asset EIP-712 domain name.
    #[serde(default)]
    pub asset_name: String,

    /// Asset EIP-712 domain version.
    #[serde(default)]
    pub asset_version: String,

    /// Asset decimals used to scale human amounts.
    #[serde(default = "default_asset_decimals")]
    pub asset_decimals: u32,

    /// Address that receives payments for this agent's paid routes.
    #[serde(default)]
    pub pay_to: String,

    /// x402 network identifier (e.g. `avalanche-fuji`).
    #[serde(default)]
    pub network: String,

    /// EVM chain id bound into every signature.
    #[serde(default)]
    pub chain_id: u64,

    /// Seconds an outbound authorization stays valid.
    #[serde(default = "default_authorization_ttl")]
    pub authorization_ttl_secs: u64,

    /// Timeout for outbound paid calls in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Price of this agent's paid route, in human units of the asset.
    #[serde(default = "default_price")]
    pub price: Decimal,

    /// Paid route path advertised in payment requirements.
    #[serde(default = "default_resource")]
    pub resource: String,

    /// Human description advertised in payment requirements.
    #[serde(default)]
    pub description: String,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum admitted requests per key per window.
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    /// Window length in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Idle-key compaction interval in seconds.
    #[serde(default = "default_maintenance_interval")]
    pub compaction_interval_secs: u64,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries per cache.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Price data TTL in seconds.
    #[serde(default = "default_price_ttl")]
    pub price_ttl_secs: u64,

    /// TVL data TTL in seconds.
    #[serde(default = "default_tvl_ttl")]
    pub tvl_ttl_secs: u64,

    /// Slow-changing aggregate data (asset metadata) TTL in seconds.
    #[serde(default = "default_aggregate_ttl")]
    pub aggregate_ttl_secs: u64,

    /// Registry discovery result TTL in seconds.
    #[serde(default = "default_registry_ttl")]
    pub registry_ttl_secs: u64,

    /// DeFiLlama protocol list TTL in seconds.
    #[serde(default = "default_protocols_ttl")]
    pub protocols_ttl_secs: u64,

    /// DEX pair TTL in seconds.
    #[serde(default = "default_dex_ttl")]
    pub dex_ttl_secs: u64,

    /// Glacier subnet list TTL in seconds.
    #[serde(default = "default_glacier_ttl")]
    pub glacier_ttl_secs: u64,

    /// Sweep interval in seconds.
    #[serde(default = "default_maintenance_interval")]
    pub sweep_interval_secs: u64,
}

/// On-chain read configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint.
    #[serde(default)]
    pub rpc_url: String,

    /// Agent registry contract, if discovery is used.
    #[serde(default)]
    pub registry_address: Option<String>,

    /// How many of the most recent registry ids a discovery walks.
    #[serde(default = "default_discovery_limit")]
    pub discovery_limit: u64,

    /// Timeout for each JSON-RPC call in seconds.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
}

/// Market data API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// CoinGecko API base URL.
    #[serde(default = "default_coingecko_url")]
    pub coingecko_url: String,

    /// DeFiLlama API base URL.
    #[serde(default = "default_defillama_url")]
    pub defillama_url: String,

    /// DEX Screener API base URL.
    #[serde(default = "default_dexscreener_url")]
    pub dexscreener_url: String,

    /// Glacier (AvaCloud Data API) base URL.
    #[serde(default = "default_glacier_url")]
    pub glacier_url: String,

    /// Glacier network name (`mainnet` or `fuji`).
    #[serde(default = "default_glacier_network")]
    pub glacier_network: String,

    /// DEX Screener chain id pairs are filtered to.
    #[serde(default = "default_dex_chain")]
    pub dex_chain: String,

    /// Tokens whose pairs make up the top-pairs list.
    #[serde(default = "default_top_pair_tokens")]
    pub top_pair_tokens: Vec<String>,

    /// CoinGecko id of the native token.
    #[serde(default = "default_coin_id")]
    pub coin_id: String,

    /// DeFiLlama chain name.
    #[serde(default = "default_chain_name")]
    pub chain_name: String,

    /// Timeout per request in seconds.
    #[serde(default = "default_market_timeout")]
    pub timeout_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            facilitator_url: String::new(),
            asset_address: String::new(),
            asset_name: String::new(),
            asset_version: String::new(),
            asset_decimals: default_asset_decimals(),
            pay_to: String::new(),
            network: String::new(),
            chain_id: 0,
            authorization_ttl_secs: default_authorization_ttl(),
            request_timeout_secs: default_request_timeout(),
            price: default_price(),
            resource: default_resource(),
            description: String::new(),
        }
    }
}

impl PaymentConfig {
    /// USDC on Avalanche Fuji through the public test facilitator.
    ///
    /// `pay_to` is still required: there is no default recipient.
    #[must_use]
    pub fn fuji_testnet(pay_to: &str) -> Self {
        Self {
            facilitator_url: "https://facilitator.ultravioletadao.xyz".to_string(),
            asset_address: "0x5425890298aed601595a70AB815c96711a31Bc65".to_string(),
            asset_name: "USD Coin".to_string(),
            asset_version: "2".to_string(),
            pay_to: pay_to.to_string(),
            network: "avalanche-fuji".to_string(),
            chain_id: 43113,
            ..Self::default()
        }
    }

    /// Authorization lifetime.
    #[must_use]
    pub fn authorization_ttl(&self) -> Duration {
        Duration::from_secs(self.authorization_ttl_secs)
    }

    /// Outbound request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
            compaction_interval_secs: default_maintenance_interval(),
        }
    }
}

impl CacheConfig {
    /// Price data TTL.
    #[must_use]
    pub fn price_ttl(&self) -> Duration {
        Duration::from_secs(self.price_ttl_secs)
    }

    /// TVL data TTL.
    #[must_use]
    pub fn tvl_ttl(&self) -> Duration {
        Duration::from_secs(self.tvl_ttl_secs)
    }

    /// Aggregate data TTL.
    #[must_use]
    pub fn aggregate_ttl(&self) -> Duration {
        Duration::from_secs(self.aggregate_ttl_secs)
    }

    /// Registry discovery TTL.
    #[must_use]
    pub fn registry_ttl(&self) -> Duration {
        Duration::from_secs(self.registry_ttl_secs)
    }

    /// Protocol list TTL.
    #[must_use]
    pub fn protocols_ttl(&self) -> Duration {
        Duration::from_secs(self.protocols_ttl_secs)
    }

    /// DEX pair TTL.
    #[must_use]
    pub fn dex_ttl(&self) -> Duration {
        Duration::from_secs(self.dex_ttl_secs)
    }

    /// Glacier subnet TTL.
    #[must_use]
    pub fn glacier_ttl(&self) -> Duration {
        Duration::from_secs(self.glacier_ttl_secs)
    }

    /// Sweep interval.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl RateLimitConfig {
    /// Compaction interval.
    #[must_use]
    pub fn compaction_interval(&self) -> Duration {
        Duration::from_secs(self.compaction_interval_secs)
    }

    /// Window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl MarketConfig {
    /// Timeout per request.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            price_ttl_secs: default_price_ttl(),
            tvl_ttl_secs: default_tvl_ttl(),
            aggregate_ttl_secs: default_aggregate_ttl(),
            registry_ttl_secs: default_registry_ttl(),
            protocols_ttl_secs: default_protocols_ttl(),
            dex_ttl_secs: default_dex_ttl(),
            glacier_ttl_secs: default_glacier_ttl(),
            sweep_interval_secs: default_maintenance_interval(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            coingecko_url: default_coingecko_url(),
            defillama_url: default_defillama_url(),
            dexscreener_url: default_dexscreener_url(),
            glacier_url: default_glacier_url(),
            glacier_network: default_glacier_network(),
            dex_chain: default_dex_chain(),
            top_pair_tokens: default_top_pair_tokens(),
            coin_id: default_coin_id(),
            chain_name: default_chain_name(),
            timeout_secs: default_market_timeout(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            registry_address: None,
            discovery_limit: default_discovery_limit(),
            rpc_timeout_secs: default_rpc_timeout(),
        }
    }
}

impl ChainConfig {
    /// Timeout for each JSON-RPC call.
    #[must_use]
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Fuji C-Chain public RPC.
    #[must_use]
    pub fn fuji_testnet() -> Self {
        Self {
            rpc_url: "https://api.avax-test.network/ext/bc/C/rpc".to_string(),
            registry_address: None,
            discovery_limit: default_discovery_limit(),
            rpc_timeout_secs: default_rpc_timeout(),
        }
    }
}

/// Default location of the configuration file.
#[must_use]
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "a2a-agent")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("a2a-agent.toml"))
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_asset_decimals() -> u32 {
    6
}

const fn default_authorization_ttl() -> u64 {
    3600
}

const fn default_request_timeout() -> u64 {
    30
}

fn default_price() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_resource() -> String {
    "/a2a/guide".to_string()
}

const fn default_max_requests() -> usize {
    60
}

const fn default_window_ms() -> u64 {
    60_000
}

const fn default_maintenance_interval() -> u64 {
    300 // 5 minutes
}

const fn default_cache_capacity() -> usize {
    10_000
}

const fn default_price_ttl() -> u64 {
    120
}

const fn default_tvl_ttl() -> u64 {
    600
}

const fn default_aggregate_ttl() -> u64 {
    1800
}

const fn default_registry_ttl() -> u64 {
    300
}

const fn default_protocols_ttl() -> u64 {
    300
}

const fn default_dex_ttl() -> u64 {
    120
}

const fn default_glacier_ttl() -> u64 {
    180
}

const fn default_discovery_limit() -> u64 {
    10
}

const fn default_rpc_timeout() -> u64 {
    15
}

fn default_coingecko_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_defillama_url() -> String {
    "https://api.llama.fi".to_string()
}

fn default_dexscreener_url() -> String {
    "https://api.dexscreener.com".to_string()
}

fn default_glacier_url() -> String {
    "https://glacier-api.avax.network".to_string()
}

fn default_glacier_network() -> String {
    "mainnet".to_string()
}

fn default_dex_chain() -> String {
    "avalanche".to_string()
}

fn default_top_pair_tokens() -> Vec<String> {
    [
        "0xB31f66AA3C1e785363F0875A1B74E27b85FD66c7", // WAVAX
        "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E", // USDC
        "0x6e84a6216eA6dACC71eE8E6b0a5B7322EEbC0fDd", // JOE
        "0x2b2C81e08f1Af8835a78Bb2A90AE924ACE0eA4bE", // sAVAX
    ]
    .map(String::from)
    .to_vec()
}

fn default_coin_id() -> String {
    "avalanche-2".to_string()
}

fn default_chain_name() -> String {
    "Avalanche".to_string()
}

const fn default_market_timeout() -> u64 {
    10
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration before anything is started.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] naming the first invalid field.
    pub fn validate(&self) -> crate::Result<()> {
        self.payment.validate()?;

        if self.rate_limit.max_requests == 0 {
            return Err(config_err("rate_limit.max_requests must be positive"));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(config_err("rate_limit.window_ms must be positive"));
        }
        if self.rate_limit.compaction_interval_secs == 0 {
            return Err(config_err(
                "rate_limit.compaction_interval_secs must be positive",
            ));
        }
        if self.chain.rpc_timeout_secs == 0 {
            return Err(config_err("chain.rpc_timeout_secs must be positive"));
        }
        if self.market.timeout_secs == 0 {
            return Err(config_err("market.timeout_secs must be positive"));
        }
        for token in &self.market.top_pair_tokens {
            parse_address(token)
                .map_err(|e| crate::Error::Config(format!("market.top_pair_tokens: {e}")))?;
        }

        let c = &self.cache;
        if [
            c.price_ttl_secs,
            c.tvl_ttl_secs,
            c.aggregate_ttl_secs,
            c.registry_ttl_secs,
            c.protocols_ttl_secs,
            c.dex_ttl_secs,
            c.glacier_ttl_secs,
            c.sweep_interval_secs,
        ]
        .contains(&0)
        {
            return Err(config_err("cache TTLs and sweep interval must be positive"));
        }

        if let Some(ref registry) = self.chain.registry_address {
            parse_address(registry)
                .map_err(|e| crate::Error::Config(format!("chain.registry_address: {e}")))?;
            if self.chain.rpc_url.is_empty() {
                return Err(config_err("chain.rpc_url is required for registry discovery"));
            }
        }

        Ok(())
    }
}

impl PaymentConfig {
    /// Validate payment settings.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] naming the first invalid field.
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.facilitator_url.starts_with("http://")
            || self.facilitator_url.starts_with("https://"))
        {
            return Err(config_err("payment.facilitator_url must be an http(s) URL"));
        }
        parse_address(&self.asset_address)
            .map_err(|e| crate::Error::Config(format!("payment.asset_address: {e}")))?;
        let pay_to = parse_address(&self.pay_to)
            .map_err(|e| crate::Error::Config(format!("payment.pay_to: {e}")))?;
        if pay_to.is_zero() {
            return Err(config_err("payment.pay_to must not be the zero address"));
        }
        if self.asset_name.is_empty() || self.asset_version.is_empty() {
            return Err(config_err("payment.asset_name and asset_version are required"));
        }
        if self.network.is_empty() {
            return Err(config_err("payment.network is required"));
        }
        if self.chain_id == 0 {
            return Err(config_err("payment.chain_id is required"));
        }
        if self.asset_decimals > 18 {
            return Err(config_err("payment.asset_decimals must be at most 18"));
        }
        if self.authorization_ttl_secs == 0 {
            return Err(config_err("payment.authorization_ttl_secs must be positive"));
        }
        if self.request_timeout_secs == 0 {
            return Err(config_err("payment.request_timeout_secs must be positive"));
        }
        if self.price <= Decimal::ZERO {
            return Err(config_err("payment.price must be positive"));
        }
        Ok(())
    }
}

fn config_err(msg: &str) -> crate::Error {
    crate::Error::Config(msg.to_string())
}

//! # a2a-paygate
//!
//! Paid, machine-callable endpoints for agent-to-agent APIs.
//!
//! This crate provides:
//! - One-time payment authorizations (EIP-712 `TransferWithAuthorization`)
//!   carried in the `X-PAYMENT` header of outbound calls
//! - An inbound payment gate that delegates verification and settlement to an
//!   external facilitator
//! - Sliding-window admission control per caller
//! - TTL caches in front of JSON-RPC and third-party HTTP reads
//!
//! ## Architecture
//!
//! Inbound: `SlidingWindowLimiter` → `PaymentGate` → handler → settle.
//! Outbound: `AuthorizationBuilder` → `PaymentTransport` → peer's gate.
//! Upstream reads (`RegistryReader`, `AssetReader`, `MarketData`) consult a
//! `TtlCache` before touching the network.
//!
//! ## Example
//!
//! ```rust,no_run
//! use a2a_paygate::{AgentBuilder, AgentConfig, PaymentConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig {
//!         payment: PaymentConfig::fuji_testnet("0x7C599af5Dce814B13CD0c66F9C783Dd1e4C69Ae8"),
//!         ..AgentConfig::default()
//!     };
//!     let agent = AgentBuilder::new(config).build()?;
//!     agent.admit("203.0.113.7")?;
//!     agent.run().await;
//!     agent.shutdown().await;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod agent;
pub mod cache;
pub mod chain;
pub mod config;
pub mod error;
pub mod event;
pub mod maintenance;
pub mod market;
pub mod payment;
pub mod rate_limit;

pub use agent::{AgentBuilder, PaidResponse, RequestDenied, RunningAgent, ShutdownHandle};
pub use cache::{CacheStats, TtlCache};
pub use chain::{
    AssetMetadata, AssetReader, OnChainRegistry, RegistryEntry, RegistryReadResult,
    RegistryReader, RegistrySource, RpcClient,
};
pub use config::{
    AgentConfig, CacheConfig, ChainConfig, MarketConfig, PaymentConfig, RateLimitConfig,
};
pub use error::{Error, Result};
pub use event::{AgentEvent, AgentEventsChannel};
pub use maintenance::PeriodicTask;
pub use market::{
    ChainTvl, DexPair, MarketData, MarketSnapshot, PairToken, PriceQuote, ProtocolSummary, Subnet,
    SubnetChain,
};
pub use payment::{
    AuthorizationBuilder, Facilitator, GateRejection, HttpFacilitator, PaidClient,
    PaymentAuthorization, PaymentEnvelope, PaymentGate, PaymentRequirements, PaymentTransport,
};
pub use rate_limit::SlidingWindowLimiter;

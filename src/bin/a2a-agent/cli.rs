//! Command-line interface definition.

use a2a_paygate::config::{default_config_path, AgentConfig, ChainConfig, PaymentConfig};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use std::path::PathBuf;

/// Paid agent-to-agent calls, peer discovery and market data.
#[derive(Parser, Debug)]
#[command(name = "a2a-agent")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Start from a named network preset instead of an empty configuration.
    #[arg(long, value_enum, env = "A2A_PRESET")]
    pub preset: Option<CliPreset>,

    /// Facilitator base URL.
    #[arg(long, env = "A2A_FACILITATOR_URL")]
    pub facilitator_url: Option<String>,

    /// Recipient of this agent's paid routes.
    #[arg(long, env = "A2A_PAY_TO")]
    pub pay_to: Option<String>,

    /// JSON-RPC endpoint for on-chain reads.
    #[arg(long, env = "A2A_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Agent registry contract.
    #[arg(long, env = "A2A_REGISTRY")]
    pub registry: Option<String>,

    /// Payer private key (hex). Required for paid calls.
    #[arg(long, env = "A2A_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON.
    #[arg(long)]
    pub json_logs: bool,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the most recently registered agents.
    Discover {
        /// How many recent registry ids to walk.
        #[arg(long, short)]
        limit: Option<u64>,
    },

    /// Call a peer's paid endpoint.
    Call {
        /// Endpoint URL.
        url: String,

        /// Peer's payment recipient.
        #[arg(long)]
        pay_to: String,

        /// Amount in human units of the asset (e.g. 0.01).
        #[arg(long, short)]
        amount: Decimal,

        /// HTTP method.
        #[arg(long, short = 'X', default_value = "POST")]
        method: String,

        /// JSON request body.
        #[arg(long, short)]
        data: Option<String>,
    },

    /// Print an `X-PAYMENT` header value without sending anything.
    Sign {
        /// Recipient address.
        #[arg(long)]
        pay_to: String,

        /// Amount in human units of the asset.
        #[arg(long, short)]
        amount: Decimal,
    },

    /// Check that the facilitator is reachable.
    Facilitator,

    /// Show native token price, chain TVL and top protocols.
    Market {
        /// Number of protocols to list.
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Show DEX pairs for a token, or the top pairs when no token is given.
    Pairs {
        /// Token contract address.
        token: Option<String>,
    },

    /// List Avalanche subnets and L1s.
    Subnets {
        /// Only show subnets that converted to L1s.
        #[arg(long)]
        l1_only: bool,
    },

    /// Show the payment asset balance of an address.
    Balance {
        /// Address to query (defaults to the payer of `--private-key`).
        address: Option<String>,
    },

    /// Write the effective configuration to the config file.
    InitConfig,
}

/// Network preset CLI enum.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliPreset {
    /// USDC on Avalanche Fuji testnet.
    Fuji,
}

impl Cli {
    /// Path of the configuration file in effect.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(default_config_path)
    }

    /// Build the effective configuration: file, then preset, then flags.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given config file cannot be loaded.
    pub fn to_config(&self) -> color_eyre::Result<AgentConfig> {
        let path = self.config_path();
        let mut config = if self.config.is_some() || path.exists() {
            AgentConfig::from_file(&path)?
        } else {
            AgentConfig::default()
        };

        if let Some(CliPreset::Fuji) = self.preset {
            let pay_to = self
                .pay_to
                .clone()
                .unwrap_or_else(|| config.payment.pay_to.clone());
            config.payment = PaymentConfig {
                price: config.payment.price,
                resource: config.payment.resource.clone(),
                description: config.payment.description.clone(),
                ..PaymentConfig::fuji_testnet(&pay_to)
            };
            if config.chain.rpc_url.is_empty() {
                config.chain = ChainConfig {
                    registry_address: config.chain.registry_address.clone(),
                    ..ChainConfig::fuji_testnet()
                };
            }
        }

        if let Some(ref url) = self.facilitator_url {
            config.payment.facilitator_url.clone_from(url);
        }
        if let Some(ref pay_to) = self.pay_to {
            config.payment.pay_to.clone_from(pay_to);
        }
        if let Some(ref rpc_url) = self.rpc_url {
            config.chain.rpc_url.clone_from(rpc_url);
        }
        if let Some(ref registry) = self.registry {
            config.chain.registry_address = Some(registry.clone());
        }
        config.log_level.clone_from(&self.log_level);

        Ok(config)
    }

    /// The payer key, or an error naming the flag.
    ///
    /// # Errors
    ///
    /// Returns an error if no key was given.
    pub fn require_private_key(&self) -> color_eyre::Result<&str> {
        self.private_key
            .as_deref()
            .ok_or_else(|| color_eyre::eyre::eyre!("--private-key (or A2A_PRIVATE_KEY) is required"))
    }
}

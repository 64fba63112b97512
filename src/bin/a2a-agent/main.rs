//! a2a-agent CLI entry point.

mod cli;

use a2a_paygate::chain::{AssetReader, OnChainRegistry, RegistryReader, RpcClient};
use a2a_paygate::payment::parse_address;
use a2a_paygate::{AgentConfig, MarketData, PaidClient};
use clap::Parser;
use cli::{Cli, Command};
use color_eyre::eyre::{bail, eyre};
use reqwest::Method;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    info!("a2a-agent v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.to_config()?;

    match cli.command {
        Command::Discover { limit } => discover(&config, limit).await?,
        Command::Call {
            ref url,
            ref pay_to,
            amount,
            ref method,
            ref data,
        } => {
            let client = PaidClient::from_config(cli.require_private_key()?, &config.payment, pay_to)?;
            let method = Method::from_bytes(method.to_uppercase().as_bytes())?;
            let body = data
                .as_deref()
                .map(serde_json::from_str::<serde_json::Value>)
                .transpose()?;

            match client.call(url, method, body.as_ref(), amount).await {
                Ok(response) => println!("{}", serde_json::to_string_pretty(&response)?),
                Err(a2a_paygate::Error::RateLimited { retry_after }) => {
                    bail!("Peer is rate limiting this client, retry in {retry_after:?}")
                }
                Err(e) if e.is_payment_rejected() => {
                    bail!("Payment rejected by peer (check funds and amount): {e}")
                }
                Err(e) if e.is_retryable() => {
                    bail!("Call failed, retry with a new authorization: {e}")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Sign { ref pay_to, amount } => {
            let client = PaidClient::from_config(cli.require_private_key()?, &config.payment, pay_to)?;
            println!("{}", client.sign_header(amount)?);
        }
        Command::Facilitator => {
            let client = a2a_paygate::HttpFacilitator::new(&config.payment.facilitator_url)?;
            if client.is_reachable().await {
                println!("Facilitator {} is reachable", client.base_url());
            } else {
                bail!("Facilitator {} is not reachable", client.base_url());
            }
        }
        Command::Market { top } => {
            let market = MarketData::new(&config.market, &config.cache)?;
            let (snapshot, protocols) =
                tokio::try_join!(market.snapshot(), market.top_protocols(top))?;

            println!(
                "{}: ${} ({}% 24h)",
                snapshot.price.coin_id,
                snapshot.price.usd.round_dp(4),
                snapshot
                    .price
                    .change_24h
                    .map_or_else(|| "n/a".to_string(), |c| c.round_dp(2).to_string())
            );
            println!("{} TVL: ${}", snapshot.tvl.chain, snapshot.tvl.tvl_usd.round_dp(0));
            for (rank, protocol) in protocols.iter().enumerate() {
                println!(
                    "{:>3}. {} ${} [{}]",
                    rank + 1,
                    protocol.name,
                    protocol.tvl_usd.round_dp(0),
                    protocol.category.as_deref().unwrap_or("Other")
                );
            }
        }
        Command::Pairs { ref token } => {
            let market = MarketData::new(&config.market, &config.cache)?;
            let pairs = match token {
                Some(token) => market.dex_pairs(parse_address(token)?).await?,
                None => market.top_pairs().await?,
            };
            if pairs.is_empty() {
                println!("No pairs found");
            }
            for pair in pairs {
                println!(
                    "{}/{} on {} vol24h ${} price ${}",
                    pair.base_token.symbol,
                    pair.quote_token.symbol,
                    pair.dex_id,
                    pair.volume_24h.round_dp(0),
                    pair.price_usd
                        .map_or_else(|| "n/a".to_string(), |p| p.to_string())
                );
            }
        }
        Command::Subnets { l1_only } => {
            let market = MarketData::new(&config.market, &config.cache)?;
            let subnets = market.l1s().await?;
            for subnet in subnets.iter().filter(|s| s.is_l1 || !l1_only) {
                let chains: Vec<&str> = subnet.chains.iter().map(|c| c.name.as_str()).collect();
                println!(
                    "{} {} [{}]",
                    subnet.subnet_id,
                    if subnet.is_l1 { "L1" } else { "subnet" },
                    chains.join(", ")
                );
            }
        }
        Command::Balance { ref address } => {
            let account = match address {
                Some(address) => parse_address(address)?,
                None => {
                    let signer: alloy::signers::local::PrivateKeySigner =
                        cli.require_private_key()?.trim().parse()?;
                    signer.address()
                }
            };
            let reader = AssetReader::new(
                rpc_client(&config)?,
                parse_address(&config.payment.asset_address)?,
                config.cache.aggregate_ttl(),
                config.cache.price_ttl(),
            );
            let (metadata, balance) = tokio::try_join!(reader.metadata(), reader.balance_of(account))?;
            println!(
                "{account}: {} {}",
                metadata.to_human(balance)?,
                metadata.name
            );
        }
        Command::InitConfig => {
            let path = cli.config_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            config.to_file(&path)?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn rpc_client(config: &AgentConfig) -> color_eyre::Result<RpcClient> {
    if config.chain.rpc_url.is_empty() {
        bail!("--rpc-url (or chain.rpc_url) is required");
    }
    Ok(RpcClient::new(&config.chain.rpc_url, config.chain.rpc_timeout())?)
}

async fn discover(config: &AgentConfig, limit: Option<u64>) -> color_eyre::Result<()> {
    let address = config
        .chain
        .registry_address
        .as_deref()
        .ok_or_else(|| eyre!("--registry (or chain.registry_address) is required"))?;
    let registry = OnChainRegistry::new(rpc_client(config)?, parse_address(address)?);
    let reader = RegistryReader::new(registry);

    let entries = reader
        .discover(limit.unwrap_or(config.chain.discovery_limit))
        .await?;
    if entries.is_empty() {
        println!("No agents found");
    }
    for entry in entries {
        println!("#{:<5} {} {}", entry.id, entry.owner, entry.metadata_uri);
    }
    Ok(())
}

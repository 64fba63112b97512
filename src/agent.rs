//! Agent composition root.
//!
//! Every process-wide service (limiter, caches, gate, readers) is an instance
//! owned by [`RunningAgent`], so tests can build isolated agents side by side.
//! Background maintenance runs as [`PeriodicTask`]s that stop with the agent.

use crate::cache::TtlCache;
use crate::chain::{AssetReader, OnChainRegistry, RegistryEntry, RegistryReader, RpcClient};
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::event::{create_event_channel, AgentEvent, AgentEventsChannel, AgentEventsSender};
use crate::maintenance::PeriodicTask;
use crate::market::MarketData;
use crate::payment::{
    parse_address, AuthorizedPayment, Facilitator, GateRejection, HttpFacilitator, PaymentGate,
    PaymentRequirements, SettlementReceipt,
};
use crate::rate_limit::SlidingWindowLimiter;
use reqwest::header::HeaderMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Why a paid request did not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum RequestDenied {
    /// Refused by the rate limiter before anything else ran.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Time until a slot frees up.
        retry_after: Duration,
    },

    /// No acceptable payment; answer with the rejection's 402 body.
    #[error(transparent)]
    PaymentRequired(#[from] GateRejection),

    /// The handler failed after payment was verified. Nothing was settled.
    #[error("handler failed: {0}")]
    Handler(Error),

    /// The handler ran but settlement failed.
    #[error("settlement failed: {0}")]
    Settlement(Error),
}

/// Result of a served paid request.
#[derive(Debug)]
pub struct PaidResponse<T> {
    /// Handler output.
    pub body: T,
    /// Settlement of the payment that bought it.
    pub receipt: SettlementReceipt,
}

/// Cloneable handle that ends [`RunningAgent::run`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Signal the agent to stop waiting.
    pub fn request_shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Builder for constructing an agent.
pub struct AgentBuilder {
    config: AgentConfig,
}

impl AgentBuilder {
    /// Create a new agent builder with the given configuration.
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Build the agent against the configured HTTP facilitator.
    ///
    /// Must be called inside a Tokio runtime: maintenance tasks start here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn build(self) -> Result<RunningAgent<HttpFacilitator>> {
        self.config.validate()?;
        let facilitator = HttpFacilitator::with_timeout(
            &self.config.payment.facilitator_url,
            self.config.payment.request_timeout(),
        )?;
        self.build_with_facilitator(facilitator)
    }

    /// Build the agent with an explicit facilitator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn build_with_facilitator<F: Facilitator>(self, facilitator: F) -> Result<RunningAgent<F>> {
        let config = self.config;
        config.validate()?;
        info!(
            "Building agent: network={} pay_to={} price={}",
            config.payment.network, config.payment.pay_to, config.payment.price
        );

        let (events_tx, _) = create_event_channel();
        let (shutdown_tx, _) = watch::channel(false);

        let limiter =
            SlidingWindowLimiter::new(config.rate_limit.max_requests, config.rate_limit.window());

        let requirements = PaymentRequirements::from_config(&config.payment)?;
        let gate = PaymentGate::new(facilitator, requirements).with_events(events_tx.clone());

        let market = MarketData::new(&config.market, &config.cache)?;

        let rpc = if config.chain.rpc_url.is_empty() {
            None
        } else {
            Some(RpcClient::new(&config.chain.rpc_url, config.chain.rpc_timeout())?)
        };

        let registry_cache: TtlCache<String, Vec<RegistryEntry>> = TtlCache::with_capacity(
            "registry",
            config.cache.registry_ttl(),
            config.cache.capacity,
        );
        let registry = match (&rpc, &config.chain.registry_address) {
            (Some(rpc), Some(address)) => Some(
                RegistryReader::new(OnChainRegistry::new(rpc.clone(), parse_address(address)?))
                    .with_cache(registry_cache.clone()),
            ),
            _ => None,
        };

        let asset = match rpc {
            Some(rpc) => Some(AssetReader::new(
                rpc,
                parse_address(&config.payment.asset_address)?,
                config.cache.aggregate_ttl(),
                config.cache.price_ttl(),
            )),
            None => None,
        };

        let sweep = config.cache.sweep_interval();
        let mut tasks = vec![limiter.spawn_compaction(config.rate_limit.compaction_interval())];
        tasks.extend(market.spawn_sweepers(sweep));
        if registry.is_some() {
            tasks.push(registry_cache.spawn_sweeper(sweep));
        }
        if let Some(ref asset) = asset {
            tasks.push(asset.balance_cache().spawn_sweeper(sweep));
        }
        debug!("Started {} maintenance tasks", tasks.len());

        let _ = events_tx.send(AgentEvent::Started);

        Ok(RunningAgent {
            config,
            limiter,
            gate: Arc::new(gate),
            market,
            registry,
            asset,
            events_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            tasks,
        })
    }
}

/// A running agent.
pub struct RunningAgent<F> {
    config: AgentConfig,
    limiter: SlidingWindowLimiter,
    gate: Arc<PaymentGate<F>>,
    market: MarketData,
    registry: Option<RegistryReader<OnChainRegistry>>,
    asset: Option<AssetReader>,
    events_tx: AgentEventsSender,
    shutdown_tx: Arc<watch::Sender<bool>>,
    tasks: Vec<PeriodicTask>,
}

impl<F: Facilitator> RunningAgent<F> {
    /// Agent configuration.
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Subscribe to agent events.
    #[must_use]
    pub fn subscribe_events(&self) -> AgentEventsChannel {
        self.events_tx.subscribe()
    }

    /// Inbound rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }

    /// Payment gate for the paid route.
    #[must_use]
    pub fn gate(&self) -> &Arc<PaymentGate<F>> {
        &self.gate
    }

    /// Market data accessor.
    #[must_use]
    pub fn market(&self) -> &MarketData {
        &self.market
    }

    /// Payment asset reader, if an RPC endpoint is configured.
    #[must_use]
    pub fn asset(&self) -> Option<&AssetReader> {
        self.asset.as_ref()
    }

    /// Number of running maintenance tasks.
    #[must_use]
    pub fn maintenance_tasks(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_running()).count()
    }

    /// Admission control stage; runs before any other work for a request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RateLimited`] if `key` has used its window.
    pub fn admit(&self, key: &str) -> Result<()> {
        self.limiter.check(key).inspect_err(|_| {
            debug!("Rate limited {key}");
            let _ = self.events_tx.send(AgentEvent::RateLimited {
                key: key.to_string(),
            });
        })
    }

    /// Serve one paid request: admit, verify payment, run `handler`, settle.
    ///
    /// `handler` runs only after the facilitator has accepted the payment,
    /// and settlement happens only if it succeeds.
    ///
    /// # Errors
    ///
    /// Returns a [`RequestDenied`] naming the stage that stopped the request.
    pub async fn serve_paid<T, H, Fut>(
        &self,
        key: &str,
        headers: &HeaderMap,
        handler: H,
    ) -> std::result::Result<PaidResponse<T>, RequestDenied>
    where
        H: FnOnce(&AuthorizedPayment) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Err(e) = self.admit(key) {
            let retry_after = match e {
                Error::RateLimited { retry_after } => retry_after,
                _ => self.limiter.window(),
            };
            return Err(RequestDenied::RateLimited { retry_after });
        }

        let payment = self.gate.authorize(headers).await?;
        let body = handler(&payment).await.map_err(RequestDenied::Handler)?;
        let receipt = self
            .gate
            .settle(payment)
            .await
            .map_err(RequestDenied::Settlement)?;

        Ok(PaidResponse { body, receipt })
    }

    /// Discover recently registered peer agents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no registry is configured, or the
    /// registry size read error.
    pub async fn discover_peers(&self, limit: u64) -> Result<Vec<RegistryEntry>> {
        let registry = self
            .registry
            .as_ref()
            .ok_or_else(|| Error::Config("chain.registry_address is not set".to_string()))?;
        let peers = registry.discover(limit).await?;
        let _ = self.events_tx.send(AgentEvent::PeersDiscovered { count: peers.len() });
        Ok(peers)
    }

    /// Handle that asks [`run`](Self::run) to return, usable from any task.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Request shutdown; [`run`](Self::run) returns once it sees the request.
    pub fn request_shutdown(&self) {
        self.shutdown_handle().request_shutdown();
    }

    /// Wait for Ctrl-C or a shutdown request.
    ///
    /// Returns without stopping anything; call [`shutdown`](Self::shutdown)
    /// afterwards.
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!("Agent running, waiting for shutdown signal");

        tokio::select! {
            _ = shutdown_rx.wait_for(|stop| *stop) => {
                info!("Shutdown requested");
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {e}");
                } else {
                    info!("Ctrl-C received, initiating shutdown");
                }
            }
        }
    }

    /// Stop every maintenance task and clear shared state.
    pub async fn shutdown(self) {
        let _ = self.events_tx.send(AgentEvent::ShuttingDown);
        for task in self.tasks {
            task.stop().await;
        }
        self.limiter.clear();
        self.market.clear();
        info!("Agent shutdown complete");
    }
}

//! Outbound paid calls.
//!
//! [`PaymentTransport`] attaches a signed authorization to one HTTP request.
//! [`PaidClient`] pairs it with an [`AuthorizationBuilder`] so that every call
//! carries a freshly signed authorization with its own nonce.

use crate::config::PaymentConfig;
use crate::error::{Error, Result};
use crate::payment::authorization::{AuthorizationBuilder, PaymentAuthorization};
use crate::payment::envelope::{PaymentEnvelope, PAYMENT_HEADER};
use crate::payment::facilitator::HttpFacilitator;
use crate::payment::parse_address;
use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound on a single outbound call.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Back-off for a 429 that names none: one default limiter window.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Sends requests carrying an `X-PAYMENT` header.
#[derive(Debug, Clone)]
pub struct PaymentTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl PaymentTransport {
    /// Create a transport with the default 30 s timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a transport with an explicit timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    /// Per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `body` to `endpoint` with `authorization` attached.
    ///
    /// The call is never retried: a retry needs a new authorization.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the call exceeds the timeout
    /// - [`Error::Network`] on connection failure
    /// - [`Error::PaymentRejected`] on HTTP 402
    /// - [`Error::RateLimited`] on HTTP 429, with the peer's back-off hint
    /// - [`Error::Http`] on any other non-2xx status
    pub async fn send(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&serde_json::Value>,
        authorization: &PaymentAuthorization,
        network: &str,
    ) -> Result<serde_json::Value> {
        let header = PaymentEnvelope::from_authorization(authorization, network).encode_header()?;

        debug!(
            "{method} {endpoint} paying {} from {}",
            authorization.amount(),
            authorization.payer()
        );

        let mut request = self
            .client
            .request(method, endpoint)
            .header(PAYMENT_HEADER, header);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&e, self.timeout))?;

        let status = response.status();
        let retry_header = response.headers().get(RETRY_AFTER).cloned();
        let text = response
            .text()
            .await
            .map_err(|e| Error::from_reqwest(&e, self.timeout))?;

        if status == StatusCode::PAYMENT_REQUIRED {
            warn!("{endpoint} rejected payment: {text}");
            return Err(Error::PaymentRejected {
                status: status.as_u16(),
                body: text,
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after(retry_header.as_ref(), &text);
            warn!("{endpoint} rate limited this client, retry after {retry_after:?}");
            return Err(Error::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        // Non-JSON success bodies are passed through as a string.
        Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
    }
}

/// Back-off from a `Retry-After` header (seconds or HTTP date), else the
/// body's `retryAfterMs`, else [`DEFAULT_RETRY_AFTER`].
fn retry_after(header: Option<&HeaderValue>, body: &str) -> Duration {
    let from_header = header
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .and_then(|v| {
            v.parse::<u64>().ok().map(Duration::from_secs).or_else(|| {
                let at = chrono::DateTime::parse_from_rfc2822(v).ok()?;
                (at.with_timezone(&chrono::Utc) - chrono::Utc::now())
                    .to_std()
                    .ok()
            })
        });

    from_header
        .or_else(|| {
            serde_json::from_str::<serde_json::Value>(body)
                .ok()?
                .get("retryAfterMs")?
                .as_u64()
                .map(Duration::from_millis)
        })
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// Client for calling peers' paid endpoints.
pub struct PaidClient {
    builder: AuthorizationBuilder,
    transport: PaymentTransport,
    network: String,
    facilitator: HttpFacilitator,
}

impl PaidClient {
    /// Create a client paying `pay_to` from `private_key` under `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signing`] for an unusable key, [`Error::Validation`]
    /// for bad addresses, or [`Error::Network`] if HTTP clients cannot be built.
    pub fn from_config(private_key: &str, config: &PaymentConfig, pay_to: &str) -> Result<Self> {
        let payee = parse_address(pay_to)?;
        let builder = AuthorizationBuilder::from_config(private_key, config, payee)?;
        let transport = PaymentTransport::with_timeout(config.request_timeout())?;
        let facilitator = HttpFacilitator::new(&config.facilitator_url)?;

        info!("Paid client ready: payer={}", builder.payer());
        Ok(Self::new(builder, transport, &config.network, facilitator))
    }

    /// Assemble a client from its parts.
    #[must_use]
    pub fn new(
        builder: AuthorizationBuilder,
        transport: PaymentTransport,
        network: &str,
        facilitator: HttpFacilitator,
    ) -> Self {
        Self {
            builder,
            transport,
            network: network.to_string(),
            facilitator,
        }
    }

    /// Payer address as a checksummed string.
    #[must_use]
    pub fn payer(&self) -> String {
        self.builder.payer().to_checksum(None)
    }

    /// The authorization builder.
    #[must_use]
    pub fn builder(&self) -> &AuthorizationBuilder {
        &self.builder
    }

    /// Call `url`, paying `amount` with a freshly signed authorization.
    ///
    /// # Errors
    ///
    /// Build failures ([`Error::Validation`], [`Error::Signing`]) fail before
    /// any network traffic; otherwise see [`PaymentTransport::send`].
    pub async fn call(
        &self,
        url: &str,
        method: Method,
        body: Option<&serde_json::Value>,
        amount: Decimal,
    ) -> Result<serde_json::Value> {
        let authorization = self.builder.build(amount)?;
        self.transport
            .send(url, method, body, &authorization, &self.network)
            .await
    }

    /// Build an authorization for `amount` and return the encoded header value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] or [`Error::Signing`] if building fails.
    pub fn sign_header(&self, amount: Decimal) -> Result<String> {
        let authorization = self.builder.build(amount)?;
        PaymentEnvelope::from_authorization(&authorization, &self.network).encode_header()
    }

    /// Whether the configured facilitator is reachable.
    pub async fn check_facilitator(&self) -> bool {
        self.facilitator.is_reachable().await
    }
}

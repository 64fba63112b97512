//! External verification and settlement collaborator.
//!
//! The facilitator checks signatures, validity windows, nonce reuse and
//! balances, and executes the on-chain transfer. This crate treats it as a
//! black box behind the [`Facilitator`] trait.

use crate::error::{Error, Result};
use crate::payment::envelope::{PaymentEnvelope, X402_VERSION};
use crate::payment::gate::PaymentRequirements;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for facilitator calls.
const DEFAULT_FACILITATOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the reachability check.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Body sent to both `verify` and `settle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorRequest {
    /// Protocol version.
    pub x402_version: u32,
    /// The decoded payment envelope.
    pub payment_payload: PaymentEnvelope,
    /// What the route charges.
    pub payment_requirements: PaymentRequirements,
}

impl FacilitatorRequest {
    /// Pair an envelope with the route's requirements.
    #[must_use]
    pub fn new(payment_payload: PaymentEnvelope, payment_requirements: PaymentRequirements) -> Self {
        Self {
            x402_version: X402_VERSION,
            payment_payload,
            payment_requirements,
        }
    }
}

/// Verification verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    /// Whether the payment may be accepted.
    pub is_valid: bool,
    /// Reason when rejected (expired, bad signature, nonce reused, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    /// Payer address as seen by the facilitator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

/// Settlement outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    /// Whether the transfer was executed.
    pub success: bool,
    /// Reason when settlement failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    /// Transaction hash of the transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    /// Network the transfer ran on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Payer address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

/// Verification/settlement contract used by the payment gate.
#[async_trait]
pub trait Facilitator: Send + Sync {
    /// Check a payment against the route's requirements.
    async fn verify(&self, request: &FacilitatorRequest) -> Result<VerifyResponse>;

    /// Execute a previously verified payment.
    async fn settle(&self, request: &FacilitatorRequest) -> Result<SettleResponse>;
}

/// Facilitator reached over HTTP (`POST {url}/verify`, `POST {url}/settle`).
#[derive(Debug, Clone)]
pub struct HttpFacilitator {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpFacilitator {
    /// Create a client for the facilitator at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_FACILITATOR_TIMEOUT)
    }

    /// Create a client with an explicit per-call timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the HTTP client cannot be built.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Facilitator base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the facilitator answers a plain GET with 2xx.
    pub async fn is_reachable(&self) -> bool {
        match self
            .client
            .get(&self.base_url)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("Facilitator {} unreachable: {e}", self.base_url);
                false
            }
        }
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, request: &FacilitatorRequest) -> Result<T> {
        let url = format!("{}/{path}", self.base_url);
        debug!("POST {url}");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&e, self.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::from_reqwest(&e, self.timeout))?;

        // Facilitators may answer a rejected payment with 4xx and a verdict body.
        match serde_json::from_str::<T>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Err(Error::Http {
                status: status.as_u16(),
                body,
            }),
            Err(e) => Err(Error::Serialization(format!(
                "Unexpected facilitator {path} response: {e}"
            ))),
        }
    }
}

#[async_trait]
impl Facilitator for HttpFacilitator {
    async fn verify(&self, request: &FacilitatorRequest) -> Result<VerifyResponse> {
        self.post("verify", request).await
    }

    async fn settle(&self, request: &FacilitatorRequest) -> Result<SettleResponse> {
        self.post("settle", request).await
    }
}

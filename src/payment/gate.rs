//! Inbound payment gate for protected routes.
//!
//! ```text
//! Unauthenticated ──header present & well-formed──► PendingVerification
//!        │                                                 │
//!        │ missing / malformed          facilitator accepts│ declines / unreachable
//!        ▼                                                 ▼
//!     Rejected ◄───────────────────────────────────── Authorized ──handler──► Settled
//! ```
//!
//! The gate keeps no replay state: nonce reuse, expiry and signature checks
//! belong to the facilitator. Protected logic may only run once
//! [`PaymentGate::authorize`] has returned an [`AuthorizedPayment`].

use crate::config::PaymentConfig;
use crate::error::{Error, Result};
use crate::event::{AgentEvent, AgentEventsSender};
use crate::payment::envelope::{PaymentEnvelope, PAYMENT_HEADER, SCHEME_EXACT, X402_VERSION};
use crate::payment::facilitator::{Facilitator, FacilitatorRequest};
use crate::payment::{parse_address, to_base_units};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Seconds the facilitator may take to settle.
const MAX_TIMEOUT_SECONDS: u64 = 60;

/// What a protected route charges, advertised in 402 responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Payment scheme (`exact`).
    pub scheme: String,
    /// Network identifier.
    pub network: String,
    /// Price in smallest units, decimal string.
    pub max_amount_required: String,
    /// Protected resource.
    pub resource: String,
    /// Human description.
    pub description: String,
    /// Response content type.
    pub mime_type: String,
    /// Recipient address.
    pub pay_to: String,
    /// Settlement deadline.
    pub max_timeout_seconds: u64,
    /// Asset contract address.
    pub asset: String,
    /// Asset EIP-712 name/version for the payer's signer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl PaymentRequirements {
    /// Requirements for the configured paid route.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the price or addresses are invalid.
    pub fn from_config(config: &PaymentConfig) -> Result<Self> {
        let amount = to_base_units(config.price, config.asset_decimals)?;
        let asset = parse_address(&config.asset_address)?;
        let pay_to = parse_address(&config.pay_to)?;

        Ok(Self {
            scheme: SCHEME_EXACT.to_string(),
            network: config.network.clone(),
            max_amount_required: amount.to_string(),
            resource: config.resource.clone(),
            description: config.description.clone(),
            mime_type: "application/json".to_string(),
            pay_to: pay_to.to_checksum(None),
            max_timeout_seconds: MAX_TIMEOUT_SECONDS,
            asset: asset.to_checksum(None),
            extra: Some(serde_json::json!({
                "name": config.asset_name,
                "version": config.asset_version,
            })),
        })
    }
}

/// Gate state for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// No payment seen yet.
    Unauthenticated,
    /// Well-formed payment sent to the facilitator.
    PendingVerification,
    /// Facilitator accepted; the handler may run.
    Authorized,
    /// Payment settled after the handler ran.
    Settled,
    /// Denied with a payment-required response.
    Rejected,
}

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// No `X-PAYMENT` header.
    MissingHeader,
    /// Header present but not a well-formed envelope.
    Malformed(String),
    /// Envelope targets another network, asset, recipient or amount.
    RequirementMismatch(String),
    /// Facilitator declined the payment.
    Declined(String),
    /// Facilitator could not be reached; fail closed.
    VerifierUnavailable(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHeader => write!(f, "{PAYMENT_HEADER} header is required"),
            Self::Malformed(msg) => write!(f, "malformed payment: {msg}"),
            Self::RequirementMismatch(msg) => write!(f, "payment does not match requirements: {msg}"),
            Self::Declined(msg) => write!(f, "payment declined: {msg}"),
            Self::VerifierUnavailable(msg) => write!(f, "payment verifier unavailable: {msg}"),
        }
    }
}

/// A denied request, renderable as an HTTP 402 response.
#[derive(Debug, Clone, thiserror::Error)]
#[error("payment required: {reason}")]
pub struct GateRejection {
    /// Why the request was denied.
    pub reason: RejectReason,
    requirements: PaymentRequirements,
}

impl GateRejection {
    /// HTTP status to answer with.
    #[must_use]
    pub fn status(&self) -> u16 {
        402
    }

    /// JSON body listing what the route accepts.
    #[must_use]
    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "x402Version": X402_VERSION,
            "error": self.reason.to_string(),
            "accepts": [self.requirements],
        })
    }
}

/// A payment the facilitator accepted.
///
/// Consumed by [`PaymentGate::settle`]; it cannot be settled twice.
#[derive(Debug)]
pub struct AuthorizedPayment {
    envelope: PaymentEnvelope,
    payer: String,
    state: GateState,
}

impl AuthorizedPayment {
    /// Payer address.
    #[must_use]
    pub fn payer(&self) -> &str {
        &self.payer
    }

    /// Amount in smallest units.
    #[must_use]
    pub fn amount(&self) -> &str {
        &self.envelope.amount
    }

    /// The verified envelope.
    #[must_use]
    pub fn envelope(&self) -> &PaymentEnvelope {
        &self.envelope
    }

    /// Always [`GateState::Authorized`].
    #[must_use]
    pub fn state(&self) -> GateState {
        self.state
    }
}

/// Result of settling an authorized payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    /// Transaction hash, if reported.
    pub transaction: Option<String>,
    /// Network, if reported.
    pub network: Option<String>,
    /// Payer address.
    pub payer: String,
    /// Always [`GateState::Settled`].
    pub state: GateState,
}

/// Payment gate for one protected route.
pub struct PaymentGate<F> {
    facilitator: F,
    requirements: PaymentRequirements,
    events: Option<AgentEventsSender>,
}

impl<F: Facilitator> PaymentGate<F> {
    /// Create a gate charging `requirements`, verified by `facilitator`.
    #[must_use]
    pub fn new(facilitator: F, requirements: PaymentRequirements) -> Self {
        Self {
            facilitator,
            requirements,
            events: None,
        }
    }

    /// Emit gate outcomes on an agent event channel.
    #[must_use]
    pub fn with_events(mut self, events: AgentEventsSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Advertised requirements.
    #[must_use]
    pub fn requirements(&self) -> &PaymentRequirements {
        &self.requirements
    }

    /// The underlying facilitator.
    #[must_use]
    pub fn facilitator(&self) -> &F {
        &self.facilitator
    }

    /// Extract and verify the payment carried by `headers`.
    ///
    /// # Errors
    ///
    /// Returns a [`GateRejection`] for a missing or malformed header, a
    /// mismatch with the requirements, a facilitator decline, or an
    /// unreachable facilitator.
    pub async fn authorize(&self, headers: &HeaderMap) -> std::result::Result<AuthorizedPayment, GateRejection> {
        let mut state = GateState::Unauthenticated;

        let envelope = match self.extract(headers) {
            Ok(envelope) => envelope,
            Err(reason) => return Err(self.reject(state, reason)),
        };

        if let Err(reason) = self.check_requirements(&envelope) {
            return Err(self.reject(state, reason));
        }

        state = GateState::PendingVerification;
        debug!(
            "Payment from {} pending verification",
            envelope.payload.payload.from
        );

        let request = FacilitatorRequest::new(envelope, self.requirements.clone());
        let verdict = match self.facilitator.verify(&request).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Facilitator verify failed: {e}");
                return Err(self.reject(state, RejectReason::VerifierUnavailable(e.to_string())));
            }
        };

        if !verdict.is_valid {
            let reason = verdict
                .invalid_reason
                .unwrap_or_else(|| "unspecified".to_string());
            return Err(self.reject(state, RejectReason::Declined(reason)));
        }

        let envelope = request.payment_payload;
        let payer = verdict
            .payer
            .unwrap_or_else(|| envelope.payload.payload.from.clone());

        info!("Payment verified: payer={payer} amount={}", envelope.amount);
        self.emit(AgentEvent::PaymentVerified {
            payer: payer.clone(),
            amount: envelope.amount.clone(),
        });

        Ok(AuthorizedPayment {
            envelope,
            payer,
            state: GateState::Authorized,
        })
    }

    /// Settle an authorized payment once the handler has produced its result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PaymentRejected`] if the facilitator refuses to
    /// settle, or the facilitator's transport error.
    pub async fn settle(&self, payment: AuthorizedPayment) -> Result<SettlementReceipt> {
        let AuthorizedPayment { envelope, payer, .. } = payment;
        let request = FacilitatorRequest::new(envelope, self.requirements.clone());
        let response = self.facilitator.settle(&request).await?;

        if !response.success {
            let reason = response
                .error_reason
                .unwrap_or_else(|| "settlement failed".to_string());
            warn!("Settlement failed for {payer}: {reason}");
            self.emit(AgentEvent::PaymentRejected {
                reason: reason.clone(),
            });
            return Err(Error::PaymentRejected {
                status: 402,
                body: reason,
            });
        }

        info!(
            "Payment settled: payer={payer} tx={}",
            response.transaction.as_deref().unwrap_or("-")
        );
        self.emit(AgentEvent::PaymentSettled {
            transaction: response.transaction.clone(),
        });

        Ok(SettlementReceipt {
            transaction: response.transaction,
            network: response.network,
            payer,
            state: GateState::Settled,
        })
    }

    /// The rejection sent when a request arrives without any payment.
    #[must_use]
    pub fn payment_required(&self) -> GateRejection {
        GateRejection {
            reason: RejectReason::MissingHeader,
            requirements: self.requirements.clone(),
        }
    }

    fn extract(&self, headers: &HeaderMap) -> std::result::Result<PaymentEnvelope, RejectReason> {
        let value = headers
            .get(PAYMENT_HEADER)
            .ok_or(RejectReason::MissingHeader)?
            .to_str()
            .map_err(|e| RejectReason::Malformed(format!("header is not ASCII: {e}")))?;

        let envelope = PaymentEnvelope::decode_header(value)
            .map_err(|e| RejectReason::Malformed(e.to_string()))?;
        envelope
            .check_well_formed()
            .map_err(|e| RejectReason::Malformed(e.to_string()))?;
        Ok(envelope)
    }

    fn check_requirements(&self, envelope: &PaymentEnvelope) -> std::result::Result<(), RejectReason> {
        let inner = &envelope.payload.payload;
        let reqs = &self.requirements;

        if inner.network != reqs.network {
            return Err(RejectReason::RequirementMismatch(format!(
                "network {} != {}",
                inner.network, reqs.network
            )));
        }
        if !inner.asset.eq_ignore_ascii_case(&reqs.asset) {
            return Err(RejectReason::RequirementMismatch(format!(
                "asset {} != {}",
                inner.asset, reqs.asset
            )));
        }
        if !inner.to.eq_ignore_ascii_case(&reqs.pay_to) {
            return Err(RejectReason::RequirementMismatch(format!(
                "recipient {} != {}",
                inner.to, reqs.pay_to
            )));
        }
        if inner.amount != reqs.max_amount_required {
            return Err(RejectReason::RequirementMismatch(format!(
                "amount {} != {}",
                inner.amount, reqs.max_amount_required
            )));
        }
        Ok(())
    }

    fn reject(&self, from: GateState, reason: RejectReason) -> GateRejection {
        debug!("Gate {from:?} -> {:?}: {reason}", GateState::Rejected);
        self.emit(AgentEvent::PaymentRejected {
            reason: reason.to_string(),
        });
        GateRejection {
            reason,
            requirements: self.requirements.clone(),
        }
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(ref events) = self.events {
            let _ = events.send(event);
        }
    }
}

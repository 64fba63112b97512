//! Payment authorization protocol for paid agent-to-agent calls.
//!
//! Outbound, a caller signs a one-time `TransferWithAuthorization` and sends
//! it in the `X-PAYMENT` header. Inbound, the gate extracts that header and
//! asks an external facilitator to verify it before the route runs.
//!
//! # Architecture
//!
//! ```text
//! Caller                                      Peer
//! ──────                                      ────
//! AuthorizationBuilder::build(amount)
//!        │ (EIP-712 sign, fresh nonce)
//!        ▼
//! PaymentEnvelope ── base64 ──► X-PAYMENT ──► PaymentGate::authorize
//!                                                   │
//!                                      ┌────────────┴────────────┐
//!                                      │                         │
//!                               malformed/missing        Facilitator::verify
//!                                      │                  ┌──────┴──────┐
//!                                      ▼                  │             │
//!                                   402 + reqs         accepted      declined
//!                                                         │             │
//!                                                      handler        402
//!                                                         │
//!                                               Facilitator::settle
//! ```

mod amount;
mod authorization;
mod envelope;
mod facilitator;
mod gate;
mod transport;

pub use amount::to_base_units;
pub use authorization::{AssetDomain, AuthorizationBuilder, PaymentAuthorization};
pub use envelope::{
    ExactPayload, PaymentEnvelope, SignedPayload, PAYMENT_HEADER, SCHEME_EXACT, X402_VERSION,
};
pub use facilitator::{
    Facilitator, FacilitatorRequest, HttpFacilitator, SettleResponse, VerifyResponse,
};
pub use gate::{
    AuthorizedPayment, GateRejection, GateState, PaymentGate, PaymentRequirements,
    RejectReason, SettlementReceipt,
};
pub use transport::{PaidClient, PaymentTransport};

use crate::error::{Error, Result};
use alloy::primitives::Address;
use std::str::FromStr;

/// Parse an EVM address string (`0x` + 40 hex characters).
///
/// # Errors
///
/// Returns [`Error::Validation`] if the address format is invalid.
pub fn parse_address(address: &str) -> Result<Address> {
    if !address.starts_with("0x") && !address.starts_with("0X") {
        return Err(Error::Validation(format!(
            "Invalid address format: must start with '0x', got: {address:?}"
        )));
    }

    if address.len() != 42 {
        return Err(Error::Validation(format!(
            "Invalid address length: expected 42 characters, got {}",
            address.len()
        )));
    }

    if !address[2..].chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::Validation(format!(
            "Invalid address: contains non-hex characters: {address}"
        )));
    }

    Address::from_str(address)
        .map_err(|e| Error::Validation(format!("Failed to decode address: {e}")))
}

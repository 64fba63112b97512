//! The `X-PAYMENT` header envelope.
//!
//! An authorization plus protocol metadata is serialized to JSON and encoded
//! as standard base64 so it survives any intermediary that forwards headers.

use crate::error::{Error, Result};
use crate::payment::authorization::PaymentAuthorization;
use crate::payment::parse_address;
use alloy::primitives::U256;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Request header carrying the encoded envelope.
pub const PAYMENT_HEADER: &str = "X-PAYMENT";

/// Protocol version written into every envelope.
pub const X402_VERSION: u32 = 1;

/// The only supported scheme: pay exactly the stated amount.
pub const SCHEME_EXACT: &str = "exact";

/// Top-level payment envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEnvelope {
    /// Protocol version.
    pub x402_version: u32,
    /// Signature and the signed fields.
    pub payload: SignedPayload,
    /// Network identifier.
    pub network: String,
    /// Asset contract address.
    pub asset: String,
    /// Amount in smallest units, decimal string.
    pub amount: String,
}

/// Signature over [`ExactPayload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    /// 65-byte hex signature.
    pub signature: String,
    /// Signed transfer fields.
    pub payload: ExactPayload,
}

/// Signed transfer fields for the `exact` scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactPayload {
    /// Always `exact`.
    pub scheme: String,
    /// Network identifier.
    pub network: String,
    /// Asset contract address.
    pub asset: String,
    /// Payer address.
    pub from: String,
    /// Payee address.
    pub to: String,
    /// Amount in smallest units, decimal string.
    pub amount: String,
    /// Start of validity (Unix seconds).
    pub valid_after: u64,
    /// End of validity (Unix seconds).
    pub valid_before: u64,
    /// 32-byte hex nonce.
    pub nonce: String,
}

impl PaymentEnvelope {
    /// Wrap a signed authorization for `network`.
    #[must_use]
    pub fn from_authorization(authorization: &PaymentAuthorization, network: &str) -> Self {
        let asset = authorization.asset().to_checksum(None);
        let amount = authorization.amount().to_string();

        Self {
            x402_version: X402_VERSION,
            payload: SignedPayload {
                signature: authorization.signature_hex(),
                payload: ExactPayload {
                    scheme: SCHEME_EXACT.to_string(),
                    network: network.to_string(),
                    asset: asset.clone(),
                    from: authorization.payer().to_checksum(None),
                    to: authorization.payee().to_checksum(None),
                    amount: amount.clone(),
                    valid_after: authorization.valid_after(),
                    valid_before: authorization.valid_before(),
                    nonce: authorization.nonce_hex(),
                },
            },
            network: network.to_string(),
            asset,
            amount,
        }
    }

    /// Encode as a header value: base64 of the JSON envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if JSON encoding fails.
    pub fn encode_header(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(BASE64.encode(json))
    }

    /// Decode a header value produced by [`encode_header`](Self::encode_header).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the value is not base64 or not a
    /// well-formed envelope.
    pub fn decode_header(value: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(value.trim())
            .map_err(|e| Error::Validation(format!("Payment header is not base64: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Validation(format!("Payment header is not a valid envelope: {e}")))
    }

    /// Structural checks that need no network or key material.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] describing the first malformed field.
    pub fn check_well_formed(&self) -> Result<()> {
        let inner = &self.payload.payload;

        if inner.scheme != SCHEME_EXACT {
            return Err(Error::Validation(format!(
                "Unsupported scheme {:?}",
                inner.scheme
            )));
        }
        if inner.network != self.network {
            return Err(Error::Validation(
                "Envelope network does not match signed payload".to_string(),
            ));
        }
        if !inner.asset.eq_ignore_ascii_case(&self.asset) || inner.amount != self.amount {
            return Err(Error::Validation(
                "Envelope asset/amount do not match signed payload".to_string(),
            ));
        }

        parse_address(&inner.asset)?;
        parse_address(&inner.from)?;
        parse_address(&inner.to)?;

        let amount = U256::from_str(&inner.amount)
            .map_err(|e| Error::Validation(format!("Invalid amount {:?}: {e}", inner.amount)))?;
        if amount.is_zero() {
            return Err(Error::Validation("Amount must be positive".to_string()));
        }

        if inner.valid_before <= inner.valid_after {
            return Err(Error::Validation(
                "validBefore must be after validAfter".to_string(),
            ));
        }

        check_hex_len("nonce", &inner.nonce, 32)?;
        check_hex_len("signature", &self.payload.signature, 65)?;
        Ok(())
    }
}

fn check_hex_len(field: &str, value: &str, expected: usize) -> Result<()> {
    let stripped = value
        .strip_prefix("0x")
        .ok_or_else(|| Error::Validation(format!("{field} must be 0x-prefixed hex")))?;
    let bytes = hex::decode(stripped)
        .map_err(|e| Error::Validation(format!("{field} is not hex: {e}")))?;
    if bytes.len() != expected {
        return Err(Error::Validation(format!(
            "{field} must be {expected} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

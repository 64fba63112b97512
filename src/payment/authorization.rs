//! Signed one-time transfer authorizations (ERC-3009 over EIP-712).
//!
//! An authorization says "payer approves payee to pull `amount` of one asset,
//! redeemable once within `[valid_after, valid_before]`, identified by
//! `nonce`". The signature binds it to the asset contract, its domain name and
//! version, and the chain id, so it cannot be replayed against another asset
//! or chain.

use crate::config::PaymentConfig;
use crate::error::{Error, Result};
use crate::payment::amount::to_base_units;
use crate::payment::parse_address;
use alloy::primitives::{Address, PrimitiveSignature, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol_types::{Eip712Domain, SolStruct};
use rand::rngs::OsRng;
use rand::RngCore;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

alloy::sol! {
    /// ERC-3009 typed message. Field order is part of the type hash.
    #[derive(Debug)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

/// Default authorization lifetime.
pub const DEFAULT_AUTHORIZATION_TTL: Duration = Duration::from_secs(3600);

/// Default asset decimals (USDC).
pub const DEFAULT_ASSET_DECIMALS: u32 = 6;

/// EIP-712 domain of the asset contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDomain {
    /// Asset display name (e.g. `USD Coin`).
    pub name: String,
    /// Asset domain version (e.g. `2`).
    pub version: String,
    /// Chain id.
    pub chain_id: u64,
    /// Asset contract address.
    pub verifying_contract: Address,
}

impl AssetDomain {
    /// Build the domain from payment configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the asset address is malformed.
    pub fn from_config(config: &PaymentConfig) -> Result<Self> {
        Ok(Self {
            name: config.asset_name.clone(),
            version: config.asset_version.clone(),
            chain_id: config.chain_id,
            verifying_contract: parse_address(&config.asset_address)?,
        })
    }

    /// The EIP-712 domain separator input.
    #[must_use]
    pub fn eip712_domain(&self) -> Eip712Domain {
        Eip712Domain::new(
            Some(self.name.clone().into()),
            Some(self.version.clone().into()),
            Some(U256::from(self.chain_id)),
            Some(self.verifying_contract),
            None,
        )
    }
}

/// A signed, immutable transfer authorization.
///
/// Built fresh for every outbound paid call and discarded afterwards.
#[derive(Debug, Clone)]
pub struct PaymentAuthorization {
    payer: Address,
    payee: Address,
    asset: Address,
    amount: U256,
    valid_after: u64,
    valid_before: u64,
    nonce: B256,
    signature: PrimitiveSignature,
}

impl PaymentAuthorization {
    /// Address that signed and pays.
    #[must_use]
    pub fn payer(&self) -> Address {
        self.payer
    }

    /// Address allowed to pull the funds.
    #[must_use]
    pub fn payee(&self) -> Address {
        self.payee
    }

    /// Asset contract address.
    #[must_use]
    pub fn asset(&self) -> Address {
        self.asset
    }

    /// Amount in the asset's smallest unit.
    #[must_use]
    pub fn amount(&self) -> U256 {
        self.amount
    }

    /// Start of validity (Unix seconds).
    #[must_use]
    pub fn valid_after(&self) -> u64 {
        self.valid_after
    }

    /// End of validity (Unix seconds).
    #[must_use]
    pub fn valid_before(&self) -> u64 {
        self.valid_before
    }

    /// Single-use nonce.
    #[must_use]
    pub fn nonce(&self) -> B256 {
        self.nonce
    }

    /// Nonce as `0x`-prefixed hex.
    #[must_use]
    pub fn nonce_hex(&self) -> String {
        format!("0x{}", hex::encode(self.nonce))
    }

    /// 65-byte `r || s || v` signature as `0x`-prefixed hex.
    #[must_use]
    pub fn signature_hex(&self) -> String {
        format!("0x{}", hex::encode(self.signature.as_bytes()))
    }

    fn typed_message(&self) -> TransferWithAuthorization {
        TransferWithAuthorization {
            from: self.payer,
            to: self.payee,
            value: self.amount,
            validAfter: U256::from(self.valid_after),
            validBefore: U256::from(self.valid_before),
            nonce: self.nonce,
        }
    }

    /// The EIP-712 digest this authorization signs under `domain`.
    #[must_use]
    pub fn signing_hash(&self, domain: &AssetDomain) -> B256 {
        self.typed_message()
            .eip712_signing_hash(&domain.eip712_domain())
    }

    /// Recover the signer under `domain`.
    ///
    /// Equals [`payer`](Self::payer) only when `domain` is the one it was
    /// signed for.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the signature cannot be recovered.
    pub fn recover_payer(&self, domain: &AssetDomain) -> Result<Address> {
        self.signature
            .recover_address_from_prehash(&self.signing_hash(domain))
            .map_err(|e| Error::Validation(format!("Signature recovery failed: {e}")))
    }
}

/// Builds signed authorizations for one payer, asset and payee.
#[derive(Debug, Clone)]
pub struct AuthorizationBuilder {
    signer: PrivateKeySigner,
    domain: AssetDomain,
    payee: Address,
    decimals: u32,
    ttl: Duration,
}

impl AuthorizationBuilder {
    /// Create a builder with the default TTL (one hour) and 6 decimals.
    #[must_use]
    pub fn new(signer: PrivateKeySigner, domain: AssetDomain, payee: Address) -> Self {
        Self {
            signer,
            domain,
            payee,
            decimals: DEFAULT_ASSET_DECIMALS,
            ttl: DEFAULT_AUTHORIZATION_TTL,
        }
    }

    /// Create a builder from a hex private key and payment configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signing`] if the key is invalid, or
    /// [`Error::Validation`] if configured addresses are malformed.
    pub fn from_config(private_key: &str, config: &PaymentConfig, payee: Address) -> Result<Self> {
        let signer = PrivateKeySigner::from_str(private_key.trim())
            .map_err(|e| Error::Signing(format!("Invalid private key: {e}")))?;
        Ok(Self::new(signer, AssetDomain::from_config(config)?, payee)
            .with_decimals(config.asset_decimals)
            .with_ttl(config.authorization_ttl()))
    }

    /// Set the validity horizon.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the asset decimals used to scale amounts.
    #[must_use]
    pub fn with_decimals(mut self, decimals: u32) -> Self {
        self.decimals = decimals;
        self
    }

    /// Address of the signing key.
    #[must_use]
    pub fn payer(&self) -> Address {
        self.signer.address()
    }

    /// Configured payee.
    #[must_use]
    pub fn payee(&self) -> Address {
        self.payee
    }

    /// Asset domain signatures are bound to.
    #[must_use]
    pub fn domain(&self) -> &AssetDomain {
        &self.domain
    }

    /// Configured validity horizon.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Build a fresh authorization valid from now for the configured TTL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a bad amount and [`Error::Signing`]
    /// if signing fails. A failed build must not be retried with the same
    /// nonce; call `build` again.
    pub fn build(&self, amount: Decimal) -> Result<PaymentAuthorization> {
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        self.build_at(amount, now)
    }

    /// Build an authorization as if the current time were `now` (Unix seconds).
    ///
    /// # Errors
    ///
    /// Same as [`build`](Self::build).
    pub fn build_at(&self, amount: Decimal, now: u64) -> Result<PaymentAuthorization> {
        let amount = to_base_units(amount, self.decimals)?;
        let valid_after = 0;
        let valid_before = now.saturating_add(self.ttl.as_secs());
        if valid_before <= valid_after {
            return Err(Error::Validation(
                "Authorization window is empty".to_string(),
            ));
        }

        let payer = self.signer.address();
        let nonce = random_nonce();
        let message = TransferWithAuthorization {
            from: payer,
            to: self.payee,
            value: amount,
            validAfter: U256::from(valid_after),
            validBefore: U256::from(valid_before),
            nonce,
        };
        let hash = message.eip712_signing_hash(&self.domain.eip712_domain());
        let signature = self
            .signer
            .sign_hash_sync(&hash)
            .map_err(|e| Error::Signing(format!("Failed to sign authorization: {e}")))?;

        let authorization = PaymentAuthorization {
            payer,
            payee: self.payee,
            asset: self.domain.verifying_contract,
            amount,
            valid_after,
            valid_before,
            nonce,
            signature,
        };

        debug!(
            "Built authorization payer={} payee={} amount={} valid_before={}",
            authorization.payer, authorization.payee, authorization.amount, valid_before
        );

        Ok(authorization)
    }
}

/// 32 bytes from the OS CSPRNG.
fn random_nonce() -> B256 {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    B256::from(bytes)
}

//! Read-only on-chain access over JSON-RPC.
//!
//! Only `eth_call` is used: this crate never sends transactions. Calldata and
//! return values are ABI-encoded with `alloy` `sol!` bindings.

mod asset;
mod registry;

pub use asset::{AssetMetadata, AssetReader};
pub use registry::{OnChainRegistry, RegistryEntry, RegistryReadResult, RegistryReader, RegistrySource};

use crate::error::{Error, Result};
use alloy::primitives::{Address, Bytes};
use alloy::sol_types::SolCall;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// JSON-RPC response envelope.
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Minimal JSON-RPC client for `eth_call`.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    /// Create a client for the node at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the HTTP client cannot be built.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Node URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run `call` against `to` at the latest block and decode its return value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if the node reports an error (including a
    /// revert) or the result cannot be decoded, and transport errors as
    /// [`Error::Network`]/[`Error::Timeout`].
    pub async fn call<C: SolCall>(&self, to: Address, call: &C) -> Result<C::Return> {
        let data = Bytes::from(call.abi_encode());
        let raw = self.eth_call(to, &data).await?;
        C::abi_decode_returns(&raw, true)
            .map_err(|e| Error::Rpc(format!("{} returned undecodable data: {e}", C::SIGNATURE)))
    }

    async fn eth_call(&self, to: Address, data: &Bytes) -> Result<Vec<u8>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "eth_call",
            "params": [
                { "to": to.to_checksum(None), "data": format!("0x{}", hex::encode(data)) },
                "latest"
            ],
        });

        debug!("eth_call #{id} to {to}");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| Error::Rpc(format!("Invalid JSON-RPC response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(Error::Rpc(format!("{} (code {})", err.message, err.code)));
        }

        let result = parsed
            .result
            .ok_or_else(|| Error::Rpc("JSON-RPC response has no result".to_string()))?;
        let stripped = result.strip_prefix("0x").unwrap_or(&result);
        hex::decode(stripped).map_err(|e| Error::Rpc(format!("Result is not hex: {e}")))
    }
}

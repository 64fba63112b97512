//! Test harness that runs in-process peers, facilitator and JSON-RPC node.
//!
//! Every service binds `127.0.0.1:0`, so tests can run in parallel without
//! port coordination.

use a2a_paygate::{
    AgentBuilder, AgentConfig, HttpFacilitator, PaymentConfig, RequestDenied, RunningAgent,
};
use alloy::primitives::{Address, U256};
use alloy::sol_types::SolCall;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Anvil's first dev account.
pub const PAYER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Address of [`PAYER_KEY`].
pub const PAYER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

/// Recipient of the peer's paid route.
pub const PEER_PAY_TO: &str = "0x7C599af5Dce814B13CD0c66F9C783Dd1e4C69Ae8";

/// Network used throughout.
pub const NETWORK: &str = "avalanche-fuji";

/// Serve `router` on an ephemeral local port.
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    addr
}

/// A local address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    listener.local_addr().expect("local addr")
}

// ---------------------------------------------------------------------------
// Facilitator
// ---------------------------------------------------------------------------

/// Observable state of the fake facilitator.
#[derive(Default)]
pub struct FacilitatorState {
    /// `/verify` calls received.
    pub verify_calls: AtomicUsize,
    /// `/settle` calls received.
    pub settle_calls: AtomicUsize,
    /// Nonces already verified, to reject replays.
    seen_nonces: Mutex<HashSet<String>>,
    /// Payers whose balance is treated as insufficient.
    pub broke_payers: Mutex<HashSet<String>>,
}

/// Facilitator that accepts fresh nonces from funded payers.
pub struct TestFacilitator {
    /// Base URL.
    pub url: String,
    /// Shared counters.
    pub state: Arc<FacilitatorState>,
}

impl TestFacilitator {
    /// Start a facilitator.
    pub async fn start() -> Self {
        let state = Arc::new(FacilitatorState::default());
        let router = Router::new()
            .route("/", get(|| async { "ok" }))
            .route("/verify", post(verify))
            .route("/settle", post(settle))
            .with_state(Arc::clone(&state));
        let addr = spawn_server(router).await;
        info!("Test facilitator on {addr}");
        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    /// Treat `payer` as unable to cover any payment.
    pub fn mark_broke(&self, payer: &str) {
        self.state.broke_payers.lock().insert(payer.to_lowercase());
    }

    /// Verify calls so far.
    pub fn verify_calls(&self) -> usize {
        self.state.verify_calls.load(Ordering::SeqCst)
    }

    /// Settle calls so far.
    pub fn settle_calls(&self) -> usize {
        self.state.settle_calls.load(Ordering::SeqCst)
    }
}

fn payer_and_nonce(body: &Value) -> (String, String) {
    let inner = &body["paymentPayload"]["payload"]["payload"];
    (
        inner["from"].as_str().unwrap_or_default().to_lowercase(),
        inner["nonce"].as_str().unwrap_or_default().to_string(),
    )
}

async fn verify(State(state): State<Arc<FacilitatorState>>, Json(body): Json<Value>) -> Json<Value> {
    state.verify_calls.fetch_add(1, Ordering::SeqCst);
    let (payer, nonce) = payer_and_nonce(&body);

    if state.broke_payers.lock().contains(&payer) {
        return Json(json!({ "isValid": false, "invalidReason": "insufficient_funds", "payer": payer }));
    }
    if !state.seen_nonces.lock().insert(nonce) {
        return Json(json!({ "isValid": false, "invalidReason": "nonce_already_used", "payer": payer }));
    }
    Json(json!({ "isValid": true, "payer": payer }))
}

async fn settle(State(state): State<Arc<FacilitatorState>>, Json(body): Json<Value>) -> Json<Value> {
    let n = state.settle_calls.fetch_add(1, Ordering::SeqCst);
    let (payer, _) = payer_and_nonce(&body);
    Json(json!({
        "success": true,
        "transaction": format!("0x{:064x}", n + 1),
        "network": NETWORK,
        "payer": payer,
    }))
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

/// Agent configuration charging 0.01 USDC, verified by `facilitator_url`.
pub fn peer_config(facilitator_url: &str) -> AgentConfig {
    AgentConfig {
        payment: PaymentConfig {
            facilitator_url: facilitator_url.to_string(),
            description: "Avalanche guide".to_string(),
            ..PaymentConfig::fuji_testnet(PEER_PAY_TO)
        },
        ..AgentConfig::default()
    }
}

/// Observable state of a peer.
pub struct PeerState {
    /// The agent serving the paid route.
    pub agent: RunningAgent<HttpFacilitator>,
    /// Times the protected handler ran.
    pub handler_runs: AtomicUsize,
}

/// A peer agent exposing one paid route plus failure routes.
pub struct TestPeer {
    /// Base URL.
    pub url: String,
    /// Shared state.
    pub state: Arc<PeerState>,
}

impl TestPeer {
    /// Start a peer with `config`.
    pub async fn start(config: AgentConfig) -> Self {
        let agent = AgentBuilder::new(config).build().expect("agent");
        let state = Arc::new(PeerState {
            agent,
            handler_runs: AtomicUsize::new(0),
        });
        let router = Router::new()
            .route("/a2a/guide", post(paid_guide))
            .route("/slow", get(slow))
            .route("/broken", get(broken))
            .with_state(Arc::clone(&state));
        let addr = spawn_server(router).await;
        info!("Test peer on {addr}");
        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    /// URL of the paid route.
    pub fn paid_url(&self) -> String {
        format!("{}/a2a/guide", self.url)
    }

    /// Times the protected handler ran.
    pub fn handler_runs(&self) -> usize {
        self.state.handler_runs.load(Ordering::SeqCst)
    }
}

async fn paid_guide(
    State(state): State<Arc<PeerState>>,
    headers: HeaderMap,
    Json(question): Json<Value>,
) -> Response {
    let outcome = state
        .agent
        .serve_paid("test-client", &headers, |payment| {
            state.handler_runs.fetch_add(1, Ordering::SeqCst);
            let answer = json!({
                "question": question["question"],
                "answer": "Use the C-Chain for EVM contracts.",
                "paidBy": payment.payer(),
            });
            async move { Ok(answer) }
        })
        .await;

    match outcome {
        Ok(paid) => Json(json!({
            "result": paid.body,
            "transaction": paid.receipt.transaction,
        }))
        .into_response(),
        Err(RequestDenied::RateLimited { retry_after }) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "rate limited", "retryAfterMs": retry_after.as_millis() })),
        )
            .into_response(),
        Err(RequestDenied::PaymentRequired(rejection)) => {
            (StatusCode::PAYMENT_REQUIRED, Json(rejection.body())).into_response()
        }
        Err(RequestDenied::Settlement(e)) => (
            StatusCode::PAYMENT_REQUIRED,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
        Err(RequestDenied::Handler(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "too late"
}

async fn broken() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded")
}

// ---------------------------------------------------------------------------
// JSON-RPC node
// ---------------------------------------------------------------------------

alloy::sol! {
    interface ITestRegistry {
        function totalSupply() external view returns (uint256 supply);
        function tokenURI(uint256 tokenId) external view returns (string uri);
        function ownerOf(uint256 tokenId) external view returns (address owner);
    }
}

/// Registry contents served by [`TestRpcNode`].
pub struct RegistryState {
    /// Ids ever minted.
    pub total: u64,
    /// Burned ids.
    pub burned: HashSet<u64>,
    /// `eth_call` requests received.
    pub calls: AtomicUsize,
}

/// JSON-RPC node answering registry `eth_call`s.
pub struct TestRpcNode {
    /// RPC URL.
    pub url: String,
    /// Shared state.
    pub state: Arc<RegistryState>,
}

impl TestRpcNode {
    /// Start a node holding `total` ids with `burned` removed.
    pub async fn start(total: u64, burned: &[u64]) -> Self {
        let state = Arc::new(RegistryState {
            total,
            burned: burned.iter().copied().collect(),
            calls: AtomicUsize::new(0),
        });
        let router = Router::new()
            .route("/", post(rpc))
            .with_state(Arc::clone(&state));
        let addr = spawn_server(router).await;
        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    /// Owner recorded for `id`.
    pub fn owner_of(id: u64) -> Address {
        Address::with_last_byte(u8::try_from(id % 256).unwrap_or_default())
    }
}

async fn rpc(State(state): State<Arc<RegistryState>>, Json(request): Json<Value>) -> Json<Value> {
    state.calls.fetch_add(1, Ordering::SeqCst);
    let id = request["id"].clone();
    let data = request["params"][0]["data"].as_str().unwrap_or_default();
    let data = hex::decode(data.trim_start_matches("0x")).unwrap_or_default();

    match answer_call(&state, &data) {
        Ok(result) => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": format!("0x{}", hex::encode(result)),
        })),
        Err(message) => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": 3, "message": message },
        })),
    }
}

fn answer_call(state: &RegistryState, data: &[u8]) -> Result<Vec<u8>, String> {
    let selector: [u8; 4] = data
        .get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or("missing selector")?;

    let live = |id: U256| -> Result<u64, String> {
        let id = u64::try_from(id).map_err(|e| e.to_string())?;
        if id == 0 || id > state.total || state.burned.contains(&id) {
            return Err(format!("execution reverted: ERC721: invalid token ID {id}"));
        }
        Ok(id)
    };

    if selector == ITestRegistry::totalSupplyCall::SELECTOR {
        return Ok(ITestRegistry::totalSupplyCall::abi_encode_returns(&(U256::from(
            state.total,
        ),)));
    }
    if selector == ITestRegistry::tokenURICall::SELECTOR {
        let call = ITestRegistry::tokenURICall::abi_decode(data, true).map_err(|e| e.to_string())?;
        let id = live(call.tokenId)?;
        return Ok(ITestRegistry::tokenURICall::abi_encode_returns(&(format!(
            "https://agents.example/{id}.json"
        ),)));
    }
    if selector == ITestRegistry::ownerOfCall::SELECTOR {
        let call = ITestRegistry::ownerOfCall::abi_decode(data, true).map_err(|e| e.to_string())?;
        let id = live(call.tokenId)?;
        return Ok(ITestRegistry::ownerOfCall::abi_encode_returns(&(TestRpcNode::owner_of(id),)));
    }
    Err("execution reverted: unknown selector".to_string())
}

//! DEX Screener and Glacier accessors against an in-process upstream.

use super::harness::spawn_server;
use a2a_paygate::payment::parse_address;
use a2a_paygate::{CacheConfig, MarketConfig, MarketData};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const WAVAX: &str = "0xB31f66AA3C1e785363F0875A1B74E27b85FD66c7";
const USDC: &str = "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E";
const JOE: &str = "0x6e84a6216eA6dACC71eE8E6b0a5B7322EEbC0fDd";

#[derive(Default)]
struct UpstreamState {
    dex_calls: AtomicUsize,
    glacier_calls: AtomicUsize,
}

struct Upstream {
    url: String,
    state: Arc<UpstreamState>,
}

fn pair(chain: &str, address: &str, volume: f64) -> Value {
    json!({
        "chainId": chain,
        "dexId": "traderjoe",
        "pairAddress": address,
        "baseToken": { "address": WAVAX, "name": "Wrapped AVAX", "symbol": "WAVAX" },
        "quoteToken": { "address": USDC, "name": "USD Coin", "symbol": "USDC" },
        "priceUsd": "35.10",
        "volume": { "h24": volume },
        "liquidity": { "usd": 1_000_000.0 }
    })
}

async fn token_pairs(
    State(state): State<Arc<UpstreamState>>,
    Path(token): Path<String>,
) -> Response {
    state.dex_calls.fetch_add(1, Ordering::SeqCst);
    if token.eq_ignore_ascii_case(WAVAX) {
        Json(json!({ "pairs": [
            pair("avalanche", "0xP1", 500.0),
            pair("avalanche", "0xP2", 50.0),
            pair("ethereum", "0xE1", 9_000.0),
        ]}))
        .into_response()
    } else if token.eq_ignore_ascii_case(USDC) {
        Json(json!({ "pairs": [
            pair("avalanche", "0xP1", 500.0),
            pair("avalanche", "0xP3", 900.0),
        ]}))
        .into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "overloaded").into_response()
    }
}

fn subnet(id: &str, is_l1: bool) -> Value {
    json!({
        "subnetId": id,
        "isL1": is_l1,
        "createBlockTimestamp": 1_700_000_000,
        "blockchains": [{ "blockchainId": format!("{id}-c"), "blockchainName": id, "vmId": "srEX" }]
    })
}

async fn subnets(
    State(state): State<Arc<UpstreamState>>,
    Path(network): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.glacier_calls.fetch_add(1, Ordering::SeqCst);
    assert_eq!(network, "mainnet");
    assert_eq!(query.get("pageSize").map(String::as_str), Some("100"));
    match query.get("pageToken").map(String::as_str) {
        None => Json(json!({ "subnets": [subnet("a", true), subnet("b", false)], "nextPageToken": "p2" }))
            .into_response(),
        Some("p2") => Json(json!({ "subnets": [subnet("c", true)], "nextPageToken": "p3" }))
            .into_response(),
        _ => (StatusCode::BAD_GATEWAY, "page gone").into_response(),
    }
}

impl Upstream {
    async fn start() -> Self {
        let state = Arc::new(UpstreamState::default());
        let router = Router::new()
            .route("/latest/dex/tokens/:token", get(token_pairs))
            .route("/v1/networks/:network/subnets", get(subnets))
            .with_state(Arc::clone(&state));
        let addr = spawn_server(router).await;
        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    fn market(&self) -> MarketData {
        let config = MarketConfig {
            dexscreener_url: self.url.clone(),
            glacier_url: self.url.clone(),
            top_pair_tokens: vec![WAVAX.to_string(), USDC.to_string(), JOE.to_string()],
            ..MarketConfig::default()
        };
        MarketData::new(&config, &CacheConfig::default()).expect("market")
    }
}

#[tokio::test]
async fn test_dex_pairs_are_filtered_and_cached() {
    let upstream = Upstream::start().await;
    let market = upstream.market();
    let wavax = parse_address(WAVAX).unwrap();

    let pairs = market.dex_pairs(wavax).await.expect("pairs");
    let addresses: Vec<&str> = pairs.iter().map(|p| p.pair_address.as_str()).collect();
    assert_eq!(addresses, vec!["0xP1", "0xP2"]);

    market.dex_pairs(wavax).await.expect("cached");
    assert_eq!(upstream.state.dex_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_top_pairs_merge_skips_failed_tokens() {
    let upstream = Upstream::start().await;
    let market = upstream.market();

    let top = market.top_pairs().await.expect("top pairs");
    let addresses: Vec<&str> = top.iter().map(|p| p.pair_address.as_str()).collect();
    // JOE failed upstream; 0xP1 appears under two tokens but once here.
    assert_eq!(addresses, vec!["0xP3", "0xP1", "0xP2"]);
    assert_eq!(upstream.state.dex_calls.load(Ordering::SeqCst), 3);

    market.top_pairs().await.expect("cached");
    assert_eq!(upstream.state.dex_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_l1s_follow_pages_until_failure() {
    let upstream = Upstream::start().await;
    let market = upstream.market();

    let subnets = market.l1s().await.expect("subnets");
    let ids: Vec<&str> = subnets.iter().map(|s| s.subnet_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(subnets[0].is_l1 && !subnets[1].is_l1);
    // Two good pages plus the failed third.
    assert_eq!(upstream.state.glacier_calls.load(Ordering::SeqCst), 3);

    market.l1s().await.expect("cached");
    assert_eq!(upstream.state.glacier_calls.load(Ordering::SeqCst), 3);
}

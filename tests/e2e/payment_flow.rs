//! Paid calls between a client and a gated peer.

use super::harness::{
    closed_port, peer_config, TestFacilitator, TestPeer, PAYER, PAYER_KEY, PEER_PAY_TO,
};
use a2a_paygate::payment::{parse_address, PAYMENT_HEADER};
use a2a_paygate::{AuthorizationBuilder, Error, HttpFacilitator, PaidClient, PaymentTransport};
use reqwest::{Method, StatusCode};
use rust_decimal::Decimal;
use serde_json::json;
use std::time::Duration;

fn price() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn client(facilitator_url: &str) -> PaidClient {
    PaidClient::from_config(PAYER_KEY, &peer_config(facilitator_url).payment, PEER_PAY_TO)
        .expect("client")
}

async fn setup() -> (TestFacilitator, TestPeer) {
    let facilitator = TestFacilitator::start().await;
    let peer = TestPeer::start(peer_config(&facilitator.url)).await;
    (facilitator, peer)
}

#[tokio::test]
async fn test_paid_call_is_verified_served_and_settled() {
    let (facilitator, peer) = setup().await;
    let client = client(&facilitator.url);

    let response = client
        .call(
            &peer.paid_url(),
            Method::POST,
            Some(&json!({ "question": "Where do I deploy?" })),
            price(),
        )
        .await
        .expect("paid call");

    assert_eq!(response["result"]["question"], "Where do I deploy?");
    assert!(response["result"]["paidBy"]
        .as_str()
        .unwrap()
        .eq_ignore_ascii_case(PAYER));
    assert!(response["transaction"].as_str().unwrap().starts_with("0x"));

    assert_eq!(facilitator.verify_calls(), 1);
    assert_eq!(facilitator.settle_calls(), 1);
    assert_eq!(peer.handler_runs(), 1);
}

#[tokio::test]
async fn test_underpayment_is_rejected_distinctly_from_network_failure() {
    let (facilitator, peer) = setup().await;
    let client = client(&facilitator.url);

    let err = client
        .call(
            &peer.paid_url(),
            Method::POST,
            Some(&json!({ "question": "cheap?" })),
            Decimal::new(1, 3), // 0.001 < 0.01
        )
        .await
        .unwrap_err();

    match err {
        Error::PaymentRejected { status, ref body } => {
            assert_eq!(status, 402);
            assert!(body.contains("maxAmountRequired"));
        }
        ref other => panic!("expected PaymentRejected, got {other:?}"),
    }
    assert!(!err.is_retryable());
    // Rejected by the gate before the facilitator or the handler saw it.
    assert_eq!(facilitator.verify_calls(), 0);
    assert_eq!(peer.handler_runs(), 0);

    let closed = closed_port().await;
    let err = client
        .call(
            &format!("http://{closed}/a2a/guide"),
            Method::POST,
            Some(&json!({})),
            price(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Network(_)), "got {err:?}");
    assert!(!err.is_payment_rejected());
}

#[tokio::test]
async fn test_declined_payment_never_reaches_handler() {
    let (facilitator, peer) = setup().await;
    facilitator.mark_broke(PAYER);

    let err = client(&facilitator.url)
        .call(&peer.paid_url(), Method::POST, Some(&json!({})), price())
        .await
        .unwrap_err();

    assert!(err.is_payment_rejected());
    assert!(err.to_string().contains("insufficient_funds"));
    assert_eq!(facilitator.verify_calls(), 1);
    assert_eq!(facilitator.settle_calls(), 0);
    assert_eq!(peer.handler_runs(), 0);
}

#[tokio::test]
async fn test_each_call_needs_a_fresh_authorization() {
    let (facilitator, peer) = setup().await;
    let client = client(&facilitator.url);
    let http = reqwest::Client::new();

    let header = client.sign_header(price()).expect("header");
    let send = || {
        http.post(peer.paid_url())
            .header(PAYMENT_HEADER, &header)
            .json(&json!({ "question": "again?" }))
            .send()
    };

    assert_eq!(send().await.expect("first").status(), StatusCode::OK);
    let replay = send().await.expect("replay");
    assert_eq!(replay.status(), StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = replay.json().await.expect("body");
    assert!(body["error"].as_str().unwrap().contains("nonce_already_used"));

    // PaidClient signs a new nonce per call, so repeated calls keep working.
    for _ in 0..2 {
        client
            .call(&peer.paid_url(), Method::POST, Some(&json!({})), price())
            .await
            .expect("fresh call");
    }
    assert_eq!(facilitator.settle_calls(), 3);
    assert_eq!(peer.handler_runs(), 3);
}

#[tokio::test]
async fn test_missing_header_gets_requirements() {
    let (facilitator, peer) = setup().await;

    let response = reqwest::Client::new()
        .post(peer.paid_url())
        .json(&json!({ "question": "free?" }))
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

    let body: serde_json::Value = response.json().await.expect("body");
    assert_eq!(body["x402Version"], 1);
    let accepts = &body["accepts"][0];
    assert_eq!(accepts["scheme"], "exact");
    assert_eq!(accepts["network"], "avalanche-fuji");
    assert_eq!(accepts["maxAmountRequired"], "10000");
    assert_eq!(accepts["resource"], "/a2a/guide");
    assert_eq!(
        parse_address(accepts["payTo"].as_str().unwrap()).unwrap(),
        parse_address(PEER_PAY_TO).unwrap()
    );
    assert_eq!(facilitator.verify_calls(), 0);
}

#[tokio::test]
async fn test_unreachable_facilitator_fails_closed() {
    let closed = closed_port().await;
    let facilitator_url = format!("http://{closed}");
    let peer = TestPeer::start(peer_config(&facilitator_url)).await;

    let err = client(&facilitator_url)
        .call(&peer.paid_url(), Method::POST, Some(&json!({})), price())
        .await
        .unwrap_err();

    assert!(err.is_payment_rejected());
    assert!(err.to_string().contains("verifier unavailable"));
    assert_eq!(peer.handler_runs(), 0);
}

#[tokio::test]
async fn test_outbound_timeout() {
    let (facilitator, peer) = setup().await;
    let config = peer_config(&facilitator.url).payment;
    let builder = AuthorizationBuilder::from_config(
        PAYER_KEY,
        &config,
        parse_address(PEER_PAY_TO).unwrap(),
    )
    .expect("builder");
    let client = PaidClient::new(
        builder,
        PaymentTransport::with_timeout(Duration::from_millis(300)).expect("transport"),
        &config.network,
        HttpFacilitator::new(&facilitator.url).expect("facilitator"),
    );

    let err = client
        .call(&format!("{}/slow", peer.url), Method::GET, None, price())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(d) if d == Duration::from_millis(300)), "got {err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_server_error_is_http_error() {
    let (facilitator, peer) = setup().await;

    let err = client(&facilitator.url)
        .call(&format!("{}/broken", peer.url), Method::GET, None, price())
        .await
        .unwrap_err();
    match err {
        Error::Http { status, ref body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "upstream exploded");
        }
        ref other => panic!("expected Http, got {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_rate_limit_precedes_payment() {
    let facilitator = TestFacilitator::start().await;
    let mut config = peer_config(&facilitator.url);
    config.rate_limit.max_requests = 2;
    let peer = TestPeer::start(config).await;
    let client = client(&facilitator.url);

    for _ in 0..2 {
        client
            .call(&peer.paid_url(), Method::POST, Some(&json!({})), price())
            .await
            .expect("admitted");
    }

    let err = client
        .call(&peer.paid_url(), Method::POST, Some(&json!({})), price())
        .await
        .unwrap_err();
    match err {
        Error::RateLimited { retry_after } => {
            assert!(retry_after > Duration::ZERO, "got {retry_after:?}");
            assert!(retry_after <= Duration::from_secs(60), "got {retry_after:?}");
        }
        ref other => panic!("expected RateLimited, got {other:?}"),
    }
    assert!(err.is_retryable());
    assert!(!err.is_payment_rejected());
    assert_eq!(facilitator.verify_calls(), 2);
}

#[tokio::test]
async fn test_facilitator_health_check() {
    let facilitator = TestFacilitator::start().await;
    assert!(client(&facilitator.url).check_facilitator().await);

    let closed = closed_port().await;
    assert!(!client(&format!("http://{closed}")).check_facilitator().await);
}

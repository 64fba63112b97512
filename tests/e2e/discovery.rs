//! Registry discovery over JSON-RPC.

use super::harness::{peer_config, TestFacilitator, TestRpcNode, PEER_PAY_TO};
use a2a_paygate::chain::{OnChainRegistry, RegistryReader, RpcClient};
use a2a_paygate::payment::parse_address;
use a2a_paygate::{AgentBuilder, AgentEvent, ChainConfig, Error};
use std::sync::atomic::Ordering;
use std::time::Duration;

fn reader(node: &TestRpcNode) -> RegistryReader<OnChainRegistry> {
    let rpc = RpcClient::new(&node.url, Duration::from_secs(5)).expect("rpc");
    // Any address works; the test node serves a single registry.
    let registry = OnChainRegistry::new(rpc, parse_address(PEER_PAY_TO).unwrap());
    RegistryReader::new(registry)
}

#[tokio::test]
async fn test_discovery_skips_burned_entries() {
    let total = 20;
    let node = TestRpcNode::start(total, &[total - 2, total - 5]).await;

    let entries = reader(&node).discover(10).await.expect("discover");

    assert_eq!(entries.len(), 8);
    assert!(entries.iter().all(|e| e.id != total - 2 && e.id != total - 5));
    assert_eq!(entries[0].id, total);
    assert_eq!(entries[0].metadata_uri, "https://agents.example/20.json");
    assert_eq!(entries[0].owner, TestRpcNode::owner_of(total));
}

#[tokio::test]
async fn test_discovery_of_small_registry() {
    let node = TestRpcNode::start(7, &[5, 2]).await;
    let ids: Vec<u64> = reader(&node)
        .discover(10)
        .await
        .expect("discover")
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec![7, 6, 4, 3, 1]);
}

#[tokio::test]
async fn test_unreachable_node_is_an_error() {
    let rpc = RpcClient::new("http://127.0.0.1:9", Duration::from_secs(2)).expect("rpc");
    let registry = OnChainRegistry::new(rpc, parse_address(PEER_PAY_TO).unwrap());
    let err = RegistryReader::new(registry).discover(10).await.unwrap_err();
    assert!(matches!(err, Error::Network(_) | Error::Timeout(_)), "got {err:?}");
}

#[tokio::test]
async fn test_agent_discovery_is_cached_and_reported() {
    let facilitator = TestFacilitator::start().await;
    let node = TestRpcNode::start(12, &[11]).await;

    let mut config = peer_config(&facilitator.url);
    config.chain = ChainConfig {
        rpc_url: node.url.clone(),
        registry_address: Some(PEER_PAY_TO.to_string()),
        ..ChainConfig::default()
    };
    let agent = AgentBuilder::new(config).build().expect("agent");
    let mut events = agent.subscribe_events();

    let first = agent.discover_peers(10).await.expect("discover");
    assert_eq!(first.len(), 9);
    let calls = node.state.calls.load(Ordering::SeqCst);

    let second = agent.discover_peers(10).await.expect("cached");
    assert_eq!(first, second);
    assert_eq!(node.state.calls.load(Ordering::SeqCst), calls);

    assert!(matches!(
        events.recv().await,
        Ok(AgentEvent::PeersDiscovered { count: 9 })
    ));
    agent.shutdown().await;
}

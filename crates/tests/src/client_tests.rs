//! Backend client behaviors needing a live (mock) backend.

use relay_core::{client::default_metadata, pool::PickOptions, BeaconClient, RelayConfig};

use crate::mock_infrastructure::{MockBeaconNode, MockChain};

async fn client_for(nodes: &[&MockBeaconNode]) -> BeaconClient {
    let backends = nodes.iter().map(|n| n.addr()).collect::<Vec<_>>().join(",");
    let config = RelayConfig { backends, ..RelayConfig::default() };
    BeaconClient::new(&config).await.expect("client construction")
}

#[tokio::test]
async fn test_chain_info_cached_after_prewarm() {
    let node =
        MockBeaconNode::spawn(vec![MockChain::new("default", 30, 1_000_000_000)]).await;
    let client = client_for(&[&node]).await;

    // construction pre-warmed the cache; subsequent lookups by id or by
    // hash must not issue further ChainInfo RPCs
    let after_prewarm = node.chain_info_calls();
    let meta = default_metadata();
    let by_id = client.get_chain_info(&meta).await.unwrap();

    let by_hash_meta = relay_proto::beacon::Metadata {
        chain_hash: by_id.hash.0.clone(),
        beacon_id: String::new(),
    };
    let by_hash = client.get_chain_info(&by_hash_meta).await.unwrap();

    assert_eq!(by_id, by_hash);
    assert_eq!(node.chain_info_calls(), after_prewarm);
    client.close();
}

#[tokio::test]
async fn test_get_chains_lists_hex_hashes() {
    let chain = MockChain::new("default", 30, 1_000_000_000);
    let hex_hash = chain.hex_hash();
    let node = MockBeaconNode::spawn(vec![chain]).await;
    let client = client_for(&[&node]).await;

    assert_eq!(client.get_chains().await.unwrap(), vec![hex_hash]);
    assert_eq!(client.get_beacon_ids().await.unwrap(), vec!["default".to_string()]);
    client.close();
}

#[tokio::test]
async fn test_get_beacon_latest_sentinel() {
    let node =
        MockBeaconNode::spawn(vec![MockChain::new("default", 30, 1_000_000_000)]).await;
    node.set_latest(42);
    let client = client_for(&[&node]).await;

    let beacon = client.get_beacon(&default_metadata(), 0).await.unwrap();
    assert_eq!(beacon.round, 42);
    // the wire never carries randomness
    assert!(beacon.randomness.is_empty());
    assert!(!beacon.signature.is_empty());
    client.close();
}

#[tokio::test]
async fn test_get_beacon_retries_once() {
    let node =
        MockBeaconNode::spawn(vec![MockChain::new("default", 30, 1_000_000_000)]).await;
    node.set_latest(42);
    let client = client_for(&[&node]).await;

    let before = node.public_rand_calls();
    node.fail_next_public_rand(1);
    let beacon = client.get_beacon(&default_metadata(), 7).await.unwrap();
    assert_eq!(beacon.round, 7);
    assert_eq!(node.public_rand_calls(), before + 2);

    // two consecutive failures exhaust the retry
    node.fail_next_public_rand(2);
    assert!(client.get_beacon(&default_metadata(), 7).await.is_err());
    client.close();
}

#[tokio::test]
async fn test_skip_first_on_single_backend_still_answers() {
    let node =
        MockBeaconNode::spawn(vec![MockChain::new("default", 30, 1_000_000_000)]).await;
    node.set_latest(9);
    let client = client_for(&[&node]).await;

    let beacon = client
        .get_beacon_with(&default_metadata(), 0, PickOptions { skip_first: true })
        .await
        .unwrap();
    assert_eq!(beacon.round, 9);
    client.close();
}

#[tokio::test]
async fn test_watch_streams_then_ends() {
    let node =
        MockBeaconNode::spawn(vec![MockChain::new("default", 30, 1_000_000_000)]).await;
    node.set_latest(10);
    let client = client_for(&[&node]).await;

    let mut rx = client.watch(&default_metadata()).await.unwrap();
    let mut rounds = Vec::new();
    while let Some(beacon) = rx.recv().await {
        rounds.push(beacon.round);
    }
    assert_eq!(rounds, vec![11, 12, 13]);
    client.close();
}

#[tokio::test]
async fn test_watch_ends_on_client_close() {
    let node =
        MockBeaconNode::spawn(vec![MockChain::new("default", 30, 1_000_000_000)]).await;
    let client = client_for(&[&node]).await;

    let mut rx = client.watch(&default_metadata()).await.unwrap();
    client.close();
    // drain: the producer observes the shutdown and closes the channel
    while rx.recv().await.is_some() {}
}

#[tokio::test]
async fn test_check_reflects_serving_state() {
    let node =
        MockBeaconNode::spawn(vec![MockChain::new("default", 30, 1_000_000_000)]).await;
    let client = client_for(&[&node]).await;

    assert!(client.check().await.is_ok());
    node.set_serving(false);
    assert!(client.check().await.is_err());
    client.close();
}

#[tokio::test]
async fn test_ready_backends_counts_pool_entries() {
    let chain = MockChain::new("default", 30, 1_000_000_000);
    let node1 = MockBeaconNode::spawn(vec![chain.clone()]).await;
    let node2 = MockBeaconNode::spawn(vec![chain]).await;
    let client = client_for(&[&node1, &node2]).await;
    assert_eq!(client.ready_backends(), 2);
    client.close();
}

//! Pool failover observed from the HTTP surface.

use std::time::Duration;

use axum::http::StatusCode;

use crate::mock_infrastructure::{MockBeaconNode, MockChain};
use crate::scenario_tests::relay_for;

async fn get_status(app: &axum::Router, path: &str) -> StatusCode {
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;
    app.clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_single_error_fails_over_to_second_backend() {
    let chain = MockChain::new("default", 30, 1_000_000_000);
    let node1 = MockBeaconNode::spawn(vec![chain.clone()]).await;
    let node2 = MockBeaconNode::spawn(vec![chain]).await;
    node1.set_latest(50);
    node2.set_latest(50);
    let app = relay_for(&[&node1, &node2], Duration::ZERO).await;

    let node2_before = node2.public_rand_calls();
    node1.fail_next_public_rand(1);

    // the first attempt fails on the preferred node and demotes it; the
    // in-call retry lands on the second node
    assert_eq!(get_status(&app, "/public/5").await, StatusCode::OK);
    assert_eq!(node2.public_rand_calls(), node2_before + 1);

    // the demotion outlives the request: the next call goes straight to
    // the second node until the reset tick restores priorities
    let node1_before = node1.public_rand_calls();
    assert_eq!(get_status(&app, "/public/6").await, StatusCode::OK);
    assert_eq!(node1.public_rand_calls(), node1_before);
    assert_eq!(node2.public_rand_calls(), node2_before + 2);
}

#[tokio::test]
async fn test_preferred_backend_restored_after_reset_tick() {
    let chain = MockChain::new("default", 30, 1_000_000_000);
    let node1 = MockBeaconNode::spawn(vec![chain.clone()]).await;
    let node2 = MockBeaconNode::spawn(vec![chain]).await;
    node1.set_latest(50);
    node2.set_latest(50);
    let app = relay_for(&[&node1, &node2], Duration::ZERO).await;

    node1.fail_next_public_rand(1);
    assert_eq!(get_status(&app, "/public/5").await, StatusCode::OK);

    // wait out the priority reset tick
    tokio::time::sleep(Duration::from_secs(4)).await;

    let node1_before = node1.public_rand_calls();
    assert_eq!(get_status(&app, "/public/7").await, StatusCode::OK);
    assert_eq!(node1.public_rand_calls(), node1_before + 1);
}

#[tokio::test]
async fn test_single_backend_pool_always_picks_it() {
    let node =
        MockBeaconNode::spawn(vec![MockChain::new("default", 30, 1_000_000_000)]).await;
    node.set_latest(50);
    let app = relay_for(&[&node], Duration::ZERO).await;

    let before = node.public_rand_calls();
    for round in 1..=3 {
        assert_eq!(get_status(&app, &format!("/public/{round}")).await, StatusCode::OK);
    }
    assert_eq!(node.public_rand_calls(), before + 3);
}

#[tokio::test]
async fn test_all_backends_failing_is_an_error() {
    let node =
        MockBeaconNode::spawn(vec![MockChain::new("default", 30, 1_000_000_000)]).await;
    node.set_latest(50);
    let app = relay_for(&[&node], Duration::ZERO).await;

    node.fail_next_public_rand(2);
    assert_eq!(
        get_status(&app, "/public/5").await,
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[tokio::test]
async fn test_construction_fails_with_unreachable_backends() {
    let config = relay_core::RelayConfig {
        backends: "127.0.0.1:1".to_string(),
        ..relay_core::RelayConfig::default()
    };
    assert!(relay_core::BeaconClient::new(&config).await.is_err());
}

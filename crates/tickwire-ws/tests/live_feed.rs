//! Integration tests against the live provider
//!
//! These tests make real WebSocket connections and need a token in
//! `TICKWIRE_TOKEN` (or `KEY`).
//! Run with: cargo test -p tickwire-ws --test live_feed -- --ignored
//!
//! Note: These tests are ignored by default to avoid making network calls during
//! normal test runs.

use std::time::Duration;
use tickwire_ws::{ChannelSink, ClientConfig, ConnectionState, Credentials, FeedClient};
use tokio::time::timeout;

fn live_client() -> FeedClient {
    let credentials = Credentials::from_env().expect("TICKWIRE_TOKEN or KEY must be set");
    FeedClient::websocket(ClientConfig::new(), credentials).expect("default config is valid")
}

/// Test that the client authenticates and reaches Live
#[tokio::test]
#[ignore = "Makes real WebSocket connection"]
async fn test_reaches_live() {
    let client = live_client();
    let mut states = client.state_changes();
    let task = client.start().expect("first start");

    let reached = timeout(Duration::from_secs(15), async {
        loop {
            if *states.borrow_and_update() == ConnectionState::Live {
                return true;
            }
            if states.changed().await.is_err() {
                return false;
            }
        }
    })
    .await;

    assert!(matches!(reached, Ok(true)), "Client did not reach Live");

    client.stop();
    let result = timeout(Duration::from_secs(10), task).await;
    assert!(matches!(result, Ok(Ok(Ok(())))), "Clean stop expected");
}

/// Test that a crypto symbol streams trades
#[tokio::test]
#[ignore = "Makes real WebSocket connection"]
async fn test_streams_trades() {
    let client = live_client();
    let (sink, mut events) = ChannelSink::new(64);
    client.register_sink(sink, 64);
    client
        .subscribe("BINANCE:BTCUSDT")
        .expect("valid symbol");

    let task = client.start().expect("first start");

    let first = timeout(Duration::from_secs(30), events.recv()).await;
    let event = first
        .expect("Timed out waiting for a trade")
        .expect("Sink channel closed");
    assert_eq!(
        event.symbol().map(|s| s.as_str()),
        Some("BINANCE:BTCUSDT")
    );

    client.stop();
    let _ = timeout(Duration::from_secs(10), task).await;
}

/// Test that a bad token is fatal
#[tokio::test]
#[ignore = "Makes real WebSocket connection"]
async fn test_bad_token_is_fatal() {
    let credentials = Credentials::new("definitely-not-a-token").expect("non-empty");
    let client = FeedClient::websocket(ClientConfig::new(), credentials).expect("valid config");
    client.subscribe("AAPL").expect("valid symbol");

    let task = client.start().expect("first start");
    let result = timeout(Duration::from_secs(30), task).await;

    match result {
        Ok(Ok(Err(err))) => assert!(err.is_fatal(), "Expected fatal error, got {err}"),
        other => panic!("Expected terminal auth failure, got {other:?}"),
    }
}

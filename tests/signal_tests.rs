//! Signal consumer integration tests against an in-process stream server.

use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use pumpgate::signal::{SignalConsumer, SignalConsumerConfig};
use pumpgate::testkit::ws::MockWsServer;

fn config(server: &MockWsServer) -> SignalConsumerConfig {
    SignalConsumerConfig {
        host: server.host(),
        api_key: "k-test".to_string(),
        signal_types: vec!["price_alert".to_string()],
        symbols: vec!["BTC/USD".to_string()],
        min_confidence: 0.5,
        reconnect_initial_delay: Duration::from_millis(10),
        reconnect_max_delay: Duration::from_millis(100),
    }
}

#[tokio::test]
async fn subscribes_on_open_and_forwards_signals() {
    let server = MockWsServer::start().await;
    let consumer = SignalConsumer::new(config(&server));
    let mut signals = consumer.subscribe();

    consumer.connect().unwrap();
    server.wait_for_connections(1).await;

    assert!(server.request_uris()[0].starts_with("/api/v1/public/ws/signals?api_key=k-test"));

    let subscribe = server
        .recv_frame_of_type("subscribe")
        .await
        .expect("subscribe frame");
    assert_eq!(subscribe["signal_types"][0], "price_alert");
    assert_eq!(subscribe["symbols"][0], "BTC/USD");
    assert_eq!(subscribe["min_confidence"], 0.5);

    // Garbage and non-signal chatter are dropped without breaking the
    // stream.
    server.send_raw("not json at all");
    server.send(&json!({"status": "connected"}));
    server.send(&json!({
        "id": "S1",
        "signal_type": "price_alert",
        "confidence": 0.9
    }));

    let signal = timeout(Duration::from_secs(5), signals.recv())
        .await
        .expect("timed out")
        .expect("signal stream closed");
    assert_eq!(signal.id, "S1");
    assert_eq!(signal.confidence, Some(0.9));

    consumer.disconnect();
}

#[tokio::test]
async fn resubscribes_after_reconnect() {
    let server = MockWsServer::start().await;
    let consumer = SignalConsumer::new(config(&server));

    consumer.connect().unwrap();
    server.wait_for_connections(1).await;
    assert!(server.recv_frame_of_type("subscribe").await.is_some());

    server.close_client();
    server.wait_for_connections(2).await;

    // The subscribe frame is re-sent on every open.
    assert!(server.recv_frame_of_type("subscribe").await.is_some());
    assert_eq!(server.request_uris().len(), 2);

    consumer.disconnect();
}

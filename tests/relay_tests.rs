//! Relay client integration tests against an in-process relay server.

use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use pumpgate::protocol::{codes, Report};
use pumpgate::relay::{RelayClient, RelayConfig, RelayEvent, RelayState, RelayStatus};
use pumpgate::testkit::ws::MockWsServer;

fn config(server: &MockWsServer) -> RelayConfig {
    RelayConfig {
        host: server.host(),
        api_key: "k-test".to_string(),
        pairing_id: None,
        pairing_code: Some("ABC123".to_string()),
        heartbeat_interval: Duration::from_secs(60),
        reconnect_initial_delay: Duration::from_millis(10),
        reconnect_max_delay: Duration::from_millis(100),
        pairing_timeout: Duration::from_secs(2),
    }
}

async fn next_event(events: &mut broadcast::Receiver<RelayEvent>) -> RelayEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for relay event")
        .expect("relay event stream closed")
}

#[tokio::test]
async fn pairs_connects_and_acks_commands() {
    let server = MockWsServer::start().await;
    let client = RelayClient::new(config(&server));
    let mut events = client.subscribe();

    client.connect().unwrap();
    server.wait_for_connections(1).await;

    // Credentials ride the query string of the connect request.
    let uris = server.request_uris();
    assert_eq!(uris.len(), 1);
    assert!(uris[0].starts_with("/api/v1/relay?"));
    assert!(uris[0].contains("api_key=k-test"));
    assert!(uris[0].contains("pairing_code=ABC123"));

    server.send(&json!({
        "type": "pairing_confirmed",
        "pairing_id": "P1",
        "relay_session_id": "S1"
    }));

    let event = next_event(&mut events).await;
    assert!(matches!(
        event,
        RelayEvent::PairingConfirmed { ref pairing_id } if pairing_id == "P1"
    ));
    assert!(matches!(next_event(&mut events).await, RelayEvent::Connected));
    assert_eq!(client.pairing_id().as_deref(), Some("P1"));
    assert_eq!(client.state(), RelayState::Connected);

    server.send(&json!({
        "type": "trade",
        "id": "C1",
        "market_id": "kalshi:M",
        "venue": "kalshi",
        "side": "yes",
        "action": "buy",
        "size": 10,
        "order_type": "market"
    }));

    let event = next_event(&mut events).await;
    assert!(matches!(event, RelayEvent::Command(_)));

    let ack = server
        .recv_frame_of_type("command_ack")
        .await
        .expect("command_ack frame");
    assert_eq!(ack["command_id"], "C1");
    assert_eq!(ack["status"], "accepted");

    client.disconnect();
}

#[tokio::test]
async fn known_pairing_id_connects_directly() {
    let server = MockWsServer::start().await;
    let client = RelayClient::new(RelayConfig {
        pairing_id: Some("P7".to_string()),
        pairing_code: None,
        ..config(&server)
    });
    let mut events = client.subscribe();

    client.connect().unwrap();
    server.wait_for_connections(1).await;

    assert!(matches!(next_event(&mut events).await, RelayEvent::Connected));
    assert!(server.request_uris()[0].contains("pairing_id=P7"));

    client.disconnect();
}

#[tokio::test]
async fn reconnects_quickly_after_open_connection_drops() {
    let server = MockWsServer::start().await;
    let client = RelayClient::new(RelayConfig {
        pairing_id: Some("P1".to_string()),
        pairing_code: None,
        ..config(&server)
    });
    let mut events = client.subscribe();

    client.connect().unwrap();
    server.wait_for_connections(1).await;
    assert!(matches!(next_event(&mut events).await, RelayEvent::Connected));

    server.close_client();
    assert!(matches!(
        next_event(&mut events).await,
        RelayEvent::Disconnected
    ));

    // The ladder reset on open, so the retry lands almost immediately.
    server.wait_for_connections(2).await;
    assert!(matches!(next_event(&mut events).await, RelayEvent::Connected));

    client.disconnect();
}

#[tokio::test]
async fn revoked_pairing_stops_reconnecting() {
    let server = MockWsServer::start().await;
    let client = RelayClient::new(RelayConfig {
        pairing_id: Some("P1".to_string()),
        pairing_code: None,
        ..config(&server)
    });
    let mut events = client.subscribe();

    client.connect().unwrap();
    server.wait_for_connections(1).await;
    assert!(matches!(next_event(&mut events).await, RelayEvent::Connected));

    server.send(&json!({
        "type": "pairing_revoked",
        "pairing_id": "P1",
        "reason": "operator request"
    }));

    assert!(matches!(
        next_event(&mut events).await,
        RelayEvent::PairingRevoked { .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        RelayEvent::Disconnected
    ));

    // Long enough for several reconnect windows.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connections(), 1);
    assert_eq!(client.state(), RelayState::Disconnected);
}

#[tokio::test]
async fn pair_returns_confirmed_id() {
    let server = MockWsServer::start().await;
    let client = RelayClient::new(config(&server));

    let confirm = async {
        server.wait_for_connections(1).await;
        server.send(&json!({
            "type": "pairing_confirmed",
            "pairing_id": "P42",
            "relay_session_id": "S1"
        }));
    };

    let (paired, ()) = tokio::join!(client.pair(), confirm);
    assert_eq!(paired.unwrap(), "P42");

    client.disconnect();
}

#[tokio::test]
async fn pair_times_out_without_confirmation() {
    let server = MockWsServer::start().await;
    let client = RelayClient::new(RelayConfig {
        pairing_timeout: Duration::from_millis(100),
        ..config(&server)
    });

    let result = client.pair().await;
    assert!(matches!(
        result,
        Err(pumpgate::error::Error::PairingTimeout)
    ));

    client.disconnect();
}

#[tokio::test]
async fn heartbeats_carry_the_pushed_status() {
    let server = MockWsServer::start().await;
    let client = RelayClient::new(RelayConfig {
        pairing_id: Some("P1".to_string()),
        pairing_code: None,
        heartbeat_interval: Duration::from_millis(50),
        ..config(&server)
    });

    client.update_status(RelayStatus {
        strategy_status: "active".to_string(),
        connected_venues: vec!["kalshi".to_string()],
        open_orders: 2,
        open_positions: 1,
        strategy_metrics: None,
    });

    client.connect().unwrap();
    server.wait_for_connections(1).await;

    let heartbeat = server
        .recv_frame_of_type("heartbeat")
        .await
        .expect("heartbeat frame");
    assert_eq!(heartbeat["strategy_status"], "active");
    assert_eq!(heartbeat["connected_venues"][0], "kalshi");
    assert_eq!(heartbeat["open_orders"], 2);
    assert_eq!(heartbeat["open_positions"], 1);
    assert!(heartbeat["uptime_secs"].is_u64());
    assert!(heartbeat["version"].is_string());

    client.disconnect();
}

#[tokio::test]
async fn reports_flow_to_the_server_when_connected() {
    let server = MockWsServer::start().await;
    let client = RelayClient::new(RelayConfig {
        pairing_id: Some("P1".to_string()),
        pairing_code: None,
        ..config(&server)
    });
    let mut events = client.subscribe();

    client.connect().unwrap();
    server.wait_for_connections(1).await;
    assert!(matches!(next_event(&mut events).await, RelayEvent::Connected));

    client.send_report(&Report::Error(pumpgate::protocol::ErrorReport::new(
        codes::VENUE_UNHEALTHY,
        "kalshi is down",
    )));

    let frame = server.recv_frame_of_type("error").await.expect("error frame");
    assert_eq!(frame["code"], "VENUE_UNHEALTHY");

    client.disconnect();
}

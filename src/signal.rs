//! Public signal stream consumer.
//!
//! Maintains its own WebSocket to the signal endpoint, sends one
//! subscribe frame on every open, and forwards each well-formed signal
//! object to subscribers. Reconnects with the same backoff shape as the
//! relay client. Invalid JSON never crashes the consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::logging::sanitize_url;
use crate::protocol::{Signal, SubscribeRequest};
use crate::relay::backoff::Backoff;
use crate::relay::url::derive_url;

const EVENT_CAPACITY: usize = 1024;
const SIGNALS_PATH: &str = "/api/v1/public/ws/signals";

/// Signal stream settings.
#[derive(Debug, Clone)]
pub struct SignalConsumerConfig {
    pub host: String,
    pub api_key: String,
    pub signal_types: Vec<String>,
    pub symbols: Vec<String>,
    pub min_confidence: f64,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl Default for SignalConsumerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            api_key: String::new(),
            signal_types: Vec::new(),
            symbols: Vec::new(),
            min_confidence: 0.0,
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(60),
        }
    }
}

/// Decode one frame from the signal socket.
///
/// Objects lacking `id` and `signal_type` are non-signal chatter and are
/// dropped quietly; anything that is not JSON at all gets a warning.
#[must_use]
pub fn decode_signal(text: &str) -> Option<Signal> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "Invalid JSON on signal stream");
            return None;
        }
    };
    match serde_json::from_value::<Signal>(value) {
        Ok(signal) => Some(signal),
        Err(_) => {
            debug!("Dropping non-signal message");
            None
        }
    }
}

struct Shared {
    config: SignalConsumerConfig,
    events: broadcast::Sender<Signal>,
    running: AtomicBool,
    stop: watch::Sender<bool>,
}

/// Subscriber to the public signal WebSocket.
pub struct SignalConsumer {
    shared: Arc<Shared>,
}

impl SignalConsumer {
    #[must_use]
    pub fn new(config: SignalConsumerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (stop, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                events,
                running: AtomicBool::new(false),
                stop,
            }),
        }
    }

    /// Subscribe to decoded signals.
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.shared.events.subscribe()
    }

    /// Start the connect/subscribe/read loop.
    pub fn connect(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            debug!("Signal consumer already running");
            return Ok(());
        }
        self.shared.stop.send_replace(false);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(run_loop(shared));
        Ok(())
    }

    /// Stop the loop and close the socket.
    pub fn disconnect(&self) {
        self.shared.stop.send_replace(true);
    }
}

fn connect_url(config: &SignalConsumerConfig) -> String {
    derive_url(
        &config.host,
        SIGNALS_PATH,
        &format!("api_key={}", config.api_key),
    )
}

async fn run_loop(shared: Arc<Shared>) {
    let mut stop = shared.stop.subscribe();
    let mut backoff = Backoff::new(
        shared.config.reconnect_initial_delay,
        shared.config.reconnect_max_delay,
    );

    loop {
        if *stop.borrow() {
            break;
        }
        let url = connect_url(&shared.config);
        debug!(url = %sanitize_url(&url), "Connecting to signal stream");

        tokio::select! {
            result = connect_async(url.as_str()) => match result {
                Ok((socket, _response)) => {
                    backoff.reset();
                    info!("Signal WebSocket open");
                    session(&shared, socket, &mut stop).await;
                }
                Err(err) => {
                    warn!(error = %err, "Signal connect failed");
                }
            },
            _ = stop.changed() => break,
        }

        if *stop.borrow() {
            break;
        }
        let delay = backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "Signal reconnect after delay");
        tokio::select! {
            () = sleep(delay) => {}
            _ = stop.changed() => break,
        }
    }

    shared.running.store(false, Ordering::SeqCst);
}

async fn session(
    shared: &Arc<Shared>,
    socket: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    stop: &mut watch::Receiver<bool>,
) {
    let (mut sink, mut stream) = socket.split();

    // Re-sent on every open; the stream is stateless across reconnects.
    let subscribe = SubscribeRequest {
        signal_types: shared.config.signal_types.clone(),
        symbols: shared.config.symbols.clone(),
        min_confidence: shared.config.min_confidence,
    };
    match serde_json::to_string(&subscribe) {
        Ok(frame) => {
            if let Err(err) = sink.send(Message::Text(frame)).await {
                warn!(error = %err, "Failed to send signal subscription");
                return;
            }
        }
        Err(err) => {
            warn!(error = %err, "Failed to encode signal subscription");
            return;
        }
    }

    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(signal) = decode_signal(&text) {
                        debug!(id = %signal.id, signal_type = %signal.signal_type, "Signal received");
                        let _ = shared.events.send(signal);
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("Signal stream closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "Signal socket error");
                    break;
                }
                None => break,
            },
            _ = stop.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_well_formed_signal() {
        let signal = decode_signal(
            r#"{"id":"S1","signal_type":"price_alert","confidence":0.9}"#,
        )
        .expect("signal");
        assert_eq!(signal.id, "S1");
        assert_eq!(signal.confidence, Some(0.9));
    }

    #[test]
    fn drops_non_signal_objects() {
        assert!(decode_signal(r#"{"status":"connected"}"#).is_none());
        assert!(decode_signal(r#"{"id":"S1"}"#).is_none());
    }

    #[test]
    fn invalid_json_does_not_panic() {
        assert!(decode_signal("{{{").is_none());
        assert!(decode_signal("").is_none());
    }

    #[test]
    fn connect_url_carries_api_key_only() {
        let config = SignalConsumerConfig {
            host: "127.0.0.1:9200".to_string(),
            api_key: "k".to_string(),
            ..SignalConsumerConfig::default()
        };
        assert_eq!(
            connect_url(&config),
            "ws://127.0.0.1:9200/api/v1/public/ws/signals?api_key=k"
        );
    }
}

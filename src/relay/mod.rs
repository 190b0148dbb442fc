//! Relay WebSocket client.
//!
//! Owns the persistent connection to the control plane: pairing handshake,
//! heartbeat, exponential-backoff reconnect, inbound command dispatch with
//! at-most-once acknowledgement, and outbound report framing.
//!
//! # Connection Lifecycle
//!
//! `DISCONNECTED → CONNECTING → (AWAITING_PAIRING | CONNECTED) → DISCONNECTED`
//!
//! First-time connects carry a `pairing_code`; the relay answers with
//! `pairing_confirmed` and the returned `pairing_id` is stored for the
//! process lifetime and used on every reconnect. A revoked pairing stops
//! the reconnect loop entirely.

pub mod backoff;
pub mod url;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval_at, sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::logging::sanitize_url;
use crate::protocol::{
    Command, ControlMessage, Heartbeat, InboundMessage, Report, StrategyMetrics,
};
use backoff::Backoff;

const EVENT_CAPACITY: usize = 1024;
const RELAY_PATH: &str = "/api/v1/relay";

/// Relay connection settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Host (optionally `host:port`), with or without an explicit scheme.
    pub host: String,
    pub api_key: String,
    /// Persistent id from a previous pairing.
    pub pairing_id: Option<String>,
    /// One-time code for first-time pairing.
    pub pairing_code: Option<String>,
    pub heartbeat_interval: Duration,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub pairing_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            api_key: String::new(),
            pairing_id: None,
            pairing_code: None,
            heartbeat_interval: Duration::from_secs(15),
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(60),
            pairing_timeout: Duration::from_secs(60),
        }
    }
}

/// Relay connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Disconnected,
    Connecting,
    AwaitingPairing,
    Connected,
}

/// Event emitted by the relay client.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Connected,
    Disconnected,
    PairingConfirmed { pairing_id: String },
    PairingRevoked { reason: String },
    Command(Command),
}

/// Status snapshot the orchestrator pushes for heartbeat frames.
#[derive(Debug, Clone, Default)]
pub struct RelayStatus {
    pub strategy_status: String,
    pub connected_venues: Vec<String>,
    pub open_orders: usize,
    pub open_positions: usize,
    pub strategy_metrics: Option<StrategyMetrics>,
}

struct Shared {
    config: RelayConfig,
    state: RwLock<RelayState>,
    pairing_id: RwLock<Option<String>>,
    status: RwLock<RelayStatus>,
    events: broadcast::Sender<RelayEvent>,
    writer: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    should_reconnect: AtomicBool,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    started_at: Instant,
}

impl Shared {
    fn state(&self) -> RelayState {
        *self.state.read()
    }

    fn set_state(&self, state: RelayState) {
        *self.state.write() = state;
    }

    fn emit(&self, event: RelayEvent) {
        let _ = self.events.send(event);
    }

    fn known_pairing_id(&self) -> Option<String> {
        self.pairing_id.read().clone()
    }

    /// Store the confirmed pairing id. Immutable once set.
    fn store_pairing_id(&self, pairing_id: &str) {
        let mut stored = self.pairing_id.write();
        if stored.is_none() {
            *stored = Some(pairing_id.to_string());
        }
    }

    fn connect_url(&self) -> String {
        let query = match self.known_pairing_id() {
            Some(pairing_id) => format!("api_key={}&pairing_id={pairing_id}", self.config.api_key),
            None => format!(
                "api_key={}&pairing_code={}",
                self.config.api_key,
                self.config.pairing_code.as_deref().unwrap_or_default()
            ),
        };
        url::derive_url(&self.config.host, RELAY_PATH, &query)
    }

    fn heartbeat_frame(&self) -> Result<String> {
        let status = self.status.read().clone();
        let heartbeat = Heartbeat {
            uptime_secs: self.started_at.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            strategy_status: status.strategy_status,
            connected_venues: status.connected_venues,
            open_orders: status.open_orders,
            open_positions: status.open_positions,
            strategy_metrics: status.strategy_metrics,
        };
        Ok(serde_json::to_string(&Report::Heartbeat(heartbeat))?)
    }

    /// Handle one relay frame. Returns `false` when the session must end.
    fn handle_frame(&self, text: &str) -> bool {
        match InboundMessage::parse(text) {
            Some(InboundMessage::Control(ControlMessage::PairingConfirmed {
                pairing_id,
                relay_session_id,
            })) => {
                info!(
                    pairing_id = %pairing_id,
                    relay_session_id = %relay_session_id,
                    "Pairing confirmed"
                );
                self.store_pairing_id(&pairing_id);
                self.set_state(RelayState::Connected);
                self.emit(RelayEvent::PairingConfirmed { pairing_id });
                self.emit(RelayEvent::Connected);
                true
            }
            Some(InboundMessage::Control(ControlMessage::PairingRevoked { reason, .. })) => {
                warn!(reason = %reason, "Pairing revoked by relay");
                self.emit(RelayEvent::PairingRevoked { reason });
                self.should_reconnect.store(false, Ordering::SeqCst);
                false
            }
            Some(InboundMessage::Command(command)) => {
                debug!(command_id = %command.id(), "Command received");
                let ack = Report::ack(command.id());
                self.emit(RelayEvent::Command(command));
                // Ack is best-effort: if the socket closed in between, the
                // command already propagated and the relay retries later.
                if let Ok(frame) = serde_json::to_string(&ack) {
                    if let Some(writer) = self.writer.read().as_ref() {
                        let _ = writer.send(Message::Text(frame));
                    }
                }
                true
            }
            None => {
                debug!("Ignoring unknown relay frame");
                true
            }
        }
    }
}

/// Client for the relay control-plane WebSocket.
pub struct RelayClient {
    shared: Arc<Shared>,
}

impl RelayClient {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        let pairing_id = config.pairing_id.clone();
        Self {
            shared: Arc::new(Shared {
                config,
                state: RwLock::new(RelayState::Disconnected),
                pairing_id: RwLock::new(pairing_id),
                status: RwLock::new(RelayStatus::default()),
                events,
                writer: RwLock::new(None),
                should_reconnect: AtomicBool::new(true),
                running: AtomicBool::new(false),
                shutdown,
                started_at: Instant::now(),
            }),
        }
    }

    /// Subscribe to relay events.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> RelayState {
        self.shared.state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == RelayState::Connected
    }

    /// The confirmed pairing id, if any.
    #[must_use]
    pub fn pairing_id(&self) -> Option<String> {
        self.shared.known_pairing_id()
    }

    /// Start the connection loop.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Config`] when neither a `pairing_id` nor a
    /// `pairing_code` is available.
    pub fn connect(&self) -> Result<()> {
        if self.shared.known_pairing_id().is_none() && self.shared.config.pairing_code.is_none() {
            return Err(Error::Config(
                "relay connect requires a pairing_id or pairing_code".to_string(),
            ));
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            debug!("Relay client already running");
            return Ok(());
        }
        self.shared.should_reconnect.store(true, Ordering::SeqCst);
        self.shared.shutdown.send_replace(false);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(run_loop(shared));
        Ok(())
    }

    /// One-shot pairing: connect with the configured `pairing_code` and
    /// wait for confirmation.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::PairingTimeout`] when confirmation does not
    /// arrive within the configured deadline.
    pub async fn pair(&self) -> Result<String> {
        if let Some(pairing_id) = self.pairing_id() {
            return Ok(pairing_id);
        }
        let mut events = self.subscribe();
        self.connect()?;

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(RelayEvent::PairingConfirmed { pairing_id }) => return Some(pairing_id),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };
        match timeout(self.shared.config.pairing_timeout, wait).await {
            Ok(Some(pairing_id)) => Ok(pairing_id),
            _ => Err(Error::PairingTimeout),
        }
    }

    /// Push the status snapshot included in heartbeat frames.
    pub fn update_status(&self, status: RelayStatus) {
        *self.shared.status.write() = status;
    }

    /// Send a report to the relay.
    ///
    /// Drops with a warning when not connected — the gateway never blocks
    /// on the relay.
    pub fn send_report(&self, report: &Report) {
        if self.state() != RelayState::Connected {
            warn!("Dropping report; relay not connected");
            return;
        }
        let writer = self.shared.writer.read().clone();
        let Some(writer) = writer else {
            warn!("Dropping report; relay writer unavailable");
            return;
        };
        match serde_json::to_string(report) {
            Ok(frame) => {
                let _ = writer.send(Message::Text(frame));
            }
            Err(err) => warn!(error = %err, "Failed to encode report"),
        }
    }

    /// Stop the connection loop and close the socket.
    pub fn disconnect(&self) {
        self.shared.should_reconnect.store(false, Ordering::SeqCst);
        self.shared.shutdown.send_replace(true);
        if !self.shared.running.load(Ordering::SeqCst) {
            self.shared.set_state(RelayState::Disconnected);
        }
    }
}

async fn run_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut backoff = Backoff::new(
        shared.config.reconnect_initial_delay,
        shared.config.reconnect_max_delay,
    );

    while shared.should_reconnect.load(Ordering::SeqCst) {
        shared.set_state(RelayState::Connecting);
        let connect_url = shared.connect_url();
        debug!(url = %sanitize_url(&connect_url), "Connecting to relay");

        tokio::select! {
            result = connect_async(connect_url.as_str()) => match result {
                Ok((socket, _response)) => {
                    // Reaching open resets the ladder; a later drop retries
                    // quickly instead of inheriting the connect backoff.
                    backoff.reset();
                    info!(url = %sanitize_url(&connect_url), "Relay WebSocket open");
                    session(&shared, socket, &mut shutdown).await;
                }
                Err(err) => {
                    warn!(error = %err, "Relay connect failed");
                    shared.set_state(RelayState::Disconnected);
                }
            },
            _ = shutdown.changed() => break,
        }

        if !shared.should_reconnect.load(Ordering::SeqCst) {
            break;
        }
        let delay = backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
        tokio::select! {
            () = sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    shared.set_state(RelayState::Disconnected);
    shared.running.store(false, Ordering::SeqCst);
}

async fn session(
    shared: &Arc<Shared>,
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    shutdown: &mut watch::Receiver<bool>,
) {
    let (mut sink, mut stream) = socket.split();
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();
    *shared.writer.write() = Some(writer_tx);

    if shared.known_pairing_id().is_some() {
        shared.set_state(RelayState::Connected);
        shared.emit(RelayEvent::Connected);
    } else {
        shared.set_state(RelayState::AwaitingPairing);
    }

    let period = shared.config.heartbeat_interval;
    let mut heartbeat = interval_at(tokio::time::Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if !shared.handle_frame(&text) {
                        break;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(frame = ?frame, "Relay closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "Relay socket error");
                    break;
                }
                None => break,
            },
            Some(outbound) = writer_rx.recv() => {
                if let Err(err) = sink.send(outbound).await {
                    warn!(error = %err, "Relay send failed");
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if shared.state() == RelayState::Connected {
                    match shared.heartbeat_frame() {
                        Ok(frame) => {
                            if sink.send(Message::Text(frame)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(error = %err, "Failed to encode heartbeat"),
                    }
                }
            }
            _ = shutdown.changed() => {
                // Flush queued reports (e.g. the shutdown notice) before
                // closing the socket.
                while let Ok(outbound) = writer_rx.try_recv() {
                    if sink.send(outbound).await.is_err() {
                        break;
                    }
                }
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    *shared.writer.write() = None;
    shared.set_state(RelayState::Disconnected);
    shared.emit(RelayEvent::Disconnected);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RelayConfig {
        RelayConfig {
            host: "127.0.0.1:1".to_string(),
            api_key: "k".to_string(),
            pairing_code: Some("ABC123".to_string()),
            ..RelayConfig::default()
        }
    }

    #[test]
    fn connect_requires_pairing_credentials() {
        let client = RelayClient::new(RelayConfig {
            host: "127.0.0.1:1".to_string(),
            api_key: "k".to_string(),
            ..RelayConfig::default()
        });
        assert!(matches!(client.connect(), Err(Error::Config(_))));
    }

    #[test]
    fn connect_url_prefers_stored_pairing_id() {
        let client = RelayClient::new(config());
        assert!(client.shared.connect_url().contains("pairing_code=ABC123"));

        client.shared.store_pairing_id("P1");
        let url = client.shared.connect_url();
        assert!(url.contains("pairing_id=P1"));
        assert!(!url.contains("pairing_code"));
    }

    #[test]
    fn pairing_id_is_immutable_once_stored() {
        let client = RelayClient::new(config());
        client.shared.store_pairing_id("P1");
        client.shared.store_pairing_id("P2");
        assert_eq!(client.pairing_id().as_deref(), Some("P1"));
    }

    #[test]
    fn config_pairing_id_counts_as_known() {
        let client = RelayClient::new(RelayConfig {
            pairing_id: Some("P9".to_string()),
            ..config()
        });
        assert_eq!(client.pairing_id().as_deref(), Some("P9"));
        assert!(client.shared.connect_url().contains("pairing_id=P9"));
    }

    #[tokio::test]
    async fn send_report_drops_when_disconnected() {
        let client = RelayClient::new(config());
        // Must not panic or block.
        client.send_report(&Report::ack("C1"));
        assert_eq!(client.state(), RelayState::Disconnected);
    }

    #[test]
    fn command_frame_emits_before_ack() {
        let client = RelayClient::new(config());
        let mut events = client.subscribe();
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();
        *client.shared.writer.write() = Some(writer_tx);

        let keep_going = client.shared.handle_frame(
            r#"{"type":"pause","id":"C1"}"#,
        );
        assert!(keep_going);

        // Event observable before the ack frame is drained.
        let event = events.try_recv().unwrap();
        assert!(matches!(event, RelayEvent::Command(Command::Pause { .. })));

        let ack = writer_rx.try_recv().unwrap();
        let Message::Text(text) = ack else {
            panic!("expected text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "command_ack");
        assert_eq!(value["command_id"], "C1");
        assert_eq!(value["status"], "accepted");
    }

    #[test]
    fn revoked_frame_stops_reconnect() {
        let client = RelayClient::new(config());
        let mut events = client.subscribe();

        let keep_going = client.shared.handle_frame(
            r#"{"type":"pairing_revoked","pairing_id":"P1","reason":"operator"}"#,
        );
        assert!(!keep_going);
        assert!(!client.shared.should_reconnect.load(Ordering::SeqCst));
        assert!(matches!(
            events.try_recv().unwrap(),
            RelayEvent::PairingRevoked { .. }
        ));
    }

    #[test]
    fn unknown_frames_are_ignored() {
        let client = RelayClient::new(config());
        assert!(client.shared.handle_frame(r#"{"type":"motd"}"#));
        assert!(client.shared.handle_frame("garbage"));
    }
}

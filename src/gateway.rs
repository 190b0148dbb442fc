//! Gateway orchestration.
//!
//! Composes the relay client, order router, position tracker, signal
//! consumer, and strategy engine into one long-running process: state
//! sync on (re)connect, health supervision, strategy command execution,
//! and graceful shutdown.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::interval_at;
use tracing::{debug, info, warn};

use crate::connector::VenueConnector;
use crate::error::{Error, Result};
use crate::position::{PositionEvent, PositionTracker};
use crate::protocol::{codes, Command, ErrorReport, OrderStatus, Report};
use crate::relay::{RelayClient, RelayConfig, RelayEvent, RelayStatus};
use crate::router::{OrderRouter, RouterEvent};
use crate::signal::{SignalConsumer, SignalConsumerConfig};
use crate::strategy::{StrategyConfig, StrategyEngine};

const REPORT_CAPACITY: usize = 1024;

/// Gateway process settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub relay: RelayConfig,
    pub signals: Option<SignalConsumerConfig>,
    pub auto_trade_enabled: bool,
    pub strategy_config_path: Option<PathBuf>,
    /// Cancel every open order on every venue during shutdown.
    pub cancel_on_shutdown: bool,
    pub health_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            signals: None,
            auto_trade_enabled: false,
            strategy_config_path: None,
            cancel_on_shutdown: false,
            health_interval: Duration::from_secs(30),
        }
    }
}

/// Gateway lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Per-venue status in the gateway snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct VenueStatus {
    pub connected: bool,
    pub healthy: bool,
}

/// Point-in-time status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub state: String,
    pub relay_connected: bool,
    pub pairing_id: Option<String>,
    pub venues: HashMap<String, VenueStatus>,
    pub open_orders: usize,
    pub open_positions: usize,
    pub uptime_seconds: u64,
}

/// The gateway orchestrator.
pub struct Gateway {
    config: GatewayConfig,
    router: Arc<OrderRouter>,
    tracker: Arc<PositionTracker>,
    relay: Arc<RelayClient>,
    signals: RwLock<Option<Arc<SignalConsumer>>>,
    engine: RwLock<Option<Arc<StrategyEngine>>>,
    strategy_status_override: RwLock<Option<String>>,
    /// Venues whose `connect()` succeeded at startup.
    connected_venues: RwLock<HashSet<String>>,
    /// Previous health-tick readings, for edge detection.
    healthy_venues: RwLock<HashSet<String>>,
    /// Every outbound report, also when the relay is down.
    reports: broadcast::Sender<Report>,
    state: watch::Sender<GatewayState>,
    lifecycle: Mutex<()>,
    started_at: RwLock<Option<Instant>>,
    shutdown: watch::Sender<bool>,
}

impl Gateway {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let relay = Arc::new(RelayClient::new(config.relay.clone()));
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);
        let (state, _) = watch::channel(GatewayState::Stopped);
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            router: Arc::new(OrderRouter::new()),
            tracker: Arc::new(PositionTracker::new()),
            relay,
            signals: RwLock::new(None),
            engine: RwLock::new(None),
            strategy_status_override: RwLock::new(None),
            connected_venues: RwLock::new(HashSet::new()),
            healthy_venues: RwLock::new(HashSet::new()),
            reports,
            state,
            lifecycle: Mutex::new(()),
            started_at: RwLock::new(None),
            shutdown,
        }
    }

    #[must_use]
    pub fn router(&self) -> &Arc<OrderRouter> {
        &self.router
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<PositionTracker> {
        &self.tracker
    }

    #[must_use]
    pub fn relay(&self) -> &Arc<RelayClient> {
        &self.relay
    }

    #[must_use]
    pub fn state(&self) -> GatewayState {
        *self.state.borrow()
    }

    /// Subscribe to every outbound report, relay-connected or not.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<Report> {
        self.reports.subscribe()
    }

    /// Register a venue connector. Call before [`start`](Self::start).
    pub fn register_connector(&self, connector: Arc<dyn VenueConnector>) {
        self.router.register_connector(connector);
    }

    /// One-shot pairing flow; returns the confirmed pairing id.
    ///
    /// The id is the caller's responsibility to persist.
    pub async fn pair(self: &Arc<Self>) -> Result<String> {
        self.relay.pair().await
    }

    /// Start the gateway.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::AlreadyStarted`] from any non-stopped state and
    /// with [`Error::Config`] when the relay has no pairing credentials.
    /// Venue connect failures are logged, never fatal.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let _guard = self.lifecycle.lock();
            if self.state() != GatewayState::Stopped {
                return Err(Error::AlreadyStarted);
            }
            self.state.send_replace(GatewayState::Starting);
        }
        info!("Gateway starting");
        *self.started_at.write() = Some(Instant::now());
        self.shutdown.send_replace(false);

        // Wire relay events before connecting so nothing is missed.
        let relay_events = self.relay.subscribe();
        tokio::spawn(relay_pump(Arc::clone(self), relay_events));

        let router_events = self.router.subscribe();
        tokio::spawn(router_pump(Arc::clone(self), router_events));

        let tracker_events = self.tracker.subscribe();
        tokio::spawn(tracker_pump(Arc::clone(self), tracker_events));

        for (venue, connector) in self.router.connectors() {
            match connector.connect().await {
                Ok(()) => {
                    info!(venue = %venue, "Venue connected");
                    self.connected_venues.write().insert(venue);
                }
                Err(err) => {
                    warn!(venue = %venue, error = %err, "Venue connect failed");
                }
            }
        }
        {
            let mut healthy = self.healthy_venues.write();
            for (venue, connector) in self.router.connectors() {
                if connector.is_healthy() {
                    healthy.insert(venue);
                }
            }
        }

        if let Err(err) = self.relay.connect() {
            self.shutdown.send_replace(true);
            self.state.send_replace(GatewayState::Stopped);
            return Err(err);
        }

        tokio::spawn(health_loop(Arc::clone(self)));

        if self.config.auto_trade_enabled {
            if let Some(path) = self.config.strategy_config_path.clone() {
                self.init_strategy(&path);
            }
        }

        {
            let gateway = Arc::clone(self);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown signal received");
                    let _ = gateway.stop().await;
                }
            });
        }

        self.state.send_replace(GatewayState::Running);
        self.refresh_relay_status();
        info!("Gateway started");
        Ok(())
    }

    fn init_strategy(self: &Arc<Self>, path: &std::path::Path) {
        match StrategyConfig::load(path) {
            Ok(strategy_config) => {
                let engine = Arc::new(StrategyEngine::new(
                    strategy_config,
                    Some(Arc::clone(&self.tracker)),
                ));
                info!(
                    enabled = engine.is_enabled(),
                    dry_run = engine.dry_run(),
                    "Strategy engine initialized"
                );
                *self.engine.write() = Some(engine);

                if let Some(signal_config) = self.config.signals.clone() {
                    self.attach_signal_consumer(signal_config);
                }
            }
            Err(err) => {
                warn!(error = %err, "Strategy init failed; continuing without strategy");
                *self.strategy_status_override.write() =
                    Some("error:strategy_init_failed".to_string());
            }
        }
    }

    fn attach_signal_consumer(self: &Arc<Self>, config: SignalConsumerConfig) {
        let consumer = Arc::new(SignalConsumer::new(config));
        let events = consumer.subscribe();
        if let Err(err) = consumer.connect() {
            warn!(error = %err, "Signal consumer connect failed");
        }
        *self.signals.write() = Some(consumer);
        tokio::spawn(signal_pump(Arc::clone(self), events));
    }

    /// Stop the gateway. No-op when already stopped or stopping.
    pub async fn stop(&self) -> Result<()> {
        {
            let _guard = self.lifecycle.lock();
            let state = self.state();
            if state == GatewayState::Stopped || state == GatewayState::Stopping {
                return Ok(());
            }
            self.state.send_replace(GatewayState::Stopping);
        }
        info!("Gateway stopping");

        if let Some(engine) = self.engine.read().clone() {
            engine.disable();
        }

        if let Some(consumer) = self.signals.write().take() {
            consumer.disconnect();
        }

        // Stops the health supervisor and the event pumps.
        self.shutdown.send_replace(true);

        if self.config.cancel_on_shutdown {
            for (venue, connector) in self.router.connectors() {
                if let Err(err) = connector.cancel_all_orders().await {
                    warn!(venue = %venue, error = %err, "Shutdown cancel_all failed");
                }
            }
        }

        // The shutdown notice must leave before the relay disconnects.
        self.send_report(Report::Error(ErrorReport::new(
            codes::GATEWAY_SHUTDOWN,
            "gateway shutting down",
        )));

        for (venue, connector) in self.router.connectors() {
            if let Err(err) = connector.disconnect().await {
                warn!(venue = %venue, error = %err, "Venue disconnect failed");
            }
            self.connected_venues.write().remove(&venue);
        }

        self.relay.disconnect();

        self.state.send_replace(GatewayState::Stopped);
        info!("Gateway stopped");
        Ok(())
    }

    /// Resolve once the gateway reaches the stopped state.
    pub async fn wait_until_stopped(&self) {
        let mut state = self.state.subscribe();
        loop {
            if *state.borrow() == GatewayState::Stopped {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> GatewayStatus {
        let connected = self.connected_venues.read().clone();
        let venues = self
            .router
            .connectors()
            .into_iter()
            .map(|(venue, connector)| {
                let status = VenueStatus {
                    connected: connected.contains(&venue),
                    healthy: connector.is_healthy(),
                };
                (venue, status)
            })
            .collect();

        GatewayStatus {
            state: self.state().to_string(),
            relay_connected: self.relay.is_connected(),
            pairing_id: self.relay.pairing_id(),
            venues,
            open_orders: self.router.open_order_count(),
            open_positions: self.tracker.open_count(),
            uptime_seconds: self
                .started_at
                .read()
                .map_or(0, |started| started.elapsed().as_secs()),
        }
    }

    /// Inject strategy-synthesized commands in order.
    ///
    /// For a two-legged pair, a failed leg 1 aborts leg 2 with
    /// `ARB_LEG1_FAILED`; a failed leg 2 after a successful leg 1 raises
    /// `ARB_LEG2_FAILED_HEDGE_REQUIRED` naming both legs — the position is
    /// unhedged and an operator has to act. Only successful injections
    /// advance the strategy's rate and cooldown ledgers.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::GatewayStopped`] unless the gateway is running.
    pub async fn execute_strategy_commands(
        &self,
        commands: Vec<Command>,
        signal_id: &str,
    ) -> Result<()> {
        if self.state() != GatewayState::Running {
            return Err(Error::GatewayStopped);
        }
        let is_pair = commands.len() > 1;
        let leg_ids: Vec<String> = commands
            .iter()
            .map(|command| command.id().to_string())
            .collect();

        for (index, command) in commands.iter().enumerate() {
            self.router.route_command(command).await;

            let order = self.router.find_by_command(command.id());
            let failed = order
                .as_ref()
                .map_or(true, |order| order.status == OrderStatus::Rejected);

            if failed {
                if is_pair && index == 0 {
                    warn!(
                        signal_id = %signal_id,
                        leg1 = %leg_ids[0],
                        leg2 = %leg_ids[1],
                        "Arbitrage leg 1 failed; aborting leg 2"
                    );
                    self.send_report(Report::Error(
                        ErrorReport::new(
                            codes::ARB_LEG1_FAILED,
                            format!(
                                "leg 1 ({}) of arbitrage pair for signal {signal_id} failed; \
                                 leg 2 ({}) aborted",
                                leg_ids[0], leg_ids[1]
                            ),
                        )
                        .with_command_id(&leg_ids[0]),
                    ));
                    return Ok(());
                }
                if is_pair && index == 1 {
                    warn!(
                        signal_id = %signal_id,
                        leg1 = %leg_ids[0],
                        leg2 = %leg_ids[1],
                        "Arbitrage leg 2 failed after leg 1 executed; position unhedged"
                    );
                    self.send_report(Report::Error(
                        ErrorReport::new(
                            codes::ARB_LEG2_FAILED_HEDGE_REQUIRED,
                            format!(
                                "leg 2 ({}) failed after leg 1 ({}) executed for signal \
                                 {signal_id}; position is unhedged, operator action required",
                                leg_ids[1], leg_ids[0]
                            ),
                        )
                        .with_command_id(&leg_ids[1]),
                    ));
                    continue;
                }
                warn!(
                    signal_id = %signal_id,
                    command_id = %command.id(),
                    "Strategy command failed to execute"
                );
                continue;
            }

            if let Command::Trade(trade) = command {
                if let Some(engine) = self.engine.read().clone() {
                    engine.record_executed_trade(&trade.market_id);
                }
            }
        }
        Ok(())
    }

    /// Handle one inbound relay command.
    ///
    /// Pause and resume also gate the strategy engine before the command
    /// reaches the router.
    async fn handle_command(&self, command: Command) {
        match &command {
            Command::Pause { .. } => {
                if let Some(engine) = self.engine.read().clone() {
                    engine.disable();
                }
                *self.strategy_status_override.write() = Some("paused".to_string());
            }
            Command::Resume { .. } => {
                if let Some(engine) = self.engine.read().clone() {
                    engine.enable();
                }
                *self.strategy_status_override.write() = None;
            }
            _ => {}
        }
        self.router.route_command(&command).await;
        self.refresh_relay_status();
    }

    /// Push positions and venue health to a freshly connected relay.
    fn sync_state(&self) {
        debug!("Relay connected; syncing state");
        for position in self.tracker.positions() {
            self.send_report(Report::Position(position));
        }
        for (venue, connector) in self.router.connectors() {
            if !connector.is_healthy() {
                self.send_report(Report::Error(
                    ErrorReport::new(
                        codes::VENUE_UNHEALTHY,
                        format!("venue {venue} is unhealthy"),
                    )
                    .with_venue(venue),
                ));
            }
        }
        self.refresh_relay_status();
    }

    /// One health-supervisor tick: a single fresh reading per venue
    /// compared against the previous tick's cache.
    fn run_health_check(&self) {
        let mut newly_unhealthy = Vec::new();
        {
            let mut healthy = self.healthy_venues.write();
            for (venue, connector) in self.router.connectors() {
                let now_healthy = connector.is_healthy();
                let was_healthy = healthy.contains(&venue);
                if was_healthy && !now_healthy {
                    newly_unhealthy.push(venue.clone());
                }
                if now_healthy {
                    healthy.insert(venue);
                } else {
                    healthy.remove(&venue);
                }
            }
        }
        for venue in newly_unhealthy {
            warn!(venue = %venue, "Venue became unhealthy");
            self.send_report(Report::Error(
                ErrorReport::new(
                    codes::VENUE_UNHEALTHY,
                    format!("venue {venue} is unhealthy"),
                )
                .with_venue(venue),
            ));
        }
        self.refresh_relay_status();
    }

    /// Publish a report locally and forward to the relay when connected.
    fn send_report(&self, report: Report) {
        let _ = self.reports.send(report.clone());
        if self.relay.is_connected() {
            self.relay.send_report(&report);
        } else {
            debug!("Relay not connected; report dropped");
        }
    }

    fn refresh_relay_status(&self) {
        let engine = self.engine.read().clone();
        let strategy_status = self
            .strategy_status_override
            .read()
            .clone()
            .unwrap_or_else(|| match &engine {
                Some(engine) if engine.is_enabled() => {
                    if engine.dry_run() {
                        "dry_run".to_string()
                    } else {
                        "active".to_string()
                    }
                }
                _ => "disabled".to_string(),
            });

        let mut connected_venues: Vec<String> =
            self.healthy_venues.read().iter().cloned().collect();
        connected_venues.sort();

        self.relay.update_status(RelayStatus {
            strategy_status,
            connected_venues,
            open_orders: self.router.open_order_count(),
            open_positions: self.tracker.open_count(),
            strategy_metrics: engine.map(|engine| engine.metrics()),
        });
    }
}

async fn relay_pump(gateway: Arc<Gateway>, mut events: broadcast::Receiver<RelayEvent>) {
    let mut shutdown = gateway.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(RelayEvent::Command(command)) => gateway.handle_command(command).await,
                Ok(RelayEvent::Connected) => gateway.sync_state(),
                Ok(RelayEvent::PairingRevoked { reason }) => {
                    warn!(reason = %reason, "Pairing revoked; relay will not reconnect");
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Relay event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn router_pump(gateway: Arc<Gateway>, mut events: broadcast::Receiver<RouterEvent>) {
    let mut shutdown = gateway.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(RouterEvent::OrderUpdate(update)) => {
                    // Forward before tracking so the position report never
                    // overtakes the order update on the wire.
                    gateway.send_report(Report::OrderUpdate(update.clone()));
                    if update.status == OrderStatus::Filled {
                        gateway.tracker.record_fill(&update);
                    }
                    gateway.refresh_relay_status();
                }
                Ok(RouterEvent::Error(report)) => {
                    gateway.send_report(Report::Error(report));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Router event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn tracker_pump(gateway: Arc<Gateway>, mut events: broadcast::Receiver<PositionEvent>) {
    let mut shutdown = gateway.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(PositionEvent::Updated(position)) => {
                    gateway.send_report(Report::Position(position));
                    gateway.refresh_relay_status();
                }
                Ok(PositionEvent::Settled(settlement)) => {
                    gateway.send_report(Report::Settlement(settlement));
                    gateway.refresh_relay_status();
                }
                Ok(PositionEvent::Removed { .. }) => {
                    gateway.refresh_relay_status();
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Tracker event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn signal_pump(
    gateway: Arc<Gateway>,
    mut signals: broadcast::Receiver<crate::protocol::Signal>,
) {
    let mut shutdown = gateway.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            signal = signals.recv() => match signal {
                Ok(signal) => {
                    let engine = gateway.engine.read().clone();
                    let Some(engine) = engine else {
                        continue;
                    };
                    if let Some(commands) = engine.handle_signal(&signal) {
                        if engine.dry_run() {
                            debug!(signal_id = %signal.id, "Dry run; commands not injected");
                            continue;
                        }
                        if let Err(err) = gateway
                            .execute_strategy_commands(commands, &signal.id)
                            .await
                        {
                            warn!(signal_id = %signal.id, error = %err, "Strategy execution refused");
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Signal stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn health_loop(gateway: Arc<Gateway>) {
    let mut shutdown = gateway.shutdown.subscribe();
    let period = gateway.config.health_interval;
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => gateway.run_health_check(),
        }
    }
}

//! Order routing: venue dispatch, order lifecycle, pause gate.
//!
//! The router owns the order map for the process lifetime — orders are
//! never deleted, only transitioned. Every failure surfaces as a
//! [`RouterEvent::Error`]; nothing raises out to the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::RwLock;
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::connector::{OrderRequest, VenueConnector};
use crate::protocol::{codes, Command, ErrorReport, OrderStatus, OrderUpdate, TradeCommand};

const EVENT_CAPACITY: usize = 512;
const ORDER_ID_SUFFIX_LEN: usize = 6;

/// A router-tracked order.
#[derive(Debug, Clone)]
pub struct Order {
    /// Locally minted `<venue>-<ms_epoch>-<suffix>` id.
    pub order_id: String,
    /// Id of the trade command that created the order.
    pub command_id: String,
    pub venue: String,
    /// Colon-joined `<venue>:<native_id>`.
    pub market_id: String,
    pub side: String,
    pub action: String,
    pub size: Decimal,
    pub status: OrderStatus,
    /// The venue's own id, recorded once the connector returns it.
    pub venue_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Event emitted by the router.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    OrderUpdate(OrderUpdate),
    Error(ErrorReport),
}

/// Split a colon-joined market id into `(venue, native_id)`.
#[must_use]
pub fn parse_market_id(market_id: &str) -> Option<(&str, &str)> {
    match market_id.split_once(':') {
        Some((venue, native)) if !venue.is_empty() && !native.is_empty() => Some((venue, native)),
        _ => None,
    }
}

/// Dispatches commands to venue connectors and tracks order lifecycles.
pub struct OrderRouter {
    connectors: RwLock<HashMap<String, Arc<dyn VenueConnector>>>,
    orders: RwLock<HashMap<String, Order>>,
    paused: AtomicBool,
    events: broadcast::Sender<RouterEvent>,
}

impl OrderRouter {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            connectors: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            paused: AtomicBool::new(false),
            events,
        }
    }

    /// Subscribe to order updates and routing errors.
    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }

    /// Register a connector under its lowercase venue key.
    ///
    /// Re-registering a venue replaces the previous connector.
    pub fn register_connector(&self, connector: Arc<dyn VenueConnector>) {
        let venue = connector.venue().to_lowercase();
        info!(venue = %venue, "Connector registered");
        self.connectors.write().insert(venue, connector);
    }

    /// The connector for a venue, if registered.
    #[must_use]
    pub fn connector(&self, venue: &str) -> Option<Arc<dyn VenueConnector>> {
        self.connectors.read().get(venue).cloned()
    }

    /// Every registered connector, keyed by venue.
    #[must_use]
    pub fn connectors(&self) -> Vec<(String, Arc<dyn VenueConnector>)> {
        self.connectors
            .read()
            .iter()
            .map(|(venue, connector)| (venue.clone(), Arc::clone(connector)))
            .collect()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Snapshot of every tracked order.
    #[must_use]
    pub fn get_orders(&self) -> Vec<Order> {
        self.orders.read().values().cloned().collect()
    }

    /// A tracked order by its router-minted id.
    #[must_use]
    pub fn get_order(&self, order_id: &str) -> Option<Order> {
        self.orders.read().get(order_id).cloned()
    }

    /// The order created by a given trade command, if any.
    #[must_use]
    pub fn find_by_command(&self, command_id: &str) -> Option<Order> {
        self.orders
            .read()
            .values()
            .find(|order| order.command_id == command_id)
            .cloned()
    }

    /// Orders still in a non-terminal state.
    #[must_use]
    pub fn open_order_count(&self) -> usize {
        self.orders
            .read()
            .values()
            .filter(|order| !order.status.is_terminal())
            .count()
    }

    /// Route a command to its venue.
    ///
    /// Failures surface as [`RouterEvent::Error`]s; this never returns an
    /// error to the caller.
    pub async fn route_command(&self, command: &Command) {
        match command {
            Command::Trade(trade) => self.route_trade(trade).await,
            Command::Cancel { id, order_id } => self.route_cancel(id, order_id).await,
            Command::CancelAll { id } => self.route_cancel_all(id).await,
            Command::Pause { .. } => {
                self.paused.store(true, Ordering::SeqCst);
                info!("Gateway paused; new trade commands will be refused");
            }
            Command::Resume { .. } => {
                self.paused.store(false, Ordering::SeqCst);
                info!("Gateway resumed");
            }
        }
    }

    async fn route_trade(&self, trade: &TradeCommand) {
        if self.is_paused() {
            self.emit_error(
                ErrorReport::new(codes::GATEWAY_PAUSED, "gateway is paused")
                    .with_command_id(&trade.id)
                    .with_market_id(&trade.market_id),
            );
            return;
        }

        let Some((venue, native_id)) = parse_market_id(&trade.market_id) else {
            self.emit_error(
                ErrorReport::new(
                    codes::INVALID_MARKET_ID,
                    format!("market id {:?} is not <venue>:<native_id>", trade.market_id),
                )
                .with_command_id(&trade.id)
                .with_market_id(&trade.market_id),
            );
            return;
        };

        let Some(connector) = self.connector(venue) else {
            self.emit_error(
                ErrorReport::new(
                    codes::VENUE_NOT_FOUND,
                    format!("no connector registered for venue {venue}"),
                )
                .with_venue(venue)
                .with_command_id(&trade.id),
            );
            return;
        };

        if !connector.is_healthy() {
            self.emit_error(
                ErrorReport::new(
                    codes::VENUE_UNHEALTHY,
                    format!("venue {venue} is unhealthy"),
                )
                .with_venue(venue)
                .with_command_id(&trade.id),
            );
            return;
        }

        let order_id = self.mint_order_id(venue);
        let order = Order {
            order_id: order_id.clone(),
            command_id: trade.id.clone(),
            venue: venue.to_string(),
            market_id: trade.market_id.clone(),
            side: trade.side.clone(),
            action: trade.action.clone(),
            size: trade.size,
            status: OrderStatus::Pending,
            venue_order_id: None,
            created_at: Utc::now(),
        };
        self.orders.write().insert(order_id.clone(), order);

        let request = OrderRequest {
            market_id: native_id.to_string(),
            side: trade.side.clone(),
            action: trade.action.clone(),
            size: trade.size,
            order_type: trade.order_type,
            limit_price: trade.limit_price,
        };

        debug!(
            order_id = %order_id,
            venue = %venue,
            market_id = %trade.market_id,
            "Placing order"
        );

        match connector.place_order(&request).await {
            Ok(result) => {
                let updated = self.apply_status(&order_id, result.status, |order| {
                    order.venue_order_id = result.order_id.clone();
                });
                if let Some(order) = updated {
                    self.emit_update(&order, result.fill_price, result.error.clone());
                    if result.status == OrderStatus::Rejected {
                        if let Some(error) = result.error {
                            self.emit_error(
                                ErrorReport::new(codes::ORDER_REJECTED, error)
                                    .with_venue(venue)
                                    .with_command_id(&trade.id)
                                    .with_order_id(&order_id)
                                    .with_market_id(&trade.market_id),
                            );
                        }
                    }
                }
            }
            Err(err) => {
                warn!(
                    order_id = %order_id,
                    venue = %venue,
                    error = %err,
                    "Order placement failed"
                );
                let updated = self.apply_status(&order_id, OrderStatus::Rejected, |_| {});
                self.emit_error(
                    ErrorReport::new(codes::ORDER_PLACEMENT_FAILED, err.to_string())
                        .with_venue(venue)
                        .with_command_id(&trade.id)
                        .with_order_id(&order_id)
                        .with_market_id(&trade.market_id),
                );
                if let Some(order) = updated {
                    self.emit_update(&order, None, Some(err.to_string()));
                }
            }
        }
    }

    async fn route_cancel(&self, command_id: &str, order_id: &str) {
        let Some(order) = self.get_order(order_id) else {
            self.emit_error(
                ErrorReport::new(
                    codes::ORDER_NOT_FOUND,
                    format!("no tracked order with id {order_id}"),
                )
                .with_command_id(command_id)
                .with_order_id(order_id),
            );
            return;
        };

        let Some(connector) = self.connector(&order.venue) else {
            self.emit_error(
                ErrorReport::new(
                    codes::CANCEL_FAILED,
                    format!("no connector registered for venue {}", order.venue),
                )
                .with_venue(&order.venue)
                .with_command_id(command_id)
                .with_order_id(order_id),
            );
            return;
        };

        // Venues only know their own ids; fall back to ours when the
        // placement never returned one.
        let venue_order_id = order
            .venue_order_id
            .clone()
            .unwrap_or_else(|| order.order_id.clone());

        match connector.cancel_order(&venue_order_id).await {
            Ok(()) => {
                let updated = self.apply_status(order_id, OrderStatus::Cancelled, |_| {});
                if let Some(order) = updated {
                    // Updates keep the originating trade command's id so a
                    // consumer can correlate the full lifecycle.
                    self.emit_update(&order, None, None);
                }
            }
            Err(err) => {
                self.emit_error(
                    ErrorReport::new(codes::CANCEL_FAILED, err.to_string())
                        .with_venue(&order.venue)
                        .with_command_id(command_id)
                        .with_order_id(order_id),
                );
            }
        }
    }

    async fn route_cancel_all(&self, command_id: &str) {
        let connectors = self.connectors();

        let cancels = connectors.iter().map(|(venue, connector)| {
            let venue = venue.clone();
            let connector = Arc::clone(connector);
            async move { (venue, connector.cancel_all_orders().await) }
        });

        for (venue, result) in join_all(cancels).await {
            if let Err(err) = result {
                warn!(venue = %venue, error = %err, "cancel_all failed");
                self.emit_error(
                    ErrorReport::new(codes::CANCEL_ALL_FAILED, err.to_string())
                        .with_venue(venue)
                        .with_command_id(command_id),
                );
            }
        }

        let open: Vec<String> = self
            .orders
            .read()
            .values()
            .filter(|order| {
                matches!(order.status, OrderStatus::Pending | OrderStatus::Submitted)
            })
            .map(|order| order.order_id.clone())
            .collect();

        for order_id in open {
            if let Some(order) = self.apply_status(&order_id, OrderStatus::Cancelled, |_| {}) {
                self.emit_update(&order, None, None);
            }
        }
    }

    /// Mint a `<venue>-<ms_epoch>-<suffix>` id, regenerating on the
    /// (negligible) chance of a collision.
    fn mint_order_id(&self, venue: &str) -> String {
        loop {
            let suffix: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(ORDER_ID_SUFFIX_LEN)
                .map(char::from)
                .collect();
            let candidate = format!("{venue}-{}-{suffix}", Utc::now().timestamp_millis());
            if !self.orders.read().contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Transition an order, refusing to leave a terminal state. Returns the
    /// updated order, or `None` when the transition was refused or the
    /// order is unknown.
    fn apply_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        mutate: impl FnOnce(&mut Order),
    ) -> Option<Order> {
        let mut orders = self.orders.write();
        let order = orders.get_mut(order_id)?;
        if order.status.is_terminal() {
            return None;
        }
        order.status = status;
        mutate(order);
        Some(order.clone())
    }

    fn emit_update(&self, order: &Order, fill_price: Option<Decimal>, error: Option<String>) {
        let _ = self.events.send(RouterEvent::OrderUpdate(OrderUpdate {
            order_id: order.order_id.clone(),
            command_id: order.command_id.clone(),
            venue: order.venue.clone(),
            market_id: order.market_id.clone(),
            side: order.side.clone(),
            size: order.size,
            status: order.status,
            venue_order_id: order.venue_order_id.clone(),
            fill_price,
            error,
        }));
    }

    fn emit_error(&self, report: ErrorReport) {
        warn!(code = %report.code, message = %report.message, "Routing error");
        let _ = self.events.send(RouterEvent::Error(report));
    }
}

impl Default for OrderRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::connector::OrderResult;
    use crate::error::{Error, VenueErrorKind};
    use crate::testkit::connector::MockConnector;
    use crate::testkit::fixtures::trade_command;

    fn drain(events: &mut broadcast::Receiver<RouterEvent>) -> Vec<RouterEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn market_id_parsing() {
        assert_eq!(parse_market_id("kalshi:M"), Some(("kalshi", "M")));
        assert_eq!(
            parse_market_id("binance:BTC:USDT"),
            Some(("binance", "BTC:USDT"))
        );
        assert_eq!(parse_market_id("kalshi"), None);
        assert_eq!(parse_market_id(":M"), None);
        assert_eq!(parse_market_id("kalshi:"), None);
    }

    #[tokio::test]
    async fn trade_to_healthy_connector_fills() {
        let router = OrderRouter::new();
        let connector = Arc::new(
            MockConnector::new("kalshi")
                .with_place_results(vec![Ok(OrderResult::filled("venue-42", dec!(0.72)))]),
        );
        router.register_connector(connector.clone());
        let mut events = router.subscribe();

        router
            .route_command(&Command::Trade(trade_command("C1", "kalshi:M")))
            .await;

        // Connector saw the native id, not the colon-joined one.
        let placed = connector.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].market_id, "M");

        let events = drain(&mut events);
        assert_eq!(events.len(), 1);
        let RouterEvent::OrderUpdate(update) = &events[0] else {
            panic!("expected order update");
        };
        assert_eq!(update.status, OrderStatus::Filled);
        assert_eq!(update.market_id, "kalshi:M");
        assert_eq!(update.fill_price, Some(dec!(0.72)));
        assert_eq!(update.venue_order_id.as_deref(), Some("venue-42"));

        let order = router.find_by_command("C1").unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn unknown_venue_is_reported_without_order() {
        let router = OrderRouter::new();
        router.register_connector(Arc::new(MockConnector::new("kalshi")));
        let mut events = router.subscribe();

        router
            .route_command(&Command::Trade(trade_command("C2", "kraken:X")))
            .await;

        let events = drain(&mut events);
        assert_eq!(events.len(), 1);
        let RouterEvent::Error(report) = &events[0] else {
            panic!("expected error");
        };
        assert_eq!(report.code, codes::VENUE_NOT_FOUND);
        assert_eq!(report.venue.as_deref(), Some("kraken"));
        assert_eq!(report.command_id.as_deref(), Some("C2"));
        assert!(router.get_orders().is_empty());
    }

    #[tokio::test]
    async fn malformed_market_id_is_rejected() {
        let router = OrderRouter::new();
        let mut events = router.subscribe();

        router
            .route_command(&Command::Trade(trade_command("C3", "nocolon")))
            .await;

        let events = drain(&mut events);
        let RouterEvent::Error(report) = &events[0] else {
            panic!("expected error");
        };
        assert_eq!(report.code, codes::INVALID_MARKET_ID);
    }

    #[tokio::test]
    async fn unhealthy_venue_blocks_trade() {
        let router = OrderRouter::new();
        let connector = Arc::new(MockConnector::new("kalshi"));
        connector.set_healthy(false);
        router.register_connector(connector.clone());
        let mut events = router.subscribe();

        router
            .route_command(&Command::Trade(trade_command("C4", "kalshi:M")))
            .await;

        let events = drain(&mut events);
        let RouterEvent::Error(report) = &events[0] else {
            panic!("expected error");
        };
        assert_eq!(report.code, codes::VENUE_UNHEALTHY);
        assert!(connector.placed().is_empty());
    }

    #[tokio::test]
    async fn paused_gateway_refuses_trades_but_not_cancels() {
        let router = OrderRouter::new();
        let connector = Arc::new(
            MockConnector::new("kalshi")
                .with_place_results(vec![Ok(OrderResult::submitted("venue-7"))]),
        );
        router.register_connector(connector.clone());

        router
            .route_command(&Command::Trade(trade_command("C5", "kalshi:M")))
            .await;
        let order = router.find_by_command("C5").unwrap();

        router
            .route_command(&Command::Pause {
                id: "C6".to_string(),
            })
            .await;
        assert!(router.is_paused());

        let mut events = router.subscribe();
        router
            .route_command(&Command::Trade(trade_command("C7", "kalshi:M")))
            .await;
        let paused_events = drain(&mut events);
        let RouterEvent::Error(report) = &paused_events[0] else {
            panic!("expected error");
        };
        assert_eq!(report.code, codes::GATEWAY_PAUSED);
        assert_eq!(connector.placed().len(), 1);

        // Cancels still flow while paused.
        router
            .route_command(&Command::Cancel {
                id: "C8".to_string(),
                order_id: order.order_id.clone(),
            })
            .await;
        assert_eq!(
            router.get_order(&order.order_id).unwrap().status,
            OrderStatus::Cancelled
        );

        router
            .route_command(&Command::Resume {
                id: "C9".to_string(),
            })
            .await;
        assert!(!router.is_paused());
    }

    #[tokio::test]
    async fn rejected_result_emits_update_and_error() {
        let router = OrderRouter::new();
        let connector = Arc::new(
            MockConnector::new("kalshi")
                .with_place_results(vec![Ok(OrderResult::rejected("INSUFFICIENT_BALANCE"))]),
        );
        router.register_connector(connector);
        let mut events = router.subscribe();

        router
            .route_command(&Command::Trade(trade_command("C10", "kalshi:M")))
            .await;

        let events = drain(&mut events);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            RouterEvent::OrderUpdate(u) if u.status == OrderStatus::Rejected
        ));
        let RouterEvent::Error(report) = &events[1] else {
            panic!("expected error");
        };
        assert_eq!(report.code, codes::ORDER_REJECTED);
        assert_eq!(report.message, "INSUFFICIENT_BALANCE");
    }

    #[tokio::test]
    async fn thrown_placement_failure_marks_rejected() {
        let router = OrderRouter::new();
        let connector = Arc::new(MockConnector::new("kalshi").with_place_results(vec![Err(
            Error::venue(VenueErrorKind::RateLimited, "throttled"),
        )]));
        router.register_connector(connector);
        let mut events = router.subscribe();

        router
            .route_command(&Command::Trade(trade_command("C11", "kalshi:M")))
            .await;

        let events = drain(&mut events);
        assert_eq!(events.len(), 2);
        let RouterEvent::Error(report) = &events[0] else {
            panic!("expected error first");
        };
        assert_eq!(report.code, codes::ORDER_PLACEMENT_FAILED);
        assert!(report.message.contains("RATE_LIMITED"));
        assert!(matches!(
            &events[1],
            RouterEvent::OrderUpdate(u) if u.status == OrderStatus::Rejected
        ));
    }

    #[tokio::test]
    async fn cancel_unknown_order_reports_not_found() {
        let router = OrderRouter::new();
        let mut events = router.subscribe();

        router
            .route_command(&Command::Cancel {
                id: "C12".to_string(),
                order_id: "ghost".to_string(),
            })
            .await;

        let events = drain(&mut events);
        let RouterEvent::Error(report) = &events[0] else {
            panic!("expected error");
        };
        assert_eq!(report.code, codes::ORDER_NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_uses_venue_order_id_and_keeps_trade_command_id() {
        let router = OrderRouter::new();
        let connector = Arc::new(
            MockConnector::new("kalshi")
                .with_place_results(vec![Ok(OrderResult::submitted("venue-55"))]),
        );
        router.register_connector(connector.clone());

        router
            .route_command(&Command::Trade(trade_command("C13", "kalshi:M")))
            .await;
        let order = router.find_by_command("C13").unwrap();

        let mut events = router.subscribe();
        router
            .route_command(&Command::Cancel {
                id: "C14".to_string(),
                order_id: order.order_id.clone(),
            })
            .await;

        assert_eq!(connector.cancelled(), vec!["venue-55".to_string()]);
        let events = drain(&mut events);
        let RouterEvent::OrderUpdate(update) = &events[0] else {
            panic!("expected update");
        };
        assert_eq!(update.status, OrderStatus::Cancelled);
        assert_eq!(update.command_id, "C13");
    }

    #[tokio::test]
    async fn cancel_all_fans_out_and_cancels_open_orders() {
        let router = OrderRouter::new();
        let kalshi = Arc::new(
            MockConnector::new("kalshi")
                .with_place_results(vec![Ok(OrderResult::submitted("k-1"))]),
        );
        let polymarket = Arc::new(
            MockConnector::new("polymarket").with_cancel_all_results(vec![Err(Error::venue(
                VenueErrorKind::Other("VENUE_DOWN".to_string()),
                "maintenance",
            ))]),
        );
        router.register_connector(kalshi.clone());
        router.register_connector(polymarket.clone());

        router
            .route_command(&Command::Trade(trade_command("C15", "kalshi:M")))
            .await;

        let mut events = router.subscribe();
        router
            .route_command(&Command::CancelAll {
                id: "C16".to_string(),
            })
            .await;

        assert_eq!(kalshi.cancel_all_calls(), 1);
        assert_eq!(polymarket.cancel_all_calls(), 1);

        let events = drain(&mut events);
        let errors: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                RouterEvent::Error(r) => Some(r),
                RouterEvent::OrderUpdate(_) => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, codes::CANCEL_ALL_FAILED);
        assert_eq!(errors[0].venue.as_deref(), Some("polymarket"));

        let updates: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                RouterEvent::OrderUpdate(u) => Some(u),
                RouterEvent::Error(_) => None,
            })
            .collect();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, OrderStatus::Cancelled);

        // Filled orders are untouched; submitted ones were cancelled.
        assert_eq!(router.open_order_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_trades_get_distinct_order_ids() {
        let router = Arc::new(OrderRouter::new());
        let connector = Arc::new(MockConnector::new("kalshi"));
        router.register_connector(connector);

        let mut handles = Vec::new();
        for i in 0..8 {
            let router = Arc::clone(&router);
            handles.push(tokio::spawn(async move {
                router
                    .route_command(&Command::Trade(trade_command(
                        &format!("CC{i}"),
                        "kalshi:M",
                    )))
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let orders = router.get_orders();
        assert_eq!(orders.len(), 8);
        let mut ids: Vec<_> = orders.iter().map(|o| o.order_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
    }

    #[tokio::test]
    async fn orders_persist_after_terminal_state() {
        let router = OrderRouter::new();
        let connector = Arc::new(
            MockConnector::new("kalshi")
                .with_place_results(vec![Ok(OrderResult::filled("venue-1", dec!(0.50)))]),
        );
        router.register_connector(connector);

        router
            .route_command(&Command::Trade(trade_command("C17", "kalshi:M")))
            .await;

        assert_eq!(router.get_orders().len(), 1);
        assert_eq!(router.open_order_count(), 0);
    }
}

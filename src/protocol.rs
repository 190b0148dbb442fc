//! Wire schema for the relay and signal WebSockets.
//!
//! Every frame is a single newline-free JSON object discriminated by a
//! `type` field. Unknown `type`s are never fatal: inbound parsing returns
//! `None` and the caller logs and ignores the frame.
//!
//! Decimal sizes and prices use [`rust_decimal::Decimal`], whose serde
//! implementation accepts both JSON numbers and decimal strings on input
//! and emits decimal strings on output, so venue payloads that quote
//! prices as strings parse at the edge without a separate code path.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Error codes surfaced in [`ErrorReport`] frames and API failures.
pub mod codes {
    pub const GATEWAY_PAUSED: &str = "GATEWAY_PAUSED";
    pub const GATEWAY_SHUTDOWN: &str = "GATEWAY_SHUTDOWN";
    pub const VENUE_NOT_FOUND: &str = "VENUE_NOT_FOUND";
    pub const VENUE_UNHEALTHY: &str = "VENUE_UNHEALTHY";
    pub const INVALID_MARKET_ID: &str = "INVALID_MARKET_ID";
    pub const ORDER_NOT_FOUND: &str = "ORDER_NOT_FOUND";
    pub const ORDER_PLACEMENT_FAILED: &str = "ORDER_PLACEMENT_FAILED";
    pub const ORDER_REJECTED: &str = "ORDER_REJECTED";
    pub const CANCEL_FAILED: &str = "CANCEL_FAILED";
    pub const CANCEL_ALL_FAILED: &str = "CANCEL_ALL_FAILED";
    pub const ARB_LEG1_FAILED: &str = "ARB_LEG1_FAILED";
    pub const ARB_LEG2_FAILED_HEDGE_REQUIRED: &str = "ARB_LEG2_FAILED_HEDGE_REQUIRED";
}

// ---------------------------------------------------------------------------
// Commands (relay -> gateway)
// ---------------------------------------------------------------------------

/// Order execution style for a trade command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// Payload of a `trade` command.
///
/// `side` and `action` are opaque strings at the wire boundary
/// (`yes|no|buy|sell|long|short`, `open|close|buy|sell`); only the venue
/// connector and the strategy engine interpret them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCommand {
    pub id: String,
    /// Colon-joined `<venue>:<native_id>`.
    pub market_id: String,
    pub venue: String,
    pub side: String,
    pub action: String,
    pub size: Decimal,
    pub order_type: OrderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
}

/// Control-plane command received over the relay socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Trade(TradeCommand),
    Cancel { id: String, order_id: String },
    CancelAll { id: String },
    Pause { id: String },
    Resume { id: String },
}

impl Command {
    /// Unique command id carried by every variant.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Trade(trade) => &trade.id,
            Self::Cancel { id, .. }
            | Self::CancelAll { id }
            | Self::Pause { id }
            | Self::Resume { id } => id,
        }
    }
}

/// Server-only control frames on the relay socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    PairingConfirmed {
        pairing_id: String,
        relay_session_id: String,
    },
    PairingRevoked {
        pairing_id: String,
        reason: String,
    },
}

/// Any frame the relay may send to the gateway.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Command(Command),
    Control(ControlMessage),
}

impl InboundMessage {
    /// Parse a relay frame. Returns `None` for unknown or malformed frames
    /// so the caller can log and move on.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        if let Ok(command) = serde_json::from_str::<Command>(text) {
            return Some(Self::Command(command));
        }
        serde_json::from_str::<ControlMessage>(text)
            .ok()
            .map(Self::Control)
    }
}

// ---------------------------------------------------------------------------
// Reports (gateway -> relay)
// ---------------------------------------------------------------------------

/// Lifecycle state of a router-tracked order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    /// Terminal states never transition again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Rejected | Self::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Filled => "filled",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Order lifecycle report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub command_id: String,
    pub venue: String,
    /// Colon-joined `<venue>:<native_id>`.
    pub market_id: String,
    pub side: String,
    pub size: Decimal,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue_order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A tracked position, keyed by `(venue, market_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub venue: String,
    pub market_id: String,
    pub side: String,
    pub size: Decimal,
    pub entry_price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_price: Option<Decimal>,
    /// Derived from `current_price`; recomputed on every update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unrealized_pnl: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_expires_at: Option<DateTime<Utc>>,
}

/// Immutable record of a settled market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub venue: String,
    pub market_id: String,
    pub result: String,
    pub entry_price: Decimal,
    pub settlement_price: Decimal,
    pub realized_pnl: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Strategy engine counters included in heartbeats.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyMetrics {
    pub signals_received: u64,
    pub signals_dropped: u64,
    pub trades_generated: u64,
    pub dry_run_trades: u64,
}

/// Periodic liveness report with a status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub uptime_secs: u64,
    pub version: String,
    pub strategy_status: String,
    pub connected_venues: Vec<String>,
    pub open_orders: usize,
    pub open_positions: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_metrics: Option<StrategyMetrics>,
}

/// Error report sent to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_id: Option<String>,
}

impl ErrorReport {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            venue: None,
            command_id: None,
            order_id: None,
            market_id: None,
        }
    }

    #[must_use]
    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    #[must_use]
    pub fn with_command_id(mut self, command_id: impl Into<String>) -> Self {
        self.command_id = Some(command_id.into());
        self
    }

    #[must_use]
    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    #[must_use]
    pub fn with_market_id(mut self, market_id: impl Into<String>) -> Self {
        self.market_id = Some(market_id.into());
        self
    }
}

/// Outbound frame sent to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Report {
    Heartbeat(Heartbeat),
    CommandAck {
        command_id: String,
        status: String,
    },
    OrderUpdate(OrderUpdate),
    Position(Position),
    Settlement(Settlement),
    Error(ErrorReport),
}

impl Report {
    /// The acknowledgement sent for every inbound command.
    ///
    /// The gateway never rejects at the relay layer, so the status is
    /// always `accepted`.
    #[must_use]
    pub fn ack(command_id: &str) -> Self {
        Self::CommandAck {
            command_id: command_id.to_string(),
            status: "accepted".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Signals (public stream -> strategy engine)
// ---------------------------------------------------------------------------

/// Signal severity, ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "Low")]
    Low,
    #[serde(alias = "Medium")]
    Medium,
    #[serde(alias = "High")]
    High,
    #[serde(alias = "Critical")]
    Critical,
}

/// A decoded event from the public signal stream.
///
/// Only `id` and `signal_type` are required; everything else is optional
/// and rule filters simply skip absent fields. The raw `payload` is kept
/// opaque until a rule needs to read prices or arbitrage legs out of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub signal_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Signal {
    /// `"<base>/<quote>"` when both legs are present.
    #[must_use]
    pub fn symbol(&self) -> Option<String> {
        match (&self.base, &self.quote) {
            (Some(base), Some(quote)) => Some(format!("{base}/{quote}")),
            _ => None,
        }
    }
}

/// Cross-venue arbitrage legs carried in a signal payload.
///
/// Prices arrive as decimal strings from the venues and parse at this edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitragePayload {
    pub buy_venue: String,
    pub sell_venue: String,
    pub buy_market_id: String,
    pub sell_market_id: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buy_outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sell_outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_cutoff_utc: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_end_utc: Option<DateTime<Utc>>,
}

impl ArbitragePayload {
    /// Try to read arbitrage legs out of a signal's payload.
    #[must_use]
    pub fn from_signal(signal: &Signal) -> Option<Self> {
        serde_json::from_value(signal.payload.clone()).ok()
    }
}

/// The single frame sent on the signal socket after every open.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename = "subscribe")]
pub struct SubscribeRequest {
    pub signal_types: Vec<String>,
    pub symbols: Vec<String>,
    pub min_confidence: f64,
}

/// Venue-reported position, market id in the venue's native form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenuePosition {
    pub market_id: String,
    pub side: String,
    pub size: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_price: Option<Decimal>,
}

/// Strategy market mappings: canonical symbol to colon-joined market id.
pub type MarketMappings = HashMap<String, String>;

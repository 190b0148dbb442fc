//! Builders for commands and signals used across the test suites.

use rust_decimal_macros::dec;
use serde_json::json;

use crate::protocol::{OrderType, Signal, TradeCommand};

/// A market-order trade command for the given colon-joined market id.
pub fn trade_command(id: &str, market_id: &str) -> TradeCommand {
    let venue = market_id.split(':').next().unwrap_or_default();
    TradeCommand {
        id: id.to_string(),
        market_id: market_id.to_string(),
        venue: venue.to_string(),
        side: "yes".to_string(),
        action: "buy".to_string(),
        size: dec!(10),
        order_type: OrderType::Market,
        limit_price: None,
    }
}

/// A minimal signal with only the required fields set.
pub fn signal(id: &str, signal_type: &str) -> Signal {
    Signal {
        id: id.to_string(),
        signal_type: signal_type.to_string(),
        signal_name: None,
        venue: None,
        base: None,
        quote: None,
        confidence: None,
        severity: None,
        direction: None,
        expires_at: None,
        payload: serde_json::Value::Null,
    }
}

/// A cross-venue arbitrage alert with a kalshi buy leg and a polymarket
/// sell leg, prices as decimal strings the way venues quote them.
pub fn arb_signal(id: &str) -> Signal {
    let mut s = signal(id, "cross_venue_arbitrage");
    s.payload = json!({
        "buy_venue": "kalshi",
        "buy_market_id": "A",
        "buy_price": "0.42",
        "sell_venue": "polymarket",
        "sell_market_id": "B",
        "sell_price": "0.61",
    });
    s
}

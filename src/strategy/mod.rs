//! Rule-based strategy engine.
//!
//! Turns signal events into trade commands: dedup and staleness gates,
//! first-match rule selection, risk checks, and synthesis of either a
//! single command or a two-legged arbitrage pair. The engine never routes
//! anything itself; the orchestrator injects whatever it returns.

pub mod config;
pub mod risk;

pub use config::{RiskLimits, Rule, RuleAction, StrategyConfig};
pub use risk::{RiskGate, RiskReject};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info};
use uuid::Uuid;

use crate::position::PositionTracker;
use crate::protocol::{ArbitragePayload, Command, OrderType, Signal, StrategyMetrics, TradeCommand};
use crate::router::parse_market_id;

/// Payload fields probed, in order, for a limit-price base.
const BASE_PRICE_FIELDS: &[&str] = &[
    "current_price",
    "trigger_price",
    "price",
    "yes_price",
    "last_price",
];

/// Fallback cutoff margin before an arbitrage window closes.
const ARB_WINDOW_MARGIN_SECS: i64 = 15;

/// Venues whose outcome sides are `yes`/`no` rather than `buy`/`sell`.
#[must_use]
pub fn is_prediction_venue(venue: &str) -> bool {
    matches!(venue, "kalshi" | "polymarket")
}

/// Rule-driven signal-to-command engine.
pub struct StrategyEngine {
    config: StrategyConfig,
    enabled: AtomicBool,
    risk: RiskGate,
    tracker: Option<Arc<PositionTracker>>,
    dedup: Mutex<HashMap<String, Instant>>,
    last_prune: Mutex<Instant>,
    signals_received: AtomicU64,
    signals_dropped: AtomicU64,
    trades_generated: AtomicU64,
    dry_run_trades: AtomicU64,
}

impl StrategyEngine {
    /// Build an engine. `tracker` enables the per-market position cap.
    #[must_use]
    pub fn new(config: StrategyConfig, tracker: Option<Arc<PositionTracker>>) -> Self {
        let enabled = config.enabled;
        let risk = RiskGate::new(config.risk_limits.clone());
        Self {
            config,
            enabled: AtomicBool::new(enabled),
            risk,
            tracker,
            dedup: Mutex::new(HashMap::new()),
            last_prune: Mutex::new(Instant::now()),
            signals_received: AtomicU64::new(0),
            signals_dropped: AtomicU64::new(0),
            trades_generated: AtomicU64::new(0),
            dry_run_trades: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Counter snapshot for heartbeats.
    #[must_use]
    pub fn metrics(&self) -> StrategyMetrics {
        StrategyMetrics {
            signals_received: self.signals_received.load(Ordering::Relaxed),
            signals_dropped: self.signals_dropped.load(Ordering::Relaxed),
            trades_generated: self.trades_generated.load(Ordering::Relaxed),
            dry_run_trades: self.dry_run_trades.load(Ordering::Relaxed),
        }
    }

    /// Advance the rate and cooldown ledgers after a successful routing.
    pub fn record_executed_trade(&self, market_id: &str) {
        self.risk.record_trade(market_id);
    }

    /// Process one signal, returning zero, one, or two commands.
    ///
    /// Two commands form an arbitrage pair and must be injected in order;
    /// both legs already passed the risk gates together.
    pub fn handle_signal(&self, signal: &Signal) -> Option<Vec<Command>> {
        if !self.is_enabled() {
            return None;
        }
        self.signals_received.fetch_add(1, Ordering::Relaxed);

        if let Some(expires_at) = signal.expires_at {
            if expires_at <= Utc::now() {
                debug!(id = %signal.id, "Dropping stale signal");
                self.signals_dropped.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        if self.is_duplicate(&signal.id) {
            debug!(id = %signal.id, "Dropping duplicate signal");
            self.signals_dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let rule = self
            .config
            .rules
            .iter()
            .find(|rule| rule.enabled && rule_matches(rule, signal))?;
        debug!(id = %signal.id, rule = %rule.name, "Rule matched");

        let commands = if signal.signal_type == "cross_venue_arbitrage" {
            match ArbitragePayload::from_signal(signal) {
                Some(payload) => self.arbitrage_commands(rule, &payload)?,
                None => self.single_command(rule, signal).map(|c| vec![c])?,
            }
        } else {
            self.single_command(rule, signal).map(|c| vec![c])?
        };

        for command in &commands {
            let Command::Trade(trade) = command else {
                continue;
            };
            let held = self.tracker.as_ref().and_then(|tracker| {
                let (venue, _) = parse_market_id(&trade.market_id)?;
                tracker
                    .position(venue, &trade.market_id)
                    .map(|position| position.size)
            });
            if let Err(reject) = self.risk.check(&trade.market_id, trade.size, held) {
                // An arb pair is all-or-nothing: one failed leg kills both.
                info!(
                    id = %signal.id,
                    market_id = %trade.market_id,
                    reason = %reject,
                    "Risk gate rejected trade"
                );
                return None;
            }
        }

        if self.config.dry_run {
            self.dry_run_trades
                .fetch_add(commands.len() as u64, Ordering::Relaxed);
            for command in &commands {
                if let Command::Trade(trade) = command {
                    info!(
                        id = %signal.id,
                        market_id = %trade.market_id,
                        side = %trade.side,
                        size = %trade.size,
                        "Dry-run trade synthesized"
                    );
                }
            }
        } else {
            self.trades_generated
                .fetch_add(commands.len() as u64, Ordering::Relaxed);
        }

        Some(commands)
    }

    /// Dedup bookkeeping: true when the id was processed inside the window.
    fn is_duplicate(&self, signal_id: &str) -> bool {
        let window = Duration::from_secs(self.config.risk_limits.signal_dedup_window_seconds);
        self.prune_dedup(window);

        let mut seen = self.dedup.lock();
        if seen
            .get(signal_id)
            .is_some_and(|processed| processed.elapsed() < window)
        {
            return true;
        }
        seen.insert(signal_id.to_string(), Instant::now());
        false
    }

    fn prune_dedup(&self, window: Duration) {
        let mut last = self.last_prune.lock();
        if last.elapsed() < window {
            return;
        }
        *last = Instant::now();
        drop(last);
        self.dedup
            .lock()
            .retain(|_, processed| processed.elapsed() < window);
    }

    /// Build the single-market trade for a matched rule.
    fn single_command(&self, rule: &Rule, signal: &Signal) -> Option<Command> {
        let canonical = signal.symbol().or_else(|| signal.signal_name.clone())?;
        let Some(market_id) = self.config.market_mappings.get(&canonical) else {
            debug!(canonical = %canonical, "No market mapping; skipping signal");
            return None;
        };
        let (venue, _native) = parse_market_id(market_id)?;
        let side = resolve_side(&rule.action.side, signal.direction.as_deref(), venue)?;

        let limit_price = match (rule.action.order_type, rule.action.limit_price_offset_bps) {
            (OrderType::Limit, Some(offset_bps)) => {
                base_price(signal).map(|base| offset_price(base, offset_bps))
            }
            _ => None,
        };

        Some(Command::Trade(TradeCommand {
            id: Uuid::new_v4().to_string(),
            market_id: market_id.clone(),
            venue: venue.to_string(),
            action: action_for(&side, venue),
            side,
            size: rule.action.size,
            order_type: rule.action.order_type,
            limit_price,
        }))
    }

    /// Build the two-legged pair for a cross-venue arbitrage alert.
    fn arbitrage_commands(
        &self,
        rule: &Rule,
        payload: &ArbitragePayload,
    ) -> Option<Vec<Command>> {
        let cutoff = payload.signal_cutoff_utc.or_else(|| {
            payload
                .window_end_utc
                .map(|end| end - chrono::Duration::seconds(ARB_WINDOW_MARGIN_SECS))
        });
        if let Some(cutoff) = cutoff {
            if Utc::now() >= cutoff {
                debug!(cutoff = %cutoff, "Arbitrage window closed; dropping signal");
                self.signals_dropped.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        let buy_market = format!("{}:{}", payload.buy_venue, payload.buy_market_id);
        let sell_market = format!("{}:{}", payload.sell_venue, payload.sell_market_id);
        let size = rule.action.size;
        let order_type = rule.action.order_type;
        let limit = |price: Decimal| match order_type {
            OrderType::Limit => Some(price),
            OrderType::Market => None,
        };

        let super_hedge = payload.strategy.as_deref() == Some("super_hedge");
        let legs = if super_hedge && payload.buy_outcome.is_some() && payload.sell_outcome.is_some()
        {
            // Complementary outcome positions on both venues.
            vec![
                TradeCommand {
                    id: Uuid::new_v4().to_string(),
                    market_id: buy_market,
                    venue: payload.buy_venue.clone(),
                    side: payload.buy_outcome.clone()?,
                    action: "open".to_string(),
                    size,
                    order_type,
                    limit_price: limit(payload.buy_price),
                },
                TradeCommand {
                    id: Uuid::new_v4().to_string(),
                    market_id: sell_market,
                    venue: payload.sell_venue.clone(),
                    side: payload.sell_outcome.clone()?,
                    action: "open".to_string(),
                    size,
                    order_type,
                    limit_price: limit(payload.sell_price),
                },
            ]
        } else {
            vec![
                TradeCommand {
                    id: Uuid::new_v4().to_string(),
                    market_id: buy_market,
                    venue: payload.buy_venue.clone(),
                    side: "buy".to_string(),
                    action: "buy".to_string(),
                    size,
                    order_type,
                    limit_price: limit(payload.buy_price),
                },
                TradeCommand {
                    id: Uuid::new_v4().to_string(),
                    market_id: sell_market,
                    venue: payload.sell_venue.clone(),
                    side: "sell".to_string(),
                    action: "sell".to_string(),
                    size,
                    order_type,
                    limit_price: limit(payload.sell_price),
                },
            ]
        };

        Some(legs.into_iter().map(Command::Trade).collect())
    }
}

/// All present filters must pass.
fn rule_matches(rule: &Rule, signal: &Signal) -> bool {
    if !rule.signal_types.contains(&signal.signal_type) {
        return false;
    }
    if let Some(names) = &rule.signal_names {
        if !signal
            .signal_name
            .as_ref()
            .is_some_and(|name| names.contains(name))
        {
            return false;
        }
    }
    if let Some(venues) = &rule.venues {
        if !signal
            .venue
            .as_ref()
            .is_some_and(|venue| venues.contains(venue))
        {
            return false;
        }
    }
    if let Some(symbols) = &rule.symbols {
        if !signal
            .symbol()
            .is_some_and(|symbol| symbols.contains(&symbol))
        {
            return false;
        }
    }
    if let Some(min) = rule.min_confidence {
        if !signal.confidence.is_some_and(|c| c >= min) {
            return false;
        }
    }
    if let Some(min) = rule.min_severity {
        if !signal.severity.is_some_and(|s| s >= min) {
            return false;
        }
    }
    if let Some(directions) = &rule.directions {
        if !signal
            .direction
            .as_ref()
            .is_some_and(|direction| directions.contains(direction))
        {
            return false;
        }
    }
    true
}

/// Translate a rule side into a venue side.
///
/// `from_signal` maps `long|above` to `yes` (prediction venues) or `buy`,
/// and `short|below` to `no` or `sell`; `neutral` and `cross` directions
/// synthesize nothing.
fn resolve_side(rule_side: &str, direction: Option<&str>, venue: &str) -> Option<String> {
    if rule_side != "from_signal" {
        return Some(rule_side.to_string());
    }
    let prediction = is_prediction_venue(venue);
    match direction? {
        "long" | "above" => Some(if prediction { "yes" } else { "buy" }.to_string()),
        "short" | "below" => Some(if prediction { "no" } else { "sell" }.to_string()),
        _ => None,
    }
}

/// Prediction venues buy the chosen outcome; elsewhere the action mirrors
/// the side.
fn action_for(side: &str, venue: &str) -> String {
    if is_prediction_venue(venue) {
        "buy".to_string()
    } else {
        side.to_string()
    }
}

/// First price-ish payload field, accepting numbers or decimal strings.
fn base_price(signal: &Signal) -> Option<Decimal> {
    let object = signal.payload.as_object()?;
    BASE_PRICE_FIELDS
        .iter()
        .find_map(|field| object.get(*field).and_then(decimal_from_value))
}

fn decimal_from_value(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => n.to_string().parse().ok(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// `round(base * (1 + bps / 10_000), 2dp)`, rounding half away from zero.
fn offset_price(base: Decimal, offset_bps: Decimal) -> Decimal {
    (base * (Decimal::ONE + offset_bps / Decimal::from(10_000)))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

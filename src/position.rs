//! Position tracking keyed by `(venue, market_id)`.
//!
//! Upsert-only: at most one position exists per key at any time. Settlement
//! removes the position and appends an immutable record to the settlement
//! log. Consumers subscribe to [`PositionEvent`]s; the tracker never talks
//! to the relay itself.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::protocol::{OrderUpdate, Position, Settlement};

const EVENT_CAPACITY: usize = 256;

/// Sides treated as long exposure when computing unrealized P&L.
#[must_use]
pub fn is_long_side(side: &str) -> bool {
    matches!(side, "yes" | "buy" | "long")
}

/// Event emitted by the tracker.
#[derive(Debug, Clone)]
pub enum PositionEvent {
    Updated(Position),
    Removed { venue: String, market_id: String },
    Settled(Settlement),
}

/// In-memory position book with derived unrealized P&L.
pub struct PositionTracker {
    positions: RwLock<HashMap<(String, String), Position>>,
    settlements: RwLock<Vec<Settlement>>,
    events: broadcast::Sender<PositionEvent>,
}

impl PositionTracker {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            positions: RwLock::new(HashMap::new()),
            settlements: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Subscribe to tracker events.
    pub fn subscribe(&self) -> broadcast::Receiver<PositionEvent> {
        self.events.subscribe()
    }

    /// Upsert a position and recompute its unrealized P&L.
    ///
    /// `unrealized_pnl = (current_price - entry_price) * size` for long
    /// sides (`yes`, `buy`, `long`), negated for everything else, and left
    /// unset when no current price is known.
    pub fn update_position(&self, mut position: Position) {
        position.unrealized_pnl = position.current_price.map(|current| {
            let pnl = (current - position.entry_price) * position.size;
            if is_long_side(&position.side) {
                pnl
            } else {
                -pnl
            }
        });

        let key = (position.venue.clone(), position.market_id.clone());
        debug!(
            venue = %position.venue,
            market_id = %position.market_id,
            size = %position.size,
            "Position updated"
        );
        self.positions.write().insert(key, position.clone());
        let _ = self.events.send(PositionEvent::Updated(position));
    }

    /// Fold a fill into the book.
    ///
    /// A first fill opens the position at the fill price; subsequent fills
    /// on the same key grow the size and blend the entry price by size
    /// weight. The side stays whatever the opening fill set.
    pub fn record_fill(&self, update: &OrderUpdate) {
        let Some(fill_price) = update.fill_price else {
            return;
        };

        let existing = self
            .positions
            .read()
            .get(&(update.venue.clone(), update.market_id.clone()))
            .cloned();

        let position = match existing {
            Some(current) => {
                let total = current.size + update.size;
                let entry_price = if total.is_zero() {
                    current.entry_price
                } else {
                    (current.entry_price * current.size + fill_price * update.size) / total
                };
                Position {
                    size: total,
                    entry_price,
                    current_price: Some(fill_price),
                    ..current
                }
            }
            None => Position {
                venue: update.venue.clone(),
                market_id: update.market_id.clone(),
                side: update.side.clone(),
                size: update.size,
                entry_price: fill_price,
                current_price: Some(fill_price),
                unrealized_pnl: None,
                contract_expires_at: None,
            },
        };

        self.update_position(position);
    }

    /// Remove a position outright, emitting `Removed` if one existed.
    pub fn remove_position(&self, venue: &str, market_id: &str) {
        let removed = self
            .positions
            .write()
            .remove(&(venue.to_string(), market_id.to_string()));
        if removed.is_some() {
            let _ = self.events.send(PositionEvent::Removed {
                venue: venue.to_string(),
                market_id: market_id.to_string(),
            });
        }
    }

    /// Record a settlement: append to the log, drop any matching position,
    /// and emit a `Settled` event.
    pub fn add_settlement(&self, settlement: Settlement) {
        info!(
            venue = %settlement.venue,
            market_id = %settlement.market_id,
            result = %settlement.result,
            realized_pnl = %settlement.realized_pnl,
            "Market settled"
        );

        let key = (settlement.venue.clone(), settlement.market_id.clone());
        if self.positions.write().remove(&key).is_some() {
            let _ = self.events.send(PositionEvent::Removed {
                venue: settlement.venue.clone(),
                market_id: settlement.market_id.clone(),
            });
        }
        self.settlements.write().push(settlement.clone());
        let _ = self.events.send(PositionEvent::Settled(settlement));
    }

    /// Snapshot of every tracked position.
    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        self.positions.read().values().cloned().collect()
    }

    /// The position for a key, if any.
    #[must_use]
    pub fn position(&self, venue: &str, market_id: &str) -> Option<Position> {
        self.positions
            .read()
            .get(&(venue.to_string(), market_id.to_string()))
            .cloned()
    }

    /// Number of open positions.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.positions.read().len()
    }

    /// Snapshot of the settlement log.
    #[must_use]
    pub fn settlements(&self) -> Vec<Settlement> {
        self.settlements.read().clone()
    }
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new()
    }
}

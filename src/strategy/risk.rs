//! Pre-synthesis risk gates: global rate limit, per-market cooldown,
//! optional gross position cap.
//!
//! The ledgers only advance on [`RiskGate::record_trade`], which the
//! orchestrator calls after successful routing — a rejected execution
//! must not burn a cooldown.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rust_decimal::Decimal;

use super::config::RiskLimits;

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Why a candidate trade was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskReject {
    RateLimited {
        limit: u32,
    },
    Cooldown {
        market_id: String,
        remaining_secs: u64,
    },
    PositionLimit {
        market_id: String,
        current: Decimal,
        requested: Decimal,
        limit: Decimal,
    },
}

impl std::fmt::Display for RiskReject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited { limit } => {
                write!(f, "rate limit of {limit} trades/minute reached")
            }
            Self::Cooldown {
                market_id,
                remaining_secs,
            } => write!(f, "market {market_id} cooling down for {remaining_secs}s"),
            Self::PositionLimit {
                market_id,
                current,
                requested,
                limit,
            } => write!(
                f,
                "position cap on {market_id}: {current} held + {requested} requested > {limit}"
            ),
        }
    }
}

/// Stateful gate evaluated per candidate command.
pub struct RiskGate {
    limits: RiskLimits,
    trade_times: Mutex<VecDeque<Instant>>,
    cooldowns: Mutex<HashMap<String, Instant>>,
}

impl RiskGate {
    #[must_use]
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            trade_times: Mutex::new(VecDeque::new()),
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate a candidate trade.
    ///
    /// `current_position` is the gross size already held in this market,
    /// when the caller tracks one.
    pub fn check(
        &self,
        market_id: &str,
        size: Decimal,
        current_position: Option<Decimal>,
    ) -> Result<(), RiskReject> {
        {
            let mut times = self.trade_times.lock();
            while times
                .front()
                .is_some_and(|t| t.elapsed() >= RATE_WINDOW)
            {
                times.pop_front();
            }
            if times.len() >= self.limits.max_trades_per_minute as usize {
                return Err(RiskReject::RateLimited {
                    limit: self.limits.max_trades_per_minute,
                });
            }
        }

        let cooldown = Duration::from_secs(self.limits.market_cooldown_seconds);
        if let Some(last) = self.cooldowns.lock().get(market_id) {
            let elapsed = last.elapsed();
            if elapsed < cooldown {
                return Err(RiskReject::Cooldown {
                    market_id: market_id.to_string(),
                    remaining_secs: (cooldown - elapsed).as_secs(),
                });
            }
        }

        if let Some(limit) = self.limits.max_position_size_per_market {
            let current = current_position.unwrap_or_default();
            if current + size > limit {
                return Err(RiskReject::PositionLimit {
                    market_id: market_id.to_string(),
                    current,
                    requested: size,
                    limit,
                });
            }
        }

        Ok(())
    }

    /// Advance the rate and cooldown ledgers after a successful execution.
    pub fn record_trade(&self, market_id: &str) {
        let now = Instant::now();
        self.trade_times.lock().push_back(now);
        self.cooldowns.lock().insert(market_id.to_string(), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limits() -> RiskLimits {
        RiskLimits {
            max_trades_per_minute: 2,
            market_cooldown_seconds: 60,
            signal_dedup_window_seconds: 300,
            max_position_size_per_market: Some(dec!(100)),
        }
    }

    #[test]
    fn passes_under_all_limits() {
        let gate = RiskGate::new(limits());
        assert!(gate.check("kalshi:A", dec!(10), None).is_ok());
    }

    #[test]
    fn rate_limit_counts_recorded_trades_only() {
        let gate = RiskGate::new(limits());

        // Checks alone never consume budget.
        for _ in 0..5 {
            assert!(gate.check("kalshi:A", dec!(1), None).is_ok());
        }

        gate.record_trade("kalshi:A");
        gate.record_trade("kalshi:B");
        assert_eq!(
            gate.check("kalshi:C", dec!(1), None),
            Err(RiskReject::RateLimited { limit: 2 })
        );
    }

    #[test]
    fn cooldown_applies_per_market() {
        let gate = RiskGate::new(limits());
        gate.record_trade("kalshi:A");

        assert!(matches!(
            gate.check("kalshi:A", dec!(1), None),
            Err(RiskReject::Cooldown { .. })
        ));
        // Other markets are unaffected (rate budget still has room).
        assert!(gate.check("kalshi:B", dec!(1), None).is_ok());
    }

    #[test]
    fn position_cap_is_gross() {
        let gate = RiskGate::new(limits());
        assert!(gate.check("kalshi:A", dec!(40), Some(dec!(50))).is_ok());
        assert!(matches!(
            gate.check("kalshi:A", dec!(60), Some(dec!(50))),
            Err(RiskReject::PositionLimit { .. })
        ));
        // No tracked position counts as zero held.
        assert!(gate.check("kalshi:A", dec!(100), None).is_ok());
    }

    #[test]
    fn no_position_cap_when_unset() {
        let gate = RiskGate::new(RiskLimits {
            max_position_size_per_market: None,
            ..limits()
        });
        assert!(gate
            .check("kalshi:A", dec!(1_000_000), Some(dec!(1_000_000)))
            .is_ok());
    }
}

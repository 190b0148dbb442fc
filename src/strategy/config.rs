//! Strategy configuration: rules, risk limits, market mappings.
//!
//! Loaded from a TOML file named by the gateway config. Rule order in the
//! file is authoritative — the first matching enabled rule wins.

use std::collections::HashMap;
use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::Result;
use crate::protocol::{OrderType, Severity};

/// Top-level strategy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub enabled: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub risk_limits: RiskLimits,
    /// Canonical symbol (or signal name) to colon-joined market id.
    #[serde(default)]
    pub market_mappings: HashMap<String, String>,
}

impl StrategyConfig {
    /// Load a strategy config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

/// Risk gate limits.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskLimits {
    #[serde(default = "default_max_trades_per_minute")]
    pub max_trades_per_minute: u32,
    #[serde(default = "default_market_cooldown_seconds")]
    pub market_cooldown_seconds: u64,
    #[serde(default = "default_dedup_window_seconds")]
    pub signal_dedup_window_seconds: u64,
    /// Gross per-market cap; unlimited when absent.
    #[serde(default)]
    pub max_position_size_per_market: Option<Decimal>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_trades_per_minute: default_max_trades_per_minute(),
            market_cooldown_seconds: default_market_cooldown_seconds(),
            signal_dedup_window_seconds: default_dedup_window_seconds(),
            max_position_size_per_market: None,
        }
    }
}

fn default_max_trades_per_minute() -> u32 {
    10
}

fn default_market_cooldown_seconds() -> u64 {
    60
}

fn default_dedup_window_seconds() -> u64 {
    300
}

/// A single matching rule. All present filters must pass.
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub signal_types: Vec<String>,
    #[serde(default)]
    pub signal_names: Option<Vec<String>>,
    #[serde(default)]
    pub venues: Option<Vec<String>>,
    /// `"<base>/<quote>"` symbols.
    #[serde(default)]
    pub symbols: Option<Vec<String>>,
    #[serde(default)]
    pub min_confidence: Option<f64>,
    #[serde(default)]
    pub min_severity: Option<Severity>,
    #[serde(default)]
    pub directions: Option<Vec<String>>,
    pub action: RuleAction,
}

fn default_true() -> bool {
    true
}

/// What to do when a rule matches.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleAction {
    /// `buy`, `sell`, `yes`, `no`, or `from_signal`.
    pub side: String,
    pub size: Decimal,
    pub order_type: OrderType,
    #[serde(default)]
    pub limit_price_offset_bps: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"
enabled = true
dry_run = true

[risk_limits]
max_trades_per_minute = 5
market_cooldown_seconds = 30
signal_dedup_window_seconds = 120
max_position_size_per_market = "100"

[market_mappings]
"BTC/USD" = "kalshi:BTC-100K"

[[rules]]
name = "btc-momentum"
signal_types = ["price_alert"]
symbols = ["BTC/USD"]
min_confidence = 0.8
min_severity = "high"
directions = ["long", "short"]

[rules.action]
side = "from_signal"
size = "10"
order_type = "limit"
limit_price_offset_bps = "25"

[[rules]]
name = "arb"
enabled = false
signal_types = ["cross_venue_arbitrage"]

[rules.action]
side = "from_signal"
size = "10"
order_type = "market"
"#;

    #[test]
    fn parses_full_config() {
        let config: StrategyConfig = toml::from_str(SAMPLE).unwrap();
        assert!(config.enabled);
        assert!(config.dry_run);
        assert_eq!(config.risk_limits.max_trades_per_minute, 5);
        assert_eq!(
            config.risk_limits.max_position_size_per_market,
            Some(dec!(100))
        );
        assert_eq!(
            config.market_mappings.get("BTC/USD").map(String::as_str),
            Some("kalshi:BTC-100K")
        );
        assert_eq!(config.rules.len(), 2);

        let rule = &config.rules[0];
        assert!(rule.enabled);
        assert_eq!(rule.min_severity, Some(Severity::High));
        assert_eq!(rule.action.order_type, OrderType::Limit);
        assert_eq!(rule.action.limit_price_offset_bps, Some(dec!(25)));

        assert!(!config.rules[1].enabled);
    }

    #[test]
    fn risk_limits_default_when_absent() {
        let config: StrategyConfig = toml::from_str("enabled = false").unwrap();
        assert_eq!(config.risk_limits.max_trades_per_minute, 10);
        assert_eq!(config.risk_limits.market_cooldown_seconds, 60);
        assert_eq!(config.risk_limits.signal_dedup_window_seconds, 300);
        assert!(config.risk_limits.max_position_size_per_market.is_none());
        assert!(config.rules.is_empty());
        assert!(!config.dry_run);
    }
}

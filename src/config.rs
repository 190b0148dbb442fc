//! Gateway configuration loading.
//!
//! A TOML file provides the structure; secrets come from the environment
//! (`.env` supported via dotenvy in `main`). `PUMPAMP_API_KEY` overrides
//! any key in the file so credentials stay out of checked-in configs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::gateway::GatewayConfig;
use crate::logging::LoggingConfig;
use crate::relay::RelayConfig;
use crate::signal::SignalConsumerConfig;

/// Environment variable that overrides the configured API key.
pub const API_KEY_ENV: &str = "PUMPAMP_API_KEY";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub relay: RelaySection,
    #[serde(default)]
    pub signals: Option<SignalsSection>,
    #[serde(default)]
    pub strategy: StrategySection,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct RelaySection {
    pub host: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub pairing_id: Option<String>,
    #[serde(default)]
    pub pairing_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalsSection {
    pub host: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub signal_types: Vec<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub min_confidence: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct StrategySection {
    #[serde(default)]
    pub auto_trade_enabled: bool,
    #[serde(default)]
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct GatewaySection {
    #[serde(default)]
    pub cancel_on_shutdown: bool,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            cancel_on_shutdown: false,
            health_interval_secs: default_health_interval_secs(),
        }
    }
}

fn default_health_interval_secs() -> u64 {
    30
}

impl Config {
    /// Load and validate a config file, applying environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        if let Ok(api_key) = std::env::var(API_KEY_ENV) {
            config.relay.api_key = api_key.clone();
            if let Some(signals) = &mut config.signals {
                if signals.api_key.is_empty() {
                    signals.api_key = api_key;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.relay.host.is_empty() {
            return Err(Error::Config("relay.host cannot be empty".into()));
        }
        if self.relay.api_key.is_empty() {
            return Err(Error::Config(format!(
                "relay.api_key is required (or set {API_KEY_ENV})"
            )));
        }
        if self.relay.pairing_id.is_none() && self.relay.pairing_code.is_none() {
            return Err(Error::Config(
                "one of relay.pairing_id or relay.pairing_code is required".into(),
            ));
        }
        if self.strategy.auto_trade_enabled && self.strategy.config_path.is_none() {
            return Err(Error::Config(
                "strategy.config_path is required when auto_trade_enabled".into(),
            ));
        }
        Ok(())
    }

    pub fn init_logging(&self) {
        self.logging.init();
    }

    /// Assemble the orchestrator config.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        let relay = RelayConfig {
            host: self.relay.host.clone(),
            api_key: self.relay.api_key.clone(),
            pairing_id: self.relay.pairing_id.clone(),
            pairing_code: self.relay.pairing_code.clone(),
            ..RelayConfig::default()
        };
        let signals = self.signals.as_ref().map(|section| SignalConsumerConfig {
            host: section.host.clone(),
            api_key: section.api_key.clone(),
            signal_types: section.signal_types.clone(),
            symbols: section.symbols.clone(),
            min_confidence: section.min_confidence,
            ..SignalConsumerConfig::default()
        });
        GatewayConfig {
            relay,
            signals,
            auto_trade_enabled: self.strategy.auto_trade_enabled,
            strategy_config_path: self.strategy.config_path.clone(),
            cancel_on_shutdown: self.gateway.cancel_on_shutdown,
            health_interval: Duration::from_secs(self.gateway.health_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[relay]
host = "relay.pumpamp.com"
api_key = "k-123"
pairing_id = "P1"

[signals]
host = "signals.pumpamp.com"
signal_types = ["price_alert"]
symbols = ["BTC/USD"]
min_confidence = 0.5

[strategy]
auto_trade_enabled = true
config_path = "strategy.toml"

[gateway]
cancel_on_shutdown = true
health_interval_secs = 10

[logging]
level = "debug"
format = "json"
"#;

    #[test]
    fn loads_full_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.relay.host, "relay.pumpamp.com");
        assert_eq!(config.relay.pairing_id.as_deref(), Some("P1"));
        assert_eq!(config.logging.level, "debug");

        let gateway = config.gateway_config();
        assert!(gateway.cancel_on_shutdown);
        assert_eq!(gateway.health_interval, Duration::from_secs(10));
        assert!(gateway.auto_trade_enabled);
        assert!(gateway.signals.is_some());
    }

    #[test]
    fn rejects_missing_pairing_credentials() {
        let raw = r#"
[relay]
host = "relay.pumpamp.com"
api_key = "k"
"#;
        let config: std::result::Result<Config, _> =
            toml::from_str(raw).map_err(Error::from).and_then(|c: Config| {
                c.validate()?;
                Ok(c)
            });
        assert!(matches!(config, Err(Error::Config(_))));
    }

    #[test]
    fn rejects_auto_trade_without_strategy_path() {
        let raw = r#"
[relay]
host = "relay.pumpamp.com"
api_key = "k"
pairing_id = "P1"

[strategy]
auto_trade_enabled = true
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn defaults_apply_for_optional_sections() {
        let raw = r#"
[relay]
host = "relay.pumpamp.com"
api_key = "k"
pairing_code = "ABC123"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert!(config.signals.is_none());
        assert!(!config.strategy.auto_trade_enabled);
        assert!(!config.gateway.cancel_on_shutdown);
        assert_eq!(config.gateway.health_interval_secs, 30);
        assert_eq!(config.logging.level, "info");
    }
}

//! Logging initialization and secret redaction.
//!
//! Process-wide tracing setup plus the redaction helpers every log site
//! uses before printing payloads or URLs. Credentials ride in WebSocket
//! query strings and venue headers, so both field-level redaction and URL
//! query stripping are applied at the edge — never on the wire itself.

use serde::Deserialize;
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

/// Placeholder substituted for sensitive values.
pub const REDACTED: &str = "[REDACTED]";

/// Field names whose values are always redacted, matched exactly.
const SENSITIVE_FIELDS: &[&str] = &[
    "PUMPAMP_API_KEY",
    "api_key",
    "apiKey",
    "api_secret",
    "apiSecret",
    "authorization",
    "Authorization",
    "x-mbx-apikey",
    "kalshi-access-signature",
    "kalshi-access-key",
    "private_key",
    "privateKey",
    "passphrase",
    "signature",
];

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl LoggingConfig {
    /// Initialize the process-wide tracing subscriber.
    ///
    /// Called once at startup, before the gateway opens any socket, so
    /// every connect attempt already logs through the redaction helpers
    /// below.
    pub fn init(&self) {
        let builder = fmt().with_env_filter(self.env_filter());
        if self.format == "json" {
            builder.json().init();
        } else {
            builder.init();
        }
    }

    /// `RUST_LOG` wins outright; otherwise the configured level applies
    /// crate-wide while the WebSocket and TLS internals stay at `warn` —
    /// their per-frame debug output would drown the gateway's own
    /// lifecycle logs.
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_directives()))
    }

    fn default_directives(&self) -> String {
        format!(
            "{},tungstenite=warn,tokio_tungstenite=warn,rustls=warn",
            self.level
        )
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

/// Whether a field name carries a secret.
#[must_use]
pub fn is_sensitive_field(name: &str) -> bool {
    SENSITIVE_FIELDS.contains(&name)
}

/// Strip the query string from a URL, leaving scheme, host, and path.
///
/// Connect URLs carry `api_key` and pairing credentials as query
/// parameters; anything logged goes through here first. Strings that do
/// not parse as URLs are returned unchanged.
#[must_use]
pub fn sanitize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

/// Redact sensitive fields in a JSON value, recursively.
///
/// Sensitive field values become [`REDACTED`]; string values that look
/// like URLs lose their query strings. Everything else passes through
/// unchanged.
pub fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if is_sensitive_field(key) {
                    *entry = Value::String(REDACTED.to_string());
                } else {
                    redact_value(entry);
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                redact_value(item);
            }
        }
        Value::String(s) => {
            if looks_like_url(s) {
                *value = Value::String(sanitize_url(s));
            }
        }
        _ => {}
    }
}

/// Redacted copy of a JSON value for logging.
#[must_use]
pub fn redacted(value: &Value) -> Value {
    let mut copy = value.clone();
    redact_value(&mut copy);
    copy
}

fn looks_like_url(s: &str) -> bool {
    ["http://", "https://", "ws://", "wss://"]
        .iter()
        .any(|scheme| s.starts_with(scheme))
}

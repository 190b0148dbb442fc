//! Crate-wide error type and venue failure taxonomy.

use thiserror::Error;

/// Short failure codes a venue connector maps its native errors onto.
///
/// Connectors translate venue responses into one of the named kinds where
/// possible and fall back to [`VenueErrorKind::Other`] with the venue's own
/// short code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VenueErrorKind {
    /// Credentials were rejected by the venue.
    AuthError,
    /// The venue throttled the request.
    RateLimited,
    /// The account balance cannot cover the order.
    InsufficientBalance,
    /// The order parameters were rejected as invalid.
    InvalidOrder,
    /// The referenced order does not exist on the venue.
    OrderNotFound,
    /// Venue-specific failure code.
    Other(String),
}

impl VenueErrorKind {
    /// Wire representation of the kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::AuthError => "AUTH_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::InvalidOrder => "INVALID_ORDER",
            Self::OrderNotFound => "ORDER_NOT_FOUND",
            Self::Other(code) => code,
        }
    }
}

impl std::fmt::Display for VenueErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("{kind}: {message}")]
    Venue {
        kind: VenueErrorKind,
        message: String,
    },

    #[error("gateway already started")]
    AlreadyStarted,

    #[error("gateway is stopped")]
    GatewayStopped,

    #[error("pairing did not complete within the deadline")]
    PairingTimeout,
}

impl Error {
    /// Build a venue failure with the given kind and message.
    pub fn venue(kind: VenueErrorKind, message: impl Into<String>) -> Self {
        Self::Venue {
            kind,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_kind_wire_codes() {
        assert_eq!(VenueErrorKind::AuthError.as_str(), "AUTH_ERROR");
        assert_eq!(VenueErrorKind::RateLimited.as_str(), "RATE_LIMITED");
        assert_eq!(
            VenueErrorKind::InsufficientBalance.as_str(),
            "INSUFFICIENT_BALANCE"
        );
        assert_eq!(VenueErrorKind::InvalidOrder.as_str(), "INVALID_ORDER");
        assert_eq!(VenueErrorKind::OrderNotFound.as_str(), "ORDER_NOT_FOUND");
        assert_eq!(
            VenueErrorKind::Other("KALSHI_503".to_string()).as_str(),
            "KALSHI_503"
        );
    }

    #[test]
    fn venue_error_display_includes_kind_and_message() {
        let err = Error::venue(VenueErrorKind::RateLimited, "slow down");
        assert_eq!(err.to_string(), "RATE_LIMITED: slow down");
    }
}

//! Venue connector contract.
//!
//! Every venue adapter (prediction market or crypto exchange) implements
//! [`VenueConnector`] and registers with the router under its lowercase
//! venue key. The router strips the `<venue>:` prefix before calling
//! [`place_order`](VenueConnector::place_order), so adapters only ever see
//! their native market ids.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::protocol::{OrderStatus, OrderType, VenuePosition};

/// Request to place an order on a venue.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// Venue-native market id, colon prefix already stripped.
    pub market_id: String,
    pub side: String,
    pub action: String,
    pub size: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
}

/// Outcome of a placement attempt as reported by the venue.
#[derive(Debug, Clone)]
pub struct OrderResult {
    /// The venue's own order id, when one was assigned.
    pub order_id: Option<String>,
    /// One of `submitted`, `filled`, `rejected`, `cancelled`.
    pub status: OrderStatus,
    pub fill_price: Option<Decimal>,
    /// Venue-mapped short code, set when `status` is `rejected`.
    pub error: Option<String>,
}

impl OrderResult {
    /// A fully filled result with the given venue order id and price.
    #[must_use]
    pub fn filled(order_id: impl Into<String>, fill_price: Decimal) -> Self {
        Self {
            order_id: Some(order_id.into()),
            status: OrderStatus::Filled,
            fill_price: Some(fill_price),
            error: None,
        }
    }

    /// An accepted-but-resting result.
    #[must_use]
    pub fn submitted(order_id: impl Into<String>) -> Self {
        Self {
            order_id: Some(order_id.into()),
            status: OrderStatus::Submitted,
            fill_price: None,
            error: None,
        }
    }

    /// A rejection with a venue-mapped short code.
    #[must_use]
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            order_id: None,
            status: OrderStatus::Rejected,
            fill_price: None,
            error: Some(error.into()),
        }
    }
}

/// Uniform surface every venue adapter implements.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the router calls them from
/// concurrent tasks and expects each adapter to serialize its own internal
/// state.
///
/// # Health
///
/// [`is_healthy`](Self::is_healthy) must be cheap and non-blocking — return
/// a cached flag and do any probing on a background task inside the adapter.
#[async_trait]
pub trait VenueConnector: Send + Sync {
    /// Establish the venue session (auth, streams, clock sync).
    async fn connect(&self) -> Result<()>;

    /// Tear the session down. Idempotent.
    async fn disconnect(&self) -> Result<()>;

    /// Submit an order.
    ///
    /// # Errors
    ///
    /// Fails with a [`VenueErrorKind`](crate::error::VenueErrorKind)-carrying
    /// error on auth rejection, throttling, insufficient balance, invalid
    /// orders, or venue-specific failures.
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult>;

    /// Cancel a single order by the venue's order id.
    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    /// Cancel every open order on this venue.
    async fn cancel_all_orders(&self) -> Result<()>;

    /// Current positions as the venue reports them.
    async fn get_positions(&self) -> Result<Vec<VenuePosition>>;

    /// Available balance in the venue's settlement currency.
    async fn get_balance(&self) -> Result<Decimal>;

    /// Cached health flag; must not block.
    fn is_healthy(&self) -> bool;

    /// Lowercase venue key used for registration and routing.
    fn venue(&self) -> &str;
}

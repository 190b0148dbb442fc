//! Scripted [`VenueConnector`] mock.
//!
//! Each call pops the next scripted result from its queue and records the
//! request; exhausted queues default to success, so simple tests need no
//! scripting at all.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::connector::{OrderRequest, OrderResult, VenueConnector};
use crate::error::Result;
use crate::protocol::VenuePosition;

/// Mock venue with scripted per-call results and call recording.
pub struct MockConnector {
    venue: String,
    healthy: AtomicBool,
    connect_results: Mutex<VecDeque<Result<()>>>,
    place_results: Mutex<VecDeque<Result<OrderResult>>>,
    cancel_results: Mutex<VecDeque<Result<()>>>,
    cancel_all_results: Mutex<VecDeque<Result<()>>>,
    placed: Mutex<Vec<OrderRequest>>,
    cancelled: Mutex<Vec<String>>,
    positions: Mutex<Vec<VenuePosition>>,
    balance: Mutex<Decimal>,
    connect_calls: AtomicU32,
    disconnect_calls: AtomicU32,
    cancel_all_calls: AtomicU32,
    next_order_seq: AtomicU32,
}

impl MockConnector {
    pub fn new(venue: &str) -> Self {
        Self {
            venue: venue.to_string(),
            healthy: AtomicBool::new(true),
            connect_results: Mutex::new(VecDeque::new()),
            place_results: Mutex::new(VecDeque::new()),
            cancel_results: Mutex::new(VecDeque::new()),
            cancel_all_results: Mutex::new(VecDeque::new()),
            placed: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            positions: Mutex::new(Vec::new()),
            balance: Mutex::new(dec!(1000)),
            connect_calls: AtomicU32::new(0),
            disconnect_calls: AtomicU32::new(0),
            cancel_all_calls: AtomicU32::new(0),
            next_order_seq: AtomicU32::new(1),
        }
    }

    #[must_use]
    pub fn with_connect_results(self, results: Vec<Result<()>>) -> Self {
        *self.connect_results.lock() = results.into();
        self
    }

    #[must_use]
    pub fn with_place_results(self, results: Vec<Result<OrderResult>>) -> Self {
        *self.place_results.lock() = results.into();
        self
    }

    #[must_use]
    pub fn with_cancel_results(self, results: Vec<Result<()>>) -> Self {
        *self.cancel_results.lock() = results.into();
        self
    }

    #[must_use]
    pub fn with_cancel_all_results(self, results: Vec<Result<()>>) -> Self {
        *self.cancel_all_results.lock() = results.into();
        self
    }

    #[must_use]
    pub fn with_positions(self, positions: Vec<VenuePosition>) -> Self {
        *self.positions.lock() = positions;
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Requests seen by `place_order`, in call order.
    pub fn placed(&self) -> Vec<OrderRequest> {
        self.placed.lock().clone()
    }

    /// Order ids seen by `cancel_order`, in call order.
    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_all_calls(&self) -> u32 {
        self.cancel_all_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VenueConnector for MockConnector {
    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connect_results.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult> {
        self.placed.lock().push(request.clone());
        if let Some(result) = self.place_results.lock().pop_front() {
            return result;
        }
        let seq = self.next_order_seq.fetch_add(1, Ordering::SeqCst);
        let price = request.limit_price.unwrap_or(dec!(0.50));
        Ok(OrderResult::filled(format!("{}-mock-{seq}", self.venue), price))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.cancelled.lock().push(order_id.to_string());
        self.cancel_results.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn cancel_all_orders(&self) -> Result<()> {
        self.cancel_all_calls.fetch_add(1, Ordering::SeqCst);
        self.cancel_all_results.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn get_positions(&self) -> Result<Vec<VenuePosition>> {
        Ok(self.positions.lock().clone())
    }

    async fn get_balance(&self) -> Result<Decimal> {
        Ok(*self.balance.lock())
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn venue(&self) -> &str {
        &self.venue
    }
}

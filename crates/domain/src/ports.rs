//! Contracts of the outside collaborators the engine calls into.
//!
//! The engine never knows which exchange or messenger sits behind these.
//! Implementations own their transport; callers own timeouts and retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Price, PricePoint, Quote, Side};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("price feed transport: {0}")]
    Transport(String),
    #[error("price feed returned malformed data: {0}")]
    Malformed(String),
    #[error("price feed returned no data")]
    Empty,
}

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("order transport: {0}")]
    Transport(String),
    #[error("order not confirmed within {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Confirmed fill of a market order.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct OrderResult {
    pub filled_price: Price,
    pub filled_at: DateTime<Utc>,
}

#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Up to `n` most recent daily closes, oldest first.
    async fn get_recent_prices(&self, n: usize) -> Result<Vec<PricePoint>, FeedError>;

    async fn get_current_price(&self) -> Result<Quote, FeedError>;
}

#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn submit_market_order(&self, side: Side) -> Result<OrderResult, OrderError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), NotifyError>;
}

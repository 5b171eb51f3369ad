use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use domain::ports::{FeedError, PriceFeed};
use domain::types::{PricePoint, Quote};

use crate::rest::{BybitRest, MAX_PAGE};

/// Spot daily closes and last trade price for one symbol.
#[derive(Clone)]
pub struct BybitFeed {
    rest: BybitRest,
    symbol: String,
}

impl BybitFeed {
    pub fn new(rest: BybitRest, symbol: impl Into<String>) -> Self {
        Self {
            rest,
            symbol: symbol.into(),
        }
    }
}

#[async_trait]
impl PriceFeed for BybitFeed {
    async fn get_recent_prices(&self, n: usize) -> Result<Vec<PricePoint>, FeedError> {
        let limit = n.clamp(1, MAX_PAGE as usize) as u16;

        let points = self
            .rest
            .get_recent_daily_closes(&self.symbol, limit)
            .await
            .map_err(|e| FeedError::Transport(format!("{:#}", e)))?;

        if points.is_empty() {
            return Err(FeedError::Empty);
        }
        if points.windows(2).any(|w| w[0].date >= w[1].date) {
            return Err(FeedError::Malformed("klines not strictly chronological".into()));
        }

        debug!(symbol = %self.symbol, n = points.len(), "daily closes fetched");
        Ok(points)
    }

    async fn get_current_price(&self) -> Result<Quote, FeedError> {
        let price = self
            .rest
            .get_last_price(&self.symbol)
            .await
            .map_err(|e| FeedError::Transport(format!("{:#}", e)))?;

        Ok(Quote {
            at: Utc::now(),
            price,
        })
    }
}

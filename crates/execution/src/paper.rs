use async_trait::async_trait;
use domain::ports::{OrderError, OrderExecutor, OrderResult, PriceFeed};
use domain::types::Side;
use tracing::info;

/// Fills every market order at the feed's current quote.
///
/// Stands in for the exchange account API: the engine only needs a confirmed
/// fill price and time, so a paper fill exercises the whole live path.
pub struct PaperExecutor<F> {
    feed: F,
}

impl<F: PriceFeed> PaperExecutor<F> {
    pub fn new(feed: F) -> Self {
        Self { feed }
    }
}

#[async_trait]
impl<F: PriceFeed> OrderExecutor for PaperExecutor<F> {
    async fn submit_market_order(&self, side: Side) -> Result<OrderResult, OrderError> {
        let quote = self
            .feed
            .get_current_price()
            .await
            .map_err(|e| OrderError::Transport(e.to_string()))?;

        if !quote.price.is_valid() {
            return Err(OrderError::Rejected(format!("no valid quote: {:?}", quote.price)));
        }

        info!(%side, price = %quote.price, "paper fill");

        Ok(OrderResult {
            filled_price: quote.price,
            filled_at: quote.at,
        })
    }
}

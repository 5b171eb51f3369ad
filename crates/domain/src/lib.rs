pub mod ports;
pub mod types;

pub use ports::{FeedError, Notifier, NotifyError, OrderError, OrderExecutor, OrderResult, PriceFeed};
pub use types::{Bps, Money, Price, PricePoint, Qty, Quote, Side, TimestampMs};

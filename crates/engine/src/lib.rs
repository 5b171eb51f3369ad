pub mod backtest;
pub mod event;
pub mod feed;
pub mod live;
pub mod messages;
pub mod sink;
pub mod stats;
pub mod tick;
pub mod trade;

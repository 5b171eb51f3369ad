pub mod feed;
pub mod rest;

pub use feed::BybitFeed;
pub use rest::{BybitRest, download_range};

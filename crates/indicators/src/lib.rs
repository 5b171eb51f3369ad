pub mod sma;

pub use sma::{IndicatorError, sma};

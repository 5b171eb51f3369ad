use domain::types::Price;
use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum IndicatorError {
    #[error("insufficient data: need {needed} closes, have {available}")]
    InsufficientData { needed: usize, available: usize },
}

/// Simple moving average of the trailing `period` closes.
///
/// Recomputed from scratch on every call over the last `period` values only,
/// so there is no running sum to drift. Extra leading history is ignored.
pub fn sma(closes: &[Price], period: usize) -> Result<Price, IndicatorError> {
    if period == 0 || closes.len() < period {
        return Err(IndicatorError::InsufficientData {
            needed: period.max(1),
            available: closes.len(),
        });
    }

    let window = &closes[closes.len() - period..];
    let sum: f64 = window.iter().map(|p| p.0).sum();

    Ok(Price(sum / period as f64))
}

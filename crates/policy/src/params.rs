use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Strategy constants. Percentages are fractions: 0.07 = 7%.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    /// Moving-average lookback, in daily closes.
    pub ma_period: usize,
    /// Hard stop: exit when price is this far below entry.
    pub stop_loss_pct: f64,
    /// Trailing stop arms once price is this far above entry.
    pub trailing_activation_pct: f64,
    /// Armed trailing stop: exit when price is this far below the peak.
    pub trailing_stop_pct: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            ma_period: 200,
            stop_loss_pct: 0.07,
            trailing_activation_pct: 0.08,
            trailing_stop_pct: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamsError {
    #[error("ma_period must be >= 1")]
    ZeroPeriod,
    #[error("{name} must be in (0, 1), got {value}")]
    PctOutOfRange { name: &'static str, value: f64 },
}

impl StrategyParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.ma_period == 0 {
            return Err(ParamsError::ZeroPeriod);
        }

        for (name, value) in [
            ("stop_loss_pct", self.stop_loss_pct),
            ("trailing_activation_pct", self.trailing_activation_pct),
            ("trailing_stop_pct", self.trailing_stop_pct),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(ParamsError::PctOutOfRange { name, value });
            }
        }

        Ok(())
    }
}

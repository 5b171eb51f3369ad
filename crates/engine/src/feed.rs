use domain::types::{Price, PricePoint};
use indicators::{IndicatorError, sma};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WindowError {
    #[error("invalid close {close:?} on {date}")]
    InvalidPrice {
        date: chrono::NaiveDate,
        close: Price,
    },
    #[error("point {got} is not after {last}")]
    OutOfOrder {
        last: chrono::NaiveDate,
        got: chrono::NaiveDate,
    },
}

/// Trailing window of daily closes, oldest first.
pub struct PriceWindow {
    window: usize,
    points: Vec<PricePoint>,
}

impl PriceWindow {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            points: Vec::with_capacity(window + 8),
        }
    }

    /// Append a strictly newer close. Bad or stale points are refused and the
    /// window is left as it was.
    pub fn push(&mut self, p: PricePoint) -> Result<(), WindowError> {
        validate(p)?;

        if let Some(last) = self.points.last() {
            if p.date <= last.date {
                return Err(WindowError::OutOfOrder {
                    last: last.date,
                    got: p.date,
                });
            }
        }

        self.points.push(p);
        self.trim();
        Ok(())
    }

    /// Like [`push`](Self::push), but a point for the same day as the last one
    /// replaces it: the live feed re-quotes the still-open daily bar.
    pub fn upsert_latest(&mut self, p: PricePoint) -> Result<(), WindowError> {
        validate(p)?;

        match self.points.last_mut() {
            Some(last) if last.date == p.date => {
                last.close = p.close;
                Ok(())
            }
            _ => self.push(p),
        }
    }

    fn trim(&mut self) {
        // keep the last `window` points
        if self.points.len() > self.window {
            let excess = self.points.len() - self.window;
            self.points.drain(0..excess);
        }
    }

    pub fn moving_average(&self, period: usize) -> Result<Price, IndicatorError> {
        let closes: Vec<Price> = self.points.iter().map(|p| p.close).collect();
        sma(&closes, period)
    }

    pub fn last(&self) -> Option<PricePoint> {
        self.points.last().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn validate(p: PricePoint) -> Result<(), WindowError> {
    if p.close.is_valid() {
        Ok(())
    } else {
        Err(WindowError::InvalidPrice {
            date: p.date,
            close: p.close,
        })
    }
}

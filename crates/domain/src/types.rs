//! Core domain types.
//!
//! Goals:
//! - no bare f64 in business logic
//! - units are part of the type
//! - a bad observation is rejected at the type boundary, not deep in a rule

use std::fmt;
use std::ops::{Div, Mul};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Asset price in quote currency (e.g. BTC/USDT)
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Price(pub f64);

/// Asset quantity (BTC)
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Qty(pub f64);

/// Quote currency amount (USDT)
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Money(pub f64);

/// Basis points (1 bps = 0.01%)
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Bps(pub f64);

/// Milliseconds since unix epoch
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimestampMs(pub i64);

/// One daily close.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: Price,
}

/// Latest traded price with the instant it was observed.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Quote {
    pub at: DateTime<Utc>,
    pub price: Price,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

/// Tolerance for threshold comparisons on `return_from`.
///
/// `(p - base) / base` is off by a few ulps for most two-decimal prices, so a
/// close exactly on a stop level can land just on the wrong side. One cent on a
/// six-figure price is still 1e-8, well clear of this.
pub const RATIO_EPSILON: f64 = 1e-9;

//
// --- Conversions & helpers --------------------------------------------------
//

impl Price {
    /// Finite and strictly positive. Anything else is a malformed observation.
    pub fn is_valid(self) -> bool {
        self.0.is_finite() && self.0 > 0.0
    }

    /// Relative change from `base` to `self` (0.08 = +8%).
    pub fn return_from(self, base: Price) -> f64 {
        (self.0 - base.0) / base.0
    }

    /// At least `pct` below `base`. A close exactly on the level counts.
    pub fn fell_by(self, base: Price, pct: f64) -> bool {
        self.return_from(base) <= -pct + RATIO_EPSILON
    }

    /// At least `pct` above `base`. A close exactly on the level counts.
    pub fn rose_by(self, base: Price, pct: f64) -> bool {
        self.return_from(base) >= pct - RATIO_EPSILON
    }
}

impl Bps {
    pub fn as_fraction(self) -> f64 {
        self.0.max(0.0) / 10_000.0
    }
}

impl TimestampMs {
    pub fn to_date(self) -> Option<NaiveDate> {
        DateTime::<Utc>::from_timestamp_millis(self.0).map(|dt| dt.date_naive())
    }
}

impl Quote {
    pub fn as_point(self) -> PricePoint {
        PricePoint {
            date: self.at.date_naive(),
            close: self.price,
        }
    }
}

//
// --- Arithmetic (strictly minimal) ------------------------------------------
//

impl Mul<Price> for Qty {
    type Output = Money;
    fn mul(self, price: Price) -> Money {
        Money(self.0 * price.0)
    }
}

impl Div<Price> for Money {
    type Output = Qty;
    fn div(self, price: Price) -> Qty {
        Qty(self.0 / price.0)
    }
}

//
// --- Display (logs / telegram) ----------------------------------------------
//

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.8}", self.0)
    }
}

impl fmt::Display for Bps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} bps", self.0)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("BUY"),
            Side::Sell => f.write_str("SELL"),
        }
    }
}

use chrono::NaiveDate;
use domain::types::Price;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cause::TransitionCause;
use crate::state::PositionState;
use crate::transition::{TransitionError, transition};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Flat,
    Long,
}

/// The single position of a running instance.
///
/// A plain value: every evaluation takes one and hands back the next one.
/// Fields are private so the only way to move between states is [`Position::apply`],
/// which goes through the transition table.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    status: PositionStatus,
    entry_price: Option<Price>,
    #[serde(default)]
    entry_date: Option<NaiveDate>,
    peak_price_since_entry: Option<Price>,
    trailing_active: bool,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("status is {status:?} but entry price is {entry_price:?}")]
    StatusEntryMismatch {
        status: PositionStatus,
        entry_price: Option<Price>,
    },
    #[error("long position without a peak price")]
    MissingPeak,
    #[error("peak {peak} is below entry {entry}")]
    PeakBelowEntry { peak: Price, entry: Price },
    #[error("trailing stop active on a flat position")]
    TrailingWhileFlat,
    #[error("trailing stop active but peak {peak} is short of the activation level from entry {entry}")]
    TrailingBelowActivation { peak: Price, entry: Price },
    #[error("non-positive or non-finite price stored in position")]
    InvalidStoredPrice,
}

impl Default for Position {
    fn default() -> Self {
        Self::flat()
    }
}

impl Position {
    pub fn flat() -> Self {
        Self {
            status: PositionStatus::Flat,
            entry_price: None,
            entry_date: None,
            peak_price_since_entry: None,
            trailing_active: false,
        }
    }

    pub fn status(&self) -> PositionStatus {
        self.status
    }

    pub fn entry_price(&self) -> Option<Price> {
        self.entry_price
    }

    pub fn entry_date(&self) -> Option<NaiveDate> {
        self.entry_date
    }

    pub fn peak_price(&self) -> Option<Price> {
        self.peak_price_since_entry
    }

    pub fn trailing_active(&self) -> bool {
        self.trailing_active
    }

    pub fn is_long(&self) -> bool {
        self.status == PositionStatus::Long
    }

    pub fn state(&self) -> PositionState {
        match (self.status, self.trailing_active) {
            (PositionStatus::Flat, _) => PositionState::Flat,
            (PositionStatus::Long, false) => PositionState::LongNormal,
            (PositionStatus::Long, true) => PositionState::LongTrailing,
        }
    }

    /// Next position after `cause` fires at `price` on `date`.
    ///
    /// `self` is left untouched; an illegal cause for the current state is an error
    /// and no new value is produced.
    pub fn apply(
        &self,
        cause: TransitionCause,
        price: Price,
        date: NaiveDate,
    ) -> Result<Position, TransitionError> {
        transition(self.state(), cause)?;

        let next = match cause {
            TransitionCause::EntrySignal => Position {
                status: PositionStatus::Long,
                entry_price: Some(price),
                entry_date: Some(date),
                peak_price_since_entry: Some(price),
                trailing_active: false,
            },
            TransitionCause::TrailingActivated => Position {
                peak_price_since_entry: Some(max_price(self.peak_price_since_entry, price)),
                trailing_active: true,
                ..*self
            },
            TransitionCause::StopLossHit
            | TransitionCause::TrailingStopHit
            | TransitionCause::ForceFlat => Position::flat(),
        };

        Ok(next)
    }

    /// Ratchet the high-water mark. No-op while flat; never lowers the peak.
    pub fn raise_peak(&self, price: Price) -> Position {
        if !self.is_long() {
            return *self;
        }

        Position {
            peak_price_since_entry: Some(max_price(self.peak_price_since_entry, price)),
            ..*self
        }
    }

    /// Same position with the entry re-based on the actual fill price.
    /// Used when the exchange confirms at a price other than the signal price.
    pub fn with_entry_fill(&self, fill: Price) -> Position {
        if !self.is_long() || self.trailing_active {
            return *self;
        }

        Position {
            entry_price: Some(fill),
            peak_price_since_entry: Some(fill),
            ..*self
        }
    }

    /// Structural checks, used on anything loaded from disk.
    pub fn check_invariants(&self, trailing_activation_pct: f64) -> Result<(), InvariantViolation> {
        let prices = [self.entry_price, self.peak_price_since_entry];
        if prices.iter().flatten().any(|p| !p.is_valid()) {
            return Err(InvariantViolation::InvalidStoredPrice);
        }

        match (self.status, self.entry_price) {
            (PositionStatus::Long, Some(_)) | (PositionStatus::Flat, None) => {}
            (status, entry_price) => {
                return Err(InvariantViolation::StatusEntryMismatch {
                    status,
                    entry_price,
                });
            }
        }

        let Some(entry) = self.entry_price else {
            if self.trailing_active {
                return Err(InvariantViolation::TrailingWhileFlat);
            }
            return Ok(());
        };

        let Some(peak) = self.peak_price_since_entry else {
            return Err(InvariantViolation::MissingPeak);
        };

        if peak < entry {
            return Err(InvariantViolation::PeakBelowEntry { peak, entry });
        }

        if self.trailing_active && !peak.rose_by(entry, trailing_activation_pct) {
            return Err(InvariantViolation::TrailingBelowActivation { peak, entry });
        }

        Ok(())
    }
}

fn max_price(current: Option<Price>, candidate: Price) -> Price {
    match current {
        Some(p) if p.0 >= candidate.0 => p,
        _ => candidate,
    }
}

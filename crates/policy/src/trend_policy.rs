use chrono::NaiveDate;
use domain::types::Price;
use indicators::IndicatorError;
use state_machine::cause::TransitionCause;
use state_machine::position::{InvariantViolation, Position};
use state_machine::transition::TransitionError;
use thiserror::Error;

use crate::params::StrategyParams;

/// Strategy action on the current bar (spot, long-only)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrendAction {
    HoldFlat,
    EnterLong,
    HoldLong,
    ExitLong,
}

/// Why the decision was taken (logs / notifications)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrendDecisionReason {
    PriceAboveMa,
    PriceNotAboveMa,
    StopLossHit,
    TrailingActivated,
    TrailingStopHit,
    PeakRaised,
    NoSignal,
}

/// Inputs for one tick.
#[derive(Debug, Copy, Clone)]
pub struct TrendPolicyInput {
    pub date: NaiveDate,
    pub price: Price,
    /// Moving average for this bar, or why there is none.
    pub ma: Result<Price, IndicatorError>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TrendPolicyDecision {
    /// Position to carry into the next tick.
    pub next: Position,
    pub action: TrendAction,
    pub reason: TrendDecisionReason,
    /// State-machine cause fired this tick, if any.
    pub cause: Option<TransitionCause>,
}

/// Skip-the-tick conditions. The input position is never modified when one is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error(transparent)]
    InsufficientData(#[from] IndicatorError),
    #[error("invalid price {0:?}")]
    InvalidPrice(Price),
    #[error("invalid moving average {0:?}")]
    InvalidMovingAverage(Price),
    #[error("position is corrupt: {0}")]
    CorruptPosition(#[from] InvariantViolation),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// One evaluation of the position state machine.
///
/// Rule order is fixed: stop-loss first, then trailing activation, then the
/// trailing exit. There is no trend-reversal exit: once long, only the two stops
/// close the position.
pub fn trend_policy_decision(
    position: Position,
    input: TrendPolicyInput,
    params: StrategyParams,
) -> Result<TrendPolicyDecision, PolicyError> {
    let price = input.price;
    if !price.is_valid() {
        return Err(PolicyError::InvalidPrice(price));
    }

    let ma = input.ma?;
    if !ma.is_valid() {
        return Err(PolicyError::InvalidMovingAverage(ma));
    }

    if !position.is_long() {
        if price > ma {
            let next = position.apply(TransitionCause::EntrySignal, price, input.date)?;
            return Ok(TrendPolicyDecision {
                next,
                action: TrendAction::EnterLong,
                reason: TrendDecisionReason::PriceAboveMa,
                cause: Some(TransitionCause::EntrySignal),
            });
        }

        return Ok(TrendPolicyDecision {
            next: position,
            action: TrendAction::HoldFlat,
            reason: TrendDecisionReason::PriceNotAboveMa,
            cause: None,
        });
    }

    position.check_invariants(params.trailing_activation_pct)?;
    let Some(entry) = position.entry_price() else {
        return Err(InvariantViolation::MissingPeak.into());
    };

    // Hard floor, regardless of trailing state.
    if price.fell_by(entry, params.stop_loss_pct) {
        return exit(position, TransitionCause::StopLossHit, price, input.date);
    }

    let raised = position.raise_peak(price);

    if !raised.trailing_active() {
        if price.rose_by(entry, params.trailing_activation_pct) {
            let next = raised.apply(TransitionCause::TrailingActivated, price, input.date)?;
            return Ok(TrendPolicyDecision {
                next,
                action: TrendAction::HoldLong,
                reason: TrendDecisionReason::TrailingActivated,
                cause: Some(TransitionCause::TrailingActivated),
            });
        }

        return Ok(hold_long(position, raised));
    }

    let Some(peak) = raised.peak_price() else {
        return Err(InvariantViolation::MissingPeak.into());
    };

    if price.fell_by(peak, params.trailing_stop_pct) {
        return exit(position, TransitionCause::TrailingStopHit, price, input.date);
    }

    Ok(hold_long(position, raised))
}

fn exit(
    position: Position,
    cause: TransitionCause,
    price: Price,
    date: NaiveDate,
) -> Result<TrendPolicyDecision, PolicyError> {
    let next = position.apply(cause, price, date)?;
    let reason = match cause {
        TransitionCause::TrailingStopHit => TrendDecisionReason::TrailingStopHit,
        _ => TrendDecisionReason::StopLossHit,
    };

    Ok(TrendPolicyDecision {
        next,
        action: TrendAction::ExitLong,
        reason,
        cause: Some(cause),
    })
}

fn hold_long(before: Position, after: Position) -> TrendPolicyDecision {
    let reason = if after.peak_price() != before.peak_price() {
        TrendDecisionReason::PeakRaised
    } else {
        TrendDecisionReason::NoSignal
    };

    TrendPolicyDecision {
        next: after,
        action: TrendAction::HoldLong,
        reason,
        cause: None,
    }
}

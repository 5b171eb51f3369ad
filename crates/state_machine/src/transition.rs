use thiserror::Error;

use crate::cause::TransitionCause;
use crate::state::PositionState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition from {from:?} on {cause:?}")]
    IllegalTransition {
        from: PositionState,
        cause: TransitionCause,
    },
}

pub fn transition(
    state: PositionState,
    cause: TransitionCause,
) -> Result<PositionState, TransitionError> {
    let next = match (state, cause) {
        // --- Flat -----------------------------------------------------------
        (PositionState::Flat, TransitionCause::EntrySignal) => PositionState::LongNormal,

        // --- Long, trailing not armed ---------------------------------------
        (PositionState::LongNormal, TransitionCause::TrailingActivated) => {
            PositionState::LongTrailing
        }
        (PositionState::LongNormal, TransitionCause::StopLossHit) => PositionState::Flat,
        (PositionState::LongNormal, TransitionCause::ForceFlat) => PositionState::Flat,

        // --- Long, trailing armed -------------------------------------------
        (PositionState::LongTrailing, TransitionCause::StopLossHit) => PositionState::Flat,
        (PositionState::LongTrailing, TransitionCause::TrailingStopHit) => PositionState::Flat,
        (PositionState::LongTrailing, TransitionCause::ForceFlat) => PositionState::Flat,

        // --- Illegal --------------------------------------------------------
        _ => return Err(TransitionError::IllegalTransition { from: state, cause }),
    };

    Ok(next)
}

use chrono::NaiveDate;
use domain::types::Price;
use policy::trend_policy::{TrendAction, TrendDecisionReason};
use state_machine::cause::TransitionCause;
use state_machine::state::PositionState;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Transition {
        date: NaiveDate,
        from: PositionState,
        cause: TransitionCause,
        to: PositionState,
        price: Price,
    },
    PolicyDecision {
        date: NaiveDate,
        action: TrendAction,
        reason: TrendDecisionReason,
        price: Price,
        ma: Price,
    },
    PeakRaised {
        date: NaiveDate,
        peak: Price,
    },
    Log(String),
}

use domain::types::Price;
use indicators::IndicatorError;
use policy::params::StrategyParams;
use policy::trend_policy::{
    PolicyError, TrendDecisionReason, TrendPolicyDecision, TrendPolicyInput,
    trend_policy_decision,
};
use state_machine::position::Position;
use thiserror::Error;

use crate::event::EngineEvent;
use crate::feed::PriceWindow;

/// Why a tick was skipped. The position going in is still the current one.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TickError {
    #[error(transparent)]
    InsufficientData(#[from] IndicatorError),
    #[error("invalid price {0:?}")]
    InvalidPrice(Price),
    #[error(transparent)]
    Policy(PolicyError),
}

impl From<PolicyError> for TickError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::InsufficientData(e) => TickError::InsufficientData(e),
            PolicyError::InvalidPrice(p) | PolicyError::InvalidMovingAverage(p) => {
                TickError::InvalidPrice(p)
            }
            other => TickError::Policy(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TickOutcome {
    /// Position after this tick. Identical to the input on hold.
    pub position: Position,
    pub decision: TrendPolicyDecision,
    pub price: Price,
    pub ma: Price,
    pub events: Vec<EngineEvent>,
}

/// One evaluation against the newest point of `window`.
///
/// The window must already contain that point: the moving average covers it,
/// and nothing after it exists yet.
pub fn tick(
    position: Position,
    window: &PriceWindow,
    params: StrategyParams,
) -> Result<TickOutcome, TickError> {
    let Some(point) = window.last() else {
        return Err(TickError::InsufficientData(IndicatorError::InsufficientData {
            needed: params.ma_period,
            available: 0,
        }));
    };

    let ma = window.moving_average(params.ma_period)?;

    let decision = trend_policy_decision(
        position,
        TrendPolicyInput {
            date: point.date,
            price: point.close,
            ma: Ok(ma),
        },
        params,
    )?;

    let mut events = vec![EngineEvent::PolicyDecision {
        date: point.date,
        action: decision.action,
        reason: decision.reason,
        price: point.close,
        ma,
    }];

    if let Some(cause) = decision.cause {
        events.push(EngineEvent::Transition {
            date: point.date,
            from: position.state(),
            cause,
            to: decision.next.state(),
            price: point.close,
        });
    }

    if decision.reason == TrendDecisionReason::PeakRaised {
        if let Some(peak) = decision.next.peak_price() {
            events.push(EngineEvent::PeakRaised {
                date: point.date,
                peak,
            });
        }
    }

    Ok(TickOutcome {
        position: decision.next,
        decision,
        price: point.close,
        ma,
        events,
    })
}

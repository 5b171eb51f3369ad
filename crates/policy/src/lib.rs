pub mod params;
pub mod trend_policy;

pub use params::{ParamsError, StrategyParams};
pub use trend_policy::{
    PolicyError, TrendAction, TrendDecisionReason, TrendPolicyDecision, TrendPolicyInput,
    trend_policy_decision,
};

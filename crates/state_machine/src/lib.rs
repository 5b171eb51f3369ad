pub mod cause;
pub mod position;
pub mod state;
pub mod transition;

pub use cause::{ExitReason, TransitionCause};
pub use position::{InvariantViolation, Position, PositionStatus};
pub use state::PositionState;
pub use transition::{TransitionError, transition};

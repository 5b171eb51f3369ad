use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransitionCause {
    // Entry
    EntrySignal,

    // Profit lock
    TrailingActivated,

    // Exit triggers
    StopLossHit,
    TrailingStopHit,

    // Backtest bookkeeping: close whatever is open on the last bar
    ForceFlat,
}

/// Why a position was closed. Stored on every trade record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    EndOfData,
}

impl TransitionCause {
    pub fn exit_reason(self) -> Option<ExitReason> {
        match self {
            TransitionCause::StopLossHit => Some(ExitReason::StopLoss),
            TransitionCause::TrailingStopHit => Some(ExitReason::TrailingStop),
            TransitionCause::ForceFlat => Some(ExitReason::EndOfData),
            TransitionCause::EntrySignal | TransitionCause::TrailingActivated => None,
        }
    }
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::EndOfData => "END_OF_DATA",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

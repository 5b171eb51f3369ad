use chrono::NaiveDate;
use domain::types::Price;
use serde::{Deserialize, Serialize};
use state_machine::cause::ExitReason;
use state_machine::position::Position;

/// One closed round trip. Never modified once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_date: NaiveDate,
    pub entry_price: Price,
    pub exit_date: NaiveDate,
    pub exit_price: Price,
    pub exit_reason: ExitReason,
    /// Percent, gross of fees: (exit - entry) / entry * 100.
    pub return_pct: f64,
}

impl TradeRecord {
    /// Record for closing `position` at `exit_price`. `None` if it was not long.
    ///
    /// A position restored from an older state file may lack its entry date;
    /// the exit date stands in for it then.
    pub fn close(
        position: &Position,
        exit_date: NaiveDate,
        exit_price: Price,
        exit_reason: ExitReason,
    ) -> Option<TradeRecord> {
        let entry_price = position.entry_price()?;

        Some(TradeRecord {
            entry_date: position.entry_date().unwrap_or(exit_date),
            entry_price,
            exit_date,
            exit_price,
            exit_reason,
            return_pct: exit_price.return_from(entry_price) * 100.0,
        })
    }

    pub fn is_win(&self) -> bool {
        self.return_pct > 0.0
    }

    pub fn holding_days(&self) -> i64 {
        (self.exit_date - self.entry_date).num_days()
    }
}

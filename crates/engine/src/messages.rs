//! Notification texts (Telegram HTML).

use domain::types::{Price, Side};
use policy::params::StrategyParams;
use state_machine::position::Position;
use state_machine::state::PositionState;

use crate::trade::TradeRecord;

pub fn startup(symbol: &str, params: &StrategyParams, position: &Position, halted: bool) -> String {
    let mut msg = format!(
        "🤖 <b>{} trend bot started</b>\n\
         MA period: {} days\n\
         Stop-loss: -{:.1}%\n\
         Trailing stop: -{:.1}% from peak, armed at +{:.1}%\n\
         Position: {}",
        escape(symbol),
        params.ma_period,
        params.stop_loss_pct * 100.0,
        params.trailing_stop_pct * 100.0,
        params.trailing_activation_pct * 100.0,
        describe(position),
    );
    if halted {
        msg.push_str("\n⛔ <b>Trading is halted.</b> Restart with --resume after checking the account.");
    }
    msg
}

pub fn entry(symbol: &str, price: Price, ma: Price, params: &StrategyParams) -> String {
    format!(
        "🟢 <b>BUY {}</b>\n\
         Price: {}\n\
         MA{}: {}\n\
         Stop-loss: {}",
        escape(symbol),
        price,
        params.ma_period,
        ma,
        Price(price.0 * (1.0 - params.stop_loss_pct)),
    )
}

pub fn trailing_armed(symbol: &str, price: Price, position: &Position, params: &StrategyParams) -> String {
    let peak = position.peak_price().unwrap_or(price);
    format!(
        "🔒 <b>{} trailing stop armed</b>\n\
         Price: {}\n\
         Stop: {} (-{:.1}% from peak)",
        escape(symbol),
        price,
        Price(peak.0 * (1.0 - params.trailing_stop_pct)),
        params.trailing_stop_pct * 100.0,
    )
}

pub fn exit(symbol: &str, trade: &TradeRecord) -> String {
    let icon = if trade.is_win() { "💰" } else { "🔴" };
    format!(
        "{} <b>SELL {}</b> ({})\n\
         Entry: {} on {}\n\
         Exit: {} on {}\n\
         Return: {:+.2}%",
        icon,
        escape(symbol),
        trade.exit_reason,
        trade.entry_price,
        trade.entry_date,
        trade.exit_price,
        trade.exit_date,
        trade.return_pct,
    )
}

pub fn order_failed(symbol: &str, side: Side, attempts: u32, error: &str) -> String {
    format!(
        "⛔ <b>{} {} order failed</b> after {} attempt(s)\n\
         {}\n\
         Automatic trading is halted until manual intervention.",
        escape(symbol),
        side,
        attempts,
        escape(error),
    )
}

pub fn status(
    symbol: &str,
    price: Price,
    ma: Price,
    position: &Position,
    params: &StrategyParams,
) -> String {
    let trend = if price > ma { "above MA 📈" } else { "below MA 📉" };
    let mut msg = format!(
        "📊 <b>{}</b> {}\n\
         MA{}: {} ({})\n\
         Position: {}",
        escape(symbol),
        price,
        params.ma_period,
        ma,
        trend,
        describe(position),
    );

    if let Some(entry) = position.entry_price() {
        msg.push_str(&format!(
            "\nUnrealised: {:+.2}%",
            price.return_from(entry) * 100.0
        ));
        if let Some(stop) = stop_level(position, params) {
            msg.push_str(&format!("\nStop: {}", stop));
        }
    }
    msg
}

/// Shutdown notice. `error` is the fatal error that ended the run, if any.
pub fn stopped(symbol: &str, error: Option<&str>) -> String {
    match error {
        None => format!("🛑 <b>{} trend bot stopped</b>", escape(symbol)),
        Some(e) => format!(
            "⚠️ <b>{} trend bot stopped on error</b>\n{}",
            escape(symbol),
            escape(e)
        ),
    }
}

/// Exit level currently in force for an open position.
pub fn stop_level(position: &Position, params: &StrategyParams) -> Option<Price> {
    match position.state() {
        PositionState::Flat => None,
        PositionState::LongNormal => position
            .entry_price()
            .map(|e| Price(e.0 * (1.0 - params.stop_loss_pct))),
        PositionState::LongTrailing => {
            let hard = position.entry_price()?.0 * (1.0 - params.stop_loss_pct);
            let trail = position.peak_price()?.0 * (1.0 - params.trailing_stop_pct);
            Some(Price(hard.max(trail)))
        }
    }
}

fn describe(position: &Position) -> String {
    match (position.state(), position.entry_price()) {
        (PositionState::Flat, _) | (_, None) => "flat".to_string(),
        (PositionState::LongNormal, Some(entry)) => format!("long from {}", entry),
        (PositionState::LongTrailing, Some(entry)) => format!(
            "long from {}, trailing (peak {})",
            entry,
            position.peak_price().unwrap_or(entry)
        ),
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

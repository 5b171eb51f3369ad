use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use domain::types::Money;
use execution::sim::ExecutionModel;
use serde::Serialize;
use state_machine::cause::ExitReason;
use thiserror::Error;

use crate::trade::TradeRecord;

/// Mark-to-market equity at the close of one bar.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasonStats {
    pub count: usize,
    pub avg_return_pct: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearStats {
    pub start_equity: Money,
    pub end_equity: Money,
    pub return_pct: f64,
    pub trades: usize,
    pub wins: usize,
}

/// Named date range for a sub-period table, both ends inclusive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleWindow {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Error)]
#[error("cycle must be NAME:YYYY-MM-DD:YYYY-MM-DD with start <= end, got {0:?}")]
pub struct CycleParseError(String);

impl CycleWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl FromStr for CycleWindow {
    type Err = CycleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || CycleParseError(s.to_string());
        let mut parts = s.rsplitn(3, ':');
        let (Some(end), Some(start), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(bad());
        };

        let start = NaiveDate::parse_from_str(start, "%Y-%m-%d").map_err(|_| bad())?;
        let end = NaiveDate::parse_from_str(end, "%Y-%m-%d").map_err(|_| bad())?;
        if name.trim().is_empty() || end < start {
            return Err(bad());
        }

        Ok(CycleWindow {
            name: name.trim().to_string(),
            start,
            end,
        })
    }
}

const HALVINGS: [(&str, (i32, u32, u32), (i32, u32, u32)); 4] = [
    ("cycle 1 (2012-11 halving)", (2012, 11, 28), (2016, 7, 8)),
    ("cycle 2 (2016-07 halving)", (2016, 7, 9), (2020, 5, 10)),
    ("cycle 3 (2020-05 halving)", (2020, 5, 11), (2024, 4, 19)),
    ("cycle 4 (2024-04 halving)", (2024, 4, 20), (2028, 4, 30)),
];

/// Bitcoin halving-to-halving windows.
pub fn halving_cycles() -> Vec<CycleWindow> {
    HALVINGS
        .iter()
        .filter_map(|(name, (sy, sm, sd), (ey, em, ed))| {
            Some(CycleWindow {
                name: name.to_string(),
                start: NaiveDate::from_ymd_opt(*sy, *sm, *sd)?,
                end: NaiveDate::from_ymd_opt(*ey, *em, *ed)?,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleStats {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub start_equity: Money,
    pub end_equity: Money,
    pub return_pct: f64,
    /// Trades closed inside the window.
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestStats {
    pub trade_count: usize,
    pub wins: usize,
    pub losses: usize,
    /// Fraction of trades with a positive return, 0 when there are none.
    pub win_rate: f64,
    pub avg_win_pct: f64,
    /// Magnitude: a -8% average loss is reported as 8.0.
    pub avg_loss_pct: f64,
    /// Full reinvestment across closed trades, net of fees.
    pub total_return_pct: f64,
    pub initial_capital: Money,
    /// Capital after the last closed trade.
    pub final_capital: Money,
    /// Last mark-to-market equity, including an open position.
    pub final_equity: Money,
    pub max_drawdown_pct: f64,
    pub by_reason: BTreeMap<ExitReason, ReasonStats>,
    pub yearly: BTreeMap<i32, YearStats>,
    pub cycles: Vec<CycleStats>,
}

impl BacktestStats {
    pub fn compute(
        trades: &[TradeRecord],
        equity: &[EquityPoint],
        initial_capital: Money,
        exec: ExecutionModel,
        cycles: &[CycleWindow],
    ) -> BacktestStats {
        let wins: Vec<f64> = trades
            .iter()
            .filter(|t| t.is_win())
            .map(|t| t.return_pct)
            .collect();
        let losses: Vec<f64> = trades
            .iter()
            .filter(|t| !t.is_win())
            .map(|t| t.return_pct)
            .collect();

        let growth: f64 = trades
            .iter()
            .map(|t| exec.round_trip_factor(t.entry_price, t.exit_price))
            .product();

        let final_capital = Money(initial_capital.0 * growth);
        let final_equity = equity.last().map(|p| p.equity).unwrap_or(final_capital);

        BacktestStats {
            trade_count: trades.len(),
            wins: wins.len(),
            losses: losses.len(),
            win_rate: ratio(wins.len(), trades.len()),
            avg_win_pct: mean(&wins),
            avg_loss_pct: mean(&losses).abs(),
            total_return_pct: (growth - 1.0) * 100.0,
            initial_capital,
            final_capital,
            final_equity,
            max_drawdown_pct: max_drawdown(equity) * 100.0,
            by_reason: by_reason(trades),
            yearly: yearly(trades, equity, initial_capital),
            cycles: cycle_table(trades, equity, initial_capital, cycles),
        }
    }
}

fn ratio(n: usize, d: usize) -> f64 {
    if d == 0 { 0.0 } else { n as f64 / d as f64 }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

/// Largest peak-to-trough fall of the equity curve, as a fraction.
fn max_drawdown(equity: &[EquityPoint]) -> f64 {
    let mut max_equity = f64::MIN;
    let mut max_dd = 0.0_f64;

    for p in equity {
        max_equity = max_equity.max(p.equity.0);
        if max_equity > 0.0 {
            max_dd = max_dd.max((max_equity - p.equity.0) / max_equity);
        }
    }

    max_dd
}

fn by_reason(trades: &[TradeRecord]) -> BTreeMap<ExitReason, ReasonStats> {
    let mut grouped: BTreeMap<ExitReason, Vec<&TradeRecord>> = BTreeMap::new();
    for t in trades {
        grouped.entry(t.exit_reason).or_default().push(t);
    }

    grouped
        .into_iter()
        .map(|(reason, ts)| {
            let returns: Vec<f64> = ts.iter().map(|t| t.return_pct).collect();
            let wins = ts.iter().filter(|t| t.is_win()).count();
            (
                reason,
                ReasonStats {
                    count: ts.len(),
                    avg_return_pct: mean(&returns),
                    win_rate: ratio(wins, ts.len()),
                },
            )
        })
        .collect()
}

fn yearly(
    trades: &[TradeRecord],
    equity: &[EquityPoint],
    initial_capital: Money,
) -> BTreeMap<i32, YearStats> {
    let mut out: BTreeMap<i32, YearStats> = BTreeMap::new();
    let mut carried = initial_capital;

    for p in equity {
        let year = p.date.year();
        let row = out.entry(year).or_insert(YearStats {
            start_equity: carried,
            end_equity: carried,
            return_pct: 0.0,
            trades: 0,
            wins: 0,
        });
        row.end_equity = p.equity;
        carried = p.equity;
    }

    for t in trades {
        if let Some(row) = out.get_mut(&t.exit_date.year()) {
            row.trades += 1;
            if t.is_win() {
                row.wins += 1;
            }
        }
    }

    for row in out.values_mut() {
        if row.start_equity.0 > 0.0 {
            row.return_pct = (row.end_equity.0 / row.start_equity.0 - 1.0) * 100.0;
        }
    }

    out
}

fn cycle_table(
    trades: &[TradeRecord],
    equity: &[EquityPoint],
    initial_capital: Money,
    windows: &[CycleWindow],
) -> Vec<CycleStats> {
    windows
        .iter()
        .map(|w| {
            let start_equity = equity
                .iter()
                .take_while(|p| p.date < w.start)
                .last()
                .map(|p| p.equity)
                .unwrap_or(initial_capital);
            let end_equity = equity
                .iter()
                .filter(|p| w.contains(p.date))
                .last()
                .map(|p| p.equity)
                .unwrap_or(start_equity);

            let closed: Vec<&TradeRecord> =
                trades.iter().filter(|t| w.contains(t.exit_date)).collect();
            let wins = closed.iter().filter(|t| t.is_win()).count();

            CycleStats {
                name: w.name.clone(),
                start: w.start,
                end: w.end,
                start_equity,
                end_equity,
                return_pct: if start_equity.0 > 0.0 {
                    (end_equity.0 / start_equity.0 - 1.0) * 100.0
                } else {
                    0.0
                },
                trades: closed.len(),
                wins,
                win_rate: ratio(wins, closed.len()),
            }
        })
        .collect()
}

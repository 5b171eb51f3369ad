use chrono::NaiveDate;
use domain::types::{Bps, Money, Price, PricePoint, Qty};
use execution::sim::ExecutionModel;
use policy::params::{ParamsError, StrategyParams};
use policy::trend_policy::TrendAction;
use serde::Serialize;
use state_machine::cause::{ExitReason, TransitionCause};
use state_machine::position::Position;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::event::EngineEvent;
use crate::feed::{PriceWindow, WindowError};
use crate::sink;
use crate::stats::{BacktestStats, CycleWindow, EquityPoint, halving_cycles};
use crate::tick::{TickError, tick};
use crate::trade::TradeRecord;

pub const DEFAULT_INITIAL_CAPITAL: f64 = 10_000_000.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestParams {
    pub strategy: StrategyParams,
    /// Commission per leg.
    pub fee: Bps,
    pub initial_capital: Money,
    /// Close a position still open on the last point (END_OF_DATA).
    pub close_at_end: bool,
    /// Sub-periods reported in `BacktestStats::cycles`.
    pub cycles: Vec<CycleWindow>,
}

impl Default for BacktestParams {
    fn default() -> Self {
        Self {
            strategy: StrategyParams::default(),
            fee: Bps(0.0),
            initial_capital: Money(DEFAULT_INITIAL_CAPITAL),
            close_at_end: false,
            cycles: halving_cycles(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error(transparent)]
    Params(#[from] ParamsError),
    #[error("initial capital must be > 0, got {0}")]
    Capital(Money),
    #[error("tick on {date} failed: {source}")]
    Tick { date: NaiveDate, source: TickError },
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SkipCounts {
    pub insufficient_data: usize,
    pub invalid_price: usize,
    pub out_of_order: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestReport {
    pub params: BacktestParams,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    /// Points that reached the state machine.
    pub ticks: usize,
    pub skipped: SkipCounts,
    pub trades: Vec<TradeRecord>,
    pub stats: BacktestStats,
    /// Position left open after the last point, if any.
    pub open_position: Option<Position>,
}

/// Account of the simulated run: all-in on entry, all-out on exit.
struct Book {
    exec: ExecutionModel,
    cash: Money,
    qty: Qty,
}

impl Book {
    fn buy(&mut self, price: Price) {
        self.qty = self.exec.buy_qty_for_quote(self.cash, price);
        self.cash = Money(0.0);
    }

    fn sell(&mut self, price: Price) {
        self.cash = Money(self.cash.0 + self.exec.sell_proceeds(self.qty, price).0);
        self.qty = Qty(0.0);
    }

    fn equity(&self, mark: Price) -> Money {
        Money(self.cash.0 + (self.qty * mark).0)
    }
}

/// Replay `points` through the state machine, one tick per point, oldest first.
///
/// The moving average at each tick only sees points up to and including it.
/// Points that are not strictly newer than the previous accepted one, or carry
/// an invalid close, are skipped and counted.
pub fn run_backtest(
    points: &[PricePoint],
    params: &BacktestParams,
) -> Result<BacktestReport, BacktestError> {
    params.strategy.validate()?;
    if !(params.initial_capital.0 > 0.0) {
        return Err(BacktestError::Capital(params.initial_capital));
    }

    let strategy = params.strategy;
    let exec = ExecutionModel { fee: params.fee };

    let mut window = PriceWindow::new(strategy.ma_period);
    let mut position = Position::flat();
    let mut book = Book {
        exec,
        cash: params.initial_capital,
        qty: Qty(0.0),
    };

    let mut trades = Vec::new();
    let mut equity = Vec::with_capacity(points.len());
    let mut skipped = SkipCounts::default();
    let mut ticks = 0usize;

    for &p in points {
        match window.push(p) {
            Ok(()) => {}
            Err(WindowError::InvalidPrice { date, close }) => {
                warn!(%date, close = close.0, "invalid close, tick skipped");
                skipped.invalid_price += 1;
                continue;
            }
            Err(WindowError::OutOfOrder { last, got }) => {
                warn!(%last, %got, "out-of-order point, tick skipped");
                skipped.out_of_order += 1;
                continue;
            }
        }
        ticks += 1;

        match tick(position, &window, strategy) {
            Ok(out) => {
                match out.decision.action {
                    TrendAction::EnterLong => book.buy(out.price),
                    TrendAction::ExitLong => {
                        book.sell(out.price);
                        let reason = out
                            .decision
                            .cause
                            .and_then(TransitionCause::exit_reason)
                            .unwrap_or(ExitReason::StopLoss);
                        trades.extend(TradeRecord::close(&position, p.date, out.price, reason));
                    }
                    TrendAction::HoldFlat | TrendAction::HoldLong => {}
                }

                sink::consume(&out.events);
                position = out.position;
            }
            Err(TickError::InsufficientData(e)) => {
                debug!(date = %p.date, "{e}, tick skipped");
                skipped.insufficient_data += 1;
            }
            Err(TickError::InvalidPrice(price)) => {
                warn!(date = %p.date, price = price.0, "invalid price, tick skipped");
                skipped.invalid_price += 1;
            }
            Err(source) => return Err(BacktestError::Tick { date: p.date, source }),
        }

        equity.push(EquityPoint {
            date: p.date,
            equity: book.equity(p.close),
        });
    }

    if params.close_at_end && position.is_long() {
        if let Some(last) = window.last() {
            let closed = position
                .apply(TransitionCause::ForceFlat, last.close, last.date)
                .map_err(|e| BacktestError::Tick {
                    date: last.date,
                    source: TickError::Policy(e.into()),
                })?;

            book.sell(last.close);
            trades.extend(TradeRecord::close(
                &position,
                last.date,
                last.close,
                ExitReason::EndOfData,
            ));
            sink::consume(&[EngineEvent::Log(format!(
                "closing open position at end of data: {} on {}",
                last.close, last.date
            ))]);

            if let Some(e) = equity.last_mut() {
                e.equity = book.equity(last.close);
            }
            position = closed;
        }
    }

    let stats = BacktestStats::compute(
        &trades,
        &equity,
        params.initial_capital,
        exec,
        &params.cycles,
    );

    info!(
        ticks,
        trades = stats.trade_count,
        total_return_pct = stats.total_return_pct,
        "backtest finished"
    );

    Ok(BacktestReport {
        params: params.clone(),
        first_date: equity.first().map(|e| e.date),
        last_date: equity.last().map(|e| e.date),
        ticks,
        skipped,
        trades,
        stats,
        open_position: position.is_long().then_some(position),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use state_machine::state::PositionState;

    fn series(closes: &[f64]) -> Vec<PricePoint> {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| PricePoint {
                date: start + chrono::Days::new(i as u64),
                close: Price(*c),
            })
            .collect()
    }

    /// 200 flat closes at 90 so the MA is defined (and below 100) from then on.
    fn warmed_up(tail: &[f64]) -> Vec<PricePoint> {
        let mut closes = vec![90.0; 200];
        closes.extend_from_slice(tail);
        series(&closes)
    }

    fn run(points: &[PricePoint]) -> BacktestReport {
        run_backtest(points, &BacktestParams::default()).unwrap()
    }

    #[test]
    fn trailing_stop_round_trip() {
        let r = run(&warmed_up(&[100.0, 108.0, 120.0, 107.0]));

        assert_eq!(r.trades.len(), 1);
        let t = &r.trades[0];
        assert_eq!(t.entry_price, Price(100.0));
        assert_eq!(t.exit_price, Price(107.0));
        assert_eq!(t.exit_reason, ExitReason::TrailingStop);
        assert!((t.return_pct - 7.0).abs() < 1e-9);
        assert!(r.open_position.is_none());
    }

    #[test]
    fn stop_loss_round_trip() {
        let r = run(&warmed_up(&[100.0, 92.0]));

        assert_eq!(r.trades.len(), 1);
        assert_eq!(r.trades[0].exit_reason, ExitReason::StopLoss);
        assert!((r.trades[0].return_pct - -8.0).abs() < 1e-9);
        assert_eq!(r.stats.win_rate, 0.0);
        assert!((r.stats.avg_loss_pct - 8.0).abs() < 1e-9);
    }

    #[test]
    fn never_above_ma_never_trades() {
        let closes: Vec<f64> = (0..400).map(|i| 500.0 - i as f64).collect();
        let r = run(&series(&closes));

        assert!(r.trades.is_empty());
        assert!(r.open_position.is_none());
        assert_eq!(r.stats.total_return_pct, 0.0);
        assert_eq!(r.stats.final_equity, Money(DEFAULT_INITIAL_CAPITAL));
    }

    #[test]
    fn short_history_stays_flat() {
        let closes: Vec<f64> = (1..200).map(|i| i as f64).collect();
        let r = run(&series(&closes));

        assert!(r.trades.is_empty());
        assert!(r.open_position.is_none());
        assert_eq!(r.skipped.insufficient_data, 199);
    }

    #[test]
    fn first_decision_is_on_the_200th_point() {
        let closes: Vec<f64> = (1..=200).map(|i| i as f64).collect();
        let r = run(&series(&closes));

        assert_eq!(r.skipped.insufficient_data, 199);
        let open = r.open_position.unwrap();
        assert_eq!(open.entry_price(), Some(Price(200.0)));
        assert_eq!(open.state(), PositionState::LongNormal);
    }

    #[test]
    fn open_position_is_reported_not_closed_by_default() {
        let r = run(&warmed_up(&[100.0, 105.0]));

        assert!(r.trades.is_empty());
        assert!(r.open_position.is_some());
        // equity is marked to the last close
        assert!((r.stats.final_equity.0 - DEFAULT_INITIAL_CAPITAL * 1.05).abs() < 1e-3);
        assert_eq!(r.stats.final_capital, Money(DEFAULT_INITIAL_CAPITAL));
    }

    #[test]
    fn close_at_end_books_end_of_data_trade() {
        let params = BacktestParams {
            close_at_end: true,
            ..BacktestParams::default()
        };
        let r = run_backtest(&warmed_up(&[100.0, 105.0]), &params).unwrap();

        assert_eq!(r.trades.len(), 1);
        assert_eq!(r.trades[0].exit_reason, ExitReason::EndOfData);
        assert!((r.trades[0].return_pct - 5.0).abs() < 1e-9);
        assert!(r.open_position.is_none());
        assert!((r.stats.final_capital.0 - r.stats.final_equity.0).abs() < 1e-3);
    }

    #[test]
    fn bad_points_are_skipped_and_counted() {
        let mut pts = warmed_up(&[100.0, 0.0, 92.0]);
        // duplicate of the last date
        let dup = *pts.last().unwrap();
        pts.push(dup);

        let r = run(&pts);

        assert_eq!(r.skipped.invalid_price, 1);
        assert_eq!(r.skipped.out_of_order, 1);
        assert_eq!(r.trades.len(), 1);
        assert_eq!(r.trades[0].exit_reason, ExitReason::StopLoss);
    }

    #[test]
    fn fees_lower_capital_but_not_trade_returns() {
        let pts = warmed_up(&[100.0, 108.0, 120.0, 107.0]);
        let gross = run(&pts);
        let net = run_backtest(
            &pts,
            &BacktestParams {
                fee: Bps(10.0),
                ..BacktestParams::default()
            },
        )
        .unwrap();

        assert_eq!(gross.trades, net.trades);
        assert!(net.stats.final_capital.0 < gross.stats.final_capital.0);
    }

    #[test]
    fn reruns_are_identical() {
        let closes: Vec<f64> = (0..900)
            .map(|i| 100.0 + 30.0 * ((i as f64) / 37.0).sin() + (i as f64) / 10.0)
            .collect();
        let pts = series(&closes);

        let a = serde_json::to_string(&run(&pts)).unwrap();
        let b = serde_json::to_string(&run(&pts)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn cycle_table_counts_trades_by_exit_date() {
        // warm-up runs through 2020-07-18, entry on the 19th, stop-loss on the 20th
        let pts = warmed_up(&[100.0, 93.0]);
        let params = BacktestParams {
            cycles: vec![
                "warm-up:2020-01-01:2020-07-18".parse().unwrap(),
                "trading:2020-07-19:2020-12-31".parse().unwrap(),
            ],
            ..BacktestParams::default()
        };
        let r = run_backtest(&pts, &params).unwrap();

        assert_eq!(r.trades.len(), 1);
        let [warm, trading] = r.stats.cycles.as_slice() else {
            panic!("expected two cycle rows");
        };
        assert_eq!(warm.trades, 0);
        assert_eq!(warm.return_pct, 0.0);
        assert_eq!(trading.trades, 1);
        assert_eq!(trading.wins, 0);
        assert!((trading.return_pct + 7.0).abs() < 1e-6);
        assert_eq!(trading.end_equity, r.stats.final_equity);
    }

    #[test]
    fn default_report_has_halving_rows() {
        let r = run(&warmed_up(&[100.0]));
        assert_eq!(r.stats.cycles.len(), 4);
        // 2020 data lands in the window opened by the May 2020 halving
        assert_eq!(r.stats.cycles[2].trades, 0);
        assert_eq!(r.stats.cycles[3].start_equity, r.stats.final_equity);
    }

    #[test]
    fn invalid_params_are_refused() {
        let params = BacktestParams {
            strategy: StrategyParams {
                ma_period: 0,
                ..StrategyParams::default()
            },
            ..BacktestParams::default()
        };
        assert!(matches!(
            run_backtest(&[], &params),
            Err(BacktestError::Params(_))
        ));
    }

    #[test]
    fn at_most_one_position_and_trades_alternate() {
        let closes: Vec<f64> = (0..1500)
            .map(|i| 100.0 + 40.0 * ((i as f64) / 23.0).sin())
            .collect();
        let r = run(&series(&closes));

        for pair in r.trades.windows(2) {
            assert!(pair[0].exit_date <= pair[1].entry_date);
        }
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn walk() -> impl Strategy<Value = Vec<f64>> {
            prop::collection::vec(-0.06f64..0.06, 0..500).prop_map(|steps| {
                let mut price = 100.0;
                steps
                    .into_iter()
                    .map(|s| {
                        price *= 1.0 + s;
                        price
                    })
                    .collect()
            })
        }

        fn small_ma() -> BacktestParams {
            BacktestParams {
                strategy: StrategyParams {
                    ma_period: 20,
                    ..StrategyParams::default()
                },
                ..BacktestParams::default()
            }
        }

        proptest! {
            #[test]
            fn stop_loss_trades_lose_at_least_the_stop(closes in walk()) {
                let r = run_backtest(&series(&closes), &small_ma()).unwrap();
                for t in r.trades.iter().filter(|t| t.exit_reason == ExitReason::StopLoss) {
                    prop_assert!(t.return_pct <= -7.0 + 1e-9);
                }
            }

            #[test]
            fn trailing_exits_only_after_activation(closes in walk()) {
                let r = run_backtest(&series(&closes), &small_ma()).unwrap();
                for t in r.trades.iter().filter(|t| t.exit_reason == ExitReason::TrailingStop) {
                    // armed at +8%, exits 10% under a peak at least that high
                    prop_assert!(t.return_pct >= -7.0);
                    prop_assert!(t.entry_date < t.exit_date);
                }
            }

            #[test]
            fn trades_never_overlap(closes in walk()) {
                let r = run_backtest(&series(&closes), &small_ma()).unwrap();
                for pair in r.trades.windows(2) {
                    prop_assert!(pair[0].exit_date < pair[1].entry_date);
                }
                prop_assert_eq!(r.stats.trade_count, r.trades.len());
            }

            #[test]
            fn same_input_same_report(closes in walk()) {
                let pts = series(&closes);
                prop_assert_eq!(
                    run_backtest(&pts, &small_ma()).unwrap(),
                    run_backtest(&pts, &small_ma()).unwrap()
                );
            }
        }
    }
}

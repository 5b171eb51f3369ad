use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use tracing::info;

use bybit::rest::{BybitRest, download_range};
use domain::types::{Bps, Money, Price, PricePoint};
use engine::backtest::{BacktestParams, BacktestReport, DEFAULT_INITIAL_CAPITAL, run_backtest};
use engine::stats::{CycleWindow, halving_cycles};
use engine::trade::TradeRecord;
use policy::params::StrategyParams;

/// Replay daily closes through the 200-day MA position rules.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "BTCUSDT")]
    symbol: String,
    /// First day to download (YYYY-MM-DD).
    #[arg(long, default_value = "2018-01-01")]
    start: String,
    /// Last day to download (YYYY-MM-DD), defaults to yesterday.
    #[arg(long)]
    end: Option<String>,
    #[arg(long, env = "BYBIT_BASE_URL", default_value = "https://api.bybit.com")]
    bybit_url: String,
    #[arg(long, default_value = "data/daily_closes.csv")]
    cache: PathBuf,
    /// Ignore the cache and download again.
    #[arg(long, default_value_t = false)]
    refresh: bool,
    /// Read closes from this `date,close` CSV instead of the exchange.
    #[arg(long)]
    input: Option<PathBuf>,

    #[arg(long, default_value_t = 200)]
    ma_period: usize,
    #[arg(long, default_value_t = 0.07)]
    stop_loss_pct: f64,
    #[arg(long, default_value_t = 0.08)]
    trailing_activation_pct: f64,
    #[arg(long, default_value_t = 0.10)]
    trailing_stop_pct: f64,
    /// Commission per leg.
    #[arg(long, default_value_t = 0.0)]
    fee_bps: f64,
    #[arg(long, default_value_t = DEFAULT_INITIAL_CAPITAL)]
    initial_capital: f64,
    /// Close a position still open on the last day.
    #[arg(long, default_value_t = false)]
    close_at_end: bool,
    /// Sub-period row as NAME:START:END, repeatable. Replaces the default
    /// bitcoin halving cycles.
    #[arg(long = "cycle", value_name = "NAME:START:END")]
    cycles: Vec<CycleWindow>,

    /// Write the full report as JSON.
    #[arg(long)]
    json_out: Option<PathBuf>,
    /// Write the trade list as CSV.
    #[arg(long)]
    trades_out: Option<PathBuf>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CloseRow {
    date: NaiveDate,
    close: f64,
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("bad date: {}", s))
}

fn day_start_ms(d: NaiveDate) -> Result<i64> {
    let dt = d.and_hms_opt(0, 0, 0).context("bad date")?;
    Ok(dt.and_utc().timestamp_millis())
}

fn read_closes(path: &Path) -> Result<Vec<PricePoint>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    let mut out = Vec::new();

    for r in rdr.deserialize::<CloseRow>() {
        let row = r.with_context(|| format!("read {}", path.display()))?;
        out.push(PricePoint {
            date: row.date,
            close: Price(row.close),
        });
    }

    Ok(out)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    Ok(())
}

fn write_closes(path: &Path, points: &[PricePoint]) -> Result<()> {
    ensure_parent(path)?;

    let mut wtr = csv::Writer::from_path(path)?;
    for p in points {
        wtr.serialize(CloseRow {
            date: p.date,
            close: p.close.0,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_trades(path: &Path, trades: &[TradeRecord]) -> Result<()> {
    ensure_parent(path)?;

    let mut wtr = csv::Writer::from_path(path)?;
    for t in trades {
        wtr.serialize(t)?;
    }
    wtr.flush()?;
    Ok(())
}

async fn load_points(args: &Args) -> Result<Vec<PricePoint>> {
    if let Some(input) = &args.input {
        return read_closes(input).context("read input csv failed");
    }

    if !args.refresh && args.cache.exists() {
        info!(cache = %args.cache.display(), "using cached closes");
        return read_closes(&args.cache).context("read cache failed");
    }

    let today = Utc::now().date_naive();
    let start = parse_date(&args.start)?;
    let end = match &args.end {
        Some(s) => parse_date(s)?,
        None => today.pred_opt().context("bad end date")?,
    };
    if end < start {
        anyhow::bail!("end {} is before start {}", end, start);
    }

    let api = BybitRest::new(Duration::from_secs(20))?.with_base_url(&args.bybit_url);
    let mut points = download_range(
        &api,
        &args.symbol,
        day_start_ms(start)?,
        day_start_ms(end)? + 24 * 60 * 60 * 1000 - 1,
    )
    .await
    .context("download range failed")?;

    // today's bar is still open
    points.retain(|p| p.date >= start && p.date <= end && p.date < today);

    write_closes(&args.cache, &points).context("write cache failed")?;
    info!(n = points.len(), cache = %args.cache.display(), "closes downloaded");
    Ok(points)
}

fn print_report(r: &BacktestReport) {
    let s = &r.stats;

    println!("Backtest finished");
    println!(
        "range: first={} last={} ticks={}",
        r.first_date.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
        r.last_date.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
        r.ticks
    );
    println!(
        "params: ma_period={} stop_loss={:.2}% trailing_activation={:.2}% trailing_stop={:.2}% fee_bps={:.2}",
        r.params.strategy.ma_period,
        r.params.strategy.stop_loss_pct * 100.0,
        r.params.strategy.trailing_activation_pct * 100.0,
        r.params.strategy.trailing_stop_pct * 100.0,
        r.params.fee.0
    );
    println!(
        "skipped: insufficient_data={} invalid_price={} out_of_order={}",
        r.skipped.insufficient_data, r.skipped.invalid_price, r.skipped.out_of_order
    );
    println!(
        "trades={} wins={} losses={} win_rate={:.2}%",
        s.trade_count,
        s.wins,
        s.losses,
        s.win_rate * 100.0
    );
    println!(
        "avg_win={:.2}% avg_loss={:.2}% total_return={:.2}% max_drawdown={:.2}%",
        s.avg_win_pct, s.avg_loss_pct, s.total_return_pct, s.max_drawdown_pct
    );
    println!(
        "initial_capital={} final_capital={} final_equity={}",
        s.initial_capital, s.final_capital, s.final_equity
    );

    for (reason, rs) in &s.by_reason {
        println!(
            "exit_reason={} count={} avg_return={:.2}% win_rate={:.2}%",
            reason,
            rs.count,
            rs.avg_return_pct,
            rs.win_rate * 100.0
        );
    }

    for (year, ys) in &s.yearly {
        println!(
            "year={} start_equity={} end_equity={} return={:.2}% trades={} wins={}",
            year, ys.start_equity, ys.end_equity, ys.return_pct, ys.trades, ys.wins
        );
    }

    for c in &s.cycles {
        println!(
            "cycle=\"{}\" from={} to={} start_equity={} end_equity={} return={:.2}% trades={} wins={} win_rate={:.2}%",
            c.name,
            c.start,
            c.end,
            c.start_equity,
            c.end_equity,
            c.return_pct,
            c.trades,
            c.wins,
            c.win_rate * 100.0
        );
    }

    if let Some(p) = &r.open_position {
        println!(
            "open_position: state={:?} entry={} entry_date={} peak={}",
            p.state(),
            p.entry_price().unwrap_or(Price(0.0)),
            p.entry_date().map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
            p.peak_price().unwrap_or(Price(0.0)),
        );
    }

    for (i, t) in r.trades.iter().enumerate() {
        println!(
            "#{:<3} {} {} -> {} {} {:>4}d {:<13} {:+.2}%",
            i + 1,
            t.entry_date,
            t.entry_price,
            t.exit_date,
            t.exit_price,
            t.holding_days(),
            t.exit_reason.as_str(),
            t.return_pct
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backtest=info,engine=warn,bybit=info".into()),
        )
        .init();

    let args = Args::parse();
    let params = BacktestParams {
        strategy: StrategyParams {
            ma_period: args.ma_period,
            stop_loss_pct: args.stop_loss_pct,
            trailing_activation_pct: args.trailing_activation_pct,
            trailing_stop_pct: args.trailing_stop_pct,
        },
        fee: Bps(args.fee_bps),
        initial_capital: Money(args.initial_capital),
        close_at_end: args.close_at_end,
        cycles: if args.cycles.is_empty() {
            halving_cycles()
        } else {
            args.cycles.clone()
        },
    };
    params.strategy.validate().context("invalid strategy parameters")?;

    let points = load_points(&args).await?;
    if points.len() < params.strategy.ma_period {
        anyhow::bail!(
            "not enough closes: {} (need at least {})",
            points.len(),
            params.strategy.ma_period
        );
    }

    let report = run_backtest(&points, &params).context("backtest failed")?;
    print_report(&report);

    if let Some(path) = &args.json_out {
        ensure_parent(path)?;
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    }
    if let Some(path) = &args.trades_out {
        write_trades(path, &report.trades).context("write trades failed")?;
    }

    Ok(())
}

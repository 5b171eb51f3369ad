use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use bybit::feed::BybitFeed;
use bybit::rest::BybitRest;
use engine::live::{LiveConfig, LiveRunner};
use execution::paper::PaperExecutor;
use policy::params::StrategyParams;
use storage::{InstanceLock, JsonFileStore};
use telegram::TelegramNotifier;

/// Live 200-day MA trend bot: one tick per interval, paper fills.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, env = "SYMBOL", default_value = "BTCUSDT")]
    symbol: String,
    /// Seconds between ticks.
    #[arg(long, env = "INTERVAL_SECS", default_value_t = 3600)]
    interval_secs: u64,
    /// Daily closes fetched on every tick.
    #[arg(long, default_value_t = 300)]
    history_len: usize,
    #[arg(long, env = "STATE_FILE", default_value = "data/state.json")]
    state_file: PathBuf,
    #[arg(long, env = "LOCK_FILE", default_value = "data/bot.lock")]
    lock_file: PathBuf,
    #[arg(long, env = "BYBIT_BASE_URL", default_value = "https://api.bybit.com")]
    bybit_url: String,

    #[arg(long, default_value_t = 200)]
    ma_period: usize,
    #[arg(long, default_value_t = 0.07)]
    stop_loss_pct: f64,
    #[arg(long, default_value_t = 0.08)]
    trailing_activation_pct: f64,
    #[arg(long, default_value_t = 0.10)]
    trailing_stop_pct: f64,

    #[arg(long, default_value_t = 15)]
    feed_timeout_secs: u64,
    #[arg(long, default_value_t = 30)]
    order_timeout_secs: u64,
    #[arg(long, default_value_t = 3)]
    max_order_attempts: u32,
    #[arg(long, default_value_t = 2)]
    retry_backoff_secs: u64,
    #[arg(long, default_value_t = 10)]
    notify_timeout_secs: u64,

    #[arg(long, env = "TELEGRAM_TOKEN", hide_env_values = true)]
    telegram_token: Option<String>,
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    telegram_chat_id: Option<String>,

    /// Skip the per-tick status message.
    #[arg(long, default_value_t = false)]
    no_status: bool,
    /// Clear a persisted halt after manual intervention.
    #[arg(long, default_value_t = false)]
    resume: bool,
    /// Run a single tick and exit.
    #[arg(long, default_value_t = false)]
    once: bool,
}

impl Args {
    fn live_config(&self) -> LiveConfig {
        LiveConfig {
            symbol: self.symbol.clone(),
            strategy: StrategyParams {
                ma_period: self.ma_period,
                stop_loss_pct: self.stop_loss_pct,
                trailing_activation_pct: self.trailing_activation_pct,
                trailing_stop_pct: self.trailing_stop_pct,
            },
            history_len: self.history_len,
            feed_timeout: Duration::from_secs(self.feed_timeout_secs),
            order_timeout: Duration::from_secs(self.order_timeout_secs),
            max_order_attempts: self.max_order_attempts,
            retry_backoff: Duration::from_secs(self.retry_backoff_secs),
            notify_timeout: Duration::from_secs(self.notify_timeout_secs),
            status_notifications: !self.no_status,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "engine=info,bybit=info,telegram=info,storage=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = args.live_config();

    if let Some(parent) = args.lock_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let _lock = InstanceLock::acquire(&args.lock_file).context("another instance is running")?;

    let rest = BybitRest::new(config.feed_timeout)
        .context("bybit client")?
        .with_base_url(&args.bybit_url);
    let feed = BybitFeed::new(rest, &args.symbol);
    let executor = PaperExecutor::new(feed.clone());
    let notifier = TelegramNotifier::new(
        args.telegram_token.clone(),
        args.telegram_chat_id.clone(),
        config.notify_timeout,
    )
    .context("telegram client")?;
    let store = JsonFileStore::new(&args.state_file);

    let mut bot = LiveRunner::load(config, feed, executor, notifier, store)
        .with_context(|| format!("load state from {}", args.state_file.display()))?;

    if args.resume {
        bot.resume().context("clear halt")?;
    }

    info!(
        symbol = %args.symbol,
        interval_secs = args.interval_secs,
        state = ?bot.state().position.state(),
        "bot started"
    );
    bot.announce_start().await;

    let mut interval = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c, shutting down");
                break Ok(());
            }
        }

        // a started tick always runs to completion
        match bot.run_once().await {
            Ok(report) => info!(
                date = %report.date,
                price = %report.price,
                ma = %report.ma,
                action = ?report.action,
                reason = ?report.reason,
                state = ?report.position.state(),
                "tick done"
            ),
            Err(e) if e.is_fatal() => {
                error!("{e}");
                break Err(e);
            }
            Err(e) => warn!("{e}"),
        }

        if args.once {
            break Ok(());
        }
    };

    match outcome {
        Ok(()) => {
            bot.announce_stop(None).await;
            Ok(())
        }
        Err(e) => {
            bot.announce_stop(Some(&e.to_string())).await;
            Err(anyhow::Error::new(e).context("live runner stopped"))
        }
    }
}

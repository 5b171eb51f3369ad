use std::future::Future;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use domain::ports::{FeedError, Notifier, OrderError, OrderExecutor, OrderResult, PriceFeed};
use domain::types::{Price, Side};
use policy::params::{ParamsError, StrategyParams};
use policy::trend_policy::{TrendAction, TrendDecisionReason};
use state_machine::cause::{ExitReason, TransitionCause};
use state_machine::position::{InvariantViolation, Position};
use storage::{BotState, StateStore, StoreError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::feed::{PriceWindow, WindowError};
use crate::messages;
use crate::sink;
use crate::tick::{TickError, tick};
use crate::trade::TradeRecord;

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub symbol: String,
    pub strategy: StrategyParams,
    /// Daily closes requested from the feed on every tick.
    pub history_len: usize,
    pub feed_timeout: Duration,
    pub order_timeout: Duration,
    pub max_order_attempts: u32,
    /// Sleep before retry `n` is `retry_backoff * n`.
    pub retry_backoff: Duration,
    pub notify_timeout: Duration,
    pub status_notifications: bool,
}

impl LiveConfig {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            strategy: StrategyParams::default(),
            history_len: 300,
            feed_timeout: Duration::from_secs(15),
            order_timeout: Duration::from_secs(30),
            max_order_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            notify_timeout: Duration::from_secs(10),
            status_notifications: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("invalid strategy parameters: {0}")]
    Config(#[from] ParamsError),
    #[error("trading is halted: {0}")]
    Halted(String),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("price feed did not answer within {0:?}")]
    FeedTimeout(Duration),
    #[error("tick skipped: {0}")]
    Tick(#[from] TickError),
    #[error("{side} order failed after {attempts} attempt(s): {source}")]
    OrderExecution {
        side: Side,
        attempts: u32,
        #[source]
        source: OrderError,
    },
    #[error("persisting state failed: {0}")]
    Persistence(#[from] StoreError),
    #[error("stored position is corrupt: {0}")]
    CorruptState(#[from] InvariantViolation),
}

impl LiveError {
    /// The process cannot go on trading: either state can no longer be trusted
    /// or an operator has to look at the account first.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LiveError::Config(_)
                | LiveError::Halted(_)
                | LiveError::OrderExecution { .. }
                | LiveError::Persistence(_)
                | LiveError::CorruptState(_)
        )
    }
}

/// What one completed tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub date: NaiveDate,
    pub price: Price,
    pub ma: Price,
    pub action: TrendAction,
    pub reason: TrendDecisionReason,
    pub position: Position,
    pub trade: Option<TradeRecord>,
}

/// Owns the one position of a live instance and drives it against the
/// outside collaborators, one tick per call.
pub struct LiveRunner<F, X, N, S> {
    config: LiveConfig,
    feed: F,
    executor: X,
    notifier: N,
    store: S,
    state: BotState,
}

impl<F, X, N, S> LiveRunner<F, X, N, S>
where
    F: PriceFeed,
    X: OrderExecutor,
    N: Notifier,
    S: StateStore,
{
    /// Restore the persisted state (flat if there is none) and check it.
    pub fn load(
        config: LiveConfig,
        feed: F,
        executor: X,
        notifier: N,
        store: S,
    ) -> Result<Self, LiveError> {
        config.strategy.validate()?;

        let state = store.load()?.unwrap_or_default();
        state
            .position
            .check_invariants(config.strategy.trailing_activation_pct)?;

        info!(
            symbol = %config.symbol,
            state = ?state.position.state(),
            entry = ?state.position.entry_price(),
            halted = state.halted,
            "state restored"
        );

        Ok(Self {
            config,
            feed,
            executor,
            notifier,
            store,
            state,
        })
    }

    pub fn state(&self) -> &BotState {
        &self.state
    }

    /// Operator acknowledgement after a halt.
    pub fn resume(&mut self) -> Result<(), LiveError> {
        if !self.state.halted {
            return Ok(());
        }

        warn!(reason = ?self.state.halt_reason, "halt cleared by operator");
        self.state.halted = false;
        self.state.halt_reason = None;
        self.persist()
    }

    pub async fn announce_start(&self) {
        let msg = messages::startup(
            &self.config.symbol,
            &self.config.strategy,
            &self.state.position,
            self.state.halted,
        );
        self.notify(&msg).await;
    }

    pub async fn announce_stop(&self, error: Option<&str>) {
        self.notify(&messages::stopped(&self.config.symbol, error))
            .await;
    }

    /// One evaluation: fetch, decide, execute, persist, notify.
    ///
    /// Non-fatal errors mean the tick was skipped and the position is as it was.
    /// The position only moves once an order (if one is needed) is confirmed.
    pub async fn run_once(&mut self) -> Result<TickReport, LiveError> {
        if self.state.halted {
            let reason = self
                .state
                .halt_reason
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            return Err(LiveError::Halted(reason));
        }

        let window = self.fetch_window().await?;
        let before = self.state.position;
        let out = tick(before, &window, self.config.strategy)?;
        sink::consume(&out.events);

        let date = window.last().map(|p| p.date).unwrap_or_else(|| Utc::now().date_naive());
        let symbol = self.config.symbol.clone();
        let strategy = self.config.strategy;
        let mut trade = None;

        match out.decision.action {
            TrendAction::EnterLong => {
                let fill = self.submit_with_retry(Side::Buy).await?;
                let next = out.position.with_entry_fill(fill.filled_price);
                self.commit(next)?;

                info!(price = %fill.filled_price, ma = %out.ma, "entered long");
                self.notify(&messages::entry(&symbol, fill.filled_price, out.ma, &strategy))
                    .await;
            }
            TrendAction::ExitLong => {
                let fill = self.submit_with_retry(Side::Sell).await?;
                let reason = out
                    .decision
                    .cause
                    .and_then(TransitionCause::exit_reason)
                    .unwrap_or(ExitReason::StopLoss);
                let record = TradeRecord::close(&before, date, fill.filled_price, reason);
                self.commit(out.position)?;

                if let Some(t) = &record {
                    info!(
                        reason = %t.exit_reason,
                        entry = %t.entry_price,
                        exit = %t.exit_price,
                        return_pct = t.return_pct,
                        "position closed"
                    );
                    self.notify(&messages::exit(&symbol, t)).await;
                }
                trade = record;
            }
            TrendAction::HoldLong => {
                if out.position != before {
                    self.commit(out.position)?;
                }
                if out.decision.cause == Some(TransitionCause::TrailingActivated) {
                    self.notify(&messages::trailing_armed(
                        &symbol,
                        out.price,
                        &out.position,
                        &strategy,
                    ))
                    .await;
                }
            }
            TrendAction::HoldFlat => {}
        }

        if self.config.status_notifications {
            let msg = messages::status(&symbol, out.price, out.ma, &self.state.position, &strategy);
            self.notify(&msg).await;
        }

        Ok(TickReport {
            date,
            price: out.price,
            ma: out.ma,
            action: out.decision.action,
            reason: out.decision.reason,
            position: self.state.position,
            trade,
        })
    }

    /// History plus the live quote as the newest (possibly still open) daily bar.
    async fn fetch_window(&self) -> Result<PriceWindow, LiveError> {
        let history = bounded(
            self.config.feed_timeout,
            self.feed.get_recent_prices(self.config.history_len),
        )
        .await?;
        let quote = bounded(self.config.feed_timeout, self.feed.get_current_price()).await?;

        let mut window = PriceWindow::new(self.config.history_len.max(self.config.strategy.ma_period));
        for p in history {
            if let Err(e) = window.push(p) {
                warn!("dropping history point: {e}");
            }
        }
        if window.is_empty() {
            warn!(requested = self.config.history_len, "feed returned no usable history");
        }

        match window.upsert_latest(quote.as_point()) {
            Ok(()) => {}
            Err(WindowError::InvalidPrice { close, .. }) => {
                return Err(TickError::InvalidPrice(close).into());
            }
            Err(e @ WindowError::OutOfOrder { .. }) => {
                return Err(FeedError::Malformed(format!("quote older than history: {e}")).into());
            }
        }

        debug!(points = window.len(), price = %quote.price, "window ready");
        Ok(window)
    }

    /// Bounded attempts. On exhaustion trading halts and the halt is persisted
    /// before the error is returned.
    async fn submit_with_retry(&mut self, side: Side) -> Result<OrderResult, LiveError> {
        let attempts = self.config.max_order_attempts.max(1);
        let mut last = OrderError::Rejected("no attempt made".to_string());

        for attempt in 1..=attempts {
            let result = tokio::time::timeout(
                self.config.order_timeout,
                self.executor.submit_market_order(side),
            )
            .await;

            match result {
                Ok(Ok(fill)) if fill.filled_price.is_valid() => {
                    info!(%side, price = %fill.filled_price, attempt, "order filled");
                    return Ok(fill);
                }
                Ok(Ok(fill)) => {
                    last = OrderError::Rejected(format!("invalid fill price {:?}", fill.filled_price));
                }
                Ok(Err(e)) => last = e,
                Err(_) => last = OrderError::Timeout(self.config.order_timeout),
            }

            warn!(%side, attempt, max = attempts, "order attempt failed: {last}");
            if attempt < attempts {
                tokio::time::sleep(self.config.retry_backoff * attempt).await;
            }
        }

        error!(%side, attempts, "order failed, halting automatic trading");
        self.state.halted = true;
        self.state.halt_reason = Some(format!("{side} order failed: {last}"));
        self.persist()?;

        let alert = messages::order_failed(&self.config.symbol, side, attempts, &last.to_string());
        self.notify(&alert).await;

        Err(LiveError::OrderExecution {
            side,
            attempts,
            source: last,
        })
    }

    fn commit(&mut self, next: Position) -> Result<(), LiveError> {
        self.state.position = next;
        self.persist()
    }

    fn persist(&mut self) -> Result<(), LiveError> {
        self.state.updated_at = Some(Utc::now());
        self.store.save(&self.state).map_err(|e| {
            error!("state not persisted: {e}");
            LiveError::Persistence(e)
        })
    }

    /// Best effort: failures are logged and otherwise ignored.
    async fn notify(&self, message: &str) {
        match tokio::time::timeout(self.config.notify_timeout, self.notifier.notify(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{e}"),
            Err(_) => warn!(timeout = ?self.config.notify_timeout, "notification timed out"),
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, FeedError>>,
) -> Result<T, LiveError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(r) => r.map_err(LiveError::from),
        Err(_) => Err(LiveError::FeedTimeout(limit)),
    }
}

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use domain::ports::NotifyError;
use domain::types::{PricePoint, Quote};
use state_machine::state::PositionState;
use storage::{JsonFileStore, MemoryStore};

use super::*;

fn day(n: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(n)
}

/// 200 closes at 90 on days 0..200; quotes come after that.
#[derive(Clone)]
struct MockFeed {
    history: Arc<Vec<PricePoint>>,
    quote: Arc<Mutex<(u64, f64)>>,
    fail: Arc<Mutex<bool>>,
    hang: Arc<Mutex<bool>>,
}

impl MockFeed {
    fn new(history_points: usize) -> Self {
        let history = (0..history_points as u64)
            .map(|i| PricePoint {
                date: day(i),
                close: Price(90.0),
            })
            .collect();
        Self {
            history: Arc::new(history),
            quote: Arc::new(Mutex::new((200, 90.0))),
            fail: Arc::new(Mutex::new(false)),
            hang: Arc::new(Mutex::new(false)),
        }
    }

    fn quote(&self, day_index: u64, price: f64) {
        *self.quote.lock().unwrap() = (day_index, price);
    }

    fn price(&self) -> f64 {
        self.quote.lock().unwrap().1
    }
}

#[async_trait]
impl PriceFeed for MockFeed {
    async fn get_recent_prices(&self, n: usize) -> Result<Vec<PricePoint>, FeedError> {
        let hang = *self.hang.lock().unwrap();
        if hang {
            std::future::pending::<()>().await;
        }
        if *self.fail.lock().unwrap() {
            return Err(FeedError::Transport("connection reset".into()));
        }
        let skip = self.history.len().saturating_sub(n);
        Ok(self.history[skip..].to_vec())
    }

    async fn get_current_price(&self) -> Result<Quote, FeedError> {
        let (d, p) = *self.quote.lock().unwrap();
        let at = Utc.from_utc_datetime(&day(d).and_hms_opt(12, 0, 0).unwrap());
        Ok(Quote { at, price: Price(p) })
    }
}

/// Fills at the feed's quote after failing `failures` times.
#[derive(Clone)]
struct MockExecutor {
    feed: MockFeed,
    failures: Arc<Mutex<u32>>,
    orders: Arc<Mutex<Vec<Side>>>,
    hang: Arc<Mutex<bool>>,
}

impl MockExecutor {
    fn new(feed: &MockFeed) -> Self {
        Self {
            feed: feed.clone(),
            failures: Arc::new(Mutex::new(0)),
            orders: Arc::new(Mutex::new(Vec::new())),
            hang: Arc::new(Mutex::new(false)),
        }
    }

    fn fail_next(&self, n: u32) {
        *self.failures.lock().unwrap() = n;
    }

    /// Every order is accepted and never answered.
    fn hang(&self) {
        *self.hang.lock().unwrap() = true;
    }

    fn orders(&self) -> Vec<Side> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderExecutor for MockExecutor {
    async fn submit_market_order(&self, side: Side) -> Result<OrderResult, OrderError> {
        self.orders.lock().unwrap().push(side);
        let hang = *self.hang.lock().unwrap();
        if hang {
            std::future::pending::<()>().await;
        }

        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(OrderError::Transport("exchange unavailable".into()));
        }

        Ok(OrderResult {
            filled_price: Price(self.feed.price()),
            filled_at: Utc::now(),
        })
    }
}

#[derive(Clone, Default)]
struct MockNotifier {
    sent: Arc<Mutex<Vec<String>>>,
    broken: bool,
    hung: bool,
}

impl MockNotifier {
    fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    fn hung() -> Self {
        Self {
            hung: true,
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        if self.hung {
            std::future::pending::<()>().await;
        }
        if self.broken {
            return Err(NotifyError("chat not found".into()));
        }
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

struct BrokenStore;

impl StateStore for BrokenStore {
    fn load(&self) -> Result<Option<BotState>, StoreError> {
        Ok(None)
    }

    fn save(&self, _state: &BotState) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk full".into()))
    }
}

fn config() -> LiveConfig {
    LiveConfig {
        retry_backoff: Duration::ZERO,
        status_notifications: false,
        ..LiveConfig::new("BTCUSDT")
    }
}

type Runner<S> = LiveRunner<MockFeed, MockExecutor, MockNotifier, S>;

fn runner<S: StateStore>(
    feed: &MockFeed,
    exec: &MockExecutor,
    notifier: &MockNotifier,
    store: S,
) -> Runner<S> {
    runner_with(config(), feed, exec, notifier, store)
}

fn runner_with<S: StateStore>(
    config: LiveConfig,
    feed: &MockFeed,
    exec: &MockExecutor,
    notifier: &MockNotifier,
    store: S,
) -> Runner<S> {
    LiveRunner::load(config, feed.clone(), exec.clone(), notifier.clone(), store).unwrap()
}

#[tokio::test]
async fn enters_on_close_above_ma_and_persists() {
    let feed = MockFeed::new(200);
    let exec = MockExecutor::new(&feed);
    let notifier = MockNotifier::default();
    let store = Arc::new(MemoryStore::new());
    let mut bot = runner(&feed, &exec, &notifier, store.clone());

    feed.quote(200, 100.0);
    let report = bot.run_once().await.unwrap();

    assert_eq!(report.action, TrendAction::EnterLong);
    assert_eq!(exec.orders(), vec![Side::Buy]);
    assert_eq!(bot.state().position.state(), PositionState::LongNormal);
    assert_eq!(bot.state().position.entry_price(), Some(Price(100.0)));

    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.position, bot.state().position);
    assert!(notifier.sent().iter().any(|m| m.contains("BUY")));
}

#[tokio::test]
async fn holds_flat_below_ma_without_orders() {
    let feed = MockFeed::new(200);
    let exec = MockExecutor::new(&feed);
    let notifier = MockNotifier::default();
    let mut bot = runner(&feed, &exec, &notifier, MemoryStore::new());

    feed.quote(200, 85.0);
    let report = bot.run_once().await.unwrap();

    assert_eq!(report.action, TrendAction::HoldFlat);
    assert!(exec.orders().is_empty());
    assert!(!bot.state().position.is_long());
}

#[tokio::test]
async fn stop_loss_exit_produces_trade_record() {
    let feed = MockFeed::new(200);
    let exec = MockExecutor::new(&feed);
    let notifier = MockNotifier::default();
    let mut bot = runner(&feed, &exec, &notifier, MemoryStore::new());

    feed.quote(200, 100.0);
    bot.run_once().await.unwrap();

    feed.quote(201, 92.0);
    let report = bot.run_once().await.unwrap();

    assert_eq!(report.action, TrendAction::ExitLong);
    let trade = report.trade.unwrap();
    assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    assert_eq!(trade.entry_date, day(200));
    assert_eq!(trade.exit_date, day(201));
    assert!((trade.return_pct - -8.0).abs() < 1e-9);
    assert_eq!(exec.orders(), vec![Side::Buy, Side::Sell]);
    assert!(!bot.state().position.is_long());
}

#[tokio::test]
async fn trailing_activation_is_persisted_and_announced() {
    let feed = MockFeed::new(200);
    let exec = MockExecutor::new(&feed);
    let notifier = MockNotifier::default();
    let store = Arc::new(MemoryStore::new());
    let mut bot = runner(&feed, &exec, &notifier, store.clone());

    feed.quote(200, 100.0);
    bot.run_once().await.unwrap();
    feed.quote(201, 108.0);
    bot.run_once().await.unwrap();

    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.position.state(), PositionState::LongTrailing);
    assert_eq!(saved.position.peak_price(), Some(Price(108.0)));
    assert!(notifier.sent().iter().any(|m| m.contains("trailing stop armed")));
    assert_eq!(exec.orders(), vec![Side::Buy]);
}

#[tokio::test]
async fn retries_then_fills() {
    let feed = MockFeed::new(200);
    let exec = MockExecutor::new(&feed);
    let notifier = MockNotifier::default();
    let mut bot = runner(&feed, &exec, &notifier, MemoryStore::new());

    exec.fail_next(2);
    feed.quote(200, 100.0);
    bot.run_once().await.unwrap();

    assert_eq!(exec.orders().len(), 3);
    assert!(bot.state().position.is_long());
    assert!(!bot.state().halted);
}

#[tokio::test]
async fn exhausted_order_halts_without_moving_position() {
    let feed = MockFeed::new(200);
    let exec = MockExecutor::new(&feed);
    let notifier = MockNotifier::default();
    let store = Arc::new(MemoryStore::new());
    let mut bot = runner(&feed, &exec, &notifier, store.clone());

    exec.fail_next(10);
    feed.quote(200, 100.0);
    let err = bot.run_once().await.unwrap_err();

    assert!(matches!(err, LiveError::OrderExecution { side: Side::Buy, attempts: 3, .. }));
    assert!(err.is_fatal());
    assert_eq!(exec.orders().len(), 3);
    assert!(!bot.state().position.is_long());
    assert!(bot.state().halted);
    assert!(store.load().unwrap().unwrap().halted);
    assert!(notifier.sent().iter().any(|m| m.contains("order failed")));

    // further ticks refuse to trade
    assert!(matches!(bot.run_once().await, Err(LiveError::Halted(_))));
    assert_eq!(exec.orders().len(), 3);
}

#[tokio::test]
async fn unanswered_orders_time_out_and_halt() {
    let feed = MockFeed::new(200);
    let exec = MockExecutor::new(&feed);
    let notifier = MockNotifier::default();
    let store = Arc::new(MemoryStore::new());
    let cfg = LiveConfig {
        order_timeout: Duration::from_millis(20),
        max_order_attempts: 2,
        ..config()
    };
    let mut bot = runner_with(cfg, &feed, &exec, &notifier, store.clone());

    exec.hang();
    feed.quote(200, 100.0);
    let err = bot.run_once().await.unwrap_err();

    assert!(matches!(
        err,
        LiveError::OrderExecution {
            side: Side::Buy,
            attempts: 2,
            source: OrderError::Timeout(_),
        }
    ));
    assert!(err.is_fatal());
    assert_eq!(exec.orders(), vec![Side::Buy, Side::Buy]);
    assert!(!bot.state().position.is_long());
    assert!(bot.state().halted);
    assert!(store.load().unwrap().unwrap().halted);
}

#[tokio::test]
async fn silent_feed_times_out_without_halting() {
    let feed = MockFeed::new(200);
    let exec = MockExecutor::new(&feed);
    let notifier = MockNotifier::default();
    let cfg = LiveConfig {
        feed_timeout: Duration::from_millis(20),
        ..config()
    };
    let mut bot = runner_with(cfg, &feed, &exec, &notifier, MemoryStore::new());

    *feed.hang.lock().unwrap() = true;
    feed.quote(200, 100.0);
    let err = bot.run_once().await.unwrap_err();

    assert!(matches!(err, LiveError::FeedTimeout(d) if d == Duration::from_millis(20)));
    assert!(!err.is_fatal());
    assert!(exec.orders().is_empty());
    assert!(!bot.state().halted);

    // next tick goes through once the feed answers
    *feed.hang.lock().unwrap() = false;
    assert_eq!(bot.run_once().await.unwrap().action, TrendAction::EnterLong);
}

#[tokio::test]
async fn hung_notifier_does_not_block_tick() {
    let feed = MockFeed::new(200);
    let exec = MockExecutor::new(&feed);
    let notifier = MockNotifier::hung();
    let cfg = LiveConfig {
        notify_timeout: Duration::from_millis(20),
        status_notifications: true,
        ..config()
    };
    let mut bot = runner_with(cfg, &feed, &exec, &notifier, MemoryStore::new());

    bot.announce_start().await;
    feed.quote(200, 100.0);
    let report = bot.run_once().await.unwrap();

    assert_eq!(report.action, TrendAction::EnterLong);
    assert!(bot.state().position.is_long());
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn resume_clears_persisted_halt() {
    let feed = MockFeed::new(200);
    let exec = MockExecutor::new(&feed);
    let notifier = MockNotifier::default();
    let store = Arc::new(MemoryStore::with_state(BotState {
        halted: true,
        halt_reason: Some("BUY order failed".into()),
        ..BotState::default()
    }));
    let mut bot = runner(&feed, &exec, &notifier, store.clone());

    assert!(matches!(bot.run_once().await, Err(LiveError::Halted(_))));

    bot.resume().unwrap();
    assert!(!store.load().unwrap().unwrap().halted);

    feed.quote(200, 100.0);
    assert!(bot.run_once().await.is_ok());
}

#[tokio::test]
async fn persistence_failure_is_fatal() {
    let feed = MockFeed::new(200);
    let exec = MockExecutor::new(&feed);
    let notifier = MockNotifier::default();
    let mut bot = runner(&feed, &exec, &notifier, BrokenStore);

    feed.quote(200, 100.0);
    let err = bot.run_once().await.unwrap_err();

    assert!(matches!(err, LiveError::Persistence(_)));
    assert!(err.is_fatal());

    bot.announce_stop(Some(&err.to_string())).await;
    let last = notifier.sent().pop().unwrap();
    assert!(last.contains("stopped on error"));
    assert!(last.contains("disk full"));
}

#[tokio::test]
async fn notifier_failure_does_not_affect_trading() {
    let feed = MockFeed::new(200);
    let exec = MockExecutor::new(&feed);
    let notifier = MockNotifier::broken();
    let mut bot = runner(&feed, &exec, &notifier, MemoryStore::new());

    feed.quote(200, 100.0);
    let report = bot.run_once().await.unwrap();

    assert_eq!(report.action, TrendAction::EnterLong);
    assert!(bot.state().position.is_long());
}

#[tokio::test]
async fn short_history_skips_tick() {
    let feed = MockFeed::new(50);
    let exec = MockExecutor::new(&feed);
    let notifier = MockNotifier::default();
    let mut bot = runner(&feed, &exec, &notifier, MemoryStore::new());

    feed.quote(50, 1000.0);
    let err = bot.run_once().await.unwrap_err();

    assert!(matches!(err, LiveError::Tick(TickError::InsufficientData(_))));
    assert!(!err.is_fatal());
    assert!(exec.orders().is_empty());
}

#[tokio::test]
async fn invalid_quote_skips_tick() {
    let feed = MockFeed::new(200);
    let exec = MockExecutor::new(&feed);
    let notifier = MockNotifier::default();
    let mut bot = runner(&feed, &exec, &notifier, MemoryStore::new());

    feed.quote(200, -1.0);
    let err = bot.run_once().await.unwrap_err();

    assert!(matches!(err, LiveError::Tick(TickError::InvalidPrice(_))));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn feed_failure_skips_tick() {
    let feed = MockFeed::new(200);
    let exec = MockExecutor::new(&feed);
    let notifier = MockNotifier::default();
    let mut bot = runner(&feed, &exec, &notifier, MemoryStore::new());

    *feed.fail.lock().unwrap() = true;
    let err = bot.run_once().await.unwrap_err();

    assert!(matches!(err, LiveError::Feed(_)));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn restart_resumes_open_position_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let feed = MockFeed::new(200);
    let exec = MockExecutor::new(&feed);
    let notifier = MockNotifier::default();

    {
        let mut bot = runner(&feed, &exec, &notifier, JsonFileStore::new(&path));
        feed.quote(200, 100.0);
        bot.run_once().await.unwrap();
    }

    let mut bot = runner(&feed, &exec, &notifier, JsonFileStore::new(&path));
    assert_eq!(bot.state().position.entry_price(), Some(Price(100.0)));

    feed.quote(201, 92.0);
    let report = bot.run_once().await.unwrap();
    assert_eq!(report.trade.unwrap().entry_date, day(200));
}

#[test]
fn corrupt_stored_position_is_refused() {
    let corrupt: BotState = serde_json::from_str(
        r#"{"position":{"status":"LONG","entry_price":null,"peak_price_since_entry":null,"trailing_active":false}}"#,
    )
    .unwrap();
    let feed = MockFeed::new(1);
    let exec = MockExecutor::new(&feed);

    let res = LiveRunner::load(
        config(),
        feed,
        exec,
        MockNotifier::default(),
        MemoryStore::with_state(corrupt),
    );

    assert!(matches!(res, Err(LiveError::CorruptState(_))));
}

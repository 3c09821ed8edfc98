//! Integration tests for the regime trader
//!
//! These tests drive the engine, position manager, trade log and live loop
//! together against an in-memory broker.

use std::sync::Mutex;

use approx::assert_relative_eq;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;

use regime_trader::broker::{BrokerPosition, OrderAck, OrderRequest};
use regime_trader::data::CandleWindow;
use regime_trader::position::{ManagerSettings, PositionEvent, PositionManager, PositionState};
use regime_trader::risk::SizingConfig;
use regime_trader::strategy::{
    EntryConditions, Evaluation, IndicatorSnapshot, RegimeMultipliers, StrategyConfig,
    StrategyEngine,
};
use regime_trader::trade_log::{Outcome, TradeLog};
use regime_trader::trader::{AccountContext, LiveTrader, TraderSettings};
use regime_trader::{
    Broker, BrokerError, BrokerResult, Candle, ExitReason, OrderSide, Regime, Side, Signal,
    Symbol,
};

// =============================================================================
// Test Utilities
// =============================================================================

#[derive(Default)]
struct MockState {
    price: f64,
    equity: f64,
    candles: Vec<Candle>,
    orders: Vec<OrderRequest>,
    attempts: usize,
    /// Orders to reject before accepting
    failures: u32,
    candle_fetches: usize,
    offline: bool,
}

/// In-memory broker recording every order
#[derive(Default)]
struct MockBroker(Mutex<MockState>);

impl MockBroker {
    fn new(price: f64, equity: f64) -> Self {
        MockBroker(Mutex::new(MockState {
            price,
            equity,
            ..Default::default()
        }))
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }
}

impl Broker for MockBroker {
    async fn fetch_candles(
        &self,
        _symbol: &Symbol,
        _timeframe: &str,
        limit: usize,
        _start: Option<DateTime<Utc>>,
    ) -> BrokerResult<Vec<Candle>> {
        let mut state = self.state();
        if state.offline {
            return Err(BrokerError::Transport("connection refused".into()));
        }
        state.candle_fetches += 1;
        let skip = state.candles.len().saturating_sub(limit);
        Ok(state.candles[skip..].to_vec())
    }

    async fn latest_price(&self, _symbol: &Symbol) -> BrokerResult<f64> {
        let state = self.state();
        if state.offline {
            return Err(BrokerError::Transport("connection refused".into()));
        }
        Ok(state.price)
    }

    async fn wallet_equity(&self) -> BrokerResult<f64> {
        Ok(self.state().equity)
    }

    async fn open_position(&self, _symbol: &Symbol) -> BrokerResult<Option<BrokerPosition>> {
        Ok(None)
    }

    async fn place_market_order(&self, order: &OrderRequest) -> BrokerResult<OrderAck> {
        let mut state = self.state();
        state.attempts += 1;
        if state.failures > 0 {
            state.failures -= 1;
            return Err(BrokerError::Api {
                code: 10001,
                message: "params error".into(),
            });
        }
        state.orders.push(order.clone());
        Ok(OrderAck {
            order_id: format!("mock-{}", state.orders.len()),
        })
    }
}

fn settings(order_retries: u32, reopen_on_reversal: bool) -> ManagerSettings {
    ManagerSettings {
        symbol: Symbol::new("BTCUSDT"),
        timeframe: "1h".into(),
        setup: "GPTAN".into(),
        commission_rate: 0.0006,
        order_retries,
        reopen_on_reversal,
        multipliers: RegimeMultipliers::default(),
    }
}

fn manager(order_retries: u32, reopen_on_reversal: bool) -> PositionManager {
    PositionManager::new(
        settings(order_retries, reopen_on_reversal),
        SizingConfig::default().build(),
    )
}

fn journal(dir: &tempfile::TempDir) -> TradeLog {
    TradeLog::new(dir.path().join("trade_history.main.csv"))
}

/// Evaluation with the given regime and signal at `close`
fn evaluation(close: f64, lateral: bool, long: bool, short: bool) -> Evaluation {
    Evaluation {
        snapshot: IndicatorSnapshot {
            close,
            is_lateral: lateral,
            trending: true,
            ..Default::default()
        },
        conditions: EntryConditions { long, short },
    }
}

fn hourly_candles(count: usize, start: DateTime<Utc>) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.25).sin() * 4.0 + i as f64 * 0.05;
            Candle {
                datetime: start + Duration::hours(i as i64),
                open: close - 0.2,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 10.0,
            }
        })
        .collect()
}

/// 80 falling candles, then a rally that zigzags up through the slow EMA.
/// With default settings the first entry signal is a long at bar 110.
fn downtrend_then_rally(start: DateTime<Utc>) -> Vec<Candle> {
    let zigzag = [0.0, 1.0, 0.0, -1.0];
    let mut closes: Vec<f64> = (0..80).map(|i| 30_000.0 * 0.997f64.powi(i)).collect();
    let bottom = closes[79];
    closes.extend(
        (1..80).map(|j| bottom * 1.002f64.powi(j) * (1.0 + 0.008 * zigzag[j as usize % 4])),
    );

    closes
        .into_iter()
        .enumerate()
        .map(|(i, close)| Candle {
            datetime: start + Duration::hours(i as i64),
            open: close,
            high: close * 1.003,
            low: close * 0.997,
            close,
            volume: 10.0,
        })
        .collect()
}

const RALLY_CROSSOVER: usize = 110;

// =============================================================================
// Engine + Position Manager
// =============================================================================

#[test]
fn test_engine_signals_long_when_rally_crosses_slow_ema() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let candles = downtrend_then_rally(start);
    let engine = StrategyEngine::new(StrategyConfig::default());
    let snapshots = engine.snapshots(&candles);

    let entries: Vec<(usize, EntryConditions)> = (1..snapshots.len())
        .map(|i| (i, engine.conditions_at(&snapshots, i)))
        .filter(|(_, c)| c.long || c.short)
        .collect();
    assert_eq!(
        entries,
        vec![(
            RALLY_CROSSOVER,
            EntryConditions {
                long: true,
                short: false
            }
        )]
    );

    let before = &snapshots[RALLY_CROSSOVER - 1];
    let bar = &snapshots[RALLY_CROSSOVER];
    assert!(before.ema_short.unwrap() <= before.ema_long.unwrap());
    assert!(bar.ema_short.unwrap() > bar.ema_long.unwrap());
    assert!(bar.rsi.unwrap() < 60.0);
    assert!(bar.macd_histogram.unwrap() > 0.5);
    assert!(bar.adx.unwrap() >= 12.0);
    assert!(bar.trending);
    assert!(!bar.is_lateral);

    // Evaluating the series cut at the crossover sees the same bar
    let eval = engine.evaluate(&candles[..=RALLY_CROSSOVER]).unwrap();
    assert_eq!(eval.signal(), Signal::Long);
    assert_eq!(eval.regime(), Regime::Trending);
}

#[tokio::test]
async fn test_trader_enters_long_on_rally_crossover() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let candles = downtrend_then_rally(start);

    let dir = tempfile::tempdir().unwrap();
    let broker = MockBroker::new(candles[0].close, 1000.0);
    let account = AccountContext::new("main", broker, journal(&dir), manager(0, true));
    let mut trader = LiveTrader::new(
        StrategyEngine::new(StrategyConfig::default()),
        trader_settings(),
        vec![account],
    )
    .unwrap();

    // One closed candle per tick, the way the exchange feed delivers them
    for i in 60..=RALLY_CROSSOVER {
        {
            let mut state = trader.accounts()[0].broker.state();
            state.candles = candles[..=i].to_vec();
            state.price = candles[i].close;
        }
        trader.tick(start + Duration::hours(i as i64 + 2)).await.unwrap();

        let orders = trader.accounts()[0].broker.state().orders.len();
        if i < RALLY_CROSSOVER {
            assert_eq!(orders, 0, "unexpected order at bar {}", i);
        }
    }

    let entry = candles[RALLY_CROSSOVER].close;
    let orders = trader.accounts()[0].broker.state().orders.clone();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, OrderSide::Buy);
    assert!(!orders[0].reduce_only);
    // 1000 * 0.98 / ~24972
    assert_eq!(orders[0].quantity, dec!(0.039));

    let position = trader.accounts()[0].manager.position().unwrap();
    assert_eq!(position.side, Side::Long);
    assert_eq!(position.regime, Regime::Trending);
    assert_relative_eq!(position.entry_price, entry);
    assert_relative_eq!(position.stop_loss, entry * 0.92, epsilon = 1e-6);
    assert_relative_eq!(position.take_profit, entry * 1.32, epsilon = 1e-6);
    assert_eq!(trader.regime(), Some(Regime::Trending));

    let rows = trader.accounts()[0].journal.read_all().unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_open());
}

#[tokio::test]
async fn test_crossing_at_candle_50_opens_trend_long() {
    let config = StrategyConfig::default();
    let engine = StrategyEngine::new(config);

    let mut snapshots = vec![IndicatorSnapshot::default(); 51];
    snapshots[49] = IndicatorSnapshot {
        close: 49_800.0,
        ema_short: Some(49_700.0),
        ema_long: Some(49_750.0),
        rsi: Some(44.0),
        macd_histogram: Some(0.6),
        adx: Some(19.0),
        band_width: Some(0.01),
        trending: true,
        ..Default::default()
    };
    snapshots[50] = IndicatorSnapshot {
        close: 50_000.0,
        ema_short: Some(49_800.0),
        ema_long: Some(49_760.0),
        rsi: Some(45.0),
        macd_histogram: Some(0.8),
        adx: Some(20.0),
        band_width: Some(0.01),
        trending: true,
        ..Default::default()
    };

    let conditions = engine.conditions_at(&snapshots, 50);
    assert!(conditions.long);
    assert!(!conditions.short);

    let broker = MockBroker::new(50_000.0, 1000.0);
    let dir = tempfile::tempdir().unwrap();
    let log = journal(&dir);
    let mut mgr = manager(0, true);

    let eval = Evaluation {
        snapshot: snapshots[50].clone(),
        conditions,
    };
    let events = mgr.on_evaluation(&broker, &log, &eval, 50_000.0).await.unwrap();
    assert_eq!(events.len(), 1);

    let position = mgr.position().unwrap();
    assert_eq!(position.side, Side::Long);
    assert_eq!(position.regime, Regime::Trending);
    assert_relative_eq!(position.stop_loss, 50_000.0 * 0.92, epsilon = 1e-6);
    assert_relative_eq!(position.take_profit, 50_000.0 * 1.32, epsilon = 1e-6);

    let orders = &broker.state().orders;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, OrderSide::Buy);
    assert_eq!(orders[0].quantity, dec!(0.019));
    assert!(!orders[0].reduce_only);

    let rows = log.read_all().unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_open());
    assert_eq!(rows[0].entry_lateral, 0);
}

#[tokio::test]
async fn test_order_failure_leaves_state_unchanged() {
    let broker = MockBroker::new(100.0, 1000.0);
    broker.state().failures = 10;
    let dir = tempfile::tempdir().unwrap();
    let log = journal(&dir);
    let mut mgr = manager(2, true);

    let result = mgr
        .on_evaluation(&broker, &log, &evaluation(100.0, false, true, false), 100.0)
        .await;
    assert!(matches!(result, Err(BrokerError::Api { code: 10001, .. })));
    assert_eq!(mgr.state(), &PositionState::Flat);
    // One attempt plus two retries
    assert_eq!(broker.state().attempts, 3);
    assert!(log.read_all().unwrap().is_empty());
}

#[tokio::test]
async fn test_order_retries_recover() {
    let broker = MockBroker::new(100.0, 1000.0);
    broker.state().failures = 2;
    let dir = tempfile::tempdir().unwrap();
    let log = journal(&dir);
    let mut mgr = manager(3, true);

    mgr.open(&broker, &log, Side::Short, 100.0, Regime::Trending)
        .await
        .unwrap();
    assert_eq!(mgr.state().side(), Some(Side::Short));
    assert_eq!(broker.state().attempts, 3);
    assert_eq!(broker.state().orders.len(), 1);
}

#[tokio::test]
async fn test_failed_close_keeps_position_open() {
    let broker = MockBroker::new(100.0, 1000.0);
    let dir = tempfile::tempdir().unwrap();
    let log = journal(&dir);
    let mut mgr = manager(0, true);

    mgr.open(&broker, &log, Side::Long, 100.0, Regime::Trending)
        .await
        .unwrap();
    broker.state().failures = 1;
    assert!(mgr
        .on_price(&broker, &log, 90.0, Regime::Trending)
        .await
        .is_err());
    assert_eq!(mgr.state().side(), Some(Side::Long));
    assert!(log.read_all().unwrap()[0].is_open());
}

#[tokio::test]
async fn test_stop_loss_closes_and_journals() {
    let broker = MockBroker::new(100.0, 1000.0);
    let dir = tempfile::tempdir().unwrap();
    let log = journal(&dir);
    let mut mgr = manager(0, true);

    mgr.open(&broker, &log, Side::Long, 100.0, Regime::Trending)
        .await
        .unwrap();
    assert_eq!(
        mgr.on_price(&broker, &log, 95.0, Regime::Trending).await.unwrap(),
        None
    );

    let event = mgr
        .on_price(&broker, &log, 91.0, Regime::Trending)
        .await
        .unwrap();
    assert!(matches!(
        event,
        Some(PositionEvent::Closed {
            side: Side::Long,
            reason: ExitReason::StopLoss,
            ..
        })
    ));
    assert!(mgr.state().is_flat());

    let orders = &broker.state().orders;
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[1].side, OrderSide::Sell);
    assert!(orders[1].reduce_only);
    assert_eq!(orders[1].quantity, dec!(9.8));

    let rows = log.read_all().unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.sell_price, Some(91.0));
    assert_eq!(row.outcome, Some(Outcome::Loss));
    // (100 + 91) * 9.8 * 0.0006
    assert_relative_eq!(row.commission.unwrap(), 1.12308, epsilon = 1e-9);
    assert_relative_eq!(row.new_balance.unwrap(), 1000.0 - 88.2 - 1.12308, epsilon = 1e-6);
    assert!(log.open_position(&Symbol::new("BTCUSDT")).unwrap().is_none());
}

#[tokio::test]
async fn test_short_take_profit() {
    let broker = MockBroker::new(100.0, 1000.0);
    let dir = tempfile::tempdir().unwrap();
    let log = journal(&dir);
    let mut mgr = manager(0, true);

    mgr.open(&broker, &log, Side::Short, 100.0, Regime::Lateral)
        .await
        .unwrap();
    // Lateral short: stop 109, take 97.3
    let event = mgr
        .on_price(&broker, &log, 97.0, Regime::Lateral)
        .await
        .unwrap();
    assert!(matches!(
        event,
        Some(PositionEvent::Closed {
            reason: ExitReason::TakeProfit,
            ..
        })
    ));
    let row = &log.read_all().unwrap()[0];
    assert_eq!(row.outcome, Some(Outcome::Gain));
    assert_eq!(row.exit_lateral, Some(1));
}

#[tokio::test]
async fn test_regime_flip_relevels_without_closing() {
    let broker = MockBroker::new(100.0, 1000.0);
    let dir = tempfile::tempdir().unwrap();
    let log = journal(&dir);
    let mut mgr = manager(0, true);

    mgr.open(&broker, &log, Side::Long, 100.0, Regime::Trending)
        .await
        .unwrap();

    let events = mgr
        .on_evaluation(&broker, &log, &evaluation(101.0, true, false, false), 101.0)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        PositionEvent::Relevelled {
            regime: Regime::Lateral,
            ..
        }
    ));

    let position = mgr.position().unwrap();
    assert_eq!(position.entry_price, 100.0);
    assert_relative_eq!(position.stop_loss, 97.3, epsilon = 1e-9);
    assert_relative_eq!(position.take_profit, 111.0, epsilon = 1e-9);
    assert_eq!(broker.state().orders.len(), 1);

    let row = &log.read_all().unwrap()[0];
    assert!(row.is_open());
    assert_relative_eq!(row.secondary_stop_loss.unwrap(), 97.3, epsilon = 1e-9);
    assert_relative_eq!(row.secondary_stop_gain.unwrap(), 111.0, epsilon = 1e-9);

    // Same regime again: nothing to do
    let events = mgr
        .on_evaluation(&broker, &log, &evaluation(101.0, true, false, false), 101.0)
        .await
        .unwrap();
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_reversal_closes_then_reopens() {
    let broker = MockBroker::new(100.0, 1000.0);
    let dir = tempfile::tempdir().unwrap();
    let log = journal(&dir);
    let mut mgr = manager(0, true);

    mgr.open(&broker, &log, Side::Long, 100.0, Regime::Trending)
        .await
        .unwrap();
    let events = mgr
        .on_evaluation(&broker, &log, &evaluation(100.0, false, false, true), 100.0)
        .await
        .unwrap();

    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[0],
        PositionEvent::Closed {
            reason: ExitReason::Reversal,
            ..
        }
    ));
    assert!(matches!(
        events[1],
        PositionEvent::Opened {
            side: Side::Short,
            ..
        }
    ));
    assert_eq!(mgr.state().side(), Some(Side::Short));

    let rows = log.read_all().unwrap();
    assert_eq!(rows.len(), 2);
    assert_ne!(rows[0].trade_id, rows[1].trade_id);
    assert!(!rows[0].is_open());
    assert!(rows[1].is_open());

    // A same-side signal is ignored
    let events = mgr
        .on_evaluation(&broker, &log, &evaluation(100.0, false, false, true), 100.0)
        .await
        .unwrap();
    assert!(events.is_empty());
    assert_eq!(broker.state().orders.len(), 3);
}

#[tokio::test]
async fn test_reversal_without_reopen_goes_flat() {
    let broker = MockBroker::new(100.0, 1000.0);
    let dir = tempfile::tempdir().unwrap();
    let log = journal(&dir);
    let mut mgr = manager(0, false);

    mgr.open(&broker, &log, Side::Long, 100.0, Regime::Trending)
        .await
        .unwrap();
    let events = mgr
        .on_evaluation(&broker, &log, &evaluation(100.0, false, false, true), 100.0)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert!(mgr.state().is_flat());
}

#[tokio::test]
async fn test_quantity_below_minimum_skips_order() {
    let broker = MockBroker::new(50_000.0, 10.0);
    let dir = tempfile::tempdir().unwrap();
    let log = journal(&dir);
    let mut mgr = manager(0, true);

    let events = mgr
        .on_evaluation(&broker, &log, &evaluation(50_000.0, false, true, false), 50_000.0)
        .await
        .unwrap();
    assert_eq!(events, vec![PositionEvent::Skipped { side: Side::Long }]);
    assert!(mgr.state().is_flat());
    assert_eq!(broker.state().attempts, 0);
}

#[tokio::test]
async fn test_restore_from_trade_log() {
    let broker = MockBroker::new(100.0, 1000.0);
    let dir = tempfile::tempdir().unwrap();
    let log = journal(&dir);
    let symbol = Symbol::new("BTCUSDT");

    {
        let mut mgr = manager(0, true);
        mgr.open(&broker, &log, Side::Long, 100.0, Regime::Trending)
            .await
            .unwrap();
        mgr.relevel(&log, Regime::Lateral);
    }

    let record = log.open_position(&symbol).unwrap().unwrap();
    let mut restored = manager(0, true);
    restored.restore(&record);

    let position = restored.position().unwrap();
    assert_eq!(position.side, Side::Long);
    assert_eq!(position.regime, Regime::Lateral);
    assert_relative_eq!(position.stop_loss, 97.3, epsilon = 1e-9);

    // The restored position closes like any other
    let event = restored
        .on_price(&broker, &log, 97.0, Regime::Lateral)
        .await
        .unwrap();
    assert!(event.is_some());
    assert!(log.open_position(&symbol).unwrap().is_none());
}

// =============================================================================
// Live Loop
// =============================================================================

fn trader_settings() -> TraderSettings {
    TraderSettings {
        symbol: Symbol::new("BTCUSDT"),
        timeframe: "1h".into(),
        candle_interval: Duration::hours(1),
        candle_limit: 200,
        poll_interval: std::time::Duration::from_secs(1),
        retry_delay: std::time::Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_trader_evaluates_each_candle_once() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let broker = MockBroker::new(100.0, 1000.0);
    broker.state().candles = hourly_candles(80, start);

    let dir = tempfile::tempdir().unwrap();
    let account = AccountContext::new("main", broker, journal(&dir), manager(0, true));
    let mut trader = LiveTrader::new(
        StrategyEngine::new(StrategyConfig::default()),
        trader_settings(),
        vec![account],
    )
    .unwrap();

    // Last candle opened at start+79h and closed at start+80h
    let now = start + Duration::hours(81);
    trader.tick(now).await.unwrap();
    assert!(trader.regime().is_some());
    assert_eq!(trader.accounts()[0].broker.state().candle_fetches, 1);

    // No newer candle yet: fetched again, but not re-evaluated
    trader.tick(now).await.unwrap();
    assert_eq!(trader.accounts()[0].broker.state().candle_fetches, 2);

    // The candle opened at start+80h has closed
    let next = hourly_candles(81, start).pop().unwrap();
    trader.accounts()[0].broker.state().candles.push(next);
    trader.tick(now).await.unwrap();
    assert_eq!(trader.accounts()[0].broker.state().candle_fetches, 3);

    // The following one is not due before start+82h
    trader.tick(now + Duration::minutes(30)).await.unwrap();
    assert_eq!(trader.accounts()[0].broker.state().candle_fetches, 3);
}

#[tokio::test]
async fn test_trader_waits_for_warmup() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let broker = MockBroker::new(100.0, 1000.0);
    broker.state().candles = hourly_candles(20, start);

    let dir = tempfile::tempdir().unwrap();
    let account = AccountContext::new("main", broker, journal(&dir), manager(0, true));
    let mut trader = LiveTrader::new(
        StrategyEngine::new(StrategyConfig::default()),
        trader_settings(),
        vec![account],
    )
    .unwrap();

    trader.tick(start + Duration::hours(21)).await.unwrap();
    assert!(trader.regime().is_none());
    assert!(trader.accounts()[0].broker.state().orders.is_empty());
}

#[tokio::test]
async fn test_trader_reports_transport_errors() {
    let broker = MockBroker::new(100.0, 1000.0);
    broker.state().offline = true;

    let dir = tempfile::tempdir().unwrap();
    let account = AccountContext::new("main", broker, journal(&dir), manager(0, true));
    let mut trader = LiveTrader::new(
        StrategyEngine::new(StrategyConfig::default()),
        trader_settings(),
        vec![account],
    )
    .unwrap();

    let err = trader.tick(Utc::now()).await.unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_trader_recovers_open_position() {
    let broker = MockBroker::new(100.0, 1000.0);
    let dir = tempfile::tempdir().unwrap();
    let log = journal(&dir);

    let mut first = manager(0, true);
    first
        .open(&broker, &log, Side::Short, 100.0, Regime::Trending)
        .await
        .unwrap();

    let account = AccountContext::new("main", broker, journal(&dir), manager(0, true));
    let mut trader = LiveTrader::new(
        StrategyEngine::new(StrategyConfig::default()),
        trader_settings(),
        vec![account],
    )
    .unwrap();
    trader.recover().await.unwrap();

    let position = trader.accounts()[0].manager.position().unwrap();
    assert_eq!(position.side, Side::Short);
    assert_relative_eq!(position.stop_loss, 112.0, epsilon = 1e-9);
}

#[test]
fn test_trader_needs_an_account() {
    let result: anyhow::Result<LiveTrader<MockBroker>> = LiveTrader::new(
        StrategyEngine::new(StrategyConfig::default()),
        trader_settings(),
        Vec::new(),
    );
    assert!(result.is_err());
}

#[test]
fn test_candle_window_tracks_exchange_feed() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut window = CandleWindow::new(60);
    assert_eq!(window.merge(hourly_candles(80, start)), 80);
    assert_eq!(window.len(), 60);
    assert_eq!(window.last_time(), Some(start + Duration::hours(79)));
}

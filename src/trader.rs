//! Live trading loop
//!
//! One task drives every account in a fixed order:
//!
//! 1. Each poll tick fetches the latest price and checks open positions
//!    against their stop/take levels.
//! 2. Once a new candle has closed, the candle window is refreshed, the
//!    engine evaluates it once, and every account reacts to that evaluation.
//!
//! Transport failures pause the loop for `retry_delay` before the next
//! iteration. Other broker errors skip the cycle for the account that hit
//! them.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::data::CandleWindow;
use crate::error::{BrokerError, BrokerResult};
use crate::position::PositionManager;
use crate::strategy::{Evaluation, StrategyEngine};
use crate::trade_log::TradeLog;
use crate::{Regime, Symbol};

/// Everything that belongs to one trading account
pub struct AccountContext<B> {
    pub name: String,
    pub broker: B,
    pub journal: TradeLog,
    pub manager: PositionManager,
}

impl<B: Broker> AccountContext<B> {
    pub fn new(name: impl Into<String>, broker: B, journal: TradeLog, manager: PositionManager) -> Self {
        Self {
            name: name.into(),
            broker,
            journal,
            manager,
        }
    }

    /// Restore the open position recorded in the trade log, if any
    pub fn recover(&mut self) -> Result<bool> {
        let symbol = self.manager.settings().symbol.clone();
        match self.journal.open_position(&symbol)? {
            Some(record) => {
                info!(account = %self.name, trade_id = %record.trade_id, "Open trade found in log");
                self.manager.restore(&record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Compare the restored state with what the broker reports
    pub async fn reconcile(&self) -> BrokerResult<()> {
        let symbol = &self.manager.settings().symbol;
        let remote = self.broker.open_position(symbol).await?;
        let local = self.manager.position();
        match (local, remote) {
            (Some(l), Some(r)) if l.side == r.side => {}
            (None, None) => {}
            (l, r) => warn!(
                account = %self.name,
                symbol = %symbol,
                local = ?l.map(|p| p.side),
                remote = ?r.map(|p| p.side),
                "Trade log and broker disagree on the open position"
            ),
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TraderSettings {
    pub symbol: Symbol,
    pub timeframe: String,
    pub candle_interval: chrono::Duration,
    pub candle_limit: usize,
    pub poll_interval: Duration,
    pub retry_delay: Duration,
}

/// Polling loop over a list of accounts sharing one engine.
///
/// Market data is read from the first account's broker.
pub struct LiveTrader<B> {
    engine: StrategyEngine,
    settings: TraderSettings,
    window: CandleWindow,
    accounts: Vec<AccountContext<B>>,
    last_evaluated: Option<DateTime<Utc>>,
    regime: Option<Regime>,
    cycle_count: u64,
}

impl<B: Broker> LiveTrader<B> {
    pub fn new(
        engine: StrategyEngine,
        settings: TraderSettings,
        accounts: Vec<AccountContext<B>>,
    ) -> Result<Self> {
        if accounts.is_empty() {
            anyhow::bail!("No accounts to trade");
        }
        let window = CandleWindow::new(settings.candle_limit.max(engine.config().warmup_candles()));
        Ok(Self {
            engine,
            settings,
            window,
            accounts,
            last_evaluated: None,
            regime: None,
            cycle_count: 0,
        })
    }

    pub fn accounts(&self) -> &[AccountContext<B>] {
        &self.accounts
    }

    pub fn regime(&self) -> Option<Regime> {
        self.regime
    }

    /// Restore open positions from every account's trade log
    pub async fn recover(&mut self) -> Result<()> {
        info!("Recovering open positions from trade logs...");
        let mut recovered = 0;
        for account in &mut self.accounts {
            if account.recover()? {
                recovered += 1;
            }
            if let Err(e) = account.reconcile().await {
                warn!(account = %account.name, "Could not check broker position: {}", e);
            }
        }
        info!("Recovery complete: {} open position(s)", recovered);
        Ok(())
    }

    /// Run until a message arrives on `shutdown`
    pub async fn run(&mut self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            symbol = %self.settings.symbol,
            timeframe = %self.settings.timeframe,
            accounts = self.accounts.len(),
            "Starting trading loop..."
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        if e.is_transport() {
                            warn!(
                                "Network error: {}. Retrying in {}s",
                                e,
                                self.settings.retry_delay.as_secs()
                            );
                            sleep(self.settings.retry_delay).await;
                        } else {
                            warn!("Cycle skipped: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        for account in &self.accounts {
            if let Some(p) = account.manager.position() {
                info!(
                    account = %account.name,
                    symbol = %p.symbol,
                    side = %p.side,
                    "Leaving position open; it will be recovered on restart"
                );
            }
        }
        info!("Live trading session ended after {} cycles", self.cycle_count);
        Ok(())
    }

    /// One loop iteration at `now`
    pub async fn tick(&mut self, now: DateTime<Utc>) -> BrokerResult<()> {
        self.cycle_count += 1;
        let price = self.market().latest_price(&self.settings.symbol).await?;
        debug!(symbol = %self.settings.symbol, price, "Price update");

        let mut failure = None;

        // Stops first, on every tick
        for account in &mut self.accounts {
            let regime = self
                .regime
                .or_else(|| account.manager.position().map(|p| p.regime))
                .unwrap_or(Regime::Trending);
            if let Err(e) = account
                .manager
                .on_price(&account.broker, &account.journal, price, regime)
                .await
            {
                error!(account = %account.name, "Stop/take check failed: {}", e);
                failure.get_or_insert(e);
            }
        }

        if let Some(evaluation) = self.refresh(now).await? {
            self.regime = Some(evaluation.regime());
            info!(
                symbol = %self.settings.symbol,
                candle = %evaluation.snapshot.timestamp,
                close = evaluation.snapshot.close,
                regime = %evaluation.regime(),
                signal = ?evaluation.signal(),
                "New candle evaluated"
            );
            for account in &mut self.accounts {
                match account
                    .manager
                    .on_evaluation(&account.broker, &account.journal, &evaluation, price)
                    .await
                {
                    Ok(events) => {
                        for event in events {
                            info!(account = %account.name, ?event, "Position event");
                        }
                    }
                    Err(e) => {
                        error!(account = %account.name, "Signal handling failed: {}", e);
                        failure.get_or_insert(e);
                    }
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Fetch new candles when one should have closed; evaluate each closed
    /// candle once.
    async fn refresh(&mut self, now: DateTime<Utc>) -> BrokerResult<Option<Evaluation>> {
        if !self.window.needs_refresh(self.settings.candle_interval, now) {
            return Ok(None);
        }

        let candles = self
            .market()
            .fetch_candles(
                &self.settings.symbol,
                &self.settings.timeframe,
                self.settings.candle_limit,
                None,
            )
            .await?;
        if candles.is_empty() {
            return Err(BrokerError::data("empty kline response"));
        }
        let added = self.window.merge(candles);
        debug!(added, total = self.window.len(), "Candle window refreshed");

        let last = self.window.last_time();
        if last.is_none() || last == self.last_evaluated {
            return Ok(None);
        }
        self.last_evaluated = last;

        let needed = self.engine.config().warmup_candles();
        if self.window.len() < needed {
            info!(
                candles = self.window.len(),
                needed,
                "Waiting for indicator warmup"
            );
            return Ok(None);
        }
        Ok(self.engine.evaluate(self.window.candles()))
    }

    fn market(&self) -> &B {
        &self.accounts[0].broker
    }
}

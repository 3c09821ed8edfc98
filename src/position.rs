//! Position manager
//!
//! State machine per account: `Flat` ⇄ `Open(side)`.
//!
//! - `Flat → Open` on an entry signal.
//! - `Open → Flat` on a stop/take breach or an opposite signal (reversal).
//!   With `reopen_on_reversal` the opposite side is opened in the same cycle.
//! - A regime change while open re-levels stop/take from the entry price.
//!
//! Each transition is one market order. If the broker rejects it (after
//! `order_retries` immediate retries) the state does not change.

use chrono::{Duration, Utc};
use rust_decimal::prelude::*;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, OrderAck, OrderRequest};
use crate::error::{BrokerError, BrokerResult};
use crate::risk::PositionSizer;
use crate::strategy::{Evaluation, RegimeMultipliers};
use crate::trade_log::{trade_id_for, TradeLog, TradeRecord};
use crate::{ExitReason, Position, Regime, Side, Symbol};

/// Upper bound for `order_retries`
pub const MAX_ORDER_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum PositionState {
    Flat,
    Open(Position),
}

impl PositionState {
    pub fn position(&self) -> Option<&Position> {
        match self {
            PositionState::Flat => None,
            PositionState::Open(p) => Some(p),
        }
    }

    pub fn side(&self) -> Option<Side> {
        self.position().map(|p| p.side)
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, PositionState::Flat)
    }
}

/// What a call to the manager did
#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    Opened {
        side: Side,
        price: f64,
        quantity: f64,
        stop_loss: f64,
        take_profit: f64,
    },
    Closed {
        side: Side,
        price: f64,
        reason: ExitReason,
        pnl: f64,
    },
    Relevelled {
        regime: Regime,
        stop_loss: f64,
        take_profit: f64,
    },
    /// Sizing produced no tradable quantity
    Skipped { side: Side },
}

/// Static parameters of a manager
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub symbol: Symbol,
    pub timeframe: String,
    pub setup: String,
    pub commission_rate: f64,
    pub order_retries: u32,
    pub reopen_on_reversal: bool,
    pub multipliers: RegimeMultipliers,
}

/// One account's position state machine
#[derive(Debug)]
pub struct PositionManager {
    settings: ManagerSettings,
    sizer: PositionSizer,
    state: PositionState,
    /// Equity when the current position was opened
    entry_balance: f64,
    last_trade_id: Option<String>,
}

impl PositionManager {
    pub fn new(settings: ManagerSettings, sizer: PositionSizer) -> Self {
        Self {
            settings,
            sizer,
            state: PositionState::Flat,
            entry_balance: 0.0,
            last_trade_id: None,
        }
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    pub fn position(&self) -> Option<&Position> {
        self.state.position()
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Restore an open position from its journal row
    pub fn restore(&mut self, record: &TradeRecord) {
        let mut position = record.to_position();
        position.regime = self.infer_regime(&position);
        info!(
            symbol = %position.symbol,
            side = %position.side,
            entry = position.entry_price,
            stop = position.stop_loss,
            take = position.take_profit,
            regime = %position.regime,
            "Recovered open position from trade log"
        );
        self.entry_balance = record.old_balance;
        self.last_trade_id = Some(record.trade_id.clone());
        self.state = PositionState::Open(position);
    }

    /// Regime whose levels match the stored stop, defaulting to the entry regime
    fn infer_regime(&self, position: &Position) -> Regime {
        let m = &self.settings.multipliers;
        let matches = |regime| {
            let (stop, _) = m.levels(position.side, regime, position.entry_price);
            (stop - position.stop_loss).abs() <= position.entry_price * 1e-9
        };
        if matches(Regime::Lateral) {
            Regime::Lateral
        } else if matches(Regime::Trending) {
            Regime::Trending
        } else {
            position.regime
        }
    }

    /// Check the latest price against stop/take; stop is checked first.
    pub async fn on_price<B: Broker>(
        &mut self,
        broker: &B,
        journal: &TradeLog,
        price: f64,
        regime: Regime,
    ) -> BrokerResult<Option<PositionEvent>> {
        let Some(reason) = self.position().and_then(|p| p.exit_trigger(price)) else {
            return Ok(None);
        };
        self.close(broker, journal, price, reason, regime).await.map(Some)
    }

    /// React to a new candle evaluation
    pub async fn on_evaluation<B: Broker>(
        &mut self,
        broker: &B,
        journal: &TradeLog,
        evaluation: &Evaluation,
        price: f64,
    ) -> BrokerResult<Vec<PositionEvent>> {
        let mut events = Vec::new();
        let regime = evaluation.regime();

        if let Some(event) = self.relevel(journal, regime) {
            events.push(event);
        }

        let Some(side) = evaluation.signal().side() else {
            return Ok(events);
        };

        match self.position() {
            Some(open) if open.side == side => {
                debug!(
                    side = %side,
                    unrealized = open.unrealized_pnl(price),
                    "Signal matches the open position"
                );
            }
            Some(_) => {
                events.push(
                    self.close(broker, journal, price, ExitReason::Reversal, regime)
                        .await?,
                );
                if self.settings.reopen_on_reversal {
                    match self.open(broker, journal, side, price, regime).await {
                        Ok(event) => events.push(event),
                        // Already flat; the entry is retried on the next signal
                        Err(e) => warn!("Reversal re-entry failed: {}", e),
                    }
                }
            }
            None => events.push(self.open(broker, journal, side, price, regime).await?),
        }
        Ok(events)
    }

    /// Re-level stop/take when the regime changed since entry
    pub fn relevel(&mut self, journal: &TradeLog, regime: Regime) -> Option<PositionEvent> {
        let PositionState::Open(position) = &mut self.state else {
            return None;
        };
        if position.regime == regime {
            return None;
        }

        let (stop_loss, take_profit) =
            self.settings
                .multipliers
                .levels(position.side, regime, position.entry_price);
        info!(
            symbol = %position.symbol,
            from = %position.regime,
            to = %regime,
            stop_loss,
            take_profit,
            "Regime changed, re-levelling stop/take"
        );
        position.regime = regime;
        position.stop_loss = stop_loss;
        position.take_profit = take_profit;

        if let Err(e) = journal.update(&position.trade_id, |r| r.relevel(stop_loss, take_profit)) {
            error!("Failed to record re-levelled stops: {:#}", e);
        }

        Some(PositionEvent::Relevelled {
            regime,
            stop_loss,
            take_profit,
        })
    }

    /// Open `side` at `price`. Flat → Open, or a no-op `Skipped` event.
    pub async fn open<B: Broker>(
        &mut self,
        broker: &B,
        journal: &TradeLog,
        side: Side,
        price: f64,
        regime: Regime,
    ) -> BrokerResult<PositionEvent> {
        if let Some(open) = self.position() {
            return Err(BrokerError::data(format!(
                "cannot open {} while {} is open",
                side, open.side
            )));
        }

        let equity = broker.wallet_equity().await?;
        let Some(quantity) = self.sizer.entry_quantity(equity, price, 1.0) else {
            warn!(
                symbol = %self.settings.symbol,
                equity,
                price,
                "Order quantity below exchange minimum, skipping {} entry",
                side
            );
            return Ok(PositionEvent::Skipped { side });
        };

        let order = OrderRequest::open(self.settings.symbol.clone(), side, quantity);
        self.submit(broker, &order).await?;

        let qty = quantity.to_f64().unwrap_or_default();
        let (stop_loss, take_profit) = self.settings.multipliers.levels(side, regime, price);
        let mut entry_time = Utc::now();
        // Trade ids have millisecond resolution; a reversal can reopen within the same one
        if self.last_trade_id.as_deref() == Some(trade_id_for(entry_time).as_str()) {
            entry_time += Duration::milliseconds(1);
        }
        let position = Position {
            symbol: self.settings.symbol.clone(),
            side,
            entry_price: price,
            quantity: qty,
            stop_loss,
            take_profit,
            regime,
            entry_time,
            trade_id: trade_id_for(entry_time),
        };

        info!(
            symbol = %position.symbol,
            side = %side,
            price,
            qty,
            stop_loss,
            take_profit,
            regime = %regime,
            "Position opened"
        );

        let record = TradeRecord::opened(
            &position,
            &self.settings.timeframe,
            &self.settings.setup,
            equity,
        );
        if let Err(e) = journal.append(&record) {
            error!("Failed to journal opened position: {:#}", e);
        }

        self.entry_balance = equity;
        self.last_trade_id = Some(position.trade_id.clone());
        self.state = PositionState::Open(position);
        Ok(PositionEvent::Opened {
            side,
            price,
            quantity: qty,
            stop_loss,
            take_profit,
        })
    }

    /// Close the open position at `price`. Open → Flat.
    pub async fn close<B: Broker>(
        &mut self,
        broker: &B,
        journal: &TradeLog,
        price: f64,
        reason: ExitReason,
        regime: Regime,
    ) -> BrokerResult<PositionEvent> {
        let position = match &self.state {
            PositionState::Open(p) => p.clone(),
            PositionState::Flat => return Err(BrokerError::data("no open position to close")),
        };

        let quantity = self
            .sizer
            .exit_quantity(position.quantity)
            .ok_or_else(|| BrokerError::data(format!("invalid position size {}", position.quantity)))?;
        let order = OrderRequest::close(position.symbol.clone(), position.side, quantity);
        self.submit(broker, &order).await?;

        let mut record = TradeRecord::opened(
            &position,
            &self.settings.timeframe,
            &self.settings.setup,
            self.entry_balance,
        );
        let now = Utc::now();
        let rate = self.settings.commission_rate;
        let pnl = record.close(price, now, regime, rate);

        match journal.update(&position.trade_id, |r| {
            r.close(price, now, regime, rate);
        }) {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(trade_id = %position.trade_id, "Trade log row missing, appending closed trade");
                if let Err(e) = journal.append(&record) {
                    error!("Failed to journal closed trade: {:#}", e);
                }
            }
            Err(e) => error!("Failed to journal closed trade: {:#}", e),
        }

        info!(
            symbol = %position.symbol,
            side = %position.side,
            entry = position.entry_price,
            exit = price,
            pnl,
            reason = %reason,
            "Position closed"
        );

        self.state = PositionState::Flat;
        Ok(PositionEvent::Closed {
            side: position.side,
            price,
            reason,
            pnl,
        })
    }

    async fn submit<B: Broker>(&self, broker: &B, order: &OrderRequest) -> BrokerResult<OrderAck> {
        submit_order(broker, order, self.settings.order_retries).await
    }
}

/// Place a market order with up to `retries` immediate retries (capped at 3)
pub async fn submit_order<B: Broker>(
    broker: &B,
    order: &OrderRequest,
    retries: u32,
) -> BrokerResult<OrderAck> {
    let attempts = retries.min(MAX_ORDER_RETRIES) + 1;
    let mut last_err = None;
    for attempt in 1..=attempts {
        match broker.place_market_order(order).await {
            Ok(ack) => return Ok(ack),
            Err(e) => {
                warn!(
                    symbol = %order.symbol,
                    side = order.side.as_str(),
                    qty = %order.quantity,
                    attempt,
                    attempts,
                    "Order failed: {}",
                    e
                );
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| BrokerError::data("order not attempted")))
}

//! Broker abstraction
//!
//! [`Broker`] is the only seam between the trading logic and an exchange.
//! [`crate::bybit::BybitClient`] talks to the real API; [`PaperBroker`]
//! takes market data from any other broker and simulates fills locally.

use std::future::Future;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{BrokerError, BrokerResult};
use crate::{Candle, OrderSide, Side, Symbol};

/// Market order request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn open(symbol: Symbol, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol,
            side: side.entry_order(),
            quantity,
            reduce_only: false,
        }
    }

    pub fn close(symbol: Symbol, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol,
            side: side.exit_order(),
            quantity,
            reduce_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
}

/// Position as reported by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: Symbol,
    pub side: Side,
    pub size: f64,
    pub avg_price: f64,
}

/// Exchange operations used by the trader.
///
/// Methods return `Send` futures so callers can hold a broker across
/// `.await` points inside a spawned task.
pub trait Broker: Send + Sync {
    /// Closed candles, oldest first
    fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        limit: usize,
        start: Option<DateTime<Utc>>,
    ) -> impl Future<Output = BrokerResult<Vec<Candle>>> + Send;

    fn latest_price(&self, symbol: &Symbol) -> impl Future<Output = BrokerResult<f64>> + Send;

    /// Total account equity in quote currency
    fn wallet_equity(&self) -> impl Future<Output = BrokerResult<f64>> + Send;

    fn open_position(
        &self,
        symbol: &Symbol,
    ) -> impl Future<Output = BrokerResult<Option<BrokerPosition>>> + Send;

    fn place_market_order(
        &self,
        order: &OrderRequest,
    ) -> impl Future<Output = BrokerResult<OrderAck>> + Send;
}

#[derive(Debug)]
struct PaperAccount {
    equity: f64,
    position: Option<BrokerPosition>,
    next_order_id: u64,
}

/// Simulated broker: real market data, local fills.
///
/// Opening orders set the position at the latest price. Reduce-only orders
/// realize PnL minus taker fees into equity.
#[derive(Debug)]
pub struct PaperBroker<D> {
    data: D,
    fee_rate: f64,
    account: Mutex<PaperAccount>,
}

impl<D: Broker> PaperBroker<D> {
    pub fn new(data: D, initial_equity: f64, fee_rate: f64) -> Self {
        Self {
            data,
            fee_rate,
            account: Mutex::new(PaperAccount {
                equity: initial_equity,
                position: None,
                next_order_id: 1,
            }),
        }
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    async fn fill(&self, order: &OrderRequest, price: f64) -> BrokerResult<OrderAck> {
        let qty = order
            .quantity
            .to_f64()
            .filter(|q| *q > 0.0)
            .ok_or_else(|| BrokerError::data(format!("invalid order quantity {}", order.quantity)))?;

        let mut account = self.account.lock().await;
        let fee = qty * price * self.fee_rate;
        let order_side = match order.side {
            OrderSide::Buy => Side::Long,
            OrderSide::Sell => Side::Short,
        };

        match account.position.take() {
            Some(mut pos) if pos.side != order_side => {
                // Reducing: realize PnL on the filled part
                let closed = qty.min(pos.size);
                let pnl = crate::risk::gross_pnl(pos.side, pos.avg_price, price, closed);
                account.equity += pnl - fee;
                pos.size -= closed;
                if pos.size > 1e-12 {
                    account.position = Some(pos);
                }
            }
            Some(pos) if order.reduce_only => {
                account.position = Some(pos);
                return Err(BrokerError::Api {
                    code: 110017,
                    message: "reduce-only order would increase position".into(),
                });
            }
            Some(mut pos) => {
                let total = pos.size + qty;
                pos.avg_price = (pos.avg_price * pos.size + price * qty) / total;
                pos.size = total;
                account.equity -= fee;
                account.position = Some(pos);
            }
            None if order.reduce_only => {
                return Err(BrokerError::Api {
                    code: 110017,
                    message: "reduce-only order with no open position".into(),
                });
            }
            None => {
                account.equity -= fee;
                account.position = Some(BrokerPosition {
                    symbol: order.symbol.clone(),
                    side: order_side,
                    size: qty,
                    avg_price: price,
                });
            }
        }

        let order_id = format!("paper-{}", account.next_order_id);
        account.next_order_id += 1;
        info!(
            order_id = %order_id,
            symbol = %order.symbol,
            side = order.side.as_str(),
            qty = %order.quantity,
            price,
            equity = account.equity,
            "Paper fill"
        );
        Ok(OrderAck { order_id })
    }
}

impl<D: Broker> Broker for PaperBroker<D> {
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        limit: usize,
        start: Option<DateTime<Utc>>,
    ) -> BrokerResult<Vec<Candle>> {
        self.data.fetch_candles(symbol, timeframe, limit, start).await
    }

    async fn latest_price(&self, symbol: &Symbol) -> BrokerResult<f64> {
        self.data.latest_price(symbol).await
    }

    async fn wallet_equity(&self) -> BrokerResult<f64> {
        Ok(self.account.lock().await.equity)
    }

    async fn open_position(&self, symbol: &Symbol) -> BrokerResult<Option<BrokerPosition>> {
        let account = self.account.lock().await;
        Ok(account
            .position
            .as_ref()
            .filter(|p| &p.symbol == symbol)
            .cloned())
    }

    async fn place_market_order(&self, order: &OrderRequest) -> BrokerResult<OrderAck> {
        let price = self.data.latest_price(&order.symbol).await?;
        self.fill(order, price).await
    }
}

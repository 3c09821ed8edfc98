//! Core data types used across the trading system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for candle data
#[derive(Debug, Error, PartialEq)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive and finite: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// OHLCV candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    /// Create a new candle with validation
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        };
        candle.validate()?;
        Ok(candle)
    }

    /// Validate the candle data
    pub fn validate(&self) -> Result<(), CandleValidationError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(CandleValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(CandleValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }
}

/// Trading pair symbol, e.g. `BTCUSDT`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Order side that opens a position in this direction
    pub fn entry_order(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes a position in this direction
    pub fn exit_order(self) -> OrderSide {
        self.entry_order().opposite()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side text that is neither long/buy nor short/sell
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown side: {0}")]
pub struct ParseSideError(pub String);

impl std::str::FromStr for Side {
    type Err = ParseSideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Side::Long),
            "short" | "sell" => Ok(Side::Short),
            _ => Err(ParseSideError(s.to_string())),
        }
    }
}

/// Exchange order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        }
    }
}

/// Market regime derived from Bollinger bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Lateral,
    Trending,
}

impl Regime {
    pub fn from_lateral(is_lateral: bool) -> Self {
        if is_lateral {
            Regime::Lateral
        } else {
            Regime::Trending
        }
    }

    pub fn is_lateral(self) -> bool {
        self == Regime::Lateral
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::Lateral => f.write_str("lateral"),
            Regime::Trending => f.write_str("trending"),
        }
    }
}

/// Entry signal emitted by the signal generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Long,
    Short,
    Flat,
}

impl Signal {
    pub fn side(self) -> Option<Side> {
        match self {
            Signal::Long => Some(Side::Long),
            Signal::Short => Some(Side::Short),
            Signal::Flat => None,
        }
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Reversal,
    Manual,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => f.write_str("Stop Loss"),
            ExitReason::TakeProfit => f.write_str("Take Profit"),
            ExitReason::Reversal => f.write_str("Reversal"),
            ExitReason::Manual => f.write_str("Manual"),
        }
    }
}

/// Open position state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub regime: Regime,
    pub entry_time: DateTime<Utc>,
    /// `trade_id` of the trade log row backing this position
    pub trade_id: String,
}

impl Position {
    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        match self.side {
            Side::Long => (current_price - self.entry_price) * self.quantity,
            Side::Short => (self.entry_price - current_price) * self.quantity,
        }
    }

    pub fn stop_breached(&self, price: f64) -> bool {
        match self.side {
            Side::Long => price <= self.stop_loss,
            Side::Short => price >= self.stop_loss,
        }
    }

    pub fn take_profit_reached(&self, price: f64) -> bool {
        match self.side {
            Side::Long => price >= self.take_profit,
            Side::Short => price <= self.take_profit,
        }
    }

    /// Exit triggered by the latest price, stop first
    pub fn exit_trigger(&self, price: f64) -> Option<ExitReason> {
        if self.stop_breached(price) {
            Some(ExitReason::StopLoss)
        } else if self.take_profit_reached(price) {
            Some(ExitReason::TakeProfit)
        } else {
            None
        }
    }
}

//! Regime Trader
//!
//! An indicator-driven trading engine for Bybit perpetual futures. Candles
//! feed an indicator engine (EMA, RSI, MACD, ADX, Bollinger Bands); a regime
//! classifier labels the market lateral or trending; a signal generator
//! turns crossovers into entries; a position manager opens and closes one
//! position per account with regime-dependent stop/take levels.
//!
//! The same engine runs in three shells: the live polling loop
//! ([`trader`]), the alert webhook ([`webhook`]) and the backtester
//! ([`backtest`]).

pub mod backtest;
pub mod broker;
pub mod bybit;
pub mod config;
pub mod data;
pub mod error;
pub mod indicators;
pub mod position;
pub mod risk;
pub mod strategy;
pub mod trade_log;
pub mod trader;
pub mod types;
pub mod webhook;

pub use broker::{Broker, PaperBroker};
pub use config::Config;
pub use error::{BrokerError, BrokerResult, ConfigError};
pub use types::*;

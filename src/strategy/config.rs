//! Regime Strategy Configuration
//!
//! Indicator periods, signal thresholds and the per-regime stop/take
//! multipliers. Every field has a default, so a config file only needs the
//! values it wants to change.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::{Regime, Side};

/// Stop-loss / take-profit multipliers applied to the entry price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopTake {
    pub stop: f64,
    pub take: f64,
}

impl StopTake {
    pub const fn new(stop: f64, take: f64) -> Self {
        Self { stop, take }
    }
}

/// Multipliers per regime and side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeMultipliers {
    pub lateral_long: StopTake,
    pub trend_long: StopTake,
    pub lateral_short: StopTake,
    pub trend_short: StopTake,
}

impl Default for RegimeMultipliers {
    fn default() -> Self {
        Self {
            lateral_long: StopTake::new(0.973, 1.11),
            trend_long: StopTake::new(0.92, 1.32),
            lateral_short: StopTake::new(1.09, 0.973),
            trend_short: StopTake::new(1.12, 0.77),
        }
    }
}

impl RegimeMultipliers {
    pub fn for_side(&self, side: Side, regime: Regime) -> StopTake {
        match (side, regime) {
            (Side::Long, Regime::Lateral) => self.lateral_long,
            (Side::Long, Regime::Trending) => self.trend_long,
            (Side::Short, Regime::Lateral) => self.lateral_short,
            (Side::Short, Regime::Trending) => self.trend_short,
        }
    }

    /// `(stop_loss, take_profit)` for a position entered at `entry_price`
    pub fn levels(&self, side: Side, regime: Regime, entry_price: f64) -> (f64, f64) {
        let m = self.for_side(side, regime);
        (entry_price * m.stop, entry_price * m.take)
    }
}

/// Regime Strategy Configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Fast EMA period
    pub ema_short: usize,
    /// Slow EMA period
    pub ema_long: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    /// DI smoothing period
    pub adx_period: usize,
    /// DX smoothing period
    pub adx_smoothing: usize,
    pub bb_period: usize,
    pub bb_multiplier: f64,

    /// Bandwidth below this is a lateral market
    pub lateral_threshold: f64,
    /// ADX at or above this is a trending market
    pub adx_threshold: f64,

    pub rsi_long_max: f64,
    pub rsi_short_min: f64,
    pub macd_hist_long_min: f64,
    pub macd_hist_short_max: f64,

    /// Lateral entries also require ADX >= threshold
    pub lateral_requires_trend: bool,

    pub multipliers: RegimeMultipliers,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            ema_short: 11,
            ema_long: 55,
            rsi_period: 22,
            macd_fast: 15,
            macd_slow: 34,
            macd_signal: 11,
            adx_period: 16,
            adx_smoothing: 13,
            bb_period: 14,
            bb_multiplier: 1.7,
            lateral_threshold: 0.005,
            adx_threshold: 12.0,
            rsi_long_max: 60.0,
            rsi_short_min: 40.0,
            macd_hist_long_min: 0.5,
            macd_hist_short_max: -0.5,
            lateral_requires_trend: true,
            multipliers: RegimeMultipliers::default(),
        }
    }
}

impl StrategyConfig {
    /// Candles needed before every indicator is defined at the last index
    /// and at the one before it (crossovers look back one bar).
    pub fn warmup_candles(&self) -> usize {
        [
            self.ema_long,
            self.ema_short,
            self.rsi_period + 1,
            self.macd_slow.max(self.macd_fast) + self.macd_signal - 1,
            self.adx_period + self.adx_smoothing,
            self.bb_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
            + 1
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("ema_short", self.ema_short),
            ("ema_long", self.ema_long),
            ("rsi_period", self.rsi_period),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("adx_period", self.adx_period),
            ("adx_smoothing", self.adx_smoothing),
            ("bb_period", self.bb_period),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, p)| *p == 0) {
            return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
        }
        if self.ema_short >= self.ema_long {
            return Err(ConfigError::Invalid(format!(
                "ema_short ({}) must be < ema_long ({})",
                self.ema_short, self.ema_long
            )));
        }
        if self.macd_fast >= self.macd_slow {
            return Err(ConfigError::Invalid(format!(
                "macd_fast ({}) must be < macd_slow ({})",
                self.macd_fast, self.macd_slow
            )));
        }
        if self.bb_multiplier <= 0.0 {
            return Err(ConfigError::Invalid("bb_multiplier must be > 0".into()));
        }
        Ok(())
    }
}

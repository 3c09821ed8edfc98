//! Entry signal generation
//!
//! Long: fast EMA crosses above slow EMA with RSI below its ceiling and a
//! positive MACD histogram. Short is the mirror. In a lateral market the
//! price must also be outside the corresponding Bollinger band.

use serde::{Deserialize, Serialize};

use super::config::StrategyConfig;
use super::engine::IndicatorSnapshot;
use crate::Signal;

/// `a` crosses above `b` at `i`: `a[i] > b[i]` and `a[i-1] <= b[i-1]`
pub fn crossover(a: &[Option<f64>], b: &[Option<f64>], i: usize) -> bool {
    match window(a, b, i) {
        Some((pa, pb, ca, cb)) => ca > cb && pa <= pb,
        None => false,
    }
}

/// `a` crosses below `b` at `i`: `a[i] < b[i]` and `a[i-1] >= b[i-1]`
pub fn crossunder(a: &[Option<f64>], b: &[Option<f64>], i: usize) -> bool {
    match window(a, b, i) {
        Some((pa, pb, ca, cb)) => ca < cb && pa >= pb,
        None => false,
    }
}

fn window(a: &[Option<f64>], b: &[Option<f64>], i: usize) -> Option<(f64, f64, f64, f64)> {
    if i == 0 {
        return None;
    }
    Some((
        (*a.get(i - 1)?)?,
        (*b.get(i - 1)?)?,
        (*a.get(i)?)?,
        (*b.get(i)?)?,
    ))
}

/// Both entry conditions for one bar
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryConditions {
    pub long: bool,
    pub short: bool,
}

impl EntryConditions {
    pub fn signal(&self) -> Signal {
        match (self.long, self.short) {
            (true, false) => Signal::Long,
            (false, true) => Signal::Short,
            _ => Signal::Flat,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalGenerator {
    rsi_long_max: f64,
    rsi_short_min: f64,
    macd_hist_long_min: f64,
    macd_hist_short_max: f64,
    lateral_requires_trend: bool,
}

impl SignalGenerator {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            rsi_long_max: config.rsi_long_max,
            rsi_short_min: config.rsi_short_min,
            macd_hist_long_min: config.macd_hist_long_min,
            macd_hist_short_max: config.macd_hist_short_max,
            lateral_requires_trend: config.lateral_requires_trend,
        }
    }

    /// Evaluate entry conditions at `cur` given the previous bar
    pub fn evaluate(&self, prev: &IndicatorSnapshot, cur: &IndicatorSnapshot) -> EntryConditions {
        let short_ema = [prev.ema_short, cur.ema_short];
        let long_ema = [prev.ema_long, cur.ema_long];
        let (rsi, hist) = match (cur.rsi, cur.macd_histogram) {
            (Some(r), Some(h)) => (r, h),
            _ => return EntryConditions::default(),
        };

        let long_momentum = crossover(&short_ema, &long_ema, 1)
            && rsi < self.rsi_long_max
            && hist > self.macd_hist_long_min;
        let short_momentum = crossunder(&short_ema, &long_ema, 1)
            && rsi > self.rsi_short_min
            && hist < self.macd_hist_short_max;

        if cur.is_lateral {
            let gate = cur.trending || !self.lateral_requires_trend;
            EntryConditions {
                long: gate
                    && long_momentum
                    && cur.bollinger_lower.is_some_and(|lower| cur.close < lower),
                short: gate
                    && short_momentum
                    && cur.bollinger_upper.is_some_and(|upper| cur.close > upper),
            }
        } else {
            EntryConditions {
                long: cur.trending && long_momentum,
                short: cur.trending && short_momentum,
            }
        }
    }
}

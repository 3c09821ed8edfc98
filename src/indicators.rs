//! Technical indicators
//!
//! Moving averages and Bollinger Bands wrap the `ta` crate. RSI and ADX use
//! Wilder smoothing with explicit warm-up, so they are implemented as small
//! incremental state machines that the batch functions drive.
//!
//! Every batch function returns one entry per input value. `None` marks an
//! index where the indicator does not have enough history yet. All outputs
//! are causal: the value at index `i` only depends on inputs `0..=i`.

use ta::indicators::{BollingerBands as TaBB, ExponentialMovingAverage, SimpleMovingAverage};
use ta::Next;

/// Upper, middle, lower band and bandwidth
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BollingerOutput {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
    /// `(upper - lower) / middle`
    pub band_width: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacdOutput {
    pub line: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdxOutput {
    pub di_plus: Vec<Option<f64>>,
    pub di_minus: Vec<Option<f64>>,
    pub adx: Vec<Option<f64>>,
}

// =============================================================================
// Moving Averages
// =============================================================================

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![None; values.len()];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let sma_val = indicator.next(value);
            (i + 1 >= period).then_some(sma_val)
        })
        .collect()
}

/// Calculate Exponential Moving Average
///
/// The recursion is seeded with the first value (`alpha = 2 / (period + 1)`);
/// output is masked until `period` values have been seen.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![None; values.len()];
    }

    let mut indicator = match ExponentialMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let ema_val = indicator.next(value);
            (i + 1 >= period).then_some(ema_val)
        })
        .collect()
}

/// EMA over a series that starts with undefined values.
///
/// The recursion starts at the first defined value. An undefined value after
/// that point yields `None` without advancing the average.
pub fn ema_of_defined(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }

    let mut indicator = match ExponentialMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    let mut seen = 0usize;
    values
        .iter()
        .map(|value| {
            let value = (*value)?;
            seen += 1;
            let ema_val = indicator.next(value);
            (seen >= period).then_some(ema_val)
        })
        .collect()
}

// =============================================================================
// Momentum
// =============================================================================

/// Calculate MACD (line, signal, histogram)
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> MacdOutput {
    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);

    let line: Vec<Option<f64>> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();

    let signal_line = ema_of_defined(&line, signal);

    let histogram = line
        .iter()
        .zip(signal_line.iter())
        .map(|(l, s)| Some((*l)? - (*s)?))
        .collect();

    MacdOutput {
        line,
        signal: signal_line,
        histogram,
    }
}

/// Incremental Wilder RSI
///
/// The first average gain/loss is the simple mean over `period` changes, so
/// the first value appears at index `period`.
#[derive(Debug, Clone)]
pub struct WilderRsi {
    period: usize,
    prev_close: Option<f64>,
    avg_gain: f64,
    avg_loss: f64,
    changes: usize,
}

impl WilderRsi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_close: None,
            avg_gain: 0.0,
            avg_loss: 0.0,
            changes: 0,
        }
    }

    pub fn next(&mut self, close: f64) -> Option<f64> {
        let prev = match self.prev_close.replace(close) {
            Some(p) => p,
            None => return None,
        };

        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        self.changes += 1;

        let n = self.period as f64;
        if self.changes <= self.period {
            self.avg_gain += gain / n;
            self.avg_loss += loss / n;
            if self.changes < self.period {
                return None;
            }
        } else {
            self.avg_gain = (self.avg_gain * (n - 1.0) + gain) / n;
            self.avg_loss = (self.avg_loss * (n - 1.0) + loss) / n;
        }

        Some(rsi_from_averages(self.avg_gain, self.avg_loss))
    }
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Calculate RSI (Relative Strength Index) with Wilder smoothing
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }
    let mut indicator = WilderRsi::new(period);
    values.iter().map(|&v| indicator.next(v)).collect()
}

// =============================================================================
// Trend Strength
// =============================================================================

/// Single-bar ADX output
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AdxValue {
    pub di_plus: Option<f64>,
    pub di_minus: Option<f64>,
    pub adx: Option<f64>,
}

/// Incremental Wilder ADX
///
/// DI+/DI- are available from bar `period`; ADX is the Wilder average of DX
/// over `smoothing` bars and is available from bar `period + smoothing - 1`.
#[derive(Debug, Clone)]
pub struct IncrementalAdx {
    period: usize,
    smoothing: usize,
    prev: Option<(f64, f64, f64)>,

    // Wilder running sums
    smooth_tr: f64,
    smooth_pos_dm: f64,
    smooth_neg_dm: f64,
    bars: usize,

    dx_count: usize,
    adx: f64,
}

impl IncrementalAdx {
    pub fn new(period: usize, smoothing: usize) -> Self {
        Self {
            period: period.max(1),
            smoothing: smoothing.max(1),
            prev: None,
            smooth_tr: 0.0,
            smooth_pos_dm: 0.0,
            smooth_neg_dm: 0.0,
            bars: 0,
            dx_count: 0,
            adx: 0.0,
        }
    }

    pub fn next(&mut self, high: f64, low: f64, close: f64) -> AdxValue {
        let (prev_high, prev_low, prev_close) = match self.prev.replace((high, low, close)) {
            Some(p) => p,
            None => return AdxValue::default(),
        };

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());

        let up = high - prev_high;
        let down = prev_low - low;
        let pos_dm = if up > down && up > 0.0 { up } else { 0.0 };
        let neg_dm = if down > up && down > 0.0 { down } else { 0.0 };

        self.bars += 1;
        let n = self.period as f64;
        if self.bars <= self.period {
            self.smooth_tr += tr;
            self.smooth_pos_dm += pos_dm;
            self.smooth_neg_dm += neg_dm;
            if self.bars < self.period {
                return AdxValue::default();
            }
        } else {
            self.smooth_tr = self.smooth_tr - self.smooth_tr / n + tr;
            self.smooth_pos_dm = self.smooth_pos_dm - self.smooth_pos_dm / n + pos_dm;
            self.smooth_neg_dm = self.smooth_neg_dm - self.smooth_neg_dm / n + neg_dm;
        }

        let (di_plus, di_minus) = if self.smooth_tr > 0.0 {
            (
                100.0 * self.smooth_pos_dm / self.smooth_tr,
                100.0 * self.smooth_neg_dm / self.smooth_tr,
            )
        } else {
            (0.0, 0.0)
        };

        let di_sum = di_plus + di_minus;
        // Flat market: DX is defined as 0
        let dx = if di_sum > 0.0 {
            100.0 * (di_plus - di_minus).abs() / di_sum
        } else {
            0.0
        };

        self.dx_count += 1;
        let s = self.smoothing as f64;
        let adx = if self.dx_count < self.smoothing {
            self.adx += dx / s;
            None
        } else if self.dx_count == self.smoothing {
            self.adx += dx / s;
            Some(self.adx)
        } else {
            self.adx = (self.adx * (s - 1.0) + dx) / s;
            Some(self.adx)
        };

        AdxValue {
            di_plus: Some(di_plus),
            di_minus: Some(di_minus),
            adx,
        }
    }
}

/// Calculate ADX with DI+/DI- over OHLC slices of equal length
pub fn adx(high: &[f64], low: &[f64], close: &[f64], period: usize, smoothing: usize) -> AdxOutput {
    let len = high.len().min(low.len()).min(close.len());
    let mut out = AdxOutput {
        di_plus: Vec::with_capacity(len),
        di_minus: Vec::with_capacity(len),
        adx: Vec::with_capacity(len),
    };
    if period == 0 || smoothing == 0 {
        out.di_plus = vec![None; len];
        out.di_minus = vec![None; len];
        out.adx = vec![None; len];
        return out;
    }

    let mut indicator = IncrementalAdx::new(period, smoothing);
    for i in 0..len {
        let v = indicator.next(high[i], low[i], close[i]);
        out.di_plus.push(v.di_plus);
        out.di_minus.push(v.di_minus);
        out.adx.push(v.adx);
    }
    out
}

// =============================================================================
// Volatility
// =============================================================================

/// Calculate Bollinger Bands (SMA ± mult × population stddev) and bandwidth
pub fn bollinger_bands(values: &[f64], period: usize, multiplier: f64) -> BollingerOutput {
    let len = values.len();
    let empty = || BollingerOutput {
        upper: vec![None; len],
        middle: vec![None; len],
        lower: vec![None; len],
        band_width: vec![None; len],
    };

    if period == 0 {
        return empty();
    }
    let mut indicator = match TaBB::new(period, multiplier) {
        Ok(i) => i,
        Err(_) => return empty(),
    };

    let mut out = BollingerOutput {
        upper: Vec::with_capacity(len),
        middle: Vec::with_capacity(len),
        lower: Vec::with_capacity(len),
        band_width: Vec::with_capacity(len),
    };

    for (i, &value) in values.iter().enumerate() {
        let bb = indicator.next(value);
        if i + 1 >= period {
            out.upper.push(Some(bb.upper));
            out.middle.push(Some(bb.average));
            out.lower.push(Some(bb.lower));
            out.band_width
                .push((bb.average != 0.0).then(|| (bb.upper - bb.lower) / bb.average));
        } else {
            out.upper.push(None);
            out.middle.push(None);
            out.lower.push(None);
            out.band_width.push(None);
        }
    }

    out
}

//! Indicator engine and strategy evaluation
//!
//! Turns a candle series into per-bar [`IndicatorSnapshot`]s, classifies the
//! regime of each bar and evaluates entry conditions on the latest one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::StrategyConfig;
use super::regime::RegimeClassifier;
use super::signals::{EntryConditions, SignalGenerator};
use crate::indicators;
use crate::{Candle, Regime, Side, Signal};

/// Indicator values for one candle. `None` means not enough history yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub ema_short: Option<f64>,
    pub ema_long: Option<f64>,
    pub rsi: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub adx: Option<f64>,
    pub di_plus: Option<f64>,
    pub di_minus: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_middle: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub band_width: Option<f64>,
    pub is_lateral: bool,
    pub trending: bool,
}

impl IndicatorSnapshot {
    pub fn regime(&self) -> Regime {
        Regime::from_lateral(self.is_lateral)
    }
}

/// Result of evaluating the latest bar
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub snapshot: IndicatorSnapshot,
    pub conditions: EntryConditions,
}

impl Evaluation {
    pub fn signal(&self) -> Signal {
        self.conditions.signal()
    }

    pub fn regime(&self) -> Regime {
        self.snapshot.regime()
    }
}

/// Parameterized engine shared by every account
#[derive(Debug, Clone)]
pub struct StrategyEngine {
    config: StrategyConfig,
    classifier: RegimeClassifier,
    signals: SignalGenerator,
}

impl StrategyEngine {
    pub fn new(config: StrategyConfig) -> Self {
        let classifier = RegimeClassifier::new(config.lateral_threshold, config.adx_threshold);
        let signals = SignalGenerator::new(&config);
        Self {
            config,
            classifier,
            signals,
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Compute snapshots for every candle
    pub fn snapshots(&self, candles: &[Candle]) -> Vec<IndicatorSnapshot> {
        let cfg = &self.config;
        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let low: Vec<f64> = candles.iter().map(|c| c.low).collect();

        let ema_short = indicators::ema(&close, cfg.ema_short);
        let ema_long = indicators::ema(&close, cfg.ema_long);
        let rsi = indicators::rsi(&close, cfg.rsi_period);
        let macd = indicators::macd(&close, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal);
        let adx = indicators::adx(&high, &low, &close, cfg.adx_period, cfg.adx_smoothing);
        let bb = indicators::bollinger_bands(&close, cfg.bb_period, cfg.bb_multiplier);

        candles
            .iter()
            .enumerate()
            .map(|(i, candle)| {
                let state = self.classifier.classify(bb.band_width[i], adx.adx[i]);
                IndicatorSnapshot {
                    timestamp: candle.datetime,
                    close: candle.close,
                    ema_short: ema_short[i],
                    ema_long: ema_long[i],
                    rsi: rsi[i],
                    macd_histogram: macd.histogram[i],
                    adx: adx.adx[i],
                    di_plus: adx.di_plus[i],
                    di_minus: adx.di_minus[i],
                    bollinger_upper: bb.upper[i],
                    bollinger_middle: bb.middle[i],
                    bollinger_lower: bb.lower[i],
                    band_width: bb.band_width[i],
                    is_lateral: state.is_lateral,
                    trending: state.trending,
                }
            })
            .collect()
    }

    /// Entry conditions at index `i` of a snapshot series
    pub fn conditions_at(&self, snapshots: &[IndicatorSnapshot], i: usize) -> EntryConditions {
        if i == 0 || i >= snapshots.len() {
            return EntryConditions::default();
        }
        self.signals.evaluate(&snapshots[i - 1], &snapshots[i])
    }

    /// Evaluate the most recent candle. `None` when fewer than two candles.
    pub fn evaluate(&self, candles: &[Candle]) -> Option<Evaluation> {
        if candles.len() < 2 {
            return None;
        }
        let mut snapshots = self.snapshots(candles);
        let i = snapshots.len() - 1;
        let conditions = self.conditions_at(&snapshots, i);
        let snapshot = snapshots.swap_remove(i);

        debug!(
            close = snapshot.close,
            ema_short = ?snapshot.ema_short,
            ema_long = ?snapshot.ema_long,
            rsi = ?snapshot.rsi,
            macd_hist = ?snapshot.macd_histogram,
            adx = ?snapshot.adx,
            band_width = ?snapshot.band_width,
            lateral = snapshot.is_lateral,
            trending = snapshot.trending,
            "Indicators updated"
        );

        Some(Evaluation {
            snapshot,
            conditions,
        })
    }

    /// `(stop_loss, take_profit)` for an entry in the given regime
    pub fn levels(&self, side: Side, regime: Regime, entry_price: f64) -> (f64, f64) {
        self.config.multipliers.levels(side, regime, entry_price)
    }
}

//! Regime-adaptive EMA crossover strategy
//!
//! Indicator engine → regime classifier → signal generator. Position
//! handling lives in [`crate::position`].

pub mod config;
pub mod engine;
pub mod regime;
pub mod signals;

pub use config::{RegimeMultipliers, StopTake, StrategyConfig};
pub use engine::{Evaluation, IndicatorSnapshot, StrategyEngine};
pub use regime::{RegimeClassifier, RegimeState};
pub use signals::{crossover, crossunder, EntryConditions, SignalGenerator};

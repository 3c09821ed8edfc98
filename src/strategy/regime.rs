//! Market regime classification
//!
//! Lateral and trending are independent flags: a market can be both narrow
//! and directional. The signal generator uses `is_lateral` to pick its branch
//! and `trending` as a gate.

use serde::{Deserialize, Serialize};

use crate::Regime;

/// Classification of a single bar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeState {
    pub is_lateral: bool,
    pub trending: bool,
}

impl RegimeState {
    pub fn regime(&self) -> Regime {
        Regime::from_lateral(self.is_lateral)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeClassifier {
    lateral_threshold: f64,
    adx_threshold: f64,
}

impl RegimeClassifier {
    pub fn new(lateral_threshold: f64, adx_threshold: f64) -> Self {
        Self {
            lateral_threshold,
            adx_threshold,
        }
    }

    /// Undefined bandwidth is not lateral; undefined ADX is not trending.
    pub fn is_lateral(&self, band_width: Option<f64>) -> bool {
        band_width.is_some_and(|bw| bw < self.lateral_threshold)
    }

    pub fn is_trending(&self, adx: Option<f64>) -> bool {
        adx.is_some_and(|a| a >= self.adx_threshold)
    }

    pub fn classify(&self, band_width: Option<f64>, adx: Option<f64>) -> RegimeState {
        RegimeState {
            is_lateral: self.is_lateral(band_width),
            trending: self.is_trending(adx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> RegimeClassifier {
        RegimeClassifier::new(0.005, 12.0)
    }

    #[test]
    fn test_lateral_threshold() {
        let c = classifier();
        assert!(c.is_lateral(Some(0.003)));
        assert!(!c.is_lateral(Some(0.01)));
        assert!(!c.is_lateral(Some(0.005)));
        assert!(!c.is_lateral(None));
    }

    #[test]
    fn test_trending_threshold() {
        let c = classifier();
        assert!(c.is_trending(Some(12.0)));
        assert!(c.is_trending(Some(20.0)));
        assert!(!c.is_trending(Some(11.9)));
        assert!(!c.is_trending(None));
    }

    #[test]
    fn test_flags_are_independent() {
        let c = classifier();
        let state = c.classify(Some(0.001), Some(30.0));
        assert!(state.is_lateral && state.trending);
        assert_eq!(state.regime(), Regime::Lateral);

        let state = c.classify(Some(0.02), Some(5.0));
        assert!(!state.is_lateral && !state.trending);
        assert_eq!(state.regime(), Regime::Trending);
    }
}

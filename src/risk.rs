//! Order sizing and trade accounting
//!
//! Position sizing formula:
//! ```text
//! quantity = floor(equity * balance_fraction * leverage / price / qty_step) * qty_step
//! ```
//!
//! Quantities are computed in `Decimal` so that flooring to the exchange step
//! never leaves binary float residue (0.019, not 0.018999999).

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

use crate::Side;

/// Configuration for PositionSizer using builder pattern
#[derive(Debug, Clone)]
pub struct SizingConfig {
    /// Fraction of equity committed per entry
    pub balance_fraction: f64,
    /// Exchange quantity increment
    pub qty_step: f64,
    /// Exchange minimum order quantity
    pub min_qty: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            balance_fraction: 0.98,
            qty_step: 0.001,
            min_qty: 0.001,
        }
    }
}

impl SizingConfig {
    pub fn with_balance_fraction(mut self, fraction: f64) -> Self {
        self.balance_fraction = fraction;
        self
    }

    pub fn with_qty_step(mut self, step: f64) -> Self {
        self.qty_step = step;
        self
    }

    pub fn with_min_qty(mut self, min_qty: f64) -> Self {
        self.min_qty = min_qty;
        self
    }

    pub fn build(self) -> PositionSizer {
        PositionSizer::from_config(self)
    }
}

/// Converts account equity into exchange-valid order quantities
#[derive(Debug, Clone)]
pub struct PositionSizer {
    balance_fraction: Decimal,
    qty_step: Decimal,
    min_qty: Decimal,
}

impl PositionSizer {
    pub fn from_config(config: SizingConfig) -> Self {
        PositionSizer {
            balance_fraction: to_decimal(config.balance_fraction).unwrap_or(dec!(1)),
            qty_step: to_decimal(config.qty_step)
                .filter(|s| *s > Decimal::ZERO)
                .unwrap_or(dec!(0.001)),
            min_qty: to_decimal(config.min_qty).unwrap_or(Decimal::ZERO),
        }
    }

    /// Entry quantity for `equity` at `price`.
    ///
    /// Returns `None` when the floored quantity is zero or below the exchange
    /// minimum; the caller must then skip the order.
    pub fn entry_quantity(&self, equity: f64, price: f64, leverage: f64) -> Option<Decimal> {
        if !(equity > 0.0 && price > 0.0 && leverage > 0.0) {
            return None;
        }
        let equity = to_decimal(equity)?;
        let price = to_decimal(price)?;
        let leverage = to_decimal(leverage)?;

        let raw = equity
            .checked_mul(self.balance_fraction)?
            .checked_mul(leverage)?
            .checked_div(price)?;
        self.floor_to_step(raw)
    }

    /// Floor an arbitrary quantity to the step; `None` if the result is not tradable
    pub fn floor_to_step(&self, quantity: Decimal) -> Option<Decimal> {
        let steps = quantity.checked_div(self.qty_step)?.floor();
        let qty = steps.checked_mul(self.qty_step)?.normalize();
        (qty > Decimal::ZERO && qty >= self.min_qty).then_some(qty)
    }

    /// Quantity for closing a position of `quantity` units
    pub fn exit_quantity(&self, quantity: f64) -> Option<Decimal> {
        // Round to the step so float noise from persistence does not shave a unit
        let steps = to_decimal(quantity)?.checked_div(self.qty_step)?.round();
        let qty = steps.checked_mul(self.qty_step)?.normalize();
        (qty > Decimal::ZERO).then_some(qty)
    }
}

fn to_decimal(value: f64) -> Option<Decimal> {
    Decimal::try_from(value).ok()
}

/// Gross profit of a round trip
pub fn gross_pnl(side: Side, entry_price: f64, exit_price: f64, quantity: f64) -> f64 {
    match side {
        Side::Long => (exit_price - entry_price) * quantity,
        Side::Short => (entry_price - exit_price) * quantity,
    }
}

/// Commission on both legs: (entry notional + exit notional) × rate
pub fn round_trip_commission(entry_price: f64, exit_price: f64, quantity: f64, rate: f64) -> f64 {
    (entry_price * quantity + exit_price * quantity) * rate
}

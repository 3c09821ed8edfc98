//! Backtesting engine
//!
//! Replays a candle series through the strategy engine with the same
//! position rules as the live loop:
//!
//! - entries fill at the signal bar's close, sized from simulated equity;
//! - stop/take are checked intra-bar against high/low on later bars, and a
//!   bar that touches both counts as a take-profit;
//! - a regime change re-levels stop/take from the entry price;
//! - an opposite signal closes at the close (and optionally reverses).
//!
//! Commission is charged on both legs.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::risk::{gross_pnl, round_trip_commission, PositionSizer};
use crate::strategy::{EntryConditions, IndicatorSnapshot, StrategyEngine};
use crate::{Candle, ExitReason, Regime, Side};

#[derive(Debug, Clone)]
pub struct BacktestSettings {
    pub initial_balance: f64,
    pub commission_rate: f64,
    pub reopen_on_reversal: bool,
}

/// One closed round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub side: Side,
    pub entry_regime: Regime,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub exit_reason: ExitReason,
    pub gross_pnl: f64,
    pub commission: f64,
    pub net_pnl: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BacktestSummary {
    pub initial_balance: f64,
    pub final_balance: f64,
    pub total_profit: f64,
    pub total_return: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Percent of trades with positive net PnL
    pub win_rate: f64,
    pub profit_factor: f64,
    /// Percent, on closed-trade equity
    pub max_drawdown: f64,
}

#[derive(Debug, Default)]
pub struct BacktestResult {
    pub trades: Vec<BacktestTrade>,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
    pub summary: BacktestSummary,
}

#[derive(Debug, Clone)]
struct OpenTrade {
    side: Side,
    entry_regime: Regime,
    regime: Regime,
    entry_time: DateTime<Utc>,
    entry_price: f64,
    quantity: f64,
    stop_loss: f64,
    take_profit: f64,
}

/// Intra-bar exit for a position with the given levels.
///
/// Take-profit wins when the bar reaches both levels.
pub fn intrabar_exit(
    side: Side,
    stop_loss: f64,
    take_profit: f64,
    candle: &Candle,
) -> Option<(ExitReason, f64)> {
    let (hit_stop, hit_take) = match side {
        Side::Long => (candle.low <= stop_loss, candle.high >= take_profit),
        Side::Short => (candle.high >= stop_loss, candle.low <= take_profit),
    };
    if hit_take {
        Some((ExitReason::TakeProfit, take_profit))
    } else if hit_stop {
        Some((ExitReason::StopLoss, stop_loss))
    } else {
        None
    }
}

/// Backtest engine
pub struct Backtester {
    engine: StrategyEngine,
    sizer: PositionSizer,
    settings: BacktestSettings,
}

impl Backtester {
    pub fn new(engine: StrategyEngine, sizer: PositionSizer, settings: BacktestSettings) -> Self {
        Backtester {
            engine,
            sizer,
            settings,
        }
    }

    /// Compute indicators over `candles` and replay them
    pub fn run(&self, candles: &[Candle]) -> BacktestResult {
        let snapshots = self.engine.snapshots(candles);
        let conditions: Vec<EntryConditions> = (0..snapshots.len())
            .map(|i| self.engine.conditions_at(&snapshots, i))
            .collect();
        self.replay(candles, &snapshots, &conditions)
    }

    /// Replay precomputed snapshots and entry conditions (one per candle)
    pub fn replay(
        &self,
        candles: &[Candle],
        snapshots: &[IndicatorSnapshot],
        conditions: &[EntryConditions],
    ) -> BacktestResult {
        let n = candles.len().min(snapshots.len()).min(conditions.len());
        let mut equity = self.settings.initial_balance;
        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(n);
        let mut open: Option<OpenTrade> = None;

        for i in 0..n {
            let candle = &candles[i];
            let regime = snapshots[i].regime();

            if let Some(trade) = open.as_mut() {
                if let Some((reason, price)) =
                    intrabar_exit(trade.side, trade.stop_loss, trade.take_profit, candle)
                {
                    let closed = self.close(trade, price, candle.datetime, reason);
                    equity += closed.net_pnl;
                    trades.push(closed);
                    open = None;
                    equity_curve.push((candle.datetime, equity));
                    continue;
                }

                if trade.regime != regime {
                    let (stop, take) = self
                        .engine
                        .levels(trade.side, regime, trade.entry_price);
                    debug!(time = %candle.datetime, %regime, stop, take, "Re-levelled");
                    trade.regime = regime;
                    trade.stop_loss = stop;
                    trade.take_profit = take;
                }
            }

            if let Some(side) = conditions[i].signal().side() {
                match open.as_ref() {
                    Some(trade) if trade.side == side => {}
                    Some(trade) => {
                        let closed =
                            self.close(trade, candle.close, candle.datetime, ExitReason::Reversal);
                        equity += closed.net_pnl;
                        trades.push(closed);
                        open = None;
                        if self.settings.reopen_on_reversal {
                            open = self.open(side, regime, candle, equity);
                        }
                    }
                    None => open = self.open(side, regime, candle, equity),
                }
            }

            equity_curve.push((candle.datetime, equity));
        }

        // Mark any remaining position to the last close
        if let (Some(trade), Some(last)) = (open.as_ref(), candles[..n].last()) {
            let closed = self.close(trade, last.close, last.datetime, ExitReason::Manual);
            equity += closed.net_pnl;
            trades.push(closed);
            if let Some(point) = equity_curve.last_mut() {
                point.1 = equity;
            }
        }

        let summary = summarize(self.settings.initial_balance, equity, &trades, &equity_curve);
        info!(
            trades = summary.total_trades,
            profit = summary.total_profit,
            win_rate = summary.win_rate,
            "Backtest finished"
        );

        BacktestResult {
            trades,
            equity_curve,
            summary,
        }
    }

    fn open(&self, side: Side, regime: Regime, candle: &Candle, equity: f64) -> Option<OpenTrade> {
        let quantity = self
            .sizer
            .entry_quantity(equity, candle.close, 1.0)
            .and_then(|q| q.to_f64())?;
        let (stop_loss, take_profit) = self.engine.levels(side, regime, candle.close);
        debug!(time = %candle.datetime, %side, price = candle.close, quantity, "Entry");
        Some(OpenTrade {
            side,
            entry_regime: regime,
            regime,
            entry_time: candle.datetime,
            entry_price: candle.close,
            quantity,
            stop_loss,
            take_profit,
        })
    }

    fn close(
        &self,
        trade: &OpenTrade,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        exit_reason: ExitReason,
    ) -> BacktestTrade {
        let gross = gross_pnl(trade.side, trade.entry_price, exit_price, trade.quantity);
        let commission = round_trip_commission(
            trade.entry_price,
            exit_price,
            trade.quantity,
            self.settings.commission_rate,
        );
        BacktestTrade {
            side: trade.side,
            entry_regime: trade.entry_regime,
            entry_time: trade.entry_time,
            exit_time,
            entry_price: trade.entry_price,
            exit_price,
            quantity: trade.quantity,
            stop_loss: trade.stop_loss,
            take_profit: trade.take_profit,
            exit_reason,
            gross_pnl: gross,
            commission,
            net_pnl: gross - commission,
        }
    }
}

fn summarize(
    initial_balance: f64,
    final_balance: f64,
    trades: &[BacktestTrade],
    equity_curve: &[(DateTime<Utc>, f64)],
) -> BacktestSummary {
    let winning = trades.iter().filter(|t| t.net_pnl > 0.0).count();
    let gross_profits: f64 = trades.iter().map(|t| t.net_pnl).filter(|p| *p > 0.0).sum();
    let gross_losses: f64 = trades
        .iter()
        .map(|t| t.net_pnl)
        .filter(|p| *p <= 0.0)
        .map(f64::abs)
        .sum();

    let profit_factor = if gross_losses > 0.0 {
        gross_profits / gross_losses
    } else if gross_profits > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let mut peak = initial_balance;
    let mut max_dd = 0.0_f64;
    for (_, equity) in equity_curve {
        peak = peak.max(*equity);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - equity) / peak);
        }
    }

    let total_profit = final_balance - initial_balance;
    BacktestSummary {
        initial_balance,
        final_balance,
        total_profit,
        total_return: if initial_balance > 0.0 {
            total_profit / initial_balance * 100.0
        } else {
            0.0
        },
        total_trades: trades.len(),
        winning_trades: winning,
        losing_trades: trades.len() - winning,
        win_rate: if trades.is_empty() {
            0.0
        } else {
            winning as f64 / trades.len() as f64 * 100.0
        },
        profit_factor,
        max_drawdown: max_dd * 100.0,
    }
}

/// Write the trade list as CSV
pub fn write_trades_csv(path: impl AsRef<Path>, trades: &[BacktestTrade]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())
        .with_context(|| format!("Failed to create {}", path.as_ref().display()))?;
    for trade in trades {
        writer.serialize(trade)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::SizingConfig;
    use crate::strategy::StrategyConfig;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            datetime: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i),
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    fn backtester(commission_rate: f64) -> Backtester {
        Backtester::new(
            StrategyEngine::new(StrategyConfig::default()),
            SizingConfig::default()
                .with_balance_fraction(1.0)
                .with_qty_step(0.001)
                .build(),
            BacktestSettings {
                initial_balance: 1000.0,
                commission_rate,
                reopen_on_reversal: true,
            },
        )
    }

    fn trending(n: usize) -> Vec<IndicatorSnapshot> {
        vec![IndicatorSnapshot::default(); n]
    }

    fn signals(n: usize, at: &[(usize, Side)]) -> Vec<EntryConditions> {
        let mut out = vec![EntryConditions::default(); n];
        for (i, side) in at {
            out[*i] = EntryConditions {
                long: *side == Side::Long,
                short: *side == Side::Short,
            };
        }
        out
    }

    #[test]
    fn test_intrabar_take_profit_wins() {
        let candle = bar(0, 100.0, 140.0, 80.0, 100.0);
        assert_eq!(
            intrabar_exit(Side::Long, 92.0, 132.0, &candle),
            Some((ExitReason::TakeProfit, 132.0))
        );
        assert_eq!(
            intrabar_exit(Side::Short, 112.0, 77.0, &bar(0, 100.0, 120.0, 70.0, 100.0)),
            Some((ExitReason::TakeProfit, 77.0))
        );
        assert_eq!(
            intrabar_exit(Side::Long, 92.0, 132.0, &bar(0, 100.0, 101.0, 91.0, 95.0)),
            Some((ExitReason::StopLoss, 92.0))
        );
        assert_eq!(
            intrabar_exit(Side::Long, 92.0, 132.0, &bar(0, 100.0, 101.0, 99.0, 100.0)),
            None
        );
    }

    #[test]
    fn test_long_take_profit_trade() {
        let candles = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(1, 100.0, 105.0, 98.0, 104.0),
            bar(2, 104.0, 133.0, 103.0, 130.0),
        ];
        let result = backtester(0.0).replay(
            &candles,
            &trending(3),
            &signals(3, &[(0, Side::Long)]),
        );

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert_relative_eq!(trade.exit_price, 132.0, epsilon = 1e-9);
        assert_relative_eq!(trade.quantity, 10.0, epsilon = 1e-9);
        assert_relative_eq!(result.summary.total_profit, 320.0, epsilon = 1e-6);
        assert_eq!(result.summary.win_rate, 100.0);
        assert_eq!(result.equity_curve.len(), 3);
    }

    #[test]
    fn test_short_stop_with_commission() {
        let candles = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(1, 100.0, 113.0, 99.0, 110.0),
        ];
        let result = backtester(0.001).replay(
            &candles,
            &trending(2),
            &signals(2, &[(0, Side::Short)]),
        );

        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_relative_eq!(trade.exit_price, 112.0, epsilon = 1e-9);
        // 1000 / 100 = 10 units, loss 120, commission (1000 + 1120) * 0.001
        assert_relative_eq!(trade.gross_pnl, -120.0, epsilon = 1e-6);
        assert_relative_eq!(trade.commission, 2.12, epsilon = 1e-9);
        assert_relative_eq!(result.summary.final_balance, 877.88, epsilon = 1e-6);
        assert_eq!(result.summary.losing_trades, 1);
        assert_eq!(result.summary.win_rate, 0.0);
    }

    #[test]
    fn test_reversal_and_end_of_data() {
        let candles = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(1, 100.0, 106.0, 99.0, 105.0),
            bar(2, 105.0, 106.0, 104.0, 105.0),
        ];
        let result = backtester(0.0).replay(
            &candles,
            &trending(3),
            &signals(3, &[(0, Side::Long), (1, Side::Short)]),
        );

        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].exit_reason, ExitReason::Reversal);
        assert_relative_eq!(result.trades[0].net_pnl, 50.0, epsilon = 1e-6);
        assert_eq!(result.trades[1].side, Side::Short);
        assert_eq!(result.trades[1].exit_reason, ExitReason::Manual);
    }

    #[test]
    fn test_regime_change_relevels() {
        let candles = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            // Trending stop is 92; lateral stop is 97.3
            bar(1, 100.0, 101.0, 97.0, 98.0),
        ];
        let mut snaps = trending(2);
        snaps[1].is_lateral = true;
        let result = backtester(0.0).replay(&candles, &snaps, &signals(2, &[(0, Side::Long)]));

        // Re-levelled on bar 1, stop is hit on the next bar only; bar 1 ends
        // the data so the trade is marked to close.
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::Manual);
        assert_relative_eq!(trade.stop_loss, 97.3, epsilon = 1e-9);
        assert_relative_eq!(trade.take_profit, 111.0, epsilon = 1e-9);
    }

    #[test]
    fn test_engine_run_is_deterministic() {
        let candles: Vec<Candle> = (0..120)
            .map(|i| {
                let c = 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.1;
                bar(i, c, c + 1.0, c - 1.0, c)
            })
            .collect();
        let bt = backtester(0.0006);
        let a = bt.run(&candles);
        let b = bt.run(&candles);
        assert_eq!(a.trades, b.trades);
        assert_eq!(a.summary, b.summary);
    }

    #[test]
    fn test_write_trades_csv() {
        let candles = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(1, 100.0, 140.0, 99.0, 130.0),
        ];
        let result = backtester(0.0).replay(&candles, &trending(2), &signals(2, &[(0, Side::Long)]));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.csv");
        write_trades_csv(&path, &result.trades).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("side,entry_regime,entry_time"));
        assert_eq!(text.lines().count(), 2);
    }
}

//! Backtest command implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use regime_trader::backtest::{write_trades_csv, BacktestSettings, Backtester};
use regime_trader::data::{self, timeframe_duration};
use regime_trader::strategy::StrategyEngine;
use regime_trader::Config;

pub fn run(
    config_path: String,
    data_path: PathBuf,
    output: Option<PathBuf>,
    capital_override: Option<f64>,
) -> Result<()> {
    info!("Starting backtest");

    let mut config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(capital) = capital_override {
        info!("Overriding initial balance to: {:.2}", capital);
        config.trading.initial_balance = capital;
    }

    let candles = data::load_csv(&data_path)?;
    if let Some(interval) = timeframe_duration(&config.trading.timeframe) {
        let issues = data::check_continuity(&candles, interval);
        if issues > 0 {
            warn!("{} continuity issue(s) in {}", issues, data_path.display());
        }
    }

    let warmup = config.strategy.warmup_candles();
    if candles.len() <= warmup {
        anyhow::bail!(
            "Need more than {} candles for indicator warmup, got {}",
            warmup,
            candles.len()
        );
    }

    let backtester = Backtester::new(
        StrategyEngine::new(config.strategy.clone()),
        config.sizer(),
        BacktestSettings {
            initial_balance: config.trading.initial_balance,
            commission_rate: config.trading.commission_rate,
            reopen_on_reversal: config.trading.reopen_on_reversal,
        },
    );

    info!("Running backtest on {} candles...", candles.len());
    let result = backtester.run(&candles);
    let s = &result.summary;

    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS - {} {}", config.symbol(), config.trading.timeframe);
    println!("{}", "=".repeat(60));
    println!("Initial Balance:    {:.2}", s.initial_balance);
    println!("Final Balance:      {:.2}", s.final_balance);
    println!("Total Profit:       {:.2}", s.total_profit);
    println!("Total Return:       {:.2}%", s.total_return);
    println!("Number of Trades:   {}", s.total_trades);
    println!("Winning Trades:     {}", s.winning_trades);
    println!("Losing Trades:      {}", s.losing_trades);
    println!("Win Rate:           {:.2}%", s.win_rate);
    println!("Profit Factor:      {:.2}", s.profit_factor);
    println!("Max Drawdown:       {:.2}%", s.max_drawdown);
    println!("{}", "=".repeat(60));

    if let Some(path) = output {
        write_trades_csv(&path, &result.trades)?;
        info!("Trades written to {}", path.display());
    }

    info!("Backtest completed successfully");
    Ok(())
}

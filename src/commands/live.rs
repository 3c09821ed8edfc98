//! Live trading command
//!
//! Builds one account context per enabled account, recovers open positions
//! from the trade logs and runs the polling loop until Ctrl+C.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use regime_trader::data::timeframe_duration;
use regime_trader::position::PositionManager;
use regime_trader::strategy::StrategyEngine;
use regime_trader::trade_log::TradeLog;
use regime_trader::trader::{AccountContext, LiveTrader, TraderSettings};
use regime_trader::{Broker, Config};

use super::{build_runtime, live_brokers, paper_brokers};

pub fn run(config_path: String, paper: bool, live: bool) -> Result<()> {
    if !paper && !live {
        anyhow::bail!("Must specify either --paper or --live mode");
    }

    if live && paper {
        anyhow::bail!("Cannot specify both --paper and --live modes");
    }

    let runtime = build_runtime()?;
    runtime.block_on(run_async(config_path, paper))
}

async fn run_async(config_path: String, paper_mode: bool) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    let mode_str = if paper_mode { "PAPER" } else { "LIVE" };
    info!("Regime trader - {} mode", mode_str);
    info!("  Symbol:    {}", config.symbol());
    info!("  Timeframe: {}", config.trading.timeframe);
    info!(
        "  Accounts:  {}",
        config
            .accounts
            .iter()
            .filter(|a| a.enabled)
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    info!(
        "  Lateral entries require ADX trend: {}",
        config.strategy.lateral_requires_trend
    );

    if paper_mode {
        let brokers = paper_brokers(&config)?;
        trade(config, brokers).await
    } else {
        let brokers = live_brokers(&config)?;

        warn!("LIVE TRADING MODE - REAL MONEY AT RISK!");
        warn!("Press Ctrl+C within 10 seconds to abort...");
        for i in (1..=10).rev() {
            info!("Starting in {} seconds...", i);
            sleep(Duration::from_secs(1)).await;
        }

        trade(config, brokers).await
    }
}

async fn trade<B: Broker>(config: Config, brokers: Vec<(String, B)>) -> Result<()> {
    let candle_interval = timeframe_duration(&config.trading.timeframe)
        .with_context(|| format!("Unsupported timeframe {}", config.trading.timeframe))?;

    let accounts = brokers
        .into_iter()
        .map(|(name, broker)| {
            let journal = TradeLog::new(config.trade_log_path(&name));
            info!(account = %name, path = %journal.path().display(), "Trade log");
            let manager = PositionManager::new(config.manager_settings(), config.sizer());
            AccountContext::new(name, broker, journal, manager)
        })
        .collect();

    let settings = TraderSettings {
        symbol: config.symbol(),
        timeframe: config.trading.timeframe.clone(),
        candle_interval,
        candle_limit: config.trading.candle_limit,
        poll_interval: Duration::from_secs(config.trading.poll_interval_secs.max(1)),
        retry_delay: Duration::from_secs(config.trading.retry_delay_secs),
    };

    let engine = StrategyEngine::new(config.strategy.clone());
    let mut trader = LiveTrader::new(engine, settings, accounts)?;
    trader.recover().await?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                let _ = shutdown_tx.send(()).await;
            }
            Err(e) => error!("Error setting up signal handler: {}", e),
        }
    });

    trader.run(shutdown_rx).await
}

//! Command implementations

pub mod backtest;
pub mod live;
pub mod webhook;

use anyhow::{Context, Result};
use tracing::info;

use regime_trader::bybit::BybitClient;
use regime_trader::{Config, PaperBroker};

pub(crate) fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}

/// One authenticated client per enabled account.
///
/// Missing credentials are fatal.
pub(crate) fn live_brokers(config: &Config) -> Result<Vec<(String, BybitClient)>> {
    config
        .accounts
        .iter()
        .filter(|a| a.enabled)
        .map(|account| {
            let credentials = account.credentials()?;
            let client =
                BybitClient::with_credentials(credentials, config.exchange.client_config())
                    .with_context(|| format!("Failed to create client for {}", account.name))?;
            info!(account = %account.name, "Account ready");
            Ok::<_, anyhow::Error>((account.name.clone(), client))
        })
        .collect()
}

/// Simulated accounts trading on public market data
pub(crate) fn paper_brokers(config: &Config) -> Result<Vec<(String, PaperBroker<BybitClient>)>> {
    config
        .accounts
        .iter()
        .filter(|a| a.enabled)
        .map(|account| {
            let client = BybitClient::public(config.exchange.client_config())
                .context("Failed to create market data client")?;
            let broker = PaperBroker::new(
                client,
                config.trading.initial_balance,
                config.trading.commission_rate,
            );
            info!(
                account = %account.name,
                balance = config.trading.initial_balance,
                "Paper account ready"
            );
            Ok::<_, anyhow::Error>((account.name.clone(), broker))
        })
        .collect()
}

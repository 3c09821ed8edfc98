//! Webhook server command

use anyhow::{Context, Result};
use tracing::{info, warn};

use regime_trader::webhook::{serve, WebhookAccount, WebhookState};
use regime_trader::{Broker, Config};

use super::{build_runtime, live_brokers, paper_brokers};

pub fn run(config_path: String, bind: Option<String>, paper: bool) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    let secret = config.webhook_secret()?;
    let bind = bind.unwrap_or_else(|| config.webhook.bind.clone());

    let runtime = build_runtime()?;
    runtime.block_on(async move {
        if paper {
            info!("Webhook alerts execute against paper accounts");
            let brokers = paper_brokers(&config)?;
            start(&config, secret, &bind, brokers).await
        } else {
            warn!("Webhook alerts execute against LIVE accounts");
            let brokers = live_brokers(&config)?;
            start(&config, secret, &bind, brokers).await
        }
    })
}

async fn start<B: Broker + 'static>(
    config: &Config,
    secret: String,
    bind: &str,
    brokers: Vec<(String, B)>,
) -> Result<()> {
    let accounts = brokers
        .into_iter()
        .map(|(name, broker)| WebhookAccount { name, broker })
        .collect();
    let state = WebhookState::new(
        secret,
        config.symbol(),
        config.webhook.clone(),
        config.sizer(),
        config.trading.order_retries,
        accounts,
    );
    serve(bind, state).await
}

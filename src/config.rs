//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files. Secrets never
//! live in the file: API credentials, the webhook secret and an optional
//! trade log override come from the environment (`.env` is loaded first).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bybit::{ClientConfig, Credentials, MAINNET_URL, TESTNET_URL};
use crate::error::ConfigError;
use crate::position::{ManagerSettings, MAX_ORDER_RETRIES};
use crate::risk::{PositionSizer, SizingConfig};
use crate::strategy::StrategyConfig;
use crate::trade_log::path_for_account;
use crate::Symbol;

pub const ENV_WEBHOOK_SECRET: &str = "WEBHOOK_SECRET";
pub const ENV_TRADE_LOG_PATH: &str = "TRADE_LOG_PATH";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub strategy: StrategyConfig,
    pub accounts: Vec<AccountConfig>,
    pub webhook: WebhookConfig,
}

impl Config {
    /// Load configuration from JSON file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        if let Ok(log_path) = std::env::var(ENV_TRADE_LOG_PATH) {
            if !log_path.is_empty() {
                config.trading.trade_log_path = PathBuf::from(log_path);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy.validate()?;
        if self.accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }
        let t = &self.trading;
        if !(t.balance_fraction > 0.0 && t.balance_fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "balance_fraction must be in (0, 1], got {}",
                t.balance_fraction
            )));
        }
        if t.qty_step <= 0.0 {
            return Err(ConfigError::Invalid("qty_step must be > 0".into()));
        }
        if t.order_retries > MAX_ORDER_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "order_retries must be 0..={}",
                MAX_ORDER_RETRIES
            )));
        }
        if crate::data::timeframe_duration(&t.timeframe).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unsupported timeframe {}",
                t.timeframe
            )));
        }
        Ok(())
    }

    pub fn symbol(&self) -> Symbol {
        Symbol::new(&self.trading.symbol)
    }

    /// Shared webhook secret from the environment
    pub fn webhook_secret(&self) -> Result<String, ConfigError> {
        std::env::var(ENV_WEBHOOK_SECRET)
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingEnv(ENV_WEBHOOK_SECRET.to_string()))
    }

    pub fn sizer(&self) -> PositionSizer {
        SizingConfig::default()
            .with_balance_fraction(self.trading.balance_fraction)
            .with_qty_step(self.trading.qty_step)
            .with_min_qty(self.trading.min_qty)
            .build()
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            symbol: self.symbol(),
            timeframe: self.trading.timeframe.clone(),
            setup: self.trading.setup.clone(),
            commission_rate: self.trading.commission_rate,
            order_retries: self.trading.order_retries,
            reopen_on_reversal: self.trading.reopen_on_reversal,
            multipliers: self.strategy.multipliers.clone(),
        }
    }

    /// Trade log file for one account
    pub fn trade_log_path(&self, account: &str) -> PathBuf {
        path_for_account(&self.trading.trade_log_path, account)
    }
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub testnet: bool,
    /// Overrides the mainnet/testnet URL when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub category: String,
    pub recv_window_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            testnet: false,
            base_url: None,
            category: "linear".to_string(),
            recv_window_ms: 5000,
            timeout_secs: 10,
        }
    }
}

impl ExchangeConfig {
    pub fn client_config(&self) -> ClientConfig {
        let base_url = self.base_url.clone().unwrap_or_else(|| {
            if self.testnet {
                TESTNET_URL.to_string()
            } else {
                MAINNET_URL.to_string()
            }
        });
        let mut cfg = ClientConfig::default()
            .with_base_url(base_url)
            .with_recv_window(self.recv_window_ms)
            .with_timeout(Duration::from_secs(self.timeout_secs.max(1)));
        cfg.category = self.category.clone();
        cfg
    }
}

/// Trading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub symbol: String,
    pub timeframe: String,
    /// Label written to the `setup` column of the trade log
    pub setup: String,
    /// Fraction of equity per entry
    pub balance_fraction: f64,
    pub qty_step: f64,
    pub min_qty: f64,
    /// Commission per leg as a fraction of notional
    pub commission_rate: f64,
    /// Immediate retries after a failed order (0..=3)
    pub order_retries: u32,
    pub reopen_on_reversal: bool,
    /// Candles kept per symbol
    pub candle_limit: usize,
    pub poll_interval_secs: u64,
    /// Pause after a failed loop iteration
    pub retry_delay_secs: u64,
    /// Base path; the account name is inserted before the extension
    pub trade_log_path: PathBuf,
    /// Starting equity for paper trading and backtests
    pub initial_balance: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            symbol: "BTCUSDT".to_string(),
            timeframe: "1h".to_string(),
            setup: "GPTAN".to_string(),
            balance_fraction: 0.98,
            qty_step: 0.001,
            min_qty: 0.001,
            commission_rate: 0.0006,
            order_retries: 0,
            reopen_on_reversal: true,
            candle_limit: 200,
            poll_interval_secs: 1,
            retry_delay_secs: 5,
            trade_log_path: PathBuf::from("trade_history.csv"),
            initial_balance: 1000.0,
        }
    }
}

/// One trading account; credentials come from
/// `BYBIT_API_KEY_<NAME>` / `BYBIT_API_SECRET_<NAME>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl AccountConfig {
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        Credentials::from_env(&self.name)
    }
}

/// Webhook server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub bind: String,
    /// Used when an alert omits `leverage`
    pub default_leverage: f64,
    pub max_leverage: f64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        WebhookConfig {
            bind: "0.0.0.0:5000".to_string(),
            default_leverage: 1.0,
            max_leverage: 10.0,
        }
    }
}

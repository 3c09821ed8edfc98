//! Alert webhook
//!
//! `POST /webhook` takes `{secret, action, symbol, leverage}` and runs the
//! action on every account in order. `GET /` answers a liveness probe.
//!
//! Positions are taken from the broker, not from a local state machine: an
//! alert for the opposite side closes the open position (reduce-only) and
//! then opens the new side, a same-side alert is ignored, `exit` closes
//! whatever is open.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::broker::{Broker, OrderRequest};
use crate::bybit::auth::constant_time_eq;
use crate::config::WebhookConfig;
use crate::error::BrokerResult;
use crate::position::submit_order;
use crate::risk::PositionSizer;
use crate::{Side, Symbol};

/// Alert body. Every field is optional and a field of the wrong JSON type
/// reads as missing, so a bad secret is reported before anything else is
/// looked at.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookAlert {
    #[serde(default, deserialize_with = "string_or_empty")]
    pub secret: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub action: String,
    #[serde(default, deserialize_with = "string_or_none")]
    pub symbol: Option<String>,
    #[serde(default)]
    pub leverage: Option<Leverage>,
}

/// Leverage as sent by the alert source: a number or a numeric string
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Leverage {
    Number(f64),
    Text(String),
    Other(Value),
}

impl Leverage {
    pub fn value(&self) -> Option<f64> {
        match self {
            Leverage::Number(n) => Some(*n),
            Leverage::Text(s) => s.trim().parse().ok(),
            Leverage::Other(_) => None,
        }
    }
}

fn string_or_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(string_or_none(deserializer)?.unwrap_or_default())
}

fn string_or_none<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookAction {
    Open(Side),
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid action '{0}'")]
pub struct ParseActionError(String);

impl FromStr for WebhookAction {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" => Ok(WebhookAction::Open(Side::Long)),
            "short" => Ok(WebhookAction::Open(Side::Short)),
            "exit" | "close" => Ok(WebhookAction::Exit),
            _ => Err(ParseActionError(s.to_string())),
        }
    }
}

impl fmt::Display for WebhookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebhookAction::Open(side) => write!(f, "{}", side),
            WebhookAction::Exit => write!(f, "exit"),
        }
    }
}

/// What an alert did on one account
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    Opened { side: Side, quantity: String },
    Reversed { side: Side, quantity: String },
    AlreadyOpen { side: Side },
    Closed { side: Side },
    NothingToClose,
    /// Equity too small for the minimum order size
    Skipped,
}

pub struct WebhookAccount<B> {
    pub name: String,
    pub broker: B,
}

/// Shared state behind the router
pub struct WebhookState<B> {
    secret: String,
    default_symbol: Symbol,
    config: WebhookConfig,
    sizer: PositionSizer,
    order_retries: u32,
    accounts: Vec<WebhookAccount<B>>,
    // Alerts run one at a time
    gate: Mutex<()>,
}

impl<B: Broker> WebhookState<B> {
    pub fn new(
        secret: impl Into<String>,
        default_symbol: Symbol,
        config: WebhookConfig,
        sizer: PositionSizer,
        order_retries: u32,
        accounts: Vec<WebhookAccount<B>>,
    ) -> Self {
        Self {
            secret: secret.into(),
            default_symbol,
            config,
            sizer,
            order_retries,
            accounts,
            gate: Mutex::new(()),
        }
    }

    pub fn accounts(&self) -> &[WebhookAccount<B>] {
        &self.accounts
    }

    /// Validate and execute one alert; returns the HTTP status and body
    pub async fn dispatch(&self, alert: WebhookAlert) -> (StatusCode, Value) {
        let started = Instant::now();

        if !constant_time_eq(alert.secret.as_bytes(), self.secret.as_bytes()) {
            warn!("Webhook rejected: authentication failed");
            return (
                StatusCode::FORBIDDEN,
                json!({ "message": "Authentication failed" }),
            );
        }

        let action = match alert.action.parse::<WebhookAction>() {
            Ok(action) => action,
            Err(e) => {
                warn!("Webhook rejected: {}", e);
                return (StatusCode::BAD_REQUEST, json!({ "message": "Invalid action" }));
            }
        };

        let leverage = match &alert.leverage {
            None => self.config.default_leverage,
            Some(raw) => match raw.value() {
                Some(value) => value,
                None => {
                    warn!(?raw, "Webhook rejected: leverage is not a number");
                    return (StatusCode::BAD_REQUEST, json!({ "message": "Invalid leverage" }));
                }
            },
        };
        if !(leverage.is_finite() && leverage > 0.0 && leverage <= self.config.max_leverage) {
            warn!(leverage, "Webhook rejected: leverage out of range");
            return (StatusCode::BAD_REQUEST, json!({ "message": "Invalid leverage" }));
        }

        let symbol = alert
            .symbol
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(Symbol::new)
            .unwrap_or_else(|| self.default_symbol.clone());

        info!(action = %action, symbol = %symbol, leverage, "Webhook alert received");

        let _guard = self.gate.lock().await;
        let mut failed = 0usize;
        for account in &self.accounts {
            match self.execute(&account.broker, action, &symbol, leverage).await {
                Ok(outcome) => {
                    info!(account = %account.name, symbol = %symbol, ?outcome, "Alert executed")
                }
                Err(e) => {
                    failed += 1;
                    error!(account = %account.name, symbol = %symbol, "Alert failed: {}", e);
                }
            }
        }

        let message = if failed == 0 {
            "Action executed".to_string()
        } else {
            format!("Action executed, {} account(s) failed", failed)
        };
        let latency = started.elapsed().as_secs_f64();
        (StatusCode::OK, json!({ "message": message, "latency": latency }))
    }

    /// Run `action` against one broker
    pub async fn execute(
        &self,
        broker: &B,
        action: WebhookAction,
        symbol: &Symbol,
        leverage: f64,
    ) -> BrokerResult<AlertOutcome> {
        let current = broker.open_position(symbol).await?;

        let side = match action {
            WebhookAction::Exit => {
                return match current {
                    Some(position) => {
                        self.close(broker, symbol, position.side, position.size).await?;
                        Ok(AlertOutcome::Closed {
                            side: position.side,
                        })
                    }
                    None => Ok(AlertOutcome::NothingToClose),
                };
            }
            WebhookAction::Open(side) => side,
        };

        let reversed = match current {
            Some(position) if position.side == side => {
                info!(symbol = %symbol, side = %side, "Position already open, ignoring alert");
                return Ok(AlertOutcome::AlreadyOpen { side });
            }
            Some(position) => {
                self.close(broker, symbol, position.side, position.size).await?;
                true
            }
            None => false,
        };

        let price = broker.latest_price(symbol).await?;
        let equity = broker.wallet_equity().await?;
        let Some(quantity) = self.sizer.entry_quantity(equity, price, leverage) else {
            warn!(symbol = %symbol, equity, price, "Order quantity below exchange minimum");
            return Ok(AlertOutcome::Skipped);
        };

        let order = OrderRequest::open(symbol.clone(), side, quantity);
        submit_order(broker, &order, self.order_retries).await?;

        let quantity = quantity.to_string();
        Ok(if reversed {
            AlertOutcome::Reversed { side, quantity }
        } else {
            AlertOutcome::Opened { side, quantity }
        })
    }

    async fn close(&self, broker: &B, symbol: &Symbol, side: Side, size: f64) -> BrokerResult<()> {
        let Some(quantity) = self.sizer.exit_quantity(size) else {
            return Err(crate::error::BrokerError::data(format!(
                "invalid position size {}",
                size
            )));
        };
        let order = OrderRequest::close(symbol.clone(), side, quantity);
        submit_order(broker, &order, self.order_retries).await?;
        info!(symbol = %symbol, side = %side, qty = %quantity, "Position closed");
        Ok(())
    }
}

async fn handle_webhook<B: Broker + 'static>(
    State(state): State<Arc<WebhookState<B>>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    // A body that is not an object carries no secret
    let alert = serde_json::from_value(body).unwrap_or_default();
    let (status, body) = state.dispatch(alert).await;
    (status, Json(body))
}

async fn liveness() -> Json<Value> {
    Json(json!({ "message": "Webhook server is running" }))
}

pub fn router<B: Broker + 'static>(state: Arc<WebhookState<B>>) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/webhook", post(handle_webhook::<B>))
        .with_state(state)
}

/// Bind and serve until Ctrl+C
pub async fn serve<B: Broker + 'static>(bind: &str, state: WebhookState<B>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!(
        "Webhook server listening on {} ({} account(s))",
        bind,
        state.accounts().len()
    );

    axum::serve(listener, router(Arc::new(state)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Webhook server failed")
}

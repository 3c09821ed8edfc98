//! Bybit V5 REST client
//!
//! Public market data needs no credentials; account and order endpoints are
//! signed. Every response goes through the same path: rate-limit headers are
//! recorded, HTTP errors become [`BrokerError::Transport`], and the
//! `retCode` envelope is unwrapped into [`BrokerError::Api`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{debug, warn};

use super::auth::{
    Credentials, HEADER_API_KEY, HEADER_RECV_WINDOW, HEADER_SIGN, HEADER_TIMESTAMP,
};
use super::rate_limit::{RateLimiter, RateLimiterConfig};
use super::types::*;
use crate::broker::{Broker, BrokerPosition, OrderAck, OrderRequest};
use crate::data::timeframe_duration;
use crate::error::{BrokerError, BrokerResult};
use crate::{Candle, Symbol};

/// Base URL for mainnet
pub const MAINNET_URL: &str = "https://api.bybit.com";

/// Base URL for testnet
pub const TESTNET_URL: &str = "https://api-testnet.bybit.com";

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Product category, `linear` for USDT perpetuals
    pub category: String,
    pub recv_window_ms: u64,
    /// Request timeout duration
    pub timeout: Duration,
    pub rate_limiter: RateLimiterConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: MAINNET_URL.to_string(),
            category: "linear".to_string(),
            recv_window_ms: 5000,
            timeout: Duration::from_secs(10),
            rate_limiter: RateLimiterConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn testnet(mut self) -> Self {
        self.base_url = TESTNET_URL.to_string();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_recv_window(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = recv_window_ms;
        self
    }
}

/// Bybit Exchange API Client
#[derive(Clone)]
pub struct BybitClient {
    credentials: Option<Credentials>,
    http_client: Client,
    config: ClientConfig,
    rate_limiter: RateLimiter,
}

impl std::fmt::Debug for BybitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitClient")
            .field("base_url", &self.config.base_url)
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}

impl BybitClient {
    /// Client for public endpoints only
    pub fn public(config: ClientConfig) -> BrokerResult<Self> {
        Self::build(None, config)
    }

    /// Client for public and signed endpoints
    pub fn with_credentials(credentials: Credentials, config: ClientConfig) -> BrokerResult<Self> {
        Self::build(Some(credentials), config)
    }

    fn build(credentials: Option<Credentials>, config: ClientConfig) -> BrokerResult<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            credentials,
            http_client,
            rate_limiter: RateLimiter::new(config.rate_limiter.clone()),
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn credentials(&self) -> BrokerResult<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| BrokerError::data("signed endpoint called without credentials"))
    }

    fn signed_headers(&self, payload: &str) -> BrokerResult<Vec<(&'static str, String)>> {
        let creds = self.credentials()?;
        let timestamp = Utc::now().timestamp_millis();
        let recv_window = self.config.recv_window_ms;
        Ok(vec![
            (HEADER_API_KEY, creds.api_key().to_string()),
            (HEADER_SIGN, creds.sign(timestamp, recv_window, payload)),
            (HEADER_TIMESTAMP, timestamp.to_string()),
            (HEADER_RECV_WINDOW, recv_window.to_string()),
        ])
    }

    /// Send a request and unwrap the response envelope
    async fn execute<T>(&self, request: reqwest::RequestBuilder) -> BrokerResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.rate_limiter.acquire().await;

        let response = request.send().await?;
        self.rate_limiter.observe(response.headers()).await;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(BrokerError::Transport(format!("HTTP {}: {}", status, text)));
        }

        let envelope: ApiResponse = serde_json::from_str(&text)
            .map_err(|e| BrokerError::data(format!("malformed response: {}", e)))?;
        envelope.into_result()
    }

    async fn get<T>(&self, path: &str, query: &[(&str, String)], signed: bool) -> BrokerResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let query_string = encode_query(query);
        let url = if query_string.is_empty() {
            self.url(path)
        } else {
            format!("{}?{}", self.url(path), query_string)
        };
        debug!("GET {}", url);

        let mut request = self.http_client.get(&url);
        if signed {
            for (name, value) in self.signed_headers(&query_string)? {
                request = request.header(name, value);
            }
        }
        self.execute(request).await
    }

    async fn signed_post<B, T>(&self, path: &str, body: &B) -> BrokerResult<T>
    where
        B: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        let json_body = serde_json::to_string(body)?;
        debug!("POST {} {}", path, json_body);

        let mut request = self
            .http_client
            .post(self.url(path))
            .header("Content-Type", "application/json");
        for (name, value) in self.signed_headers(&json_body)? {
            request = request.header(name, value);
        }
        self.execute(request.body(json_body)).await
    }

    // ==================== PUBLIC ENDPOINTS ====================

    /// Klines oldest first. The still-forming candle is dropped.
    pub async fn get_klines(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
        start: Option<DateTime<Utc>>,
    ) -> BrokerResult<Vec<Candle>> {
        let interval = interval_code(timeframe)
            .ok_or_else(|| BrokerError::data(format!("unsupported timeframe {}", timeframe)))?;

        let mut query = vec![
            ("category", self.config.category.clone()),
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.clamp(1, 1000).to_string()),
        ];
        if let Some(start) = start {
            query.push(("start", start.timestamp_millis().to_string()));
        }

        let result: ListResult<KlineRow> = self.get("/v5/market/kline", &query, false).await?;
        if result.list.is_empty() {
            return Err(BrokerError::data(format!("no klines returned for {}", symbol)));
        }

        let mut candles = result
            .list
            .iter()
            .map(parse_kline)
            .collect::<BrokerResult<Vec<_>>>()?;
        candles.sort_by_key(|c| c.datetime);

        if let Some(interval) = timeframe_duration(timeframe) {
            drop_forming_candle(&mut candles, interval, Utc::now());
        }
        Ok(candles)
    }

    pub async fn get_last_price(&self, symbol: &str) -> BrokerResult<f64> {
        let query = [
            ("category", self.config.category.clone()),
            ("symbol", symbol.to_string()),
        ];
        let result: ListResult<TickerInfo> = self.get("/v5/market/tickers", &query, false).await?;
        result
            .list
            .first()
            .and_then(TickerInfo::last_price_f64)
            .ok_or_else(|| BrokerError::data(format!("no ticker price for {}", symbol)))
    }

    // ==================== AUTHENTICATED ENDPOINTS ====================

    pub async fn get_wallet_equity(&self) -> BrokerResult<f64> {
        let query = [("accountType", "UNIFIED".to_string())];
        let result: ListResult<WalletAccount> =
            self.get("/v5/account/wallet-balance", &query, true).await?;
        result
            .list
            .first()
            .and_then(WalletAccount::total_equity_f64)
            .ok_or_else(|| BrokerError::data("wallet balance missing totalEquity"))
    }

    pub async fn get_position(&self, symbol: &str) -> BrokerResult<Option<BrokerPosition>> {
        let query = [
            ("category", self.config.category.clone()),
            ("symbol", symbol.to_string()),
        ];
        let result: ListResult<PositionInfo> =
            self.get("/v5/position/list", &query, true).await?;

        for info in &result.list {
            let side = match info.side() {
                Ok(Some(side)) => side,
                Ok(None) => continue,
                Err(e) => {
                    warn!(symbol = %info.symbol, "Skipping position: {}", e);
                    continue;
                }
            };
            let size = info.size_f64();
            if size > 0.0 {
                return Ok(Some(BrokerPosition {
                    symbol: Symbol::new(&info.symbol),
                    side,
                    size,
                    avg_price: info.avg_price_f64(),
                }));
            }
        }
        Ok(None)
    }

    pub async fn create_market_order(&self, order: &OrderRequest) -> BrokerResult<OrderAck> {
        let body = CreateOrderBody {
            category: &self.config.category,
            symbol: order.symbol.as_str(),
            side: order.side.as_str(),
            order_type: "Market",
            qty: order.quantity.normalize().to_string(),
            reduce_only: order.reduce_only,
        };
        let result: CreateOrderResult = self.signed_post("/v5/order/create", &body).await?;
        Ok(OrderAck {
            order_id: result.order_id,
        })
    }
}

impl Broker for BybitClient {
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: &str,
        limit: usize,
        start: Option<DateTime<Utc>>,
    ) -> BrokerResult<Vec<Candle>> {
        self.get_klines(symbol.as_str(), timeframe, limit, start).await
    }

    async fn latest_price(&self, symbol: &Symbol) -> BrokerResult<f64> {
        self.get_last_price(symbol.as_str()).await
    }

    async fn wallet_equity(&self) -> BrokerResult<f64> {
        self.get_wallet_equity().await
    }

    async fn open_position(&self, symbol: &Symbol) -> BrokerResult<Option<BrokerPosition>> {
        self.get_position(symbol.as_str()).await
    }

    async fn place_market_order(&self, order: &OrderRequest) -> BrokerResult<OrderAck> {
        self.create_market_order(order).await
    }
}

/// `k=v&k=v` in the given order; the signature covers this exact string
pub fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Remove the last candle if its interval has not closed at `now`
pub fn drop_forming_candle(
    candles: &mut Vec<Candle>,
    interval: chrono::Duration,
    now: DateTime<Utc>,
) {
    if candles
        .last()
        .is_some_and(|last| last.datetime + interval > now)
    {
        candles.pop();
    }
}

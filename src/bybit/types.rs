//! Types and models for the Bybit V5 API
//!
//! Numeric fields arrive as JSON strings; the `*_f64` helpers parse them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, BrokerResult};
use crate::{Candle, Side};

/// Response envelope shared by every endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

impl ApiResponse {
    /// Typed `result` for `retCode == 0`, `BrokerError::Api` otherwise
    pub fn into_result<T: serde::de::DeserializeOwned>(self) -> BrokerResult<T> {
        if self.ret_code != 0 {
            return Err(BrokerError::Api {
                code: self.ret_code,
                message: self.ret_msg,
            });
        }
        serde_json::from_value(self.result)
            .map_err(|e| BrokerError::data(format!("unexpected result shape: {}", e)))
    }
}

/// `{ "list": [...] }` result payload
#[derive(Debug, Clone, Deserialize)]
pub struct ListResult<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
}

/// Kline row: `[startTime, open, high, low, close, volume, turnover]`
pub type KlineRow = Vec<String>;

pub fn parse_kline(row: &KlineRow) -> BrokerResult<Candle> {
    if row.len() < 6 {
        return Err(BrokerError::data(format!(
            "kline row has {} fields, expected 7",
            row.len()
        )));
    }
    let num = |i: usize, name: &str| -> BrokerResult<f64> {
        row[i]
            .parse::<f64>()
            .map_err(|_| BrokerError::data(format!("unparsable kline {}: {:?}", name, row[i])))
    };

    let start_ms: i64 = row[0]
        .parse()
        .map_err(|_| BrokerError::data(format!("unparsable kline start: {:?}", row[0])))?;
    let datetime = DateTime::<Utc>::from_timestamp_millis(start_ms)
        .ok_or_else(|| BrokerError::data(format!("kline start out of range: {}", start_ms)))?;

    Candle::new(
        datetime,
        num(1, "open")?,
        num(2, "high")?,
        num(3, "low")?,
        num(4, "close")?,
        num(5, "volume")?,
    )
    .map_err(|e| BrokerError::data(format!("invalid candle at {}: {}", datetime, e)))
}

/// Bybit interval code for a timeframe label
pub fn interval_code(timeframe: &str) -> Option<&'static str> {
    Some(match timeframe {
        "1m" => "1",
        "3m" => "3",
        "5m" => "5",
        "15m" => "15",
        "30m" => "30",
        "1h" => "60",
        "2h" => "120",
        "4h" => "240",
        "6h" => "360",
        "12h" => "720",
        "1d" => "D",
        "1w" => "W",
        _ => return None,
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerInfo {
    pub symbol: String,
    pub last_price: String,
}

impl TickerInfo {
    pub fn last_price_f64(&self) -> Option<f64> {
        self.last_price.parse().ok().filter(|p: &f64| *p > 0.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccount {
    #[serde(default)]
    pub account_type: String,
    #[serde(default)]
    pub total_equity: String,
}

impl WalletAccount {
    pub fn total_equity_f64(&self) -> Option<f64> {
        self.total_equity.parse().ok()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionInfo {
    pub symbol: String,
    /// `Buy`, `Sell`, or empty when flat
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub avg_price: String,
}

impl PositionInfo {
    /// `Ok(None)` for an empty side or zero size
    pub fn side(&self) -> BrokerResult<Option<Side>> {
        match self.side.as_str() {
            "" | "None" => Ok(None),
            other => Ok(Some(other.parse::<Side>()?)),
        }
    }

    pub fn size_f64(&self) -> f64 {
        self.size.parse().unwrap_or(0.0)
    }

    pub fn avg_price_f64(&self) -> f64 {
        self.avg_price.parse().unwrap_or(0.0)
    }
}

/// Body for `POST /v5/order/create`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderBody<'a> {
    pub category: &'a str,
    pub symbol: &'a str,
    pub side: &'a str,
    pub order_type: &'a str,
    pub qty: String,
    pub reduce_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResult {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub order_link_id: String,
}

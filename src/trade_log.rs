//! CSV trade journal
//!
//! One row per open→close cycle, keyed by `trade_id`. A row is appended when
//! a position opens and rewritten in place when it is re-levelled or closed.
//! The last row without a `sell_price` is the account's open position, which
//! is how positions survive a restart.
//!
//! Every operation is a full read-modify-write of the file, serialized by a
//! process-wide mutex per journal. Rewrites go through a temp file + rename.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::risk::{gross_pnl, round_trip_commission};
use crate::{Position, Regime, Side, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Gain,
    Loss,
}

/// One journal row. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    /// Entry time
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    /// Entry price, whatever the side
    pub buy_price: f64,
    /// Exit price; empty while open
    pub sell_price: Option<f64>,
    pub quantity: f64,
    pub stop_loss: f64,
    pub stop_gain: f64,
    pub potential_loss: f64,
    pub potential_gain: f64,
    pub timeframe: String,
    pub setup: String,
    pub outcome: Option<Outcome>,
    pub commission: Option<f64>,
    pub old_balance: f64,
    pub new_balance: Option<f64>,
    pub secondary_stop_loss: Option<f64>,
    pub secondary_stop_gain: Option<f64>,
    pub sell_time: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub side: Side,
    pub entry_lateral: u8,
    pub exit_lateral: Option<u8>,
}

/// Trade ids are derived from the entry time
pub fn trade_id_for(time: DateTime<Utc>) -> String {
    time.format("%Y%m%d%H%M%S%3f").to_string()
}

impl TradeRecord {
    /// Row for a freshly opened position
    pub fn opened(
        position: &Position,
        timeframe: &str,
        setup: &str,
        balance_before: f64,
    ) -> Self {
        let qty = position.quantity;
        TradeRecord {
            trade_id: position.trade_id.clone(),
            timestamp: position.entry_time,
            symbol: position.symbol.to_string(),
            buy_price: position.entry_price,
            sell_price: None,
            quantity: qty,
            stop_loss: position.stop_loss,
            stop_gain: position.take_profit,
            potential_loss: (position.entry_price - position.stop_loss).abs() * qty,
            potential_gain: (position.take_profit - position.entry_price).abs() * qty,
            timeframe: timeframe.to_string(),
            setup: setup.to_string(),
            outcome: None,
            commission: None,
            old_balance: balance_before,
            new_balance: None,
            secondary_stop_loss: None,
            secondary_stop_gain: None,
            sell_time: None,
            side: position.side,
            entry_lateral: u8::from(position.regime.is_lateral()),
            exit_lateral: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.sell_price.is_none()
    }

    /// Record levels set by a regime change
    pub fn relevel(&mut self, stop_loss: f64, take_profit: f64) {
        self.secondary_stop_loss = Some(stop_loss);
        self.secondary_stop_gain = Some(take_profit);
    }

    /// Fill the exit fields. Returns net PnL.
    pub fn close(
        &mut self,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        exit_regime: Regime,
        commission_rate: f64,
    ) -> f64 {
        let gross = gross_pnl(self.side, self.buy_price, exit_price, self.quantity);
        let commission =
            round_trip_commission(self.buy_price, exit_price, self.quantity, commission_rate);
        let net = gross - commission;

        self.sell_price = Some(exit_price);
        self.sell_time = Some(exit_time);
        self.commission = Some(commission);
        self.new_balance = Some(self.old_balance + net);
        self.outcome = Some(if net > 0.0 { Outcome::Gain } else { Outcome::Loss });
        self.exit_lateral = Some(u8::from(exit_regime.is_lateral()));
        net
    }

    /// Rebuild the open position this row describes
    pub fn to_position(&self) -> Position {
        Position {
            symbol: Symbol::new(&self.symbol),
            side: self.side,
            entry_price: self.buy_price,
            quantity: self.quantity,
            stop_loss: self.secondary_stop_loss.unwrap_or(self.stop_loss),
            take_profit: self.secondary_stop_gain.unwrap_or(self.stop_gain),
            regime: Regime::from_lateral(self.entry_lateral == 1),
            entry_time: self.timestamp,
            trade_id: self.trade_id.clone(),
        }
    }
}

/// `trade_history.csv` + `main` → `trade_history.main.csv`
pub fn path_for_account(base: impl AsRef<Path>, account: &str) -> PathBuf {
    let base = base.as_ref();
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "trade_history".to_string());
    let file_name = match base.extension() {
        Some(ext) => format!("{}.{}.{}", stem, account, ext.to_string_lossy()),
        None => format!("{}.{}", stem, account),
    };
    base.with_file_name(file_name)
}

/// Journal backed by one CSV file
#[derive(Debug)]
pub struct TradeLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TradeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        // A panic mid-write leaves the file intact (temp + rename), so a
        // poisoned lock is still usable.
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_unlocked(&self) -> Result<Vec<TradeRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("Failed to open trade log {}", self.path.display()))?;
        reader
            .deserialize()
            .enumerate()
            .map(|(i, row)| {
                row.with_context(|| {
                    format!("Failed to parse trade log row {} in {}", i + 1, self.path.display())
                })
            })
            .collect()
    }

    /// Sibling of the log file named `<file name>.tmp`
    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn write_unlocked(&self, records: &[TradeRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp = self.temp_path();
        {
            let mut writer = csv::Writer::from_path(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            if records.is_empty() {
                writer.write_record(HEADER)?;
            }
            for record in records {
                writer.serialize(record)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    /// All rows in file order
    pub fn read_all(&self) -> Result<Vec<TradeRecord>> {
        let _guard = self.guard();
        self.read_unlocked()
    }

    pub fn append(&self, record: &TradeRecord) -> Result<()> {
        let _guard = self.guard();
        let mut records = self.read_unlocked()?;
        records.push(record.clone());
        self.write_unlocked(&records)?;
        debug!(trade_id = %record.trade_id, "Trade log row appended");
        Ok(())
    }

    /// Apply `f` to the row with `trade_id`. Returns the updated row, or
    /// `None` if no such row exists (the file is left untouched).
    pub fn update<F>(&self, trade_id: &str, f: F) -> Result<Option<TradeRecord>>
    where
        F: FnOnce(&mut TradeRecord),
    {
        let _guard = self.guard();
        let mut records = self.read_unlocked()?;
        let Some(record) = records.iter_mut().rev().find(|r| r.trade_id == trade_id) else {
            return Ok(None);
        };
        f(record);
        let updated = record.clone();
        self.write_unlocked(&records)?;
        debug!(trade_id = %trade_id, "Trade log row updated");
        Ok(Some(updated))
    }

    /// Most recent row for `symbol`, if it has no exit yet
    pub fn open_position(&self, symbol: &Symbol) -> Result<Option<TradeRecord>> {
        let records = self.read_all()?;
        Ok(records
            .into_iter()
            .rev()
            .find(|r| r.symbol.eq_ignore_ascii_case(symbol.as_str()))
            .filter(TradeRecord::is_open))
    }
}

/// Column order of the journal
pub const HEADER: [&str; 22] = [
    "trade_id",
    "timestamp",
    "symbol",
    "buy_price",
    "sell_price",
    "quantity",
    "stop_loss",
    "stop_gain",
    "potential_loss",
    "potential_gain",
    "timeframe",
    "setup",
    "outcome",
    "commission",
    "old_balance",
    "new_balance",
    "secondary_stop_loss",
    "secondary_stop_gain",
    "sell_time",
    "type",
    "entry_lateral",
    "exit_lateral",
];

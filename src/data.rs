//! Data loading and management
//!
//! CSV candle loading for backtests, timeframe helpers, and the rolling
//! candle window the live trader keeps per symbol.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::path::Path;
use tracing::{info, warn};

use crate::Candle;

// =============================================================================
// Timeframes
// =============================================================================

/// Length of one candle for a timeframe label (`15m`, `1h`, `4h`, `1d`, `1w`)
pub fn timeframe_duration(timeframe: &str) -> Option<Duration> {
    let split = timeframe.find(|c: char| !c.is_ascii_digit())?;
    let (count, unit) = timeframe.split_at(split);
    let count: i64 = count.parse().ok().filter(|n| *n > 0)?;
    match unit {
        "m" => Some(Duration::minutes(count)),
        "h" => Some(Duration::hours(count)),
        "d" => Some(Duration::days(count)),
        "w" => Some(Duration::weeks(count)),
        _ => None,
    }
}

// =============================================================================
// CSV Data Loading
// =============================================================================

fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = raw.parse::<DateTime<Utc>>() {
        return Some(dt);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ndt.and_utc());
        }
    }
    // Epoch milliseconds or seconds
    let n: i64 = raw.parse().ok()?;
    if n > 100_000_000_000 {
        DateTime::<Utc>::from_timestamp_millis(n)
    } else {
        DateTime::<Utc>::from_timestamp(n, 0)
    }
}

/// Load OHLCV data from a CSV file with a header row.
///
/// Columns: datetime, open, high, low, close[, volume]. The datetime column
/// accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, or epoch seconds/milliseconds.
/// Rows are sorted by time; invalid candles are an error.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path.as_ref())
        .with_context(|| format!("Failed to open CSV file {}", path.as_ref().display()))?;

    let mut candles = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let dt_str = record.get(0).context("Missing datetime column")?;
        let datetime = parse_datetime(dt_str)
            .with_context(|| format!("Failed to parse datetime: {}", dt_str))?;

        let field = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("Row {}: missing {} column", row_idx + 1, name))?
                .parse::<f64>()
                .with_context(|| format!("Row {}: failed to parse {}", row_idx + 1, name))
        };

        let volume = match record.get(5) {
            Some(v) if !v.is_empty() => field(5, "volume")?,
            _ => 0.0,
        };

        let candle = Candle::new(
            datetime,
            field(1, "open")?,
            field(2, "high")?,
            field(3, "low")?,
            field(4, "close")?,
            volume,
        )
        .with_context(|| format!("Row {}: invalid candle", row_idx + 1))?;

        candles.push(candle);
    }

    candles.sort_by_key(|c| c.datetime);
    candles.dedup_by_key(|c| c.datetime);

    info!("Loaded {} candles from {}", candles.len(), path.as_ref().display());
    Ok(candles)
}

// =============================================================================
// Rolling Candle Window
// =============================================================================

/// Most recent closed candles for one symbol
#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: Vec<Candle>,
    max_candles: usize,
}

impl CandleWindow {
    pub fn new(max_candles: usize) -> Self {
        CandleWindow {
            candles: Vec::new(),
            max_candles: max_candles.max(2),
        }
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.candles.last().map(|c| c.datetime)
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Merge freshly fetched candles (oldest first).
    ///
    /// Candles at an existing timestamp replace the stored one; older ones
    /// are ignored. Returns how many new candles were appended.
    pub fn merge(&mut self, fresh: Vec<Candle>) -> usize {
        let mut added = 0;
        for candle in fresh {
            match self.candles.last_mut() {
                Some(last) if candle.datetime < last.datetime => continue,
                Some(last) if candle.datetime == last.datetime => *last = candle,
                _ => {
                    self.candles.push(candle);
                    added += 1;
                }
            }
        }

        if self.candles.len() > self.max_candles {
            let excess = self.candles.len() - self.max_candles;
            self.candles.drain(..excess);
        }
        added
    }

    /// True when a candle closing after the stored one should exist by `now`
    pub fn needs_refresh(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        match self.last_time() {
            Some(last) => now >= last + interval + interval,
            None => true,
        }
    }
}

// =============================================================================
// Data Validation
// =============================================================================

/// Warn about gaps and ordering problems; returns the number of issues
pub fn check_continuity(candles: &[Candle], interval: Duration) -> usize {
    let mut issues = 0;
    for pair in candles.windows(2) {
        let gap = pair[1].datetime - pair[0].datetime;
        if gap <= Duration::zero() {
            warn!("Candles not chronological at {}", pair[1].datetime);
            issues += 1;
        } else if gap != interval {
            warn!(
                "Gap of {} minutes before {}",
                gap.num_minutes(),
                pair[1].datetime
            );
            issues += 1;
        }
    }
    issues
}

// =============================================================================
// Tests
// =============================================================================

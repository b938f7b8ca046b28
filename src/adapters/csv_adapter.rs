//! CSV candle feed adapter.
//!
//! Expected columns: `timestamp,open,high,low,close,volume`, with a header
//! row. Timestamps are RFC 3339 (converted to UTC), `%Y-%m-%d %H:%M:%S`, or a
//! bare `%Y-%m-%d` for daily data. Rows are returned in file order; ordering
//! and gap checks belong to the engine.

use crate::domain::candle::{Candle, Interval};
use crate::domain::error::SimError;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fs;
use std::path::PathBuf;

pub struct CsvAdapter {
    path: PathBuf,
}

impl CsvAdapter {
    /// `path` is either a single CSV file or a directory holding
    /// `<SYMBOL>_<interval>.csv` files.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn csv_path(&self, symbol: &str, interval: Interval) -> PathBuf {
        if self.path.is_dir() {
            self.path.join(format!("{}_{}.csv", symbol, interval))
        } else {
            self.path.clone()
        }
    }
}

pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| format!("invalid timestamp '{}'", raw))
}

fn parse_row(
    record: &csv::StringRecord,
    symbol: &str,
    interval: Interval,
) -> Result<Candle, String> {
    let field = |idx: usize, name: &str| -> Result<&str, String> {
        record
            .get(idx)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format!("missing {} column", name))
    };
    let number = |idx: usize, name: &str| -> Result<f64, String> {
        let raw = field(idx, name)?;
        raw.parse::<f64>()
            .map_err(|e| format!("invalid {} value '{}': {}", name, raw, e))
    };

    Ok(Candle {
        symbol: symbol.to_string(),
        timestamp: parse_timestamp(field(0, "timestamp")?)?,
        open: number(1, "open")?,
        high: number(2, "high")?,
        low: number(3, "low")?,
        close: number(4, "close")?,
        volume: number(5, "volume")?,
        interval,
    })
}

impl DataPort for CsvAdapter {
    fn fetch_candles(&self, symbol: &str, interval: Interval) -> Result<Vec<Candle>, SimError> {
        let path = self.csv_path(symbol, interval);
        let content = fs::read_to_string(&path).map_err(|e| {
            SimError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to read {}: {}", path.display(), e),
            ))
        })?;

        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(content.as_bytes());
        let mut candles = Vec::new();

        for (index, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| SimError::Data {
                index,
                reason: format!("CSV parse error: {}", e),
            })?;
            let candle =
                parse_row(&record, symbol, interval).map_err(|reason| SimError::Data { index, reason })?;
            candles.push(candle);
        }

        Ok(candles)
    }
}

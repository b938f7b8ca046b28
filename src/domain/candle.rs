//! OHLCV candle representation and feed validation.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::SimError;

/// Candle interval. Periods-per-year figures assume a market open 24/7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Interval {
    pub fn minutes(self) -> i64 {
        match self {
            Interval::M1 => 1,
            Interval::M5 => 5,
            Interval::M15 => 15,
            Interval::M30 => 30,
            Interval::H1 => 60,
            Interval::H4 => 240,
            Interval::D1 => 1440,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::minutes(self.minutes())
    }

    pub fn periods_per_year(self) -> f64 {
        (365 * 1440 / self.minutes()) as f64
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
        };
        f.write_str(s)
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" => Ok(Interval::M1),
            "5m" => Ok(Interval::M5),
            "15m" => Ok(Interval::M15),
            "30m" => Ok(Interval::M30),
            "1h" => Ok(Interval::H1),
            "4h" => Ok(Interval::H4),
            "1d" => Ok(Interval::D1),
            other => Err(format!("unknown interval '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub interval: Interval,
}

impl Candle {
    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }

    fn check_fields(&self) -> Result<(), String> {
        for (name, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("{} must be a positive finite number, got {}", name, value));
            }
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(format!("volume must be non-negative, got {}", self.volume));
        }
        if self.high < self.open.max(self.close) {
            return Err(format!("high {} below open/close", self.high));
        }
        if self.low > self.open.min(self.close) {
            return Err(format!("low {} above open/close", self.low));
        }
        if self.symbol.trim().is_empty() {
            return Err("symbol is empty".to_string());
        }
        Ok(())
    }
}

/// Check one candle against its predecessor in the feed.
pub fn validate_next(prev: Option<&Candle>, candle: &Candle, index: usize) -> Result<(), SimError> {
    let data_err = |reason: String| SimError::Data { index, reason };

    candle.check_fields().map_err(data_err)?;

    if let Some(prev) = prev {
        if candle.timestamp <= prev.timestamp {
            return Err(data_err(format!(
                "timestamp {} not after previous {}",
                candle.timestamp, prev.timestamp
            )));
        }
        if candle.symbol != prev.symbol {
            return Err(data_err(format!(
                "symbol {} differs from feed symbol {}",
                candle.symbol, prev.symbol
            )));
        }
        if candle.interval != prev.interval {
            return Err(data_err(format!(
                "interval {} differs from feed interval {}",
                candle.interval, prev.interval
            )));
        }
    }
    Ok(())
}

/// Validate a whole candle sequence before any step runs.
pub fn validate_candles(candles: &[Candle]) -> Result<(), SimError> {
    let mut prev = None;
    for (index, candle) in candles.iter().enumerate() {
        validate_next(prev, candle, index)?;
        prev = Some(candle);
    }
    Ok(())
}

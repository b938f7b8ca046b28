#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tradesim::domain::candle::{Candle, Interval};
use tradesim::domain::error::{SimError, StrategyError};
use tradesim::domain::indicator::{IndicatorProvider, IndicatorSnapshot};
use tradesim::domain::signal::Signal;
use tradesim::domain::strategy::{StepContext, Strategy};
use tradesim::ports::data_port::DataPort;

pub const SYMBOL: &str = "BTCUSDT";

pub fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Daily candle whose open, high, low and close are all `close`.
pub fn flat_candle(step: usize, close: f64) -> Candle {
    Candle {
        symbol: SYMBOL.to_string(),
        timestamp: start() + Duration::days(step as i64),
        open: close,
        high: close,
        low: close,
        close,
        volume: 1_000.0,
        interval: Interval::D1,
    }
}

pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| flat_candle(i, close))
        .collect()
}

/// Hourly candles following a sine wave, with a proper high/low range.
pub fn wave_candles(n: usize) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.3).sin() * 15.0 + i as f64 * 0.05;
            let open = 100.0 + ((i as f64 - 1.0) * 0.3).sin() * 15.0 + i as f64 * 0.05;
            Candle {
                symbol: SYMBOL.to_string(),
                timestamp: start() + Duration::hours(i as i64),
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                volume: 500.0 + i as f64,
                interval: Interval::H1,
            }
        })
        .collect()
}

/// Emits fixed signals at fixed steps.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStrategy {
    pub script: Vec<(usize, Signal)>,
}

impl ScriptedStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, step: usize, signal: Signal) -> Self {
        self.script.push((step, signal));
        self
    }
}

impl Strategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    fn decide(&mut self, ctx: &StepContext<'_>) -> Result<Vec<Signal>, StrategyError> {
        Ok(self
            .script
            .iter()
            .filter(|(step, _)| *step == ctx.step)
            .map(|(_, signal)| signal.clone())
            .collect())
    }
}

/// Fails at a given step.
pub struct FailAt(pub usize);

impl Strategy for FailAt {
    fn name(&self) -> &str {
        "fail_at"
    }

    fn decide(&mut self, ctx: &StepContext<'_>) -> Result<Vec<Signal>, StrategyError> {
        if ctx.step == self.0 {
            Err(StrategyError::new("model unavailable"))
        } else {
            Ok(Vec::new())
        }
    }
}

/// What a provider or strategy observed at one step.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub history_len: usize,
    pub last_timestamp: Option<NaiveDateTime>,
}

pub type ObservationLog = Rc<RefCell<Vec<Observation>>>;

/// Provider that records every history it is shown.
pub struct RecordingProvider {
    pub log: ObservationLog,
}

impl IndicatorProvider for RecordingProvider {
    fn snapshot(&mut self, history: &[Candle]) -> IndicatorSnapshot {
        self.log.borrow_mut().push(Observation {
            history_len: history.len(),
            last_timestamp: history.last().map(|c| c.timestamp),
        });
        let mut snapshot = IndicatorSnapshot::new();
        if let Some(last) = history.last() {
            snapshot.insert("LAST_CLOSE", last.close);
        }
        snapshot
    }
}

/// Strategy that checks it is never shown a candle beyond the current one.
pub struct CausalityCheck {
    pub log: ObservationLog,
}

impl Strategy for CausalityCheck {
    fn name(&self) -> &str {
        "causality_check"
    }

    fn decide(&mut self, ctx: &StepContext<'_>) -> Result<Vec<Signal>, StrategyError> {
        if ctx.history.len() != ctx.step + 1 {
            return Err(StrategyError::new("history length does not match step"));
        }
        if ctx.history.last() != Some(ctx.candle) {
            return Err(StrategyError::new("history does not end at current candle"));
        }
        if ctx.indicators.get_named("LAST_CLOSE") != Some(ctx.candle.close) {
            return Err(StrategyError::new("indicator snapshot is not for this step"));
        }
        self.log.borrow_mut().push(Observation {
            history_len: ctx.history.len(),
            last_timestamp: Some(ctx.candle.timestamp),
        });
        Ok(Vec::new())
    }
}

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Candle>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_candles(mut self, symbol: &str, candles: Vec<Candle>) -> Self {
        self.data.insert(symbol.to_string(), candles);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_candles(&self, symbol: &str, interval: Interval) -> Result<Vec<Candle>, SimError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(SimError::Io(std::io::Error::other(reason.clone())));
        }
        Ok(self
            .data
            .get(symbol)
            .map(|candles| {
                candles
                    .iter()
                    .filter(|c| c.interval == interval)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

//! MACD (Moving Average Convergence Divergence).
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line, seeded with the SMA of the first
//! `signal` valid line values
//! Histogram = MACD Line - Signal Line
//!
//! The graph evaluates the EMAs as shared dependency nodes, so this module
//! only combines already computed values.

use super::ema::EmaState;

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

pub fn line(fast: Option<f64>, slow: Option<f64>) -> Option<f64> {
    Some(fast? - slow?)
}

pub fn histogram(line: Option<f64>, signal: Option<f64>) -> Option<f64> {
    Some(line? - signal?)
}

/// Signal-line recurrence; skips bars where the line is still warming up.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalState {
    ema: EmaState,
}

impl SignalState {
    pub fn new(period: usize) -> Self {
        SignalState {
            ema: EmaState::new(period),
        }
    }

    pub fn update(&mut self, line: Option<f64>) -> Option<f64> {
        self.ema.update(line?)
    }
}

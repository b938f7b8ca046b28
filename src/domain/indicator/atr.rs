//! Average True Range with Wilder's smoothing.
//!
//! TR[0] = high - low, TR[i] = max(H-L, |H-C[i-1]|, |L-C[i-1]|).
//! Seeded with the mean of the first n true ranges.

use crate::domain::candle::Candle;

#[derive(Debug, Clone, PartialEq)]
pub struct AtrState {
    period: usize,
    prev_close: Option<f64>,
    count: usize,
    value: f64,
}

impl AtrState {
    pub fn new(period: usize) -> Self {
        AtrState {
            period,
            prev_close: None,
            count: 0,
            value: 0.0,
        }
    }

    pub fn update(&mut self, candle: &Candle) -> Option<f64> {
        let tr = match self.prev_close.replace(candle.close) {
            Some(prev) => candle.true_range(prev),
            None => candle.high - candle.low,
        };
        let n = self.period as f64;

        self.count += 1;
        if self.count < self.period {
            self.value += tr;
            None
        } else if self.count == self.period {
            self.value = (self.value + tr) / n;
            Some(self.value)
        } else {
            self.value = (self.value * (n - 1.0) + tr) / n;
            Some(self.value)
        }
    }
}

//! Exponential Moving Average.
//!
//! k = 2/(n+1), seeded with the SMA of the first n inputs, then
//! EMA[i] = x[i]*k + EMA[i-1]*(1-k). The first n-1 inputs produce nothing.
//!
//! The state is fed raw values rather than candles so the MACD signal line
//! can run the same recurrence over MACD line values.

#[derive(Debug, Clone, PartialEq)]
pub struct EmaState {
    period: usize,
    k: f64,
    count: usize,
    sum: f64,
    value: Option<f64>,
}

impl EmaState {
    pub fn new(period: usize) -> Self {
        EmaState {
            period,
            k: 2.0 / (period as f64 + 1.0),
            count: 0,
            sum: 0.0,
            value: None,
        }
    }

    pub fn update(&mut self, x: f64) -> Option<f64> {
        self.count += 1;
        self.value = match self.value {
            Some(prev) => Some(x * self.k + prev * (1.0 - self.k)),
            None => {
                self.sum += x;
                if self.count == self.period {
                    Some(self.sum / self.period as f64)
                } else {
                    None
                }
            }
        };
        self.value
    }
}

//! Window statistics over closing prices: SMA and population standard
//! deviation.
//!
//! STDDEV(n)[i] = sqrt(sum((C[i-j] - SMA(n)[i])^2 for j in 0..n) / n)
//! Both need n closes before producing a value.

use crate::domain::candle::Candle;

fn window(history: &[Candle], period: usize) -> Option<&[Candle]> {
    if period == 0 || history.len() < period {
        return None;
    }
    Some(&history[history.len() - period..])
}

/// Mean close of the last `period` candles.
pub fn sma_at(history: &[Candle], period: usize) -> Option<f64> {
    let window = window(history, period)?;
    Some(window.iter().map(|c| c.close).sum::<f64>() / period as f64)
}

/// Population standard deviation of the last `period` closes.
pub fn stddev_at(history: &[Candle], period: usize) -> Option<f64> {
    let window = window(history, period)?;
    let mean = window.iter().map(|c| c.close).sum::<f64>() / period as f64;
    let variance = window
        .iter()
        .map(|c| {
            let diff = c.close - mean;
            diff * diff
        })
        .sum::<f64>()
        / period as f64;
    Some(variance.sqrt())
}

//! Candle feed port.

use crate::domain::candle::{Candle, Interval};
use crate::domain::error::SimError;

pub trait DataPort {
    /// All candles for `symbol` at `interval`, oldest first.
    fn fetch_candles(&self, symbol: &str, interval: Interval) -> Result<Vec<Candle>, SimError>;
}

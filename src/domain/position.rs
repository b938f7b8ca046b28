//! Open positions and closed-trade records.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => f.write_str("long"),
            Side::Short => f.write_str("short"),
        }
    }
}

/// An open position. Only the portfolio creates or mutates these; quantity
/// is always strictly positive while the position exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    pub accumulated_fees: f64,
    pub last_price: f64,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.side == Side::Long
    }

    pub fn is_short(&self) -> bool {
        self.side == Side::Short
    }

    /// Contribution to account equity at `price`.
    ///
    /// A short holds its escrowed entry notional plus the price difference,
    /// so its value moves opposite to the market.
    pub fn market_value(&self, price: f64) -> f64 {
        match self.side {
            Side::Long => self.quantity * price,
            Side::Short => self.quantity * (2.0 * self.entry_price - price),
        }
    }

    /// Gross of fees.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity * self.side.sign()
    }

    pub fn current_value(&self) -> f64 {
        self.market_value(self.last_price)
    }

    pub fn current_unrealized_pnl(&self) -> f64 {
        self.unrealized_pnl(self.last_price)
    }

    /// Percentage move in the position's favour at the last mark.
    pub fn return_pct(&self) -> f64 {
        (self.last_price - self.entry_price) / self.entry_price * 100.0 * self.side.sign()
    }

    pub fn should_stop_loss(&self, stop_loss_pct: f64) -> bool {
        self.return_pct() <= -stop_loss_pct
    }

    pub fn should_take_profit(&self, take_profit_pct: f64) -> bool {
        self.return_pct() >= take_profit_pct
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    pub exit_price: f64,
    pub exit_time: NaiveDateTime,
    pub quantity: f64,
    /// `(exit - entry) * quantity * sign - closing fee`.
    pub realized_pnl: f64,
    /// Closing fee plus this trade's share of the opening fees.
    pub fees: f64,
}

impl Trade {
    pub fn duration_seconds(&self) -> i64 {
        (self.exit_time - self.entry_time).num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn sample_long_position() -> Position {
        Position {
            symbol: "BTCUSDT".into(),
            side: Side::Long,
            quantity: 100.0,
            entry_price: 50.0,
            entry_time: ts(15),
            accumulated_fees: 0.0,
            last_price: 50.0,
        }
    }

    fn sample_short_position() -> Position {
        Position {
            symbol: "ETHUSDT".into(),
            side: Side::Short,
            quantity: 100.0,
            entry_price: 100.0,
            entry_time: ts(15),
            accumulated_fees: 0.0,
            last_price: 100.0,
        }
    }

    #[test]
    fn side_predicates() {
        assert!(sample_long_position().is_long());
        assert!(!sample_long_position().is_short());
        assert!(sample_short_position().is_short());
    }

    #[test]
    fn market_value_long() {
        let pos = sample_long_position();
        assert!((pos.market_value(55.0) - 5500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn market_value_short_moves_against_price() {
        let pos = sample_short_position();
        // escrow 10000 + profit 500
        assert!((pos.market_value(95.0) - 10_500.0).abs() < f64::EPSILON);
        // escrow 10000 - loss 1000
        assert!((pos.market_value(110.0) - 9_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unrealized_pnl_long() {
        let pos = sample_long_position();
        assert!((pos.unrealized_pnl(55.0) - 500.0).abs() < f64::EPSILON);
        assert!((pos.unrealized_pnl(45.0) + 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unrealized_pnl_short() {
        let pos = sample_short_position();
        assert!((pos.unrealized_pnl(90.0) - 1000.0).abs() < f64::EPSILON);
        assert!((pos.unrealized_pnl(110.0) + 1000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn current_value_uses_last_mark() {
        let mut pos = sample_long_position();
        pos.last_price = 60.0;
        assert!((pos.current_value() - 6000.0).abs() < f64::EPSILON);
        assert!((pos.current_unrealized_pnl() - 1000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stop_loss_long() {
        let mut pos = sample_long_position();
        pos.last_price = 48.0;
        assert!(!pos.should_stop_loss(5.0));
        pos.last_price = 47.0;
        assert!(pos.should_stop_loss(5.0));
        assert!(!pos.should_take_profit(5.0));
    }

    #[test]
    fn stop_loss_and_take_profit_short() {
        let mut pos = sample_short_position();
        pos.last_price = 106.0;
        assert!(pos.should_stop_loss(5.0));
        pos.last_price = 90.0;
        assert!((pos.return_pct() - 10.0).abs() < 1e-12);
        assert!(pos.should_take_profit(9.0));
        assert!(!pos.should_take_profit(11.0));
        assert!(!pos.should_stop_loss(5.0));
    }

    #[test]
    fn trade_duration() {
        let trade = Trade {
            symbol: "BTCUSDT".into(),
            side: Side::Long,
            entry_price: 50.0,
            entry_time: ts(15),
            exit_price: 55.0,
            exit_time: ts(20),
            quantity: 100.0,
            realized_pnl: 500.0,
            fees: 0.0,
        };
        assert_eq!(trade.duration_seconds(), 5 * 86_400);
    }
}

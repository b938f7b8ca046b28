//! Portfolio state, fill accounting and equity tracking.
//!
//! The portfolio is the only place cash moves. It is synchronous and owned
//! by exactly one run.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;

use super::error::ValidationError;
use super::position::{Position, Side, Trade};

/// Relative tolerance when deciding whether a reduction closes the whole
/// position.
const QUANTITY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub cash: f64,
    pub positions_market_value: f64,
    pub total_equity: f64,
}

/// Serializable end-of-run account state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSnapshot {
    pub cash: f64,
    pub total_equity: f64,
    pub positions: Vec<Position>,
    pub opening_fees_paid: f64,
    pub closing_fees_paid: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    positions: BTreeMap<String, Position>,
    trades: Vec<Trade>,
    equity_curve: Vec<EquityPoint>,
    opening_fees_paid: f64,
    closing_fees_paid: f64,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            positions: BTreeMap::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            opening_fees_paid: 0.0,
            closing_fees_paid: 0.0,
        }
    }

    /// Open a position or add to an existing one on the same side.
    pub fn open(
        &mut self,
        symbol: &str,
        side: Side,
        quantity: f64,
        price: f64,
        time: NaiveDateTime,
        fee: f64,
    ) -> Result<(), ValidationError> {
        check_fill(quantity, price, fee)?;

        let required = quantity * price + fee;
        if required > self.cash {
            return Err(ValidationError::InsufficientFunds {
                required,
                available: self.cash,
            });
        }

        match self.positions.get_mut(symbol) {
            Some(pos) if pos.side != side => {
                return Err(ValidationError::OppositePosition {
                    symbol: symbol.to_string(),
                });
            }
            Some(pos) => {
                let total = pos.quantity + quantity;
                pos.entry_price = (pos.quantity * pos.entry_price + quantity * price) / total;
                pos.quantity = total;
                pos.accumulated_fees += fee;
                pos.last_price = price;
            }
            None => {
                self.positions.insert(
                    symbol.to_string(),
                    Position {
                        symbol: symbol.to_string(),
                        side,
                        quantity,
                        entry_price: price,
                        entry_time: time,
                        accumulated_fees: fee,
                        last_price: price,
                    },
                );
            }
        }

        self.cash -= required;
        self.opening_fees_paid += fee;
        Ok(())
    }

    /// Close `quantity` units of the position in `symbol`, removing the
    /// position when nothing is left. Returns the recorded trade.
    pub fn reduce_or_close(
        &mut self,
        symbol: &str,
        quantity: f64,
        price: f64,
        time: NaiveDateTime,
        fee: f64,
    ) -> Result<Trade, ValidationError> {
        check_fill(quantity, price, fee)?;

        let pos = self
            .positions
            .get_mut(symbol)
            .ok_or_else(|| ValidationError::UnknownPosition {
                symbol: symbol.to_string(),
            })?;

        let held = pos.quantity;
        let tolerance = QUANTITY_EPSILON * held.max(1.0);
        if quantity > held + tolerance {
            return Err(ValidationError::InsufficientQuantity {
                symbol: symbol.to_string(),
                requested: quantity,
                held,
            });
        }
        let full_close = (held - quantity).abs() <= tolerance;
        let closed = if full_close { held } else { quantity };

        let fee_share = pos.accumulated_fees * closed / held;
        let realized_pnl = (price - pos.entry_price) * closed * pos.side.sign() - fee;
        let proceeds = match pos.side {
            Side::Long => closed * price,
            Side::Short => closed * (2.0 * pos.entry_price - price),
        };

        let trade = Trade {
            symbol: pos.symbol.clone(),
            side: pos.side,
            entry_price: pos.entry_price,
            entry_time: pos.entry_time,
            exit_price: price,
            exit_time: time,
            quantity: closed,
            realized_pnl,
            fees: fee_share + fee,
        };

        if full_close {
            self.positions.remove(symbol);
        } else {
            pos.quantity -= closed;
            pos.accumulated_fees -= fee_share;
            pos.last_price = price;
        }

        self.cash += proceeds - fee;
        self.closing_fees_paid += fee;
        self.trades.push(trade.clone());
        Ok(trade)
    }

    /// Update marks for every open position with a quoted price. Moves no
    /// cash and records nothing.
    pub fn mark_to_market<I, K>(&mut self, prices: I)
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        for (symbol, price) in prices {
            if let Some(pos) = self.positions.get_mut(symbol.as_ref()) {
                pos.last_price = price;
            }
        }
    }

    pub fn positions_market_value(&self) -> f64 {
        self.positions.values().map(Position::current_value).sum()
    }

    /// cash + market value of open positions at their last marks.
    pub fn equity(&self) -> f64 {
        self.cash + self.positions_market_value()
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.positions
            .values()
            .map(Position::current_unrealized_pnl)
            .sum()
    }

    pub fn realized_pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.realized_pnl).sum()
    }

    pub fn opening_fees_paid(&self) -> f64 {
        self.opening_fees_paid
    }

    pub fn fees_paid(&self) -> f64 {
        self.opening_fees_paid + self.closing_fees_paid
    }

    pub fn get_position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    /// Append an equity point from the current state.
    pub fn record_equity(&mut self, timestamp: NaiveDateTime) -> &EquityPoint {
        let positions_market_value = self.positions_market_value();
        self.equity_curve.push(EquityPoint {
            timestamp,
            cash: self.cash,
            positions_market_value,
            total_equity: self.cash + positions_market_value,
        });
        &self.equity_curve[self.equity_curve.len() - 1]
    }

    /// Replace the most recent equity point with one taken from the
    /// current state, keeping its timestamp.
    pub(crate) fn rerecord_last_equity(&mut self) {
        if let Some(last) = self.equity_curve.pop() {
            self.record_equity(last.timestamp);
        }
    }

    pub fn view(&self) -> PortfolioView<'_> {
        PortfolioView { portfolio: self }
    }

    pub fn snapshot(&self) -> PortfolioSnapshot {
        PortfolioSnapshot {
            cash: self.cash,
            total_equity: self.equity(),
            positions: self.positions.values().cloned().collect(),
            opening_fees_paid: self.opening_fees_paid,
            closing_fees_paid: self.closing_fees_paid,
        }
    }

    pub(crate) fn into_parts(self) -> (Vec<Trade>, Vec<EquityPoint>) {
        (self.trades, self.equity_curve)
    }
}

fn check_fill(quantity: f64, price: f64, fee: f64) -> Result<(), ValidationError> {
    if !quantity.is_finite() || quantity <= 0.0 {
        return Err(ValidationError::InvalidQuantity {
            reason: format!("quantity must be positive, got {}", quantity),
        });
    }
    if !price.is_finite() || price <= 0.0 {
        return Err(ValidationError::InvalidQuantity {
            reason: format!("price must be positive, got {}", price),
        });
    }
    if !fee.is_finite() || fee < 0.0 {
        return Err(ValidationError::InvalidQuantity {
            reason: format!("fee must be non-negative, got {}", fee),
        });
    }
    Ok(())
}

/// Read-only window onto a portfolio handed to strategies.
#[derive(Debug, Clone, Copy)]
pub struct PortfolioView<'a> {
    portfolio: &'a Portfolio,
}

impl<'a> PortfolioView<'a> {
    pub fn cash(&self) -> f64 {
        self.portfolio.cash
    }

    pub fn equity(&self) -> f64 {
        self.portfolio.equity()
    }

    pub fn position(&self, symbol: &str) -> Option<&'a Position> {
        self.portfolio.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &'a Position> + 'a {
        self.portfolio.positions.values()
    }

    pub fn position_count(&self) -> usize {
        self.portfolio.positions.len()
    }

    /// The last `n` closed trades, oldest first.
    pub fn recent_trades(&self, n: usize) -> &'a [Trade] {
        let trades = &self.portfolio.trades;
        &trades[trades.len().saturating_sub(n)..]
    }
}

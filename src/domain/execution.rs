//! Fill simulation: commission and slippage models, signal sizing, and
//! application of a signal to the portfolio.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::candle::Candle;
use super::error::{SimError, ValidationError};
use super::portfolio::Portfolio;
use super::position::{Side, Trade};
use super::signal::{Signal, SignalAction, SignalSize};

const BPS: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionModel {
    /// `commission_rate` per fill, regardless of size.
    Fixed,
    /// `notional * commission_rate / 10_000`.
    Bps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlippageModel {
    None,
    /// Buys fill `slippage_rate` bps above the reference price, sells below.
    FixedBps,
}

/// Which candle price positions are marked and filled against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePrice {
    Close,
    Open,
    Typical,
}

impl ReferencePrice {
    pub fn of(self, candle: &Candle) -> f64 {
        match self {
            ReferencePrice::Close => candle.close,
            ReferencePrice::Open => candle.open,
            ReferencePrice::Typical => candle.typical_price(),
        }
    }
}

macro_rules! str_enum {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $($ty::$variant => f.write_str($s),)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($s => Ok($ty::$variant),)+
                    other => Err(format!("unknown value '{}'", other)),
                }
            }
        }
    };
}

str_enum!(CommissionModel { Fixed => "fixed", Bps => "bps" });
str_enum!(SlippageModel { None => "none", FixedBps => "fixed_bps" });
str_enum!(ReferencePrice { Close => "close", Open => "open", Typical => "typical" });

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub commission_model: CommissionModel,
    pub commission_rate: f64,
    pub slippage_model: SlippageModel,
    pub slippage_rate: f64,
    pub force_close_at_end: bool,
    pub reference_price: ReferencePrice,
    /// Cap on the notional of a single opening order.
    pub max_position_size: Option<f64>,
    /// Close a position once it is this many percent against entry.
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    /// Close everything and refuse new positions once equity is this many
    /// percent below its peak.
    pub max_drawdown_pct: Option<f64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            commission_model: CommissionModel::Bps,
            commission_rate: 0.0,
            slippage_model: SlippageModel::None,
            slippage_rate: 0.0,
            force_close_at_end: true,
            reference_price: ReferencePrice::Close,
            max_position_size: None,
            stop_loss_pct: None,
            take_profit_pct: None,
            max_drawdown_pct: None,
        }
    }
}

impl ExecutionConfig {
    /// Reject parameters no fill could be computed from.
    pub fn validate(&self) -> Result<(), SimError> {
        if !self.commission_rate.is_finite() || self.commission_rate < 0.0 {
            return Err(SimError::config_invalid(
                "execution",
                "commission_rate",
                format!("must be a non-negative number, got {}", self.commission_rate),
            ));
        }
        if self.commission_model == CommissionModel::Bps && self.commission_rate >= BPS {
            return Err(SimError::config_invalid(
                "execution",
                "commission_rate",
                "bps commission must be below 10000",
            ));
        }
        if !self.slippage_rate.is_finite() || self.slippage_rate < 0.0 {
            return Err(SimError::config_invalid(
                "execution",
                "slippage_rate",
                format!("must be a non-negative number, got {}", self.slippage_rate),
            ));
        }
        if self.slippage_model == SlippageModel::FixedBps && self.slippage_rate >= BPS {
            return Err(SimError::config_invalid(
                "execution",
                "slippage_rate",
                "bps slippage must be below 10000",
            ));
        }
        check_positive("max_position_size", self.max_position_size)?;
        check_positive("stop_loss_pct", self.stop_loss_pct)?;
        check_positive("take_profit_pct", self.take_profit_pct)?;
        check_positive("max_drawdown_pct", self.max_drawdown_pct)?;
        if self.max_drawdown_pct.is_some_and(|pct| pct > 100.0) {
            return Err(SimError::config_invalid(
                "execution",
                "max_drawdown_pct",
                "max_drawdown_pct must not exceed 100",
            ));
        }
        Ok(())
    }
}

fn check_positive(key: &str, value: Option<f64>) -> Result<(), SimError> {
    match value {
        Some(v) if !v.is_finite() || v <= 0.0 => Err(SimError::config_invalid(
            "execution",
            key,
            format!("must be a positive number, got {}", v),
        )),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    fn to_open(side: Side) -> Self {
        match side {
            Side::Long => Direction::Buy,
            Side::Short => Direction::Sell,
        }
    }

    fn to_close(side: Side) -> Self {
        match side {
            Side::Long => Direction::Sell,
            Side::Short => Direction::Buy,
        }
    }
}

pub fn calculate_commission(notional: f64, config: &ExecutionConfig) -> f64 {
    match config.commission_model {
        CommissionModel::Fixed => config.commission_rate,
        CommissionModel::Bps => notional * config.commission_rate / BPS,
    }
}

/// Buys move up, sells move down.
pub fn apply_slippage(reference: f64, direction: Direction, config: &ExecutionConfig) -> f64 {
    let rate = match config.slippage_model {
        SlippageModel::None => return reference,
        SlippageModel::FixedBps => config.slippage_rate / BPS,
    };
    match direction {
        Direction::Buy => reference * (1.0 + rate),
        Direction::Sell => reference * (1.0 - rate),
    }
}

fn check_limit(limit: Option<f64>, price: f64, direction: Direction) -> Result<(), ValidationError> {
    let Some(limit) = limit else {
        return Ok(());
    };
    let marketable = match direction {
        Direction::Buy => price <= limit,
        Direction::Sell => price >= limit,
    };
    if marketable {
        Ok(())
    } else {
        Err(ValidationError::LimitNotMarketable { limit, price })
    }
}

fn check_fraction(fraction: f64) -> Result<f64, ValidationError> {
    if fraction.is_finite() && fraction > 0.0 && fraction <= 1.0 {
        Ok(fraction)
    } else {
        Err(ValidationError::InvalidQuantity {
            reason: format!("fraction must be in (0, 1], got {}", fraction),
        })
    }
}

/// Largest quantity whose notional plus commission fits in `budget`.
fn quantity_for_budget(
    budget: f64,
    price: f64,
    cash: f64,
    config: &ExecutionConfig,
) -> Result<f64, ValidationError> {
    let mut quantity = match config.commission_model {
        CommissionModel::Fixed => (budget - config.commission_rate) / price,
        CommissionModel::Bps => budget / (price * (1.0 + config.commission_rate / BPS)),
    };
    if quantity <= 0.0 {
        return Err(ValidationError::InsufficientFunds {
            required: calculate_commission(0.0, config),
            available: budget,
        });
    }
    // Keep rounding from pushing a whole-cash order just past the limit.
    if quantity * price + calculate_commission(quantity * price, config) > cash {
        quantity *= 1.0 - 1e-12;
    }
    Ok(quantity)
}

/// Outcome of a successfully applied signal.
#[derive(Debug, Clone, PartialEq)]
pub enum Fill {
    Opened {
        side: Side,
        quantity: f64,
        price: f64,
        fee: f64,
    },
    Closed(Trade),
}

/// Validate `signal` against the current candle and portfolio state and
/// apply it. Nothing changes when an error is returned.
pub fn execute_signal(
    portfolio: &mut Portfolio,
    signal: &Signal,
    candle: &Candle,
    config: &ExecutionConfig,
) -> Result<Fill, ValidationError> {
    if signal.symbol != candle.symbol {
        return Err(ValidationError::UnknownSymbol {
            symbol: signal.symbol.clone(),
        });
    }
    let reference = config.reference_price.of(candle);

    match signal.action {
        SignalAction::OpenLong => open(portfolio, signal, Side::Long, reference, candle, config),
        SignalAction::OpenShort => open(portfolio, signal, Side::Short, reference, candle, config),
        SignalAction::Close | SignalAction::Reduce => {
            let position = portfolio.get_position(&signal.symbol).ok_or_else(|| {
                ValidationError::UnknownPosition {
                    symbol: signal.symbol.clone(),
                }
            })?;
            let held = position.quantity;
            let direction = Direction::to_close(position.side);

            let quantity = match (signal.action, signal.size) {
                (SignalAction::Close, _) => held,
                (_, SignalSize::Quantity(q)) => q,
                (_, SignalSize::Fraction(f)) => held * check_fraction(f)?,
            };

            let price = apply_slippage(reference, direction, config);
            check_limit(signal.limit_price, price, direction)?;
            let fee = calculate_commission(quantity * price, config);

            let trade =
                portfolio.reduce_or_close(&signal.symbol, quantity, price, candle.timestamp, fee)?;
            Ok(Fill::Closed(trade))
        }
    }
}

fn open(
    portfolio: &mut Portfolio,
    signal: &Signal,
    side: Side,
    reference: f64,
    candle: &Candle,
    config: &ExecutionConfig,
) -> Result<Fill, ValidationError> {
    let direction = Direction::to_open(side);
    let price = apply_slippage(reference, direction, config);
    check_limit(signal.limit_price, price, direction)?;

    let quantity = match signal.size {
        SignalSize::Quantity(q) => {
            if let Some(max) = config.max_position_size {
                let notional = q * price;
                if notional > max {
                    return Err(ValidationError::PositionLimit { notional, max });
                }
            }
            q
        }
        SignalSize::Fraction(f) => {
            let mut budget = portfolio.cash * check_fraction(f)?;
            if let Some(max) = config.max_position_size {
                budget = budget.min(max);
            }
            quantity_for_budget(budget, price, portfolio.cash, config)?
        }
    };
    let fee = calculate_commission(quantity * price, config);

    portfolio.open(&signal.symbol, side, quantity, price, candle.timestamp, fee)?;
    Ok(Fill::Opened {
        side,
        quantity,
        price,
        fee,
    })
}

//! Domain error types.
//!
//! `ValidationError` is recoverable: the engine skips the offending signal
//! and keeps going. Everything in `SimError` aborts the run.

use serde::Serialize;

use super::candle::Candle;

/// Reason a signal could not be applied to the portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("insufficient funds: need {required:.2}, have {available:.2}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("insufficient quantity for {symbol}: requested {requested}, held {held}")]
    InsufficientQuantity {
        symbol: String,
        requested: f64,
        held: f64,
    },

    #[error("no open position for {symbol}")]
    UnknownPosition { symbol: String },

    #[error("unknown symbol {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("{symbol} already has an open position on the opposite side")]
    OppositePosition { symbol: String },

    #[error("invalid quantity: {reason}")]
    InvalidQuantity { reason: String },

    #[error("limit {limit} not marketable at {price}")]
    LimitNotMarketable { limit: f64, price: f64 },

    #[error("order notional {notional:.2} exceeds max position size {max:.2}")]
    PositionLimit { notional: f64, max: f64 },

    #[error("trading halted after max drawdown breach")]
    TradingHalted,
}

/// Error raised from inside a strategy's `decide` callback.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct StrategyError {
    pub message: String,
}

impl StrategyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Top-level error type for tradesim.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("invalid candle at index {index}: {reason}")]
    Data { index: usize, reason: String },

    #[error("strategy failed at step {step} ({ts}): {source}", ts = .candle.timestamp)]
    Strategy {
        step: usize,
        candle: Box<Candle>,
        #[source]
        source: StrategyError,
    },

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SimError {
    pub(crate) fn config_invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        SimError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Process exit status for this error category.
    pub fn exit_code(&self) -> u8 {
        match self {
            SimError::Io(_) | SimError::Serialize(_) => 1,
            SimError::ConfigParse { .. }
            | SimError::ConfigMissing { .. }
            | SimError::ConfigInvalid { .. } => 2,
            SimError::Data { .. } => 3,
            SimError::Strategy { .. } => 4,
        }
    }
}

impl From<&SimError> for std::process::ExitCode {
    fn from(err: &SimError) -> Self {
        std::process::ExitCode::from(err.exit_code())
    }
}

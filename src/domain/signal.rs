//! Trading intents emitted by strategies.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    OpenLong,
    OpenShort,
    Close,
    Reduce,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalAction::OpenLong => "open_long",
            SignalAction::OpenShort => "open_short",
            SignalAction::Close => "close",
            SignalAction::Reduce => "reduce",
        };
        f.write_str(s)
    }
}

/// How much to trade.
///
/// For opens, `Fraction` is the share of current cash to commit with fees
/// included. For reductions it is the share of the held quantity. `Close`
/// ignores size entirely.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSize {
    Quantity(f64),
    Fraction(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    pub symbol: String,
    pub size: SignalSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
}

impl Signal {
    pub fn open_long(symbol: impl Into<String>, size: SignalSize) -> Self {
        Self::new(SignalAction::OpenLong, symbol, size)
    }

    pub fn open_short(symbol: impl Into<String>, size: SignalSize) -> Self {
        Self::new(SignalAction::OpenShort, symbol, size)
    }

    pub fn close(symbol: impl Into<String>) -> Self {
        Self::new(SignalAction::Close, symbol, SignalSize::Fraction(1.0))
    }

    pub fn reduce(symbol: impl Into<String>, size: SignalSize) -> Self {
        Self::new(SignalAction::Reduce, symbol, size)
    }

    pub fn with_limit(mut self, limit_price: f64) -> Self {
        self.limit_price = Some(limit_price);
        self
    }

    fn new(action: SignalAction, symbol: impl Into<String>, size: SignalSize) -> Self {
        Signal {
            action,
            symbol: symbol.into(),
            size,
            limit_price: None,
        }
    }
}

/// A signal the engine refused, with the step it arrived on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedSignal {
    pub step: usize,
    pub timestamp: NaiveDateTime,
    pub signal: Signal,
    pub reason: ValidationError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_action() {
        let s = Signal::open_long("BTCUSDT", SignalSize::Fraction(0.5));
        assert_eq!(s.action, SignalAction::OpenLong);
        assert_eq!(s.symbol, "BTCUSDT");
        assert!(s.limit_price.is_none());

        let s = Signal::close("BTCUSDT").with_limit(101.5);
        assert_eq!(s.action, SignalAction::Close);
        assert_eq!(s.limit_price, Some(101.5));
    }

    #[test]
    fn action_display_matches_serde() {
        for action in [
            SignalAction::OpenLong,
            SignalAction::OpenShort,
            SignalAction::Close,
            SignalAction::Reduce,
        ] {
            let json = serde_json::to_value(action).unwrap();
            assert_eq!(json, action.to_string());
        }
    }

    #[test]
    fn signal_json_shape() {
        let s = Signal::reduce("ETHUSDT", SignalSize::Quantity(2.0));
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["action"], "reduce");
        assert_eq!(json["size"]["quantity"], 2.0);
        assert!(json.get("limit_price").is_none());
    }
}

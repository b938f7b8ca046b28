//! Technical indicators.
//!
//! - `IndicatorType`: indicator identity + parameters (graph node key and
//!   snapshot name via `Display`)
//! - `IndicatorSnapshot`: named values at the current step
//! - `IndicatorProvider`: the seam the engine calls once per step
//! - `IndicatorGraph`: dependency-aware, memoized provider

pub mod atr;
pub mod ema;
pub mod graph;
pub mod macd;
pub mod psar;
pub mod rsi;
pub mod stddev;

pub use graph::IndicatorGraph;

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::candle::Candle;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndicatorType {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    Atr(usize),
    Stddev(usize),
    /// MACD line.
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    MacdSignal {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    MacdHistogram {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    ParabolicSar {
        acceleration_x1000: u32,
        maximum_x1000: u32,
    },
}

/// PSAR factors are stored in thousandths.
pub const PSAR_FACTOR_STEP: f64 = 0.001;

/// Check PSAR factors before they are quantized. On failure, names the
/// offending factor alongside the reason.
pub fn check_psar_factors(acceleration: f64, maximum: f64) -> Result<(), (&'static str, String)> {
    if !acceleration.is_finite() || acceleration < PSAR_FACTOR_STEP {
        return Err((
            "acceleration",
            format!("acceleration must be at least {}, got {}", PSAR_FACTOR_STEP, acceleration),
        ));
    }
    if !maximum.is_finite() || maximum > 1.0 {
        return Err(("maximum", format!("maximum must be at most 1, got {}", maximum)));
    }
    if maximum < acceleration {
        return Err((
            "maximum",
            format!("maximum ({}) must be at least acceleration ({})", maximum, acceleration),
        ));
    }
    Ok(())
}

impl IndicatorType {
    /// Factors are rounded to [`PSAR_FACTOR_STEP`]; run them through
    /// [`check_psar_factors`] first when they come from user input.
    pub fn psar(acceleration: f64, maximum: f64) -> Self {
        IndicatorType::ParabolicSar {
            acceleration_x1000: (acceleration * 1000.0).round() as u32,
            maximum_x1000: (maximum * 1000.0).round() as u32,
        }
    }

    /// Nodes this indicator is computed from, in evaluation order.
    pub fn dependencies(&self) -> Vec<IndicatorType> {
        match *self {
            IndicatorType::Macd { fast, slow, .. } => {
                vec![IndicatorType::Ema(fast), IndicatorType::Ema(slow)]
            }
            IndicatorType::MacdSignal { fast, slow, signal } => {
                vec![IndicatorType::Macd { fast, slow, signal }]
            }
            IndicatorType::MacdHistogram { fast, slow, signal } => vec![
                IndicatorType::Macd { fast, slow, signal },
                IndicatorType::MacdSignal { fast, slow, signal },
            ],
            _ => Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match *self {
            IndicatorType::Sma(n)
            | IndicatorType::Ema(n)
            | IndicatorType::Rsi(n)
            | IndicatorType::Atr(n)
            | IndicatorType::Stddev(n) => {
                if n == 0 {
                    return Err(format!("{}: period must be positive", self));
                }
            }
            IndicatorType::Macd { fast, slow, signal }
            | IndicatorType::MacdSignal { fast, slow, signal }
            | IndicatorType::MacdHistogram { fast, slow, signal } => {
                if fast == 0 || slow == 0 || signal == 0 {
                    return Err(format!("{}: periods must be positive", self));
                }
                if fast >= slow {
                    return Err(format!("{}: fast period must be below slow", self));
                }
            }
            IndicatorType::ParabolicSar {
                acceleration_x1000,
                maximum_x1000,
            } => {
                if acceleration_x1000 == 0 || maximum_x1000 < acceleration_x1000 {
                    return Err(format!(
                        "{}: need 0 < acceleration <= maximum",
                        self
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Atr(period) => write!(f, "ATR({})", period),
            IndicatorType::Stddev(period) => write!(f, "STDDEV({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::MacdSignal { fast, slow, signal } => {
                write!(f, "MACD_SIGNAL({},{},{})", fast, slow, signal)
            }
            IndicatorType::MacdHistogram { fast, slow, signal } => {
                write!(f, "MACD_HIST({},{},{})", fast, slow, signal)
            }
            IndicatorType::ParabolicSar {
                acceleration_x1000,
                maximum_x1000,
            } => {
                let acceleration = *acceleration_x1000 as f64 / 1000.0;
                let maximum = *maximum_x1000 as f64 / 1000.0;
                write!(f, "PSAR({},{})", acceleration, maximum)
            }
        }
    }
}

impl Serialize for IndicatorType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for IndicatorType {
    type Err = String;

    /// Parses the `Display` form, e.g. `EMA(12)` or `MACD(12,26,9)`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, rest) = s
            .split_once('(')
            .ok_or_else(|| format!("expected NAME(args), got '{}'", s))?;
        let args = rest
            .strip_suffix(')')
            .ok_or_else(|| format!("missing ')' in '{}'", s))?;
        let args: Vec<&str> = args.split(',').map(str::trim).collect();

        let usize_arg = |i: usize| -> Result<usize, String> {
            args[i]
                .parse::<usize>()
                .map_err(|_| format!("invalid period '{}' in '{}'", args[i], s))
        };
        let expect_args = |n: usize| -> Result<(), String> {
            if args.len() == n {
                Ok(())
            } else {
                Err(format!("'{}' takes {} argument(s)", name.trim(), n))
            }
        };

        let indicator = match name.trim().to_uppercase().as_str() {
            "SMA" => {
                expect_args(1)?;
                IndicatorType::Sma(usize_arg(0)?)
            }
            "EMA" => {
                expect_args(1)?;
                IndicatorType::Ema(usize_arg(0)?)
            }
            "RSI" => {
                expect_args(1)?;
                IndicatorType::Rsi(usize_arg(0)?)
            }
            "ATR" => {
                expect_args(1)?;
                IndicatorType::Atr(usize_arg(0)?)
            }
            "STDDEV" => {
                expect_args(1)?;
                IndicatorType::Stddev(usize_arg(0)?)
            }
            macd @ ("MACD" | "MACD_SIGNAL" | "MACD_HIST") => {
                expect_args(3)?;
                let (fast, slow, signal) = (usize_arg(0)?, usize_arg(1)?, usize_arg(2)?);
                match macd {
                    "MACD" => IndicatorType::Macd { fast, slow, signal },
                    "MACD_SIGNAL" => IndicatorType::MacdSignal { fast, slow, signal },
                    _ => IndicatorType::MacdHistogram { fast, slow, signal },
                }
            }
            "PSAR" => {
                expect_args(2)?;
                let parse = |v: &str| {
                    v.parse::<f64>()
                        .ok()
                        .filter(|x| x.is_finite() && *x >= 0.0)
                        .ok_or_else(|| format!("invalid factor '{}' in '{}'", v, s))
                };
                let (acceleration, maximum) = (parse(args[0])?, parse(args[1])?);
                check_psar_factors(acceleration, maximum)
                    .map_err(|(_, reason)| format!("{}: {}", s, reason))?;
                IndicatorType::psar(acceleration, maximum)
            }
            other => return Err(format!("unknown indicator '{}'", other)),
        };
        indicator.validate()?;
        Ok(indicator)
    }
}

/// Indicator values at one step, keyed by indicator name. Indicators still
/// warming up are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct IndicatorSnapshot {
    values: BTreeMap<String, f64>,
}

impl IndicatorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, indicator: &IndicatorType) -> Option<f64> {
        self.get_named(&indicator.to_string())
    }

    pub fn get_named(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Computes indicator values from the candles observed so far.
///
/// `history` ends at the current step and never contains later candles.
pub trait IndicatorProvider {
    fn snapshot(&mut self, history: &[Candle]) -> IndicatorSnapshot;
}

/// Provider for strategies that read only raw candles.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIndicators;

impl IndicatorProvider for NoIndicators {
    fn snapshot(&mut self, _history: &[Candle]) -> IndicatorSnapshot {
        IndicatorSnapshot::new()
    }
}

impl<P: IndicatorProvider + ?Sized> IndicatorProvider for Box<P> {
    fn snapshot(&mut self, history: &[Candle]) -> IndicatorSnapshot {
        (**self).snapshot(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indicator_type_display_sma() {
        assert_eq!(IndicatorType::Sma(20).to_string(), "SMA(20)");
    }

    #[test]
    fn indicator_type_display_macd() {
        let macd = IndicatorType::Macd {
            fast: 12,
            slow: 26,
            signal: 9,
        };
        assert_eq!(macd.to_string(), "MACD(12,26,9)");
    }

    #[test]
    fn indicator_type_display_psar() {
        assert_eq!(IndicatorType::psar(0.02, 0.2).to_string(), "PSAR(0.02,0.2)");
    }

    #[test]
    fn parse_round_trips_display() {
        for name in [
            "SMA(20)",
            "EMA(12)",
            "RSI(14)",
            "ATR(14)",
            "STDDEV(10)",
            "MACD(12,26,9)",
            "MACD_SIGNAL(12,26,9)",
            "MACD_HIST(12,26,9)",
            "PSAR(0.02,0.2)",
        ] {
            let parsed: IndicatorType = name.parse().unwrap();
            assert_eq!(parsed.to_string(), name);
        }
        assert_eq!("ema( 5 )".parse::<IndicatorType>().unwrap(), IndicatorType::Ema(5));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("EMA".parse::<IndicatorType>().is_err());
        assert!("EMA(0)".parse::<IndicatorType>().is_err());
        assert!("EMA(1,2)".parse::<IndicatorType>().is_err());
        assert!("MACD(26,12,9)".parse::<IndicatorType>().is_err());
        assert!("VWAP(3)".parse::<IndicatorType>().is_err());
        assert!("PSAR(0.3,0.2)".parse::<IndicatorType>().is_err());
    }

    #[test]
    fn psar_factors_checked_before_rounding() {
        let err = "PSAR(0.0004,0.2)".parse::<IndicatorType>().unwrap_err();
        assert!(err.contains("acceleration must be at least 0.001"), "{}", err);

        let err = "PSAR(0.02,1e12)".parse::<IndicatorType>().unwrap_err();
        assert!(err.contains("maximum must be at most 1"), "{}", err);

        assert_eq!(check_psar_factors(0.02, 0.01).unwrap_err().0, "maximum");
        assert!(check_psar_factors(0.001, 0.001).is_ok());
        assert!(check_psar_factors(f64::NAN, 0.2).is_err());
    }

    #[test]
    fn macd_dependencies() {
        let hist = IndicatorType::MacdHistogram {
            fast: 12,
            slow: 26,
            signal: 9,
        };
        assert_eq!(hist.dependencies().len(), 2);
        let line = IndicatorType::Macd {
            fast: 12,
            slow: 26,
            signal: 9,
        };
        assert_eq!(
            line.dependencies(),
            vec![IndicatorType::Ema(12), IndicatorType::Ema(26)]
        );
        assert!(IndicatorType::Sma(5).dependencies().is_empty());
    }

    #[test]
    fn snapshot_lookup() {
        let mut snapshot = IndicatorSnapshot::new();
        snapshot.insert("SMA(5)", 101.5);
        assert_eq!(snapshot.get(&IndicatorType::Sma(5)), Some(101.5));
        assert_eq!(snapshot.get(&IndicatorType::Sma(6)), None);
        assert_eq!(snapshot.len(), 1);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["SMA(5)"], 101.5);
    }

    #[test]
    fn no_indicators_is_empty() {
        let mut provider = NoIndicators;
        assert!(provider.snapshot(&[]).is_empty());
    }
}
